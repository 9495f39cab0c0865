//! Trader, bucket, and exposure queries backing the read API.

use sqlx::Row;

use crate::domain::{Addr, PositionState};

use super::super::StoreError;
use super::{ExposureRow, OrderBucketRow, Repository, StopBucketRow};

/// Sort key for bucket listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketSort {
    #[default]
    PositionId,
    Lots,
}

impl Repository {
    // =========================================================================
    // Trader queries
    // =========================================================================

    /// All position ids for an owner, matched case-insensitively, with their
    /// states. Ordered by id for stable grouping.
    pub async fn trader_positions(
        &self,
        addr: &Addr,
    ) -> Result<Vec<(u32, PositionState)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, state FROM positions
            WHERE owner_addr_lc = ?
            ORDER BY id ASC
            "#,
        )
        .bind(addr.as_str())
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .filter_map(|r| {
                PositionState::from_str(&r.get::<String, _>("state"))
                    .map(|s| (r.get::<i64, _>("id") as u32, s))
            })
            .collect())
    }

    // =========================================================================
    // Bucket queries
    // =========================================================================

    /// Resting orders at one price bucket.
    pub async fn order_rows_at(
        &self,
        asset_id: u32,
        bucket: i64,
        side: Option<bool>,
        sort: BucketSort,
        descending: bool,
    ) -> Result<Vec<OrderBucketRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT asset_id, bucket_id, position_id, lots, side
            FROM order_buckets
            WHERE asset_id = ? AND bucket_id = ? {side_filter}
            ORDER BY {sort_key} {dir}, position_id ASC
            "#,
            side_filter = if side.is_some() { "AND side = ?" } else { "" },
            sort_key = sort_column(sort),
            dir = direction(descending),
        );

        let mut query = sqlx::query(&sql).bind(asset_id as i64).bind(bucket);
        if let Some(s) = side {
            query = query.bind(s);
        }
        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.iter().map(super::order_bucket_from_row).collect())
    }

    /// Resting orders across an inclusive bucket range.
    pub async fn order_rows_range(
        &self,
        asset_id: u32,
        from_bucket: i64,
        to_bucket: i64,
        side: Option<bool>,
    ) -> Result<Vec<OrderBucketRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT asset_id, bucket_id, position_id, lots, side
            FROM order_buckets
            WHERE asset_id = ? AND bucket_id BETWEEN ? AND ? {side_filter}
            ORDER BY bucket_id ASC, position_id ASC
            "#,
            side_filter = if side.is_some() { "AND side = ?" } else { "" },
        );

        let mut query = sqlx::query(&sql)
            .bind(asset_id as i64)
            .bind(from_bucket)
            .bind(to_bucket);
        if let Some(s) = side {
            query = query.bind(s);
        }
        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.iter().map(super::order_bucket_from_row).collect())
    }

    /// Stops at one price bucket, optionally restricted to a stop type.
    pub async fn stop_rows_at(
        &self,
        asset_id: u32,
        bucket: i64,
        side: Option<bool>,
        stop_type: Option<i64>,
        sort: BucketSort,
        descending: bool,
    ) -> Result<Vec<StopBucketRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT asset_id, bucket_id, position_id, stop_type, lots, side
            FROM stop_buckets
            WHERE asset_id = ? AND bucket_id = ? {side_filter} {type_filter}
            ORDER BY {sort_key} {dir}, position_id ASC, stop_type ASC
            "#,
            side_filter = if side.is_some() { "AND side = ?" } else { "" },
            type_filter = if stop_type.is_some() {
                "AND stop_type = ?"
            } else {
                ""
            },
            sort_key = sort_column(sort),
            dir = direction(descending),
        );

        let mut query = sqlx::query(&sql).bind(asset_id as i64).bind(bucket);
        if let Some(s) = side {
            query = query.bind(s);
        }
        if let Some(t) = stop_type {
            query = query.bind(t);
        }
        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.iter().map(super::stop_bucket_from_row).collect())
    }

    /// Stops across an inclusive bucket range.
    pub async fn stop_rows_range(
        &self,
        asset_id: u32,
        from_bucket: i64,
        to_bucket: i64,
        side: Option<bool>,
    ) -> Result<Vec<StopBucketRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT asset_id, bucket_id, position_id, stop_type, lots, side
            FROM stop_buckets
            WHERE asset_id = ? AND bucket_id BETWEEN ? AND ? {side_filter}
            ORDER BY bucket_id ASC, position_id ASC, stop_type ASC
            "#,
            side_filter = if side.is_some() { "AND side = ?" } else { "" },
        );

        let mut query = sqlx::query(&sql)
            .bind(asset_id as i64)
            .bind(from_bucket)
            .bind(to_bucket);
        if let Some(s) = side {
            query = query.bind(s);
        }
        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.iter().map(super::stop_bucket_from_row).collect())
    }

    // =========================================================================
    // Exposure queries
    // =========================================================================

    pub async fn exposure_all(&self) -> Result<Vec<ExposureRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT asset_id, side, sum_lots, sum_entry_x6_lots, sum_leverage_lots,
                   sum_liq_x6_lots, sum_liq_lots, positions_count
            FROM exposure_agg
            ORDER BY asset_id ASC, side ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(exposure_from_row).collect())
    }

    pub async fn exposure_for_asset(&self, asset_id: u32) -> Result<Vec<ExposureRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT asset_id, side, sum_lots, sum_entry_x6_lots, sum_leverage_lots,
                   sum_liq_x6_lots, sum_liq_lots, positions_count
            FROM exposure_agg
            WHERE asset_id = ?
            ORDER BY side ASC
            "#,
        )
        .bind(asset_id as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(exposure_from_row).collect())
    }
}

fn sort_column(sort: BucketSort) -> &'static str {
    match sort {
        BucketSort::PositionId => "position_id",
        BucketSort::Lots => "lots",
    }
}

fn direction(descending: bool) -> &'static str {
    if descending {
        "DESC"
    } else {
        "ASC"
    }
}

fn exposure_from_row(row: &sqlx::sqlite::SqliteRow) -> ExposureRow {
    ExposureRow {
        asset_id: row.get::<i64, _>("asset_id") as u32,
        side: row.get::<i64, _>("side") != 0,
        sum_lots: row.get("sum_lots"),
        sum_entry_x6_lots: row.get("sum_entry_x6_lots"),
        sum_leverage_lots: row.get("sum_leverage_lots"),
        sum_liq_x6_lots: row.get("sum_liq_x6_lots"),
        sum_liq_lots: row.get("sum_liq_lots"),
        positions_count: row.get("positions_count"),
    }
}
