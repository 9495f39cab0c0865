//! Repository layer for database operations.
//!
//! Methods are organized across submodules by concern:
//! - `ingest.rs` - the typed projection mutations (one transaction each)
//! - `queries.rs` - trader, bucket, and exposure queries for the read API

mod ingest;
mod queries;

pub use queries::BucketSort;

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::domain::{Addr, Asset, CloseReason, Position, PositionState, Side, TimeMs};

use super::StoreError;

/// One resting-order index entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OrderBucketRow {
    pub asset_id: u32,
    pub bucket_id: i64,
    pub position_id: u32,
    pub lots: i64,
    pub side: bool,
}

/// One stop index entry. `side` is the side that trades into the stop.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StopBucketRow {
    pub asset_id: u32,
    pub bucket_id: i64,
    pub position_id: u32,
    pub stop_type: i64,
    pub lots: i64,
    pub side: bool,
}

/// One per-(asset, side) exposure aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExposureRow {
    pub asset_id: u32,
    pub side: bool,
    pub sum_lots: i64,
    pub sum_entry_x6_lots: i64,
    pub sum_leverage_lots: i64,
    pub sum_liq_x6_lots: i64,
    pub sum_liq_lots: i64,
    pub positions_count: i64,
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// The underlying pool, for callers that need raw queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Asset operations
    // =========================================================================

    /// Insert or replace an asset record.
    ///
    /// # Errors
    /// Returns an error if the write fails (including check-constraint
    /// violations for non-positive ticks).
    pub async fn upsert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO assets (asset_id, symbol, tick_x6, lot_num, lot_den)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (asset_id) DO UPDATE SET
                symbol = excluded.symbol,
                tick_x6 = excluded.tick_x6,
                lot_num = excluded.lot_num,
                lot_den = excluded.lot_den
            "#,
        )
        .bind(asset.asset_id as i64)
        .bind(&asset.symbol)
        .bind(asset.tick_x6)
        .bind(asset.lot_num)
        .bind(asset.lot_den)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_asset(&self, asset_id: u32) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query(
            "SELECT asset_id, symbol, tick_x6, lot_num, lot_den FROM assets WHERE asset_id = ?",
        )
        .bind(asset_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| asset_from_row(&r)))
    }

    pub async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query(
            "SELECT asset_id, symbol, tick_x6, lot_num, lot_den FROM assets ORDER BY asset_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(asset_from_row).collect())
    }

    // =========================================================================
    // Position reads
    // =========================================================================

    pub async fn read_position(&self, id: u32) -> Result<Option<Position>, StoreError> {
        let row = sqlx::query("SELECT * FROM positions WHERE id = ?")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| position_from_row(&r)))
    }

    pub async fn read_order_buckets(&self, id: u32) -> Result<Vec<OrderBucketRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT asset_id, bucket_id, position_id, lots, side
            FROM order_buckets
            WHERE position_id = ?
            ORDER BY asset_id, bucket_id
            "#,
        )
        .bind(id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(order_bucket_from_row).collect())
    }

    pub async fn read_stop_buckets(&self, id: u32) -> Result<Vec<StopBucketRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT asset_id, bucket_id, position_id, stop_type, lots, side
            FROM stop_buckets
            WHERE position_id = ?
            ORDER BY stop_type
            "#,
        )
        .bind(id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(stop_bucket_from_row).collect())
    }

    /// List present position ids in ascending order, paginated.
    pub async fn list_ids(&self, limit: i64, offset: i64) -> Result<Vec<u32>, StoreError> {
        let rows = sqlx::query("SELECT id FROM positions ORDER BY id ASC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| r.get::<i64, _>("id") as u32)
            .collect())
    }

    /// Highest indexed position id, if any.
    pub async fn max_id(&self) -> Result<Option<u32>, StoreError> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM positions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.map(|v| v as u32))
    }
}

fn asset_from_row(row: &SqliteRow) -> Asset {
    Asset {
        asset_id: row.get::<i64, _>("asset_id") as u32,
        symbol: row.get("symbol"),
        tick_x6: row.get("tick_x6"),
        lot_num: row.get("lot_num"),
        lot_den: row.get("lot_den"),
    }
}

fn order_bucket_from_row(row: &SqliteRow) -> OrderBucketRow {
    OrderBucketRow {
        asset_id: row.get::<i64, _>("asset_id") as u32,
        bucket_id: row.get("bucket_id"),
        position_id: row.get::<i64, _>("position_id") as u32,
        lots: row.get("lots"),
        side: row.get::<i64, _>("side") != 0,
    }
}

fn stop_bucket_from_row(row: &SqliteRow) -> StopBucketRow {
    StopBucketRow {
        asset_id: row.get::<i64, _>("asset_id") as u32,
        bucket_id: row.get("bucket_id"),
        position_id: row.get::<i64, _>("position_id") as u32,
        stop_type: row.get("stop_type"),
        lots: row.get("lots"),
        side: row.get::<i64, _>("side") != 0,
    }
}

pub(crate) fn position_from_row(row: &SqliteRow) -> Position {
    let state = row.get::<String, _>("state");
    let close_reason = row.get::<Option<String>, _>("close_reason");
    Position {
        id: row.get::<i64, _>("id") as u32,
        owner: Addr::new(&row.get::<String, _>("owner_addr")),
        asset_id: row.get::<i64, _>("asset_id") as u32,
        // The CHECK constraint makes anything else unrepresentable.
        state: PositionState::from_str(&state).unwrap_or(PositionState::Cancelled),
        side: Side::from_long_flag(row.get::<i64, _>("long_side") != 0),
        lots: row.get("lots"),
        leverage_x: row.get("leverage_x"),
        notional_usd6: row.get("notional_usd6"),
        margin_usd6: row.get("margin_usd6"),
        entry_x6: row.get("entry_x6"),
        target_x6: row.get("target_x6"),
        sl_x6: row.get("sl_x6"),
        tp_x6: row.get("tp_x6"),
        liq_x6: row.get("liq_x6"),
        exec_x6: row.get("exec_x6"),
        pnl_usd6: row.get("pnl_usd6"),
        opened_at: TimeMs::new(row.get("opened_at")),
        executed_at: row.get::<Option<i64>, _>("executed_at").map(TimeMs::new),
        closed_at: row.get::<Option<i64>, _>("closed_at").map(TimeMs::new),
        cancelled_at: row.get::<Option<i64>, _>("cancelled_at").map(TimeMs::new),
        close_reason: close_reason.as_deref().and_then(CloseReason::from_str),
        last_tx_hash: row.get("last_tx_hash"),
        last_block_num: row.get("last_block_num"),
        target_bucket: row.get("target_bucket"),
        sl_bucket: row.get("sl_bucket"),
        tp_bucket: row.get("tp_bucket"),
        liq_bucket: row.get("liq_bucket"),
    }
}
