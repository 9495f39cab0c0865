//! Typed projection mutations. Each operation is one transaction: the
//! position row, both bucket indexes, and (via triggers) the exposure
//! aggregates move together or not at all.

use sqlx::{Row, Sqlite, Transaction};

use crate::domain::{
    bucket_id, margin_usd6, notional_usd6, Asset, CloseReason, EventMeta, OpenedEvent,
    PositionState, StopKind, TimeMs,
};

use super::super::{IngestResult, StoreError};
use super::Repository;

/// The slice of a position row the guards need.
struct CurrentRow {
    state: PositionState,
    long_side: bool,
    lots: i64,
    leverage_x: i64,
    entry_x6: i64,
    sl_x6: i64,
    tp_x6: i64,
    liq_x6: i64,
}

async fn fetch_current(
    tx: &mut Transaction<'_, Sqlite>,
    id: u32,
) -> Result<Option<CurrentRow>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT state, long_side, lots, leverage_x, entry_x6, sl_x6, tp_x6, liq_x6
        FROM positions WHERE id = ?
        "#,
    )
    .bind(id as i64)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|r| CurrentRow {
        state: PositionState::from_str(&r.get::<String, _>("state"))
            .unwrap_or(PositionState::Cancelled),
        long_side: r.get::<i64, _>("long_side") != 0,
        lots: r.get("lots"),
        leverage_x: r.get("leverage_x"),
        entry_x6: r.get("entry_x6"),
        sl_x6: r.get("sl_x6"),
        tp_x6: r.get("tp_x6"),
        liq_x6: r.get("liq_x6"),
    }))
}

async fn delete_order_rows(tx: &mut Transaction<'_, Sqlite>, id: u32) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM order_buckets WHERE position_id = ?")
        .bind(id as i64)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn delete_stop_rows(
    tx: &mut Transaction<'_, Sqlite>,
    id: u32,
    sl_tp_only: bool,
) -> Result<(), StoreError> {
    let sql = if sl_tp_only {
        "DELETE FROM stop_buckets WHERE position_id = ? AND stop_type IN (1, 2)"
    } else {
        "DELETE FROM stop_buckets WHERE position_id = ?"
    };
    sqlx::query(sql).bind(id as i64).execute(&mut **tx).await?;
    Ok(())
}

/// Insert one stop row per non-zero price, on the antagonistic side.
async fn insert_stop_rows(
    tx: &mut Transaction<'_, Sqlite>,
    asset: &Asset,
    id: u32,
    lots: i64,
    long_side: bool,
    stops: &[(StopKind, i64)],
) -> Result<(), StoreError> {
    for (kind, price_x6) in stops {
        if *price_x6 == 0 {
            continue;
        }
        let bucket = bucket_id(*price_x6, asset.tick_x6)?;
        sqlx::query(
            r#"
            INSERT INTO stop_buckets (asset_id, bucket_id, position_id, stop_type, lots, side)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (asset_id, bucket_id, position_id, stop_type) DO UPDATE SET
                lots = excluded.lots,
                side = excluded.side
            "#,
        )
        .bind(asset.asset_id as i64)
        .bind(bucket)
        .bind(id as i64)
        .bind(kind.stop_type())
        .bind(lots)
        .bind(!long_side)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn opt_bucket(price_x6: i64, tick_x6: i64) -> Result<Option<i64>, StoreError> {
    if price_x6 == 0 {
        return Ok(None);
    }
    Ok(Some(bucket_id(price_x6, tick_x6)?))
}

impl Repository {
    /// Upsert a position from an `Opened` event (or a reconciler re-upsert).
    ///
    /// Later lifecycle stages dominate: the upsert is a no-op when the row is
    /// terminal, or already OPEN while the event says ORDER.
    pub async fn ingest_opened(
        &self,
        ev: &OpenedEvent,
        asset: &Asset,
        meta: Option<&EventMeta>,
    ) -> Result<IngestResult, StoreError> {
        let mut tx = self.pool().begin().await?;

        if let Some(current) = fetch_current(&mut tx, ev.id).await? {
            if current.state.is_terminal() {
                // Terminal rows keep no index entries; reassert and stop.
                delete_order_rows(&mut tx, ev.id).await?;
                delete_stop_rows(&mut tx, ev.id, false).await?;
                tx.commit().await?;
                return Ok(IngestResult::Noop);
            }
            if current.state == PositionState::Open
                && ev.initial_state == PositionState::Order
            {
                return Ok(IngestResult::Noop);
            }
        }

        let is_open = ev.initial_state == PositionState::Open;
        let (entry_x6, target_x6) = if is_open {
            (ev.entry_or_target_x6, 0)
        } else {
            (0, ev.entry_or_target_x6)
        };
        let lots = ev.lots as i64;
        let leverage_x = ev.leverage_x as i64;
        let (notional, margin) = if is_open {
            let n = notional_usd6(entry_x6, lots, asset.lot_num, asset.lot_den)?;
            (n, margin_usd6(n, leverage_x))
        } else {
            (0, 0)
        };
        let target_bucket = opt_bucket(target_x6, asset.tick_x6)?;
        let sl_bucket = opt_bucket(ev.sl_x6, asset.tick_x6)?;
        let tp_bucket = opt_bucket(ev.tp_x6, asset.tick_x6)?;
        let liq_bucket = opt_bucket(ev.liq_x6, asset.tick_x6)?;

        let now = TimeMs::now();
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, owner_addr, asset_id, state, long_side, lots, leverage_x,
                notional_usd6, margin_usd6, entry_x6, target_x6, sl_x6, tp_x6, liq_x6,
                opened_at, executed_at, last_tx_hash, last_block_num,
                target_bucket, sl_bucket, tp_bucket, liq_bucket
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                owner_addr = excluded.owner_addr,
                asset_id = excluded.asset_id,
                state = excluded.state,
                long_side = excluded.long_side,
                lots = excluded.lots,
                leverage_x = excluded.leverage_x,
                notional_usd6 = excluded.notional_usd6,
                margin_usd6 = excluded.margin_usd6,
                entry_x6 = excluded.entry_x6,
                target_x6 = excluded.target_x6,
                sl_x6 = excluded.sl_x6,
                tp_x6 = excluded.tp_x6,
                liq_x6 = excluded.liq_x6,
                executed_at = COALESCE(positions.executed_at, excluded.executed_at),
                last_tx_hash = COALESCE(excluded.last_tx_hash, positions.last_tx_hash),
                last_block_num = COALESCE(excluded.last_block_num, positions.last_block_num),
                target_bucket = excluded.target_bucket,
                sl_bucket = excluded.sl_bucket,
                tp_bucket = excluded.tp_bucket,
                liq_bucket = excluded.liq_bucket
            "#,
        )
        .bind(ev.id as i64)
        .bind(ev.trader.as_str())
        .bind(ev.asset_id as i64)
        .bind(ev.initial_state.as_str())
        .bind(ev.long_side)
        .bind(lots)
        .bind(leverage_x)
        .bind(notional)
        .bind(margin)
        .bind(entry_x6)
        .bind(target_x6)
        .bind(ev.sl_x6)
        .bind(ev.tp_x6)
        .bind(ev.liq_x6)
        .bind(now.as_ms())
        .bind(if is_open { Some(now.as_ms()) } else { None })
        .bind(meta.map(|m| m.tx_hash.as_str()))
        .bind(meta.map(|m| m.block_number as i64))
        .bind(target_bucket)
        .bind(sl_bucket)
        .bind(tp_bucket)
        .bind(liq_bucket)
        .execute(&mut *tx)
        .await?;

        delete_order_rows(&mut tx, ev.id).await?;
        delete_stop_rows(&mut tx, ev.id, false).await?;

        if is_open {
            insert_stop_rows(
                &mut tx,
                asset,
                ev.id,
                lots,
                ev.long_side,
                &[
                    (StopKind::Sl, ev.sl_x6),
                    (StopKind::Tp, ev.tp_x6),
                    (StopKind::Liq, ev.liq_x6),
                ],
            )
            .await?;
        } else if let Some(bucket) = target_bucket {
            sqlx::query(
                r#"
                INSERT INTO order_buckets (asset_id, bucket_id, position_id, lots, side)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(asset.asset_id as i64)
            .bind(bucket)
            .bind(ev.id as i64)
            .bind(lots)
            .bind(ev.long_side)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(IngestResult::Applied)
    }

    /// Move a resting order to OPEN at the given entry price.
    pub async fn ingest_executed(
        &self,
        id: u32,
        entry_x6: i64,
        asset: &Asset,
        meta: Option<&EventMeta>,
    ) -> Result<IngestResult, StoreError> {
        let mut tx = self.pool().begin().await?;

        let current = match fetch_current(&mut tx, id).await? {
            Some(c) => c,
            None => return Ok(IngestResult::Missing),
        };
        if current.state.is_terminal() {
            return Ok(IngestResult::Noop);
        }
        if current.state == PositionState::Open && current.entry_x6 == entry_x6 {
            return Ok(IngestResult::Noop);
        }

        let notional = notional_usd6(entry_x6, current.lots, asset.lot_num, asset.lot_den)?;
        let margin = margin_usd6(notional, current.leverage_x);

        let now = TimeMs::now();
        sqlx::query(
            r#"
            UPDATE positions SET
                state = 'OPEN',
                entry_x6 = ?,
                target_x6 = 0,
                target_bucket = NULL,
                notional_usd6 = ?,
                margin_usd6 = ?,
                executed_at = COALESCE(executed_at, ?),
                last_tx_hash = COALESCE(?, last_tx_hash),
                last_block_num = COALESCE(?, last_block_num)
            WHERE id = ?
            "#,
        )
        .bind(entry_x6)
        .bind(notional)
        .bind(margin)
        .bind(now.as_ms())
        .bind(meta.map(|m| m.tx_hash.as_str()))
        .bind(meta.map(|m| m.block_number as i64))
        .bind(id as i64)
        .execute(&mut *tx)
        .await?;

        delete_order_rows(&mut tx, id).await?;
        delete_stop_rows(&mut tx, id, false).await?;
        insert_stop_rows(
            &mut tx,
            asset,
            id,
            current.lots,
            current.long_side,
            &[
                (StopKind::Sl, current.sl_x6),
                (StopKind::Tp, current.tp_x6),
                (StopKind::Liq, current.liq_x6),
            ],
        )
        .await?;

        tx.commit().await?;
        Ok(IngestResult::Applied)
    }

    /// Replace SL/TP. LIQ rows and the liq price are never touched here.
    pub async fn ingest_stops_updated(
        &self,
        id: u32,
        sl_x6: i64,
        tp_x6: i64,
        asset: &Asset,
        meta: Option<&EventMeta>,
    ) -> Result<IngestResult, StoreError> {
        let mut tx = self.pool().begin().await?;

        let current = match fetch_current(&mut tx, id).await? {
            Some(c) => c,
            None => return Ok(IngestResult::Missing),
        };
        if current.state.is_terminal() {
            // Terminal rows keep no index entries; reassert and stop.
            delete_order_rows(&mut tx, id).await?;
            delete_stop_rows(&mut tx, id, false).await?;
            tx.commit().await?;
            return Ok(IngestResult::Noop);
        }

        let is_open = current.state == PositionState::Open;
        if is_open && current.sl_x6 == sl_x6 && current.tp_x6 == tp_x6 {
            let matches = sl_tp_rows_match(&mut tx, id, asset, &current, sl_x6, tp_x6).await?;
            if matches {
                return Ok(IngestResult::Noop);
            }
        }

        let sl_bucket = opt_bucket(sl_x6, asset.tick_x6)?;
        let tp_bucket = opt_bucket(tp_x6, asset.tick_x6)?;
        sqlx::query(
            r#"
            UPDATE positions SET
                sl_x6 = ?,
                tp_x6 = ?,
                sl_bucket = ?,
                tp_bucket = ?,
                last_tx_hash = COALESCE(?, last_tx_hash),
                last_block_num = COALESCE(?, last_block_num)
            WHERE id = ?
            "#,
        )
        .bind(sl_x6)
        .bind(tp_x6)
        .bind(sl_bucket)
        .bind(tp_bucket)
        .bind(meta.map(|m| m.tx_hash.as_str()))
        .bind(meta.map(|m| m.block_number as i64))
        .bind(id as i64)
        .execute(&mut *tx)
        .await?;

        delete_stop_rows(&mut tx, id, true).await?;
        if is_open {
            insert_stop_rows(
                &mut tx,
                asset,
                id,
                current.lots,
                current.long_side,
                &[(StopKind::Sl, sl_x6), (StopKind::Tp, tp_x6)],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(IngestResult::Applied)
    }

    /// Close or cancel a position and clear every index entry.
    pub async fn ingest_removed(
        &self,
        id: u32,
        reason: CloseReason,
        exec_x6: i64,
        pnl_usd6: i64,
        meta: Option<&EventMeta>,
    ) -> Result<IngestResult, StoreError> {
        let mut tx = self.pool().begin().await?;

        let current = match fetch_current(&mut tx, id).await? {
            Some(c) => c,
            None => return Ok(IngestResult::Missing),
        };
        if current.state.is_terminal() {
            delete_order_rows(&mut tx, id).await?;
            delete_stop_rows(&mut tx, id, false).await?;
            tx.commit().await?;
            return Ok(IngestResult::Noop);
        }

        let cancelled = reason == CloseReason::Cancelled;
        let new_state = if cancelled {
            PositionState::Cancelled
        } else {
            PositionState::Closed
        };

        let now = TimeMs::now();
        sqlx::query(
            r#"
            UPDATE positions SET
                state = ?,
                close_reason = ?,
                exec_x6 = ?,
                pnl_usd6 = ?,
                closed_at = CASE WHEN ? THEN closed_at ELSE COALESCE(closed_at, ?) END,
                cancelled_at = CASE WHEN ? THEN COALESCE(cancelled_at, ?) ELSE cancelled_at END,
                last_tx_hash = COALESCE(?, last_tx_hash),
                last_block_num = COALESCE(?, last_block_num)
            WHERE id = ?
            "#,
        )
        .bind(new_state.as_str())
        .bind(reason.as_str())
        .bind(exec_x6)
        .bind(pnl_usd6)
        .bind(cancelled)
        .bind(now.as_ms())
        .bind(cancelled)
        .bind(now.as_ms())
        .bind(meta.map(|m| m.tx_hash.as_str()))
        .bind(meta.map(|m| m.block_number as i64))
        .bind(id as i64)
        .execute(&mut *tx)
        .await?;

        delete_order_rows(&mut tx, id).await?;
        delete_stop_rows(&mut tx, id, false).await?;

        tx.commit().await?;
        Ok(IngestResult::Applied)
    }

    /// Force the stored state without replaying a lifecycle event. Used by
    /// the reconciler for mismatches no event sequence can express.
    pub async fn patch_state(
        &self,
        id: u32,
        new_state: PositionState,
    ) -> Result<IngestResult, StoreError> {
        let mut tx = self.pool().begin().await?;

        let current = match fetch_current(&mut tx, id).await? {
            Some(c) => c,
            None => return Ok(IngestResult::Missing),
        };
        if current.state == new_state {
            return Ok(IngestResult::Noop);
        }

        let now = TimeMs::now();
        sqlx::query(
            r#"
            UPDATE positions SET
                state = ?,
                closed_at = CASE WHEN ? = 'CLOSED' THEN COALESCE(closed_at, ?) ELSE closed_at END,
                cancelled_at = CASE WHEN ? = 'CANCELLED' THEN COALESCE(cancelled_at, ?) ELSE cancelled_at END
            WHERE id = ?
            "#,
        )
        .bind(new_state.as_str())
        .bind(new_state.as_str())
        .bind(now.as_ms())
        .bind(new_state.as_str())
        .bind(now.as_ms())
        .bind(id as i64)
        .execute(&mut *tx)
        .await?;

        match new_state {
            PositionState::Closed | PositionState::Cancelled => {
                delete_order_rows(&mut tx, id).await?;
                delete_stop_rows(&mut tx, id, false).await?;
            }
            PositionState::Open => {
                delete_order_rows(&mut tx, id).await?;
            }
            PositionState::Order => {
                delete_stop_rows(&mut tx, id, false).await?;
            }
        }

        tx.commit().await?;
        Ok(IngestResult::Applied)
    }
}

/// Do the persisted SL/TP rows already match what (sl, tp) imply?
async fn sl_tp_rows_match(
    tx: &mut Transaction<'_, Sqlite>,
    id: u32,
    asset: &Asset,
    current: &CurrentRow,
    sl_x6: i64,
    tp_x6: i64,
) -> Result<bool, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT bucket_id, stop_type, lots, side
        FROM stop_buckets
        WHERE position_id = ? AND stop_type IN (1, 2)
        ORDER BY stop_type
        "#,
    )
    .bind(id as i64)
    .fetch_all(&mut **tx)
    .await?;

    let mut expected: Vec<(i64, i64, i64, bool)> = Vec::new();
    for (kind, price) in [(StopKind::Sl, sl_x6), (StopKind::Tp, tp_x6)] {
        if price != 0 {
            expected.push((
                bucket_id(price, asset.tick_x6)?,
                kind.stop_type(),
                current.lots,
                !current.long_side,
            ));
        }
    }

    let actual: Vec<(i64, i64, i64, bool)> = rows
        .iter()
        .map(|r| {
            (
                r.get::<i64, _>("bucket_id"),
                r.get::<i64, _>("stop_type"),
                r.get::<i64, _>("lots"),
                r.get::<i64, _>("side") != 0,
            )
        })
        .collect();

    Ok(expected == actual)
}
