//! Converges the projection to on-chain ground truth for a set of ids.
//!
//! Two modes: state-only (cheap, `stateOf` reads only) and full (`stateOf`
//! plus `getTrade`, field-by-field). Repairs go through the same projector
//! entry points as live ingestion. Concurrency is bounded by a semaphore
//! pair (chain reads, store operations) with an independent worker pool
//! consuming the id list.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::chain::{ChainError, ChainReader, Trade};
use crate::domain::{
    ChainEvent, CloseReason, ExecutedEvent, OpenedEvent, Position, PositionState, RemovedEvent,
    StopsUpdatedEvent,
};
use crate::engine::{Applied, ProjectionError, Projector};

/// How much chain truth to read per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// `stateOf` only; repairs use data already in the store.
    StateOnly,
    /// `stateOf` + `getTrade`; every field compared.
    Full,
}

/// Per-run counters. This summary is the reconciler's contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub scanned: u64,
    pub created: u64,
    pub executed: u64,
    pub stops: u64,
    pub removed: u64,
    pub state_patched: u64,
    pub skipped: u64,
    pub missing_db: u64,
    pub rpc_failed: u64,
    pub store_failed: u64,
}

impl ReconcileSummary {
    /// Total repairs applied in this run.
    pub fn corrections(&self) -> u64 {
        self.created + self.executed + self.stops + self.removed + self.state_patched
    }

    pub fn merge(&mut self, other: &ReconcileSummary) {
        self.scanned += other.scanned;
        self.created += other.created;
        self.executed += other.executed;
        self.stops += other.stops;
        self.removed += other.removed;
        self.state_patched += other.state_patched;
        self.skipped += other.skipped;
        self.missing_db += other.missing_db;
        self.rpc_failed += other.rpc_failed;
        self.store_failed += other.store_failed;
    }
}

/// What happened for one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Executed,
    Stops,
    Removed,
    StatePatched,
    InSync,
    Skipped,
    MissingDb,
    RpcFailed,
    StoreFailed,
}

pub struct Reconciler {
    chain: Arc<dyn ChainReader>,
    projector: Arc<Projector>,
    rpc_permits: Arc<Semaphore>,
    db_permits: Arc<Semaphore>,
    db_conc: usize,
}

impl Reconciler {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        projector: Arc<Projector>,
        rpc_conc: usize,
        db_conc: usize,
    ) -> Self {
        Self {
            chain,
            projector,
            rpc_permits: Arc::new(Semaphore::new(rpc_conc.max(1))),
            db_permits: Arc::new(Semaphore::new(db_conc.max(1))),
            db_conc: db_conc.max(1),
        }
    }

    /// Reconcile a set of ids and report what was done.
    pub async fn reconcile_ids(&self, ids: &[u32], mode: ReconcileMode) -> ReconcileSummary {
        let workers = ids.len().min(self.db_conc).max(1);

        let per_id: Vec<Vec<Outcome>> = stream::iter(ids.iter().copied())
            .map(|id| self.reconcile_one(id, mode))
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut summary = ReconcileSummary::default();
        for outcomes in per_id {
            summary.scanned += 1;
            for outcome in outcomes {
                match outcome {
                    Outcome::Created => summary.created += 1,
                    Outcome::Executed => summary.executed += 1,
                    Outcome::Stops => summary.stops += 1,
                    Outcome::Removed => summary.removed += 1,
                    Outcome::StatePatched => summary.state_patched += 1,
                    Outcome::Skipped => summary.skipped += 1,
                    Outcome::MissingDb => summary.missing_db += 1,
                    Outcome::RpcFailed => summary.rpc_failed += 1,
                    Outcome::StoreFailed => summary.store_failed += 1,
                    Outcome::InSync => {}
                }
            }
        }
        summary
    }

    async fn reconcile_one(&self, id: u32, mode: ReconcileMode) -> Vec<Outcome> {
        match self.try_reconcile_one(id, mode).await {
            Ok(outcomes) => outcomes,
            Err(ReconcileStep::Rpc(e)) => {
                warn!(id, error = %e, "chain read failed");
                vec![Outcome::RpcFailed]
            }
            Err(ReconcileStep::Store(e)) => {
                warn!(id, error = %e, "store operation failed");
                vec![Outcome::StoreFailed]
            }
        }
    }

    async fn try_reconcile_one(
        &self,
        id: u32,
        mode: ReconcileMode,
    ) -> Result<Vec<Outcome>, ReconcileStep> {
        let state_raw = {
            let _permit = self.rpc_permit().await?;
            self.chain.state_of(id).await.map_err(ReconcileStep::Rpc)?
        };
        let chain_state = match PositionState::from_chain(state_raw) {
            Some(s) => s,
            None => {
                warn!(id, state_raw, "chain reports unknown state");
                return Ok(vec![Outcome::Skipped]);
            }
        };

        let trade = match mode {
            ReconcileMode::StateOnly => None,
            ReconcileMode::Full => {
                let _permit = self.rpc_permit().await?;
                Some(self.chain.get_trade(id).await.map_err(ReconcileStep::Rpc)?)
            }
        };

        let position = {
            let _permit = self.db_permit().await?;
            self.projector
                .repo()
                .read_position(id)
                .await
                .map_err(|e| ReconcileStep::Store(ProjectionError::Store(e)))?
        };

        match (mode, position) {
            (ReconcileMode::StateOnly, None) => Ok(vec![Outcome::MissingDb]),
            (ReconcileMode::StateOnly, Some(pos)) => {
                self.reconcile_against_state(&pos, chain_state, None).await
            }
            (ReconcileMode::Full, None) => {
                // Unwrap is safe by construction in Full mode.
                let trade = trade.ok_or_else(|| {
                    ReconcileStep::Rpc(ChainError::Decode("missing trade".to_string()))
                })?;
                if trade.is_empty() {
                    return Ok(vec![Outcome::Skipped]);
                }
                self.create_from_trade(id, &trade, chain_state).await
            }
            (ReconcileMode::Full, Some(pos)) => {
                let trade = trade.ok_or_else(|| {
                    ReconcileStep::Rpc(ChainError::Decode("missing trade".to_string()))
                })?;
                if trade.is_empty() {
                    return Ok(vec![Outcome::Skipped]);
                }
                self.reconcile_against_state(&pos, chain_state, Some(&trade))
                    .await
            }
        }
    }

    /// Shared drift logic. With a trade, field-level truth is available;
    /// without one, repairs reuse what the store already holds.
    async fn reconcile_against_state(
        &self,
        pos: &Position,
        chain_state: PositionState,
        trade: Option<&Trade>,
    ) -> Result<Vec<Outcome>, ReconcileStep> {
        let db_state = pos.state;

        if db_state == chain_state {
            if let Some(trade) = trade {
                if let Some(outcomes) = self.repair_fields(pos, trade).await? {
                    return Ok(outcomes);
                }
            }
            return self.assert_indexes(pos).await;
        }

        match (db_state, chain_state) {
            (PositionState::Order, PositionState::Open) => {
                let entry = match trade {
                    Some(t) if t.entry_x6 != 0 => t.entry_x6,
                    _ if pos.entry_x6 != 0 => pos.entry_x6,
                    _ => pos.target_x6,
                };
                let mut outcomes = vec![];
                self.apply(
                    &ChainEvent::Executed(ExecutedEvent {
                        id: pos.id,
                        entry_x6: entry,
                    }),
                    Outcome::Executed,
                    &mut outcomes,
                )
                .await?;

                let (sl, tp) = match trade {
                    Some(t) => (t.sl_x6, t.tp_x6),
                    None => (pos.sl_x6, pos.tp_x6),
                };
                let stale_stops = trade.is_some() && (pos.sl_x6 != sl || pos.tp_x6 != tp);
                if sl != 0 || tp != 0 || stale_stops {
                    self.apply(
                        &ChainEvent::StopsUpdated(StopsUpdatedEvent {
                            id: pos.id,
                            sl_x6: sl,
                            tp_x6: tp,
                        }),
                        Outcome::Stops,
                        &mut outcomes,
                    )
                    .await?;
                }
                Ok(outcomes)
            }
            (_, PositionState::Closed) | (_, PositionState::Cancelled)
                if db_state == PositionState::Open =>
            {
                let reason = if chain_state == PositionState::Cancelled {
                    CloseReason::Cancelled
                } else {
                    CloseReason::Market
                };
                let mut outcomes = vec![];
                self.apply(
                    &ChainEvent::Removed(RemovedEvent {
                        id: pos.id,
                        reason,
                        exec_x6: 0,
                        pnl_usd6: 0,
                    }),
                    Outcome::Removed,
                    &mut outcomes,
                )
                .await?;
                Ok(outcomes)
            }
            _ => {
                debug!(id = pos.id, %db_state, %chain_state, "patching state");
                {
                    let _permit = self.db_permit().await?;
                    self.projector
                        .repo()
                        .patch_state(pos.id, chain_state)
                        .await
                        .map_err(|e| ReconcileStep::Store(ProjectionError::Store(e)))?;
                }
                let mut outcomes = vec![Outcome::StatePatched];
                // With ground truth in hand, realign the row's fields too;
                // a bare state flip would leave stale prices and indexes.
                if let Some(trade) = trade {
                    if !chain_state.is_terminal() {
                        self.apply(
                            &ChainEvent::Opened(opened_from_trade(pos.id, trade, chain_state)),
                            Outcome::Created,
                            &mut outcomes,
                        )
                        .await?;
                    }
                }
                Ok(outcomes)
            }
        }
    }

    /// Full-mode field comparison for rows whose state already agrees.
    ///
    /// Returns `None` when every field matches (the caller then checks the
    /// index invariants instead).
    async fn repair_fields(
        &self,
        pos: &Position,
        trade: &Trade,
    ) -> Result<Option<Vec<Outcome>>, ReconcileStep> {
        if pos.state.is_terminal() {
            // Only index cleanliness matters for terminal rows.
            return Ok(None);
        }

        let core_matches = pos.owner == trade.owner
            && pos.asset_id == trade.asset_id
            && pos.side.as_bool() == trade.long_side()
            && pos.lots == trade.lots as i64
            && pos.leverage_x == trade.leverage_x as i64
            && pos.liq_x6 == trade.liq_x6
            && match pos.state {
                PositionState::Order => pos.target_x6 == trade.target_x6,
                _ => pos.entry_x6 == trade.entry_x6,
            };

        if !core_matches {
            let mut outcomes = vec![];
            self.apply(
                &ChainEvent::Opened(opened_from_trade(pos.id, trade, pos.state)),
                Outcome::Created,
                &mut outcomes,
            )
            .await?;
            // The re-upsert wrote chain SL/TP as part of the row; nothing
            // further to do for stops.
            return Ok(Some(outcomes));
        }

        if pos.sl_x6 != trade.sl_x6 || pos.tp_x6 != trade.tp_x6 {
            let mut outcomes = vec![];
            self.apply(
                &ChainEvent::StopsUpdated(StopsUpdatedEvent {
                    id: pos.id,
                    sl_x6: trade.sl_x6,
                    tp_x6: trade.tp_x6,
                }),
                Outcome::Stops,
                &mut outcomes,
            )
            .await?;
            return Ok(Some(outcomes));
        }

        Ok(None)
    }

    /// Equal-state path: the bucket tables must agree with the row.
    async fn assert_indexes(&self, pos: &Position) -> Result<Vec<Outcome>, ReconcileStep> {
        let repo = self.projector.repo();
        let (order_rows, stop_rows) = {
            let _permit = self.db_permit().await?;
            let order_rows = repo
                .read_order_buckets(pos.id)
                .await
                .map_err(|e| ReconcileStep::Store(ProjectionError::Store(e)))?;
            let stop_rows = repo
                .read_stop_buckets(pos.id)
                .await
                .map_err(|e| ReconcileStep::Store(ProjectionError::Store(e)))?;
            (order_rows, stop_rows)
        };

        match pos.state {
            PositionState::Order => {
                let clean = stop_rows.is_empty()
                    && match pos.target_bucket {
                        Some(bucket) => {
                            order_rows.len() == 1
                                && order_rows[0].asset_id == pos.asset_id
                                && order_rows[0].bucket_id == bucket
                                && order_rows[0].lots == pos.lots
                                && order_rows[0].side == pos.side.as_bool()
                        }
                        // A target-less order indexes nothing.
                        None => order_rows.is_empty(),
                    };
                if clean {
                    return Ok(vec![Outcome::InSync]);
                }
                let mut outcomes = vec![];
                self.apply(
                    &ChainEvent::Opened(opened_from_position(pos)),
                    Outcome::Created,
                    &mut outcomes,
                )
                .await?;
                Ok(outcomes)
            }
            PositionState::Open => {
                let expected = expected_stop_rows(pos);
                let actual: Vec<(i64, i64, i64, bool)> = stop_rows
                    .iter()
                    .map(|r| (r.bucket_id, r.stop_type, r.lots, r.side))
                    .collect();
                if order_rows.is_empty() && actual == expected {
                    return Ok(vec![Outcome::InSync]);
                }

                // SL/TP drift alone is repaired by a stop replacement; a
                // stray order row or broken LIQ row needs the full re-upsert.
                let sl_tp_only = order_rows.is_empty()
                    && actual.iter().filter(|r| r.1 == 3).copied().collect::<Vec<_>>()
                        == expected.iter().filter(|r| r.1 == 3).copied().collect::<Vec<_>>();

                let mut outcomes = vec![];
                if sl_tp_only {
                    self.apply(
                        &ChainEvent::StopsUpdated(StopsUpdatedEvent {
                            id: pos.id,
                            sl_x6: pos.sl_x6,
                            tp_x6: pos.tp_x6,
                        }),
                        Outcome::Stops,
                        &mut outcomes,
                    )
                    .await?;
                } else {
                    self.apply(
                        &ChainEvent::Opened(opened_from_position(pos)),
                        Outcome::Created,
                        &mut outcomes,
                    )
                    .await?;
                }
                Ok(outcomes)
            }
            PositionState::Closed | PositionState::Cancelled => {
                if order_rows.is_empty() && stop_rows.is_empty() {
                    return Ok(vec![Outcome::InSync]);
                }
                let reason = pos.close_reason.unwrap_or(match pos.state {
                    PositionState::Cancelled => CloseReason::Cancelled,
                    _ => CloseReason::Market,
                });
                let mut outcomes = vec![];
                self.apply(
                    &ChainEvent::Removed(RemovedEvent {
                        id: pos.id,
                        reason,
                        exec_x6: pos.exec_x6,
                        pnl_usd6: pos.pnl_usd6,
                    }),
                    Outcome::Removed,
                    &mut outcomes,
                )
                .await?;
                Ok(outcomes)
            }
        }
    }

    /// Full-mode creation of a row the projection never saw.
    async fn create_from_trade(
        &self,
        id: u32,
        trade: &Trade,
        chain_state: PositionState,
    ) -> Result<Vec<Outcome>, ReconcileStep> {
        let initial = match chain_state {
            PositionState::Order => PositionState::Order,
            // Terminal positions are created OPEN first, then removed, so
            // the row carries its real entry data.
            _ => PositionState::Open,
        };

        let mut outcomes = vec![];
        self.apply(
            &ChainEvent::Opened(opened_from_trade(id, trade, initial)),
            Outcome::Created,
            &mut outcomes,
        )
        .await?;

        if chain_state.is_terminal() {
            let reason = if chain_state == PositionState::Cancelled {
                CloseReason::Cancelled
            } else {
                CloseReason::Market
            };
            self.apply(
                &ChainEvent::Removed(RemovedEvent {
                    id,
                    reason,
                    exec_x6: 0,
                    pnl_usd6: 0,
                }),
                Outcome::Removed,
                &mut outcomes,
            )
            .await?;
        }
        Ok(outcomes)
    }

    async fn apply(
        &self,
        event: &ChainEvent,
        outcome: Outcome,
        outcomes: &mut Vec<Outcome>,
    ) -> Result<(), ReconcileStep> {
        let _permit = self.db_permit().await?;
        match self.projector.apply(event, None).await {
            Ok(Applied::Noop) => Ok(()),
            Ok(_) => {
                outcomes.push(outcome);
                Ok(())
            }
            Err(e) => Err(ReconcileStep::Store(e)),
        }
    }

    async fn rpc_permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, ReconcileStep> {
        self.rpc_permits
            .acquire()
            .await
            .map_err(|_| ReconcileStep::Rpc(ChainError::Transport("semaphore closed".to_string())))
    }

    async fn db_permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, ReconcileStep> {
        self.db_permits.acquire().await.map_err(|_| {
            ReconcileStep::Store(ProjectionError::Store(crate::db::StoreError::Db(
                sqlx::Error::PoolTimedOut,
            )))
        })
    }
}

enum ReconcileStep {
    Rpc(ChainError),
    Store(ProjectionError),
}

fn opened_from_trade(id: u32, trade: &Trade, initial: PositionState) -> OpenedEvent {
    OpenedEvent {
        id,
        initial_state: initial,
        asset_id: trade.asset_id,
        long_side: trade.long_side(),
        lots: trade.lots,
        leverage_x: trade.leverage_x,
        entry_or_target_x6: if initial == PositionState::Order {
            trade.target_x6
        } else {
            trade.entry_x6
        },
        sl_x6: trade.sl_x6,
        tp_x6: trade.tp_x6,
        liq_x6: trade.liq_x6,
        trader: trade.owner.clone(),
    }
}

/// Re-upsert event rebuilt from the stored row, for index repairs.
fn opened_from_position(pos: &Position) -> OpenedEvent {
    OpenedEvent {
        id: pos.id,
        initial_state: pos.state,
        asset_id: pos.asset_id,
        long_side: pos.side.as_bool(),
        lots: pos.lots as u16,
        leverage_x: pos.leverage_x as u16,
        entry_or_target_x6: if pos.state == PositionState::Order {
            pos.target_x6
        } else {
            pos.entry_x6
        },
        sl_x6: pos.sl_x6,
        tp_x6: pos.tp_x6,
        liq_x6: pos.liq_x6,
        trader: pos.owner.clone(),
    }
}

/// The stop rows an OPEN position must have: one per non-zero stop, on the
/// antagonistic side.
fn expected_stop_rows(pos: &Position) -> Vec<(i64, i64, i64, bool)> {
    let mut rows = Vec::new();
    for (stop_type, price, bucket) in [
        (1, pos.sl_x6, pos.sl_bucket),
        (2, pos.tp_x6, pos.tp_bucket),
        (3, pos.liq_x6, pos.liq_bucket),
    ] {
        if price != 0 {
            if let Some(bucket) = bucket {
                rows.push((bucket, stop_type, pos.lots, !pos.side.as_bool()));
            }
        }
    }
    rows
}
