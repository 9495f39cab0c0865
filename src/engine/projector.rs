//! The position state machine.
//!
//! Translates each chain event into the store operation the transition table
//! prescribes. Consumers, the reconciler, and the verify endpoint all apply
//! events through here, so live ingestion and repair share one code path.

use std::sync::Arc;
use tracing::debug;

use crate::db::{IngestResult, Repository};
use crate::domain::{ChainEvent, EventMeta};

use super::{AssetCache, ProjectionError};

/// What applying an event did to the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Executed,
    StopsSet,
    Removed,
    /// Replay, or dominated by a later transition already in the store.
    Noop,
}

pub struct Projector {
    repo: Arc<Repository>,
    assets: AssetCache,
}

impl Projector {
    pub fn new(repo: Arc<Repository>) -> Self {
        let assets = AssetCache::new(repo.clone());
        Self { repo, assets }
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    /// Apply one event. Terminal states dominate and replays are no-ops;
    /// events whose predecessor never arrived surface as
    /// [`ProjectionError::MissingPosition`].
    pub async fn apply(
        &self,
        event: &ChainEvent,
        meta: Option<&EventMeta>,
    ) -> Result<Applied, ProjectionError> {
        let outcome = match event {
            ChainEvent::Opened(ev) => {
                let asset = self.assets.get(ev.asset_id).await?;
                match self.repo.ingest_opened(ev, &asset, meta).await? {
                    IngestResult::Applied => Applied::Created,
                    _ => Applied::Noop,
                }
            }
            ChainEvent::Executed(ev) => {
                let asset = self.asset_of(ev.id, "executed").await?;
                match self
                    .repo
                    .ingest_executed(ev.id, ev.entry_x6, &asset, meta)
                    .await?
                {
                    IngestResult::Applied => Applied::Executed,
                    IngestResult::Noop => Applied::Noop,
                    IngestResult::Missing => {
                        return Err(ProjectionError::MissingPosition {
                            id: ev.id,
                            kind: "executed",
                        })
                    }
                }
            }
            ChainEvent::StopsUpdated(ev) => {
                let asset = self.asset_of(ev.id, "stops_updated").await?;
                match self
                    .repo
                    .ingest_stops_updated(ev.id, ev.sl_x6, ev.tp_x6, &asset, meta)
                    .await?
                {
                    IngestResult::Applied => Applied::StopsSet,
                    IngestResult::Noop => Applied::Noop,
                    IngestResult::Missing => {
                        return Err(ProjectionError::MissingPosition {
                            id: ev.id,
                            kind: "stops_updated",
                        })
                    }
                }
            }
            ChainEvent::Removed(ev) => {
                match self
                    .repo
                    .ingest_removed(ev.id, ev.reason, ev.exec_x6, ev.pnl_usd6, meta)
                    .await?
                {
                    IngestResult::Applied => Applied::Removed,
                    IngestResult::Noop => Applied::Noop,
                    IngestResult::Missing => {
                        return Err(ProjectionError::MissingPosition {
                            id: ev.id,
                            kind: "removed",
                        })
                    }
                }
            }
        };

        debug!(id = event.position_id(), kind = event.kind(), ?outcome, "event applied");
        Ok(outcome)
    }

    /// Asset of an existing position, for operations that must recompute
    /// bucket keys.
    async fn asset_of(
        &self,
        id: u32,
        kind: &'static str,
    ) -> Result<crate::domain::Asset, ProjectionError> {
        let position = self
            .repo
            .read_position(id)
            .await?
            .ok_or(ProjectionError::MissingPosition { id, kind })?;
        self.assets.get(position.asset_id).await
    }
}
