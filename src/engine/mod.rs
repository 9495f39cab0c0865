//! Projection engine: the position state machine, the event consumers that
//! drive it, and their supporting caches.

pub mod assets;
pub mod consumer;
pub mod dedup;
pub mod projector;

use thiserror::Error;

use crate::db::StoreError;

pub use assets::AssetCache;
pub use consumer::{run_consumer, spawn_supervised};
pub use dedup::SeenSet;
pub use projector::{Applied, Projector};

/// Errors from applying events to the projection.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The event references an asset the store does not know.
    #[error("unknown asset {0}")]
    UnknownAsset(u32),
    /// The event implies a predecessor that was never ingested; the
    /// reconciler can fetch and insert it.
    #[error("{kind} event for missing position {id}")]
    MissingPosition { id: u32, kind: &'static str },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProjectionError {
    /// Worth retrying within the consumer's bounded budget.
    pub fn is_transient_store(&self) -> bool {
        matches!(self, ProjectionError::Store(e) if e.is_transient())
    }
}
