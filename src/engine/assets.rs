//! In-memory asset metadata cache.
//!
//! Assets are immutable after creation, so entries are monotonic: once
//! resolved they are never invalidated within a run. Misses go through the
//! store.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::Repository;
use crate::domain::Asset;

use super::ProjectionError;

pub struct AssetCache {
    repo: Arc<Repository>,
    inner: RwLock<HashMap<u32, Asset>>,
}

impl AssetCache {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Look up an asset, resolving misses through the store.
    pub async fn get(&self, asset_id: u32) -> Result<Asset, ProjectionError> {
        if let Some(asset) = self.inner.read().await.get(&asset_id) {
            return Ok(asset.clone());
        }

        let asset = self
            .repo
            .get_asset(asset_id)
            .await?
            .ok_or(ProjectionError::UnknownAsset(asset_id))?;

        self.inner
            .write()
            .await
            .insert(asset_id, asset.clone());
        Ok(asset)
    }
}
