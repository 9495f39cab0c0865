//! Gap discovery between the projection and the chain.
//!
//! Finds holes below the highest indexed id plus the tail the chain has
//! assigned beyond it, and hands both to the reconciler in bounded chunks.
//! A failing chunk is recorded and the remaining chunks still run.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::{ChainError, ChainReader};
use crate::db::{Repository, StoreError};

use super::{ReconcileMode, ReconcileSummary, Reconciler};

/// Chunks handed to the reconciler per dispatch.
pub const DEFAULT_CHUNK_SIZE: usize = 400;
/// Page size for listing present ids.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one backfill pass covered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub chain_max: u32,
    pub db_max: u32,
    pub targets: u64,
    pub chunks: u64,
    pub failed_chunks: u64,
    pub summary: ReconcileSummary,
}

pub struct Backfiller {
    chain: Arc<dyn ChainReader>,
    repo: Arc<Repository>,
    reconciler: Arc<Reconciler>,
    chunk_size: usize,
    page_size: usize,
}

impl Backfiller {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        repo: Arc<Repository>,
        reconciler: Arc<Reconciler>,
        chunk_size: usize,
        page_size: usize,
    ) -> Self {
        Self {
            chain,
            repo,
            reconciler,
            chunk_size: chunk_size.max(1),
            page_size: page_size.max(1),
        }
    }

    /// Run one full backfill pass: holes below `db_max`, then the tail up to
    /// the chain's highest assigned id.
    pub async fn run(&self) -> Result<BackfillReport, BackfillError> {
        let next_id = self.chain.next_id().await?;
        let chain_max = next_id.saturating_sub(1);
        let db_max = self.repo.max_id().await?.unwrap_or(0);

        let present = self.collect_present_ids().await?;
        let holes = compute_holes(&present, db_max);

        let mut report = BackfillReport {
            chain_max,
            db_max,
            ..Default::default()
        };

        info!(
            chain_max,
            db_max,
            holes = holes.len(),
            "backfill pass starting"
        );

        for chunk in holes.chunks(self.chunk_size) {
            self.run_chunk(chunk, &mut report).await;
        }

        for (start, end) in tail_chunks(db_max, chain_max, self.chunk_size) {
            let ids: Vec<u32> = (start..=end).collect();
            self.run_chunk(&ids, &mut report).await;
        }

        info!(
            targets = report.targets,
            chunks = report.chunks,
            failed = report.failed_chunks,
            corrections = report.summary.corrections(),
            "backfill pass finished"
        );
        Ok(report)
    }

    /// Reconcile one sliding window of ids, bounds inclusive. Used by the
    /// Opened consumer's periodic trigger.
    pub async fn reconcile_window(&self, lo: u32, hi: u32) -> ReconcileSummary {
        let lo = lo.max(1);
        if lo > hi {
            return ReconcileSummary::default();
        }
        let ids: Vec<u32> = (lo..=hi).collect();
        self.reconciler
            .reconcile_ids(&ids, ReconcileMode::Full)
            .await
    }

    async fn run_chunk(&self, ids: &[u32], report: &mut BackfillReport) {
        if ids.is_empty() {
            return;
        }
        let summary = self
            .reconciler
            .reconcile_ids(ids, ReconcileMode::Full)
            .await;
        report.targets += ids.len() as u64;
        report.chunks += 1;
        if summary.rpc_failed > 0 || summary.store_failed > 0 {
            warn!(
                first = ids[0],
                last = ids[ids.len() - 1],
                rpc_failed = summary.rpc_failed,
                store_failed = summary.store_failed,
                "backfill chunk had failures"
            );
            report.failed_chunks += 1;
        }
        report.summary.merge(&summary);
    }

    async fn collect_present_ids(&self) -> Result<Vec<u32>, StoreError> {
        let mut present = Vec::new();
        let mut offset: i64 = 0;
        loop {
            let page = self.repo.list_ids(self.page_size as i64, offset).await?;
            let fetched = page.len();
            present.extend(page);
            if fetched < self.page_size {
                break;
            }
            offset += fetched as i64;
        }
        Ok(present)
    }
}

/// Missing ids in `[1, db_max]`, given the ascending list of present ids.
/// Id 0 is excluded by convention. Linear in present ids plus holes found.
fn compute_holes(present: &[u32], db_max: u32) -> Vec<u32> {
    let mut holes = Vec::new();
    let mut expect: u64 = 1;
    for &p in present {
        if p == 0 {
            continue;
        }
        let p = p as u64;
        if p > db_max as u64 {
            break;
        }
        for missing in expect..p {
            holes.push(missing as u32);
        }
        expect = p + 1;
    }
    let mut missing = expect;
    while missing <= db_max as u64 {
        holes.push(missing as u32);
        missing += 1;
    }
    holes
}

/// Inclusive (start, end) chunks covering `(db_max, chain_max]`. Computed in
/// u64 so chain ids at the top of the u32 space cannot overflow.
fn tail_chunks(db_max: u32, chain_max: u32, chunk_size: usize) -> Vec<(u32, u32)> {
    let mut chunks = Vec::new();
    let chunk = chunk_size.max(1) as u64;
    let mut cursor = db_max as u64 + 1;
    let limit = chain_max as u64;
    while cursor <= limit {
        let end = (cursor + chunk - 1).min(limit);
        chunks.push((cursor as u32, end as u32));
        cursor = end + 1;
    }
    chunks
}
