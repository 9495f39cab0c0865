//! Drift detection and repair against authoritative chain state.

pub mod backfill;
pub mod reconciler;

pub use backfill::{BackfillReport, Backfiller};
pub use reconciler::{ReconcileMode, ReconcileSummary, Reconciler};
