//! Long-lived subscriber tasks, one per event topic.
//!
//! Each consumer drains its subscription, deduplicates, and applies events
//! through the projector with a bounded retry budget for transient store
//! errors. A consumer never crashes the process over one bad event; it logs
//! and moves on, leaving repair to the reconciler. The supervisor respawns
//! each consumer after any exit, keeping four independent failure domains.

use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::{ChainError, EventGateway, EventSource, Topic};
use crate::domain::{ChainEvent, Envelope};
use crate::reconcile::Backfiller;

use super::{Applied, ProjectionError, Projector, SeenSet};

/// Seen-set sizing, per consumer process.
const DEDUP_CAP: usize = 5_000;
const DEDUP_TTL: Duration = Duration::from_secs(300);

/// Budget for retrying transient store errors on one event.
const STORE_RETRY_BUDGET: Duration = Duration::from_secs(5);

/// Delay between supervisor respawns.
const RESTART_DELAY: Duration = Duration::from_secs(2);

/// The Opened consumer triggers a window reconcile every this many ids.
const WINDOW_STRIDE: u32 = 10;

/// Drain one subscription until it errors or shutdown is signalled.
///
/// Returns `Ok(())` only on cooperative shutdown; any stream error is
/// surfaced so the supervisor can resubscribe.
pub async fn run_consumer<S: EventSource>(
    topic: Topic,
    mut source: S,
    projector: Arc<Projector>,
    backfiller: Option<Arc<Backfiller>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ChainError> {
    let mut seen = SeenSet::new(DEDUP_CAP, DEDUP_TTL);

    loop {
        let envelope = tokio::select! {
            _ = shutdown.changed() => {
                info!(%topic, "consumer shutting down");
                return Ok(());
            }
            event = source.next_event() => event?,
        };

        if !seen.insert(&envelope.meta.dedup_key()) {
            debug!(%topic, key = %envelope.meta.dedup_key(), "duplicate suppressed");
            continue;
        }

        handle_event(topic, &envelope, &projector, backfiller.as_deref()).await;

        if let ChainEvent::Opened(ev) = &envelope.event {
            if ev.id > 0 && ev.id % WINDOW_STRIDE == 0 {
                if let Some(backfiller) = &backfiller {
                    let backfiller = backfiller.clone();
                    let lo = ev.id - (WINDOW_STRIDE - 1);
                    let hi = ev.id;
                    tokio::spawn(async move {
                        let summary = backfiller.reconcile_window(lo, hi).await;
                        debug!(lo, hi, corrections = summary.corrections(), "window reconcile");
                    });
                }
            }
        }
    }
}

async fn handle_event(
    topic: Topic,
    envelope: &Envelope,
    projector: &Arc<Projector>,
    backfiller: Option<&Backfiller>,
) {
    let id = envelope.event.position_id();
    match apply_with_retry(projector, envelope).await {
        Ok(outcome) => {
            info!(
                %topic,
                id,
                kind = envelope.event.kind(),
                block = envelope.meta.block_number,
                tx = %envelope.meta.tx_hash,
                ?outcome,
                "event ingested"
            );
        }
        Err(ProjectionError::MissingPosition { id, kind }) => {
            // The predecessor never made it in; fetch it from the chain
            // instead of dropping the lifecycle on the floor.
            warn!(%topic, id, kind, "event for missing position");
            if let Some(backfiller) = backfiller {
                let summary = backfiller.reconcile_window(id, id).await;
                debug!(id, corrections = summary.corrections(), "missing-id reconcile");
            }
        }
        Err(error) => {
            warn!(%topic, id, %error, "event dropped after retries");
        }
    }
}

/// Apply one event, retrying transient store errors within the budget.
async fn apply_with_retry(
    projector: &Arc<Projector>,
    envelope: &Envelope,
) -> Result<Applied, ProjectionError> {
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(STORE_RETRY_BUDGET),
        ..Default::default()
    };

    retry(policy, || async {
        projector
            .apply(&envelope.event, Some(&envelope.meta))
            .await
            .map_err(|e| {
                if e.is_transient_store() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
    })
    .await
}

/// Spawn a supervised consumer for one topic: subscribe, drain, resubscribe
/// on error, forever, until shutdown.
pub fn spawn_supervised(
    gateway: EventGateway,
    topic: Topic,
    projector: Arc<Projector>,
    backfiller: Option<Arc<Backfiller>>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match gateway.subscribe(topic).await {
                Ok(subscription) => {
                    match run_consumer(
                        topic,
                        subscription,
                        projector.clone(),
                        backfiller.clone(),
                        shutdown.clone(),
                    )
                    .await
                    {
                        Ok(()) => break,
                        Err(error) => {
                            warn!(%topic, %error, "consumer stream ended, restarting");
                        }
                    }
                }
                Err(error) => {
                    warn!(%topic, %error, "subscribe failed, retrying");
                }
            }

            tokio::time::sleep(RESTART_DELAY).await;
        }
    })
}
