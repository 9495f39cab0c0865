//! Consumer behavior over a scripted event source: dedup, idempotent
//! re-delivery, and error propagation to the supervisor.

use std::sync::Arc;
use std::time::Duration;

use perpindex::chain::{ChainError, MockEvents, Topic};
use perpindex::db::{init_db, Repository};
use perpindex::domain::{
    Addr, Asset, ChainEvent, Envelope, EventMeta, ExecutedEvent, OpenedEvent, PositionState,
};
use perpindex::engine::{run_consumer, Projector};
use tempfile::TempDir;

const TRADER: &str = "0xaabbccdd00112233445566778899aabbccddeeff";

async fn setup() -> (Arc<Repository>, Arc<Projector>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    repo.upsert_asset(&Asset {
        asset_id: 0,
        symbol: "BTC-PERP".to_string(),
        tick_x6: 10_000,
        lot_num: 1,
        lot_den: 1,
    })
    .await
    .expect("seed asset failed");
    let projector = Arc::new(Projector::new(repo.clone()));
    (repo, projector, temp_dir)
}

fn envelope(event: ChainEvent, block: u64, log_index: u64) -> Envelope {
    Envelope {
        event,
        meta: EventMeta {
            block_number: block,
            tx_hash: format!("0xtx{}", block),
            log_index,
        },
    }
}

fn opened(id: u32) -> ChainEvent {
    ChainEvent::Opened(OpenedEvent {
        id,
        initial_state: PositionState::Order,
        asset_id: 0,
        long_side: true,
        lots: 1,
        leverage_x: 5,
        entry_or_target_x6: 100_000_000,
        sl_x6: 0,
        tp_x6: 0,
        liq_x6: 0,
        trader: Addr::new(TRADER),
    })
}

#[tokio::test]
async fn test_consumer_applies_stream_until_close() {
    let (repo, projector, _temp) = setup().await;

    let source = MockEvents::new(vec![
        envelope(opened(1), 10, 0),
        envelope(opened(2), 10, 1),
        envelope(
            ChainEvent::Executed(ExecutedEvent {
                id: 1,
                entry_x6: 100_000_000,
            }),
            11,
            0,
        ),
    ]);
    let (_tx, shutdown) = tokio::sync::watch::channel(false);

    let result = run_consumer(Topic::Opened, source, projector, None, shutdown).await;
    assert!(matches!(result, Err(ChainError::SubscriptionClosed)));

    assert_eq!(
        repo.read_position(1).await.unwrap().unwrap().state,
        PositionState::Open
    );
    assert_eq!(
        repo.read_position(2).await.unwrap().unwrap().state,
        PositionState::Order
    );
}

#[tokio::test]
async fn test_consumer_suppresses_duplicate_deliveries() {
    let (repo, projector, _temp) = setup().await;

    // The same log delivered three times; at-least-once transport.
    let source = MockEvents::new(vec![
        envelope(opened(1), 10, 0),
        envelope(opened(1), 10, 0),
        envelope(opened(1), 10, 0),
    ]);
    let (_tx, shutdown) = tokio::sync::watch::channel(false);
    let _ = run_consumer(Topic::Opened, source, projector, None, shutdown).await;

    let pos = repo.read_position(1).await.unwrap().unwrap();
    assert_eq!(pos.state, PositionState::Order);
    assert_eq!(repo.read_order_buckets(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_consumer_surfaces_watchdog_to_supervisor() {
    let (_repo, projector, _temp) = setup().await;

    let source = MockEvents::new(vec![envelope(opened(1), 10, 0)])
        .then_error(ChainError::Watchdog(Duration::from_secs(15)));
    let (_tx, shutdown) = tokio::sync::watch::channel(false);

    let result = run_consumer(Topic::Opened, source, projector, None, shutdown).await;
    assert!(matches!(result, Err(ChainError::Watchdog(_))));
}

#[tokio::test]
async fn test_consumer_shuts_down_cooperatively() {
    let (_repo, projector, _temp) = setup().await;

    // A source that never yields: shutdown must still win.
    struct Pending;
    #[async_trait::async_trait]
    impl perpindex::chain::EventSource for Pending {
        async fn next_event(&mut self) -> Result<Envelope, ChainError> {
            futures::future::pending().await
        }
    }

    let (tx, shutdown) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(run_consumer(
        Topic::Opened,
        Pending,
        projector,
        None,
        shutdown,
    ));

    tx.send(true).expect("send shutdown");
    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("consumer did not stop")
        .expect("join failed");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_consumer_drops_event_for_missing_position_without_crash() {
    let (repo, projector, _temp) = setup().await;

    // Executed with no Opened predecessor, followed by a healthy event.
    let source = MockEvents::new(vec![
        envelope(
            ChainEvent::Executed(ExecutedEvent {
                id: 404,
                entry_x6: 1,
            }),
            10,
            0,
        ),
        envelope(opened(2), 10, 1),
    ]);
    let (_tx, shutdown) = tokio::sync::watch::channel(false);
    let _ = run_consumer(Topic::Executed, source, projector, None, shutdown).await;

    assert!(repo.read_position(404).await.unwrap().is_none());
    assert!(repo.read_position(2).await.unwrap().is_some());
}
