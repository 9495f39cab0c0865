//! Endpoint contract tests: routes, DTO shapes, and the closed error-code
//! set, driven through the router with oneshot requests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use perpindex::api::{create_router, AppState};
use perpindex::chain::{ChainReader, MockChain, Trade};
use perpindex::db::{init_db, Repository};
use perpindex::domain::{Addr, Asset, ChainEvent, CloseReason, OpenedEvent, PositionState, RemovedEvent};
use perpindex::engine::Projector;
use perpindex::reconcile::Reconciler;
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

const TRADER: &str = "0xAABBccdd00112233445566778899aabbccddeeff";

struct Harness {
    app: axum::Router,
    projector: Arc<Projector>,
    chain: Arc<MockChain>,
    _temp: TempDir,
}

async fn setup() -> Harness {
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
    let chain = Arc::new(MockChain::new());
    let chain_reader: Arc<dyn ChainReader> = chain.clone();
    let reconciler = Arc::new(Reconciler::new(chain_reader, projector.clone(), 100, 500));
    let app = create_router(AppState {
        repo,
        reconciler,
    });

    Harness {
        app,
        projector,
        chain,
        _temp: temp_dir,
    }
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn opened(id: u32, state: PositionState, long: bool, px: i64) -> ChainEvent {
    ChainEvent::Opened(OpenedEvent {
        id,
        initial_state: state,
        asset_id: 0,
        long_side: long,
        lots: 2,
        leverage_x: 5,
        entry_or_target_x6: px,
        sl_x6: if state == PositionState::Open { 99_000_000 } else { 0 },
        tp_x6: 0,
        liq_x6: 0,
        trader: Addr::new(TRADER),
    })
}

#[tokio::test]
async fn test_health() {
    let h = setup().await;
    let (status, body) = get(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_assets_endpoints() {
    let h = setup().await;

    let (status, body) = get(&h.app, "/assets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["symbol"], "BTC-PERP");

    let (status, body) = get(&h.app, "/assets/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tick_x6"], 10_000);

    let (status, body) = get(&h.app, "/assets/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "asset_not_found");

    let (status, body) = get(&h.app, "/assets/notanumber").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "asset_id_invalid");
}

#[tokio::test]
async fn test_position_endpoint() {
    let h = setup().await;
    h.projector
        .apply(&opened(42, PositionState::Order, true, 108_910_010_000), None)
        .await
        .unwrap();

    let (status, body) = get(&h.app, "/position/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 42);
    assert_eq!(body["state"], "ORDER");
    assert_eq!(body["target_bucket"], 10_891_001);

    let (status, body) = get(&h.app, "/position/777").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "position_not_found");

    let (status, body) = get(&h.app, "/position/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_trader_endpoint_groups_and_is_case_insensitive() {
    let h = setup().await;
    h.projector
        .apply(&opened(1, PositionState::Order, true, 100_000_000), None)
        .await
        .unwrap();
    h.projector
        .apply(&opened(2, PositionState::Open, false, 100_000_000), None)
        .await
        .unwrap();
    h.projector
        .apply(&opened(3, PositionState::Open, true, 100_000_000), None)
        .await
        .unwrap();
    h.projector
        .apply(
            &ChainEvent::Removed(RemovedEvent {
                id: 3,
                reason: CloseReason::Market,
                exec_x6: 101_000_000,
                pnl_usd6: 2_000_000,
            }),
            None,
        )
        .await
        .unwrap();

    // Query with different casing than the event carried.
    let upper = format!("/trader/{}", TRADER.to_uppercase().replace("0X", "0x"));
    let (status, body) = get(&h.app, &upper).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["orders"], serde_json::json!([1]));
    assert_eq!(body["open"], serde_json::json!([2]));
    assert_eq!(body["closed"], serde_json::json!([3]));
    assert_eq!(body["cancelled"], serde_json::json!([]));

    let (status, body) = get(&h.app, "/trader/nothex").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_address");
}

#[tokio::test]
async fn test_bucket_orders_queries() {
    let h = setup().await;
    h.projector
        .apply(&opened(42, PositionState::Order, true, 108_910_010_000), None)
        .await
        .unwrap();

    let (status, body) = get(&h.app, "/bucket/orders?asset=0&price=108910.01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"].as_array().unwrap().len(), 1);
    assert_eq!(body["rows"][0]["position_id"], 42);
    assert_eq!(body["rows"][0]["bucket_id"], 10_891_001);

    let (status, body) = get(&h.app, "/bucket/orders?asset=0&bucket=10891001&side=long").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"].as_array().unwrap().len(), 1);

    let (status, body) = get(&h.app, "/bucket/orders?asset=0&bucket=10891001&side=short").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["rows"].as_array().unwrap().is_empty());

    // Error set.
    let (status, body) = get(&h.app, "/bucket/orders?price=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "asset_required");

    let (status, body) = get(&h.app, "/bucket/orders?asset=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "price_or_bucket_required");

    let (status, body) = get(&h.app, "/bucket/orders?asset=zz&bucket=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "asset_id_invalid");

    let (status, body) = get(&h.app, "/bucket/orders?asset=42&bucket=1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "asset_not_found");
}

#[tokio::test]
async fn test_bucket_stops_and_ranges() {
    let h = setup().await;
    // Open short at 100 with SL 99: one stop row on the long side.
    h.projector
        .apply(&opened(7, PositionState::Open, false, 100_000_000), None)
        .await
        .unwrap();

    let (status, body) = get(&h.app, "/bucket/stops?asset=0&price=99").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"].as_array().unwrap().len(), 1);
    assert_eq!(body["rows"][0]["stop_type"], 1);
    assert_eq!(body["rows"][0]["side"], true);

    let (status, body) =
        get(&h.app, "/bucket/stops-range?asset=0&from_bucket=9000&to_bucket=11000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"].as_array().unwrap().len(), 1);

    let (status, body) =
        get(&h.app, "/bucket/range?asset=0&from_price=90&to_price=110").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["orders"].as_array().unwrap().is_empty());
    assert_eq!(body["stops"].as_array().unwrap().len(), 1);

    let (status, body) =
        get(&h.app, "/bucket/orders-range?asset=0&from_bucket=100&to_bucket=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_exposure_endpoints() {
    let h = setup().await;
    h.projector
        .apply(&opened(7, PositionState::Open, false, 100_000_000), None)
        .await
        .unwrap();

    let (status, body) = get(&h.app, "/exposure").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["side"], "short");
    assert_eq!(rows[0]["sum_lots"], 2);
    assert_eq!(rows[0]["avg_entry_x6"], 100_000_000);

    let (status, body) = get(&h.app, "/exposure/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = get(&h.app, "/exposure/9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "asset_not_found");
}

#[tokio::test]
async fn test_verify_endpoint_repairs_drift() {
    let h = setup().await;

    // DB says OPEN; chain says CANCELLED.
    h.projector
        .apply(&opened(99, PositionState::Open, true, 100_000_000), None)
        .await
        .unwrap();
    h.chain.put_trade(
        99,
        Trade {
            owner: Addr::new(TRADER),
            lots: 2,
            leverage_x: 5,
            flags: 1,
            state: 3,
            entry_x6: 100_000_000,
            ..MockChain::empty_trade()
        },
    );

    let (status, body) = get(&h.app, "/verify/99").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checked"], 1);
    assert_eq!(body["updated"], 1);
    assert_eq!(body["mismatches"], 1);
    assert_eq!(body["rpc_failed"], 0);

    let (status, body) = get(&h.app, "/verify/notids").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_verify_endpoint_with_unreachable_chain() {
    let h = setup().await;
    h.projector
        .apply(&opened(1, PositionState::Open, true, 100_000_000), None)
        .await
        .unwrap();
    h.chain.fail_id(1);

    let (status, body) = get(&h.app, "/verify/1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");
}
