//! Read API over the projection.

pub mod assets;
pub mod buckets;
pub mod exposure;
pub mod health;
pub mod positions;
pub mod verify;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::db::Repository;
use crate::reconcile::Reconciler;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub reconciler: Arc<Reconciler>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/assets", get(assets::list_assets))
        .route("/assets/:id", get(assets::get_asset))
        .route("/position/:id", get(positions::get_position))
        .route("/trader/:addr", get(positions::get_trader))
        .route("/bucket/orders", get(buckets::orders))
        .route("/bucket/stops", get(buckets::stops))
        .route("/bucket/orders-range", get(buckets::orders_range))
        .route("/bucket/stops-range", get(buckets::stops_range))
        .route("/bucket/range", get(buckets::combined_range))
        .route("/exposure", get(exposure::all_exposure))
        .route("/exposure/:asset_id", get(exposure::asset_exposure))
        .route("/verify/:csv_ids", get(verify::verify))
        .with_state(state)
}
