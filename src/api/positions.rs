use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::str::FromStr;

use crate::domain::{Addr, Position, PositionState};
use crate::error::ApiError;

use super::AppState;

pub async fn get_position(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Position>, ApiError> {
    let id = id.parse::<u32>().map_err(|_| ApiError::BadRequest)?;
    state
        .repo
        .read_position(id)
        .await?
        .map(Json)
        .ok_or(ApiError::PositionNotFound)
}

/// A trader's position ids grouped by lifecycle stage.
#[derive(Debug, Default, Serialize)]
pub struct TraderResponse {
    pub orders: Vec<u32>,
    pub open: Vec<u32>,
    pub cancelled: Vec<u32>,
    pub closed: Vec<u32>,
}

pub async fn get_trader(
    Path(addr): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TraderResponse>, ApiError> {
    let addr = Addr::from_str(&addr).map_err(|_| ApiError::InvalidAddress)?;

    let mut response = TraderResponse::default();
    for (id, position_state) in state.repo.trader_positions(&addr).await? {
        match position_state {
            PositionState::Order => response.orders.push(id),
            PositionState::Open => response.open.push(id),
            PositionState::Cancelled => response.cancelled.push(id),
            PositionState::Closed => response.closed.push(id),
        }
    }
    Ok(Json(response))
}
