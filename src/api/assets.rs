use axum::extract::{Path, State};
use axum::Json;

use crate::domain::Asset;
use crate::error::ApiError;

use super::AppState;

pub async fn list_assets(State(state): State<AppState>) -> Result<Json<Vec<Asset>>, ApiError> {
    Ok(Json(state.repo.list_assets().await?))
}

pub async fn get_asset(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Asset>, ApiError> {
    let asset_id = id.parse::<u32>().map_err(|_| ApiError::AssetIdInvalid)?;
    state
        .repo
        .get_asset(asset_id)
        .await?
        .map(Json)
        .ok_or(ApiError::AssetNotFound)
}
