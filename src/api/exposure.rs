//! Per-asset, per-side exposure aggregates with derived averages.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::db::ExposureRow;
use crate::error::ApiError;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct ExposureDto {
    pub asset_id: u32,
    pub side: &'static str,
    pub sum_lots: i64,
    pub sum_entry_x6_lots: i64,
    pub sum_leverage_lots: i64,
    pub sum_liq_x6_lots: i64,
    pub sum_liq_lots: i64,
    pub positions_count: i64,
    pub avg_entry_x6: Option<i64>,
    pub avg_leverage_x: Option<i64>,
    pub avg_liq_x6: Option<i64>,
}

impl From<ExposureRow> for ExposureDto {
    fn from(row: ExposureRow) -> Self {
        let per_lot = |sum: i64, lots: i64| if lots > 0 { Some(sum / lots) } else { None };
        ExposureDto {
            asset_id: row.asset_id,
            side: if row.side { "long" } else { "short" },
            sum_lots: row.sum_lots,
            sum_entry_x6_lots: row.sum_entry_x6_lots,
            sum_leverage_lots: row.sum_leverage_lots,
            sum_liq_x6_lots: row.sum_liq_x6_lots,
            sum_liq_lots: row.sum_liq_lots,
            positions_count: row.positions_count,
            avg_entry_x6: per_lot(row.sum_entry_x6_lots, row.sum_lots),
            avg_leverage_x: per_lot(row.sum_leverage_lots, row.sum_lots),
            avg_liq_x6: per_lot(row.sum_liq_x6_lots, row.sum_liq_lots),
        }
    }
}

pub async fn all_exposure(
    State(state): State<AppState>,
) -> Result<Json<Vec<ExposureDto>>, ApiError> {
    let rows = state.repo.exposure_all().await?;
    Ok(Json(rows.into_iter().map(ExposureDto::from).collect()))
}

pub async fn asset_exposure(
    Path(asset_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ExposureDto>>, ApiError> {
    let asset_id = asset_id
        .parse::<u32>()
        .map_err(|_| ApiError::AssetIdInvalid)?;
    if state.repo.get_asset(asset_id).await?.is_none() {
        return Err(ApiError::AssetNotFound);
    }
    let rows = state.repo.exposure_for_asset(asset_id).await?;
    Ok(Json(rows.into_iter().map(ExposureDto::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dto_averages() {
        let dto = ExposureDto::from(ExposureRow {
            asset_id: 0,
            side: false,
            sum_lots: 2,
            sum_entry_x6_lots: 200_000_000,
            sum_leverage_lots: 10,
            sum_liq_x6_lots: 197_000_000,
            sum_liq_lots: 2,
            positions_count: 1,
        });
        assert_eq!(dto.side, "short");
        assert_eq!(dto.avg_entry_x6, Some(100_000_000));
        assert_eq!(dto.avg_leverage_x, Some(5));
        assert_eq!(dto.avg_liq_x6, Some(98_500_000));
    }

    #[test]
    fn test_dto_averages_empty_side() {
        let dto = ExposureDto::from(ExposureRow {
            asset_id: 0,
            side: true,
            sum_lots: 0,
            sum_entry_x6_lots: 0,
            sum_leverage_lots: 0,
            sum_liq_x6_lots: 0,
            sum_liq_lots: 0,
            positions_count: 0,
        });
        assert_eq!(dto.avg_entry_x6, None);
        assert_eq!(dto.avg_liq_x6, None);
    }
}
