//! Price-bucket lookups over the order and stop indexes.
//!
//! Callers address a level either by `bucket` directly or by a decimal
//! `price` that is quantized with the asset's tick.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::{BucketSort, OrderBucketRow, StopBucketRow};
use crate::domain::{bucket_id, parse_px6, Asset};
use crate::error::ApiError;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct BucketQuery {
    pub asset: Option<String>,
    pub price: Option<String>,
    pub bucket: Option<i64>,
    pub side: Option<String>,
    pub stop_type: Option<i64>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub asset: Option<String>,
    pub from_price: Option<String>,
    pub to_price: Option<String>,
    pub from_bucket: Option<i64>,
    pub to_bucket: Option<i64>,
    pub side: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrdersResponse {
    pub asset_id: u32,
    pub rows: Vec<OrderBucketRow>,
}

#[derive(Debug, Serialize)]
pub struct StopsResponse {
    pub asset_id: u32,
    pub rows: Vec<StopBucketRow>,
}

#[derive(Debug, Serialize)]
pub struct CombinedRangeResponse {
    pub asset_id: u32,
    pub orders: Vec<OrderBucketRow>,
    pub stops: Vec<StopBucketRow>,
}

pub async fn orders(
    Query(query): Query<BucketQuery>,
    State(state): State<AppState>,
) -> Result<Json<OrdersResponse>, ApiError> {
    let asset = resolve_asset(&state, query.asset.as_deref()).await?;
    let bucket = resolve_bucket(&asset, query.price.as_deref(), query.bucket)?;
    let side = parse_side(query.side.as_deref())?;
    let (sort, descending) = parse_sort(query.sort.as_deref(), query.order.as_deref())?;

    let rows = state
        .repo
        .order_rows_at(asset.asset_id, bucket, side, sort, descending)
        .await?;
    Ok(Json(OrdersResponse {
        asset_id: asset.asset_id,
        rows,
    }))
}

pub async fn stops(
    Query(query): Query<BucketQuery>,
    State(state): State<AppState>,
) -> Result<Json<StopsResponse>, ApiError> {
    let asset = resolve_asset(&state, query.asset.as_deref()).await?;
    let bucket = resolve_bucket(&asset, query.price.as_deref(), query.bucket)?;
    let side = parse_side(query.side.as_deref())?;
    let (sort, descending) = parse_sort(query.sort.as_deref(), query.order.as_deref())?;
    if let Some(t) = query.stop_type {
        if !(1..=3).contains(&t) {
            return Err(ApiError::BadRequest);
        }
    }

    let rows = state
        .repo
        .stop_rows_at(
            asset.asset_id,
            bucket,
            side,
            query.stop_type,
            sort,
            descending,
        )
        .await?;
    Ok(Json(StopsResponse {
        asset_id: asset.asset_id,
        rows,
    }))
}

pub async fn orders_range(
    Query(query): Query<RangeQuery>,
    State(state): State<AppState>,
) -> Result<Json<OrdersResponse>, ApiError> {
    let asset = resolve_asset(&state, query.asset.as_deref()).await?;
    let (from, to) = resolve_range(&asset, &query)?;
    let side = parse_side(query.side.as_deref())?;

    let rows = state
        .repo
        .order_rows_range(asset.asset_id, from, to, side)
        .await?;
    Ok(Json(OrdersResponse {
        asset_id: asset.asset_id,
        rows,
    }))
}

pub async fn stops_range(
    Query(query): Query<RangeQuery>,
    State(state): State<AppState>,
) -> Result<Json<StopsResponse>, ApiError> {
    let asset = resolve_asset(&state, query.asset.as_deref()).await?;
    let (from, to) = resolve_range(&asset, &query)?;
    let side = parse_side(query.side.as_deref())?;

    let rows = state
        .repo
        .stop_rows_range(asset.asset_id, from, to, side)
        .await?;
    Ok(Json(StopsResponse {
        asset_id: asset.asset_id,
        rows,
    }))
}

pub async fn combined_range(
    Query(query): Query<RangeQuery>,
    State(state): State<AppState>,
) -> Result<Json<CombinedRangeResponse>, ApiError> {
    let asset = resolve_asset(&state, query.asset.as_deref()).await?;
    let (from, to) = resolve_range(&asset, &query)?;
    let side = parse_side(query.side.as_deref())?;

    let orders = state
        .repo
        .order_rows_range(asset.asset_id, from, to, side)
        .await?;
    let stops = state
        .repo
        .stop_rows_range(asset.asset_id, from, to, side)
        .await?;
    Ok(Json(CombinedRangeResponse {
        asset_id: asset.asset_id,
        orders,
        stops,
    }))
}

async fn resolve_asset(state: &AppState, raw: Option<&str>) -> Result<Asset, ApiError> {
    let raw = raw.ok_or(ApiError::AssetRequired)?;
    let asset_id = raw.parse::<u32>().map_err(|_| ApiError::AssetIdInvalid)?;
    state
        .repo
        .get_asset(asset_id)
        .await?
        .ok_or(ApiError::AssetNotFound)
}

fn resolve_bucket(
    asset: &Asset,
    price: Option<&str>,
    bucket: Option<i64>,
) -> Result<i64, ApiError> {
    match (bucket, price) {
        (Some(bucket), _) => Ok(bucket),
        (None, Some(price)) => {
            let price_x6 = parse_px6(price).map_err(|_| ApiError::BadRequest)?;
            bucket_id(price_x6, asset.tick_x6).map_err(|_| ApiError::BadTick)
        }
        (None, None) => Err(ApiError::PriceOrBucketRequired),
    }
}

fn resolve_range(asset: &Asset, query: &RangeQuery) -> Result<(i64, i64), ApiError> {
    let from = match (query.from_bucket, query.from_price.as_deref()) {
        (Some(bucket), _) => bucket,
        (None, Some(price)) => {
            let price_x6 = parse_px6(price).map_err(|_| ApiError::BadRequest)?;
            bucket_id(price_x6, asset.tick_x6).map_err(|_| ApiError::BadTick)?
        }
        (None, None) => return Err(ApiError::PriceOrBucketRequired),
    };
    let to = match (query.to_bucket, query.to_price.as_deref()) {
        (Some(bucket), _) => bucket,
        (None, Some(price)) => {
            let price_x6 = parse_px6(price).map_err(|_| ApiError::BadRequest)?;
            bucket_id(price_x6, asset.tick_x6).map_err(|_| ApiError::BadTick)?
        }
        (None, None) => return Err(ApiError::PriceOrBucketRequired),
    };
    if from > to {
        return Err(ApiError::BadRequest);
    }
    Ok((from, to))
}

fn parse_side(raw: Option<&str>) -> Result<Option<bool>, ApiError> {
    match raw {
        None => Ok(None),
        Some("long") | Some("true") => Ok(Some(true)),
        Some("short") | Some("false") => Ok(Some(false)),
        Some(_) => Err(ApiError::BadRequest),
    }
}

fn parse_sort(
    sort: Option<&str>,
    order: Option<&str>,
) -> Result<(BucketSort, bool), ApiError> {
    let sort = match sort {
        None | Some("id") => BucketSort::PositionId,
        Some("lots") => BucketSort::Lots,
        Some(_) => return Err(ApiError::BadRequest),
    };
    let descending = match order {
        None | Some("asc") => false,
        Some("desc") => true,
        Some(_) => return Err(ApiError::BadRequest),
    };
    Ok((sort, descending))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset() -> Asset {
        Asset {
            asset_id: 0,
            symbol: "BTC-PERP".to_string(),
            tick_x6: 10_000,
            lot_num: 1,
            lot_den: 1,
        }
    }

    #[test]
    fn test_resolve_bucket_prefers_explicit_bucket() {
        assert_eq!(resolve_bucket(&asset(), Some("1.0"), Some(42)).unwrap(), 42);
        assert_eq!(
            resolve_bucket(&asset(), Some("108910.01"), None).unwrap(),
            10_891_001
        );
        assert_eq!(
            resolve_bucket(&asset(), None, None),
            Err(ApiError::PriceOrBucketRequired)
        );
        assert_eq!(
            resolve_bucket(&asset(), Some("abc"), None),
            Err(ApiError::BadRequest)
        );
    }

    #[test]
    fn test_parse_side() {
        assert_eq!(parse_side(None).unwrap(), None);
        assert_eq!(parse_side(Some("long")).unwrap(), Some(true));
        assert_eq!(parse_side(Some("short")).unwrap(), Some(false));
        assert_eq!(parse_side(Some("sideways")), Err(ApiError::BadRequest));
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(
            parse_sort(None, None).unwrap(),
            (BucketSort::PositionId, false)
        );
        assert_eq!(
            parse_sort(Some("lots"), Some("desc")).unwrap(),
            (BucketSort::Lots, true)
        );
        assert_eq!(parse_sort(Some("price"), None), Err(ApiError::BadRequest));
        assert_eq!(
            parse_sort(None, Some("sideways")),
            Err(ApiError::BadRequest)
        );
    }
}
