//! The read API's closed error-code set.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Every error the API can return, with its wire code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("bad request")]
    BadRequest,
    #[error("asset query parameter required")]
    AssetRequired,
    #[error("price or bucket query parameter required")]
    PriceOrBucketRequired,
    #[error("asset id invalid")]
    AssetIdInvalid,
    #[error("invalid address")]
    InvalidAddress,
    #[error("asset tick is unusable")]
    BadTick,
    #[error("not found")]
    NotFound,
    #[error("asset not found")]
    AssetNotFound,
    #[error("position not found")]
    PositionNotFound,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest => "bad_request",
            ApiError::AssetRequired => "asset_required",
            ApiError::PriceOrBucketRequired => "price_or_bucket_required",
            ApiError::AssetIdInvalid => "asset_id_invalid",
            ApiError::InvalidAddress => "invalid_address",
            ApiError::BadTick => "bad_tick",
            ApiError::NotFound => "not_found",
            ApiError::AssetNotFound => "asset_not_found",
            ApiError::PositionNotFound => "position_not_found",
            ApiError::Internal => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest
            | ApiError::AssetRequired
            | ApiError::PriceOrBucketRequired
            | ApiError::AssetIdInvalid
            | ApiError::InvalidAddress
            | ApiError::BadTick => StatusCode::BAD_REQUEST,
            ApiError::NotFound | ApiError::AssetNotFound | ApiError::PositionNotFound => {
                StatusCode::NOT_FOUND
            }
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<crate::db::StoreError> for ApiError {
    fn from(err: crate::db::StoreError) -> Self {
        tracing::error!(error = %err, "store error in api handler");
        ApiError::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code(),
        }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ApiError::BadRequest.code(), "bad_request");
        assert_eq!(ApiError::AssetRequired.code(), "asset_required");
        assert_eq!(
            ApiError::PriceOrBucketRequired.code(),
            "price_or_bucket_required"
        );
        assert_eq!(ApiError::AssetIdInvalid.code(), "asset_id_invalid");
        assert_eq!(ApiError::InvalidAddress.code(), "invalid_address");
        assert_eq!(ApiError::BadTick.code(), "bad_tick");
        assert_eq!(ApiError::NotFound.code(), "not_found");
        assert_eq!(ApiError::AssetNotFound.code(), "asset_not_found");
        assert_eq!(ApiError::PositionNotFound.code(), "position_not_found");
        assert_eq!(ApiError::Internal.code(), "internal_error");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::BadTick.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::AssetNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
