//! On-demand state-only reconciliation for a caller-supplied id list.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::reconcile::ReconcileMode;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub checked: u64,
    pub updated: u64,
    pub mismatches: u64,
    pub rpc_failed: u64,
}

pub async fn verify(
    Path(csv_ids): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let ids = parse_csv_ids(&csv_ids)?;

    let summary = state
        .reconciler
        .reconcile_ids(&ids, ReconcileMode::StateOnly)
        .await;

    // A run where every single chain read failed means the chain is
    // unreachable, not that the projection is clean.
    if !ids.is_empty() && summary.rpc_failed == ids.len() as u64 {
        return Err(ApiError::Internal);
    }

    Ok(Json(VerifyResponse {
        checked: summary.scanned,
        updated: summary.corrections(),
        mismatches: summary.corrections() + summary.missing_db,
        rpc_failed: summary.rpc_failed,
    }))
}

fn parse_csv_ids(raw: &str) -> Result<Vec<u32>, ApiError> {
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        ids.push(part.parse::<u32>().map_err(|_| ApiError::BadRequest)?);
    }
    if ids.is_empty() {
        return Err(ApiError::BadRequest);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_ids() {
        assert_eq!(parse_csv_ids("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_csv_ids("42").unwrap(), vec![42]);
        assert_eq!(parse_csv_ids(" 7 , 9 ").unwrap(), vec![7, 9]);
        assert_eq!(parse_csv_ids(""), Err(ApiError::BadRequest));
        assert_eq!(parse_csv_ids("1,x"), Err(ApiError::BadRequest));
        assert_eq!(parse_csv_ids("-1"), Err(ApiError::BadRequest));
    }
}
