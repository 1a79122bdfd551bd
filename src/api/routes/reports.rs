use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::errors::{api_error, bad_request, not_found, ApiError};
use crate::api::AppState;

/// Scan history of one image, newest first.
pub async fn get_image_reports(
    State(state): State<AppState>,
    Path(digest): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.db.get_image(&digest).map_err(api_error)?.is_none() {
        return Err(not_found("Image not found"));
    }
    let reports = state.db.scan_reports_for_digest(&digest).map_err(api_error)?;
    Ok(Json(json!({
        "digest": digest,
        "latest": reports.first(),
        "reports": reports,
        "total": reports.len(),
    })))
}

#[derive(Deserialize)]
pub struct ReportQuery {
    /// `{registry}/{repository}`
    pub repository: Option<String>,
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Value>, ApiError> {
    let repository = query.repository
        .ok_or_else(|| bad_request("Query parameter 'repository' is required"))?;
    let reports = state.db.scan_reports_by_repository(&repository).map_err(api_error)?;
    Ok(Json(json!({ "repository": repository, "reports": reports, "total": reports.len() })))
}
