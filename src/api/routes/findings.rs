use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::errors::{api_error, bad_request, not_found, ApiError};
use crate::api::AppState;
use crate::models::finding::FindingStatus;

#[derive(Deserialize)]
pub struct FindingStatusQuery {
    pub status: Option<String>,
}

pub async fn list_findings(
    State(state): State<AppState>,
    Query(query): Query<FindingStatusQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = query.status.ok_or_else(|| bad_request("Query parameter 'status' is required"))?;
    let finding_status = FindingStatus::parse(&status)
        .ok_or_else(|| bad_request(format!("Unknown finding status '{}'", status)))?;

    let findings = state.db.findings_by_status(finding_status).map_err(api_error)?;
    Ok(Json(json!({ "status": finding_status, "findings": findings, "total": findings.len() })))
}

#[derive(Deserialize)]
pub struct ImageFindingsQuery {
    #[serde(default)]
    pub include_resolved: bool,
}

/// The image's newest finding set, or every finding ever recorded with
/// `include_resolved=true`.
pub async fn get_image_findings(
    State(state): State<AppState>,
    Path(digest): Path<String>,
    Query(query): Query<ImageFindingsQuery>,
) -> Result<Json<Value>, ApiError> {
    if state.db.get_image(&digest).map_err(api_error)?.is_none() {
        return Err(not_found("Image not found"));
    }

    let findings = if query.include_resolved {
        state.db.findings_for_digest(&digest)
    } else {
        state.db.current_findings(&digest)
    }.map_err(api_error)?;

    Ok(Json(json!({ "digest": digest, "findings": findings, "total": findings.len() })))
}
