use std::collections::BTreeSet;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::errors::{api_error, ApiError};
use crate::api::AppState;

#[derive(Deserialize)]
pub struct VulnQuery {
    #[serde(default)]
    pub include_resolved: bool,
}

/// Images affected by one vulnerability. Resolved exposures are left out
/// unless `include_resolved=true`.
pub async fn get_vuln(
    State(state): State<AppState>,
    Path(vuln_id): Path<String>,
    Query(query): Query<VulnQuery>,
) -> Result<Json<Value>, ApiError> {
    let vuln_id = vuln_id.trim().to_ascii_uppercase();
    let exposures: Vec<_> = state.db.exposures_for_vuln(&vuln_id)
        .map_err(api_error)?
        .into_iter()
        .filter(|exposure| query.include_resolved || !exposure.is_resolved())
        .collect();

    let affected: BTreeSet<&str> = exposures.iter()
        .filter(|exposure| !exposure.is_resolved())
        .map(|exposure| exposure.image.digest.as_str())
        .collect();

    Ok(Json(json!({
        "vuln_id": vuln_id,
        "exposures": exposures,
        "affected_images": affected.len(),
        "total": exposures.len(),
    })))
}
