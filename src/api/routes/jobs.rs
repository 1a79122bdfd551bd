use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::errors::{api_error, bad_request, ApiError};
use crate::api::AppState;
use crate::pipeline::state::JobState;

#[derive(Deserialize)]
pub struct JobQuery {
    pub status: Option<String>,
}

/// Jobs in one state via the status index. Without `status`, the per-state counts.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<Value>, ApiError> {
    let Some(status) = query.status else {
        let counts = state.db.job_state_counts().map_err(api_error)?;
        let counts: serde_json::Map<String, Value> = counts
            .into_iter()
            .map(|(job_state, count)| (job_state.to_string(), json!(count)))
            .collect();
        return Ok(Json(json!({ "counts": counts })));
    };

    let job_state = JobState::parse(&status)
        .ok_or_else(|| bad_request(format!("Unknown job status '{}'", status)))?;
    let jobs = state.db.jobs_by_state(job_state).map_err(api_error)?;
    Ok(Json(json!({ "status": job_state, "jobs": jobs, "total": jobs.len() })))
}
