use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;
use crate::api::errors::{api_error, ApiError};
use crate::api::AppState;
use crate::errors::ScanlineError;
use crate::pipeline::ingest::TriggerEvent;

/// Trigger ingress: a registry push or schedule event for ingest.
pub async fn receive_event(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let runtime = state.runtime
        .as_ref()
        .ok_or_else(|| api_error(ScanlineError::Queue("pipeline is not running".into())))?;

    let event = TriggerEvent::from_json(&body).map_err(api_error)?;
    if let TriggerEvent::Ignored { reason } = &event {
        info!(reason = %reason, "Trigger event ignored");
        return Ok((StatusCode::OK, Json(json!({ "ignored": true, "reason": reason }))));
    }

    let outcomes = runtime.ingest_event(&event, Utc::now()).await.map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "ignored": false, "outcomes": outcomes }))))
}
