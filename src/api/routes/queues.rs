use axum::{extract::State, Json};
use serde_json::{json, Value};
use crate::api::errors::{api_error, ApiError};
use crate::api::AppState;
use crate::models::message::QueueName;

/// Live depths from the running pipeline; dead-letter depths only otherwise.
pub async fn queue_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    if let Some(runtime) = &state.runtime {
        let queues = runtime.queue_status().await.map_err(api_error)?;
        return Ok(Json(json!({ "live": true, "queues": queues })));
    }

    let mut queues = Vec::new();
    for queue in [QueueName::Scan, QueueName::Inspect] {
        queues.push(json!({
            "queue": queue,
            "ready": null,
            "in_flight": null,
            "dead_letters": state.db.dead_letter_depth(queue).map_err(api_error)?,
        }));
    }
    Ok(Json(json!({ "live": false, "queues": queues })))
}
