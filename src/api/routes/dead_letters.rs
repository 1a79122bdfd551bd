use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::errors::{api_error, bad_request, ApiError};
use crate::api::AppState;
use crate::models::message::QueueName;

#[derive(Deserialize)]
pub struct DeadLetterQuery {
    pub queue: Option<String>,
}

pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Value>, ApiError> {
    let queues = match query.queue.as_deref() {
        Some(name) => vec![QueueName::parse(name)
            .ok_or_else(|| bad_request(format!("Unknown queue '{}'", name)))?],
        None => vec![QueueName::Scan, QueueName::Inspect],
    };

    let mut letters = Vec::new();
    for queue in queues {
        letters.extend(state.db.dead_letters(queue).map_err(api_error)?);
    }
    Ok(Json(json!({ "dead_letters": letters, "total": letters.len() })))
}
