use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use crate::api::errors::{api_error, not_found, ApiError};
use crate::api::AppState;

#[derive(Deserialize)]
pub struct ImageQuery {
    /// `{registry}/{repository}`
    pub repository: Option<String>,
}

pub async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Result<Json<Value>, ApiError> {
    let images = match query.repository.as_deref() {
        Some(repository) => state.db.images_by_repository(repository),
        None => state.db.list_images(),
    }.map_err(api_error)?;

    Ok(Json(json!({ "images": images, "total": images.len() })))
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(digest): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.db.get_image(&digest).map_err(api_error)? {
        Some(image) => {
            let open_job = state.db.open_job(&digest).map_err(api_error)?;
            Ok(Json(json!({ "image": image, "open_job": open_job })))
        }
        None => Err(not_found("Image not found")),
    }
}

pub async fn get_image_jobs(
    State(state): State<AppState>,
    Path(digest): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.db.get_image(&digest).map_err(api_error)?.is_none() {
        return Err(not_found("Image not found"));
    }
    let jobs = state.db.jobs_for_digest(&digest).map_err(api_error)?;
    Ok(Json(json!({ "digest": digest, "jobs": jobs, "total": jobs.len() })))
}
