use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use crate::errors::ScanlineError;

impl ScanlineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ScanlineError::InvalidEvent(_) | ScanlineError::Json(_) => StatusCode::BAD_REQUEST,
            ScanlineError::NotFound(_) => StatusCode::NOT_FOUND,
            ScanlineError::Throttled(_) => StatusCode::TOO_MANY_REQUESTS,
            ScanlineError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ScanlineError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(json!({"error": self.to_string()}))).into_response()
    }
}

pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(e: ScanlineError) -> ApiError {
    (e.status_code(), Json(json!({"error": e.to_string()})))
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message.into()})))
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({"error": message.into()})))
}
