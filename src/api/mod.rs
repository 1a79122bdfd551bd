pub mod routes;
pub mod errors;

use std::sync::Arc;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use crate::db::Database;
use crate::pipeline::PipelineRuntime;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Present when the API is served next to a running pipeline.
    pub runtime: Option<Arc<PipelineRuntime>>,
}

impl AppState {
    pub fn read_only(db: Database) -> Self {
        Self { db, runtime: None }
    }

    pub fn with_runtime(runtime: Arc<PipelineRuntime>) -> Self {
        Self { db: runtime.db().clone(), runtime: Some(runtime) }
    }
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/v1/images", get(routes::images::list_images))
        .route("/api/v1/images/:digest", get(routes::images::get_image))
        .route("/api/v1/images/:digest/jobs", get(routes::images::get_image_jobs))
        .route("/api/v1/images/:digest/findings", get(routes::findings::get_image_findings))
        .route("/api/v1/images/:digest/reports", get(routes::reports::get_image_reports))
        .route("/api/v1/reports", get(routes::reports::list_reports))
        .route("/api/v1/vulns/:vuln_id", get(routes::vulns::get_vuln))
        .route("/api/v1/jobs", get(routes::jobs::list_jobs))
        .route("/api/v1/findings", get(routes::findings::list_findings))
        .route("/api/v1/dead-letters", get(routes::dead_letters::list_dead_letters))
        .route("/api/v1/queues", get(routes::queues::queue_status));

    if state.runtime.is_some() {
        router = router.route("/events/registry", post(routes::events::receive_event));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
