//! API route modules.

pub mod files;
pub mod health;
pub mod jobs;
pub mod metrics;

use axum::routing::get;
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::api::server::AppState;

/// Create the versioned API router.
pub fn create_router(state: AppState) -> Router {
    let handler_timeout = state.config.http.handler_timeout;

    let v1 = Router::new()
        .merge(health::router())
        .nest("/jobs", jobs::router().layer(TimeoutLayer::new(handler_timeout)))
        // axum's nest() only matches "/jobs" (no trailing slash) for the
        // inner router's "/" route; alias the trailing-slash form to the
        // same handler so "/v1/jobs/" keeps working.
        .route(
            "/jobs/",
            get(jobs::list_jobs).layer(TimeoutLayer::new(handler_timeout)),
        )
        // File downloads stream for much longer than regular handlers.
        .nest("/files", files::router());

    Router::new()
        .nest("/v1", v1)
        .merge(metrics::router())
        .with_state(state)
}
