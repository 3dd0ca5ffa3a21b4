//! Health check routes.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/readyz", get(readiness_check))
}

async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
