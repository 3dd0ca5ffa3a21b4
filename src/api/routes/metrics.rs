//! Metrics exposition route.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::api::server::AppState;
use crate::metrics::PrometheusExporter;

pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(export_metrics))
}

async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let exporter = PrometheusExporter::new(state.scheduler.metrics());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        exporter.export(),
    )
}
