//! Artifact download route.

use axum::extract::{Path, Request, State};
use axum::http::header::CONTENT_DISPOSITION;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::services::ServeFile;
use tracing::{error, warn};
use uuid::Uuid;

use crate::api::models;
use crate::api::server::AppState;
use crate::Error;

pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", get(download_artifact))
}

/// `GET /v1/files/{id}`
///
/// Streams the artifact's file as an attachment. Range requests are
/// honored by the static-file service.
async fn download_artifact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        warn!(id = %id, "download: invalid id");
        return models::bad_request(models::MSG_QUERY_PARAM_MISSING, None);
    };

    let Some(artifact) = state.registry.get_artifact(id) else {
        warn!(artifact_id = %id, "download: artifact not found");
        return models::not_found(models::MSG_ARTIFACT_NOT_FOUND, Some(&Error::ArtifactNotFound));
    };

    let basename = artifact
        .filename
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());

    let mut response = match ServeFile::new(&artifact.filename).try_call(req).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            error!(artifact_id = %id, error = %e, "download: serving file failed");
            return models::internal(models::MSG_FILE_NOT_FOUND, None);
        }
    };

    if response.status() == StatusCode::NOT_FOUND {
        warn!(artifact_id = %id, filename = %artifact.filename.display(),
            "download: file missing on disk");
        return models::not_found(models::MSG_FILE_NOT_FOUND, None);
    }

    let disposition = format!("attachment; filename=\"{basename}\"");
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response.headers_mut().insert(CONTENT_DISPOSITION, value);
    }

    response
}
