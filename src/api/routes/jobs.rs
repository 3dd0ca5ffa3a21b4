//! Job routes: enqueue, retrieval, cancellation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::models::{self, EnqueueRequest};
use crate::api::server::AppState;
use crate::scheduler::Enqueued;
use crate::Error;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/enqueue", post(enqueue))
        .route("/", get(list_jobs))
        .route("/{id}", get(get_job).delete(cancel_job))
}

/// `POST /v1/jobs/enqueue`
///
/// 202 with the new job id, or 200 with the existing id when a live job
/// with the same (url, preset) fingerprint is already known.
async fn enqueue(
    State(state): State<AppState>,
    payload: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            error!(error = %rejection, "enqueue: bad request body");
            return models::bad_request(
                models::MSG_INVALID_REQUEST_BODY,
                Some(&Error::InvalidRequestBody),
            );
        }
    };

    if let Err(e) = req.validate() {
        error!(error = %e, "enqueue: invalid payload");
        return models::unprocessable(models::MSG_UNPROCESSABLE_ENTITY, Some(&e));
    }

    match state.scheduler.enqueue(&req.url, &req.preset) {
        Ok(Enqueued::Created(job)) => {
            info!(job_id = %job.id, url = %job.url, "job enqueued");
            models::accepted(models::MSG_JOB_ENQUEUED, Value::String(job.id.to_string()))
        }
        Ok(Enqueued::Duplicate(job)) => {
            debug!(job_id = %job.id, "job already exists");
            models::ok(
                models::MSG_JOB_ALREADY_EXISTS,
                Value::String(job.id.to_string()),
            )
        }
        Err(e) => {
            error!(error = %e, "enqueue failed");
            models::internal(models::MSG_JOB_ENQUEUE_FAIL, Some(&e))
        }
    }
}

/// `GET /v1/jobs/` — all jobs, or 204 when there are none.
pub(crate) async fn list_jobs(State(state): State<AppState>) -> Response {
    match state.registry.list_jobs() {
        Ok(jobs) => models::ok(
            models::MSG_JOBS_RETRIEVED,
            serde_json::to_value(jobs).unwrap_or_default(),
        ),
        Err(Error::NoJobs) => models::no_content(),
        Err(e) => {
            error!(error = %e, "list jobs failed");
            models::internal(models::MSG_GET_JOBS_FAIL, Some(&e))
        }
    }
}

/// `GET /v1/jobs/{id}` — one job snapshot, or 204 when unknown.
async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        warn!(id = %id, "get job: invalid id");
        return models::bad_request(models::MSG_QUERY_PARAM_MISSING, None);
    };

    match state.registry.get_job(id) {
        Some(job) => models::ok(
            models::MSG_JOB_RETRIEVED,
            serde_json::to_value(job).unwrap_or_default(),
        ),
        None => models::no_content(),
    }
}

/// `DELETE /v1/jobs/{id}` — cancel an in-flight job.
async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        warn!(id = %id, "cancel job: invalid id");
        return models::bad_request(models::MSG_QUERY_PARAM_MISSING, None);
    };

    match state.registry.cancel(id) {
        Ok(()) => {
            info!(job_id = %id, "job cancelled");
            models::ok(models::MSG_JOB_CANCELLED, Value::Null)
        }
        Err(Error::JobNotFound) => {
            warn!(job_id = %id, "cancel: job not found");
            models::not_found(models::MSG_JOB_NOT_FOUND, Some(&Error::JobNotFound))
        }
        // Already terminal or not yet picked up; nothing to do.
        Err(Error::NotCancellable) => {
            debug!(job_id = %id, "cancel: job not cancellable");
            models::ok(models::MSG_JOB_CANCELLED, Value::Null)
        }
        Err(e) => {
            error!(job_id = %id, error = %e, "cancel failed");
            models::internal(models::MSG_JOB_CANCEL_FAILED, Some(&e))
        }
    }
}
