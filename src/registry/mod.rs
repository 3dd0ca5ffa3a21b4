//! In-memory job and artifact registry.
//!
//! Single source of truth for job state. All cross-component reads and
//! writes go through here; every read hands back a clone taken under the
//! lock, so callers never observe a torn update.

mod sweep;

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Artifact, Job, JobStatus};
use crate::utils::{fingerprint, url};
use crate::{Error, Result};

/// Message recorded on a job when it is cancelled through the registry.
pub const CANCELLED_BY_USER: &str = "job cancelled by user";

#[derive(Default)]
struct Maps {
    jobs: HashMap<Uuid, Job>,
    artifacts: HashMap<Uuid, Artifact>,
}

/// In-memory store of jobs and artifacts with cancel-handle registration.
///
/// One reader/writer lock guards the job and artifact maps. Cancel handles
/// live in a separate concurrent map so a cancellation can land while a
/// status update holds the main lock.
pub struct JobRegistry {
    maps: RwLock<Maps>,
    cancels: DashMap<Uuid, CancellationToken>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
            cancels: DashMap::new(),
        }
    }

    /// Insert or replace a job by id.
    pub fn put_job(&self, job: Job) -> Result<()> {
        if job.id.is_nil() {
            return Err(Error::JobIdEmpty);
        }

        self.maps.write().jobs.insert(job.id, job);
        Ok(())
    }

    /// Snapshot of a job by id.
    pub fn get_job(&self, id: Uuid) -> Option<Job> {
        self.maps.read().jobs.get(&id).cloned()
    }

    /// Snapshot of the job keyed by the fingerprint of (url, preset).
    pub fn get_by_fingerprint(&self, raw_url: &str, preset: &str) -> Option<Job> {
        let id = fingerprint::uuid_v5(&url::normalize(raw_url), preset);
        self.get_job(id)
    }

    /// Snapshots of all jobs, oldest first.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let maps = self.maps.read();
        if maps.jobs.is_empty() {
            return Err(Error::NoJobs);
        }

        let mut jobs: Vec<Job> = maps.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Atomic partial status update.
    ///
    /// `progress` is applied only when non-zero and `error_message` only
    /// when non-empty, so callers can update one without clobbering the
    /// other. When progress is known the ETA is re-derived from the time
    /// elapsed since the job was created. Unknown ids are logged and
    /// ignored.
    pub fn update_status(&self, id: Uuid, status: JobStatus, progress: u8, error_message: &str) {
        let mut maps = self.maps.write();
        let Some(job) = maps.jobs.get_mut(&id) else {
            warn!(job_id = %id, "status update for unknown job");
            return;
        };

        job.status = status;
        job.updated_at = chrono::Utc::now();

        if progress != 0 {
            job.progress = progress;
        }

        if !error_message.is_empty() {
            job.error_message = error_message.to_string();
        }

        if job.progress > 0 {
            let elapsed = (job.updated_at - job.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let remaining_ratio = 100.0 / f64::from(job.progress) - 1.0;
            job.estimated_eta = Duration::from_secs_f64(elapsed.as_secs_f64() * remaining_ratio);
        }

        debug!(job_id = %id, status = %status, progress = job.progress, "job status updated");
    }

    /// Record the pre-flight size estimate for a job.
    pub fn update_estimated_size(&self, id: Uuid, size: u64) {
        let mut maps = self.maps.write();
        let Some(job) = maps.jobs.get_mut(&id) else {
            warn!(job_id = %id, "size estimate for unknown job");
            return;
        };

        job.estimated_size = size;
        job.updated_at = chrono::Utc::now();
    }

    /// Attach the composed artifacts to a job and derive its total size.
    pub fn update_artifacts(&self, id: Uuid, artifacts: Vec<Artifact>) {
        let mut maps = self.maps.write();
        let Some(job) = maps.jobs.get_mut(&id) else {
            warn!(job_id = %id, "artifacts for unknown job");
            return;
        };

        job.total_size = artifacts.iter().map(|a| a.file_size).sum();
        job.artifacts = artifacts;
        job.updated_at = chrono::Utc::now();
    }

    /// Store an artifact under its own id, checking the parent job exists.
    pub fn put_artifact(&self, job_id: Uuid, artifact: Artifact) -> Result<()> {
        if artifact.id.is_nil() {
            return Err(Error::ArtifactIdInvalid);
        }

        if job_id.is_nil() {
            return Err(Error::JobIdEmpty);
        }

        let mut maps = self.maps.write();
        if !maps.jobs.contains_key(&job_id) {
            return Err(Error::JobNotFound);
        }

        debug!(job_id = %job_id, artifact_id = %artifact.id, "artifact stored");
        maps.artifacts.insert(artifact.id, artifact);
        Ok(())
    }

    /// Snapshot of an artifact by id.
    pub fn get_artifact(&self, id: Uuid) -> Option<Artifact> {
        self.maps.read().artifacts.get(&id).cloned()
    }

    /// Register the cancel handle for an in-flight job.
    pub fn register_cancel(&self, job_id: Uuid, token: CancellationToken) {
        self.cancels.insert(job_id, token);
    }

    /// Drop the cancel handle for a job.
    pub fn unregister_cancel(&self, job_id: Uuid) {
        self.cancels.remove(&job_id);
    }

    /// Cancel an in-flight job.
    ///
    /// Terminal jobs and jobs that no worker has picked up yet are not
    /// cancellable; the latter are skipped by the worker at dequeue once
    /// their status turns terminal.
    pub fn cancel(&self, id: Uuid) -> Result<()> {
        let Some(job) = self.get_job(id) else {
            return Err(Error::JobNotFound);
        };

        if job.is_terminal() {
            return Err(Error::NotCancellable);
        }

        let Some(token) = self.cancels.get(&id).map(|entry| entry.value().clone()) else {
            warn!(job_id = %id, "no cancel handle registered for job");
            return Err(Error::NotCancellable);
        };

        token.cancel();
        self.update_status(id, JobStatus::Cancelled, 0, CANCELLED_BY_USER);
        info!(job_id = %id, "job cancelled");

        Ok(())
    }

    fn remove_job(&self, job: &Job) {
        let mut maps = self.maps.write();
        for artifact in &job.artifacts {
            maps.artifacts.remove(&artifact.id);
        }
        maps.jobs.remove(&job.id);
    }

    fn expired_jobs(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<Job> {
        self.maps
            .read()
            .jobs
            .values()
            .filter(|j| j.expires_at < now)
            .cloned()
            .collect()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job(url: &str, preset: &str) -> Job {
        let normalized = url::normalize(url);
        let id = fingerprint::uuid_v5(&normalized, preset);
        Job::new(id, normalized, preset, Duration::from_secs(3600))
    }

    fn make_artifact(source_id: &str, filename: &str) -> Artifact {
        Artifact {
            id: fingerprint::uuid_v5(source_id, filename),
            source_id: source_id.to_string(),
            filename: filename.into(),
            ..Artifact::default()
        }
    }

    #[test]
    fn put_and_get_job() {
        let registry = JobRegistry::new();
        let job = make_job("https://e.x/v?id=1", "mp4");
        let id = job.id;

        registry.put_job(job).unwrap();

        let got = registry.get_job(id).unwrap();
        assert_eq!(got.id, id);
        assert_eq!(got.status, JobStatus::Starting);
    }

    #[test]
    fn put_job_rejects_nil_id() {
        let registry = JobRegistry::new();
        let mut job = make_job("https://e.x/v", "mp4");
        job.id = Uuid::nil();

        assert!(matches!(registry.put_job(job), Err(Error::JobIdEmpty)));
    }

    #[test]
    fn get_by_fingerprint_normalizes() {
        let registry = JobRegistry::new();
        registry.put_job(make_job("https://e.x/v?id=1", "mp4")).unwrap();

        // Surrounding whitespace normalizes to the same fingerprint.
        let got = registry.get_by_fingerprint("  https://e.x/v?id=1  ", "mp4");
        assert!(got.is_some());

        assert!(registry.get_by_fingerprint("https://e.x/v?id=1", "aac").is_none());
    }

    #[test]
    fn list_jobs_empty_errors() {
        let registry = JobRegistry::new();
        assert!(matches!(registry.list_jobs(), Err(Error::NoJobs)));

        registry.put_job(make_job("https://e.x/v", "mp4")).unwrap();
        assert_eq!(registry.list_jobs().unwrap().len(), 1);
    }

    #[test]
    fn update_status_partial_semantics() {
        let registry = JobRegistry::new();
        let job = make_job("https://e.x/v", "mp4");
        let id = job.id;
        registry.put_job(job).unwrap();

        registry.update_status(id, JobStatus::Downloading, 40, "");
        let got = registry.get_job(id).unwrap();
        assert_eq!(got.status, JobStatus::Downloading);
        assert_eq!(got.progress, 40);
        assert!(got.error_message.is_empty());

        // Zero progress and empty message leave the previous values alone.
        registry.update_status(id, JobStatus::Downloading, 0, "");
        let got = registry.get_job(id).unwrap();
        assert_eq!(got.progress, 40);

        registry.update_status(id, JobStatus::Error, 0, "boom");
        let got = registry.get_job(id).unwrap();
        assert_eq!(got.status, JobStatus::Error);
        assert_eq!(got.progress, 40);
        assert_eq!(got.error_message, "boom");
    }

    #[test]
    fn update_status_unknown_job_is_a_noop() {
        let registry = JobRegistry::new();
        registry.update_status(Uuid::new_v4(), JobStatus::Error, 0, "nope");
        assert!(matches!(registry.list_jobs(), Err(Error::NoJobs)));
    }

    #[test]
    fn eta_shrinks_as_progress_grows() {
        let registry = JobRegistry::new();
        let mut job = make_job("https://e.x/v", "mp4");
        job.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        let id = job.id;
        registry.put_job(job).unwrap();

        registry.update_status(id, JobStatus::Downloading, 25, "");
        let at_quarter = registry.get_job(id).unwrap().estimated_eta;

        registry.update_status(id, JobStatus::Downloading, 80, "");
        let at_four_fifths = registry.get_job(id).unwrap().estimated_eta;

        // elapsed * (100/25 - 1) = 3x elapsed, vs 0.25x elapsed at 80%.
        assert!(at_quarter > at_four_fifths);
        assert!(at_quarter >= Duration::from_secs(25));
        assert!(at_four_fifths <= Duration::from_secs(5));
    }

    #[test]
    fn put_artifact_validations() {
        let registry = JobRegistry::new();
        let job = make_job("https://e.x/v", "mp4");
        let job_id = job.id;
        registry.put_job(job).unwrap();

        let mut bad = make_artifact("vid-1", "/tmp/a.mp4");
        bad.id = Uuid::nil();
        assert!(matches!(
            registry.put_artifact(job_id, bad),
            Err(Error::ArtifactIdInvalid)
        ));

        assert!(matches!(
            registry.put_artifact(Uuid::nil(), make_artifact("vid-1", "/tmp/a.mp4")),
            Err(Error::JobIdEmpty)
        ));

        assert!(matches!(
            registry.put_artifact(Uuid::new_v4(), make_artifact("vid-1", "/tmp/a.mp4")),
            Err(Error::JobNotFound)
        ));

        let artifact = make_artifact("vid-1", "/tmp/a.mp4");
        let artifact_id = artifact.id;
        registry.put_artifact(job_id, artifact).unwrap();
        assert!(registry.get_artifact(artifact_id).is_some());
    }

    #[test]
    fn update_artifacts_sums_total_size() {
        let registry = JobRegistry::new();
        let job = make_job("https://e.x/v", "mp4");
        let id = job.id;
        registry.put_job(job).unwrap();

        let mut a = make_artifact("vid-1", "/tmp/a.mp4");
        a.file_size = 100;
        let mut b = make_artifact("vid-2", "/tmp/b.mp4");
        b.file_size = 50;

        registry.update_artifacts(id, vec![a, b]);

        let got = registry.get_job(id).unwrap();
        assert_eq!(got.total_size, 150);
        assert_eq!(got.artifacts.len(), 2);
    }

    #[test]
    fn cancel_unknown_job() {
        let registry = JobRegistry::new();
        assert!(matches!(registry.cancel(Uuid::new_v4()), Err(Error::JobNotFound)));
    }

    #[test]
    fn cancel_terminal_job() {
        let registry = JobRegistry::new();
        let job = make_job("https://e.x/v", "mp4");
        let id = job.id;
        registry.put_job(job).unwrap();
        registry.update_status(id, JobStatus::Finished, 100, "");

        assert!(matches!(registry.cancel(id), Err(Error::NotCancellable)));
    }

    #[test]
    fn cancel_without_registered_handle() {
        let registry = JobRegistry::new();
        let job = make_job("https://e.x/v", "mp4");
        let id = job.id;
        registry.put_job(job).unwrap();

        // Queued but not picked up by a worker: no handle yet.
        assert!(matches!(registry.cancel(id), Err(Error::NotCancellable)));
        assert_eq!(registry.get_job(id).unwrap().status, JobStatus::Starting);
    }

    #[test]
    fn cancel_invokes_handle_and_marks_cancelled() {
        let registry = JobRegistry::new();
        let job = make_job("https://e.x/v", "mp4");
        let id = job.id;
        registry.put_job(job).unwrap();

        let token = CancellationToken::new();
        registry.register_cancel(id, token.clone());

        registry.cancel(id).unwrap();

        assert!(token.is_cancelled());
        let got = registry.get_job(id).unwrap();
        assert_eq!(got.status, JobStatus::Cancelled);
        assert_eq!(got.error_message, CANCELLED_BY_USER);
    }

    #[test]
    fn cancel_is_idempotent_on_terminal_state() {
        let registry = JobRegistry::new();
        let job = make_job("https://e.x/v", "mp4");
        let id = job.id;
        registry.put_job(job).unwrap();
        registry.register_cancel(id, CancellationToken::new());

        registry.cancel(id).unwrap();
        assert!(matches!(registry.cancel(id), Err(Error::NotCancellable)));
    }

    #[tokio::test]
    async fn concurrent_updates_never_tear_a_snapshot() {
        let registry = std::sync::Arc::new(JobRegistry::new());
        let job = make_job("https://e.x/v", "mp4");
        let id = job.id;
        registry.put_job(job).unwrap();

        // Writers push coupled (status, progress) pairs while readers
        // assert each snapshot is one of the valid combinations.
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for progress in 1..=50u8 {
                    registry.update_status(id, JobStatus::Downloading, progress, "");
                    tokio::task::yield_now().await;
                }
            }));
        }

        for _ in 0..4 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let snapshot = registry.get_job(id).unwrap();
                    assert!(matches!(
                        snapshot.status,
                        JobStatus::Starting | JobStatus::Downloading
                    ));
                    assert!(snapshot.progress <= 50);
                    assert!(snapshot.updated_at >= snapshot.created_at);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
    }

    #[test]
    fn unregister_cancel_removes_handle() {
        let registry = JobRegistry::new();
        let job = make_job("https://e.x/v", "mp4");
        let id = job.id;
        registry.put_job(job).unwrap();

        registry.register_cancel(id, CancellationToken::new());
        registry.unregister_cancel(id);

        assert!(matches!(registry.cancel(id), Err(Error::NotCancellable)));
    }
}
