//! TTL-driven cleanup of expired jobs and their on-disk files.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::Job;

use super::JobRegistry;

impl JobRegistry {
    /// Periodically remove expired jobs until `token` is cancelled.
    pub async fn sweep_loop(&self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh start does
        // not race job insertion.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = token.cancelled() => {
                    info!("expired job sweep stopped");
                    return;
                }
            }
        }
    }

    /// One sweep pass: delete the files of every expired job, then drop
    /// the job and its artifacts from the maps.
    pub async fn sweep_once(&self) {
        let now = chrono::Utc::now();
        let expired = self.expired_jobs(now);

        if expired.is_empty() {
            debug!("no expired jobs to clean up");
            return;
        }

        info!(count = expired.len(), "removing expired jobs");

        for job in expired {
            self.cleanup_job(&job).await;
        }
    }

    async fn cleanup_job(&self, job: &Job) {
        let mut deleted_files = 0usize;

        for artifact in &job.artifacts {
            if !artifact.filename.is_absolute() {
                warn!(
                    filename = %artifact.filename.display(),
                    "skipping non-absolute artifact path"
                );
                continue;
            }

            match tokio::fs::remove_file(&artifact.filename).await {
                Ok(()) => {
                    deleted_files += 1;
                    debug!(filename = %artifact.filename.display(), "artifact file deleted");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(
                        filename = %artifact.filename.display(),
                        "artifact file already gone"
                    );
                }
                Err(e) => {
                    warn!(
                        filename = %artifact.filename.display(),
                        error = %e,
                        "failed to delete artifact file"
                    );
                }
            }
        }

        self.remove_job(job);

        debug!(
            job_id = %job.id,
            deleted_files,
            artifacts = job.artifacts.len(),
            "job cleaned up"
        );
    }
}
