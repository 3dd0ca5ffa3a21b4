//! Simulated extractor for tests.
//!
//! Emits ten progress steps over a configured duration and then, when a
//! stdout script is supplied, composes artifacts from it exactly the way
//! the real driver parses extractor stdout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{Job, JobStatus};
use crate::registry::JobRegistry;
use crate::{Error, Result};

use super::{finish_job, output, Extractor, ExtractorKind};

/// Default simulated download time.
pub const DEFAULT_SIMULATE_TIME: Duration = Duration::from_secs(1);

const STEPS: u32 = 10;

/// Mock driver.
pub struct Mock {
    duration: Duration,
    /// Lines this fake extractor "prints" once the simulated download
    /// finishes; parsed like real extractor stdout.
    stdout_script: Vec<String>,
}

impl Mock {
    pub fn new() -> Self {
        Self {
            duration: DEFAULT_SIMULATE_TIME,
            stdout_script: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_stdout<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stdout_script = lines.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for Mock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for Mock {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Mock
    }

    async fn run(
        &self,
        token: &CancellationToken,
        job: &Job,
        registry: &Arc<JobRegistry>,
    ) -> Result<()> {
        registry.update_status(job.id, JobStatus::Downloading, 0, "");

        let period = (self.duration / STEPS).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);

        for step in 0..=STEPS {
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = ticker.tick() => {
                    let progress = (step * (100 / STEPS)) as u8;
                    debug!(job_id = %job.id, progress, "simulated progress");
                    registry.update_status(job.id, JobStatus::Downloading, progress, "");
                }
            }
        }

        if self.stdout_script.is_empty() {
            registry.update_status(job.id, JobStatus::Finished, 100, "");
            return Ok(());
        }

        let stdout = self.stdout_script.join("\n");
        let results = output::parse_stdout(&stdout);
        if results.is_empty() {
            return Err(Error::download_failed(
                "no results parsed from extractor output",
            ));
        }

        let artifacts = output::compose_artifacts(results).await;
        finish_job(registry, job.id, artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fingerprint;

    fn make_job() -> Job {
        let id = fingerprint::uuid_v5("https://e.x/v?id=vid-123", "mp4");
        Job::new(
            id,
            "https://e.x/v?id=vid-123",
            "mp4",
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn finishes_with_artifacts_from_script() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("out.mp4");
        tokio::fs::write(&file, b"bytes").await.unwrap();

        let registry = Arc::new(JobRegistry::new());
        let job = make_job();
        registry.put_job(job.clone()).unwrap();

        let mock = Mock::new()
            .with_duration(Duration::from_millis(20))
            .with_stdout([
                r#"{"id":"vid-123","title":"T","extractor":"x"}"#.to_string(),
                file.display().to_string(),
            ]);

        mock.run(&CancellationToken::new(), &job, &registry)
            .await
            .unwrap();

        let got = registry.get_job(job.id).unwrap();
        assert_eq!(got.status, JobStatus::Finished);
        assert_eq!(got.progress, 100);
        assert_eq!(got.artifacts.len(), 1);
        assert_eq!(got.artifacts[0].file_size, 5);
        assert_eq!(got.total_size, 5);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_simulation() {
        let registry = Arc::new(JobRegistry::new());
        let job = make_job();
        registry.put_job(job.clone()).unwrap();

        let mock = Mock::new().with_duration(Duration::from_secs(30));
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = mock.run(&token, &job, &registry).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn empty_script_still_finishes() {
        let registry = Arc::new(JobRegistry::new());
        let job = make_job();
        registry.put_job(job.clone()).unwrap();

        let mock = Mock::new().with_duration(Duration::from_millis(10));
        mock.run(&CancellationToken::new(), &job, &registry)
            .await
            .unwrap();

        let got = registry.get_job(job.id).unwrap();
        assert_eq!(got.status, JobStatus::Finished);
        assert_eq!(got.progress, 100);
    }
}
