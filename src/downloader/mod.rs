//! Extractor drivers.
//!
//! Each driver supervises one external extractor process for one job and
//! translates its output into registry updates. Implementations are
//! interchangeable at the scheduler level and selected at construction.

pub mod gallery;
pub mod mock;
pub mod output;
pub mod process;
pub mod ytdlp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{Artifact, Job, JobStatus};
use crate::registry::JobRegistry;
use crate::Result;

pub use gallery::GalleryDl;
pub use mock::Mock;
pub use ytdlp::YtDlp;

/// Minimum interval between progress updates per job.
pub const PROGRESS_THROTTLE: Duration = Duration::from_millis(200);

/// Kind of extractor driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    /// yt-dlp, the primary media extractor.
    YtDlp,
    /// gallery-dl, for gallery-style sources.
    GalleryDl,
    /// Simulated driver for tests.
    Mock,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YtDlp => "ytdlp",
            Self::GalleryDl => "gallerydl",
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An extractor driver runs the external process for one job, streams
/// progress into the registry, and composes the resulting artifacts.
///
/// The subprocess is bound to `token`: cancelling it terminates the
/// process, and the driver surfaces that as [`crate::Error::Cancelled`].
#[async_trait]
pub trait Extractor: Send + Sync {
    fn kind(&self) -> ExtractorKind;

    async fn run(
        &self,
        token: &CancellationToken,
        job: &Job,
        registry: &Arc<JobRegistry>,
    ) -> Result<()>;
}

/// Bucket a processing failure for metrics and diagnostics.
pub fn classify_failure(error: &crate::Error) -> &'static str {
    match error {
        crate::Error::Cancelled => "cancelled",
        crate::Error::Timeout => "timeout",
        crate::Error::ProcessFailed { .. } => "process",
        crate::Error::DownloadFailed(_) => "download",
        _ => "other",
    }
}

/// Store composed artifacts and move the job to its final state.
pub(crate) fn finish_job(
    registry: &JobRegistry,
    job_id: uuid::Uuid,
    artifacts: Vec<Artifact>,
) -> Result<()> {
    for artifact in &artifacts {
        registry.put_artifact(job_id, artifact.clone())?;
    }

    registry.update_artifacts(job_id, artifacts);
    registry.update_status(job_id, JobStatus::Finished, 100, "");

    Ok(())
}
