//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request body")]
    InvalidRequestBody,

    #[error("invalid url field")]
    InvalidUrl,

    #[error("invalid preset field")]
    InvalidPreset,

    #[error("service is closed")]
    ServiceClosed,

    #[error("job queue is full: {queued}/{capacity}")]
    QueueFull { queued: usize, capacity: usize },

    /// Returned by enqueue when a live job with the same fingerprint exists.
    /// Callers treat this as success with a dedup signal.
    #[error("job already exists")]
    JobAlreadyExists,

    #[error("job not found")]
    JobNotFound,

    #[error("job is not cancellable")]
    NotCancellable,

    #[error("job id is empty")]
    JobIdEmpty,

    #[error("no jobs")]
    NoJobs,

    #[error("artifact id is invalid")]
    ArtifactIdInvalid,

    #[error("artifact not found")]
    ArtifactNotFound,

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("binary not found: {0}")]
    DependencyNotFound(String),

    #[error("no download url configured for {binary} on {platform}")]
    UnsupportedPlatform { binary: String, platform: String },

    #[error("extractor process failed (exit code {code:?}): {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("unsupported archive format: {0}")]
    ArchiveUnsupported(String),

    #[error("proxy failed: {0}")]
    ProxyFailed(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("job timed out")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for the terminal process outcomes caused by cancellation rather
    /// than by the extractor itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_messages_are_stable() {
        assert_eq!(Error::ServiceClosed.to_string(), "service is closed");
        assert_eq!(Error::JobNotFound.to_string(), "job not found");
        assert_eq!(Error::NoJobs.to_string(), "no jobs");
        assert_eq!(Error::InvalidUrl.to_string(), "invalid url field");
        assert_eq!(Error::InvalidPreset.to_string(), "invalid preset field");
        assert_eq!(
            Error::QueueFull {
                queued: 3,
                capacity: 3
            }
            .to_string(),
            "job queue is full: 3/3"
        );
    }

    #[test]
    fn cancellation_classification() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::Timeout.is_cancellation());
        assert!(!Error::JobNotFound.is_cancellation());
        assert!(
            !Error::ProcessFailed {
                code: Some(1),
                stderr: String::new()
            }
            .is_cancellation()
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
