//! Core domain entities: jobs and the artifacts they produce.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted and about to start.
    Starting,
    /// The extractor is running.
    Downloading,
    /// Finished successfully; artifacts are available.
    Finished,
    /// Failed; `error_message` carries the first fatal error.
    Error,
    /// Cancelled by the user or by shutdown.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One download request, keyed by the fingerprint of (url, preset).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Fingerprint of the normalized URL and preset.
    pub id: Uuid,
    /// Normalized source URL.
    pub url: String,
    /// Opaque format selector passed through to the extractor.
    pub preset: String,
    pub status: JobStatus,
    /// Percentage, 0..=100.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(rename = "error", default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    /// Remaining time estimate derived from elapsed time and progress.
    #[serde(rename = "estimatedEta", with = "duration_secs")]
    pub estimated_eta: Duration,
    /// Pre-flight size estimate in bytes, 0 = unknown.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub estimated_size: u64,
    /// Sum of artifact sizes after download, 0 = unknown.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Job {
    /// Create a freshly-accepted job expiring `ttl` from now.
    pub fn new(id: Uuid, url: impl Into<String>, preset: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id,
            url: url.into(),
            preset: preset.into(),
            status: JobStatus::Starting,
            progress: 0,
            artifacts: Vec::new(),
            error_message: String::new(),
            estimated_eta: Duration::ZERO,
            estimated_size: 0,
            total_size: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A single produced media file plus the metadata the extractor reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Fingerprint of (source id, on-disk filename).
    pub id: Uuid,
    /// The extractor's opaque id for the original item.
    pub source_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub platform: String,
    pub channel: String,
    pub author: String,
    pub title: String,
    pub description: String,
    pub webpage_url: String,
    pub thumbnail_url: String,
    pub view_count: u64,
    pub like_count: u64,
    /// Absolute path inside the downloads directory.
    pub filename: PathBuf,
    pub file_size: u64,
    pub duration_seconds: u64,
    pub width: u32,
    pub height: u32,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Serialize a `Duration` as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
