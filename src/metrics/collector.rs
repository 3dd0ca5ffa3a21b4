//! Metrics collector.
//!
//! Lock-free counters for the job pipeline. Everything is monotonically
//! increasing except the in-flight gauge; readers take a [`MetricsSnapshot`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Metrics collector for the download service.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    // Enqueue outcomes
    jobs_enqueued_total: AtomicU64,
    jobs_deduplicated_total: AtomicU64,
    jobs_rejected_total: AtomicU64,

    // Processing outcomes
    active_jobs: AtomicU64,
    jobs_completed_total: AtomicU64,
    jobs_cancelled_total: AtomicU64,
    job_errors: DashMap<String, AtomicU64>,
    job_duration_total_ms: AtomicU64,
    completed_job_count: AtomicU64,

    // Output
    artifacts_stored_total: AtomicU64,
    download_bytes_total: AtomicU64,
}

/// Point-in-time view of every metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub jobs_enqueued_total: u64,
    pub jobs_deduplicated_total: u64,
    pub jobs_rejected_total: u64,
    pub active_jobs: u64,
    pub jobs_completed_total: u64,
    pub jobs_cancelled_total: u64,
    pub job_errors: HashMap<String, u64>,
    pub job_duration_total_ms: u64,
    pub completed_job_count: u64,
    pub artifacts_stored_total: u64,
    pub download_bytes_total: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A job was accepted and queued.
    pub fn record_job_enqueued(&self) {
        self.jobs_enqueued_total.fetch_add(1, Ordering::Relaxed);
    }

    /// An enqueue matched a live job and was deduplicated.
    pub fn record_job_deduplicated(&self) {
        self.jobs_deduplicated_total.fetch_add(1, Ordering::Relaxed);
    }

    /// An enqueue was rejected (queue full or service closed).
    pub fn record_job_rejected(&self) {
        self.jobs_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker picked a job up.
    pub fn record_job_started(&self) {
        self.active_jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// A job finished successfully.
    pub fn record_job_completed(&self, duration_ms: u64, artifacts: u64, bytes: u64) {
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);
        self.jobs_completed_total.fetch_add(1, Ordering::Relaxed);
        self.job_duration_total_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.completed_job_count.fetch_add(1, Ordering::Relaxed);
        self.artifacts_stored_total
            .fetch_add(artifacts, Ordering::Relaxed);
        self.download_bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A job was cancelled mid-flight.
    pub fn record_job_cancelled(&self) {
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);
        self.jobs_cancelled_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A job failed, bucketed by failure kind.
    pub fn record_job_failed(&self, kind: impl Into<String>) {
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);
        self.job_errors
            .entry(kind.into())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for exposition.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_enqueued_total: self.jobs_enqueued_total.load(Ordering::Relaxed),
            jobs_deduplicated_total: self.jobs_deduplicated_total.load(Ordering::Relaxed),
            jobs_rejected_total: self.jobs_rejected_total.load(Ordering::Relaxed),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            jobs_completed_total: self.jobs_completed_total.load(Ordering::Relaxed),
            jobs_cancelled_total: self.jobs_cancelled_total.load(Ordering::Relaxed),
            job_errors: self
                .job_errors
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
                .collect(),
            job_duration_total_ms: self.job_duration_total_ms.load(Ordering::Relaxed),
            completed_job_count: self.completed_job_count.load(Ordering::Relaxed),
            artifacts_stored_total: self.artifacts_stored_total.load(Ordering::Relaxed),
            download_bytes_total: self.download_bytes_total.load(Ordering::Relaxed),
        }
    }
}
