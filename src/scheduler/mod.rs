//! Job scheduling: deduplicating enqueue and the bounded worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::{Job, JobStatus};
use crate::downloader::{classify_failure, Extractor};
use crate::metrics::MetricsCollector;
use crate::registry::{JobRegistry, CANCELLED_BY_USER};
use crate::utils::{fingerprint, url};
use crate::{Error, Result};

/// Outcome of an accepted enqueue.
#[derive(Debug, Clone)]
pub enum Enqueued {
    /// A new job was created and queued.
    Created(Job),
    /// A live job with the same fingerprint already exists.
    Duplicate(Job),
}

impl Enqueued {
    pub fn job(&self) -> &Job {
        match self {
            Self::Created(job) | Self::Duplicate(job) => job,
        }
    }
}

/// Accepts jobs, deduplicates them by fingerprint, and dispatches them to
/// a fixed pool of workers over one bounded channel.
pub struct Scheduler {
    cfg: Arc<Config>,
    registry: Arc<JobRegistry>,
    extractor: Arc<dyn Extractor>,
    metrics: Arc<MetricsCollector>,
    queue_tx: mpsc::Sender<Job>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    closed: AtomicBool,
    started: AtomicBool,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(cfg: Arc<Config>, extractor: Arc<dyn Extractor>, registry: Arc<JobRegistry>) -> Self {
        Self::with_metrics(cfg, extractor, registry, Arc::new(MetricsCollector::new()))
    }

    pub fn with_metrics(
        cfg: Arc<Config>,
        extractor: Arc<dyn Extractor>,
        registry: Arc<JobRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(cfg.job.queue_size.max(1));

        Self {
            cfg,
            registry,
            extractor,
            metrics,
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            closed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// The collector this scheduler reports into.
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// Spawn the worker pool. Idempotent.
    pub fn start(self: &Arc<Self>, token: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.cfg.job.workers {
            let scheduler = Arc::clone(self);
            let token = token.clone();
            workers.push(tokio::spawn(async move {
                scheduler.worker(worker_id, token).await;
            }));
        }

        info!(workers = self.cfg.job.workers, "worker pool started");
    }

    /// Accept a job, dedup by fingerprint, and queue it.
    ///
    /// An existing non-`error` job short-circuits to [`Enqueued::Duplicate`].
    /// When the queue is full the freshly-created job is moved to `error`
    /// and the call fails with [`Error::QueueFull`].
    pub fn enqueue(&self, raw_url: &str, preset: &str) -> Result<Enqueued> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ServiceClosed);
        }

        let normalized = url::normalize(raw_url);
        let id = fingerprint::uuid_v5(&normalized, preset);

        if let Some(existing) = self.registry.get_job(id) {
            if existing.status != JobStatus::Error {
                debug!(job_id = %id, "duplicate enqueue");
                self.metrics.record_job_deduplicated();
                return Ok(Enqueued::Duplicate(existing));
            }
        }

        let job = Job::new(id, normalized, preset, self.cfg.storage.ttl);
        self.registry.put_job(job.clone())?;

        match self.queue_tx.try_send(job.clone()) {
            Ok(()) => {
                self.metrics.record_job_enqueued();
                Ok(Enqueued::Created(job))
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.registry
                    .update_status(id, JobStatus::Error, 0, "job queue is full");
                self.metrics.record_job_rejected();

                let capacity = self.cfg.job.queue_size;
                Err(Error::QueueFull {
                    queued: capacity - self.queue_tx.capacity(),
                    capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ServiceClosed),
        }
    }

    /// Stop accepting new jobs and wait for in-flight workers, up to
    /// `timeout`. The workers themselves exit via the token passed to
    /// [`Scheduler::start`].
    pub async fn shutdown(&self, timeout: std::time::Duration) {
        self.closed.store(true, Ordering::SeqCst);

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let drain = async {
            for worker in workers {
                let _ = worker.await;
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("workers did not drain before the shutdown timeout");
        }
    }

    async fn worker(self: Arc<Self>, worker_id: usize, token: CancellationToken) {
        loop {
            let job = {
                let mut queue = self.queue_rx.lock().await;
                tokio::select! {
                    _ = token.cancelled() => {
                        self.closed.store(true, Ordering::SeqCst);
                        info!(worker_id, "worker stopping");
                        return;
                    }
                    job = queue.recv() => job,
                }
            };

            let Some(job) = job else {
                warn!(worker_id, "job queue closed");
                return;
            };

            self.process_job(worker_id, job, &token).await;
        }
    }

    async fn process_job(&self, worker_id: usize, job: Job, token: &CancellationToken) {
        // A queued job may have been cancelled or re-resolved since it was
        // accepted; never resurrect a terminal one.
        match self.registry.get_job(job.id) {
            Some(current) if current.is_terminal() => {
                debug!(worker_id, job_id = %job.id, status = %current.status,
                    "skipping terminal job");
                return;
            }
            Some(_) => {}
            None => {
                warn!(worker_id, job_id = %job.id, "dequeued job no longer in registry");
                return;
            }
        }

        let job_token = token.child_token();
        self.registry.register_cancel(job.id, job_token.clone());
        self.metrics.record_job_started();
        let started_at = std::time::Instant::now();

        let run = self.extractor.run(&job_token, &job, &self.registry);
        tokio::pin!(run);

        let mut timed_out = false;
        let result = tokio::select! {
            res = &mut run => res,
            _ = tokio::time::sleep(self.cfg.job.timeout) => {
                timed_out = true;
                job_token.cancel();
                // Let the driver observe the cancel and reap its process.
                let _ = run.await;
                Err(Error::Timeout)
            }
        };

        self.registry.unregister_cancel(job.id);

        match result {
            Ok(()) => {
                let (artifacts, bytes) = self
                    .registry
                    .get_job(job.id)
                    .map(|j| (j.artifacts.len() as u64, j.total_size))
                    .unwrap_or((0, 0));
                self.metrics.record_job_completed(
                    started_at.elapsed().as_millis() as u64,
                    artifacts,
                    bytes,
                );
                debug!(worker_id, job_id = %job.id, "job processed");
            }
            Err(e) if e.is_cancellation() && !timed_out => {
                info!(worker_id, job_id = %job.id, "job cancelled");
                self.metrics.record_job_cancelled();
                self.registry
                    .update_status(job.id, JobStatus::Cancelled, 0, CANCELLED_BY_USER);
            }
            Err(e) => {
                error!(worker_id, job_id = %job.id, error = %e, "extractor run failed");
                self.metrics.record_job_failed(classify_failure(&e));
                self.registry
                    .update_status(job.id, JobStatus::Error, 0, &e.to_string());
            }
        }
    }
}
