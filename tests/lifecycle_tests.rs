//! Service lifecycle tests: sweeping, shutdown draining, and the worker
//! pool under load.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vidra::config::Config;
use vidra::domain::{Artifact, Job, JobStatus};
use vidra::downloader::Mock;
use vidra::registry::JobRegistry;
use vidra::scheduler::Scheduler;
use vidra::utils::fingerprint;

async fn wait_until<F>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

#[tokio::test]
async fn sweep_loop_removes_expired_jobs_on_its_own() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("expired.mp4");
    tokio::fs::write(&file, b"old bytes").await.unwrap();

    let registry = Arc::new(JobRegistry::new());

    let id = fingerprint::uuid_v5("https://e.x/old", "mp4");
    let mut job = Job::new(id, "https://e.x/old", "mp4", Duration::ZERO);
    job.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
    let artifact = Artifact {
        id: fingerprint::uuid_v5("vid-old", &file.to_string_lossy()),
        source_id: "vid-old".to_string(),
        filename: file.clone(),
        file_size: 9,
        ..Artifact::default()
    };
    job.artifacts = vec![artifact.clone()];
    registry.put_job(job).unwrap();
    registry.put_artifact(id, artifact.clone()).unwrap();

    let token = CancellationToken::new();
    let loop_registry = registry.clone();
    let loop_token = token.clone();
    let handle = tokio::spawn(async move {
        loop_registry
            .sweep_loop(Duration::from_millis(50), loop_token)
            .await;
    });

    let swept = wait_until(
        || registry.get_job(id).is_none() && registry.get_artifact(artifact.id).is_none(),
        Duration::from_secs(5),
    )
    .await;
    assert!(swept);
    assert!(!file.exists());

    // The loop honors cancellation.
    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("sweep loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_inflight_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = Config::for_testing(tmp.path());
    cfg.job.workers = 1;
    let cfg = Arc::new(cfg);

    let registry = Arc::new(JobRegistry::new());
    let mock = Mock::new().with_duration(Duration::from_millis(300));
    let scheduler = Arc::new(Scheduler::new(cfg, Arc::new(mock), registry.clone()));

    let token = CancellationToken::new();
    scheduler.start(token.clone());

    let job = scheduler.enqueue("https://e.x/v", "mp4").unwrap().job().clone();

    let picked_up = wait_until(
        || {
            registry
                .get_job(job.id)
                .is_some_and(|j| j.status == JobStatus::Downloading)
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(picked_up);

    // Stop the world: workers finish the current job, then exit.
    token.cancel();
    scheduler.shutdown(Duration::from_secs(5)).await;

    let got = registry.get_job(job.id).unwrap();
    assert!(
        got.status.is_terminal(),
        "job left non-terminal after shutdown: {}",
        got.status
    );

    assert!(matches!(
        scheduler.enqueue("https://e.x/late", "mp4"),
        Err(vidra::Error::ServiceClosed)
    ));
}

#[tokio::test]
async fn two_workers_run_jobs_concurrently() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = Config::for_testing(tmp.path());
    cfg.job.workers = 2;
    let cfg = Arc::new(cfg);

    let registry = Arc::new(JobRegistry::new());
    let mock = Mock::new().with_duration(Duration::from_secs(2));
    let scheduler = Arc::new(Scheduler::new(cfg, Arc::new(mock), registry.clone()));
    scheduler.start(CancellationToken::new());

    let a = scheduler.enqueue("https://e.x/a", "mp4").unwrap().job().clone();
    let b = scheduler.enqueue("https://e.x/b", "mp4").unwrap().job().clone();

    // Both must be in flight at the same time.
    let both_running = wait_until(
        || {
            let a_running = registry
                .get_job(a.id)
                .is_some_and(|j| j.status == JobStatus::Downloading);
            let b_running = registry
                .get_job(b.id)
                .is_some_and(|j| j.status == JobStatus::Downloading);
            a_running && b_running
        },
        Duration::from_secs(2),
    )
    .await;

    assert!(both_running);
}

#[tokio::test]
async fn single_worker_processes_jobs_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = Config::for_testing(tmp.path());
    cfg.job.workers = 1;
    let cfg = Arc::new(cfg);

    let registry = Arc::new(JobRegistry::new());
    let mock = Mock::new().with_duration(Duration::from_millis(100));
    let scheduler = Arc::new(Scheduler::new(cfg, Arc::new(mock), registry.clone()));
    scheduler.start(CancellationToken::new());

    let first = scheduler.enqueue("https://e.x/1", "mp4").unwrap().job().clone();
    let second = scheduler.enqueue("https://e.x/2", "mp4").unwrap().job().clone();

    let both_done = wait_until(
        || {
            registry.get_job(first.id).is_some_and(|j| j.is_terminal())
                && registry.get_job(second.id).is_some_and(|j| j.is_terminal())
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(both_done);

    // FIFO dispatch: the first job finished no later than the second.
    let first_done = registry.get_job(first.id).unwrap().updated_at;
    let second_done = registry.get_job(second.id).unwrap().updated_at;
    assert!(first_done <= second_done);
}
