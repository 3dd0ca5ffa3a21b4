//! The gallery extractor driver.
//!
//! gallery-dl handles gallery-style sources (image posts, slideshows).
//! It prints one JSON object per item on stdout and `# N/M` progress
//! counters on stderr.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::depmanager::{Binary, DependencyManager};
use crate::domain::{Artifact, Job, JobStatus};
use crate::proxy::ProxyManager;
use crate::registry::JobRegistry;
use crate::{Error, Result};

use super::output::{self, artifact_id};
use super::process::{spawn_process_waiter, RecordReader};
use super::{finish_job, Extractor, ExtractorKind, PROGRESS_THROTTLE};

/// One JSON object printed by the gallery extractor.
#[derive(Debug, Clone, Default, Deserialize)]
struct GalleryResult {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    extension: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "description", default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// gallery-dl driver.
pub struct GalleryDl {
    cfg: Arc<Config>,
    deps: Arc<DependencyManager>,
    proxies: Arc<ProxyManager>,
}

impl GalleryDl {
    pub fn new(cfg: Arc<Config>, deps: Arc<DependencyManager>, proxies: Arc<ProxyManager>) -> Self {
        Self { cfg, deps, proxies }
    }

    fn binary(&self) -> PathBuf {
        self.deps
            .installed_path(Binary::GalleryDl)
            .unwrap_or_else(|| self.deps.binary_path(Binary::GalleryDl))
    }

    fn build_args(&self, job: &Job) -> Vec<String> {
        let mut args = vec![
            "--write-info-json".to_string(),
            "--dump-json".to_string(),
            "-D".to_string(),
            self.cfg.dir.downloads.to_string_lossy().into_owned(),
        ];

        if let Some(proxy) = self.proxies.random_proxy() {
            args.push("--proxy".to_string());
            args.push(proxy);
        }

        if let Some(cookie_file) = &self.cfg.dir.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookie_file.to_string_lossy().into_owned());
        }

        args.push(job.url.clone());
        args
    }

    fn parse_stdout(stdout: &str) -> Vec<GalleryResult> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter_map(|l| serde_json::from_str::<GalleryResult>(l).ok())
            .collect()
    }

    async fn compose_artifacts(&self, results: Vec<GalleryResult>) -> Vec<Artifact> {
        let mut artifacts = Vec::with_capacity(results.len());

        for result in results {
            let mut filename = result.filename.clone().unwrap_or_default();
            if let Some(ext) = result.extension.as_deref() {
                if !filename.is_empty() && !filename.ends_with(&format!(".{ext}")) {
                    filename = format!("{filename}.{ext}");
                }
            }

            // Promote to the absolute on-disk path when the file landed
            // where expected; otherwise keep the reported name as-is.
            let mut file_size = 0u64;
            let full_path = self.cfg.dir.downloads.join(&filename);
            if let Ok(meta) = tokio::fs::metadata(&full_path).await {
                file_size = meta.len();
                filename = full_path.to_string_lossy().into_owned();
            }

            let source_id = result.id.unwrap_or_default();
            let filename = PathBuf::from(filename);

            artifacts.push(Artifact {
                id: artifact_id(&source_id, &filename),
                source_id,
                kind: "image".to_string(),
                platform: result.category.unwrap_or_default(),
                author: result.author.unwrap_or_default(),
                title: result.title.unwrap_or_default(),
                webpage_url: result.url.unwrap_or_default(),
                width: result.width.unwrap_or(0),
                height: result.height.unwrap_or(0),
                file_size,
                filename,
                ..Artifact::default()
            });
        }

        artifacts
    }
}

/// Whether a URL is a gallery-style image post rather than a video page.
pub fn is_gallery_url(url: &str) -> bool {
    url.contains("tiktok.com") && url.contains("/photo/")
}

#[async_trait]
impl Extractor for GalleryDl {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::GalleryDl
    }

    async fn run(
        &self,
        token: &CancellationToken,
        job: &Job,
        registry: &Arc<JobRegistry>,
    ) -> Result<()> {
        registry.update_status(job.id, JobStatus::Downloading, 0, "");

        let args = self.build_args(job);
        let binary = self.binary();

        info!(job_id = %job.id, binary = %binary.display(), "starting gallery extractor");
        debug!(job_id = %job.id, args = ?args, "extractor arguments");

        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::other("failed to capture extractor stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::other("failed to capture extractor stderr"))?;

        let exit_rx = spawn_process_waiter(child, token.clone());

        // Stdout carries the JSON results; progress arrives on stderr.
        let stdout_task = tokio::spawn(async move {
            let mut reader = RecordReader::new(stdout);
            let mut buf = String::new();

            while let Ok(Some(line)) = reader.next_record().await {
                buf.push_str(&line);
                buf.push('\n');
            }

            buf
        });

        let stderr_task = tokio::spawn({
            let registry = Arc::clone(registry);
            let token = token.clone();
            let job_id = job.id;

            async move {
                let mut reader = RecordReader::new(stderr);
                let mut buf = String::new();
                let mut last_update: Option<Instant> = None;

                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        record = reader.next_record() => match record {
                            Ok(Some(line)) => {
                                buf.push_str(&line);
                                buf.push('\n');

                                if let Some(pct) = output::parse_gallery_progress(&line) {
                                    if last_update.map_or(true, |t| t.elapsed() >= PROGRESS_THROTTLE) {
                                        last_update = Some(Instant::now());
                                        registry.update_status(
                                            job_id,
                                            JobStatus::Downloading,
                                            pct,
                                            "",
                                        );
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(job_id = %job_id, error = %e, "error reading extractor stderr");
                                break;
                            }
                        }
                    }
                }

                buf
            }
        });

        let exit_code = exit_rx.await.unwrap_or(None);
        let stdout_buf = stdout_task.await.unwrap_or_default();
        let stderr_buf = stderr_task.await.unwrap_or_default();

        match exit_code {
            None => Err(Error::Cancelled),
            Some(0) => {
                let results = Self::parse_stdout(&stdout_buf);
                if results.is_empty() {
                    return Err(Error::download_failed(
                        "no results parsed from extractor output",
                    ));
                }

                let artifacts = self.compose_artifacts(results).await;
                info!(job_id = %job.id, count = artifacts.len(), "artifacts composed");

                finish_job(registry, job.id, artifacts)
            }
            Some(code) => Err(Error::ProcessFailed {
                code: Some(code),
                stderr: output::stderr_excerpt(&stderr_buf),
            }),
        }
    }
}
