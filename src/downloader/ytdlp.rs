//! The primary media extractor driver.
//!
//! Runs yt-dlp for one job: a non-downloading describe pass for the size
//! estimate, then the downloading process with machine-readable per-item
//! JSON output and newline-terminated progress lines.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::depmanager::{Binary, DependencyManager};
use crate::domain::{Job, JobStatus};
use crate::proxy::ProxyManager;
use crate::registry::JobRegistry;
use crate::{Error, Result};

use super::output::{self, DescribeResult};
use super::process::{spawn_process_waiter, RecordReader};
use super::{finish_job, Extractor, ExtractorKind, PROGRESS_THROTTLE};

/// Preset aliases that select audio-only output.
const AUDIO_PRESETS: [&str; 8] = ["aac", "alac", "flac", "m4a", "mp3", "opus", "vorbis", "wav"];

const MIB: u64 = 1024 * 1024;

/// yt-dlp driver.
pub struct YtDlp {
    cfg: Arc<Config>,
    deps: Arc<DependencyManager>,
    proxies: Arc<ProxyManager>,
}

impl YtDlp {
    pub fn new(cfg: Arc<Config>, deps: Arc<DependencyManager>, proxies: Arc<ProxyManager>) -> Self {
        Self { cfg, deps, proxies }
    }

    fn binary(&self) -> std::path::PathBuf {
        self.deps
            .installed_path(Binary::YtDlp)
            .unwrap_or_else(|| self.deps.binary_path(Binary::YtDlp))
    }

    /// Argument vector for the downloading invocation. The proxy, when
    /// one was selected, is returned alongside so failures can be fed
    /// back to the pool.
    fn build_args(&self, job: &Job) -> (Vec<String>, Option<String>) {
        let mut args: Vec<String> = Vec::new();

        if let Some(ffmpeg) = self.deps.installed_path(Binary::Ffmpeg) {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }

        args.push("--cache-dir".to_string());
        args.push(self.cfg.dir.cache.to_string_lossy().into_owned());

        args.push("-t".to_string());
        args.push(job.preset.clone());

        args.push("--no-playlist".to_string());
        args.push("--print-json".to_string());

        // The printed path is what the stdout parser pairs with the
        // preceding JSON object; the directive must stay in sync with it.
        args.push("--print".to_string());
        args.push("after_move:filepath".to_string());

        args.push("-o".to_string());
        args.push(self.cfg.dir.filename_template.clone());

        args.push("--newline".to_string());
        args.push("--progress".to_string());

        if let Some(cookie_file) = &self.cfg.dir.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookie_file.to_string_lossy().into_owned());
        }

        let proxy = self.proxies.random_proxy();
        if let Some(proxy) = &proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(job.url.clone());

        (args, proxy)
    }

    /// Pre-flight size estimation via the describe invocation.
    ///
    /// Returns 0 when nothing useful was reported. Failures other than
    /// cancellation are the caller's to swallow; this step never fails a
    /// job.
    async fn estimate_size(&self, token: &CancellationToken, job: &Job) -> Result<u64> {
        let mut cmd = Command::new(self.binary());
        cmd.args(["-F", "--no-playlist", "-J"])
            .arg(&job.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            out = cmd.output() => out?,
        };

        if !output.status.success() {
            return Err(Error::ProcessFailed {
                code: output.status.code(),
                stderr: "describe invocation failed".to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let describe = stdout
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with('{'))
            .and_then(|l| serde_json::from_str::<DescribeResult>(l).ok())
            .unwrap_or_default();

        let mut size = describe.max_format_size();
        if size == 0 {
            if let Some(duration) = describe.duration {
                size = heuristic_size(duration, is_audio_preset(&job.preset));
            }
        }

        Ok(size)
    }
}

/// Rough size estimate from media duration when the extractor reports no
/// format sizes: ~1 MiB per minute for audio, ~10 MiB per minute
/// otherwise.
fn heuristic_size(duration_secs: f64, audio: bool) -> u64 {
    if duration_secs <= 0.0 {
        return 0;
    }

    let rate_per_min = if audio { MIB } else { 10 * MIB };
    (duration_secs / 60.0 * rate_per_min as f64) as u64
}

fn is_audio_preset(preset: &str) -> bool {
    let preset = preset.to_ascii_lowercase();
    AUDIO_PRESETS.contains(&preset.as_str())
}

#[async_trait]
impl Extractor for YtDlp {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::YtDlp
    }

    async fn run(
        &self,
        token: &CancellationToken,
        job: &Job,
        registry: &Arc<JobRegistry>,
    ) -> Result<()> {
        registry.update_status(job.id, JobStatus::Downloading, 0, "");

        match self.estimate_size(token, job).await {
            Ok(size) if size > 0 => {
                debug!(job_id = %job.id, size, "estimated download size");
                registry.update_estimated_size(job.id, size);
            }
            Ok(_) => {}
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => debug!(job_id = %job.id, error = %e, "size estimation failed"),
        }

        let (args, proxy) = self.build_args(job);
        let binary = self.binary();

        info!(job_id = %job.id, binary = %binary.display(), "starting extractor");
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

        // Stdout is both the progress feed and the composition input:
        // stream it for progress, keep the full buffer for afterwards.
        let stdout_task = tokio::spawn({
            let registry = Arc::clone(registry);
            let token = token.clone();
            let job_id = job.id;

            async move {
                let mut reader = RecordReader::new(stdout);
                let mut buf = String::new();
                let mut last_update: Option<Instant> = None;

                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        record = reader.next_record() => match record {
                            Ok(Some(line)) => {
                                buf.push_str(&line);
                                buf.push('\n');

                                if let Some(pct) = output::parse_download_progress(&line) {
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
                                warn!(job_id = %job_id, error = %e, "error reading extractor stdout");
                                break;
                            }
                        }
                    }
                }

                buf
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut reader = RecordReader::new(stderr);
            let mut buf = String::new();

            while let Ok(Some(line)) = reader.next_record().await {
                buf.push_str(&line);
                buf.push('\n');
            }

            buf
        });

        let exit_code = exit_rx.await.unwrap_or(None);
        let stdout_buf = stdout_task.await.unwrap_or_default();
        let stderr_buf = stderr_task.await.unwrap_or_default();

        match exit_code {
            None => Err(Error::Cancelled),
            Some(0) => {
                if let Some(proxy) = &proxy {
                    self.proxies.mark_success(proxy);
                }

                let results = output::parse_stdout(&stdout_buf);
                if results.is_empty() {
                    return Err(Error::download_failed(
                        "no results parsed from extractor output",
                    ));
                }

                let artifacts = output::compose_artifacts(results).await;
                info!(job_id = %job.id, count = artifacts.len(), "artifacts composed");

                finish_job(registry, job.id, artifacts)
            }
            Some(code) => {
                if let Some(proxy) = &proxy {
                    self.proxies.mark_failed(proxy);
                }

                Err(Error::ProcessFailed {
                    code: Some(code),
                    stderr: output::stderr_excerpt(&stderr_buf),
                })
            }
        }
    }
}
