//! Application configuration.
//!
//! Every option is read from the environment under the single `VIDRA_`
//! prefix, with the defaults below. Directory options are resolved to
//! absolute paths at startup so every downstream path (output template,
//! bins dir, cookie file) is absolute.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::utils::{duration, fs};
use crate::{Error, Result};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "VIDRA_";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app: App,
    pub job: JobConfig,
    pub http: Http,
    pub dir: Dir,
    pub storage: Storage,
    pub depmanager: DepManager,
    pub proxy: Proxy,
}

/// Application-wide settings.
#[derive(Debug, Clone)]
pub struct App {
    /// One of debug/info/warn/error.
    pub log_level: String,
}

/// Job processing settings.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Per-job processing timeout.
    pub timeout: Duration,
    /// Bounded queue capacity.
    pub queue_size: usize,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct Http {
    /// Listen address, `":8080"` or `"host:port"`.
    pub port: String,
    pub handler_timeout: Duration,
    /// Longer timeout for artifact downloads.
    pub download_timeout: Duration,
    pub shutdown_timeout: Duration,
}

/// Directory layout.
#[derive(Debug, Clone)]
pub struct Dir {
    /// Downloaded artifacts are stored here.
    pub downloads: PathBuf,
    /// Extractor cache (metadata, signatures).
    pub cache: PathBuf,
    /// Optional cookies.txt for the extractor; empty = none.
    pub cookie_file: Option<PathBuf>,
    /// Extractor output template, resolved to an absolute path under
    /// `downloads` at startup.
    pub filename_template: String,
}

/// In-memory store settings.
#[derive(Debug, Clone)]
pub struct Storage {
    /// How long finished jobs and their files are retained.
    pub ttl: Duration,
    /// Sweep period for expired jobs.
    pub cleanup_interval: Duration,
}

/// Binary dependency management settings.
#[derive(Debug, Clone)]
pub struct DepManager {
    /// Directory where managed binaries are installed.
    pub bins_dir: PathBuf,
    /// Resolve binaries from `PATH` instead of downloading them.
    pub use_system_binaries: bool,
    /// How often to poll the remote hash manifests; zero disables updates.
    pub update_interval: Duration,

    pub ytdlp_sha256sums_url: String,
    pub ytdlp_linux_arm64: String,
    pub ytdlp_linux_amd64: String,

    pub ffmpeg_sha256sums_url: String,
    pub ffmpeg_linux_arm64: String,
    pub ffmpeg_linux_amd64: String,

    pub gallerydl_sha256sums_url: String,
    pub gallerydl_linux_arm64: String,
    pub gallerydl_linux_amd64: String,

    pub deno_sha256sums_url: String,
    pub deno_linux_arm64: String,
    pub deno_linux_amd64: String,
}

/// Proxy pool settings.
#[derive(Debug, Clone)]
pub struct Proxy {
    /// Parsed proxy URLs, from the comma-separated `PROXY_LIST`.
    pub proxies: Vec<String>,
    pub health_check_interval: Duration,
    /// Initial backoff after a proxy exceeds `max_failures`.
    pub failure_backoff: Duration,
    pub max_failures: u32,
}

impl Config {
    /// Load configuration from the environment and resolve paths.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self {
            app: App {
                log_level: var_or("APP_LOG_LEVEL", "info"),
            },
            job: JobConfig {
                workers: var_parse("APP_JOB_WORKERS", 2)?,
                timeout: var_duration("APP_JOB_TIMEOUT", "5m")?,
                queue_size: var_parse("APP_JOB_QUEUE_SIZE", 100)?,
            },
            http: Http {
                port: var_or("HTTP_PORT", ":8080"),
                handler_timeout: var_duration("HTTP_HANDLER_TIMEOUT", "20s")?,
                download_timeout: var_duration("HTTP_DOWNLOAD_TIMEOUT", "30m")?,
                shutdown_timeout: var_duration("HTTP_SHUTDOWN_TIMEOUT", "10s")?,
            },
            dir: Dir {
                downloads: PathBuf::from(var_or("DIR_DOWNLOAD", "./data/downloads")),
                cache: PathBuf::from(var_or("DIR_CACHE", "./data/cache")),
                cookie_file: var("DIR_COOKIE_FILE").map(PathBuf::from),
                filename_template: var_or(
                    "DIR_FILENAME_TEMPLATE",
                    "%(extractor)s - %(title)s [%(id)s].%(ext)s",
                ),
            },
            storage: Storage {
                ttl: var_duration("APP_STORAGE_TTL", "168h")?,
                cleanup_interval: var_duration("APP_STORAGE_CLEANUP_INTERVAL", "1h")?,
            },
            depmanager: DepManager {
                bins_dir: PathBuf::from(var_or("DEPMANAGER_BINS_DIR", "./bins")),
                use_system_binaries: var_bool("DEPMANAGER_USE_SYSTEM_BINARIES", false)?,
                update_interval: var_duration("DEPMANAGER_UPDATE_INTERVAL", "24h")?,

                ytdlp_sha256sums_url: var_or(
                    "DEPMANAGER_YTDLP_SHA256SUMS_URL",
                    "https://github.com/yt-dlp/yt-dlp/releases/latest/download/SHA2-256SUMS",
                ),
                ytdlp_linux_arm64: var_or(
                    "DEPMANAGER_YTDLP_LINUX_ARM64",
                    "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux_aarch64",
                ),
                ytdlp_linux_amd64: var_or(
                    "DEPMANAGER_YTDLP_LINUX_AMD64",
                    "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux",
                ),

                ffmpeg_sha256sums_url: var_or(
                    "DEPMANAGER_FFMPEG_SHA256SUMS_URL",
                    "https://github.com/BtbN/FFmpeg-Builds/releases/latest/download/checksums.sha256",
                ),
                ffmpeg_linux_arm64: var_or(
                    "DEPMANAGER_FFMPEG_LINUX_ARM64",
                    "https://github.com/BtbN/FFmpeg-Builds/releases/latest/download/ffmpeg-master-latest-linuxarm64-gpl.tar.xz",
                ),
                ffmpeg_linux_amd64: var_or(
                    "DEPMANAGER_FFMPEG_LINUX_AMD64",
                    "https://github.com/BtbN/FFmpeg-Builds/releases/latest/download/ffmpeg-master-latest-linux64-gpl.tar.xz",
                ),

                gallerydl_sha256sums_url: var_or(
                    "DEPMANAGER_GALLERYDL_SHA256SUMS_URL",
                    "https://github.com/gallery-dl-builds/gallery-dl-builds/releases/latest/download/SHA256SUMS.txt",
                ),
                gallerydl_linux_arm64: var_or(
                    "DEPMANAGER_GALLERYDL_LINUX_ARM64",
                    "https://github.com/gallery-dl-builds/gallery-dl-builds/releases/latest/download/gallery-dl_linux_arm64",
                ),
                gallerydl_linux_amd64: var_or(
                    "DEPMANAGER_GALLERYDL_LINUX_AMD64",
                    "https://github.com/gallery-dl-builds/gallery-dl-builds/releases/latest/download/gallery-dl_linux_amd64",
                ),

                deno_sha256sums_url: var_or(
                    "DEPMANAGER_DENO_SHA256SUMS_URL",
                    "https://github.com/denoland/deno/releases/latest/download/deno-aarch64-unknown-linux-gnu.zip.sha256sum,https://github.com/denoland/deno/releases/latest/download/deno-x86_64-unknown-linux-gnu.zip.sha256sum",
                ),
                deno_linux_arm64: var_or(
                    "DEPMANAGER_DENO_LINUX_ARM64",
                    "https://github.com/denoland/deno/releases/latest/download/deno-aarch64-unknown-linux-gnu.zip",
                ),
                deno_linux_amd64: var_or(
                    "DEPMANAGER_DENO_LINUX_AMD64",
                    "https://github.com/denoland/deno/releases/latest/download/deno-x86_64-unknown-linux-gnu.zip",
                ),
            },
            proxy: Proxy {
                proxies: parse_proxy_list(&var_or("PROXY_LIST", "")),
                health_check_interval: var_duration("PROXY_HEALTH_CHECK_INTERVAL", "5m")?,
                failure_backoff: var_duration("PROXY_FAILURE_BACKOFF", "1m")?,
                max_failures: var_parse("PROXY_MAX_FAILURES", 3)?,
            },
        };

        cfg.resolve_paths()?;

        Ok(cfg)
    }

    /// Resolve every directory option to an absolute path, and anchor the
    /// filename template inside the downloads directory.
    fn resolve_paths(&mut self) -> Result<()> {
        self.dir.downloads = fs::absolutize(&self.dir.downloads)?;
        self.dir.cache = fs::absolutize(&self.dir.cache)?;
        if let Some(cookie) = &self.dir.cookie_file {
            self.dir.cookie_file = Some(fs::absolutize(cookie)?);
        }
        self.dir.filename_template = self
            .dir
            .downloads
            .join(&self.dir.filename_template)
            .to_string_lossy()
            .into_owned();
        self.depmanager.bins_dir = fs::absolutize(&self.depmanager.bins_dir)?;

        Ok(())
    }

    /// A small configuration rooted at `root`, for tests.
    pub fn for_testing(root: &Path) -> Self {
        let downloads = root.join("downloads");
        let filename_template = downloads
            .join("%(extractor)s - %(title)s [%(id)s].%(ext)s")
            .to_string_lossy()
            .into_owned();

        Self {
            app: App {
                log_level: "debug".to_string(),
            },
            job: JobConfig {
                workers: 1,
                timeout: Duration::from_secs(30),
                queue_size: 10,
            },
            http: Http {
                port: ":0".to_string(),
                handler_timeout: Duration::from_secs(5),
                download_timeout: Duration::from_secs(30),
                shutdown_timeout: Duration::from_secs(1),
            },
            dir: Dir {
                downloads,
                cache: root.join("cache"),
                cookie_file: None,
                filename_template,
            },
            storage: Storage {
                ttl: Duration::from_secs(3600),
                cleanup_interval: Duration::from_secs(60),
            },
            depmanager: DepManager {
                bins_dir: root.join("bins"),
                use_system_binaries: false,
                update_interval: Duration::ZERO,

                ytdlp_sha256sums_url: String::new(),
                ytdlp_linux_arm64: String::new(),
                ytdlp_linux_amd64: String::new(),
                ffmpeg_sha256sums_url: String::new(),
                ffmpeg_linux_arm64: String::new(),
                ffmpeg_linux_amd64: String::new(),
                gallerydl_sha256sums_url: String::new(),
                gallerydl_linux_arm64: String::new(),
                gallerydl_linux_amd64: String::new(),
                deno_sha256sums_url: String::new(),
                deno_linux_arm64: String::new(),
                deno_linux_amd64: String::new(),
            },
            proxy: Proxy {
                proxies: Vec::new(),
                health_check_interval: Duration::from_secs(300),
                failure_backoff: Duration::from_secs(60),
                max_failures: 3,
            },
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

fn var_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("invalid value {raw:?} for {ENV_PREFIX}{name}"))),
        None => Ok(default),
    }
}

fn var_duration(name: &str, default: &str) -> Result<Duration> {
    let raw = var_or(name, default);
    duration::parse(&raw)
        .map_err(|e| Error::config(format!("{ENV_PREFIX}{name}: {e}")))
}

fn var_bool(name: &str, default: bool) -> Result<bool> {
    match var(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(Error::config(format!(
                "invalid boolean {raw:?} for {ENV_PREFIX}{name}"
            ))),
        },
        None => Ok(default),
    }
}

fn parse_proxy_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
