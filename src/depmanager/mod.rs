//! Binary dependency management for the external tools.
//!
//! Downloads and maintains the extractor and transcoder binaries (yt-dlp,
//! ffmpeg/ffprobe, gallery-dl, deno). Remote SHA-256 manifests are used
//! only to detect when new versions are available, never to verify the
//! downloads themselves.

pub mod archive;

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config;
use crate::utils::fs;
use crate::{Error, Result};

/// HTTP client timeout for manifest fetches and binary downloads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Expected length of a SHA-256 hex digest.
const SHA256_HEX_LEN: usize = 64;

/// Expected field count of a `SHA256SUMS` line.
const SUMS_FIELD_COUNT: usize = 2;

/// Saved-checksum filename inside the bins directory.
const SAVED_SUMS_FILENAME: &str = ".sha256sums.json";

/// A managed binary dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binary {
    YtDlp,
    Ffmpeg,
    Ffprobe,
    GalleryDl,
    Deno,
}

impl Binary {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YtDlp => "yt-dlp",
            Self::Ffmpeg => "ffmpeg",
            Self::Ffprobe => "ffprobe",
            Self::GalleryDl => "gallery-dl",
            Self::Deno => "deno",
        }
    }

    fn from_member_name(name: &str) -> Option<Self> {
        match name {
            "yt-dlp" => Some(Self::YtDlp),
            "ffmpeg" => Some(Self::Ffmpeg),
            "ffprobe" => Some(Self::Ffprobe),
            "gallery-dl" => Some(Self::GalleryDl),
            "deno" => Some(Self::Deno),
            _ => None,
        }
    }
}

impl std::fmt::Display for Binary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binaries installed directly; ffprobe arrives as a member of the ffmpeg
/// archive.
const INSTALL_SET: [Binary; 4] = [Binary::Ffmpeg, Binary::Deno, Binary::YtDlp, Binary::GalleryDl];

/// Binaries resolved from `PATH` in system-binaries mode.
const SYSTEM_SET: [Binary; 4] = [Binary::YtDlp, Binary::Ffmpeg, Binary::GalleryDl, Binary::Deno];

/// OS and architecture pair, in the upstream release naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    /// The platform this process runs on.
    pub fn current() -> Self {
        let arch = match std::env::consts::ARCH {
            "aarch64" => "arm64",
            "x86_64" => "amd64",
            other => other,
        };

        Self {
            os: std::env::consts::OS,
            arch,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

#[derive(Default)]
struct State {
    /// filename -> hash, as fetched from the remote manifests.
    sha_sums: HashMap<String, String>,
    /// filename -> hash, as persisted after the last install.
    saved_sums: HashMap<String, String>,
    bin_paths: HashMap<Binary, PathBuf>,
}

/// Locates, downloads and refreshes the external binaries.
pub struct DependencyManager {
    cfg: config::DepManager,
    platform: Platform,
    client: reqwest::Client,
    state: RwLock<State>,
    updating: AtomicBool,
}

impl DependencyManager {
    pub fn new(cfg: config::DepManager) -> Self {
        Self::with_platform(cfg, Platform::current())
    }

    pub fn with_platform(cfg: config::DepManager, platform: Platform) -> Self {
        Self {
            cfg,
            platform,
            client: reqwest::Client::builder()
                .timeout(DOWNLOAD_TIMEOUT)
                .build()
                .expect("reqwest client"),
            state: RwLock::new(State::default()),
            updating: AtomicBool::new(false),
        }
    }

    /// Resolve or install every required binary, then spawn the periodic
    /// update checker. A failed first-time install is fatal: the service
    /// cannot function without the extractor.
    pub async fn start(self: &Arc<Self>, token: CancellationToken) -> Result<()> {
        if self.cfg.use_system_binaries {
            self.set_system_binaries()?;
            return Ok(());
        }

        self.install_all().await?;

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.update_loop(token).await });

        Ok(())
    }

    /// Resolve each binary from the `PATH` search path.
    pub fn set_system_binaries(&self) -> Result<()> {
        let mut state = self.state.write();

        for binary in SYSTEM_SET {
            let path = fs::lookup_in_path(binary.as_str())
                .ok_or_else(|| Error::DependencyNotFound(binary.as_str().to_string()))?;
            state.bin_paths.insert(binary, path);
        }

        Ok(())
    }

    /// Install every missing binary, then fetch and persist the manifest
    /// hashes for future update checks.
    pub async fn install_all(&self) -> Result<()> {
        fs::ensure_dir_all(&self.cfg.bins_dir).await?;

        if let Err(e) = self.load_saved_sums() {
            debug!(error = %e, "no saved checksums found, first run");
        }

        for binary in INSTALL_SET {
            if self.binary_exists(binary) {
                self.set_bin_path(binary);
                debug!(binary = %binary, "binary already exists");
                continue;
            }

            self.download_and_install(binary).await?;
        }

        info!("all binaries are installed");

        if let Err(e) = self.fetch_sha_sums().await {
            warn!(error = %e, "failed to fetch checksums");
            return Ok(());
        }

        if let Err(e) = self.save_sums() {
            warn!(error = %e, "failed to save checksums");
        }

        Ok(())
    }

    /// The install path a binary would live at, whether or not installed.
    pub fn binary_path(&self, binary: Binary) -> PathBuf {
        let mut filename = binary.as_str().to_string();
        if self.platform.os == "windows" {
            filename.push_str(".exe");
        }

        self.cfg.bins_dir.join(filename)
    }

    /// The concrete path to invoke, empty when the binary is not known.
    pub fn installed_path(&self, binary: Binary) -> Option<PathBuf> {
        self.state.read().bin_paths.get(&binary).cloned()
    }

    /// First line of `<binary> --version`, for startup logging.
    pub async fn binary_version(&self, binary: Binary) -> Option<String> {
        let path = self.installed_path(binary)?;

        let output = tokio::process::Command::new(path)
            .arg("--version")
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }

        let first = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()?
            .trim()
            .to_string();
        (!first.is_empty()).then_some(first)
    }

    /// Periodically re-check the remote manifests until `token` fires.
    async fn update_loop(self: Arc<Self>, token: CancellationToken) {
        if self.cfg.update_interval.is_zero() {
            return;
        }

        let mut ticker = tokio::time::interval(self.cfg.update_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_and_update().await,
                _ = token.cancelled() => {
                    info!("binary update checker stopped");
                    return;
                }
            }
        }
    }

    /// One update pass. Single-flighted: a pass still in progress makes
    /// the next tick a no-op.
    pub async fn check_and_update(&self) {
        if self
            .updating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.run_update_pass().await;
        self.updating.store(false, Ordering::SeqCst);
    }

    async fn run_update_pass(&self) {
        if let Err(e) = self.fetch_sha_sums().await {
            warn!(error = %e, "update check: failed to fetch checksums");
            return;
        }

        let updates = self.find_updates();
        if updates.is_empty() {
            debug!("update check: no updates available");
            return;
        }

        info!(binaries = ?updates.iter().map(Binary::as_str).collect::<Vec<_>>(),
            "update check: updates available");

        for binary in updates {
            if let Err(e) = self.download_and_install(binary).await {
                error!(binary = %binary, error = %e, "update check: failed to update binary");
                continue;
            }

            info!(binary = %binary, "update check: binary updated");
        }

        if let Err(e) = self.save_sums() {
            warn!(error = %e, "update check: failed to save checksums");
        }
    }

    /// Fetch and merge every configured hash manifest.
    pub async fn fetch_sha_sums(&self) -> Result<()> {
        let urls = self.collect_sums_urls()?;

        for url in urls {
            let resp = self.client.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(Error::other(format!(
                    "unexpected status {} fetching {url}",
                    resp.status()
                )));
            }

            let body = resp.text().await?;
            self.parse_sha_sums(&body);
        }

        Ok(())
    }

    fn collect_sums_urls(&self) -> Result<Vec<String>> {
        let sources = [
            &self.cfg.ytdlp_sha256sums_url,
            &self.cfg.ffmpeg_sha256sums_url,
            &self.cfg.gallerydl_sha256sums_url,
            &self.cfg.deno_sha256sums_url,
        ];

        let urls: Vec<String> = sources
            .iter()
            .flat_map(|raw| raw.split(','))
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();

        if urls.is_empty() {
            return Err(Error::config("no SHA256 sums URLs configured"));
        }

        Ok(urls)
    }

    /// Parse `<hex-hash>  <filename>` lines into the fetched-hash map.
    /// Malformed lines are silently skipped; later manifests win on
    /// duplicate filenames.
    pub fn parse_sha_sums(&self, content: &str) {
        let mut state = self.state.write();

        for line in content.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != SUMS_FIELD_COUNT {
                continue;
            }

            let (hash, filename) = (fields[0], fields[1]);
            if hash.len() != SHA256_HEX_LEN {
                continue;
            }

            state.sha_sums.insert(filename.to_string(), hash.to_string());
        }

        debug!(count = state.sha_sums.len(), "parsed SHA256 sums");
    }

    /// Binaries whose manifest hash differs from the saved hash (or that
    /// have no saved hash yet).
    pub fn find_updates(&self) -> Vec<Binary> {
        let state = self.state.read();
        let mut updates = Vec::new();

        for binary in INSTALL_SET {
            let filename = self.download_filename(binary);
            let Some(new_hash) = state.sha_sums.get(&filename) else {
                continue;
            };

            match state.saved_sums.get(&filename) {
                Some(old_hash) if old_hash == new_hash => {}
                _ => updates.push(binary),
            }
        }

        updates
    }

    fn binary_exists(&self, binary: Binary) -> bool {
        self.binary_path(binary)
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    fn set_bin_path(&self, binary: Binary) {
        let path = self.binary_path(binary);
        self.state.write().bin_paths.insert(binary, path);
    }

    async fn download_and_install(&self, binary: Binary) -> Result<()> {
        let url = self.binary_url(binary);
        if url.is_empty() {
            return Err(Error::UnsupportedPlatform {
                binary: binary.as_str().to_string(),
                platform: self.platform.to_string(),
            });
        }

        info!(binary = %binary, url = %url, "downloading binary");

        let installed = self.download_dependency(&url, binary).await?;

        for path in &installed {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                let name = name.trim_end_matches(".exe");
                if let Some(member) = Binary::from_member_name(name) {
                    self.state.write().bin_paths.insert(member, path.clone());
                }
            }
        }

        info!(binary = %binary, paths = ?installed, "binary installed");
        Ok(())
    }

    /// Stream the download into a temp file beside the install path, then
    /// either extract the expected archive members or rename it in place.
    async fn download_dependency(&self, url: &str, binary: Binary) -> Result<Vec<PathBuf>> {
        let bin_path = self.binary_path(binary);
        let dest_dir = self.cfg.bins_dir.clone();

        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::other(format!(
                "unexpected status {} downloading {url}",
                resp.status()
            )));
        }

        let mut tmp = tempfile::Builder::new()
            .prefix("download-")
            .tempfile_in(&dest_dir)?;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            tmp.write_all(&chunk?)?;
        }
        tmp.flush()?;

        if archive::is_archive(url) {
            let targets = self.files_needed(binary);
            let tmp_path = tmp.into_temp_path();
            let archive_path = tmp_path.to_path_buf();
            let url = url.to_string();

            let extracted = tokio::task::spawn_blocking(move || {
                archive::extract_members(&archive_path, &dest_dir, &url, &targets)
            })
            .await
            .map_err(|e| Error::other(format!("archive extraction task: {e}")))??;

            return Ok(extracted);
        }

        tmp.persist(&bin_path)
            .map_err(|e| Error::other(format!("rename into place: {e}")))?;
        archive::make_executable(&bin_path)?;

        Ok(vec![bin_path])
    }

    /// Archive members needed for a binary's distribution.
    fn files_needed(&self, binary: Binary) -> HashSet<String> {
        let names: &[&str] = match binary {
            Binary::Ffmpeg => &["ffmpeg", "ffprobe"],
            Binary::Deno => &["deno"],
            _ => &[binary.as_str()],
        };

        names.iter().map(|n| n.to_string()).collect()
    }

    /// The filename a binary appears under in its release manifest, per
    /// platform.
    pub fn download_filename(&self, binary: Binary) -> String {
        let (os, arch) = (self.platform.os, self.platform.arch);

        match binary {
            Binary::YtDlp => match (os, arch) {
                ("linux", "arm64") => "yt-dlp_linux_aarch64".to_string(),
                ("linux", _) => "yt-dlp_linux".to_string(),
                _ => "yt-dlp".to_string(),
            },
            Binary::GalleryDl => match (os, arch) {
                ("linux", "arm64") => "gallery-dl_linux_arm64".to_string(),
                ("linux", _) => "gallery-dl_linux_amd64".to_string(),
                _ => "gallery-dl".to_string(),
            },
            Binary::Ffmpeg => match (os, arch) {
                ("linux", "arm64") => "ffmpeg-master-latest-linuxarm64-gpl.tar.xz".to_string(),
                ("linux", _) => "ffmpeg-master-latest-linux64-gpl.tar.xz".to_string(),
                _ => "ffmpeg".to_string(),
            },
            Binary::Deno => match (os, arch) {
                ("linux", "arm64") => "deno-aarch64-unknown-linux-gnu.zip".to_string(),
                ("linux", "amd64") => "deno-x86_64-unknown-linux-gnu.zip".to_string(),
                _ => binary.as_str().to_string(),
            },
            Binary::Ffprobe => binary.as_str().to_string(),
        }
    }

    fn binary_url(&self, binary: Binary) -> String {
        let cfg = &self.cfg;

        let (arm64, amd64) = match binary {
            Binary::YtDlp => (&cfg.ytdlp_linux_arm64, &cfg.ytdlp_linux_amd64),
            Binary::Ffmpeg | Binary::Ffprobe => (&cfg.ffmpeg_linux_arm64, &cfg.ffmpeg_linux_amd64),
            Binary::GalleryDl => (&cfg.gallerydl_linux_arm64, &cfg.gallerydl_linux_amd64),
            Binary::Deno => (&cfg.deno_linux_arm64, &cfg.deno_linux_amd64),
        };

        match (self.platform.os, self.platform.arch) {
            ("linux", "arm64") if !arm64.is_empty() => arm64.clone(),
            _ => amd64.clone(),
        }
    }

    fn saved_sums_path(&self) -> PathBuf {
        self.cfg.bins_dir.join(SAVED_SUMS_FILENAME)
    }

    /// Load the persisted filename->hash map from the previous run.
    pub fn load_saved_sums(&self) -> Result<()> {
        let data = std::fs::read(self.saved_sums_path())?;
        let sums: HashMap<String, String> = serde_json::from_slice(&data)?;

        self.state.write().saved_sums = sums;
        Ok(())
    }

    /// Persist the fetched hashes for the next run; write-then-rename so a
    /// crash never leaves a torn file.
    pub fn save_sums(&self) -> Result<()> {
        let data = {
            let state = self.state.read();
            serde_json::to_vec_pretty(&state.sha_sums)?
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".sha256sums-")
            .tempfile_in(&self.cfg.bins_dir)?;
        tmp.write_all(&data)?;
        tmp.persist(self.saved_sums_path())
            .map_err(|e| Error::other(format!("rename checksums file: {e}")))?;

        let mut state = self.state.write();
        state.saved_sums = state.sha_sums.clone();

        Ok(())
    }

    /// Test and introspection helper: the fetched manifest map.
    pub fn sha_sums(&self) -> HashMap<String, String> {
        self.state.read().sha_sums.clone()
    }

    /// Test and introspection helper: the persisted hash map.
    pub fn saved_sums(&self) -> HashMap<String, String> {
        self.state.read().saved_sums.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_AMD64: Platform = Platform {
        os: "linux",
        arch: "amd64",
    };
    const LINUX_ARM64: Platform = Platform {
        os: "linux",
        arch: "arm64",
    };

    fn manager_at(root: &std::path::Path, platform: Platform) -> DependencyManager {
        let cfg = crate::config::Config::for_testing(root);
        DependencyManager::with_platform(cfg.depmanager, platform)
    }

    fn hash(c: char) -> String {
        std::iter::repeat(c).take(SHA256_HEX_LEN).collect()
    }

    #[test]
    fn parse_sums_skips_malformed_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager_at(tmp.path(), LINUX_AMD64);

        let manifest = format!(
            "{}  yt-dlp_linux\nshort  other\nonly-one-field\n{}  extra file name\n\n{}  gallery-dl_linux_amd64\n",
            hash('a'),
            hash('b'),
            hash('c'),
        );
        mgr.parse_sha_sums(&manifest);

        let sums = mgr.sha_sums();
        assert_eq!(sums.len(), 2);
        assert_eq!(sums["yt-dlp_linux"], hash('a'));
        assert_eq!(sums["gallery-dl_linux_amd64"], hash('c'));
    }

    #[test]
    fn parse_sums_merges_manifests_last_write_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager_at(tmp.path(), LINUX_AMD64);

        mgr.parse_sha_sums(&format!("{}  f1\n", hash('1')));
        mgr.parse_sha_sums(&format!("{}  f2\n{}  f1\n", hash('2'), hash('3')));

        let sums = mgr.sha_sums();
        assert_eq!(sums["f1"], hash('3'));
        assert_eq!(sums["f2"], hash('2'));
    }

    #[test]
    fn download_filenames_follow_platform_table() {
        let tmp = tempfile::tempdir().unwrap();

        let amd = manager_at(tmp.path(), LINUX_AMD64);
        assert_eq!(amd.download_filename(Binary::YtDlp), "yt-dlp_linux");
        assert_eq!(
            amd.download_filename(Binary::Ffmpeg),
            "ffmpeg-master-latest-linux64-gpl.tar.xz"
        );

        let arm = manager_at(tmp.path(), LINUX_ARM64);
        assert_eq!(arm.download_filename(Binary::YtDlp), "yt-dlp_linux_aarch64");
        assert_eq!(
            arm.download_filename(Binary::Deno),
            "deno-aarch64-unknown-linux-gnu.zip"
        );

        let mac = manager_at(
            tmp.path(),
            Platform {
                os: "macos",
                arch: "arm64",
            },
        );
        assert_eq!(mac.download_filename(Binary::YtDlp), "yt-dlp");
    }

    #[test]
    fn find_updates_detects_changed_and_new_hashes() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager_at(tmp.path(), LINUX_AMD64);

        // Saved hash for yt-dlp differs; gallery-dl has no saved hash;
        // ffmpeg hash is unchanged.
        mgr.parse_sha_sums(&format!(
            "{}  yt-dlp_linux\n{}  gallery-dl_linux_amd64\n{}  ffmpeg-master-latest-linux64-gpl.tar.xz\n",
            hash('a'),
            hash('d'),
            hash('f'),
        ));
        {
            let mut state = mgr.state.write();
            state.saved_sums.insert("yt-dlp_linux".to_string(), hash('b'));
            state.saved_sums.insert(
                "ffmpeg-master-latest-linux64-gpl.tar.xz".to_string(),
                hash('f'),
            );
        }

        let updates = mgr.find_updates();
        assert!(updates.contains(&Binary::YtDlp));
        assert!(updates.contains(&Binary::GalleryDl));
        assert!(!updates.contains(&Binary::Ffmpeg));
    }

    #[test]
    fn save_and_load_sums_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager_at(tmp.path(), LINUX_AMD64);
        std::fs::create_dir_all(&mgr.cfg.bins_dir).unwrap();

        mgr.parse_sha_sums(&format!("{}  yt-dlp_linux\n{}  deno.zip\n", hash('a'), hash('b')));
        mgr.save_sums().unwrap();

        // A fresh manager sees exactly what was persisted.
        let other = manager_at(tmp.path(), LINUX_AMD64);
        other.load_saved_sums().unwrap();
        assert_eq!(other.saved_sums(), mgr.sha_sums());
    }

    #[test]
    fn binary_path_is_under_bins_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager_at(tmp.path(), LINUX_AMD64);

        let path = mgr.binary_path(Binary::YtDlp);
        assert!(path.starts_with(&mgr.cfg.bins_dir));
        assert!(path.ends_with("yt-dlp"));
    }

    #[test]
    fn installed_path_unset_until_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager_at(tmp.path(), LINUX_AMD64);

        assert!(mgr.installed_path(Binary::Ffmpeg).is_none());
        mgr.set_bin_path(Binary::Ffmpeg);
        assert_eq!(
            mgr.installed_path(Binary::Ffmpeg),
            Some(mgr.binary_path(Binary::Ffmpeg))
        );
    }
}
