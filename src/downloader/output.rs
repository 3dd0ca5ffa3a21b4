//! Extractor output parsing.
//!
//! yt-dlp is run with per-item JSON printing plus a `--print
//! after_move:filepath` directive, so its stdout interleaves one JSON
//! object per downloaded item with bare filepath lines. The parser walks
//! the buffered stdout line by line: JSON objects open a new result, and a
//! filepath line is attached to the most recent result. A filepath line
//! arriving before any result is dropped.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::Artifact;
use crate::utils::fingerprint;

/// Matches yt-dlp progress lines such as `[download]  42.1% of ~120MiB`.
static DOWNLOAD_PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+(\d+\.?\d*)%").unwrap());

/// Matches gallery-dl progress counters such as `# 3/12`.
static GALLERY_PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s*(\d+)/(\d+)").unwrap());

/// Heuristic for a bare filepath line: not JSON, ends in a short extension.
static FILE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[^\{\[\n].*\.[a-z0-9]{1,6}$").unwrap());

/// One JSON object printed by the media extractor for a downloaded item.
///
/// Every field is optional; the extractor omits or nulls whatever a given
/// site does not provide.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractorResult {
    #[serde(rename = "_type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub extractor: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub view_count: Option<f64>,
    #[serde(default)]
    pub like_count: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
    /// Set from the following filepath line, not from the JSON itself.
    #[serde(skip)]
    pub filename: Option<PathBuf>,
}

/// The top-level object printed by the describe invocation (`-J`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribeResult {
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub formats: Option<Vec<DescribeFormat>>,
}

/// One entry of the describe output's format list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribeFormat {
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
}

impl DescribeResult {
    /// Largest reported size across the formats, 0 when unknown.
    pub fn max_format_size(&self) -> u64 {
        let own = self.filesize.or(self.filesize_approx).unwrap_or(0);

        self.formats
            .iter()
            .flatten()
            .map(|f| f.filesize.or(f.filesize_approx).unwrap_or(0))
            .chain(std::iter::once(own))
            .max()
            .unwrap_or(0)
    }
}

/// Extract the percentage from a progress line, floored to an integer.
pub fn parse_download_progress(line: &str) -> Option<u8> {
    let caps = DOWNLOAD_PROGRESS_RE.captures(line)?;
    let pct: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(pct.floor().min(100.0) as u8)
}

/// Extract the percentage from a `# N/M` gallery progress line.
pub fn parse_gallery_progress(line: &str) -> Option<u8> {
    let caps = GALLERY_PROGRESS_RE.captures(line)?;
    let current: f64 = caps.get(1)?.as_str().parse().ok()?;
    let total: f64 = caps.get(2)?.as_str().parse().ok()?;
    if total == 0.0 {
        return None;
    }

    Some((current / total * 100.0).min(100.0) as u8)
}

/// True when the line looks like a bare filepath rather than JSON or a log.
pub fn is_file_path_line(line: &str) -> bool {
    FILE_PATH_RE.is_match(line)
}

/// Parse buffered extractor stdout into the ordered result sequence.
pub fn parse_stdout(stdout: &str) -> Vec<ExtractorResult> {
    let mut results: Vec<ExtractorResult> = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Ok(result) = serde_json::from_str::<ExtractorResult>(line) {
            results.push(result);
            continue;
        }

        if is_file_path_line(line) {
            // Belongs to the most recent JSON result; dropped when none
            // has been seen yet.
            if let Some(last) = results.last_mut() {
                last.filename = Some(PathBuf::from(line));
            }
        }
    }

    results
}

/// Map parsed results 1:1 into artifacts, stat-ing each file for its size.
pub async fn compose_artifacts(results: Vec<ExtractorResult>) -> Vec<Artifact> {
    let mut artifacts = Vec::with_capacity(results.len());

    for result in results {
        let filename = result.filename.clone().unwrap_or_default();
        let file_size = stat_size(&filename).await;

        artifacts.push(Artifact {
            id: artifact_id(result.id.as_deref().unwrap_or_default(), &filename),
            source_id: result.id.unwrap_or_default(),
            kind: result.item_type.unwrap_or_else(|| "video".to_string()),
            platform: result.extractor.unwrap_or_default(),
            channel: result.channel.unwrap_or_default(),
            author: result.uploader.unwrap_or_default(),
            title: result.title.unwrap_or_default(),
            description: result.description.unwrap_or_default(),
            webpage_url: result.webpage_url.unwrap_or_default(),
            thumbnail_url: result.thumbnail.unwrap_or_default(),
            view_count: result.view_count.map(|v| v.round().max(0.0) as u64).unwrap_or(0),
            like_count: result.like_count.map(|v| v.round().max(0.0) as u64).unwrap_or(0),
            filename,
            file_size,
            duration_seconds: result.duration.map(|v| v.round().max(0.0) as u64).unwrap_or(0),
            width: result.width.unwrap_or(0),
            height: result.height.unwrap_or(0),
        });
    }

    artifacts
}

/// Tail of the buffered stderr, for wrapping into process failures.
pub fn stderr_excerpt(stderr: &str) -> String {
    const MAX_LEN: usize = 1024;

    let trimmed = stderr.trim();
    if trimmed.len() <= MAX_LEN {
        return trimmed.to_string();
    }

    let start = trimmed.len() - MAX_LEN;
    // Avoid splitting a UTF-8 sequence.
    let start = (start..trimmed.len())
        .find(|&i| trimmed.is_char_boundary(i))
        .unwrap_or(start);
    format!("...{}", &trimmed[start..])
}

/// Stable artifact id from the source item id and the on-disk path.
pub fn artifact_id(source_id: &str, filename: &Path) -> Uuid {
    fingerprint::uuid_v5(source_id, &filename.to_string_lossy())
}

/// File size at composition time; a missing file is size 0, not an error.
pub async fn stat_size(path: &Path) -> u64 {
    if path.as_os_str().is_empty() {
        return 0;
    }

    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
