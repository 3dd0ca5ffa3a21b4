//! Selective archive extraction for binary installs.
//!
//! Upstream releases ship some binaries inside archives (ffmpeg builds as
//! `.tar.xz`, deno as `.zip`). Only the expected member names are
//! extracted, flattened into the destination directory with executable
//! permissions.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;
use xz2::read::XzDecoder;

use crate::{Error, Result};

#[cfg(unix)]
const EXECUTABLE_MODE: u32 = 0o755;

/// Whether a download URL points at an archive we know how to unpack.
pub fn is_archive(url: &str) -> bool {
    url.ends_with(".zip") || url.ends_with(".tar.xz") || url.ends_with(".tar.gz")
}

/// Extract exactly the members whose base filename is in `targets`,
/// writing each to `dest_dir/<member>`. Fails when nothing matched.
pub fn extract_members(
    archive_path: &Path,
    dest_dir: &Path,
    url: &str,
    targets: &HashSet<String>,
) -> Result<Vec<PathBuf>> {
    if url.ends_with(".zip") {
        extract_from_zip(archive_path, dest_dir, targets)
    } else if url.ends_with(".tar.xz") {
        let file = File::open(archive_path)?;
        extract_tar_selected(XzDecoder::new(file), dest_dir, targets)
    } else if url.ends_with(".tar.gz") {
        let file = File::open(archive_path)?;
        extract_tar_selected(GzDecoder::new(file), dest_dir, targets)
    } else {
        Err(Error::ArchiveUnsupported(url.to_string()))
    }
}

fn extract_from_zip(
    zip_path: &Path,
    dest_dir: &Path,
    targets: &HashSet<String>,
) -> Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(File::open(zip_path)?)
        .map_err(|e| Error::other(format!("open zip: {e}")))?;

    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::other(format!("read zip entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }

        let Some(filename) = base_name(entry.name()) else {
            continue;
        };
        if !targets.contains(&filename) {
            continue;
        }

        let dest = dest_dir.join(&filename);
        let mut out = File::create(&dest)?;
        std::io::copy(&mut entry, &mut out)?;
        make_executable(&dest)?;

        debug!(member = %filename, "extracted archive member");
        extracted.push(dest);

        if extracted.len() == targets.len() {
            return Ok(extracted);
        }
    }

    if extracted.is_empty() {
        return Err(Error::other("no target files found in zip archive"));
    }

    Ok(extracted)
}

fn extract_tar_selected<R: Read>(
    reader: R,
    dest_dir: &Path,
    targets: &HashSet<String>,
) -> Result<Vec<PathBuf>> {
    let mut archive = tar::Archive::new(reader);
    let mut extracted = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        let Some(filename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !targets.contains(&filename) {
            continue;
        }

        let dest = dest_dir.join(&filename);
        let mut out = File::create(&dest)?;
        std::io::copy(&mut entry, &mut out)?;
        make_executable(&dest)?;

        debug!(member = %filename, "extracted archive member");
        extracted.push(dest);

        if extracted.len() == targets.len() {
            return Ok(extracted);
        }
    }

    if extracted.is_empty() {
        return Err(Error::other("no target files found in tar archive"));
    }

    Ok(extracted)
}

fn base_name(entry_name: &str) -> Option<String> {
    Path::new(entry_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(EXECUTABLE_MODE))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn targets(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        for (name, data) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_tar_xz(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = xz2::write::XzEncoder::new(file, 6);
        let mut builder = tar::Builder::new(encoder);

        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn zip_extracts_only_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bundle.zip");
        write_zip(&archive, &[("bin/ffmpeg", b"F"), ("docs/README", b"R")]);

        let out = extract_members(&archive, tmp.path(), "https://x/bundle.zip", &targets(&["ffmpeg"]))
            .unwrap();

        assert_eq!(out, vec![tmp.path().join("ffmpeg")]);
        assert!(!tmp.path().join("README").exists());
    }

    #[test]
    fn tar_gz_extracts_nested_members() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bundle.tar.gz");
        write_tar_gz(
            &archive,
            &[("release/bin/ffmpeg", b"F"), ("release/bin/ffprobe", b"P")],
        );

        let out = extract_members(
            &archive,
            tmp.path(),
            "https://x/bundle.tar.gz",
            &targets(&["ffmpeg", "ffprobe"]),
        )
        .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(std::fs::read(tmp.path().join("ffprobe")).unwrap(), b"P");
    }

    #[test]
    fn tar_xz_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bundle.tar.xz");
        write_tar_xz(&archive, &[("deno", b"D")]);

        let out =
            extract_members(&archive, tmp.path(), "https://x/bundle.tar.xz", &targets(&["deno"]))
                .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(std::fs::read(tmp.path().join("deno")).unwrap(), b"D");
    }

    #[test]
    fn missing_targets_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bundle.zip");
        write_zip(&archive, &[("something-else", b"X")]);

        let err = extract_members(&archive, tmp.path(), "https://x/bundle.zip", &targets(&["ffmpeg"]))
            .unwrap_err();
        assert!(err.to_string().contains("no target files"));
    }

    #[test]
    fn unknown_suffix_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bundle.rar");
        std::fs::write(&archive, b"not really").unwrap();

        assert!(matches!(
            extract_members(&archive, tmp.path(), "https://x/bundle.rar", &targets(&["ffmpeg"])),
            Err(Error::ArchiveUnsupported(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn extracted_members_are_executable() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bundle.zip");
        write_zip(&archive, &[("ffmpeg", b"F")]);

        extract_members(&archive, tmp.path(), "https://x/bundle.zip", &targets(&["ffmpeg"]))
            .unwrap();

        let mode = std::fs::metadata(tmp.path().join("ffmpeg"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
