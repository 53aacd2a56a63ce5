use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::{ProvisionError, ProvisionResult};

pub const ZIP_EXTENSIONS: [&str; 2] = [".zip", ".ipa"];
pub const ZIP_MIME_TYPES: [&str; 3] = [
    "application/zip",
    "application/x-zip-compressed",
    "multipart/x-zip",
];
/// Prefix of every scratch directory this crate creates under the work dir.
pub const WORKDIR_PREFIX: &str = "mcloud-app-";

/// Lower-cased extension including the leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn is_archive_path(path: &Path) -> bool {
    ZIP_EXTENSIONS.contains(&extension_of(path).as_str())
}

pub fn has_accepted_extension(path: &Path, accepted: &[String]) -> bool {
    let ext = extension_of(path);
    accepted
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(&ext))
}

/// Creates a fresh scratch directory under `work_dir`.
pub fn new_work_dir(work_dir: &Path) -> ProvisionResult<PathBuf> {
    std::fs::create_dir_all(work_dir)
        .map_err(|err| ProvisionError::io("create work directory", work_dir, err))?;
    let dir = tempfile::Builder::new()
        .prefix(WORKDIR_PREFIX)
        .tempdir_in(work_dir)
        .map_err(|err| ProvisionError::io("create work directory", work_dir, err))?;
    Ok(dir.keep())
}

/// Hex-encoded SHA-256 of the file at `path`.
pub async fn hash_file(path: &Path) -> ProvisionResult<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_blocking(&owned))
        .await
        .map_err(|err| ProvisionError::io("hash", path, io::Error::new(io::ErrorKind::Other, err)))?
}

fn hash_file_blocking(path: &Path) -> ProvisionResult<String> {
    let mut file = File::open(path).map_err(|err| ProvisionError::io("hash", path, err))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|err| ProvisionError::io("hash", path, err))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Picks the candidate with the fewest path components. Ties keep the
/// incoming order.
pub fn select_bundle(mut candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates.sort_by_key(|candidate| candidate.components().count());
    candidates.into_iter().next()
}

/// Extracts `archive` and moves the shallowest item matching `accepted` to
/// `dst_root/<item name>`. Returns the final path.
pub async fn unzip_app(
    archive: &Path,
    dst_root: &Path,
    accepted: &[String],
) -> ProvisionResult<PathBuf> {
    let archive = archive.to_path_buf();
    let dst_root = dst_root.to_path_buf();
    let accepted = accepted.to_vec();
    let archive_for_error = archive.clone();
    tokio::task::spawn_blocking(move || unzip_app_blocking(&archive, &dst_root, &accepted))
        .await
        .map_err(|err| {
            ProvisionError::io(
                "extract",
                archive_for_error,
                io::Error::new(io::ErrorKind::Other, err),
            )
        })?
}

fn unzip_app_blocking(
    archive: &Path,
    dst_root: &Path,
    accepted: &[String],
) -> ProvisionResult<PathBuf> {
    let scratch_parent = dst_root.parent().unwrap_or(dst_root);
    let scratch = tempfile::Builder::new()
        .prefix("mcloud-unzip-")
        .tempdir_in(scratch_parent)
        .map_err(|err| ProvisionError::io("create extraction directory", scratch_parent, err))?;

    let file = File::open(archive).map_err(|err| ProvisionError::io("open archive", archive, err))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|err| ProvisionError::CorruptArchive {
        path: archive.to_path_buf(),
        reason: err.to_string(),
    })?;
    info!(archive = %archive.display(), entries = zip.len(), "unzipping application");
    zip.extract(scratch.path())
        .map_err(|err| ProvisionError::CorruptArchive {
            path: archive.to_path_buf(),
            reason: err.to_string(),
        })?;

    let candidates: Vec<PathBuf> = WalkDir::new(scratch.path())
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| has_accepted_extension(entry.path(), accepted))
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(scratch.path())
                .ok()
                .map(Path::to_path_buf)
        })
        .collect();
    debug!(count = candidates.len(), "matching bundles found in archive");

    let relative = select_bundle(candidates).ok_or_else(|| ProvisionError::BundleNotFound {
        archive: archive.to_path_buf(),
        extensions: accepted.join(", "),
    })?;
    let source = scratch.path().join(&relative);
    let name = relative
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| relative.clone());
    std::fs::create_dir_all(dst_root)
        .map_err(|err| ProvisionError::io("create destination", dst_root, err))?;
    let target = dst_root.join(name);
    std::fs::rename(&source, &target).map_err(|err| ProvisionError::io("move bundle", &source, err))?;
    info!(bundle = %relative.display(), target = %target.display(), "extracted application bundle");
    Ok(target)
}
