//! File fetching into the staging directory.
//!
//! Each manifest entry streams from its (rewritten) source URL to
//! `staging/<target>`, creating intermediate directories on the way. An
//! optional post-processing hook runs on the freshly written file; when it
//! returns a different path (compilation does), the original is removed and
//! the entry's target follows the new name.
//!
//! Downloads within one manifest are issued concurrently and awaited
//! together; failures leave the staging tree in place for the owning
//! pipeline to discard.

use crate::error::{Result, ShipError};
use crate::manifest::{FileEntry, Manifest};
use crate::source::rewrite;
use futures::future::{try_join_all, BoxFuture};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Post-processing hook applied to each fetched file.
pub type PostProcess = Arc<dyn Fn(PathBuf) -> BoxFuture<'static, Result<PathBuf>> + Send + Sync>;

/// A file landed in staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    /// Target-relative path, adjusted when a hook renamed the file.
    pub target: String,
    /// Absolute path under the staging directory.
    pub path: PathBuf,
}

/// Fetch a single manifest entry into `staging`.
pub async fn fetch_file(
    client: &reqwest::Client,
    entry: &FileEntry,
    staging: &Path,
    version: Option<&str>,
    hook: Option<&PostProcess>,
) -> Result<FetchedFile> {
    let url = rewrite(&entry.source, version)?;
    let destination = staging.join(&entry.target);
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    debug!(url, file = %entry.target, "downloading");
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ShipError::DownloadFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    if !response.status().is_success() {
        return Err(ShipError::DownloadFailed {
            url,
            reason: format!("HTTP {}", response.status()),
        });
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| ShipError::DownloadFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    std::fs::write(&destination, &body)?;

    let final_path = match hook {
        Some(process) => {
            let processed = process(destination.clone()).await?;
            if processed != destination {
                std::fs::remove_file(&destination)?;
            }
            processed
        }
        None => destination,
    };

    let target = final_path
        .strip_prefix(staging)
        .map_err(|_| {
            ShipError::DownloadFailed {
                url: entry.source.clone(),
                reason: format!(
                    "post-processed file {} escaped the staging directory",
                    final_path.display()
                ),
            }
        })?
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    Ok(FetchedFile {
        target,
        path: final_path,
    })
}

/// Fetch every file of a manifest concurrently, preserving declared order
/// in the result.
pub async fn fetch_manifest_files(
    client: &reqwest::Client,
    manifest: &Manifest,
    staging: &Path,
    version: Option<&str>,
    hook: Option<&PostProcess>,
) -> Result<Vec<FetchedFile>> {
    try_join_all(
        manifest
            .urls
            .iter()
            .map(|entry| fetch_file(client, entry, staging, version, hook)),
    )
    .await
}

// ============================================================================
// Tests
// ============================================================================
