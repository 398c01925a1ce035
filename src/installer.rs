//! Package installation onto the board.
//!
//! Drives the upload, verification and extraction of a produced archive,
//! with the overwrite checks in front and the on-board archive cleanup
//! guaranteed behind, whatever happens in between.

use crate::board::extract::extract_archive;
use crate::board::inspect::{self, DEFAULT_LIBRARY_PATH};
use crate::board::scripts::DeviceScript;
use crate::board::session::{
    py_str_literal, run, run_file, BoardSession, DEFAULT_PROMPT_TIMEOUT,
};
use crate::board::verify::verify_archive;
use crate::board::writer::write_file;
use crate::error::{Result, ShipError};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Install behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Replace existing files and folders instead of failing.
    pub overwrite_existing: bool,
}

/// Phases an install moves through. The happy path is
/// `Staged -> Uploaded -> Verified -> Extracted -> Cleaned`; any failure
/// detours through `Cleaning`, which still attempts the on-board cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    /// Archive produced, nothing on the board yet.
    Staged,
    /// Archive bytes transferred.
    Uploaded,
    /// On-device digest matched.
    Verified,
    /// Library tree extracted.
    Extracted,
    /// Cleanup under way after a failure.
    Cleaning,
    /// On-board archive removed.
    Cleaned,
}

impl InstallPhase {
    /// The phase a successful step advances to.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Staged => Self::Uploaded,
            Self::Uploaded => Self::Verified,
            Self::Verified => Self::Extracted,
            Self::Extracted | Self::Cleaning | Self::Cleaned => Self::Cleaned,
        }
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Staged => "staged",
            Self::Uploaded => "uploaded",
            Self::Verified => "verified",
            Self::Extracted => "extracted",
            Self::Cleaning => "cleaning",
            Self::Cleaned => "cleaned",
        };
        write!(f, "{name}")
    }
}

/// Install a produced archive onto the board.
///
/// `package_files` are the target-relative paths the archive carries; their
/// first path components decide which on-device folders the install owns.
pub async fn install_package<S, F>(
    session: &mut S,
    archive_path: &Path,
    package_files: &[String],
    options: InstallOptions,
    on_progress: Option<F>,
) -> Result<()>
where
    S: BoardSession,
    F: FnMut(u8),
{
    let library_path = inspect::library_path(session)
        .await?
        .unwrap_or_else(|| DEFAULT_LIBRARY_PATH.to_string());

    let package_folders: BTreeSet<&str> = package_files
        .iter()
        .filter(|p| p.contains('/'))
        .filter_map(|p| p.split('/').next())
        .collect();
    let loose_files: Vec<&str> = package_files
        .iter()
        .filter(|p| !p.contains('/'))
        .map(String::as_str)
        .collect();

    for file in &loose_files {
        let device_path = format!("{library_path}/{file}");
        if !options.overwrite_existing && path_exists(session, &device_path).await? {
            return Err(ShipError::WouldOverwriteFile(device_path));
        }
    }

    for folder in &package_folders {
        let device_path = format!("{library_path}/{folder}");
        if path_exists(session, &device_path).await? {
            if options.overwrite_existing {
                remove_tree(session, &device_path).await?;
            } else {
                return Err(ShipError::WouldOverwriteFolder(device_path));
            }
        }
    }

    let archive_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ShipError::ArchiveFailed("archive path has no file name".to_string()))?;
    let device_archive = format!("/{archive_name}");

    let mut phase = InstallPhase::Staged;
    let result = transfer_and_extract(
        session,
        archive_path,
        &device_archive,
        &library_path,
        on_progress,
        &mut phase,
    )
    .await;

    if result.is_err() {
        phase = InstallPhase::Cleaning;
        debug!(%phase, "install failed, cleaning up");
    }
    if let Err(cleanup) = session.remove_file(&device_archive).await {
        warn!(archive = %device_archive, error = %cleanup, "failed to remove archive from board");
    }
    result?;

    phase = InstallPhase::Cleaned;
    debug!(%phase, "install finished");
    Ok(())
}

async fn transfer_and_extract<S, F>(
    session: &mut S,
    archive_path: &Path,
    device_archive: &str,
    library_path: &str,
    on_progress: Option<F>,
    phase: &mut InstallPhase,
) -> Result<()>
where
    S: BoardSession,
    F: FnMut(u8),
{
    write_file(session, archive_path, device_archive, on_progress).await?;
    *phase = phase.next();
    debug!(%phase, archive = device_archive, "archive uploaded");

    verify_archive(session, archive_path, device_archive).await?;
    *phase = phase.next();
    debug!(%phase, "archive verified");

    extract_archive(session, device_archive, library_path).await?;
    *phase = phase.next();
    debug!(%phase, library = library_path, "archive extracted");
    Ok(())
}

/// Whether a file or directory exists on the board.
async fn path_exists<S: BoardSession>(session: &mut S, device_path: &str) -> Result<bool> {
    session.wait_for_prompt(DEFAULT_PROMPT_TIMEOUT).await?;
    session.enter_raw_mode().await?;
    let reply = run(
        session,
        &format!(
            "import os\ntry:\n    os.stat({})\n    print(1)\nexcept OSError:\n    print(0)",
            py_str_literal(device_path)
        ),
    )
    .await;
    session.exit_raw_mode().await?;
    Ok(reply?.stdout_trimmed() == "1")
}

/// Remove a directory tree on the board via the recursive-remove helper.
async fn remove_tree<S: BoardSession>(session: &mut S, device_path: &str) -> Result<()> {
    debug!(path = device_path, "removing existing package folder");
    session.wait_for_prompt(DEFAULT_PROMPT_TIMEOUT).await?;
    session.enter_raw_mode().await?;

    let staging = tempfile::tempdir()?;
    let result = async {
        let helper = DeviceScript::RemoveTree.write_to(staging.path())?;
        let shipped = run_file(session, &helper).await?;
        if !shipped.succeeded() {
            return Err(ShipError::ProtocolError(format!(
                "remove helper failed to load: {}",
                shipped.stderr_str()
            )));
        }
        let reply = run(
            session,
            &format!("remove_directory_recursive({})", py_str_literal(device_path)),
        )
        .await?;
        if !reply.succeeded() {
            return Err(ShipError::ProtocolError(format!(
                "failed to remove {device_path}: {}",
                reply.stderr_str()
            )));
        }
        Ok(())
    }
    .await;
    session.exit_raw_mode().await?;
    result
}

// ============================================================================
// Tests
// ============================================================================
