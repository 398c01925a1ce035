//! On-board archive extraction.
//!
//! Ships the extraction helper (and a ustar fallback when the board has no
//! importable tar module), runs `untar(archive, dest)`, and maps the trace
//! output back to results. The helper prints `Creating directory <path>`
//! for every directory it creates and the literal `Extraction complete`
//! sentinel on success; a missing sentinel is a failure.

use crate::board::scripts::DeviceScript;
use crate::board::session::{
    py_str_literal, run, run_file, BoardSession, Reply, DEFAULT_PROMPT_TIMEOUT,
};
use crate::error::{Result, ShipError};

/// Literal the helper prints when every entry has been written.
pub const EXTRACTION_SENTINEL: &str = "Extraction complete";

/// Prefix of the per-directory trace lines.
const CREATING_DIR_PREFIX: &str = "Creating directory ";

/// Extract the uploaded archive into `dest_dir` on the board.
///
/// Returns the directories the helper created. An `EEXIST` collision maps
/// to [`ShipError::PackageAlreadyInstalled`] naming the colliding path.
pub async fn extract_archive<S: BoardSession>(
    session: &mut S,
    device_archive: &str,
    dest_dir: &str,
) -> Result<Vec<String>> {
    session.wait_for_prompt(DEFAULT_PROMPT_TIMEOUT).await?;
    session.enter_raw_mode().await?;

    let staging = tempfile::tempdir()?;
    let result = async {
        let probe = run(
            session,
            "try:\n    import tarfile\n    print(1)\nexcept ImportError:\n    print(0)",
        )
        .await?;
        if probe.stdout_trimmed() == "0" {
            let fallback = DeviceScript::TarFallback.write_to(staging.path())?;
            expect_clean(&run_file(session, &fallback).await?)?;
        }

        let helper = DeviceScript::Untar.write_to(staging.path())?;
        expect_clean(&run_file(session, &helper).await?)?;

        run(
            session,
            &format!(
                "untar({}, {})",
                py_str_literal(device_archive),
                py_str_literal(dest_dir)
            ),
        )
        .await
    }
    .await;
    session.exit_raw_mode().await?;

    interpret(&result?)
}

/// Map the extraction trace to a result.
fn interpret(reply: &Reply) -> Result<Vec<String>> {
    let stdout = reply.stdout_str();
    let created: Vec<String> = stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(CREATING_DIR_PREFIX))
        .map(ToString::to_string)
        .collect();

    let stderr = reply.stderr_str();
    if stderr.contains("EEXIST") || stderr.contains("[Errno 17]") {
        let path = created
            .last()
            .cloned()
            .unwrap_or_else(|| "<unknown>".to_string());
        return Err(ShipError::PackageAlreadyInstalled { path });
    }

    let completed = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        == Some(EXTRACTION_SENTINEL);
    if !completed {
        return Err(ShipError::ExtractFailed(if stderr.is_empty() {
            "extractor finished without the completion sentinel".to_string()
        } else {
            stderr
        }));
    }

    Ok(created)
}

fn expect_clean(reply: &Reply) -> Result<()> {
    if reply.succeeded() {
        Ok(())
    } else {
        Err(ShipError::ProtocolError(format!(
            "helper failed to load: {}",
            reply.stderr_str()
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================
