//! Bytecode compiler adapter.
//!
//! Wraps the external `mpy-cross` binary as an opaque subprocess. The
//! compiler is an optional capability: [`MpyCross::locate`] returns `None`
//! when no binary sits next to the running tool, and the pipeline then
//! ships raw source instead of bytecode.

use crate::error::{Result, ShipError};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Marker preceding the format number in `mpy-cross --version` output.
const VERSION_MARKER: &str = "emitting mpy v";

/// Handle to a located `mpy-cross` binary.
#[derive(Debug, Clone)]
pub struct MpyCross {
    binary: PathBuf,
}

impl MpyCross {
    /// Wrap an explicit compiler binary path.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Look for the compiler at its well-known location next to the
    /// running executable. `None` means the capability is absent.
    #[must_use]
    pub fn locate() -> Option<Self> {
        let name = if cfg!(windows) {
            "mpy-cross.exe"
        } else {
            "mpy-cross"
        };
        let candidate = std::env::current_exe().ok()?.parent()?.join(name);
        candidate.is_file().then(|| Self::new(candidate))
    }

    /// Path of the wrapped binary.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// The bytecode format major version this compiler emits.
    pub async fn format_version(&self) -> Result<u8> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| ShipError::CompileFailed {
                file: self.binary.clone(),
                reason: e.to_string(),
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_format_version(&stdout).ok_or_else(|| ShipError::CompileFailed {
            file: self.binary.clone(),
            reason: format!("no '{VERSION_MARKER}<n>' in version output: {stdout:?}"),
        })
    }

    /// Whether this compiler emits the board's bytecode format.
    pub async fn supports(&self, board_format: u8) -> bool {
        matches!(self.format_version().await, Ok(v) if v == board_format)
    }

    /// Compile `file` to bytecode, returning the `.mpy` output path.
    ///
    /// Files already ending in `.mpy` pass through unchanged. When `base`
    /// is given the compiler runs with that working directory so the source
    /// path embedded in the output stays relative. `arch` becomes a
    /// `-march=` flag when known.
    pub async fn compile(
        &self,
        file: &Path,
        base: Option<&Path>,
        arch: Option<&str>,
    ) -> Result<PathBuf> {
        if file.extension().is_some_and(|ext| ext == "mpy") {
            return Ok(file.to_path_buf());
        }
        let output_path = file.with_extension("mpy");
        let source = base
            .and_then(|b| file.strip_prefix(b).ok())
            .unwrap_or(file);

        let mut command = Command::new(&self.binary);
        if let Some(cwd) = base {
            command.current_dir(cwd);
        }
        if let Some(arch) = arch {
            command.arg(format!("-march={arch}"));
        }
        command.arg("-o").arg(&output_path).arg(source);

        debug!(file = %file.display(), output = %output_path.display(), "compiling");
        let result = command.output().await.map_err(|e| ShipError::CompileFailed {
            file: file.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !result.status.success() {
            return Err(ShipError::CompileFailed {
                file: file.to_path_buf(),
                reason: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }
        Ok(output_path)
    }
}

fn parse_format_version(output: &str) -> Option<u8> {
    let rest = &output[output.find(VERSION_MARKER)? + VERSION_MARKER.len()..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

// ============================================================================
// Tests
// ============================================================================
