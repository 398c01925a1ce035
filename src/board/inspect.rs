//! Board inspection queries.
//!
//! Each query acquires the prompt, switches to raw mode, runs a single
//! statement, and leaves raw mode again. [`inspect`] captures the full
//! [`BoardCaps`] snapshot in one pass; the snapshot is read-only afterwards.

use crate::board::session::{run, BoardSession, DEFAULT_PROMPT_TIMEOUT};
use crate::error::{Result, ShipError};
use serde::{Deserialize, Serialize};

/// Library directory used when the board does not report one.
pub const DEFAULT_LIBRARY_PATH: &str = "/lib";

/// Snapshot of board traits, captured once per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardCaps {
    /// Bytecode architecture (e.g. `xtensa`), when reported.
    pub architecture: Option<String>,
    /// Bytecode format major version, when reported.
    pub mpy_format: Option<u8>,
    /// Interpreter release, without build suffixes.
    pub interpreter_version: Option<String>,
    /// First module-search-path entry containing `/lib`, when present.
    pub library_path: Option<String>,
}

impl BoardCaps {
    /// The on-device library directory, defaulting to `/lib`.
    #[must_use]
    pub fn library_path_or_default(&self) -> &str {
        self.library_path.as_deref().unwrap_or(DEFAULT_LIBRARY_PATH)
    }
}

/// Capture every board trait in one session pass.
pub async fn inspect<S: BoardSession>(session: &mut S) -> Result<BoardCaps> {
    Ok(BoardCaps {
        architecture: architecture(session).await?,
        mpy_format: mpy_format(session).await?,
        interpreter_version: interpreter_version(session).await?,
        library_path: library_path(session).await?,
    })
}

/// Bytecode architecture from the platform string: the third `-`-separated
/// field, or the fourth when the third is the literal `preview`.
pub async fn architecture<S: BoardSession>(session: &mut S) -> Result<Option<String>> {
    let platform = query(session, "import platform\nprint(platform.platform())").await?;
    let fields: Vec<&str> = platform.split('-').collect();
    let arch = match fields.get(2) {
        Some(&"preview") => fields.get(3),
        other => other,
    };
    Ok(arch.filter(|a| !a.is_empty()).map(|a| (*a).to_string()))
}

/// Bytecode format major version, `None` when the board reports none.
pub async fn mpy_format<S: BoardSession>(session: &mut S) -> Result<Option<u8>> {
    let raw = query(
        session,
        "import sys\nprint(getattr(sys.implementation, '_mpy', 0) & 0xff)",
    )
    .await?;
    let value: u8 = raw.trim().parse().map_err(|_| {
        ShipError::ProtocolError(format!("unexpected mpy format reply: {raw:?}"))
    })?;
    Ok((value != 0).then_some(value))
}

/// Interpreter release with any `-` suffix removed.
pub async fn interpreter_version<S: BoardSession>(session: &mut S) -> Result<Option<String>> {
    let release = query(session, "import os\nprint(os.uname().release)").await?;
    let version = release
        .split('-')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    Ok((!version.is_empty()).then_some(version))
}

/// First module search path entry containing `/lib`.
pub async fn library_path<S: BoardSession>(session: &mut S) -> Result<Option<String>> {
    let paths = query(session, "import sys\nfor p in sys.path:\n    print(p)").await?;
    Ok(paths
        .lines()
        .map(str::trim)
        .find(|line| line.contains("/lib"))
        .map(ToString::to_string))
}

/// Run one statement inside a prompt/raw-mode bracket.
async fn query<S: BoardSession>(session: &mut S, statement: &str) -> Result<String> {
    session.wait_for_prompt(DEFAULT_PROMPT_TIMEOUT).await?;
    session.enter_raw_mode().await?;
    let reply = run(session, statement).await;
    session.exit_raw_mode().await?;
    let reply = reply?;
    if !reply.succeeded() {
        return Err(ShipError::ProtocolError(format!(
            "board query failed: {}",
            reply.stderr_str()
        )));
    }
    Ok(reply.stdout_trimmed())
}

// ============================================================================
// Tests
// ============================================================================
