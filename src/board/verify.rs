//! Post-upload archive verification.
//!
//! Computes a SHA-256 digest of the local archive, then asks the board to
//! hash the uploaded copy and compare. The device never sees the archive
//! bytes twice; only the digest crosses the wire.

use crate::board::scripts::DeviceScript;
use crate::board::session::{
    py_str_literal, run, run_file, BoardSession, DEFAULT_PROMPT_TIMEOUT,
};
use crate::error::{Result, ShipError};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Hex SHA-256 of a file, streamed in fixed-size blocks.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify that the uploaded copy of `local_path` at `device_path` matches,
/// failing with [`ShipError::HashMismatch`] when the digests differ.
pub async fn verify_archive<S: BoardSession>(
    session: &mut S,
    local_path: &Path,
    device_path: &str,
) -> Result<()> {
    let expected = sha256_hex(local_path)?;

    session.wait_for_prompt(DEFAULT_PROMPT_TIMEOUT).await?;
    session.enter_raw_mode().await?;

    let staging = tempfile::tempdir()?;
    let helper = DeviceScript::HashCheck.write_to(staging.path())?;
    let result = async {
        let shipped = run_file(session, &helper).await?;
        if !shipped.succeeded() {
            return Err(ShipError::ProtocolError(format!(
                "hash helper failed to load: {}",
                shipped.stderr_str()
            )));
        }
        run(
            session,
            &format!(
                "print(validate_hash({}, b'{expected}'))",
                py_str_literal(device_path)
            ),
        )
        .await
    }
    .await;
    session.exit_raw_mode().await?;

    match result?.stdout_trimmed().as_str() {
        "1" => Ok(()),
        "0" => Err(ShipError::HashMismatch {
            path: device_path.to_string(),
            expected,
        }),
        other => Err(ShipError::ProtocolError(format!(
            "unexpected hash check reply: {other:?}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::testing::FakeBoard;
    use std::io::Write;

    fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        let file = temp_file(b"abc");
        assert_eq!(
            sha256_hex(file.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_verify_matching_upload() {
        let file = temp_file(b"archive bytes");
        let mut board = FakeBoard::new();
        board.put_file("/pkg.tar.gz", b"archive bytes");

        assert!(verify_archive(&mut board, file.path(), "/pkg.tar.gz")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_verify_detects_mismatch() {
        let file = temp_file(b"archive bytes");
        let mut board = FakeBoard::new();
        board.put_file("/pkg.tar.gz", b"different bytes");

        let err = verify_archive(&mut board, file.path(), "/pkg.tar.gz")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShipError::HashMismatch { path, .. } if path == "/pkg.tar.gz"
        ));
    }
}
