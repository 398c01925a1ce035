//! Chunked file upload with per-chunk CRC verification.
//!
//! The destination is opened once on the board; every chunk travels with a
//! big-endian CRC32 suffix and is committed only after the on-device
//! `validate_crc` helper confirms it. A mismatch halves the chunk size and
//! retries the same offset, so a noisy link degrades instead of corrupting
//! the upload; the size never grows again within one call.

use crate::board::scripts::DeviceScript;
use crate::board::session::{
    py_bytes_literal, py_str_literal, run, run_file, BoardSession, DEFAULT_PROMPT_TIMEOUT,
};
use crate::error::{Result, ShipError};
use std::path::Path;
use tracing::debug;

/// Chunk size the transfer starts at.
pub const INITIAL_CHUNK_SIZE: usize = 512;

/// Outcome of a completed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Bytes committed to the device file.
    pub bytes_written: u64,
    /// How many times the chunk size was halved.
    pub chunk_shrinks: u32,
}

/// Write a local file to `device_path`, chunk by chunk.
///
/// `on_progress` receives the transfer percentage, and only when the integer
/// value changes.
pub async fn write_file<S, F>(
    session: &mut S,
    local_path: &Path,
    device_path: &str,
    mut on_progress: Option<F>,
) -> Result<TransferStats>
where
    S: BoardSession,
    F: FnMut(u8),
{
    let data = std::fs::read(local_path)?;

    session.wait_for_prompt(DEFAULT_PROMPT_TIMEOUT).await?;
    session.enter_raw_mode().await?;

    let staging = tempfile::tempdir()?;
    let helper = DeviceScript::CrcCheck.write_to(staging.path())?;
    let result = async {
        expect_clean(&run_file(session, &helper).await?)?;
        expect_clean(
            &run(
                session,
                &format!("f = open({}, 'wb')\nw = f.write", py_str_literal(device_path)),
            )
            .await?,
        )?;
        transfer(session, &data, &mut on_progress).await
    }
    .await;

    match result {
        Ok(stats) => {
            expect_clean(&run(session, "f.close()").await?)?;
            session.exit_raw_mode().await?;
            Ok(stats)
        }
        Err(err) => {
            let _ = run(session, "f.close()").await;
            let _ = session.exit_raw_mode().await;
            Err(err)
        }
    }
}

async fn transfer<S, F>(
    session: &mut S,
    data: &[u8],
    on_progress: &mut Option<F>,
) -> Result<TransferStats>
where
    S: BoardSession,
    F: FnMut(u8),
{
    let mut offset = 0usize;
    let mut chunk_size = INITIAL_CHUNK_SIZE;
    let mut shrinks = 0u32;
    let mut last_pct: Option<u8> = None;

    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        let chunk = &data[offset..end];

        let mut payload = Vec::with_capacity(chunk.len() + 4);
        payload.extend_from_slice(chunk);
        payload.extend_from_slice(&crc32fast::hash(chunk).to_be_bytes());

        let check = run(
            session,
            &format!(
                "d = {}\nprint(1 if validate_crc(d) else 0)",
                py_bytes_literal(&payload)
            ),
        )
        .await?;

        match check.stdout_trimmed().as_str() {
            "1" => {
                expect_clean(&run(session, "w(d[:-4])").await?)?;
                offset = end;

                if let Some(callback) = on_progress.as_mut() {
                    let pct = (offset * 100 / data.len()) as u8;
                    if last_pct != Some(pct) {
                        last_pct = Some(pct);
                        callback(pct);
                    }
                }
            }
            "0" => {
                chunk_size /= 2;
                shrinks += 1;
                debug!(offset, chunk_size, "chunk size reduced after CRC mismatch");
                if chunk_size < 1 {
                    return Err(ShipError::ChunkCorruption {
                        offset: offset as u64,
                        end: end as u64,
                    });
                }
            }
            other => {
                return Err(ShipError::ProtocolError(format!(
                    "unexpected CRC check reply: {other:?}"
                )));
            }
        }
    }

    Ok(TransferStats {
        bytes_written: offset as u64,
        chunk_shrinks: shrinks,
    })
}

fn expect_clean(reply: &crate::board::session::Reply) -> Result<()> {
    if reply.succeeded() {
        Ok(())
    } else {
        Err(ShipError::ProtocolError(format!(
            "board statement failed: {}",
            reply.stderr_str()
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================
