//! Board session facade.
//!
//! Thin contract over the board's interactive interpreter. The underlying
//! serial framing and prompt protocol live outside this crate; a session
//! implementation only has to move complete statements in and raw framed
//! replies out. Everything above (inspector, chunked writer, verifier,
//! extractor, installer) is generic over [`BoardSession`].
//!
//! # Reply framing
//!
//! Every raw reply has the shape `"OK" <stdout> 0x04 <stderr> 0x04 ">"`.
//! [`Reply::parse`] validates a complete buffer; [`ReplyParser`] buffers an
//! incoming byte stream until the closing `>` for implementations reading
//! from a duplex channel.

use crate::error::{Result, ShipError};
use std::path::Path;
use std::time::Duration;

/// Default window to wait for an interpreter prompt.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(3);

/// Separator between stdout and stderr in a raw reply.
const REPLY_SEPARATOR: u8 = 0x04;

/// The interactive interpreter connection to the device.
///
/// Implementations own the byte channel. All operations are strictly
/// sequential: each returns only after the previous reply is fully consumed.
#[allow(async_fn_in_trait)]
pub trait BoardSession {
    /// Whether the underlying channel is open.
    fn is_open(&self) -> bool;

    /// Wait for the interpreter prompt, failing with
    /// [`ShipError::PromptTimeout`] after `timeout`.
    async fn wait_for_prompt(&mut self, timeout: Duration) -> Result<()>;

    /// Switch the interpreter to raw execution mode.
    async fn enter_raw_mode(&mut self) -> Result<()>;

    /// Leave raw execution mode.
    async fn exit_raw_mode(&mut self) -> Result<()>;

    /// Execute a complete statement, returning the raw framed reply.
    async fn exec_statement(&mut self, statement: &str) -> Result<Vec<u8>>;

    /// Ship a host-local helper file to the interpreter and run it,
    /// returning the raw framed reply.
    async fn exec_file(&mut self, host_path: &Path) -> Result<Vec<u8>>;

    /// Remove a file from the device filesystem.
    async fn remove_file(&mut self, device_path: &str) -> Result<()>;

    /// Close the session.
    async fn close(&mut self) -> Result<()>;
}

/// Execute a statement and parse its reply.
pub async fn run<S: BoardSession>(session: &mut S, statement: &str) -> Result<Reply> {
    let raw = session.exec_statement(statement).await?;
    Reply::parse(&raw)
}

/// Ship and run a helper file, parsing its reply.
pub async fn run_file<S: BoardSession>(session: &mut S, host_path: &Path) -> Result<Reply> {
    let raw = session.exec_file(host_path).await?;
    Reply::parse(&raw)
}

// ============================================================================
// Reply parsing
// ============================================================================

/// A parsed raw-mode reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Bytes the statement printed to stdout.
    pub stdout: Vec<u8>,
    /// Bytes the statement printed to stderr (tracebacks land here).
    pub stderr: Vec<u8>,
}

impl Reply {
    /// Parse a complete raw reply, stripping the `OK` prefix and the
    /// separator/prompt suffix. Any other shape is a protocol error.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < 5 || &raw[..2] != b"OK" {
            return Err(ShipError::ProtocolError(format!(
                "reply does not start with OK: {:?}",
                String::from_utf8_lossy(&raw[..raw.len().min(16)])
            )));
        }
        if raw[raw.len() - 1] != b'>' || raw[raw.len() - 2] != REPLY_SEPARATOR {
            return Err(ShipError::ProtocolError(
                "reply is missing the separator/prompt suffix".to_string(),
            ));
        }
        let body = &raw[2..raw.len() - 2];
        let split = body
            .iter()
            .position(|&b| b == REPLY_SEPARATOR)
            .ok_or_else(|| {
                ShipError::ProtocolError("reply has no stdout/stderr separator".to_string())
            })?;
        Ok(Self {
            stdout: body[..split].to_vec(),
            stderr: body[split + 1..].to_vec(),
        })
    }

    /// Stdout as lossy UTF-8.
    #[must_use]
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout with the trailing `\r\n` a remote `print()` appends removed.
    #[must_use]
    pub fn stdout_trimmed(&self) -> String {
        let mut s = self.stdout_str();
        if s.ends_with('\n') {
            s.pop();
            if s.ends_with('\r') {
                s.pop();
            }
        }
        s
    }

    /// Stderr as lossy UTF-8.
    #[must_use]
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Whether the statement completed without writing to stderr.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.stderr.is_empty()
    }
}

/// Buffers reply bytes from a duplex channel until the closing `>`.
#[derive(Debug, Default)]
pub struct ReplyParser {
    buf: Vec<u8>,
}

impl ReplyParser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes from the channel. Returns the parsed reply once the
    /// closing prompt has been seen, or an immediate error when the buffer
    /// cannot start a valid reply.
    pub fn push(&mut self, bytes: &[u8]) -> Option<Result<Reply>> {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() >= 2 && &self.buf[..2] != b"OK" {
            return Some(Err(ShipError::ProtocolError(format!(
                "reply does not start with OK: {:?}",
                String::from_utf8_lossy(&self.buf[..self.buf.len().min(16)])
            ))));
        }
        let separators = self.buf.iter().filter(|&&b| b == REPLY_SEPARATOR).count();
        if separators >= 2 && self.buf.last() == Some(&b'>') {
            return Some(Reply::parse(&self.buf));
        }
        None
    }
}

// ============================================================================
// Python literal quoting
// ============================================================================

/// Quote a string as a python literal, escaping anything that could break
/// out of the quotes. User-influenced values (device paths, archive names)
/// must pass through here before landing in a statement.
#[must_use]
pub fn py_str_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if (' '..='~').contains(&c) => out.push(c),
            c => {
                for unit in c.to_string().bytes() {
                    out.push_str(&format!("\\x{unit:02x}"));
                }
            }
        }
    }
    out.push('\'');
    out
}

/// Quote raw bytes as a python bytes literal with `\xNN` escapes throughout,
/// safe for arbitrary binary payloads.
#[must_use]
pub fn py_bytes_literal(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 3);
    out.push_str("b'");
    for byte in data {
        out.push_str(&format!("\\x{byte:02x}"));
    }
    out.push('\'');
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Reply Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_reply_parse_stdout_and_empty_stderr() {
        let reply = Reply::parse(b"OK1\r\n\x04\x04>").unwrap();
        assert_eq!(reply.stdout, b"1\r\n");
        assert!(reply.stderr.is_empty());
        assert!(reply.succeeded());
        assert_eq!(reply.stdout_trimmed(), "1");
    }

    #[test]
    fn test_reply_parse_with_stderr() {
        let reply = Reply::parse(b"OK\x04Traceback: OSError\x04>").unwrap();
        assert!(reply.stdout.is_empty());
        assert_eq!(reply.stderr_str(), "Traceback: OSError");
        assert!(!reply.succeeded());
    }

    #[test]
    fn test_reply_parse_rejects_missing_ok() {
        let err = Reply::parse(b"ERR\x04\x04>").unwrap_err();
        assert!(matches!(err, ShipError::ProtocolError(_)));
    }

    #[test]
    fn test_reply_parse_rejects_truncated() {
        assert!(Reply::parse(b"OK1\x04").is_err());
        assert!(Reply::parse(b"OK").is_err());
    }

    #[test]
    fn test_reply_trim_only_one_newline() {
        let reply = Reply::parse(b"OKa\r\nb\r\n\x04\x04>").unwrap();
        assert_eq!(reply.stdout_trimmed(), "a\r\nb");
    }

    // -------------------------------------------------------------------------
    // ReplyParser Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_parser_buffers_until_prompt() {
        let mut parser = ReplyParser::new();
        assert!(parser.push(b"OK12").is_none());
        assert!(parser.push(b"8\r\n\x04").is_none());
        let reply = parser.push(b"\x04>").unwrap().unwrap();
        assert_eq!(reply.stdout_trimmed(), "128");
    }

    #[test]
    fn test_parser_rejects_bad_prefix_early() {
        let mut parser = ReplyParser::new();
        let result = parser.push(b"raise SystemExit").unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_parser_ignores_early_prompt_bytes_in_stdout() {
        // A '>' inside stdout must not complete the reply before the
        // separators arrive.
        let mut parser = ReplyParser::new();
        assert!(parser.push(b"OK>foo>").is_none());
        let reply = parser.push(b"\x04\x04>").unwrap().unwrap();
        assert_eq!(reply.stdout, b">foo>");
    }

    // -------------------------------------------------------------------------
    // Quoting Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_py_str_literal_plain() {
        assert_eq!(py_str_literal("/lib/modulino"), "'/lib/modulino'");
    }

    #[test]
    fn test_py_str_literal_escapes_quotes() {
        assert_eq!(py_str_literal("a'b"), "'a\\'b'");
        assert_eq!(py_str_literal("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_py_str_literal_escapes_control() {
        assert_eq!(py_str_literal("a\nb"), "'a\\nb'");
    }

    #[test]
    fn test_py_bytes_literal() {
        assert_eq!(py_bytes_literal(&[0x00, 0xff, b'A']), "b'\\x00\\xff\\x41'");
    }
}
