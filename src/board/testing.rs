//! Testing harness for board-facing components.
//!
//! Provides [`FakeBoard`], an in-memory [`BoardSession`] that mimics a
//! MicroPython board closely enough to exercise the inspector, the chunked
//! writer, the hash verifier, the extractor, and the installer without
//! hardware. The fake keeps a small device filesystem, understands the
//! statement shapes the components compose, and frames every reply exactly
//! like the real raw-mode protocol.
//!
//! # Example
//!
//! ```
//! use mpyship::board::session::BoardSession;
//! use mpyship::board::testing::FakeBoard;
//!
//! # tokio_test::block_on(async {
//! let mut board = FakeBoard::new().with_mpy_format(6);
//! board.put_file("/lib/main.py", b"print('hi')");
//! assert!(board.is_open());
//! board.close().await.unwrap();
//! assert!(!board.is_open());
//! # });
//! ```

use crate::board::extract::EXTRACTION_SENTINEL;
use crate::board::session::BoardSession;
use crate::error::{Result, ShipError};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// In-memory board session for tests.
#[derive(Debug)]
pub struct FakeBoard {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    open: bool,
    raw_mode: bool,
    prompt_available: bool,
    has_tarfile_module: bool,
    failing_crc_checks: usize,
    platform: String,
    mpy_format: u8,
    release: String,
    sys_path: Vec<String>,
    helpers: BTreeSet<&'static str>,
    pending_payload: Option<Vec<u8>>,
    write_target: Option<String>,
    /// Every statement executed, in order.
    pub statements: Vec<String>,
}

impl Default for FakeBoard {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            open: true,
            raw_mode: false,
            prompt_available: true,
            has_tarfile_module: false,
            failing_crc_checks: 0,
            platform: "MicroPython-1.22.0-xtensa-IDFv5.0.4".to_string(),
            mpy_format: 6,
            release: "1.22.0".to_string(),
            sys_path: vec![String::new(), ".frozen".to_string(), "/lib".to_string()],
            helpers: BTreeSet::new(),
            pending_payload: None,
            write_target: None,
            statements: Vec::new(),
        }
    }
}

impl FakeBoard {
    /// A fresh board with sensible defaults (mpy v6, `/lib` on the path).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the platform string reported to the inspector.
    #[must_use]
    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = platform.to_string();
        self
    }

    /// Set the reported bytecode format version.
    #[must_use]
    pub fn with_mpy_format(mut self, format: u8) -> Self {
        self.mpy_format = format;
        self
    }

    /// Set the reported interpreter release.
    #[must_use]
    pub fn with_release(mut self, release: &str) -> Self {
        self.release = release.to_string();
        self
    }

    /// Set the reported module search path.
    #[must_use]
    pub fn with_sys_path(mut self, entries: &[&str]) -> Self {
        self.sys_path = entries.iter().map(ToString::to_string).collect();
        self
    }

    /// Fail the first `count` CRC validations, simulating link noise.
    #[must_use]
    pub fn with_failing_crc_checks(mut self, count: usize) -> Self {
        self.failing_crc_checks = count;
        self
    }

    /// Pretend the board ships a native tar module.
    #[must_use]
    pub fn with_tarfile_module(mut self) -> Self {
        self.has_tarfile_module = true;
        self
    }

    /// Make `wait_for_prompt` time out.
    #[must_use]
    pub fn with_unresponsive_prompt(mut self) -> Self {
        self.prompt_available = false;
        self
    }

    /// Seed a file on the device, creating parent directories.
    pub fn put_file(&mut self, path: &str, content: &[u8]) {
        self.add_parent_dirs(path);
        self.files.insert(path.to_string(), content.to_vec());
    }

    /// Seed a directory on the device.
    pub fn put_dir(&mut self, path: &str) {
        self.add_parent_dirs(path);
        self.dirs.insert(path.to_string());
    }

    /// Read a device file.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Whether a device directory exists.
    #[must_use]
    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    /// Paths of every file on the device.
    #[must_use]
    pub fn file_paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn add_parent_dirs(&mut self, path: &str) {
        let mut current = String::new();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            current.push('/');
            current.push_str(segment);
            self.dirs.insert(current.clone());
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn frame(stdout: &str, stderr: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(stdout.len() + stderr.len() + 5);
        out.extend_from_slice(b"OK");
        out.extend_from_slice(stdout.as_bytes());
        out.push(0x04);
        out.extend_from_slice(stderr.as_bytes());
        out.push(0x04);
        out.push(b'>');
        out
    }

    fn printed(line: &str) -> Vec<u8> {
        Self::frame(&format!("{line}\r\n"), "")
    }

    fn interpret(&mut self, statement: &str) -> Vec<u8> {
        if statement.contains("validate_crc") {
            return self.run_crc_check(statement);
        }
        if statement.starts_with("w(d[:-4])") {
            return self.run_commit_chunk();
        }
        if statement.contains("validate_hash") {
            return self.run_hash_check(statement);
        }
        if statement.starts_with("untar(") {
            return self.run_untar(statement);
        }
        if statement.contains("remove_directory_recursive(") {
            return self.run_remove_tree(statement);
        }
        if statement.contains("os.stat(") {
            let args = quoted_strings(statement);
            let exists = args.first().is_some_and(|p| self.exists(p));
            return Self::printed(if exists { "1" } else { "0" });
        }
        if statement.contains("platform.platform()") {
            return Self::printed(&self.platform.clone());
        }
        if statement.contains("'_mpy'") {
            return Self::printed(&self.mpy_format.to_string());
        }
        if statement.contains("uname().release") {
            return Self::printed(&self.release.clone());
        }
        if statement.contains("sys.path") {
            let lines = self.sys_path.join("\r\n");
            return Self::frame(&format!("{lines}\r\n"), "");
        }
        if statement.contains("import tarfile") {
            return Self::printed(if self.has_tarfile_module { "1" } else { "0" });
        }
        if statement.starts_with("f = open(") {
            let args = quoted_strings(statement);
            if let Some(path) = args.first() {
                self.put_file(path, b"");
                self.write_target = Some(path.clone());
            }
            return Self::frame("", "");
        }
        if statement.starts_with("f.close()") {
            self.write_target = None;
            return Self::frame("", "");
        }
        Self::frame(
            "",
            &format!("NameError: cannot interpret statement {statement:?}"),
        )
    }

    fn run_crc_check(&mut self, statement: &str) -> Vec<u8> {
        if !self.helpers.contains("crc") {
            return Self::frame("", "NameError: name 'validate_crc' isn't defined");
        }
        let Some(payload) = quoted_strings(statement)
            .first()
            .map(|s| decode_py_escapes(s))
        else {
            return Self::frame("", "SyntaxError: no buffer literal");
        };
        self.pending_payload = Some(payload.clone());

        if self.failing_crc_checks > 0 {
            self.failing_crc_checks -= 1;
            return Self::printed("0");
        }
        if payload.len() < 4 {
            return Self::printed("0");
        }
        let (body, suffix) = payload.split_at(payload.len() - 4);
        let expected = u32::from_be_bytes([suffix[0], suffix[1], suffix[2], suffix[3]]);
        let ok = crc32fast::hash(body) == expected;
        Self::printed(if ok { "1" } else { "0" })
    }

    fn run_commit_chunk(&mut self) -> Vec<u8> {
        let (Some(payload), Some(target)) = (self.pending_payload.take(), self.write_target.clone())
        else {
            return Self::frame("", "NameError: no pending buffer");
        };
        let body = &payload[..payload.len().saturating_sub(4)];
        self.files.entry(target).or_default().extend_from_slice(body);
        Self::frame("", "")
    }

    fn run_hash_check(&mut self, statement: &str) -> Vec<u8> {
        if !self.helpers.contains("hash") {
            return Self::frame("", "NameError: name 'validate_hash' isn't defined");
        }
        let args = quoted_strings(statement);
        let (Some(path), Some(expected)) = (args.first(), args.get(1)) else {
            return Self::frame("", "TypeError: validate_hash needs two arguments");
        };
        let Some(content) = self.files.get(path) else {
            return Self::frame("", &format!("OSError: [Errno 2] ENOENT: {path}"));
        };
        let mut hasher = Sha256::new();
        hasher.update(content);
        let ok = hex::encode(hasher.finalize()) == *expected;
        Self::printed(if ok { "1" } else { "0" })
    }

    fn run_remove_tree(&mut self, statement: &str) -> Vec<u8> {
        if !self.helpers.contains("rmdir") {
            return Self::frame(
                "",
                "NameError: name 'remove_directory_recursive' isn't defined",
            );
        }
        let args = quoted_strings(statement);
        let Some(root) = args.first() else {
            return Self::frame("", "TypeError: missing path");
        };
        if !self.dirs.contains(root) {
            return Self::frame("", &format!("OSError: [Errno 2] ENOENT: {root}"));
        }
        let prefix = format!("{root}/");
        let mut lines = Vec::new();
        let doomed_files: Vec<String> = self
            .files
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect();
        for path in doomed_files {
            lines.push(format!("Removing file: {path}"));
            self.files.remove(&path);
        }
        let mut doomed_dirs: Vec<String> = self
            .dirs
            .iter()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect();
        doomed_dirs.sort_by_key(|p| std::cmp::Reverse(p.len()));
        for path in doomed_dirs {
            lines.push(format!("Removing directory: {path}"));
            self.dirs.remove(&path);
        }
        lines.push(format!("Removing directory: {root}"));
        self.dirs.remove(root);
        Self::frame(&format!("{}\r\n", lines.join("\r\n")), "")
    }

    fn run_untar(&mut self, statement: &str) -> Vec<u8> {
        if !self.helpers.contains("untar") {
            return Self::frame("", "NameError: name 'untar' isn't defined");
        }
        if !self.has_tarfile_module && !self.helpers.contains("tarfile") {
            return Self::frame("", "NameError: name 'TarFile' isn't defined");
        }
        let args = quoted_strings(statement);
        let (Some(archive), Some(dest)) = (args.first().cloned(), args.get(1).cloned()) else {
            return Self::frame("", "TypeError: untar needs two arguments");
        };
        let Some(compressed) = self.files.get(&archive).cloned() else {
            return Self::frame("", &format!("OSError: [Errno 2] ENOENT: {archive}"));
        };

        let mut tar_bytes = Vec::new();
        if flate2::read::GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut tar_bytes)
            .is_err()
        {
            return Self::frame("", "ValueError: invalid gzip stream");
        }

        self.dirs.insert(dest.clone());
        let mut lines = Vec::new();
        let mut archive_reader = tar::Archive::new(tar_bytes.as_slice());
        let entries = match archive_reader.entries() {
            Ok(entries) => entries,
            Err(_) => return Self::frame("", "ValueError: invalid tar stream"),
        };
        for entry in entries {
            let Ok(mut entry) = entry else {
                return Self::frame("", "ValueError: truncated tar entry");
            };
            let raw_name = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
            let name = raw_name
                .trim_start_matches("./")
                .trim_start_matches('/')
                .to_string();
            if name.is_empty() || name == "." {
                continue;
            }
            let target = format!("{dest}/{}", name.trim_end_matches('/'));
            if entry.header().entry_type().is_dir() {
                lines.push(format!("Creating directory {target}"));
                if self.dirs.contains(&target) {
                    let stdout = format!("{}\r\n", lines.join("\r\n"));
                    return Self::frame(
                        &stdout,
                        "Traceback (most recent call last):\r\nOSError: [Errno 17] EEXIST\r\n",
                    );
                }
                self.dirs.insert(target);
            } else {
                lines.push(format!("Extracting file {target}"));
                let mut content = Vec::new();
                if entry.read_to_end(&mut content).is_err() {
                    return Self::frame("", "ValueError: truncated file entry");
                }
                self.files.insert(target, content);
            }
        }
        lines.push(EXTRACTION_SENTINEL.to_string());
        Self::frame(&format!("{}\r\n", lines.join("\r\n")), "")
    }
}

impl BoardSession for FakeBoard {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn wait_for_prompt(&mut self, timeout: Duration) -> Result<()> {
        if !self.open {
            return Err(ShipError::ProtocolError("session is closed".to_string()));
        }
        if !self.prompt_available {
            return Err(ShipError::PromptTimeout {
                millis: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    async fn enter_raw_mode(&mut self) -> Result<()> {
        self.raw_mode = true;
        Ok(())
    }

    async fn exit_raw_mode(&mut self) -> Result<()> {
        self.raw_mode = false;
        Ok(())
    }

    async fn exec_statement(&mut self, statement: &str) -> Result<Vec<u8>> {
        if !self.raw_mode {
            return Err(ShipError::ProtocolError(
                "statement outside raw mode".to_string(),
            ));
        }
        self.statements.push(statement.to_string());
        Ok(self.interpret(statement))
    }

    async fn exec_file(&mut self, host_path: &Path) -> Result<Vec<u8>> {
        if !self.raw_mode {
            return Err(ShipError::ProtocolError(
                "helper shipped outside raw mode".to_string(),
            ));
        }
        let source = std::fs::read_to_string(host_path)?;
        let marker = if source.contains("def validate_crc") {
            "crc"
        } else if source.contains("def validate_hash") {
            "hash"
        } else if source.contains("def remove_directory_recursive") {
            "rmdir"
        } else if source.contains("def untar") {
            "untar"
        } else if source.contains("class TarFile") {
            "tarfile"
        } else {
            return Err(ShipError::ProtocolError(format!(
                "unknown helper script {}",
                host_path.display()
            )));
        };
        self.helpers.insert(marker);
        Ok(Self::frame("", ""))
    }

    async fn remove_file(&mut self, device_path: &str) -> Result<()> {
        self.files.remove(device_path);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

// ============================================================================
// Fixture helpers
// ============================================================================

/// Build a gzip tar archive in memory. Entries with `None` content become
/// directories; paths keep their declared order.
#[must_use]
pub fn targz_fixture(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    let encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(9));
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in entries {
        let mut header = tar::Header::new_ustar();
        match content {
            Some(bytes) => {
                header.set_size(bytes.len() as u64);
                header.set_mode(0o644);
                header.set_entry_type(tar::EntryType::Regular);
                header.set_cksum();
                builder.append_data(&mut header, path, *bytes).unwrap();
            }
            None => {
                header.set_size(0);
                header.set_mode(0o755);
                header.set_entry_type(tar::EntryType::Directory);
                header.set_cksum();
                builder.append_data(&mut header, path, &[][..]).unwrap();
            }
        }
    }
    builder
        .into_inner()
        .and_then(flate2::write::GzEncoder::finish)
        .unwrap()
}

/// Extract every quoted python string literal from a statement, decoding
/// nothing. Bytes literals share the same quoting.
fn quoted_strings(statement: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = statement.chars();
    while let Some(ch) = chars.next() {
        if ch != '\'' {
            continue;
        }
        let mut current = String::new();
        let mut escaped = false;
        for inner in chars.by_ref() {
            if escaped {
                current.push('\\');
                current.push(inner);
                escaped = false;
            } else if inner == '\\' {
                escaped = true;
            } else if inner == '\'' {
                break;
            } else {
                current.push(inner);
            }
        }
        out.push(current);
    }
    out
}

/// Decode `\xNN` and simple escapes from a python literal body.
fn decode_py_escapes(literal: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chars = literal.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('x') => {
                let hi = chars.next().unwrap_or('0');
                let lo = chars.next().unwrap_or('0');
                let value = u8::from_str_radix(&format!("{hi}{lo}"), 16).unwrap_or(0);
                out.push(value);
            }
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('\\') => out.push(b'\\'),
            Some('\'') => out.push(b'\''),
            Some(other) => {
                out.push(b'\\');
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => out.push(b'\\'),
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
