//! Helper scripts shipped to the board.
//!
//! The scripts live under `device/` and are embedded at build time. Each
//! exposes a named operation the host invokes by composing a
//! `name(args...)` statement; no values are ever substituted into the
//! script text itself.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// An embedded on-device helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceScript {
    /// `validate_crc(data) -> bool` over a CRC32-suffixed buffer.
    CrcCheck,
    /// `validate_hash(path, expected_hex) -> 0|1` SHA-256 comparison.
    HashCheck,
    /// `remove_directory_recursive(path)` with progress prints.
    RemoveTree,
    /// `untar(archive_path, target_dir)` extraction with trace prints.
    Untar,
    /// Minimal ustar `TarFile` for boards without a tar module.
    TarFallback,
}

impl DeviceScript {
    /// The script source text.
    #[must_use]
    pub fn source(self) -> &'static str {
        match self {
            Self::CrcCheck => include_str!("../../device/crc.py"),
            Self::HashCheck => include_str!("../../device/hash.py"),
            Self::RemoveTree => include_str!("../../device/rmdir.py"),
            Self::Untar => include_str!("../../device/untar.py"),
            Self::TarFallback => include_str!("../../device/tarfile.py"),
        }
    }

    /// File name used when the script is materialized on the host.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::CrcCheck => "crc.py",
            Self::HashCheck => "hash.py",
            Self::RemoveTree => "rmdir.py",
            Self::Untar => "untar.py",
            Self::TarFallback => "tarfile.py",
        }
    }

    /// Write the script into `dir` so a session can ship it with
    /// `exec_file`, returning the written path.
    pub fn write_to(self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.file_name());
        std::fs::write(&path, self.source())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scripts_expose_expected_operations() {
        assert!(DeviceScript::CrcCheck.source().contains("def validate_crc"));
        assert!(DeviceScript::HashCheck.source().contains("def validate_hash"));
        assert!(DeviceScript::RemoveTree
            .source()
            .contains("def remove_directory_recursive"));
        assert!(DeviceScript::Untar.source().contains("def untar"));
        assert!(DeviceScript::TarFallback.source().contains("class TarFile"));
    }

    #[test]
    fn test_write_to_materializes_source() {
        let dir = TempDir::new().unwrap();
        let path = DeviceScript::CrcCheck.write_to(dir.path()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, DeviceScript::CrcCheck.source());
        assert_eq!(path.file_name().unwrap(), "crc.py");
    }
}
