//! Archive production over the staging tree.
//!
//! Bundles everything under the staging directory into a gzip tape archive
//! at maximum compression. Internal paths are relative to the staging root;
//! directory entries are kept so the on-board extractor can recreate the
//! tree (and detect collisions) without guessing.

use crate::error::{Result, ShipError};
use crate::manifest::Manifest;
use crate::source::{PackageSource, DEFAULT_BRANCH_REF, LATEST_INDEX_VERSION};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A produced archive plus the target-relative paths it carries.
#[derive(Debug, Clone)]
pub struct ArchiveResult {
    /// Path of the `.tar.gz` on the host.
    pub archive_path: PathBuf,
    /// Ordered target-relative paths across every resolved manifest.
    pub package_files: Vec<String>,
}

/// Archive name for the root manifest: the declared name, or the last
/// path segment of the root source with a trailing `.git` stripped.
#[must_use]
pub fn package_name(source: &PackageSource, manifest: &Manifest) -> String {
    manifest
        .name
        .clone()
        .unwrap_or_else(|| source.package_name())
}

/// Archive version: the declared version, else the requested ref stripped
/// of a leading `v`, else `latest` for the default branch.
#[must_use]
pub fn package_version(manifest: &Manifest, requested: Option<&str>) -> String {
    if let Some(version) = &manifest.version {
        return version.clone();
    }
    match requested {
        None | Some("") | Some(DEFAULT_BRANCH_REF) | Some(LATEST_INDEX_VERSION) => {
            LATEST_INDEX_VERSION.to_string()
        }
        Some(reference) => reference.strip_prefix('v').unwrap_or(reference).to_string(),
    }
}

/// `<name>-<version>.tar.gz`.
#[must_use]
pub fn archive_file_name(name: &str, version: &str) -> String {
    format!("{name}-{version}.tar.gz")
}

/// Create a gzip (level 9) tape archive of the staging tree at
/// `out_dir/file_name`, returning the archive path.
pub fn create_archive(staging: &Path, out_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let archive_path = out_dir.join(file_name);
    debug!(archive = %archive_path.display(), "creating archive");

    std::fs::create_dir_all(out_dir)?;
    let file = File::create(&archive_path)?;
    let encoder = GzEncoder::new(file, Compression::new(9));
    let mut builder = tar::Builder::new(encoder);

    append_tree(&mut builder, staging, Path::new(""))?;

    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| ShipError::ArchiveFailed(e.to_string()))?;
    Ok(archive_path)
}

/// Append `staging/rel` recursively, directories first, names sorted.
fn append_tree<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    staging: &Path,
    rel: &Path,
) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(staging.join(rel))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let child_rel = rel.join(entry.file_name());
        let child_path = entry.path();
        if entry.file_type()?.is_dir() {
            builder
                .append_dir(&child_rel, &child_path)
                .map_err(|e| ShipError::ArchiveFailed(e.to_string()))?;
            append_tree(builder, staging, &child_rel)?;
        } else {
            builder
                .append_path_with_name(&child_path, &child_rel)
                .map_err(|e| ShipError::ArchiveFailed(e.to_string()))?;
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn stage(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    fn entry_names(archive_path: &Path) -> Vec<String> {
        let file = File::open(archive_path).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Archive Content Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_archive_contains_every_staged_file() {
        let staging = stage(&[
            ("modulino/__init__.py", "VERSION = 1\n"),
            ("modulino/buttons.py", "class Buttons: pass\n"),
            ("README.md", "docs\n"),
        ]);
        let out = TempDir::new().unwrap();

        let archive =
            create_archive(staging.path(), out.path(), "modulino-latest.tar.gz").unwrap();

        let names = entry_names(&archive);
        assert!(names.contains(&"modulino".to_string()));
        assert!(names.contains(&"modulino/__init__.py".to_string()));
        assert!(names.contains(&"modulino/buttons.py".to_string()));
        assert!(names.contains(&"README.md".to_string()));
    }

    #[test]
    fn test_archive_paths_are_relative() {
        let staging = stage(&[("pkg/a.py", "1")]);
        let out = TempDir::new().unwrap();

        let archive = create_archive(staging.path(), out.path(), "pkg-1.0.0.tar.gz").unwrap();

        for name in entry_names(&archive) {
            assert!(!name.starts_with('/'), "absolute path in archive: {name}");
        }
    }

    #[test]
    fn test_archive_is_gzip() {
        let staging = stage(&[("a.py", "1")]);
        let out = TempDir::new().unwrap();

        let archive = create_archive(staging.path(), out.path(), "a-latest.tar.gz").unwrap();

        let mut magic = [0u8; 2];
        File::open(&archive).unwrap().read_exact(&mut magic).unwrap();
        assert_eq!(magic, [0x1f, 0x8b]);
    }

    #[test]
    fn test_archive_round_trips_content() {
        let staging = stage(&[("pkg/mod.py", "x = 42\n")]);
        let out = TempDir::new().unwrap();

        let archive = create_archive(staging.path(), out.path(), "pkg-latest.tar.gz").unwrap();

        let file = File::open(&archive).unwrap();
        let mut reader = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let mut found = false;
        for entry in reader.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().display().to_string() == "pkg/mod.py" {
                let mut content = String::new();
                entry.read_to_string(&mut content).unwrap();
                assert_eq!(content, "x = 42\n");
                found = true;
            }
        }
        assert!(found);
    }

    // -------------------------------------------------------------------------
    // Naming Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_package_name_prefers_manifest() {
        let source = PackageSource::parse("github:arduino/arduino-modulino-mpy").unwrap();
        let manifest = Manifest {
            name: Some("modulino".to_string()),
            ..Default::default()
        };
        assert_eq!(package_name(&source, &manifest), "modulino");
    }

    #[test]
    fn test_package_name_falls_back_to_source() {
        let source = PackageSource::parse("https://example.com/repos/widgets.git").unwrap();
        assert_eq!(package_name(&source, &Manifest::default()), "widgets");
    }

    #[test]
    fn test_package_version_prefers_manifest() {
        let manifest = Manifest {
            version: Some("1.0.0".to_string()),
            ..Default::default()
        };
        assert_eq!(package_version(&manifest, Some("v2.0.0")), "1.0.0");
    }

    #[test]
    fn test_package_version_strips_v_prefix() {
        assert_eq!(package_version(&Manifest::default(), Some("v1.2.3")), "1.2.3");
    }

    #[test]
    fn test_package_version_default_branch_is_latest() {
        assert_eq!(package_version(&Manifest::default(), Some("HEAD")), "latest");
        assert_eq!(package_version(&Manifest::default(), None), "latest");
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(
            archive_file_name("arduino-modulino-mpy", "latest"),
            "arduino-modulino-mpy-latest.tar.gz"
        );
    }
}
