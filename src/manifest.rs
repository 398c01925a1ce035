//! Package manifest model.
//!
//! Two JSON shapes are consumed, discriminated by which top-level array is
//! present:
//!
//! - Repository manifest: `{"name"?, "version"?, "urls": [[target, source]],
//!   "deps"?: [[dep, version?]]}`
//! - Index manifest: `{"version", "hashes": [[target, hexhash]], "deps"?}`
//!
//! Index manifests carry no source URLs; [`Manifest::adapt_index`] turns each
//! hash entry into a content-addressed blob URL under the index.
//!
//! # Example
//!
//! ```
//! use mpyship::manifest::Manifest;
//!
//! let manifest = Manifest::parse(
//!     r#"{"version": "1.0.0",
//!         "urls": [["modulino/__init__.py",
//!                   "github:arduino/modulino-mpy/src/modulino/__init__.py"]]}"#,
//! )
//! .unwrap();
//! assert_eq!(manifest.urls.len(), 1);
//! ```

use crate::error::{Result, ShipError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// A file the package ships: target path on the board, source URL on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the package root on the device.
    pub target: String,
    /// Where to fetch the file from (short or raw form).
    pub source: String,
}

/// A declared dependency: another source reference plus an optional version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepEntry {
    /// Dependency source (repo URL, short form, or index name).
    pub source: String,
    /// Declared version, taken verbatim (no solving).
    pub version: Option<String>,
}

/// A content-addressed file from an index manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashEntry {
    /// Path relative to the package root on the device.
    pub target: String,
    /// Hex content hash addressing the blob.
    pub hash: String,
}

/// The package descriptor as retrieved from `package.json` or the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Package name, when the manifest declares one.
    pub name: Option<String>,
    /// Package version, when the manifest declares one.
    pub version: Option<String>,
    /// Files to fetch, in declared order.
    pub urls: Vec<FileEntry>,
    /// Dependencies, in declared order.
    pub deps: Vec<DepEntry>,
    /// Content-addressed files (index manifests only).
    pub hashes: Vec<HashEntry>,
}

/// Wire shape of a manifest. `urls` and `hashes` arrive as string pairs,
/// `deps` as one- or two-element arrays.
#[derive(Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    urls: Vec<(String, String)>,
    #[serde(default)]
    deps: Vec<Vec<String>>,
    #[serde(default)]
    hashes: Vec<(String, String)>,
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(json)?;

        let mut deps = Vec::with_capacity(raw.deps.len());
        for entry in raw.deps {
            let mut it = entry.into_iter();
            let source = it.next().ok_or_else(|| {
                ShipError::MalformedSource("empty dependency entry in manifest".to_string())
            })?;
            deps.push(DepEntry {
                source,
                version: it.next(),
            });
        }

        Ok(Self {
            name: raw.name,
            version: raw.version,
            urls: raw
                .urls
                .into_iter()
                .map(|(target, source)| FileEntry { target, source })
                .collect(),
            deps,
            hashes: raw
                .hashes
                .into_iter()
                .map(|(target, hash)| HashEntry { target, hash })
                .collect(),
        })
    }

    /// Load a manifest from a JSON file on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Synthesize the one-entry manifest for a direct `.py`/`.mpy` file.
    #[must_use]
    pub fn for_direct_file(url: &str, filename: &str) -> Self {
        Self {
            urls: vec![FileEntry {
                target: filename.to_string(),
                source: url.to_string(),
            }],
            ..Default::default()
        }
    }

    /// Check that either `urls` or `hashes` is populated.
    pub fn validate(&self, package: &str) -> Result<()> {
        if self.urls.is_empty() && self.hashes.is_empty() {
            return Err(ShipError::MissingUrlsAndHashes {
                package: package.to_string(),
            });
        }
        Ok(())
    }

    /// Rewrite index hash entries into fetchable blob URLs under `index`.
    ///
    /// The blob for hash `h` lives at `<index>/file/<h[0..2]>/<h>`. When a
    /// manifest carries both `urls` and `hashes` the hashes are authoritative
    /// and the declared URLs are discarded with a warning.
    pub fn adapt_index(&mut self, index: &str, package: &str) {
        if self.hashes.is_empty() {
            return;
        }
        if !self.urls.is_empty() {
            warn!(package, "manifest has both urls and hashes; using hashes");
        }
        let index = index.trim_end_matches('/');
        self.urls = self
            .hashes
            .iter()
            .map(|entry| {
                let prefix = entry.hash.get(..2).unwrap_or(&entry.hash);
                FileEntry {
                    target: entry.target.clone(),
                    source: format!("{index}/file/{prefix}/{}", entry.hash),
                }
            })
            .collect();
    }

    /// Target-relative paths of every file this manifest contributes.
    #[must_use]
    pub fn target_paths(&self) -> Vec<String> {
        self.urls.iter().map(|e| e.target.clone()).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
