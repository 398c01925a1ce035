//! Manifest resolution and the dependency walk.
//!
//! Resolves a starting [`PackageSource`] into the ordered sequence of
//! manifests the package comprises (root first). Repository sources fetch a
//! `package.json` at the resolved ref; index names fetch a descriptor and
//! adapt its content hashes to blob URLs; direct files synthesize a
//! one-entry manifest without touching the network.
//!
//! The walk is depth-first over `deps` in declared order. Declared versions
//! are taken verbatim (no solving); a `(source, version)` visited set bounds
//! ill-formed cyclic manifests.

use crate::error::{Result, ShipError};
use crate::manifest::Manifest;
use crate::source::{git_ref, index_ref, rewrite, PackageSource};
use std::collections::HashSet;
use tracing::debug;

/// Default package index consulted for bare-name sources.
pub const DEFAULT_INDEX_URL: &str = "https://micropython.org/pi/v2";

/// One resolved node of the dependency walk.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    /// Where the manifest came from.
    pub source: PackageSource,
    /// Version requested for this node, verbatim.
    pub version: Option<String>,
    /// The manifest, with index hashes already adapted to URLs.
    pub manifest: Manifest,
}

/// Resolves manifests and walks their dependencies.
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    client: reqwest::Client,
    index_url: String,
    mpy_format: Option<u8>,
}

impl ManifestResolver {
    /// Create a resolver against the given package index.
    #[must_use]
    pub fn new(client: reqwest::Client, index_url: impl Into<String>) -> Self {
        Self {
            client,
            index_url: index_url.into().trim_end_matches('/').to_string(),
            mpy_format: None,
        }
    }

    /// Target bytecode format for index descriptor paths. Without one the
    /// index serves plain source (`py`) descriptors.
    #[must_use]
    pub fn with_mpy_format(mut self, format: Option<u8>) -> Self {
        self.mpy_format = format;
        self
    }

    /// The index base URL.
    #[must_use]
    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    /// Resolve `source` and every transitive dependency, root first.
    ///
    /// `root_override` replaces the root manifest only; dependencies always
    /// fetch their own.
    pub async fn resolve(
        &self,
        source: &PackageSource,
        version: Option<&str>,
        root_override: Option<Manifest>,
    ) -> Result<Vec<ResolvedManifest>> {
        let mut resolved = Vec::new();
        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut stack: Vec<(PackageSource, Option<String>, Option<Manifest>)> =
            vec![(source.clone(), version.map(ToString::to_string), root_override)];

        while let Some((node, node_version, override_manifest)) = stack.pop() {
            let key = (node.to_string(), normalized_version(&node, node_version.as_deref()));
            if !visited.insert(key.clone()) {
                debug!(source = %node, version = %key.1, "skipping revisited dependency");
                continue;
            }

            let manifest = match override_manifest {
                Some(manifest) => {
                    manifest.validate(&node.package_name())?;
                    manifest
                }
                None => self.fetch_manifest(&node, node_version.as_deref()).await?,
            };

            // Depth-first in declared order: reversed so the first dep is
            // popped next.
            for dep in manifest.deps.iter().rev() {
                let dep_source = PackageSource::parse(&dep.source)?;
                stack.push((dep_source, dep.version.clone(), None));
            }

            resolved.push(ResolvedManifest {
                source: node,
                version: node_version,
                manifest,
            });
        }

        Ok(resolved)
    }

    /// Fetch and adapt the manifest for a single source.
    pub async fn fetch_manifest(
        &self,
        source: &PackageSource,
        version: Option<&str>,
    ) -> Result<Manifest> {
        match source {
            PackageSource::ShortRepo { .. } | PackageSource::HttpRepo { .. } => {
                let base = rewrite(&source.to_string(), version)?;
                let url = if base.ends_with(".json") {
                    base
                } else {
                    format!("{}/package.json", base.trim_end_matches('/'))
                };
                let manifest = self.fetch_json(&url).await?;
                manifest.validate(&source.package_name())?;
                Ok(manifest)
            }
            PackageSource::IndexPackage { name } => {
                let format = self
                    .mpy_format
                    .map_or_else(|| "py".to_string(), |f| f.to_string());
                let url = format!(
                    "{}/package/{format}/{name}/{}.json",
                    self.index_url,
                    index_ref(version)
                );
                let mut manifest = self.fetch_json(&url).await?;
                manifest.validate(name)?;
                manifest.adapt_index(&self.index_url, name);
                Ok(manifest)
            }
            PackageSource::DirectFile { url, filename } => {
                let raw = rewrite(url, version)
                    .map_err(|_| ShipError::UnsupportedSource(url.clone()))?;
                if !raw.starts_with("http://") && !raw.starts_with("https://") {
                    return Err(ShipError::UnsupportedSource(url.clone()));
                }
                Ok(Manifest::for_direct_file(url, filename))
            }
        }
    }

    async fn fetch_json(&self, url: &str) -> Result<Manifest> {
        debug!(url, "fetching manifest");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ShipError::ManifestUnavailable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(ShipError::ManifestUnavailable {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| ShipError::ManifestUnavailable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Manifest::parse(&body).map_err(|e| ShipError::ManifestUnavailable {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Version token used in the visited set, normalized per source family so
/// `HEAD`/`latest` spellings collapse.
fn normalized_version(source: &PackageSource, version: Option<&str>) -> String {
    if source.is_index() {
        index_ref(version).to_string()
    } else {
        git_ref(version).to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
