//! Top-level packaging pipeline.
//!
//! [`Packager::package`] resolves a source, fetches (and optionally
//! compiles) every file into a staging directory, and bundles the result
//! into a gzip tape archive. [`Packager::package_and_install`] adds the
//! board leg: inspect, upload, verify, extract, with the local archive and
//! the session cleaned on every exit path.
//!
//! Board inspection only happens when compilation is requested; a plain
//! source package never needs an open session.

use crate::archive::{self, ArchiveResult};
use crate::board::inspect::{self, BoardCaps};
use crate::board::session::BoardSession;
use crate::compiler::MpyCross;
use crate::error::{Result, ShipError};
use crate::fetch::{fetch_manifest_files, PostProcess};
use crate::installer::{install_package, InstallOptions};
use crate::manifest::Manifest;
use crate::resolver::{ManifestResolver, DEFAULT_INDEX_URL};
use crate::source::PackageSource;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PackagerConfig {
    /// Package index consulted for bare-name sources.
    pub index_url: String,
    /// Cross-compile sources into the board's bytecode format.
    pub compile: bool,
    /// Replace existing on-device files and folders.
    pub overwrite_existing: bool,
    /// Where produced archives land; the OS temp dir when unset.
    pub output_dir: Option<PathBuf>,
    /// Compiler override; auto-located next to the tool when unset.
    pub compiler: Option<MpyCross>,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.to_string(),
            compile: false,
            overwrite_existing: false,
            output_dir: None,
            compiler: None,
        }
    }
}

impl PackagerConfig {
    /// Create a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the package index base URL.
    #[must_use]
    pub fn with_index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = url.into();
        self
    }

    /// Enable or disable cross-compilation.
    #[must_use]
    pub fn with_compile(mut self, compile: bool) -> Self {
        self.compile = compile;
        self
    }

    /// Enable or disable overwriting existing packages.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    /// Set the archive output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set an explicit compiler binary.
    #[must_use]
    pub fn with_compiler(mut self, compiler: MpyCross) -> Self {
        self.compiler = Some(compiler);
        self
    }
}

/// The end-to-end package pipeline.
pub struct Packager {
    config: PackagerConfig,
    client: reqwest::Client,
}

impl Packager {
    /// Create a packager from configuration.
    #[must_use]
    pub fn new(config: PackagerConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .user_agent(concat!("mpyship/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    /// Resolve, fetch, optionally compile, and archive a package.
    ///
    /// `custom_manifest` replaces the root manifest only. `caps` feeds the
    /// compiler's target architecture and the index's bytecode format; pass
    /// `None` when no board is involved.
    pub async fn package(
        &self,
        source_url: &str,
        version: Option<&str>,
        custom_manifest: Option<Manifest>,
        caps: Option<&BoardCaps>,
    ) -> Result<ArchiveResult> {
        let source = PackageSource::parse(source_url)?;
        let compilation = self.compilation_target(caps).await;

        let resolver = ManifestResolver::new(self.client.clone(), self.config.index_url.clone())
            .with_mpy_format(compilation.as_ref().map(|c| c.format));
        let resolved = resolver.resolve(&source, version, custom_manifest).await?;

        let staging = tempfile::tempdir()?;
        let hook = compilation.map(|target| compile_hook(target, staging.path().to_path_buf()));

        let mut package_files = Vec::new();
        let mut seen = HashSet::new();
        for node in &resolved {
            let fetched = fetch_manifest_files(
                &self.client,
                &node.manifest,
                staging.path(),
                node.version.as_deref(),
                hook.as_ref(),
            )
            .await?;
            for file in fetched {
                if seen.insert(file.target.clone()) {
                    package_files.push(file.target);
                }
            }
        }

        let root = &resolved[0];
        let name = archive::package_name(&source, &root.manifest);
        let pkg_version = archive::package_version(&root.manifest, version);
        let file_name = archive::archive_file_name(&name, &pkg_version);
        let out_dir = self
            .config
            .output_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);

        let archive_path = archive::create_archive(staging.path(), &out_dir, &file_name)?;
        debug!(archive = %archive_path.display(), files = package_files.len(), "package built");

        Ok(ArchiveResult {
            archive_path,
            package_files,
        })
    }

    /// Package a source and install it over the given session.
    ///
    /// The board is inspected for its compiler target only when compiling;
    /// the installer resolves the library path on its own. The local
    /// archive and the session are cleaned up on all exit paths.
    pub async fn package_and_install<S, F>(
        &self,
        session: &mut S,
        source_url: &str,
        version: Option<&str>,
        custom_manifest: Option<Manifest>,
        on_progress: Option<F>,
    ) -> Result<()>
    where
        S: BoardSession,
        F: FnMut(u8),
    {
        let result = self
            .drive_install(session, source_url, version, custom_manifest, on_progress)
            .await;
        let closed = session.close().await;
        result?;
        closed
    }

    async fn drive_install<S, F>(
        &self,
        session: &mut S,
        source_url: &str,
        version: Option<&str>,
        custom_manifest: Option<Manifest>,
        on_progress: Option<F>,
    ) -> Result<()>
    where
        S: BoardSession,
        F: FnMut(u8),
    {
        let caps = if self.config.compile {
            Some(inspect::inspect(session).await?)
        } else {
            None
        };

        let built = self
            .package(source_url, version, custom_manifest, caps.as_ref())
            .await?;

        let result = install_package(
            session,
            &built.archive_path,
            &built.package_files,
            InstallOptions {
                overwrite_existing: self.config.overwrite_existing,
            },
            on_progress,
        )
        .await;

        if let Err(err) = std::fs::remove_file(&built.archive_path) {
            warn!(archive = %built.archive_path.display(), error = %err,
                "failed to remove local archive");
        }
        result
    }

    /// Decide whether compilation is active: requested, compiler present,
    /// board format known, and the compiler emitting that format.
    async fn compilation_target(&self, caps: Option<&BoardCaps>) -> Option<CompileTarget> {
        if !self.config.compile {
            return None;
        }
        let Some(compiler) = self.config.compiler.clone().or_else(MpyCross::locate) else {
            warn!("compilation requested but no mpy-cross binary found; shipping source");
            return None;
        };
        let Some(format) = caps.and_then(|c| c.mpy_format) else {
            warn!("board did not report a bytecode format; shipping source");
            return None;
        };
        if !compiler.supports(format).await {
            warn!(format, "mpy-cross does not emit the board's format; shipping source");
            return None;
        }
        Some(CompileTarget {
            compiler,
            format,
            arch: caps.and_then(|c| c.architecture.clone()),
        })
    }
}

#[derive(Clone)]
struct CompileTarget {
    compiler: MpyCross,
    format: u8,
    arch: Option<String>,
}

/// Build the post-fetch hook. A failed compile logs and degrades to the
/// original source path rather than failing the pipeline.
fn compile_hook(target: CompileTarget, staging: PathBuf) -> PostProcess {
    Arc::new(move |path| {
        let target = target.clone();
        let staging = staging.clone();
        Box::pin(async move {
            if path.extension().and_then(|e| e.to_str()) != Some("py") {
                return Ok(path);
            }
            match target
                .compiler
                .compile(&path, Some(&staging), target.arch.as_deref())
                .await
            {
                Ok(compiled) => Ok(compiled),
                Err(ShipError::CompileFailed { file, reason }) => {
                    warn!(file = %file.display(), %reason, "compile failed; shipping source");
                    Ok(path)
                }
                Err(other) => Err(other),
            }
        })
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn packager(out_dir: &std::path::Path) -> Packager {
        Packager::new(
            PackagerConfig::new()
                .with_index_url("https://index.invalid")
                .with_output_dir(out_dir),
        )
    }

    #[tokio::test]
    async fn test_custom_manifest_names_archive_after_version() {
        let server = MockServer::start().await;
        for name in ["__init__", "buttons"] {
            Mock::given(method("GET"))
                .and(path(format!("/src/modulino/{name}.py")))
                .respond_with(ResponseTemplate::new(200).set_body_string("pass\n"))
                .mount(&server)
                .await;
        }
        let manifest = Manifest::parse(&format!(
            r#"{{"version": "1.0.0", "urls": [
                ["modulino/__init__.py", "{0}/src/modulino/__init__.py"],
                ["modulino/buttons.py", "{0}/src/modulino/buttons.py"]
            ]}}"#,
            server.uri()
        ))
        .unwrap();

        let out = TempDir::new().unwrap();
        let built = packager(out.path())
            .package(
                "https://github.com/arduino/modulino-mpy",
                None,
                Some(manifest),
                None,
            )
            .await
            .unwrap();

        let file_name = built.archive_path.file_name().unwrap().to_string_lossy();
        assert_eq!(file_name, "modulino-mpy-1.0.0.tar.gz");
        assert_eq!(built.package_files.len(), 2);
    }

    #[tokio::test]
    async fn test_package_files_deduplicated_across_manifests() {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/root/package.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"urls": [["shared.py", "{base}/shared.py"]],
                     "deps": [["{base}/dep"]]}}"#
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dep/package.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"urls": [["shared.py", "{base}/shared.py"]]}}"#
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/shared.py"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x = 1\n"))
            .mount(&server)
            .await;

        let out = TempDir::new().unwrap();
        let built = packager(out.path())
            .package(&format!("{base}/root"), None, None, None)
            .await
            .unwrap();

        assert_eq!(built.package_files, vec!["shared.py"]);
    }

    #[tokio::test]
    async fn test_install_closes_session_and_removes_archive() {
        use crate::board::testing::FakeBoard;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/src/mod.py"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x = 1\n"))
            .mount(&server)
            .await;
        let manifest = Manifest::parse(&format!(
            r#"{{"version": "2.0.0", "urls": [["pkg/mod.py", "{}/src/mod.py"]]}}"#,
            server.uri()
        ))
        .unwrap();

        let out = TempDir::new().unwrap();
        let mut board = FakeBoard::new();
        packager(out.path())
            .package_and_install(
                &mut board,
                "https://github.com/acme/pkg",
                None,
                Some(manifest),
                None::<fn(u8)>,
            )
            .await
            .unwrap();

        assert!(!board.is_open());
        assert_eq!(board.file("/lib/pkg/mod.py").unwrap(), b"x = 1\n");
        assert!(!out.path().join("pkg-2.0.0.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_config_builders() {
        let config = PackagerConfig::new()
            .with_compile(true)
            .with_overwrite(true)
            .with_index_url("https://index.example.com");
        assert!(config.compile);
        assert!(config.overwrite_existing);
        assert_eq!(config.index_url, "https://index.example.com");
    }
}
