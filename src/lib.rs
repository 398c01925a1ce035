// Clippy configuration for the mpyship crate
// Allow missing docs for internal items
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Doc backticks optional
#![allow(clippy::doc_markdown)]
// Allow truncation in size/percentage calculations (bounded by construction)
#![allow(clippy::cast_possible_truncation)]
// Allow format string style choices
#![allow(clippy::uninlined_format_args)]
// Allow case-sensitive file extension checks (intentional)
#![allow(clippy::case_sensitive_file_extension_comparisons)]

//! mpyship: MicroPython package archiver and installer
//!
//! mpyship resolves a package source (a git-forge repository, a package
//! index name, or a direct source file URL), fetches every file the package
//! and its dependencies comprise, optionally cross-compiles them into the
//! board's bytecode format, bundles the result into a gzip tape archive,
//! and installs it onto a serial-attached board over an interactive
//! interpreter session with per-chunk CRC verification and a SHA-256
//! integrity check.
//!
//! # Quick Start
//!
//! ```no_run
//! use mpyship::packager::{Packager, PackagerConfig};
//!
//! # async fn example() -> mpyship::error::Result<()> {
//! let packager = Packager::new(PackagerConfig::new());
//!
//! // Build an archive without touching a board.
//! let built = packager
//!     .package("github:arduino/arduino-modulino-mpy", None, None, None)
//!     .await?;
//! println!("{} files in {}", built.package_files.len(), built.archive_path.display());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The pipeline is a chain of small pieces:
//!
//! - [`source`] normalizes user references to raw-content URLs
//! - [`resolver`] walks manifests and their dependencies
//! - [`fetch`] + [`compiler`] stage (and optionally compile) each file
//! - [`archive`] produces the `.tar.gz`
//! - [`board`] talks to the device: session facade, inspector, chunked
//!   CRC writer, hash verifier, extractor
//! - [`installer`] and [`packager`] orchestrate the two halves
//!
//! The board side is generic over [`board::session::BoardSession`]; a
//! concrete serial implementation lives with the transport, and
//! [`board::testing::FakeBoard`] stands in for tests.

pub mod archive;
pub mod board;
pub mod compiler;
pub mod error;
pub mod fetch;
pub mod installer;
pub mod manifest;
pub mod packager;
pub mod resolver;
pub mod source;

pub use archive::ArchiveResult;
pub use error::{Result, ShipError};
pub use manifest::Manifest;
pub use packager::{Packager, PackagerConfig};
pub use source::PackageSource;
