//! Error types for package and install operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mpyship operations.
pub type Result<T> = std::result::Result<T, ShipError>;

/// Errors that can occur while packaging or installing.
#[derive(Error, Debug)]
pub enum ShipError {
    /// Input URL could not be parsed into a package source.
    #[error("malformed package source: {0}")]
    MalformedSource(String),

    /// A manifest could not be fetched or parsed.
    #[error("manifest unavailable at {url}: {reason}")]
    ManifestUnavailable {
        /// URL the manifest was requested from.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// A manifest declared neither file URLs nor content hashes.
    #[error("manifest for '{package}' has neither urls nor hashes")]
    MissingUrlsAndHashes {
        /// Package name, or the source URL when the name is absent.
        package: String,
    },

    /// A direct-file source is not fetchable as raw content.
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    /// File download failed.
    #[error("download failed for {url}: {reason}")]
    DownloadFailed {
        /// Source URL of the file.
        url: String,
        /// HTTP status or transport failure.
        reason: String,
    },

    /// Bytecode compilation failed.
    #[error("compile failed for {}: {reason}", file.display())]
    CompileFailed {
        /// Source file that failed to compile.
        file: PathBuf,
        /// Compiler diagnostics.
        reason: String,
    },

    /// Local archive creation failed.
    #[error("archive creation failed: {0}")]
    ArchiveFailed(String),

    /// No interpreter prompt within the configured window.
    #[error("no interpreter prompt within {millis} ms")]
    PromptTimeout {
        /// Configured timeout in milliseconds.
        millis: u64,
    },

    /// Unexpected raw reply framing from the board.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// CRC mismatches exhausted the chunk-size reductions.
    #[error("chunk corruption between offsets {offset} and {end}")]
    ChunkCorruption {
        /// Offset of the failing chunk.
        offset: u64,
        /// End offset of the failing chunk.
        end: u64,
    },

    /// Archive verification failed after upload.
    #[error("hash mismatch for {path}: expected {expected}")]
    HashMismatch {
        /// Device path of the uploaded archive.
        path: String,
        /// Expected hex digest.
        expected: String,
    },

    /// Installation would replace an existing file and overwrite is disabled.
    #[error("would overwrite existing file {0}")]
    WouldOverwriteFile(String),

    /// Installation would replace an existing folder and overwrite is disabled.
    #[error("would overwrite existing folder {0}")]
    WouldOverwriteFolder(String),

    /// The extractor hit an existing directory on the board.
    #[error("package already installed at {path}")]
    PackageAlreadyInstalled {
        /// Device path of the colliding directory.
        path: String,
    },

    /// The extractor finished without the success sentinel.
    #[error("extraction failed: {0}")]
    ExtractFailed(String),

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_chunk_corruption() {
        let err = ShipError::ChunkCorruption {
            offset: 512,
            end: 1024,
        };
        assert_eq!(
            err.to_string(),
            "chunk corruption between offsets 512 and 1024"
        );
    }

    #[test]
    fn test_error_display_would_overwrite() {
        let err = ShipError::WouldOverwriteFolder("modulino".to_string());
        assert_eq!(err.to_string(), "would overwrite existing folder modulino");
    }

    #[test]
    fn test_error_display_manifest_unavailable() {
        let err = ShipError::ManifestUnavailable {
            url: "https://example.com/package.json".to_string(),
            reason: "HTTP 404".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "manifest unavailable at https://example.com/package.json: HTTP 404"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::other("boom");
        let err: ShipError = io.into();
        assert!(matches!(err, ShipError::Io(_)));
    }
}
