//! Package source references and raw-URL rewriting.
//!
//! Accepts the user-facing source forms and normalizes them to fetchable
//! raw-content URLs:
//!
//! - `github:owner/repo[/subpath]` - GitHub short form
//! - `gitlab:owner/repo[/subpath]` - GitLab short form
//! - `https://github.com/owner/repo[...]` - human form, folded to the raw host
//! - `https://...` - anything else passes through unchanged
//! - `modulino/buttons.py` tails (`.py`/`.mpy`) - a single direct file
//! - bare identifier - a package index name
//!
//! # Example
//!
//! ```
//! use mpyship::source::{PackageSource, rewrite};
//!
//! let src = PackageSource::parse("github:arduino/arduino-modulino-mpy").unwrap();
//! assert_eq!(src.package_name(), "arduino-modulino-mpy");
//!
//! let raw = rewrite("github:arduino/arduino-modulino-mpy", None).unwrap();
//! assert_eq!(raw, "https://raw.githubusercontent.com/arduino/arduino-modulino-mpy/HEAD");
//! ```

use crate::error::{Result, ShipError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ref used when the caller did not pin a version on a repository source.
pub const DEFAULT_BRANCH_REF: &str = "HEAD";

/// Version token used when the caller did not pin an index package version.
pub const LATEST_INDEX_VERSION: &str = "latest";

/// Git forge hosting a short-form repository reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForgeHost {
    /// github.com, raw content at raw.githubusercontent.com.
    Github,
    /// gitlab.com, raw content at `/-/raw/`.
    Gitlab,
}

impl fmt::Display for ForgeHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Github => write!(f, "github"),
            Self::Gitlab => write!(f, "gitlab"),
        }
    }
}

/// A reference to a package source, parsed from a user string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageSource {
    /// Short-form forge repository (`github:owner/repo[/subpath]`).
    ShortRepo {
        /// Hosting forge.
        host: ForgeHost,
        /// Repository owner.
        owner: String,
        /// Repository name.
        repo: String,
        /// Optional path inside the repository.
        subpath: Option<String>,
    },
    /// Any other HTTP(S) repository URL, used verbatim.
    HttpRepo {
        /// Repository base URL.
        url: String,
    },
    /// Bare name resolved against the package index.
    IndexPackage {
        /// Index package name.
        name: String,
    },
    /// A single `.py`/`.mpy` file fetched directly.
    DirectFile {
        /// Source URL (short or raw form).
        url: String,
        /// Basename of the file.
        filename: String,
    },
}

impl PackageSource {
    /// Parse a user-supplied source string.
    ///
    /// Bare identifiers become [`PackageSource::IndexPackage`]; a `.py` or
    /// `.mpy` tail on any URL form becomes [`PackageSource::DirectFile`].
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ShipError::MalformedSource("empty source".to_string()));
        }

        if let Some((host, rest)) = input
            .strip_prefix("github:")
            .map(|r| (ForgeHost::Github, r))
            .or_else(|| input.strip_prefix("gitlab:").map(|r| (ForgeHost::Gitlab, r)))
        {
            if is_direct_file(rest) {
                return Ok(Self::DirectFile {
                    url: input.to_string(),
                    filename: basename(rest).to_string(),
                });
            }
            let (owner, repo, subpath) = split_repo_path(input, rest)?;
            return Ok(Self::ShortRepo {
                host,
                owner,
                repo,
                subpath,
            });
        }

        if input.starts_with("http://") || input.starts_with("https://") {
            if is_direct_file(input) {
                return Ok(Self::DirectFile {
                    url: input.to_string(),
                    filename: basename(input).to_string(),
                });
            }
            if let Some((host, rest)) = strip_forge_prefix(input) {
                let (owner, repo, subpath) = split_repo_path(input, rest)?;
                return Ok(Self::ShortRepo {
                    host,
                    owner,
                    repo,
                    subpath,
                });
            }
            return Ok(Self::HttpRepo {
                url: input.trim_end_matches('/').to_string(),
            });
        }

        if input.contains("://") {
            return Err(ShipError::MalformedSource(format!(
                "unsupported scheme in {input}"
            )));
        }

        Ok(Self::IndexPackage {
            name: input.to_string(),
        })
    }

    /// Name used for the archive when the root manifest carries none:
    /// the last path segment of the source, with a trailing `.git` stripped.
    #[must_use]
    pub fn package_name(&self) -> String {
        let segment = match self {
            Self::ShortRepo {
                repo, subpath: None, ..
            } => repo.as_str(),
            Self::ShortRepo {
                subpath: Some(sub), ..
            } => basename(sub),
            Self::HttpRepo { url } => basename(url),
            Self::IndexPackage { name } => name.as_str(),
            Self::DirectFile { filename, .. } => filename.as_str(),
        };
        segment.trim_end_matches(".git").to_string()
    }

    /// Whether this source is resolved against the package index.
    #[must_use]
    pub fn is_index(&self) -> bool {
        matches!(self, Self::IndexPackage { .. })
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortRepo {
                host,
                owner,
                repo,
                subpath,
            } => {
                write!(f, "{host}:{owner}/{repo}")?;
                if let Some(sub) = subpath {
                    write!(f, "/{sub}")?;
                }
                Ok(())
            }
            Self::HttpRepo { url } => write!(f, "{url}"),
            Self::IndexPackage { name } => write!(f, "{name}"),
            Self::DirectFile { url, .. } => write!(f, "{url}"),
        }
    }
}

impl FromStr for PackageSource {
    type Err = ShipError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ============================================================================
// Raw-URL rewriting
// ============================================================================

/// Rewrite a source URL to a raw-content HTTP(S) URL at the given version.
///
/// Already-raw URLs pass through unchanged, which makes the operation
/// idempotent. Short forms with fewer than owner+repo segments fail with
/// [`ShipError::MalformedSource`].
pub fn rewrite(url: &str, version: Option<&str>) -> Result<String> {
    let reference = git_ref(version);

    if let Some(rest) = url.strip_prefix("github:") {
        let (owner, repo, subpath) = split_repo_path(url, rest)?;
        return Ok(raw_github_url(&owner, &repo, reference, subpath.as_deref()));
    }
    if let Some(rest) = url.strip_prefix("gitlab:") {
        let (owner, repo, subpath) = split_repo_path(url, rest)?;
        return Ok(raw_gitlab_url(&owner, &repo, reference, subpath.as_deref()));
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        if let Some((host, rest)) = strip_forge_prefix(url) {
            let (owner, repo, subpath) = split_repo_path(url, rest)?;
            return Ok(match host {
                ForgeHost::Github => raw_github_url(&owner, &repo, reference, subpath.as_deref()),
                ForgeHost::Gitlab => raw_gitlab_url(&owner, &repo, reference, subpath.as_deref()),
            });
        }
        return Ok(url.to_string());
    }

    Err(ShipError::MalformedSource(format!(
        "cannot rewrite '{url}' to a raw URL"
    )))
}

/// Normalize a requested version to the git token used on forge raw paths.
///
/// `None`, the empty string and `latest` all mean the default branch tip,
/// spelled `HEAD` on both supported forges.
#[must_use]
pub fn git_ref(version: Option<&str>) -> &str {
    match version {
        None | Some("") | Some(LATEST_INDEX_VERSION) => DEFAULT_BRANCH_REF,
        Some(v) => v,
    }
}

/// Normalize a requested version to the token used on index descriptor paths.
///
/// `None`, the empty string and `HEAD` all mean the newest published version,
/// spelled `latest` by the index.
#[must_use]
pub fn index_ref(version: Option<&str>) -> &str {
    match version {
        None | Some("") | Some(DEFAULT_BRANCH_REF) => LATEST_INDEX_VERSION,
        Some(v) => v,
    }
}

fn raw_github_url(owner: &str, repo: &str, reference: &str, subpath: Option<&str>) -> String {
    match subpath {
        Some(sub) => format!("https://raw.githubusercontent.com/{owner}/{repo}/{reference}/{sub}"),
        None => format!("https://raw.githubusercontent.com/{owner}/{repo}/{reference}"),
    }
}

fn raw_gitlab_url(owner: &str, repo: &str, reference: &str, subpath: Option<&str>) -> String {
    match subpath {
        Some(sub) => format!("https://gitlab.com/{owner}/{repo}/-/raw/{reference}/{sub}"),
        None => format!("https://gitlab.com/{owner}/{repo}/-/raw/{reference}"),
    }
}

/// Match human-form forge URLs, returning the path after the domain.
fn strip_forge_prefix(url: &str) -> Option<(ForgeHost, &str)> {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            if let Some(path) = rest.strip_prefix("github.com/") {
                return Some((ForgeHost::Github, path));
            }
            if let Some(path) = rest.strip_prefix("gitlab.com/") {
                return Some((ForgeHost::Gitlab, path));
            }
        }
    }
    None
}

/// Split `owner/repo[/subpath]`, failing on truncated short forms.
fn split_repo_path(original: &str, rest: &str) -> Result<(String, String, Option<String>)> {
    let rest = rest.trim_matches('/');
    let mut segments = rest.splitn(3, '/');
    let owner = segments.next().unwrap_or_default();
    let repo = segments.next().unwrap_or_default();
    if owner.is_empty() || repo.is_empty() {
        return Err(ShipError::MalformedSource(format!(
            "'{original}' is missing owner/repo segments"
        )));
    }
    let subpath = segments
        .next()
        .map(|s| s.trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty());
    Ok((
        owner.to_string(),
        repo.trim_end_matches(".git").to_string(),
        subpath,
    ))
}

fn is_direct_file(url: &str) -> bool {
    let tail = basename(url);
    tail.ends_with(".py") || tail.ends_with(".mpy")
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

// ============================================================================
// Tests
// ============================================================================
