//! Source addressing: where a packaged repository lives.
//!
//! A source is either a remote CDN namespace (URL root) or a local flat
//! directory. Both hold the same layout: `filemap.json` plus flat shard
//! objects. The canonical *source key* identifies a source across the
//! filemap memo, the shard cache, and the resolved-output directories.

use std::path::{Path, PathBuf};

/// Where a packaged repository's filemap and shards live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceBase {
    /// Flat directory on the local filesystem.
    Local(PathBuf),
    /// CDN URL root (no trailing slash).
    Remote(String),
}

impl SourceBase {
    /// Classify a user-supplied source string as a local path or a URL.
    ///
    /// `http://` and `https://` are remote; everything else (including
    /// `file://`) is treated as a local path.
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            SourceBase::Remote(source.trim_end_matches('/').to_string())
        } else if let Some(path) = source.strip_prefix("file://") {
            SourceBase::Local(PathBuf::from(path))
        } else {
            SourceBase::Local(PathBuf::from(source))
        }
    }

    /// Whether this source reads from the local filesystem.
    pub fn is_local(&self) -> bool {
        matches!(self, SourceBase::Local(_))
    }

    /// Canonical key for memoization and cache-path derivation.
    ///
    /// Local paths are absolutized when possible so that `./pkg` and its
    /// absolute spelling share one memo slot.
    pub fn key(&self) -> String {
        match self {
            SourceBase::Local(path) => path
                .canonicalize()
                .unwrap_or_else(|_| path.clone())
                .to_string_lossy()
                .into_owned(),
            SourceBase::Remote(url) => url.clone(),
        }
    }

    /// Absolute URL of a flat object under a remote source.
    ///
    /// Panics in debug builds if called on a local source; callers branch
    /// on [`SourceBase::is_local`] first.
    pub fn url_for(&self, name: &str) -> String {
        match self {
            SourceBase::Remote(url) => format!("{}/{}", url, name),
            SourceBase::Local(path) => {
                debug_assert!(false, "url_for on local source");
                format!("{}/{}", path.display(), name)
            }
        }
    }

    /// Path of a flat object under a local source.
    pub fn path_for(&self, name: &str) -> PathBuf {
        match self {
            SourceBase::Local(path) => path.join(name),
            SourceBase::Remote(url) => {
                debug_assert!(false, "path_for on remote source");
                PathBuf::from(url).join(name)
            }
        }
    }
}

/// Normalize a source argument that may point directly at `filemap.json`.
///
/// The downloader accepts both `…/filemap.json` and the bare base; both
/// resolve to the same base.
pub fn strip_filemap_suffix(source: &str) -> &str {
    source
        .strip_suffix("/filemap.json")
        .or_else(|| {
            Path::new(source)
                .file_name()
                .and_then(|n| n.to_str())
                .filter(|n| *n == "filemap.json")
                .and_then(|_| source.rsplit_once('/').map(|(base, _)| base))
        })
        .unwrap_or(source)
}
