//! Durable on-disk cache layout and shard cache.
//!
//! Everything shardcast persists lives under one cache root:
//!
//! ```text
//! {root}/shards/{sha256(url)[:16]}_{basename}   write-through shard bodies
//! {root}/filemaps/{sha256(key)[:16]}.json       remote filemap memos
//! {root}/resolved/{sha256(key)[:12]}{_manifest} materialized model dirs
//! ```
//!
//! Shard entries are content-addressed by their source URL and immutable
//! once written; concurrent writers of the same key produce identical
//! bytes, and writes go through a temp file + rename so a torn write never
//! corrupts an existing entry.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::hash::key_prefix;

/// Default cache directory name, created relative to the working directory
/// unless callers configure an absolute root.
pub const DEFAULT_CACHE_DIR: &str = ".shardcast-cache";

/// Hex characters of the source-URL hash in shard cache filenames.
const SHARD_KEY_LEN: usize = 16;

/// Hex characters of the source-key hash in resolved directory names.
const RESOLVED_KEY_LEN: usize = 12;

/// Aggregate numbers for `cache stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of files under the cache root.
    pub files: u64,
    /// Total bytes under the cache root.
    pub bytes: u64,
}

/// The on-disk cache root and its fixed subdirectory layout.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Cache rooted at `root` (created lazily on first write).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of write-through shard bodies.
    pub fn shards_dir(&self) -> PathBuf {
        self.root.join("shards")
    }

    /// Directory of remote filemap memos.
    pub fn filemaps_dir(&self) -> PathBuf {
        self.root.join("filemaps")
    }

    /// Cache path for a shard fetched from `url`: the first 16 hex chars
    /// of the URL's SHA-256, an underscore, then the shard basename.
    pub fn shard_path(&self, url: &str) -> PathBuf {
        let basename = url.rsplit('/').next().unwrap_or(url);
        self.shards_dir()
            .join(format!("{}_{}", key_prefix(url, SHARD_KEY_LEN), basename))
    }

    /// Memo path for the filemap of the source identified by `source_key`.
    pub fn filemap_memo_path(&self, source_key: &str) -> PathBuf {
        self.filemaps_dir()
            .join(format!("{}.json", key_prefix(source_key, SHARD_KEY_LEN)))
    }

    /// Output directory for a direct resolve of `source_key`, optionally
    /// suffixed with the manifest name.
    pub fn resolved_dir(&self, source_key: &str, manifest: Option<&str>) -> PathBuf {
        let hash = key_prefix(source_key, RESOLVED_KEY_LEN);
        let name = match manifest {
            Some(m) => format!("{}_{}", hash, m),
            None => hash,
        };
        self.root.join("resolved").join(name)
    }

    /// Read a cached shard body, if present.
    pub fn read_shard(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.shard_path(url);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "shard cache read failed");
                None
            }
        }
    }

    /// Write a shard body through to disk.
    ///
    /// Failures are logged and swallowed: the in-memory fetch result is
    /// still valid, and the next fetch retries the write.
    pub fn write_shard(&self, url: &str, data: &[u8]) {
        let path = self.shard_path(url);
        if let Err(e) = self.write_atomic(&path, data) {
            warn!(path = %path.display(), error = %e, "shard cache write failed");
        }
    }

    /// Write `data` to `path` via a sibling temp file and rename, so a
    /// concurrent reader never observes a partial body.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no parent"))?;
        fs::create_dir_all(parent)?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".part");
        let tmp = std::path::PathBuf::from(tmp_name);
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Drop every cached artifact (shards, filemap memos, resolved dirs).
    pub fn clear(&self) -> io::Result<CacheStats> {
        let stats = self.stats()?;
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        debug!(files = stats.files, bytes = stats.bytes, "cache cleared");
        Ok(stats)
    }

    /// Count files and bytes under the cache root.
    pub fn stats(&self) -> io::Result<CacheStats> {
        let mut stats = CacheStats::default();
        if self.root.exists() {
            walk(&self.root, &mut stats)?;
        }
        Ok(stats)
    }
}

fn walk(dir: &Path, stats: &mut CacheStats) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            walk(&entry.path(), stats)?;
        } else {
            stats.files += 1;
            stats.bytes += meta.len();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shard_path_shape() {
        let layout = CacheLayout::new("/cache");
        let path = layout.shard_path("https://cdn.example.com/pkg/a.bin.shard.000");
        let name = path.file_name().unwrap().to_str().unwrap();

        let (hash, basename) = name.split_once('_').unwrap();
        assert_eq!(hash.len(), 16);
        assert_eq!(basename, "a.bin.shard.000");
        assert!(path.starts_with("/cache/shards"));
    }

    #[test]
    fn test_shard_write_read_round_trip() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path());
        let url = "https://cdn.example.com/pkg/x.shard.001";

        assert!(layout.read_shard(url).is_none());
        layout.write_shard(url, b"shard body");
        assert_eq!(layout.read_shard(url).unwrap(), b"shard body");
    }

    #[test]
    fn test_distinct_sources_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path());

        layout.write_shard("https://a.example.com/pkg/x.bin", b"from a");
        layout.write_shard("https://b.example.com/pkg/x.bin", b"from b");

        assert_eq!(
            layout.read_shard("https://a.example.com/pkg/x.bin").unwrap(),
            b"from a"
        );
        assert_eq!(
            layout.read_shard("https://b.example.com/pkg/x.bin").unwrap(),
            b"from b"
        );
    }

    #[test]
    fn test_resolved_dir_naming() {
        let layout = CacheLayout::new("/cache");
        let plain = layout.resolved_dir("https://cdn.example.com/pkg", None);
        let named = layout.resolved_dir("https://cdn.example.com/pkg", Some("q4f16"));

        let plain_name = plain.file_name().unwrap().to_str().unwrap();
        let named_name = named.file_name().unwrap().to_str().unwrap();
        assert_eq!(plain_name.len(), 12);
        assert_eq!(named_name, format!("{}_q4f16", plain_name));
    }

    #[test]
    fn test_clear_and_stats() {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path().join("cache"));

        layout.write_shard("https://x/a", &[0u8; 100]);
        layout.write_shard("https://x/b", &[0u8; 50]);

        let stats = layout.stats().unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 150);

        let cleared = layout.clear().unwrap();
        assert_eq!(cleared.files, 2);
        assert!(!layout.root().exists());
        assert_eq!(layout.stats().unwrap().files, 0);
    }
}
