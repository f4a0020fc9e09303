//! Filemap document model.
//!
//! A filemap is the JSON catalogue published alongside the shards of a
//! packaged model repository. It maps every virtual path to a file entry
//! (either a single CDN object or an ordered shard list), and optionally
//! names manifests: subsets of virtual paths that consumers select and
//! that progress reporting uses as its denominator.
//!
//! Every filemap is validated on load; a document that violates the shard
//! contiguity or manifest size invariants is rejected, never repaired.

mod loader;

pub use loader::{FilemapLoadError, FilemapLoader, SourceKey};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Filemap schema version this crate understands.
///
/// Consumers refuse to operate on any other version.
pub const FILEMAP_VERSION: u64 = 5;

/// Name of the filemap document inside a package directory or CDN namespace.
pub const FILEMAP_NAME: &str = "filemap.json";

/// Errors raised while parsing or validating a filemap document.
#[derive(Debug, Error)]
pub enum FilemapError {
    /// Document is valid JSON but carries a schema version we do not speak.
    #[error("unsupported filemap version {found} (expected {FILEMAP_VERSION})")]
    UnsupportedVersion { found: u64 },

    /// Document is not valid JSON or is missing required fields.
    #[error("filemap parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A file entry declares both a `cdn_file` and a shard list.
    #[error("file entry '{path}' declares both cdn_file and shards")]
    AmbiguousStorage { path: String },

    /// A file entry declares neither a `cdn_file` nor a shard list.
    #[error("file entry '{path}' has no storage (missing cdn_file and shards)")]
    MissingStorage { path: String },

    /// Shard list is not contiguous from offset 0.
    #[error("file entry '{path}' shard {index}: expected offset {expected}, found {found}")]
    ShardDiscontiguity {
        path: String,
        index: usize,
        expected: u64,
        found: u64,
    },

    /// Sum of shard sizes disagrees with the entry's declared size.
    #[error("file entry '{path}' declares size {declared} but shards total {actual}")]
    SizeMismatch {
        path: String,
        declared: u64,
        actual: u64,
    },

    /// A manifest lists a virtual path the filemap does not carry.
    #[error("manifest '{name}' references unknown file '{path}'")]
    UnknownManifestFile { name: String, path: String },

    /// A manifest's declared size disagrees with the sum of its files.
    #[error("manifest '{name}' declares size {declared} but its files total {actual}")]
    ManifestSizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },
}

/// One contiguous byte range of a logical file, stored as a CDN-sized object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRef {
    /// Flat CDN object name holding these bytes.
    pub file: String,
    /// Byte offset of this shard within the reassembled logical file.
    pub offset: u64,
    /// Number of bytes in this shard.
    pub size: u64,
    /// SHA-256 of the shard bytes, when recorded at packaging time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ShardRef {
    /// Exclusive end offset of this shard within the logical file.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// How a file entry's bytes are stored on the CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage<'a> {
    /// A single CDN object contains the entire logical file.
    Single(&'a str),
    /// An ordered, contiguous shard list covers the logical file.
    Sharded(&'a [ShardRef]),
}

/// Catalogue entry for one virtual path.
///
/// Exactly one of `cdn_file` and `shards` is set; [`Filemap::validate`]
/// rejects entries that set both or neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Size of the reassembled logical file in bytes.
    pub size: u64,
    /// SHA-256 of the reassembled logical file (not of the shards).
    pub sha256: String,
    /// Single-object storage: the flat CDN object name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_file: Option<String>,
    /// Sharded storage: ordered shard list, contiguous from offset 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<Vec<ShardRef>>,
}

impl FileEntry {
    /// Storage shape of this entry.
    ///
    /// Only meaningful after validation; an invalid entry with both fields
    /// set reports the shard list.
    pub fn storage(&self) -> Storage<'_> {
        match (&self.shards, &self.cdn_file) {
            (Some(shards), _) => Storage::Sharded(shards),
            (None, Some(cdn)) => Storage::Single(cdn),
            (None, None) => Storage::Sharded(&[]),
        }
    }

    /// Whether this entry is stored as multiple shards.
    pub fn is_sharded(&self) -> bool {
        self.shards.is_some()
    }

    fn validate(&self, path: &str) -> Result<(), FilemapError> {
        match (&self.shards, &self.cdn_file) {
            (Some(_), Some(_)) => {
                return Err(FilemapError::AmbiguousStorage {
                    path: path.to_string(),
                })
            }
            (None, None) => {
                return Err(FilemapError::MissingStorage {
                    path: path.to_string(),
                })
            }
            (None, Some(_)) => return Ok(()),
            (Some(_), None) => {}
        }

        let shards = self.shards.as_deref().unwrap_or_default();
        let mut expected = 0u64;
        for (index, shard) in shards.iter().enumerate() {
            if shard.offset != expected {
                return Err(FilemapError::ShardDiscontiguity {
                    path: path.to_string(),
                    index,
                    expected,
                    found: shard.offset,
                });
            }
            expected = shard.end();
        }
        if expected != self.size {
            return Err(FilemapError::SizeMismatch {
                path: path.to_string(),
                declared: self.size,
                actual: expected,
            });
        }
        Ok(())
    }
}

/// A named subset of virtual paths.
///
/// Manifests overlap freely; shared files (tokenizer, config) appear in
/// every manifest of a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Virtual paths belonging to this manifest.
    pub files: Vec<String>,
    /// Sum of the listed files' sizes in bytes.
    pub size: u64,
}

/// The filemap document (schema version 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filemap {
    /// Schema version; must equal [`FILEMAP_VERSION`].
    pub version: u64,
    /// Virtual path → file entry.
    pub files: BTreeMap<String, FileEntry>,
    /// Named manifests, when the packager emitted any.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub manifests: BTreeMap<String, ManifestEntry>,
    /// Informational GGUF descriptors keyed by base name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gguf_metadata: BTreeMap<String, serde_json::Value>,
}

impl Filemap {
    /// Create an empty filemap at the current schema version.
    pub fn new() -> Self {
        Self {
            version: FILEMAP_VERSION,
            files: BTreeMap::new(),
            manifests: BTreeMap::new(),
            gguf_metadata: BTreeMap::new(),
        }
    }

    /// Parse and validate a filemap from JSON text.
    pub fn from_json(text: &str) -> Result<Self, FilemapError> {
        let filemap: Filemap = serde_json::from_str(text)?;
        filemap.validate()?;
        Ok(filemap)
    }

    /// Serialize to pretty-printed JSON (UTF-8, no BOM).
    pub fn to_json(&self) -> String {
        // Filemap contains no non-string keys, so serialization cannot fail.
        serde_json::to_string_pretty(self).expect("filemap serializes")
    }

    /// Check every published-filemap invariant.
    pub fn validate(&self) -> Result<(), FilemapError> {
        if self.version != FILEMAP_VERSION {
            return Err(FilemapError::UnsupportedVersion {
                found: self.version,
            });
        }

        for (path, entry) in &self.files {
            entry.validate(path)?;
        }

        for (name, manifest) in &self.manifests {
            let mut actual = 0u64;
            for path in &manifest.files {
                let entry =
                    self.files
                        .get(path)
                        .ok_or_else(|| FilemapError::UnknownManifestFile {
                            name: name.clone(),
                            path: path.clone(),
                        })?;
                actual += entry.size;
            }
            if actual != manifest.size {
                return Err(FilemapError::ManifestSizeMismatch {
                    name: name.clone(),
                    declared: manifest.size,
                    actual,
                });
            }
        }

        Ok(())
    }

    /// The virtual paths selected by `manifest`, or every file when `None`
    /// or when the named manifest does not exist.
    pub fn file_list(&self, manifest: Option<&str>) -> Vec<String> {
        if let Some(name) = manifest {
            if let Some(entry) = self.manifests.get(name) {
                return entry.files.clone();
            }
        }
        self.files.keys().cloned().collect()
    }

    /// Total bytes across the given virtual paths (unknown paths count 0).
    pub fn total_size(&self, paths: &[String]) -> u64 {
        paths
            .iter()
            .filter_map(|vp| self.files.get(vp))
            .map(|e| e.size)
            .sum()
    }
}

impl Default for Filemap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sharded_entry(sizes: &[u64]) -> FileEntry {
        let mut offset = 0;
        let shards: Vec<ShardRef> = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let shard = ShardRef {
                    file: format!("a.bin.shard.{:03}", i),
                    offset,
                    size,
                    sha256: None,
                };
                offset += size;
                shard
            })
            .collect();
        FileEntry {
            size: sizes.iter().sum(),
            sha256: "e".repeat(64),
            cdn_file: None,
            shards: Some(shards),
        }
    }

    fn sample_filemap() -> Filemap {
        let mut filemap = Filemap::new();
        filemap.files.insert("a.bin".into(), sharded_entry(&[10, 10, 5]));
        filemap.files.insert(
            "config.json".into(),
            FileEntry {
                size: 42,
                sha256: "f".repeat(64),
                cdn_file: Some("config.json".into()),
                shards: None,
            },
        );
        filemap.manifests.insert(
            "q4".into(),
            ManifestEntry {
                files: vec!["a.bin".into(), "config.json".into()],
                size: 67,
            },
        );
        filemap
    }

    #[test]
    fn test_valid_filemap_round_trips() {
        let filemap = sample_filemap();
        filemap.validate().unwrap();

        let json = filemap.to_json();
        let parsed = Filemap::from_json(&json).unwrap();
        assert_eq!(parsed.version, FILEMAP_VERSION);
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.manifests["q4"].size, 67);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut filemap = sample_filemap();
        filemap.version = 4;
        let err = Filemap::from_json(&filemap.to_json()).unwrap_err();
        assert!(matches!(
            err,
            FilemapError::UnsupportedVersion { found: 4 }
        ));
    }

    #[test]
    fn test_shard_gap_rejected() {
        let mut filemap = sample_filemap();
        let entry = filemap.files.get_mut("a.bin").unwrap();
        entry.shards.as_mut().unwrap()[1].offset = 11;
        let err = filemap.validate().unwrap_err();
        assert!(matches!(err, FilemapError::ShardDiscontiguity { index: 1, .. }));
    }

    #[test]
    fn test_first_shard_must_start_at_zero() {
        let mut filemap = sample_filemap();
        let entry = filemap.files.get_mut("a.bin").unwrap();
        entry.shards.as_mut().unwrap()[0].offset = 1;
        let err = filemap.validate().unwrap_err();
        assert!(matches!(
            err,
            FilemapError::ShardDiscontiguity { index: 0, found: 1, .. }
        ));
    }

    #[test]
    fn test_shard_sum_must_match_size() {
        let mut filemap = sample_filemap();
        filemap.files.get_mut("a.bin").unwrap().size = 26;
        let err = filemap.validate().unwrap_err();
        assert!(matches!(
            err,
            FilemapError::SizeMismatch { declared: 26, actual: 25, .. }
        ));
    }

    #[test]
    fn test_both_storage_shapes_rejected() {
        let mut filemap = sample_filemap();
        filemap.files.get_mut("a.bin").unwrap().cdn_file = Some("a.bin".into());
        assert!(matches!(
            filemap.validate().unwrap_err(),
            FilemapError::AmbiguousStorage { .. }
        ));
    }

    #[test]
    fn test_missing_storage_rejected() {
        let mut filemap = sample_filemap();
        let entry = filemap.files.get_mut("config.json").unwrap();
        entry.cdn_file = None;
        assert!(matches!(
            filemap.validate().unwrap_err(),
            FilemapError::MissingStorage { .. }
        ));
    }

    #[test]
    fn test_manifest_size_mismatch_rejected() {
        let mut filemap = sample_filemap();
        filemap.manifests.get_mut("q4").unwrap().size = 100;
        let err = filemap.validate().unwrap_err();
        assert!(matches!(
            err,
            FilemapError::ManifestSizeMismatch { declared: 100, actual: 67, .. }
        ));
    }

    #[test]
    fn test_manifest_unknown_file_rejected() {
        let mut filemap = sample_filemap();
        filemap
            .manifests
            .get_mut("q4")
            .unwrap()
            .files
            .push("ghost.bin".into());
        assert!(matches!(
            filemap.validate().unwrap_err(),
            FilemapError::UnknownManifestFile { .. }
        ));
    }

    #[test]
    fn test_file_list_named_manifest() {
        let filemap = sample_filemap();
        let list = filemap.file_list(Some("q4"));
        assert_eq!(list, vec!["a.bin".to_string(), "config.json".to_string()]);
    }

    #[test]
    fn test_file_list_unknown_manifest_falls_back_to_all() {
        let filemap = sample_filemap();
        let list = filemap.file_list(Some("nope"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_total_size() {
        let filemap = sample_filemap();
        assert_eq!(filemap.total_size(&["a.bin".into()]), 25);
        assert_eq!(
            filemap.total_size(&["a.bin".into(), "config.json".into()]),
            67
        );
        assert_eq!(filemap.total_size(&["ghost".into()]), 0);
    }

    #[test]
    fn test_optional_shard_sha256_survives_serde() {
        let mut filemap = sample_filemap();
        filemap
            .files
            .get_mut("a.bin")
            .unwrap()
            .shards
            .as_mut()
            .unwrap()[0]
            .sha256 = Some("a".repeat(64));
        let parsed = Filemap::from_json(&filemap.to_json()).unwrap();
        let shards = parsed.files["a.bin"].shards.as_ref().unwrap();
        assert_eq!(shards[0].sha256.as_deref(), Some("a".repeat(64).as_str()));
        assert!(shards[1].sha256.is_none());
    }
}
