//! Direct resolve API: materialize a manifest to a local directory.
//!
//! For out-of-band consumers (ML libraries that want plain files on disk)
//! the resolver reassembles every file of a manifest into a deterministic
//! cache directory. Shards are written at their declared offsets rather
//! than appended, so a partially written file holds correct bytes at
//! correct positions.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::filemap::{FileEntry, FilemapLoadError};
use crate::hash::sha256_file;
use crate::reassemble::storage_shards;
use crate::source::SourceBase;
use crate::store::StoreError;

use super::Resolver;

/// Errors from a direct resolve.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Load(#[from] FilemapLoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reassembled bytes hash differently than the filemap declares. The
    /// partial output has been deleted.
    #[error("sha256 mismatch for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ResolveError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Progress tick handed to a direct-resolve callback.
#[derive(Debug, Clone)]
pub struct ResolveProgress {
    pub percent: u8,
    pub loaded: u64,
    pub total: u64,
    pub file: String,
    pub done: bool,
}

type ProgressFn = Box<dyn Fn(&ResolveProgress) + Send + Sync>;

/// Options for [`Resolver::resolve`].
#[derive(Default)]
pub struct ResolveOptions {
    /// Manifest to materialize; `None` materializes every file.
    pub manifest: Option<String>,
    /// Verify each file's SHA-256 after writing; mismatches delete the
    /// file and fail the call.
    pub verify: bool,
    /// Progress callback.
    pub on_progress: Option<ProgressFn>,
}

impl ResolveOptions {
    pub fn manifest(name: impl Into<String>) -> Self {
        Self {
            manifest: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_verify(mut self) -> Self {
        self.verify = true;
        self
    }
}

impl Resolver {
    /// Materialize a source's files into the deterministic cache directory
    /// and return its path.
    pub async fn resolve(
        &self,
        source: &str,
        opts: &ResolveOptions,
    ) -> Result<PathBuf, ResolveError> {
        let base = SourceBase::parse(source);
        let filemap = self.loader().load(&base).await?;
        let file_list = filemap.file_list(opts.manifest.as_deref());

        let out_dir = self
            .reassembler()
            .store()
            .cache()
            .resolved_dir(&base.key(), opts.manifest.as_deref());
        fs::create_dir_all(&out_dir).map_err(|e| ResolveError::io(&out_dir, e))?;

        let total: u64 = filemap.total_size(&file_list);
        let mut loaded: u64 = 0;

        let tick = |loaded: u64, file: &str, done: bool| {
            if let Some(cb) = &opts.on_progress {
                let percent = if total == 0 {
                    if done { 100 } else { 0 }
                } else {
                    ((loaded * 100) / total).min(100) as u8
                };
                cb(&ResolveProgress {
                    percent,
                    loaded,
                    total,
                    file: file.to_string(),
                    done,
                });
            }
        };

        for vp in &file_list {
            let Some(entry) = filemap.files.get(vp) else {
                continue;
            };
            let out_path = out_dir.join(vp);
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|e| ResolveError::io(parent, e))?;
            }

            // Resume: an output of the right size is taken as done.
            let existing = out_path.metadata().map(|m| m.len()).ok();
            if existing == Some(entry.size) {
                loaded += entry.size;
                tick(loaded, vp, false);
                continue;
            }

            self.materialize_entry(&base, vp, entry, &out_path, &mut loaded, &tick)
                .await?;

            if opts.verify && !entry.sha256.is_empty() {
                let actual =
                    sha256_file(&out_path).map_err(|e| ResolveError::io(&out_path, e))?;
                if actual != entry.sha256 {
                    fs::remove_file(&out_path).ok();
                    return Err(ResolveError::Integrity {
                        path: vp.clone(),
                        expected: entry.sha256.clone(),
                        actual,
                    });
                }
                debug!(vp, "sha256 verified");
            }
        }

        tick(total, "", true);
        info!(out_dir = %out_dir.display(), files = file_list.len(), "resolve complete");
        Ok(out_dir)
    }

    /// Like [`Resolver::resolve`], returning virtual path → absolute path.
    pub async fn resolve_files(
        &self,
        source: &str,
        opts: &ResolveOptions,
    ) -> Result<BTreeMap<String, PathBuf>, ResolveError> {
        let out_dir = self.resolve(source, opts).await?;

        let base = SourceBase::parse(source);
        let filemap = self.loader().load(&base).await?;
        Ok(filemap
            .file_list(opts.manifest.as_deref())
            .into_iter()
            .map(|vp| {
                let path = out_dir.join(&vp);
                (vp, path)
            })
            .collect())
    }

    async fn materialize_entry(
        &self,
        base: &SourceBase,
        vp: &str,
        entry: &FileEntry,
        out_path: &Path,
        loaded: &mut u64,
        tick: &impl Fn(u64, &str, bool),
    ) -> Result<(), ResolveError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(out_path)
            .map_err(|e| ResolveError::io(out_path, e))?;

        for shard in storage_shards(entry) {
            let bytes = self.reassembler().store().read(base, &shard.file).await?;
            file.seek(SeekFrom::Start(shard.offset))
                .map_err(|e| ResolveError::io(out_path, e))?;
            file.write_all(&bytes)
                .map_err(|e| ResolveError::io(out_path, e))?;
            *loaded += shard.size;
            tick(*loaded, vp, false);
        }

        file.flush().map_err(|e| ResolveError::io(out_path, e))?;
        Ok(())
    }
}

/// One-shot resolve of every `.gguf` file in a manifest, sorted.
///
/// Convenience for llama-family loaders that want model paths directly.
pub async fn resolve_gguf(
    resolver: &Resolver,
    source: &str,
    manifest: Option<&str>,
) -> Result<Vec<PathBuf>, ResolveError> {
    let opts = ResolveOptions {
        manifest: manifest.map(String::from),
        ..Default::default()
    };
    let files = resolver.resolve_files(source, &opts).await?;
    let mut paths: Vec<PathBuf> = files
        .into_iter()
        .filter(|(vp, _)| vp.ends_with(".gguf"))
        .map(|(_, path)| path)
        .collect();
    paths.sort();
    Ok(paths)
}
