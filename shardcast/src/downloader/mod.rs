//! Bulk downloader: materialize filemap contents into a target directory.
//!
//! Unlike the direct resolve API, which owns its cache-derived output
//! location, the downloader writes wherever the user points it, accepts a
//! union of manifest names, and copies the filemap alongside the files so
//! the output directory is itself a loadable source.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::filemap::{FileEntry, Filemap, FilemapLoadError, FilemapLoader, FILEMAP_NAME};
use crate::hash::sha256_file;
use crate::reassemble::Reassembler;
use crate::source::{strip_filemap_suffix, SourceBase};
use crate::store::StoreError;

/// Errors from a bulk download run.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Load(#[from] FilemapLoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        DownloadError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Present with the right size; skipped.
    Cached,
    /// Reassembled and written.
    Downloaded,
    /// Written, and its SHA-256 matched.
    Verified,
    /// Something went wrong; the run continues.
    Failed,
}

/// Per-run accounting.
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub cached: usize,
    pub verified: usize,
    pub failed: Vec<String>,
    pub bytes_total: u64,
    pub output: PathBuf,
}

/// One manifest line for `list` mode.
#[derive(Debug, Clone)]
pub struct ManifestSummary {
    pub name: String,
    pub files: usize,
    pub size: u64,
}

/// Options for a bulk download.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Target directory.
    pub output: PathBuf,
    /// Manifest names; their file lists are unioned. Empty = all files.
    pub manifests: Vec<String>,
    /// Verify SHA-256 after writing.
    pub verify: bool,
}

/// Bulk puller over a filemap loader and reassembler.
pub struct Downloader {
    loader: FilemapLoader,
    reassembler: Reassembler,
}

impl Downloader {
    pub fn new(loader: FilemapLoader, reassembler: Reassembler) -> Self {
        Self {
            loader,
            reassembler,
        }
    }

    /// Load the filemap for a source given as a base or a direct
    /// `…/filemap.json` location.
    pub async fn load(
        &self,
        source: &str,
    ) -> Result<(SourceBase, std::sync::Arc<Filemap>), DownloadError> {
        let base = SourceBase::parse(strip_filemap_suffix(source));
        let filemap = self.loader.load(&base).await?;
        Ok((base, filemap))
    }

    /// Summarize the manifests a source offers (list-only mode).
    pub async fn list_manifests(&self, source: &str) -> Result<Vec<ManifestSummary>, DownloadError> {
        let (_, filemap) = self.load(source).await?;
        Ok(filemap
            .manifests
            .iter()
            .map(|(name, entry)| ManifestSummary {
                name: name.clone(),
                files: entry.files.len(),
                size: entry.size,
            })
            .collect())
    }

    /// Download the selected manifests' union into the output directory.
    ///
    /// Individual file failures are recorded and do not abort the run;
    /// the filemap is copied alongside the files at the end.
    pub async fn download(
        &self,
        source: &str,
        opts: &DownloadOptions,
    ) -> Result<DownloadReport, DownloadError> {
        let (base, filemap) = self.load(source).await?;
        let file_list = union_file_list(&filemap, &opts.manifests);

        fs::create_dir_all(&opts.output).map_err(|e| DownloadError::io(&opts.output, e))?;

        let mut report = DownloadReport {
            bytes_total: filemap.total_size(&file_list),
            output: opts.output.clone(),
            ..Default::default()
        };

        for vp in &file_list {
            let Some(entry) = filemap.files.get(vp) else {
                continue;
            };
            let dest = opts.output.join(vp);
            match self.fetch_one(&base, vp, entry, &dest, opts.verify).await {
                Ok(FileOutcome::Cached) => report.cached += 1,
                Ok(FileOutcome::Verified) => {
                    report.downloaded += 1;
                    report.verified += 1;
                }
                Ok(FileOutcome::Downloaded) => report.downloaded += 1,
                Ok(FileOutcome::Failed) => {
                    warn!(vp, "sha256 mismatch; file removed");
                    report.failed.push(vp.clone());
                }
                Err(e) => {
                    warn!(vp, error = %e, "file download failed");
                    report.failed.push(vp.clone());
                }
            }
        }

        // The output directory becomes a loadable source of its own.
        let filemap_dest = opts.output.join(FILEMAP_NAME);
        fs::write(&filemap_dest, filemap.to_json())
            .map_err(|e| DownloadError::io(&filemap_dest, e))?;

        info!(
            downloaded = report.downloaded,
            cached = report.cached,
            verified = report.verified,
            failed = report.failed.len(),
            output = %opts.output.display(),
            "download run complete"
        );
        Ok(report)
    }

    async fn fetch_one(
        &self,
        base: &SourceBase,
        vp: &str,
        entry: &FileEntry,
        dest: &Path,
        verify: bool,
    ) -> Result<FileOutcome, DownloadError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::io(parent, e))?;
        }
        if dest.metadata().map(|m| m.len()).ok() == Some(entry.size) {
            return Ok(FileOutcome::Cached);
        }

        let mut stream = self.reassembler.read_full(base, vp, entry, None);
        let mut file = fs::File::create(dest).map_err(|e| DownloadError::io(dest, e))?;
        use std::io::Write;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).map_err(|e| DownloadError::io(dest, e))?;
        }
        file.flush().map_err(|e| DownloadError::io(dest, e))?;
        drop(file);

        if verify && !entry.sha256.is_empty() {
            let actual = sha256_file(dest).map_err(|e| DownloadError::io(dest, e))?;
            if actual != entry.sha256 {
                fs::remove_file(dest).ok();
                return Ok(FileOutcome::Failed);
            }
            return Ok(FileOutcome::Verified);
        }
        Ok(FileOutcome::Downloaded)
    }
}

/// Union of the named manifests' file lists (all files when none named).
/// Unknown manifest names are reported and skipped.
fn union_file_list(filemap: &Filemap, manifests: &[String]) -> Vec<String> {
    if manifests.is_empty() {
        return filemap.files.keys().cloned().collect();
    }

    let mut union: BTreeSet<String> = BTreeSet::new();
    for name in manifests {
        match filemap.manifests.get(name) {
            Some(entry) => union.extend(entry.files.iter().cloned()),
            None => warn!(
                manifest = %name,
                available = ?filemap.manifests.keys().collect::<Vec<_>>(),
                "manifest not found; skipping"
            ),
        }
    }
    union.into_iter().collect()
}
