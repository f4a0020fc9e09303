//! The transport-level resolver: request interception and dispatch.
//!
//! The resolver owns the registered sources, the filemap loader, the
//! reassembler, and the per-source progress machines. Two installations
//! share this core: the [`gateway`] message loop an embedding application
//! drives over channels, and the process-wide [`hook`] that replaces the
//! global fetch function. Both funnel into [`Resolver::handle`], which
//! never fails: every outcome is an HTTP-shaped [`Response`].

mod direct;
mod gateway;
mod hook;
mod matcher;

pub use direct::{resolve_gguf, ResolveError, ResolveOptions, ResolveProgress};
pub use gateway::{AppMessage, Gateway, ResolverMessage, SourceConfig};
pub use hook::{hooked_fetch, install_hook, is_hook_installed, remove_hook};
pub use matcher::{canonicalize_prefix, match_prefix, url_path};

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::filemap::{FileEntry, FilemapLoader};
use crate::progress::{ProgressEvent, ProgressSink, SourceProgress};
use crate::reassemble::{parse_range_header, Body, RangeRequest, Reassembler, Response};
use crate::source::SourceBase;
use crate::store::{CacheLayout, CacheStats, HttpFetch, ReqwestFetch, ShardStore, StoreError};

/// Capacity of the progress broadcast channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// One source registration, as supplied by the embedding application.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    /// Logical URL prefix under which runtime reads will appear.
    pub path_prefix: String,
    /// Where the filemap and shards live.
    pub base: SourceBase,
    /// Fixes the progress denominator when known in advance.
    pub manifest: Option<String>,
    /// Whether to report progress for this source.
    pub progress: bool,
}

impl SourceSpec {
    /// Registration with progress enabled and no fixed manifest.
    pub fn new(path_prefix: impl Into<String>, base: SourceBase) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            base,
            manifest: None,
            progress: true,
        }
    }

    pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }
}

/// A registered source with its canonical prefix and progress machine.
struct RegisteredSource {
    prefix: String,
    base: SourceBase,
    progress: Option<Arc<SourceProgress>>,
}

/// Shared resolver state: sources, loader, reassembler, progress.
pub struct Resolver {
    loader: FilemapLoader,
    reassembler: Reassembler,
    sources: RwLock<Vec<Arc<RegisteredSource>>>,
    progress_tx: broadcast::Sender<ProgressEvent>,
}

/// Snapshot answered to a `status` message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResolverStatus {
    /// Canonical prefixes of the registered sources.
    pub sources: Vec<String>,
    /// Source keys whose filemap has loaded.
    pub filemaps_loaded: Vec<String>,
}

impl Resolver {
    /// Resolver over an existing shard store.
    pub fn new(store: Arc<ShardStore>) -> Arc<Self> {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Arc::new(Self {
            loader: FilemapLoader::new(Arc::clone(&store)),
            reassembler: Reassembler::new(store),
            sources: RwLock::new(Vec::new()),
            progress_tx,
        })
    }

    /// Resolver with a fresh reqwest client and the given cache root.
    pub fn with_cache_root(root: impl Into<std::path::PathBuf>) -> Result<Arc<Self>, StoreError> {
        let http: Arc<dyn HttpFetch> = Arc::new(ReqwestFetch::new()?);
        let store = Arc::new(ShardStore::new(http, CacheLayout::new(root)));
        Ok(Self::new(store))
    }

    /// Subscribe to progress events across all sources.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Replace all registered sources and begin their filemap loads.
    ///
    /// Previous registrations and their progress state are dropped.
    pub fn init(self: &Arc<Self>, specs: Vec<SourceSpec>) {
        let registered: Vec<Arc<RegisteredSource>> = specs
            .into_iter()
            .map(|spec| {
                let prefix = canonicalize_prefix(&spec.path_prefix);
                let progress = spec.progress.then(|| {
                    SourceProgress::new(
                        prefix.clone(),
                        spec.manifest.clone(),
                        self.progress_tx.clone(),
                    )
                });
                Arc::new(RegisteredSource {
                    prefix,
                    base: spec.base,
                    progress,
                })
            })
            .collect();

        info!(sources = registered.len(), "resolver sources registered");
        *self.sources.write().unwrap() = registered.clone();

        // Kick off filemap loads so first requests do not pay the latency.
        for source in registered {
            let resolver = Arc::clone(self);
            tokio::spawn(async move {
                resolver.ensure_filemap(&source).await;
            });
        }
    }

    async fn ensure_filemap(&self, source: &RegisteredSource) -> Option<Arc<crate::filemap::Filemap>> {
        match self.loader.load(&source.base).await {
            Ok(filemap) => {
                if let Some(progress) = &source.progress {
                    progress.init_from_filemap(&filemap);
                }
                Some(filemap)
            }
            Err(e) => {
                warn!(base = %source.base.key(), error = %e, "filemap load failed");
                None
            }
        }
    }

    /// Match a request path against the registered sources.
    fn match_path(&self, path: &str) -> Option<(Arc<RegisteredSource>, String)> {
        let sources = self.sources.read().unwrap();
        for source in sources.iter() {
            if let Some(rel) = match_prefix(&source.prefix, path) {
                return Some((Arc::clone(source), rel.to_string()));
            }
        }
        None
    }

    /// Offer a request to the resolver.
    ///
    /// `path_or_url` may be an absolute URL or a bare path; `range` is the
    /// raw `Range` header value, if any. Returns `None` when no registered
    /// source matches (callers forward those to the original transport),
    /// and an HTTP-shaped response otherwise; this path never errors.
    pub async fn handle(&self, path_or_url: &str, range: Option<&str>) -> Option<Response> {
        let path = url_path(path_or_url);
        let (source, rel) = self.match_path(path)?;
        Some(self.dispatch(&source, &rel, range).await)
    }

    async fn dispatch(&self, source: &RegisteredSource, rel: &str, range: Option<&str>) -> Response {
        let filemap = self.ensure_filemap(source).await;

        let entry = filemap.as_ref().and_then(|f| f.files.get(rel).cloned());
        match entry {
            Some(entry) => self.serve_entry(source, rel, &entry, range).await,
            None => self.serve_miss(source, rel).await,
        }
    }

    /// A filemap hit: reassemble, honoring any byte range.
    async fn serve_entry(
        &self,
        source: &RegisteredSource,
        rel: &str,
        entry: &FileEntry,
        range: Option<&str>,
    ) -> Response {
        let sink: Option<Arc<dyn ProgressSink>> = source
            .progress
            .as_ref()
            .map(|p| Arc::clone(p) as Arc<dyn ProgressSink>);
        if let Some(progress) = &source.progress {
            progress.file_requested(rel);
        }

        let request = match range {
            Some(header) => parse_range_header(header, entry.size),
            None => RangeRequest::Full,
        };

        match request {
            RangeRequest::Unsatisfiable => Response::unsatisfiable(entry.size),
            RangeRequest::Full => {
                let stream = self
                    .reassembler
                    .read_full(&source.base, rel, entry, sink);
                Response::full(entry.size, Body::Stream(stream))
            }
            RangeRequest::Bytes { start, end } => {
                match self
                    .reassembler
                    .read_range_with_progress(&source.base, rel, entry, start, end, sink)
                    .await
                {
                    Ok(bytes) => Response::partial(start, end, entry.size, bytes),
                    Err(StoreError::NotFound(url)) => {
                        warn!(rel, url = %url, "shard missing behind filemap entry");
                        Response::not_found()
                    }
                    Err(e) => {
                        warn!(rel, error = %e, "range read failed");
                        Response::bad_gateway()
                    }
                }
            }
        }
    }

    /// A path under the prefix that the filemap does not know.
    async fn serve_miss(&self, source: &RegisteredSource, rel: &str) -> Response {
        match &source.base {
            SourceBase::Local(dir) => {
                // Flat repos may carry literal files next to the shards.
                match std::fs::read(dir.join(rel)) {
                    Ok(bytes) => {
                        debug!(rel, "serving literal local file");
                        let mut response = Response::full(bytes.len() as u64, Body::Bytes(bytes));
                        response.accept_ranges = false;
                        response
                    }
                    Err(_) => Response::not_found(),
                }
            }
            SourceBase::Remote(_) => {
                // Proxy through and re-emit with an owned body so the
                // embedder's isolation survives.
                match self
                    .reassembler
                    .store()
                    .read(&source.base, rel)
                    .await
                {
                    Ok(bytes) => {
                        debug!(rel, "proxied unmapped path from CDN");
                        let mut response =
                            Response::full(bytes.len() as u64, Body::Bytes((*bytes).clone()));
                        response.accept_ranges = false;
                        response
                    }
                    Err(StoreError::NotFound(_)) => Response::not_found(),
                    Err(e) => {
                        warn!(rel, error = %e, "proxy fetch failed");
                        Response::bad_gateway()
                    }
                }
            }
        }
    }

    /// Force-finalize progress for the source registered at `prefix`.
    pub fn complete(&self, prefix: &str) {
        let canonical = canonicalize_prefix(prefix);
        let sources = self.sources.read().unwrap();
        for source in sources.iter() {
            if source.prefix == canonical {
                if let Some(progress) = &source.progress {
                    progress.complete();
                }
            }
        }
    }

    /// Drop the shard cache and the filemap memo.
    pub fn clear_cache(&self) -> std::io::Result<CacheStats> {
        self.loader.invalidate();
        self.reassembler.store().clear_cache()
    }

    /// Introspection for the `status` message.
    pub fn status(&self) -> ResolverStatus {
        ResolverStatus {
            sources: self
                .sources
                .read()
                .unwrap()
                .iter()
                .map(|s| s.prefix.clone())
                .collect(),
            filemaps_loaded: self.loader.loaded_keys(),
        }
    }

    /// The filemap loader (shared with the downloader).
    pub fn loader(&self) -> &FilemapLoader {
        &self.loader
    }

    /// The reassembler (shared with direct resolve and the downloader).
    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }
}
