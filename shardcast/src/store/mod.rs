//! Shard store: content-addressed byte storage over local directories and
//! remote CDN namespaces.
//!
//! Remote reads are retried with linear backoff, coalesced per URL so the
//! network sees at most one GET per shard at a time, written through to the
//! durable disk cache, and kept warm in a size-bounded moka memory cache.
//! Local reads go straight to the filesystem; the OS page cache already
//! deduplicates those.

mod cache;
mod http;
mod inflight;

pub use cache::{CacheLayout, CacheStats, DEFAULT_CACHE_DIR};
pub use http::{BoxFuture, HttpFetch, RangeReply, ReqwestFetch};
pub use inflight::InflightMap;

#[cfg(test)]
pub(crate) use http::tests::MockFetch;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::source::SourceBase;

/// Default number of attempts for a remote shard fetch.
const DEFAULT_RETRIES: u32 = 3;

/// Base unit of the linear retry backoff (1 s, 2 s, ...).
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Default capacity of the in-memory shard cache (512 MiB).
const DEFAULT_MEMORY_CAPACITY: u64 = 512 * 1024 * 1024;

/// Errors from shard and filemap byte transport.
///
/// Cloneable so a single failed fetch can settle every coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The object does not exist at the source (HTTP 404 or missing file).
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport-level failure talking to the CDN.
    #[error("http error for {url}: {reason}")]
    Http { url: String, reason: String },

    /// Every retry attempt failed.
    #[error("fetch of {url} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// Local filesystem failure.
    #[error("i/o error at {path}: {reason}")]
    Io { path: String, reason: String },
}

impl StoreError {
    fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(path.display().to_string())
        } else {
            StoreError::Io {
                path: path.display().to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Content-addressed shard storage with caching and fetch coalescing.
pub struct ShardStore {
    http: Arc<dyn HttpFetch>,
    cache: CacheLayout,
    memory: moka::future::Cache<String, Arc<Vec<u8>>>,
    inflight: InflightMap,
    retries: u32,
    backoff: Duration,
}

impl ShardStore {
    /// Create a store over the given HTTP client and cache root.
    pub fn new(http: Arc<dyn HttpFetch>, cache: CacheLayout) -> Self {
        let memory = moka::future::Cache::builder()
            .weigher(|_key: &String, value: &Arc<Vec<u8>>| {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(DEFAULT_MEMORY_CAPACITY)
            .build();

        Self {
            http,
            cache,
            memory,
            inflight: InflightMap::new(),
            retries: DEFAULT_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Override the retry policy (attempt count and linear backoff unit).
    pub fn with_retry_policy(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries.max(1);
        self.backoff = backoff;
        self
    }

    /// The durable cache layout backing this store.
    pub fn cache(&self) -> &CacheLayout {
        &self.cache
    }

    /// Read the full body of a flat object (shard, config file, ...).
    ///
    /// Remote reads consult the memory cache, then the disk cache, then
    /// fetch over HTTP with retries, coalesced so concurrent readers of
    /// one URL share a single GET. Successful fetches are written through
    /// to disk; a cache write failure is non-fatal.
    pub async fn read(
        &self,
        base: &SourceBase,
        name: &str,
    ) -> Result<Arc<Vec<u8>>, StoreError> {
        match base {
            SourceBase::Local(_) => {
                let path = base.path_for(name);
                let bytes = std::fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
                Ok(Arc::new(bytes))
            }
            SourceBase::Remote(_) => {
                let url = base.url_for(name);

                if let Some(hit) = self.memory.get(&url).await {
                    return Ok(hit);
                }
                if let Some(bytes) = self.cache.read_shard(&url) {
                    let bytes = Arc::new(bytes);
                    self.memory.insert(url, Arc::clone(&bytes)).await;
                    return Ok(bytes);
                }

                let http = Arc::clone(&self.http);
                let cache = self.cache.clone();
                let retries = self.retries;
                let backoff = self.backoff;
                let fetch_url = url.clone();

                let bytes = self
                    .inflight
                    .fetch(&url, async move {
                        let bytes =
                            fetch_with_retry(http.as_ref(), &fetch_url, retries, backoff).await?;
                        cache.write_shard(&fetch_url, &bytes);
                        Ok(Arc::new(bytes))
                    })
                    .await?;

                self.memory.insert(url, Arc::clone(&bytes)).await;
                Ok(bytes)
            }
        }
    }

    /// Read bytes `[start, end]` (inclusive) of a flat object.
    ///
    /// A cached full body is sliced in process. Otherwise the range is
    /// requested from the origin; origins that answer with the full object
    /// (HTTP 200, no range support) have that body cached for later reuse
    /// and sliced here.
    pub async fn read_range(
        &self,
        base: &SourceBase,
        name: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, StoreError> {
        match base {
            SourceBase::Local(_) => {
                let path = base.path_for(name);
                let mut file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
                file.seek(SeekFrom::Start(start))
                    .map_err(|e| StoreError::io(&path, e))?;
                let mut buf = vec![0u8; (end - start + 1) as usize];
                file.read_exact(&mut buf)
                    .map_err(|e| StoreError::io(&path, e))?;
                Ok(buf)
            }
            SourceBase::Remote(_) => {
                let url = base.url_for(name);

                let slice = |full: &[u8]| -> Vec<u8> {
                    let end = ((end + 1) as usize).min(full.len());
                    full[start as usize..end].to_vec()
                };

                if let Some(hit) = self.memory.get(&url).await {
                    return Ok(slice(&hit));
                }
                if let Some(bytes) = self.cache.read_shard(&url) {
                    let sliced = slice(&bytes);
                    self.memory.insert(url, Arc::new(bytes)).await;
                    return Ok(sliced);
                }

                match self.http.get_range(&url, start, end).await? {
                    RangeReply::Partial(bytes) => Ok(bytes),
                    RangeReply::Full(bytes) => {
                        debug!(url = %url, "origin ignored range; caching full shard");
                        let sliced = slice(&bytes);
                        self.cache.write_shard(&url, &bytes);
                        self.memory.insert(url, Arc::new(bytes)).await;
                        Ok(sliced)
                    }
                }
            }
        }
    }

    /// Drop the durable and in-memory caches.
    pub fn clear_cache(&self) -> std::io::Result<CacheStats> {
        self.memory.invalidate_all();
        self.cache.clear()
    }
}

async fn fetch_with_retry(
    http: &dyn HttpFetch,
    url: &str,
    retries: u32,
    backoff: Duration,
) -> Result<Vec<u8>, StoreError> {
    let mut last: Option<StoreError> = None;

    for attempt in 1..=retries {
        match http.get(url).await {
            Ok(bytes) => return Ok(bytes),
            // A 404 will not improve with retries.
            Err(err @ StoreError::NotFound(_)) => return Err(err),
            Err(err) => {
                warn!(url = %url, attempt, error = %err, "shard fetch failed");
                last = Some(err);
                if attempt < retries {
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }

    Err(StoreError::RetriesExhausted {
        url: url.to_string(),
        attempts: retries,
        reason: last.map(|e| e.to_string()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::http::tests::MockFetch;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn remote() -> SourceBase {
        SourceBase::Remote("https://cdn.example.com/pkg".into())
    }

    fn store_with(mock: MockFetch, temp: &TempDir) -> ShardStore {
        ShardStore::new(Arc::new(mock), CacheLayout::new(temp.path().join("cache")))
            .with_retry_policy(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_remote_read_writes_through_cache() {
        let temp = TempDir::new().unwrap();
        let mock = MockFetch::new();
        mock.insert("https://cdn.example.com/pkg/a.bin", b"abc".to_vec());
        let store = store_with(mock, &temp);

        let bytes = store.read(&remote(), "a.bin").await.unwrap();
        assert_eq!(&**bytes, b"abc");

        // Now present on disk under the derived key.
        assert_eq!(
            store
                .cache()
                .read_shard("https://cdn.example.com/pkg/a.bin")
                .unwrap(),
            b"abc"
        );
    }

    #[tokio::test]
    async fn test_repeat_reads_hit_cache_not_network() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockFetch::new());
        mock.insert("https://cdn.example.com/pkg/a.bin", b"abc".to_vec());
        let store = ShardStore::new(
            Arc::clone(&mock) as Arc<dyn HttpFetch>,
            CacheLayout::new(temp.path().join("cache")),
        );

        for _ in 0..3 {
            store.read(&remote(), "a.bin").await.unwrap();
        }
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_local_read() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("x.bin"), b"local bytes").unwrap();
        let cache_dir = TempDir::new().unwrap();
        let store = ShardStore::new(
            Arc::new(MockFetch::new()),
            CacheLayout::new(cache_dir.path()),
        );

        let base = SourceBase::Local(temp.path().to_path_buf());
        let bytes = store.read(&base, "x.bin").await.unwrap();
        assert_eq!(&**bytes, b"local bytes");

        let err = store.read(&base, "missing.bin").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_local_range_read() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("x.bin"), (0u8..20).collect::<Vec<_>>()).unwrap();
        let cache_dir = TempDir::new().unwrap();
        let store = ShardStore::new(
            Arc::new(MockFetch::new()),
            CacheLayout::new(cache_dir.path()),
        );

        let base = SourceBase::Local(temp.path().to_path_buf());
        let bytes = store.read_range(&base, "x.bin", 5, 9).await.unwrap();
        assert_eq!(bytes, vec![5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_remote_range_partial_not_cached() {
        let temp = TempDir::new().unwrap();
        let mock = MockFetch::new();
        mock.insert(
            "https://cdn.example.com/pkg/a.bin",
            (0u8..100).collect::<Vec<_>>(),
        );
        let store = store_with(mock, &temp);

        let bytes = store.read_range(&remote(), "a.bin", 10, 14).await.unwrap();
        assert_eq!(bytes, vec![10, 11, 12, 13, 14]);
        // Partial replies do not populate the shard cache.
        assert!(store
            .cache()
            .read_shard("https://cdn.example.com/pkg/a.bin")
            .is_none());
    }

    #[tokio::test]
    async fn test_remote_range_full_reply_cached_and_sliced() {
        let temp = TempDir::new().unwrap();
        let mut mock = MockFetch::new();
        mock.honor_ranges = false;
        mock.insert(
            "https://cdn.example.com/pkg/a.bin",
            (0u8..100).collect::<Vec<_>>(),
        );
        let store = store_with(mock, &temp);

        let bytes = store.read_range(&remote(), "a.bin", 10, 14).await.unwrap();
        assert_eq!(bytes, vec![10, 11, 12, 13, 14]);
        // The 200 body was kept for later full reads.
        assert_eq!(
            store
                .cache()
                .read_shard("https://cdn.example.com/pkg/a.bin")
                .unwrap()
                .len(),
            100
        );
    }

    #[tokio::test]
    async fn test_cached_shard_serves_ranges_without_network() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockFetch::new());
        mock.insert(
            "https://cdn.example.com/pkg/a.bin",
            (0u8..50).collect::<Vec<_>>(),
        );
        let store = ShardStore::new(
            Arc::clone(&mock) as Arc<dyn HttpFetch>,
            CacheLayout::new(temp.path().join("cache")),
        );

        store.read(&remote(), "a.bin").await.unwrap();
        let bytes = store.read_range(&remote(), "a.bin", 40, 49).await.unwrap();
        assert_eq!(bytes, (40u8..50).collect::<Vec<_>>());
        assert_eq!(mock.request_count(), 1);
    }

    struct FlakyFetch {
        failures_left: AtomicUsize,
        body: Vec<u8>,
    }

    impl HttpFetch for FlakyFetch {
        fn get(&self, url: &str) -> BoxFuture<'_, Result<Vec<u8>, StoreError>> {
            let url = url.to_string();
            Box::pin(async move {
                if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                    Err(StoreError::Http {
                        url,
                        reason: "HTTP 503".into(),
                    })
                } else {
                    Ok(self.body.clone())
                }
            })
        }

        fn get_range(
            &self,
            _url: &str,
            _start: u64,
            _end: u64,
        ) -> BoxFuture<'_, Result<RangeReply, StoreError>> {
            Box::pin(async { Ok(RangeReply::Full(self.body.clone())) })
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let temp = TempDir::new().unwrap();
        let flaky = FlakyFetch {
            failures_left: AtomicUsize::new(2),
            body: b"eventually".to_vec(),
        };
        let store = ShardStore::new(Arc::new(flaky), CacheLayout::new(temp.path()))
            .with_retry_policy(3, Duration::from_millis(1));

        let bytes = store.read(&remote(), "a.bin").await.unwrap();
        assert_eq!(&**bytes, b"eventually");
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_typed_error() {
        let temp = TempDir::new().unwrap();
        let flaky = FlakyFetch {
            failures_left: AtomicUsize::new(10),
            body: Vec::new(),
        };
        let store = ShardStore::new(Arc::new(flaky), CacheLayout::new(temp.path()))
            .with_retry_policy(3, Duration::from_millis(1));

        let err = store.read(&remote(), "a.bin").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let temp = TempDir::new().unwrap();
        let mock = Arc::new(MockFetch::new());
        mock.insert("https://cdn.example.com/pkg/a.bin", b"abc".to_vec());
        let store = ShardStore::new(
            Arc::clone(&mock) as Arc<dyn HttpFetch>,
            CacheLayout::new(temp.path().join("cache")),
        );

        store.read(&remote(), "a.bin").await.unwrap();
        store.clear_cache().unwrap();
        store.read(&remote(), "a.bin").await.unwrap();
        assert_eq!(mock.request_count(), 2);
    }
}
