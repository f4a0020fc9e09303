//! Reassembly of logical files from their shards.
//!
//! Full reads stream shard-sized buffers in declared offset order without
//! ever materializing the whole logical file. Ranged reads compute the
//! minimal shard cover, fetch covered shards concurrently (whole-shard
//! fetches when the range spans a shard end-to-end, ranged GETs against
//! the shard otherwise), and assemble the reply in offset order.
//!
//! Responses here are HTTP-shaped values, not sockets: the gateway and the
//! process hook hand them to embedding applications as-is.

mod range;

pub use range::{parse_range_header, shard_cover, slice_within, RangeRequest};

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;

use crate::filemap::FileEntry;
use crate::progress::ProgressSink;
use crate::source::SourceBase;
use crate::store::{ShardStore, StoreError};

/// Lazy, finite, non-restartable sequence of shard-sized byte buffers.
pub type ByteStream = BoxStream<'static, Result<Arc<Vec<u8>>, StoreError>>;

/// Body of an HTTP-shaped response.
pub enum Body {
    /// No body (404/416).
    Empty,
    /// Fully assembled bytes (range replies, proxied objects).
    Bytes(Vec<u8>),
    /// Streamed shard buffers in offset order (full reads).
    Stream(ByteStream),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Bytes(bytes) => write!(f, "Body::Bytes({} bytes)", bytes.len()),
            Body::Stream(_) => write!(f, "Body::Stream"),
        }
    }
}

impl Body {
    /// Drain the body into one buffer (tests and direct consumers).
    pub async fn collect(self) -> Result<Vec<u8>, StoreError> {
        match self {
            Body::Empty => Ok(Vec::new()),
            Body::Bytes(bytes) => Ok(bytes),
            Body::Stream(mut stream) => {
                let mut out = Vec::new();
                while let Some(chunk) = stream.next().await {
                    out.extend_from_slice(&chunk?);
                }
                Ok(out)
            }
        }
    }
}

/// An HTTP-shaped response emitted by the resolver.
///
/// The body is wholly owned by this process; upstream CDN responses are
/// never passed through, so an embedding document stays isolated.
#[derive(Debug)]
pub struct Response {
    /// 200, 206, 404, 416, or 5xx.
    pub status: u16,
    /// `Content-Type` header value.
    pub content_type: &'static str,
    /// `Content-Length`: the logical byte count of the body.
    pub content_length: u64,
    /// `Content-Range` for 206/416 replies.
    pub content_range: Option<String>,
    /// Whether `Accept-Ranges: bytes` is advertised.
    pub accept_ranges: bool,
    pub body: Body,
}

impl Response {
    /// Full logical file: status 200.
    pub fn full(size: u64, body: Body) -> Self {
        Self {
            status: 200,
            content_type: "application/octet-stream",
            content_length: size,
            content_range: None,
            accept_ranges: true,
            body,
        }
    }

    /// Partial content: status 206 with `Content-Range`.
    pub fn partial(start: u64, end: u64, size: u64, bytes: Vec<u8>) -> Self {
        Self {
            status: 206,
            content_type: "application/octet-stream",
            content_length: end - start + 1,
            content_range: Some(format!("bytes {}-{}/{}", start, end, size)),
            accept_ranges: true,
            body: Body::Bytes(bytes),
        }
    }

    /// Requested range not satisfiable: status 416, empty body.
    pub fn unsatisfiable(size: u64) -> Self {
        Self {
            status: 416,
            content_type: "application/octet-stream",
            content_length: 0,
            content_range: Some(format!("bytes */{}", size)),
            accept_ranges: true,
            body: Body::Empty,
        }
    }

    /// Unknown path: status 404.
    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            content_length: 0,
            content_range: None,
            accept_ranges: false,
            body: Body::Empty,
        }
    }

    /// Internal failure that produced no bytes: status 502.
    pub fn bad_gateway() -> Self {
        Self {
            status: 502,
            content_type: "text/plain",
            content_length: 0,
            content_range: None,
            accept_ranges: false,
            body: Body::Empty,
        }
    }
}

/// Normalized shard view: an unsharded entry reads as one shard spanning
/// the whole file.
pub(crate) fn storage_shards(entry: &FileEntry) -> Vec<crate::filemap::ShardRef> {
    match entry.storage() {
        crate::filemap::Storage::Sharded(shards) => shards.to_vec(),
        crate::filemap::Storage::Single(cdn) => vec![crate::filemap::ShardRef {
            file: cdn.to_string(),
            offset: 0,
            size: entry.size,
            sha256: None,
        }],
    }
}

/// Reassembles logical files from the shard store.
pub struct Reassembler {
    store: Arc<ShardStore>,
}

impl Reassembler {
    pub fn new(store: Arc<ShardStore>) -> Self {
        Self { store }
    }

    /// The shard store backing this reassembler.
    pub fn store(&self) -> &Arc<ShardStore> {
        &self.store
    }

    /// Stream the full logical file as shard buffers in offset order.
    ///
    /// Each shard read is bracketed by fetch notifications; delivered
    /// bytes are reported against `vp`.
    pub fn read_full(
        &self,
        base: &SourceBase,
        vp: &str,
        entry: &FileEntry,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> ByteStream {
        let store = Arc::clone(&self.store);
        let base = base.clone();
        let vp = vp.to_string();
        let shards = storage_shards(entry);

        futures::stream::iter(shards)
            .then(move |shard| {
                let store = Arc::clone(&store);
                let base = base.clone();
                let vp = vp.clone();
                let progress = progress.clone();
                async move {
                    if let Some(sink) = &progress {
                        sink.fetch_started();
                    }
                    let result = store.read(&base, &shard.file).await;
                    if let Some(sink) = &progress {
                        sink.fetch_finished();
                        if let Ok(bytes) = &result {
                            sink.bytes_loaded(&vp, bytes.len() as u64);
                        }
                    }
                    result
                }
            })
            .boxed()
    }

    /// Read the inclusive byte range `[start, end]` of a logical file.
    ///
    /// Preconditions (checked by the dispatcher): `start <= end < size`.
    /// Covered shards are fetched concurrently; the reply is assembled in
    /// offset order regardless of completion order.
    pub async fn read_range(
        &self,
        base: &SourceBase,
        vp: &str,
        entry: &FileEntry,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, StoreError> {
        self.read_range_with_progress(base, vp, entry, start, end, None)
            .await
    }

    /// [`Reassembler::read_range`] with progress notifications.
    pub async fn read_range_with_progress(
        &self,
        base: &SourceBase,
        vp: &str,
        entry: &FileEntry,
        start: u64,
        end: u64,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<Vec<u8>, StoreError> {
        let shards = storage_shards(entry);
        let (lo, hi) = shard_cover(&shards, start, end);
        debug!(
            vp,
            start,
            end,
            shards = hi - lo + 1,
            "assembling range from shard cover"
        );

        let reads = shards[lo..=hi].iter().map(|shard| {
            let (from, to) = slice_within(shard, start, end);
            let whole = from == 0 && to == shard.size - 1;
            let store = Arc::clone(&self.store);
            let base = base.clone();
            let name = shard.file.clone();
            let progress = progress.clone();
            async move {
                if let Some(sink) = &progress {
                    sink.fetch_started();
                }
                let result = if whole {
                    // Spans the shard end-to-end: take the cached/deduped
                    // whole-shard path.
                    store.read(&base, &name).await.map(|b| (*b).clone())
                } else {
                    store.read_range(&base, &name, from, to).await
                };
                if let Some(sink) = &progress {
                    sink.fetch_finished();
                }
                result
            }
        });

        let parts = futures::future::try_join_all(reads).await?;
        let mut out = Vec::with_capacity((end - start + 1) as usize);
        for part in parts {
            out.extend_from_slice(&part);
        }
        if let Some(sink) = &progress {
            sink.bytes_loaded(vp, out.len() as u64);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filemap::{FileEntry, ShardRef};
    use crate::hash::sha256_hex;
    use crate::store::CacheLayout;
    use crate::store::{HttpFetch, ReqwestFetch};
    use tempfile::TempDir;

    // Fixture "a.bin": 25 bytes in shards of 10 + 10 + 5.
    fn fixture_bytes() -> Vec<u8> {
        (0u8..25).collect()
    }

    fn sharded_entry() -> FileEntry {
        let data = fixture_bytes();
        FileEntry {
            size: 25,
            sha256: sha256_hex(&data),
            cdn_file: None,
            shards: Some(vec![
                ShardRef {
                    file: "a.bin.shard.000".into(),
                    offset: 0,
                    size: 10,
                    sha256: Some(sha256_hex(&data[0..10])),
                },
                ShardRef {
                    file: "a.bin.shard.001".into(),
                    offset: 10,
                    size: 10,
                    sha256: Some(sha256_hex(&data[10..20])),
                },
                ShardRef {
                    file: "a.bin.shard.002".into(),
                    offset: 20,
                    size: 5,
                    sha256: Some(sha256_hex(&data[20..25])),
                },
            ]),
        }
    }

    /// Local source directory holding the fixture's shards.
    fn local_fixture() -> (TempDir, SourceBase) {
        let temp = TempDir::new().unwrap();
        let data = fixture_bytes();
        std::fs::write(temp.path().join("a.bin.shard.000"), &data[0..10]).unwrap();
        std::fs::write(temp.path().join("a.bin.shard.001"), &data[10..20]).unwrap();
        std::fs::write(temp.path().join("a.bin.shard.002"), &data[20..25]).unwrap();
        std::fs::write(temp.path().join("whole.bin"), &data).unwrap();
        let base = SourceBase::Local(temp.path().to_path_buf());
        (temp, base)
    }

    fn reassembler(cache: &TempDir) -> Reassembler {
        let http: Arc<dyn HttpFetch> = Arc::new(ReqwestFetch::new().unwrap());
        Reassembler::new(Arc::new(ShardStore::new(
            http,
            CacheLayout::new(cache.path()),
        )))
    }

    #[tokio::test]
    async fn test_full_read_concatenates_shards_in_order() {
        let (_src, base) = local_fixture();
        let cache = TempDir::new().unwrap();
        let r = reassembler(&cache);

        let entry = sharded_entry();
        let stream = r.read_full(&base, "a.bin", &entry, None);
        let chunks: Vec<_> = stream.collect::<Vec<_>>().await;

        assert_eq!(chunks.len(), 3);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.as_ref().unwrap().len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);

        let all: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| (*c.unwrap()).clone())
            .collect();
        assert_eq!(all, fixture_bytes());
        assert_eq!(sha256_hex(&all), entry.sha256);
    }

    #[tokio::test]
    async fn test_cross_shard_range() {
        let (_src, base) = local_fixture();
        let cache = TempDir::new().unwrap();
        let r = reassembler(&cache);

        // Last 3 bytes of shard 0 plus the first 5 of shard 1.
        let bytes = r
            .read_range(&base, "a.bin", &sharded_entry(), 7, 14)
            .await
            .unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes, fixture_bytes()[7..=14]);
    }

    #[tokio::test]
    async fn test_range_equals_full_slice_everywhere() {
        let (_src, base) = local_fixture();
        let cache = TempDir::new().unwrap();
        let r = reassembler(&cache);
        let entry = sharded_entry();
        let full = fixture_bytes();

        for (a, b) in [(0, 24), (0, 0), (24, 24), (9, 10), (5, 22), (10, 19)] {
            let got = r.read_range(&base, "a.bin", &entry, a, b).await.unwrap();
            assert_eq!(got, full[a as usize..=b as usize], "range {}-{}", a, b);
        }
    }

    #[tokio::test]
    async fn test_range_composition() {
        let (_src, base) = local_fixture();
        let cache = TempDir::new().unwrap();
        let r = reassembler(&cache);
        let entry = sharded_entry();

        let (a, b, c) = (3u64, 11u64, 23u64);
        let left = r.read_range(&base, "a.bin", &entry, a, b).await.unwrap();
        let right = r.read_range(&base, "a.bin", &entry, b + 1, c).await.unwrap();
        let joined: Vec<u8> = left.into_iter().chain(right).collect();
        let whole = r.read_range(&base, "a.bin", &entry, a, c).await.unwrap();
        assert_eq!(joined, whole);
    }

    #[tokio::test]
    async fn test_unsharded_entry_behaves_like_single_shard() {
        let (_src, base) = local_fixture();
        let cache = TempDir::new().unwrap();
        let r = reassembler(&cache);

        let entry = FileEntry {
            size: 25,
            sha256: sha256_hex(&fixture_bytes()),
            cdn_file: Some("whole.bin".into()),
            shards: None,
        };

        let full = r
            .read_full(&base, "whole.bin", &entry, None)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(full.len(), 1);
        assert_eq!(**full[0].as_ref().unwrap(), fixture_bytes());

        let ranged = r
            .read_range(&base, "whole.bin", &entry, 0, 9)
            .await
            .unwrap();
        assert_eq!(ranged, fixture_bytes()[0..10]);
    }

    #[tokio::test]
    async fn test_response_shapes() {
        let full = Response::full(1000, Body::Empty);
        assert_eq!(full.status, 200);
        assert_eq!(full.content_length, 1000);
        assert!(full.accept_ranges);
        assert!(full.content_range.is_none());

        let partial = Response::partial(0, 99, 1000, vec![0; 100]);
        assert_eq!(partial.status, 206);
        assert_eq!(partial.content_length, 100);
        assert_eq!(partial.content_range.as_deref(), Some("bytes 0-99/1000"));

        let unsat = Response::unsatisfiable(1000);
        assert_eq!(unsat.status, 416);
        assert_eq!(unsat.content_range.as_deref(), Some("bytes */1000"));
        assert_eq!(unsat.content_length, 0);

        assert_eq!(Response::not_found().status, 404);
        assert_eq!(Response::bad_gateway().status, 502);
    }

    #[tokio::test]
    async fn test_body_collect() {
        assert_eq!(Body::Empty.collect().await.unwrap(), Vec::<u8>::new());
        assert_eq!(
            Body::Bytes(vec![1, 2, 3]).collect().await.unwrap(),
            vec![1, 2, 3]
        );

        let stream: ByteStream = futures::stream::iter(vec![
            Ok(Arc::new(vec![1u8, 2])),
            Ok(Arc::new(vec![3u8])),
        ])
        .boxed();
        assert_eq!(Body::Stream(stream).collect().await.unwrap(), vec![1, 2, 3]);
    }
}
