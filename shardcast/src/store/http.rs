//! HTTP client abstraction for testability.
//!
//! The trait keeps the shard store and filemap loader independent of
//! reqwest so tests can inject scripted clients and count requests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::store::StoreError;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default timeout for CDN requests.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// User-Agent sent with every CDN request.
const USER_AGENT: &str = concat!("shardcast/", env!("CARGO_PKG_VERSION"));

/// Reply to a ranged GET.
///
/// Origins that do not support ranges (or CDNs that collapse them) answer
/// a range request with the full object; callers slice in-process and keep
/// the full body for the cache.
#[derive(Debug, Clone)]
pub enum RangeReply {
    /// Origin honored the range (HTTP 206): exactly the requested bytes.
    Partial(Vec<u8>),
    /// Origin returned the full object (HTTP 200).
    Full(Vec<u8>),
}

/// Minimal async HTTP surface the resolver needs from the network.
pub trait HttpFetch: Send + Sync {
    /// GET the full body at `url`. Non-2xx statuses are errors.
    fn get(&self, url: &str) -> BoxFuture<'_, Result<Vec<u8>, StoreError>>;

    /// GET `url` with `Range: bytes={start}-{end}` (inclusive).
    fn get_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
    ) -> BoxFuture<'_, Result<RangeReply, StoreError>>;
}

/// Real HTTP client backed by reqwest.
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    /// Create a client with the default timeout.
    pub fn new() -> Result<Self, StoreError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| StoreError::Http {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, StoreError> {
        let response = request.send().await.map_err(|e| StoreError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(StoreError::Http {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }
        Ok(response)
    }
}

impl HttpFetch for ReqwestFetch {
    fn get(&self, url: &str) -> BoxFuture<'_, Result<Vec<u8>, StoreError>> {
        let url = url.to_string();
        Box::pin(async move {
            let response = self.send(self.client.get(&url), &url).await?;
            let body = response.bytes().await.map_err(|e| StoreError::Http {
                url: url.clone(),
                reason: format!("failed to read body: {}", e),
            })?;
            Ok(body.to_vec())
        })
    }

    fn get_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
    ) -> BoxFuture<'_, Result<RangeReply, StoreError>> {
        let url = url.to_string();
        Box::pin(async move {
            let request = self
                .client
                .get(&url)
                .header(reqwest::header::RANGE, format!("bytes={}-{}", start, end));
            let response = self.send(request, &url).await?;
            let status = response.status();
            let body = response.bytes().await.map_err(|e| StoreError::Http {
                url: url.clone(),
                reason: format!("failed to read body: {}", e),
            })?;

            if status == reqwest::StatusCode::PARTIAL_CONTENT {
                Ok(RangeReply::Partial(body.to_vec()))
            } else {
                Ok(RangeReply::Full(body.to_vec()))
            }
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted HTTP client for tests: URL → body, with request counting.
    pub struct MockFetch {
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        /// Total GET requests observed (full and ranged).
        pub requests: AtomicUsize,
        /// When false, ranged GETs answer with the full body (HTTP 200).
        pub honor_ranges: bool,
    }

    impl MockFetch {
        pub fn new() -> Self {
            Self {
                bodies: Mutex::new(HashMap::new()),
                requests: AtomicUsize::new(0),
                honor_ranges: true,
            }
        }

        pub fn insert(&self, url: &str, body: Vec<u8>) {
            self.bodies.lock().unwrap().insert(url.to_string(), body);
        }

        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    impl HttpFetch for MockFetch {
        fn get(&self, url: &str) -> BoxFuture<'_, Result<Vec<u8>, StoreError>> {
            let url = url.to_string();
            Box::pin(async move {
                self.requests.fetch_add(1, Ordering::SeqCst);
                self.bodies
                    .lock()
                    .unwrap()
                    .get(&url)
                    .cloned()
                    .ok_or(StoreError::NotFound(url))
            })
        }

        fn get_range(
            &self,
            url: &str,
            start: u64,
            end: u64,
        ) -> BoxFuture<'_, Result<RangeReply, StoreError>> {
            let url = url.to_string();
            Box::pin(async move {
                self.requests.fetch_add(1, Ordering::SeqCst);
                let body = self
                    .bodies
                    .lock()
                    .unwrap()
                    .get(&url)
                    .cloned()
                    .ok_or(StoreError::NotFound(url))?;
                if self.honor_ranges {
                    let end = (end + 1).min(body.len() as u64) as usize;
                    Ok(RangeReply::Partial(body[start as usize..end].to_vec()))
                } else {
                    Ok(RangeReply::Full(body))
                }
            })
        }
    }

    #[tokio::test]
    async fn test_mock_get_and_count() {
        let mock = MockFetch::new();
        mock.insert("http://x/a", vec![1, 2, 3]);

        assert_eq!(mock.get("http://x/a").await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            mock.get("http://x/missing").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_range_modes() {
        let mut mock = MockFetch::new();
        mock.insert("http://x/a", (0u8..10).collect());

        match mock.get_range("http://x/a", 2, 4).await.unwrap() {
            RangeReply::Partial(bytes) => assert_eq!(bytes, vec![2, 3, 4]),
            RangeReply::Full(_) => panic!("expected partial"),
        }

        mock.honor_ranges = false;
        match mock.get_range("http://x/a", 2, 4).await.unwrap() {
            RangeReply::Full(bytes) => assert_eq!(bytes.len(), 10),
            RangeReply::Partial(_) => panic!("expected full"),
        }
    }
}
