//! Coalescing of concurrent fetches for the same shard.
//!
//! Keyed by absolute shard URL (or path), the map guarantees at most one
//! underlying fetch per key at any instant. Later callers await the same
//! shared future and receive the same `Arc` of bytes. The pending slot is
//! removed once the fetch settles, success or failure, so a failed fetch
//! can be retried by the next caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::Mutex;

use super::StoreError;

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Vec<u8>>, StoreError>>>;

/// In-flight fetch map: shard key → pending shared fetch.
#[derive(Default)]
pub struct InflightMap {
    pending: Mutex<HashMap<String, SharedFetch>>,
}

impl InflightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key`, coalescing with any fetch already in flight.
    ///
    /// Exactly one caller's `fetch` future runs; everyone gets the same
    /// settled result. The error type is cloneable, so failures propagate
    /// to every waiter while the slot is freed for retries.
    pub async fn fetch<F>(
        &self,
        key: &str,
        fetch: F,
    ) -> Result<Arc<Vec<u8>>, StoreError>
    where
        F: Future<Output = Result<Arc<Vec<u8>>, StoreError>> + Send + 'static,
    {
        let (shared, created) = {
            let mut pending = self.pending.lock().await;
            match pending.get(key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let shared = fetch.boxed().shared();
                    pending.insert(key.to_string(), shared.clone());
                    (shared, true)
                }
            }
        };

        let result = shared.clone().await;

        // Only remove the slot we inserted; a fresh fetch started by a
        // later caller (after a failure) must not be evicted by us.
        if created {
            let mut pending = self.pending.lock().await;
            if pending.get(key).is_some_and(|current| current.ptr_eq(&shared)) {
                pending.remove(key);
            }
        }

        result
    }

    /// Number of fetches currently in flight.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Whether no fetch is in flight.
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
