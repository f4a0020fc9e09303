//! Memoized filemap loading.
//!
//! One filemap load per source key: concurrent callers coalesce on a
//! single pending future, successes are memoized for the process lifetime,
//! and failures clear the pending slot so a later call retries. Remote
//! filemaps are additionally memoized to disk so a restart does not
//! re-fetch them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::source::SourceBase;
use crate::store::{ShardStore, StoreError};

use super::{Filemap, FILEMAP_NAME};

/// Canonical identity of a source (see [`SourceBase::key`]).
pub type SourceKey = String;

/// Errors from loading a filemap. Cloneable so one failed load settles
/// every coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum FilemapLoadError {
    /// No filemap.json at the source.
    #[error("no {FILEMAP_NAME} at {0}")]
    NotFound(SourceKey),

    /// Transport failure fetching the document.
    #[error(transparent)]
    Transport(StoreError),

    /// The document was fetched but is not a valid filemap.
    #[error("invalid filemap from {source_key}: {reason}")]
    Invalid { source_key: SourceKey, reason: String },
}

type PendingLoad = Shared<BoxFuture<'static, Result<Arc<Filemap>, FilemapLoadError>>>;

/// Fetches and caches filemap documents, one per source key.
pub struct FilemapLoader {
    store: Arc<ShardStore>,
    loaded: Arc<Mutex<HashMap<SourceKey, Arc<Filemap>>>>,
    pending: Arc<Mutex<HashMap<SourceKey, PendingLoad>>>,
}

impl FilemapLoader {
    pub fn new(store: Arc<ShardStore>) -> Self {
        Self {
            store,
            loaded: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load the filemap for `base`, memoized by source key.
    pub async fn load(&self, base: &SourceBase) -> Result<Arc<Filemap>, FilemapLoadError> {
        let key = base.key();

        if let Some(hit) = self.loaded.lock().unwrap().get(&key) {
            return Ok(Arc::clone(hit));
        }

        let (shared, created) = {
            let mut pending = self.pending.lock().unwrap();
            match pending.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let store = Arc::clone(&self.store);
                    let loaded = Arc::clone(&self.loaded);
                    let base = base.clone();
                    let key_inner = key.clone();
                    let shared = async move {
                        let filemap = load_uncached(&store, &base, &key_inner).await?;
                        let filemap = Arc::new(filemap);
                        loaded
                            .lock()
                            .unwrap()
                            .insert(key_inner, Arc::clone(&filemap));
                        Ok(filemap)
                    }
                    .boxed()
                    .shared();
                    pending.insert(key.clone(), shared.clone());
                    (shared, true)
                }
            }
        };

        let result = shared.clone().await;

        // Success or failure, the slot we created is done; failures must
        // not pin future callers to a stale error.
        if created {
            let mut pending = self.pending.lock().unwrap();
            if pending.get(&key).is_some_and(|current| current.ptr_eq(&shared)) {
                pending.remove(&key);
            }
        }

        result
    }

    /// Memoized filemap for `base`, if a load already completed.
    pub fn get(&self, base: &SourceBase) -> Option<Arc<Filemap>> {
        self.loaded.lock().unwrap().get(&base.key()).cloned()
    }

    /// Source keys with a completed load (status introspection).
    pub fn loaded_keys(&self) -> Vec<SourceKey> {
        self.loaded.lock().unwrap().keys().cloned().collect()
    }

    /// Forget every memoized filemap (used on cache-clear).
    pub fn invalidate(&self) {
        self.loaded.lock().unwrap().clear();
    }
}

async fn load_uncached(
    store: &ShardStore,
    base: &SourceBase,
    key: &str,
) -> Result<Filemap, FilemapLoadError> {
    let text = match base {
        SourceBase::Local(dir) => {
            let path = dir.join(FILEMAP_NAME);
            std::fs::read_to_string(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    FilemapLoadError::NotFound(key.to_string())
                } else {
                    FilemapLoadError::Transport(StoreError::Io {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })
                }
            })?
        }
        SourceBase::Remote(_) => {
            let memo = store.cache().filemap_memo_path(key);
            match std::fs::read_to_string(&memo) {
                Ok(text) => {
                    debug!(key, memo = %memo.display(), "filemap served from disk memo");
                    text
                }
                Err(_) => {
                    let bytes = store.read(base, FILEMAP_NAME).await.map_err(|e| match e {
                        StoreError::NotFound(_) => FilemapLoadError::NotFound(key.to_string()),
                        other => FilemapLoadError::Transport(other),
                    })?;
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if let Some(parent) = memo.parent() {
                        let write = std::fs::create_dir_all(parent)
                            .and_then(|_| std::fs::write(&memo, &text));
                        if let Err(e) = write {
                            warn!(memo = %memo.display(), error = %e, "filemap memo write failed");
                        }
                    }
                    text
                }
            }
        }
    };

    Filemap::from_json(&text).map_err(|e| FilemapLoadError::Invalid {
        source_key: key.to_string(),
        reason: e.to_string(),
    })
}
