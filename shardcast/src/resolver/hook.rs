//! Process-wide fetch hook.
//!
//! [`hooked_fetch`] is the in-process analogue of the browser worker: code
//! that fetches model bytes through it gets transparent reassembly for
//! registered prefixes and plain HTTP for everything else. Installing is
//! a process-global mutation; `install` and `remove` must be paired, and
//! re-installing the same resolver is a no-op.

use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use crate::reassemble::{Body, Response};
use crate::store::{HttpFetch, ReqwestFetch, StoreError};

use super::Resolver;

static HOOK: OnceLock<Mutex<Option<Arc<Resolver>>>> = OnceLock::new();

fn hook_slot() -> &'static Mutex<Option<Arc<Resolver>>> {
    HOOK.get_or_init(|| Mutex::new(None))
}

/// Fallback client used for non-matching URLs.
static FALLBACK: OnceLock<ReqwestFetch> = OnceLock::new();

fn fallback_client() -> Result<&'static ReqwestFetch, StoreError> {
    if FALLBACK.get().is_none() {
        let client = ReqwestFetch::new()?;
        let _ = FALLBACK.set(client);
    }
    Ok(FALLBACK.get().expect("fallback client initialized"))
}

/// Install `resolver` as the process-wide fetch hook.
///
/// Installing the resolver that is already installed is a no-op; a
/// different resolver replaces the previous one with a warning.
pub fn install_hook(resolver: Arc<Resolver>) {
    let mut slot = hook_slot().lock().unwrap();
    match slot.as_ref() {
        Some(current) if Arc::ptr_eq(current, &resolver) => {
            debug!("fetch hook already installed");
        }
        Some(_) => {
            warn!("replacing previously installed fetch hook");
            *slot = Some(resolver);
        }
        None => *slot = Some(resolver),
    }
}

/// Remove the process-wide fetch hook. Removing twice is a no-op.
pub fn remove_hook() {
    let mut slot = hook_slot().lock().unwrap();
    if slot.take().is_none() {
        debug!("fetch hook was not installed");
    }
}

/// Whether a fetch hook is currently installed.
pub fn is_hook_installed() -> bool {
    hook_slot().lock().unwrap().is_some()
}

/// Fetch `url` through the installed hook.
///
/// When the hook is installed and a registered prefix matches, the
/// resolver answers; this path raises no errors, though the response may still
/// be a 404/416/5xx shape). All other URLs go to the real network, where
/// transport failures surface as typed errors for the caller to handle.
pub async fn hooked_fetch(url: &str, range: Option<&str>) -> Result<Response, StoreError> {
    let resolver = hook_slot().lock().unwrap().clone();

    if let Some(resolver) = resolver {
        if let Some(response) = resolver.handle(url, range).await {
            return Ok(response);
        }
    }

    // Not ours: forward to the original transport.
    let client = fallback_client()?;
    let bytes = client.get(url).await?;
    let mut response = Response::full(bytes.len() as u64, Body::Bytes(bytes));
    response.accept_ranges = false;
    Ok(response)
}
