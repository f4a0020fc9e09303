//! Progress reporting for resolver sources.
//!
//! Each registered source owns a [`SourceProgress`] state machine. The
//! machine picks its denominator from the filemap's manifests (explicitly
//! named, inferred adaptively from observed traffic, or the whole filemap
//! as a fallback), accumulates loaded bytes monotonically, and broadcasts
//! throttled [`ProgressEvent`]s to subscribers. A quiet period with no
//! in-flight fetches finalizes the source with a single `done` event.

mod source;

pub use source::SourceProgress;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum interval between two progress events for one source.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(250);

/// Quiet period after the last fetch before a source is finalized.
pub const IDLE_FINALIZE_DELAY: Duration = Duration::from_secs(2);

/// How a source's progress denominator was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// A manifest name was given at registration; its size is the fixed
    /// denominator.
    Explicit,
    /// The manifest is inferred by narrowing candidates as requests arrive.
    Adaptive,
    /// No manifests exist (or the named one is missing); the whole filemap
    /// is the denominator.
    Fallback,
}

/// One progress tick for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Path prefix of the source this event belongs to.
    pub prefix: String,
    /// Virtual path most recently touched.
    pub file: String,
    /// Bytes loaded of that file.
    pub file_loaded: u64,
    /// Total size of that file.
    pub file_total: u64,
    /// Aggregate bytes loaded across the tracked file set.
    pub loaded: u64,
    /// Current denominator in bytes.
    pub total: u64,
    /// Integer percent, monotonically non-decreasing per source.
    pub percent: u8,
    /// True exactly once, on finalization.
    pub done: bool,
    /// Denominator selection mode at emission time.
    pub mode: ProgressMode,
    /// Selected manifest name, when one is selected.
    pub manifest: Option<String>,
}

/// Notification points the reassembler and interceptor drive.
///
/// Implementations must tolerate reentrancy: notifications arrive from
/// interleaved requests on the same source.
pub trait ProgressSink: Send + Sync {
    /// A shard read began (network or cache).
    fn fetch_started(&self);
    /// A shard read finished, on every exit path.
    fn fetch_finished(&self);
    /// `bytes` of `vp` were delivered to the consumer.
    fn bytes_loaded(&self, vp: &str, bytes: u64);
}
