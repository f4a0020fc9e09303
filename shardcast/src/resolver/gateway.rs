//! Message-based control surface between an embedding application and the
//! resolver.
//!
//! The protocol mirrors the in-browser worker messaging: the app sends
//! `init` / `complete` / `clear-cache` / `status`, the resolver answers
//! with `progress` ticks, `cache-cleared` acks, and `status` snapshots.
//! Byte reads themselves go through [`Resolver::handle`]; this channel
//! only carries control traffic.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::progress::ProgressEvent;
use crate::source::SourceBase;

use super::{Resolver, SourceSpec};

/// Capacity of the app → resolver command channel.
const COMMAND_CAPACITY: usize = 32;

/// Capacity of the resolver → app event channel.
const EVENT_CAPACITY: usize = 256;

fn default_progress() -> bool {
    true
}

/// One source in an `init` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Logical URL prefix for this source.
    pub path_prefix: String,
    /// CDN URL root; mutually exclusive with `local_base`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_base: Option<String>,
    /// Local flat directory; mutually exclusive with `cdn_base`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_base: Option<String>,
    /// Fixed progress manifest, when known in advance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    /// Whether to emit progress events for this source.
    #[serde(default = "default_progress")]
    pub progress: bool,
}

impl SourceConfig {
    fn into_spec(self) -> Result<SourceSpec, String> {
        let base = match (self.cdn_base, self.local_base) {
            (Some(cdn), None) => SourceBase::Remote(cdn.trim_end_matches('/').to_string()),
            (None, Some(local)) => SourceBase::Local(local.into()),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "source '{}' sets both cdnBase and localBase",
                    self.path_prefix
                ))
            }
            (None, None) => {
                return Err(format!(
                    "source '{}' sets neither cdnBase nor localBase",
                    self.path_prefix
                ))
            }
        };
        Ok(SourceSpec {
            path_prefix: self.path_prefix,
            base,
            manifest: self.manifest,
            progress: self.progress,
        })
    }
}

/// Messages from the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AppMessage {
    /// Replace all registered sources and restart filemap loads.
    Init { sources: Vec<SourceConfig> },
    /// Force-finalize progress for one source.
    Complete { prefix: String },
    /// Drop the shard cache and filemap memos.
    ClearCache,
    /// Request a status snapshot.
    Status,
}

/// Messages to the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResolverMessage {
    /// A progress tick for one source.
    Progress(ProgressEvent),
    /// Ack for `clear-cache`.
    CacheCleared,
    /// Answer to `status`.
    Status {
        sources: Vec<String>,
        #[serde(rename = "filemapsLoaded")]
        filemaps_loaded: Vec<String>,
    },
}

/// Running control-surface loop over a resolver.
pub struct Gateway {
    commands: mpsc::Sender<AppMessage>,
    events: broadcast::Sender<ResolverMessage>,
}

impl Gateway {
    /// Spawn the command loop and the progress forwarder.
    pub fn spawn(resolver: Arc<Resolver>) -> Gateway {
        let (command_tx, mut command_rx) = mpsc::channel::<AppMessage>(COMMAND_CAPACITY);
        let (event_tx, _) = broadcast::channel::<ResolverMessage>(EVENT_CAPACITY);

        // Forward progress ticks as protocol messages.
        let forward_tx = event_tx.clone();
        let mut progress_rx = resolver.subscribe_progress();
        tokio::spawn(async move {
            loop {
                match progress_rx.recv().await {
                    Ok(event) => {
                        let _ = forward_tx.send(ResolverMessage::Progress(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "progress forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let loop_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = command_rx.recv().await {
                match message {
                    AppMessage::Init { sources } => {
                        let specs: Vec<SourceSpec> = sources
                            .into_iter()
                            .filter_map(|config| match config.into_spec() {
                                Ok(spec) => Some(spec),
                                Err(reason) => {
                                    warn!(reason, "dropping invalid source config");
                                    None
                                }
                            })
                            .collect();
                        resolver.init(specs);
                    }
                    AppMessage::Complete { prefix } => {
                        resolver.complete(&prefix);
                    }
                    AppMessage::ClearCache => {
                        match resolver.clear_cache() {
                            Ok(stats) => {
                                info!(files = stats.files, bytes = stats.bytes, "cache cleared")
                            }
                            Err(e) => warn!(error = %e, "cache clear failed"),
                        }
                        let _ = loop_tx.send(ResolverMessage::CacheCleared);
                    }
                    AppMessage::Status => {
                        let status = resolver.status();
                        let _ = loop_tx.send(ResolverMessage::Status {
                            sources: status.sources,
                            filemaps_loaded: status.filemaps_loaded,
                        });
                    }
                }
            }
        });

        Gateway {
            commands: command_tx,
            events: event_tx,
        }
    }

    /// Sender half the embedding application talks into.
    pub fn sender(&self) -> mpsc::Sender<AppMessage> {
        self.commands.clone()
    }

    /// Subscribe to resolver → app messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ResolverMessage> {
        self.events.subscribe()
    }
}
