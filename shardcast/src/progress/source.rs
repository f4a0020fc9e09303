//! Per-source progress state machine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::filemap::{Filemap, ManifestEntry};

use super::{
    ProgressEvent, ProgressMode, ProgressSink, BROADCAST_INTERVAL, IDLE_FINALIZE_DELAY,
};

/// Per-file byte accounting.
#[derive(Debug, Clone, Copy, Default)]
struct FileProgress {
    size: u64,
    loaded: u64,
}

/// Mutable state guarded by one lock; no await happens while held.
struct State {
    mode: ProgressMode,
    /// Manifest name fixed at registration, if any.
    declared: Option<String>,
    /// Currently selected manifest (denominator source).
    selected: Option<String>,
    /// Manifest table retained from the filemap for narrowing.
    manifests: BTreeMap<String, ManifestEntry>,
    /// Adaptive candidates still compatible with observed traffic.
    candidates: Vec<String>,
    /// Sizes of every file in the filemap.
    sizes: HashMap<String, u64>,
    /// Tracked files: the selected set plus anything observed.
    files: HashMap<String, FileProgress>,
    /// Files actually requested on this source.
    active: BTreeSet<String>,
    total: u64,
    pending_fetches: usize,
    finalized: bool,
    done_emitted: bool,
    initialized: bool,
    last_file: String,
    last_broadcast: Option<Instant>,
    last_emitted_percent: u8,
    trailing_scheduled: bool,
    idle_token: Option<CancellationToken>,
}

impl State {
    fn loaded_total(&self) -> u64 {
        self.files.values().map(|f| f.loaded).sum()
    }

    fn percent(&self) -> u8 {
        if self.finalized {
            return 100;
        }
        if self.total == 0 {
            return 0;
        }
        ((self.loaded_total() * 100) / self.total).min(100) as u8
    }

    fn track(&mut self, vp: &str) {
        let size = self.sizes.get(vp).copied().unwrap_or(0);
        self.files
            .entry(vp.to_string())
            .or_insert(FileProgress { size, loaded: 0 });
    }

    fn select_widest(&mut self, names: &[String]) {
        let widest = names
            .iter()
            .max_by_key(|name| self.manifests.get(*name).map_or(0, |m| m.size))
            .cloned();
        if let Some(name) = widest {
            if let Some(manifest) = self.manifests.get(&name).cloned() {
                self.total = manifest.size;
                // Track the selected set, preserving accumulated counts.
                for vp in &manifest.files {
                    self.track(vp);
                }
            }
            self.selected = Some(name);
        }
    }
}

/// Progress state machine for one registered source.
///
/// Created with [`SourceProgress::new`]; the interceptor calls
/// [`SourceProgress::file_requested`] on filemap hits, the reassembler
/// drives the [`ProgressSink`] notifications, and subscribers receive
/// [`ProgressEvent`]s on the broadcast channel passed at construction.
pub struct SourceProgress {
    prefix: String,
    tx: broadcast::Sender<ProgressEvent>,
    state: Mutex<State>,
    me: Weak<SourceProgress>,
}

impl SourceProgress {
    /// Create the machine for `prefix`. `manifest` fixes the denominator
    /// in advance (explicit mode) when the filemap carries that name.
    pub fn new(
        prefix: impl Into<String>,
        manifest: Option<String>,
        tx: broadcast::Sender<ProgressEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            prefix: prefix.into(),
            tx,
            state: Mutex::new(State {
                mode: if manifest.is_some() {
                    ProgressMode::Explicit
                } else {
                    ProgressMode::Adaptive
                },
                declared: manifest,
                selected: None,
                manifests: BTreeMap::new(),
                candidates: Vec::new(),
                sizes: HashMap::new(),
                files: HashMap::new(),
                active: BTreeSet::new(),
                total: 0,
                pending_fetches: 0,
                finalized: false,
                done_emitted: false,
                initialized: false,
                last_file: String::new(),
                last_broadcast: None,
                last_emitted_percent: 0,
                trailing_scheduled: false,
                idle_token: None,
            }),
            me: me.clone(),
        })
    }

    /// Source path prefix this machine reports under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Adopt the loaded filemap: resolve the mode and initial denominator.
    pub fn init_from_filemap(&self, filemap: &Filemap) {
        let mut state = self.state.lock().unwrap();
        if state.initialized {
            return;
        }
        state.initialized = true;
        state.sizes = filemap
            .files
            .iter()
            .map(|(vp, entry)| (vp.clone(), entry.size))
            .collect();
        state.manifests = filemap.manifests.clone();

        match state.declared.clone() {
            Some(name) if state.manifests.contains_key(&name) => {
                state.mode = ProgressMode::Explicit;
                let manifest = state.manifests[&name].clone();
                state.total = manifest.size;
                for vp in &manifest.files {
                    state.track(vp);
                }
                state.selected = Some(name);
            }
            Some(name) => {
                warn!(
                    prefix = %self.prefix,
                    manifest = %name,
                    available = ?state.manifests.keys().collect::<Vec<_>>(),
                    "named manifest not in filemap; degrading to fallback progress"
                );
                Self::enter_fallback(&mut state);
            }
            None if !state.manifests.is_empty() => {
                state.mode = ProgressMode::Adaptive;
                state.candidates = state.manifests.keys().cloned().collect();
                let candidates = state.candidates.clone();
                state.select_widest(&candidates);
            }
            None => Self::enter_fallback(&mut state),
        }

        debug!(
            prefix = %self.prefix,
            mode = ?state.mode,
            manifest = ?state.selected,
            total = state.total,
            "progress initialized from filemap"
        );
    }

    fn enter_fallback(state: &mut State) {
        state.mode = ProgressMode::Fallback;
        state.selected = None;
        state.total = state.sizes.values().sum();
        let paths: Vec<String> = state.sizes.keys().cloned().collect();
        for vp in paths {
            state.track(&vp);
        }
    }

    /// Record that `vp` was requested; adaptively narrow the candidate set
    /// when the request rules out some manifests.
    pub fn file_requested(&self, vp: &str) {
        let mut state = self.state.lock().unwrap();
        if state.finalized {
            return;
        }
        state.active.insert(vp.to_string());
        state.track(vp);
        state.last_file = vp.to_string();

        if state.mode != ProgressMode::Adaptive || state.candidates.len() <= 1 {
            return;
        }

        let matching: Vec<String> = state
            .candidates
            .iter()
            .filter(|name| {
                state
                    .manifests
                    .get(*name)
                    .is_some_and(|m| m.files.iter().any(|f| f == vp))
            })
            .cloned()
            .collect();

        // Only a non-empty strict subset narrows; a file outside every
        // candidate says nothing about which manifest is in play.
        if matching.is_empty() || matching.len() == state.candidates.len() {
            return;
        }

        state.candidates = matching.clone();
        state.select_widest(&matching);
        debug!(
            prefix = %self.prefix,
            file = vp,
            manifest = ?state.selected,
            total = state.total,
            "narrowed progress candidates"
        );

        // Narrowing can leave accumulated bytes above the new denominator;
        // the selection is already satisfied, so finalize instead of
        // rolling counters back.
        if state.total > 0 && state.loaded_total() >= state.total {
            drop(state);
            self.finalize("narrowing overshoot");
        }
    }

    /// Force finalization (the app's explicit `complete` signal).
    pub fn complete(&self) {
        self.finalize("complete message");
    }

    /// Whether this source has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.state.lock().unwrap().finalized
    }

    /// Current mode (for status introspection).
    pub fn mode(&self) -> ProgressMode {
        self.state.lock().unwrap().mode
    }

    fn finalize(&self, reason: &str) {
        let event = {
            let mut state = self.state.lock().unwrap();
            if state.finalized {
                return;
            }
            state.finalized = true;
            if let Some(token) = state.idle_token.take() {
                token.cancel();
            }

            // Shrink the denominator and the tracked set to what was
            // actually requested, and saturate every remaining file.
            state.total = state
                .active
                .iter()
                .map(|vp| state.sizes.get(vp).copied().unwrap_or(0))
                .sum();
            let active = state.active.clone();
            let sizes = state.sizes.clone();
            state.files = active
                .iter()
                .map(|vp| {
                    let size = sizes.get(vp).copied().unwrap_or(0);
                    (vp.clone(), FileProgress { size, loaded: size })
                })
                .collect();
            state.done_emitted = true;
            state.last_emitted_percent = 100;
            debug!(prefix = %self.prefix, reason, total = state.total, "progress finalized");
            self.snapshot(&state, true)
        };
        let _ = self.tx.send(event);
    }

    fn snapshot(&self, state: &State, done: bool) -> ProgressEvent {
        let file = state.last_file.clone();
        let file_progress = state.files.get(&file).copied().unwrap_or_default();
        ProgressEvent {
            prefix: self.prefix.clone(),
            file,
            file_loaded: file_progress.loaded,
            file_total: file_progress.size,
            loaded: state.loaded_total(),
            total: state.total,
            percent: state.percent(),
            done,
            mode: state.mode,
            manifest: state.selected.clone(),
        }
    }

    /// Emit now or schedule the trailing emission, honoring the throttle.
    fn broadcast(&self) {
        let event = {
            let mut state = self.state.lock().unwrap();
            if state.finalized && state.done_emitted {
                return;
            }

            let now = Instant::now();
            let percent = state.percent();
            let due = state
                .last_broadcast
                .is_none_or(|at| now.duration_since(at) >= BROADCAST_INTERVAL);

            // Reaching 100% goes out immediately, once.
            let reached_full = percent >= 100 && state.last_emitted_percent < 100;
            if due || reached_full {
                state.last_broadcast = Some(now);
                state.last_emitted_percent = percent;
                Some(self.snapshot(&state, false))
            } else {
                if !state.trailing_scheduled {
                    state.trailing_scheduled = true;
                    let deadline = state
                        .last_broadcast
                        .map_or(now, |at| at + BROADCAST_INTERVAL);
                    if let Some(me) = self.me.upgrade() {
                        tokio::spawn(async move {
                            tokio::time::sleep_until(deadline).await;
                            me.emit_trailing();
                        });
                    }
                }
                None
            }
        };
        if let Some(event) = event {
            let _ = self.tx.send(event);
        }
    }

    fn emit_trailing(&self) {
        let event = {
            let mut state = self.state.lock().unwrap();
            state.trailing_scheduled = false;
            if state.finalized && state.done_emitted {
                return;
            }
            state.last_broadcast = Some(Instant::now());
            state.last_emitted_percent = state.percent();
            self.snapshot(&state, false)
        };
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for SourceProgress {
    fn fetch_started(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending_fetches += 1;
        if let Some(token) = state.idle_token.take() {
            token.cancel();
        }
    }

    fn fetch_finished(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending_fetches = state.pending_fetches.saturating_sub(1);
        if state.pending_fetches > 0
            || state.mode == ProgressMode::Explicit
            || state.finalized
        {
            return;
        }

        // Quiet: arm the idle finalization timer.
        let token = CancellationToken::new();
        state.idle_token = Some(token.clone());
        drop(state);

        if let Some(me) = self.me.upgrade() {
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(IDLE_FINALIZE_DELAY) => {
                        let still_idle = {
                            let state = me.state.lock().unwrap();
                            state.pending_fetches == 0 && !state.finalized
                        };
                        if still_idle {
                            me.finalize("idle");
                        }
                    }
                }
            });
        }
    }

    fn bytes_loaded(&self, vp: &str, bytes: u64) {
        {
            let mut state = self.state.lock().unwrap();
            if state.finalized {
                return;
            }
            state.track(vp);
            state.last_file = vp.to_string();
            if let Some(file) = state.files.get_mut(vp) {
                file.loaded = if file.size > 0 {
                    (file.loaded + bytes).min(file.size)
                } else {
                    file.loaded + bytes
                };
            }
        }
        self.broadcast();
    }
}
