//! Producer side: decode, validate, filter by group, push.
//!
//! This is what the network callback calls for every message. Rejected
//! snapshots are logged and never reach the buffer; unknown message kinds
//! are a no-op.

use crate::buffer::SnapshotBuffer;
use crate::snapshot::{DecodeError, ServerMessage, Snapshot};
use marketview_env::SnapshotTransport;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

// ============================================================================
// GROUP FILTER
// ============================================================================

/// Set of visible groups. `None` means every group is visible.
///
/// Applied when a snapshot is pushed, so a change shows from the next
/// snapshot on. Metrics and group metadata are never filtered.
#[derive(Debug, Default)]
pub struct GroupFilter {
    visible: RwLock<Option<BTreeSet<i64>>>,
}

impl GroupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn show_all(&self) {
        *self.visible.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Restricts the view to `groups`.
    pub fn set_visible(&self, groups: impl IntoIterator<Item = i64>) {
        *self.visible.write().unwrap_or_else(PoisonError::into_inner) =
            Some(groups.into_iter().collect());
    }

    /// Flips one group. `known` is the full group list, used to expand the
    /// implicit "all visible" state before hiding a group.
    pub fn toggle(&self, group: i64, known: impl IntoIterator<Item = i64>) {
        let mut visible = self.visible.write().unwrap_or_else(PoisonError::into_inner);
        let set = visible.get_or_insert_with(|| known.into_iter().collect());
        if !set.remove(&group) {
            set.insert(group);
        }
    }

    pub fn is_visible(&self, group: i64) -> bool {
        self.visible
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |set| set.contains(&group))
    }

    /// Current visible set, `None` when unfiltered.
    pub fn visible(&self) -> Option<BTreeSet<i64>> {
        self.visible.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drops hidden entities. Returns how many were removed.
    pub fn apply(&self, snapshot: &mut Snapshot) -> usize {
        let visible = self.visible.read().unwrap_or_else(PoisonError::into_inner);
        let Some(set) = visible.as_ref() else {
            return 0;
        };
        let before = snapshot.entities.len();
        snapshot.entities.retain(|e| set.contains(&e.group_id));
        before - snapshot.entities.len()
    }
}

// ============================================================================
// INGEST
// ============================================================================

/// What happened to one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Pushed { tick: u64, kept: usize, filtered: usize },
    Ignored { kind: String },
}

/// Cloneable producer handle over the shared buffer and filter.
#[derive(Debug, Clone)]
pub struct Ingest {
    buffer: Arc<SnapshotBuffer>,
    filter: Arc<GroupFilter>,
}

impl Ingest {
    pub fn new(buffer: Arc<SnapshotBuffer>, filter: Arc<GroupFilter>) -> Self {
        Self { buffer, filter }
    }

    pub fn buffer(&self) -> &Arc<SnapshotBuffer> {
        &self.buffer
    }

    pub fn filter(&self) -> &Arc<GroupFilter> {
        &self.filter
    }

    pub fn ingest_bytes(&self, bytes: &[u8]) -> Result<IngestOutcome, DecodeError> {
        let message = ServerMessage::decode(bytes).inspect_err(|e| {
            warn!("Rejected server message: {}", e);
        })?;
        self.ingest_message(message)
    }

    pub fn ingest_text(&self, text: &str) -> Result<IngestOutcome, DecodeError> {
        self.ingest_bytes(text.as_bytes())
    }

    pub fn ingest_message(&self, message: ServerMessage) -> Result<IngestOutcome, DecodeError> {
        match message {
            ServerMessage::StateUpdate(snapshot) => self.ingest_snapshot(snapshot),
            ServerMessage::Unknown(kind) => {
                debug!("Ignoring server message of kind '{}'", kind);
                Ok(IngestOutcome::Ignored { kind })
            }
        }
    }

    /// Validates, filters and pushes one snapshot.
    pub fn ingest_snapshot(&self, mut snapshot: Snapshot) -> Result<IngestOutcome, DecodeError> {
        if let Err(e) = snapshot.validate() {
            warn!("Rejected snapshot {}: {}", snapshot.tick, e);
            return Err(e);
        }

        let filtered = self.filter.apply(&mut snapshot);
        let tick = snapshot.tick;
        let kept = snapshot.entities.len();
        if let Some(evicted) = self.buffer.push(snapshot) {
            debug!("Snapshot {} evicted by {}", evicted.tick, tick);
        }

        Ok(IngestOutcome::Pushed { tick, kept, filtered })
    }
}

// ============================================================================
// PUMP
// ============================================================================

/// Counters from one [`pump`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub frames: u64,
    pub pushed: u64,
    pub ignored: u64,
    pub rejected: u64,
}

/// Feeds every frame from `transport` into `ingest` until the transport
/// closes. Per-frame errors are counted and logged, never propagated.
pub async fn pump<T>(transport: &T, ingest: &Ingest) -> PumpStats
where
    T: SnapshotTransport + ?Sized,
{
    let session = transport.session_id();
    info!("Snapshot pump started for session {}", session);

    let mut stats = PumpStats::default();
    while let Some(frame) = transport.recv().await {
        stats.frames += 1;
        match ingest.ingest_bytes(&frame.payload) {
            Ok(IngestOutcome::Pushed { .. }) => stats.pushed += 1,
            Ok(IngestOutcome::Ignored { .. }) => stats.ignored += 1,
            Err(_) => stats.rejected += 1,
        }
    }

    info!(
        "Snapshot pump for session {} closed: {} frames, {} pushed, {} rejected",
        session, stats.frames, stats.pushed, stats.rejected
    );
    stats
}
