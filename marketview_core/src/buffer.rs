//! Bounded snapshot history shared between the producer and the render loop.
//!
//! One writer (the network callback) pushes, one reader (the render tick)
//! reads the newest entry. Both sides go through a single mutex and readers
//! receive an `Arc<Snapshot>`, so a snapshot is never observed half-written.

use crate::snapshot::Snapshot;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Maximum number of snapshots retained.
pub const BUFFER_DEPTH: usize = 3;

#[derive(Debug, Default)]
struct BufferState {
    history: VecDeque<Arc<Snapshot>>,
    total_pushed: u64,
    generation: u64,
}

/// What a render frame reads from the buffer, taken under one lock.
#[derive(Debug, Clone, Default)]
pub struct BufferView {
    pub latest: Option<Arc<Snapshot>>,
    /// Pushes since the last `clear`
    pub total_pushed: u64,
    /// Bumped by every `clear`
    pub generation: u64,
}

/// FIFO history of the last [`BUFFER_DEPTH`] snapshots.
#[derive(Debug, Default)]
pub struct SnapshotBuffer {
    state: Mutex<BufferState>,
}

impl SnapshotBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped buffer for sharing between tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a snapshot, evicting the oldest once the depth is exceeded.
    ///
    /// Returns the evicted snapshot, if any. No other work happens here.
    pub fn push(&self, snapshot: Snapshot) -> Option<Arc<Snapshot>> {
        let mut state = self.lock();
        state.history.push_back(Arc::new(snapshot));
        state.total_pushed += 1;
        if state.history.len() > BUFFER_DEPTH {
            state.history.pop_front()
        } else {
            None
        }
    }

    /// Most recently pushed snapshot.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.lock().history.back().cloned()
    }

    /// Newest snapshot, push count and generation, read under one lock.
    pub fn view(&self) -> BufferView {
        let state = self.lock();
        BufferView {
            latest: state.history.back().cloned(),
            total_pushed: state.total_pushed,
            generation: state.generation,
        }
    }

    /// Retained snapshots, oldest first.
    pub fn history(&self) -> Vec<Arc<Snapshot>> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().history.is_empty()
    }

    /// Number of snapshots pushed since creation (or the last `clear`).
    pub fn total_pushed(&self) -> u64 {
        self.lock().total_pushed
    }

    /// Drops all history, e.g. when the host starts a new session.
    ///
    /// Readers see a new generation and must not carry state across it.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.total_pushed = 0;
        state.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MetricSet;
    use proptest::prelude::*;

    fn snapshot(tick: u64) -> Snapshot {
        Snapshot::new(tick, vec![], MetricSet::default())
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = SnapshotBuffer::new();
        assert!(buffer.latest().is_none());
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_pushed(), 0);
    }

    #[test]
    fn test_fourth_push_evicts_oldest() {
        let buffer = SnapshotBuffer::new();
        for tick in 1..=3 {
            assert!(buffer.push(snapshot(tick)).is_none());
        }
        let evicted = buffer.push(snapshot(4)).expect("oldest evicted");
        assert_eq!(evicted.tick, 1);

        let ticks: Vec<u64> = buffer.history().iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![2, 3, 4]);
        assert_eq!(buffer.latest().unwrap().tick, 4);
        assert_eq!(buffer.total_pushed(), 4);
    }

    #[test]
    fn test_clear_resets_count() {
        let buffer = SnapshotBuffer::new();
        buffer.push(snapshot(1));
        buffer.push(snapshot(2));
        assert_eq!(buffer.generation(), 0);
        buffer.clear();
        assert!(buffer.latest().is_none());

        let view = buffer.view();
        assert!(view.latest.is_none());
        assert_eq!((view.total_pushed, view.generation), (0, 1));

        buffer.push(snapshot(1));
        assert_eq!(buffer.view().generation, 1);
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        let buffer = SnapshotBuffer::shared();
        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for tick in 1..=2_000 {
                    buffer.push(snapshot(tick));
                }
            })
        };

        let mut last_seen = 0;
        for _ in 0..2_000 {
            assert!(buffer.len() <= BUFFER_DEPTH);
            if let Some(latest) = buffer.latest() {
                assert!(latest.tick >= last_seen, "reader went backwards");
                last_seen = latest.tick;
            }
        }
        writer.join().unwrap();
        assert_eq!(buffer.latest().unwrap().tick, 2_000);
    }

    proptest! {
        #[test]
        fn prop_bounded_history(ticks in proptest::collection::vec(any::<u64>(), 1..64)) {
            let buffer = SnapshotBuffer::new();
            for &tick in &ticks {
                buffer.push(snapshot(tick));
                prop_assert!(buffer.len() <= BUFFER_DEPTH);
                prop_assert_eq!(buffer.latest().unwrap().tick, tick);
            }
            prop_assert_eq!(buffer.len(), ticks.len().min(BUFFER_DEPTH));
            prop_assert_eq!(buffer.total_pushed(), ticks.len() as u64);
        }
    }
}
