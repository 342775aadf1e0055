//! Latest detection results, handed from the worker to the readers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;

use crate::detect::Detection;

/// Everything one completed pass saw. Immutable once published.
#[derive(Debug, Clone)]
pub struct ResultSnapshot {
    /// Store epoch the pass was dispatched in
    pub epoch: u64,
    /// Publish sequence, 0 for the empty snapshot that opens an epoch
    pub pass: u64,
    pub detections: Vec<Detection>,
    pub published_at: Instant,
}

impl ResultSnapshot {
    fn empty(epoch: u64) -> Self {
        Self {
            epoch,
            pass: 0,
            detections: Vec::new(),
            published_at: Instant::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }
}

/// Holder of the current [`ResultSnapshot`].
///
/// Snapshots are swapped whole, so readers see the old or the new one and
/// never a mix. [`ResultStore::clear`] opens a new epoch; a pass dispatched in
/// an earlier epoch can no longer publish.
pub struct ResultStore {
    current: ArcSwap<ResultSnapshot>,
    epoch: AtomicU64,
    passes: AtomicU64,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ResultSnapshot::empty(0)),
            epoch: AtomicU64::new(0),
            passes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<ResultSnapshot> {
        self.current.load_full()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Replace the current snapshot with the result of a pass dispatched in
    /// `epoch`. Returns `None`, leaving the store untouched, if the store has
    /// moved on to a later epoch.
    pub fn publish(&self, epoch: u64, detections: Vec<Detection>) -> Option<Arc<ResultSnapshot>> {
        let next = Arc::new(ResultSnapshot {
            epoch,
            pass: self.passes.fetch_add(1, Ordering::SeqCst) + 1,
            detections,
            published_at: Instant::now(),
        });

        let mut current = self.current.load();
        loop {
            if current.epoch != epoch {
                return None;
            }
            let prev = self.current.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&prev, &current) {
                return Some(next);
            }
            current = prev;
        }
    }

    /// Empty the current results without ending the epoch, so passes already
    /// dispatched may still publish.
    pub fn reset(&self) {
        let epoch = self.epoch();
        self.publish(epoch, Vec::new());
    }

    /// Drop the current results and start a new epoch. Returns the new epoch.
    pub fn clear(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.current.store(Arc::new(ResultSnapshot::empty(epoch)));
        epoch
    }
}
