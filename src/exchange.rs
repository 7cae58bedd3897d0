use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::FeatureSnapshot;

/// Hands the newest feature snapshot from the analysis thread to the renderer.
///
/// Two slots and a selector: `publish` fills the slot readers are not looking
/// at, then flips the selector. Snapshots are immutable behind an `Arc`, so a
/// reader always gets waveform and spectrum from the same publish and neither
/// side ever waits on the other. Meant for a single publisher.
pub struct FeatureExchange {
    slots: [ArcSwap<FeatureSnapshot>; 2],
    readable: AtomicUsize,
    publishes: AtomicU64,
}

impl FeatureExchange {
    pub fn new() -> Self {
        let empty = Arc::new(FeatureSnapshot::empty());
        Self {
            slots: [ArcSwap::new(empty.clone()), ArcSwap::new(empty)],
            readable: AtomicUsize::new(0),
            publishes: AtomicU64::new(0),
        }
    }

    /// Make `snapshot` the latest one.
    ///
    /// Returns the snapshot evicted from the write slot when no reader still
    /// holds it, so its buffers can be reused for the next publish.
    pub fn publish(&self, snapshot: FeatureSnapshot) -> Option<FeatureSnapshot> {
        let write = 1 - self.readable.load(Ordering::Acquire);
        let evicted = self.slots[write].swap(Arc::new(snapshot));
        self.readable.store(write, Ordering::Release);
        self.publishes.fetch_add(1, Ordering::Relaxed);
        Arc::try_unwrap(evicted).ok()
    }

    /// The most recently published snapshot, or an empty one before the first publish.
    pub fn latest(&self) -> Arc<FeatureSnapshot> {
        let read = self.readable.load(Ordering::Acquire);
        self.slots[read].load_full()
    }

    pub fn publish_count(&self) -> u64 {
        self.publishes.load(Ordering::Relaxed)
    }
}

impl Default for FeatureExchange {
    fn default() -> Self {
        Self::new()
    }
}
