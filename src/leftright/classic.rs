use std::{
    fmt,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use super::{Departure, Instances, Mutation, Side, VersionIndex, WritersGuard};
use crate::{
    config::{Config, WaitPolicy},
    error::Result,
    readindicator::{AtomicCounter, ReadIndicator},
    slot::{Slot, SlotRegistry},
    sync::Padded,
};

/// Classic Left-Right over any read-indicator.
///
/// ```
/// use lrcc::LeftRight;
///
/// let lr: LeftRight<Vec<i32>> = LeftRight::new(Vec::new());
/// let slot = lr.register().unwrap();
/// lr.mutate(&|v: &mut Vec<i32>| v.push(1));
/// assert_eq!(lr.read(&slot, |v| v.clone()), vec![1]);
/// ```
///
/// Progress:
/// * `arrive`/`depart`/`read`: those of the read-indicator, wait-free for
///   every indicator in this crate.
/// * `mutate`: blocking, on the writer mutex and on reader drains.
pub struct LeftRight<T, RI = AtomicCounter> {
    instances: Instances<T>,
    side: Padded<AtomicU64>,
    pub(crate) versions: Versions<RI>,
    writers: parking_lot::Mutex<()>,
    registry: SlotRegistry,
    mutations: AtomicU64,
}

// Readers share &T across threads and the writer mutates from whichever
// thread calls `mutate`.
unsafe impl<T: Send + Sync, RI: ReadIndicator> Sync for LeftRight<T, RI> {}

impl<T: Clone, RI: ReadIndicator> LeftRight<T, RI> {
    /// Protects `instance`, the second copy is a clone of it.
    pub fn new(instance: T) -> Self {
        let right = instance.clone();
        Self::build(instance, right, &Config::default())
    }

    pub fn with_config(instance: T, config: &Config) -> Result<Self> {
        config.validate()?;
        let right = instance.clone();
        Ok(Self::build(instance, right, config))
    }
}

impl<T, RI: ReadIndicator> LeftRight<T, RI> {
    /// Protects two copies supplied by the caller. They must be equal.
    pub fn from_pair(left: T, right: T, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(left, right, config))
    }

    fn build(left: T, right: T, config: &Config) -> Self {
        Self {
            instances: Instances::new(left, right),
            side: Padded(AtomicU64::new(Side::Left as u64)),
            versions: Versions::new(config),
            writers: parking_lot::Mutex::new(()),
            registry: SlotRegistry::with_capacity(RI::slot_capacity(config)),
            mutations: AtomicU64::new(0),
        }
    }

    /// Claims a reader slot for the calling thread.
    pub fn register(&self) -> Result<Slot<'_>> {
        self.registry.register()
    }

    /// Marks that a reader has arrived, returns the version index to depart
    /// from.
    #[inline]
    pub fn arrive(&self, slot: &Slot<'_>) -> VersionIndex {
        slot.assert_issued_by(&self.registry);
        self.versions.arrive(slot)
    }

    /// Marks that a reader has departed.
    #[inline]
    pub fn depart(&self, slot: &Slot<'_>, vi: VersionIndex) {
        slot.assert_issued_by(&self.registry);
        self.versions.depart(slot, vi)
    }

    /// Runs a read-only query against the copy currently active for
    /// readers.
    #[inline]
    pub fn read<R>(&self, slot: &Slot<'_>, query: impl FnOnce(&T) -> R) -> R {
        let vi = self.arrive(slot);
        let _departure = Departure(|| self.versions.depart(slot, vi));
        // The side must be loaded after arriving, see `mutate`
        let side = Side::from_bit(self.side.load(Ordering::SeqCst));
        // SAFETY: we arrived before loading `side` and depart after `query`
        query(unsafe { self.instances.get(side) })
    }

    /// Applies `mutation` to both copies and returns the output of the
    /// first application.
    pub fn mutate<M: Mutation<T>>(&self, mutation: &M) -> M::Output {
        let _guard = self.writers.lock();
        // Only writers store `side` and we are the only writer
        let active = Side::from_bit(self.side.load(Ordering::Relaxed));
        // SAFETY: readers only go to the active side
        let output = mutation.apply(unsafe { self.instances.get_mut(active.opposite()) });
        self.side.store(active.opposite() as u64, Ordering::SeqCst);
        self.versions.toggle_and_wait();
        // SAFETY: readers that could have seen `active` have all departed
        mutation.apply(unsafe { self.instances.get_mut(active) });
        let n = self.mutations.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(mutations = n, side = ?active.opposite(), "left-right mutation applied");
        output
    }

    /// Holds the writer mutex, readers are not affected.
    pub fn writers_lock(&self) -> WritersGuard<'_> {
        self.writers.lock()
    }

    pub fn try_writers_lock(&self) -> Option<WritersGuard<'_>> {
        self.writers.try_lock()
    }

    pub fn active_side(&self) -> Side {
        Side::from_bit(self.side.load(Ordering::SeqCst))
    }

    pub fn version_index(&self) -> VersionIndex {
        self.versions.current()
    }

    /// Number of completed `mutate` calls.
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    /// Returns the `(left, right)` copies.
    pub fn into_inner(self) -> (T, T) {
        self.instances.into_inner()
    }
}

impl<T: Default + Clone, RI: ReadIndicator> Default for LeftRight<T, RI> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, RI: ReadIndicator> fmt::Debug for LeftRight<T, RI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeftRight")
            .field("side", &Side::from_bit(self.side.load(Ordering::Relaxed)))
            .field("version", &self.versions.current())
            .field("registry", &self.registry)
            .field("mutations", &self.mutations.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A version index and the read-indicator of each version.
///
/// Shared by the variants that keep read-indicators apart from the active
/// side.
pub(crate) struct Versions<RI> {
    version: Padded<AtomicUsize>,
    readers: [RI; 2],
    wait: WaitPolicy,
}

impl<RI: ReadIndicator> Versions<RI> {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            version: Padded(AtomicUsize::new(0)),
            readers: [RI::with_config(config), RI::with_config(config)],
            wait: config.wait,
        }
    }

    #[inline]
    pub(crate) fn arrive(&self, slot: &Slot<'_>) -> VersionIndex {
        let vi = VersionIndex(self.version.load(Ordering::SeqCst));
        self.readers[vi.index()].arrive(slot);
        vi
    }

    #[inline]
    pub(crate) fn depart(&self, slot: &Slot<'_>, vi: VersionIndex) {
        self.readers[vi.index()].depart(slot)
    }

    /// Waits for every reader that arrived before the version changes to
    /// depart. Only called with the writer lock held.
    pub(crate) fn toggle_and_wait(&self) {
        let prev = self.current();
        let next = prev.next();
        // Readers left on `next` from the last toggle could still hold the old side
        self.wait.wait_until(|| self.readers[next.index()].is_empty());
        self.version.store(next.index(), Ordering::SeqCst);
        // From here new arrivals go to `next`, wait for the stragglers on `prev`
        self.wait.wait_until(|| self.readers[prev.index()].is_empty());
        tracing::trace!(version = next.index(), "readers drained");
    }

    pub(crate) fn current(&self) -> VersionIndex {
        VersionIndex(self.version.load(Ordering::SeqCst))
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self, vi: VersionIndex) -> bool {
        self.readers[vi.index()].is_empty()
    }
}
