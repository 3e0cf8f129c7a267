use std::{
    cell::UnsafeCell,
    fmt, ptr,
    sync::atomic::{AtomicPtr, AtomicU64, Ordering},
};

use super::{Departure, Instances, Mutation, Side, VersionIndex};
use crate::{
    config::{Config, WaitPolicy},
    error::{misuse, Result},
    readindicator::{ReadIndicator, StaticPerThread},
    slot::{Slot, SlotRegistry},
    sync::{Mutex, Padded, SpinLock},
};

use super::classic::Versions;

/// One writer's published mutation and, once combined, its output.
struct Request<M, R> {
    // Null when there is nothing to do. Points into the publishing writer's
    // stack frame, which stays alive until the combiner clears it.
    mutation: AtomicPtr<M>,
    // Written by the combiner before `mutation` is cleared, taken by the
    // owner after it sees the clear.
    result: UnsafeCell<Option<R>>,
}

impl<M, R> Request<M, R> {
    fn new() -> Self {
        Self {
            mutation: AtomicPtr::new(ptr::null_mut()),
            result: UnsafeCell::new(None),
        }
    }
}

/// Withdraws a batch whose passes did not finish because a mutation
/// unwound.
///
/// Every request of the batch is cleared with its result reset to `None`:
/// the owners stop waiting and report misuse, and no later combiner runs a
/// pointer into a frame that has already unwound.
struct Abandon<'a, M, R> {
    requests: &'a [Padded<Request<M, R>>],
    batch: &'a [(usize, *mut M)],
}

impl<M, R> Drop for Abandon<'_, M, R> {
    fn drop(&mut self) {
        for &(i, _) in self.batch {
            let request = &self.requests[i];
            // SAFETY: the owner does not read the result while its request is set
            unsafe { *request.result.get() = None };
            request.mutation.store(ptr::null_mut(), Ordering::Release);
        }
        tracing::error!(
            batch = self.batch.len(),
            "mutation panicked while combining, batch abandoned"
        );
    }
}

/// Left-Right where writers do not queue on a mutex.
///
/// A writer publishes its mutation in its slot's request entry and tries to
/// become the combiner. The combiner applies every published mutation to the
/// inactive copy, toggles once, applies the same batch to the other copy and
/// then hands each writer its output. A writer that is not the combiner
/// waits for its entry to be cleared.
///
/// Mutations are of a single type `M`, typically a command enum.
///
/// ```
/// use lrcc::{LeftRightFlatCombining, Mutation};
///
/// struct Add(u64);
/// impl Mutation<u64> for Add {
///     type Output = u64;
///     fn apply(&self, total: &mut u64) -> u64 {
///         *total += self.0;
///         *total
///     }
/// }
///
/// let lr: LeftRightFlatCombining<u64, Add> = LeftRightFlatCombining::new(0);
/// let slot = lr.register().unwrap();
/// assert_eq!(lr.mutate(&slot, &Add(2)), 2);
/// assert_eq!(lr.read(&slot, |total| *total), 2);
/// ```
pub struct LeftRightFlatCombining<T, M: Mutation<T>, RI = StaticPerThread> {
    instances: Instances<T>,
    side: Padded<AtomicU64>,
    versions: Versions<RI>,
    requests: Box<[Padded<Request<M, M::Output>>]>,
    combiner: SpinLock,
    registry: SlotRegistry,
    wait: WaitPolicy,
    batches: AtomicU64,
    combined: AtomicU64,
}

// The combiner runs other threads' mutations and moves their outputs back.
unsafe impl<T, M, RI> Sync for LeftRightFlatCombining<T, M, RI>
where
    T: Send + Sync,
    M: Mutation<T> + Sync,
    M::Output: Send,
    RI: ReadIndicator,
{
}

impl<T: Clone, M: Mutation<T>, RI: ReadIndicator> LeftRightFlatCombining<T, M, RI> {
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

impl<T, M: Mutation<T>, RI: ReadIndicator> LeftRightFlatCombining<T, M, RI> {
    pub fn from_pair(left: T, right: T, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(left, right, config))
    }

    fn build(left: T, right: T, config: &Config) -> Self {
        // Request entries are indexed by slot, so the registry is bounded
        // whatever the read-indicator needs.
        Self {
            instances: Instances::new(left, right),
            side: Padded(AtomicU64::new(Side::Left as u64)),
            versions: Versions::new(config),
            requests: (0..config.max_threads)
                .map(|_| Padded(Request::new()))
                .collect(),
            combiner: SpinLock::new(config.wait),
            registry: SlotRegistry::bounded(config.max_threads),
            wait: config.wait,
            batches: AtomicU64::new(0),
            combined: AtomicU64::new(0),
        }
    }

    /// Claims a slot, used both to read and to publish mutations.
    pub fn register(&self) -> Result<Slot<'_>> {
        self.registry.register()
    }

    #[inline]
    pub fn read<R>(&self, slot: &Slot<'_>, query: impl FnOnce(&T) -> R) -> R {
        slot.assert_issued_by(&self.registry);
        let vi: VersionIndex = self.versions.arrive(slot);
        let _departure = Departure(|| self.versions.depart(slot, vi));
        let side = Side::from_bit(self.side.load(Ordering::SeqCst));
        // SAFETY: arrived before loading the side, departs after the query
        query(unsafe { self.instances.get(side) })
    }

    /// Publishes `mutation` and returns once it has been applied to both
    /// copies, by this thread or by another combiner.
    pub fn mutate(&self, slot: &Slot<'_>, mutation: &M) -> M::Output {
        slot.assert_issued_by(&self.registry);
        let request = &self.requests[slot.index()];
        request
            .mutation
            .store(mutation as *const M as *mut M, Ordering::Release);
        loop {
            if request.mutation.load(Ordering::Acquire).is_null() {
                break;
            }
            if let Some(_guard) = self.combiner.try_acquire() {
                // Our request was published before we took the lock, so this
                // batch includes it
                self.combine();
                continue;
            }
            self.wait.pause();
        }
        // SAFETY: the combiner stored the result before clearing the request
        // and nobody touches it again until we publish anew
        match unsafe { (*request.result.get()).take() } {
            Some(output) => output,
            // A mutation in our batch panicked and the batch was abandoned
            None => misuse("combined request has no output"),
        }
    }

    /// Applies every published request. Called with the combiner lock held.
    fn combine(&self) {
        // One snapshot for both passes, requests published later wait for the
        // next batch
        let batch = self
            .requests
            .iter()
            .enumerate()
            .filter_map(|(i, request)| {
                let mutation = request.mutation.load(Ordering::Acquire);
                (!mutation.is_null()).then_some((i, mutation))
            })
            .collect::<Vec<_>>();
        if batch.is_empty() {
            return;
        }

        let abandon = Abandon {
            requests: &self.requests,
            batch: &batch,
        };
        let active = Side::from_bit(self.side.load(Ordering::Relaxed));
        for &(i, mutation) in &batch {
            // SAFETY: the publisher keeps `mutation` alive until it is cleared,
            // and readers are not on the inactive side
            let output = unsafe { (*mutation).apply(self.instances.get_mut(active.opposite())) };
            // SAFETY: the owner does not read the result while its request is set
            unsafe { *self.requests[i].result.get() = Some(output) };
        }
        self.side.store(active.opposite() as u64, Ordering::SeqCst);
        self.versions.toggle_and_wait();
        for &(_, mutation) in &batch {
            // SAFETY: readers of `active` drained in toggle_and_wait
            unsafe { (*mutation).apply(self.instances.get_mut(active)) };
        }
        std::mem::forget(abandon);
        for &(i, _) in &batch {
            self.requests[i]
                .mutation
                .store(ptr::null_mut(), Ordering::Release);
        }

        let batches = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
        self.combined.fetch_add(batch.len() as u64, Ordering::Relaxed);
        tracing::debug!(batch = batch.len(), batches, "combined mutations applied");
    }

    pub fn active_side(&self) -> Side {
        Side::from_bit(self.side.load(Ordering::SeqCst))
    }

    /// Number of toggles done by combiners so far.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Number of mutations applied so far.
    pub fn mutations(&self) -> u64 {
        self.combined.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> (T, T) {
        self.instances.into_inner()
    }
}

impl<T, M: Mutation<T>, RI: ReadIndicator> fmt::Debug for LeftRightFlatCombining<T, M, RI> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeftRightFlatCombining")
            .field("side", &self.active_side())
            .field("version", &self.versions.current())
            .field("combiner", &self.combiner)
            .field("batches", &self.batches())
            .field("mutations", &self.mutations())
            .finish_non_exhaustive()
    }
}
