use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use super::{Departure, Instances, Mutation, Side, VersionIndex, WritersGuard};
use crate::{
    config::{Config, WaitPolicy},
    error::{misuse, Result},
    sync::Padded,
};

// Layout of the packed word:
// bits  0..30  readers arrived at version 0
// bits 30..60  readers arrived at version 1
// bit  60      active side
// bit  61      version index
const BIT_RI0: u32 = 0;
const BIT_RI1: u32 = 30;
const BIT_SIDE: u32 = 60;
const BIT_VERSION: u32 = 61;
const MASK_COUNTER: u64 = (1 << 30) - 1;

#[inline(always)]
fn counter_shift(vi: VersionIndex) -> u32 {
    if vi.index() == 0 {
        BIT_RI0
    } else {
        BIT_RI1
    }
}

#[inline(always)]
fn readers(word: u64, vi: VersionIndex) -> u64 {
    (word >> counter_shift(vi)) & MASK_COUNTER
}

#[inline(always)]
fn side(word: u64) -> Side {
    Side::from_bit(word >> BIT_SIDE)
}

#[inline(always)]
fn version(word: u64) -> VersionIndex {
    VersionIndex(((word >> BIT_VERSION) & 1) as usize)
}

fn compose(ri0: u64, ri1: u64, side: Side, vi: VersionIndex) -> u64 {
    (ri0 & MASK_COUNTER) << BIT_RI0
        | (ri1 & MASK_COUNTER) << BIT_RI1
        | (side as u64) << BIT_SIDE
        | (vi.index() as u64) << BIT_VERSION
}

/// Left-Right with both read-indicators, the active side and the version
/// index packed in a single `AtomicU64`.
///
/// A reader does one load and two fetch-adds on the same cache line and
/// needs no slot. At most 2^30 - 1 readers may be in flight per version.
///
/// Progress: `arrive`/`depart`/`read` wait-free population oblivious on
/// platforms with fetch-add, `mutate` blocking.
pub struct LeftRightAL<T> {
    instances: Instances<T>,
    word: Padded<AtomicU64>,
    writers: parking_lot::Mutex<()>,
    wait: WaitPolicy,
}

unsafe impl<T: Send + Sync> Sync for LeftRightAL<T> {}

impl<T: Clone> LeftRightAL<T> {
    pub fn new(instance: T) -> Self {
        let right = instance.clone();
        Self::from_pair(instance, right, &Config::default())
    }

    pub fn with_config(instance: T, config: &Config) -> Result<Self> {
        config.validate()?;
        let right = instance.clone();
        Ok(Self::from_pair(instance, right, config))
    }
}

impl<T> LeftRightAL<T> {
    pub fn from_pair(left: T, right: T, config: &Config) -> Self {
        Self {
            instances: Instances::new(left, right),
            word: Padded(AtomicU64::new(compose(0, 0, Side::Left, VersionIndex(0)))),
            writers: parking_lot::Mutex::new(()),
            wait: config.wait,
        }
    }

    #[inline]
    pub fn arrive(&self) -> VersionIndex {
        let vi = version(self.word.load(Ordering::SeqCst));
        self.word.fetch_add(1 << counter_shift(vi), Ordering::SeqCst);
        vi
    }

    #[inline]
    pub fn depart(&self, vi: VersionIndex) {
        let delta = 1 << counter_shift(vi);
        let prev = self.word.fetch_sub(delta, Ordering::SeqCst);
        if readers(prev, vi) == 0 {
            // The subtraction borrowed from the neighbouring field, put it back
            self.word.fetch_add(delta, Ordering::SeqCst);
            misuse("depart without a matching arrive")
        }
    }

    #[inline]
    pub fn read<R>(&self, query: impl FnOnce(&T) -> R) -> R {
        let vi = self.arrive();
        let _departure = Departure(|| self.depart(vi));
        let side = side(self.word.load(Ordering::SeqCst));
        // SAFETY: arrived before loading the side, departs after the query
        query(unsafe { self.instances.get(side) })
    }

    pub fn mutate<M: Mutation<T>>(&self, mutation: &M) -> M::Output {
        let _guard = self.writers.lock();
        let active = side(self.word.load(Ordering::Relaxed));
        // SAFETY: readers only go to the active side
        let output = mutation.apply(unsafe { self.instances.get_mut(active.opposite()) });
        self.toggle_version_and_wait();
        // SAFETY: readers of `active` drained in toggle_version_and_wait
        mutation.apply(unsafe { self.instances.get_mut(active) });
        tracing::debug!(side = ?active.opposite(), "packed left-right mutation applied");
        output
    }

    // Readers modify the word concurrently, so the bits are flipped with
    // fetch-add/sub rather than stores. A CAS loop would also work but would
    // not be starvation-free for the writer.
    fn toggle_version_and_wait(&self) {
        let word = self.word.load(Ordering::SeqCst);
        if side(word) == Side::Left {
            self.word.fetch_add(1 << BIT_SIDE, Ordering::SeqCst);
        } else {
            self.word.fetch_sub(1 << BIT_SIDE, Ordering::SeqCst);
        }
        let prev = version(word);
        let next = prev.next();
        self.wait
            .wait_until(|| readers(self.word.load(Ordering::SeqCst), next) == 0);
        if prev.index() == 0 {
            self.word.fetch_add(1 << BIT_VERSION, Ordering::SeqCst);
        } else {
            self.word.fetch_sub(1 << BIT_VERSION, Ordering::SeqCst);
        }
        self.wait
            .wait_until(|| readers(self.word.load(Ordering::SeqCst), prev) == 0);
        tracing::trace!(version = next.index(), "packed readers drained");
    }

    pub fn writers_lock(&self) -> WritersGuard<'_> {
        self.writers.lock()
    }

    pub fn active_side(&self) -> Side {
        side(self.word.load(Ordering::SeqCst))
    }

    pub fn version_index(&self) -> VersionIndex {
        version(self.word.load(Ordering::SeqCst))
    }

    pub fn into_inner(self) -> (T, T) {
        self.instances.into_inner()
    }
}

impl<T> fmt::Debug for LeftRightAL<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.word.load(Ordering::Relaxed);
        f.debug_struct("LeftRightAL")
            .field("side", &side(word))
            .field("version", &version(word))
            .field("readers", &(readers(word, VersionIndex(0)), readers(word, VersionIndex(1))))
            .finish_non_exhaustive()
    }
}
