use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use super::{Departure, Instances, Mutation, Side, WritersGuard};
use crate::{
    config::{Config, WaitPolicy},
    error::{misuse, Result},
    sync::Padded,
};

// Layout of the packed word:
// bits  0..20  ingress, arrivals since the last toggle
// bits 20..40  egress of readers that arrived while Left was active
// bits 40..60  egress of readers that arrived while Right was active
// bit  60      active side
const BIT_INGRESS: u32 = 0;
const BIT_EGRESS_LEFT: u32 = 20;
const BIT_EGRESS_RIGHT: u32 = 40;
const BIT_SIDE: u32 = 60;
const MASK_COUNTER: u64 = (1 << 20) - 1;

/// Once ingress reaches this value a departing reader rebases the active
/// side's counters. Half the field leaves room for as many arrivals again
/// before anyone gets to rebase.
pub(crate) const OVERFLOW_THRESHOLD: u64 = 1 << 19;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fields {
    side: Side,
    ingress: u64,
    egress_left: u64,
    egress_right: u64,
}

impl Fields {
    #[inline(always)]
    fn unpack(word: u64) -> Fields {
        Fields {
            side: Side::from_bit(word >> BIT_SIDE),
            ingress: (word >> BIT_INGRESS) & MASK_COUNTER,
            egress_left: (word >> BIT_EGRESS_LEFT) & MASK_COUNTER,
            egress_right: (word >> BIT_EGRESS_RIGHT) & MASK_COUNTER,
        }
    }

    #[inline(always)]
    fn pack(self) -> u64 {
        (self.side as u64) << BIT_SIDE
            | (self.ingress & MASK_COUNTER) << BIT_INGRESS
            | (self.egress_left & MASK_COUNTER) << BIT_EGRESS_LEFT
            | (self.egress_right & MASK_COUNTER) << BIT_EGRESS_RIGHT
    }

    fn reset(side: Side) -> Fields {
        Fields {
            side,
            ingress: 0,
            egress_left: 0,
            egress_right: 0,
        }
    }

    #[inline(always)]
    fn egress(&self, side: Side) -> u64 {
        match side {
            Side::Left => self.egress_left,
            Side::Right => self.egress_right,
        }
    }

    fn with_egress(mut self, side: Side, egress: u64) -> Fields {
        match side {
            Side::Left => self.egress_left = egress,
            Side::Right => self.egress_right = egress,
        }
        self
    }
}

#[inline(always)]
fn egress_delta(side: Side) -> u64 {
    match side {
        Side::Left => 1 << BIT_EGRESS_LEFT,
        Side::Right => 1 << BIT_EGRESS_RIGHT,
    }
}

/// Left-Right without a version index: one `AtomicU64` holding an ingress
/// counter, an egress counter per side and the active side.
///
/// A reader arrives with a single fetch-add that also tells it which side
/// to read, and departs with a fetch-add on that side's egress. The writer
/// toggles by swapping in a fresh word and only has to wait once, for the
/// egress of the old side to catch up with the ingress it swapped out.
///
/// The counters are 20 bits wide. Departing readers keep ingress below
/// [`OVERFLOW_THRESHOLD`] by subtracting the active egress from both, so up
/// to 2^19 readers may be in flight at once however many pass through.
pub struct LeftRightALNV<T> {
    instances: Instances<T>,
    word: Padded<AtomicU64>,
    writers: parking_lot::Mutex<()>,
    wait: WaitPolicy,
    rebases: AtomicU64,
}

unsafe impl<T: Send + Sync> Sync for LeftRightALNV<T> {}

impl<T: Clone> LeftRightALNV<T> {
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

impl<T> LeftRightALNV<T> {
    pub fn from_pair(left: T, right: T, config: &Config) -> Self {
        Self {
            instances: Instances::new(left, right),
            word: Padded(AtomicU64::new(Fields::reset(Side::Left).pack())),
            writers: parking_lot::Mutex::new(()),
            wait: config.wait,
            rebases: AtomicU64::new(0),
        }
    }

    /// Marks that a reader has arrived, returns the side it must read.
    #[inline]
    pub fn arrive(&self) -> Side {
        let word = self.word.fetch_add(1 << BIT_INGRESS, Ordering::SeqCst);
        Side::from_bit(word >> BIT_SIDE)
    }

    /// Marks that a reader of `side` has departed.
    ///
    /// Bounded by the number of threads concurrently arriving and departing,
    /// since each failed CAS means one of them made progress.
    #[inline]
    pub fn depart(&self, side: Side) {
        let delta = egress_delta(side);
        let mut word = self.word.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta);
        let fields = Fields::unpack(word);
        // While `side` is still active no swap happened since our arrival,
        // which is counted in ingress, so egress can at most catch up with it
        if fields.side == side && fields.egress(side) > fields.ingress {
            self.word.fetch_sub(delta, Ordering::SeqCst);
            misuse("depart without a matching arrive")
        }
        loop {
            let fields = Fields::unpack(word);
            if fields.ingress < OVERFLOW_THRESHOLD {
                return;
            }
            // Every egress of the active side belongs to an arrival counted in
            // ingress since the last toggle, so the difference is the readers
            // still in flight on it. The other side's egress is still being
            // watched by a writer and stays as it is.
            let active = fields.side;
            let rebased = Fields {
                ingress: fields.ingress - fields.egress(active),
                ..fields
            }
            .with_egress(active, 0);
            match self.word.compare_exchange(
                word,
                rebased.pack(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.rebases.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(in_flight = rebased.ingress, "ingress rebased");
                    return;
                }
                Err(actual) => word = actual,
            }
        }
    }

    #[inline]
    pub fn read<R>(&self, query: impl FnOnce(&T) -> R) -> R {
        let side = self.arrive();
        let _departure = Departure(|| self.depart(side));
        // SAFETY: the side came out of the same atomic that recorded the
        // arrival, and the departure happens after the query
        query(unsafe { self.instances.get(side) })
    }

    pub fn mutate<M: Mutation<T>>(&self, mutation: &M) -> M::Output {
        let _guard = self.writers.lock();
        let active = Fields::unpack(self.word.load(Ordering::Relaxed)).side;
        // SAFETY: readers only go to the active side
        let output = mutation.apply(unsafe { self.instances.get_mut(active.opposite()) });
        self.toggle_and_wait();
        // SAFETY: readers of `active` drained in toggle_and_wait
        mutation.apply(unsafe { self.instances.get_mut(active) });
        tracing::debug!(side = ?active.opposite(), "packed left-right mutation applied");
        output
    }

    fn toggle_and_wait(&self) {
        let old = Fields::unpack(self.word.load(Ordering::Relaxed)).side;
        let last = Fields::unpack(
            self.word
                .swap(Fields::reset(old.opposite()).pack(), Ordering::SeqCst),
        );
        // Readers still on `old` carry on adding to its egress in the new word
        let carried = last.egress(old);
        let drained = |egress: u64| {
            let departed = egress + carried;
            if departed > last.ingress {
                misuse("depart without a matching arrive")
            }
            departed == last.ingress
        };
        if !drained(0) {
            self.wait
                .wait_until(|| drained(Fields::unpack(self.word.load(Ordering::SeqCst)).egress(old)));
        }
        tracing::trace!(drained = last.ingress - carried, "packed readers drained");
    }

    pub fn writers_lock(&self) -> WritersGuard<'_> {
        self.writers.lock()
    }

    pub fn active_side(&self) -> Side {
        Fields::unpack(self.word.load(Ordering::SeqCst)).side
    }

    /// How many times departing readers rebased the counters.
    pub fn rebases(&self) -> u64 {
        self.rebases.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> (T, T) {
        self.instances.into_inner()
    }
}

impl<T> fmt::Debug for LeftRightALNV<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeftRightALNV")
            .field("word", &Fields::unpack(self.word.load(Ordering::Relaxed)))
            .field("rebases", &self.rebases())
            .finish_non_exhaustive()
    }
}
