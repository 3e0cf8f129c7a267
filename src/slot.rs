//! Reader slots.
//!
//! Per-thread read-indicators and the flat-combining request array need to
//! know which entry belongs to the calling thread. Instead of a global
//! thread-id table, every Left-Right instance owns a [`SlotRegistry`] and a
//! thread asks it for a [`Slot`] once, then passes the slot to every read.
//! Dropping the slot gives the entry back.

use std::{
    cell::Cell,
    fmt,
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crate::{
    error::{misuse, Error, Result},
    sync::Padded,
};

pub struct SlotRegistry {
    kind: Kind,
}

enum Kind {
    // One claim flag per entry of the per-thread arrays
    Bounded(Box<[Padded<AtomicBool>]>),
    // Ids only feed a hash or are ignored, so they never run out
    Unbounded(AtomicUsize),
}

impl SlotRegistry {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            kind: Kind::Bounded((0..capacity).map(|_| Padded::default()).collect()),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            kind: Kind::Unbounded(AtomicUsize::new(0)),
        }
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        match &self.kind {
            Kind::Bounded(claimed) => Some(claimed.len()),
            Kind::Unbounded(_) => None,
        }
    }

    /// Claims a free slot for the calling thread.
    pub fn register(&self) -> Result<Slot<'_>> {
        let index = match &self.kind {
            Kind::Bounded(claimed) => claimed
                .iter()
                .position(|c| {
                    !c.load(Ordering::Relaxed)
                        && c.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                            .is_ok()
                })
                .ok_or(Error::SlotsExhausted {
                    capacity: claimed.len(),
                })?,
            Kind::Unbounded(next) => next.fetch_add(1, Ordering::Relaxed),
        };
        tracing::trace!(index, "reader slot registered");
        Ok(Slot {
            index,
            registry: self,
            _not_sync: PhantomData,
        })
    }

    fn release(&self, index: usize) {
        if let Kind::Bounded(claimed) = &self.kind {
            claimed[index].store(false, Ordering::Release);
        }
    }
}

impl fmt::Debug for SlotRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRegistry")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// A thread's claim on one entry of a [`SlotRegistry`].
///
/// A slot may move to another thread but is never shared by two threads at
/// once, which is what per-thread read-indicators rely on.
pub struct Slot<'a> {
    index: usize,
    registry: &'a SlotRegistry,
    _not_sync: PhantomData<Cell<()>>,
}

impl Slot<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn assert_issued_by(&self, registry: &SlotRegistry) {
        if !std::ptr::eq(self.registry, registry) {
            misuse("slot used with an instance that did not issue it")
        }
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.registry.release(self.index)
    }
}

impl fmt::Debug for Slot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&self.index).finish()
    }
}
