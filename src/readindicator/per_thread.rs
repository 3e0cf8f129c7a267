use std::sync::atomic::{AtomicU8, Ordering};

use super::ReadIndicator;
use crate::{config::Config, error::misuse, slot::Slot, sync::Padded};

const NOT_READING: u8 = 0;
const READING: u8 = 1;

fn states(max_threads: usize) -> Box<[Padded<AtomicU8>]> {
    (0..max_threads)
        .map(|_| Padded(AtomicU8::new(NOT_READING)))
        .collect()
}

fn state<'a>(states: &'a [Padded<AtomicU8>], slot: &Slot<'_>) -> &'a AtomicU8 {
    match states.get(slot.index()) {
        Some(state) => state,
        None => misuse("slot index beyond the per-thread read-indicator capacity"),
    }
}

/// One padded reading/not-reading flag per registered slot, every access
/// sequentially consistent.
///
/// Readers never share a cache line, at the price of `max_threads` lines per
/// indicator and a scan of all of them in `is_empty`.
pub struct StaticPerThread {
    states: Box<[Padded<AtomicU8>]>,
}

impl StaticPerThread {
    pub fn new(max_threads: usize) -> Self {
        Self {
            states: states(max_threads),
        }
    }
}

impl ReadIndicator for StaticPerThread {
    fn with_config(config: &Config) -> Self {
        Self::new(config.max_threads)
    }

    fn slot_capacity(config: &Config) -> Option<usize> {
        Some(config.max_threads)
    }

    #[inline]
    fn arrive(&self, slot: &Slot<'_>) {
        state(&self.states, slot).store(READING, Ordering::SeqCst);
    }

    #[inline]
    fn depart(&self, slot: &Slot<'_>) {
        if state(&self.states, slot).swap(NOT_READING, Ordering::SeqCst) != READING {
            misuse("depart without a matching arrive")
        }
    }

    fn is_empty(&self) -> bool {
        self.states
            .iter()
            .all(|s| s.load(Ordering::SeqCst) == NOT_READING)
    }
}

/// Same layout as [`StaticPerThread`] with weaker orderings where the
/// protocol allows them.
///
/// Arrival is a store followed by a load of the same flag, which keeps the
/// reader's later loads from moving above it. Departure only needs release
/// and the writer's scan only acquire.
pub struct EntryPerThread {
    states: Box<[Padded<AtomicU8>]>,
}

impl EntryPerThread {
    pub fn new(max_threads: usize) -> Self {
        Self {
            states: states(max_threads),
        }
    }
}

impl ReadIndicator for EntryPerThread {
    fn with_config(config: &Config) -> Self {
        Self::new(config.max_threads)
    }

    fn slot_capacity(config: &Config) -> Option<usize> {
        Some(config.max_threads)
    }

    #[inline]
    fn arrive(&self, slot: &Slot<'_>) {
        let state = state(&self.states, slot);
        state.store(READING, Ordering::SeqCst);
        state.load(Ordering::SeqCst);
    }

    #[inline]
    fn depart(&self, slot: &Slot<'_>) {
        if state(&self.states, slot).swap(NOT_READING, Ordering::Release) != READING {
            misuse("depart without a matching arrive")
        }
    }

    fn is_empty(&self) -> bool {
        self.states
            .iter()
            .all(|s| s.load(Ordering::Acquire) != READING)
    }
}
