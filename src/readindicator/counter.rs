use std::sync::atomic::{AtomicU64, Ordering};

use super::ReadIndicator;
use crate::{config::Config, error::misuse, slot::Slot, sync::Padded};

/// A single shared counter of readers in flight.
///
/// Lowest memory footprint, wait-free population oblivious on platforms with
/// a fetch-add instruction, but every reader writes the same cache line.
#[derive(Default)]
pub struct AtomicCounter {
    counter: Padded<AtomicU64>,
}

impl ReadIndicator for AtomicCounter {
    fn with_config(_config: &Config) -> Self {
        Self::default()
    }

    #[inline]
    fn arrive(&self, _slot: &Slot<'_>) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    fn depart(&self, _slot: &Slot<'_>) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 0 {
            self.counter.fetch_add(1, Ordering::SeqCst);
            misuse("depart without a matching arrive")
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == 0
    }
}
