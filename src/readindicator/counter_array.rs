use std::sync::atomic::{AtomicU64, Ordering};

use super::ReadIndicator;
use crate::{config::Config, error::misuse, slot::Slot, sync::Padded};

/// Counters spread over `counter_buckets` cache lines.
///
/// A slot is hashed to one bucket, so there is no limit on how many threads
/// may read. Two slots landing on the same bucket only make `is_empty`
/// report later, never earlier: a bucket reaches zero only once every
/// reader hashed to it has departed.
pub struct CounterArray {
    buckets: Box<[Padded<AtomicU64>]>,
    mask: usize,
}

impl CounterArray {
    pub fn new(buckets: usize) -> Self {
        let buckets = buckets.max(1).next_power_of_two();
        Self {
            buckets: (0..buckets).map(|_| Padded::default()).collect(),
            mask: buckets - 1,
        }
    }

    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    // xorshift by George Marsaglia, cheap and good enough to spread dense slot ids
    #[inline]
    fn bucket(&self, slot: &Slot<'_>) -> &AtomicU64 {
        let mut x = slot.index() as u64 + 1;
        x ^= x << 21;
        x ^= x >> 35;
        x ^= x << 4;
        &self.buckets[(x as usize) & self.mask]
    }
}

impl ReadIndicator for CounterArray {
    fn with_config(config: &Config) -> Self {
        Self::new(config.counter_buckets)
    }

    #[inline]
    fn arrive(&self, slot: &Slot<'_>) {
        self.bucket(slot).fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    fn depart(&self, slot: &Slot<'_>) {
        let bucket = self.bucket(slot);
        if bucket.fetch_sub(1, Ordering::SeqCst) == 0 {
            bucket.fetch_add(1, Ordering::SeqCst);
            misuse("depart without a matching arrive")
        }
    }

    fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.load(Ordering::SeqCst) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::CounterArray;
    use crate::{readindicator::ReadIndicator, slot::SlotRegistry};

    #[test]
    fn bucket_count_rounds_up_to_power_of_two() {
        assert_eq!(CounterArray::new(0).buckets(), 1);
        assert_eq!(CounterArray::new(5).buckets(), 8);
        assert_eq!(CounterArray::new(64).buckets(), 64);
    }

    #[test]
    fn colliding_slots_only_delay_emptiness() {
        // A single bucket forces every slot to collide
        let ri = CounterArray::new(1);
        let registry = SlotRegistry::unbounded();
        let a = registry.register().unwrap();
        let b = registry.register().unwrap();
        ri.arrive(&a);
        ri.arrive(&b);
        ri.depart(&a);
        assert!(!ri.is_empty());
        ri.depart(&b);
        assert!(ri.is_empty());
    }

    #[test]
    fn slots_spread_over_buckets() {
        let ri = CounterArray::new(16);
        let registry = SlotRegistry::unbounded();
        let slots = (0..64)
            .map(|_| registry.register().unwrap())
            .collect::<Vec<_>>();
        slots.iter().for_each(|s| ri.arrive(s));
        let used = ri
            .buckets
            .iter()
            .filter(|b| b.load(std::sync::atomic::Ordering::Relaxed) > 0)
            .count();
        assert!(used > 4, "only {used} of 16 buckets used");
        slots.iter().for_each(|s| ri.depart(s));
        assert!(ri.is_empty());
    }
}
