use std::sync::atomic::{AtomicU64, Ordering};

use super::ReadIndicator;
use crate::{config::Config, error::misuse, slot::Slot, sync::Padded};

/// Two monotonic counters: arrivals go to `ingress`, departures to `egress`.
///
/// Readers arriving and readers departing touch different cache lines,
/// which helps when critical sections are long enough for the two streams
/// to overlap.
#[derive(Default)]
pub struct IngressEgress {
    ingress: Padded<AtomicU64>,
    egress: Padded<AtomicU64>,
}

impl ReadIndicator for IngressEgress {
    fn with_config(_config: &Config) -> Self {
        Self::default()
    }

    #[inline]
    fn arrive(&self, _slot: &Slot<'_>) {
        self.ingress.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    fn depart(&self, _slot: &Slot<'_>) {
        // Every earlier departure had its own arrival, so a matched departure
        // always finds ingress ahead of the egress it replaced.
        let egress = self.egress.fetch_add(1, Ordering::SeqCst);
        if egress >= self.ingress.load(Ordering::SeqCst) {
            self.egress.fetch_sub(1, Ordering::SeqCst);
            misuse("depart without a matching arrive")
        }
    }

    #[inline]
    fn is_empty(&self) -> bool {
        // egress first: egress <= ingress at every instant and ingress only grows
        let egress = self.egress.load(Ordering::SeqCst);
        egress == self.ingress.load(Ordering::SeqCst)
    }
}
