//! Read-indicators: record which readers are in flight for one version of a
//! Left-Right instance.
//!
//! | indicator          | arrive/depart       | is_empty           | thread capacity |
//! |--------------------|---------------------|--------------------|-----------------|
//! | [`AtomicCounter`]  | one shared RMW      | O(1)               | none            |
//! | [`IngressEgress`]  | one shared RMW      | O(1), two loads    | none            |
//! | [`CounterArray`]   | RMW on hashed line  | O(buckets)         | none            |
//! | [`StaticPerThread`]| store on own line   | O(max_threads)     | `max_threads`   |
//! | [`EntryPerThread`] | store on own line   | O(max_threads)     | `max_threads`   |
//!
//! The single counters are the smallest but every reader writes the same
//! cache line. The per-thread arrays never contend but cap the number of
//! registered readers. The counter array sits in between.

mod counter;
mod counter_array;
mod ingress_egress;
mod per_thread;

pub use counter::AtomicCounter;
pub use counter_array::CounterArray;
pub use ingress_egress::IngressEgress;
pub use per_thread::{EntryPerThread, StaticPerThread};

use crate::{config::Config, slot::Slot};

/// The contract every read-indicator fulfils.
///
/// * `arrive` must be visible to a writer that calls `is_empty` afterwards
///   and must never block.
/// * `depart` must be paired 1:1 with an earlier `arrive` made with the same
///   slot. A depart with nothing to match is misuse and panics.
/// * `is_empty` is true iff every arrival has departed. It is only called by
///   the writer currently holding the writer lock.
pub trait ReadIndicator: Send + Sync {
    fn with_config(config: &Config) -> Self
    where
        Self: Sized;

    /// How many slots may be registered at once, `None` for no limit.
    fn slot_capacity(_config: &Config) -> Option<usize>
    where
        Self: Sized,
    {
        None
    }

    fn arrive(&self, slot: &Slot<'_>);
    fn depart(&self, slot: &Slot<'_>);
    fn is_empty(&self) -> bool;
}
