//! Left-Right concurrency control.
//!
//! Two copies of an instance are kept. Readers are told which copy is
//! active and never wait; the single writer mutates the inactive copy,
//! flips the active side, waits for readers still on the old side to leave
//! and then replays the mutation on the old side.
//!
//! Variants:
//! * [`LeftRight`]: classic, a version index selecting one of two
//!   read-indicators of any [`ReadIndicator`] kind.
//! * [`LeftRightAL`]: both reader counters, the active side and the
//!   version index packed into one `AtomicU64`.
//! * [`LeftRightALNV`]: one `AtomicU64` of ingress/egress counters and the
//!   active side, no version index.
//! * [`LeftRightFlatCombining`]: writers publish their mutation and one
//!   combiner applies the whole batch per toggle.
//!
//! [`ReadIndicator`]: crate::readindicator::ReadIndicator

mod atomic_long;
mod atomic_long_nv;
mod classic;
mod flat_combining;

pub use atomic_long::LeftRightAL;
pub use atomic_long_nv::LeftRightALNV;
pub use classic::LeftRight;
pub use flat_combining::LeftRightFlatCombining;

use std::{cell::UnsafeCell, fmt};

/// Guard of the blocking writer mutex used by the classic and packed
/// variants. Holding it keeps every writer out while readers continue.
pub type WritersGuard<'a> = parking_lot::MutexGuard<'a, ()>;

/// Which of the two copies readers consult.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    #[inline(always)]
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    #[inline(always)]
    pub(crate) fn from_bit(bit: u64) -> Side {
        if bit & 1 == 0 {
            Side::Left
        } else {
            Side::Right
        }
    }

    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Selects which of the two read-indicators new readers arrive at.
///
/// Returned by `arrive` so that the matching `depart` goes to the same
/// indicator even if the writer toggled in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VersionIndex(pub(crate) usize);

impl VersionIndex {
    #[inline(always)]
    pub fn next(self) -> VersionIndex {
        VersionIndex((self.0 + 1) & 1)
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A mutation applied to both copies of a Left-Right instance.
///
/// Every mutation runs twice, once per copy, and both runs must leave the
/// copies equal and compute the same output: the output of the first run is
/// the one returned. Closures get this for free as long as they are `Fn`
/// and only read what they capture. Command enums implement it directly.
///
/// A mutation must not panic, the copy it was applied to would be left
/// different from the other one.
pub trait Mutation<T: ?Sized> {
    type Output;
    fn apply(&self, target: &mut T) -> Self::Output;
}

impl<T: ?Sized, R, F> Mutation<T> for F
where
    F: Fn(&mut T) -> R,
{
    type Output = R;

    #[inline]
    fn apply(&self, target: &mut T) -> R {
        self(target)
    }
}

/// The left and right copies.
///
/// Access is unsynchronised; the Left-Right protocol of the owning variant
/// guarantees that a copy is never read while it is being mutated.
pub(crate) struct Instances<T> {
    copies: [UnsafeCell<T>; 2],
}

impl<T> Instances<T> {
    pub(crate) fn new(left: T, right: T) -> Self {
        Self {
            copies: [UnsafeCell::new(left), UnsafeCell::new(right)],
        }
    }

    /// # Safety
    /// The caller must have arrived at a read-indicator before learning
    /// `side` as the active side, and must not have departed yet.
    #[inline(always)]
    pub(crate) unsafe fn get(&self, side: Side) -> &T {
        &*self.copies[side.index()].get()
    }

    /// # Safety
    /// The caller must hold the writer lock and `side` must be a side no
    /// reader can be on: the inactive side, or the previously active side
    /// after its readers drained.
    #[allow(clippy::mut_from_ref)]
    #[inline(always)]
    pub(crate) unsafe fn get_mut(&self, side: Side) -> &mut T {
        &mut *self.copies[side.index()].get()
    }

    pub(crate) fn into_inner(self) -> (T, T) {
        let [left, right] = self.copies;
        (left.into_inner(), right.into_inner())
    }
}

impl<T> fmt::Debug for Instances<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Contents are behind UnsafeCell and may be mid-mutation
        f.debug_struct("Instances").finish_non_exhaustive()
    }
}

/// Runs the wrapped closure on drop, so readers depart even when their
/// read closure unwinds.
pub(crate) struct Departure<F: FnMut()>(pub(crate) F);

impl<F: FnMut()> Drop for Departure<F> {
    fn drop(&mut self) {
        (self.0)()
    }
}
