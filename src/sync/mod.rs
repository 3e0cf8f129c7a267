pub mod spinlock;

pub use spinlock::SpinLock;

use crate::config::WaitPolicy;
use std::ops::Deref;

pub(crate) mod sealed {
    /// Unlocking half of a [`super::Mutex`]. Only `MutexGuard::drop` calls it,
    /// and it is unreachable outside the crate.
    pub trait Release {
        fn release(&self);
    }
}

/// Mutual exclusion between writers.
///
/// The requirements for that are
/// 1. Mutual Exclusion - at most one guard for a given mutex is alive at a time.
/// 2. Progress - assuming OS threads eventually run, a thread spinning in `acquire()` eventually
/// gets the guard once every holder drops theirs.
///
/// Only dropping the guard unlocks:
///
/// ```compile_fail
/// use lrcc::sync::{Mutex, SpinLock};
///
/// let mu = SpinLock::default();
/// let _guard = mu.acquire();
/// mu.release();
/// ```
pub trait Mutex: sealed::Release + Sized {
    fn acquire(&self) -> MutexGuard<'_, Self>;
    // Non-blocking variant, `None` when another thread holds the mutex
    fn try_acquire(&self) -> Option<MutexGuard<'_, Self>>;
}

#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct MutexGuard<'a, M: Mutex> {
    pub(crate) mutex: &'a M,
}

impl<M: Mutex> Drop for MutexGuard<'_, M> {
    fn drop(&mut self) {
        sealed::Release::release(self.mutex)
    }
}

impl WaitPolicy {
    #[inline]
    pub fn pause(self) {
        match self {
            WaitPolicy::Yield => std::thread::yield_now(),
            WaitPolicy::Spin => std::hint::spin_loop(),
        }
    }

    /// Blocks the calling thread until `done` returns true.
    #[inline]
    pub fn wait_until(self, mut done: impl FnMut() -> bool) {
        while !done() {
            self.pause()
        }
    }
}

/// Keeps `T` alone on its own pair of cache lines, so that counters written
/// by different threads do not invalidate each other.
#[derive(Default)]
#[repr(align(128))]
pub(crate) struct Padded<T>(pub(crate) T);

impl<T> Deref for Padded<T> {
    type Target = T;
    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}
