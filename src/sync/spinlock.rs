use super::{sealed::Release, Mutex, MutexGuard};
use crate::{config::WaitPolicy, error::misuse};
use std::sync::atomic::{AtomicBool, Ordering};

/// Test-and-test-and-set lock.
///
/// Used where starvation-freedom among writers comes from somewhere else,
/// e.g. the flat-combining Left-Right where a waiting writer gets its work
/// done by whoever holds the lock.
#[derive(Default)]
pub struct SpinLock {
    locked: AtomicBool,
    wait: WaitPolicy,
}

impl SpinLock {
    const LOCKED: bool = true;
    const UNLOCKED: bool = false;

    pub fn new(wait: WaitPolicy) -> Self {
        Self {
            locked: AtomicBool::new(SpinLock::UNLOCKED),
            wait,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Mutex for SpinLock {
    fn acquire(&self) -> MutexGuard<'_, Self> {
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            self.wait.pause()
        }
    }

    fn try_acquire(&self) -> Option<MutexGuard<'_, Self>> {
        // Load first so that waiters spin on a shared line instead of bouncing it with CAS
        if self.locked.load(Ordering::Relaxed) == SpinLock::UNLOCKED
            && self
                .locked
                .compare_exchange(
                    SpinLock::UNLOCKED,
                    SpinLock::LOCKED,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }
}

impl Release for SpinLock {
    fn release(&self) {
        if self
            .locked
            .compare_exchange(
                SpinLock::LOCKED,
                SpinLock::UNLOCKED,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_err()
        {
            misuse("released a SpinLock that was not locked")
        }
    }
}

impl std::fmt::Debug for SpinLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::WaitPolicy,
        sync::{sealed::Release, Mutex, SpinLock},
    };
    use std::sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    };
    const N_THREADS: i32 = 4;
    const WORK: i32 = 200_000 / N_THREADS;

    #[test]
    fn mutual_exclusion() {
        for policy in [WaitPolicy::Yield, WaitPolicy::Spin] {
            let data = Arc::new(TestData::default());
            let mu = Arc::new(SpinLock::new(policy));
            let ths = (0..N_THREADS)
                .map(|n| {
                    let data = data.clone();
                    let mu = mu.clone();
                    std::thread::spawn(move || {
                        for _ in 0..WORK {
                            let _guard = mu.acquire();
                            if n % 2 == 0 {
                                data.add_then_sub();
                            } else {
                                data.sub_then_add();
                            }
                        }
                    })
                })
                .collect::<Vec<_>>();
            ths.into_iter().for_each(|th| th.join().unwrap());
            assert_eq!(data.0.load(Ordering::Relaxed), WORK * N_THREADS);
            assert_eq!(data.1.load(Ordering::Relaxed), -WORK * N_THREADS);
            assert!(!mu.is_locked());
        }
    }

    #[test]
    fn try_acquire_fails_while_held() {
        let mu = SpinLock::default();
        let guard = mu.try_acquire().expect("fresh lock is free");
        assert!(mu.is_locked());
        assert!(mu.try_acquire().is_none());
        drop(guard);
        assert!(!mu.is_locked());
        assert!(mu.try_acquire().is_some());
    }

    #[test]
    fn try_acquire_from_other_thread_while_held() {
        let mu = Arc::new(SpinLock::default());
        let _guard = mu.acquire();
        let th = std::thread::spawn({
            let mu = mu.clone();
            move || mu.try_acquire().is_none()
        });
        assert!(th.join().unwrap());
    }

    #[test]
    #[should_panic(expected = "misuse")]
    fn release_without_holding_panics() {
        let mu = SpinLock::default();
        mu.release();
    }

    #[derive(Default)]
    struct TestData(AtomicI32, AtomicI32);
    impl TestData {
        // Relaxed on purpose, the lock must provide the ordering
        fn add_then_sub(&self) {
            let i = self.0.load(Ordering::Relaxed);
            let d = self.1.load(Ordering::Relaxed);
            self.0.store(i + 1, Ordering::Relaxed);
            self.1.store(d - 1, Ordering::Relaxed);
        }
        fn sub_then_add(&self) {
            let d = self.1.load(Ordering::Relaxed);
            let i = self.0.load(Ordering::Relaxed);
            self.1.store(d - 1, Ordering::Relaxed);
            self.0.store(i + 1, Ordering::Relaxed);
        }
    }
}
