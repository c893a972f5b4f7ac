use std::cell::UnsafeCell;
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use crate::macros::fatal;

/// A long-term lock: waiters are put to sleep instead of spinning, so it may be
/// held across slow operations such as disk transfers.
///
/// Unlike `std::sync::Mutex` the lock is not tied to a guard's lifetime.
/// Ownership is tracked per thread, which lets callers check [`holding`]
/// before touching the protected data.
///
/// [`holding`]: SleepLock::holding
pub struct SleepLock<T> {
    name: &'static str,
    holder: Mutex<Option<ThreadId>>,
    wakeup: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: the data is only reachable through `data_ptr`, whose callers must be
// the current holder, so at most one thread touches it at a time.
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        SleepLock {
            name,
            holder: Mutex::new(None),
            wakeup: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Blocks until the lock is free, then takes it for the calling thread.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut holder = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if *holder == Some(me) {
            drop(holder);
            fatal!("acquire {}: already held by this thread", self.name);
        }
        while holder.is_some() {
            holder = self
                .wakeup
                .wait(holder)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *holder = Some(me);
    }

    /// Releases the lock and wakes one waiter. Fatal if the calling thread is
    /// not the holder.
    pub fn release(&self) {
        let me = thread::current().id();
        let mut holder = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if *holder != Some(me) {
            drop(holder);
            fatal!("release {}: not held by this thread", self.name);
        }
        *holder = None;
        drop(holder);
        self.wakeup.notify_one();
    }

    /// Whether the calling thread holds the lock.
    pub fn holding(&self) -> bool {
        let holder = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        *holder == Some(thread::current().id())
    }

    pub fn is_locked(&self) -> bool {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Raw pointer to the protected data. Dereferencing it is only sound while
    /// the calling thread holds the lock.
    pub fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_sleeplock_tracks_holder() {
        let lock = SleepLock::new("test", 0u32);
        assert_eq!(lock.name(), "test");
        assert!(!lock.holding());
        lock.acquire();
        assert!(lock.holding());
        assert!(lock.is_locked());

        thread::scope(|s| {
            s.spawn(|| assert!(!lock.holding()));
        });

        lock.release();
        assert!(!lock.holding());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_sleeplock_blocks_until_released() {
        let lock = SleepLock::new("test", 0u32);
        let released = AtomicBool::new(false);

        lock.acquire();
        thread::scope(|s| {
            s.spawn(|| {
                lock.acquire();
                // The main thread flips the flag before releasing.
                assert!(released.load(Ordering::SeqCst));
                // SAFETY: this thread holds the lock.
                unsafe { *lock.data_ptr() += 1 };
                lock.release();
            });

            thread::sleep(Duration::from_millis(20));
            // SAFETY: the main thread holds the lock.
            unsafe { *lock.data_ptr() += 1 };
            released.store(true, Ordering::SeqCst);
            lock.release();
        });

        lock.acquire();
        // SAFETY: the main thread holds the lock.
        assert_eq!(unsafe { *lock.data_ptr() }, 2);
        lock.release();
    }

    #[test]
    #[should_panic(expected = "not held by this thread")]
    fn test_sleeplock_release_without_holding() {
        let lock = SleepLock::new("test", ());
        lock.release();
    }

    #[test]
    #[should_panic(expected = "already held")]
    fn test_sleeplock_reacquire_is_fatal() {
        let lock = SleepLock::new("test", ());
        lock.acquire();
        lock.acquire();
    }
}
