//! Busy-waiting spinlock.
//!
//! The spinlock is the foundation every sleeping primitive in this crate is
//! built on: lock state, waiter lists, and readiness flags all live behind
//! one. Critical sections guarded by it must stay short and bounded — a
//! holder never sleeps, and a contender burns CPU (backing off to a yield)
//! until the holder is done.

use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::Backoff;

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
pub struct WouldBlock;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// This spinlock will busy-wait threads waiting for the lock to become
/// available. Each spinlock has a type parameter which represents the data
/// that it is protecting. The data can only be accessed through the guards
/// returned from [`lock`] and [`try_lock`], which guarantees that the data
/// is only ever accessed when the spinlock is locked.
///
/// The guard does **not** release on drop: it must be released explicitly
/// with [`SpinLockGuard::unlock`], and dropping a live guard panics. This
/// keeps every unlock visible at its call site, which matters for the
/// wait/wake protocols layered on top.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```
/// use syncdev::sync::SpinLock;
///
/// let data = SpinLock::new(0);
/// let mut guard = data.lock();
/// *guard += 1;
/// guard.unlock();
/// ```
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this spinlock, returning the underlying data.
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the spinlock, busy-waiting until it is able to do so.
    ///
    /// Upon returning, the calling thread is the only thread with the lock
    /// held. The returned guard must be released with
    /// [`SpinLockGuard::unlock`].
    ///
    /// The exact behavior on locking a spinlock in the thread which already
    /// holds the lock is left unspecified; this function will not return on
    /// the second call.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        while self.locked.fetch_or(true, Ordering::Acquire) {
            backoff.snooze();
        }
        SpinLockGuard {
            caller: core::panic::Location::caller(),
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// This function does not block.
    ///
    /// # Errors
    ///
    /// If the spinlock could not be acquired because it is already locked,
    /// then this call will return the [`WouldBlock`] error.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        if !self.locked.fetch_or(true, Ordering::Acquire) {
            Ok(SpinLockGuard {
                caller: core::panic::Location::caller(),
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            Err(WouldBlock)
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    /// Creates a `SpinLock<T>`, with the `Default` value for T.
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a spinlock. When this structure
/// is dropped (falls out of scope) without unlock, panic occurs.
///
/// The lock must be explicitly unlocked by the [`unlock`] method.
///
/// The data protected by the spinlock can be accessed through this guard.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a SpinLock<T>,
    // Guards stay on the acquiring thread.
    _not_send: PhantomData<*const ()>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`].
    ///
    /// As the guard does **not** automatically release the lock on drop,
    /// the caller must explicitly invoke [`unlock`] to mark the lock as
    /// available again.
    ///
    /// [`unlock`]: Self::unlock
    pub fn unlock(self) {
        self.lock.locked.store(false, Ordering::Release);
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        panic!(
            "`.unlock()` must be explicitly called before dropping SpinLockGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn smoke() {
        let data = Arc::new(SpinLock::new(0usize));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let data = data.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut g = data.lock();
                        *g += 1;
                        g.unlock();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let g = data.lock();
        let v = *g;
        g.unlock();
        assert_eq!(v, 8000);
    }

    #[test]
    fn try_lock_contended() {
        let lock = SpinLock::new(());
        let g = lock.lock();
        assert!(lock.try_lock().is_err());
        g.unlock();
        let g = lock.try_lock().ok().unwrap();
        g.unlock();
    }
}
