//! # Exclusive lock with blocking policies.
//!
//! The device lock of the original demos: one owner at a time, recorded by
//! task identity, acquirable under any [`Policy`]. Unlike the spin lock,
//! contended callers **sleep** — a waiter parks its thread and is handed
//! the lock directly by the releasing owner, FIFO, so release wakes exactly
//! one waiter and nobody barges past the queue.
//!
//! Ownership is identity-keyed rather than guard-keyed because the ioctl
//! demo holds the lock *across* calls: one command acquires, a later
//! command releases, and a release issued by a task that is not the owner
//! must fail with [`SyncError::NotOwner`]. The [`LockToken`] returned by
//! [`Lock::acquire`] is a scoped convenience on top of that protocol —
//! [`LockToken::detach`] is the escape hatch for the command layer that
//! keeps the lock held past the current scope.
//!
//! Cancellation is exact: a waiter that aborts (signal or timeout) is
//! removed from the wait set before its caller sees the error, and if the
//! grant raced with the cancellation the lock is handed on to the next
//! waiter rather than leaked.

use super::{Policy, SpinLock};
use crate::{SyncError, task::Current};
use crossbeam_utils::sync::Unparker;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Instant,
};

const PENDING: u8 = 0;
const GRANTED: u8 = 1;
const CANCELLED: u8 = 2;

struct Waiter {
    task: u64,
    state: AtomicU8,
    unparker: Unparker,
}

struct Inner {
    owner: Option<u64>,
    // Invariant: a non-empty queue implies an owner; every queued entry is
    // PENDING. Transitions happen under the spinlock, atomically with
    // removal from the queue.
    waiters: VecDeque<Arc<Waiter>>,
}

/// An exclusive lock whose ownership is recorded against the calling task.
///
/// See the [module documentation](self) for the acquisition policies and
/// the hand-off protocol.
pub struct Lock {
    inner: SpinLock<Inner>,
}

impl Lock {
    /// Creates a new lock in an unlocked state ready for use.
    pub const fn new() -> Lock {
        Lock {
            inner: SpinLock::new(Inner {
                owner: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquires the lock under `policy`, recording the calling task as the
    /// owner.
    ///
    /// On success returns a [`LockToken`]; releasing it (explicitly via
    /// [`LockToken::unlock`], or on drop) is equivalent to [`release`].
    ///
    /// The behavior of acquiring a lock the calling task already owns is
    /// left unspecified for the suspending policies; it will not return.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Busy`]: `TryOnce` and the lock is held.
    /// - [`SyncError::TimedOut`]: `Timed(d)` and `d` elapsed first.
    /// - [`SyncError::Interrupted`]: a matching cancellation signal arrived
    ///   during an `Interruptible` or `Killable` wait.
    /// - [`SyncError::InvalidArgument`]: malformed policy (`Timed` with a
    ///   zero duration).
    ///
    /// [`release`]: Self::release
    pub fn acquire(&self, policy: Policy) -> Result<LockToken<'_>, SyncError> {
        policy.validate()?;
        let tid = Current::id();

        let mut inner = self.inner.lock();
        if inner.owner.is_none() && inner.waiters.is_empty() {
            inner.owner = Some(tid);
            inner.unlock();
            return Ok(LockToken { lock: self });
        }
        if matches!(policy, Policy::TryOnce) {
            inner.unlock();
            return Err(SyncError::Busy);
        }
        if let Some(class) = policy.cancellation() {
            if Current::take_signal(class) {
                inner.unlock();
                return Err(SyncError::Interrupted);
            }
        }

        let waiter = Arc::new(Waiter {
            task: tid,
            state: AtomicU8::new(PENDING),
            unparker: Current::unparker(),
        });
        inner.waiters.push_back(waiter.clone());
        inner.unlock();

        let deadline = policy.deadline();
        loop {
            if waiter.state.load(Ordering::Acquire) == GRANTED {
                return Ok(LockToken { lock: self });
            }
            if let Some(class) = policy.cancellation() {
                if Current::take_signal(class) {
                    return self.cancel(&waiter, SyncError::Interrupted);
                }
            }
            match deadline {
                Some(d) => {
                    if Instant::now() >= d {
                        return self.cancel(&waiter, SyncError::TimedOut);
                    }
                    Current::park_deadline(d);
                }
                None => Current::park(),
            }
        }
    }

    /// Abort a wait. Removes the waiter from the queue exactly once; if the
    /// grant already happened, ownership is passed straight to the next
    /// waiter so the lock is never leaked by a cancelled caller.
    fn cancel(&self, waiter: &Arc<Waiter>, err: SyncError) -> Result<LockToken<'_>, SyncError> {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.waiters.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            inner.waiters.remove(pos);
            waiter.state.store(CANCELLED, Ordering::Release);
            inner.unlock();
        } else {
            // Granted concurrently with the cancellation; the caller still
            // reports the error, so hand the lock on.
            debug_assert_eq!(waiter.state.load(Ordering::Acquire), GRANTED);
            debug_assert_eq!(inner.owner, Some(waiter.task));
            Self::hand_off(inner);
        }
        Err(err)
    }

    /// Pass ownership to the FIFO-first waiter, or unlock if none remains.
    /// Consumes the guard; unparks outside it.
    fn hand_off(mut inner: super::SpinLockGuard<'_, Inner>) {
        match inner.waiters.pop_front() {
            Some(next) => {
                inner.owner = Some(next.task);
                next.state.store(GRANTED, Ordering::Release);
                inner.unlock();
                next.unparker.unpark();
            }
            None => {
                inner.owner = None;
                inner.unlock();
            }
        }
    }

    /// Releases the lock held by the calling task.
    ///
    /// Wakes exactly one pending waiter (FIFO) by handing ownership to it
    /// directly.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotOwner`] if the calling task does not hold the lock.
    pub fn release(&self) -> Result<(), SyncError> {
        let tid = Current::id();
        let inner = self.inner.lock();
        if inner.owner != Some(tid) {
            inner.unlock();
            return Err(SyncError::NotOwner);
        }
        Self::hand_off(inner);
        Ok(())
    }

    /// Whether the lock is currently held.
    ///
    /// A non-blocking observation that takes no part in the ownership
    /// protocol: the answer can be stale by the time the caller looks at
    /// it, since another task may lock or unlock concurrently.
    pub fn is_locked(&self) -> bool {
        let inner = self.inner.lock();
        let locked = inner.owner.is_some();
        inner.unlock();
        locked
    }
}

impl Default for Lock {
    fn default() -> Lock {
        Lock::new()
    }
}

/// A scoped token for a held [`Lock`].
///
/// Dropping the token releases the lock on a best-effort basis (the drop
/// may run on a task that no longer owns the lock, in which case it is a
/// no-op). Prefer the explicit [`unlock`], which reports [`NotOwner`].
///
/// [`unlock`]: Self::unlock
/// [`NotOwner`]: SyncError::NotOwner
#[must_use]
pub struct LockToken<'a> {
    lock: &'a Lock,
}

impl LockToken<'_> {
    /// Releases the underlying [`Lock`].
    ///
    /// # Errors
    ///
    /// [`SyncError::NotOwner`] if the token was moved to a task other than
    /// the one that acquired it. The lock stays held by its owner, who can
    /// still release it with [`Lock::release`].
    pub fn unlock(self) -> Result<(), SyncError> {
        let result = self.lock.release();
        core::mem::forget(self);
        result
    }

    /// Keep the lock held past the token's scope.
    ///
    /// Used by the command layer, where acquire and release arrive as
    /// separate commands; [`Lock::release`] undoes it.
    pub fn detach(self) {
        core::mem::forget(self);
    }
}

impl Drop for LockToken<'_> {
    fn drop(&mut self) {
        let _ = self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task;

    #[test]
    fn acquire_release() {
        let lock = Lock::new();
        assert!(!lock.is_locked());
        let token = lock.acquire(Policy::Blocking).unwrap();
        assert!(lock.is_locked());
        token.unlock().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn release_without_ownership() {
        let lock = Lock::new();
        assert_eq!(lock.release(), Err(SyncError::NotOwner));
    }

    #[test]
    fn zero_timeout_rejected() {
        let lock = Lock::new();
        assert_eq!(
            lock.acquire(Policy::Timed(std::time::Duration::ZERO)).err(),
            Some(SyncError::InvalidArgument)
        );
    }

    #[test]
    fn pending_signal_aborts_before_parking() {
        // An interruptible attempt on a held lock with a signal already
        // pending must fail without blocking, even single-threaded.
        let lock = Lock::new();
        lock.acquire(Policy::Blocking).unwrap().detach();
        task::interrupt(Current::id()).unwrap();
        assert_eq!(
            lock.acquire(Policy::Interruptible).err(),
            Some(SyncError::Interrupted)
        );
        Current::clear_signals();
        lock.release().unwrap();
    }
}
