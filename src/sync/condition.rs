//! # Condition gate.
//!
//! A [`Condition`] allows a task to efficiently block until a predicate
//! over shared state becomes false, without consuming CPU cycles. It is
//! always used in conjunction with the [`SpinLock`] that guards the shared
//! state, and it subsumes the wait-queue and completion patterns of the
//! original drivers: `wait_event_interruptible` is [`wait_while`] under
//! [`Policy::Interruptible`], `wait_for_completion` is [`wait_while`] under
//! [`Policy::Blocking`], and the exclusive-waiter variant is
//! [`signal_all_exclusive`].
//!
//! To enforce that signaling happens with the state lock held, the signal
//! methods take the [`SpinLockGuard`] by value and release it themselves.
//! This enforces that the apis are called with the lock, but does not fully
//! ensure that the lock is the associated one.
//!
//! Targeted wakes travel as a *chain*: a woken waiter that cannot use the
//! wake passes it along the queue. Every waiter is stamped at enqueue time
//! and a chain only ever reaches stamps older than the signal that started
//! it, so a signal touches each waiter present when it was issued at most
//! once and then dies out. A signal with no one to satisfy is not buffered.
//!
//! The [`wait_while`] method takes care of locking, checking the predicate,
//! blocking, and waking up:
//!
//! ```rust
//! # use syncdev::sync::{Condition, Policy, SpinLock};
//! # let cond = Condition::new();
//! # let state = SpinLock::new(1usize);
//! let guard = cond.wait_while(&state, |count| *count == 0, Policy::Blocking)?;
//! # guard.unlock();
//! # Ok::<(), syncdev::SyncError>(())
//! ```
//!
//! Wakeups may be spurious: a woken task always re-evaluates its predicate
//! under the state lock before proceeding.
//!
//! [`wait_while`]: Condition::wait_while
//! [`signal_all_exclusive`]: Condition::signal_all_exclusive

use super::{Policy, SpinLock, SpinLockGuard};
use crate::{SyncError, task::Current};
use crossbeam_utils::sync::Unparker;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Instant,
};

const PENDING: u8 = 0;
/// Target of a [`Condition::signal_one`]: consume the wake if the predicate
/// now passes, otherwise forward it along the chain.
const WOKEN_ONE: u8 = 1;
/// Target of a [`Condition::signal_all`]: every waiter got its own wake.
const WOKEN_ALL: u8 = 2;
/// Target of a [`Condition::signal_all_exclusive`]: re-check, then forward
/// along the chain regardless, so the queue drains one task at a time.
const WOKEN_EXCL: u8 = 3;
const CANCELLED: u8 = 4;

struct Waiter {
    /// Enqueue order, monotonic per condition. A chain started by a signal
    /// stamped `cutoff` never reaches a waiter with `stamp >= cutoff`.
    stamp: u64,
    disposition: AtomicU8,
    /// The cutoff of the signal that woke this waiter; written before the
    /// disposition, read after observing it.
    cutoff: AtomicU64,
    unparker: Unparker,
}

struct Inner {
    next_stamp: u64,
    // Invariant: holds only PENDING waiters, in stamp order. A waiter's
    // disposition changes under this lock, atomically with its removal.
    queue: VecDeque<Arc<Waiter>>,
}

/// A wait-for-predicate gate over state guarded by a [`SpinLock`].
///
/// See the [module documentation](self) for the wake disciplines.
///
/// Note that any attempt to use multiple state locks on the same condition
/// may result in waiters observing unrelated wakeups; they will re-check
/// their predicate and go back to sleep.
pub struct Condition {
    waiters: SpinLock<Inner>,
}

impl Condition {
    /// Creates a new condition which is ready to be waited on and signaled.
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(Inner {
                next_stamp: 0,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Blocks the current task while `predicate` returns `true`.
    ///
    /// Checks the predicate with `state` locked. If it returns `true`, the
    /// task is enqueued and the lock is temporarily released while it
    /// sleeps. When the task is signaled and wakes up, it reacquires the
    /// lock and re-evaluates the predicate. This loop continues until the
    /// predicate returns `false`, at which point the still-held guard is
    /// returned.
    ///
    /// There is no need to check the predicate before calling `wait_while`;
    /// it performs the entire check-and-sleep logic internally.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Busy`]: `TryOnce` and the predicate held on entry.
    /// - [`SyncError::TimedOut`]: `Timed(d)` and the predicate still held
    ///   when `d` elapsed.
    /// - [`SyncError::Interrupted`]: a matching cancellation signal arrived
    ///   under `Interruptible` or `Killable`.
    /// - [`SyncError::InvalidArgument`]: malformed policy.
    ///
    /// On error the state lock is released; the caller does not get a
    /// guard back.
    pub fn wait_while<'a, T>(
        &self,
        state: &'a SpinLock<T>,
        mut predicate: impl FnMut(&mut T) -> bool,
        policy: Policy,
    ) -> Result<SpinLockGuard<'a, T>, SyncError> {
        policy.validate()?;
        let deadline = policy.deadline();
        let mut last_wake = PENDING;
        let mut last_cutoff = 0;
        loop {
            let mut guard = state.lock();
            let still_waiting = predicate(&mut guard);
            // A targeted wake we cannot use must not die with us, but it
            // only travels to waiters older than the signal that sent it.
            match last_wake {
                WOKEN_EXCL => self.forward(WOKEN_EXCL, last_cutoff),
                WOKEN_ONE if still_waiting => self.forward(WOKEN_ONE, last_cutoff),
                _ => {}
            }
            last_wake = PENDING;
            if !still_waiting {
                return Ok(guard);
            }
            if matches!(policy, Policy::TryOnce) {
                guard.unlock();
                return Err(SyncError::Busy);
            }
            if let Some(class) = policy.cancellation() {
                if Current::take_signal(class) {
                    guard.unlock();
                    return Err(SyncError::Interrupted);
                }
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    guard.unlock();
                    return Err(SyncError::TimedOut);
                }
            }

            // Enqueue before releasing the state lock, so a signal sent
            // after our predicate check is guaranteed to find us. A fresh
            // stamp keeps any in-flight chain from circling back to us.
            let mut q = self.waiters.lock();
            let waiter = Arc::new(Waiter {
                stamp: q.next_stamp,
                disposition: AtomicU8::new(PENDING),
                cutoff: AtomicU64::new(0),
                unparker: Current::unparker(),
            });
            q.next_stamp += 1;
            q.queue.push_back(waiter.clone());
            q.unlock();
            guard.unlock();

            loop {
                let d = waiter.disposition.load(Ordering::Acquire);
                if d != PENDING {
                    last_wake = d;
                    last_cutoff = waiter.cutoff.load(Ordering::Relaxed);
                    break;
                }
                if let Some(class) = policy.cancellation() {
                    if Current::take_signal(class) {
                        return Err(self.cancel(&waiter, SyncError::Interrupted));
                    }
                }
                match deadline {
                    Some(d) => {
                        if Instant::now() >= d {
                            return Err(self.cancel(&waiter, SyncError::TimedOut));
                        }
                        Current::park_deadline(d);
                    }
                    None => Current::park(),
                }
            }
        }
    }

    /// Abort a wait. If a targeted wake raced with the cancellation, pass
    /// it on so it is not lost.
    fn cancel(&self, waiter: &Arc<Waiter>, err: SyncError) -> SyncError {
        let mut q = self.waiters.lock();
        if let Some(pos) = q.queue.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            q.queue.remove(pos);
            waiter.disposition.store(CANCELLED, Ordering::Release);
            q.unlock();
        } else {
            q.unlock();
            match waiter.disposition.load(Ordering::Acquire) {
                kind @ (WOKEN_ONE | WOKEN_EXCL) => {
                    self.forward(kind, waiter.cutoff.load(Ordering::Relaxed));
                }
                _ => {}
            }
        }
        err
    }

    /// Start a chain: everything queued right now qualifies.
    fn wake_next(&self, kind: u8) {
        let q = self.waiters.lock();
        let cutoff = q.next_stamp;
        Self::wake_under(q, kind, cutoff);
    }

    /// Continue a chain started by a signal stamped `cutoff`. Waiters
    /// enqueued at or after the signal are left asleep, so an unconsumable
    /// wake dies out instead of cycling through re-enqueued waiters.
    fn forward(&self, kind: u8, cutoff: u64) {
        let q = self.waiters.lock();
        Self::wake_under(q, kind, cutoff);
    }

    /// Dequeue the FIFO-first waiter older than `cutoff` and wake it with
    /// the given disposition. Consumes the guard; unparks outside it.
    fn wake_under(mut q: SpinLockGuard<'_, Inner>, kind: u8, cutoff: u64) {
        let qualifies = q.queue.front().is_some_and(|w| w.stamp < cutoff);
        let next = if qualifies { q.queue.pop_front() } else { None };
        if let Some(w) = &next {
            w.cutoff.store(cutoff, Ordering::Relaxed);
            w.disposition.store(kind, Ordering::Release);
        }
        q.unlock();
        if let Some(w) = next {
            w.unparker.unpark();
        }
    }

    /// Wakes up one blocked task on this condition.
    ///
    /// The woken task re-checks its predicate; if the predicate still
    /// holds, the wake is forwarded to the next waiter, so one `signal_one`
    /// reaches one task for which the predicate passes (if any). The chain
    /// visits each task present at signal time at most once; if none
    /// qualifies the signal dies out. Calls are not buffered in any way.
    ///
    /// To wake up all tasks, see [`signal_all`].
    ///
    /// [`signal_all`]: Condition::signal_all
    pub fn signal_one<T>(&self, guard: SpinLockGuard<'_, T>) {
        guard.unlock();
        self.wake_next(WOKEN_ONE);
    }

    /// Wakes up all blocked tasks on this condition.
    ///
    /// Ensures that any current waiters are awoken; each re-checks its own
    /// predicate. Calls are not buffered in any way.
    ///
    /// To wake up only one task, see [`signal_one`].
    ///
    /// [`signal_one`]: Condition::signal_one
    pub fn signal_all<T>(&self, guard: SpinLockGuard<'_, T>) {
        guard.unlock();
        let mut q = self.waiters.lock();
        let woken: Vec<_> = q.queue.drain(..).collect();
        for w in &woken {
            w.disposition.store(WOKEN_ALL, Ordering::Release);
        }
        q.unlock();
        for w in woken {
            w.unparker.unpark();
        }
    }

    /// Wakes all blocked tasks, one at a time.
    ///
    /// Only the FIFO-first waiter is unparked; after it re-checks its
    /// predicate it forwards the wake to the next waiter, whether or not
    /// its own predicate passed. The queue thus drains serially instead of
    /// stampeding onto the state lock, which is the exclusive-waiter
    /// discipline of the original blocking-read demo. The chain covers the
    /// waiters present at signal time and then ends.
    pub fn signal_all_exclusive<T>(&self, guard: SpinLockGuard<'_, T>) {
        guard.unlock();
        self.wake_next(WOKEN_EXCL);
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_wait_when_predicate_passes() {
        let cond = Condition::new();
        let state = SpinLock::new(5usize);
        let guard = cond
            .wait_while(&state, |v| *v == 0, Policy::Blocking)
            .unwrap();
        assert_eq!(*guard, 5);
        guard.unlock();
    }

    #[test]
    fn try_once_busy() {
        let cond = Condition::new();
        let state = SpinLock::new(0usize);
        assert_eq!(
            cond.wait_while(&state, |v| *v == 0, Policy::TryOnce).err(),
            Some(SyncError::Busy)
        );
        // The state lock was released on the error path.
        let g = state.lock();
        g.unlock();
    }

    #[test]
    fn signal_on_empty_queue() {
        let cond = Condition::new();
        let state = SpinLock::new(());
        cond.signal_one(state.lock());
        cond.signal_all(state.lock());
        cond.signal_all_exclusive(state.lock());
    }
}
