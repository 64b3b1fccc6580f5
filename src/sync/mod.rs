//! # Synchronization Primitives.
//!
//! The original drivers demonstrate five kernel primitives — spinlock,
//! mutex, semaphore, wait queue, completion — whose behaviors overlap
//! almost entirely. This module unifies them behind two types:
//!
//! - [`Lock`]: exclusive acquisition. Every variant the demos exercise
//!   (`mutex_lock`, `mutex_lock_interruptible`, `mutex_lock_killable`,
//!   `mutex_trylock`, `down_timeout`) is one [`Policy`] passed to a single
//!   [`Lock::acquire`].
//! - [`Condition`]: wait-for-predicate. `wait_event_interruptible`,
//!   `wait_for_completion`, and `wait_event_interruptible_exclusive` are
//!   [`Condition::wait_while`] plus the three signal flavors.
//!
//! Both sleep by parking the calling thread and keep their waiter lists in
//! a `VecDeque` behind a [`SpinLock`], the short busy-waiting guard that
//! never sleeps.
//!
//! | Primitive     | Waiting thread | Cancellable?  | Wakeup                     |
//! |---------------|----------------|---------------|----------------------------|
//! | [`SpinLock`]  | Spins          | No            | Holder releases            |
//! | [`Lock`]      | Sleeps         | Per-[`Policy`]| FIFO hand-off, exactly one |
//! | [`Condition`] | Sleeps         | Per-[`Policy`]| One, all, or one-at-a-time |

pub mod condition;
pub mod lock;
pub mod spinlock;

pub use condition::Condition;
pub use lock::{Lock, LockToken};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};

use crate::{SyncError, task::SignalClass};
use std::time::{Duration, Instant};

/// How a caller is willing to wait for a lock or a condition.
///
/// This is the tagged-policy unification of the kernel's five lock/wait
/// entry points. The suspension variants differ only in what can abort the
/// wait; [`TryOnce`] never suspends at all.
///
/// [`TryOnce`]: Policy::TryOnce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Suspend until available; cannot be aborted.
    Blocking,
    /// Suspend; abort with [`SyncError::Interrupted`] on any cancellation
    /// signal.
    Interruptible,
    /// Suspend; abort only on a fatal cancellation signal.
    Killable,
    /// Never suspend; fail with [`SyncError::Busy`] if unavailable.
    TryOnce,
    /// Suspend up to the given duration; fail with [`SyncError::TimedOut`]
    /// once it elapses.
    Timed(Duration),
}

impl Policy {
    /// Reject malformed policies. A zero timeout is not a policy; use
    /// [`Policy::TryOnce`] for the non-blocking path.
    pub(crate) fn validate(self) -> Result<(), SyncError> {
        match self {
            Policy::Timed(d) if d.is_zero() => Err(SyncError::InvalidArgument),
            _ => Ok(()),
        }
    }

    /// The absolute deadline of a timed wait, fixed at entry.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Policy::Timed(d) => Some(Instant::now() + d),
            _ => None,
        }
    }

    /// Which signal class may abort a wait under this policy.
    pub(crate) fn cancellation(self) -> Option<SignalClass> {
        match self {
            Policy::Interruptible => Some(SignalClass::Any),
            Policy::Killable => Some(SignalClass::Fatal),
            _ => None,
        }
    }
}
