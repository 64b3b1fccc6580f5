//! # syncdev: a synchronized character-device core.
//!
//! This crate distills the coordination layer shared by a family of small
//! character-device drivers — blocking reads, poll readiness, and
//! asynchronous "data ready" notification — into one user-space library.
//! Kernel tasks become OS threads, the scheduler's sleep/wake becomes
//! thread parking, and SIGIO delivery becomes an observer callback that the
//! host maps onto whatever native mechanism it has (a channel, a signal, a
//! waker).
//!
//! The pieces, leaf to root:
//!
//! - [`sync::SpinLock`]: the short-critical-section guard everything else
//!   builds on.
//! - [`sync::Lock`]: an exclusive lock with a full blocking-policy taxonomy
//!   (blocking, interruptible, killable, try-once, timed) and ownership
//!   recorded against the calling task.
//! - [`sync::Condition`]: wait-for-predicate with single, broadcast, and
//!   exclusive (one-at-a-time) wakeup.
//! - [`readiness::Readiness`]: the poll/select readiness bit.
//! - [`notify::Broadcaster`]: the fasync/SIGIO observer set.
//! - [`resource::Resource`]: the composed device — guarded byte buffer,
//!   readiness flag, observer set, and read/write/poll operations.
//! - [`command`]: the ioctl-style command-code mapping onto lock operations.
//!
//! The [`task`] module supplies what the kernel supplied for free: a task
//! identity per thread and a way to interrupt or kill another task's
//! blocking waits.
//!
//! Different primitives suit different waits. The table below mirrors the
//! trade-off the original drivers demonstrate:
//!
//! | Primitive       | Blocks thread? | Cancellable?        | Typical use                          |
//! |-----------------|----------------|---------------------|--------------------------------------|
//! | [`SpinLock`]    | No (busy wait) | No                  | Guarding a flag or a wait list       |
//! | [`Lock`]        | Yes            | Per-policy          | Serializing buffer copies            |
//! | [`Condition`]   | Yes            | Per-policy          | Sleeping until data arrives          |
//! | [`Readiness`]   | Yes (`wait_ready`) | Timeout        | poll/select readiness                |
//!
//! [`SpinLock`]: sync::SpinLock
//! [`Lock`]: sync::Lock
//! [`Condition`]: sync::Condition
//! [`Readiness`]: readiness::Readiness

pub mod command;
pub mod notify;
pub mod readiness;
pub mod resource;
pub mod sync;
pub mod task;

pub use resource::{ReadMode, Resource};
pub use sync::{Condition, Lock, LockToken, Policy, SpinLock, SpinLockGuard};

/// Enum representing errors that can occur during a device operation.
///
/// Each variant corresponds to one failure a blocking or locking operation
/// can report to its caller. The set is deliberately small: everything the
/// original drivers return maps onto one of these, and [`into_isize`]
/// converts a variant to the errno-style code a host syscall layer would
/// hand back.
///
/// [`into_isize`]: Self::into_isize
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// The lock is held and the policy forbids waiting. (EBUSY)
    #[error("device or resource busy")]
    Busy,
    /// The deadline elapsed before the wait completed. (ETIME)
    #[error("timer expired")]
    TimedOut,
    /// A cancellation signal arrived during an interruptible or killable
    /// wait. (EINTR)
    #[error("interrupted wait")]
    Interrupted,
    /// The caller tried to release a lock it does not own. (EPERM)
    #[error("operation not permitted")]
    NotOwner,
    /// Malformed policy or size. (EINVAL)
    #[error("invalid argument")]
    InvalidArgument,
}

impl SyncError {
    /// Converts the [`SyncError`] into the corresponding negative errno
    /// code, for hosts that speak the syscall return convention.
    pub fn into_isize(self) -> isize {
        match self {
            SyncError::NotOwner => -1,
            SyncError::Interrupted => -4,
            SyncError::Busy => -16,
            SyncError::InvalidArgument => -22,
            SyncError::TimedOut => -62,
        }
    }
}

/// The given `isize` does not indicate a [`SyncError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError(pub isize);

impl TryFrom<isize> for SyncError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::NotOwner),
            -4 => Ok(Self::Interrupted),
            -16 => Ok(Self::Busy),
            -22 => Ok(Self::InvalidArgument),
            -62 => Ok(Self::TimedOut),
            e => Err(TryFromError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SyncError;

    #[test]
    fn errno_round_trip() {
        for e in [
            SyncError::Busy,
            SyncError::TimedOut,
            SyncError::Interrupted,
            SyncError::NotOwner,
            SyncError::InvalidArgument,
        ] {
            assert_eq!(SyncError::try_from(e.into_isize()), Ok(e));
        }
        assert!(SyncError::try_from(-99).is_err());
    }
}
