//! Numeric command interface to the device lock.
//!
//! The ioctl surface of the original mutex demo: acquisition and release
//! arrive as numbered commands from different calls (possibly different
//! tasks), so the lock must survive outside any lexical scope. Lock-style
//! commands therefore [`detach`] their token; [`Command::Unlock`] goes
//! through [`Lock::release`], which checks ownership.
//!
//! [`detach`]: crate::sync::LockToken::detach

use crate::{
    SyncError,
    sync::{Lock, Policy},
};
use num_enum::TryFromPrimitive;

/// Command codes, numbered as the original ioctl interface numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum Command {
    /// Acquire, blocking uninterruptibly.
    Lock = 1,
    /// Acquire, abortable by any cancellation signal.
    LockInterruptible = 2,
    /// Acquire, abortable only by a fatal cancellation signal.
    LockKillable = 3,
    /// Acquire without blocking.
    TryLock = 4,
    /// Report whether the lock is held.
    IsLocked = 5,
    /// Release the lock held by the calling task.
    Unlock = 6,
}

/// Execute `command` against `lock` on behalf of the calling task.
///
/// Returns `0` for the lock and unlock commands; [`Command::IsLocked`]
/// returns `1` when held, `0` when free.
///
/// # Errors
///
/// Whatever the underlying [`Lock`] operation reports: [`Busy`] from a
/// failed [`TryLock`], [`Interrupted`] from a cancelled wait, [`NotOwner`]
/// from a foreign [`Unlock`].
///
/// [`Busy`]: SyncError::Busy
/// [`Interrupted`]: SyncError::Interrupted
/// [`NotOwner`]: SyncError::NotOwner
/// [`TryLock`]: Command::TryLock
/// [`Unlock`]: Command::Unlock
pub fn dispatch(lock: &Lock, command: Command) -> Result<i32, SyncError> {
    tracing::trace!(?command, "dispatching");
    let policy = match command {
        Command::Lock => Policy::Blocking,
        Command::LockInterruptible => Policy::Interruptible,
        Command::LockKillable => Policy::Killable,
        Command::TryLock => Policy::TryOnce,
        Command::IsLocked => return Ok(lock.is_locked() as i32),
        Command::Unlock => {
            lock.release()?;
            return Ok(0);
        }
    };
    lock.acquire(policy)?.detach();
    Ok(0)
}

/// [`dispatch`] from a raw command number.
///
/// # Errors
///
/// [`SyncError::InvalidArgument`] for a number outside the command set,
/// plus anything [`dispatch`] reports.
pub fn dispatch_raw(lock: &Lock, raw: u32) -> Result<i32, SyncError> {
    let command = Command::try_from(raw).map_err(|_| SyncError::InvalidArgument)?;
    dispatch(lock, command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_code() {
        let lock = Lock::new();
        assert_eq!(dispatch_raw(&lock, 99), Err(SyncError::InvalidArgument));
    }

    #[test]
    fn lock_query_unlock() {
        let lock = Lock::new();
        assert_eq!(dispatch(&lock, Command::IsLocked), Ok(0));
        assert_eq!(dispatch(&lock, Command::TryLock), Ok(0));
        assert_eq!(dispatch(&lock, Command::IsLocked), Ok(1));
        assert_eq!(dispatch(&lock, Command::TryLock), Err(SyncError::Busy));
        assert_eq!(dispatch(&lock, Command::Unlock), Ok(0));
        assert_eq!(dispatch(&lock, Command::IsLocked), Ok(0));
    }
}
