//! Task identity and cancellation.
//!
//! The original drivers lean on the kernel for two things this crate has to
//! provide itself: a per-caller identity (the task that owns a lock, the
//! process to signal) and a way for one task to cancel another task's
//! blocking wait (`SIGINT` vs `SIGKILL`). Here every thread that touches a
//! blocking operation is lazily registered in a global table under a fresh
//! task id, and [`interrupt`] / [`kill`] deliver the two cancellation
//! classes to it by id.
//!
//! A wait that is *interruptible* aborts on either class; a *killable* wait
//! aborts only on [`kill`]. A delivered signal is consumed by the wait that
//! observes it, so a later wait by the same task starts clean.
//!
//! Parking is one-per-thread: a blocked task parks on its own
//! [`Parker`], and whoever wakes it (a lock hand-off, a condition signal,
//! or a cancellation) unparks through the registered [`Unparker`].
//!
//! [`Parker`]: crossbeam_utils::sync::Parker
//! [`Unparker`]: crossbeam_utils::sync::Unparker

use crate::{SyncError, sync::SpinLock};
use bitflags::bitflags;
use crossbeam_utils::sync::{Parker, Unparker};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Instant,
};

bitflags! {
    /// Pending cancellation signals of a task.
    pub struct SignalSet: u8 {
        /// A regular cancellation (the SIGINT of the original demos).
        const INTERRUPT = 1 << 0;
        /// A fatal cancellation (the SIGKILL of the original demos).
        const KILL = 1 << 1;
    }
}

/// Which signals a blocking policy is willing to be cancelled by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    /// Any pending signal aborts the wait (interruptible).
    Any,
    /// Only a fatal signal aborts the wait (killable).
    Fatal,
}

impl SignalClass {
    fn mask(self) -> SignalSet {
        match self {
            SignalClass::Any => SignalSet::INTERRUPT | SignalSet::KILL,
            SignalClass::Fatal => SignalSet::KILL,
        }
    }
}

struct TaskState {
    signals: AtomicU8,
    unparker: Unparker,
}

static TASKS: SpinLock<BTreeMap<u64, Arc<TaskState>>> = SpinLock::new(BTreeMap::new());
static NEXT_TID: AtomicU64 = AtomicU64::new(0);

struct Registration {
    id: u64,
    state: Arc<TaskState>,
    parker: Parker,
}

impl Registration {
    fn new() -> Self {
        let parker = Parker::new();
        let state = Arc::new(TaskState {
            signals: AtomicU8::new(0),
            unparker: parker.unparker().clone(),
        });
        let id = NEXT_TID.fetch_add(1, Ordering::SeqCst);
        let mut tasks = TASKS.lock();
        tasks.insert(id, state.clone());
        tasks.unlock();
        Registration { id, state, parker }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut tasks = TASKS.lock();
        tasks.remove(&self.id);
        tasks.unlock();
    }
}

thread_local! {
    static CURRENT: Registration = Registration::new();
}

/// The opaque structure indicating the calling task.
pub struct Current {
    _p: (),
}

impl Current {
    /// Get the current task's id, registering the task on first use.
    pub fn id() -> u64 {
        CURRENT.with(|r| r.id)
    }

    /// Hand out a waker for the current task's parker.
    pub(crate) fn unparker() -> Unparker {
        CURRENT.with(|r| r.state.unparker.clone())
    }

    /// Park the current task until unparked.
    ///
    /// May return spuriously; callers re-check their wake condition.
    pub(crate) fn park() {
        CURRENT.with(|r| r.parker.park());
    }

    /// Park the current task until unparked or `deadline` passes.
    pub(crate) fn park_deadline(deadline: Instant) {
        CURRENT.with(|r| r.parker.park_deadline(deadline));
    }

    /// Consume any pending signal matching `class`.
    ///
    /// Returns whether one was pending. The consumed bits are cleared, so
    /// one delivery cancels exactly one wait.
    pub(crate) fn take_signal(class: SignalClass) -> bool {
        let mask = class.mask().bits();
        CURRENT.with(|r| r.state.signals.fetch_and(!mask, Ordering::AcqRel) & mask != 0)
    }

    /// Discard every pending signal of the current task.
    pub fn clear_signals() {
        CURRENT.with(|r| r.state.signals.store(0, Ordering::Release));
    }
}

fn signal(tid: u64, set: SignalSet) -> Result<(), SyncError> {
    let tasks = TASKS.lock();
    let Some(state) = tasks.get(&tid).cloned() else {
        tasks.unlock();
        return Err(SyncError::InvalidArgument);
    };
    tasks.unlock();

    state.signals.fetch_or(set.bits(), Ordering::AcqRel);
    // Kick the task out of whatever park it is in; the wait loop observes
    // the pending signal and cancels itself.
    state.unparker.unpark();
    Ok(())
}

/// Deliver a regular cancellation to the task `tid`.
///
/// Aborts the task's current (or next) interruptible wait with
/// [`SyncError::Interrupted`]. Killable and plain blocking waits ignore it.
pub fn interrupt(tid: u64) -> Result<(), SyncError> {
    signal(tid, SignalSet::INTERRUPT)
}

/// Deliver a fatal cancellation to the task `tid`.
///
/// Aborts the task's current (or next) interruptible *or* killable wait
/// with [`SyncError::Interrupted`].
pub fn kill(tid: u64) -> Result<(), SyncError> {
    signal(tid, SignalSet::KILL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_classes() {
        let tid = Current::id();
        Current::clear_signals();

        interrupt(tid).unwrap();
        // A killable wait does not see a regular interrupt.
        assert!(!Current::take_signal(SignalClass::Fatal));
        assert!(Current::take_signal(SignalClass::Any));
        // Consumed.
        assert!(!Current::take_signal(SignalClass::Any));

        kill(tid).unwrap();
        assert!(Current::take_signal(SignalClass::Fatal));
        assert!(!Current::take_signal(SignalClass::Any));
    }

    #[test]
    fn unknown_task() {
        assert_eq!(interrupt(u64::MAX), Err(SyncError::InvalidArgument));
    }
}
