//! Readiness flag with poll and blocking-wait fronts.
//!
//! The `poll`-side of the original drivers condensed to its essence: a
//! single boolean, "the resource has data", that can be observed three
//! ways. Non-blocking code snapshots it with [`Readiness::poll_ready`],
//! poll-style code gets it as a [`Ready`] event mask, and blocking readers
//! sleep on it through a [`Condition`] until a writer flips it.

use crate::{
    SyncError,
    sync::{Condition, Policy, SpinLock},
};
use bitflags::bitflags;
use std::time::Duration;

bitflags! {
    /// Poll-style readiness event mask.
    ///
    /// The bit values match the `POLLIN` / `POLLRDNORM` constants the
    /// original poll handler returns, so a mask can be handed straight to
    /// poll-compatible callers.
    pub struct Ready: u32 {
        /// There is data to read.
        const IN = 0x0001;
        /// Normal data is readable. Set together with [`Ready::IN`].
        const RDNORM = 0x0040;
    }
}

/// A data-ready flag shared between one resource's readers and writers.
pub struct Readiness {
    ready: SpinLock<bool>,
    gate: Condition,
}

impl Readiness {
    /// Creates a new registry in the not-ready state.
    pub const fn new() -> Self {
        Self {
            ready: SpinLock::new(false),
            gate: Condition::new(),
        }
    }

    /// Flip the flag. Raising it wakes every task blocked in
    /// [`wait_ready`]; clearing it wakes nobody.
    ///
    /// [`wait_ready`]: Self::wait_ready
    pub fn set_ready(&self, ready: bool) {
        let mut g = self.ready.lock();
        *g = ready;
        if ready {
            self.gate.signal_all(g);
        } else {
            g.unlock();
        }
    }

    /// A snapshot of the flag. Like any poll answer it can be stale by the
    /// time the caller acts on it.
    pub fn poll_ready(&self) -> bool {
        let g = self.ready.lock();
        let ready = *g;
        g.unlock();
        ready
    }

    /// The flag as a poll event mask: [`Ready::IN`] `|` [`Ready::RDNORM`]
    /// when ready, empty otherwise.
    pub fn poll_events(&self) -> Ready {
        if self.poll_ready() {
            Ready::IN | Ready::RDNORM
        } else {
            Ready::empty()
        }
    }

    /// Blocks the calling task until the flag is raised.
    ///
    /// Without a timeout the wait is interruptible, matching the original
    /// blocking-read path; with one it becomes a timed wait.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Interrupted`]: a cancellation signal arrived first.
    /// - [`SyncError::TimedOut`]: `timeout` elapsed with the flag down.
    /// - [`SyncError::InvalidArgument`]: zero `timeout`.
    pub fn wait_ready(&self, timeout: Option<Duration>) -> Result<(), SyncError> {
        let policy = match timeout {
            Some(d) => Policy::Timed(d),
            None => Policy::Interruptible,
        };
        let guard = self.gate.wait_while(&self.ready, |ready| !*ready, policy)?;
        guard.unlock();
        Ok(())
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_transitions() {
        let r = Readiness::new();
        assert!(!r.poll_ready());
        assert_eq!(r.poll_events(), Ready::empty());
        r.set_ready(true);
        assert!(r.poll_ready());
        assert_eq!(r.poll_events(), Ready::IN | Ready::RDNORM);
        r.set_ready(false);
        assert_eq!(r.poll_events(), Ready::empty());
    }

    #[test]
    fn wait_returns_immediately_when_ready() {
        let r = Readiness::new();
        r.set_ready(true);
        r.wait_ready(None).unwrap();
        r.wait_ready(Some(Duration::from_secs(1))).unwrap();
    }

    #[test]
    fn wait_times_out() {
        let r = Readiness::new();
        assert_eq!(
            r.wait_ready(Some(Duration::from_millis(20))),
            Err(SyncError::TimedOut)
        );
    }
}
