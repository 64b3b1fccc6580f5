//! # Synchronized resource.
//!
//! The device itself: a bounded byte buffer composed with one of each
//! primitive this crate provides. Writers and readers serialize on a
//! [`Lock`], blocking readers sleep on the buffer's [`Readiness`], and a
//! successful write tells every registered observer through the
//! [`Broadcaster`] — the mutex, blocking-io, poll and fasync demos fused
//! into one object.
//!
//! The composition rule throughout is *observers outside the locks*: the
//! device lock and the buffer lock are released before observers run, so
//! no notification callback ever executes under a lock it could want back.
//! The readiness flag is the opposite case: it describes the buffer, so it
//! flips while the buffer lock is still held and the two never disagree.

use crate::{
    SyncError,
    notify::{Broadcaster, Event, Observer, ObserverId},
    readiness::{Readiness, Ready},
    sync::{Lock, Policy, SpinLock},
};
use std::{collections::VecDeque, sync::Arc};

/// Whether a read against an empty buffer waits or returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Return `Ok(0)` when no data is available (the `O_NONBLOCK` path).
    NonBlocking,
    /// Sleep until a writer provides data.
    Blocking,
}

struct Buffer {
    data: VecDeque<u8>,
    capacity: usize,
}

/// A bounded buffer guarded by the full primitive stack.
///
/// See the [module documentation](self) for the locking discipline.
pub struct Resource {
    lock: Lock,
    buffer: SpinLock<Buffer>,
    readiness: Readiness,
    notify: Broadcaster,
}

impl Resource {
    /// Creates an empty resource holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Resource {
        Resource {
            lock: Lock::new(),
            buffer: SpinLock::new(Buffer {
                data: VecDeque::with_capacity(capacity),
                capacity,
            }),
            readiness: Readiness::new(),
            notify: Broadcaster::new(),
        }
    }

    /// Maximum number of bytes the resource holds.
    pub fn capacity(&self) -> usize {
        let buf = self.buffer.lock();
        let cap = buf.capacity;
        buf.unlock();
        cap
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        let buf = self.buffer.lock();
        let len = buf.data.len();
        buf.unlock();
        len
    }

    /// Whether no data is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `data` to the buffer, waking blocked readers and notifying
    /// observers.
    ///
    /// Writers always block for the device lock; once it is held the write
    /// itself never waits for space.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidArgument`]: `data` is larger than the
    ///   resource's whole capacity and could never fit.
    /// - [`SyncError::Busy`]: `data` would fit an empty buffer but not the
    ///   current one; nothing is written.
    /// - [`SyncError::Interrupted`]: propagated from the lock acquisition.
    pub fn write(&self, data: &[u8]) -> Result<(), SyncError> {
        let token = self.lock.acquire(Policy::Blocking)?;

        let mut buf = self.buffer.lock();
        if data.len() > buf.capacity {
            buf.unlock();
            token.unlock()?;
            return Err(SyncError::InvalidArgument);
        }
        if data.len() > buf.capacity - buf.data.len() {
            buf.unlock();
            token.unlock()?;
            return Err(SyncError::Busy);
        }
        buf.data.extend(data.iter().copied());
        self.readiness.set_ready(true);
        buf.unlock();
        token.unlock()?;

        tracing::debug!(bytes = data.len(), "wrote to resource");
        self.notify.notify_all(Event::data_ready());
        Ok(())
    }

    /// Read up to `out.len()` bytes into `out`, returning how many were
    /// copied.
    ///
    /// Under [`ReadMode::NonBlocking`] an empty buffer yields `Ok(0)`;
    /// under [`ReadMode::Blocking`] the caller sleeps, interruptibly, until
    /// a writer provides data. A read that drains the buffer lowers the
    /// readiness flag.
    ///
    /// # Errors
    ///
    /// [`SyncError::Interrupted`] from the blocking wait or the lock
    /// acquisition.
    pub fn read(&self, out: &mut [u8], mode: ReadMode) -> Result<usize, SyncError> {
        loop {
            if let ReadMode::Blocking = mode {
                self.readiness.wait_ready(None)?;
            } else if !self.readiness.poll_ready() {
                return Ok(0);
            }

            let token = self.lock.acquire(Policy::Blocking)?;
            let mut buf = self.buffer.lock();
            if buf.data.is_empty() {
                // Raced with another reader; readiness was stale.
                buf.unlock();
                token.unlock()?;
                match mode {
                    ReadMode::NonBlocking => return Ok(0),
                    ReadMode::Blocking => continue,
                }
            }
            let n = out.len().min(buf.data.len());
            for (slot, byte) in out.iter_mut().zip(buf.data.drain(..n)) {
                *slot = byte;
            }
            let drained = buf.data.is_empty();
            if drained {
                // Clear while the buffer state is still authoritative; a
                // writer serialized behind the buffer lock re-raises it.
                self.readiness.set_ready(false);
            }
            buf.unlock();
            token.unlock()?;

            tracing::debug!(bytes = n, drained, "read from resource");
            return Ok(n);
        }
    }

    /// Whether data is available, as a non-blocking snapshot.
    pub fn poll_ready(&self) -> bool {
        self.readiness.poll_ready()
    }

    /// The poll event mask for the resource's current state.
    pub fn poll_events(&self) -> Ready {
        self.readiness.poll_events()
    }

    /// Register an observer for data-ready events. Re-registering an id
    /// keeps the existing observer.
    pub fn subscribe(&self, id: ObserverId, observer: Arc<dyn Observer>) {
        self.notify.subscribe(id, observer);
    }

    /// Remove the observer registered under `id`, if any.
    pub fn unsubscribe(&self, id: ObserverId) {
        self.notify.unsubscribe(id);
    }

    /// The device lock, for callers driving it directly (the command
    /// interface).
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Tear down the notification side: every observer registration is
    /// dropped. Buffered data stays readable.
    pub fn shutdown(&self) {
        self.notify.clear();
        tracing::info!("resource shut down, observers cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_larger_than_capacity() {
        let r = Resource::new(4);
        assert_eq!(r.write(b"hello"), Err(SyncError::InvalidArgument));
        assert!(r.is_empty());
        // The device lock was released on the error path.
        assert!(!r.lock().is_locked());
    }

    #[test]
    fn write_without_room() {
        let r = Resource::new(4);
        r.write(b"abc").unwrap();
        assert_eq!(r.write(b"de"), Err(SyncError::Busy));
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn nonblocking_read_of_empty() {
        let r = Resource::new(8);
        let mut out = [0u8; 8];
        assert_eq!(r.read(&mut out, ReadMode::NonBlocking), Ok(0));
    }
}
