//! Concurrency scenarios for the condition gate.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};
use syncdev::{
    Policy, SyncError,
    sync::{Condition, SpinLock},
    task,
    task::Current,
};

struct Channel {
    queue: SpinLock<VecDeque<usize>>,
    not_empty: Condition,
    not_full: Condition,
}

const CHANNEL_CAP: usize = 2;

impl Channel {
    fn new() -> Self {
        Self {
            queue: SpinLock::new(VecDeque::new()),
            not_empty: Condition::new(),
            not_full: Condition::new(),
        }
    }

    fn send(&self, item: usize) {
        let mut guard = self
            .not_full
            .wait_while(&self.queue, |q| q.len() == CHANNEL_CAP, Policy::Blocking)
            .unwrap();
        guard.push_back(item);
        self.not_empty.signal_one(guard);
    }

    fn recv(&self) -> usize {
        let mut guard = self
            .not_empty
            .wait_while(&self.queue, |q| q.is_empty(), Policy::Blocking)
            .unwrap();
        let item = guard.pop_front().unwrap();
        self.not_full.signal_one(guard);
        item
    }
}

#[test]
fn bounded_channel() {
    const ITEMS: usize = 500;
    const CONSUMERS: usize = 4;
    let channel = Arc::new(Channel::new());
    let sum = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let channel = channel.clone();
            let sum = sum.clone();
            let received = received.clone();
            thread::spawn(move || {
                loop {
                    let item = channel.recv();
                    if item == usize::MAX {
                        return;
                    }
                    sum.fetch_add(item, Ordering::SeqCst);
                    received.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for i in 1..=ITEMS {
        channel.send(i);
    }
    for _ in 0..CONSUMERS {
        channel.send(usize::MAX);
    }
    for c in consumers {
        c.join().unwrap();
    }
    assert_eq!(received.load(Ordering::SeqCst), ITEMS);
    assert_eq!(sum.load(Ordering::SeqCst), ITEMS * (ITEMS + 1) / 2);
}

#[test]
fn broadcast_wakes_everyone() {
    const WAITERS: usize = 6;
    let state = Arc::new(SpinLock::new(false));
    let cond = Arc::new(Condition::new());
    let woken = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let state = state.clone();
            let cond = cond.clone();
            let woken = woken.clone();
            thread::spawn(move || {
                let guard = cond
                    .wait_while(&state, |go| !*go, Policy::Blocking)
                    .unwrap();
                guard.unlock();
                woken.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(150));
    let mut guard = state.lock();
    *guard = true;
    cond.signal_all(guard);

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::SeqCst), WAITERS);
}

#[test]
fn exclusive_wake_is_consumed_once() {
    // One unit of work, several exclusive waiters: exactly one consumes it,
    // the rest keep sleeping until their own unit arrives.
    const WAITERS: usize = 4;
    let work = Arc::new(SpinLock::new(0usize));
    let cond = Arc::new(Condition::new());
    let done = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let work = work.clone();
            let cond = cond.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut guard = cond
                    .wait_while(&work, |units| *units == 0, Policy::Blocking)
                    .unwrap();
                *guard -= 1;
                guard.unlock();
                done.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(150));
    for _ in 0..WAITERS {
        let mut guard = work.lock();
        *guard += 1;
        cond.signal_all_exclusive(guard);
        thread::sleep(Duration::from_millis(50));
    }

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(done.load(Ordering::SeqCst), WAITERS);
    let guard = work.lock();
    assert_eq!(*guard, 0, "a wake was double-consumed");
    guard.unlock();
}

#[test]
fn unconsumable_signal_dies_out() {
    // A signal_one that satisfies nobody must visit each waiter present at
    // signal time once and then end, not cycle through re-enqueued waiters.
    let state = Arc::new(SpinLock::new(false));
    let cond = Arc::new(Condition::new());
    let checks = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let state = state.clone();
            let cond = cond.clone();
            let checks = checks.clone();
            thread::spawn(move || {
                let guard = cond
                    .wait_while(
                        &state,
                        |go| {
                            checks.fetch_add(1, Ordering::SeqCst);
                            !*go
                        },
                        Policy::Blocking,
                    )
                    .unwrap();
                guard.unlock();
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(150));
    cond.signal_one(state.lock());
    thread::sleep(Duration::from_millis(300));

    // Two entry checks plus at most one re-check per waiter the signal
    // could reach.
    let rechecks = checks.load(Ordering::SeqCst);
    assert!(
        rechecks <= 6,
        "one unconsumable signal_one caused {rechecks} predicate checks"
    );

    let mut guard = state.lock();
    *guard = true;
    cond.signal_all(guard);
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn wait_times_out() {
    let state = SpinLock::new(());
    let cond = Condition::new();
    let result = cond.wait_while(&state, |_| true, Policy::Timed(Duration::from_millis(100)));
    assert_eq!(result.err(), Some(SyncError::TimedOut));
}

#[test]
fn interrupt_cancels_wait() {
    let state = Arc::new(SpinLock::new(false));
    let cond = Arc::new(Condition::new());
    let (tid_tx, tid_rx) = mpsc::channel();

    let waiter = {
        let state = state.clone();
        let cond = cond.clone();
        thread::spawn(move || {
            tid_tx.send(Current::id()).unwrap();
            cond.wait_while(&state, |go| !*go, Policy::Interruptible)
                .map(|g| g.unlock())
        })
    };
    let tid = tid_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(100));
    task::interrupt(tid).unwrap();
    assert_eq!(waiter.join().unwrap(), Err(SyncError::Interrupted));

    // The cancelled waiter left the queue; a later signal must not target it.
    let guard = state.lock();
    cond.signal_one(guard);
}
