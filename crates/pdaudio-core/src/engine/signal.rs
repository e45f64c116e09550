//! ReadySignal - flag + condition pair carrying buffers back from the driver
//!
//! One signal exists per direction. The driver side calls [`ReadySignal::deliver`]
//! from its completion callback; the mixer thread blocks in
//! [`ReadySignal::wait_until_ready_or_stopped`]. Both sides take the same
//! mutex, and the waiter re-checks the flag in a loop, so neither a spurious
//! wakeup nor a delivery that happens before the wait begins can be missed.
//!
//! The stop flag always wins: once [`ReadySignal::stop`] has been called, every
//! wait returns [`Wake::Stopped`] even if the ready flag is also set.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::types::DOUBLE_BUFFER_LEN;

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The ready flag was set (and has now been cleared)
    Ready,
    /// A stop was requested
    Stopped,
}

#[derive(Debug)]
struct SignalState<T> {
    ready: bool,
    stopped: bool,
    returned: VecDeque<T>,
}

/// Ready flag, stop flag and a small queue of returned items behind one mutex
#[derive(Debug)]
pub struct ReadySignal<T> {
    state: Mutex<SignalState<T>>,
    cond: Condvar,
}

impl<T> Default for ReadySignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReadySignal<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                ready: false,
                stopped: false,
                // Room for both buffers of a direction, so delivery never allocates
                returned: VecDeque::with_capacity(DOUBLE_BUFFER_LEN),
            }),
            cond: Condvar::new(),
        }
    }

    // The driver callback cannot report a poisoned lock, so recover the guard.
    fn lock(&self) -> MutexGuard<'_, SignalState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand an item back and wake the waiter
    ///
    /// Called from driver context; O(1) and never blocks beyond the mutex.
    pub fn deliver(&self, item: T) {
        let mut state = self.lock();
        state.returned.push_back(item);
        state.ready = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Set the ready flag without returning an item
    pub fn raise(&self) {
        self.lock().ready = true;
        self.cond.notify_all();
    }

    /// Clear both flags ahead of a new run
    pub fn arm(&self) {
        let mut state = self.lock();
        state.ready = false;
        state.stopped = false;
    }

    /// Request a stop and wake every waiter
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.cond.notify_all();
    }

    /// Wake waiters without changing any flag
    pub fn notify(&self) {
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Number of returned items not yet collected
    pub fn pending(&self) -> usize {
        self.lock().returned.len()
    }

    /// Collect every returned item without waiting
    pub fn drain(&self, mut reclaim: impl FnMut(T)) {
        let mut state = self.lock();
        while let Some(item) = state.returned.pop_front() {
            reclaim(item);
        }
    }

    /// Block until the ready flag is set or a stop is requested
    ///
    /// Returned items are passed to `reclaim` under the lock before the flags
    /// are inspected. A `Ready` wake clears the flag.
    pub fn wait_until_ready_or_stopped(&self, mut reclaim: impl FnMut(T)) -> Wake {
        let mut state = self.lock();
        loop {
            while let Some(item) = state.returned.pop_front() {
                reclaim(item);
            }
            if state.stopped {
                return Wake::Stopped;
            }
            if state.ready {
                state.ready = false;
                return Wake::Ready;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_delivery_before_wait_is_not_lost() {
        let signal = ReadySignal::new();
        signal.deliver(7u32);

        let mut got = Vec::new();
        assert_eq!(signal.wait_until_ready_or_stopped(|x| got.push(x)), Wake::Ready);
        assert_eq!(got, vec![7]);
    }

    #[test]
    fn test_stop_wins_over_ready() {
        let signal = ReadySignal::<u32>::new();
        signal.raise();
        signal.stop();
        assert_eq!(signal.wait_until_ready_or_stopped(|_| {}), Wake::Stopped);

        // Still stopped until re-armed
        assert_eq!(signal.wait_until_ready_or_stopped(|_| {}), Wake::Stopped);
        signal.arm();
        assert!(!signal.is_stopped());
    }

    #[test]
    fn test_ready_wake_clears_flag() {
        let signal = ReadySignal::<u32>::new();
        signal.raise();
        assert_eq!(signal.wait_until_ready_or_stopped(|_| {}), Wake::Ready);

        let signal = Arc::new(signal);
        let stopper = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.stop();
        });

        // Flag was consumed, so this blocks until the stop arrives
        let start = Instant::now();
        assert_eq!(signal.wait_until_ready_or_stopped(|_| {}), Wake::Stopped);
        assert!(start.elapsed() >= Duration::from_millis(20));
        handle.join().unwrap();
    }

    #[test]
    fn test_cross_thread_delivery() {
        let signal = Arc::new(ReadySignal::new());
        let driver = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            for i in 0..4u32 {
                driver.deliver(i);
                thread::sleep(Duration::from_millis(2));
            }
        });

        let mut got = Vec::new();
        while got.len() < 4 {
            signal.wait_until_ready_or_stopped(|x| got.push(x));
        }
        handle.join().unwrap();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_drain_collects_without_blocking() {
        let signal = ReadySignal::new();
        signal.deliver(1u8);
        signal.deliver(2u8);
        assert_eq!(signal.pending(), 2);

        let mut got = Vec::new();
        signal.drain(|x| got.push(x));
        assert_eq!(got, vec![1, 2]);
        assert_eq!(signal.pending(), 0);
    }
}
