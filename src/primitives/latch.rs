//! On/off latch: a two-state gate used to implement the request waiter set.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// A latch that is either "on" (released) or "off" (blocking).
///
/// `on()` wakes every thread parked in `wait_for_on()`; `off()` rearms the
/// latch for reuse. Both are idempotent: calling `on()` twice in a row, or
/// `off()` on an already-off latch, has no extra effect.
#[derive(Debug)]
pub struct OnOffLatch {
    state: Mutex<bool>,
    cond: Condvar,
}

impl OnOffLatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Releases all threads currently or later parked in `wait_for_on`.
    pub fn on(&self) {
        let mut state = self.state.lock();
        *state = true;
        self.cond.notify_all();
    }

    /// Rearms the latch.
    pub fn off(&self) {
        *self.state.lock() = false;
    }

    pub fn is_on(&self) -> bool {
        *self.state.lock()
    }

    /// Blocks until `on()` has been called since the last `off()`.
    pub fn wait_for_on(&self) {
        let mut state = self.state.lock();
        while !*state {
            self.cond.wait(&mut state);
        }
    }

    /// Blocks until `on()` is called or `timeout` elapses; returns whether
    /// the latch was observed on.
    pub fn wait_for_on_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if *state {
            return true;
        }
        let result = self.cond.wait_for(&mut state, timeout);
        *state || !result.timed_out()
    }
}
