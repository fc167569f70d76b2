//! Shared-state cell: an ordered value guarded by mutex + condvar, with a
//! `wait_for` that blocks until the cell reaches at least the requested
//! value.
//!
//! Used for both the request's OP/DONE/READY-TO-DIE state and the request
//! queue's NOT-RUNNING/RUNNING/TERMINATING/TERMINATED thread state. A typed
//! wrapper around `parking_lot` rather than a raw atomic because `wait_for`
//! needs to block, and because the ordering comparison (`>=` on the enum's
//! discriminant) is easier to express against a typed value than against an
//! integer the caller has to remember the meaning of.

use parking_lot::{Condvar, Mutex};

pub struct StateCell<T> {
    value: Mutex<T>,
    cond: Condvar,
}

impl<T: Copy + PartialOrd> StateCell<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn current(&self) -> T {
        *self.value.lock()
    }

    /// Unconditionally sets the cell and wakes anyone blocked in
    /// `wait_for`.
    pub fn set_to(&self, v: T) {
        let mut cur = self.value.lock();
        *cur = v;
        self.cond.notify_all();
    }

    /// Blocks until the cell's value is `>= target` by `PartialOrd`.
    pub fn wait_for(&self, target: T) {
        let mut cur = self.value.lock();
        while !(*cur >= target) {
            self.cond.wait(&mut cur);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
    enum Phase {
        A,
        B,
        C,
    }

    #[test]
    fn wait_for_returns_once_reached() {
        let cell = Arc::new(StateCell::new(Phase::A));
        let cell2 = cell.clone();
        let handle = thread::spawn(move || {
            cell2.wait_for(Phase::B);
        });
        thread::sleep(Duration::from_millis(20));
        cell.set_to(Phase::C);
        handle.join().unwrap();
        assert_eq!(cell.current(), Phase::C);
    }

    #[test]
    fn wait_for_past_value_does_not_block() {
        let cell = StateCell::new(Phase::C);
        cell.wait_for(Phase::A);
    }
}
