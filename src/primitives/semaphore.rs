//! Counted semaphore used to keep a request queue's count in lockstep with
//! its pending-list length.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<i64>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: i64) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Increments the counter and wakes one waiter.
    pub fn signal(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }

    /// Blocks while the counter is zero, then decrements it and returns the
    /// value observed just before the decrement.
    pub fn wait(&self) -> i64 {
        let mut count = self.count.lock();
        while *count <= 0 {
            self.cond.wait(&mut count);
        }
        let prior = *count;
        *count -= 1;
        prior
    }

    /// Non-blocking variant of `wait`: decrements and returns `Some(prior)`
    /// only if the counter was already positive.
    pub fn try_wait(&self) -> Option<i64> {
        let mut count = self.count.lock();
        if *count > 0 {
            let prior = *count;
            *count -= 1;
            Some(prior)
        } else {
            None
        }
    }

    pub fn current(&self) -> i64 {
        *self.count.lock()
    }

    /// Decrements the counter without blocking, for callers that already
    /// know (by some other invariant) that a signal is outstanding —
    /// e.g. a queue canceling a request it just found in its pending list,
    /// whose presence there implies the enqueue's `signal()` was never
    /// consumed.
    pub fn consume_one(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "consume_one called with no outstanding signal");
        *count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn signal_then_wait() {
        let sem = Semaphore::new(0);
        sem.signal();
        assert_eq!(sem.wait(), 1);
        assert_eq!(sem.current(), 0);
    }

    #[test]
    fn wait_blocks_until_signal() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = sem.clone();
        let handle = thread::spawn(move || {
            sem2.wait();
        });
        thread::sleep(Duration::from_millis(20));
        sem.signal();
        handle.join().unwrap();
    }

    #[test]
    fn try_wait_is_non_blocking() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.try_wait(), None);
        sem.signal();
        assert_eq!(sem.try_wait(), Some(1));
        assert_eq!(sem.try_wait(), None);
    }
}
