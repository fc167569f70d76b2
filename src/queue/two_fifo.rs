//! Two-FIFO request queue: separate read and write pending lists served by
//! one worker thread under a configurable priority policy.
//!
//! Grounded on §4.5's "variants the spec permits" note: same mutex +
//! semaphore + worker-thread shape as [`crate::queue::single_fifo`], but
//! the pending state is `(VecDeque<Request> reads, VecDeque<Request>
//! writes)` guarded by one lock so a single semaphore count still equals
//! their combined length.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::IoError;
use crate::primitives::{Semaphore, StateCell};
use crate::queue::{serve_request, RequestQueue, ThreadState};
use crate::request::{Direction, Request};

/// Which direction's pending list the worker drains first when both are
/// non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    ReadsFirst,
    WritesFirst,
    Alternate,
    /// No stated preference; behaves like `ReadsFirst` but callers should
    /// not rely on that, matching the source's documented ambiguity for
    /// this setting.
    None,
}

struct Lists {
    reads: VecDeque<Arc<Request>>,
    writes: VecDeque<Arc<Request>>,
}

impl Lists {
    fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }
}

pub struct TwoFifoQueue {
    queue_id: i32,
    lists: Mutex<Lists>,
    sem: Semaphore,
    state: StateCell<ThreadState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    priority: Priority,
    alternate_turn: AtomicBool,
}

impl TwoFifoQueue {
    pub fn new(queue_id: i32, priority: Priority) -> Arc<Self> {
        let queue = Arc::new(Self {
            queue_id,
            lists: Mutex::new(Lists { reads: VecDeque::new(), writes: VecDeque::new() }),
            sem: Semaphore::new(0),
            state: StateCell::new(ThreadState::NotRunning),
            worker: Mutex::new(None),
            priority,
            alternate_turn: AtomicBool::new(true),
        });
        queue.state.set_to(ThreadState::Running);

        let worker_queue = queue.clone();
        let handle = thread::Builder::new()
            .name(format!("foxio-q{queue_id}"))
            .spawn(move || worker_queue.run())
            .expect("failed to spawn request queue worker thread");
        *queue.worker.lock() = Some(handle);
        queue
    }

    fn pop_next(&self, lists: &mut Lists) -> Option<Arc<Request>> {
        match self.priority {
            Priority::ReadsFirst | Priority::None => {
                lists.reads.pop_front().or_else(|| lists.writes.pop_front())
            }
            Priority::WritesFirst => lists.writes.pop_front().or_else(|| lists.reads.pop_front()),
            Priority::Alternate => {
                let reads_turn = self.alternate_turn.fetch_xor(true, Ordering::SeqCst);
                if reads_turn {
                    lists.reads.pop_front().or_else(|| lists.writes.pop_front())
                } else {
                    lists.writes.pop_front().or_else(|| lists.reads.pop_front())
                }
            }
        }
    }

    fn run(self: Arc<Self>) {
        loop {
            self.sem.wait();
            let next = self.pop_next(&mut self.lists.lock());
            if let Some(req) = next {
                serve_request(&req);
            }
            let drained = self.sem.current() == 0 && self.lists.lock().is_empty();
            if self.state.current() == ThreadState::Terminating && drained {
                break;
            }
        }
        self.state.set_to(ThreadState::Terminated);
    }

    pub fn shutdown(&self) {
        if self.state.current() < ThreadState::Terminating {
            self.state.set_to(ThreadState::Terminating);
        }
        self.sem.signal();
        if let Some(handle) = self.worker.lock().take() {
            handle.join().expect("request queue worker panicked");
        }
    }

    pub fn pending_len(&self) -> usize {
        self.lists.lock().len()
    }
}

impl RequestQueue for TwoFifoQueue {
    fn add_request(&self, req: Arc<Request>) -> Result<(), IoError> {
        if self.state.current() != ThreadState::Running {
            return Err(IoError::InvalidArgument(format!(
                "queue {} is not running",
                self.queue_id
            )));
        }
        let mut lists = self.lists.lock();
        match req.direction() {
            Direction::Read => lists.reads.push_back(req),
            Direction::Write => lists.writes.push_back(req),
        }
        drop(lists);
        self.sem.signal();
        Ok(())
    }

    fn cancel_request(&self, req: &Arc<Request>) -> bool {
        let mut lists = self.lists.lock();
        let list = match req.direction() {
            Direction::Read => &mut lists.reads,
            Direction::Write => &mut lists.writes,
        };
        if let Some(pos) = list.iter().position(|p| Arc::ptr_eq(p, req)) {
            list.remove(pos);
            drop(lists);
            self.sem.consume_one();
            req.mark_canceled();
            true
        } else {
            false
        }
    }

    fn queue_id(&self) -> i32 {
        self.queue_id
    }
}

impl Drop for TwoFifoQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::memory::MemoryFile;
    use crate::request::{Direction, Request};

    fn make_file(queue_id: i32) -> Arc<dyn crate::file::File> {
        Arc::new(MemoryFile::new(queue_id, 0))
    }

    #[test]
    fn writes_first_serves_writes_before_reads() {
        let queue = TwoFifoQueue::new(10, Priority::WritesFirst);
        let file = make_file(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        // Block the worker on an initial request so both a read and a
        // write can queue up behind it before either is served.
        let mut blocker_buf = vec![0u8; 4];
        let blocker = Request::new(file.clone(), blocker_buf.as_mut_ptr(), 4, 0, 4, Direction::Write, None);
        queue.add_request(blocker.clone()).unwrap();

        let mut read_buf = vec![0u8; 4];
        let order_r = order.clone();
        let read_req = Request::new(
            file.clone(), read_buf.as_mut_ptr(), 4, 4, 4, Direction::Read,
            Some(Box::new(move |_r, _s| order_r.lock().push("read"))),
        );
        let mut write_buf = vec![0u8; 4];
        let order_w = order.clone();
        let write_req = Request::new(
            file, write_buf.as_mut_ptr(), 4, 8, 4, Direction::Write,
            Some(Box::new(move |_r, _s| order_w.lock().push("write"))),
        );

        queue.add_request(read_req.clone()).unwrap();
        queue.add_request(write_req.clone()).unwrap();

        blocker.wait(false).unwrap();
        read_req.wait(false).unwrap();
        write_req.wait(false).unwrap();

        assert_eq!(*order.lock(), vec!["write", "read"]);
        queue.shutdown();
    }

    #[test]
    fn cancel_targets_correct_direction_list() {
        let queue = TwoFifoQueue::new(11, Priority::ReadsFirst);
        let file = make_file(11);

        let mut blocker_buf = vec![0u8; 4];
        let blocker = Request::new(file.clone(), blocker_buf.as_mut_ptr(), 4, 0, 4, Direction::Write, None);
        queue.add_request(blocker.clone()).unwrap();

        let mut buf = vec![0u8; 4];
        let req = Request::new(file, buf.as_mut_ptr(), 4, 4, 4, Direction::Read, None);
        queue.add_request(req.clone()).unwrap();

        assert!(queue.cancel_request(&req));
        assert!(!queue.cancel_request(&req));
        blocker.wait(false).unwrap();
        req.wait(false).ok();
        queue.shutdown();
    }
}
