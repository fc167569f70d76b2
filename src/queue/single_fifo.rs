//! Single-FIFO request queue: one pending list, one worker thread.
//!
//! Grounded directly on §4.5 of the block-I/O contract: a mutex-protected
//! list kept in lockstep with a counting semaphore (one `signal` per
//! enqueue), a worker that blocks on the semaphore and pops the front of
//! the list, and an atomic thread-state cell that drives graceful
//! shutdown. This is the default variant the file factory wires up for
//! every backend except `linuxaio`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::IoError;
use crate::primitives::{Semaphore, StateCell};
use crate::queue::{serve_request, RequestQueue, ThreadState};
use crate::request::Request;

pub struct SingleFifoQueue {
    queue_id: i32,
    pending: Mutex<VecDeque<Arc<Request>>>,
    sem: Semaphore,
    state: StateCell<ThreadState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SingleFifoQueue {
    /// Constructs the queue and immediately spawns its worker thread in
    /// state `Running`.
    pub fn new(queue_id: i32) -> Arc<Self> {
        let queue = Arc::new(Self {
            queue_id,
            pending: Mutex::new(VecDeque::new()),
            sem: Semaphore::new(0),
            state: StateCell::new(ThreadState::NotRunning),
            worker: Mutex::new(None),
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

    fn run(self: Arc<Self>) {
        loop {
            self.sem.wait();
            let next = self.pending.lock().pop_front();
            if let Some(req) = next {
                serve_request(&req);
            }
            let drained = self.sem.current() == 0 && self.pending.lock().is_empty();
            if self.state.current() == ThreadState::Terminating && drained {
                break;
            }
        }
        self.state.set_to(ThreadState::Terminated);
    }

    /// Transitions to `Terminating`, wakes the worker if it is idle, and
    /// joins it. Idempotent: calling this twice (e.g. once explicitly and
    /// once from `Drop`) is a no-op the second time.
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
        self.pending.lock().len()
    }
}

impl RequestQueue for SingleFifoQueue {
    fn add_request(&self, req: Arc<Request>) -> Result<(), IoError> {
        if self.state.current() != ThreadState::Running {
            return Err(IoError::InvalidArgument(format!(
                "queue {} is not running",
                self.queue_id
            )));
        }

        #[cfg(feature = "queue-collision-check")]
        {
            let pending = self.pending.lock();
            let collides = pending
                .iter()
                .any(|p| Arc::ptr_eq(p.file(), req.file()) && p.offset() == req.offset());
            if collides {
                tracing::warn!(offset = req.offset(), "submitting request that collides with a pending one on the same file/offset");
            }
        }

        self.pending.lock().push_back(req);
        self.sem.signal();
        Ok(())
    }

    fn cancel_request(&self, req: &Arc<Request>) -> bool {
        let mut pending = self.pending.lock();
        if let Some(pos) = pending.iter().position(|p| Arc::ptr_eq(p, req)) {
            pending.remove(pos);
            drop(pending);
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

impl Drop for SingleFifoQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
