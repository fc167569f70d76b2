//! Process-wide queue registry: directory mapping queue-id to queue,
//! created lazily and torn down at process exit in reverse creation
//! order.
//!
//! Grounded in §4.6 and the design notes' `singleton<T, destroy_on_exit>`
//! discussion: the first call to [`Registry::get`] constructs the
//! instance and registers a `libc::atexit` handler, mirroring the
//! source's `register_exit_handler`, whose LIFO unwind order is exactly
//! why queues must be touched (and therefore registered) before stats is
//! ever torn down — except in this crate [`crate::stats::Stats`] is a
//! `once_cell` instance that lives for the process's lifetime and is
//! never explicitly destructed, so there is nothing it could race with;
//! the registry still joins every queue's worker at exit purely so no
//! thread outlives `main`.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use crate::error::IoError;
use crate::queue::RequestQueue;
use crate::request::Request;

pub struct Registry {
    queues: RwLock<HashMap<i32, Arc<dyn RequestQueue>>>,
    creation_order: Mutex<Vec<i32>>,
}

static INSTANCE: OnceCell<Registry> = OnceCell::new();

impl Registry {
    /// Returns the process-wide instance, constructing it (and
    /// registering its exit handler) on first access.
    pub fn get() -> &'static Registry {
        INSTANCE.get_or_init(|| {
            register_exit_handler();
            Registry {
                queues: RwLock::new(HashMap::new()),
                creation_order: Mutex::new(Vec::new()),
            }
        })
    }

    /// Registers `queue` under `id`, replacing whatever was previously
    /// there (if anything). Newly-added ids are appended to the teardown
    /// order; re-registering an existing id does not move it.
    pub fn add_queue(&self, id: i32, queue: Arc<dyn RequestQueue>) {
        let mut queues = self.queues.write();
        if !queues.contains_key(&id) {
            self.creation_order.lock().push(id);
        }
        queues.insert(id, queue);
    }

    pub fn get_queue(&self, id: i32) -> Result<Arc<dyn RequestQueue>, IoError> {
        self.queues
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| IoError::InvalidArgument(format!("no queue registered for queue_id {id}")))
    }

    pub fn has_queue(&self, id: i32) -> bool {
        self.queues.read().contains_key(&id)
    }

    /// Proxies cancellation to the queue named by `id`.
    pub fn cancel_request(&self, req: &Arc<Request>, id: i32) -> Result<bool, IoError> {
        Ok(self.get_queue(id)?.cancel_request(req))
    }

    /// Drops every registered queue in reverse creation order, running
    /// each queue's `Drop` (graceful shutdown + worker join) as it goes.
    /// Called automatically at process exit; exposed for tests that need
    /// deterministic queue teardown without waiting for `atexit`.
    pub fn shutdown_all(&self) {
        let order: Vec<i32> = std::mem::take(&mut *self.creation_order.lock());
        let mut queues = self.queues.write();
        for id in order.into_iter().rev() {
            queues.remove(&id);
        }
    }
}

fn register_exit_handler() {
    extern "C" fn run_teardown() {
        if let Some(registry) = INSTANCE.get() {
            registry.shutdown_all();
        }
    }
    // Safety: `run_teardown` has the `extern "C" fn()` signature `atexit`
    // requires and touches only the lazily-initialized static above.
    unsafe {
        libc::atexit(run_teardown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::single_fifo::SingleFifoQueue;

    #[test]
    fn add_then_get_round_trips() {
        let registry = Registry::get();
        let queue = SingleFifoQueue::new(1000);
        registry.add_queue(1000, queue);
        assert!(registry.get_queue(1000).is_ok());
    }

    #[test]
    fn get_unknown_queue_is_invalid_argument() {
        let registry = Registry::get();
        assert!(matches!(registry.get_queue(999_999), Err(IoError::InvalidArgument(_))));
    }
}
