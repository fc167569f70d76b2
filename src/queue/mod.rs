//! Per-disk request queues: the `RequestQueue` trait shared by the
//! single-FIFO, two-FIFO, and native-async variants, plus the thread-state
//! enum all of them drive their worker lifecycle with.

pub mod single_fifo;
pub mod two_fifo;

#[cfg(all(target_os = "linux", feature = "linuxaio"))]
pub mod native_async;

use std::sync::Arc;

use crate::error::IoError;
use crate::request::Request;

/// Lifecycle of a queue's worker thread(s). Discriminant order matters:
/// `StateCell::wait_for` blocks until the cell is at least the requested
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ThreadState {
    NotRunning = 0,
    Running = 1,
    Terminating = 2,
    Terminated = 3,
}

/// The contract every queue variant exposes, regardless of its internal
/// scheduling policy.
pub trait RequestQueue: Send + Sync {
    /// Appends `req` to the pending set. Rejects submissions to a
    /// non-running queue with `InvalidArgument`.
    fn add_request(&self, req: Arc<Request>) -> Result<(), IoError>;

    /// Attempts to remove `req` before it is served. Returns `true` iff it
    /// was still pending and was removed (the caller's completion callback
    /// then fires with `success = false`); returns `false` if the worker
    /// had already taken it (it will complete normally).
    fn cancel_request(&self, req: &Arc<Request>) -> bool;

    fn queue_id(&self) -> i32;
}

/// Drives a request through its backend's `serve` and the resulting
/// completion sequence. Shared by every queue variant's worker loop.
pub(crate) fn serve_request(req: &Arc<Request>) {
    let file = req.file().clone();
    // Safety: the buffer was validated at submission time and the request
    // queue guarantees only one worker ever serves a given request.
    let (ptr, _len) = unsafe { req.buffer() };
    let result = unsafe { file.serve(ptr, req.offset(), req.bytes(), req.direction()) };
    match result {
        Ok(n) => req.complete_success(n),
        Err(e) => req.complete_error(e),
    }
}
