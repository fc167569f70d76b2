//! The `Request` type: a reference-counted descriptor of one in-flight
//! block transfer, its state machine, its waiter set, and cancellation.
//!
//! Grounded directly on the source library's `request_with_state` and
//! `request_with_waiters`: completion is a single, carefully ordered
//! sequence (record result → DONE → invoke callback → notify every waiter →
//! release the file back-reference → READY-TO-DIE), and `add_waiter`
//! closes the register-vs-notify race by re-testing `poll()` under the same
//! lock it inserts into the waiter set under.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::IoError;
use crate::file::File;
use crate::primitives::{OnOffLatch, StateCell};
use crate::stats::Stats;

/// Direction of a block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// The request state machine. Discriminant order matters: `StateCell`'s
/// `wait_for` compares by `PartialOrd`, and `wait()` blocks for `ReadyToDie`
/// specifically so that `Done` (bytes transferred, callback not yet run) is
/// never mistaken for final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RequestState {
    Op = 0,
    Done = 1,
    ReadyToDie = 2,
}

/// Invoked exactly once per request, with `success = false` on a canceled
/// or failed transfer.
pub type CompletionCallback = Box<dyn FnOnce(&Request, bool) + Send + 'static>;

/// One in-flight (or completed) block transfer against a `File`.
///
/// Owns no buffer: the caller-supplied pointer must stay valid and
/// untouched until the completion callback fires or `wait()` returns.
pub struct Request {
    file: Arc<dyn File>,
    buffer: *mut u8,
    buffer_len: usize,
    offset: u64,
    bytes: usize,
    direction: Direction,
    state: StateCell<RequestState>,
    waiters: Mutex<Vec<Arc<OnOffLatch>>>,
    on_complete: Mutex<Option<CompletionCallback>>,
    error: Mutex<Option<IoError>>,
    bytes_transferred: Mutex<usize>,
    submit_time: Instant,
    canceled: AtomicBool,
}

// Safety: `buffer` is a caller-owned pointer valid for `buffer_len` bytes
// for the lifetime of the request, by the API's documented contract; the
// request never aliases it outside the single thread running `serve`.
unsafe impl Send for Request {}
unsafe impl Sync for Request {}

impl Request {
    /// Constructs a new request in state `Op` and increments the file's
    /// outstanding-request counter. `buffer` must remain valid for
    /// `buffer_len` bytes until completion.
    pub fn new(
        file: Arc<dyn File>,
        buffer: *mut u8,
        buffer_len: usize,
        offset: u64,
        bytes: usize,
        direction: Direction,
        on_complete: Option<CompletionCallback>,
    ) -> Arc<Request> {
        file.inc_outstanding();
        Arc::new(Request {
            file,
            buffer,
            buffer_len,
            offset,
            bytes,
            direction,
            state: StateCell::new(RequestState::Op),
            waiters: Mutex::new(Vec::new()),
            on_complete: Mutex::new(on_complete),
            error: Mutex::new(None),
            bytes_transferred: Mutex::new(0),
            submit_time: Instant::now(),
            canceled: AtomicBool::new(false),
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn file(&self) -> &Arc<dyn File> {
        &self.file
    }

    pub fn submit_time(&self) -> Instant {
        self.submit_time
    }

    /// Raw pointer/length to the caller-owned buffer, for use by a backend's
    /// `serve` implementation.
    ///
    /// # Safety
    /// The caller must not retain the slice past the backend's `serve`
    /// call, and must not read/write concurrently with the worker thread
    /// performing the transfer.
    pub unsafe fn buffer(&self) -> (*mut u8, usize) {
        (self.buffer, self.buffer_len)
    }

    /// True iff the state is `Done` or `ReadyToDie`.
    pub fn poll(&self) -> bool {
        self.state.current() >= RequestState::Done
    }

    /// Blocks until `ReadyToDie`, optionally recording the blocked duration
    /// in the wait-time stats counter, then raises any recorded error.
    pub fn wait(&self, measure_time: bool) -> Result<(), IoError> {
        if measure_time {
            let _timer = Stats::scoped_wait_timer();
            self.state.wait_for(RequestState::ReadyToDie);
        } else {
            self.state.wait_for(RequestState::ReadyToDie);
        }
        self.check_errors()
    }

    /// Raises the error recorded on this request, if any. Idempotent.
    pub fn check_errors(&self) -> Result<(), IoError> {
        match &*self.error.lock() {
            Some(e) => Err(clone_error(e)),
            None => Ok(()),
        }
    }

    pub fn bytes_transferred(&self) -> usize {
        *self.bytes_transferred.lock()
    }

    /// Registers `latch` to be turned on at completion. If the request has
    /// already reached `Done`/`ReadyToDie`, returns `true` immediately
    /// without inserting the latch (the caller should self-fire); the test
    /// of `poll()` and the insertion both happen under the waiters lock so
    /// no notification can be missed between the two.
    pub fn add_waiter(&self, latch: Arc<OnOffLatch>) -> bool {
        let mut waiters = self.waiters.lock();
        if self.poll() {
            return true;
        }
        waiters.push(latch);
        false
    }

    pub fn num_waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Records a successful transfer and drives the request through
    /// DONE → READY-TO-DIE. Called by a backend's worker after `serve`
    /// succeeds.
    pub fn complete_success(self: &Arc<Self>, bytes_transferred: usize) {
        *self.bytes_transferred.lock() = bytes_transferred;
        self.finish(true);
    }

    /// Records a failed transfer and drives the request through
    /// DONE → READY-TO-DIE.
    pub fn complete_error(self: &Arc<Self>, error: IoError) {
        *self.error.lock() = Some(error);
        self.finish(false);
    }

    /// Attempts to cancel the request before it is served. The queue is
    /// responsible for the "is it still in the pending list" check; this
    /// method performs the completion sequence once the queue has
    /// confirmed removal. Returns whatever the queue told it to return,
    /// unmodified, purely as a convenience for callers chaining queue
    /// cancellation with request completion in one call.
    pub fn mark_canceled(self: &Arc<Self>) {
        self.canceled.store(true, Ordering::SeqCst);
        self.finish(false);
    }

    pub fn was_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Attempts to remove this request from the queue it was submitted to
    /// before a worker takes it. Routes to the queue named by this
    /// request's file via the process-wide registry; if that queue is no
    /// longer registered, cancellation fails closed (`false`) rather than
    /// panicking — the request will still complete normally and the
    /// caller must still `wait` on it.
    pub fn cancel(self: &Arc<Self>) -> bool {
        match crate::registry::Registry::get().get_queue(self.file.queue_id()) {
            Ok(queue) => queue.cancel_request(self),
            Err(_) => false,
        }
    }

    /// The shared completion sequence: OP → DONE, invoke callback exactly
    /// once, notify every waiter exactly once, release the file
    /// back-reference exactly once, then DONE → READY-TO-DIE. The state
    /// cell's monotonic `set_to` calls make a double invocation of this
    /// function idempotent-but-detectable: the second call would invoke
    /// the callback again, which is exactly the "bug" class of error this
    /// engine does not otherwise guard against at runtime, so callers
    /// (queue worker, cancel path) must each only call this once per
    /// request, which the state cell transition below is the last line of
    /// defense for.
    fn finish(self: &Arc<Self>, success: bool) {
        let prior = self.state.current();
        if prior >= RequestState::Done {
            panic!("double completion of request at offset {}", self.offset);
        }
        self.state.set_to(RequestState::Done);

        if let Some(cb) = self.on_complete.lock().take() {
            cb(self, success);
        }

        let waiters = std::mem::take(&mut *self.waiters.lock());
        for latch in waiters {
            latch.on();
        }

        self.file.dec_outstanding();
        self.state.set_to(RequestState::ReadyToDie);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("offset", &self.offset)
            .field("bytes", &self.bytes)
            .field("direction", &self.direction)
            .field("state", &self.state.current())
            .finish()
    }
}

fn clone_error(e: &IoError) -> IoError {
    match e {
        IoError::InvalidArgument(s) => IoError::InvalidArgument(s.clone()),
        IoError::Io { path, source } => {
            IoError::Io { path: path.clone(), source: std::io::Error::new(source.kind(), source.to_string()) }
        }
        IoError::Eof { offset, expected, actual } => IoError::Eof {
            offset: *offset,
            expected: *expected,
            actual: *actual,
        },
        IoError::Configuration(s) => IoError::Configuration(s.clone()),
        IoError::Bug(s) => IoError::Bug(s.clone()),
    }
}

/// Blocks until every request in `requests` reaches READY-TO-DIE, raising
/// the first recorded error encountered (after waiting on all of them, so
/// no request is left abandoned).
pub fn wait_all(requests: &[Arc<Request>]) -> Result<(), IoError> {
    let mut first_err = None;
    for req in requests {
        if let Err(e) = req.wait(false) {
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Attempts to cancel every request in `requests`, returning the number
/// for which cancellation actually won the race against completion.
pub fn cancel_all(requests: &[Arc<Request>]) -> usize {
    requests.iter().filter(|r| r.cancel()).count()
}

/// Blocks until at least one request in `requests` reaches READY-TO-DIE,
/// returning its index.
pub fn wait_any(requests: &[Arc<Request>]) -> usize {
    loop {
        for (i, req) in requests.iter().enumerate() {
            if req.poll() {
                return i;
            }
        }
        let latch = OnOffLatch::new();
        let mut registered = Vec::new();
        for req in requests {
            if !req.add_waiter(latch.clone()) {
                registered.push(());
            } else {
                return requests.iter().position(|r| Arc::ptr_eq(r, req)).unwrap();
            }
        }
        latch.wait_for_on();
    }
}
