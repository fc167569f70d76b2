//! The `File` trait: the block-device contract every backend implements,
//! plus the shared `aread`/`awrite` submission path that constructs a
//! `Request` and hands it to the file's queue.

pub mod lock;
pub mod memory;
pub mod mmap;
pub mod syscall;

#[cfg(feature = "fileperblock")]
pub mod fileperblock;

#[cfg(all(windows, feature = "wincall"))]
pub mod wincall;

#[cfg(all(target_os = "linux", feature = "linuxaio"))]
pub mod native_async;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::IoError;
use crate::primitives::is_aligned;
use crate::request::{CompletionCallback, Direction, Request};

pub const NO_ALLOCATOR: i32 = -1;
pub const DEFAULT_QUEUE: i32 = -1;

/// Shared outstanding-request counter every concrete backend embeds.
///
/// A request holds a back-reference to its file for as long as it is
/// in flight; `close_remove` blocks until this counter reaches zero so a
/// backend never tears down storage a worker thread is still touching.
#[derive(Debug, Default)]
pub struct OutstandingCounter(AtomicUsize);

impl OutstandingCounter {
    pub fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec(&self) {
        let prior = self.0.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prior > 0, "outstanding counter underflow");
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Blocks (busy-waits with a short sleep) until the counter reaches
    /// zero. Used by `close_remove`.
    pub fn wait_for_zero(&self) {
        while self.get() != 0 {
            std::thread::sleep(std::time::Duration::from_micros(200));
        }
    }
}

/// The block-device contract implemented by every concrete backend
/// (syscall, mmap, wincall, native-async, file-per-block, memory).
pub trait File: Send + Sync {
    /// The queue that serves requests for this file.
    fn queue_id(&self) -> i32;

    /// Stable integer identifying the physical device, for statistics
    /// partitioning.
    fn device_id(&self) -> u32;

    /// Short backend name, e.g. `"syscall"`, `"mmap"`, `"fileperblock"`.
    fn io_type(&self) -> &'static str;

    /// Whether this file was opened in direct (page-cache-bypassing) mode.
    fn direct_mode(&self) -> bool {
        false
    }

    /// Required alignment for buffer address, offset, and length when
    /// `direct_mode()` is true.
    fn alignment(&self) -> u64 {
        4096
    }

    /// Synchronous transfer of `bytes` bytes between `buffer` and the
    /// backing storage at `offset`. May block. Returns the number of bytes
    /// actually transferred.
    ///
    /// # Safety
    /// `buffer` must be valid for `bytes` bytes and exclusively owned by
    /// the caller for the duration of the call.
    unsafe fn serve(
        &self,
        buffer: *mut u8,
        offset: u64,
        bytes: usize,
        direction: Direction,
    ) -> Result<usize, IoError>;

    fn set_size(&self, bytes: u64) -> Result<(), IoError>;

    /// Acquires the cross-process advisory lock on this file's backing
    /// path.
    fn lock_file(&self) -> Result<(), IoError>;

    /// Blocks until the outstanding-request counter reaches zero, then
    /// releases and removes any backend-owned resources (lock file,
    /// unlinked backing file).
    fn close_remove(&self) -> Result<(), IoError>;

    fn outstanding(&self) -> &OutstandingCounter;

    fn inc_outstanding(&self) {
        self.outstanding().inc();
    }

    fn dec_outstanding(&self) {
        self.outstanding().dec();
    }

    /// The raw descriptor backing this file, for backends whose queue
    /// submits directly to a kernel interface instead of calling `serve`.
    /// `None` for every backend that only ever completes synchronously
    /// inside a worker thread's `serve` call.
    fn raw_fd(&self) -> Option<std::os::raw::c_int> {
        None
    }

    /// Unlinks the backing path while keeping the descriptor/mapping open,
    /// used by the factory when `unlink_on_open` is set. Backends with no
    /// single backing path (file-per-block, memory) reject this.
    fn unlink_backing_path(&self) -> Result<(), IoError> {
        Err(IoError::Configuration(
            "unlink_on_open is not supported by this backend".to_string(),
        ))
    }
}

fn validate_submission(
    file: &dyn File,
    buffer: *mut u8,
    offset: u64,
    bytes: usize,
) -> Result<(), IoError> {
    if bytes == 0 {
        return Err(IoError::InvalidArgument("zero-length request".to_string()));
    }
    if file.direct_mode() {
        let align = file.alignment();
        if !is_aligned(buffer as u64, align) {
            return Err(IoError::InvalidArgument(format!(
                "buffer address {:#x} is not aligned to {align}",
                buffer as u64
            )));
        }
        if !is_aligned(offset, align) {
            return Err(IoError::InvalidArgument(format!(
                "offset {offset} is not aligned to {align}"
            )));
        }
        if bytes as u64 % align != 0 {
            return Err(IoError::InvalidArgument(format!(
                "length {bytes} is not a multiple of {align}"
            )));
        }
    }
    Ok(())
}

impl dyn File {
    /// Constructs a read request and submits it to this file's queue.
    ///
    /// # Safety
    /// `buffer` must be valid for `bytes` bytes and must remain valid and
    /// untouched by the caller until `on_complete` fires or the returned
    /// request's `wait()` returns.
    pub unsafe fn aread(
        self: &Arc<Self>,
        buffer: *mut u8,
        bytes: usize,
        offset: u64,
        on_complete: Option<CompletionCallback>,
    ) -> Result<Arc<Request>, IoError> {
        self.submit(buffer, bytes, offset, Direction::Read, on_complete)
    }

    /// Constructs a write request and submits it to this file's queue.
    ///
    /// # Safety
    /// Same contract as [`aread`](Self::aread).
    pub unsafe fn awrite(
        self: &Arc<Self>,
        buffer: *mut u8,
        bytes: usize,
        offset: u64,
        on_complete: Option<CompletionCallback>,
    ) -> Result<Arc<Request>, IoError> {
        self.submit(buffer, bytes, offset, Direction::Write, on_complete)
    }

    unsafe fn submit(
        self: &Arc<Self>,
        buffer: *mut u8,
        bytes: usize,
        offset: u64,
        direction: Direction,
        on_complete: Option<CompletionCallback>,
    ) -> Result<Arc<Request>, IoError> {
        validate_submission(self.as_ref(), buffer, offset, bytes)?;
        let queue = crate::registry::Registry::get().get_queue(self.queue_id())?;
        let req = Request::new(self.clone(), buffer, bytes, offset, bytes, direction, on_complete);
        queue.add_request(req.clone())?;
        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_submission_rejects_zero_length() {
        let file = memory::MemoryFile::new(0, 0);
        let mut buf = [0u8; 1];
        let err = validate_submission(&file, buf.as_mut_ptr(), 0, 0);
        assert!(err.is_err());
    }
}
