//! Cross-process advisory locking on a dedicated one-page lock file.
//!
//! Grounded on the original's `fileperblock_file::lock()`
//! (`examples/original_source/foxxll/io/fileperblock_file.cpp`): the lock
//! file cannot be `flock`-ed meaningfully while empty on some platforms, so
//! construction first constructs a short-lived inner backend over the lock
//! path and writes one page of zeroed, aligned data through a real
//! `awrite`+`wait()` — exercising the Request/queue engine exactly as the
//! original's `lock_file_->awrite(one_page, 0, page_size); r->wait();` does
//! — before taking the OS-level lock.

use std::fs::{File as StdFile, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::OpenFlags;
use crate::error::IoError;
use crate::file::syscall::SyscallFile;
use crate::file::File;
use crate::primitives::AlignedBuffer;

pub const LOCK_FILE_PAGE_SIZE: usize = 4096;

/// An advisory-locked dedicated file, held open for the lifetime of the
/// owning backend.
pub struct AdvisoryLock {
    path: PathBuf,
    file: StdFile,
}

impl AdvisoryLock {
    /// Opens (creating if needed) the lock file at `path`, seeds it with
    /// one page of zeroed, aligned data through a real `awrite`+`wait()` if
    /// it is currently empty, and takes an exclusive advisory lock.
    ///
    /// `queue_id`/`device_id` are the owning backend's own, so the seed
    /// write rides the same queue a request against the real file would.
    pub fn acquire(path: impl AsRef<Path>, queue_id: i32, device_id: u32) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let is_empty = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(IoError::io(&path, e)),
        };
        if is_empty {
            seed_zero_page(&path, queue_id, device_id)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| IoError::io(&path, e))?;

        lock_exclusive(&file).map_err(|e| IoError::io(&path, e))?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock, closes the file, and removes it from disk.
    pub fn close_remove(self) -> Result<(), IoError> {
        let path = self.path.clone();
        drop(self.file);
        std::fs::remove_file(&path).or_else(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(IoError::io(&path, e))
            }
        })
    }
}

/// Writes one page of zeroed, aligned data to `path` through a real
/// request: constructs a plain (non-direct) [`SyscallFile`] over the lock
/// path, `set_size`s it, and submits an `awrite` that it `wait()`s on
/// before returning — the lock file is never written by hand-rolled
/// `std::fs` calls, only through the same engine real requests use.
fn seed_zero_page(path: &Path, queue_id: i32, device_id: u32) -> Result<(), IoError> {
    let seed: Arc<dyn File> = Arc::new(SyscallFile::open(path, OpenFlags::CREAT, queue_id, device_id)?);
    seed.set_size(LOCK_FILE_PAGE_SIZE as u64)?;

    let mut page = AlignedBuffer::new(LOCK_FILE_PAGE_SIZE, LOCK_FILE_PAGE_SIZE);
    // Safety: `page` stays alive and untouched until `wait()` returns below.
    unsafe {
        let req = seed.awrite(page.as_mut_ptr(), LOCK_FILE_PAGE_SIZE, 0, None)?;
        req.wait(false)?;
    }
    Ok(())
}

#[cfg(unix)]
fn lock_exclusive(file: &StdFile) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    // Safety: fd is a valid, open file descriptor owned by `file`.
    let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
fn lock_exclusive(file: &StdFile) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Storage::FileSystem::{LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};
    use windows_sys::Win32::System::IO::OVERLAPPED;

    let handle = file.as_raw_handle() as windows_sys::Win32::Foundation::HANDLE;
    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    // Safety: handle is valid for the duration of this call; overlapped is
    // a fresh zeroed struct used only for this synchronous lock attempt.
    let ok = unsafe {
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            u32::MAX,
            u32::MAX,
            &mut overlapped,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::single_fifo::SingleFifoQueue;
    use crate::registry::Registry;
    use tempfile::tempdir;

    #[test]
    fn acquire_writes_one_page_and_locks() {
        let queue_id = 9_101;
        Registry::get().add_queue(queue_id, SingleFifoQueue::new(queue_id));

        let dir = tempdir().unwrap();
        let path = dir.path().join("test.lock");
        let lock = AdvisoryLock::acquire(&path, queue_id, 0).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, LOCK_FILE_PAGE_SIZE);
        lock.close_remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn acquire_does_not_reseed_an_existing_nonempty_lock_file() {
        let queue_id = 9_102;
        Registry::get().add_queue(queue_id, SingleFifoQueue::new(queue_id));

        let dir = tempdir().unwrap();
        let path = dir.path().join("test.lock");
        std::fs::write(&path, vec![0xABu8; LOCK_FILE_PAGE_SIZE * 2]).unwrap();

        let lock = AdvisoryLock::acquire(&path, queue_id, 0).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, LOCK_FILE_PAGE_SIZE * 2);
        lock.close_remove().unwrap();
    }
}
