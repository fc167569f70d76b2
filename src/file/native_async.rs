//! Kernel-async (`io_uring`) backend file handle.
//!
//! This type owns the open descriptor and exposes it via [`File::raw_fd`]
//! so that [`crate::queue::native_async::NativeAsyncQueue`] can submit
//! directly to the kernel instead of calling `serve`. `serve` itself is
//! still implemented, as a plain positional read/write (the same shape as
//! [`crate::file::syscall::SyscallFile`]), since it is the code path the
//! queue falls back to if the ring ever reports a submission it cannot
//! retry asynchronously, and the one other backends expect of any `File`.

use std::fs::{File as StdFile, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;

use crate::config::OpenFlags;
use crate::error::IoError;
use crate::file::lock::AdvisoryLock;
use crate::file::{File, OutstandingCounter};
use crate::request::Direction;
use crate::stats::Stats;

pub struct NativeAsyncFile {
    path: PathBuf,
    file: StdFile,
    queue_id: i32,
    device_id: u32,
    direct: bool,
    lock_file: Mutex<Option<AdvisoryLock>>,
    outstanding: OutstandingCounter,
    #[allow(dead_code)]
    unlinked: AtomicBool,
}

impl NativeAsyncFile {
    pub fn open(
        path: impl AsRef<Path>,
        flags: OpenFlags,
        queue_id: i32,
        device_id: u32,
    ) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let mut opts = OpenOptions::new();
        opts.read(true).write(true);
        if flags.contains(OpenFlags::CREAT) {
            opts.create(true);
        }
        if flags.contains(OpenFlags::TRUNC) {
            opts.truncate(true);
        }

        let want_direct = flags.contains(OpenFlags::DIRECT);
        let may_fall_back = flags.contains(OpenFlags::TRY_DIRECT);
        let (file, direct) = if want_direct {
            let mut direct_opts = opts.clone();
            direct_opts.custom_flags(libc::O_DIRECT);
            match direct_opts.open(&path) {
                Ok(f) => (f, true),
                Err(e) if may_fall_back => {
                    tracing::debug!(path = %path.display(), error = %e, "O_DIRECT open failed, falling back to buffered I/O");
                    (opts.open(&path).map_err(|e| IoError::io(&path, e))?, false)
                }
                Err(e) => return Err(IoError::io(&path, e)),
            }
        } else {
            (opts.open(&path).map_err(|e| IoError::io(&path, e))?, false)
        };

        if flags.contains(OpenFlags::REQUIRE_DIRECT) && !direct {
            return Err(IoError::Configuration(format!(
                "REQUIRE_DIRECT set but direct mode unavailable for {}",
                path.display()
            )));
        }

        Ok(Self {
            path,
            file,
            queue_id,
            device_id,
            direct,
            lock_file: Mutex::new(None),
            outstanding: OutstandingCounter::new(),
            unlinked: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl File for NativeAsyncFile {
    fn queue_id(&self) -> i32 {
        self.queue_id
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn io_type(&self) -> &'static str {
        "linuxaio"
    }

    fn direct_mode(&self) -> bool {
        self.direct
    }

    fn raw_fd(&self) -> Option<std::os::raw::c_int> {
        Some(self.file.as_raw_fd())
    }

    unsafe fn serve(
        &self,
        buffer: *mut u8,
        offset: u64,
        bytes: usize,
        direction: Direction,
    ) -> Result<usize, IoError> {
        let slice = std::slice::from_raw_parts_mut(buffer, bytes);
        match direction {
            Direction::Write => {
                Stats::get().write_started();
                let result = self.file.write_at(slice, offset);
                Stats::get().write_finished();
                let n = result.map_err(|e| IoError::io(&self.path, e))?;
                Stats::get().write_bytes(n as u64);
                Ok(n)
            }
            Direction::Read => {
                Stats::get().read_started();
                let result = self.file.read_at(slice, offset);
                Stats::get().read_finished();
                let n = result.map_err(|e| IoError::io(&self.path, e))?;
                if n < bytes {
                    return Err(IoError::Eof { offset, expected: bytes, actual: n });
                }
                Stats::get().read_bytes(n as u64);
                Ok(n)
            }
        }
    }

    fn set_size(&self, bytes: u64) -> Result<(), IoError> {
        // Safety: fd is valid and owned by self.file.
        let rc = unsafe { libc::posix_fallocate(self.file.as_raw_fd(), 0, bytes as libc::off_t) };
        if rc != 0 {
            return self.file.set_len(bytes).map_err(|e| IoError::io(&self.path, e));
        }
        Ok(())
    }

    fn lock_file(&self) -> Result<(), IoError> {
        let mut guard = self.lock_file.lock();
        if guard.is_none() {
            let mut lock_path = self.path.as_os_str().to_os_string();
            lock_path.push(".lock");
            *guard = Some(AdvisoryLock::acquire(PathBuf::from(lock_path), self.queue_id, self.device_id)?);
        }
        Ok(())
    }

    fn close_remove(&self) -> Result<(), IoError> {
        self.outstanding.wait_for_zero();
        self.file.sync_data().map_err(|e| IoError::io(&self.path, e))?;
        if let Some(lock) = self.lock_file.lock().take() {
            lock.close_remove()?;
        }
        Ok(())
    }

    fn outstanding(&self) -> &OutstandingCounter {
        &self.outstanding
    }

    fn unlink_backing_path(&self) -> Result<(), IoError> {
        std::fs::remove_file(&self.path).map_err(|e| IoError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn serve_round_trips_like_syscall_backend() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aio.bin");
        let file = NativeAsyncFile::open(&path, OpenFlags::default(), 0, 0).unwrap();
        file.set_size(4096).unwrap();

        let mut write_buf = vec![0x5Au8; 4096];
        let mut read_buf = vec![0u8; 4096];
        unsafe {
            file.serve(write_buf.as_mut_ptr(), 0, 4096, Direction::Write).unwrap();
            file.serve(read_buf.as_mut_ptr(), 0, 4096, Direction::Read).unwrap();
        }
        assert_eq!(write_buf, read_buf);
        assert!(file.raw_fd().is_some());
        file.close_remove().unwrap();
    }
}
