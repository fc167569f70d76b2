//! Positional-syscall backend: `read_at`/`write_at` against an open file
//! descriptor, optionally in direct (page-cache-bypassing) mode.
//!
//! Grounded on the teacher's `io::file_manager::DirectIoFile`: the same
//! `OpenOptionsExt::custom_flags(libc::O_DIRECT)` construction, `fdatasync`
//! for a data-only flush, and `posix_fallocate` for preallocation — but
//! without that file's read-modify-write alignment layer, since this
//! backend's contract is that misaligned direct-mode requests are rejected
//! at submission rather than silently widened.

use std::fs::{File as StdFile, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::config::OpenFlags;
use crate::error::IoError;
use crate::file::lock::AdvisoryLock;
use crate::file::{File, OutstandingCounter};
use crate::request::Direction;
use crate::stats::Stats;

#[cfg(unix)]
use std::os::unix::fs::{FileExt, OpenOptionsExt};

pub struct SyscallFile {
    path: PathBuf,
    file: StdFile,
    queue_id: i32,
    device_id: u32,
    direct: bool,
    lock_file: Mutex<Option<AdvisoryLock>>,
    unlinked: AtomicBool,
    outstanding: OutstandingCounter,
}

impl SyscallFile {
    /// Opens `path` under `flags`. `TRY_DIRECT` attempts `O_DIRECT` first
    /// and transparently falls back to buffered I/O if the open fails with
    /// it set, recording which mode was ultimately selected.
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

        #[cfg(unix)]
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

        #[cfg(windows)]
        let (file, direct) = {
            let _ = want_direct;
            let _ = may_fall_back;
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
            unlinked: AtomicBool::new(false),
            outstanding: OutstandingCounter::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlinks the backing path while keeping the descriptor open, so the
    /// file disappears from the directory now but its storage survives
    /// until the descriptor closes. Used by the factory when
    /// `unlink_on_open` is set.
    pub fn unlink(&self) -> Result<(), IoError> {
        if self.unlinked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        std::fs::remove_file(&self.path).map_err(|e| IoError::io(&self.path, e))
    }

    #[cfg(unix)]
    fn sync_data(&self) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;
        let fd = self.file.as_raw_fd();
        // Safety: fd is valid and owned by self.file for this call's
        // duration.
        let rc = unsafe { libc::fdatasync(fd) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_data(&self) -> io::Result<()> {
        self.file.sync_data()
    }
}

impl File for SyscallFile {
    fn queue_id(&self) -> i32 {
        self.queue_id
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn io_type(&self) -> &'static str {
        "syscall"
    }

    fn direct_mode(&self) -> bool {
        self.direct
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
                #[cfg(unix)]
                let result = self.file.write_at(slice, offset);
                #[cfg(not(unix))]
                let result = {
                    use std::io::{Seek, SeekFrom, Write};
                    let mut f = &self.file;
                    f.seek(SeekFrom::Start(offset)).and_then(|_| f.write_all(slice)).map(|_| slice.len())
                };
                Stats::get().write_finished();
                let n = result.map_err(|e| IoError::io(&self.path, e))?;
                Stats::get().write_bytes(n as u64);
                Ok(n)
            }
            Direction::Read => {
                Stats::get().read_started();
                #[cfg(unix)]
                let result = self.file.read_at(slice, offset);
                #[cfg(not(unix))]
                let result = {
                    use std::io::{Read, Seek, SeekFrom};
                    let mut f = &self.file;
                    f.seek(SeekFrom::Start(offset)).and_then(|_| f.read(slice))
                };
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
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = self.file.as_raw_fd();
            // Safety: fd is valid and owned by self.file.
            let rc = unsafe { libc::posix_fallocate(fd, 0, bytes as libc::off_t) };
            if rc != 0 {
                return self
                    .file
                    .set_len(bytes)
                    .map_err(|e| IoError::io(&self.path, e));
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.file.set_len(bytes).map_err(|e| IoError::io(&self.path, e))
        }
    }

    fn lock_file(&self) -> Result<(), IoError> {
        let mut guard = self.lock_file.lock();
        if guard.is_none() {
            let lock_path = lock_path_for(&self.path);
            *guard = Some(AdvisoryLock::acquire(lock_path, self.queue_id, self.device_id)?);
        }
        Ok(())
    }

    fn close_remove(&self) -> Result<(), IoError> {
        self.outstanding.wait_for_zero();
        self.sync_data().map_err(|e| IoError::io(&self.path, e))?;
        if let Some(lock) = self.lock_file.lock().take() {
            lock.close_remove()?;
        }
        Ok(())
    }

    fn outstanding(&self) -> &OutstandingCounter {
        &self.outstanding
    }

    fn unlink_backing_path(&self) -> Result<(), IoError> {
        self.unlink()
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".lock");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let file = SyscallFile::open(&path, OpenFlags::default(), 0, 0).unwrap();
        file.set_size(4096).unwrap();

        let mut write_buf = vec![0x42u8; 4096];
        let mut read_buf = vec![0u8; 4096];
        unsafe {
            file.serve(write_buf.as_mut_ptr(), 0, 4096, Direction::Write).unwrap();
            file.serve(read_buf.as_mut_ptr(), 0, 4096, Direction::Read).unwrap();
        }
        assert_eq!(write_buf, read_buf);
        file.close_remove().unwrap();
    }

    #[test]
    fn short_read_past_end_is_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.bin");
        let file = SyscallFile::open(&path, OpenFlags::default(), 0, 0).unwrap();
        file.set_size(4).unwrap();
        let mut buf = vec![0u8; 16];
        let result = unsafe { file.serve(buf.as_mut_ptr(), 0, 16, Direction::Read) };
        assert!(matches!(result, Err(IoError::Eof { .. })));
    }
}
