//! Windows positional-I/O backend: `ReadFile`/`WriteFile` with an
//! `OVERLAPPED` offset, under the same contract as
//! [`crate::file::syscall::SyscallFile`].
//!
//! Serialized by a per-file mutex around the whole positional call: some
//! handle types do not make seek+read/write atomic, so two requests racing
//! on the same handle could otherwise transfer at the wrong offset.

use std::os::windows::io::AsRawHandle;
use std::os::windows::fs::OpenOptionsExt;
use std::fs::{File as StdFile, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use windows_sys::Win32::Foundation::{GetLastError, HANDLE};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile, FILE_FLAG_NO_BUFFERING};
use windows_sys::Win32::System::IO::OVERLAPPED;

use crate::config::OpenFlags;
use crate::error::IoError;
use crate::file::lock::AdvisoryLock;
use crate::file::{File, OutstandingCounter};
use crate::request::Direction;
use crate::stats::Stats;

pub struct WincallFile {
    path: PathBuf,
    file: StdFile,
    queue_id: i32,
    device_id: u32,
    direct: bool,
    // Serializes positional read/write calls against this handle.
    io_lock: Mutex<()>,
    lock_file: Mutex<Option<AdvisoryLock>>,
    outstanding: OutstandingCounter,
}

impl WincallFile {
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
            direct_opts.custom_flags(FILE_FLAG_NO_BUFFERING);
            match direct_opts.open(&path) {
                Ok(f) => (f, true),
                Err(e) if may_fall_back => {
                    tracing::debug!(path = %path.display(), error = %e, "FILE_FLAG_NO_BUFFERING open failed, falling back to buffered I/O");
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
            io_lock: Mutex::new(()),
            lock_file: Mutex::new(None),
            outstanding: OutstandingCounter::new(),
        })
    }

    fn handle(&self) -> HANDLE {
        self.file.as_raw_handle() as HANDLE
    }
}

impl File for WincallFile {
    fn queue_id(&self) -> i32 {
        self.queue_id
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn io_type(&self) -> &'static str {
        "wincall"
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
        let _guard = self.io_lock.lock();

        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        overlapped.Anonymous.Anonymous.Offset = (offset & 0xFFFF_FFFF) as u32;
        overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;

        let mut transferred: u32 = 0;
        let ok = match direction {
            Direction::Write => {
                Stats::get().write_started();
                let ok = WriteFile(
                    self.handle(),
                    buffer,
                    bytes as u32,
                    &mut transferred,
                    &mut overlapped,
                );
                Stats::get().write_finished();
                ok
            }
            Direction::Read => {
                Stats::get().read_started();
                let ok = ReadFile(
                    self.handle(),
                    buffer,
                    bytes as u32,
                    &mut transferred,
                    &mut overlapped,
                );
                Stats::get().read_finished();
                ok
            }
        };

        if ok == 0 {
            let code = GetLastError();
            return Err(IoError::io(
                &self.path,
                std::io::Error::from_raw_os_error(code as i32),
            ));
        }

        let n = transferred as usize;
        match direction {
            Direction::Write => Stats::get().write_bytes(n as u64),
            Direction::Read => {
                if n < bytes {
                    return Err(IoError::Eof { offset, expected: bytes, actual: n });
                }
                Stats::get().read_bytes(n as u64);
            }
        }
        Ok(n)
    }

    fn set_size(&self, bytes: u64) -> Result<(), IoError> {
        self.file.set_len(bytes).map_err(|e| IoError::io(&self.path, e))
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
        self.file.sync_all().map_err(|e| IoError::io(&self.path, e))?;
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
    fn serve_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wincall.bin");
        let file = WincallFile::open(&path, OpenFlags::default(), 0, 0).unwrap();
        file.set_size(4096).unwrap();

        let mut write_buf = vec![0x7Cu8; 4096];
        let mut read_buf = vec![0u8; 4096];
        unsafe {
            file.serve(write_buf.as_mut_ptr(), 0, 4096, Direction::Write).unwrap();
            file.serve(read_buf.as_mut_ptr(), 0, 4096, Direction::Read).unwrap();
        }
        assert_eq!(write_buf, read_buf);
    }
}
