//! Memory-mapped backend: each request maps the exact byte range it
//! touches, copies in or out, and unmaps. Grounded in behavior on §4.4 of
//! the block-I/O contract and enriched from the pack with `memmap2`, the
//! crate another example repository in this corpus already uses for
//! mmap-backed storage.

use std::fs::{File as StdFile, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::config::OpenFlags;
use crate::error::IoError;
use crate::file::lock::AdvisoryLock;
use crate::file::{File, OutstandingCounter};
use crate::request::Direction;
use crate::stats::Stats;

pub struct MmapFile {
    path: PathBuf,
    file: StdFile,
    queue_id: i32,
    device_id: u32,
    lock_file: Mutex<Option<AdvisoryLock>>,
    outstanding: OutstandingCounter,
}

fn page_size() -> u64 {
    #[cfg(unix)]
    {
        // Safety: sysconf with _SC_PAGESIZE is always safe to call.
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 }
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

impl MmapFile {
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
        let file = opts.open(&path).map_err(|e| IoError::io(&path, e))?;

        Ok(Self {
            path,
            file,
            queue_id,
            device_id,
            lock_file: Mutex::new(None),
            outstanding: OutstandingCounter::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn unlink(&self) -> Result<(), IoError> {
        std::fs::remove_file(&self.path).map_err(|e| IoError::io(&self.path, e))
    }

    /// Maps exactly the page-aligned region covering `[offset, offset +
    /// bytes)`. A failed map carries the platform error number and the
    /// offset's remainder modulo the page size in the message, as required
    /// by the contract.
    fn map_range(&self, offset: u64, bytes: usize) -> Result<(MmapMut, usize), IoError> {
        let page = page_size();
        let aligned_offset = offset - (offset % page);
        let pad = (offset - aligned_offset) as usize;
        let map_len = pad + bytes;

        // Safety: the file descriptor is valid for the duration of the
        // mapping, and no other mapping of this same range is concurrently
        // held by this process (the worker thread serializes per-request
        // access to a given file through the request queue).
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .offset(aligned_offset)
                .len(map_len)
                .map_mut(&self.file)
        }
        .map_err(|e| {
            IoError::io(
                &self.path,
                std::io::Error::new(
                    e.kind(),
                    format!("mmap failed at offset {offset} (offset mod page size = {})", offset % page),
                ),
            )
        })?;

        Ok((mmap, pad))
    }
}

impl File for MmapFile {
    fn queue_id(&self) -> i32 {
        self.queue_id
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn io_type(&self) -> &'static str {
        "mmap"
    }

    unsafe fn serve(
        &self,
        buffer: *mut u8,
        offset: u64,
        bytes: usize,
        direction: Direction,
    ) -> Result<usize, IoError> {
        let slice = std::slice::from_raw_parts_mut(buffer, bytes);
        let (mut mapping, pad) = self.map_range(offset, bytes)?;

        match direction {
            Direction::Write => {
                Stats::get().write_started();
                mapping[pad..pad + bytes].copy_from_slice(slice);
                let result = mapping.flush();
                Stats::get().write_finished();
                result.map_err(|e| IoError::io(&self.path, e))?;
                Stats::get().write_bytes(bytes as u64);
            }
            Direction::Read => {
                Stats::get().read_started();
                slice.copy_from_slice(&mapping[pad..pad + bytes]);
                Stats::get().read_finished();
                Stats::get().read_bytes(bytes as u64);
            }
        }
        Ok(bytes)
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mapped.bin");
        let file = MmapFile::open(&path, OpenFlags::default(), 0, 0).unwrap();
        file.set_size(8192).unwrap();

        let mut write_buf = vec![0x7Eu8; 4096];
        let mut read_buf = vec![0u8; 4096];
        unsafe {
            file.serve(write_buf.as_mut_ptr(), 4096, 4096, Direction::Write).unwrap();
            file.serve(read_buf.as_mut_ptr(), 4096, 4096, Direction::Read).unwrap();
        }
        assert_eq!(write_buf, read_buf);
        file.close_remove().unwrap();
    }
}
