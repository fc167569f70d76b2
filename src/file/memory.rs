//! In-process byte-arena backend, used for tests and small configurations.
//! No on-disk footprint, no advisory lock.

use parking_lot::Mutex;

use crate::error::IoError;
use crate::file::{File, OutstandingCounter};
use crate::request::Direction;
use crate::stats::Stats;

pub struct MemoryFile {
    data: Mutex<Vec<u8>>,
    queue_id: i32,
    device_id: u32,
    outstanding: OutstandingCounter,
}

impl MemoryFile {
    pub fn new(queue_id: i32, device_id: u32) -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            queue_id,
            device_id,
            outstanding: OutstandingCounter::new(),
        }
    }
}

impl File for MemoryFile {
    fn queue_id(&self) -> i32 {
        self.queue_id
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn io_type(&self) -> &'static str {
        "memory"
    }

    unsafe fn serve(
        &self,
        buffer: *mut u8,
        offset: u64,
        bytes: usize,
        direction: Direction,
    ) -> Result<usize, IoError> {
        let slice = std::slice::from_raw_parts_mut(buffer, bytes);
        let mut data = self.data.lock();
        let offset = offset as usize;
        match direction {
            Direction::Write => {
                Stats::get().write_started();
                if data.len() < offset + bytes {
                    data.resize(offset + bytes, 0);
                }
                data[offset..offset + bytes].copy_from_slice(slice);
                Stats::get().write_bytes(bytes as u64);
                Stats::get().write_finished();
            }
            Direction::Read => {
                Stats::get().read_started();
                if offset + bytes > data.len() {
                    Stats::get().read_finished();
                    return Err(IoError::Eof {
                        offset: offset as u64,
                        expected: bytes,
                        actual: data.len().saturating_sub(offset),
                    });
                }
                slice.copy_from_slice(&data[offset..offset + bytes]);
                Stats::get().read_bytes(bytes as u64);
                Stats::get().read_finished();
            }
        }
        Ok(bytes)
    }

    fn set_size(&self, bytes: u64) -> Result<(), IoError> {
        self.data.lock().resize(bytes as usize, 0);
        Ok(())
    }

    fn lock_file(&self) -> Result<(), IoError> {
        Ok(())
    }

    fn close_remove(&self) -> Result<(), IoError> {
        self.outstanding.wait_for_zero();
        self.data.lock().clear();
        Ok(())
    }

    fn outstanding(&self) -> &OutstandingCounter {
        &self.outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let file = MemoryFile::new(0, 0);
        let mut write_buf = vec![0xABu8; 64];
        let mut read_buf = vec![0u8; 64];
        unsafe {
            file.serve(write_buf.as_mut_ptr(), 0, 64, Direction::Write).unwrap();
            file.serve(read_buf.as_mut_ptr(), 0, 64, Direction::Read).unwrap();
        }
        assert_eq!(write_buf, read_buf);
    }

    #[test]
    fn read_past_end_is_eof() {
        let file = MemoryFile::new(0, 0);
        let mut buf = vec![0u8; 16];
        let result = unsafe { file.serve(buf.as_mut_ptr(), 0, 16, Direction::Read) };
        assert!(matches!(result, Err(IoError::Eof { .. })));
    }
}
