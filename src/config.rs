//! Disk configuration input struct.
//!
//! Deliberately dumb: no file or environment parsing happens in this
//! crate (an explicit Non-goal) — the surrounding application is expected
//! to populate `DiskConfig` from whatever config layer it already has and
//! hand it to [`crate::factory::create_file_from_config`].

use std::path::PathBuf;

use bitflags::bitflags;

bitflags! {
    /// Open-mode flags recognized by the file factory and backends.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const CREAT          = 0b0000_0000_0001;
        const RDONLY         = 0b0000_0000_0010;
        const WRONLY         = 0b0000_0000_0100;
        const RDWR           = 0b0000_0000_1000;
        const TRUNC          = 0b0000_0001_0000;
        const DIRECT         = 0b0000_0010_0000;
        const TRY_DIRECT     = 0b0000_0100_0000;
        const NO_LOCK        = 0b0000_1000_0000;
        const SYNC           = 0b0001_0000_0000;
        const REQUIRE_DIRECT = 0b0010_0000_0000;
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::RDWR | OpenFlags::CREAT
    }
}

/// Whether a file backend should bypass the OS page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectMode {
    Off,
    On,
    /// Attempt direct mode first, fall back to buffered on failure.
    TryThenOff,
}

impl DirectMode {
    /// Folds this setting into `flags`, the way the factory does before
    /// constructing a backend.
    pub fn apply(self, flags: OpenFlags) -> OpenFlags {
        match self {
            DirectMode::Off => flags & !OpenFlags::DIRECT,
            DirectMode::On => flags | OpenFlags::DIRECT,
            DirectMode::TryThenOff => flags | OpenFlags::DIRECT | OpenFlags::TRY_DIRECT,
        }
    }
}

/// Disk configuration: everything the file factory needs to construct a
/// backend, assembled by the caller from its own config layer.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    pub path: PathBuf,
    pub io_impl: String,
    pub queue_id: i32,
    pub device_id: u32,
    pub direct: DirectMode,
    pub unlink_on_open: bool,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("storage.dat"),
            io_impl: "syscall".to_string(),
            queue_id: 0,
            device_id: 0,
            direct: DirectMode::Off,
            unlink_on_open: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_mode_folds_into_flags() {
        let flags = OpenFlags::RDWR;
        assert!(DirectMode::On.apply(flags).contains(OpenFlags::DIRECT));
        assert!(!DirectMode::Off.apply(flags | OpenFlags::DIRECT).contains(OpenFlags::DIRECT));
        let tried = DirectMode::TryThenOff.apply(flags);
        assert!(tried.contains(OpenFlags::DIRECT));
        assert!(tried.contains(OpenFlags::TRY_DIRECT));
    }
}
