//! foxio-smoke: exercises the engine end-to-end against a temp file using
//! the default (syscall) backend, printing the resulting I/O statistics.
//! Not a server; useful for sanity-checking a build and for manual
//! profiling runs.

use std::env;
use std::sync::Arc;

use foxio::error::Result;
use foxio::{factory, DiskConfig, File, Stats};
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let dir = env::temp_dir().join(format!("foxio-smoke-{}", std::process::id()));
    std::fs::create_dir_all(&dir).map_err(|e| foxio::IoError::io(&dir, e))?;
    let path = dir.join("smoke.bin");

    let config = DiskConfig {
        path: path.clone(),
        io_impl: "syscall".to_string(),
        queue_id: 0,
        device_id: 0,
        unlink_on_open: false,
        ..DiskConfig::default()
    };

    info!(path = %path.display(), "opening backend");
    let file: Arc<dyn File> = factory::create_file_from_config(
        &config,
        foxio::OpenFlags::default(),
        factory::NO_ALLOCATOR,
    )?;

    const BLOCK: usize = 1 << 20;
    file.set_size(BLOCK as u64)?;

    let mut write_buf = vec![0xABu8; BLOCK];
    let mut read_buf = vec![0u8; BLOCK];

    // Safety: both buffers live until the requests below are waited on.
    unsafe {
        let write_req = file.awrite(write_buf.as_mut_ptr(), BLOCK, 0, None)?;
        write_req.wait(true)?;

        let read_req = file.aread(read_buf.as_mut_ptr(), BLOCK, 0, None)?;
        read_req.wait(true)?;
    }

    assert_eq!(write_buf, read_buf, "round-trip mismatch");
    file.close_remove()?;
    std::fs::remove_dir_all(&dir).ok();

    let snapshot = Stats::get().snapshot();
    info!(
        reads = snapshot.reads,
        writes = snapshot.writes,
        bytes_read = snapshot.bytes_read,
        bytes_written = snapshot.bytes_written,
        wait_time_us = Stats::get().wait_time().as_micros() as u64,
        "round-trip complete"
    );

    Ok(())
}
