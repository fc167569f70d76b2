// End-to-end exercises of the block-I/O engine: submission through a
// factory-constructed backend, down through its queue, to completion.
// Sizes are scaled down from the scenario seeds (MiB-sized blocks) to
// keep the suite fast; the assertions are unchanged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use foxio::{cancel_all, factory, wait_all, DirectMode, DiskConfig, File, OpenFlags, Stats};
use tempfile::tempdir;

fn next_queue_id() -> i32 {
    static NEXT: AtomicUsize = AtomicUsize::new(10_000);
    NEXT.fetch_add(1, Ordering::SeqCst) as i32
}

fn open_syscall(dir: &std::path::Path, name: &str) -> Arc<dyn File> {
    let config = DiskConfig {
        path: dir.join(name),
        io_impl: "syscall".to_string(),
        queue_id: next_queue_id(),
        device_id: 0,
        direct: DirectMode::Off,
        unlink_on_open: false,
    };
    factory::create_file_from_config(&config, OpenFlags::default(), factory::NO_ALLOCATOR).unwrap()
}

#[test]
fn write_read_round_trip_across_many_blocks() {
    let dir = tempdir().unwrap();
    let file = open_syscall(dir.path(), "roundtrip.bin");

    const BLOCK: usize = 64 * 1024;
    const BLOCKS: usize = 16;
    file.set_size((BLOCK * BLOCKS) as u64).unwrap();

    let mut write_bufs: Vec<Vec<u8>> = (0..BLOCKS).map(|_| vec![0u8; BLOCK]).collect();
    let mut writes = Vec::new();
    for (i, buf) in write_bufs.iter_mut().enumerate() {
        let req = unsafe { file.awrite(buf.as_mut_ptr(), BLOCK, (i * BLOCK) as u64, None).unwrap() };
        writes.push(req);
    }
    wait_all(&writes).unwrap();

    for i in 0..BLOCKS {
        let mut read_buf = vec![0xFFu8; BLOCK];
        let req = unsafe { file.aread(read_buf.as_mut_ptr(), BLOCK, (i * BLOCK) as u64, None).unwrap() };
        req.wait(false).unwrap();
        assert!(read_buf.iter().all(|&b| b == 0), "block {i} was not all-zero");
    }
}

#[test]
fn cancel_half_of_submitted_requests() {
    let dir = tempdir().unwrap();
    let file = open_syscall(dir.path(), "cancel.bin");

    const BLOCK: usize = 4096;
    const COUNT: usize = 16;
    file.set_size((BLOCK * COUNT) as u64).unwrap();

    let succeeded = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let mut bufs: Vec<Vec<u8>> = (0..COUNT).map(|_| vec![0u8; BLOCK]).collect();
    let mut reqs = Vec::new();
    for (i, buf) in bufs.iter_mut().enumerate() {
        let ok = succeeded.clone();
        let err = failed.clone();
        let req = unsafe {
            file.awrite(
                buf.as_mut_ptr(),
                BLOCK,
                (i * BLOCK) as u64,
                Some(Box::new(move |_r, success| {
                    if success {
                        ok.fetch_add(1, Ordering::SeqCst);
                    } else {
                        err.fetch_add(1, Ordering::SeqCst);
                    }
                })),
            )
            .unwrap()
        };
        reqs.push(req);
    }

    let k = cancel_all(&reqs[0..8]);
    assert!(k <= 8);

    for (offset, req) in reqs.iter().enumerate().skip(8) {
        if offset % 2 == 1 {
            req.cancel();
        }
    }

    wait_all(&reqs).ok();

    let canceled_count = reqs.iter().filter(|r| r.was_canceled()).count();
    assert_eq!(failed.load(Ordering::SeqCst), canceled_count);
    assert_eq!(succeeded.load(Ordering::SeqCst) + failed.load(Ordering::SeqCst), COUNT);
}

#[test]
fn direct_mode_rejects_unaligned_offset() {
    let dir = tempdir().unwrap();
    let config = DiskConfig {
        path: dir.path().join("direct.bin"),
        io_impl: "syscall".to_string(),
        queue_id: next_queue_id(),
        device_id: 0,
        direct: DirectMode::TryThenOff,
        unlink_on_open: false,
    };
    let file = factory::create_file_from_config(&config, OpenFlags::default(), factory::NO_ALLOCATOR).unwrap();
    file.set_size(1 << 20).unwrap();

    if !file.direct_mode() {
        // Direct mode unavailable on this filesystem (e.g. tmpfs); the
        // TRY_DIRECT fallback is itself the behavior under test elsewhere.
        return;
    }

    let align = file.alignment();
    let mut misaligned = vec![0u8; align as usize];
    let result = unsafe { file.awrite(misaligned.as_mut_ptr(), align as usize, 1, None) };
    assert!(result.is_err());

    let mut aligned = vec![0u8; align as usize];
    let req = unsafe { file.awrite(aligned.as_mut_ptr(), align as usize, 0, None).unwrap() };
    req.wait(false).unwrap();
}

#[test]
#[cfg(feature = "fileperblock")]
fn fileperblock_discard_removes_middle_block() {
    use foxio::file::fileperblock::{DiscardPolicy, FilePerBlockFile, InnerKind};
    use foxio::queue::single_fifo::SingleFifoQueue;
    use foxio::registry::Registry;

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("disk0");
    let queue_id = next_queue_id();
    Registry::get().add_queue(queue_id, SingleFifoQueue::new(queue_id));

    let fpb = Arc::new(FilePerBlockFile::new(
        &prefix,
        OpenFlags::default(),
        queue_id,
        0,
        InnerKind::Syscall,
        DiscardPolicy::Delete,
    ));
    let file: Arc<dyn File> = fpb.clone();

    const MIB: u64 = 1 << 20;
    let offsets = [0u64, MIB, 2 * MIB];
    for &offset in &offsets {
        let mut buf = vec![0x5u8; 4096];
        let req = unsafe { file.awrite(buf.as_mut_ptr(), 4096, offset, None).unwrap() };
        req.wait(false).unwrap();
    }

    for &offset in &offsets {
        assert!(fpb.filename_for_block(offset).exists());
    }

    fpb.discard(MIB, MIB).unwrap();
    assert!(!fpb.filename_for_block(MIB).exists());
    assert!(fpb.filename_for_block(0).exists());
    assert!(fpb.filename_for_block(2 * MIB).exists());
}

#[test]
fn stats_accounting_matches_submitted_reads() {
    let dir = tempdir().unwrap();
    let file = open_syscall(dir.path(), "stats.bin");

    const BLOCK: usize = 64 * 1024;
    const COUNT: usize = 20;
    file.set_size((BLOCK * COUNT) as u64).unwrap();

    let mut seed_bufs: Vec<Vec<u8>> = (0..COUNT).map(|_| vec![0x7u8; BLOCK]).collect();
    let mut seeds = Vec::new();
    for (i, buf) in seed_bufs.iter_mut().enumerate() {
        seeds.push(unsafe { file.awrite(buf.as_mut_ptr(), BLOCK, (i * BLOCK) as u64, None).unwrap() });
    }
    wait_all(&seeds).unwrap();

    let before = Stats::get().snapshot();

    let mut read_bufs: Vec<Vec<u8>> = (0..COUNT).map(|_| vec![0u8; BLOCK]).collect();
    let mut reads = Vec::new();
    for (i, buf) in read_bufs.iter_mut().enumerate() {
        reads.push(unsafe { file.aread(buf.as_mut_ptr(), BLOCK, (i * BLOCK) as u64, None).unwrap() });
    }
    wait_all(&reads).unwrap();

    let after = Stats::get().snapshot();
    let delta = after - before;

    assert_eq!(delta.reads, COUNT as u64);
    assert_eq!(delta.bytes_read, (BLOCK * COUNT) as u64);
    assert!(delta.serial_read_time >= delta.parallel_read_time);
}

#[test]
fn shutdown_joins_worker_with_no_requests_left_in_flight() {
    let dir = tempdir().unwrap();
    let queue_id = next_queue_id();
    {
        let config = DiskConfig {
            path: dir.path().join("shutdown.bin"),
            io_impl: "syscall".to_string(),
            queue_id,
            device_id: 0,
            direct: DirectMode::Off,
            unlink_on_open: false,
        };
        let file = factory::create_file_from_config(&config, OpenFlags::default(), factory::NO_ALLOCATOR).unwrap();
        file.set_size(1000 * 64).unwrap();

        let mut bufs: Vec<Vec<u8>> = (0..1000).map(|_| vec![0u8; 64]).collect();
        let mut reqs = Vec::new();
        for (i, buf) in bufs.iter_mut().enumerate() {
            reqs.push(unsafe { file.awrite(buf.as_mut_ptr(), 64, (i * 64) as u64, None).unwrap() });
        }
        wait_all(&reqs).unwrap();
        file.close_remove().unwrap();
    }
    // close_remove() having returned means outstanding hit zero with all
    // 1,000 requests accounted for; a leaked worker or a request stuck in
    // OP would have hung wait_all or close_remove above instead.
}

#[test]
fn cancel_against_empty_queue_returns_false_not_panic() {
    let dir = tempdir().unwrap();
    let file = open_syscall(dir.path(), "empty.bin");
    file.set_size(4096).unwrap();

    let mut buf = vec![0u8; 4096];
    let req = unsafe { file.awrite(buf.as_mut_ptr(), 4096, 0, None).unwrap() };
    req.wait(false).unwrap();

    // The request already completed; cancel must fail closed, not panic.
    assert!(!req.cancel());
    assert_eq!(cancel_all(&[]), 0);
}

#[test]
#[cfg(feature = "memory")]
fn memory_backend_round_trips_without_touching_the_filesystem() {
    let config = DiskConfig {
        path: "unused".into(),
        io_impl: "memory".to_string(),
        queue_id: next_queue_id(),
        device_id: 0,
        direct: DirectMode::Off,
        unlink_on_open: false,
    };
    let file = factory::create_file_from_config(&config, OpenFlags::default(), factory::NO_ALLOCATOR).unwrap();

    let mut write_buf = vec![0x99u8; 8192];
    let mut read_buf = vec![0u8; 8192];
    unsafe {
        let w = file.awrite(write_buf.as_mut_ptr(), 8192, 0, None).unwrap();
        w.wait(false).unwrap();
        let r = file.aread(read_buf.as_mut_ptr(), 8192, 0, None).unwrap();
        r.wait(false).unwrap();
    }
    assert_eq!(write_buf, read_buf);
}
