//! Synchronous disk driver scenarios: interleaved traffic from two
//! threads with the one-outstanding-request invariant observed at every
//! issue point.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use machine::disk::SECTOR_SIZE;
use types::{FS_DISK, SWAP_DISK};

fn sector_pattern(sector: u32) -> Vec<u8> {
    (0..SECTOR_SIZE)
        .map(|i| (sector as usize * 31 + i) as u8)
        .collect()
}

#[test]
fn single_thread_write_read() {
    let sim = common::boot();
    let k = &sim.kernel;

    let data = sector_pattern(9);
    assert!(k.disk_idle(FS_DISK));
    k.write_sector(FS_DISK, 9, &data);
    assert!(k.disk_idle(FS_DISK));

    let mut back = vec![0u8; SECTOR_SIZE];
    k.read_sector(FS_DISK, 9, &mut back);
    assert_eq!(back, data);
}

#[test]
fn two_threads_hundred_writes_each() {
    let sim = common::boot();
    let k = &sim.kernel;

    // the device itself asserts it is idle at every request-issue
    // point, so an ordering violation aborts the test; here we only
    // check the data
    let mismatches = Arc::new(AtomicUsize::new(0));
    let spawn = |name: &str, base: u32| {
        let errors = mismatches.clone();
        sim.kernel.fork(name, move |k| {
            for i in 0..100u32 {
                let sector = base + i;
                k.write_sector(FS_DISK, sector, &sector_pattern(sector));
            }
            for i in 0..100u32 {
                let sector = base + i;
                let mut back = vec![0u8; SECTOR_SIZE];
                k.read_sector(FS_DISK, sector, &mut back);
                if back != sector_pattern(sector) {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
    };

    let a = spawn("writer a", 100);
    let b = spawn("writer b", 700);
    k.join(a).unwrap();
    k.join(b).unwrap();

    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    assert!(k.disk_idle(FS_DISK));
    let stats = k.statistics();
    assert_eq!(stats.num_disk_writes, 200);
    assert_eq!(stats.num_disk_reads, 200);
    k.assert_consistent();
}

#[test]
fn disks_are_independent() {
    let sim = common::boot();
    let k = &sim.kernel;

    k.write_sector(FS_DISK, 5, &sector_pattern(5));
    k.write_sector(SWAP_DISK, 5, &sector_pattern(77));

    let mut fs_back = vec![0u8; SECTOR_SIZE];
    let mut swap_back = vec![0u8; SECTOR_SIZE];
    k.read_sector(FS_DISK, 5, &mut fs_back);
    k.read_sector(SWAP_DISK, 5, &mut swap_back);
    assert_eq!(fs_back, sector_pattern(5));
    assert_eq!(swap_back, sector_pattern(77));
}

#[test]
fn fresh_sectors_read_zero() {
    let sim = common::boot();
    let k = &sim.kernel;
    let mut back = vec![0xaau8; SECTOR_SIZE];
    k.read_sector(FS_DISK, 1234, &mut back);
    assert!(back.iter().all(|&b| b == 0));
}
