//! File-system lifecycle scenarios over the formatted disk.

mod common;

use kernel::fs::directory::DIRECTORY_FILE_SIZE;
use kernel::fs::header::MAX_FILE_SIZE;
use machine::disk::{NUM_SECTORS, SECTOR_SIZE};
use types::SysError;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

/// Sectors a file of `size` bytes consumes: its data plus one header.
fn footprint(size: u32) -> u32 {
    size.div_ceil(SECTOR_SIZE as u32) + 1
}

#[test]
fn create_write_reopen_read_remove_reuse() -> anyhow::Result<()> {
    let sim = common::boot();
    let k = &sim.kernel;
    k.mount_fs(true)?;
    let fs = k.fs()?;

    let free_after_format = fs.num_free_sectors(k);

    fs.create(k, "a", 200)?;
    fs.create(k, "b", 200)?;
    assert_eq!(
        fs.num_free_sectors(k),
        free_after_format - 2 * footprint(200)
    );

    // write 200 bytes to "a", close (drop), reopen, read them back
    let data = pattern(200, 3);
    {
        let mut file = fs.open(k, "a").unwrap();
        assert_eq!(file.write(k, &data), 200);
    }
    {
        let mut file = fs.open(k, "a").unwrap();
        let mut back = vec![0u8; 200];
        assert_eq!(file.read(k, &mut back), 200);
        assert_eq!(back, data);
    }

    // removing "a" returns every sector it held
    fs.remove(k, "a").unwrap();
    assert_eq!(fs.num_free_sectors(k), free_after_format - footprint(200));
    assert_eq!(fs.open(k, "a").unwrap_err(), SysError::NotFound);

    // the freed sectors are reusable for a bigger file
    fs.create(k, "a", 400).unwrap();
    assert_eq!(
        fs.num_free_sectors(k),
        free_after_format - footprint(200) - footprint(400)
    );
    assert_eq!(fs.open(k, "a").unwrap().length(), 400);
    k.assert_consistent();
    Ok(())
}

#[test]
fn bitmap_accounting_is_conserved() {
    let sim = common::boot();
    let k = &sim.kernel;
    k.mount_fs(true).unwrap();
    let fs = k.fs().unwrap();

    let fixed = NUM_SECTORS - fs.num_free_sectors(k);

    let sizes = [0u32, 1, 128, 129, 1000, MAX_FILE_SIZE];
    for (i, &size) in sizes.iter().enumerate() {
        fs.create(k, &format!("f{i}"), size).unwrap();
    }
    let used: u32 = sizes.iter().map(|&s| footprint(s)).sum();
    assert_eq!(fs.num_free_sectors(k), NUM_SECTORS - fixed - used);

    for i in 0..sizes.len() {
        fs.remove(k, &format!("f{i}")).unwrap();
    }
    assert_eq!(fs.num_free_sectors(k), NUM_SECTORS - fixed);
}

#[test]
fn partial_sector_writes_read_modify_write() {
    let sim = common::boot();
    let k = &sim.kernel;
    k.mount_fs(true).unwrap();
    let fs = k.fs().unwrap();

    fs.create(k, "f", 600).unwrap();
    let file = fs.open(k, "f").unwrap();

    let base = pattern(600, 1);
    assert_eq!(file.write_at(k, &base, 0), 600);

    // an unaligned splice in the middle leaves both neighbors intact
    let splice = pattern(100, 200);
    assert_eq!(file.write_at(k, &splice, 250), 100);

    let mut expect = base.clone();
    expect[250..350].copy_from_slice(&splice);
    let mut back = vec![0u8; 600];
    assert_eq!(file.read_at(k, &mut back, 0), 600);
    assert_eq!(back, expect);

    // reads and writes stop at the fixed end of file
    let mut tail = vec![0u8; 100];
    assert_eq!(file.read_at(k, &mut tail, 550), 50);
    assert_eq!(&tail[..50], &expect[550..]);
    assert_eq!(file.write_at(k, &splice, 550), 50);
    assert_eq!(file.read_at(k, &mut tail, 600), 0);
    assert_eq!(file.write_at(k, &splice, 600), 0);
}

#[test]
fn create_errors() {
    let sim = common::boot();
    let k = &sim.kernel;
    k.mount_fs(true).unwrap();
    let fs = k.fs().unwrap();

    fs.create(k, "dup", 10).unwrap();
    assert_eq!(fs.create(k, "dup", 10), Err(SysError::AlreadyExists));
    assert_eq!(
        fs.create(k, "huge", MAX_FILE_SIZE + 1),
        Err(SysError::InvalidArgument)
    );
    assert_eq!(fs.open(k, "missing").unwrap_err(), SysError::NotFound);
    assert_eq!(fs.remove(k, "missing").unwrap_err(), SysError::NotFound);

    // the failed creates must not have leaked sectors
    let free = fs.num_free_sectors(k);
    assert_eq!(fs.create(k, "dup", 10), Err(SysError::AlreadyExists));
    assert_eq!(fs.num_free_sectors(k), free);
}

#[test]
fn directories_one_level() {
    let sim = common::boot();
    let k = &sim.kernel;
    k.mount_fs(true).unwrap();
    let fs = k.fs().unwrap();

    fs.mkdir(k, "d").unwrap();
    fs.create(k, "d/inner", 100).unwrap();
    fs.create(k, "top", 100).unwrap();

    // the root sees "d" and "top"; "inner" lives inside "d"
    let names = fs.root_names(k);
    assert!(names.contains(&"d".to_string()));
    assert!(names.contains(&"top".to_string()));
    assert!(!names.contains(&"inner".to_string()));

    let data = pattern(100, 9);
    let file = fs.open(k, "d/inner").unwrap();
    file.write_at(k, &data, 0);
    let mut back = vec![0u8; 100];
    fs.open(k, "d/inner").unwrap().read_at(k, &mut back, 0);
    assert_eq!(back, data);

    // a populated directory cannot be removed
    assert_eq!(fs.rmdir(k, "d"), Err(SysError::NotEmpty));
    fs.remove(k, "d/inner").unwrap();
    fs.rmdir(k, "d").unwrap();
    assert_eq!(fs.open(k, "d/inner").unwrap_err(), SysError::NotFound);

    // nesting stops at one level
    assert_eq!(fs.mkdir(k, "d/e"), Err(SysError::InvalidArgument));
    assert_eq!(fs.create(k, "a/b/c", 10), Err(SysError::InvalidArgument));
}

#[test]
fn format_survives_remount() {
    let sim = common::boot();
    let k = &sim.kernel;
    k.mount_fs(true).unwrap();
    let fs = k.fs().unwrap();

    fs.create(k, "keep", 300).unwrap();
    let data = pattern(300, 5);
    fs.open(k, "keep").unwrap().write_at(k, &data, 0);

    // a second FileSystem value over the same disk (no format) sees the
    // same directory and data
    let fs2 = kernel::FileSystem::new(k, types::FS_DISK, false).unwrap();
    let mut back = vec![0u8; 300];
    fs2.open(k, "keep").unwrap().read_at(k, &mut back, 0);
    assert_eq!(back, data);
    assert_eq!(fs2.num_free_sectors(k), fs.num_free_sectors(k));
}

#[test]
fn directory_file_size_matches_layout() {
    // the root directory's on-disk size is part of the format contract
    assert_eq!(DIRECTORY_FILE_SIZE, 890);
}
