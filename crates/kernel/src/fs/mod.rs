//! The file system: a free-sector bitmap and directories layered over
//! the synchronous disk driver.
//!
//! Bootstrap layout: sector 0 holds the free map's file header, sector 1
//! the root directory's. Both structures are themselves files, which is
//! what makes formatting slightly delicate: their headers are written
//! with sectors claimed from the very map being created.
//!
//! Directories nest exactly one level: a path is either `"name"` in the
//! root or `"dir/name"`. Callers provide mutual exclusion; internally
//! every sector access is serialized by the disk driver.

pub mod bitmap;
pub mod directory;
pub mod header;
pub mod openfile;

use machine::disk::NUM_SECTORS;
use types::{debugf, DiskId, SysError, SysResult};

use crate::kernel::Kernel;
use self::bitmap::BitMap;
use self::directory::{Directory, DIRECTORY_FILE_SIZE, NUM_DIR_ENTRIES};
use self::header::FileHeader;
use self::openfile::OpenFile;

/// Fixed home of the free map's file header.
pub const FREE_MAP_SECTOR: u32 = 0;
/// Fixed home of the root directory's file header.
pub const DIRECTORY_SECTOR: u32 = 1;
/// On-disk size of the free map file: one bit per sector.
pub const FREE_MAP_FILE_SIZE: u32 = NUM_SECTORS / 8;

pub struct FileSystem {
    disk: DiskId,
}

impl FileSystem {
    /// Attach to (or, with `format`, initialize) the file system on
    /// `disk`. Must run after the disk driver exists.
    pub fn new(k: &Kernel, disk: DiskId, format: bool) -> SysResult<FileSystem> {
        let fs = FileSystem { disk };
        if format {
            debugf!('f', "formatting the disk");
            let mut free_map = BitMap::new(NUM_SECTORS);
            free_map.mark(FREE_MAP_SECTOR);
            free_map.mark(DIRECTORY_SECTOR);

            let mut map_hdr = FileHeader::new();
            map_hdr.allocate(&mut free_map, FREE_MAP_FILE_SIZE)?;
            let mut dir_hdr = FileHeader::new();
            dir_hdr.allocate(&mut free_map, DIRECTORY_FILE_SIZE)?;

            map_hdr.write_back(k, disk, FREE_MAP_SECTOR);
            dir_hdr.write_back(k, disk, DIRECTORY_SECTOR);

            free_map.write_back(k, &fs.free_map_file(k));
            Directory::new(NUM_DIR_ENTRIES).write_back(k, &fs.directory_file(k));
        }
        Ok(fs)
    }

    fn free_map_file(&self, k: &Kernel) -> OpenFile {
        OpenFile::new(k, self.disk, FREE_MAP_SECTOR)
    }

    fn directory_file(&self, k: &Kernel) -> OpenFile {
        OpenFile::new(k, self.disk, DIRECTORY_SECTOR)
    }

    /// Resolve `path` to the file holding its containing directory plus
    /// the leaf name. At most one directory level deep.
    fn find_dir(&self, k: &Kernel, path: &str) -> SysResult<(OpenFile, String)> {
        let mut parts = path.split('/');
        let first = parts.next().unwrap_or("");
        match (first, parts.next(), parts.next()) {
            ("", _, _) => Err(SysError::InvalidArgument),
            (leaf, None, _) => Ok((self.directory_file(k), leaf.to_string())),
            (_, Some(""), _) => Err(SysError::InvalidArgument),
            (dir_name, Some(leaf), None) => {
                let root = Directory::fetch_from(k, &self.directory_file(k));
                let sector = root.find(dir_name).ok_or(SysError::NotFound)?;
                Ok((OpenFile::new(k, self.disk, sector), leaf.to_string()))
            }
            _ => Err(SysError::InvalidArgument), // deeper nesting unsupported
        }
    }

    /// Create a `name` of `initial_size` bytes: claim a header sector
    /// and the data sectors, then publish the directory entry. The size
    /// is fixed for the life of the file.
    pub fn create(&self, k: &Kernel, name: &str, initial_size: u32) -> SysResult<()> {
        debugf!('f', "create \"{}\", {} bytes", name, initial_size);
        let (dir_file, leaf) = self.find_dir(k, name)?;
        let mut directory = Directory::fetch_from(k, &dir_file);
        if directory.find(&leaf).is_some() {
            return Err(SysError::AlreadyExists);
        }

        let map_file = self.free_map_file(k);
        let mut free_map = BitMap::fetch_from(k, &map_file, NUM_SECTORS);
        let hdr_sector = free_map.find().ok_or(SysError::OutOfSpace)?;
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, initial_size)?;
        directory.add(&leaf, hdr_sector)?;

        // everything claimed; now make it durable
        hdr.write_back(k, self.disk, hdr_sector);
        directory.write_back(k, &dir_file);
        free_map.write_back(k, &map_file);
        Ok(())
    }

    /// Open `name` for reading and writing.
    pub fn open(&self, k: &Kernel, name: &str) -> SysResult<OpenFile> {
        debugf!('f', "open \"{}\"", name);
        let (dir_file, leaf) = self.find_dir(k, name)?;
        let directory = Directory::fetch_from(k, &dir_file);
        let sector = directory.find(&leaf).ok_or(SysError::NotFound)?;
        Ok(OpenFile::new(k, self.disk, sector))
    }

    /// Delete `name`: give its data and header sectors back and drop the
    /// directory entry.
    pub fn remove(&self, k: &Kernel, name: &str) -> SysResult<()> {
        debugf!('f', "remove \"{}\"", name);
        let (dir_file, leaf) = self.find_dir(k, name)?;
        let mut directory = Directory::fetch_from(k, &dir_file);
        let sector = directory.find(&leaf).ok_or(SysError::NotFound)?;

        let hdr = FileHeader::fetch_from(k, self.disk, sector);
        let map_file = self.free_map_file(k);
        let mut free_map = BitMap::fetch_from(k, &map_file, NUM_SECTORS);
        hdr.deallocate(&mut free_map);
        free_map.clear(sector);
        directory.remove(&leaf)?;

        free_map.write_back(k, &map_file);
        directory.write_back(k, &dir_file);
        Ok(())
    }

    /// Create an empty directory called `name` in the root. Directories
    /// nest only one level, so the name may not contain a separator.
    pub fn mkdir(&self, k: &Kernel, name: &str) -> SysResult<()> {
        debugf!('f', "mkdir \"{}\"", name);
        if name.contains('/') {
            return Err(SysError::InvalidArgument);
        }
        self.create(k, name, DIRECTORY_FILE_SIZE)?;
        let dir_file = self.open(k, name)?;
        Directory::new(NUM_DIR_ENTRIES).write_back(k, &dir_file);
        Ok(())
    }

    /// Remove the directory `name`; it must be empty.
    pub fn rmdir(&self, k: &Kernel, name: &str) -> SysResult<()> {
        debugf!('f', "rmdir \"{}\"", name);
        let dir_file = self.open(k, name)?;
        if !Directory::fetch_from(k, &dir_file).is_empty() {
            return Err(SysError::NotEmpty);
        }
        self.remove(k, name)
    }

    /// Print the names of everything in the root directory.
    pub fn list(&self, k: &Kernel) {
        Directory::fetch_from(k, &self.directory_file(k)).list();
    }

    /// Verbose dump of the root directory and allocation state.
    pub fn print(&self, k: &Kernel) {
        let free_map = BitMap::fetch_from(k, &self.free_map_file(k), NUM_SECTORS);
        println!("Free sectors: {}", free_map.num_clear());
        Directory::fetch_from(k, &self.directory_file(k)).print();
    }

    /// How many sectors are unallocated (diagnostic).
    pub fn num_free_sectors(&self, k: &Kernel) -> u32 {
        BitMap::fetch_from(k, &self.free_map_file(k), NUM_SECTORS).num_clear()
    }

    /// Names in the root directory (diagnostic).
    pub fn root_names(&self, k: &Kernel) -> Vec<String> {
        Directory::fetch_from(k, &self.directory_file(k)).names()
    }
}
