//! Seekable access to one file's data sectors.
//!
//! `read_at`/`write_at` are stateless; `read`/`write` advance a seek
//! position. Writes stay within the size fixed at create time; partial
//! first and last sectors go through a read-modify-write of the
//! containing sectors.

use machine::disk::SECTOR_SIZE;
use types::{debugf, DiskId};

use crate::fs::header::FileHeader;
use crate::kernel::Kernel;

#[derive(Debug, Clone)]
pub struct OpenFile {
    disk: DiskId,
    hdr: FileHeader,
    hdr_sector: u32,
    pos: u32,
}

impl OpenFile {
    /// Open the file whose header lives at `hdr_sector`.
    pub fn new(k: &Kernel, disk: DiskId, hdr_sector: u32) -> OpenFile {
        OpenFile {
            disk,
            hdr: FileHeader::fetch_from(k, disk, hdr_sector),
            hdr_sector,
            pos: 0,
        }
    }

    pub fn length(&self) -> u32 {
        self.hdr.length()
    }

    pub fn header_sector(&self) -> u32 {
        self.hdr_sector
    }

    pub fn seek(&mut self, position: u32) {
        self.pos = position.min(self.hdr.length());
    }

    pub fn tell(&self) -> u32 {
        self.pos
    }

    /// Read from the seek position, advancing it.
    pub fn read(&mut self, k: &Kernel, into: &mut [u8]) -> usize {
        let n = self.read_at(k, into, self.pos);
        self.pos += n as u32;
        n
    }

    /// Write at the seek position, advancing it.
    pub fn write(&mut self, k: &Kernel, from: &[u8]) -> usize {
        let n = self.write_at(k, from, self.pos);
        self.pos += n as u32;
        n
    }

    /// Read up to `into.len()` bytes starting at `position`. Returns the
    /// bytes actually read, 0 at or past end of file.
    pub fn read_at(&self, k: &Kernel, into: &mut [u8], position: u32) -> usize {
        let file_len = self.hdr.length();
        if position >= file_len || into.is_empty() {
            return 0;
        }
        let num = into.len().min((file_len - position) as usize);
        debugf!('f', "read_at pos {} len {}", position, num);

        let first = position / SECTOR_SIZE as u32;
        let last = (position + num as u32 - 1) / SECTOR_SIZE as u32;
        let mut buf = vec![0u8; ((last - first + 1) as usize) * SECTOR_SIZE];
        for sector in first..=last {
            let off = ((sector - first) as usize) * SECTOR_SIZE;
            k.read_sector(
                self.disk,
                self.hdr.byte_to_sector(sector * SECTOR_SIZE as u32),
                &mut buf[off..off + SECTOR_SIZE],
            );
        }

        let skip = (position % SECTOR_SIZE as u32) as usize;
        into[..num].copy_from_slice(&buf[skip..skip + num]);
        num
    }

    /// Write up to `from.len()` bytes starting at `position`, bounded by
    /// the file's fixed size. Returns the bytes actually written.
    pub fn write_at(&self, k: &Kernel, from: &[u8], position: u32) -> usize {
        let file_len = self.hdr.length();
        if position >= file_len || from.is_empty() {
            return 0;
        }
        let num = from.len().min((file_len - position) as usize);
        debugf!('f', "write_at pos {} len {}", position, num);

        let first = position / SECTOR_SIZE as u32;
        let last = (position + num as u32 - 1) / SECTOR_SIZE as u32;
        let count = (last - first + 1) as usize;
        let mut buf = vec![0u8; count * SECTOR_SIZE];

        // preserve whatever surrounds a partial first or last sector
        let skip = (position % SECTOR_SIZE as u32) as usize;
        let partial_first = skip != 0;
        let partial_last = (position + num as u32) % SECTOR_SIZE as u32 != 0;
        if partial_first {
            k.read_sector(
                self.disk,
                self.hdr.byte_to_sector(first * SECTOR_SIZE as u32),
                &mut buf[..SECTOR_SIZE],
            );
        }
        if partial_last && (count > 1 || !partial_first) {
            let off = (count - 1) * SECTOR_SIZE;
            k.read_sector(
                self.disk,
                self.hdr.byte_to_sector(last * SECTOR_SIZE as u32),
                &mut buf[off..off + SECTOR_SIZE],
            );
        }

        buf[skip..skip + num].copy_from_slice(&from[..num]);
        for sector in first..=last {
            let off = ((sector - first) as usize) * SECTOR_SIZE;
            k.write_sector(
                self.disk,
                self.hdr.byte_to_sector(sector * SECTOR_SIZE as u32),
                &buf[off..off + SECTOR_SIZE],
            );
        }
        num
    }
}
