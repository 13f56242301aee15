//! A sector-addressed disk with simulated mechanics.
//!
//! Requests return immediately; the data moves to or from the backing
//! host file right away and a [`IntHandler::DiskDone`] completion is
//! scheduled for when the mechanical latency has elapsed. Only one
//! request may be outstanding.
//!
//! The latency model charges a per-track seek, the rotational delay to
//! reach the target sector, and one sector of transfer time. A track
//! buffer fills as the head passes over a track, so a read that arrives
//! after its sector has already streamed past costs only the transfer
//! time.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use types::{debugf, DiskId, SimTime, ROTATION_TIME, SEEK_TIME};

use crate::interrupt::{IntHandler, Interrupt};

pub const SECTORS_PER_TRACK: u32 = 32;
pub const NUM_TRACKS: u32 = 64;
pub const NUM_SECTORS: u32 = SECTORS_PER_TRACK * NUM_TRACKS;
/// Bytes per sector; also the size of a serialized file header.
pub const SECTOR_SIZE: usize = 128;

pub struct DiskDevice {
    which: DiskId,
    file: File,
    /// Is a request outstanding? The driver must observe this false
    /// before issuing.
    pub active: bool,
    last_sector: u32,
    /// When the current track started streaming into the track buffer.
    buffer_init: SimTime,
    track_buffer: bool,
}

impl DiskDevice {
    /// Open (or create) the backing host file. A fresh file reads as
    /// zeros until first written.
    pub fn new(path: &Path, which: DiskId) -> std::io::Result<DiskDevice> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(DiskDevice {
            which,
            file,
            active: false,
            last_sector: 0,
            buffer_init: 0,
            track_buffer: true,
        })
    }

    /// Turn off the track-buffer shortcut (every read then pays the full
    /// rotational delay).
    pub fn disable_track_buffer(&mut self) {
        self.track_buffer = false;
    }

    /// Read one sector into `data` and schedule the completion.
    pub fn read_request(&mut self, sector: u32, data: &mut [u8], interrupt: &mut Interrupt) {
        assert!(!self.active, "disk {:?}: request while busy", self.which);
        assert!(sector < NUM_SECTORS, "disk {:?}: bad sector {}", self.which, sector);
        assert_eq!(data.len(), SECTOR_SIZE);

        let now = interrupt.total_ticks();
        let latency = self.compute_latency(sector, false, now);
        debugf!('d', "{:?} read sector {}, latency {}", self.which, sector, latency);

        data.fill(0);
        self.seek_to(sector);
        let mut filled = 0;
        loop {
            match self.file.read(&mut data[filled..]) {
                Ok(0) => break, // rest of a fresh disk reads as zeros
                Ok(n) => {
                    filled += n;
                    if filled == data.len() {
                        break;
                    }
                }
                Err(e) => panic!("disk {:?}: host read failed: {}", self.which, e),
            }
        }

        self.active = true;
        self.update_last(sector, now);
        interrupt.schedule(IntHandler::DiskDone(self.which), latency);
    }

    /// Write one sector from `data` and schedule the completion.
    pub fn write_request(&mut self, sector: u32, data: &[u8], interrupt: &mut Interrupt) {
        assert!(!self.active, "disk {:?}: request while busy", self.which);
        assert!(sector < NUM_SECTORS, "disk {:?}: bad sector {}", self.which, sector);
        assert_eq!(data.len(), SECTOR_SIZE);

        let now = interrupt.total_ticks();
        let latency = self.compute_latency(sector, true, now);
        debugf!('d', "{:?} write sector {}, latency {}", self.which, sector, latency);

        self.seek_to(sector);
        self.file
            .write_all(data)
            .unwrap_or_else(|e| panic!("disk {:?}: host write failed: {}", self.which, e));

        self.active = true;
        self.update_last(sector, now);
        interrupt.schedule(IntHandler::DiskDone(self.which), latency);
    }

    /// The completion handler: the device is free for the next request.
    /// The kernel signals whichever driver is waiting.
    pub fn handle_interrupt(&mut self) {
        self.active = false;
    }

    fn seek_to(&mut self, sector: u32) {
        let offset = sector as u64 * SECTOR_SIZE as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .unwrap_or_else(|e| panic!("disk {:?}: host seek failed: {}", self.which, e));
    }

    /// Time to move the head to the target track, plus the wait until
    /// the next sector boundary once it arrives.
    fn time_to_seek(&self, new_sector: u32, now: SimTime) -> (SimTime, SimTime) {
        let new_track = (new_sector / SECTORS_PER_TRACK) as i64;
        let old_track = (self.last_sector / SECTORS_PER_TRACK) as i64;
        let seek = (new_track - old_track).unsigned_abs() * SEEK_TIME;
        let over = (now + seek) % ROTATION_TIME;
        let rotation = if over > 0 { ROTATION_TIME - over } else { 0 };
        (seek, rotation)
    }

    /// Sectors between rotational position `from_pos` (in sector units)
    /// and `to_sector`, going forward around the track.
    fn modulo_diff(&self, to_sector: u32, from_pos: SimTime) -> SimTime {
        let to = (to_sector % SECTORS_PER_TRACK) as i64;
        let from = (from_pos % SECTORS_PER_TRACK as u64) as i64;
        ((to - from).rem_euclid(SECTORS_PER_TRACK as i64)) as SimTime
    }

    /// Full request latency: seek + rotational delay + transfer, or just
    /// the transfer when the track buffer already holds the sector.
    pub fn compute_latency(&self, new_sector: u32, writing: bool, now: SimTime) -> SimTime {
        let (seek, mut rotation) = self.time_to_seek(new_sector, now);
        let time_after = now + seek + rotation;

        if self.track_buffer
            && !writing
            && seek == 0
            && (time_after.saturating_sub(self.buffer_init)) / ROTATION_TIME
                > self.modulo_diff(new_sector, self.buffer_init / ROTATION_TIME)
        {
            // the head has already streamed this sector into the buffer
            return ROTATION_TIME;
        }

        rotation += self.modulo_diff(new_sector, time_after / ROTATION_TIME) * ROTATION_TIME;
        seek + rotation + ROTATION_TIME
    }

    fn update_last(&mut self, new_sector: u32, now: SimTime) {
        let (seek, rotation) = self.time_to_seek(new_sector, now);
        if seek != 0 {
            self.buffer_init = now + seek + rotation;
        }
        self.last_sector = new_sector;
    }
}

impl std::fmt::Debug for DiskDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskDevice")
            .field("which", &self.which)
            .field("active", &self.active)
            .field("last_sector", &self.last_sector)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::DiskId;

    fn scratch_disk() -> (tempfile::TempDir, DiskDevice) {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskDevice::new(&dir.path().join("DISK"), DiskId(0)).unwrap();
        (dir, disk)
    }

    fn complete(disk: &mut DiskDevice, interrupt: &mut Interrupt) {
        interrupt.advance_to(interrupt.next_due().unwrap());
        assert!(matches!(interrupt.pop_due(), Some(IntHandler::DiskDone(_))));
        disk.handle_interrupt();
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, mut disk) = scratch_disk();
        let mut interrupt = Interrupt::new();
        let written: Vec<u8> = (0..SECTOR_SIZE).map(|i| i as u8).collect();

        disk.write_request(37, &written, &mut interrupt);
        assert!(disk.active);
        complete(&mut disk, &mut interrupt);
        assert!(!disk.active);

        let mut read = [0u8; SECTOR_SIZE];
        disk.read_request(37, &mut read, &mut interrupt);
        complete(&mut disk, &mut interrupt);
        assert_eq!(&read[..], &written[..]);
    }

    #[test]
    fn fresh_disk_reads_zeros() {
        let (_dir, mut disk) = scratch_disk();
        let mut interrupt = Interrupt::new();
        let mut read = [0xffu8; SECTOR_SIZE];
        disk.read_request(NUM_SECTORS - 1, &mut read, &mut interrupt);
        complete(&mut disk, &mut interrupt);
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "request while busy")]
    fn second_request_while_active_is_refused() {
        let (_dir, mut disk) = scratch_disk();
        let mut interrupt = Interrupt::new();
        let buf = [0u8; SECTOR_SIZE];
        disk.write_request(0, &buf, &mut interrupt);
        disk.write_request(1, &buf, &mut interrupt);
    }

    #[test]
    fn latency_components() {
        let (_dir, disk) = scratch_disk();
        // Head starts on track 0. Seeking is linear in track distance.
        let (seek, _) = disk.time_to_seek(5, 0);
        assert_eq!(seek, 0);
        let (seek, _) = disk.time_to_seek(3 * SECTORS_PER_TRACK + 5, 0);
        assert_eq!(seek, 3 * SEEK_TIME);

        // Same track at time zero: rotate to the sector, then transfer.
        assert_eq!(
            disk.compute_latency(5, true, 0),
            5 * ROTATION_TIME + ROTATION_TIME
        );
    }

    #[test]
    fn buffered_track_read_costs_one_rotation() {
        let (_dir, mut disk) = scratch_disk();
        let mut interrupt = Interrupt::new();
        let buf = [0u8; SECTOR_SIZE];

        // Seek to track 1 so the buffer starts loading, then give the
        // head a full revolution to stream the track past.
        disk.write_request(SECTORS_PER_TRACK, &buf, &mut interrupt);
        complete(&mut disk, &mut interrupt);
        interrupt.advance(SECTORS_PER_TRACK as u64 * ROTATION_TIME * 2);

        let now = interrupt.total_ticks();
        let latency = disk.compute_latency(SECTORS_PER_TRACK + 3, false, now);
        assert_eq!(latency, ROTATION_TIME);
    }
}
