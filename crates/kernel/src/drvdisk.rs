//! Synchronous sector I/O on top of the asynchronous disks.
//!
//! Each disk gets a lock (one request in flight from the callers' point
//! of view) and a semaphore initialized to 0 that the completion handler
//! V's. A read or write issues the request and P's until the interrupt
//! arrives; requests therefore appear totally ordered by lock
//! acquisition.

use types::{debugf, DiskId};

use crate::kernel::{Core, Kernel};

impl Kernel {
    /// Read one sector, returning only once the data is in `data`.
    pub fn read_sector(&self, disk: DiskId, sector: u32, data: &mut [u8]) {
        let channel = &self.inner.disk_drivers[disk.0];
        debugf!('d', "[sdisk {:?}] rd {}", disk, sector);
        self.lock_acquire(channel.lock)
            .expect("disk driver lock unusable");
        {
            let mut g = self.enter();
            let Core {
                disks,
                interrupt,
                stats,
                ..
            } = &mut *g;
            disks[disk.0].read_request(sector, data, interrupt);
            stats.num_disk_reads += 1;
            self.leave(g);
        }
        self.sem_p(channel.sem).expect("disk driver semaphore unusable");
        self.lock_release(channel.lock)
            .expect("disk driver lock unusable");
        debugf!('d', "[sdisk {:?}] rd {} done", disk, sector);
    }

    /// Write one sector, returning only once the device has taken it.
    pub fn write_sector(&self, disk: DiskId, sector: u32, data: &[u8]) {
        let channel = &self.inner.disk_drivers[disk.0];
        debugf!('d', "[sdisk {:?}] wr {}", disk, sector);
        self.lock_acquire(channel.lock)
            .expect("disk driver lock unusable");
        {
            let mut g = self.enter();
            let Core {
                disks,
                interrupt,
                stats,
                ..
            } = &mut *g;
            disks[disk.0].write_request(sector, data, interrupt);
            stats.num_disk_writes += 1;
            self.leave(g);
        }
        self.sem_p(channel.sem).expect("disk driver semaphore unusable");
        self.lock_release(channel.lock)
            .expect("disk driver lock unusable");
        debugf!('d', "[sdisk {:?}] wr {} done", disk, sector);
    }

    /// Is the underlying device idle right now? Diagnostic hook used by
    /// tests to check the one-outstanding-request invariant.
    pub fn disk_idle(&self, disk: DiskId) -> bool {
        !self.lock().disks[disk.0].active
    }
}
