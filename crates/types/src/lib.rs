//! Shared leaf types for the simulator workspace: simulated time, stable
//! object ids, timing constants, the error enum, runtime configuration,
//! statistics and the debug facility.

pub mod config;
pub mod debug;
pub mod error;
pub mod stats;

pub use config::Config;
pub use error::{SysError, SysResult};
pub use stats::Statistics;

/// Simulated time, counted in processor cycles. Monotonically
/// non-decreasing for the lifetime of a simulation.
pub type SimTime = u64;

/// Cycles charged for one user-mode instruction.
pub const USER_TICK: SimTime = 1;

/// Cycles charged each time the kernel re-enables interrupts after a
/// critical section.
pub const SYSTEM_TICK: SimTime = 10;

/// Time for the disk to rotate past one sector.
pub const ROTATION_TIME: SimTime = 500;

/// Time for the disk head to move between two adjacent tracks.
pub const SEEK_TIME: SimTime = 500;

/// Time for the console to absorb or produce one character.
pub const CONSOLE_TIME: SimTime = 100;

macro_rules! stable_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);
    };
}

stable_id!(
    /// Index of a thread in the kernel's thread arena. Ids are never
    /// reused, so a stale id stays detectable.
    ThreadId
);
stable_id!(
    /// Handle to a kernel semaphore.
    SemId
);
stable_id!(
    /// Handle to a kernel lock.
    LockId
);
stable_id!(
    /// Handle to a kernel condition variable.
    CondId
);
stable_id!(
    /// Which simulated disk a request or completion refers to.
    DiskId
);
stable_id!(
    /// Handle to an entry in the per-kernel open file table.
    OpenFileId
);

/// The disk backing the file system.
pub const FS_DISK: DiskId = DiskId(0);
/// The disk reserved for page swapping.
pub const SWAP_DISK: DiskId = DiskId(1);
