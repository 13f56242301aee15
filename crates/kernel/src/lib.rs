//! The operating-system layer of the simulator: cooperative threads, the
//! synchronization primitives built on them, synchronous drivers for the
//! asynchronous devices, a small file system, and the syscall dispatch
//! that user programs reach through the machine's exception path.
//!
//! Everything hangs off one [`Kernel`] value; there are no process-wide
//! singletons. Cloning a `Kernel` clones a handle, not the state.

pub mod drvconsole;
pub mod drvdisk;
pub mod exception;
pub mod fs;
pub mod kernel;
pub mod sync;
pub mod thread;

pub use exception::sc;
pub use fs::FileSystem;
pub use kernel::Kernel;
pub use thread::{Thread, ThreadState};
