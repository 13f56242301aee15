//! Hardware emulation: a RISC-V RV64 CPU with single-precision floats, a
//! translating MMU, a simulated clock with a pending-interrupt queue, and
//! the asynchronous disk and console devices.
//!
//! Nothing in this crate knows about threads or the file system; the
//! kernel crate drives the interpreter, dispatches interrupt completions
//! and layers drivers on top of the raw devices.

pub mod console;
pub mod disk;
pub mod instruction;
pub mod interp;
pub mod interrupt;
pub mod machine;
pub mod mmu;

pub use instruction::{Instruction, Opcode};
pub use interrupt::{IntHandler, Interrupt};
pub use machine::{Machine, MachineStatus, UserContext};
pub use mmu::{ExceptionKind, Mmu};
