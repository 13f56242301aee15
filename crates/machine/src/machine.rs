//! The simulated CPU: register files, main memory, execution mode and the
//! exception latch the interpreter and kernel communicate through.

use types::{Config, SimTime};

use crate::mmu::{ExceptionKind, Mmu};

pub const NUM_INT_REGS: usize = 32;
pub const NUM_FP_REGS: usize = 32;

/// Conventional register indexes used by the kernel side.
pub mod reg {
    pub const ZERO: usize = 0;
    pub const RA: usize = 1;
    pub const SP: usize = 2;
    pub const A0: usize = 10;
    pub const A1: usize = 11;
    pub const A2: usize = 12;
    pub const A3: usize = 13;
    pub const A7: usize = 17;
}

/// ABI names, for register dumps.
pub const ABI_NAMES: [&str; NUM_INT_REGS] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// Whether the machine is running user code or a kernel handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    System,
    User,
}

/// A snapshot of the user-visible CPU state, saved and restored around
/// context switches for threads that execute user code.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub int_reg: [i64; NUM_INT_REGS],
    pub fp_reg: [u64; NUM_FP_REGS],
    pub pc: u64,
}

impl UserContext {
    pub fn new() -> UserContext {
        UserContext {
            int_reg: [0; NUM_INT_REGS],
            fp_reg: [0; NUM_FP_REGS],
            pc: 0,
        }
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The simulated machine.
///
/// This struct models the core components of a real CPU:
/// - Program counter: points at the next instruction to execute. In
///   real hardware this is a special register that advances on its own
///   unless an instruction redirects it.
/// - Registers: the fastest storage a program has, far faster than main
///   memory. There are 32 integer registers; x0 is hardwired to zero,
///   x1 holds return addresses, x2 the stack pointer.
/// - Main memory and an MMU translating every access.
///
/// Real CPUs add much more (pipelines, caches, out-of-order execution);
/// an interpretive model like this one trades all of that away for
/// being easy to follow, which is the point of the exercise.
///
/// Integer registers are kept as `i64` so arithmetic and comparisons read
/// like the architecture manual; the FP registers hold raw bit patterns
/// (single-precision values in the low 32 bits) so bit-exact moves cost
/// nothing.
pub struct Machine {
    pub int_reg: [i64; NUM_INT_REGS],
    pub fp_reg: [u64; NUM_FP_REGS],
    pub pc: u64,
    /// The faulting address of the most recent exception.
    pub bad_vaddr: u64,
    pub status: MachineStatus,
    pub memory: Vec<u8>,
    pub mmu: Mmu,
    /// `shift_mask[k] == u64::MAX >> k`, applied after an arithmetic
    /// shift to produce the logical-shift result on `i64` registers.
    pub shift_mask: [u64; 64],
    pending_exception: Option<(ExceptionKind, u64)>,
    /// Single-step debugger state.
    pub single_step: bool,
    pub run_until: SimTime,
}

impl Machine {
    pub fn new(cfg: &Config) -> Machine {
        check_endian();
        let mut shift_mask = [0u64; 64];
        let mut value = u64::MAX;
        for mask in shift_mask.iter_mut() {
            *mask = value;
            value >>= 1;
        }
        Machine {
            int_reg: [0; NUM_INT_REGS],
            fp_reg: [0; NUM_FP_REGS],
            pc: 0,
            bad_vaddr: 0,
            status: MachineStatus::System,
            memory: vec![0; cfg.memory_size()],
            mmu: Mmu::identity(cfg.num_phys_pages, cfg.page_size),
            shift_mask,
            pending_exception: None,
            single_step: cfg.single_step,
            run_until: 0,
        }
    }

    pub fn read_int_reg(&self, num: usize) -> i64 {
        assert!(num < NUM_INT_REGS, "bad register index {}", num);
        self.int_reg[num]
    }

    pub fn write_int_reg(&mut self, num: usize, value: i64) {
        assert!(num < NUM_INT_REGS, "bad register index {}", num);
        self.int_reg[num] = value;
    }

    /// Read `nbytes` (1/2/4/8) at `vaddr` through the MMU, little-endian,
    /// zero-extended. On failure the appropriate exception has been
    /// raised and `None` comes back; the interpreter then charges zero
    /// cycles and the run loop re-enters the fetch.
    pub fn read_mem(&mut self, vaddr: u64, nbytes: usize) -> Option<u64> {
        let pa = match self.mmu.translate(vaddr, nbytes, false) {
            Ok(pa) => pa,
            Err(kind) => {
                self.raise_exception(kind, vaddr);
                return None;
            }
        };
        if pa + nbytes > self.memory.len() {
            self.raise_exception(ExceptionKind::BusError, vaddr);
            return None;
        }
        let mut value: u64 = 0;
        for (i, &b) in self.memory[pa..pa + nbytes].iter().enumerate() {
            value |= (b as u64) << (8 * i);
        }
        Some(value)
    }

    /// Write the low `nbytes` of `value` at `vaddr`, little-endian.
    pub fn write_mem(&mut self, vaddr: u64, nbytes: usize, value: u64) -> bool {
        let pa = match self.mmu.translate(vaddr, nbytes, true) {
            Ok(pa) => pa,
            Err(kind) => {
                self.raise_exception(kind, vaddr);
                return false;
            }
        };
        if pa + nbytes > self.memory.len() {
            self.raise_exception(ExceptionKind::BusError, vaddr);
            return false;
        }
        for i in 0..nbytes {
            self.memory[pa + i] = (value >> (8 * i)) as u8;
        }
        true
    }

    /// Read a NUL-terminated string out of user memory, one byte at a
    /// time through the MMU. `None` if any byte faults.
    pub fn read_mem_string(&mut self, vaddr: u64, max_len: usize) -> Option<String> {
        let mut bytes = Vec::new();
        for i in 0..max_len as u64 {
            let b = self.read_mem(vaddr + i, 1)? as u8;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Record an exception. The run loop picks it up after the current
    /// instruction and transfers control to the kernel's handler.
    pub fn raise_exception(&mut self, kind: ExceptionKind, bad_vaddr: u64) {
        self.bad_vaddr = bad_vaddr;
        self.pending_exception = Some((kind, bad_vaddr));
    }

    pub fn take_exception(&mut self) -> Option<(ExceptionKind, u64)> {
        self.pending_exception.take()
    }

    /// Save the user-visible CPU state into `ctx`.
    pub fn save_user_context(&self, ctx: &mut UserContext) {
        ctx.int_reg = self.int_reg;
        ctx.fp_reg = self.fp_reg;
        ctx.pc = self.pc;
    }

    /// Restore the user-visible CPU state from `ctx`.
    pub fn restore_user_context(&mut self, ctx: &UserContext) {
        self.int_reg = ctx.int_reg;
        self.fp_reg = ctx.fp_reg;
        self.pc = ctx.pc;
    }

    /// Print the register files for the single-step debugger.
    ///
    /// Each integer register is shown with its ABI name, which is how
    /// you read a register dump in practice: a0-a7 carry arguments and
    /// results, s-registers survive calls, t-registers do not. Both hex
    /// and decimal are printed because addresses read best in hex and
    /// loop counters in decimal. Memory is deliberately not dumped
    /// here; that would drown the interesting part.
    pub fn dump_state(&self) {
        println!("--- Register Dump ---");
        println!("pc           = {:#018x}", self.pc);
        for (i, &v) in self.int_reg.iter().enumerate() {
            println!("x{:02} ({:<4}) = {:#018x} ({})", i, ABI_NAMES[i], v, v);
        }
        for (i, &v) in self.fp_reg.iter().enumerate() {
            println!(
                "f{:02}        = {:#010x} ({})",
                i,
                v as u32,
                f32::from_bits(v as u32)
            );
        }
        println!("---------------------");
    }
}

/// Make sure the host stores integer bytes the way the simulator assumes
/// before any on-disk structure is read. Anything but a straight little-
/// or big-endian layout is unsupported.
fn check_endian() {
    let word = u32::from_ne_bytes([1, 2, 3, 4]);
    assert!(
        word == 0x0403_0201 || word == 0x0102_0304,
        "unsupported host byte order ({word:#010x})"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_machine() -> Machine {
        let cfg = Config {
            num_phys_pages: 4,
            page_size: 128,
            ..Config::default()
        };
        Machine::new(&cfg)
    }

    #[test]
    fn memory_round_trip_little_endian() {
        let mut m = small_machine();
        assert!(m.write_mem(8, 4, 0x0102_0304));
        assert_eq!(m.memory[8], 0x04);
        assert_eq!(m.memory[11], 0x01);
        assert_eq!(m.read_mem(8, 4), Some(0x0102_0304));
        assert_eq!(m.read_mem(8, 1), Some(0x04));
    }

    #[test]
    fn faulting_read_latches_the_exception() {
        let mut m = small_machine();
        assert_eq!(m.read_mem(4 * 128, 4), None);
        let (kind, bad) = m.take_exception().unwrap();
        assert_eq!(kind, ExceptionKind::AddressError);
        assert_eq!(bad, 4 * 128);
        assert_eq!(m.bad_vaddr, 4 * 128);
        assert!(m.take_exception().is_none());
    }

    #[test]
    fn string_read_stops_at_nul() {
        let mut m = small_machine();
        for (i, b) in b"hi\0junk".iter().enumerate() {
            m.memory[32 + i] = *b;
        }
        assert_eq!(m.read_mem_string(32, 64).as_deref(), Some("hi"));
    }
}
