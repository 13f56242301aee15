//! End-to-end machine runs: hand-assembled user programs entering the
//! kernel through ecall.

mod common;

use kernel::sc;
use machine::machine::reg;
use types::SysError;

// minimal assembler helpers
fn addi(rd: usize, rs1: usize, imm: i32) -> u32 {
    (((imm as u32) & 0xfff) << 20) | ((rs1 as u32) << 15) | ((rd as u32) << 7) | 0x13
}

fn add(rd: usize, rs1: usize, rs2: usize) -> u32 {
    ((rs2 as u32) << 20) | ((rs1 as u32) << 15) | ((rd as u32) << 7) | 0x33
}

fn bne(rs1: usize, rs2: usize, imm: i32) -> u32 {
    let imm = imm as u32;
    ((imm >> 12) & 1) << 31
        | ((imm >> 5) & 0x3f) << 25
        | ((rs2 as u32) << 20)
        | ((rs1 as u32) << 15)
        | (0x1 << 12)
        | ((imm >> 1) & 0xf) << 8
        | ((imm >> 11) & 1) << 7
        | 0x63
}

const ECALL: u32 = 0x0000_0073;

fn load_program(sim: &common::Sim, words: &[u32]) {
    sim.kernel.with_machine(|m| {
        for (i, &w) in words.iter().enumerate() {
            assert!(m.write_mem(i as u64 * 4, 4, w as u64));
        }
    });
    sim.kernel.setup_user(0);
}

#[test]
fn hello_prints_and_halts() {
    let sim = common::boot();
    let string_addr = 0x200;
    sim.kernel.with_machine(|m| {
        for (i, &b) in b"hi\n\0".iter().enumerate() {
            assert!(m.write_mem(string_addr + i as u64, 1, b as u64));
        }
    });
    load_program(
        &sim,
        &[
            addi(reg::A0, 0, string_addr as i32), // a0 = &"hi\n"
            addi(reg::A7, 0, sc::PUT_STRING as i32),
            ECALL,
            addi(reg::A7, 0, sc::HALT as i32),
            ECALL,
        ],
    );
    assert_eq!(sim.kernel.run(), 0);
    assert!(sim.console.contents().contains("hi\n"));
    let stats = sim.kernel.statistics();
    assert!(stats.num_instructions >= 5);
    assert_eq!(stats.num_console_chars_out, 3);
}

#[test]
fn countdown_loop_reports_its_sum_via_exit() {
    let sim = common::boot();
    load_program(
        &sim,
        &[
            addi(5, 0, 5),       // x5 = 5
            addi(reg::A0, 0, 0), // a0 = 0
            add(reg::A0, reg::A0, 5), // loop: a0 += x5
            addi(5, 5, -1),
            bne(5, 0, -8),
            addi(reg::A7, 0, sc::EXIT as i32),
            ECALL, // exit(15)
        ],
    );
    assert_eq!(sim.kernel.run(), 15);
}

#[test]
fn semaphore_syscalls_set_the_last_error() {
    let sim = common::boot();
    let k = &sim.kernel;
    // SemCreate("", 1) with a name pointer at a NUL byte is fine; then
    // destroy it twice: the second destroy fails and PError-style state
    // is left behind.
    load_program(
        &sim,
        &[
            addi(reg::A0, 0, 0x100), // name pointer (empty string)
            addi(reg::A1, 0, 1),
            addi(reg::A7, 0, sc::SEM_CREATE as i32),
            ECALL,                 // a0 = sem id
            addi(5, reg::A0, 0),   // x5 = id
            addi(reg::A7, 0, sc::SEM_P as i32),
            ECALL,
            addi(reg::A0, 5, 0),
            addi(reg::A7, 0, sc::SEM_DESTROY as i32),
            ECALL,
            addi(reg::A0, 5, 0),
            addi(reg::A7, 0, sc::SEM_V as i32), // V after destroy: fails
            ECALL,
            addi(6, reg::A0, 0), // x6 = -1
            addi(reg::A7, 0, sc::HALT as i32),
            ECALL,
        ],
    );
    assert_eq!(k.run(), 0);
    k.with_machine(|m| {
        assert_eq!(m.read_int_reg(6), -1);
    });
    assert_eq!(k.last_error(), Some(SysError::NotFound));
}

#[test]
fn console_read_syscall_round_trips() {
    let sim = common::boot();
    let k = &sim.kernel;
    k.feed_console_input(b"x");
    load_program(
        &sim,
        &[
            addi(reg::A7, 0, sc::GET_CHAR as i32),
            ECALL,
            addi(reg::A7, 0, sc::EXIT as i32),
            ECALL, // exit with the character read
        ],
    );
    assert_eq!(k.run(), b'x' as i32);
}

#[test]
fn yield_syscall_is_harmless_alone() {
    let sim = common::boot();
    load_program(
        &sim,
        &[
            addi(reg::A7, 0, sc::YIELD as i32),
            ECALL,
            addi(reg::A0, 0, 3),
            addi(reg::A7, 0, sc::EXIT as i32),
            ECALL,
        ],
    );
    assert_eq!(sim.kernel.run(), 3);
}
