//! The instruction interpreter: executes exactly one decoded instruction
//! per call and reports the cycles it consumed.
//!
//! This is the classic instruction cycle every CPU follows, in software:
//! 1. Fetch: read the word the program counter points at.
//! 2. Decode: work out the operation and its operands.
//! 3. Execute: do the arithmetic, memory access or control transfer.
//!
//! The surrounding run loop lives on the kernel side, because the
//! exception handler needs kernel state; this module is a pure function
//! of the machine. A fetch or memory-access fault raises the exception
//! through the machine's latch, rewinds the pc to the faulting
//! instruction and charges zero cycles, so the loop re-enters the fetch
//! once the handler has done its work.

use types::{debugf, SimTime, USER_TICK};

use crate::instruction::{Instruction, Opcode};
use crate::machine::Machine;
use crate::mmu::ExceptionKind;

/// Fetch, decode and execute one instruction at the current pc.
///
/// Unknown opcodes and unknown sub-encodings are fatal: this simulator
/// has no way to continue past an instruction it cannot model.
pub fn one_instruction(m: &mut Machine) -> SimTime {
    let instr_pc = m.pc;
    let word = match m.read_mem(instr_pc, 4) {
        Some(w) => w as u32,
        None => return 0, // fetch faulted, exception already raised
    };
    let instr = match Instruction::decode(word) {
        Some(i) => i,
        None => panic!(
            "🚨 unknown or invalid instruction {:#010x} at pc {:#x}",
            word, instr_pc
        ),
    };
    debugf!('m', "[PC {:#x}] {}", instr_pc, instr.disasm(instr_pc));
    m.pc = instr_pc.wrapping_add(4);

    match instr.opcode {
        Opcode::Lui => {
            m.int_reg[instr.rd] = instr.imm_u as i64;
        }
        Opcode::Auipc => {
            m.int_reg[instr.rd] = (instr_pc as i64).wrapping_add(instr.imm_u as i64);
        }
        Opcode::Jal => {
            m.int_reg[instr.rd] = m.pc as i64;
            m.pc = instr_pc.wrapping_add(instr.imm_j as i64 as u64);
        }
        Opcode::Jalr => {
            let target = (m.int_reg[instr.rs1].wrapping_add(instr.imm_i as i64) as u64) & !1;
            m.int_reg[instr.rd] = m.pc as i64;
            m.pc = target;
        }
        Opcode::Branch => {
            let a = m.int_reg[instr.rs1];
            let b = m.int_reg[instr.rs2];
            let taken = match instr.funct3 {
                0x0 => a == b,
                0x1 => a != b,
                0x4 => a < b,
                0x5 => a >= b,
                0x6 => (a as u64) < (b as u64),
                0x7 => (a as u64) >= (b as u64),
                _ => fatal(&instr, instr_pc),
            };
            if taken {
                m.pc = instr_pc.wrapping_add(instr.imm_b as i64 as u64);
            }
        }
        Opcode::Load => {
            let addr = m.int_reg[instr.rs1].wrapping_add(instr.imm_i as i64) as u64;
            let nbytes = match instr.funct3 {
                0x0 | 0x4 => 1,
                0x1 | 0x5 => 2,
                0x2 | 0x6 => 4,
                0x3 => 8,
                _ => fatal(&instr, instr_pc),
            };
            let Some(raw) = m.read_mem(addr, nbytes) else {
                m.pc = instr_pc;
                return 0;
            };
            m.int_reg[instr.rd] = match instr.funct3 {
                0x0 => raw as u8 as i8 as i64,   // lb
                0x1 => raw as u16 as i16 as i64, // lh
                0x2 => raw as u32 as i32 as i64, // lw
                0x3 => raw as i64,               // ld
                _ => raw as i64,                 // lbu/lhu/lwu, zero-extended
            };
        }
        Opcode::Store => {
            let addr = m.int_reg[instr.rs1].wrapping_add(instr.imm_s as i64) as u64;
            let nbytes = match instr.funct3 {
                0x0 => 1,
                0x1 => 2,
                0x2 => 4,
                0x3 => 8,
                _ => fatal(&instr, instr_pc),
            };
            if !m.write_mem(addr, nbytes, m.int_reg[instr.rs2] as u64) {
                m.pc = instr_pc;
                return 0;
            }
        }
        Opcode::OpImm => {
            let a = m.int_reg[instr.rs1];
            let imm = instr.imm_i as i64;
            let sh = instr.shamt as usize;
            m.int_reg[instr.rd] = match instr.funct3 {
                0x0 => a.wrapping_add(imm),
                0x2 => (a < imm) as i64,
                0x3 => ((a as u64) < (imm as u64)) as i64,
                0x4 => a ^ imm,
                0x6 => a | imm,
                0x7 => a & imm,
                0x1 => a.wrapping_shl(sh as u32),
                0x5 => {
                    if instr.funct7 & 0x20 != 0 {
                        a >> sh // srai
                    } else {
                        (a >> sh) & m.shift_mask[sh] as i64 // srli
                    }
                }
                _ => fatal(&instr, instr_pc),
            };
        }
        Opcode::OpImmW => {
            let a = m.int_reg[instr.rs1] as i32;
            let sh = instr.shamt & 0x1f;
            m.int_reg[instr.rd] = match instr.funct3 {
                0x0 => a.wrapping_add(instr.imm_i) as i64,
                0x1 => a.wrapping_shl(sh) as i64,
                0x5 => {
                    if instr.funct7 & 0x20 != 0 {
                        (a >> sh) as i64 // sraiw
                    } else {
                        (((a as u32) >> sh) as i32) as i64 // srliw
                    }
                }
                _ => fatal(&instr, instr_pc),
            };
        }
        Opcode::Op => {
            let a = m.int_reg[instr.rs1];
            let b = m.int_reg[instr.rs2];
            m.int_reg[instr.rd] = if instr.funct7 == 1 {
                // M extension; the high-half multiplies widen to 128 bits
                match instr.funct3 {
                    0x0 => a.wrapping_mul(b),
                    0x1 => (((a as i128) * (b as i128)) >> 64) as i64,
                    0x2 => (((a as i128) * (b as u64 as i128)) >> 64) as i64,
                    0x3 => (((a as u64 as u128) * (b as u64 as u128)) >> 64) as i64,
                    0x4 => div64(a, b),
                    0x5 => divu64(a as u64, b as u64),
                    0x6 => rem64(a, b),
                    0x7 => remu64(a as u64, b as u64),
                    _ => fatal(&instr, instr_pc),
                }
            } else {
                let sh = (b as u64 & 0x3f) as usize;
                match instr.funct3 {
                    0x0 => {
                        if instr.funct7 & 0x20 != 0 {
                            a.wrapping_sub(b)
                        } else {
                            a.wrapping_add(b)
                        }
                    }
                    0x1 => a.wrapping_shl(sh as u32),
                    0x2 => (a < b) as i64,
                    0x3 => ((a as u64) < (b as u64)) as i64,
                    0x4 => a ^ b,
                    0x5 => {
                        if instr.funct7 & 0x20 != 0 {
                            a >> sh // sra
                        } else {
                            (a >> sh) & m.shift_mask[sh] as i64 // srl
                        }
                    }
                    0x6 => a | b,
                    0x7 => a & b,
                    _ => fatal(&instr, instr_pc),
                }
            };
        }
        Opcode::OpW => {
            let a = m.int_reg[instr.rs1] as i32;
            let b = m.int_reg[instr.rs2] as i32;
            m.int_reg[instr.rd] = if instr.funct7 == 1 {
                match instr.funct3 {
                    0x0 => a.wrapping_mul(b) as i64,
                    0x4 => div32(a, b),
                    0x5 => divu32(a as u32, b as u32),
                    0x6 => rem32(a, b),
                    0x7 => remu32(a as u32, b as u32),
                    _ => fatal(&instr, instr_pc),
                }
            } else {
                let sh = (b as u32) & 0x1f;
                match instr.funct3 {
                    0x0 => {
                        if instr.funct7 & 0x20 != 0 {
                            a.wrapping_sub(b) as i64
                        } else {
                            a.wrapping_add(b) as i64
                        }
                    }
                    0x1 => a.wrapping_shl(sh) as i64,
                    0x5 => {
                        if instr.funct7 & 0x20 != 0 {
                            (a >> sh) as i64 // sraw
                        } else {
                            (((a as u32) >> sh) as i32) as i64 // srlw
                        }
                    }
                    _ => fatal(&instr, instr_pc),
                }
            };
        }
        Opcode::System => {
            // Every SYSTEM-opcode instruction traps; the kernel decides
            // what the call means. pc has already moved past the ecall.
            m.raise_exception(ExceptionKind::Syscall, m.pc);
        }
        Opcode::LoadFp => {
            let addr = m.int_reg[instr.rs1].wrapping_add(instr.imm_i as i64) as u64;
            let Some(raw) = m.read_mem(addr, 4) else {
                m.pc = instr_pc;
                return 0;
            };
            m.fp_reg[instr.rd] = raw;
        }
        Opcode::StoreFp => {
            let addr = m.int_reg[instr.rs1].wrapping_add(instr.imm_s as i64) as u64;
            if !m.write_mem(addr, 4, m.fp_reg[instr.rs2] & 0xffff_ffff) {
                m.pc = instr_pc;
                return 0;
            }
        }
        Opcode::Fmadd | Opcode::Fmsub | Opcode::Fnmsub | Opcode::Fnmadd => {
            let a = read_f32(m, instr.rs1);
            let b = read_f32(m, instr.rs2);
            let c = read_f32(m, instr.rs3);
            let result = match instr.opcode {
                Opcode::Fmadd => a.mul_add(b, c),
                Opcode::Fmsub => a.mul_add(b, -c),
                Opcode::Fnmsub => (-a).mul_add(b, c),
                _ => (-a).mul_add(b, -c),
            };
            write_f32(m, instr.rd, result);
        }
        Opcode::OpFp => op_fp(m, &instr, instr_pc),
    }

    // x0 is hardwired to zero no matter what the instruction wrote.
    m.int_reg[0] = 0;
    USER_TICK
}

fn op_fp(m: &mut Machine, instr: &Instruction, instr_pc: u64) {
    let a = read_f32(m, instr.rs1);
    let b = read_f32(m, instr.rs2);
    match instr.funct7 {
        0x00 => write_f32(m, instr.rd, a + b),
        0x04 => write_f32(m, instr.rd, a - b),
        0x08 => write_f32(m, instr.rd, a * b),
        0x0c => write_f32(m, instr.rd, a / b),
        0x2c => write_f32(m, instr.rd, a.sqrt()),
        0x10 => {
            // sign injection
            let magnitude = a.abs();
            let result = match instr.funct3 {
                0x0 => {
                    if b.is_sign_negative() {
                        -magnitude
                    } else {
                        magnitude
                    }
                }
                0x1 => {
                    if b.is_sign_negative() {
                        magnitude
                    } else {
                        -magnitude
                    }
                }
                0x2 => {
                    if a.is_sign_negative() != b.is_sign_negative() {
                        -magnitude
                    } else {
                        magnitude
                    }
                }
                _ => fatal(instr, instr_pc),
            };
            write_f32(m, instr.rd, result);
        }
        0x14 => {
            let result = if instr.funct3 == 0 { a.min(b) } else { a.max(b) };
            write_f32(m, instr.rd, result);
        }
        0x50 => {
            // comparisons deposit 0/1 in an integer register
            m.int_reg[instr.rd] = match instr.funct3 {
                0x2 => (a == b) as i64,
                0x1 => (a < b) as i64,
                0x0 => (a <= b) as i64,
                _ => fatal(instr, instr_pc),
            };
        }
        0x60 => {
            // fcvt.w.s / fcvt.wu.s, selected by the rs2 field
            m.int_reg[instr.rd] = if instr.rs2 == 0 {
                (a as i32) as i64
            } else {
                ((a as u32) as i32) as i64
            };
        }
        0x68 => {
            // fcvt.s.w / fcvt.s.wu
            let v = m.int_reg[instr.rs1];
            let result = if instr.rs2 == 0 {
                (v as i32) as f32
            } else {
                (v as u32) as f32
            };
            write_f32(m, instr.rd, result);
        }
        0x70 => {
            if instr.funct3 == 0 {
                // fmv.x.w: raw bits, sign-extended into the integer file
                m.int_reg[instr.rd] = (m.fp_reg[instr.rs1] as u32 as i32) as i64;
            } else {
                // fclass has no consumer in this simulator
                panic!(
                    "🚨 fclass is not implemented (instruction {:#010x} at pc {:#x})",
                    instr.value, instr_pc
                );
            }
        }
        0x78 => {
            // fmv.w.x: raw bits from the integer file
            m.fp_reg[instr.rd] = m.int_reg[instr.rs1] as u32 as u64;
        }
        _ => fatal(instr, instr_pc),
    }
}

fn read_f32(m: &Machine, r: usize) -> f32 {
    f32::from_bits(m.fp_reg[r] as u32)
}

fn write_f32(m: &mut Machine, r: usize, v: f32) {
    m.fp_reg[r] = v.to_bits() as u64;
}

fn fatal(instr: &Instruction, pc: u64) -> ! {
    panic!(
        "🚨 unknown sub-encoding in instruction {:#010x} (opcode {:?}, funct3 {}, funct7 {}) at pc {:#x}",
        instr.value, instr.opcode, instr.funct3, instr.funct7, pc
    );
}

// Division per the architecture: dividing by zero yields all ones (or
// the dividend for remainders) and MIN / -1 wraps, rather than trapping.

fn div64(a: i64, b: i64) -> i64 {
    if b == 0 {
        -1
    } else {
        a.wrapping_div(b)
    }
}

fn rem64(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        a.wrapping_rem(b)
    }
}

fn divu64(a: u64, b: u64) -> i64 {
    if b == 0 {
        -1
    } else {
        (a / b) as i64
    }
}

fn remu64(a: u64, b: u64) -> i64 {
    if b == 0 {
        a as i64
    } else {
        (a % b) as i64
    }
}

fn div32(a: i32, b: i32) -> i64 {
    if b == 0 {
        -1
    } else {
        a.wrapping_div(b) as i64
    }
}

fn rem32(a: i32, b: i32) -> i64 {
    if b == 0 {
        a as i64
    } else {
        a.wrapping_rem(b) as i64
    }
}

fn divu32(a: u32, b: u32) -> i64 {
    if b == 0 {
        -1
    } else {
        ((a / b) as i32) as i64
    }
}

fn remu32(a: u32, b: u32) -> i64 {
    if b == 0 {
        (a as i32) as i64
    } else {
        ((a % b) as i32) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_edge_cases() {
        assert_eq!(div64(7, 0), -1);
        assert_eq!(rem64(7, 0), 7);
        assert_eq!(div64(i64::MIN, -1), i64::MIN);
        assert_eq!(rem64(i64::MIN, -1), 0);
        assert_eq!(divu64(7, 0), -1);
        assert_eq!(div32(i32::MIN, -1), i32::MIN as i64);
        assert_eq!(rem32(i32::MIN, -1), 0);
    }
}
