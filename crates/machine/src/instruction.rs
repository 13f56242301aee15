//! RISC-V instruction word decoding.
//!
//! A 32-bit word decodes into one [`Instruction`] record carrying every
//! field any instruction form can use: register indexes, function codes
//! and the immediates of the I/S/B/U/J encodings, each extracted and
//! sign-extended up front. The interpreter then dispatches on the major
//! opcode and reads whichever fields that form defines; the unused ones
//! are simply garbage it never looks at, exactly as in hardware.

/// Major opcode families, from bits [6:0] of the instruction word.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// LUI: rd = imm[31:12] << 12
    Lui = 0x37,
    /// AUIPC: rd = pc + (imm[31:12] << 12)
    Auipc = 0x17,
    /// JAL: rd = pc + 4; pc += imm
    Jal = 0x6f,
    /// JALR: rd = pc + 4; pc = (rs1 + imm) & !1
    Jalr = 0x67,
    /// Conditional branches: BEQ, BNE, BLT, BGE, BLTU, BGEU
    Branch = 0x63,
    /// Integer loads: LB, LH, LW, LD, LBU, LHU, LWU
    Load = 0x03,
    /// Integer stores: SB, SH, SW, SD
    Store = 0x23,
    /// Immediate ALU ops: ADDI, SLTI(U), XORI, ORI, ANDI, shifts
    OpImm = 0x13,
    /// 32-bit immediate ALU ops: ADDIW, SLLIW, SRLIW, SRAIW
    OpImmW = 0x1b,
    /// Register ALU ops, plus the M extension when funct7 == 1
    Op = 0x33,
    /// 32-bit register ALU ops and the M-extension W forms
    OpW = 0x3b,
    /// ECALL, EBREAK, CSR accesses: all trap to the kernel
    System = 0x73,
    /// FLW: load a single-precision value
    LoadFp = 0x07,
    /// FSW: store a single-precision value
    StoreFp = 0x27,
    /// Fused multiply-add family
    Fmadd = 0x43,
    Fmsub = 0x47,
    Fnmsub = 0x4b,
    Fnmadd = 0x4f,
    /// Remaining single-precision ops, dispatched on funct7
    OpFp = 0x53,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match value {
            0x37 => Lui,
            0x17 => Auipc,
            0x6f => Jal,
            0x67 => Jalr,
            0x63 => Branch,
            0x03 => Load,
            0x23 => Store,
            0x13 => OpImm,
            0x1b => OpImmW,
            0x33 => Op,
            0x3b => OpW,
            0x73 => System,
            0x07 => LoadFp,
            0x27 => StoreFp,
            0x43 => Fmadd,
            0x47 => Fmsub,
            0x4b => Fnmsub,
            0x4f => Fnmadd,
            0x53 => OpFp,
            _ => return None,
        })
    }
}

/// One decoded instruction. Stack-local, rebuilt on every fetch.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    /// The raw 32-bit encoding.
    pub value: u32,
    pub opcode: Opcode,
    pub rd: usize,
    pub rs1: usize,
    pub rs2: usize,
    /// Third source register of the fused multiply-add forms.
    pub rs3: usize,
    pub funct3: u8,
    pub funct7: u8,
    /// I-form immediate, sign-extended (12 bits).
    pub imm_i: i32,
    /// I-form immediate, zero-extended.
    pub imm_i_u: u32,
    /// S-form immediate, sign-extended (12 bits).
    pub imm_s: i32,
    /// B-form immediate, sign-extended (13 bits, bit 0 zero).
    pub imm_b: i32,
    /// U-form immediate, already shifted into bits [31:12].
    pub imm_u: i32,
    /// J-form immediate, sign-extended (21 bits, bit 0 zero).
    pub imm_j: i32,
    /// Shift amount for the RV64 immediate shifts (6 bits).
    pub shamt: u32,
}

impl Instruction {
    /// Decode a 32-bit word. Returns `None` for an unknown major opcode;
    /// the caller treats that as fatal.
    ///
    /// The fixed 32-bit layout being picked apart:
    ///
    /// ```text
    /// 31:25  funct7  (7 bits) - function code for register-register ops
    /// 24:20  rs2     (5 bits) - second source register
    /// 19:15  rs1     (5 bits) - first source register
    /// 14:12  funct3  (3 bits) - function code within a family
    /// 11:7   rd      (5 bits) - destination register
    /// 6:0    opcode  (7 bits) - major operation family
    /// ```
    ///
    /// Immediates are scattered differently per form (I in 31:20; S
    /// split across 31:25 and 11:7; B and J additionally shuffled so
    /// their sign bit always lands in bit 31), which is why each form
    /// gets its own reassembled, sign-extended field below.
    pub fn decode(word: u32) -> Option<Instruction> {
        let opcode = Opcode::from_u8((word & 0x7f) as u8)?;
        Some(Instruction {
            value: word,
            opcode,
            rd: ((word >> 7) & 0x1f) as usize,
            rs1: ((word >> 15) & 0x1f) as usize,
            rs2: ((word >> 20) & 0x1f) as usize,
            rs3: ((word >> 27) & 0x1f) as usize,
            funct3: ((word >> 12) & 0x07) as u8,
            funct7: ((word >> 25) & 0x7f) as u8,
            imm_i: (word as i32) >> 20,
            imm_i_u: (word >> 20) & 0xfff,
            imm_s: (((word as i32) >> 25) << 5) | ((word >> 7) & 0x1f) as i32,
            imm_b: (((word as i32) >> 31) << 12)
                | ((((word >> 25) & 0x3f) << 5) as i32)
                | ((((word >> 8) & 0x0f) << 1) as i32)
                | ((((word >> 7) & 0x01) << 11) as i32),
            imm_u: (word & 0xffff_f000) as i32,
            imm_j: (((word as i32) >> 31) << 20)
                | ((((word >> 21) & 0x3ff) << 1) as i32)
                | ((((word >> 20) & 0x01) << 11) as i32)
                | ((((word >> 12) & 0xff) << 12) as i32),
            shamt: (word >> 20) & 0x3f,
        })
    }

    /// Compact textual form for the machine debug flag and the
    /// single-step debugger. Covers the common families; anything else
    /// falls back to the raw word.
    pub fn disasm(&self, pc: u64) -> String {
        match self.opcode {
            Opcode::Lui => format!("lui x{}, {:#x}", self.rd, self.imm_u),
            Opcode::Auipc => format!("auipc x{}, {:#x}", self.rd, self.imm_u),
            Opcode::Jal => format!(
                "jal x{}, {:#x}",
                self.rd,
                pc.wrapping_add(self.imm_j as i64 as u64)
            ),
            Opcode::Jalr => format!("jalr x{}, {}(x{})", self.rd, self.imm_i, self.rs1),
            Opcode::Branch => {
                let name = match self.funct3 {
                    0x0 => "beq",
                    0x1 => "bne",
                    0x4 => "blt",
                    0x5 => "bge",
                    0x6 => "bltu",
                    _ => "bgeu",
                };
                format!(
                    "{} x{}, x{}, {:#x}",
                    name,
                    self.rs1,
                    self.rs2,
                    pc.wrapping_add(self.imm_b as i64 as u64)
                )
            }
            Opcode::Load => {
                let name = match self.funct3 {
                    0x0 => "lb",
                    0x1 => "lh",
                    0x2 => "lw",
                    0x3 => "ld",
                    0x4 => "lbu",
                    0x5 => "lhu",
                    _ => "lwu",
                };
                format!("{} x{}, {}(x{})", name, self.rd, self.imm_i, self.rs1)
            }
            Opcode::Store => {
                let name = match self.funct3 {
                    0x0 => "sb",
                    0x1 => "sh",
                    0x2 => "sw",
                    _ => "sd",
                };
                format!("{} x{}, {}(x{})", name, self.rs2, self.imm_s, self.rs1)
            }
            Opcode::OpImm => match self.funct3 {
                0x0 => format!("addi x{}, x{}, {}", self.rd, self.rs1, self.imm_i),
                0x1 => format!("slli x{}, x{}, {}", self.rd, self.rs1, self.shamt),
                0x5 if self.funct7 & 0x20 != 0 => {
                    format!("srai x{}, x{}, {}", self.rd, self.rs1, self.shamt)
                }
                0x5 => format!("srli x{}, x{}, {}", self.rd, self.rs1, self.shamt),
                _ => format!("op-imm.{} x{}, x{}, {}", self.funct3, self.rd, self.rs1, self.imm_i),
            },
            Opcode::Op => format!(
                "op.{}.{:#x} x{}, x{}, x{}",
                self.funct3, self.funct7, self.rd, self.rs1, self.rs2
            ),
            Opcode::System => "ecall".to_string(),
            _ => format!("{:?} {:#010x}", self.opcode, self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_addi() {
        // addi x1, x0, 5
        let i = Instruction::decode(0x0050_0093).unwrap();
        assert_eq!(i.opcode, Opcode::OpImm);
        assert_eq!(i.rd, 1);
        assert_eq!(i.rs1, 0);
        assert_eq!(i.funct3, 0);
        assert_eq!(i.imm_i, 5);
    }

    #[test]
    fn decode_negative_i_immediate() {
        // addi x2, x1, -1
        let i = Instruction::decode(0xfff0_8113).unwrap();
        assert_eq!(i.imm_i, -1);
        assert_eq!(i.imm_i_u, 0xfff);
    }

    #[test]
    fn decode_branch_backward() {
        // beq x0, x0, -8  (B-form: imm = -8)
        // fields: imm[12]=1 imm[10:5]=111111 rs2=0 rs1=0 f3=0 imm[4:1]=1100 imm[11]=1
        let word = (1 << 31) | (0x3f << 25) | (0x0c << 8) | (1 << 7) | 0x63;
        let i = Instruction::decode(word).unwrap();
        assert_eq!(i.opcode, Opcode::Branch);
        assert_eq!(i.imm_b, -8);
    }

    #[test]
    fn decode_jal() {
        // jal x1, +16: imm[20]=0 imm[10:1]=0000001000 imm[11]=0 imm[19:12]=0
        let word = (0x008 << 21) | (1 << 7) | 0x6f;
        let i = Instruction::decode(word).unwrap();
        assert_eq!(i.opcode, Opcode::Jal);
        assert_eq!(i.rd, 1);
        assert_eq!(i.imm_j, 16);
    }

    #[test]
    fn decode_store_negative_offset() {
        // sw x5, -4(x2)
        let word = (0x7f << 25) | (5 << 20) | (2 << 15) | (0x2 << 12) | (0x1c << 7) | 0x23;
        let i = Instruction::decode(word).unwrap();
        assert_eq!(i.opcode, Opcode::Store);
        assert_eq!(i.imm_s, -4);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(Instruction::decode(0x0000_007b).is_none());
    }
}
