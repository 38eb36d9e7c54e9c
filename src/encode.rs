//! Instruction encoders
//!
//! Macros for assembling RV32IM+Zicsr instruction words, used by the
//! test suites to build guest programs without an external
//! assembler. Only produces valid encodings when the arguments are
//! in range.

use crate::utils::extract_field;

pub use crate::opcodes::*;

/// Make an I-type instruction
pub fn itype(imm: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    imm << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

/// Make an U- or J-type instruction (for J-type, construct the
/// immediate field first using jtype_imm_field)
pub fn ujtype(imm: u32, rd: u32, opcode: u32) -> u32 {
    imm << 12 | rd << 7 | opcode
}

/// Make an R- or S-type instruction. Both have the same field
/// layout; the meaning of a and b is:
///
/// R-type: a = funct7, b = rd
/// S-type: a = imm[11:5], b = imm[4:0]
pub fn rstype(
    a: u32,
    rs2: u32,
    rs1: u32,
    funct3: u32,
    b: u32,
    opcode: u32,
) -> u32 {
    a << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | b << 7 | opcode
}

/// Convert a register name (e.g. x3) to its index (e.g. 3)
pub fn reg_num_impl(reg_name: &str) -> Result<u32, &'static str> {
    if reg_name.len() != 2 && reg_name.len() != 3 {
        return Err("register name must be exactly two or three characters");
    }
    let mut characters = reg_name.chars();
    if characters.next().unwrap() != 'x' {
        return Err("register name must begin with x");
    }
    let n = characters
        .collect::<String>()
        .parse::<u32>()
        .map_err(|_| "final one or two digits of register name should be numbers")?;
    Ok(n)
}

#[macro_export]
macro_rules! reg_num {
    ($reg:expr) => {
        reg_num_impl(std::stringify!($reg))?
    };
}
pub use reg_num;

macro_rules! itype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $imm:expr) => {{
                let rd = reg_num!($rd);
                let rs1 = reg_num!($rs1);
                let imm: i32 = ($imm).into();
                itype(imm as u32, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

/// Variant of the I-type encoder where rs1 holds a 5-bit immediate,
/// used for the csr*i instructions
macro_rules! csritype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $uimm:expr, $csr:expr) => {{
                let rd = reg_num!($rd);
                let csr: u32 = ($csr).into();
                itype(csr, $uimm, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

/// CSR encoder taking a register source; the csr address goes in the
/// immediate field
macro_rules! csrtype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $csr:expr) => {{
                let rd = reg_num!($rd);
                let rs1 = reg_num!($rs1);
                let csr: u32 = ($csr).into();
                itype(csr, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

/// The shift-by-immediate instructions use the I-type layout with
/// the shift amount in the low 5 bits of the immediate; upper is
/// 0b0100000 for srai and zero otherwise
macro_rules! shift_instr {
    ($instruction:ident, $upper:expr, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $imm:expr) => {{
                let rd = reg_num!($rd);
                let rs1 = reg_num!($rs1);
                let imm = shifts_imm_field($imm, $upper);
                itype(imm, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

macro_rules! rtype_instr {
    ($instruction:ident, $funct7:expr, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:ident, $rs1:expr, $rs2:expr) => {{
                let rd = reg_num!($rd);
                let rs1 = reg_num!($rs1);
                let rs2 = reg_num!($rs2);
                rstype($funct7, rs2, rs1, $funct3, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

macro_rules! stype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rs2:expr, $rs1:expr, $imm:expr) => {{
                use $crate::utils::extract_field;
                let rs1 = reg_num!($rs1);
                let rs2 = reg_num!($rs2);
                let imm: i32 = ($imm).into();
                let imm11_5 = extract_field(imm as u32, 11, 5);
                let imm4_0 = extract_field(imm as u32, 4, 0);
                rstype(imm11_5, rs2, rs1, $funct3, imm4_0, $opcode)
            }};
        }
        pub use $instruction;
    };
}

pub fn shifts_imm_field(shamt: u32, upper: u32) -> u32 {
    let shamt = extract_field(shamt, 4, 0);
    (upper << 5) | shamt
}

/// Shuffle a J-type offset into the 20-bit field layout used by the
/// U-type encoder
pub fn jtype_imm_field(imm: i32) -> u32 {
    let imm = imm as u32;
    let imm20 = extract_field(imm, 20, 20);
    let imm19_12 = extract_field(imm, 19, 12);
    let imm11 = extract_field(imm, 11, 11);
    let imm10_1 = extract_field(imm, 10, 1);
    (imm20 << 19) | (imm10_1 << 9) | (imm11 << 8) | imm19_12
}

/// Returns (a, b) suitable for use with rstype for the conditional
/// branch instructions
pub fn btype_imm_fields(imm: i32) -> (u32, u32) {
    let imm = imm as u32;
    let imm12 = extract_field(imm, 12, 12);
    let imm11 = extract_field(imm, 11, 11);
    let imm10_5 = extract_field(imm, 10, 5);
    let imm4_1 = extract_field(imm, 4, 1);
    let a = (imm12 << 6) | imm10_5;
    let b = (imm4_1 << 1) | imm11;
    (a, b)
}

macro_rules! btype_instr {
    ($instruction:ident, $funct3:expr, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rs1:expr, $rs2:expr, $imm:expr) => {{
                let rs1 = reg_num!($rs1);
                let rs2 = reg_num!($rs2);
                let (a, b) = btype_imm_fields($imm);
                rstype(a, rs2, rs1, $funct3, b, $opcode)
            }};
        }
        pub use $instruction;
    };
}

#[macro_export]
macro_rules! jal {
    ($rd:expr, $imm:expr) => {{
        let rd = reg_num!($rd);
        let imm = jtype_imm_field($imm);
        ujtype(imm, rd, OP_JAL)
    }};
}
pub use jal;

/// In lui and auipc the immediate is already the upper 20 bits that
/// will be loaded; it is not shifted again here
macro_rules! utype_instr {
    ($instruction:ident, $opcode:expr) => {
        #[macro_export]
        macro_rules! $instruction {
            ($rd:expr, $imm:expr) => {{
                let rd = reg_num!($rd);
                let imm = ($imm) as u32;
                ujtype(imm, rd, $opcode)
            }};
        }
        pub use $instruction;
    };
}

utype_instr!(lui, OP_LUI);
utype_instr!(auipc, OP_AUIPC);
// jal is defined above
itype_instr!(jalr, 0b000, OP_JALR);

// Conditional branches
btype_instr!(beq, FUNCT3_BEQ, OP_BRANCH);
btype_instr!(bne, FUNCT3_BNE, OP_BRANCH);
btype_instr!(blt, FUNCT3_BLT, OP_BRANCH);
btype_instr!(bge, FUNCT3_BGE, OP_BRANCH);
btype_instr!(bltu, FUNCT3_BLTU, OP_BRANCH);
btype_instr!(bgeu, FUNCT3_BGEU, OP_BRANCH);

// Loads
itype_instr!(lb, FUNCT3_B, OP_LOAD);
itype_instr!(lh, FUNCT3_H, OP_LOAD);
itype_instr!(lw, FUNCT3_W, OP_LOAD);
itype_instr!(lbu, FUNCT3_BU, OP_LOAD);
itype_instr!(lhu, FUNCT3_HU, OP_LOAD);

// Stores
stype_instr!(sb, FUNCT3_B, OP_STORE);
stype_instr!(sh, FUNCT3_H, OP_STORE);
stype_instr!(sw, FUNCT3_W, OP_STORE);

// Integer register-immediate instructions
itype_instr!(addi, FUNCT3_ADDI, OP_IMM);
itype_instr!(slti, FUNCT3_SLTI, OP_IMM);
itype_instr!(sltiu, FUNCT3_SLTIU, OP_IMM);
itype_instr!(xori, FUNCT3_XORI, OP_IMM);
itype_instr!(ori, FUNCT3_ORI, OP_IMM);
itype_instr!(andi, FUNCT3_ANDI, OP_IMM);
shift_instr!(slli, 0b0000000, FUNCT3_SLLI, OP_IMM);
shift_instr!(srli, 0b0000000, FUNCT3_SRLI, OP_IMM);
shift_instr!(srai, 0b0100000, FUNCT3_SRLI, OP_IMM);

// Integer register-register instructions
rtype_instr!(add, 0b0000000, FUNCT3_ADD, OP);
rtype_instr!(sub, FUNCT7_SUB, FUNCT3_ADD, OP);
rtype_instr!(sll, 0b0000000, FUNCT3_SLL, OP);
rtype_instr!(slt, 0b0000000, FUNCT3_SLT, OP);
rtype_instr!(sltu, 0b0000000, FUNCT3_SLTU, OP);
rtype_instr!(xor, 0b0000000, FUNCT3_XOR, OP);
rtype_instr!(srl, 0b0000000, FUNCT3_SRL, OP);
rtype_instr!(sra, FUNCT7_SRA, FUNCT3_SRL, OP);
rtype_instr!(or, 0b0000000, FUNCT3_OR, OP);
rtype_instr!(and, 0b0000000, FUNCT3_AND, OP);

// Multiplication and division
rtype_instr!(mul, FUNCT7_MULDIV, FUNCT3_MUL, OP);
rtype_instr!(mulh, FUNCT7_MULDIV, FUNCT3_MULH, OP);
rtype_instr!(mulhsu, FUNCT7_MULDIV, FUNCT3_MULHSU, OP);
rtype_instr!(mulhu, FUNCT7_MULDIV, FUNCT3_MULHU, OP);
rtype_instr!(div, FUNCT7_MULDIV, FUNCT3_DIV, OP);
rtype_instr!(divu, FUNCT7_MULDIV, FUNCT3_DIVU, OP);
rtype_instr!(rem, FUNCT7_MULDIV, FUNCT3_REM, OP);
rtype_instr!(remu, FUNCT7_MULDIV, FUNCT3_REMU, OP);

// CSR instructions
csrtype_instr!(csrrw, FUNCT3_CSRRW, OP_SYSTEM);
csrtype_instr!(csrrs, FUNCT3_CSRRS, OP_SYSTEM);
csrtype_instr!(csrrc, FUNCT3_CSRRC, OP_SYSTEM);
csritype_instr!(csrrwi, FUNCT3_CSRRWI, OP_SYSTEM);
csritype_instr!(csrrsi, FUNCT3_CSRRSI, OP_SYSTEM);
csritype_instr!(csrrci, FUNCT3_CSRRCI, OP_SYSTEM);

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn check_known_words() -> Result<(), &'static str> {
        // Cross-checked against an external assembler
        assert_eq!(addi!(x5, x0, 5), 0x0050_0293);
        assert_eq!(add!(x7, x5, x6), 0x0062_83b3);
        assert_eq!(lui!(x5, 0x70000), 0x7000_02b7);
        assert_eq!(sw!(x6, x5, 0), 0x0062_a023);
        assert_eq!(jal!(x1, 8), 0x0080_00ef);
        Ok(())
    }

    #[test]
    fn check_branch_offset_encoding() -> Result<(), &'static str> {
        // beq x1, x2, -4 == 0xfe208ee3
        assert_eq!(beq!(x1, x2, -4), 0xfe20_8ee3);
        Ok(())
    }
}
