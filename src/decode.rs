//! Instruction decoder
//!
//! A pure function from a 32-bit instruction word to a record of its
//! fields. The immediate is selected by the instruction's format,
//! which is implied by the opcode; opcodes with no immediate leave it
//! zero. Nothing here can fail: unknown opcodes are rejected by the
//! execute unit, which sees the raw fields.

use crate::opcodes::*;
use crate::utils::{extract_field, sign_extend};

/// Decoded instruction fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub opcode: u32,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub funct3: u32,
    pub funct7: u32,
    pub imm: i32,
}

/// Makes a function called field_name which gets that field from a
/// 32-bit instruction word (bits instr[end:start] in verilog
/// notation), converted to the named type.
macro_rules! make_field_getter {
    ($field_name:ident, $field_type:ty, $end:expr, $start:expr) => {
        fn $field_name(instr: u32) -> $field_type {
            extract_field(instr, $end, $start).try_into().unwrap()
        }
    };
}

make_field_getter!(opcode, u32, 6, 0);
make_field_getter!(rd, u8, 11, 7);
make_field_getter!(funct3, u32, 14, 12);
make_field_getter!(rs1, u8, 19, 15);
make_field_getter!(rs2, u8, 24, 20);
make_field_getter!(funct7, u32, 31, 25);

fn imm_itype(instr: u32) -> i32 {
    sign_extend(extract_field(instr, 31, 20), 12)
}

fn imm_stype(instr: u32) -> i32 {
    let imm11_5 = extract_field(instr, 31, 25);
    let imm4_0 = extract_field(instr, 11, 7);
    sign_extend((imm11_5 << 5) | imm4_0, 12)
}

fn imm_btype(instr: u32) -> i32 {
    let imm12 = extract_field(instr, 31, 31);
    let imm11 = extract_field(instr, 7, 7);
    let imm10_5 = extract_field(instr, 30, 25);
    let imm4_1 = extract_field(instr, 11, 8);
    let imm = (imm12 << 12) | (imm11 << 11) | (imm10_5 << 5) | (imm4_1 << 1);
    sign_extend(imm, 13)
}

/// The U-type immediate occupies the top 20 bits directly, so the
/// layout itself provides the sign extension
fn imm_utype(instr: u32) -> i32 {
    (instr & 0xffff_f000) as i32
}

fn imm_jtype(instr: u32) -> i32 {
    let imm20 = extract_field(instr, 31, 31);
    let imm19_12 = extract_field(instr, 19, 12);
    let imm11 = extract_field(instr, 20, 20);
    let imm10_1 = extract_field(instr, 30, 21);
    let imm = (imm20 << 20) | (imm19_12 << 12) | (imm11 << 11) | (imm10_1 << 1);
    sign_extend(imm, 21)
}

/// Decode an instruction word into its fields
pub fn decode(instr: u32) -> Decoded {
    let opcode = opcode(instr);
    let imm = match opcode {
        OP_LOAD | OP_IMM | OP_JALR | OP_SYSTEM => imm_itype(instr),
        OP_STORE => imm_stype(instr),
        OP_BRANCH => imm_btype(instr),
        OP_LUI | OP_AUIPC => imm_utype(instr),
        OP_JAL => imm_jtype(instr),
        _ => 0,
    };
    Decoded {
        opcode,
        rd: rd(instr),
        rs1: rs1(instr),
        rs2: rs2(instr),
        funct3: funct3(instr),
        funct7: funct7(instr),
        imm,
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode::*;

    #[test]
    fn check_decode_itype() -> Result<(), &'static str> {
        let d = decode(addi!(x5, x6, -23));
        assert_eq!(d.opcode, OP_IMM);
        assert_eq!(d.rd, 5);
        assert_eq!(d.rs1, 6);
        assert_eq!(d.funct3, FUNCT3_ADDI);
        assert_eq!(d.imm, -23);
        Ok(())
    }

    #[test]
    fn check_decode_rtype() -> Result<(), &'static str> {
        let d = decode(sub!(x7, x5, x6));
        assert_eq!(d.opcode, OP);
        assert_eq!(d.rd, 7);
        assert_eq!(d.rs1, 5);
        assert_eq!(d.rs2, 6);
        assert_eq!(d.funct3, FUNCT3_ADD);
        assert_eq!(d.funct7, FUNCT7_SUB);
        assert_eq!(d.imm, 0);
        Ok(())
    }

    #[test]
    fn check_decode_stype() -> Result<(), &'static str> {
        let d = decode(sw!(x2, x1, -16));
        assert_eq!(d.opcode, OP_STORE);
        assert_eq!(d.rs1, 1);
        assert_eq!(d.rs2, 2);
        assert_eq!(d.funct3, FUNCT3_W);
        assert_eq!(d.imm, -16);
        Ok(())
    }

    #[test]
    fn check_decode_btype() -> Result<(), &'static str> {
        let d = decode(beq!(x1, x2, -8));
        assert_eq!(d.opcode, OP_BRANCH);
        assert_eq!(d.rs1, 1);
        assert_eq!(d.rs2, 2);
        assert_eq!(d.imm, -8);

        let d = decode(bgeu!(x3, x4, 0xffe));
        assert_eq!(d.funct3, FUNCT3_BGEU);
        assert_eq!(d.imm, 0xffe);
        Ok(())
    }

    #[test]
    fn check_decode_utype() -> Result<(), &'static str> {
        let d = decode(lui!(x5, 0x70000));
        assert_eq!(d.opcode, OP_LUI);
        assert_eq!(d.rd, 5);
        assert_eq!(d.imm as u32, 0x7000_0000);

        let d = decode(lui!(x5, 0x80000));
        assert_eq!(d.imm as u32, 0x8000_0000);
        Ok(())
    }

    #[test]
    fn check_decode_jtype() -> Result<(), &'static str> {
        let d = decode(jal!(x1, -4));
        assert_eq!(d.opcode, OP_JAL);
        assert_eq!(d.rd, 1);
        assert_eq!(d.imm, -4);

        let d = decode(jal!(x0, 0x1000));
        assert_eq!(d.imm, 0x1000);
        Ok(())
    }

    #[test]
    fn check_decode_shift_immediates() -> Result<(), &'static str> {
        let d = decode(srai!(x1, x2, 4));
        assert_eq!(d.opcode, OP_IMM);
        assert_eq!(d.funct3, FUNCT3_SRLI);
        assert_eq!(d.funct7, FUNCT7_SRA);
        assert_eq!(d.rs2, 4);
        Ok(())
    }
}
