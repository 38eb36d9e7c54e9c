//! RISC-V Platform
//!
//! A 32-bit machine-mode-only RV32IM core with a 32 KiB physical
//! memory window, split instruction/data caches, and the trap
//! machinery for synchronous exceptions and machine interrupts. The
//! platform owns all simulator state: the register file, program
//! counter, CSR file, memory and both caches, plus the tracer that
//! receives one record per retired instruction, trap and cache
//! access.
//!
//! Progress is made by single stepping. Each step checks for pending
//! interrupts, then fetches through the instruction cache, decodes,
//! and executes. The program counter only advances when the
//! instruction retires; a trapping step leaves every other piece of
//! state untouched and redirects the pc to the handler in mtvec.
//! Execution ends when the guest executes ebreak.

use std::io::Write;

use thiserror::Error;

use crate::cache::{Cache, CacheKind};
use crate::csr::{CsrFile, CSR_MCAUSE, CSR_MEPC, CSR_MIP, CSR_MTVAL, MIP_MTIP};
use crate::decode::{decode, Decoded};
use crate::image::ImageSink;
use crate::memory::{AccessFault, Memory, Wordsize, MEM_BASE};
use crate::opcodes::*;
use crate::registers::{abi_name, RegisterFile};
use crate::tracer::Tracer;
use crate::trap::{self, Exception, Interrupt, Trap};
use crate::utils::sign_extend;

/// Host-side failure; guest exceptions never surface here
#[derive(Debug, Error)]
pub enum SimError {
    #[error("trace write failed: {0}")]
    TraceWrite(#[from] std::io::Error),
}

/// Result of one step
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Running,
    Halted,
}

/// Result of executing one instruction. Retired carries the next
/// program counter; Raised carries a synchronous exception, which the
/// driver turns into a trap without committing the step.
enum Effect {
    Retired(u32),
    Halted,
    Raised(Exception),
}

#[derive(Debug)]
pub struct Platform<W: Write> {
    pc: u32,
    registers: RegisterFile,
    csrs: CsrFile,
    memory: Memory,
    icache: Cache,
    dcache: Cache,
    tracer: Tracer<W>,
}

impl<W: Write> ImageSink for Platform<W> {
    /// Image bytes outside the memory window are dropped
    fn load_byte(&mut self, addr: u32, value: u8) {
        let _ = self.memory.write(addr, value.into(), Wordsize::Byte);
    }
}

impl<W: Write> Platform<W> {
    pub fn new(trace_out: W) -> Self {
        Self {
            pc: MEM_BASE,
            registers: RegisterFile::default(),
            csrs: CsrFile::default(),
            memory: Memory::default(),
            icache: Cache::new(CacheKind::Instruction),
            dcache: Cache::new(CacheKind::Data),
            tracer: Tracer::new(trace_out),
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    /// Read the value of register xn
    pub fn x(&self, n: u8) -> u32 {
        self.registers.read(n)
    }

    /// Write the value of register xn
    pub fn set_x(&mut self, n: u8, value: u32) {
        self.registers.write(n, value);
    }

    pub fn csr(&self, addr: u16) -> u32 {
        self.csrs.read(addr)
    }

    pub fn set_csr(&mut self, addr: u16, value: u32) {
        self.csrs.write(addr, value);
    }

    /// Read physical memory directly, bypassing the caches
    pub fn read_mem(
        &self,
        addr: u32,
        size: Wordsize,
    ) -> Result<u32, AccessFault> {
        self.memory.read(addr, size)
    }

    /// The trace sink
    pub fn trace_output(&self) -> &W {
        self.tracer.get_ref()
    }

    /// Perform one step
    ///
    /// In order: take the highest-priority pending enabled interrupt
    /// if interrupts are globally enabled; otherwise fetch through
    /// the instruction cache, decode, and execute. The pc advances
    /// only if the instruction retires without raising an exception.
    pub fn step(&mut self) -> Result<Outcome, SimError> {
        if let Some(int) = trap::pending_interrupt(&self.csrs) {
            self.enter_trap(Trap::Interrupt(int))?;
            // Only the timer pending bit clears on acceptance;
            // software and external stay set until the guest clears
            // them
            if int == Interrupt::Timer {
                self.csrs.clear_bits(CSR_MIP, MIP_MTIP);
            }
            return Ok(Outcome::Running);
        }

        let instr = match self.fetch()? {
            Ok(instr) => instr,
            Err(ex) => {
                self.enter_trap(Trap::Exception(ex))?;
                return Ok(Outcome::Running);
            }
        };

        let pc = self.pc;
        match self.execute(pc, instr)? {
            Effect::Retired(next_pc) => {
                self.pc = next_pc;
                Ok(Outcome::Running)
            }
            Effect::Halted => Ok(Outcome::Halted),
            Effect::Raised(ex) => {
                self.enter_trap(Trap::Exception(ex))?;
                Ok(Outcome::Running)
            }
        }
    }

    /// Step until the guest halts, then write the cache statistics
    pub fn run(&mut self) -> Result<(), SimError> {
        while self.step()? == Outcome::Running {}
        self.finish()
    }

    /// Write the end-of-run cache statistics and flush the trace
    pub fn finish(&mut self) -> Result<(), SimError> {
        self.tracer.cache_stats("istats", self.icache.hit_rate())?;
        self.tracer.cache_stats("dstats", self.dcache.hit_rate())?;
        self.tracer.flush()?;
        Ok(())
    }

    /// Redirect control to the trap handler, saving the return pc,
    /// cause and trap value, and stacking the interrupt enable bit
    fn enter_trap(&mut self, t: Trap) -> Result<(), SimError> {
        let handler = trap::enter(&mut self.csrs, self.pc, t);
        self.tracer.trap(
            &t,
            self.csrs.read(CSR_MCAUSE),
            self.csrs.read(CSR_MEPC),
            self.csrs.read(CSR_MTVAL),
        )?;
        self.pc = handler;
        Ok(())
    }

    fn fetch(&mut self) -> Result<Result<u32, Exception>, SimError> {
        match self.icache.read(&self.memory, self.pc, Wordsize::Word) {
            Ok((instr, event)) => {
                self.tracer.cache_event(&event)?;
                Ok(Ok(instr))
            }
            Err(fault) => {
                Ok(Err(Exception::InstructionAccessFault(fault.addr)))
            }
        }
    }

    fn execute(&mut self, pc: u32, instr: u32) -> Result<Effect, SimError> {
        let d = decode(instr);
        match d.opcode {
            OP_LUI => self.exec_lui(pc, &d),
            OP_AUIPC => self.exec_auipc(pc, &d),
            OP_LOAD => self.exec_load(pc, instr, &d),
            OP_STORE => self.exec_store(pc, instr, &d),
            OP => self.exec_op(pc, instr, &d),
            OP_IMM => self.exec_op_imm(pc, instr, &d),
            OP_BRANCH => self.exec_branch(pc, instr, &d),
            OP_JAL => self.exec_jal(pc, &d),
            OP_JALR => self.exec_jalr(pc, instr, &d),
            OP_SYSTEM => self.exec_system(pc, instr, &d),
            _ => Ok(Effect::Raised(Exception::IllegalInstruction(instr))),
        }
    }

    fn exec_lui(&mut self, pc: u32, d: &Decoded) -> Result<Effect, SimError> {
        let imm = d.imm as u32;
        self.tracer.lui(pc, abi_name(d.rd), imm >> 12, imm)?;
        self.registers.write(d.rd, imm);
        Ok(Effect::Retired(pc.wrapping_add(4)))
    }

    fn exec_auipc(&mut self, pc: u32, d: &Decoded) -> Result<Effect, SimError> {
        let imm = d.imm as u32;
        let value = pc.wrapping_add(imm);
        self.tracer.auipc(pc, abi_name(d.rd), imm >> 12, imm, value)?;
        self.registers.write(d.rd, value);
        Ok(Effect::Retired(pc.wrapping_add(4)))
    }

    fn exec_load(
        &mut self,
        pc: u32,
        instr: u32,
        d: &Decoded,
    ) -> Result<Effect, SimError> {
        let (mnemonic, size) = match d.funct3 {
            FUNCT3_B => ("lb", Wordsize::Byte),
            FUNCT3_H => ("lh", Wordsize::Halfword),
            FUNCT3_W => ("lw", Wordsize::Word),
            FUNCT3_BU => ("lbu", Wordsize::Byte),
            FUNCT3_HU => ("lhu", Wordsize::Halfword),
            _ => return Ok(Effect::Raised(Exception::IllegalInstruction(instr))),
        };
        let addr = self.registers.read(d.rs1).wrapping_add(d.imm as u32);
        let (raw, event) = match self.dcache.read(&self.memory, addr, size) {
            Ok(served) => served,
            Err(fault) => {
                return Ok(Effect::Raised(Exception::LoadAccessFault(
                    fault.addr,
                )))
            }
        };
        self.tracer.cache_event(&event)?;
        let value = match d.funct3 {
            FUNCT3_B => sign_extend(raw, 8) as u32,
            FUNCT3_H => sign_extend(raw, 16) as u32,
            _ => raw,
        };
        self.tracer.load(
            pc,
            mnemonic,
            abi_name(d.rd),
            d.imm as u32 & 0xfff,
            abi_name(d.rs1),
            addr,
            value,
        )?;
        self.registers.write(d.rd, value);
        Ok(Effect::Retired(pc.wrapping_add(4)))
    }

    fn exec_store(
        &mut self,
        pc: u32,
        instr: u32,
        d: &Decoded,
    ) -> Result<Effect, SimError> {
        let (mnemonic, size) = match d.funct3 {
            FUNCT3_B => ("sb", Wordsize::Byte),
            FUNCT3_H => ("sh", Wordsize::Halfword),
            FUNCT3_W => ("sw", Wordsize::Word),
            _ => return Ok(Effect::Raised(Exception::IllegalInstruction(instr))),
        };
        let addr = self.registers.read(d.rs1).wrapping_add(d.imm as u32);
        let value = self.registers.read(d.rs2);
        let event =
            match self.dcache.write(&mut self.memory, addr, value, size) {
                Ok(event) => event,
                Err(fault) => {
                    return Ok(Effect::Raised(Exception::StoreAccessFault(
                        fault.addr,
                    )))
                }
            };
        self.tracer.cache_event(&event)?;
        let value_str = match size {
            Wordsize::Byte => format!("0x{:02x}", value as u8),
            Wordsize::Halfword => format!("0x{:04x}", value as u16),
            Wordsize::Word => format!("0x{value:08x}"),
        };
        self.tracer.store(
            pc,
            mnemonic,
            abi_name(d.rs2),
            d.imm as u32 & 0xfff,
            abi_name(d.rs1),
            addr,
            &value_str,
        )?;
        Ok(Effect::Retired(pc.wrapping_add(4)))
    }

    fn exec_op(
        &mut self,
        pc: u32,
        instr: u32,
        d: &Decoded,
    ) -> Result<Effect, SimError> {
        let src1 = self.registers.read(d.rs1);
        let src2 = self.registers.read(d.rs2);
        // Shift amount is the low 5 bits of the second operand
        let shamt = src2 & 0x1f;
        let (mnemonic, expression, value) = if d.funct7 == FUNCT7_MULDIV {
            let s1 = src1 as i32;
            let s2 = src2 as i32;
            match d.funct3 {
                FUNCT3_MUL => (
                    "mul",
                    format!("0x{src1:08x}*0x{src2:08x}"),
                    s1.wrapping_mul(s2) as u32,
                ),
                FUNCT3_MULH => (
                    "mulh",
                    format!("(hi)0x{src1:08x}*0x{src2:08x}"),
                    ((i64::from(s1) * i64::from(s2)) >> 32) as u32,
                ),
                FUNCT3_MULHSU => (
                    "mulhsu",
                    format!("(hi)0x{src1:08x}*(U)0x{src2:08x}"),
                    ((i64::from(s1) * i64::from(src2)) >> 32) as u32,
                ),
                FUNCT3_MULHU => (
                    "mulhu",
                    format!("(hi)(U)0x{src1:08x}*(U)0x{src2:08x}"),
                    ((u64::from(src1) * u64::from(src2)) >> 32) as u32,
                ),
                FUNCT3_DIV => {
                    let quotient = if s2 == 0 {
                        -1
                    } else if s1 == i32::MIN && s2 == -1 {
                        s1
                    } else {
                        s1 / s2
                    };
                    (
                        "div",
                        format!("0x{src1:08x}/0x{src2:08x}"),
                        quotient as u32,
                    )
                }
                FUNCT3_DIVU => {
                    let quotient =
                        if src2 == 0 { u32::MAX } else { src1 / src2 };
                    (
                        "divu",
                        format!("(U)0x{src1:08x}/(U)0x{src2:08x}"),
                        quotient,
                    )
                }
                FUNCT3_REM => {
                    let remainder = if s2 == 0 {
                        s1
                    } else if s1 == i32::MIN && s2 == -1 {
                        0
                    } else {
                        s1 % s2
                    };
                    (
                        "rem",
                        format!("0x{src1:08x}%0x{src2:08x}"),
                        remainder as u32,
                    )
                }
                FUNCT3_REMU => {
                    let remainder =
                        if src2 == 0 { src1 } else { src1 % src2 };
                    (
                        "remu",
                        format!("(U)0x{src1:08x}%(U)0x{src2:08x}"),
                        remainder,
                    )
                }
                _ => {
                    return Ok(Effect::Raised(Exception::IllegalInstruction(
                        instr,
                    )))
                }
            }
        } else {
            match (d.funct3, d.funct7) {
                (FUNCT3_ADD, 0) => (
                    "add",
                    format!("0x{src1:08x}+0x{src2:08x}"),
                    src1.wrapping_add(src2),
                ),
                (FUNCT3_ADD, FUNCT7_SUB) => (
                    "sub",
                    format!("0x{src1:08x}-0x{src2:08x}"),
                    src1.wrapping_sub(src2),
                ),
                (FUNCT3_SLL, 0) => (
                    "sll",
                    format!("0x{src1:08x}<<{shamt}"),
                    src1 << shamt,
                ),
                (FUNCT3_SLT, 0) => (
                    "slt",
                    format!("(0x{src1:08x}<0x{src2:08x})"),
                    u32::from((src1 as i32) < (src2 as i32)),
                ),
                (FUNCT3_SLTU, 0) => (
                    "sltu",
                    format!("(0x{src1:08x}<0x{src2:08x}) (unsigned)"),
                    u32::from(src1 < src2),
                ),
                (FUNCT3_XOR, 0) => (
                    "xor",
                    format!("0x{src1:08x}^0x{src2:08x}"),
                    src1 ^ src2,
                ),
                (FUNCT3_SRL, 0) => (
                    "srl",
                    format!("0x{src1:08x}>>{shamt}"),
                    src1 >> shamt,
                ),
                (FUNCT3_SRL, FUNCT7_SRA) => (
                    "sra",
                    format!("0x{src1:08x}>>{shamt}"),
                    ((src1 as i32) >> shamt) as u32,
                ),
                (FUNCT3_OR, 0) => (
                    "or",
                    format!("0x{src1:08x}|0x{src2:08x}"),
                    src1 | src2,
                ),
                (FUNCT3_AND, 0) => (
                    "and",
                    format!("0x{src1:08x}&0x{src2:08x}"),
                    src1 & src2,
                ),
                _ => {
                    return Ok(Effect::Raised(Exception::IllegalInstruction(
                        instr,
                    )))
                }
            }
        };
        self.tracer.reg_reg(
            pc,
            mnemonic,
            abi_name(d.rd),
            abi_name(d.rs1),
            abi_name(d.rs2),
            &expression,
            value,
        )?;
        self.registers.write(d.rd, value);
        Ok(Effect::Retired(pc.wrapping_add(4)))
    }

    fn exec_op_imm(
        &mut self,
        pc: u32,
        instr: u32,
        d: &Decoded,
    ) -> Result<Effect, SimError> {
        let src1 = self.registers.read(d.rs1);
        let imm = d.imm as u32;
        // For shifts the rs2 field holds the shift amount and funct7
        // selects the shift type
        let shamt = u32::from(d.rs2);
        let (mnemonic, expression, value) = match d.funct3 {
            FUNCT3_ADDI => (
                "addi",
                format!("0x{src1:08x}+0x{imm:08x}"),
                src1.wrapping_add(imm),
            ),
            FUNCT3_SLTI => (
                "slti",
                format!("(0x{src1:08x}<{})", d.imm),
                u32::from((src1 as i32) < d.imm),
            ),
            FUNCT3_SLTIU => (
                "sltiu",
                format!("(0x{src1:08x}<{})", d.imm),
                u32::from(src1 < imm),
            ),
            FUNCT3_XORI => (
                "xori",
                format!("0x{src1:08x}^0x{imm:08x}"),
                src1 ^ imm,
            ),
            FUNCT3_ORI => (
                "ori",
                format!("0x{src1:08x}|0x{imm:08x}"),
                src1 | imm,
            ),
            FUNCT3_ANDI => (
                "andi",
                format!("0x{src1:08x}&0x{imm:08x}"),
                src1 & imm,
            ),
            FUNCT3_SLLI => {
                if d.funct7 != 0 {
                    return Ok(Effect::Raised(Exception::IllegalInstruction(
                        instr,
                    )));
                }
                ("slli", format!("0x{src1:08x}<<{shamt}"), src1 << shamt)
            }
            FUNCT3_SRLI => match d.funct7 {
                0 => ("srli", format!("0x{src1:08x}>>{shamt}"), src1 >> shamt),
                FUNCT7_SRA => (
                    "srai",
                    format!("0x{src1:08x}>>{shamt}"),
                    ((src1 as i32) >> shamt) as u32,
                ),
                _ => {
                    return Ok(Effect::Raised(Exception::IllegalInstruction(
                        instr,
                    )))
                }
            },
            _ => {
                return Ok(Effect::Raised(Exception::IllegalInstruction(
                    instr,
                )))
            }
        };
        let imm_operand =
            if d.funct3 == FUNCT3_SLLI || d.funct3 == FUNCT3_SRLI {
                format!("{shamt}")
            } else {
                format!("0x{:03x}", imm & 0xfff)
            };
        self.tracer.reg_imm(
            pc,
            mnemonic,
            abi_name(d.rd),
            abi_name(d.rs1),
            &imm_operand,
            &expression,
            value,
        )?;
        self.registers.write(d.rd, value);
        Ok(Effect::Retired(pc.wrapping_add(4)))
    }

    fn exec_branch(
        &mut self,
        pc: u32,
        instr: u32,
        d: &Decoded,
    ) -> Result<Effect, SimError> {
        let src1 = self.registers.read(d.rs1);
        let src2 = self.registers.read(d.rs2);
        let (mnemonic, op, taken) = match d.funct3 {
            FUNCT3_BEQ => ("beq", "==", src1 == src2),
            FUNCT3_BNE => ("bne", "!=", src1 != src2),
            FUNCT3_BLT => ("blt", "<", (src1 as i32) < (src2 as i32)),
            FUNCT3_BGE => ("bge", ">=", (src1 as i32) >= (src2 as i32)),
            FUNCT3_BLTU => ("bltu", "<(U)", src1 < src2),
            FUNCT3_BGEU => ("bgeu", ">=(U)", src1 >= src2),
            _ => return Ok(Effect::Raised(Exception::IllegalInstruction(instr))),
        };
        let target = pc.wrapping_add(d.imm as u32);
        let next_pc = if taken { target } else { pc.wrapping_add(4) };
        self.tracer.branch(
            pc,
            mnemonic,
            abi_name(d.rs1),
            abi_name(d.rs2),
            target,
            src1,
            op,
            src2,
            taken,
            next_pc,
        )?;
        Ok(Effect::Retired(next_pc))
    }

    fn exec_jal(&mut self, pc: u32, d: &Decoded) -> Result<Effect, SimError> {
        let target = pc.wrapping_add(d.imm as u32);
        let return_addr = pc.wrapping_add(4);
        self.tracer.jal(pc, abi_name(d.rd), target, return_addr)?;
        self.registers.write(d.rd, return_addr);
        Ok(Effect::Retired(target))
    }

    fn exec_jalr(
        &mut self,
        pc: u32,
        instr: u32,
        d: &Decoded,
    ) -> Result<Effect, SimError> {
        if d.funct3 != 0 {
            return Ok(Effect::Raised(Exception::IllegalInstruction(instr)));
        }
        let base = self.registers.read(d.rs1);
        let target = base.wrapping_add(d.imm as u32) & !1;
        let return_addr = pc.wrapping_add(4);
        self.tracer.jalr(
            pc,
            abi_name(d.rd),
            abi_name(d.rs1),
            d.imm as u32 & 0xfff,
            base,
            d.imm as u32,
            return_addr,
        )?;
        self.registers.write(d.rd, return_addr);
        Ok(Effect::Retired(target))
    }

    fn exec_system(
        &mut self,
        pc: u32,
        instr: u32,
        d: &Decoded,
    ) -> Result<Effect, SimError> {
        if d.funct3 == 0 {
            return match instr {
                INSTR_ECALL => {
                    Ok(Effect::Raised(Exception::EnvironmentCall))
                }
                INSTR_EBREAK => {
                    self.tracer.ebreak(pc)?;
                    Ok(Effect::Halted)
                }
                INSTR_MRET => {
                    self.tracer.mret(pc)?;
                    let next_pc = trap::mret(&mut self.csrs);
                    Ok(Effect::Retired(next_pc))
                }
                _ => Ok(Effect::Raised(Exception::IllegalInstruction(instr))),
            };
        }

        let csr = ((instr >> 20) & 0xfff) as u16;
        let uimm = u32::from(d.rs1);
        let old = self.csrs.read(csr);
        let mnemonic = match d.funct3 {
            FUNCT3_CSRRW => {
                self.csrs.write(csr, self.registers.read(d.rs1));
                "csrrw"
            }
            FUNCT3_CSRRS => {
                // The write is skipped entirely when the source is x0
                if d.rs1 != 0 {
                    let mask = self.registers.read(d.rs1);
                    self.csrs.write(csr, old | mask);
                }
                "csrrs"
            }
            FUNCT3_CSRRC => {
                if d.rs1 != 0 {
                    let mask = self.registers.read(d.rs1);
                    self.csrs.write(csr, old & !mask);
                }
                "csrrc"
            }
            FUNCT3_CSRRWI => {
                self.csrs.write(csr, uimm);
                "csrrwi"
            }
            FUNCT3_CSRRSI => {
                if uimm != 0 {
                    self.csrs.write(csr, old | uimm);
                }
                "csrrsi"
            }
            FUNCT3_CSRRCI => {
                if uimm != 0 {
                    self.csrs.write(csr, old & !uimm);
                }
                "csrrci"
            }
            _ => {
                return Ok(Effect::Raised(Exception::IllegalInstruction(
                    instr,
                )))
            }
        };
        if matches!(d.funct3, FUNCT3_CSRRW | FUNCT3_CSRRS | FUNCT3_CSRRC) {
            self.tracer
                .csr_reg(pc, mnemonic, abi_name(d.rd), csr, abi_name(d.rs1))?;
        } else {
            self.tracer.csr_imm(pc, mnemonic, abi_name(d.rd), csr, uimm)?;
        }
        self.registers.write(d.rd, old);
        Ok(Effect::Retired(pc.wrapping_add(4)))
    }
}
