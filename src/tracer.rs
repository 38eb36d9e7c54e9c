//! Trace output
//!
//! Every observable event of a run goes through this module: one line
//! per retired instruction, one per trap, one per cache access, and
//! the closing hit-rate statistics. Instruction lines have the shape
//!
//! ```text
//! 0x<pc>:<mnemonic padded to 7> <operands>   <expression>
//! ```
//!
//! with ABI register names in the operands. Registers and addresses
//! print as zero-padded 8-digit hex.

use std::io::{self, Write};

use crate::cache::CacheEvent;
use crate::trap::Trap;

#[derive(Debug)]
pub struct Tracer<W: Write> {
    out: W,
}

impl<W: Write> Tracer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn lui(
        &mut self,
        pc: u32,
        rd: &str,
        imm20: u32,
        result: u32,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "0x{pc:08x}:{:<7}{rd},0x{imm20:05x}   rd=0x{result:08x}",
            "lui"
        )
    }

    pub fn auipc(
        &mut self,
        pc: u32,
        rd: &str,
        imm20: u32,
        imm: u32,
        result: u32,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "0x{pc:08x}:{:<7}{rd},0x{imm20:05x}   \
             rd=0x{pc:08x}+0x{imm:08x}=0x{result:08x}",
            "auipc"
        )
    }

    pub fn reg_reg(
        &mut self,
        pc: u32,
        mnemonic: &str,
        rd: &str,
        rs1: &str,
        rs2: &str,
        expression: &str,
        result: u32,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "0x{pc:08x}:{mnemonic:<7}{rd},{rs1},{rs2}   \
             {expression} -> 0x{result:08x}"
        )
    }

    pub fn reg_imm(
        &mut self,
        pc: u32,
        mnemonic: &str,
        rd: &str,
        rs1: &str,
        imm_operand: &str,
        expression: &str,
        result: u32,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "0x{pc:08x}:{mnemonic:<7}{rd},{rs1},{imm_operand}   \
             {expression} -> 0x{result:08x}"
        )
    }

    pub fn load(
        &mut self,
        pc: u32,
        mnemonic: &str,
        rd: &str,
        offset: u32,
        base: &str,
        addr: u32,
        value: u32,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "0x{pc:08x}:{mnemonic:<7}{rd},0x{offset:03x}({base})   \
             {rd}=mem[0x{addr:08x}]=0x{value:08x}"
        )
    }

    pub fn store(
        &mut self,
        pc: u32,
        mnemonic: &str,
        src: &str,
        offset: u32,
        base: &str,
        addr: u32,
        value: &str,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "0x{pc:08x}:{mnemonic:<7}{src},0x{offset:03x}({base})   \
             mem[0x{addr:08x}]={value}"
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn branch(
        &mut self,
        pc: u32,
        mnemonic: &str,
        rs1: &str,
        rs2: &str,
        target: u32,
        lhs: u32,
        op: &str,
        rhs: u32,
        taken: bool,
        next_pc: u32,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "0x{pc:08x}:{mnemonic:<7}{rs1},{rs2},0x{target:08x}   \
             (0x{lhs:08x}{op}0x{rhs:08x})={}->pc=0x{next_pc:08x}",
            u32::from(taken)
        )
    }

    pub fn jal(
        &mut self,
        pc: u32,
        rd: &str,
        target: u32,
        return_addr: u32,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "0x{pc:08x}:{:<7}{rd},0x{target:08x}   \
             pc=0x{target:08x},rd=0x{return_addr:08x}",
            "jal"
        )
    }

    pub fn jalr(
        &mut self,
        pc: u32,
        rd: &str,
        rs1: &str,
        offset: u32,
        base: u32,
        imm: u32,
        return_addr: u32,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            "0x{pc:08x}:{:<7}{rd},{rs1},0x{offset:03x}   \
             pc=0x{base:08x}+0x{imm:08x},rd=0x{return_addr:08x}",
            "jalr"
        )
    }

    pub fn csr_reg(
        &mut self,
        pc: u32,
        mnemonic: &str,
        rd: &str,
        csr: u16,
        rs1: &str,
    ) -> io::Result<()> {
        writeln!(self.out, "0x{pc:08x}:{mnemonic:<7}{rd},0x{csr:03x},{rs1}")
    }

    pub fn csr_imm(
        &mut self,
        pc: u32,
        mnemonic: &str,
        rd: &str,
        csr: u16,
        uimm: u32,
    ) -> io::Result<()> {
        writeln!(self.out, "0x{pc:08x}:{mnemonic:<7}{rd},0x{csr:03x},{uimm}")
    }

    pub fn ebreak(&mut self, pc: u32) -> io::Result<()> {
        writeln!(self.out, "0x{pc:08x}:ebreak")
    }

    pub fn mret(&mut self, pc: u32) -> io::Result<()> {
        writeln!(self.out, "0x{pc:08x}:mret")
    }

    /// Trap event line, written after the trap CSRs have been updated
    pub fn trap(
        &mut self,
        trap: &Trap,
        cause: u32,
        epc: u32,
        tval: u32,
    ) -> io::Result<()> {
        writeln!(
            self.out,
            ">{}:{} \t\t\tcause=0x{cause:08x},epc=0x{epc:08x},tval=0x{tval:08x}",
            trap.kind(),
            trap.name()
        )
    }

    pub fn cache_event(&mut self, event: &CacheEvent) -> io::Result<()> {
        writeln!(
            self.out,
            "#cache_mem:{} 0x{:08x} line={},valid={{{},{}}},\
             age={{{},{}}},id={{0x{:06x},0x{:06x}}}",
            event.label,
            event.address,
            event.index,
            event.valid[0],
            event.valid[1],
            event.age[0],
            event.age[1],
            event.tag[0],
            event.tag[1]
        )
    }

    /// Closing hit-rate line; nothing is written for a cache that was
    /// never accessed
    pub fn cache_stats(
        &mut self,
        label: &str,
        rate: Option<f64>,
    ) -> io::Result<()> {
        if let Some(rate) = rate {
            writeln!(self.out, "#cache_mem:{label} hit={rate:.4}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn text(tracer: &Tracer<Vec<u8>>) -> String {
        String::from_utf8(tracer.get_ref().clone()).unwrap()
    }

    #[test]
    fn check_reg_reg_line() {
        let mut tracer = Tracer::new(Vec::new());
        tracer
            .reg_reg(
                0x8000_0008,
                "add",
                "t2",
                "t0",
                "t1",
                "0x00000005+0x00000007",
                12,
            )
            .unwrap();
        assert_eq!(
            text(&tracer),
            "0x80000008:add    t2,t0,t1   0x00000005+0x00000007 -> 0x0000000c\n"
        );
    }

    #[test]
    fn check_load_line() {
        let mut tracer = Tracer::new(Vec::new());
        tracer
            .load(0x8000_0004, "lw", "t1", 0, "t0", 0x8000_0100, 0x42)
            .unwrap();
        assert_eq!(
            text(&tracer),
            "0x80000004:lw     t1,0x000(t0)   t1=mem[0x80000100]=0x00000042\n"
        );
    }

    #[test]
    fn check_branch_line() {
        let mut tracer = Tracer::new(Vec::new());
        tracer
            .branch(
                0x8000_000c,
                "beq",
                "t0",
                "t1",
                0x8000_0000,
                5,
                "==",
                5,
                true,
                0x8000_0000,
            )
            .unwrap();
        assert_eq!(
            text(&tracer),
            "0x8000000c:beq    t0,t1,0x80000000   \
             (0x00000005==0x00000005)=1->pc=0x80000000\n"
        );
    }

    #[test]
    fn check_cache_event_line() {
        let mut tracer = Tracer::new(Vec::new());
        tracer
            .cache_event(&CacheEvent {
                label: "irm",
                address: 0x8000_0000,
                index: 0,
                valid: [false, false],
                age: [0, 0],
                tag: [0, 0],
            })
            .unwrap();
        assert_eq!(
            text(&tracer),
            "#cache_mem:irm 0x80000000 line=0,valid={false,false},\
             age={0,0},id={0x000000,0x000000}\n"
        );
    }

    #[test]
    fn check_stats_line() {
        let mut tracer = Tracer::new(Vec::new());
        tracer.cache_stats("istats", Some(0.875)).unwrap();
        tracer.cache_stats("dstats", None).unwrap();
        assert_eq!(text(&tracer), "#cache_mem:istats hit=0.8750\n");
    }
}
