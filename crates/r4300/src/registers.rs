//! The architectural state of the CPU.
use crate::{
    Address,
    cop0::{Cop0, reg},
    cop1::Cop1,
    tlb::Tlb,
};
use std::fmt::Debug;

/// The state of the VR4300. `#[repr(C)]` so generated code can address fields by offset.
#[repr(C)]
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Cpu {
    pub gpr: [u64; 32],
    pub hi: u64,
    pub lo: u64,
    pub pc: Address,
    /// Load-linked bit.
    pub llbit: u32,
    /// Whether the instruction currently executing sits in a delay slot.
    pub delay_slot: bool,
    pub cop0: Cop0,
    pub cop1: Cop1,
    pub tlb: Tlb,
}

/// Conventional names of the general purpose registers.
pub const GPR_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "s8",
    "ra",
];

impl Cpu {
    /// Writes a GPR, discarding writes to `r0`.
    #[inline(always)]
    pub fn set_gpr(&mut self, index: u8, value: u64) {
        if index != 0 {
            self.gpr[index as usize] = value;
        }
    }

    /// Whether COP1 registers are in full 64-bit mode (Status.FR).
    #[inline(always)]
    pub fn fr(&self) -> bool {
        self.cop0.status().fr()
    }
}

impl Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct Gprs<'a>(&'a [u64; 32]);

        impl Debug for Gprs<'_> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut map = f.debug_map();
                for (name, value) in GPR_NAMES.iter().zip(self.0) {
                    if *value != 0 {
                        map.entry(name, &format_args!("0x{value:016X}"));
                    }
                }

                map.finish_non_exhaustive()
            }
        }

        f.debug_struct("Cpu")
            .field("pc", &self.pc)
            .field("gpr", &Gprs(&self.gpr))
            .field("hi", &format_args!("0x{:016X}", self.hi))
            .field("lo", &format_args!("0x{:016X}", self.lo))
            .field("status", &format_args!("0x{:08X}", self.cop0.regs[reg::STATUS]))
            .field("cause", &format_args!("0x{:08X}", self.cop0.regs[reg::CAUSE]))
            .field("count", &self.cop0.regs[reg::COUNT])
            .finish_non_exhaustive()
    }
}

/// A register of the CPU state that generated code accesses directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Gpr(u8),
    Hi,
    Lo,
    /// Raw 64-bit FPU register slot.
    Fgr(u8),
    Fcr31,
    Cop0(u8),
    Pc,
    LlBit,
    DelaySlot,
}

impl Reg {
    /// Size of the register in bytes.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            Self::Gpr(_) | Self::Hi | Self::Lo | Self::Fgr(_) => 8,
            Self::Fcr31 | Self::Cop0(_) | Self::Pc | Self::LlBit => 4,
            Self::DelaySlot => 1,
        }
    }

    /// Offset of the register inside [`Cpu`].
    #[inline]
    pub fn offset(self) -> usize {
        match self {
            Self::Gpr(i) => {
                assert!(i < 32);
                util::offset_of!(Cpu, gpr) + size_of::<u64>() * i as usize
            }
            Self::Hi => util::offset_of!(Cpu, hi),
            Self::Lo => util::offset_of!(Cpu, lo),
            Self::Fgr(i) => {
                assert!(i < 32);
                util::offset_of!(Cpu, cop1.fgr) + size_of::<u64>() * i as usize
            }
            Self::Fcr31 => util::offset_of!(Cpu, cop1.fcr31),
            Self::Cop0(i) => {
                assert!(i < 32);
                util::offset_of!(Cpu, cop0.regs) + size_of::<u32>() * i as usize
            }
            Self::Pc => util::offset_of!(Cpu, pc),
            Self::LlBit => util::offset_of!(Cpu, llbit),
            Self::DelaySlot => util::offset_of!(Cpu, delay_slot),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn r0_is_hardwired() {
        let mut cpu = Cpu::default();
        cpu.set_gpr(0, 5);
        cpu.set_gpr(1, 5);
        assert_eq!(cpu.gpr[0], 0);
        assert_eq!(cpu.gpr[1], 5);
    }

    #[test]
    fn offsets_point_at_fields() {
        let mut cpu = Cpu::default();
        cpu.gpr[7] = 0xDEAD_BEEF_0000_0001;
        cpu.cop0.regs[9] = 0x1234;
        cpu.cop1.fgr[3] = 42;
        cpu.pc = Address(0x8000_0400);

        let base = (&raw const cpu).cast::<u8>();
        let read_u64 = |reg: Reg| unsafe { base.add(reg.offset()).cast::<u64>().read_unaligned() };
        let read_u32 = |reg: Reg| unsafe { base.add(reg.offset()).cast::<u32>().read_unaligned() };

        assert_eq!(read_u64(Reg::Gpr(7)), 0xDEAD_BEEF_0000_0001);
        assert_eq!(read_u64(Reg::Fgr(3)), 42);
        assert_eq!(read_u32(Reg::Cop0(9)), 0x1234);
        assert_eq!(read_u32(Reg::Pc), 0x8000_0400);
    }
}
