//! Register blocks of the memory mapped peripherals.
//!
//! The core only emulates the side effects that affect the CPU: interrupt lines, DMAs into RDRAM
//! and PIF RAM, and the vertical interrupt. Everything else is plain storage.

/// Index of each register inside its block.
pub mod mi {
    pub const MODE: usize = 0;
    pub const VERSION: usize = 1;
    pub const INTR: usize = 2;
    pub const INTR_MASK: usize = 3;

    pub const SP: u32 = 1 << 0;
    pub const SI: u32 = 1 << 1;
    pub const AI: u32 = 1 << 2;
    pub const VI: u32 = 1 << 3;
    pub const PI: u32 = 1 << 4;
    pub const DP: u32 = 1 << 5;
}

pub mod pi {
    pub const DRAM_ADDR: usize = 0;
    pub const CART_ADDR: usize = 1;
    pub const RD_LEN: usize = 2;
    pub const WR_LEN: usize = 3;
    pub const STATUS: usize = 4;
}

pub mod si {
    pub const DRAM_ADDR: usize = 0;
    pub const PIF_ADDR_RD64B: usize = 1;
    pub const PIF_ADDR_WR64B: usize = 4;
    pub const STATUS: usize = 6;

    /// Interrupt bit of the status register.
    pub const STATUS_INTERRUPT: u32 = 0x1000;
}

pub mod vi {
    pub const STATUS: usize = 0;
    pub const ORIGIN: usize = 1;
    pub const WIDTH: usize = 2;
    pub const V_INTR: usize = 3;
    pub const CURRENT: usize = 4;
}

pub mod ai {
    pub const STATUS: usize = 3;
}

pub mod sp {
    pub const STATUS: usize = 4;
}

/// Physical base address and block size of every register block.
pub mod base {
    pub const RDRAM: u32 = 0x03F0_0000;
    pub const SP: u32 = 0x0404_0000;
    pub const RSP: u32 = 0x0408_0000;
    pub const DPC: u32 = 0x0410_0000;
    pub const DPS: u32 = 0x0420_0000;
    pub const MI: u32 = 0x0430_0000;
    pub const VI: u32 = 0x0440_0000;
    pub const AI: u32 = 0x0450_0000;
    pub const PI: u32 = 0x0460_0000;
    pub const RI: u32 = 0x0470_0000;
    pub const SI: u32 = 0x0480_0000;
}

/// The register blocks, in the order they appear in snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripherals {
    pub rdram: [u32; 10],
    pub mi: [u32; 4],
    pub pi: [u32; 13],
    pub sp: [u32; 8],
    pub rsp: [u32; 2],
    pub si: [u32; 7],
    pub vi: [u32; 14],
    pub ri: [u32; 8],
    pub ai: [u32; 6],
    pub dpc: [u32; 8],
    pub dps: [u32; 4],
}

impl Default for Peripherals {
    fn default() -> Self {
        let mut result = Self {
            rdram: [0; 10],
            mi: [0; 4],
            pi: [0; 13],
            sp: [0; 8],
            rsp: [0; 2],
            si: [0; 7],
            vi: [0; 14],
            ri: [0; 8],
            ai: [0; 6],
            dpc: [0; 8],
            dps: [0; 4],
        };

        result.mi[mi::VERSION] = 0x0202_0102;
        result.sp[sp::STATUS] = 1;
        result
    }
}

/// Identifies a register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Rdram,
    Mi,
    Pi,
    Sp,
    Rsp,
    Si,
    Vi,
    Ri,
    Ai,
    Dpc,
    Dps,
}

impl Peripherals {
    #[inline(always)]
    pub fn block(&self, block: Block) -> &[u32] {
        match block {
            Block::Rdram => &self.rdram,
            Block::Mi => &self.mi,
            Block::Pi => &self.pi,
            Block::Sp => &self.sp,
            Block::Rsp => &self.rsp,
            Block::Si => &self.si,
            Block::Vi => &self.vi,
            Block::Ri => &self.ri,
            Block::Ai => &self.ai,
            Block::Dpc => &self.dpc,
            Block::Dps => &self.dps,
        }
    }

    #[inline(always)]
    pub fn block_mut(&mut self, block: Block) -> &mut [u32] {
        match block {
            Block::Rdram => &mut self.rdram,
            Block::Mi => &mut self.mi,
            Block::Pi => &mut self.pi,
            Block::Sp => &mut self.sp,
            Block::Rsp => &mut self.rsp,
            Block::Si => &mut self.si,
            Block::Vi => &mut self.vi,
            Block::Ri => &mut self.ri,
            Block::Ai => &mut self.ai,
            Block::Dpc => &mut self.dpc,
            Block::Dps => &mut self.dps,
        }
    }

    /// Iterates over all blocks in snapshot order.
    pub fn blocks(&self) -> impl Iterator<Item = &[u32]> {
        [
            &self.rdram[..],
            &self.mi,
            &self.pi,
            &self.sp,
            &self.rsp,
            &self.si,
            &self.vi,
            &self.ri,
            &self.ai,
            &self.dpc,
            &self.dps,
        ]
        .into_iter()
    }

    /// Iterates mutably over all blocks in snapshot order.
    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut [u32]> {
        [
            &mut self.rdram[..],
            &mut self.mi,
            &mut self.pi,
            &mut self.sp,
            &mut self.rsp,
            &mut self.si,
            &mut self.vi,
            &mut self.ri,
            &mut self.ai,
            &mut self.dpc,
            &mut self.dps,
        ]
        .into_iter()
    }

    /// Whether the serial interface registers describe a DMA that could actually happen: the
    /// RDRAM address must be inside RDRAM and the PIF addresses must point at PIF RAM.
    pub fn si_is_plausible(&self) -> bool {
        let pif_ok = |addr: u32| addr == 0 || addr == super::bus::PIF_RAM_BASE;
        (self.si[si::DRAM_ADDR] as usize) < super::mem::RDRAM_LEN
            && pif_ok(self.si[si::PIF_ADDR_RD64B])
            && pif_ok(self.si[si::PIF_ADDR_WR64B])
    }
}
