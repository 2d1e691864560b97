//! The physical address space.
use crate::system::{
    System,
    mem::{FLASH_LEN, Memory, PIF_RAM_LEN, RDRAM_LEN, SP_MEM_LEN},
    peripherals::{Block, Peripherals, ai, base, mi, pi, si, vi},
    scheduler::Event,
};
use r4300::Primitive;
use tracing::{debug, warn};

pub const SP_MEM_BASE: u32 = 0x0400_0000;
pub const FLASH_BASE: u32 = 0x0800_0000;
pub const ROM_BASE: u32 = 0x1000_0000;
pub const ROM_MAX_LEN: usize = 0x0FC0_0000;
pub const PIF_RAM_BASE: u32 = 0x1FC0_07C0;

/// Ticks between a SI DMA start and its completion interrupt.
pub const SI_DMA_DELAY: u64 = 0x900;

/// The bus of the system. Contains memories and the register blocks of peripherals.
#[derive(Debug, Default)]
pub struct Bus {
    pub mem: Memory,
    pub regs: Peripherals,
}

/// Allows the usage of const values in patterns. It's a neat trick!
struct ConstTrick<const N: u32>;
impl<const N: u32> ConstTrick<N> {
    const OUTPUT: u32 = N;
}

macro_rules! map {
    ($offset:ident, $match_addr:expr; $($addr:expr, $size:expr => $block:expr,)* @default => $default:expr $(,)?) => {
        match $match_addr {
            $(
                $addr..=ConstTrick::<{ $addr + ($size as u32 - 1) }>::OUTPUT => {
                    #[allow(unused_assignments)]
                    {
                        $offset = ($match_addr - $addr) as usize;
                    }
                    $block
                }
            )*
            _ => $default
        }
    };
}

/// Finds the register block containing the physical address `phys`, along with the byte offset
/// into it.
fn find_block(phys: u32) -> Option<(Block, usize)> {
    let offset: usize;
    let block = map! {
        offset, phys;
        base::RDRAM, 10 * 4 => Block::Rdram,
        base::SP, 8 * 4 => Block::Sp,
        base::RSP, 2 * 4 => Block::Rsp,
        base::DPC, 8 * 4 => Block::Dpc,
        base::DPS, 4 * 4 => Block::Dps,
        base::MI, 4 * 4 => Block::Mi,
        base::VI, 14 * 4 => Block::Vi,
        base::AI, 6 * 4 => Block::Ai,
        base::PI, 13 * 4 => Block::Pi,
        base::RI, 8 * 4 => Block::Ri,
        base::SI, 7 * 4 => Block::Si,
        @default => return None,
    };

    Some((block, offset))
}

impl Bus {
    /// Reads a primitive from the given physical address, but only if it can't possibly have a
    /// side effect.
    pub fn read_pure<P: Primitive>(&self, phys: u32) -> Option<P> {
        let offset: usize;
        map! {
            offset, phys;
            0x0000_0000, RDRAM_LEN => Some(P::read_be_bytes(&self.mem.rdram[offset..])),
            SP_MEM_BASE, SP_MEM_LEN => Some(P::read_be_bytes(&self.mem.sp[offset..])),
            ROM_BASE, ROM_MAX_LEN => Some(P::read_be_bytes(self.mem.rom.get(offset..).unwrap_or_default())),
            PIF_RAM_BASE, PIF_RAM_LEN => Some(P::read_be_bytes(&self.mem.pif_ram[offset..])),
            @default => None,
        }
    }

    /// Writes a primitive to the given physical address, but only if it's plain memory.
    /// Returns whether the write happened.
    pub fn write_pure<P: Primitive>(&mut self, phys: u32, value: P) -> bool {
        let offset: usize;
        map! {
            offset, phys;
            0x0000_0000, RDRAM_LEN => value.write_be_bytes(&mut self.mem.rdram[offset..]),
            SP_MEM_BASE, SP_MEM_LEN => value.write_be_bytes(&mut self.mem.sp[offset..]),
            PIF_RAM_BASE, PIF_RAM_LEN => value.write_be_bytes(&mut self.mem.pif_ram[offset..]),
            @default => return false,
        }

        true
    }
}

impl System {
    fn read_register(&self, block: Block, index: usize) -> u32 {
        let regs = &self.bus.regs;
        match (block, index) {
            (Block::Pi, pi::STATUS) => {
                let busy = self.scheduler.contains(Event::Pi) as u32;
                let interrupt = ((regs.mi[mi::INTR] & mi::PI != 0) as u32) << 3;
                busy | interrupt
            }
            (Block::Si, si::STATUS) => {
                let busy = self.scheduler.contains(Event::Si) as u32;
                let interrupt = if regs.mi[mi::INTR] & mi::SI != 0 {
                    si::STATUS_INTERRUPT
                } else {
                    0
                };
                busy | interrupt
            }
            _ => regs.block(block)[index],
        }
    }

    fn read_mmio<P: Primitive>(&self, block: Block, offset: usize) -> P {
        let len = self.bus.regs.block(block).len();
        let mut bytes = [0u8; 8];

        let first = offset & !3;
        for (chunk, word_offset) in bytes.chunks_exact_mut(4).zip((first..).step_by(4)) {
            let index = word_offset / 4;
            if index < len {
                chunk.copy_from_slice(&self.read_register(block, index).to_be_bytes());
            }
        }

        let value = P::read_be_bytes(&bytes[offset - first..]);
        debug!("reading 0x{value:X} from {block:?}[{offset}]");

        value
    }

    /// Reads a primitive from the given physical address.
    pub fn read_phys<P: Primitive>(&self, phys: u32) -> P {
        if let Some(value) = self.bus.read_pure(phys) {
            return value;
        }

        if let Some((block, offset)) = find_block(phys) {
            return self.read_mmio(block, offset);
        }

        let offset: usize;
        map! {
            offset, phys;
            FLASH_BASE, FLASH_LEN => P::read_be_bytes(&self.bus.mem.flash[offset..]),
            @default => {
                warn!("reading from unmapped physical address 0x{phys:08X}");
                P::default()
            },
        }
    }

    fn write_mmio<P: Primitive>(&mut self, block: Block, offset: usize, value: P) {
        debug!("writing 0x{value:X} to {block:?}[{offset}]");

        let mut bytes = [0u8; 8];
        value.write_be_bytes(&mut bytes);
        let bytes = &bytes[..P::SIZE];

        let first = offset & !3;
        for word_offset in (first..offset + P::SIZE).step_by(4) {
            let index = word_offset / 4;
            let Some(&old) = self.bus.regs.block(block).get(index) else {
                warn!("writing past the end of {block:?} (offset {word_offset})");
                continue;
            };

            let mut word = old.to_be_bytes();
            for (i, byte) in word.iter_mut().enumerate() {
                let addr = word_offset + i;
                if (offset..offset + P::SIZE).contains(&addr) {
                    *byte = bytes[addr - offset];
                }
            }

            self.write_register(block, index, u32::from_be_bytes(word));
        }
    }

    fn write_register(&mut self, block: Block, index: usize, value: u32) {
        match (block, index) {
            (Block::Mi, mi::MODE) => self.write_mi_mode(value),
            (Block::Mi, mi::INTR_MASK) => self.write_mi_mask(value),
            (Block::Mi, mi::VERSION | mi::INTR) => {
                debug!("ignoring write to read-only MI register {index}");
            }
            (Block::Pi, pi::RD_LEN) => {
                self.bus.regs.pi[pi::RD_LEN] = value;
                debug!("ignoring PI DMA from RDRAM to the cartridge");
                self.scheduler.schedule(Event::Pi, pi_dma_delay(value));
            }
            (Block::Pi, pi::WR_LEN) => {
                self.bus.regs.pi[pi::WR_LEN] = value;
                self.pi_dma_write(value);
            }
            (Block::Pi, pi::STATUS) => {
                if value & 0x2 != 0 {
                    self.lower_mi_interrupt(mi::PI);
                }
            }
            (Block::Si, si::PIF_ADDR_RD64B) => {
                self.bus.regs.si[si::PIF_ADDR_RD64B] = value;
                self.si_dma_read();
            }
            (Block::Si, si::PIF_ADDR_WR64B) => {
                self.bus.regs.si[si::PIF_ADDR_WR64B] = value;
                self.si_dma_write();
            }
            (Block::Si, si::STATUS) => {
                self.bus.regs.si[si::STATUS] &= !si::STATUS_INTERRUPT;
                self.lower_mi_interrupt(mi::SI);
            }
            (Block::Vi, vi::CURRENT) => self.lower_mi_interrupt(mi::VI),
            (Block::Ai, ai::STATUS) => self.lower_mi_interrupt(mi::AI),
            _ => self.bus.regs.block_mut(block)[index] = value,
        }
    }

    fn write_mi_mode(&mut self, value: u32) {
        let mode = &mut self.bus.regs.mi[mi::MODE];
        *mode = (*mode & !0x7F) | (value & 0x7F);

        // (clear, set, stored bit) pairs for init, ebus and rdram modes
        for (clear, set, bit) in [(0x80, 0x100, 0x80), (0x200, 0x400, 0x100), (0x1000, 0x2000, 0x200)] {
            if value & clear != 0 {
                *mode &= !bit;
            }
            if value & set != 0 {
                *mode |= bit;
            }
        }

        if value & 0x800 != 0 {
            self.lower_mi_interrupt(mi::DP);
        }
    }

    fn write_mi_mask(&mut self, value: u32) {
        let mask = &mut self.bus.regs.mi[mi::INTR_MASK];
        for (i, bit) in [mi::SP, mi::SI, mi::AI, mi::VI, mi::PI, mi::DP].into_iter().enumerate() {
            if value & (1 << (2 * i)) != 0 {
                *mask &= !bit;
            }
            if value & (1 << (2 * i + 1)) != 0 {
                *mask |= bit;
            }
        }

        self.update_mi_interrupt();
    }

    /// Copies from the cartridge into RDRAM.
    fn pi_dma_write(&mut self, value: u32) {
        let len = (value & 0x00FF_FFFF) as usize + 1;
        let dram = (self.bus.regs.pi[pi::DRAM_ADDR] & 0x00FF_FFFF) as usize;
        let cart = self.bus.regs.pi[pi::CART_ADDR];

        if cart < ROM_BASE {
            debug!("ignoring PI DMA from cartridge save memory at 0x{cart:08X}");
        } else {
            let cart = (cart - ROM_BASE) as usize;
            let rom = &self.bus.mem.rom;
            let src = rom.get(cart..).unwrap_or_default();
            let count = len.min(src.len()).min(RDRAM_LEN.saturating_sub(dram));

            self.bus.mem.rdram[dram..dram + count].copy_from_slice(&src[..count]);
            self.code.invalidate_phys_range(dram as u32, count as u32);

            debug!(
                "PI DMA of {len} bytes from cartridge offset 0x{cart:08X} to RDRAM 0x{dram:08X}"
            );
        }

        self.scheduler.schedule(Event::Pi, pi_dma_delay(value));
    }

    /// Runs PIF commands and copies PIF RAM into RDRAM.
    fn si_dma_read(&mut self) {
        self.process_pif_commands();

        let dram = self.bus.regs.si[si::DRAM_ADDR] as usize & !3;
        if let Some(target) = self.bus.mem.rdram.get_mut(dram..dram + PIF_RAM_LEN) {
            target.copy_from_slice(&self.bus.mem.pif_ram);
            self.code.invalidate_phys_range(dram as u32, PIF_RAM_LEN as u32);
        } else {
            warn!("SI DMA to out of bounds RDRAM address 0x{dram:08X}");
        }

        self.scheduler.schedule(Event::Si, SI_DMA_DELAY);
    }

    /// Copies RDRAM into PIF RAM.
    fn si_dma_write(&mut self) {
        let dram = self.bus.regs.si[si::DRAM_ADDR] as usize & !3;
        if let Some(source) = self.bus.mem.rdram.get(dram..dram + PIF_RAM_LEN) {
            self.bus.mem.pif_ram.copy_from_slice(source);
        } else {
            warn!("SI DMA from out of bounds RDRAM address 0x{dram:08X}");
        }

        self.scheduler.schedule(Event::Si, SI_DMA_DELAY);
    }

    /// Writes a primitive to the given physical address.
    pub fn write_phys<P: Primitive>(&mut self, phys: u32, value: P) {
        if self.bus.write_pure(phys, value) {
            return;
        }

        if let Some((block, offset)) = find_block(phys) {
            self.write_mmio(block, offset, value);
            return;
        }

        let offset: usize;
        map! {
            offset, phys;
            FLASH_BASE, FLASH_LEN => value.write_be_bytes(&mut self.bus.mem.flash[offset..]),
            ROM_BASE, ROM_MAX_LEN => debug!("ignoring write of 0x{value:X} to cartridge ROM"),
            @default => warn!("writing 0x{value:X} to unmapped physical address 0x{phys:08X}"),
        }
    }
}

/// Ticks a PI DMA of the given length register takes.
fn pi_dma_delay(len: u32) -> u64 {
    ((len & 0x00FF_FFFF) as u64 + 1) / 8
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::Config;

    #[test]
    fn register_blocks_are_found() {
        assert_eq!(find_block(0x0430_000C), Some((Block::Mi, 12)));
        assert_eq!(find_block(0x0480_0018), Some((Block::Si, 24)));
        assert_eq!(find_block(0x0480_001C), None);
        assert_eq!(find_block(0x03F0_0024), Some((Block::Rdram, 36)));
    }

    #[test]
    fn partial_register_writes_merge() {
        let mut sys = System::new(Config::default());
        sys.write_phys(base::VI + 4, 0x1122_3344u32);
        sys.write_phys(base::VI + 5, 0xAAu8);
        assert_eq!(sys.bus.regs.vi[vi::ORIGIN], 0x11AA_3344);
        assert_eq!(sys.read_phys::<u16>(base::VI + 6), 0x3344);
    }

    #[test]
    fn unmapped_accesses_are_harmless() {
        let mut sys = System::new(Config::default());
        sys.write_phys(0x0500_0000, 0xDEADu16);
        assert_eq!(sys.read_phys::<u32>(0x0500_0000), 0);
    }

    #[test]
    fn rom_is_read_only() {
        let mut sys = System::new(Config::default());
        sys.bus.mem.rom = vec![0x80, 0x37, 0x12, 0x40].into_boxed_slice();
        sys.write_phys(ROM_BASE, 0u32);
        assert_eq!(sys.read_phys::<u32>(ROM_BASE), 0x8037_1240);
        assert_eq!(sys.read_phys::<u32>(ROM_BASE + 4), 0);
    }

    #[test]
    fn pi_dma_copies_cartridge_and_interrupts() {
        let mut sys = System::new(Config::default());
        sys.bus.mem.rom = (0..=255u8).collect::<Vec<_>>().into_boxed_slice();
        sys.write_phys(base::MI + 12, 0x0000_0200u32); // unmask PI

        sys.write_phys(base::PI, 0x0000_1000u32);
        sys.write_phys(base::PI + 4, ROM_BASE + 0x10);
        sys.write_phys(base::PI + 12, 15u32);

        assert_eq!(&sys.bus.mem.rdram[0x1000..0x1004], &[0x10, 0x11, 0x12, 0x13]);
        assert_eq!(sys.bus.mem.rdram[0x1010], 0);
        assert_eq!(sys.read_phys::<u32>(base::PI + 16) & 1, 1);

        sys.advance(pi_dma_delay(15));
        sys.process_events();
        assert_eq!(sys.bus.regs.mi[mi::INTR], mi::PI);
        assert_eq!(sys.cpu.cop0.cause().interrupt_pending() & r4300::cop0::IP_RCP, r4300::cop0::IP_RCP);

        sys.write_phys(base::PI + 16, 2u32);
        assert_eq!(sys.bus.regs.mi[mi::INTR], 0);
    }

    #[test]
    fn mi_mask_set_and_clear_pairs() {
        let mut sys = System::new(Config::default());
        sys.write_phys(base::MI + 12, 0b1010_1010_1010u32);
        assert_eq!(sys.bus.regs.mi[mi::INTR_MASK], 0x3F);
        sys.write_phys(base::MI + 12, 0b0000_0100_0001u32);
        assert_eq!(sys.bus.regs.mi[mi::INTR_MASK], 0x3F & !(mi::SP | mi::VI));
    }
}
