//! Virtual memory lookup tables.
use crate::system::{System, exception::Access};
use r4300::{
    Address,
    tlb::{Entry, Frame, Miss},
};
use tracing::trace;

/// Number of 4KB pages in the 32-bit virtual address space.
pub const PAGE_COUNT: usize = 1 << 20;

type Lut = Box<[u32; PAGE_COUNT]>;

/// Page tables built from the TLB entries, one for loads and one for stores.
///
/// A non-zero entry has its top bit set and the physical page in bits `12..29`. They prefilter
/// lookups: an address whose page has no entry misses without scanning the TLB.
pub struct Mmu {
    read: Lut,
    write: Lut,
}

impl Default for Mmu {
    fn default() -> Self {
        Self {
            read: util::boxed_array(0),
            write: util::boxed_array(0),
        }
    }
}

impl std::fmt::Debug for Mmu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmu").finish_non_exhaustive()
    }
}

/// Whether a frame is eligible for the lookup tables: a non-empty range outside the fixed-mapped
/// segments and backed by the low 512MB of the physical address space.
fn mappable(frame: &Frame) -> bool {
    let fixed = frame.start >= r4300::KSEG0 && frame.end < r4300::KSSEG;
    frame.start < frame.end && !fixed && frame.phys < 0x2000_0000
}

impl Mmu {
    fn map_frame(&mut self, frame: &Frame) {
        if !frame.valid || !mappable(frame) {
            return;
        }

        for addr in (frame.start..frame.end).step_by(0x1000) {
            let value = 0x8000_0000 | (frame.phys + (addr - frame.start) + 0xFFF);
            self.read[(addr >> 12) as usize] = value;
            if frame.dirty {
                self.write[(addr >> 12) as usize] = value;
            }
        }
    }

    fn unmap_frame(&mut self, frame: &Frame) {
        if !frame.valid {
            return;
        }

        for addr in (frame.start..frame.end).step_by(0x1000) {
            self.read[(addr >> 12) as usize] = 0;
            if frame.dirty {
                self.write[(addr >> 12) as usize] = 0;
            }
        }
    }

    /// Installs the frames of `entry` into the lookup tables.
    pub fn map(&mut self, entry: &Entry) {
        trace!(?entry, "mapping tlb entry");
        self.map_frame(&entry.even);
        self.map_frame(&entry.odd);
    }

    /// Removes the frames of `entry` from the lookup tables.
    pub fn unmap(&mut self, entry: &Entry) {
        trace!(?entry, "unmapping tlb entry");
        self.unmap_frame(&entry.even);
        self.unmap_frame(&entry.odd);
    }

    /// The physical address the tables map `addr` to, if any.
    #[inline(always)]
    pub fn lookup(&self, addr: Address, write: bool) -> Option<u32> {
        let lut = if write { &self.write } else { &self.read };
        let entry = lut[addr.page()];
        (entry != 0).then_some((entry & 0x1FFF_F000) | (addr.value() & 0xFFF))
    }

    /// Removes every mapping.
    pub fn clear(&mut self) {
        self.read.fill(0);
        self.write.fill(0);
    }

    #[inline(always)]
    pub fn read_table(&self) -> &[u32; PAGE_COUNT] {
        &self.read
    }

    #[inline(always)]
    pub fn write_table(&self) -> &[u32; PAGE_COUNT] {
        &self.write
    }

    #[inline(always)]
    pub fn tables_mut(&mut self) -> (&mut [u32; PAGE_COUNT], &mut [u32; PAGE_COUNT]) {
        (&mut self.read, &mut self.write)
    }
}

impl System {
    /// Translates a virtual address without side effects.
    pub fn translate_pure(&self, addr: Address, write: bool) -> Result<u32, Miss> {
        if addr.is_fixed_mapped() {
            return Ok(addr.fixed_physical());
        }

        if self.mmu.lookup(addr, write).is_none() {
            return Err(match self.cpu.tlb.translate(addr, self.cpu.cop0.asid(), write) {
                Ok(_) => Miss::Refill,
                Err(miss) => miss,
            });
        }

        self.cpu.tlb.translate(addr, self.cpu.cop0.asid(), write)
    }

    /// Translates a virtual address, raising the matching TLB exception on a miss.
    #[inline]
    pub fn translate(&mut self, addr: Address, access: Access) -> Option<u32> {
        match self.translate_pure(addr, access == Access::Write) {
            Ok(phys) => Some(phys),
            Err(miss) => {
                self.raise_tlb_miss(addr, miss, access);
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::Config;
    use r4300::{
        cop0::reg,
        tlb::{Entry, EntryRegs},
    };

    fn entry(entry_hi: u32, lo0: u32, lo1: u32) -> Entry {
        Entry::from_regs(EntryRegs {
            page_mask: 0,
            entry_hi,
            entry_lo0: lo0,
            entry_lo1: lo1,
        })
    }

    #[test]
    fn tables_follow_valid_and_dirty_bits() {
        let mut mmu = Mmu::default();
        // even: valid + dirty, odd: valid only
        let e = entry(0x0040_0003, (0x100 << 6) | 0b110, (0x101 << 6) | 0b010);
        mmu.map(&e);

        assert_eq!(mmu.lookup(Address(0x0040_0123), false), Some(0x0010_0123));
        assert_eq!(mmu.lookup(Address(0x0040_0123), true), Some(0x0010_0123));
        assert_eq!(mmu.lookup(Address(0x0040_1004), false), Some(0x0010_1004));
        assert_eq!(mmu.lookup(Address(0x0040_1004), true), None);

        mmu.unmap(&e);
        assert_eq!(mmu.lookup(Address(0x0040_0123), false), None);
    }

    #[test]
    fn fixed_segments_are_not_tabled() {
        let mut mmu = Mmu::default();
        mmu.map(&entry(0x8001_0003, (0x10 << 6) | 0b110, (0x11 << 6) | 0b110));
        assert_eq!(mmu.lookup(Address(0x8001_0004), false), None);
    }

    #[test]
    fn translation_respects_asid_and_raises_misses() {
        let mut sys = System::new(Config::default());
        let e = entry(0x0040_0003, (0x100 << 6) | 0b010, (0x101 << 6) | 0b010);
        sys.cpu.tlb.entries[0] = e;
        sys.mmu.map(&e);

        sys.cpu.cop0.regs[reg::ENTRY_HI] = 3;
        assert_eq!(sys.translate_pure(Address(0x0040_0010), false), Ok(0x0010_0010));
        assert_eq!(sys.translate_pure(Address(0x0040_0010), true), Err(Miss::Modified));
        assert_eq!(sys.translate_pure(Address(0x8000_0010), true), Ok(0x10));

        sys.cpu.cop0.regs[reg::ENTRY_HI] = 7;
        sys.cpu.pc = Address(0x8000_1000);
        assert_eq!(sys.translate(Address(0x0040_0010), Access::Read), None);
        assert_eq!(sys.cpu.pc, Address(0x8000_0000));
        assert_eq!(sys.cpu.cop0.regs[reg::BAD_VADDR], 0x0040_0010);
        assert_eq!(sys.cpu.cop0.regs[reg::EPC], 0x8000_1000);
    }
}
