//! TLB maintenance instructions.
use crate::system::System;
use r4300::{
    Address,
    cop0::reg,
    tlb::{ENTRIES, Entry, EntryRegs, Frame},
};
use tracing::{debug, error, info_span};

impl System {
    fn page_hash(&self, page: usize) -> Option<u64> {
        let phys = self.mmu.lookup(Address((page as u32) << 12), false)?;
        let data = self.bus.mem.rdram_page(phys)?;
        Some(twox_hash::XxHash3_64::oneshot(data))
    }

    /// Invalidates the pages of a frame about to be unmapped, remembering the hash of the code
    /// they contain.
    fn retire_frame(&mut self, frame: &Frame) {
        if !frame.valid {
            return;
        }

        for page in frame.pages() {
            let addr = Address((page as u32) << 12);
            let hash = if self.config.cache_blocks && self.is_code_valid(addr) {
                self.page_hash(page)
            } else {
                None
            };

            match hash {
                Some(hash) => self.code.remember_hash(page, hash),
                None => self.code.forget_hash(page),
            }

            self.code.invalidate_page(page);
        }
    }

    /// Revalidates the pages of a newly mapped frame whose content did not change.
    fn revive_frame(&mut self, frame: &Frame) {
        if !frame.valid {
            return;
        }

        for page in frame.pages() {
            let Some(old) = self.code.hash(page) else {
                continue;
            };

            if self.page_hash(page) == Some(old) {
                self.validate_code(Address((page as u32) << 12));
            }
        }
    }

    /// Overwrites TLB entry `index` with the values of the COP0 entry registers.
    fn write_tlb_entry(&mut self, index: usize) {
        let _span = info_span!("tlb write", index).entered();

        let old = self.cpu.tlb.entries[index];
        self.retire_frame(&old.even);
        self.retire_frame(&old.odd);
        self.mmu.unmap(&old);

        let regs = &self.cpu.cop0.regs;
        let new = Entry::from_regs(EntryRegs {
            page_mask: regs[reg::PAGE_MASK],
            entry_hi: regs[reg::ENTRY_HI],
            entry_lo0: regs[reg::ENTRY_LO0],
            entry_lo1: regs[reg::ENTRY_LO1],
        });

        debug!(?new, "installing tlb entry");
        self.cpu.tlb.entries[index] = new;
        self.mmu.map(&new);

        self.revive_frame(&new.even);
        self.revive_frame(&new.odd);
    }

    /// `tlbr`: reads the entry selected by Index into the COP0 entry registers.
    pub fn tlbr(&mut self) {
        let index = (self.cpu.cop0.regs[reg::INDEX] & 0x1F) as usize;
        let EntryRegs {
            page_mask,
            entry_hi,
            entry_lo0,
            entry_lo1,
        } = self.cpu.tlb.entries[index].to_regs();

        let regs = &mut self.cpu.cop0.regs;
        regs[reg::PAGE_MASK] = page_mask;
        regs[reg::ENTRY_HI] = entry_hi;
        regs[reg::ENTRY_LO0] = entry_lo0;
        regs[reg::ENTRY_LO1] = entry_lo1;
    }

    /// `tlbwi`: writes the entry selected by Index.
    pub fn tlbwi(&mut self) {
        let index = (self.cpu.cop0.regs[reg::INDEX] & 0x3F) as usize;
        if index >= ENTRIES {
            error!("tlbwi with out of range index {index}");
            return;
        }

        self.write_tlb_entry(index);
    }

    /// `tlbwr`: writes the entry selected by Random, which is derived from Count and Wired.
    pub fn tlbwr(&mut self) {
        let regs = &mut self.cpu.cop0.regs;
        let wired = regs[reg::WIRED].min(31);
        let random = (regs[reg::COUNT] / 2 % (32 - wired)) + wired;
        regs[reg::RANDOM] = random;

        self.write_tlb_entry(random as usize);
    }

    /// `tlbp`: finds the entry matching EntryHi. Sets the probe failure bit of Index if there is
    /// none.
    pub fn tlbp(&mut self) {
        let regs = &mut self.cpu.cop0.regs;
        regs[reg::INDEX] = match self.cpu.tlb.probe(regs[reg::ENTRY_HI]) {
            Some(index) => index as u32,
            None => regs[reg::INDEX] | 0x8000_0000,
        };
    }

    /// `eret`: returns from an exception. Returns the address to continue at, or `None` if the
    /// return is unsupported and the session was stopped.
    pub fn eret(&mut self) -> Option<Address> {
        let status = self.cpu.cop0.status();
        self.cpu.llbit = 0;

        let target = if status.error_level() {
            error!("eret with ERL set");
            self.request_stop();
            None
        } else {
            self.cpu
                .cop0
                .set_status(status.with_exception_level(false));
            Some(Address(self.cpu.cop0.regs[reg::EPC]))
        };

        self.request_interrupt_check();
        target
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::Config;

    fn load_entry_regs(sys: &mut System, entry_hi: u32, lo0: u32, lo1: u32) {
        let regs = &mut sys.cpu.cop0.regs;
        regs[reg::PAGE_MASK] = 0;
        regs[reg::ENTRY_HI] = entry_hi;
        regs[reg::ENTRY_LO0] = lo0;
        regs[reg::ENTRY_LO1] = lo1;
    }

    #[test]
    fn write_read_and_probe() {
        let mut sys = System::new(Config::default());
        load_entry_regs(&mut sys, 0x0040_0003, (0x100 << 6) | 0b110, (0x101 << 6) | 0b010);
        sys.cpu.cop0.regs[reg::INDEX] = 5;
        sys.tlbwi();

        assert_eq!(sys.mmu.lookup(Address(0x0040_0010), false), Some(0x0010_0010));

        sys.cpu.cop0.regs[reg::ENTRY_HI] = 0x0040_0003;
        sys.cpu.cop0.regs[reg::INDEX] = 0;
        sys.tlbp();
        assert_eq!(sys.cpu.cop0.regs[reg::INDEX], 5);

        sys.cpu.cop0.regs[reg::ENTRY_HI] = 0x0040_0004;
        sys.tlbp();
        assert_eq!(sys.cpu.cop0.regs[reg::INDEX], 0x8000_0005);

        load_entry_regs(&mut sys, 0, 0, 0);
        sys.cpu.cop0.regs[reg::INDEX] = 5;
        sys.tlbr();
        assert_eq!(sys.cpu.cop0.regs[reg::ENTRY_HI], 0x0040_0003);
        assert_eq!(sys.cpu.cop0.regs[reg::ENTRY_LO0], (0x100 << 6) | 0b110);
    }

    #[test]
    fn tlbwr_uses_count_and_wired() {
        let mut sys = System::new(Config::default());
        sys.cpu.cop0.regs[reg::WIRED] = 4;
        sys.cpu.cop0.set_count(100);
        sys.tlbwr();
        assert_eq!(sys.cpu.cop0.regs[reg::RANDOM], (50 % 28) + 4);
    }

    #[test]
    fn unchanged_pages_are_revalidated() {
        let mut sys = System::new(Config {
            cache_blocks: true,
            ..Config::default()
        });

        load_entry_regs(&mut sys, 0x0040_0000, (0x100 << 6) | 0b110, 0);
        sys.cpu.cop0.regs[reg::INDEX] = 0;
        sys.tlbwi();

        let mapped = Address(0x0040_0000);
        sys.bus.mem.rdram[0x0010_0000] = 0xAB;
        sys.validate_code(mapped);

        // remap the same frame, with a different cache attribute
        load_entry_regs(&mut sys, 0x0040_0000, (0x100 << 6) | 0b11110, 0);
        sys.tlbwi();
        assert!(sys.is_code_valid(mapped));

        // map a different frame
        load_entry_regs(&mut sys, 0x0040_0000, (0x200 << 6) | 0b110, 0);
        sys.tlbwi();
        assert!(!sys.is_code_valid(mapped));
    }

    #[test]
    fn frames_with_the_same_code_are_revalidated() {
        let mut sys = System::new(Config {
            cache_blocks: true,
            ..Config::default()
        });

        load_entry_regs(&mut sys, 0x0040_0000, (0x100 << 6) | 0b110, 0);
        sys.cpu.cop0.regs[reg::INDEX] = 0;
        sys.tlbwi();

        let mapped = Address(0x0040_0000);
        sys.bus.mem.rdram[0x0010_0000] = 0xAB;
        sys.bus.mem.rdram[0x0020_0000] = 0xAB;
        sys.validate_code(mapped);

        // a copy of the same page elsewhere
        load_entry_regs(&mut sys, 0x0040_0000, (0x200 << 6) | 0b110, 0);
        sys.tlbwi();
        assert!(sys.is_code_valid(mapped));

        // the new frame is tracked, not the old one
        assert!(sys.write(Address(0x8010_0000), 0u8));
        assert!(sys.is_code_valid(mapped));
        assert!(sys.write(Address(0x8020_0000), 0u8));
        assert!(!sys.is_code_valid(mapped));
    }

    #[test]
    fn eret_returns_to_epc() {
        let mut sys = System::new(Config::default());
        sys.cpu.cop0.regs[reg::STATUS] = 0x2;
        sys.cpu.cop0.regs[reg::EPC] = 0x8000_1234;
        sys.cpu.llbit = 1;

        assert_eq!(sys.eret(), Some(Address(0x8000_1234)));
        assert!(!sys.cpu.cop0.status().exception_level());
        assert_eq!(sys.cpu.llbit, 0);

        sys.cpu.cop0.regs[reg::STATUS] = 0x4;
        assert_eq!(sys.eret(), None);
        assert!(sys.stopped);
    }
}
