//! TLB entries and the ASID-aware lookup over them.
use crate::Address;

/// Number of TLB entries.
pub const ENTRIES: usize = 32;

/// One of the two physical frames of an entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frame {
    pub pfn: u32,
    pub cache: u8,
    pub dirty: bool,
    pub valid: bool,
    /// First virtual address covered by this frame.
    pub start: u32,
    /// Last virtual address covered by this frame (inclusive).
    pub end: u32,
    /// Physical address of `start`.
    pub phys: u32,
}

impl Frame {
    fn from_entry_lo(value: u32) -> Self {
        Self {
            pfn: (value & 0x3FFF_FFC0) >> 6,
            cache: ((value & 0x38) >> 3) as u8,
            dirty: value & 0x4 != 0,
            valid: value & 0x2 != 0,
            ..Default::default()
        }
    }

    fn to_entry_lo(self, global: bool) -> u32 {
        (self.pfn << 6)
            | ((self.cache as u32) << 3)
            | ((self.dirty as u32) << 2)
            | ((self.valid as u32) << 1)
            | global as u32
    }

    /// Whether `addr` lies inside this frame.
    #[inline(always)]
    pub fn contains(&self, addr: u32) -> bool {
        (self.start..=self.end).contains(&addr)
    }

    /// The 4KB virtual pages this frame covers, as page indices.
    pub fn pages(&self) -> std::ops::RangeInclusive<usize> {
        (self.start >> 12) as usize..=(self.end >> 12) as usize
    }
}

/// A TLB entry, mapping a pair of adjacent virtual pages to two physical frames.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Entry {
    /// Page mask, in units of 4KB (`PageMask >> 13`).
    pub mask: u16,
    /// Virtual page number divided by two.
    pub vpn2: u32,
    pub global: bool,
    pub asid: u8,
    pub even: Frame,
    pub odd: Frame,
}

/// COP0 register values describing a TLB entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryRegs {
    pub page_mask: u32,
    pub entry_hi: u32,
    pub entry_lo0: u32,
    pub entry_lo1: u32,
}

/// Why a lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    /// No entry matches the address.
    Refill,
    /// An entry matches but the selected frame is not valid.
    Invalid,
    /// A store hit a frame which is not dirty (writable).
    Modified,
}

impl Entry {
    /// Builds an entry from the values of the COP0 registers, the way `tlbwi`/`tlbwr` do.
    pub fn from_regs(regs: EntryRegs) -> Self {
        let mask = ((regs.page_mask & 0x01FF_E000) >> 13) as u16;
        let vpn2 = (regs.entry_hi & 0xFFFF_E000) >> 13;

        let mut even = Frame::from_entry_lo(regs.entry_lo0);
        let mut odd = Frame::from_entry_lo(regs.entry_lo1);

        let size = ((mask as u32) << 12) + 0xFFF;
        even.start = vpn2 << 13;
        even.end = even.start.wrapping_add(size);
        even.phys = even.pfn << 12;

        odd.start = even.end.wrapping_add(1);
        odd.end = odd.start.wrapping_add(size);
        odd.phys = odd.pfn << 12;

        Self {
            mask,
            vpn2,
            global: regs.entry_lo0 & regs.entry_lo1 & 1 != 0,
            asid: regs.entry_hi as u8,
            even,
            odd,
        }
    }

    /// The COP0 register values describing this entry, the way `tlbr` reads them.
    pub fn to_regs(&self) -> EntryRegs {
        EntryRegs {
            page_mask: (self.mask as u32) << 13,
            entry_hi: (self.vpn2 << 13) | self.asid as u32,
            entry_lo0: self.even.to_entry_lo(self.global),
            entry_lo1: self.odd.to_entry_lo(self.global),
        }
    }

    /// Whether this entry belongs to the address space `asid`.
    #[inline(always)]
    pub fn matches_asid(&self, asid: u8) -> bool {
        self.global || self.asid == asid
    }

    /// Whether this entry matches the VPN2 and ASID of `entry_hi`, ignoring masked bits. This is
    /// the comparison done by `tlbp`.
    pub fn matches_entry_hi(&self, entry_hi: u32) -> bool {
        let mask = !(self.mask as u32);
        let vpn2 = (entry_hi & 0xFFFF_E000) >> 13;
        (self.vpn2 & mask) == (vpn2 & mask) && self.matches_asid(entry_hi as u8)
    }

    /// The frame covering `addr`, if any.
    #[inline(always)]
    pub fn frame(&self, addr: u32) -> Option<&Frame> {
        if self.even.contains(addr) {
            Some(&self.even)
        } else if self.odd.contains(addr) {
            Some(&self.odd)
        } else {
            None
        }
    }
}

/// The 32 TLB entries.
#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlb {
    pub entries: [Entry; ENTRIES],
}

impl Tlb {
    /// Returns the index of the first entry matching `entry_hi`.
    pub fn probe(&self, entry_hi: u32) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.matches_entry_hi(entry_hi))
    }

    /// Translates `addr` in the address space `asid`.
    pub fn translate(&self, addr: Address, asid: u8, write: bool) -> Result<u32, Miss> {
        let addr = addr.value();
        let mut result = Err(Miss::Refill);

        for entry in &self.entries {
            if !entry.matches_asid(asid) {
                continue;
            }

            let Some(frame) = entry.frame(addr) else {
                continue;
            };

            if !frame.valid {
                result = Err(Miss::Invalid);
                break;
            }

            if write && !frame.dirty {
                result = Err(Miss::Modified);
                break;
            }

            result = Ok(frame.phys.wrapping_add(addr - frame.start));
            break;
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(vaddr: u32, mask: u32, asid: u8, even: u32, odd: u32, global: bool) -> Entry {
        let g = global as u32;
        Entry::from_regs(EntryRegs {
            page_mask: mask << 13,
            entry_hi: vaddr | asid as u32,
            entry_lo0: ((even >> 12) << 6) | 0b110 | g,
            entry_lo1: ((odd >> 12) << 6) | 0b110 | g,
        })
    }

    #[test]
    fn even_odd_translation() {
        let mut tlb = Tlb::default();
        tlb.entries[0] = entry(0x8001_0000, 0, 3, 0x0001_0000, 0x0001_1000, false);

        assert_eq!(tlb.translate(Address(0x8001_0004), 3, false), Ok(0x0001_0004));
        assert_eq!(tlb.translate(Address(0x8001_1FFC), 3, false), Ok(0x0001_1FFC));
        assert_eq!(
            tlb.translate(Address(0x8001_0004), 7, false),
            Err(Miss::Refill)
        );
        assert_eq!(
            tlb.translate(Address(0x8001_2000), 3, false),
            Err(Miss::Refill)
        );
    }

    #[test]
    fn global_entries_ignore_asid() {
        let mut tlb = Tlb::default();
        tlb.entries[5] = entry(0x0040_0000, 0, 1, 0x0020_0000, 0x0030_0000, true);

        assert_eq!(tlb.translate(Address(0x0040_0010), 9, false), Ok(0x0020_0010));
        assert_eq!(tlb.translate(Address(0x0040_1010), 9, true), Ok(0x0030_0010));
        assert_eq!(tlb.probe(0x0040_0000 | 9), Some(5));
    }

    #[test]
    fn masked_pages() {
        // 16KB pages
        let mut tlb = Tlb::default();
        tlb.entries[1] = entry(0x0100_0000, 0b11, 0, 0x0010_0000, 0x0020_0000, false);

        let e = tlb.entries[1];
        assert_eq!(e.even.end, 0x0100_3FFF);
        assert_eq!(e.odd.start, 0x0100_4000);
        assert_eq!(tlb.translate(Address(0x0100_5000), 0, false), Ok(0x0020_1000));
        assert_eq!(tlb.probe(0x0100_2000), Some(1));
    }

    #[test]
    fn invalid_and_clean_frames() {
        let mut tlb = Tlb::default();
        tlb.entries[0] = Entry::from_regs(EntryRegs {
            page_mask: 0,
            entry_hi: 0x0010_0000,
            entry_lo0: (0x100 << 6) | 0b010,
            entry_lo1: 0x200 << 6,
        });

        assert_eq!(tlb.translate(Address(0x0010_0000), 0, false), Ok(0x0010_0000));
        assert_eq!(
            tlb.translate(Address(0x0010_0000), 0, true),
            Err(Miss::Modified)
        );
        assert_eq!(
            tlb.translate(Address(0x0010_1000), 0, false),
            Err(Miss::Invalid)
        );
    }

    #[test]
    fn register_round_trip() {
        let regs = EntryRegs {
            page_mask: 0x0000_6000,
            entry_hi: 0x0040_0000 | 0x12,
            entry_lo0: (0x345 << 6) | (2 << 3) | 0b111,
            entry_lo1: (0x346 << 6) | (2 << 3) | 0b011,
        };

        let entry = Entry::from_regs(regs);
        assert!(entry.global);
        assert_eq!(entry.to_regs(), regs);
    }
}
