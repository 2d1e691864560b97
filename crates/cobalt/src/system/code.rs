//! Tracking of which pages hold code that changed since it was last decoded or compiled.
use crate::system::mmu::PAGE_COUNT;
use bitvec::{boxed::BitBox, bitbox};
use r4300::{KSEG0, KSEG1};
use rustc_hash::FxHashMap;

/// Amount of 4KB physical pages tracked for writes.
const PHYS_PAGES: usize = 0x20000;

#[inline(always)]
fn phys_page(phys: u32) -> usize {
    ((phys >> 12) as usize) & (PHYS_PAGES - 1)
}

/// The physical page a TLB mapped virtual page was validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    page: usize,
    generation: u32,
}

/// One bit per 4KB virtual page. A set bit means the page must be decoded again before any
/// cached block covering it is trusted.
///
/// TLB mapped pages are also tied to the physical page they were validated against: a write to
/// that physical page through any view, or a remap to another one, makes them invalid too.
pub struct CodeValidity {
    invalid: BitBox,
    /// Write counter of every physical page.
    generations: Box<[u32]>,
    /// Frames of the valid TLB mapped pages.
    frames: FxHashMap<usize, Frame>,
    /// Content hashes of pages invalidated by a TLB rewrite, used to revalidate them when the new
    /// mapping exposes the same code.
    hashes: FxHashMap<usize, u64>,
}

impl Default for CodeValidity {
    fn default() -> Self {
        Self {
            invalid: bitbox![1; PAGE_COUNT],
            generations: vec![0; PHYS_PAGES].into_boxed_slice(),
            frames: FxHashMap::default(),
            hashes: FxHashMap::default(),
        }
    }
}

impl std::fmt::Debug for CodeValidity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeValidity")
            .field("invalid", &self.invalid.count_ones())
            .field("frames", &self.frames.len())
            .field("hashes", &self.hashes.len())
            .finish()
    }
}

impl CodeValidity {
    #[inline(always)]
    pub fn is_valid(&self, page: usize) -> bool {
        !self.invalid[page]
    }

    /// Marks `page` as matching its cached code.
    #[inline(always)]
    pub fn validate(&mut self, page: usize) {
        self.invalid.set(page, false);
    }

    /// Marks the TLB mapped `page` as matching its cached code, which was read from the physical
    /// page containing `phys`.
    pub fn validate_mapped(&mut self, page: usize, phys: u32) {
        let frame = phys_page(phys);
        self.frames.insert(
            page,
            Frame {
                page: frame,
                generation: self.generations[frame],
            },
        );

        self.validate(page);
    }

    /// Whether the TLB mapped `page`, currently translating to `phys`, still matches its cached
    /// code.
    #[inline]
    pub fn is_mapped_valid(&self, page: usize, phys: u32) -> bool {
        let frame = phys_page(phys);
        self.is_valid(page)
            && self.frames.get(&page).is_some_and(|f| {
                f.page == frame && f.generation == self.generations[frame]
            })
    }

    #[inline(always)]
    pub fn invalidate_page(&mut self, page: usize) {
        self.invalid.set(page, true);
        self.frames.remove(&page);
    }

    /// Invalidates every view of the physical range `phys..phys + len`: the fixed-mapped pages
    /// directly, TLB mapped ones through the write counter of their frame.
    pub fn invalidate_phys_range(&mut self, phys: u32, len: u32) {
        if len == 0 {
            return;
        }

        let first = phys >> 12;
        let last = phys.saturating_add(len - 1) >> 12;
        for page in first..=last.min(PHYS_PAGES as u32 - 1) {
            self.invalid.set(((KSEG0 >> 12) | page) as usize, true);
            self.invalid.set(((KSEG1 >> 12) | page) as usize, true);

            let generation = &mut self.generations[page as usize];
            *generation = generation.wrapping_add(1);
        }
    }

    /// Marks every page as invalid.
    pub fn invalidate_all(&mut self) {
        self.invalid.fill(true);
        self.frames.clear();
        self.hashes.clear();
    }

    pub fn remember_hash(&mut self, page: usize, hash: u64) {
        self.hashes.insert(page, hash);
    }

    pub fn forget_hash(&mut self, page: usize) {
        self.hashes.remove(&page);
    }

    pub fn hash(&self, page: usize) -> Option<u64> {
        self.hashes.get(&page).copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn physical_ranges_cover_both_segments() {
        let mut code = CodeValidity::default();
        assert!(!code.is_valid(0x80001));

        for page in [0x80000, 0x80001, 0x80002, 0xA0000, 0xA0001, 0xA0002, 0x00401] {
            code.validate(page);
        }

        code.invalidate_phys_range(0x0FFF, 2);
        assert!(!code.is_valid(0x80000));
        assert!(!code.is_valid(0xA0001));
        assert!(code.is_valid(0x80002));
        assert!(code.is_valid(0xA0002));

        // virtual pages are only reached through their frame
        assert!(code.is_valid(0x00401));
    }

    #[test]
    fn mapped_pages_follow_their_frame() {
        let mut code = CodeValidity::default();
        code.validate_mapped(0x400, 0x0010_0000);
        assert!(code.is_mapped_valid(0x400, 0x0010_0000));

        // same page through another frame
        assert!(!code.is_mapped_valid(0x400, 0x0020_0000));

        // writes to a neighbouring frame do not matter
        code.invalidate_phys_range(0x0010_1000, 4);
        assert!(code.is_mapped_valid(0x400, 0x0010_0000));

        code.invalidate_phys_range(0x0010_0FFC, 4);
        assert!(code.is_valid(0x400));
        assert!(!code.is_mapped_valid(0x400, 0x0010_0000));

        code.validate_mapped(0x400, 0x0010_0000);
        assert!(code.is_mapped_valid(0x400, 0x0010_0000));
        code.invalidate_page(0x400);
        code.validate(0x400);
        assert!(!code.is_mapped_valid(0x400, 0x0010_0000));
    }
}
