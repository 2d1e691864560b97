//! Block lookup, organised by 4KB guest page so that a page can be dropped as a whole.
use crate::jit::{BlockId, table::Table as Sparse};
use indexmap::IndexSet;
use r4300::Address;
use rustc_hash::FxBuildHasher;

/// Instruction slots in a page.
const SLOTS: usize = 1 << 10;
/// Pages per directory entry.
const PAGES: usize = 1 << 8;
/// Directory entries covering the 32-bit address space.
const DIRECTORY: usize = 1 << 12;

#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    pub id: BlockId,
    /// Length of the block, in bytes.
    pub length: u32,
}

/// The blocks starting in one page.
#[derive(Default)]
struct Page {
    slots: Sparse<Mapping, SLOTS>,
    /// Occupied slots, in insertion order.
    starts: IndexSet<u16, FxBuildHasher>,
}

#[inline(always)]
fn slot(addr: Address) -> usize {
    (addr.value() as usize >> 2) & (SLOTS - 1)
}

#[inline(always)]
fn split(page: usize) -> (usize, usize) {
    ((page / PAGES) & (DIRECTORY - 1), page % PAGES)
}

/// Maps block start addresses to blocks.
#[derive(Default)]
pub struct Table {
    pages: Sparse<Sparse<Page, PAGES>, DIRECTORY>,
    mapped: usize,
}

impl Table {
    #[inline(always)]
    fn page(&self, page: usize) -> Option<&Page> {
        let (dir, index) = split(page);
        self.pages.get(dir)?.get(index)
    }

    pub fn insert(&mut self, addr: Address, mapping: Mapping) {
        let (dir, index) = split(addr.page());
        let page = self.pages.get_or_default(dir).get_or_default(index);

        let slot = slot(addr);
        page.slots.insert(slot, mapping);
        if page.starts.insert(slot as u16) {
            self.mapped += 1;
        }
    }

    #[inline(always)]
    pub fn get(&self, addr: Address) -> Option<&Mapping> {
        self.page(addr.page())?.slots.get(slot(addr))
    }

    /// Unmaps every block starting in `page`, returning their mappings in insertion order.
    pub fn take_page(&mut self, page: usize) -> Vec<Mapping> {
        let (dir, index) = split(page);
        let Some(mut entry) = self.pages.get_mut(dir).and_then(|dir| dir.remove(index)) else {
            return Vec::new();
        };

        let taken: Vec<_> = entry
            .starts
            .iter()
            .filter_map(|&slot| entry.slots.remove(slot as usize))
            .collect();

        self.mapped -= entry.starts.len();
        taken
    }

    /// How many blocks are currently mapped.
    pub fn mapped(&self) -> usize {
        self.mapped
    }
}
