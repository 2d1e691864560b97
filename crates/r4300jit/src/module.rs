use crate::block::Link;
use jitalloc::{Allocation, Allocator, Exec, MapError, ReadWrite};

/// Owner of the memory generated code and its link slots live in.
pub struct Module {
    code_allocator: Allocator<Exec>,
    data_allocator: Allocator<ReadWrite>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            code_allocator: Allocator::new(),
            data_allocator: Allocator::new(),
        }
    }

    pub fn allocate_code(&mut self, code: &[u8]) -> Result<Allocation<Exec>, MapError> {
        self.code_allocator.allocate(64, code)
    }

    /// Allocates `count` zeroed link slots.
    pub fn allocate_links(&mut self, count: usize) -> Result<Allocation<ReadWrite>, MapError> {
        let zeroed = vec![0u8; count * size_of::<Link>()];
        self.data_allocator.allocate(align_of::<Link>(), &zeroed)
    }

    /// Bytes of generated code currently held.
    pub fn code_size(&self) -> usize {
        self.code_allocator.used()
    }
}
