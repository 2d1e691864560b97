use crate::{Sequence, hooks::Context, unwind::UnwindHandle};
use jitalloc::{Allocation, Exec, ReadWrite};
use r4300::Address;
use std::ptr::NonNull;

/// Information regarding the execution of a chain of linked blocks.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Info {
    /// How many instructions retired, delay slots included.
    pub instructions: u64,
}

/// Pointer to the entry of a compiled block.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFn(NonNull<u8>);

// SAFETY: a code pointer carries no thread affinity
unsafe impl Send for BlockFn {}

impl BlockFn {
    pub fn addr(self) -> usize {
        self.0.addr().get()
    }
}

/// A patchable exit of a block. Generated code continues directly into `block` if `addr` is the
/// address it is about to continue at.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Link {
    pub block: Option<BlockFn>,
    pub addr: Address,
}

/// Meta information regarding a block.
pub struct Meta {
    /// The sequence of instructions this block contains.
    pub seq: Sequence,
    /// The Cranelift IR of this block. Only available if `cfg!(debug_assertions)` is true.
    pub clir: Option<String>,
    /// Whether this block is a busy-wait loop on its own.
    pub idle_loop: bool,
    /// How many instructions were compiled natively, as opposed to through the interpreter.
    pub native: u32,
}

/// A compiled block of VR4300 instructions.
pub struct Block {
    code: Allocation<Exec>,
    links: Allocation<ReadWrite>,
    meta: Meta,
    _unwind: Option<UnwindHandle>,
}

impl Block {
    pub(crate) fn new(
        code: Allocation<Exec>,
        links: Allocation<ReadWrite>,
        meta: Meta,
        unwind: Option<UnwindHandle>,
    ) -> Self {
        Self {
            code,
            links,
            meta,
            _unwind: unwind,
        }
    }

    /// Meta information regarding this block.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// The entry of this block.
    pub fn as_ptr(&self) -> BlockFn {
        // SAFETY: the pointer is only handed out, never dereferenced here
        BlockFn(unsafe { self.code.as_ptr() }.cast())
    }

    /// Pointers to the link slots of this block. They stay valid for as long as the block and
    /// the JIT that compiled it are alive.
    pub fn links(&self) -> impl Iterator<Item = *mut Link> + use<> {
        // SAFETY: the pointer is only handed out, never dereferenced here
        let base = unsafe { self.links.as_ptr() }.cast::<Link>();
        let count = self.links.len() / size_of::<Link>();
        (0..count).map(move |i| unsafe { base.add(i) }.as_ptr())
    }
}

pub type TrampolineFn = extern "C-unwind" fn(*mut Info, *mut Context, BlockFn);

/// Compiled function which calls a block with the registers of the context.
pub struct Trampoline(
    pub(crate) Allocation<Exec>,
    pub(crate) Option<UnwindHandle>,
);

impl Trampoline {
    /// # Safety
    /// `ctx` must match the type expected by the hooks of the JIT that compiled the trampoline and
    /// `block`.
    pub unsafe fn call(&self, ctx: *mut Context, block: BlockFn) -> Info {
        let mut info = Info::default();

        // SAFETY: the allocation contains a function with the trampoline signature
        let func: TrampolineFn = unsafe { std::mem::transmute(self.0.as_ptr().cast::<u8>()) };
        func(&raw mut info, ctx, block);

        info
    }
}
