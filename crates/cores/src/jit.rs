//! Executes guest code translated into host code by [`r4300jit`].
//!
//! The dispatcher looks up the block at `cpu.pc`, compiling it if needed, and calls it. Blocks
//! continue directly into each other through their link slots for as long as the `follow_link`
//! hook allows, so control only comes back to the dispatcher when the target page changed, the
//! cycle budget ran out or the session stopped.
mod mapping;
mod table;

use crate::page_instructions;
use cobalt::{
    cores::{CpuCore, Executed, ExecutionMode},
    system::System,
};
use mapping::{Mapping, Table};
use r4300::{Address, Cpu, Ins, Primitive};
use r4300int::Flow;
use r4300jit::{
    Block, BuildError,
    block::{BlockFn, Info, Link},
    hooks::*,
};
use tracing::{debug, error, trace};

pub use r4300jit;

/// Identifier for a block in a [`Blocks`] storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(usize);

pub struct StoredBlock {
    pub inner: Block,
    /// Link slots of other blocks that currently continue into this one.
    pub links: Vec<*mut Link>,
}

// SAFETY: link slots belong to blocks of the same storage, which moves between threads as a whole
unsafe impl Send for StoredBlock {}

/// A structure which keeps tracks of compiled [`Block`]s.
///
/// Invalidated blocks stay in the storage: their link slots live in the JIT's arena and may
/// still be referenced by other blocks.
#[derive(Default)]
pub struct Blocks {
    storage: Vec<StoredBlock>,
    mappings: Table,
}

impl Blocks {
    /// Inserts a block into the storage and maps it to the given address.
    pub fn insert(&mut self, addr: Address, block: Block) -> BlockId {
        let length = 4 * block.meta().seq.len() as u32;
        let id = BlockId(self.storage.len());

        self.storage.push(StoredBlock {
            inner: block,
            links: Vec::new(),
        });

        self.mappings.insert(addr, Mapping { id, length });

        id
    }

    /// Returns the mapping at `addr`.
    #[inline(always)]
    pub fn get_mapping(&self, addr: Address) -> Option<Mapping> {
        self.mappings.get(addr).copied()
    }

    /// Returns the block mapped to `addr`.
    #[inline(always)]
    pub fn get(&self, addr: Address) -> Option<&StoredBlock> {
        self.storage.get(self.get_mapping(addr)?.id.0)
    }

    #[inline(always)]
    fn get_mut(&mut self, addr: Address) -> Option<&mut StoredBlock> {
        self.storage.get_mut(self.get_mapping(addr)?.id.0)
    }

    /// How many blocks are currently mapped.
    pub fn mapped(&self) -> usize {
        self.mappings.mapped()
    }

    /// Unmaps every block of `page` and unlinks every block that continues into them.
    pub fn invalidate_page(&mut self, page: usize) {
        let taken = self.mappings.take_page(page);
        if taken.is_empty() {
            return;
        }

        let mut bytes = 0;
        for mapping in taken {
            bytes += mapping.length;
            let block = &mut self.storage[mapping.id.0];
            for link in block.links.drain(..) {
                // SAFETY: link slots are never freed while the JIT lives
                unsafe { (*link).block = None };
            }
        }

        trace!(page, bytes, "unmapped stale blocks");
    }
}

/// Context to be passed in for execution of JIT blocks.
struct Context<'a> {
    /// The system state, so that the JIT block can operate on it.
    sys: &'a mut System,
    /// The block mapping, so that blocks can be linked.
    blocks: &'a mut Blocks,
    /// Clock value when the dispatcher started.
    start: u64,
    /// Amount of ticks the dispatcher is trying to execute.
    target: u64,
}

const CTX_HOOKS: Hooks = {
    extern "C-unwind" fn get_registers<'a>(ctx: &'a mut Context) -> &'a mut Cpu {
        &mut ctx.sys.cpu
    }

    extern "C-unwind" fn follow_link(_: &Info, ctx: &mut Context) -> bool {
        let sys = &*ctx.sys;
        sys.scheduler.elapsed() - ctx.start < ctx.target
            && !sys.stopped
            && !sys.legacy_beq_shim
            && sys.is_code_valid(sys.cpu.pc)
    }

    extern "C-unwind" fn try_link(ctx: &mut Context, addr: u32, link: &mut Link) {
        let addr = Address(addr);
        if !ctx.sys.is_code_valid(addr) {
            return;
        }

        let Some(stored) = ctx.blocks.get_mut(addr) else {
            return;
        };

        *link = Link {
            block: Some(stored.inner.as_ptr()),
            addr,
        };

        let link = &raw mut *link;
        if !stored.links.contains(&link) {
            stored.links.push(link);
        }
    }

    extern "C-unwind" fn read<P: Primitive>(ctx: &mut Context, addr: u32, value: &mut P) -> bool {
        if let Some(read) = ctx.sys.read(Address(addr)) {
            *value = read;
            true
        } else {
            ctx.sys.process_events();
            false
        }
    }

    extern "C-unwind" fn write<P: Primitive>(ctx: &mut Context, addr: u32, value: P) -> bool {
        if ctx.sys.write(Address(addr), value) {
            true
        } else {
            ctx.sys.process_events();
            false
        }
    }

    extern "C-unwind" fn interpret(ctx: &mut Context, code: u32) -> bool {
        match r4300int::execute(ctx.sys, Ins::new(code)) {
            Flow::Next => true,
            Flow::Exception => {
                ctx.sys.process_events();
                false
            }
            flow => {
                debug!(pc = ?ctx.sys.cpu.pc, ?flow, "interpreted instruction left the block");
                false
            }
        }
    }

    extern "C-unwind" fn step(ctx: &mut Context) -> u32 {
        r4300int::step(ctx.sys).retired
    }

    extern "C-unwind" fn idle(ctx: &mut Context) -> bool {
        let pc = ctx.sys.cpu.pc;
        let Some(skip) = r4300int::idle_skip(ctx.sys, pc) else {
            return false;
        };

        trace!(?pc, skip, "skipping idle loop");
        ctx.sys.advance(skip);
        ctx.sys.process_events();
        true
    }

    extern "C-unwind" fn advance(ctx: &mut Context, ticks: u64) {
        ctx.sys.advance(ticks);
    }

    extern "C-unwind" fn process_events(ctx: &mut Context) {
        ctx.sys.process_events();
    }

    #[expect(
        clippy::missing_transmute_annotations,
        reason = "unnecessary - the definitions are above"
    )]
    unsafe {
        use std::mem::transmute;

        let get_registers =
            transmute::<_, GetRegistersHook>(get_registers as extern "C-unwind" fn(_) -> _);

        let follow_link =
            transmute::<_, FollowLinkHook>(follow_link as extern "C-unwind" fn(_, _) -> _);
        let try_link = transmute::<_, TryLinkHook>(try_link as extern "C-unwind" fn(_, _, _));

        let read_u8 =
            transmute::<_, ReadHook<u8>>(read::<u8> as extern "C-unwind" fn(_, _, _) -> _);
        let read_u16 =
            transmute::<_, ReadHook<u16>>(read::<u16> as extern "C-unwind" fn(_, _, _) -> _);
        let read_u32 =
            transmute::<_, ReadHook<u32>>(read::<u32> as extern "C-unwind" fn(_, _, _) -> _);
        let read_u64 =
            transmute::<_, ReadHook<u64>>(read::<u64> as extern "C-unwind" fn(_, _, _) -> _);
        let write_u8 =
            transmute::<_, WriteHook<u8>>(write::<u8> as extern "C-unwind" fn(_, _, _) -> _);
        let write_u16 =
            transmute::<_, WriteHook<u16>>(write::<u16> as extern "C-unwind" fn(_, _, _) -> _);
        let write_u32 =
            transmute::<_, WriteHook<u32>>(write::<u32> as extern "C-unwind" fn(_, _, _) -> _);
        let write_u64 =
            transmute::<_, WriteHook<u64>>(write::<u64> as extern "C-unwind" fn(_, _, _) -> _);

        let interpret =
            transmute::<_, InterpretHook>(interpret as extern "C-unwind" fn(_, _) -> _);
        let step = transmute::<_, StepHook>(step as extern "C-unwind" fn(_) -> _);

        let idle = transmute::<_, IdleHook>(idle as extern "C-unwind" fn(_) -> _);
        let advance = transmute::<_, AdvanceHook>(advance as extern "C-unwind" fn(_, _));
        let process_events =
            transmute::<_, GenericHook>(process_events as extern "C-unwind" fn(_));

        Hooks {
            get_registers,

            follow_link,
            try_link,

            read_u8,
            read_u16,
            read_u32,
            read_u64,
            write_u8,
            write_u16,
            write_u32,
            write_u64,

            interpret,
            step,

            idle,
            advance,
            process_events,
        }
    }
};

/// JIT configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of instructions per JIT block.
    pub instr_per_block: u32,
    /// Code generation settings.
    pub jit_settings: r4300jit::Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instr_per_block: 128,
            jit_settings: r4300jit::Settings::default(),
        }
    }
}

pub struct Core {
    pub config: Config,
    pub compiler: r4300jit::Jit,
    pub blocks: Blocks,
}

impl Core {
    /// Creates the recompiler. Fails if code cannot be generated for this host.
    pub fn new(config: Config) -> Result<Self, BuildError> {
        let compiler = r4300jit::Jit::new(config.jit_settings.clone(), CTX_HOOKS)?;

        Ok(Self {
            config,
            compiler,
            blocks: Blocks::default(),
        })
    }

    /// Compiles the instructions starting at `addr`, up to the end of its page, into a JIT block.
    fn compile(&mut self, sys: &System, addr: Address) -> Result<Block, BuildError> {
        let _span = tracing::trace_span!("compiling new block", ?addr).entered();

        let limit = self.config.instr_per_block.max(1) as usize;
        self.compiler
            .compile(addr, page_instructions(sys, addr).take(limit))
    }

    /// Returns the block at `pc`, compiling it if needed. Before entering a page whose code
    /// changed, its blocks are dropped.
    fn block(&mut self, sys: &mut System, pc: Address) -> Option<BlockFn> {
        let page = pc.page();
        if !sys.is_code_valid(pc) {
            self.blocks.invalidate_page(page);
            sys.validate_code(pc);
        }

        if let Some(stored) = self.blocks.get(pc) {
            return Some(stored.inner.as_ptr());
        }

        match self.compile(sys, pc) {
            Ok(block) => {
                let id = self.blocks.insert(pc, block);
                Some(self.blocks.storage[id.0].inner.as_ptr())
            }
            // pc does not translate: the interpreter raises the exception
            Err(BuildError::EmptyBlock) => None,
            Err(e) => {
                error!(?pc, "failed to compile block: {e}");
                None
            }
        }
    }
}

impl CpuCore for Core {
    fn exec(&mut self, sys: &mut System, cycles: u64) -> Executed {
        let start = sys.scheduler.elapsed();
        let mut instructions = 0;
        while sys.scheduler.elapsed() - start < cycles && !sys.stopped {
            // the shim must see the instruction exactly as fetched
            if sys.legacy_beq_shim {
                instructions += r4300int::step(sys).retired as u64;
                continue;
            }

            let Some(block) = self.block(sys, sys.cpu.pc) else {
                instructions += r4300int::step(sys).retired as u64;
                continue;
            };

            let mut ctx = Context {
                sys: &mut *sys,
                blocks: &mut self.blocks,
                start,
                target: cycles,
            };

            // SAFETY: the context is the one CTX_HOOKS expects and the block was compiled by this
            // JIT
            let info = unsafe {
                self.compiler
                    .call(&raw mut ctx as *mut r4300jit::hooks::Context, block)
            };

            instructions += info.instructions;
        }

        Executed {
            instructions,
            cycles: sys.scheduler.elapsed() - start,
        }
    }

    fn step(&mut self, sys: &mut System) -> Executed {
        let start = sys.scheduler.elapsed();
        let step = r4300int::step(sys);

        Executed {
            instructions: step.retired as u64,
            cycles: sys.scheduler.elapsed() - start,
        }
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Recompiler
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use cobalt::system::Config as SystemConfig;

    const BASE: u32 = 0x8000_1000;

    fn system(program: &[(u32, u32)]) -> System {
        let mut sys = System::new(SystemConfig {
            cache_blocks: true,
            ..SystemConfig::default()
        });

        for &(addr, word) in program {
            let offset = (addr & 0x1FFF_FFFF) as usize;
            sys.bus.mem.rdram[offset..offset + 4].copy_from_slice(&word.to_be_bytes());
        }

        sys.cpu.pc = Address(BASE);
        sys
    }

    fn addiu(rt: u32, rs: u32, imm: i16) -> u32 {
        (0x09 << 26) | (rs << 21) | (rt << 16) | imm as u16 as u32
    }

    fn j(target: u32) -> u32 {
        (0x02 << 26) | ((target >> 2) & 0x03FF_FFFF)
    }

    fn sw(rt: u32, base: u32, offset: i16) -> u32 {
        (0x2B << 26) | (base << 21) | (rt << 16) | offset as u16 as u32
    }

    /// Two blocks jumping into each other.
    fn ping_pong() -> System {
        let other = BASE + 0x100;
        system(&[
            (BASE, addiu(1, 1, 1)),
            (BASE + 4, j(other)),
            (BASE + 8, 0),
            (other, addiu(2, 2, 1)),
            (other + 4, j(BASE)),
            (other + 8, 0),
        ])
    }

    #[test]
    fn blocks_link_to_each_other() {
        let mut sys = ping_pong();
        let mut core = Core::new(Config::default()).unwrap();

        let executed = core.exec(&mut sys, 120);
        assert_eq!(executed.cycles, 120);
        assert_eq!(executed.instructions, 60);
        assert_eq!(sys.cpu.gpr[1], 10);
        assert_eq!(sys.cpu.gpr[2], 10);

        assert_eq!(core.compiler.compiled_count(), 2);
        assert_eq!(core.blocks.get(Address(BASE)).unwrap().links.len(), 1);
        assert_eq!(core.blocks.get(Address(BASE + 0x100)).unwrap().links.len(), 1);
    }

    #[test]
    fn invalidating_a_page_unlinks_its_blocks() {
        let mut sys = ping_pong();
        let mut core = Core::new(Config::default()).unwrap();
        core.exec(&mut sys, 120);

        core.blocks.invalidate_page(Address(BASE).page());
        assert_eq!(core.blocks.mapped(), 0);
        assert!(core.blocks.get(Address(BASE)).is_none());

        for stored in &core.blocks.storage {
            for link in stored.inner.links() {
                assert!(unsafe { (*link).block }.is_none());
            }
        }
    }

    #[test]
    fn stores_into_code_recompile_it() {
        // the first block overwrites the addiu of the second one
        let other = BASE + 0x100;
        let mut sys = system(&[
            (BASE, sw(4, 5, 0x100)),
            (BASE + 4, j(other)),
            (BASE + 8, 0),
            (other, addiu(1, 1, 1)),
            (other + 4, j(BASE)),
            (other + 8, 0),
        ]);

        sys.cpu.gpr[4] = addiu(1, 1, 5) as u64;
        sys.cpu.gpr[5] = util::sext32(BASE);

        let mut core = Core::new(Config::default()).unwrap();
        core.exec(&mut sys, 24);

        assert_eq!(sys.cpu.gpr[1], 10);
        assert!(core.compiler.compiled_count() >= 3);
    }

    #[test]
    fn mapped_code_is_recompiled_after_fixed_store() {
        use r4300::cop0::reg;

        // virtual 0x0040_0000 maps physical 0x0010_0000, which loops on itself
        let mapped = 0x0040_0000;
        let mut sys = system(&[
            (0x8010_0000, addiu(1, 1, 1)),
            (0x8010_0004, j(mapped)),
            (0x8010_0008, 0),
        ]);

        let regs = &mut sys.cpu.cop0.regs;
        regs[reg::INDEX] = 0;
        regs[reg::PAGE_MASK] = 0;
        regs[reg::ENTRY_HI] = mapped;
        regs[reg::ENTRY_LO0] = (0x100 << 6) | 0b111;
        regs[reg::ENTRY_LO1] = (0x101 << 6) | 0b111;
        sys.tlbwi();
        sys.cpu.pc = Address(mapped);

        let mut core = Core::new(Config::default()).unwrap();
        core.exec(&mut sys, 12);
        assert_eq!(sys.cpu.gpr[1], 2);

        assert!(sys.write(Address(0x8010_0000), addiu(1, 1, 5)));
        core.exec(&mut sys, 12);
        assert_eq!(sys.cpu.gpr[1], 12);
        assert_eq!(core.compiler.compiled_count(), 2);
    }
}
