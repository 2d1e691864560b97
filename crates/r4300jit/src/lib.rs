//! A JIT compiler for VR4300 code, built on Cranelift.
//!
//! Blocks are compiled from a sequence of instructions and end at the first control transfer.
//! Only the common integer instructions are translated natively. Everything else calls back into
//! the embedder through [`Hooks`], which is expected to run the interpreter.
mod builder;
mod module;
mod sequence;
mod unwind;

pub mod block;
pub mod hooks;

use crate::{
    block::{BlockFn, Info, Link, Meta, Trampoline},
    builder::{BlockBuilder, MAX_EXITS},
    hooks::{Context, Hooks},
    module::Module,
    unwind::UnwindHandle,
};
use cranelift::{
    codegen::{self, ir},
    frontend, native,
    prelude::{Configurable, InstBuilder, isa::TargetIsa},
};
use easyerr::{Error, ResultExt};
use r4300::{Address, Ins};
use std::sync::Arc;
use tracing::trace;

pub use block::Block;
pub use sequence::Sequence;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Whether blocks may continue directly into each other.
    pub link_blocks: bool,
    /// Whether to run the Cranelift verifier on every function.
    pub verify: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            link_blocks: true,
            verify: cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("block contains no instructions")]
    EmptyBlock,
    #[error("host machine is not supported: {reason}")]
    UnsupportedHost { reason: &'static str },
    #[error(transparent)]
    Setting { source: codegen::settings::SetError },
    #[error(transparent)]
    Codegen { source: codegen::CodegenError },
    #[error("generated code failed verification:\n{message}")]
    Verifier { message: String },
    #[error(transparent)]
    Alloc { source: jitalloc::MapError },
}

struct Compiler {
    settings: Settings,
    hooks: Hooks,
    isa: Arc<dyn TargetIsa>,
    module: Module,
}

impl Compiler {
    fn new(settings: Settings, hooks: Hooks) -> Result<Self, BuildError> {
        let verifier = if settings.verify { "true" } else { "false" };

        let mut codegen = codegen::settings::builder();
        let flags = [
            ("preserve_frame_pointers", "true"),
            ("use_colocated_libcalls", "false"),
            ("unwind_info", "true"),
            ("is_pic", "false"),
            // affect runtime performance
            ("opt_level", "speed"),
            ("enable_verifier", verifier),
            ("enable_alias_analysis", "true"),
            ("regalloc_algorithm", "backtracking"),
            ("enable_heap_access_spectre_mitigation", "false"),
            ("enable_table_access_spectre_mitigation", "false"),
        ];

        for (name, value) in flags {
            codegen.set(name, value).context(BuildCtx::Setting)?;
        }

        let isa_builder =
            native::builder().map_err(|reason| BuildError::UnsupportedHost { reason })?;

        let flags = codegen::settings::Flags::new(codegen);
        let isa = isa_builder
            .finish(flags)
            .map_err(|source| BuildError::Codegen { source })?;

        Ok(Compiler {
            settings,
            hooks,
            isa,
            module: Module::new(),
        })
    }

    fn block_signature(&self) -> ir::Signature {
        let ptr = self.isa.pointer_type();
        ir::Signature {
            // info, ctx, regs
            params: vec![ir::AbiParam::new(ptr); 3],
            returns: vec![],
            call_conv: codegen::isa::CallConv::Tail,
        }
    }

    fn trampoline_signature(&self) -> ir::Signature {
        let ptr = self.isa.pointer_type();
        ir::Signature {
            // info, ctx, block
            params: vec![ir::AbiParam::new(ptr); 3],
            returns: vec![],
            call_conv: self.isa.default_call_conv(),
        }
    }

    /// Compiles `func` and copies the result into executable memory.
    fn finish(
        &mut self,
        code_ctx: &mut codegen::Context,
        func: ir::Function,
    ) -> Result<(jitalloc::Allocation<jitalloc::Exec>, Option<UnwindHandle>), BuildError> {
        if self.settings.verify
            && let Err(errors) = codegen::verify_function(&func, &*self.isa)
        {
            return Err(BuildError::Verifier {
                message: errors.to_string(),
            });
        }

        code_ctx.clear();
        code_ctx.func = func;
        let compiled = code_ctx
            .compile(&*self.isa, &mut Default::default())
            .map_err(|e| BuildError::Codegen { source: e.inner })?;

        let alloc = self
            .module
            .allocate_code(compiled.code_buffer())
            .context(BuildCtx::Alloc)?;

        let unwind = match compiled.create_unwind_info(&*self.isa) {
            // SAFETY: the unwind info describes the code just copied into `alloc`
            Ok(Some(info)) => {
                // SAFETY: the allocation lives as long as the block owning the handle
                let handle =
                    unsafe { UnwindHandle::new(&*self.isa, alloc.as_ptr().addr().get(), &info) };
                handle
                    .inspect_err(|reason| trace!(?reason, "generated code is not unwindable"))
                    .ok()
            }
            _ => None,
        };

        Ok((alloc, unwind))
    }

    /// Compiles a trampoline that loads the registers of a context and calls a block.
    fn trampoline(
        &mut self,
        code_ctx: &mut codegen::Context,
        func_ctx: &mut frontend::FunctionBuilderContext,
    ) -> Result<Trampoline, BuildError> {
        let block_sig = self.block_signature();
        let ptr_type = self.isa.pointer_type();

        let mut func = ir::Function::new();
        func.signature = self.trampoline_signature();

        let mut builder = frontend::FunctionBuilder::new(&mut func, func_ctx);
        let entry_bb = builder.create_block();
        builder.append_block_params_for_function_params(entry_bb);
        builder.switch_to_block(entry_bb);
        builder.seal_block(entry_bb);

        let params = builder.block_params(entry_bb);
        let (info_ptr, ctx_ptr, block_ptr) = (params[0], params[1], params[2]);

        // extract regs ptr
        let get_regs_sig = builder.import_signature(Hooks::get_registers_sig(
            ptr_type,
            self.isa.default_call_conv(),
        ));
        let get_registers = builder
            .ins()
            .iconst(ptr_type, self.hooks.get_registers as usize as i64);
        let inst = builder
            .ins()
            .call_indirect(get_regs_sig, get_registers, &[ctx_ptr]);
        let regs_ptr = builder.inst_results(inst)[0];

        // call the block
        let block_sig = builder.import_signature(block_sig);
        builder
            .ins()
            .call_indirect(block_sig, block_ptr, &[info_ptr, ctx_ptr, regs_ptr]);

        builder.ins().return_(&[]);
        builder.finalize();

        let (alloc, unwind) = self.finish(code_ctx, func)?;
        Ok(Trampoline(alloc, unwind))
    }
}

/// A JIT context, producing [`Block`]s.
pub struct Jit {
    compiler: Compiler,
    code_ctx: codegen::Context,
    func_ctx: frontend::FunctionBuilderContext,
    compiled_count: u64,
    trampoline: Trampoline,
}

impl Jit {
    pub fn new(settings: Settings, hooks: Hooks) -> Result<Self, BuildError> {
        let mut compiler = Compiler::new(settings, hooks)?;
        let mut code_ctx = codegen::Context::new();
        let mut func_ctx = frontend::FunctionBuilderContext::new();

        let trampoline = compiler.trampoline(&mut code_ctx, &mut func_ctx)?;

        Ok(Self {
            compiler,
            code_ctx,
            func_ctx,
            compiled_count: 0,
            trampoline,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.compiler.settings
    }

    /// How many blocks were compiled so far.
    pub fn compiled_count(&self) -> u64 {
        self.compiled_count
    }

    /// Bytes of generated code held by this JIT.
    pub fn code_size(&self) -> usize {
        self.compiler.module.code_size()
    }

    /// Compiles a block starting at `start` with the given instructions, up until the first
    /// control transfer or the end of the iterator.
    pub fn compile(
        &mut self,
        start: Address,
        instructions: impl IntoIterator<Item = Ins>,
    ) -> Result<Block, BuildError> {
        let links = self
            .compiler
            .module
            .allocate_links(MAX_EXITS)
            .context(BuildCtx::Alloc)?;

        // SAFETY: the pointer is only embedded into the generated code
        let links_ptr = unsafe { links.as_ptr() }.cast::<Link>();

        let mut func = ir::Function::new();
        func.signature = self.compiler.block_signature();

        let func_builder = frontend::FunctionBuilder::new(&mut func, &mut self.func_ctx);
        let builder = BlockBuilder::new(&self.compiler, func_builder, start, links_ptr);
        let Some(built) = builder.build(instructions) else {
            return Err(BuildError::EmptyBlock);
        };

        let clir = cfg!(debug_assertions).then(|| func.display().to_string());
        let meta = Meta {
            idle_loop: built.seq.is_idle_loop(start),
            seq: built.seq,
            clir,
            native: built.native,
        };

        let (code, unwind) = self.compiler.finish(&mut self.code_ctx, func)?;
        self.compiled_count += 1;
        trace!(
            ?start,
            instructions = meta.seq.len(),
            native = meta.native,
            size = code.len(),
            "compiled block"
        );

        Ok(Block::new(code, links, meta, unwind))
    }

    /// Calls the given block with the given context, returning once control is back with the
    /// dispatcher.
    ///
    /// # Safety
    /// `ctx` must match the type expected by the hooks of this JIT context, and `block` must have
    /// been compiled by it.
    pub unsafe fn call(&mut self, ctx: *mut Context, block: BlockFn) -> Info {
        // SAFETY: the exclusive reference to the JIT guarantees the allocators are not being
        // used, keeping the allocations valid
        unsafe { self.trampoline.call(ctx, block) }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hooks::Context;
    use r4300::Cpu;

    /// A tiny embedder: registers plus a flat, identity mapped memory.
    #[derive(Default)]
    struct Env {
        cpu: Cpu,
        memory: Vec<u8>,
        ticks: u64,
        events: u32,
        interpreted: Vec<u32>,
    }

    fn env(ctx: *mut Context) -> &'static mut Env {
        unsafe { &mut *ctx.cast::<Env>() }
    }

    extern "C-unwind" fn get_registers(ctx: *mut Context) -> *mut Cpu {
        &raw mut env(ctx).cpu
    }

    extern "C-unwind" fn follow_link(_: *const Info, _: *mut Context) -> bool {
        false
    }

    extern "C-unwind" fn try_link(_: *mut Context, _: u32, _: *mut Link) {}

    fn slice(env: &mut Env, addr: u32, len: usize) -> Option<&mut [u8]> {
        let start = (addr & 0x1FFF_FFFF) as usize;
        env.memory.get_mut(start..start + len)
    }

    macro_rules! memory_hooks {
        ($($read:ident, $write:ident: $ty:ty);*) => {
            $(
                extern "C-unwind" fn $read(ctx: *mut Context, addr: u32, value: *mut $ty) -> bool {
                    let Some(bytes) = slice(env(ctx), addr, size_of::<$ty>()) else {
                        return false;
                    };

                    unsafe { value.write(<$ty>::from_be_bytes(bytes.try_into().unwrap())) };
                    true
                }

                extern "C-unwind" fn $write(ctx: *mut Context, addr: u32, value: $ty) -> bool {
                    let Some(bytes) = slice(env(ctx), addr, size_of::<$ty>()) else {
                        return false;
                    };

                    bytes.copy_from_slice(&value.to_be_bytes());
                    true
                }
            )*
        };
    }

    memory_hooks! {
        read_u8, write_u8: u8;
        read_u16, write_u16: u16;
        read_u32, write_u32: u32;
        read_u64, write_u64: u64
    }

    extern "C-unwind" fn interpret(ctx: *mut Context, code: u32) -> bool {
        env(ctx).interpreted.push(code);
        true
    }

    extern "C-unwind" fn step(_: *mut Context) -> u32 {
        0
    }

    extern "C-unwind" fn idle(_: *mut Context) -> bool {
        false
    }

    extern "C-unwind" fn advance(ctx: *mut Context, ticks: u64) {
        env(ctx).ticks += ticks;
    }

    extern "C-unwind" fn process_events(ctx: *mut Context) {
        env(ctx).events += 1;
    }

    const HOOKS: Hooks = Hooks {
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
    };

    const BASE: u32 = 0x8000_1000;

    fn run(program: &[u32], setup: impl FnOnce(&mut Env)) -> (Env, Info) {
        let mut jit = Jit::new(Settings::default(), HOOKS).unwrap();
        let block = jit
            .compile(Address(BASE), program.iter().copied().map(Ins::new))
            .unwrap();

        let mut env = Env {
            memory: vec![0; 0x10000],
            ..Default::default()
        };
        env.cpu.pc = Address(BASE);
        setup(&mut env);

        let info = unsafe { jit.call((&raw mut env).cast(), block.as_ptr()) };
        (env, info)
    }

    #[test]
    fn empty_block_is_an_error() {
        let mut jit = Jit::new(Settings::default(), HOOKS).unwrap();
        let result = jit.compile(Address(BASE), std::iter::empty());
        assert!(matches!(result, Err(BuildError::EmptyBlock)));
    }

    #[test]
    fn arithmetic_is_native() {
        let program = [
            0x2421_0001, // addiu r1, r1, 1
            0x0022_1821, // addu r3, r1, r2
            0x0003_2100, // sll r4, r3, 4
            0x3C05_8000, // lui r5, 0x8000
            0x0022_0018, // mult r1, r2
            0x0000_3012, // mflo r6
        ];

        let (env, info) = run(&program, |env| {
            env.cpu.gpr[1] = 0x7FFF_FFFE;
            env.cpu.gpr[2] = 2;
        });

        assert_eq!(env.cpu.gpr[1], 0x7FFF_FFFF);
        assert_eq!(env.cpu.gpr[3], 0xFFFF_FFFF_8000_0001);
        assert_eq!(env.cpu.gpr[4], 0x10);
        assert_eq!(env.cpu.gpr[5], 0xFFFF_FFFF_8000_0000);
        assert_eq!(env.cpu.lo, 0xFFFF_FFFF_FFFF_FFFE);
        assert_eq!(env.cpu.hi, 0);
        assert_eq!(env.cpu.pc, Address(BASE + 24));
        assert_eq!(info.instructions, 6);
        assert_eq!(env.ticks, 12);
        assert!(env.interpreted.is_empty());
    }

    #[test]
    fn trapping_arithmetic_is_interpreted() {
        let program = [
            0x0022_1820, // add r3, r1, r2
            0x2024_0001, // addi r4, r1, 1
            0x0022_282C, // dadd r5, r1, r2
            0x0022_3021, // addu r6, r1, r2
        ];

        let (env, info) = run(&program, |env| {
            env.cpu.gpr[1] = 1;
            env.cpu.gpr[2] = 2;
        });

        assert_eq!(env.interpreted, &program[..3]);
        assert_eq!(env.cpu.gpr[6], 3);
        assert_eq!(info.instructions, 4);
    }

    #[test]
    fn loads_and_stores_go_through_hooks() {
        let program = [
            0xAC41_0000, // sw r1, 0(r2)
            0x8043_0001, // lb r3, 1(r2)
            0x9444_0002, // lhu r4, 2(r2)
        ];

        let (env, info) = run(&program, |env| {
            env.cpu.gpr[1] = 0x1280_AABB;
            env.cpu.gpr[2] = 0xFFFF_FFFF_8000_0100;
        });

        assert_eq!(&env.memory[0x100..0x104], &[0x12, 0x80, 0xAA, 0xBB]);
        assert_eq!(env.cpu.gpr[3], 0xFFFF_FFFF_FFFF_FF80);
        assert_eq!(env.cpu.gpr[4], 0xAABB);
        assert_eq!(info.instructions, 3);
    }

    #[test]
    fn failed_access_leaves_the_block() {
        let program = [
            0x2421_0001, // addiu r1, r1, 1
            0x8C43_0000, // lw r3, 0(r2)
            0x2421_0001, // addiu r1, r1, 1
        ];

        let (env, info) = run(&program, |env| env.cpu.gpr[2] = 0xFFFF_FFFF_8010_0000);

        assert_eq!(env.cpu.gpr[1], 1);
        assert_eq!(env.cpu.pc, Address(BASE + 4));
        assert_eq!(info.instructions, 1);
        assert_eq!(env.ticks, 2);
    }

    #[test]
    fn taken_branch_runs_delay_slot_and_processes_events() {
        let program = [
            0x1022_0003, // beq r1, r2, +3
            0x2463_0001, // addiu r3, r3, 1
        ];

        let (env, info) = run(&program, |env| {
            env.cpu.gpr[1] = 5;
            env.cpu.gpr[2] = 5;
        });

        assert_eq!(env.cpu.pc, Address(BASE + 16));
        assert_eq!(env.cpu.gpr[3], 1);
        assert_eq!(info.instructions, 2);
        assert_eq!(env.ticks, 4);
        assert_eq!(env.events, 1);
    }

    #[test]
    fn likely_branch_skips_slot_when_not_taken() {
        let program = [
            0x5022_0003, // beql r1, r2, +3
            0x2463_0001, // addiu r3, r3, 1
        ];

        let (env, info) = run(&program, |env| env.cpu.gpr[1] = 1);

        assert_eq!(env.cpu.pc, Address(BASE + 8));
        assert_eq!(env.cpu.gpr[3], 0);
        assert_eq!(info.instructions, 1);
        assert_eq!(env.ticks, 4);
    }

    #[test]
    fn jal_links_after_slot() {
        let program = [
            0x0C00_0800, // jal 0x2000
            0x001F_1025, // or v0, zero, ra
        ];

        let (env, _) = run(&program, |env| env.cpu.gpr[31] = 0x1234);

        assert_eq!(env.cpu.pc, Address(0x8000_2000));
        assert_eq!(env.cpu.gpr[2], 0x1234);
        assert_eq!(env.cpu.gpr[31], util::sext32(BASE + 8));
    }

    #[test]
    fn unsupported_instructions_are_interpreted() {
        let program = [
            0x4080_6000, // mtc0 zero, status
            0x2421_0001, // addiu r1, r1, 1
        ];

        let (env, info) = run(&program, |_| ());

        assert_eq!(env.interpreted, vec![0x4080_6000]);
        assert_eq!(env.cpu.gpr[1], 1);
        assert_eq!(info.instructions, 2);
    }
}
