//! Translation of VR4300 instructions into Cranelift IR.
//!
//! Guest registers live in Cranelift variables while a block runs and are written back to the
//! [`Cpu`](r4300::Cpu) before anything outside the block can observe them: before every hook call
//! and at every exit. Ticks are accumulated at compile time and applied to the clock at the same
//! points.
mod alu;
mod branch;
mod memory;
mod util;

use crate::{
    Compiler,
    block::{Info, Link},
    hooks::Hooks,
    sequence::Sequence,
};
use cranelift::{
    codegen::ir::{self, SigRef},
    frontend,
    prelude::{InstBuilder, IntCC},
};
use r4300::{Address, Ins, Opcode, Reg};
use rustc_hash::FxHashMap;
use std::{collections::hash_map::Entry, ptr::NonNull};
use tracing::debug;

const MEMFLAGS: ir::MemFlags = ir::MemFlags::trusted();

/// Count ticks per executed instruction.
const TICKS: u64 = 2;

/// Most exits that continue at another block a single block can have. Each owns a link slot.
pub const MAX_EXITS: usize = 3;

struct Signatures {
    block: SigRef,
    follow_link: SigRef,
    try_link: SigRef,
    read: SigRef,
    write: [SigRef; 4],
    interpret: SigRef,
    step: SigRef,
    idle: SigRef,
    advance: SigRef,
    generic: SigRef,
}

struct Consts {
    ptr_type: ir::Type,
    info_ptr: ir::Value,
    ctx_ptr: ir::Value,
    regs_ptr: ir::Value,
    links: NonNull<Link>,
    read_stack_slot: ir::StackSlot,
    signatures: Signatures,
}

#[derive(Clone, Copy)]
struct RegState {
    var: frontend::Variable,
    modified: bool,
}

/// Compile time state of the path being emitted. Diverging paths each get their own copy.
#[derive(Clone, Default)]
struct PathState {
    regs: FxHashMap<Reg, RegState>,
    /// Instructions retired on this path since the block was entered.
    retired: u64,
    /// Ticks not yet applied to the clock.
    pending: u64,
}

/// Outcome of building a block.
pub struct Built {
    pub seq: Sequence,
    /// Instructions compiled natively.
    pub native: u32,
}

fn ir_type(reg: Reg) -> ir::Type {
    match reg.size() {
        8 => ir::types::I64,
        4 => ir::types::I32,
        _ => ir::types::I8,
    }
}

pub struct BlockBuilder<'ctx> {
    compiler: &'ctx Compiler,
    bd: frontend::FunctionBuilder<'ctx>,
    consts: Consts,
    state: PathState,
    /// Address of the instruction being compiled.
    pc: Address,
    /// Whether the instruction being compiled sits in a delay slot.
    in_slot: bool,
    exits: usize,
    native: u32,
}

impl<'ctx> BlockBuilder<'ctx> {
    pub fn new(
        compiler: &'ctx Compiler,
        mut bd: frontend::FunctionBuilder<'ctx>,
        start: Address,
        links: NonNull<Link>,
    ) -> Self {
        let entry_bb = bd.create_block();
        bd.append_block_params_for_function_params(entry_bb);
        bd.switch_to_block(entry_bb);
        bd.seal_block(entry_bb);

        let params = bd.block_params(entry_bb);
        let (info_ptr, ctx_ptr, regs_ptr) = (params[0], params[1], params[2]);

        let ptr_type = compiler.isa.pointer_type();
        let call_conv = compiler.isa.default_call_conv();
        let write_sig = |bd: &mut frontend::FunctionBuilder, ty| {
            bd.import_signature(Hooks::write_sig(ptr_type, ty, call_conv))
        };

        let signatures = Signatures {
            block: bd.import_signature(compiler.block_signature()),
            follow_link: bd.import_signature(Hooks::follow_link_sig(ptr_type, call_conv)),
            try_link: bd.import_signature(Hooks::try_link_sig(ptr_type, call_conv)),
            read: bd.import_signature(Hooks::read_sig(ptr_type, call_conv)),
            write: [
                write_sig(&mut bd, ir::types::I8),
                write_sig(&mut bd, ir::types::I16),
                write_sig(&mut bd, ir::types::I32),
                write_sig(&mut bd, ir::types::I64),
            ],
            interpret: bd.import_signature(Hooks::interpret_sig(ptr_type, call_conv)),
            step: bd.import_signature(Hooks::step_sig(ptr_type, call_conv)),
            idle: bd.import_signature(Hooks::idle_sig(ptr_type, call_conv)),
            advance: bd.import_signature(Hooks::advance_sig(ptr_type, call_conv)),
            generic: bd.import_signature(Hooks::generic_sig(ptr_type, call_conv)),
        };

        let read_stack_slot = bd.create_sized_stack_slot(ir::StackSlotData::new(
            ir::StackSlotKind::ExplicitSlot,
            size_of::<u64>() as u32,
            3,
        ));

        Self {
            compiler,
            bd,
            consts: Consts {
                ptr_type,
                info_ptr,
                ctx_ptr,
                regs_ptr,
                links,
                read_stack_slot,
                signatures,
            },
            state: PathState::default(),
            pc: start,
            in_slot: false,
            exits: 0,
            native: 0,
        }
    }

    fn switch_to_bb(&mut self, bb: ir::Block) {
        self.bd.switch_to_block(bb);
    }

    /// Reads a register of the CPU state, loading it into a variable on first use.
    fn get(&mut self, reg: Reg) -> ir::Value {
        let var = match self.state.regs.entry(reg) {
            Entry::Occupied(o) => o.into_mut(),
            Entry::Vacant(v) => {
                let loaded = self.bd.ins().load(
                    ir_type(reg),
                    MEMFLAGS,
                    self.consts.regs_ptr,
                    reg.offset() as i32,
                );

                let var = self.bd.declare_var(ir_type(reg));
                self.bd.def_var(var, loaded);
                v.insert(RegState {
                    var,
                    modified: false,
                })
            }
        }
        .var;

        self.bd.use_var(var)
    }

    /// Writes a register of the CPU state. The write reaches memory at the next flush.
    fn set(&mut self, reg: Reg, value: ir::Value) {
        let var = match self.state.regs.entry(reg) {
            Entry::Occupied(o) => {
                let state = o.into_mut();
                state.modified = true;
                state.var
            }
            Entry::Vacant(v) => {
                let var = self.bd.declare_var(ir_type(reg));
                v.insert(RegState {
                    var,
                    modified: true,
                });

                var
            }
        };

        self.bd.def_var(var, value);
    }

    fn get_gpr(&mut self, index: u8) -> ir::Value {
        if index == 0 {
            self.bd.ins().iconst(ir::types::I64, 0)
        } else {
            self.get(Reg::Gpr(index))
        }
    }

    fn set_gpr(&mut self, index: u8, value: ir::Value) {
        if index != 0 {
            self.set(Reg::Gpr(index), value);
        }
    }

    /// Stores a register directly, bypassing the variables.
    fn store_reg(&mut self, reg: Reg, value: ir::Value) {
        debug_assert!(!self.state.regs.contains_key(&reg));
        self.bd
            .ins()
            .store(MEMFLAGS, value, self.consts.regs_ptr, reg.offset() as i32);
    }

    fn store_pc(&mut self, pc: Address) {
        let pc = self.bd.ins().iconst(ir::types::I32, pc.value() as i64);
        self.store_reg(Reg::Pc, pc);
    }

    /// Writes modified registers back to the CPU state.
    fn flush(&mut self) {
        for (reg, state) in &mut self.state.regs {
            if !state.modified {
                continue;
            }

            let value = self.bd.use_var(state.var);
            self.bd
                .ins()
                .store(MEMFLAGS, value, self.consts.regs_ptr, reg.offset() as i32);

            state.modified = false;
        }
    }

    /// Flushes and forgets every register, so that they are loaded again on next use.
    fn invalidate(&mut self) {
        self.flush();
        self.state.regs.clear();
    }

    fn call_hook(&mut self, sig: SigRef, hook: usize, args: &[ir::Value]) -> ir::Inst {
        let callee = self.bd.ins().iconst(self.consts.ptr_type, hook as i64);
        self.bd.ins().call_indirect(sig, callee, args)
    }

    /// Applies pending ticks to the clock.
    fn sync_clock(&mut self) {
        if self.state.pending == 0 {
            return;
        }

        let ticks = self
            .bd
            .ins()
            .iconst(ir::types::I64, self.state.pending as i64);
        let hook = self.compiler.hooks.advance as usize;
        let ctx = self.consts.ctx_ptr;
        self.call_hook(self.consts.signatures.advance, hook, &[ctx, ticks]);

        self.state.pending = 0;
    }

    /// Brings the CPU state up to date for the instruction being compiled, before a hook call.
    fn before_hook(&mut self) {
        self.flush();
        self.sync_clock();
        self.store_pc(self.pc);
        if self.in_slot {
            let one = self.bd.ins().iconst(ir::types::I8, 1);
            self.store_reg(Reg::DelaySlot, one);
        }
    }

    fn after_hook(&mut self) {
        if self.in_slot {
            let zero = self.bd.ins().iconst(ir::types::I8, 0);
            self.store_reg(Reg::DelaySlot, zero);
        }
    }

    /// Calls a hook with the CPU state up to date and returns its results.
    fn call_with_state(&mut self, sig: SigRef, hook: usize, args: &[ir::Value]) -> ir::Value {
        self.before_hook();
        let inst = self.call_hook(sig, hook, args);
        self.after_hook();

        self.bd.inst_results(inst)[0]
    }

    fn process_events(&mut self) {
        self.flush();
        self.sync_clock();

        let hook = self.compiler.hooks.process_events as usize;
        let ctx = self.consts.ctx_ptr;
        self.call_hook(self.consts.signatures.generic, hook, &[ctx]);
    }

    /// Adds the instructions retired on this path to the execution info.
    fn update_info(&mut self, extra: Option<ir::Value>) {
        let offset = ::util::offset_of!(Info, instructions) as i32;
        let count = self.bd.ins().load(
            ir::types::I64,
            MEMFLAGS,
            self.consts.info_ptr,
            offset,
        );

        let mut count = self.bd.ins().iadd_imm(count, self.state.retired as i64);
        if let Some(extra) = extra {
            count = self.bd.ins().iadd(count, extra);
        }

        self.bd
            .ins()
            .store(MEMFLAGS, count, self.consts.info_ptr, offset);
    }

    /// Leaves the block, returning to the dispatcher. `cpu.pc` must already be up to date.
    fn exit(&mut self) {
        self.flush();
        self.sync_clock();
        self.update_info(None);
        self.bd.ins().return_(&[]);
    }

    /// Branches to a cold exit if `ok` is false and continues emitting on the other side.
    fn exit_unless(&mut self, ok: ir::Value) {
        let exit_bb = self.bd.create_block();
        let continue_bb = self.bd.create_block();
        self.bd.set_cold_block(exit_bb);

        self.bd.ins().brif(ok, continue_bb, &[], exit_bb, &[]);
        self.bd.seal_block(exit_bb);
        self.bd.seal_block(continue_bb);

        self.switch_to_bb(exit_bb);
        let saved = self.state.clone();
        self.exit();
        self.state = saved;

        self.switch_to_bb(continue_bb);
    }

    /// Leaves the block, continuing directly into the block at `cpu.pc` if possible. `cpu.pc`
    /// must already be up to date.
    fn exit_with_link(&mut self) {
        self.exit_with_link_counting(None);
    }

    /// Like [`Self::exit_with_link`], also counting `extra` retired instructions.
    fn exit_with_link_counting(&mut self, extra: Option<ir::Value>) {
        self.flush();
        self.sync_clock();
        self.update_info(extra);

        if !self.compiler.settings.link_blocks {
            self.bd.ins().return_(&[]);
            return;
        }

        assert!(self.exits < MAX_EXITS);
        // SAFETY: link slots are allocated in groups of MAX_EXITS
        let slot = unsafe { self.consts.links.add(self.exits) };
        self.exits += 1;

        let ptr_type = self.consts.ptr_type;
        let slot_ptr = self
            .bd
            .ins()
            .iconst(ptr_type, slot.as_ptr().addr() as i64);
        let block_offset = ::util::offset_of!(Link, block) as i32;
        let addr_offset = ::util::offset_of!(Link, addr) as i32;

        let hook = self.compiler.hooks.follow_link as usize;
        let (info, ctx) = (self.consts.info_ptr, self.consts.ctx_ptr);
        let inst = self.call_hook(self.consts.signatures.follow_link, hook, &[info, ctx]);
        let should_follow = self.bd.inst_results(inst)[0];

        let follow_bb = self.bd.create_block();
        let need_link_bb = self.bd.create_block();
        let call_linked_bb = self.bd.create_block();
        let exit_bb = self.bd.create_block();
        self.bd.set_cold_block(exit_bb);
        self.bd.set_cold_block(need_link_bb);
        self.bd.append_block_param(call_linked_bb, ptr_type);

        self.bd
            .ins()
            .brif(should_follow, follow_bb, &[], exit_bb, &[]);
        self.bd.seal_block(follow_bb);

        // => follow: is the link already in place?
        self.switch_to_bb(follow_bb);
        let pc = self
            .bd
            .ins()
            .load(ir::types::I32, MEMFLAGS, self.consts.regs_ptr, Reg::Pc.offset() as i32);

        let linked = |this: &mut Self| {
            let block = this.bd.ins().load(ptr_type, MEMFLAGS, slot_ptr, block_offset);
            let addr = this
                .bd
                .ins()
                .load(ir::types::I32, MEMFLAGS, slot_ptr, addr_offset);

            let present = this.bd.ins().icmp_imm(IntCC::NotEqual, block, 0);
            let matches = this.bd.ins().icmp(IntCC::Equal, addr, pc);
            (block, this.bd.ins().band(present, matches))
        };

        let (block, ok) = linked(self);
        self.bd.ins().brif(
            ok,
            call_linked_bb,
            &[ir::BlockArg::Value(block)],
            need_link_bb,
            &[],
        );
        self.bd.seal_block(need_link_bb);

        // => need to link
        self.switch_to_bb(need_link_bb);
        let hook = self.compiler.hooks.try_link as usize;
        self.call_hook(self.consts.signatures.try_link, hook, &[ctx, pc, slot_ptr]);

        let (block, ok) = linked(self);
        self.bd.ins().brif(
            ok,
            call_linked_bb,
            &[ir::BlockArg::Value(block)],
            exit_bb,
            &[],
        );
        self.bd.seal_block(call_linked_bb);
        self.bd.seal_block(exit_bb);

        // => call linked
        self.switch_to_bb(call_linked_bb);
        let block = self.bd.block_params(call_linked_bb)[0];
        self.bd.ins().return_call_indirect(
            self.consts.signatures.block,
            block,
            &[info, ctx, self.consts.regs_ptr],
        );

        // => exit
        self.switch_to_bb(exit_bb);
        self.bd.ins().return_(&[]);
    }

    /// Executes an instruction through the interpreter.
    fn interpret(&mut self, ins: Ins) {
        let code = self.bd.ins().iconst(ir::types::I32, ins.code as i64);
        let hook = self.compiler.hooks.interpret as usize;
        let ctx = self.consts.ctx_ptr;
        let ok = self.call_with_state(self.consts.signatures.interpret, hook, &[ctx, code]);

        // the interpreter might have touched any register
        self.invalidate();
        self.exit_unless(ok);
    }

    /// Leaves the compiled path and lets the interpreter execute the instruction at `self.pc`
    /// together with its delay slot.
    fn step(&mut self) {
        let hook = self.compiler.hooks.step as usize;
        let ctx = self.consts.ctx_ptr;
        let retired = self.call_with_state(self.consts.signatures.step, hook, &[ctx]);
        self.invalidate();

        let retired = self.bd.ins().uextend(ir::types::I64, retired);
        self.exit_with_link_counting(Some(retired));
    }

    /// Emits a single instruction that is not a control transfer.
    fn emit(&mut self, ins: Ins) {
        use Opcode::*;

        let native = match ins.op {
            _ if ins.is_nop() => true,
            Sll | Srl | Sra | Sllv | Srlv | Srav | Dsllv | Dsrlv | Dsrav | Dsll | Dsrl | Dsra
            | Dsll32 | Dsrl32 | Dsra32 => {
                self.shift(ins);
                true
            }
            // signed arithmetic can raise an overflow exception
            Add | Sub | Dadd | Dsub | Addi | Daddi => {
                self.interpret(ins);
                false
            }
            Addu | Subu | And | Or | Xor | Nor | Slt | Sltu | Daddu | Dsubu => {
                self.register(ins);
                true
            }
            Addiu | Slti | Sltiu | Andi | Ori | Xori | Lui | Daddiu => {
                self.immediate(ins);
                true
            }
            Mult | Multu | Dmult | Dmultu => {
                self.multiply(ins);
                true
            }
            Mfhi | Mthi | Mflo | Mtlo => {
                self.hi_lo(ins);
                true
            }
            Sync | Cache => true,
            Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld => {
                self.load(ins);
                true
            }
            Sb | Sh | Sw | Sd => {
                self.store(ins);
                true
            }
            _ => {
                self.interpret(ins);
                false
            }
        };

        if native {
            self.native += 1;
        }

        self.state.retired += 1;
        self.state.pending += TICKS;
    }

    /// Builds the block out of `instructions`, stopping after the first control transfer.
    pub fn build(mut self, instructions: impl IntoIterator<Item = Ins>) -> Option<Built> {
        let mut seq = Vec::new();
        let mut instructions = instructions.into_iter();

        let finished = loop {
            let Some(ins) = instructions.next() else {
                break false;
            };

            seq.push(ins);
            self.bd.set_srcloc(ir::SourceLoc::new(seq.len() as u32));

            if ins.op.has_delay_slot() {
                let slot = instructions.next();
                seq.extend(slot);

                match slot {
                    Some(slot) if !ins.op.uses_cop1() => self.branch(ins, slot),
                    _ => self.step(),
                }

                break true;
            }

            if ins.op == Opcode::Eret {
                self.step();
                break true;
            }

            self.emit(ins);
            self.pc += 4u32;
        };

        if seq.is_empty() {
            return None;
        }

        if !finished {
            debug!(pc = ?self.pc, "block ends without a control transfer");
            self.store_pc(self.pc);
            self.exit_with_link();
        }

        self.bd.seal_all_blocks();
        self.bd.finalize();

        Some(Built {
            seq: Sequence(seq),
            native: self.native,
        })
    }
}
