use super::{BlockBuilder, TICKS};
use cranelift::{
    codegen::ir,
    prelude::{InstBuilder, IntCC},
};
use r4300::{Address, Ins, Opcode, Reg};
use tracing::{debug, warn};

impl BlockBuilder<'_> {
    /// Leaves the block through the idle hook if it skipped the idle loop at `self.pc`.
    fn idle_check(&mut self) {
        let hook = self.compiler.hooks.idle as usize;
        let ctx = self.consts.ctx_ptr;
        let skipped = self.call_with_state(self.consts.signatures.idle, hook, &[ctx]);

        let skip_bb = self.bd.create_block();
        let continue_bb = self.bd.create_block();
        self.bd.ins().brif(skipped, skip_bb, &[], continue_bb, &[]);
        self.bd.seal_block(skip_bb);
        self.bd.seal_block(continue_bb);

        self.switch_to_bb(skip_bb);
        let saved = self.state.clone();
        self.exit_with_link();
        self.state = saved;

        self.switch_to_bb(continue_bb);
    }

    /// Compiles the delay slot of the branch at `pc`. Control transfers in a delay slot are
    /// ignored.
    fn delay_slot(&mut self, pc: Address, slot: Ins) {
        self.state.retired += 1;
        self.state.pending += TICKS;

        self.pc = pc + 4u32;
        self.in_slot = true;

        if slot.op.has_delay_slot() || slot.op == Opcode::Eret {
            debug!(?pc, "ignoring control transfer in delay slot");
            self.state.retired += 1;
            self.state.pending += TICKS;
        } else {
            self.emit(slot);
        }

        self.in_slot = false;
    }

    /// Finishes the control transfer of the branch at `pc` once its delay slot completed and
    /// leaves the block.
    fn finish_transfer(&mut self, pc: Address, target: ir::Value, link: Option<u8>) {
        if let Some(link) = link {
            let ret = self.ir_value(::util::sext32((pc + 8u32).value()));
            self.set_gpr(link, ret);
        }

        self.store_reg(Reg::Pc, target);
        self.process_events();
        self.exit_with_link();
    }

    fn conditional(&mut self, ins: Ins, slot: Ins) {
        use Opcode::*;

        let pc = self.pc;
        let rs = self.get_gpr(ins.rs());
        let rt = self.get_gpr(ins.rt());

        let taken = match ins.op {
            Beq | Beql => self.bd.ins().icmp(IntCC::Equal, rs, rt),
            Bne | Bnel => self.bd.ins().icmp(IntCC::NotEqual, rs, rt),
            Blez | Blezl => self
                .bd
                .ins()
                .icmp_imm(IntCC::SignedLessThanOrEqual, rs, 0),
            Bgtz | Bgtzl => self.bd.ins().icmp_imm(IntCC::SignedGreaterThan, rs, 0),
            Bltz | Bltzl | Bltzal | Bltzall => {
                self.bd.ins().icmp_imm(IntCC::SignedLessThan, rs, 0)
            }
            Bgez | Bgezl | Bgezal | Bgezall => self
                .bd
                .ins()
                .icmp_imm(IntCC::SignedGreaterThanOrEqual, rs, 0),
            _ => unreachable!("{:?} is not compiled natively", ins.op),
        };

        if ins.op.is_link() {
            if ins.rs() == 31 {
                warn!(?pc, op = ?ins.op, "branch and link comparing ra");
            }

            let ret = self.ir_value(::util::sext32((pc + 8u32).value()));
            self.set_gpr(31, ret);
        }

        let target = ins.branch_target(pc);
        let idle = ins.branches_to_self(pc) && slot.is_nop();

        if ins.op.is_likely() {
            let taken_bb = self.bd.create_block();
            let skip_bb = self.bd.create_block();
            self.bd.ins().brif(taken, taken_bb, &[], skip_bb, &[]);
            self.bd.seal_block(taken_bb);
            self.bd.seal_block(skip_bb);

            // => not taken, the delay slot is skipped
            self.switch_to_bb(skip_bb);
            let saved = self.state.clone();
            self.state.retired += 1;
            self.state.pending += 2 * TICKS;
            self.store_pc(pc + 8u32);
            self.process_events();
            self.exit_with_link();
            self.state = saved;

            // => taken
            self.switch_to_bb(taken_bb);
            if idle {
                self.flush();
                self.sync_clock();
                self.idle_check();
            }

            self.delay_slot(pc, slot);
            let target = self.ir_value(target.value());
            self.finish_transfer(pc, target, None);
        } else {
            if idle {
                self.flush();
                self.sync_clock();

                let idle_bb = self.bd.create_block();
                let continue_bb = self.bd.create_block();
                self.bd.ins().brif(taken, idle_bb, &[], continue_bb, &[]);
                self.bd.seal_block(idle_bb);

                self.switch_to_bb(idle_bb);
                self.idle_check();
                self.bd.ins().jump(continue_bb, &[]);
                self.bd.seal_block(continue_bb);

                self.switch_to_bb(continue_bb);
            }

            self.delay_slot(pc, slot);
            let target = self.ir_value(target.value());
            let next = self.ir_value((pc + 8u32).value());
            let new_pc = self.bd.ins().select(taken, target, next);
            self.finish_transfer(pc, new_pc, None);
        }
    }

    fn jump(&mut self, ins: Ins, slot: Ins) {
        use Opcode::*;

        let pc = self.pc;
        let (target, link) = match ins.op {
            J => (self.ir_value(ins.jump_target(pc).value()), None),
            Jal => (self.ir_value(ins.jump_target(pc).value()), Some(31)),
            Jr | Jalr => {
                let rs = self.get_gpr(ins.rs());
                let link = (ins.op == Jalr).then_some(ins.rd());
                (self.low32(rs), link)
            }
            _ => unreachable!("{:?} is not a jump", ins.op),
        };

        if ins.branches_to_self(pc) && slot.is_nop() {
            self.flush();
            self.sync_clock();
            self.idle_check();
        }

        self.delay_slot(pc, slot);
        self.finish_transfer(pc, target, link);
    }

    /// Compiles a branch or jump together with its delay slot. Always leaves the block.
    pub fn branch(&mut self, ins: Ins, slot: Ins) {
        if ins.op.is_jump() {
            self.jump(ins, slot);
        } else {
            self.conditional(ins, slot);
        }
    }
}
