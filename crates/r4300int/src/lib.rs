//! Semantics of the VR4300 instruction set.
//!
//! [`execute`] runs a single instruction. [`step_with`] runs an instruction together with its
//! delay slot, advancing the virtual clock and processing due events whenever control leaves the
//! sequential path. Every execution mode goes through these functions, so they all agree on the
//! guest instruction at which an interrupt is taken.
mod alu;
mod branch;
mod cop0;
mod fpu;
mod memory;

use cobalt::system::System;
use r4300::{Address, Ins, Opcode, cop0::Exception};
use tracing::{debug, error, trace};

/// Count ticks per executed instruction.
pub const TICKS_PER_INSTRUCTION: u64 = 2;

/// Effect of an instruction on control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Execution continues sequentially.
    Next,
    /// A conditional branch. The delay slot executes, then execution continues at the target if
    /// the branch was taken.
    Branch(Option<Address>),
    /// A likely branch that was not taken: the delay slot is skipped.
    SkipSlot,
    /// An unconditional jump. The delay slot executes, then `link`, if any, receives the return
    /// address.
    Jump { target: Address, link: Option<u8> },
    /// Control moved to `cpu.pc` without a delay slot (`eret`).
    Return,
    /// An exception was raised and `cpu.pc` points at its handler.
    Exception,
    /// A fatal condition stopped the session.
    Halt,
}

/// Outcome of [`step_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Instructions retired, delay slots included.
    pub retired: u32,
    /// Whether control left the sequential path. If so, due events have been processed and
    /// `cpu.pc` holds the address to continue at.
    pub transfer: bool,
}

impl Step {
    const SEQUENTIAL: Self = Self {
        retired: 1,
        transfer: false,
    };

    fn transfer(retired: u32) -> Self {
        Self {
            retired,
            transfer: true,
        }
    }
}

#[inline(always)]
pub(crate) fn gpr(sys: &System, index: u8) -> u64 {
    sys.cpu.gpr[index as usize]
}

#[cold]
fn not_implemented(sys: &mut System, ins: Ins) -> Flow {
    error!(pc = ?sys.cpu.pc, code = format_args!("0x{:08X}", ins.code), "unimplemented instruction");
    sys.request_stop();
    Flow::Halt
}

/// Executes `ins`, located at `sys.cpu.pc`. Advances neither the clock nor the program counter,
/// unless an exception is raised.
pub fn execute(sys: &mut System, ins: Ins) -> Flow {
    use Opcode::*;

    if ins.op.uses_cop1() && !sys.cpu.cop0.status().cop1_usable() {
        sys.raise_coprocessor_unusable(1);
        return Flow::Exception;
    }

    match ins.op {
        Sll | Srl | Sra | Sllv | Srlv | Srav | Dsllv | Dsrlv | Dsrav | Dsll | Dsrl | Dsra
        | Dsll32 | Dsrl32 | Dsra32 => alu::shift(sys, ins),
        Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Dadd | Daddu | Dsub
        | Dsubu => alu::register(sys, ins),
        Addi | Addiu | Slti | Sltiu | Andi | Ori | Xori | Lui | Daddi | Daddiu => {
            alu::immediate(sys, ins)
        }
        Mult | Multu | Div | Divu | Dmult | Dmultu | Ddiv | Ddivu => {
            alu::multiply_divide(sys, ins)
        }
        Mfhi | Mthi | Mflo | Mtlo => alu::hi_lo(sys, ins),
        Teq => alu::teq(sys, ins),
        Syscall => {
            sys.raise_exception(Exception::Syscall);
            Flow::Exception
        }
        Break => {
            sys.raise_exception(Exception::Breakpoint);
            Flow::Exception
        }
        Sync | Cache => Flow::Next,
        J | Jal | Jr | Jalr => branch::jump(sys, ins),
        Mfc0 | Mtc0 | Tlbr | Tlbwi | Tlbwr | Tlbp | Eret => cop0::execute(sys, ins),
        Mfc1 | Dmfc1 | Cfc1 | Mtc1 | Dmtc1 | Ctc1 => fpu::transfer(sys, ins),
        op if op.is_conditional_branch() => branch::conditional(sys, ins),
        op if op.is_load() => memory::load(sys, ins),
        op if op.is_store() => memory::store(sys, ins),
        op if op.is_float_compare() => fpu::compare(sys, ins),
        op if op.is_float_arith() => fpu::arith(sys, ins),
        _ => not_implemented(sys, ins),
    }
}

/// How many ticks an idle loop at `pc` can skip, if any. An idle loop is a taken branch to itself
/// with a no-op in its delay slot.
pub fn idle_skip(sys: &System, pc: Address) -> Option<u64> {
    if sys.read_pure::<u32>(pc + 4u32) != Some(0) {
        return None;
    }

    let skip = sys.scheduler.until_next()?;
    (skip > 3).then_some(skip & !3)
}

fn delay_slot<F>(
    sys: &mut System,
    ins: Ins,
    target: Option<Address>,
    link: Option<u8>,
    slot: F,
) -> Step
where
    F: FnOnce(&mut System) -> Option<Ins>,
{
    let pc = sys.cpu.pc;
    if target.is_some()
        && ins.branches_to_self(pc)
        && let Some(skip) = idle_skip(sys, pc)
    {
        trace!(?pc, skip, "skipping idle loop");
        sys.advance(skip);
        sys.process_events();
        return Step::transfer(0);
    }

    sys.advance(TICKS_PER_INSTRUCTION);
    sys.cpu.pc = pc + 4u32;
    sys.cpu.delay_slot = true;

    let flow = match slot(sys) {
        Some(slot) if slot.op.has_delay_slot() || slot.op == Opcode::Eret => {
            debug!(?pc, "ignoring control transfer in delay slot");
            Flow::Next
        }
        Some(slot) => execute(sys, slot),
        None => Flow::Exception,
    };
    sys.cpu.delay_slot = false;

    let retired = match flow {
        Flow::Halt => return Step::transfer(1),
        // the branch is cancelled
        Flow::Exception => 1,
        _ => {
            sys.advance(TICKS_PER_INSTRUCTION);
            if let Some(link) = link {
                sys.cpu.set_gpr(link, util::sext32((pc + 8u32).value()));
            }

            sys.cpu.pc = target.unwrap_or(pc + 8u32);
            2
        }
    };

    sys.process_events();
    Step::transfer(retired)
}

/// Executes `ins`, located at `sys.cpu.pc`, and its delay slot if it has one. `slot` provides the
/// delay slot instruction, located at `sys.cpu.pc` when it is called, and returns `None` if
/// fetching it raised an exception.
///
/// The clock advances by [`TICKS_PER_INSTRUCTION`] for every instruction that completes.
pub fn step_with<F>(sys: &mut System, ins: Ins, slot: F) -> Step
where
    F: FnOnce(&mut System) -> Option<Ins>,
{
    let pc = sys.cpu.pc;
    let shim = std::mem::take(&mut sys.legacy_beq_shim);

    let mut flow = execute(sys, ins);
    if shim && ins.op == Opcode::Beq && matches!(flow, Flow::Branch(Some(_))) {
        debug!(?pc, "legacy snapshot: ignoring branch");
        flow = Flow::Branch(None);
    }

    match flow {
        Flow::Next => {
            sys.advance(TICKS_PER_INSTRUCTION);
            sys.cpu.pc = pc + 4u32;
            Step::SEQUENTIAL
        }
        Flow::Branch(target) => delay_slot(sys, ins, target, None, slot),
        Flow::Jump { target, link } => delay_slot(sys, ins, Some(target), link, slot),
        Flow::SkipSlot => {
            sys.advance(2 * TICKS_PER_INSTRUCTION);
            sys.cpu.pc = pc + 8u32;
            sys.process_events();
            Step::transfer(1)
        }
        Flow::Return => {
            sys.process_events();
            Step::transfer(1)
        }
        Flow::Exception => {
            sys.process_events();
            Step::transfer(0)
        }
        Flow::Halt => Step::transfer(0),
    }
}

/// Fetches and executes the instruction at `sys.cpu.pc`, together with its delay slot.
pub fn step(sys: &mut System) -> Step {
    let Some(code) = sys.fetch(sys.cpu.pc) else {
        sys.process_events();
        return Step::transfer(0);
    };

    step_with(sys, Ins::new(code), |sys| sys.fetch(sys.cpu.pc).map(Ins::new))
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use cobalt::system::{Config, exception::GENERAL_VECTOR, scheduler::Event};
    use r4300::cop0::reg;

    pub const BASE: u32 = 0x8000_1000;

    pub fn system(program: &[u32]) -> System {
        let mut sys = System::new(Config::default());
        load(&mut sys, BASE, program);
        sys.cpu.pc = Address(BASE);
        sys
    }

    pub fn load(sys: &mut System, addr: u32, program: &[u32]) {
        let offset = (addr & 0x1FFF_FFFF) as usize;
        for (i, word) in program.iter().enumerate() {
            let start = offset + 4 * i;
            sys.bus.mem.rdram[start..start + 4].copy_from_slice(&word.to_be_bytes());
        }
    }

    pub fn immediate(primary: u32, rs: u32, rt: u32, imm: u16) -> u32 {
        (primary << 26) | (rs << 21) | (rt << 16) | imm as u32
    }

    pub fn special(funct: u32, rs: u32, rt: u32, rd: u32, sa: u32) -> u32 {
        (rs << 21) | (rt << 16) | (rd << 11) | (sa << 6) | funct
    }

    pub fn addiu(rt: u32, rs: u32, imm: i16) -> u32 {
        immediate(0x09, rs, rt, imm as u16)
    }

    pub fn beq(rs: u32, rt: u32, offset: i16) -> u32 {
        immediate(0x04, rs, rt, offset as u16)
    }

    pub fn beql(rs: u32, rt: u32, offset: i16) -> u32 {
        immediate(0x14, rs, rt, offset as u16)
    }

    pub fn jal(target: u32) -> u32 {
        (0x03 << 26) | ((target >> 2) & 0x03FF_FFFF)
    }

    pub fn lw(rt: u32, base: u32, offset: i16) -> u32 {
        immediate(0x23, base, rt, offset as u16)
    }

    pub const NOP: u32 = 0;

    #[test]
    fn beq_runs_delay_slot_once() {
        let mut sys = system(&[beq(1, 2, 2), addiu(3, 3, 1), NOP, NOP]);
        sys.cpu.gpr[1] = 5;
        sys.cpu.gpr[2] = 5;

        let step = step(&mut sys);
        assert_eq!(step, Step::transfer(2));
        assert_eq!(sys.cpu.pc, Address(BASE + 12));
        assert_eq!(sys.cpu.gpr[1], 5);
        assert_eq!(sys.cpu.gpr[2], 5);
        assert_eq!(sys.cpu.gpr[3], 1);
        assert_eq!(sys.scheduler.elapsed(), 4);
        assert!(!sys.cpu.delay_slot);
    }

    #[test]
    fn untaken_likely_branch_skips_slot() {
        let mut sys = system(&[beql(1, 2, 2), addiu(3, 3, 1), NOP]);
        sys.cpu.gpr[1] = 1;

        assert_eq!(step(&mut sys), Step::transfer(1));
        assert_eq!(sys.cpu.pc, Address(BASE + 8));
        assert_eq!(sys.cpu.gpr[3], 0);
        assert_eq!(sys.cpu.cop0.count(), 4);
    }

    #[test]
    fn jal_links_after_slot() {
        // the delay slot reads ra before it is written
        let target = 0x8000_2000;
        let mut sys = system(&[jal(target), special(0x21, 31, 0, 4, 0)]);
        sys.cpu.gpr[31] = 0x1234;

        step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(target));
        assert_eq!(sys.cpu.gpr[4], 0x1234);
        assert_eq!(sys.cpu.gpr[31], util::sext32(BASE + 8));
    }

    #[test]
    fn faulting_slot_cancels_branch() {
        // lw from an unmapped address in the delay slot of a jal
        let mut sys = system(&[jal(0x8000_2000), lw(4, 5, 0)]);
        sys.cpu.gpr[5] = 0x0100_0000;

        step(&mut sys);
        let cop0 = &sys.cpu.cop0;
        assert_eq!(sys.cpu.pc, Address(0x8000_0000));
        assert_eq!(cop0.regs[reg::EPC], BASE);
        assert!(cop0.cause().branch_delay());
        assert_eq!(sys.cpu.gpr[31], 0);
        assert_eq!(sys.scheduler.elapsed(), 2);
    }

    #[test]
    fn idle_loop_skips_to_next_event() {
        let mut sys = system(&[beq(0, 0, -1), NOP]);
        sys.scheduler.clear();
        sys.scheduler.schedule(Event::Pi, 103);

        assert_eq!(step(&mut sys), Step::transfer(0));
        assert_eq!(sys.cpu.pc, Address(BASE));
        assert_eq!(sys.scheduler.elapsed(), 100);

        // too close to the event: the loop runs normally and the event fires
        step(&mut sys);
        assert_eq!(sys.scheduler.elapsed(), 104);
        assert!(sys.scheduler.is_empty());
        assert_ne!(sys.bus.regs.mi[0x2], 0);
    }

    #[test]
    fn interrupts_are_taken_at_branches() {
        let mut sys = system(&[addiu(1, 0, 1), beq(0, 0, 4), NOP]);
        sys.cpu.cop0.regs[reg::STATUS] = 0x0000_8001;
        sys.cpu.cop0.regs[reg::COMPARE] = 2;
        sys.schedule_compare();

        // the compare event is due after the first instruction, but only checked at the branch
        assert_eq!(step(&mut sys), Step::SEQUENTIAL);
        assert_eq!(sys.cpu.pc, Address(BASE + 4));

        step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(GENERAL_VECTOR));
        assert_eq!(sys.cpu.cop0.regs[reg::EPC], BASE + 24);
    }

    #[test]
    fn legacy_shim_ignores_one_beq() {
        let mut sys = system(&[beq(0, 0, 4), NOP, beq(0, 0, 4), NOP]);
        sys.legacy_beq_shim = true;

        step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(BASE + 8));
        assert!(!sys.legacy_beq_shim);

        step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(BASE + 28));
    }

    #[test]
    fn illegal_instruction_halts() {
        let mut sys = system(&[0xFC00_0000]);
        step(&mut sys);
        assert!(sys.stopped);
        assert_eq!(sys.cpu.pc, Address(BASE));
    }
}
