use crate::{Flow, gpr};
use cobalt::system::System;
use r4300::{Address, Ins, Opcode};
use tracing::error;
use util::sext32;

/// Conditional branches. The `al` forms of `regimm` link unconditionally, before the delay slot
/// executes.
pub fn conditional(sys: &mut System, ins: Ins) -> Flow {
    use Opcode::*;

    let pc = sys.cpu.pc;
    let rs = gpr(sys, ins.rs());
    let rt = gpr(sys, ins.rt());

    let taken = match ins.op {
        Beq | Beql => rs == rt,
        Bne | Bnel => rs != rt,
        Blez | Blezl => (rs as i64) <= 0,
        Bgtz | Bgtzl => (rs as i64) > 0,
        Bltz | Bltzl | Bltzal | Bltzall => (rs as i64) < 0,
        Bgez | Bgezl | Bgezal | Bgezall => (rs as i64) >= 0,
        Bc1f | Bc1fl => !sys.cpu.cop1.condition(),
        Bc1t | Bc1tl => sys.cpu.cop1.condition(),
        _ => unreachable!("{:?} is not a conditional branch", ins.op),
    };

    if ins.op.is_link() {
        if ins.rs() == 31 {
            error!(?pc, op = ?ins.op, "branch and link comparing ra");
        }

        sys.cpu.set_gpr(31, sext32((pc + 8u32).value()));
    }

    if taken {
        Flow::Branch(Some(ins.branch_target(pc)))
    } else if ins.op.is_likely() {
        Flow::SkipSlot
    } else {
        Flow::Branch(None)
    }
}

/// Unconditional jumps. The return address is written once the delay slot completes.
pub fn jump(sys: &mut System, ins: Ins) -> Flow {
    let pc = sys.cpu.pc;
    let (target, link) = match ins.op {
        Opcode::J => (ins.jump_target(pc), None),
        Opcode::Jal => (ins.jump_target(pc), Some(31)),
        Opcode::Jr => (Address(gpr(sys, ins.rs()) as u32), None),
        Opcode::Jalr => (Address(gpr(sys, ins.rs()) as u32), Some(ins.rd())),
        _ => unreachable!("{:?} is not a jump", ins.op),
    };

    Flow::Jump { target, link }
}

#[cfg(test)]
mod test {
    use crate::{Step, test::*};
    use r4300::Address;

    fn bltzal(rs: u32, offset: i16) -> u32 {
        immediate(0x01, rs, 0x10, offset as u16)
    }

    fn bc1t(offset: i16) -> u32 {
        immediate(0x11, 0x08, 0x01, offset as u16)
    }

    #[test]
    fn regimm_link_happens_even_when_not_taken() {
        let mut sys = system(&[bltzal(1, 8), NOP]);
        sys.cpu.gpr[1] = 1;

        crate::step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(BASE + 8));
        assert_eq!(sys.cpu.gpr[31], util::sext32(BASE + 8));
    }

    #[test]
    fn jalr_reads_target_before_delay_slot() {
        // jalr r2, r1 ; addiu r1, r1, 4
        let mut sys = system(&[special(0x09, 1, 0, 2, 0), addiu(1, 1, 4)]);
        sys.cpu.gpr[1] = 0xFFFF_FFFF_8000_3000;

        let step = crate::step(&mut sys);
        assert_eq!(step, Step { retired: 2, transfer: true });
        assert_eq!(sys.cpu.pc, Address(0x8000_3000));
        assert_eq!(sys.cpu.gpr[2], util::sext32(BASE + 8));
        assert_eq!(sys.cpu.gpr[1], 0xFFFF_FFFF_8000_3004);
    }

    #[test]
    fn cop1_branches_need_cop1() {
        let mut sys = system(&[bc1t(4), NOP]);
        crate::step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(0x8000_0180));
        assert_eq!(sys.cpu.cop0.cause().coprocessor().value(), 1);

        let mut sys = system(&[bc1t(4), NOP]);
        sys.cpu.cop0.regs[r4300::cop0::reg::STATUS] = 0x2000_0000;
        sys.cpu.cop1.set_condition(true);
        crate::step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(BASE + 20));
    }

    #[test]
    fn branch_in_delay_slot_is_ignored() {
        let mut sys = system(&[beq(0, 0, 3), beq(0, 0, 7), NOP, NOP]);
        crate::step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(BASE + 16));
    }
}
