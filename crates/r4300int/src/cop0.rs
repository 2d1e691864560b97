use crate::{Flow, gpr};
use cobalt::system::System;
use r4300::{Ins, Opcode};
use util::sext32;

pub fn execute(sys: &mut System, ins: Ins) -> Flow {
    match ins.op {
        Opcode::Mfc0 => {
            let value = sys.mfc0(ins.rd() as usize);
            sys.cpu.set_gpr(ins.rt(), sext32(value));
        }
        Opcode::Mtc0 => sys.mtc0(ins.rd() as usize, gpr(sys, ins.rt()) as u32),
        Opcode::Tlbr => sys.tlbr(),
        Opcode::Tlbwi => sys.tlbwi(),
        Opcode::Tlbwr => sys.tlbwr(),
        Opcode::Tlbp => sys.tlbp(),
        Opcode::Eret => {
            return match sys.eret() {
                Some(target) => {
                    sys.cpu.pc = target;
                    Flow::Return
                }
                None => Flow::Halt,
            };
        }
        _ => unreachable!("{:?} is not a cop0 instruction", ins.op),
    }

    if sys.stopped { Flow::Halt } else { Flow::Next }
}

#[cfg(test)]
mod test {
    use crate::test::*;
    use r4300::{Address, cop0::reg};

    fn mtc0(rt: u32, rd: u32) -> u32 {
        (0x10 << 26) | (0x04 << 21) | (rt << 16) | (rd << 11)
    }

    fn mfc0(rt: u32, rd: u32) -> u32 {
        (0x10 << 26) | (rt << 16) | (rd << 11)
    }

    const ERET: u32 = 0x4200_0018;

    #[test]
    fn moves_and_eret() {
        let mut sys = system(&[mtc0(1, reg::EPC as u32), mfc0(2, reg::EPC as u32), ERET]);
        sys.cpu.gpr[1] = 0x8000_2000;
        sys.cpu.cop0.regs[reg::STATUS] = 0x2;
        sys.cpu.llbit = 1;

        crate::step(&mut sys);
        crate::step(&mut sys);
        assert_eq!(sys.cpu.gpr[2], 0xFFFF_FFFF_8000_2000);

        let step = crate::step(&mut sys);
        assert!(step.transfer);
        assert_eq!(sys.cpu.pc, Address(0x8000_2000));
        assert_eq!(sys.cpu.llbit, 0);
        assert!(!sys.cpu.cop0.status().exception_level());

        // eret is not counted
        assert_eq!(sys.scheduler.elapsed(), 4);
    }

    #[test]
    fn reading_random_halts() {
        let mut sys = system(&[mfc0(2, reg::RANDOM as u32)]);
        crate::step(&mut sys);
        assert!(sys.stopped);
    }

    #[test]
    fn enabling_interrupts_takes_pending_one_at_next_transfer() {
        let mut sys = system(&[mtc0(1, reg::STATUS as u32), NOP, beq(0, 0, 1), NOP]);
        sys.cpu.gpr[1] = 0x0000_0401;
        sys.cpu.cop0.raise_pending(r4300::cop0::IP_RCP);

        crate::step(&mut sys);
        crate::step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(BASE + 8));

        crate::step(&mut sys);
        assert_eq!(sys.cpu.pc, Address(0x8000_0180));
        assert_eq!(sys.cpu.cop0.regs[reg::EPC], BASE + 16);
    }
}
