use crate::{Flow, gpr};
use cobalt::system::System;
use r4300::{Ins, Opcode, cop0::Exception};
use tracing::{error, trace};
use util::sext32;

pub fn shift(sys: &mut System, ins: Ins) -> Flow {
    use Opcode::*;

    let rt = gpr(sys, ins.rt());
    let sa = ins.sa() as u32;
    let variable = gpr(sys, ins.rs()) as u32;

    let value = match ins.op {
        Sll => sext32((rt as u32) << sa),
        Srl => sext32((rt as u32) >> sa),
        Sra => ((rt as u32 as i32) >> sa) as i64 as u64,
        Sllv => sext32((rt as u32) << (variable & 0x1F)),
        Srlv => sext32((rt as u32) >> (variable & 0x1F)),
        Srav => ((rt as u32 as i32) >> (variable & 0x1F)) as i64 as u64,
        Dsllv => rt << (variable & 0x3F),
        Dsrlv => rt >> (variable & 0x3F),
        Dsrav => ((rt as i64) >> (variable & 0x3F)) as u64,
        Dsll => rt << sa,
        Dsrl => rt >> sa,
        Dsra => ((rt as i64) >> sa) as u64,
        Dsll32 => rt << (sa + 32),
        Dsrl32 => rt >> (sa + 32),
        Dsra32 => ((rt as i64) >> (sa + 32)) as u64,
        _ => unreachable!("{:?} is not a shift", ins.op),
    };

    sys.cpu.set_gpr(ins.rd(), value);
    Flow::Next
}

/// Raises an overflow exception for a signed operation whose result did not fit. The
/// destination register keeps its value.
fn overflow(sys: &mut System, ins: Ins) -> Flow {
    trace!(pc = ?sys.cpu.pc, op = ?ins.op, "integer overflow");
    sys.raise_exception(Exception::Overflow);
    Flow::Exception
}

/// Register-register arithmetic and logic. `add`, `sub`, `dadd` and `dsub` raise an overflow
/// exception instead of wrapping.
pub fn register(sys: &mut System, ins: Ins) -> Flow {
    use Opcode::*;

    let rs = gpr(sys, ins.rs());
    let rt = gpr(sys, ins.rt());

    let checked = match ins.op {
        Add => (rs as i32).checked_add(rt as i32).map(|v| sext32(v as u32)),
        Sub => (rs as i32).checked_sub(rt as i32).map(|v| sext32(v as u32)),
        Dadd => (rs as i64).checked_add(rt as i64).map(|v| v as u64),
        Dsub => (rs as i64).checked_sub(rt as i64).map(|v| v as u64),
        _ => Some(0),
    };

    let Some(checked) = checked else {
        return overflow(sys, ins);
    };

    let value = match ins.op {
        Add | Sub | Dadd | Dsub => checked,
        Addu => sext32((rs as u32).wrapping_add(rt as u32)),
        Subu => sext32((rs as u32).wrapping_sub(rt as u32)),
        Daddu => rs.wrapping_add(rt),
        Dsubu => rs.wrapping_sub(rt),
        And => rs & rt,
        Or => rs | rt,
        Xor => rs ^ rt,
        Nor => !(rs | rt),
        Slt => ((rs as i64) < (rt as i64)) as u64,
        Sltu => (rs < rt) as u64,
        _ => unreachable!("{:?} is not a register operation", ins.op),
    };

    sys.cpu.set_gpr(ins.rd(), value);
    Flow::Next
}

pub fn immediate(sys: &mut System, ins: Ins) -> Flow {
    use Opcode::*;

    let rs = gpr(sys, ins.rs());
    let simm = ins.simm64();
    let imm = ins.imm() as u64;

    let value = match ins.op {
        Addi => match (rs as i32).checked_add(simm as i32) {
            Some(v) => sext32(v as u32),
            None => return overflow(sys, ins),
        },
        Daddi => match (rs as i64).checked_add(simm as i64) {
            Some(v) => v as u64,
            None => return overflow(sys, ins),
        },
        Addiu => sext32((rs as u32).wrapping_add(simm as u32)),
        Daddiu => rs.wrapping_add(simm),
        Slti => ((rs as i64) < (simm as i64)) as u64,
        Sltiu => (rs < simm) as u64,
        Andi => rs & imm,
        Ori => rs | imm,
        Xori => rs ^ imm,
        Lui => sext32((imm as u32) << 16),
        _ => unreachable!("{:?} is not an immediate operation", ins.op),
    };

    sys.cpu.set_gpr(ins.rt(), value);
    Flow::Next
}

/// Multiplications and divisions. A division by zero leaves `hi` and `lo` untouched.
pub fn multiply_divide(sys: &mut System, ins: Ins) -> Flow {
    use Opcode::*;

    let rs = gpr(sys, ins.rs());
    let rt = gpr(sys, ins.rt());

    let (lo, hi) = match ins.op {
        Mult => {
            let product = (rs as i32 as i64).wrapping_mul(rt as i32 as i64) as u64;
            (sext32(product as u32), sext32((product >> 32) as u32))
        }
        Multu => {
            let product = (rs as u32 as u64) * (rt as u32 as u64);
            (sext32(product as u32), sext32((product >> 32) as u32))
        }
        Dmult => {
            let product = (rs as i64 as i128).wrapping_mul(rt as i64 as i128) as u128;
            (product as u64, (product >> 64) as u64)
        }
        Dmultu => {
            let product = (rs as u128) * (rt as u128);
            (product as u64, (product >> 64) as u64)
        }
        Div | Divu | Ddiv | Ddivu if divisor_is_zero(ins.op, rt) => {
            error!(pc = ?sys.cpu.pc, op = ?ins.op, "division by zero");
            return Flow::Next;
        }
        Div => {
            let (rs, rt) = (rs as i32, rt as i32);
            (
                sext32(rs.wrapping_div(rt) as u32),
                sext32(rs.wrapping_rem(rt) as u32),
            )
        }
        Divu => {
            let (rs, rt) = (rs as u32, rt as u32);
            (sext32(rs / rt), sext32(rs % rt))
        }
        Ddiv => {
            let (rs, rt) = (rs as i64, rt as i64);
            (rs.wrapping_div(rt) as u64, rs.wrapping_rem(rt) as u64)
        }
        Ddivu => (rs / rt, rs % rt),
        _ => unreachable!("{:?} is not a multiplication or division", ins.op),
    };

    sys.cpu.lo = lo;
    sys.cpu.hi = hi;
    Flow::Next
}

fn divisor_is_zero(op: Opcode, rt: u64) -> bool {
    match op {
        Opcode::Div | Opcode::Divu => rt as u32 == 0,
        _ => rt == 0,
    }
}

pub fn hi_lo(sys: &mut System, ins: Ins) -> Flow {
    match ins.op {
        Opcode::Mfhi => sys.cpu.set_gpr(ins.rd(), sys.cpu.hi),
        Opcode::Mflo => sys.cpu.set_gpr(ins.rd(), sys.cpu.lo),
        Opcode::Mthi => sys.cpu.hi = gpr(sys, ins.rs()),
        Opcode::Mtlo => sys.cpu.lo = gpr(sys, ins.rs()),
        _ => unreachable!("{:?} does not access hi or lo", ins.op),
    }

    Flow::Next
}

pub fn teq(sys: &mut System, ins: Ins) -> Flow {
    if gpr(sys, ins.rs()) != gpr(sys, ins.rt()) {
        return Flow::Next;
    }

    trace!(pc = ?sys.cpu.pc, "trap in teq");
    sys.raise_exception(Exception::Trap);
    Flow::Exception
}

#[cfg(test)]
mod test {
    use crate::test::*;
    use cobalt::system::exception::GENERAL_VECTOR;
    use r4300::{
        Address,
        cop0::{Exception, reg},
    };

    fn run(program: &[u32], setup: impl FnOnce(&mut [u64; 32])) -> cobalt::system::System {
        let mut sys = system(program);
        setup(&mut sys.cpu.gpr);
        for _ in program {
            crate::step(&mut sys);
        }

        sys
    }

    #[test]
    fn word_results_are_sign_extended() {
        let sys = run(
            &[
                addiu(3, 1, 1),
                special(0x21, 1, 2, 4, 0), // addu
                special(0x00, 0, 1, 5, 4), // sll
                immediate(0x0F, 0, 6, 0x8000), // lui
                special(0x03, 0, 7, 8, 4), // sra
            ],
            |gpr| {
                gpr[1] = 0x7FFF_FFFF;
                gpr[2] = 1;
                gpr[7] = 0xFFFF_FFFF_8000_0000;
            },
        );

        assert_eq!(sys.cpu.gpr[3], 0xFFFF_FFFF_8000_0000);
        assert_eq!(sys.cpu.gpr[4], 0xFFFF_FFFF_8000_0000);
        assert_eq!(sys.cpu.gpr[5], 0xFFFF_FFFF_FFFF_FFF0);
        assert_eq!(sys.cpu.gpr[6], 0xFFFF_FFFF_8000_0000);
        assert_eq!(sys.cpu.gpr[8], 0xFFFF_FFFF_F800_0000);
    }

    #[test]
    fn doubleword_shifts_and_compares() {
        let sys = run(
            &[
                special(0x3C, 0, 1, 2, 0),  // dsll32
                special(0x3F, 0, 2, 3, 4),  // dsra32
                special(0x2A, 3, 0, 4, 0),  // slt
                special(0x2B, 0, 3, 5, 0),  // sltu
                immediate(0x0B, 3, 6, 1),   // sltiu
                special(0x27, 0, 0, 7, 0),  // nor
                special(0x2D, 1, 1, 0, 0),  // daddu into r0
            ],
            |gpr| gpr[1] = 0x8000_0001,
        );

        assert_eq!(sys.cpu.gpr[2], 0x8000_0001_0000_0000);
        assert_eq!(sys.cpu.gpr[3], 0xFFFF_FFFF_F800_0000);
        assert_eq!(sys.cpu.gpr[4], 1);
        assert_eq!(sys.cpu.gpr[5], 1);
        assert_eq!(sys.cpu.gpr[6], 0);
        assert_eq!(sys.cpu.gpr[7], u64::MAX);
        assert_eq!(sys.cpu.gpr[0], 0);
    }

    #[test]
    fn multiply_and_divide() {
        let mut sys = run(
            &[special(0x18, 1, 2, 0, 0)], // mult
            |gpr| {
                gpr[1] = (-3i64) as u64;
                gpr[2] = 0x4000_0000;
            },
        );

        assert_eq!(sys.cpu.lo, 0x4000_0000);
        assert_eq!(sys.cpu.hi, 0xFFFF_FFFF_FFFF_FFFF);

        // div by zero leaves hi/lo alone
        load(&mut sys, BASE + 4, &[special(0x1A, 1, 0, 0, 0), special(0x1F, 1, 2, 0, 0)]);
        crate::step(&mut sys);
        assert_eq!(sys.cpu.lo, 0x4000_0000);
        assert!(!sys.stopped);

        // ddivu
        crate::step(&mut sys);
        assert_eq!(sys.cpu.lo, ((-3i64) as u64) / 0x4000_0000);
        assert_eq!(sys.cpu.hi, ((-3i64) as u64) % 0x4000_0000);
    }

    fn exception_code(sys: &cobalt::system::System) -> u8 {
        ((sys.cpu.cop0.regs[reg::CAUSE] >> 2) & 0x1F) as u8
    }

    #[test]
    fn taken_trap_raises_exception() {
        let sys = run(&[special(0x34, 1, 2, 0, 0)], |gpr| {
            gpr[1] = 7;
            gpr[2] = 7;
        });

        assert!(!sys.stopped);
        assert_eq!(exception_code(&sys), Exception::Trap as u8);
        assert_eq!(sys.cpu.cop0.regs[reg::EPC], BASE);
        assert_eq!(sys.cpu.pc, Address(GENERAL_VECTOR));
    }

    #[test]
    fn untaken_trap_continues() {
        let sys = run(&[special(0x34, 1, 2, 0, 0)], |gpr| {
            gpr[1] = 7;
            gpr[2] = 8;
        });

        assert_eq!(sys.cpu.pc, Address(BASE + 4));
        assert_eq!(sys.cpu.cop0.regs[reg::EPC], 0);
    }

    #[test]
    fn signed_overflow_raises_exception() {
        let cases = [
            (special(0x20, 1, 2, 3, 0), 0x7FFF_FFFF, 1),                     // add
            (special(0x22, 1, 2, 3, 0), 0xFFFF_FFFF_8000_0000, 1),           // sub
            (special(0x2C, 1, 2, 3, 0), i64::MAX as u64, 1),                 // dadd
            (special(0x2E, 1, 2, 3, 0), i64::MIN as u64, 1),                 // dsub
            (immediate(0x08, 1, 3, 1), 0x7FFF_FFFF, 0),                      // addi
            (immediate(0x18, 1, 3, 0xFFFF), i64::MIN as u64, 0),             // daddi
        ];

        for (code, a, b) in cases {
            let sys = run(&[code], |gpr| {
                gpr[1] = a;
                gpr[2] = b;
                gpr[3] = 0x1234;
            });

            assert_eq!(sys.cpu.gpr[3], 0x1234, "0x{code:08X}");
            assert_eq!(exception_code(&sys), Exception::Overflow as u8, "0x{code:08X}");
            assert_eq!(sys.cpu.cop0.regs[reg::EPC], BASE);
        }
    }

    #[test]
    fn unsigned_forms_wrap() {
        let sys = run(
            &[
                special(0x21, 1, 2, 3, 0),  // addu
                immediate(0x09, 1, 4, 1),   // addiu
                special(0x2F, 5, 2, 6, 0),  // dsubu
                special(0x20, 2, 2, 7, 0),  // add without overflow
            ],
            |gpr| {
                gpr[1] = 0x7FFF_FFFF;
                gpr[2] = 1;
                gpr[5] = i64::MIN as u64;
            },
        );

        assert_eq!(sys.cpu.gpr[3], 0xFFFF_FFFF_8000_0000);
        assert_eq!(sys.cpu.gpr[4], 0xFFFF_FFFF_8000_0000);
        assert_eq!(sys.cpu.gpr[6], i64::MAX as u64);
        assert_eq!(sys.cpu.gpr[7], 2);
        assert_eq!(sys.cpu.cop0.regs[reg::EPC], 0);
    }
}
