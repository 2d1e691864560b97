//! Textual representation of instructions.
use crate::{
    Ins, Opcode, Shape,
    cop0,
    registers::GPR_NAMES,
};
use std::fmt::{Display, Formatter, Result};

fn gpr(index: u8) -> &'static str {
    GPR_NAMES[index as usize & 0x1F]
}

impl Ins {
    fn fmt_register(self, f: &mut Formatter<'_>) -> Result {
        use Opcode::*;

        let mnemonic = self.op.mnemonic();
        match self.op {
            Sll | Srl | Sra | Dsll | Dsrl | Dsra | Dsll32 | Dsrl32 | Dsra32 => write!(
                f,
                "{mnemonic} {}, {}, {}",
                gpr(self.rd()),
                gpr(self.rt()),
                self.sa()
            ),
            Sllv | Srlv | Srav | Dsllv | Dsrlv | Dsrav => write!(
                f,
                "{mnemonic} {}, {}, {}",
                gpr(self.rd()),
                gpr(self.rt()),
                gpr(self.rs())
            ),
            Jr | Mthi | Mtlo => write!(f, "{mnemonic} {}", gpr(self.rs())),
            Mfhi | Mflo => write!(f, "{mnemonic} {}", gpr(self.rd())),
            Jalr => write!(f, "{mnemonic} {}, {}", gpr(self.rd()), gpr(self.rs())),
            Mult | Multu | Div | Divu | Dmult | Dmultu | Ddiv | Ddivu | Teq => {
                write!(f, "{mnemonic} {}, {}", gpr(self.rs()), gpr(self.rt()))
            }
            Mfc0 | Mtc0 => write!(
                f,
                "{mnemonic} {}, {}",
                gpr(self.rt()),
                cop0::NAMES[self.rd() as usize]
            ),
            Mfc1 | Dmfc1 | Mtc1 | Dmtc1 => {
                write!(f, "{mnemonic} {}, f{}", gpr(self.rt()), self.fs())
            }
            Cfc1 | Ctc1 => write!(f, "{mnemonic} {}, fcr{}", gpr(self.rt()), self.fs()),
            op if op.is_float_arith() => match op {
                AddS | SubS | MulS | DivS | AddD | SubD | MulD | DivD => write!(
                    f,
                    "{mnemonic} f{}, f{}, f{}",
                    self.fd(),
                    self.fs(),
                    self.ft()
                ),
                _ => write!(f, "{mnemonic} f{}, f{}", self.fd(), self.fs()),
            },
            _ => write!(
                f,
                "{mnemonic} {}, {}, {}",
                gpr(self.rd()),
                gpr(self.rs()),
                gpr(self.rt())
            ),
        }
    }

    fn fmt_immediate(self, f: &mut Formatter<'_>) -> Result {
        use Opcode::*;

        let mnemonic = self.op.mnemonic();
        match self.op {
            Lui => write!(f, "{mnemonic} {}, 0x{:04X}", gpr(self.rt()), self.imm()),
            Andi | Ori | Xori => write!(
                f,
                "{mnemonic} {}, {}, 0x{:04X}",
                gpr(self.rt()),
                gpr(self.rs()),
                self.imm()
            ),
            Beq | Bne | Beql | Bnel => write!(
                f,
                "{mnemonic} {}, {}, {}",
                gpr(self.rs()),
                gpr(self.rt()),
                self.branch_offset()
            ),
            Bc1f | Bc1t | Bc1fl | Bc1tl => write!(f, "{mnemonic} {}", self.branch_offset()),
            op if op.is_conditional_branch() => {
                write!(f, "{mnemonic} {}, {}", gpr(self.rs()), self.branch_offset())
            }
            Cache => write!(
                f,
                "{mnemonic} 0x{:02X}, {}({})",
                self.rt(),
                self.simm(),
                gpr(self.base())
            ),
            op if op.is_load() || op.is_store() => write!(
                f,
                "{mnemonic} {}, {}({})",
                gpr(self.rt()),
                self.simm(),
                gpr(self.base())
            ),
            _ => write!(
                f,
                "{mnemonic} {}, {}, {}",
                gpr(self.rt()),
                gpr(self.rs()),
                self.simm()
            ),
        }
    }
}

impl Display for Ins {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if self.is_nop() {
            return write!(f, "nop");
        }

        let mnemonic = self.op.mnemonic();
        match self.shape() {
            Shape::Register => self.fmt_register(f),
            Shape::Immediate => self.fmt_immediate(f),
            Shape::Jump => write!(f, "{mnemonic} 0x{:07X}", self.target() << 2),
            Shape::FloatMemory => write!(
                f,
                "{mnemonic} f{}, {}({})",
                self.ft(),
                self.simm(),
                gpr(self.base())
            ),
            Shape::FloatCompare => write!(f, "{mnemonic} f{}, f{}", self.fs(), self.ft()),
            Shape::Other => match self.op {
                Opcode::Illegal => write!(f, "illegal 0x{:08X}", self.code),
                _ => write!(f, "{mnemonic}"),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        let cases = [
            (0x0000_0000, "nop"),
            (0x27BD_FFE0, "addiu sp, sp, -32"),
            (0x3C08_A430, "lui t0, 0xA430"),
            (0x8D09_0004, "lw t1, 4(t0)"),
            (0x1022_0002, "beq at, v0, 2"),
            (0x0000_0008 | (31 << 21), "jr ra"),
            (0x0043_1821, "addu v1, v0, v1"),
            (0x4088_6000, "mtc0 t0, Status"),
            (0x4602_0800, "add.s f0, f1, f2"),
            (0x4602_003C, "c.lt.s f0, f2"),
            (0x4200_0018, "eret"),
            (0xFC00_0000, "sd zero, 0(zero)"),
            (0xD000_0000, "illegal 0xD0000000"),
        ];

        for (code, expected) in cases {
            assert_eq!(Ins::new(code).to_string(), expected);
        }
    }
}
