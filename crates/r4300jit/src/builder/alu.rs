use super::BlockBuilder;
use cranelift::{
    codegen::ir,
    prelude::{InstBuilder, IntCC},
};
use r4300::{Ins, Opcode};

impl BlockBuilder<'_> {
    pub fn shift(&mut self, ins: Ins) {
        use Opcode::*;

        let rt = self.get_gpr(ins.rt());
        let sa = ins.sa() as i64;

        let value = match ins.op {
            Sll | Srl | Sra | Sllv | Srlv | Srav => {
                let word = self.low32(rt);
                let amount = if matches!(ins.op, Sllv | Srlv | Srav) {
                    let rs = self.get_gpr(ins.rs());
                    let rs = self.low32(rs);
                    self.bd.ins().band_imm(rs, 0x1F)
                } else {
                    self.ir_value(sa as u32)
                };

                let shifted = match ins.op {
                    Sll | Sllv => self.bd.ins().ishl(word, amount),
                    Srl | Srlv => self.bd.ins().ushr(word, amount),
                    _ => self.bd.ins().sshr(word, amount),
                };

                self.sext32(shifted)
            }
            Dsllv | Dsrlv | Dsrav => {
                let rs = self.get_gpr(ins.rs());
                let amount = self.bd.ins().band_imm(rs, 0x3F);
                match ins.op {
                    Dsllv => self.bd.ins().ishl(rt, amount),
                    Dsrlv => self.bd.ins().ushr(rt, amount),
                    _ => self.bd.ins().sshr(rt, amount),
                }
            }
            Dsll => self.bd.ins().ishl_imm(rt, sa),
            Dsrl => self.bd.ins().ushr_imm(rt, sa),
            Dsra => self.bd.ins().sshr_imm(rt, sa),
            Dsll32 => self.bd.ins().ishl_imm(rt, sa + 32),
            Dsrl32 => self.bd.ins().ushr_imm(rt, sa + 32),
            Dsra32 => self.bd.ins().sshr_imm(rt, sa + 32),
            _ => unreachable!("{:?} is not a shift", ins.op),
        };

        self.set_gpr(ins.rd(), value);
    }

    /// Register-register arithmetic and logic. The trapping `add` family goes through the
    /// interpreter instead.
    pub fn register(&mut self, ins: Ins) {
        use Opcode::*;

        let rs = self.get_gpr(ins.rs());
        let rt = self.get_gpr(ins.rt());

        let value = match ins.op {
            Addu | Subu => {
                let (a, b) = (self.low32(rs), self.low32(rt));
                let word = if ins.op == Addu {
                    self.bd.ins().iadd(a, b)
                } else {
                    self.bd.ins().isub(a, b)
                };

                self.sext32(word)
            }
            Daddu => self.bd.ins().iadd(rs, rt),
            Dsubu => self.bd.ins().isub(rs, rt),
            And => self.bd.ins().band(rs, rt),
            Or => self.bd.ins().bor(rs, rt),
            Xor => self.bd.ins().bxor(rs, rt),
            Nor => {
                let or = self.bd.ins().bor(rs, rt);
                self.bd.ins().bnot(or)
            }
            Slt => {
                let less = self.bd.ins().icmp(IntCC::SignedLessThan, rs, rt);
                self.bool_to_i64(less)
            }
            Sltu => {
                let less = self.bd.ins().icmp(IntCC::UnsignedLessThan, rs, rt);
                self.bool_to_i64(less)
            }
            _ => unreachable!("{:?} is not a register operation", ins.op),
        };

        self.set_gpr(ins.rd(), value);
    }

    pub fn immediate(&mut self, ins: Ins) {
        use Opcode::*;

        let simm = ins.simm() as i64;
        let imm = ins.imm() as i64;

        let value = match ins.op {
            Lui => self.ir_value(::util::sext32((imm as u32) << 16)),
            _ => {
                let rs = self.get_gpr(ins.rs());
                match ins.op {
                    Addiu => {
                        let word = self.low32(rs);
                        let word = self.bd.ins().iadd_imm(word, simm);
                        self.sext32(word)
                    }
                    Daddiu => self.bd.ins().iadd_imm(rs, simm),
                    Slti => {
                        let less = self.bd.ins().icmp_imm(IntCC::SignedLessThan, rs, simm);
                        self.bool_to_i64(less)
                    }
                    Sltiu => {
                        let less = self.bd.ins().icmp_imm(IntCC::UnsignedLessThan, rs, simm);
                        self.bool_to_i64(less)
                    }
                    Andi => self.bd.ins().band_imm(rs, imm),
                    Ori => self.bd.ins().bor_imm(rs, imm),
                    Xori => self.bd.ins().bxor_imm(rs, imm),
                    _ => unreachable!("{:?} is not an immediate operation", ins.op),
                }
            }
        };

        self.set_gpr(ins.rt(), value);
    }

    /// Multiplications. Divisions go through the interpreter.
    pub fn multiply(&mut self, ins: Ins) {
        use Opcode::*;

        let rs = self.get_gpr(ins.rs());
        let rt = self.get_gpr(ins.rt());

        let (lo, hi) = match ins.op {
            Mult | Multu => {
                let (a, b) = (self.low32(rs), self.low32(rt));
                let (a, b) = if ins.op == Mult {
                    (self.sext32(a), self.sext32(b))
                } else {
                    (
                        self.bd.ins().uextend(ir::types::I64, a),
                        self.bd.ins().uextend(ir::types::I64, b),
                    )
                };

                let product = self.bd.ins().imul(a, b);
                let high = self.bd.ins().ushr_imm(product, 32);

                let lo = self.low32(product);
                let hi = self.low32(high);
                (self.sext32(lo), self.sext32(hi))
            }
            Dmult => (
                self.bd.ins().imul(rs, rt),
                self.bd.ins().smulhi(rs, rt),
            ),
            Dmultu => (
                self.bd.ins().imul(rs, rt),
                self.bd.ins().umulhi(rs, rt),
            ),
            _ => unreachable!("{:?} is not a multiplication", ins.op),
        };

        self.set(r4300::Reg::Lo, lo);
        self.set(r4300::Reg::Hi, hi);
    }

    pub fn hi_lo(&mut self, ins: Ins) {
        use r4300::Reg;

        match ins.op {
            Opcode::Mfhi => {
                let hi = self.get(Reg::Hi);
                self.set_gpr(ins.rd(), hi);
            }
            Opcode::Mflo => {
                let lo = self.get(Reg::Lo);
                self.set_gpr(ins.rd(), lo);
            }
            Opcode::Mthi => {
                let rs = self.get_gpr(ins.rs());
                self.set(Reg::Hi, rs);
            }
            Opcode::Mtlo => {
                let rs = self.get_gpr(ins.rs());
                self.set(Reg::Lo, rs);
            }
            _ => unreachable!("{:?} does not access hi or lo", ins.op),
        }
    }
}
