//! Loads and stores of bytes, halfwords, words and doublewords. Everything else that touches
//! memory goes through the interpreter.
use super::BlockBuilder;
use crate::hooks::Hooks;
use cranelift::{codegen::ir, prelude::InstBuilder};
use r4300::{Ins, Opcode};

pub trait ReadWriteAble {
    const IR_TYPE: ir::Type;
    /// Index of the write signature for this type.
    const INDEX: usize;
    fn read_hook(hooks: &Hooks) -> usize;
    fn write_hook(hooks: &Hooks) -> usize;
}

macro_rules! read_write_able {
    ($($ty:ty => $ir:ident, $index:literal, $read:ident, $write:ident);* $(;)?) => {
        $(
            impl ReadWriteAble for $ty {
                const IR_TYPE: ir::Type = ir::types::$ir;
                const INDEX: usize = $index;

                fn read_hook(hooks: &Hooks) -> usize {
                    hooks.$read as usize
                }

                fn write_hook(hooks: &Hooks) -> usize {
                    hooks.$write as usize
                }
            }
        )*
    };
}

read_write_able! {
    u8 => I8, 0, read_u8, write_u8;
    u16 => I16, 1, read_u16, write_u16;
    u32 => I32, 2, read_u32, write_u32;
    u64 => I64, 3, read_u64, write_u64;
}

impl BlockBuilder<'_> {
    fn effective_address(&mut self, ins: Ins) -> ir::Value {
        let base = self.get_gpr(ins.base());
        let addr = self.bd.ins().iadd_imm(base, ins.simm() as i64);
        self.low32(addr)
    }

    /// Reads memory through the read hook, leaving the block if the access raised an exception.
    pub fn mem_read<P: ReadWriteAble>(&mut self, addr: ir::Value) -> ir::Value {
        let hook = P::read_hook(&self.compiler.hooks);
        let slot_addr =
            self.bd
                .ins()
                .stack_addr(self.consts.ptr_type, self.consts.read_stack_slot, 0);

        let ctx = self.consts.ctx_ptr;
        let ok = self.call_with_state(self.consts.signatures.read, hook, &[ctx, addr, slot_addr]);
        self.exit_unless(ok);

        self.bd
            .ins()
            .stack_load(P::IR_TYPE, self.consts.read_stack_slot, 0)
    }

    /// Writes memory through the write hook, leaving the block if the access raised an exception.
    pub fn mem_write<P: ReadWriteAble>(&mut self, addr: ir::Value, value: ir::Value) {
        let hook = P::write_hook(&self.compiler.hooks);
        let ctx = self.consts.ctx_ptr;
        let ok = self.call_with_state(
            self.consts.signatures.write[P::INDEX],
            hook,
            &[ctx, addr, value],
        );

        self.exit_unless(ok);
    }

    pub fn load(&mut self, ins: Ins) {
        use Opcode::*;

        let addr = self.effective_address(ins);
        let value = match ins.op {
            Lb | Lbu => self.mem_read::<u8>(addr),
            Lh | Lhu => self.mem_read::<u16>(addr),
            Lw | Lwu => self.mem_read::<u32>(addr),
            Ld => self.mem_read::<u64>(addr),
            _ => unreachable!("{:?} is not compiled natively", ins.op),
        };

        let value = match ins.op {
            Lb | Lh | Lw => self.bd.ins().sextend(ir::types::I64, value),
            Lbu | Lhu | Lwu => self.bd.ins().uextend(ir::types::I64, value),
            _ => value,
        };

        self.set_gpr(ins.rt(), value);
    }

    pub fn store(&mut self, ins: Ins) {
        use Opcode::*;

        let addr = self.effective_address(ins);
        let rt = self.get_gpr(ins.rt());

        match ins.op {
            Sb => {
                let value = self.bd.ins().ireduce(ir::types::I8, rt);
                self.mem_write::<u8>(addr, value);
            }
            Sh => {
                let value = self.bd.ins().ireduce(ir::types::I16, rt);
                self.mem_write::<u16>(addr, value);
            }
            Sw => {
                let value = self.low32(rt);
                self.mem_write::<u32>(addr, value);
            }
            Sd => self.mem_write::<u64>(addr, rt),
            _ => unreachable!("{:?} is not compiled natively", ins.op),
        }
    }
}
