use super::BlockBuilder;
use cranelift::{codegen::ir, prelude::InstBuilder};

/// Trait for transforming constants into an IR value in a function.
pub trait IntoIrValue {
    fn into_value(self, builder: &mut BlockBuilder<'_>) -> ir::Value;
}

impl IntoIrValue for ir::Value {
    fn into_value(self, _: &mut BlockBuilder<'_>) -> ir::Value {
        self
    }
}

impl IntoIrValue for u32 {
    fn into_value(self, builder: &mut BlockBuilder<'_>) -> ir::Value {
        builder.bd.ins().iconst(ir::types::I32, self as i64)
    }
}

impl IntoIrValue for u64 {
    fn into_value(self, builder: &mut BlockBuilder<'_>) -> ir::Value {
        builder.bd.ins().iconst(ir::types::I64, self as i64)
    }
}

impl BlockBuilder<'_> {
    /// Creates an IR value from the given `value`.
    pub fn ir_value(&mut self, value: impl IntoIrValue) -> ir::Value {
        value.into_value(self)
    }

    /// The low 32 bits of an I64.
    pub fn low32(&mut self, value: ir::Value) -> ir::Value {
        self.bd.ins().ireduce(ir::types::I32, value)
    }

    /// Sign extends an I32 into an I64, the way 32-bit results are written to registers.
    pub fn sext32(&mut self, value: ir::Value) -> ir::Value {
        self.bd.ins().sextend(ir::types::I64, value)
    }

    /// Zero extends a boolean (I8) into an I64.
    pub fn bool_to_i64(&mut self, value: ir::Value) -> ir::Value {
        self.bd.ins().uextend(ir::types::I64, value)
    }
}
