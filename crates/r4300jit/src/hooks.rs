//! Functions of the embedder that generated code calls into.
use crate::block::{Info, Link};
use cranelift::{codegen::ir, prelude::isa::CallConv};
use r4300::Cpu;

/// Opaque context passed to every hook. Its actual type is chosen by the embedder.
pub type Context = std::ffi::c_void;

pub type GetRegistersHook = extern "C-unwind" fn(*mut Context) -> *mut Cpu;
pub type FollowLinkHook = extern "C-unwind" fn(*const Info, *mut Context) -> bool;
pub type TryLinkHook = extern "C-unwind" fn(*mut Context, u32, *mut Link);
pub type ReadHook<T> = extern "C-unwind" fn(*mut Context, u32, *mut T) -> bool;
pub type WriteHook<T> = extern "C-unwind" fn(*mut Context, u32, T) -> bool;
pub type InterpretHook = extern "C-unwind" fn(*mut Context, u32) -> bool;
pub type StepHook = extern "C-unwind" fn(*mut Context) -> u32;
pub type IdleHook = extern "C-unwind" fn(*mut Context) -> bool;
pub type AdvanceHook = extern "C-unwind" fn(*mut Context, u64);
pub type GenericHook = extern "C-unwind" fn(*mut Context);

/// External functions that generated code calls.
///
/// Every hook other than `get_registers` and the link hooks is called with the register file
/// flushed, the clock up to date and `cpu.pc` pointing at the instruction responsible for the
/// call.
#[derive(Clone, Copy)]
pub struct Hooks {
    // registers
    pub get_registers: GetRegistersHook,

    // linking
    /// Whether execution may continue into the next block without returning to the dispatcher.
    pub follow_link: FollowLinkHook,
    /// Looks up the block at the given address and, if there is one, stores it in the link.
    pub try_link: TryLinkHook,

    // memory. reads store the value through the pointer, and both return whether the access
    // succeeded. on failure the exception has already been raised.
    pub read_u8: ReadHook<u8>,
    pub read_u16: ReadHook<u16>,
    pub read_u32: ReadHook<u32>,
    pub read_u64: ReadHook<u64>,
    pub write_u8: WriteHook<u8>,
    pub write_u16: WriteHook<u16>,
    pub write_u32: WriteHook<u32>,
    pub write_u64: WriteHook<u64>,

    // fallbacks
    /// Executes an instruction that is not compiled natively. Returns whether execution
    /// continues sequentially.
    pub interpret: InterpretHook,
    /// Executes the instruction at `cpu.pc` together with its delay slot, returning how many
    /// instructions retired. Control always leaves the block afterwards.
    pub step: StepHook,

    // timing
    /// Skips an idle loop at `cpu.pc`, if possible. Returns whether it did.
    pub idle: IdleHook,
    /// Advances the clock by the given amount of ticks.
    pub advance: AdvanceHook,
    /// Processes due events.
    pub process_events: GenericHook,
}

/// Builds a signature for a hook. Narrow integer parameters are zero extended.
fn signature(call_conv: CallConv, params: &[ir::Type], returns: &[ir::Type]) -> ir::Signature {
    let param = |ty: &ir::Type| {
        let param = ir::AbiParam::new(*ty);
        if ty.bits() < 32 { param.uext() } else { param }
    };

    ir::Signature {
        params: params.iter().map(param).collect(),
        returns: returns.iter().map(param).collect(),
        call_conv,
    }
}

impl Hooks {
    pub(crate) fn get_registers_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        // ctx
        signature(call_conv, &[ptr_type], &[ptr_type])
    }

    pub(crate) fn follow_link_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        // info, ctx
        signature(call_conv, &[ptr_type, ptr_type], &[ir::types::I8])
    }

    pub(crate) fn try_link_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        // ctx, address, link
        signature(call_conv, &[ptr_type, ir::types::I32, ptr_type], &[])
    }

    pub(crate) fn read_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        // ctx, address, value ptr
        signature(
            call_conv,
            &[ptr_type, ir::types::I32, ptr_type],
            &[ir::types::I8],
        )
    }

    pub(crate) fn write_sig(
        ptr_type: ir::Type,
        write_type: ir::Type,
        call_conv: CallConv,
    ) -> ir::Signature {
        // ctx, address, value
        signature(
            call_conv,
            &[ptr_type, ir::types::I32, write_type],
            &[ir::types::I8],
        )
    }

    pub(crate) fn interpret_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        // ctx, code
        signature(call_conv, &[ptr_type, ir::types::I32], &[ir::types::I8])
    }

    pub(crate) fn step_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        signature(call_conv, &[ptr_type], &[ir::types::I32])
    }

    pub(crate) fn idle_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        signature(call_conv, &[ptr_type], &[ir::types::I8])
    }

    pub(crate) fn advance_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        // ctx, ticks
        signature(call_conv, &[ptr_type, ir::types::I64], &[])
    }

    pub(crate) fn generic_sig(ptr_type: ir::Type, call_conv: CallConv) -> ir::Signature {
        signature(call_conv, &[ptr_type], &[])
    }
}
