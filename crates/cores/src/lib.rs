//! Implementations of [`CpuCore`](cobalt::cores::CpuCore), one per execution mode.
pub mod cached;
pub mod interpreter;
pub mod jit;

use cobalt::{cores::ExecutionMode, system::System};
use r4300::{Address, Ins};

pub use cobalt;

/// Builds the CPU core for the given mode.
///
/// If the recompiler cannot run on this host, this falls back to the cached interpreter. This is
/// the only point where the mode may change.
pub fn cpu_core(mode: ExecutionMode, jit: jit::Config) -> Box<dyn cobalt::cores::CpuCore> {
    match mode {
        ExecutionMode::Interpreter => Box::new(interpreter::Core),
        ExecutionMode::CachedInterpreter => Box::new(cached::Core::default()),
        ExecutionMode::Recompiler => match jit::Core::new(jit) {
            Ok(core) => Box::new(core),
            Err(e) => {
                tracing::warn!("recompiler unavailable, falling back to cached interpreter: {e}");
                Box::new(cached::Core::default())
            }
        },
    }
}

/// Reads the instructions from `start` up to the end of its page, stopping early at the first
/// address that does not translate.
fn page_instructions(sys: &System, start: Address) -> impl Iterator<Item = Ins> {
    let end = start.page_base().value() + 0x1000;
    (start.value()..end)
        .step_by(4)
        .map_while(|addr| sys.read_pure::<u32>(Address(addr)))
        .map(Ins::new)
}
