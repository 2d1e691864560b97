//! Fetches, decodes and executes one instruction at a time.
use cobalt::{
    cores::{CpuCore, Executed, ExecutionMode},
    system::System,
};

pub struct Core;

impl CpuCore for Core {
    fn exec(&mut self, sys: &mut System, cycles: u64) -> Executed {
        let start = sys.scheduler.elapsed();
        let mut instructions = 0;
        while sys.scheduler.elapsed() - start < cycles && !sys.stopped {
            instructions += r4300int::step(sys).retired as u64;
        }

        Executed {
            instructions,
            cycles: sys.scheduler.elapsed() - start,
        }
    }

    fn step(&mut self, sys: &mut System) -> Executed {
        let start = sys.scheduler.elapsed();
        let step = r4300int::step(sys);

        Executed {
            instructions: step.retired as u64,
            cycles: sys.scheduler.elapsed() - start,
        }
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Interpreter
    }
}
