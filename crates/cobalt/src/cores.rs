use crate::system::System;
use strum::{Display, FromRepr};

/// How guest code is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display)]
#[repr(u32)]
pub enum ExecutionMode {
    /// Fetch, decode and execute one instruction at a time.
    Interpreter = 0,
    /// Execute blocks of pre-decoded instructions.
    CachedInterpreter = 1,
    /// Execute blocks translated into host code.
    Recompiler = 2,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Executed {
    /// How many instructions have been executed.
    pub instructions: u64,
    /// How many Count ticks have elapsed, including ticks skipped by idle loops.
    pub cycles: u64,
}

impl std::ops::AddAssign for Executed {
    fn add_assign(&mut self, rhs: Self) {
        self.instructions += rhs.instructions;
        self.cycles += rhs.cycles;
    }
}

/// Trait for CPU cores.
///
/// Cores advance the virtual clock themselves and process due events at every control transfer,
/// so interrupts are taken at the same guest instruction no matter which core runs.
pub trait CpuCore: Send {
    /// Drives the CPU core forward by approximately the given number of Count ticks. Returns
    /// early if the system is stopped.
    fn exec(&mut self, sys: &mut System, cycles: u64) -> Executed;
    /// Steps the CPU, i.e. runs exactly 1 instruction (a branch runs together with its delay
    /// slot).
    fn step(&mut self, sys: &mut System) -> Executed;
    /// The execution mode this core implements.
    fn mode(&self) -> ExecutionMode;
}

/// Cores that emulate system components.
pub struct Cores {
    pub cpu: Box<dyn CpuCore>,
}
