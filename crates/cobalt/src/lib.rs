//! The console around the VR4300: memory, peripherals, virtual memory, events and snapshots.
mod image;

pub mod cores;
pub mod snapshot;
pub mod system;
pub mod vcr;

use crate::{
    cores::{Cores, Executed, ExecutionMode},
    snapshot::RestoreError,
    system::System,
};
use tracing::info;

pub use image::{Image, ImageError};
pub use r4300::{self, Address};
pub use system::Config;

/// The Cobalt emulator.
pub struct Cobalt {
    /// System state.
    pub system: System,
    /// Cores of the emulator.
    cores: Cores,
}

impl Cobalt {
    pub fn new(cores: Cores, mut config: Config) -> Self {
        config.cache_blocks = cores.cpu.mode() != ExecutionMode::Interpreter;
        Self {
            system: System::new(config),
            cores,
        }
    }

    /// Boots the given image.
    pub fn start(&mut self, image: &Image) {
        info!(mode = %self.mode(), "starting session");
        self.system.boot(image);
    }

    /// The execution mode of the CPU core.
    pub fn mode(&self) -> ExecutionMode {
        self.cores.cpu.mode()
    }

    /// Advances emulation by the specified number of Count ticks, or until the system stops.
    pub fn exec(&mut self, cycles: u64) -> Executed {
        let mut executed = Executed::default();
        while executed.cycles < cycles && !self.system.stopped {
            let remaining = cycles - executed.cycles;
            let e = self.cores.cpu.exec(&mut self.system, remaining);
            executed += e;

            if e.instructions == 0 && e.cycles == 0 {
                break;
            }
        }

        executed
    }

    /// Executes a single instruction (or a branch and its delay slot).
    pub fn step(&mut self) -> Executed {
        self.cores.cpu.step(&mut self.system)
    }

    /// Serializes the whole emulation state.
    pub fn snapshot(&self) -> Vec<u8> {
        self.system.snapshot(self.mode())
    }

    /// Restores a snapshot. On error the state is left untouched.
    pub fn restore(&mut self, data: &[u8]) -> Result<(), RestoreError> {
        self.system.restore(data)
    }

    /// Forces every cached block to be rebuilt.
    pub fn recompile_all(&mut self) {
        self.system.recompile_all();
    }
}
