use clap::{Args, Parser, ValueEnum};
use cobalt::{cores::ExecutionMode, system::DEFAULT_VI_PERIOD};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct JitConfig {
    /// Maximum number of instructions per block
    #[arg(visible_alias("ipb"), long, default_value_t = 128)]
    pub instr_per_block: u32,
    /// Whether to keep blocks from continuing directly into each other
    #[arg(long, default_value_t = false)]
    pub no_link: bool,
}

impl From<&JitConfig> for cores::jit::Config {
    fn from(value: &JitConfig) -> Self {
        Self {
            instr_per_block: value.instr_per_block,
            jit_settings: cores::jit::r4300jit::Settings {
                link_blocks: !value.no_link,
                ..Default::default()
            },
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Mode {
    /// Decode every instruction as it executes
    Interpreter,
    /// Execute pre-decoded blocks
    Cached,
    /// Execute blocks translated to host code
    Recompiler,
}

impl From<Mode> for ExecutionMode {
    fn from(value: Mode) -> Self {
        match value {
            Mode::Interpreter => ExecutionMode::Interpreter,
            Mode::Cached => ExecutionMode::CachedInterpreter,
            Mode::Recompiler => ExecutionMode::Recompiler,
        }
    }
}

/// Cobalt: headless VR4300 emulator
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub jit: JitConfig,
    /// How guest code is executed. Fixed for the whole session.
    #[arg(long, value_enum, default_value_t = Mode::Recompiler)]
    pub mode: Mode,
    /// Count ticks to run before stopping
    #[arg(long, default_value_t = 60 * DEFAULT_VI_PERIOD as u64)]
    pub cycles: u64,
    /// Number of frames to run instead of a tick count
    #[arg(long, conflicts_with = "cycles")]
    pub frames: Option<u64>,
    /// Count ticks between two vertical interrupts
    #[arg(long, default_value_t = DEFAULT_VI_PERIOD)]
    pub vi_period: u32,
    /// Where to write a snapshot of the state once the run is over
    #[arg(long)]
    pub snapshot_out: Option<PathBuf>,
    /// Snapshot to restore right after booting
    #[arg(long)]
    pub restore: Option<PathBuf>,
    /// Path to the ROM to load and execute.
    ///
    /// Big endian (.z64), byte-swapped (.v64) and little endian (.n64) images are supported.
    pub rom: PathBuf,
}
