//! State of the emulator.

pub mod boot;
pub mod bus;
pub mod code;
pub mod cop0;
pub mod exception;
pub mod interrupt;
pub mod mem;
pub mod mmu;
pub mod peripherals;
pub mod pif;
pub mod scheduler;
pub mod tlb;

use crate::{
    system::{
        bus::Bus,
        code::CodeValidity,
        exception::Access,
        mmu::Mmu,
        scheduler::{Event, Scheduler},
    },
    vcr::{NoInput, Vcr},
};
use r4300::{Address, Cpu, Primitive};
use tracing::{debug, warn};

/// Count ticks in one NTSC frame (Count runs at half the 93.75MHz pipeline clock).
pub const DEFAULT_VI_PERIOD: u32 = 781_250;

/// System configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Count ticks between two vertical interrupts.
    pub vi_period: u32,
    /// Whether the active core caches decoded or compiled blocks. Enables content hashing of
    /// pages remapped by TLB writes.
    pub cache_blocks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vi_period: DEFAULT_VI_PERIOD,
            cache_blocks: false,
        }
    }
}

/// System state.
pub struct System {
    /// System configuration.
    pub config: Config,
    /// Scheduler for events.
    pub scheduler: Scheduler,
    /// The CPU state.
    pub cpu: Cpu,
    /// The system bus. Contains memories and peripherals.
    pub bus: Bus,
    /// Lookup tables of the TLB.
    pub mmu: Mmu,
    /// Which pages contain code that changed.
    pub code: CodeValidity,
    /// Input and frame hooks.
    pub vcr: Box<dyn Vcr>,
    /// Digest of the loaded ROM image.
    pub rom_digest: [u8; 32],
    /// Current interlaced field, toggled at every vertical interrupt.
    pub vi_field: u32,
    /// Whether the session must stop because of a fatal guest condition.
    pub stopped: bool,
    /// Whether the next `beq` must not jump. Set when restoring some old snapshots.
    pub legacy_beq_shim: bool,
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("cpu", &self.cpu)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl System {
    pub fn new(config: Config) -> Self {
        let mut system = System {
            config,
            scheduler: Scheduler::default(),
            cpu: Cpu::default(),
            bus: Bus::default(),
            mmu: Mmu::default(),
            code: CodeValidity::default(),
            vcr: Box::new(NoInput),
            rom_digest: [0; 32],
            vi_field: 0,
            stopped: false,
            legacy_beq_shim: false,
        };

        system.reset_events();
        system
    }

    /// Clears the event queue and arms the periodic events.
    pub fn reset_events(&mut self) {
        self.scheduler = Scheduler::default();
        self.scheduler
            .schedule(Event::Vi, self.config.vi_period.max(1) as u64);
        self.schedule_compare();
    }

    /// Advances the virtual clock: Count and the scheduler move together.
    #[inline(always)]
    pub fn advance(&mut self, ticks: u64) {
        let count = self.cpu.cop0.count().wrapping_add(ticks as u32);
        self.cpu.cop0.set_count(count);
        self.scheduler.advance(ticks);
    }

    /// Asks the session to stop after the current instruction.
    pub fn request_stop(&mut self) {
        self.stopped = true;
    }

    /// Reads a primitive from a virtual address. Returns `None` if a TLB exception was raised.
    #[inline]
    pub fn read<P: Primitive>(&mut self, addr: Address) -> Option<P> {
        let addr = Address(addr.value() & !(P::SIZE as u32 - 1));
        let phys = self.translate(addr, Access::Read)?;
        Some(self.read_phys(phys))
    }

    /// Writes a primitive to a virtual address, invalidating any code cached for the written
    /// page. Returns `false` if a TLB exception was raised.
    #[inline]
    pub fn write<P: Primitive>(&mut self, addr: Address, value: P) -> bool {
        let addr = Address(addr.value() & !(P::SIZE as u32 - 1));
        let Some(phys) = self.translate(addr, Access::Write) else {
            return false;
        };

        self.write_phys(phys, value);
        if !addr.is_fixed_mapped() {
            self.code.invalidate_page(addr.page());
        }

        self.code.invalidate_phys_range(phys, P::SIZE as u32);
        true
    }

    /// Whether code cached for the page containing `pc` can still be trusted. TLB mapped pages
    /// must also still translate to the same, unwritten, physical page.
    #[inline]
    pub fn is_code_valid(&self, pc: Address) -> bool {
        let page = pc.page();
        if pc.is_fixed_mapped() {
            return self.code.is_valid(page);
        }

        match self.translate_pure(pc, false) {
            Ok(phys) => self.code.is_mapped_valid(page, phys),
            // nothing can be cached for it
            Err(_) => self.code.is_valid(page),
        }
    }

    /// Marks the page containing `pc` as matching the code about to be cached for it.
    pub fn validate_code(&mut self, pc: Address) {
        let page = pc.page();
        if pc.is_fixed_mapped() {
            self.code.validate(page);
            return;
        }

        match self.translate_pure(pc, false) {
            Ok(phys) => self.code.validate_mapped(page, phys),
            Err(_) => self.code.validate(page),
        }
    }

    /// Fetches the instruction word at `addr`. Returns `None` if a TLB exception was raised.
    #[inline]
    pub fn fetch(&mut self, addr: Address) -> Option<u32> {
        let phys = self.translate(addr, Access::Fetch)?;
        Some(self.read_phys(phys))
    }

    /// Reads a primitive from a virtual address without side effects. Returns `None` if the
    /// address does not translate.
    pub fn read_pure<P: Primitive>(&self, addr: Address) -> Option<P> {
        let phys = self.translate_pure(addr, false).ok()?;
        self.bus.read_pure(phys)
    }

    /// Marks every page as invalid so every cached block is rebuilt before it runs again.
    pub fn recompile_all(&mut self) {
        debug!("invalidating all code");
        self.code.invalidate_all();
    }

    /// Copies `data` to the virtual address `addr`, bypassing exceptions. Used to load external
    /// code.
    pub fn load(&mut self, addr: Address, data: &[u8]) {
        for (offset, byte) in data.iter().copied().enumerate() {
            let target = addr + offset as u32;
            match self.translate_pure(target, true) {
                Ok(phys) => self.write_phys(phys, byte),
                Err(miss) => warn!(?miss, "could not load byte at {target}"),
            }
        }

        self.recompile_all();
    }
}
