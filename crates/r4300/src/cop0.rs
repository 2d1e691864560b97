//! Coprocessor 0, the system control coprocessor.
use bitos::{
    bitos,
    integer::{u2, u5},
};

/// Indices of the COP0 registers.
pub mod reg {
    pub const INDEX: usize = 0;
    pub const RANDOM: usize = 1;
    pub const ENTRY_LO0: usize = 2;
    pub const ENTRY_LO1: usize = 3;
    pub const CONTEXT: usize = 4;
    pub const PAGE_MASK: usize = 5;
    pub const WIRED: usize = 6;
    pub const BAD_VADDR: usize = 8;
    pub const COUNT: usize = 9;
    pub const ENTRY_HI: usize = 10;
    pub const COMPARE: usize = 11;
    pub const STATUS: usize = 12;
    pub const CAUSE: usize = 13;
    pub const EPC: usize = 14;
    pub const PREV_ID: usize = 15;
    pub const CONFIG: usize = 16;
    pub const LL_ADDR: usize = 17;
    pub const WATCH_LO: usize = 18;
    pub const WATCH_HI: usize = 19;
    pub const XCONTEXT: usize = 20;
    pub const PARITY_ERR: usize = 26;
    pub const CACHE_ERR: usize = 27;
    pub const TAG_LO: usize = 28;
    pub const TAG_HI: usize = 29;
    pub const ERROR_EPC: usize = 30;
}

/// Conventional names of the COP0 registers, used for disassembly.
pub const NAMES: [&str; 32] = [
    "Index", "Random", "EntryLo0", "EntryLo1", "Context", "PageMask", "Wired", "$7", "BadVAddr",
    "Count", "EntryHi", "Compare", "Status", "Cause", "EPC", "PRevID", "Config", "LLAddr",
    "WatchLo", "WatchHi", "XContext", "$21", "$22", "$23", "$24", "$25", "PErr", "CacheErr",
    "TagLo", "TagHi", "ErrorEPC", "$31",
];

/// Interrupt pending bit set by the MIPS interface (RCP interrupts).
pub const IP_RCP: u8 = 1 << 2;
/// Interrupt pending bit set when Count reaches Compare.
pub const IP_TIMER: u8 = 1 << 7;

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    #[bits(0)]
    pub interrupts_enabled: bool,
    #[bits(1)]
    pub exception_level: bool,
    #[bits(2)]
    pub error_level: bool,
    #[bits(3..5)]
    pub ksu: u2,
    #[bits(8..16)]
    pub interrupt_mask: u8,
    #[bits(22)]
    pub bootstrap_vectors: bool,
    /// Whether all 32 floating point registers are 64 bits wide. Otherwise, odd registers alias
    /// the upper half of the even ones.
    #[bits(26)]
    pub fr: bool,
    #[bits(28)]
    pub cop0_usable: bool,
    #[bits(29)]
    pub cop1_usable: bool,
}

impl Status {
    /// Whether interrupts can currently be taken, i.e. IE is set and both EXL and ERL are clear.
    #[inline(always)]
    pub fn accepts_interrupts(&self) -> bool {
        self.interrupts_enabled() && !self.exception_level() && !self.error_level()
    }
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Cause {
    #[bits(2..7)]
    pub exception_code: u5,
    #[bits(8..16)]
    pub interrupt_pending: u8,
    #[bits(28..30)]
    pub coprocessor: u2,
    #[bits(31)]
    pub branch_delay: bool,
}

/// Exception codes as stored in [`Cause::exception_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    Interrupt = 0,
    TlbModification = 1,
    TlbLoad = 2,
    TlbStore = 3,
    AddressLoad = 4,
    AddressStore = 5,
    Syscall = 8,
    Breakpoint = 9,
    ReservedInstruction = 10,
    CoprocessorUnusable = 11,
    Overflow = 12,
    Trap = 13,
    FloatingPoint = 15,
}

impl Exception {
    #[inline(always)]
    pub fn code(self) -> u5 {
        u5::new(self as u8)
    }
}

/// The COP0 register file.
#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cop0 {
    pub regs: [u32; 32],
}

impl Cop0 {
    #[inline(always)]
    pub fn status(&self) -> Status {
        Status::from_bits(self.regs[reg::STATUS])
    }

    #[inline(always)]
    pub fn set_status(&mut self, status: Status) {
        self.regs[reg::STATUS] = status.to_bits();
    }

    #[inline(always)]
    pub fn cause(&self) -> Cause {
        Cause::from_bits(self.regs[reg::CAUSE])
    }

    #[inline(always)]
    pub fn set_cause(&mut self, cause: Cause) {
        self.regs[reg::CAUSE] = cause.to_bits();
    }

    #[inline(always)]
    pub fn count(&self) -> u32 {
        self.regs[reg::COUNT]
    }

    #[inline(always)]
    pub fn set_count(&mut self, count: u32) {
        self.regs[reg::COUNT] = count;
    }

    #[inline(always)]
    pub fn compare(&self) -> u32 {
        self.regs[reg::COMPARE]
    }

    /// The ASID of the current address space (low 8 bits of EntryHi).
    #[inline(always)]
    pub fn asid(&self) -> u8 {
        self.regs[reg::ENTRY_HI] as u8
    }

    /// Whether the given interrupt pending bits are raised and unmasked.
    #[inline(always)]
    pub fn pending_interrupts(&self) -> u8 {
        self.status().interrupt_mask() & self.cause().interrupt_pending()
    }

    /// Sets the given bits in the pending interrupts field of Cause.
    #[inline(always)]
    pub fn raise_pending(&mut self, bits: u8) {
        let cause = self.cause();
        let pending = cause.interrupt_pending() | bits;
        self.set_cause(cause.with_interrupt_pending(pending));
    }

    /// Clears the given bits in the pending interrupts field of Cause.
    #[inline(always)]
    pub fn lower_pending(&mut self, bits: u8) {
        let cause = self.cause();
        let pending = cause.interrupt_pending() & !bits;
        self.set_cause(cause.with_interrupt_pending(pending));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_fields() {
        let status = Status::from_bits(0x3400_FF01);
        assert!(status.interrupts_enabled());
        assert!(!status.exception_level());
        assert!(status.fr());
        assert!(status.cop1_usable());
        assert!(status.cop0_usable());
        assert_eq!(status.interrupt_mask(), 0xFF);
        assert!(status.accepts_interrupts());
        assert!(!status.with_exception_level(true).accepts_interrupts());
    }

    #[test]
    fn pending_interrupts() {
        let mut cop0 = Cop0::default();
        cop0.regs[reg::STATUS] = 0x0000_8401;
        cop0.raise_pending(IP_TIMER);
        assert_eq!(cop0.regs[reg::CAUSE], 0x8000);
        assert_eq!(cop0.pending_interrupts(), IP_TIMER);

        cop0.lower_pending(IP_TIMER);
        cop0.raise_pending(IP_RCP);
        assert_eq!(cop0.pending_interrupts(), IP_RCP);
        assert_eq!(cop0.regs[reg::CAUSE], 0x400);
    }

    #[test]
    fn exception_codes() {
        let cause = Cause::default()
            .with_exception_code(Exception::CoprocessorUnusable.code())
            .with_coprocessor(u2::new(1));
        assert_eq!(cause.to_bits(), (11 << 2) | 0x1000_0000);
    }
}
