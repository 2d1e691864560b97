//! Coprocessor 1, the floating point unit.
use bitos::bitos;

/// Rounding mode selected by FCR31.
#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    Nearest = 0,
    Zero = 1,
    PositiveInfinity = 2,
    NegativeInfinity = 3,
}

impl RoundingMode {
    /// Rounds `value` to an integral value using this mode.
    #[inline(always)]
    pub fn round(self, value: f64) -> f64 {
        match self {
            Self::Nearest => value.round_ties_even(),
            Self::Zero => value.trunc(),
            Self::PositiveInfinity => value.ceil(),
            Self::NegativeInfinity => value.floor(),
        }
    }
}

/// The FPU control/status register.
#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Fcr31 {
    #[bits(0..2)]
    pub rounding_mode: RoundingMode,
    /// Result of the last compare, tested by `bc1f`/`bc1t`.
    #[bits(23)]
    pub condition: bool,
    #[bits(24)]
    pub flush_denormals: bool,
}

/// Bit of FCR31 holding the compare condition.
pub const CONDITION_BIT: u32 = 1 << 23;

/// Floating point exception causes. FCR31 holds them in its cause field, and all but
/// [`UNIMPLEMENTED`](fpe::UNIMPLEMENTED) in its sticky flag and enable fields as well.
pub mod fpe {
    pub const INEXACT: u8 = 1 << 0;
    pub const UNDERFLOW: u8 = 1 << 1;
    pub const OVERFLOW: u8 = 1 << 2;
    pub const DIVISION_BY_ZERO: u8 = 1 << 3;
    pub const INVALID: u8 = 1 << 4;
    pub const UNIMPLEMENTED: u8 = 1 << 5;

    pub(super) const FLAGS_SHIFT: u32 = 2;
    pub(super) const ENABLES_SHIFT: u32 = 7;
    pub(super) const CAUSE_SHIFT: u32 = 12;
}

/// Value of the implementation/revision register.
pub const FCR0_VALUE: u32 = 0x511;

/// The COP1 register file.
///
/// With Status.FR clear, only the 16 even registers exist as 64-bit values, and the odd single
/// precision registers alias the upper half of the even register below them.
#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cop1 {
    pub fgr: [u64; 32],
    pub fcr0: u32,
    pub fcr31: u32,
}

impl Cop1 {
    #[inline(always)]
    pub fn fcr31(&self) -> Fcr31 {
        Fcr31::from_bits(self.fcr31)
    }

    #[inline(always)]
    pub fn condition(&self) -> bool {
        self.fcr31 & CONDITION_BIT != 0
    }

    #[inline(always)]
    pub fn set_condition(&mut self, value: bool) {
        if value {
            self.fcr31 |= CONDITION_BIT;
        } else {
            self.fcr31 &= !CONDITION_BIT;
        }
    }

    /// Exception causes enabled to trap.
    #[inline(always)]
    pub fn enables(&self) -> u8 {
        ((self.fcr31 >> fpe::ENABLES_SHIFT) & 0x1F) as u8
    }

    /// Causes of the last operation.
    #[inline(always)]
    pub fn causes(&self) -> u8 {
        ((self.fcr31 >> fpe::CAUSE_SHIFT) & 0x3F) as u8
    }

    /// Sticky flags of causes that did not trap.
    #[inline(always)]
    pub fn flags(&self) -> u8 {
        ((self.fcr31 >> fpe::FLAGS_SHIFT) & 0x1F) as u8
    }

    /// Records the exception causes of an operation and returns whether they trap. An
    /// unimplemented operation always traps. Causes that do not trap accumulate in the flags.
    pub fn signal(&mut self, causes: u8) -> bool {
        let causes = causes & 0x3F;
        let traps = causes & fpe::UNIMPLEMENTED != 0 || causes & self.enables() != 0;

        self.fcr31 &= !(0x3F << fpe::CAUSE_SHIFT);
        self.fcr31 |= (causes as u32) << fpe::CAUSE_SHIFT;
        if !traps {
            self.fcr31 |= ((causes & 0x1F) as u32) << fpe::FLAGS_SHIFT;
        }

        traps
    }

    /// Raw bits of the 32-bit register `index`.
    #[inline(always)]
    pub fn word(&self, index: u8, fr: bool) -> u32 {
        let index = index as usize;
        if fr {
            self.fgr[index] as u32
        } else {
            (self.fgr[index & !1] >> (32 * (index & 1))) as u32
        }
    }

    /// Sets the raw bits of the 32-bit register `index`.
    #[inline(always)]
    pub fn set_word(&mut self, index: u8, fr: bool, value: u32) {
        let index = index as usize;
        if fr {
            self.fgr[index] = (self.fgr[index] & !0xFFFF_FFFF) | value as u64;
        } else {
            let shift = 32 * (index & 1);
            let reg = &mut self.fgr[index & !1];
            *reg = (*reg & !(0xFFFF_FFFF << shift)) | ((value as u64) << shift);
        }
    }

    /// Raw bits of the 64-bit register `index`.
    #[inline(always)]
    pub fn dword(&self, index: u8, fr: bool) -> u64 {
        let index = index as usize;
        if fr {
            self.fgr[index]
        } else {
            self.fgr[index & !1]
        }
    }

    /// Sets the raw bits of the 64-bit register `index`.
    #[inline(always)]
    pub fn set_dword(&mut self, index: u8, fr: bool, value: u64) {
        let index = index as usize;
        if fr {
            self.fgr[index] = value;
        } else {
            self.fgr[index & !1] = value;
        }
    }

    #[inline(always)]
    pub fn single(&self, index: u8, fr: bool) -> f32 {
        f32::from_bits(self.word(index, fr))
    }

    #[inline(always)]
    pub fn set_single(&mut self, index: u8, fr: bool, value: f32) {
        self.set_word(index, fr, value.to_bits());
    }

    #[inline(always)]
    pub fn double(&self, index: u8, fr: bool) -> f64 {
        f64::from_bits(self.dword(index, fr))
    }

    #[inline(always)]
    pub fn set_double(&mut self, index: u8, fr: bool, value: f64) {
        self.set_dword(index, fr, value.to_bits());
    }

    /// Moves register contents around when Status.FR changes, so that each 32-bit register keeps
    /// its value across the switch.
    pub fn switch_mode(&mut self, old_fr: bool, new_fr: bool) {
        match (old_fr, new_fr) {
            (false, true) => {
                for even in (0..32).step_by(2) {
                    let high = self.fgr[even] >> 32;
                    self.fgr[even + 1] = (self.fgr[even + 1] & !0xFFFF_FFFF) | high;
                }
            }
            (true, false) => {
                for even in (0..32).step_by(2) {
                    let odd = self.fgr[even + 1] & 0xFFFF_FFFF;
                    self.fgr[even] = (self.fgr[even] & 0xFFFF_FFFF) | (odd << 32);
                }
            }
            _ => (),
        }
    }
}
