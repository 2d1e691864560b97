//! Definitions for the VR4300, the 64-bit MIPS III processor of the console.
mod primitive;

pub mod cop0;
pub mod cop1;
pub mod disasm;
pub mod ins;
pub mod registers;
pub mod tlb;

pub use bitos;
pub use ins::{Ins, Opcode, Shape};
pub use primitive::Primitive;
pub use registers::{Cpu, Reg};

/// Base of the unmapped, cached segment.
pub const KSEG0: u32 = 0x8000_0000;
/// Base of the unmapped, uncached segment.
pub const KSEG1: u32 = 0xA000_0000;
/// Base of the mapped supervisor segment.
pub const KSSEG: u32 = 0xC000_0000;

/// A guest memory address. This is a thin wrapper around a [`u32`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Address(pub u32);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{:04X}_{:04X}",
            (self.0 & 0xFFFF_0000) >> 16,
            self.0 & 0xFFFF
        )
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Address {
    /// Returns the value of this address. Equivalent to `self.0`.
    #[inline(always)]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns `true` if this address is aligned to the given alignment.
    #[inline(always)]
    pub const fn is_aligned(self, alignment: u32) -> bool {
        self.0.is_multiple_of(alignment)
    }

    /// Index of the 4KB page containing this address.
    #[inline(always)]
    pub const fn page(self) -> usize {
        (self.0 >> 12) as usize
    }

    /// Start of the 4KB page containing this address.
    #[inline(always)]
    pub const fn page_base(self) -> Self {
        Self(self.0 & !0xFFF)
    }

    /// Whether this address lies in kseg0 or kseg1, the two windows that map directly onto
    /// physical memory.
    #[inline(always)]
    pub const fn is_fixed_mapped(self) -> bool {
        self.0 >= KSEG0 && self.0 < KSSEG
    }

    /// The physical address of a fixed-mapped address.
    #[inline(always)]
    pub const fn fixed_physical(self) -> u32 {
        self.0 & 0x1FFF_FFFF
    }

    /// For an address in kseg0 returns the same location in kseg1 and vice versa.
    #[inline(always)]
    pub const fn mirror(self) -> Option<Self> {
        if self.is_fixed_mapped() {
            Some(Self(self.0 ^ 0x2000_0000))
        } else {
            None
        }
    }
}

impl std::ops::Add<u32> for Address {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl std::ops::Add<i32> for Address {
    type Output = Self;

    fn add(self, rhs: i32) -> Self::Output {
        Self(self.0.wrapping_add_signed(rhs))
    }
}

impl std::ops::AddAssign<u32> for Address {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl std::ops::AddAssign<i32> for Address {
    fn add_assign(&mut self, rhs: i32) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub<u32> for Address {
    type Output = Self;

    fn sub(self, rhs: u32) -> Self::Output {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl std::ops::Sub<Address> for Address {
    type Output = u32;

    fn sub(self, rhs: Address) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl std::ops::SubAssign<u32> for Address {
    fn sub_assign(&mut self, rhs: u32) {
        *self = *self - rhs;
    }
}

impl PartialEq<u32> for Address {
    fn eq(&self, other: &u32) -> bool {
        self.0 == *other
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pages_and_mirrors() {
        let addr = Address(0x8001_2345);
        assert_eq!(addr.page(), 0x80012);
        assert_eq!(addr.page_base(), 0x8001_2000);
        assert_eq!(addr.mirror(), Some(Address(0xA001_2345)));
        assert_eq!(Address(0xA001_2345).mirror(), Some(addr));
        assert_eq!(Address(0x0040_0000).mirror(), None);
        assert_eq!(addr.fixed_physical(), 0x0001_2345);
    }

    #[test]
    fn wrapping_arithmetic() {
        assert_eq!(Address(0xFFFF_FFFC) + 8u32, Address(4));
        assert_eq!(Address(8) + -12i32, Address(0xFFFF_FFFC));
        assert_eq!(Address(0x10) - Address(0x8), 8);
        assert_eq!(format!("{}", Address(0xA400_0040)), "0xA400_0040");
    }
}
