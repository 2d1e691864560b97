//! Small helpers shared by the emulator crates.

/// Returns a `Box<[T; LEN]>` filled with `elem`, without building the array on the stack.
#[inline(always)]
pub fn boxed_array<T: Clone, const LEN: usize>(elem: T) -> Box<[T; LEN]> {
    let slice = vec![elem; LEN].into_boxed_slice();

    // SAFETY: the slice has exactly LEN elements
    unsafe { Box::from_raw(Box::into_raw(slice).cast::<[T; LEN]>()) }
}

/// Sign extends the low 32 bits of `value` to 64 bits, the way every 32-bit result is written
/// into a 64-bit MIPS register.
#[inline(always)]
pub const fn sext32(value: u32) -> u64 {
    value as i32 as i64 as u64
}

/// Sign extends a 16 bit immediate to 64 bits.
#[inline(always)]
pub const fn sext16(value: u16) -> u64 {
    value as i16 as i64 as u64
}

/// Like offset_of, except it also supports indexing arrays
#[macro_export]
macro_rules! offset_of {
    ($t:ty, $($path:tt)+) => {{
        const OFFSET: usize = {
            let data = core::mem::MaybeUninit::<$t>::uninit();
            let ptr = data.as_ptr();
            unsafe { (&raw const (*ptr).$($path)+).byte_offset_from(ptr) as usize }
        };

        OFFSET
    }}
}

#[cfg(test)]
mod test {
    use super::*;

    #[repr(C)]
    struct Regs {
        pc: u32,
        pad: u32,
        gpr: [u64; 4],
    }

    #[test]
    fn offset_of_indexes_arrays() {
        assert_eq!(offset_of!(Regs, pc), 0);
        assert_eq!(offset_of!(Regs, gpr[0]), 8);
        assert_eq!(offset_of!(Regs, gpr[3]), 32);
    }

    #[test]
    fn boxed_array_is_filled() {
        let array = boxed_array::<u8, 4096>(0xAA);
        assert!(array.iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sext32(0x8000_0000), 0xFFFF_FFFF_8000_0000);
        assert_eq!(sext32(0x7FFF_FFFF), 0x7FFF_FFFF);
        assert_eq!(sext16(0xFFFC), 0xFFFF_FFFF_FFFF_FFFC);
    }
}
