use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Trait for memory primitives.
///
/// A primitive is either a byte, half-word, word or double word, signed or unsigned. Guest memory
/// is big endian, so only big endian accessors exist.
pub trait Primitive:
    std::fmt::Debug
    + std::fmt::UpperHex
    + Copy
    + Immutable
    + FromBytes
    + IntoBytes
    + Default
    + Send
    + Sync
    + 'static
{
    /// Size of this primitive in bytes.
    const SIZE: usize = size_of::<Self>();

    /// Reads a value of this primitive from the bytes of a buffer (in big endian). If `buf` does
    /// not contain enough data, it's going to be completed with zeros.
    fn read_be_bytes(buf: &[u8]) -> Self;

    /// Writes this primitive to the given buffer (in big endian). If `buf` is not big enough,
    /// remaining bytes are going to be silently dropped.
    fn write_be_bytes(self, buf: &mut [u8]);

    /// Zero extends this value into an u64.
    fn zero_extend(self) -> u64;

    /// Truncates an u64 into this primitive.
    fn truncate(value: u64) -> Self;
}

macro_rules! impl_primitive {
    ($($type:ty => $unsigned:ty),*) => {
        $(
            impl Primitive for $type {
                #[inline(always)]
                fn read_be_bytes(buf: &[u8]) -> Self {
                    const SELF_SIZE: usize = size_of::<$type>();

                    #[cold]
                    #[inline(never)]
                    fn read_unhappy(buf: &[u8]) -> $type {
                        let mut read_buf = [0u8; SELF_SIZE];
                        read_buf[..buf.len()].copy_from_slice(buf);

                        <$type>::from_be_bytes(read_buf)
                    }

                    match buf.first_chunk::<SELF_SIZE>() {
                        Some(bytes) => <$type>::from_be_bytes(*bytes),
                        None => read_unhappy(buf),
                    }
                }

                #[inline(always)]
                fn write_be_bytes(self, buf: &mut [u8]) {
                    const SELF_SIZE: usize = size_of::<$type>();

                    #[cold]
                    #[inline(never)]
                    fn write_unhappy(value: $type, buf: &mut [u8]) {
                        let bytes = value.to_be_bytes();
                        let len = buf.len();
                        buf.copy_from_slice(&bytes[..len]);
                    }

                    match buf.first_chunk_mut::<SELF_SIZE>() {
                        Some(bytes) => *bytes = self.to_be_bytes(),
                        None => write_unhappy(self, buf),
                    }
                }

                #[inline(always)]
                fn zero_extend(self) -> u64 {
                    self as $unsigned as u64
                }

                #[inline(always)]
                fn truncate(value: u64) -> Self {
                    value as $type
                }
            }
        )*
    };
}

impl_primitive! {
    u8 => u8,
    u16 => u16,
    u32 => u32,
    u64 => u64,

    i8 => u8,
    i16 => u16,
    i32 => u32,
    i64 => u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian_access() {
        let mut buf = [0u8; 8];
        0x1234_5678u32.write_be_bytes(&mut buf[2..]);
        assert_eq!(buf, [0, 0, 0x12, 0x34, 0x56, 0x78, 0, 0]);
        assert_eq!(u16::read_be_bytes(&buf[3..]), 0x3456);
        assert_eq!(u32::read_be_bytes(&buf[6..]), 0);
        assert_eq!((-2i8).zero_extend(), 0xFE);
    }
}
