//! Cartridge ROM images.
use easyerr::Error;

/// First word of an image in native (big endian) byte order.
const MAGIC_BIG_ENDIAN: u32 = 0x8037_1240;
/// First word of an image with every pair of bytes swapped (`.v64`).
const MAGIC_BYTE_SWAPPED: u32 = 0x3780_4012;
/// First word of an image with every word reversed (`.n64`).
const MAGIC_LITTLE_ENDIAN: u32 = 0x4012_3780;

/// Length of the header plus the boot code.
pub const MIN_LEN: usize = 0x1000;

/// Offset of the country code in the header.
pub const COUNTRY_CODE_OFFSET: usize = 0x3E;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image is too short ({len} bytes, expected at least {MIN_LEN})")]
    TooShort { len: usize },
    #[error("image has an unknown byte order (first word is {magic:#010X})")]
    UnknownByteOrder { magic: u32 },
}

/// A cartridge ROM image in big endian byte order.
#[derive(Clone)]
pub struct Image(Box<[u8]>);

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("len", &self.0.len())
            .field("country_code", &self.country_code())
            .finish()
    }
}

impl Image {
    /// Builds an image from raw file contents, normalizing its byte order.
    pub fn new(mut data: Vec<u8>) -> Result<Self, ImageError> {
        if data.len() < MIN_LEN {
            return Err(ImageError::TooShort { len: data.len() });
        }

        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        match magic {
            MAGIC_BIG_ENDIAN => (),
            MAGIC_BYTE_SWAPPED => data.chunks_exact_mut(2).for_each(|c| c.swap(0, 1)),
            MAGIC_LITTLE_ENDIAN => data.chunks_exact_mut(4).for_each(|c| c.reverse()),
            _ => return Err(ImageError::UnknownByteOrder { magic }),
        }

        Ok(Self(data.into_boxed_slice()))
    }

    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.0
    }

    #[inline(always)]
    pub fn into_data(self) -> Box<[u8]> {
        self.0
    }

    /// The country code from the header.
    #[inline(always)]
    pub fn country_code(&self) -> u8 {
        self.0[COUNTRY_CODE_OFFSET]
    }

    /// A 32 character hexadecimal digest of the image contents.
    pub fn digest(&self) -> [u8; 32] {
        let hash = twox_hash::XxHash3_128::oneshot(&self.0);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(format!("{hash:032x}").as_bytes());
        digest
    }
}
