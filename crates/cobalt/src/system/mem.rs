//! Memories of the system.
use util::boxed_array;

pub const RDRAM_LEN: usize = 8 * bytesize::MIB as usize;
pub const SP_MEM_LEN: usize = 8 * bytesize::KIB as usize;
pub const PIF_RAM_LEN: usize = 64;
pub const FLASH_LEN: usize = 24;

/// Offset of IMEM inside the SP memory.
pub const IMEM_OFFSET: usize = 0x1000;

/// The memories of the system.
pub struct Memory {
    /// Main memory.
    pub rdram: Box<[u8; RDRAM_LEN]>,
    /// Signal processor data memory followed by its instruction memory.
    pub sp: Box<[u8; SP_MEM_LEN]>,
    /// PIF RAM, used to talk to controllers.
    pub pif_ram: [u8; PIF_RAM_LEN],
    /// Cartridge flash status block.
    pub flash: [u8; FLASH_LEN],
    /// Cartridge ROM, big endian.
    pub rom: Box<[u8]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            rdram: boxed_array(0),
            sp: boxed_array(0),
            pif_ram: [0; PIF_RAM_LEN],
            flash: [0; FLASH_LEN],
            rom: Box::default(),
        }
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("rom", &bytesize::ByteSize(self.rom.len() as u64))
            .finish_non_exhaustive()
    }
}

impl Memory {
    #[inline(always)]
    pub fn dmem(&self) -> &[u8] {
        &self.sp[..IMEM_OFFSET]
    }

    #[inline(always)]
    pub fn imem(&self) -> &[u8] {
        &self.sp[IMEM_OFFSET..]
    }

    /// Writes a big endian word into IMEM.
    #[inline(always)]
    pub fn set_imem_word(&mut self, index: usize, value: u32) {
        let offset = IMEM_OFFSET + 4 * index;
        self.sp[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Returns the 4KB page of RDRAM starting at `phys`, if there is one.
    pub fn rdram_page(&self, phys: u32) -> Option<&[u8]> {
        let start = (phys & !0xFFF) as usize;
        self.rdram.get(start..start + 0x1000)
    }
}
