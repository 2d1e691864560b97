//! Arena of executable memory for JITs.
//!
//! All of the platform calls that map, protect and unmap memory live in this crate. Generated
//! code is written through a read-write view and then flipped to read-exec, and nothing is ever
//! both writable and executable at the same time.
use easyerr::Error;
use std::marker::PhantomData;
use std::ptr::NonNull;

#[cfg(target_family = "unix")]
use rustix::mm::{self as mman, MapFlags, MprotectFlags, ProtFlags};
#[cfg(target_family = "windows")]
use windows::Win32::System::{
    Diagnostics::Debug::FlushInstructionCache, Memory, Threading::GetCurrentProcess,
};

const REGION_MIN_LEN: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to reserve a region of {len} bytes")]
    Reserve { len: usize },
    #[error("failed to change the protection of a region at {addr:#X}")]
    Protect { addr: usize },
    #[error("allocations must not be empty")]
    EmptyAllocation,
}

/// A memory mapped region.
#[derive(Debug, Clone, Copy)]
struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: changing the protection can be done from any thread
unsafe impl Send for Region {}

impl Region {
    fn new(addr_hint: Option<usize>, len: usize) -> Result<Self, MapError> {
        let len = len.max(REGION_MIN_LEN).next_multiple_of(REGION_MIN_LEN);

        #[cfg(target_family = "unix")]
        let region = unsafe {
            mman::mmap_anonymous(
                addr_hint
                    .map(std::ptr::without_provenance_mut)
                    .unwrap_or_default(),
                len,
                ProtFlags::empty(),
                MapFlags::PRIVATE,
            )
        }
        .map_err(|_| MapError::Reserve { len })?;

        #[cfg(target_family = "windows")]
        let region = unsafe {
            let hint = addr_hint.map(|addr| std::ptr::without_provenance(addr));
            let result = Memory::VirtualAlloc(
                hint,
                len,
                Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                Memory::PAGE_NOACCESS,
            );

            if result.is_null() {
                Memory::VirtualAlloc(
                    None,
                    len,
                    Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                    Memory::PAGE_NOACCESS,
                )
            } else {
                result
            }
        };

        let ptr = NonNull::new(region.cast()).ok_or(MapError::Reserve { len })?;
        Ok(Self { ptr, len })
    }

    /// Changes the protection of the first `length` bytes of this region.
    unsafe fn protect(&self, length: usize, protection: Protection) -> Result<(), MapError> {
        if length == 0 {
            return Ok(());
        }

        let err = || MapError::Protect {
            addr: self.ptr.addr().get(),
        };

        #[cfg(target_family = "unix")]
        unsafe {
            let flags = match protection {
                Protection::ReadExec => MprotectFlags::READ | MprotectFlags::EXEC,
                Protection::ReadWrite => MprotectFlags::READ | MprotectFlags::WRITE,
            };

            mman::mprotect(self.ptr.as_ptr().cast(), length, flags).map_err(|_| err())?;
        }

        #[cfg(target_family = "windows")]
        unsafe {
            let mut previous = Memory::PAGE_PROTECTION_FLAGS(0);
            let flags = match protection {
                Protection::ReadExec => Memory::PAGE_EXECUTE_READ,
                Protection::ReadWrite => Memory::PAGE_READWRITE,
            };

            Memory::VirtualProtect(self.ptr.as_ptr().cast(), length, flags, &raw mut previous)
                .map_err(|_| err())?;
        }

        Ok(())
    }

    /// Unmaps this region.
    ///
    /// # Safety
    /// No allocation from this region may be used afterwards.
    unsafe fn free(self) {
        #[cfg(target_family = "unix")]
        let result = unsafe { mman::munmap(self.ptr.as_ptr().cast(), self.len) };

        #[cfg(target_family = "windows")]
        let result = unsafe { Memory::VirtualFree(self.ptr.as_ptr().cast(), 0, Memory::MEM_RELEASE) };

        debug_assert!(result.is_ok(), "failed to unmap region");
    }
}

/// # Safety considerations
/// The allocator this allocation comes from must not be modified while the allocation
/// is accessed, and must outlive it. Resetting or dropping the allocator invalidates every
/// allocation it handed out.
pub struct Allocation<K>(NonNull<[u8]>, PhantomData<K>);

impl<K> Allocation<K> {
    /// Returns a pointer to the allocation.
    ///
    /// # Safety
    /// In order to access the data behind the pointer, accesses to the underlying allocator must
    /// be synchronized, as stated in the type docs.
    #[inline(always)]
    pub unsafe fn as_ptr(&self) -> NonNull<[u8]> {
        self.0
    }

    /// Length of this allocation, in bytes.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// SAFETY: safe to send to another thread as long as accesses to the allocation are synchronized
// with accesses to the allocator, which is the user's responsibility
unsafe impl<K> Send for Allocation<K> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadExec,
    ReadWrite,
}

pub trait AllocKind {
    const PROTECTION: Protection;
}

/// Allocations holding machine code.
pub struct Exec;
impl AllocKind for Exec {
    const PROTECTION: Protection = Protection::ReadExec;
}

/// Allocations holding data the machine code reads and writes.
pub struct ReadWrite;
impl AllocKind for ReadWrite {
    const PROTECTION: Protection = Protection::ReadWrite;
}

/// A bump allocator over mapped regions. Allocations are never freed individually: the whole
/// arena is released at once with [`Allocator::reset`] or when dropped.
pub struct Allocator<K> {
    /// Every region mapped so far. The last one is the active region.
    regions: Vec<Region>,
    /// Offset into the active region
    offset: usize,
    /// Phantom
    _phantom: PhantomData<K>,
}

// SAFETY: regions are only touched through `&mut self`
unsafe impl<K> Send for Allocator<K> {}

impl<K> Default for Allocator<K>
where
    K: AllocKind,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Allocator<K>
where
    K: AllocKind,
{
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
            offset: 0,
            _phantom: PhantomData,
        }
    }

    /// Total amount of bytes handed out from the active region plus the size of every retired
    /// region.
    pub fn used(&self) -> usize {
        let retired: usize = self
            .regions
            .iter()
            .rev()
            .skip(1)
            .map(|region| region.len)
            .sum();

        retired + self.offset
    }

    fn map_region(&mut self, length: usize) -> Result<Region, MapError> {
        let hint = self
            .regions
            .last()
            .map(|region| region.ptr.addr().get() + region.len);

        let region = Region::new(hint, length)?;
        self.regions.push(region);
        self.offset = 0;

        Ok(region)
    }

    fn allocate_inner(
        &mut self,
        alignment: usize,
        length: usize,
    ) -> Result<(Region, Allocation<K>), MapError> {
        if length == 0 {
            return Err(MapError::EmptyAllocation);
        }

        let alignment = alignment.max(1).next_power_of_two();
        let effective_offset = self.offset.next_multiple_of(alignment);

        let (region, start) = match self.regions.last().copied() {
            Some(region) if region.len.saturating_sub(effective_offset) >= length => {
                (region, effective_offset)
            }
            _ => (self.map_region(length)?, 0),
        };

        self.offset = start + length;

        // SAFETY: start + length is within the region
        let ptr = unsafe { region.ptr.add(start) };
        Ok((
            region,
            Allocation(NonNull::slice_from_raw_parts(ptr, length), PhantomData),
        ))
    }

    /// Allocates `length` bytes with the given alignment without initializing them.
    pub fn allocate_uninit(
        &mut self,
        alignment: usize,
        length: usize,
    ) -> Result<Allocation<K>, MapError> {
        let (region, alloc) = self.allocate_inner(alignment, length)?;
        unsafe { region.protect(self.offset, K::PROTECTION)? };

        Ok(alloc)
    }

    /// Allocates a copy of `data` with the given alignment.
    pub fn allocate(&mut self, alignment: usize, data: &[u8]) -> Result<Allocation<K>, MapError> {
        let (region, alloc) = self.allocate_inner(alignment, data.len())?;

        unsafe {
            region.protect(self.offset, Protection::ReadWrite)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), alloc.0.as_ptr().cast(), data.len());
            if K::PROTECTION != Protection::ReadWrite {
                region.protect(self.offset, K::PROTECTION)?;
            }

            #[cfg(target_family = "windows")]
            {
                let process = GetCurrentProcess();
                FlushInstructionCache(process, Some(alloc.0.as_ptr().cast()), data.len())
                    .map_err(|_| MapError::Protect {
                        addr: alloc.0.addr().get(),
                    })?;
            }
        }

        Ok(alloc)
    }

    /// Releases every region of this arena.
    ///
    /// # Safety
    /// No allocation handed out by this allocator may be used afterwards.
    pub unsafe fn reset(&mut self) {
        for region in self.regions.drain(..) {
            unsafe { region.free() };
        }

        self.offset = 0;
    }
}

impl<K> Drop for Allocator<K> {
    fn drop(&mut self) {
        for region in self.regions.drain(..) {
            // SAFETY: the allocator outlives its allocations
            unsafe { region.free() };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn data_allocations_are_writable() {
        let mut alloc = Allocator::<ReadWrite>::new();
        let a = alloc.allocate(8, &[1, 2, 3, 4]).unwrap();
        let b = alloc.allocate_uninit(64, 16).unwrap();

        unsafe {
            let a = a.as_ptr().as_ptr().cast::<u8>();
            assert_eq!(*a.add(3), 4);
            *a = 9;
            assert_eq!(*a, 9);

            let b = b.as_ptr();
            assert_eq!(b.cast::<u8>().addr().get() % 64, 0);
            b.cast::<u8>().write_bytes(0xFF, 16);
        }
    }

    #[test]
    fn large_allocations_map_new_regions() {
        let mut alloc = Allocator::<ReadWrite>::new();
        alloc.allocate_uninit(1, 100).unwrap();
        alloc.allocate_uninit(1, REGION_MIN_LEN).unwrap();
        assert_eq!(alloc.regions.len(), 2);

        unsafe { alloc.reset() };
        assert!(alloc.regions.is_empty());
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn empty_allocations_are_rejected() {
        let mut alloc = Allocator::<Exec>::new();
        assert!(matches!(
            alloc.allocate(16, &[]),
            Err(MapError::EmptyAllocation)
        ));
    }
}
