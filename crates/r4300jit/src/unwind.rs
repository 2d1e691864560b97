//! Registers the unwind tables of compiled code, so that a panic in a hook can unwind through the
//! block that called it.
use cranelift_codegen::isa::{TargetIsa, unwind::UnwindInfo};

/// Why compiled code could not be made unwindable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    /// Only System V style unwind information can be registered.
    Format,
    /// The host has no runtime registration of frame tables.
    #[cfg_attr(unix, allow(dead_code))]
    Host,
    /// Writing the frame table failed.
    Encoding,
}

#[cfg(unix)]
mod frames {
    use super::Unsupported;
    use cranelift_codegen::gimli::{
        RunTimeEndian,
        write::{Address, EhFrame, EndianVec, FrameTable, Writer},
    };
    use cranelift_codegen::isa::{TargetIsa, unwind::UnwindInfo};

    unsafe extern "C" {
        fn __register_frame(fde: *const u8);
        fn __deregister_frame(fde: *const u8);
    }

    /// libgcc walks the table until a zero length entry, libunwind registers a single entry.
    const TERMINATED: bool = cfg!(any(
        all(target_os = "linux", target_env = "gnu"),
        target_os = "freebsd"
    ));

    /// Builds the `.eh_frame` contents for the code at `addr`.
    pub fn eh_frame(
        isa: &dyn TargetIsa,
        addr: usize,
        info: &UnwindInfo,
    ) -> Result<Box<[u8]>, Unsupported> {
        let UnwindInfo::SystemV(info) = info else {
            return Err(Unsupported::Format);
        };

        let cie = isa.create_systemv_cie().ok_or(Unsupported::Format)?;
        let mut table = FrameTable::default();
        let cie = table.add_cie(cie);
        table.add_fde(cie, info.to_fde(Address::Constant(addr as u64)));

        let mut out = EhFrame(EndianVec::new(RunTimeEndian::default()));
        table
            .write_eh_frame(&mut out)
            .map_err(|_| Unsupported::Encoding)?;
        if TERMINATED {
            out.0.write_u32(0).map_err(|_| Unsupported::Encoding)?;
        }

        Ok(out.0.into_vec().into_boxed_slice())
    }

    pub unsafe fn register(table: &[u8]) {
        unsafe { __register_frame(table.as_ptr()) };
    }

    pub unsafe fn deregister(table: &[u8]) {
        unsafe { __deregister_frame(table.as_ptr()) };
    }
}

/// The registered frame table of a compiled block or trampoline. Deregisters it on drop.
#[cfg_attr(not(unix), allow(dead_code))]
pub struct UnwindHandle {
    table: Box<[u8]>,
}

impl UnwindHandle {
    /// Registers `info`, which describes the code placed at `addr`.
    ///
    /// # Safety
    /// `addr` must be the address the code described by `info` lives at, and the code must stay
    /// there for as long as the handle lives.
    #[cfg(unix)]
    pub unsafe fn new(
        isa: &dyn TargetIsa,
        addr: usize,
        info: &UnwindInfo,
    ) -> Result<Self, Unsupported> {
        let table = frames::eh_frame(isa, addr, info)?;
        // SAFETY: the table describes live code, as guaranteed by the caller
        unsafe { frames::register(&table) };
        Ok(Self { table })
    }

    /// # Safety
    /// Always safe, nothing is registered.
    #[cfg(not(unix))]
    pub unsafe fn new(_: &dyn TargetIsa, _: usize, _: &UnwindInfo) -> Result<Self, Unsupported> {
        Err(Unsupported::Host)
    }
}

#[cfg(unix)]
impl Drop for UnwindHandle {
    fn drop(&mut self) {
        // SAFETY: the table was registered in `new`
        unsafe { frames::deregister(&self.table) };
    }
}
