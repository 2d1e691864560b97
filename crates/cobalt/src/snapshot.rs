//! Saving and restoring the whole emulation state.
//!
//! Snapshots are flat little endian buffers. Restoring parses and validates the entire buffer
//! before touching the system, so a failed restore leaves the session exactly as it was.
use crate::{
    cores::ExecutionMode,
    system::{
        System,
        exception::GENERAL_VECTOR,
        mem::{FLASH_LEN, IMEM_OFFSET, PIF_RAM_LEN, RDRAM_LEN, SP_MEM_LEN},
        mmu::PAGE_COUNT,
        peripherals::Peripherals,
        scheduler::Event,
    },
};
use easyerr::Error;
use r4300::{
    Address,
    tlb::{ENTRIES, Entry, Frame},
};
use tracing::{info_span, warn};
use zerocopy::{
    FromBytes,
    little_endian::{U32, U64},
};

pub const MAGIC: [u8; 4] = *b"CBST";
/// The version written by [`System::snapshot`].
pub const VERSION: u32 = 2;
/// Oldest version accepted by [`System::restore`]. Version 1 snapshots may have been taken with
/// the program counter at the general exception vector while a `beq` was pending.
pub const MIN_VERSION: u32 = 1;

/// Maximum length of the event queue section, terminator included.
pub const MAX_EVENT_QUEUE_LEN: usize = 1024;
const EVENT_QUEUE_END: u32 = 0xFFFF_FFFF;

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("snapshot ends unexpectedly")]
    Truncated,
    #[error("snapshot has a bad magic")]
    BadMagic,
    #[error("snapshot version {version} is not supported")]
    UnsupportedVersion { version: u32 },
    #[error("snapshot contains implausible register values")]
    InvalidRegisters,
    #[error("snapshot event queue is not terminated within {MAX_EVENT_QUEUE_LEN} bytes")]
    EventQueueTooLong,
    #[error("snapshot contains unknown event {id:#X}")]
    UnknownEvent { id: u32 },
    #[error("snapshot has {len} bytes of trailing data")]
    TrailingData { len: usize },
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8], RestoreError> {
        let Some((head, tail)) = self.data.split_at_checked(len) else {
            return Err(RestoreError::Truncated);
        };

        self.data = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, RestoreError> {
        let (value, rest) = U32::read_from_prefix(self.data).map_err(|_| RestoreError::Truncated)?;
        self.data = rest;
        Ok(value.get())
    }

    fn u64(&mut self) -> Result<u64, RestoreError> {
        let (value, rest) = U64::read_from_prefix(self.data).map_err(|_| RestoreError::Truncated)?;
        self.data = rest;
        Ok(value.get())
    }

    fn u32s(&mut self, out: &mut [u32]) -> Result<(), RestoreError> {
        for value in out {
            *value = self.u32()?;
        }

        Ok(())
    }
}

#[derive(Default)]
struct Writer {
    data: Vec<u8>,
}

impl Writer {
    fn bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }
}

/// A validated snapshot, borrowing its large sections from the buffer.
struct Parsed<'a> {
    version: u32,
    digest: &'a [u8],
    regs: Peripherals,
    rdram: &'a [u8],
    sp: &'a [u8],
    pif_ram: &'a [u8],
    flash: &'a [u8],
    lut_read: &'a [u8],
    lut_write: &'a [u8],
    llbit: u32,
    gpr: [u64; 32],
    cop0: [u32; 32],
    lo: u64,
    hi: u64,
    fgr: [u64; 32],
    fcr0: u32,
    fcr31: u32,
    tlb: [Entry; ENTRIES],
    pc: Address,
    vi_field: u32,
    events: Vec<(Event, u32)>,
}

fn parse(data: &[u8]) -> Result<Parsed<'_>, RestoreError> {
    let mut reader = Reader { data };

    if reader.bytes(4)? != MAGIC {
        return Err(RestoreError::BadMagic);
    }

    let version = reader.u32()?;
    if !(MIN_VERSION..=VERSION).contains(&version) {
        return Err(RestoreError::UnsupportedVersion { version });
    }

    let digest = reader.bytes(32)?;

    let mut regs = Peripherals::default();
    for block in regs.blocks_mut() {
        reader.u32s(block)?;
    }

    if !regs.si_is_plausible() {
        return Err(RestoreError::InvalidRegisters);
    }

    let rdram = reader.bytes(RDRAM_LEN)?;
    let sp = reader.bytes(SP_MEM_LEN)?;
    let pif_ram = reader.bytes(PIF_RAM_LEN)?;
    let flash = reader.bytes(FLASH_LEN)?;
    let lut_read = reader.bytes(4 * PAGE_COUNT)?;
    let lut_write = reader.bytes(4 * PAGE_COUNT)?;

    let llbit = reader.u32()?;

    let mut gpr = [0; 32];
    for value in &mut gpr {
        *value = reader.u64()?;
    }

    let mut cop0 = [0; 32];
    for value in &mut cop0 {
        *value = reader.u64()? as u32;
    }

    let lo = reader.u64()?;
    let hi = reader.u64()?;

    let mut fgr = [0; 32];
    for value in &mut fgr {
        *value = reader.u64()?;
    }

    let fcr0 = reader.u32()?;
    let fcr31 = reader.u32()?;

    let mut tlb = [Entry::default(); ENTRIES];
    for entry in &mut tlb {
        *entry = read_entry(&mut reader)?;
    }

    let mode = reader.u32()?;
    if ExecutionMode::from_repr(mode).is_none() {
        return Err(RestoreError::InvalidRegisters);
    }

    let pc = Address(reader.u32()?);
    let _next_interrupt = reader.u32()?;
    let _next_vi = reader.u32()?;
    let vi_field = reader.u32()?;

    let mut events = Vec::new();
    let mut queue_len = 0;
    loop {
        queue_len += 4;
        if queue_len > MAX_EVENT_QUEUE_LEN {
            return Err(RestoreError::EventQueueTooLong);
        }

        let id = reader.u32()?;
        if id == EVENT_QUEUE_END {
            break;
        }

        queue_len += 4;
        let deadline = reader.u32()?;
        let event = Event::from_repr(id).ok_or(RestoreError::UnknownEvent { id })?;
        events.push((event, deadline));
    }

    if !reader.data.is_empty() {
        return Err(RestoreError::TrailingData {
            len: reader.data.len(),
        });
    }

    Ok(Parsed {
        version,
        digest,
        regs,
        rdram,
        sp,
        pif_ram,
        flash,
        lut_read,
        lut_write,
        llbit,
        gpr,
        cop0,
        lo,
        hi,
        fgr,
        fcr0,
        fcr31,
        tlb,
        pc,
        vi_field,
        events,
    })
}

fn read_frame(reader: &mut Reader) -> Result<Frame, RestoreError> {
    Ok(Frame {
        pfn: reader.u32()?,
        cache: reader.u32()? as u8,
        dirty: reader.u32()? != 0,
        valid: reader.u32()? != 0,
        start: reader.u32()?,
        end: reader.u32()?,
        phys: reader.u32()?,
    })
}

fn read_entry(reader: &mut Reader) -> Result<Entry, RestoreError> {
    Ok(Entry {
        mask: reader.u32()? as u16,
        vpn2: reader.u32()?,
        global: reader.u32()? != 0,
        asid: reader.u32()? as u8,
        even: read_frame(reader)?,
        odd: read_frame(reader)?,
    })
}

fn write_frame(w: &mut Writer, frame: &Frame) {
    w.u32(frame.pfn);
    w.u32(frame.cache as u32);
    w.u32(frame.dirty as u32);
    w.u32(frame.valid as u32);
    w.u32(frame.start);
    w.u32(frame.end);
    w.u32(frame.phys);
}

fn write_entry(w: &mut Writer, entry: &Entry) {
    w.u32(entry.mask as u32);
    w.u32(entry.vpn2);
    w.u32(entry.global as u32);
    w.u32(entry.asid as u32);
    write_frame(w, &entry.even);
    write_frame(w, &entry.odd);
}

fn copy_table(target: &mut [u32], source: &[u8]) {
    for (value, bytes) in target.iter_mut().zip(source.chunks_exact(4)) {
        *value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
}

impl System {
    /// Serializes the whole state. `mode` identifies the core that was running.
    pub fn snapshot(&self, mode: ExecutionMode) -> Vec<u8> {
        let _span = info_span!("snapshot").entered();

        let mut w = Writer::default();
        w.data.reserve(RDRAM_LEN + 8 * PAGE_COUNT + 0x4000);

        w.bytes(&MAGIC);
        w.u32(VERSION);
        w.bytes(&self.rom_digest);

        for block in self.bus.regs.blocks() {
            block.iter().for_each(|&value| w.u32(value));
        }

        let mem = &self.bus.mem;
        w.bytes(&mem.rdram[..]);
        w.bytes(&mem.sp[..IMEM_OFFSET]);
        w.bytes(&mem.sp[IMEM_OFFSET..]);
        w.bytes(&mem.pif_ram);
        w.bytes(&mem.flash);

        self.mmu.read_table().iter().for_each(|&v| w.u32(v));
        self.mmu.write_table().iter().for_each(|&v| w.u32(v));

        let cpu = &self.cpu;
        w.u32(cpu.llbit);
        cpu.gpr.iter().for_each(|&v| w.u64(v));
        cpu.cop0.regs.iter().for_each(|&v| w.u64(v as u64));
        w.u64(cpu.lo);
        w.u64(cpu.hi);
        cpu.cop1.fgr.iter().for_each(|&v| w.u64(v));
        w.u32(cpu.cop1.fcr0);
        w.u32(cpu.cop1.fcr31);

        for entry in &cpu.tlb.entries {
            write_entry(&mut w, entry);
        }

        w.u32(mode as u32);
        w.u32(cpu.pc.value());

        let count = cpu.cop0.count();
        let deadline = |until: u64| count.wrapping_add(until as u32);
        w.u32(deadline(self.scheduler.until_next().unwrap_or_default()));
        w.u32(deadline(self.scheduler.until(Event::Vi).unwrap_or_default()));
        w.u32(self.vi_field);

        for scheduled in self.scheduler.iter() {
            let until = scheduled.deadline.saturating_sub(self.scheduler.elapsed());
            w.u32(scheduled.event as u32);
            w.u32(deadline(until));
        }
        w.u32(EVENT_QUEUE_END);

        w.data
    }

    /// Restores a snapshot produced by [`System::snapshot`]. On error, the system is left
    /// untouched.
    pub fn restore(&mut self, data: &[u8]) -> Result<(), RestoreError> {
        let _span = info_span!("restore", len = data.len()).entered();
        let parsed = parse(data)?;

        if parsed.digest != self.rom_digest {
            warn!("snapshot was taken with a different ROM");
        }

        self.bus.regs = parsed.regs;
        let mem = &mut self.bus.mem;
        mem.rdram.copy_from_slice(parsed.rdram);
        mem.sp.copy_from_slice(parsed.sp);
        mem.pif_ram.copy_from_slice(parsed.pif_ram);
        mem.flash.copy_from_slice(parsed.flash);

        let (read, write) = self.mmu.tables_mut();
        copy_table(&mut read[..], parsed.lut_read);
        copy_table(&mut write[..], parsed.lut_write);

        let cpu = &mut self.cpu;
        cpu.llbit = parsed.llbit;
        cpu.gpr = parsed.gpr;
        cpu.gpr[0] = 0;
        cpu.cop0.regs = parsed.cop0;
        cpu.lo = parsed.lo;
        cpu.hi = parsed.hi;
        cpu.cop1.fgr = parsed.fgr;
        cpu.cop1.fcr0 = parsed.fcr0;
        cpu.cop1.fcr31 = parsed.fcr31;
        cpu.tlb.entries = parsed.tlb;
        cpu.pc = parsed.pc;
        cpu.delay_slot = false;

        self.vi_field = parsed.vi_field;

        let count = self.cpu.cop0.count();
        self.scheduler = Default::default();
        for (event, deadline) in parsed.events {
            match event {
                Event::Compare => self.schedule_compare(),
                _ => self
                    .scheduler
                    .schedule(event, deadline.wrapping_sub(count) as u64),
            }
        }

        self.legacy_beq_shim = parsed.version == 1 && parsed.pc == GENERAL_VECTOR;
        self.stopped = false;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::{Config, peripherals::si};

    fn system() -> System {
        let mut sys = System::new(Config::default());
        sys.cpu.gpr[3] = 0x1234;
        sys.cpu.pc = Address(0x8000_0400);
        sys.cpu.cop0.set_count(0x100);
        sys.bus.mem.rdram[0x400] = 0xAA;
        sys.bus.regs.vi[2] = 320;
        sys.reset_events();
        sys.scheduler.schedule(Event::Pi, 40);
        sys
    }

    #[test]
    fn round_trip_restores_state() {
        let sys = system();
        let data = sys.snapshot(ExecutionMode::Interpreter);

        let mut other = System::new(Config::default());
        other.restore(&data).unwrap();

        assert_eq!(other.cpu, sys.cpu);
        assert_eq!(other.bus.regs, sys.bus.regs);
        assert_eq!(other.bus.mem.rdram[0x400], 0xAA);
        assert_eq!(other.scheduler.until(Event::Pi), Some(40));
        assert_eq!(
            other.scheduler.until(Event::Vi),
            sys.scheduler.until(Event::Vi)
        );
        assert_eq!(
            other.scheduler.until(Event::Compare),
            sys.scheduler.until(Event::Compare)
        );
        assert!(!other.legacy_beq_shim);
        assert_eq!(other.snapshot(ExecutionMode::Interpreter), data);
    }

    #[test]
    fn restore_resumes_a_stopped_system() {
        let data = system().snapshot(ExecutionMode::Interpreter);
        let mut target = System::new(Config::default());
        target.request_stop();

        assert!(target.restore(&data[..100]).is_err());
        assert!(target.stopped);

        target.restore(&data).unwrap();
        assert!(!target.stopped);
    }

    #[test]
    fn corrupt_snapshots_leave_state_untouched() {
        let data = system().snapshot(ExecutionMode::Recompiler);
        let mut target = System::new(Config::default());
        let before = target.cpu.clone();

        assert!(matches!(target.restore(&data[..100]), Err(RestoreError::Truncated)));

        let mut bad = data.clone();
        bad[0] = b'X';
        assert!(matches!(target.restore(&bad), Err(RestoreError::BadMagic)));

        let mut bad = data.clone();
        bad[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            target.restore(&bad),
            Err(RestoreError::UnsupportedVersion { version: 7 })
        ));

        let mut bad = data.clone();
        bad.push(0);
        assert!(matches!(
            target.restore(&bad),
            Err(RestoreError::TrailingData { len: 1 })
        ));

        assert_eq!(target.cpu, before);
    }

    #[test]
    fn implausible_serial_registers_are_rejected() {
        let mut sys = system();
        sys.bus.regs.si[si::PIF_ADDR_RD64B] = 0x1234;
        let data = sys.snapshot(ExecutionMode::Interpreter);

        let mut target = System::new(Config::default());
        assert!(matches!(
            target.restore(&data),
            Err(RestoreError::InvalidRegisters)
        ));
    }

    #[test]
    fn unterminated_and_unknown_events_are_rejected() {
        let data = system().snapshot(ExecutionMode::Interpreter);
        let mut target = System::new(Config::default());

        // replace the terminator with a long run of events
        let mut bad = data[..data.len() - 4].to_vec();
        for _ in 0..200 {
            bad.extend_from_slice(&(Event::Pi as u32).to_le_bytes());
            bad.extend_from_slice(&0u32.to_le_bytes());
        }
        bad.extend_from_slice(&EVENT_QUEUE_END.to_le_bytes());
        assert!(matches!(
            target.restore(&bad),
            Err(RestoreError::EventQueueTooLong)
        ));

        let mut bad = data[..data.len() - 4].to_vec();
        bad.extend_from_slice(&0x200u32.to_le_bytes());
        bad.extend_from_slice(&0u32.to_le_bytes());
        bad.extend_from_slice(&EVENT_QUEUE_END.to_le_bytes());
        assert!(matches!(
            target.restore(&bad),
            Err(RestoreError::UnknownEvent { id: 0x200 })
        ));
    }

    #[test]
    fn version_one_at_exception_vector_arms_shim() {
        let mut sys = system();
        sys.cpu.pc = Address(GENERAL_VECTOR);
        let mut data = sys.snapshot(ExecutionMode::Interpreter);
        data[4..8].copy_from_slice(&1u32.to_le_bytes());

        let mut target = System::new(Config::default());
        target.restore(&data).unwrap();
        assert!(target.legacy_beq_shim);

        data[4..8].copy_from_slice(&2u32.to_le_bytes());
        target.restore(&data).unwrap();
        assert!(!target.legacy_beq_shim);
    }
}
