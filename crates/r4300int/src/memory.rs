//! Loads and stores. A failed translation has already raised its exception when `System::read` or
//! `System::write` return, so the destination register is left untouched.
use crate::{Flow, gpr};
use cobalt::system::System;
use r4300::{Address, Ins, Opcode};
use util::sext32;

#[inline(always)]
fn effective_address(sys: &System, ins: Ins) -> Address {
    Address(gpr(sys, ins.base()).wrapping_add(ins.simm64()) as u32)
}

/// Merges a misaligned word load into `old`.
fn merge_word_load(op: Opcode, offset: u32, old: u64, word: u32) -> u64 {
    match op {
        Opcode::Lwl => {
            let shift = 8 * offset;
            let kept = (old as u32) & ((1u32 << shift) - 1);
            sext32((word << shift) | kept)
        }
        Opcode::Lwr if offset == 3 => sext32(word),
        Opcode::Lwr => {
            let shift = 8 * (3 - offset);
            (old & !(0xFFFF_FFFF >> shift)) | (word >> shift) as u64
        }
        _ => unreachable!("{op:?} is not a misaligned word load"),
    }
}

/// Merges a misaligned doubleword load into `old`.
fn merge_dword_load(op: Opcode, offset: u32, old: u64, dword: u64) -> u64 {
    match op {
        Opcode::Ldl => {
            let shift = 8 * offset;
            let kept = old & 1u64.checked_shl(shift).map_or(u64::MAX, |r| r - 1);
            (dword << shift) | kept
        }
        Opcode::Ldr => {
            let shift = 8 * (7 - offset);
            let replaced = u64::MAX >> shift;
            (old & !replaced) | (dword >> shift)
        }
        _ => unreachable!("{op:?} is not a misaligned doubleword load"),
    }
}

pub fn load(sys: &mut System, ins: Ins) -> Flow {
    use Opcode::*;

    let addr = effective_address(sys, ins);
    let rt = gpr(sys, ins.rt());
    let fr = sys.cpu.fr();

    let value = match ins.op {
        Lb => sys.read::<u8>(addr).map(|v| v as i8 as u64),
        Lbu => sys.read::<u8>(addr).map(|v| v as u64),
        Lh => sys.read::<u16>(addr).map(|v| v as i16 as u64),
        Lhu => sys.read::<u16>(addr).map(|v| v as u64),
        Lw => sys.read::<u32>(addr).map(sext32),
        Lwu => sys.read::<u32>(addr).map(|v| v as u64),
        Ld => sys.read::<u64>(addr),
        Ll => {
            let value = sys.read::<u32>(addr).map(sext32);
            if value.is_some() {
                sys.cpu.llbit = 1;
            }

            value
        }
        Lwl | Lwr => sys
            .read::<u32>(addr)
            .map(|word| merge_word_load(ins.op, addr.value() & 3, rt, word)),
        Ldl | Ldr => sys
            .read::<u64>(addr)
            .map(|dword| merge_dword_load(ins.op, addr.value() & 7, rt, dword)),
        Lwc1 => {
            let Some(word) = sys.read::<u32>(addr) else {
                return Flow::Exception;
            };

            sys.cpu.cop1.set_word(ins.ft(), fr, word);
            return Flow::Next;
        }
        Ldc1 => {
            let Some(dword) = sys.read::<u64>(addr) else {
                return Flow::Exception;
            };

            sys.cpu.cop1.set_dword(ins.ft(), fr, dword);
            return Flow::Next;
        }
        _ => unreachable!("{:?} is not a load", ins.op),
    };

    match value {
        Some(value) => {
            sys.cpu.set_gpr(ins.rt(), value);
            Flow::Next
        }
        None => Flow::Exception,
    }
}

#[inline(always)]
fn done(ok: bool) -> Flow {
    if ok { Flow::Next } else { Flow::Exception }
}

pub fn store(sys: &mut System, ins: Ins) -> Flow {
    use Opcode::*;

    let addr = effective_address(sys, ins);
    let rt = gpr(sys, ins.rt());
    let fr = sys.cpu.fr();

    match ins.op {
        Sb => done(sys.write(addr, rt as u8)),
        Sh => done(sys.write(addr, rt as u16)),
        Sw => done(sys.write(addr, rt as u32)),
        Sd => done(sys.write(addr, rt)),
        Sc => {
            if sys.cpu.llbit == 0 {
                sys.cpu.set_gpr(ins.rt(), 0);
                return Flow::Next;
            }

            if !sys.write(addr, rt as u32) {
                return Flow::Exception;
            }

            sys.cpu.llbit = 0;
            sys.cpu.set_gpr(ins.rt(), 1);
            Flow::Next
        }
        Swl | Swr => {
            let Some(old) = sys.read::<u32>(addr) else {
                return Flow::Exception;
            };

            let offset = addr.value() & 3;
            let word = if ins.op == Swl {
                let shift = 8 * offset;
                (old & !(0xFFFF_FFFF >> shift)) | ((rt as u32) >> shift)
            } else {
                let shift = 8 * (3 - offset);
                (old & !(0xFFFF_FFFF << shift)) | ((rt as u32) << shift)
            };

            done(sys.write(addr, word))
        }
        Sdl | Sdr => {
            let Some(old) = sys.read::<u64>(addr) else {
                return Flow::Exception;
            };

            let offset = addr.value() & 7;
            let dword = if ins.op == Sdl {
                let shift = 8 * offset;
                (old & !(u64::MAX >> shift)) | (rt >> shift)
            } else {
                let shift = 8 * (7 - offset);
                (old & !(u64::MAX << shift)) | (rt << shift)
            };

            done(sys.write(addr, dword))
        }
        Swc1 => {
            let word = sys.cpu.cop1.word(ins.ft(), fr);
            done(sys.write(addr, word))
        }
        Sdc1 => {
            let dword = sys.cpu.cop1.dword(ins.ft(), fr);
            done(sys.write(addr, dword))
        }
        _ => unreachable!("{:?} is not a store", ins.op),
    }
}
