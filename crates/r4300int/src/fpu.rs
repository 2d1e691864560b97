//! COP1: moves, arithmetic, conversions and compares.
//!
//! Arithmetic uses the host's round-to-nearest. The rounding mode in FCR31 is honoured by
//! conversions to integers. Every operation but `mov` records its exception causes in FCR31 and
//! raises a floating point exception, without writing its result, if one of them is enabled.
use crate::{Flow, gpr};
use cobalt::system::System;
use r4300::{
    Ins, Opcode,
    cop0::Exception,
    cop1::{RoundingMode, fpe},
};
use std::ops::{Add, Div, Mul, Neg, Sub};
use tracing::trace;
use util::sext32;

/// The `fmt` field of single precision instructions.
const FMT_S: u8 = 0x10;

trait Float:
    Copy
    + PartialEq
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    const ZERO: Self;

    fn is_nan(self) -> bool;
    fn is_finite(self) -> bool;
    fn is_subnormal(self) -> bool;
    fn mul_add(self, a: Self, b: Self) -> Self;
    fn sqrt(self) -> Self;
    fn abs(self) -> Self;
}

macro_rules! float {
    ($($ty:ty),*) => {
        $(
            impl Float for $ty {
                const ZERO: Self = 0.0;

                #[inline(always)]
                fn is_nan(self) -> bool {
                    <$ty>::is_nan(self)
                }

                #[inline(always)]
                fn is_finite(self) -> bool {
                    <$ty>::is_finite(self)
                }

                #[inline(always)]
                fn is_subnormal(self) -> bool {
                    <$ty>::is_subnormal(self)
                }

                #[inline(always)]
                fn mul_add(self, a: Self, b: Self) -> Self {
                    <$ty>::mul_add(self, a, b)
                }

                #[inline(always)]
                fn sqrt(self) -> Self {
                    <$ty>::sqrt(self)
                }

                #[inline(always)]
                fn abs(self) -> Self {
                    <$ty>::abs(self)
                }
            }
        )*
    };
}

float!(f32, f64);

/// Causes of a result that needed rounding when `inexact` is set. Tiny inexact results
/// underflow.
fn rounding<F: Float>(result: F, inexact: bool) -> u8 {
    match (inexact, result.is_subnormal() || result == F::ZERO) {
        (false, _) => 0,
        (true, false) => fpe::INEXACT,
        (true, true) => fpe::INEXACT | fpe::UNDERFLOW,
    }
}

fn causes<F: Float>(operands: &[F], result: F, inexact: bool) -> u8 {
    if result.is_nan() || operands.iter().any(|v| v.is_nan()) {
        fpe::INVALID
    } else if !result.is_finite() && operands.iter().all(|v| v.is_finite()) {
        fpe::OVERFLOW | fpe::INEXACT
    } else {
        rounding(result, inexact)
    }
}

fn add<F: Float>(a: F, b: F) -> (F, u8) {
    let sum = a + b;
    let inexact = sum.is_finite() && {
        let b_virtual = sum - a;
        (a - (sum - b_virtual)) + (b - b_virtual) != F::ZERO
    };

    (sum, causes(&[a, b], sum, inexact))
}

fn mul<F: Float>(a: F, b: F) -> (F, u8) {
    let product = a * b;
    let inexact = product.is_finite() && a.mul_add(b, -product) != F::ZERO;
    (product, causes(&[a, b], product, inexact))
}

fn div<F: Float>(a: F, b: F) -> (F, u8) {
    let quotient = a / b;
    if b == F::ZERO && a.is_finite() && a != F::ZERO {
        return (quotient, fpe::DIVISION_BY_ZERO);
    }

    let inexact = quotient.is_finite() && (-quotient).mul_add(b, a) != F::ZERO;
    (quotient, causes(&[a, b], quotient, inexact))
}

fn sqrt<F: Float>(a: F) -> (F, u8) {
    let root = a.sqrt();
    let inexact = root.is_finite() && root.mul_add(root, -a) != F::ZERO;
    (root, causes(&[a], root, inexact))
}

/// `abs` and `neg` are exact, but still reject NaNs.
fn sign<F: Float>(a: F, result: F) -> (F, u8) {
    (result, if a.is_nan() { fpe::INVALID } else { 0 })
}

/// Rounds `value` for a conversion to a signed integer of `bits` bits. The hardware does not
/// implement conversions of NaNs, infinities and out of range values.
fn round_to(mode: RoundingMode, value: f64, bits: i32) -> (f64, u8) {
    let rounded = mode.round(value);
    let limit = 2f64.powi(bits - 1);
    if !(rounded >= -limit && rounded < limit) {
        return (0.0, fpe::UNIMPLEMENTED);
    }

    (rounded, if rounded != value { fpe::INEXACT } else { 0 })
}

/// A result waiting to be written back.
enum Value {
    Single(f32),
    Double(f64),
    Word(u32),
    Long(u64),
}

fn to_word(mode: RoundingMode, value: f64) -> (Value, u8) {
    let (rounded, causes) = round_to(mode, value, 32);
    (Value::Word(rounded as i32 as u32), causes)
}

fn to_long(mode: RoundingMode, value: f64) -> (Value, u8) {
    let (rounded, causes) = round_to(mode, value, 64);
    (Value::Long(rounded as i64 as u64), causes)
}

fn single((value, causes): (f32, u8)) -> (Value, u8) {
    (Value::Single(value), causes)
}

fn double((value, causes): (f64, u8)) -> (Value, u8) {
    (Value::Double(value), causes)
}

fn to_single(value: f64) -> (Value, u8) {
    let result = value as f32;
    let causes = if value.is_nan() {
        fpe::INVALID
    } else if value.is_finite() && !result.is_finite() {
        fpe::OVERFLOW | fpe::INEXACT
    } else {
        rounding(result, result as f64 != value)
    };

    (Value::Single(result), causes)
}

fn from_integer(value: i64, single: bool) -> (Value, u8) {
    if single {
        let result = value as f32;
        (Value::Single(result), rounding(result, result as i128 != value as i128))
    } else {
        let result = value as f64;
        (Value::Double(result), rounding(result, result as i128 != value as i128))
    }
}

#[cold]
fn floating_point_exception(sys: &mut System, ins: Ins) -> Flow {
    trace!(
        pc = ?sys.cpu.pc,
        op = ?ins.op,
        causes = sys.cpu.cop1.causes(),
        "floating point exception"
    );
    sys.raise_exception(Exception::FloatingPoint);
    Flow::Exception
}

pub fn transfer(sys: &mut System, ins: Ins) -> Flow {
    let fr = sys.cpu.fr();
    let rt = gpr(sys, ins.rt());
    let cop1 = &sys.cpu.cop1;

    let value = match ins.op {
        Opcode::Mfc1 => Some(sext32(cop1.word(ins.fs(), fr))),
        Opcode::Dmfc1 => Some(cop1.dword(ins.fs(), fr)),
        Opcode::Cfc1 => match ins.fs() {
            0 => Some(sext32(cop1.fcr0)),
            31 => Some(sext32(cop1.fcr31)),
            _ => None,
        },
        Opcode::Mtc1 => {
            sys.cpu.cop1.set_word(ins.fs(), fr, rt as u32);
            None
        }
        Opcode::Dmtc1 => {
            sys.cpu.cop1.set_dword(ins.fs(), fr, rt);
            None
        }
        Opcode::Ctc1 => {
            if ins.fs() == 31 {
                let cop1 = &mut sys.cpu.cop1;
                cop1.fcr31 = rt as u32;

                // writing an enabled cause traps right away
                let causes = cop1.causes();
                if causes & (cop1.enables() | fpe::UNIMPLEMENTED) != 0 {
                    return floating_point_exception(sys, ins);
                }
            }

            None
        }
        _ => unreachable!("{:?} is not a cop1 transfer", ins.op),
    };

    if let Some(value) = value {
        sys.cpu.set_gpr(ins.rt(), value);
    }

    Flow::Next
}

pub fn arith(sys: &mut System, ins: Ins) -> Flow {
    use Opcode::*;
    use RoundingMode::*;

    let fr = sys.cpu.fr();
    let cop1 = &mut sys.cpu.cop1;
    let current = cop1.fcr31().rounding_mode();
    let (fs, ft, fd) = (ins.fs(), ins.ft(), ins.fd());

    let (s, st) = (cop1.single(fs, fr), cop1.single(ft, fr));
    let (d, dt) = (cop1.double(fs, fr), cop1.double(ft, fr));
    let w = cop1.word(fs, fr) as i32;
    let l = cop1.dword(fs, fr) as i64;

    let (value, causes) = match ins.op {
        MovS => {
            cop1.set_single(fd, fr, s);
            return Flow::Next;
        }
        MovD => {
            cop1.set_double(fd, fr, d);
            return Flow::Next;
        }

        AddS => single(add(s, st)),
        SubS => single(add(s, -st)),
        MulS => single(mul(s, st)),
        DivS => single(div(s, st)),
        SqrtS => single(sqrt(s)),
        AbsS => single(sign(s, s.abs())),
        NegS => single(sign(s, -s)),
        RoundLS => to_long(Nearest, s as f64),
        TruncLS => to_long(Zero, s as f64),
        CeilLS => to_long(PositiveInfinity, s as f64),
        FloorLS => to_long(NegativeInfinity, s as f64),
        RoundWS => to_word(Nearest, s as f64),
        TruncWS => to_word(Zero, s as f64),
        CeilWS => to_word(PositiveInfinity, s as f64),
        FloorWS => to_word(NegativeInfinity, s as f64),
        CvtDS => double(sign(s as f64, s as f64)),
        CvtWS => to_word(current, s as f64),
        CvtLS => to_long(current, s as f64),

        AddD => double(add(d, dt)),
        SubD => double(add(d, -dt)),
        MulD => double(mul(d, dt)),
        DivD => double(div(d, dt)),
        SqrtD => double(sqrt(d)),
        AbsD => double(sign(d, d.abs())),
        NegD => double(sign(d, -d)),
        RoundLD => to_long(Nearest, d),
        TruncLD => to_long(Zero, d),
        CeilLD => to_long(PositiveInfinity, d),
        FloorLD => to_long(NegativeInfinity, d),
        RoundWD => to_word(Nearest, d),
        TruncWD => to_word(Zero, d),
        CeilWD => to_word(PositiveInfinity, d),
        FloorWD => to_word(NegativeInfinity, d),
        CvtSD => to_single(d),
        CvtWD => to_word(current, d),
        CvtLD => to_long(current, d),

        CvtSW => from_integer(w as i64, true),
        CvtDW => from_integer(w as i64, false),
        CvtSL => from_integer(l, true),
        CvtDL => from_integer(l, false),
        _ => unreachable!("{:?} is not a cop1 operation", ins.op),
    };

    if cop1.signal(causes) {
        return floating_point_exception(sys, ins);
    }

    match value {
        Value::Single(value) => cop1.set_single(fd, fr, value),
        Value::Double(value) => cop1.set_double(fd, fr, value),
        Value::Word(value) => cop1.set_word(fd, fr, value),
        Value::Long(value) => cop1.set_dword(fd, fr, value),
    }

    Flow::Next
}

/// `c.cond.fmt`. The low three bits of the condition select which of unordered, equal and less
/// than satisfy it. Signalling compares involving a NaN are invalid operations.
pub fn compare(sys: &mut System, ins: Ins) -> Flow {
    let fr = sys.cpu.fr();
    let cop1 = &mut sys.cpu.cop1;
    let (a, b) = if ins.rs() == FMT_S {
        (
            cop1.single(ins.fs(), fr) as f64,
            cop1.single(ins.ft(), fr) as f64,
        )
    } else {
        (cop1.double(ins.fs(), fr), cop1.double(ins.ft(), fr))
    };

    let cond = ins.cond();
    let unordered = a.is_nan() || b.is_nan();
    let signalling = cond & 0b1000 != 0 && unordered;
    if cop1.signal(if signalling { fpe::INVALID } else { 0 }) {
        return floating_point_exception(sys, ins);
    }

    let result = (cond & 0b001 != 0 && unordered)
        || (cond & 0b010 != 0 && a == b)
        || (cond & 0b100 != 0 && a < b);

    cop1.set_condition(result);
    Flow::Next
}
