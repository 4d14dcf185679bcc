//! Scalar (per-element) kernels over typed block buffers.
//!
//! Every kernel takes operands that the block evaluator has already
//! coerced to one common dtype, so each function body is a single dtype
//! dispatch into a tight loop. Integer arithmetic wraps; integer division
//! and modulo by zero produce zero; float arithmetic is IEEE; comparisons
//! on NaN are false, matching a plain loop in C.

use std::cmp::Ordering;

use num_complex::Complex;
use num_traits::{
    CheckedRem, Float, PrimInt, WrappingAdd, WrappingMul, WrappingNeg, WrappingShl, WrappingShr,
    WrappingSub,
};

use blockexpr_core::{BinaryOp, Builtin, CmpOp, UlpMode, UnaryOp};

use crate::buffer::{Buffer, Scalar};
use crate::kernels::simd::{self, SimdUnary};

// ---------------------------------------------------------------------------
// binary arithmetic / bitwise / logical
// ---------------------------------------------------------------------------

fn int_binary<T>(op: BinaryOp, a: &[T], b: &[T], o: &mut [T])
where
    T: PrimInt
        + WrappingAdd
        + WrappingSub
        + WrappingMul
        + WrappingShl
        + WrappingShr
        + CheckedRem,
{
    let n = o.len();
    match op {
        BinaryOp::Add => (0..n).for_each(|i| o[i] = a[i].wrapping_add(&b[i])),
        BinaryOp::Sub => (0..n).for_each(|i| o[i] = a[i].wrapping_sub(&b[i])),
        BinaryOp::Mul => (0..n).for_each(|i| o[i] = a[i].wrapping_mul(&b[i])),
        BinaryOp::Div => {
            (0..n).for_each(|i| o[i] = a[i].checked_div(&b[i]).unwrap_or_else(T::zero))
        }
        BinaryOp::Mod => {
            (0..n).for_each(|i| o[i] = a[i].checked_rem(&b[i]).unwrap_or_else(T::zero))
        }
        BinaryOp::Pow => (0..n).for_each(|i| o[i] = ipow(a[i], b[i])),
        BinaryOp::BitAnd => (0..n).for_each(|i| o[i] = a[i] & b[i]),
        BinaryOp::BitOr => (0..n).for_each(|i| o[i] = a[i] | b[i]),
        BinaryOp::BitXor => (0..n).for_each(|i| o[i] = a[i] ^ b[i]),
        BinaryOp::Shl => {
            (0..n).for_each(|i| o[i] = a[i].wrapping_shl(b[i].to_i64().unwrap_or(0) as u32))
        }
        BinaryOp::Shr => {
            (0..n).for_each(|i| o[i] = a[i].wrapping_shr(b[i].to_i64().unwrap_or(0) as u32))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical op on integers"),
    }
}

/// Integer power by squaring, wrapping on overflow. Negative exponents
/// follow the C convention: `1**e == 1`, `(-1)**e` alternates, anything
/// else truncates to zero.
pub(crate) fn ipow<T>(base: T, exp: T) -> T
where
    T: PrimInt + WrappingSub + WrappingMul,
{
    if exp < T::zero() {
        if base == T::one() {
            return T::one();
        }
        let minus_one = T::zero().wrapping_sub(&T::one());
        if base == minus_one {
            return if exp & T::one() == T::one() {
                minus_one
            } else {
                T::one()
            };
        }
        return T::zero();
    }
    let mut acc = T::one();
    let mut base = base;
    let mut e = exp.to_u64().unwrap_or(0);
    while e > 0 {
        if e & 1 == 1 {
            acc = acc.wrapping_mul(&base);
        }
        base = base.wrapping_mul(&base);
        e >>= 1;
    }
    acc
}

fn float_binary<T: Float>(op: BinaryOp, a: &[T], b: &[T], o: &mut [T]) {
    let n = o.len();
    match op {
        BinaryOp::Add => (0..n).for_each(|i| o[i] = a[i] + b[i]),
        BinaryOp::Sub => (0..n).for_each(|i| o[i] = a[i] - b[i]),
        BinaryOp::Mul => (0..n).for_each(|i| o[i] = a[i] * b[i]),
        BinaryOp::Div => (0..n).for_each(|i| o[i] = a[i] / b[i]),
        BinaryOp::Mod => (0..n).for_each(|i| o[i] = a[i] % b[i]),
        BinaryOp::Pow => (0..n).for_each(|i| o[i] = a[i].powf(b[i])),
        _ => unreachable!("bitwise/logical op on floats"),
    }
}

fn complex_binary<T: Float>(op: BinaryOp, a: &[Complex<T>], b: &[Complex<T>], o: &mut [Complex<T>]) {
    let n = o.len();
    match op {
        BinaryOp::Add => (0..n).for_each(|i| o[i] = a[i] + b[i]),
        BinaryOp::Sub => (0..n).for_each(|i| o[i] = a[i] - b[i]),
        BinaryOp::Mul => (0..n).for_each(|i| o[i] = a[i] * b[i]),
        BinaryOp::Div => (0..n).for_each(|i| o[i] = a[i] / b[i]),
        BinaryOp::Pow => (0..n).for_each(|i| o[i] = a[i].powc(b[i])),
        _ => unreachable!("unsupported complex op"),
    }
}

fn bool_binary(op: BinaryOp, a: &[bool], b: &[bool], o: &mut [bool]) {
    let n = o.len();
    match op {
        BinaryOp::And | BinaryOp::BitAnd => (0..n).for_each(|i| o[i] = a[i] && b[i]),
        BinaryOp::Or | BinaryOp::BitOr => (0..n).for_each(|i| o[i] = a[i] || b[i]),
        BinaryOp::BitXor => (0..n).for_each(|i| o[i] = a[i] != b[i]),
        other => unreachable!("op {other:?} on bool"),
    }
}

/// Element-wise binary kernel. Operands and output carry the promoted
/// dtype (output dtype equals operand dtype for every arithmetic op).
pub fn binary(op: BinaryOp, a: &Buffer, b: &Buffer, out: &mut Buffer) {
    match (a, b, out) {
        (Buffer::Bool(x), Buffer::Bool(y), Buffer::Bool(o)) => bool_binary(op, x, y, o),
        (Buffer::I8(x), Buffer::I8(y), Buffer::I8(o)) => int_binary(op, x, y, o),
        (Buffer::I16(x), Buffer::I16(y), Buffer::I16(o)) => int_binary(op, x, y, o),
        (Buffer::I32(x), Buffer::I32(y), Buffer::I32(o)) => int_binary(op, x, y, o),
        (Buffer::I64(x), Buffer::I64(y), Buffer::I64(o)) => int_binary(op, x, y, o),
        (Buffer::U8(x), Buffer::U8(y), Buffer::U8(o)) => int_binary(op, x, y, o),
        (Buffer::U16(x), Buffer::U16(y), Buffer::U16(o)) => int_binary(op, x, y, o),
        (Buffer::U32(x), Buffer::U32(y), Buffer::U32(o)) => int_binary(op, x, y, o),
        (Buffer::U64(x), Buffer::U64(y), Buffer::U64(o)) => int_binary(op, x, y, o),
        (Buffer::F32(x), Buffer::F32(y), Buffer::F32(o)) => float_binary(op, x, y, o),
        (Buffer::F64(x), Buffer::F64(y), Buffer::F64(o)) => float_binary(op, x, y, o),
        (Buffer::C64(x), Buffer::C64(y), Buffer::C64(o)) => complex_binary(op, x, y, o),
        (Buffer::C128(x), Buffer::C128(y), Buffer::C128(o)) => complex_binary(op, x, y, o),
        _ => unreachable!("binary kernel dtype mismatch"),
    }
}

// ---------------------------------------------------------------------------
// comparisons
// ---------------------------------------------------------------------------

fn cmp_real<T: PartialOrd + Copy>(op: CmpOp, a: &[T], b: &[T], o: &mut [bool]) {
    let n = o.len();
    match op {
        CmpOp::Lt => (0..n).for_each(|i| o[i] = a[i] < b[i]),
        CmpOp::Le => (0..n).for_each(|i| o[i] = a[i] <= b[i]),
        CmpOp::Eq => (0..n).for_each(|i| o[i] = a[i] == b[i]),
        CmpOp::Ne => (0..n).for_each(|i| o[i] = a[i] != b[i]),
        CmpOp::Ge => (0..n).for_each(|i| o[i] = a[i] >= b[i]),
        CmpOp::Gt => (0..n).for_each(|i| o[i] = a[i] > b[i]),
    }
}

fn cmp_complex<T: Float>(op: CmpOp, a: &[Complex<T>], b: &[Complex<T>], o: &mut [bool]) {
    let n = o.len();
    match op {
        CmpOp::Eq => (0..n).for_each(|i| o[i] = a[i] == b[i]),
        CmpOp::Ne => (0..n).for_each(|i| o[i] = a[i] != b[i]),
        _ => unreachable!("ordering comparison on complex"),
    }
}

/// Bytewise ordering with the shorter operand zero-padded, the defined
/// semantics for fixed-length code-point strings of unequal itemsize.
fn str_ordering(a: &[u8], b: &[u8]) -> Ordering {
    let n = a.len().max(b.len());
    for j in 0..n {
        let x = a.get(j).copied().unwrap_or(0);
        let y = b.get(j).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn cmp_str(op: CmpOp, a: &[u8], ia: usize, b: &[u8], ib: usize, o: &mut [bool]) {
    for (i, out) in o.iter_mut().enumerate() {
        let ord = str_ordering(&a[i * ia..(i + 1) * ia], &b[i * ib..(i + 1) * ib]);
        *out = match op {
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Ge => ord != Ordering::Less,
            CmpOp::Gt => ord == Ordering::Greater,
        };
    }
}

/// Comparison kernel: same-dtype operands, bool output.
pub fn compare(op: CmpOp, a: &Buffer, b: &Buffer, out: &mut Buffer) {
    let Buffer::Bool(o) = out else {
        unreachable!("comparison output must be bool")
    };
    match (a, b) {
        (Buffer::Bool(x), Buffer::Bool(y)) => cmp_real(op, x, y, o),
        (Buffer::I8(x), Buffer::I8(y)) => cmp_real(op, x, y, o),
        (Buffer::I16(x), Buffer::I16(y)) => cmp_real(op, x, y, o),
        (Buffer::I32(x), Buffer::I32(y)) => cmp_real(op, x, y, o),
        (Buffer::I64(x), Buffer::I64(y)) => cmp_real(op, x, y, o),
        (Buffer::U8(x), Buffer::U8(y)) => cmp_real(op, x, y, o),
        (Buffer::U16(x), Buffer::U16(y)) => cmp_real(op, x, y, o),
        (Buffer::U32(x), Buffer::U32(y)) => cmp_real(op, x, y, o),
        (Buffer::U64(x), Buffer::U64(y)) => cmp_real(op, x, y, o),
        (Buffer::F32(x), Buffer::F32(y)) => cmp_real(op, x, y, o),
        (Buffer::F64(x), Buffer::F64(y)) => cmp_real(op, x, y, o),
        (Buffer::C64(x), Buffer::C64(y)) => cmp_complex(op, x, y, o),
        (Buffer::C128(x), Buffer::C128(y)) => cmp_complex(op, x, y, o),
        (
            Buffer::Str { bytes: x, itemsize: ia },
            Buffer::Str { bytes: y, itemsize: ib },
        ) => cmp_str(op, x, *ia, y, *ib, o),
        _ => unreachable!("compare kernel dtype mismatch"),
    }
}

/// Fused predicate reduction: compare and accumulate in one pass, never
/// materializing the bool intermediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusedMode {
    Count,
    Any,
    All,
}

fn fused_real<T: PartialOrd + Copy>(op: CmpOp, a: &[T], b: &[T], mode: FusedMode) -> Scalar {
    let test = |i: usize| -> bool {
        match op {
            CmpOp::Lt => a[i] < b[i],
            CmpOp::Le => a[i] <= b[i],
            CmpOp::Eq => a[i] == b[i],
            CmpOp::Ne => a[i] != b[i],
            CmpOp::Ge => a[i] >= b[i],
            CmpOp::Gt => a[i] > b[i],
        }
    };
    match mode {
        FusedMode::Count => Scalar::Int((0..a.len()).filter(|&i| test(i)).count() as i64),
        FusedMode::Any => Scalar::Bool((0..a.len()).any(test)),
        FusedMode::All => Scalar::Bool((0..a.len()).all(test)),
    }
}

pub fn compare_fused(op: CmpOp, a: &Buffer, b: &Buffer, mode: FusedMode) -> Scalar {
    match (a, b) {
        (Buffer::Bool(x), Buffer::Bool(y)) => fused_real(op, x, y, mode),
        (Buffer::I8(x), Buffer::I8(y)) => fused_real(op, x, y, mode),
        (Buffer::I16(x), Buffer::I16(y)) => fused_real(op, x, y, mode),
        (Buffer::I32(x), Buffer::I32(y)) => fused_real(op, x, y, mode),
        (Buffer::I64(x), Buffer::I64(y)) => fused_real(op, x, y, mode),
        (Buffer::U8(x), Buffer::U8(y)) => fused_real(op, x, y, mode),
        (Buffer::U16(x), Buffer::U16(y)) => fused_real(op, x, y, mode),
        (Buffer::U32(x), Buffer::U32(y)) => fused_real(op, x, y, mode),
        (Buffer::U64(x), Buffer::U64(y)) => fused_real(op, x, y, mode),
        (Buffer::F32(x), Buffer::F32(y)) => fused_real(op, x, y, mode),
        (Buffer::F64(x), Buffer::F64(y)) => fused_real(op, x, y, mode),
        (Buffer::C64(x), Buffer::C64(y)) => {
            let eq: Vec<bool> = x.iter().zip(y).map(|(p, q)| p == q).collect();
            fused_bools(op, &eq, mode)
        }
        (Buffer::C128(x), Buffer::C128(y)) => {
            let eq: Vec<bool> = x.iter().zip(y).map(|(p, q)| p == q).collect();
            fused_bools(op, &eq, mode)
        }
        (
            Buffer::Str { bytes: x, itemsize: ia },
            Buffer::Str { bytes: y, itemsize: ib },
        ) => {
            let n = if *ia == 0 { 0 } else { x.len() / ia };
            let eq: Vec<bool> = (0..n)
                .map(|i| {
                    str_ordering(&x[i * ia..(i + 1) * ia], &y[i * ib..(i + 1) * ib])
                        == Ordering::Equal
                })
                .collect();
            fused_bools(op, &eq, mode)
        }
        _ => unreachable!("fused compare dtype mismatch"),
    }
}

fn fused_bools(op: CmpOp, eq: &[bool], mode: FusedMode) -> Scalar {
    let invert = match op {
        CmpOp::Eq => false,
        CmpOp::Ne => true,
        _ => unreachable!("ordering on complex/str in fused reduction"),
    };
    match mode {
        FusedMode::Count => Scalar::Int(eq.iter().filter(|&&e| e != invert).count() as i64),
        FusedMode::Any => Scalar::Bool(eq.iter().any(|&e| e != invert)),
        FusedMode::All => Scalar::Bool(eq.iter().all(|&e| e != invert)),
    }
}

// ---------------------------------------------------------------------------
// unary
// ---------------------------------------------------------------------------

fn int_neg<T: PrimInt + WrappingNeg>(a: &[T], o: &mut [T]) {
    (0..o.len()).for_each(|i| o[i] = a[i].wrapping_neg());
}

fn int_not<T: PrimInt>(a: &[T], o: &mut [T]) {
    (0..o.len()).for_each(|i| o[i] = !a[i]);
}

pub fn unary(op: UnaryOp, a: &Buffer, out: &mut Buffer) {
    match op {
        UnaryOp::Neg => match (a, out) {
            (Buffer::I8(x), Buffer::I8(o)) => int_neg(x, o),
            (Buffer::I16(x), Buffer::I16(o)) => int_neg(x, o),
            (Buffer::I32(x), Buffer::I32(o)) => int_neg(x, o),
            (Buffer::I64(x), Buffer::I64(o)) => int_neg(x, o),
            (Buffer::U8(x), Buffer::U8(o)) => int_neg(x, o),
            (Buffer::U16(x), Buffer::U16(o)) => int_neg(x, o),
            (Buffer::U32(x), Buffer::U32(o)) => int_neg(x, o),
            (Buffer::U64(x), Buffer::U64(o)) => int_neg(x, o),
            (Buffer::F32(x), Buffer::F32(o)) => (0..o.len()).for_each(|i| o[i] = -x[i]),
            (Buffer::F64(x), Buffer::F64(o)) => (0..o.len()).for_each(|i| o[i] = -x[i]),
            (Buffer::C64(x), Buffer::C64(o)) => (0..o.len()).for_each(|i| o[i] = -x[i]),
            (Buffer::C128(x), Buffer::C128(o)) => (0..o.len()).for_each(|i| o[i] = -x[i]),
            _ => unreachable!("neg dtype mismatch"),
        },
        UnaryOp::BitNot => match (a, out) {
            (Buffer::Bool(x), Buffer::Bool(o)) => (0..o.len()).for_each(|i| o[i] = !x[i]),
            (Buffer::I8(x), Buffer::I8(o)) => int_not(x, o),
            (Buffer::I16(x), Buffer::I16(o)) => int_not(x, o),
            (Buffer::I32(x), Buffer::I32(o)) => int_not(x, o),
            (Buffer::I64(x), Buffer::I64(o)) => int_not(x, o),
            (Buffer::U8(x), Buffer::U8(o)) => int_not(x, o),
            (Buffer::U16(x), Buffer::U16(o)) => int_not(x, o),
            (Buffer::U32(x), Buffer::U32(o)) => int_not(x, o),
            (Buffer::U64(x), Buffer::U64(o)) => int_not(x, o),
            _ => unreachable!("bitnot dtype mismatch"),
        },
        UnaryOp::Not => match (a, out) {
            (Buffer::Bool(x), Buffer::Bool(o)) => (0..o.len()).for_each(|i| o[i] = !x[i]),
            _ => unreachable!("not dtype mismatch"),
        },
    }
}

// ---------------------------------------------------------------------------
// builtins
// ---------------------------------------------------------------------------

pub(crate) fn f64_unary(b: Builtin) -> fn(f64) -> f64 {
    match b {
        Builtin::Sqrt => f64::sqrt,
        Builtin::Cbrt => f64::cbrt,
        Builtin::Abs => f64::abs,
        Builtin::Exp => f64::exp,
        Builtin::Expm1 => f64::exp_m1,
        Builtin::Log => f64::ln,
        Builtin::Log2 => f64::log2,
        Builtin::Log10 => f64::log10,
        Builtin::Log1p => f64::ln_1p,
        Builtin::Sin => f64::sin,
        Builtin::Cos => f64::cos,
        Builtin::Tan => f64::tan,
        Builtin::Asin => f64::asin,
        Builtin::Acos => f64::acos,
        Builtin::Atan => f64::atan,
        Builtin::Sinh => f64::sinh,
        Builtin::Cosh => f64::cosh,
        Builtin::Tanh => f64::tanh,
        Builtin::Asinh => f64::asinh,
        Builtin::Acosh => f64::acosh,
        Builtin::Atanh => f64::atanh,
        Builtin::Ceil => f64::ceil,
        Builtin::Floor => f64::floor,
        Builtin::Round => f64::round,
        Builtin::Trunc => f64::trunc,
        Builtin::Real | Builtin::Conj => |x| x,
        Builtin::Imag => |_| 0.0,
        _ => unreachable!("two-argument builtin in unary kernel"),
    }
}

fn f32_unary(b: Builtin) -> fn(f32) -> f32 {
    match b {
        Builtin::Sqrt => f32::sqrt,
        Builtin::Cbrt => f32::cbrt,
        Builtin::Abs => f32::abs,
        Builtin::Exp => f32::exp,
        Builtin::Expm1 => f32::exp_m1,
        Builtin::Log => f32::ln,
        Builtin::Log2 => f32::log2,
        Builtin::Log10 => f32::log10,
        Builtin::Log1p => f32::ln_1p,
        Builtin::Sin => f32::sin,
        Builtin::Cos => f32::cos,
        Builtin::Tan => f32::tan,
        Builtin::Asin => f32::asin,
        Builtin::Acos => f32::acos,
        Builtin::Atan => f32::atan,
        Builtin::Sinh => f32::sinh,
        Builtin::Cosh => f32::cosh,
        Builtin::Tanh => f32::tanh,
        Builtin::Asinh => f32::asinh,
        Builtin::Acosh => f32::acosh,
        Builtin::Atanh => f32::atanh,
        Builtin::Ceil => f32::ceil,
        Builtin::Floor => f32::floor,
        Builtin::Round => f32::round,
        Builtin::Trunc => f32::trunc,
        Builtin::Real | Builtin::Conj => |x| x,
        Builtin::Imag => |_| 0.0,
        _ => unreachable!("two-argument builtin in unary kernel"),
    }
}

pub(crate) fn complex_unary<T: Float>(b: Builtin, x: Complex<T>) -> Complex<T> {
    match b {
        Builtin::Sqrt => x.sqrt(),
        Builtin::Exp => x.exp(),
        Builtin::Log => x.ln(),
        Builtin::Sin => x.sin(),
        Builtin::Cos => x.cos(),
        Builtin::Tan => x.tan(),
        Builtin::Sinh => x.sinh(),
        Builtin::Cosh => x.cosh(),
        Builtin::Tanh => x.tanh(),
        Builtin::Conj => x.conj(),
        _ => unreachable!("builtin without complex kernel"),
    }
}

fn int_abs_signed<T: PrimInt + WrappingNeg>(a: &[T], o: &mut [T]) {
    (0..o.len()).for_each(|i| {
        o[i] = if a[i] < T::zero() {
            a[i].wrapping_neg()
        } else {
            a[i]
        }
    });
}

/// One-argument builtin kernel. `simd_ok` reflects the per-call
/// `force_scalar` flag; `ulp` picks between SIMD approximations and the
/// scalar libm-accuracy paths.
pub fn builtin1(b: Builtin, a: &Buffer, out: &mut Buffer, simd_ok: bool, ulp: UlpMode) {
    match (a, out) {
        (Buffer::F32(x), Buffer::F32(o)) => {
            if simd_ok {
                if let Some(op) = SimdUnary::select(b, true, ulp) {
                    simd::unary_f32(op, x, o);
                    return;
                }
            }
            let f = f32_unary(b);
            (0..o.len()).for_each(|i| o[i] = f(x[i]));
        }
        (Buffer::F64(x), Buffer::F64(o)) => {
            if simd_ok {
                if let Some(op) = SimdUnary::select(b, false, ulp) {
                    simd::unary_f64(op, x, o);
                    return;
                }
            }
            let f = f64_unary(b);
            (0..o.len()).for_each(|i| o[i] = f(x[i]));
        }

        // abs and the rounding family are identities on bool.
        (Buffer::Bool(x), Buffer::Bool(o)) => o.copy_from_slice(x),

        // Integer identities and abs.
        (Buffer::I8(x), Buffer::I8(o)) => int_builtin(b, x, o, true),
        (Buffer::I16(x), Buffer::I16(o)) => int_builtin(b, x, o, true),
        (Buffer::I32(x), Buffer::I32(o)) => int_builtin(b, x, o, true),
        (Buffer::I64(x), Buffer::I64(o)) => int_builtin(b, x, o, true),
        (Buffer::U8(x), Buffer::U8(o)) => int_builtin(b, x, o, false),
        (Buffer::U16(x), Buffer::U16(o)) => int_builtin(b, x, o, false),
        (Buffer::U32(x), Buffer::U32(o)) => int_builtin(b, x, o, false),
        (Buffer::U64(x), Buffer::U64(o)) => int_builtin(b, x, o, false),

        // Complex in, complex out.
        (Buffer::C64(x), Buffer::C64(o)) => {
            (0..o.len()).for_each(|i| o[i] = complex_unary(b, x[i]))
        }
        (Buffer::C128(x), Buffer::C128(o)) => {
            (0..o.len()).for_each(|i| o[i] = complex_unary(b, x[i]))
        }

        // Complex in, real out: abs / real / imag.
        (Buffer::C64(x), Buffer::F32(o)) => match b {
            Builtin::Abs => (0..o.len()).for_each(|i| o[i] = x[i].norm()),
            Builtin::Real => (0..o.len()).for_each(|i| o[i] = x[i].re),
            Builtin::Imag => (0..o.len()).for_each(|i| o[i] = x[i].im),
            other => unreachable!("complex-to-real builtin {other:?}"),
        },
        (Buffer::C128(x), Buffer::F64(o)) => match b {
            Builtin::Abs => (0..o.len()).for_each(|i| o[i] = x[i].norm()),
            Builtin::Real => (0..o.len()).for_each(|i| o[i] = x[i].re),
            Builtin::Imag => (0..o.len()).for_each(|i| o[i] = x[i].im),
            other => unreachable!("complex-to-real builtin {other:?}"),
        },

        _ => unreachable!("builtin1 dtype mismatch for {b:?}"),
    }
}

fn int_builtin<T: PrimInt + WrappingNeg>(b: Builtin, a: &[T], o: &mut [T], signed: bool) {
    match b {
        Builtin::Abs if signed => int_abs_signed(a, o),
        // abs on unsigned and the rounding family are identities on
        // integers, as are real and conj.
        Builtin::Abs
        | Builtin::Ceil
        | Builtin::Floor
        | Builtin::Round
        | Builtin::Trunc
        | Builtin::Real
        | Builtin::Conj => o.copy_from_slice(a),
        other => unreachable!("integer builtin {other:?}"),
    }
}

/// Two-argument builtin kernel.
pub fn builtin2(b: Builtin, a0: &Buffer, a1: &Buffer, out: &mut Buffer) {
    match (a0, a1, out) {
        (Buffer::F32(x), Buffer::F32(y), Buffer::F32(o)) => {
            let f: fn(f32, f32) -> f32 = match b {
                Builtin::Atan2 => f32::atan2,
                Builtin::Pow => f32::powf,
                Builtin::Fmod => |a, b| a % b,
                Builtin::Hypot => f32::hypot,
                other => unreachable!("one-argument builtin {other:?}"),
            };
            (0..o.len()).for_each(|i| o[i] = f(x[i], y[i]));
        }
        (Buffer::F64(x), Buffer::F64(y), Buffer::F64(o)) => {
            let f: fn(f64, f64) -> f64 = match b {
                Builtin::Atan2 => f64::atan2,
                Builtin::Pow => f64::powf,
                Builtin::Fmod => |a, b| a % b,
                Builtin::Hypot => f64::hypot,
                other => unreachable!("one-argument builtin {other:?}"),
            };
            (0..o.len()).for_each(|i| o[i] = f(x[i], y[i]));
        }
        (Buffer::C64(x), Buffer::C64(y), Buffer::C64(o)) if b == Builtin::Pow => {
            (0..o.len()).for_each(|i| o[i] = x[i].powc(y[i]));
        }
        (Buffer::C128(x), Buffer::C128(y), Buffer::C128(o)) if b == Builtin::Pow => {
            (0..o.len()).for_each(|i| o[i] = x[i].powc(y[i]));
        }
        _ => unreachable!("builtin2 dtype mismatch for {b:?}"),
    }
}

// ---------------------------------------------------------------------------
// casts, blends, fills
// ---------------------------------------------------------------------------

macro_rules! cast_from_real {
    ($s:expr, $dst:expr) => {{
        let s = $s;
        match $dst {
            Buffer::Bool(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| (v as f64) != 0.0));
            }
            Buffer::I8(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as i8));
            }
            Buffer::I16(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as i16));
            }
            Buffer::I32(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as i32));
            }
            Buffer::I64(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as i64));
            }
            Buffer::U8(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as u8));
            }
            Buffer::U16(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as u16));
            }
            Buffer::U32(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as u32));
            }
            Buffer::U64(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as u64));
            }
            Buffer::F32(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as f32));
            }
            Buffer::F64(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v as f64));
            }
            Buffer::C64(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| Complex::new(v as f32, 0.0)));
            }
            Buffer::C128(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| Complex::new(v as f64, 0.0)));
            }
            Buffer::Str { .. } => unreachable!("cast to str"),
        }
    }};
}

/// Conversion kernel between any two numeric dtypes. Float-to-int
/// truncates toward zero (saturating at the integer bounds), numeric to
/// bool is "not equal to zero", complex to real discards the imaginary
/// part.
pub fn cast(src: &Buffer, dst: &mut Buffer) {
    if src.dtype() == dst.dtype() {
        dst.clone_from(src);
        return;
    }
    match src {
        Buffer::Bool(s) => {
            // bool widens through u8 (Rust allows bool casts to integers
            // only).
            let widened: Vec<u8> = s.iter().map(|&v| v as u8).collect();
            cast_from_real!(&widened, dst)
        }
        Buffer::I8(s) => cast_from_real!(s, dst),
        Buffer::I16(s) => cast_from_real!(s, dst),
        Buffer::I32(s) => cast_from_real!(s, dst),
        Buffer::I64(s) => cast_from_real!(s, dst),
        Buffer::U8(s) => cast_from_real!(s, dst),
        Buffer::U16(s) => cast_from_real!(s, dst),
        Buffer::U32(s) => cast_from_real!(s, dst),
        Buffer::U64(s) => cast_from_real!(s, dst),
        Buffer::F32(s) => cast_from_real!(s, dst),
        Buffer::F64(s) => cast_from_real!(s, dst),
        Buffer::C64(s) => match dst {
            Buffer::C128(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| Complex::new(v.re as f64, v.im as f64)));
            }
            Buffer::Bool(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v.re != 0.0 || v.im != 0.0));
            }
            Buffer::F32(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v.re));
            }
            Buffer::F64(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v.re as f64));
            }
            other => {
                // Two-step: through the f32 real part.
                let re: Vec<f32> = s.iter().map(|&v| v.re).collect();
                cast_from_real!(&re, other)
            }
        },
        Buffer::C128(s) => match dst {
            Buffer::C64(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| Complex::new(v.re as f32, v.im as f32)));
            }
            Buffer::Bool(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v.re != 0.0 || v.im != 0.0));
            }
            Buffer::F64(d) => {
                d.clear();
                d.extend(s.iter().map(|&v| v.re));
            }
            other => {
                let re: Vec<f64> = s.iter().map(|&v| v.re).collect();
                cast_from_real!(&re, other)
            }
        },
        Buffer::Str { .. } => unreachable!("cast from str"),
    }
}

/// Masked select: `out[i] = if mask[i] { t[i] } else { f[i] }`. All three
/// value buffers carry the same dtype.
pub fn blend(mask: &[bool], t: &Buffer, f: &Buffer, out: &mut Buffer) {
    macro_rules! blend_arm {
        ($t:expr, $f:expr, $o:expr) => {{
            let (t, f, o) = ($t, $f, $o);
            for i in 0..mask.len() {
                o[i] = if mask[i] { t[i] } else { f[i] };
            }
        }};
    }
    match (t, f, out) {
        (Buffer::Bool(t), Buffer::Bool(f), Buffer::Bool(o)) => blend_arm!(t, f, o),
        (Buffer::I8(t), Buffer::I8(f), Buffer::I8(o)) => blend_arm!(t, f, o),
        (Buffer::I16(t), Buffer::I16(f), Buffer::I16(o)) => blend_arm!(t, f, o),
        (Buffer::I32(t), Buffer::I32(f), Buffer::I32(o)) => blend_arm!(t, f, o),
        (Buffer::I64(t), Buffer::I64(f), Buffer::I64(o)) => blend_arm!(t, f, o),
        (Buffer::U8(t), Buffer::U8(f), Buffer::U8(o)) => blend_arm!(t, f, o),
        (Buffer::U16(t), Buffer::U16(f), Buffer::U16(o)) => blend_arm!(t, f, o),
        (Buffer::U32(t), Buffer::U32(f), Buffer::U32(o)) => blend_arm!(t, f, o),
        (Buffer::U64(t), Buffer::U64(f), Buffer::U64(o)) => blend_arm!(t, f, o),
        (Buffer::F32(t), Buffer::F32(f), Buffer::F32(o)) => blend_arm!(t, f, o),
        (Buffer::F64(t), Buffer::F64(f), Buffer::F64(o)) => blend_arm!(t, f, o),
        (Buffer::C64(t), Buffer::C64(f), Buffer::C64(o)) => blend_arm!(t, f, o),
        (Buffer::C128(t), Buffer::C128(f), Buffer::C128(o)) => blend_arm!(t, f, o),
        _ => unreachable!("blend dtype mismatch"),
    }
}

/// Broadcast fill of a scalar into every lane.
pub fn fill(out: &mut Buffer, s: Scalar) {
    match out {
        Buffer::Bool(v) => v.fill(s.as_bool()),
        Buffer::I8(v) => v.fill(s.as_i64() as i8),
        Buffer::I16(v) => v.fill(s.as_i64() as i16),
        Buffer::I32(v) => v.fill(s.as_i64() as i32),
        Buffer::I64(v) => v.fill(s.as_i64()),
        Buffer::U8(v) => v.fill(s.as_u64() as u8),
        Buffer::U16(v) => v.fill(s.as_u64() as u16),
        Buffer::U32(v) => v.fill(s.as_u64() as u32),
        Buffer::U64(v) => v.fill(s.as_u64()),
        Buffer::F32(v) => v.fill(s.as_f64() as f32),
        Buffer::F64(v) => v.fill(s.as_f64()),
        Buffer::C64(v) => {
            let c = s.as_complex();
            v.fill(Complex::new(c.re as f32, c.im as f32));
        }
        Buffer::C128(v) => v.fill(s.as_complex()),
        Buffer::Str { .. } => unreachable!("fill str from scalar"),
    }
}
