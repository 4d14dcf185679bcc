//! Narrow wrapper over the `wide` SIMD types.
//!
//! Only the operations with a clear win live here: lane-parallel sqrt and
//! abs (exactly rounded, usable in every ULP mode) and the polynomial
//! sin/cos approximations for f32 (~3.5 ULP, excluded when the caller
//! asks for ~1 ULP accuracy). Everything else stays on the scalar libm
//! paths. Remainder lanes past the last full vector run scalar.

use wide::{f32x8, f64x4};

use blockexpr_core::{Builtin, UlpMode};

/// SIMD-implemented unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdUnary {
    Sqrt,
    Abs,
    Sin,
    Cos,
}

impl SimdUnary {
    /// The SIMD form of a builtin, if one exists for the given element
    /// width and accuracy mode.
    pub fn select(b: Builtin, f32_lanes: bool, ulp: UlpMode) -> Option<SimdUnary> {
        match b {
            // Exactly rounded at any accuracy setting.
            Builtin::Sqrt => Some(SimdUnary::Sqrt),
            Builtin::Abs => Some(SimdUnary::Abs),
            // Polynomial approximations, f32 only, not at ~1 ULP.
            Builtin::Sin if f32_lanes && ulp != UlpMode::Ulp1 => Some(SimdUnary::Sin),
            Builtin::Cos if f32_lanes && ulp != UlpMode::Ulp1 => Some(SimdUnary::Cos),
            _ => None,
        }
    }
}

pub fn unary_f32(op: SimdUnary, src: &[f32], dst: &mut [f32]) {
    debug_assert_eq!(src.len(), dst.len());
    let chunks = src.len() / 8;
    for i in 0..chunks {
        let mut lanes = [0.0f32; 8];
        lanes.copy_from_slice(&src[i * 8..i * 8 + 8]);
        let v = f32x8::from(lanes);
        let r = match op {
            SimdUnary::Sqrt => v.sqrt(),
            SimdUnary::Abs => v.abs(),
            SimdUnary::Sin => v.sin(),
            SimdUnary::Cos => v.cos(),
        };
        dst[i * 8..i * 8 + 8].copy_from_slice(&r.to_array());
    }
    for i in chunks * 8..src.len() {
        dst[i] = match op {
            SimdUnary::Sqrt => src[i].sqrt(),
            SimdUnary::Abs => src[i].abs(),
            SimdUnary::Sin => src[i].sin(),
            SimdUnary::Cos => src[i].cos(),
        };
    }
}

pub fn unary_f64(op: SimdUnary, src: &[f64], dst: &mut [f64]) {
    debug_assert_eq!(src.len(), dst.len());
    let chunks = src.len() / 4;
    for i in 0..chunks {
        let mut lanes = [0.0f64; 4];
        lanes.copy_from_slice(&src[i * 4..i * 4 + 4]);
        let v = f64x4::from(lanes);
        let r = match op {
            SimdUnary::Sqrt => v.sqrt(),
            SimdUnary::Abs => v.abs(),
            // sin/cos stay scalar for f64 lanes; select() never picks them.
            SimdUnary::Sin | SimdUnary::Cos => unreachable!("f64 trig is scalar-only"),
        };
        dst[i * 4..i * 4 + 4].copy_from_slice(&r.to_array());
    }
    for i in chunks * 4..src.len() {
        dst[i] = match op {
            SimdUnary::Sqrt => src[i].sqrt(),
            SimdUnary::Abs => src[i].abs(),
            SimdUnary::Sin | SimdUnary::Cos => unreachable!("f64 trig is scalar-only"),
        };
    }
}
