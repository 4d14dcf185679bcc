//! The runtime math bridge.
//!
//! A table of `extern "C"` function pointers that an emitted kernel calls
//! instead of libm symbols, for hosts where libm is not visible to the
//! loaded image. The field order must match
//! [`crate::emit::BRIDGE_FNS`] exactly; the loader installs the table
//! through the kernel's exported `kernel_set_bridge` symbol.

use std::ffi::c_void;

#[repr(C)]
pub struct MathBridge {
    pub sqrt: extern "C" fn(f64) -> f64,
    pub cbrt: extern "C" fn(f64) -> f64,
    pub fabs: extern "C" fn(f64) -> f64,
    pub exp: extern "C" fn(f64) -> f64,
    pub expm1: extern "C" fn(f64) -> f64,
    pub log: extern "C" fn(f64) -> f64,
    pub log2: extern "C" fn(f64) -> f64,
    pub log10: extern "C" fn(f64) -> f64,
    pub log1p: extern "C" fn(f64) -> f64,
    pub sin: extern "C" fn(f64) -> f64,
    pub cos: extern "C" fn(f64) -> f64,
    pub tan: extern "C" fn(f64) -> f64,
    pub asin: extern "C" fn(f64) -> f64,
    pub acos: extern "C" fn(f64) -> f64,
    pub atan: extern "C" fn(f64) -> f64,
    pub atan2: extern "C" fn(f64, f64) -> f64,
    pub sinh: extern "C" fn(f64) -> f64,
    pub cosh: extern "C" fn(f64) -> f64,
    pub tanh: extern "C" fn(f64) -> f64,
    pub asinh: extern "C" fn(f64) -> f64,
    pub acosh: extern "C" fn(f64) -> f64,
    pub atanh: extern "C" fn(f64) -> f64,
    pub pow: extern "C" fn(f64, f64) -> f64,
    pub fmod: extern "C" fn(f64, f64) -> f64,
    pub hypot: extern "C" fn(f64, f64) -> f64,
    pub ceil: extern "C" fn(f64) -> f64,
    pub floor: extern "C" fn(f64) -> f64,
    pub trunc: extern "C" fn(f64) -> f64,
}

macro_rules! unary_shim {
    ($name:ident, $method:ident) => {
        extern "C" fn $name(x: f64) -> f64 {
            x.$method()
        }
    };
}

macro_rules! binary_shim {
    ($name:ident, $method:ident) => {
        extern "C" fn $name(x: f64, y: f64) -> f64 {
            x.$method(y)
        }
    };
}

unary_shim!(br_sqrt, sqrt);
unary_shim!(br_cbrt, cbrt);
unary_shim!(br_fabs, abs);
unary_shim!(br_exp, exp);
unary_shim!(br_expm1, exp_m1);
unary_shim!(br_log, ln);
unary_shim!(br_log2, log2);
unary_shim!(br_log10, log10);
unary_shim!(br_log1p, ln_1p);
unary_shim!(br_sin, sin);
unary_shim!(br_cos, cos);
unary_shim!(br_tan, tan);
unary_shim!(br_asin, asin);
unary_shim!(br_acos, acos);
unary_shim!(br_atan, atan);
binary_shim!(br_atan2, atan2);
unary_shim!(br_sinh, sinh);
unary_shim!(br_cosh, cosh);
unary_shim!(br_tanh, tanh);
unary_shim!(br_asinh, asinh);
unary_shim!(br_acosh, acosh);
unary_shim!(br_atanh, atanh);
binary_shim!(br_pow, powf);
unary_shim!(br_ceil, ceil);
unary_shim!(br_floor, floor);
unary_shim!(br_trunc, trunc);

extern "C" fn br_fmod(x: f64, y: f64) -> f64 {
    x % y
}

binary_shim!(br_hypot, hypot);

/// The process-wide bridge instance.
pub static MATH_BRIDGE: MathBridge = MathBridge {
    sqrt: br_sqrt,
    cbrt: br_cbrt,
    fabs: br_fabs,
    exp: br_exp,
    expm1: br_expm1,
    log: br_log,
    log2: br_log2,
    log10: br_log10,
    log1p: br_log1p,
    sin: br_sin,
    cos: br_cos,
    tan: br_tan,
    asin: br_asin,
    acos: br_acos,
    atan: br_atan,
    atan2: br_atan2,
    sinh: br_sinh,
    cosh: br_cosh,
    tanh: br_tanh,
    asinh: br_asinh,
    acosh: br_acosh,
    atanh: br_atanh,
    pow: br_pow,
    fmod: br_fmod,
    hypot: br_hypot,
    ceil: br_ceil,
    floor: br_floor,
    trunc: br_trunc,
};

/// Address handed to `kernel_set_bridge`.
pub fn bridge_ptr() -> *const c_void {
    &MATH_BRIDGE as *const MathBridge as *const c_void
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::BRIDGE_FNS;

    #[test]
    fn table_layout_matches_the_emitted_struct() {
        // One pointer per emitted field, same count.
        assert_eq!(
            std::mem::size_of::<MathBridge>(),
            BRIDGE_FNS.len() * std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn shims_compute_libm_results() {
        assert_eq!((MATH_BRIDGE.sqrt)(16.0), 4.0);
        assert_eq!((MATH_BRIDGE.hypot)(3.0, 4.0), 5.0);
        assert_eq!((MATH_BRIDGE.fmod)(5.5, 2.0), 1.5);
        assert_eq!((MATH_BRIDGE.floor)(-1.5), -2.0);
    }
}
