//! The blockexpr numeric type lattice.
//!
//! Provides the closed set of element types an expression can operate on:
//! booleans, signed and unsigned integers of widths 8-64, binary floats,
//! binary complex (pairs of same-width floats), and fixed-length code-point
//! strings. "Infer this" is expressed as `Option<DType>` at API boundaries,
//! never as an in-band sentinel.
//!
//! The lattice exposes [`DType::promote`] (the smallest tag representing
//! every value of both operands), [`DType::cast_kind`] (the classification
//! of a conversion), and the width/class predicates the analyzer and the
//! kernels dispatch on.

use serde::{Deserialize, Serialize};

/// Element type tag for variables, intermediates, and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Complex of two f32 components.
    C64,
    /// Complex of two f64 components.
    C128,
    /// Fixed-length code-point string; the per-element byte size lives in
    /// the variable descriptor, not in the tag.
    Str,
}

/// Classification of a conversion between two type tags.
///
/// Conversions between any two tags are defined; the kind tells the kernels
/// and the JIT emitter which shape of conversion to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastKind {
    Identity,
    Widen,
    Narrow,
    SignChange,
    FloatToInt,
    IntToFloat,
    ComplexToReal,
    RealToComplex,
    BoolToNumeric,
    NumericToBool,
}

/// Coarse class used by the promotion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Bool,
    Signed,
    Unsigned,
    Float,
    Complex,
    Str,
}

impl DType {
    /// All tags, in promotion-rank order within each class.
    pub const ALL: [DType; 14] = [
        DType::Bool,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
        DType::F32,
        DType::F64,
        DType::C64,
        DType::C128,
        DType::Str,
    ];

    /// Byte width of one element. `Str` returns 0 because its width is
    /// per-descriptor, not per-tag.
    pub fn width(self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 | DType::C64 => 8,
            DType::C128 => 16,
            DType::Str => 0,
        }
    }

    pub fn is_bool(self) -> bool {
        self == DType::Bool
    }

    pub fn is_signed_int(self) -> bool {
        matches!(self, DType::I8 | DType::I16 | DType::I32 | DType::I64)
    }

    pub fn is_unsigned_int(self) -> bool {
        matches!(self, DType::U8 | DType::U16 | DType::U32 | DType::U64)
    }

    /// Bool counts as a rank-zero integer.
    pub fn is_integer(self) -> bool {
        self.is_bool() || self.is_signed_int() || self.is_unsigned_int()
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DType::C64 | DType::C128)
    }

    pub fn is_string(self) -> bool {
        self == DType::Str
    }

    /// Width in bytes of one float component: the float itself, or one half
    /// of a complex pair. Integers and bool report the width of the float
    /// they promote into (always 8).
    fn float_component_width(self) -> usize {
        match self {
            DType::F32 | DType::C64 => 4,
            _ => 8,
        }
    }

    fn class(self) -> Class {
        match self {
            DType::Bool => Class::Bool,
            DType::I8 | DType::I16 | DType::I32 | DType::I64 => Class::Signed,
            DType::U8 | DType::U16 | DType::U32 | DType::U64 => Class::Unsigned,
            DType::F32 | DType::F64 => Class::Float,
            DType::C64 | DType::C128 => Class::Complex,
            DType::Str => Class::Str,
        }
    }

    fn signed_of_width(bytes: usize) -> DType {
        match bytes {
            1 => DType::I8,
            2 => DType::I16,
            4 => DType::I32,
            _ => DType::I64,
        }
    }

    fn unsigned_of_width(bytes: usize) -> DType {
        match bytes {
            1 => DType::U8,
            2 => DType::U16,
            4 => DType::U32,
            _ => DType::U64,
        }
    }

    fn float_of_width(bytes: usize) -> DType {
        if bytes <= 4 {
            DType::F32
        } else {
            DType::F64
        }
    }

    fn complex_of_component_width(bytes: usize) -> DType {
        if bytes <= 4 {
            DType::C64
        } else {
            DType::C128
        }
    }

    /// The smallest tag that can represent every value of both operands.
    ///
    /// Rules:
    /// - bool is rank zero: `bool op T` is `T`
    /// - integer with float yields the float
    /// - two floats yield the wider
    /// - signed with unsigned of the same or narrower width yields the
    ///   signed type one level above the unsigned width, saturating at 64
    ///   bits
    /// - complex dominates real of the same component width; mixed widths
    ///   take the wider component
    /// - strings promote only with strings
    ///
    /// Returns `None` when no common tag exists (string with numeric).
    pub fn promote(a: DType, b: DType) -> Option<DType> {
        if a == b {
            return Some(a);
        }
        match (a.class(), b.class()) {
            (Class::Str, _) | (_, Class::Str) => None,
            (Class::Bool, _) => Some(b),
            (_, Class::Bool) => Some(a),
            (Class::Complex, _) | (_, Class::Complex) => {
                let (cpx, other) = if a.is_complex() { (a, b) } else { (b, a) };
                // An integer operand takes the complex's own width, the same
                // way integer-with-float yields the float.
                let w = if other.is_integer() {
                    cpx.float_component_width()
                } else {
                    cpx.float_component_width().max(other.float_component_width())
                };
                Some(DType::complex_of_component_width(w))
            }
            (Class::Float, Class::Float) => {
                Some(DType::float_of_width(a.width().max(b.width())))
            }
            (Class::Float, _) => Some(a),
            (_, Class::Float) => Some(b),
            (Class::Signed, Class::Signed) => {
                Some(DType::signed_of_width(a.width().max(b.width())))
            }
            (Class::Unsigned, Class::Unsigned) => {
                Some(DType::unsigned_of_width(a.width().max(b.width())))
            }
            (Class::Signed, Class::Unsigned) | (Class::Unsigned, Class::Signed) => {
                let (signed, unsigned) = if a.class() == Class::Signed { (a, b) } else { (b, a) };
                if signed.width() > unsigned.width() {
                    Some(signed)
                } else {
                    Some(DType::signed_of_width((unsigned.width() * 2).min(8)))
                }
            }
        }
    }

    /// Classifies the conversion from `self` to `to`.
    ///
    /// Numeric-to-bool is "not equal to zero". Float-to-int truncates toward
    /// zero. Complex-to-real discards the imaginary part without error.
    pub fn cast_kind(self, to: DType) -> CastKind {
        if self == to {
            return CastKind::Identity;
        }
        match (self.class(), to.class()) {
            (Class::Bool, _) => CastKind::BoolToNumeric,
            (_, Class::Bool) => CastKind::NumericToBool,
            (Class::Complex, Class::Complex) => {
                if to.width() > self.width() {
                    CastKind::Widen
                } else {
                    CastKind::Narrow
                }
            }
            (Class::Complex, _) => CastKind::ComplexToReal,
            (_, Class::Complex) => CastKind::RealToComplex,
            (Class::Float, Class::Float) => {
                if to.width() > self.width() {
                    CastKind::Widen
                } else {
                    CastKind::Narrow
                }
            }
            (Class::Float, _) => CastKind::FloatToInt,
            (_, Class::Float) => CastKind::IntToFloat,
            _ => {
                // Integer to integer.
                if self.width() == to.width() {
                    CastKind::SignChange
                } else if to.width() > self.width() {
                    CastKind::Widen
                } else {
                    CastKind::Narrow
                }
            }
        }
    }

    /// Lowercase tag name as it appears in diagnostics and the script
    /// grammar's cast builtins.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::C64 => "complex64",
            DType::C128 => "complex128",
            DType::Str => "str",
        }
    }

    /// Parses a tag name as produced by [`DType::name`].
    pub fn parse(name: &str) -> Option<DType> {
        DType::ALL.iter().copied().find(|t| t.name() == name)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
