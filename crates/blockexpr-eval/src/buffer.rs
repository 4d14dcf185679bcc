//! Typed block buffers, the per-call buffer pool, and scalar values.
//!
//! A [`Buffer`] is one block's worth of elements of a single dtype. The
//! evaluator draws buffers from a [`BufferPool`] that retains freed
//! buffers for reuse, so after the first block of an evaluate call the
//! hot loop performs no allocation.
//!
//! [`Scalar`] is the single-value counterpart used for reduction
//! accumulators and block-level (scalar) conditions.

use num_complex::{Complex32, Complex64};

use blockexpr_core::{ArrayMut, ArrayRef, DType, Literal};

/// One block of elements of a single dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    C64(Vec<Complex32>),
    C128(Vec<Complex64>),
    /// Packed fixed-length strings.
    Str { bytes: Vec<u8>, itemsize: usize },
}

impl Buffer {
    /// Zero-filled buffer of `len` elements.
    pub fn zeroed(dtype: DType, len: usize) -> Buffer {
        match dtype {
            DType::Bool => Buffer::Bool(vec![false; len]),
            DType::I8 => Buffer::I8(vec![0; len]),
            DType::I16 => Buffer::I16(vec![0; len]),
            DType::I32 => Buffer::I32(vec![0; len]),
            DType::I64 => Buffer::I64(vec![0; len]),
            DType::U8 => Buffer::U8(vec![0; len]),
            DType::U16 => Buffer::U16(vec![0; len]),
            DType::U32 => Buffer::U32(vec![0; len]),
            DType::U64 => Buffer::U64(vec![0; len]),
            DType::F32 => Buffer::F32(vec![0.0; len]),
            DType::F64 => Buffer::F64(vec![0.0; len]),
            DType::C64 => Buffer::C64(vec![Complex32::new(0.0, 0.0); len]),
            DType::C128 => Buffer::C128(vec![Complex64::new(0.0, 0.0); len]),
            DType::Str => Buffer::Str {
                bytes: Vec::new(),
                itemsize: 0,
            },
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Buffer::Bool(_) => DType::Bool,
            Buffer::I8(_) => DType::I8,
            Buffer::I16(_) => DType::I16,
            Buffer::I32(_) => DType::I32,
            Buffer::I64(_) => DType::I64,
            Buffer::U8(_) => DType::U8,
            Buffer::U16(_) => DType::U16,
            Buffer::U32(_) => DType::U32,
            Buffer::U64(_) => DType::U64,
            Buffer::F32(_) => DType::F32,
            Buffer::F64(_) => DType::F64,
            Buffer::C64(_) => DType::C64,
            Buffer::C128(_) => DType::C128,
            Buffer::Str { .. } => DType::Str,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Bool(v) => v.len(),
            Buffer::I8(v) => v.len(),
            Buffer::I16(v) => v.len(),
            Buffer::I32(v) => v.len(),
            Buffer::I64(v) => v.len(),
            Buffer::U8(v) => v.len(),
            Buffer::U16(v) => v.len(),
            Buffer::U32(v) => v.len(),
            Buffer::U64(v) => v.len(),
            Buffer::F32(v) => v.len(),
            Buffer::F64(v) => v.len(),
            Buffer::C64(v) => v.len(),
            Buffer::C128(v) => v.len(),
            Buffer::Str { bytes, itemsize } => {
                if *itemsize == 0 {
                    0
                } else {
                    bytes.len() / itemsize
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resizes (zero-filling) to `len` elements.
    pub fn resize(&mut self, len: usize) {
        match self {
            Buffer::Bool(v) => v.resize(len, false),
            Buffer::I8(v) => v.resize(len, 0),
            Buffer::I16(v) => v.resize(len, 0),
            Buffer::I32(v) => v.resize(len, 0),
            Buffer::I64(v) => v.resize(len, 0),
            Buffer::U8(v) => v.resize(len, 0),
            Buffer::U16(v) => v.resize(len, 0),
            Buffer::U32(v) => v.resize(len, 0),
            Buffer::U64(v) => v.resize(len, 0),
            Buffer::F32(v) => v.resize(len, 0.0),
            Buffer::F64(v) => v.resize(len, 0.0),
            Buffer::C64(v) => v.resize(len, Complex32::new(0.0, 0.0)),
            Buffer::C128(v) => v.resize(len, Complex64::new(0.0, 0.0)),
            Buffer::Str { bytes, itemsize } => bytes.resize(len * *itemsize, 0),
        }
    }

    /// Copies a window of a caller array into this buffer, resizing as
    /// needed. The dtypes must match.
    pub fn load(&mut self, src: &ArrayRef<'_>, offset: usize, len: usize) {
        debug_assert_eq!(self.dtype(), src.dtype(), "load dtype mismatch");
        match (self, src.slice(offset, len)) {
            (Buffer::Bool(v), ArrayRef::Bool(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::I8(v), ArrayRef::I8(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::I16(v), ArrayRef::I16(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::I32(v), ArrayRef::I32(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::I64(v), ArrayRef::I64(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::U8(v), ArrayRef::U8(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::U16(v), ArrayRef::U16(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::U32(v), ArrayRef::U32(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::U64(v), ArrayRef::U64(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::F32(v), ArrayRef::F32(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::F64(v), ArrayRef::F64(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::C64(v), ArrayRef::C64(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::C128(v), ArrayRef::C128(s)) => {
                v.clear();
                v.extend_from_slice(s);
            }
            (Buffer::Str { bytes, itemsize }, ArrayRef::Str { bytes: s, itemsize: isz }) => {
                *itemsize = isz;
                bytes.clear();
                bytes.extend_from_slice(s);
            }
            _ => unreachable!("load dtype mismatch"),
        }
    }

    /// Replaces this buffer's contents with the first `len` elements of
    /// `src` (same dtype). Reuses the existing allocation.
    pub fn copy_prefix_from(&mut self, src: &Buffer, len: usize) {
        macro_rules! prefix_arm {
            ($d:expr, $s:expr) => {{
                let (d, s) = ($d, $s);
                d.clear();
                d.extend_from_slice(&s[..len]);
            }};
        }
        match (self, src) {
            (Buffer::Bool(d), Buffer::Bool(s)) => prefix_arm!(d, s),
            (Buffer::I8(d), Buffer::I8(s)) => prefix_arm!(d, s),
            (Buffer::I16(d), Buffer::I16(s)) => prefix_arm!(d, s),
            (Buffer::I32(d), Buffer::I32(s)) => prefix_arm!(d, s),
            (Buffer::I64(d), Buffer::I64(s)) => prefix_arm!(d, s),
            (Buffer::U8(d), Buffer::U8(s)) => prefix_arm!(d, s),
            (Buffer::U16(d), Buffer::U16(s)) => prefix_arm!(d, s),
            (Buffer::U32(d), Buffer::U32(s)) => prefix_arm!(d, s),
            (Buffer::U64(d), Buffer::U64(s)) => prefix_arm!(d, s),
            (Buffer::F32(d), Buffer::F32(s)) => prefix_arm!(d, s),
            (Buffer::F64(d), Buffer::F64(s)) => prefix_arm!(d, s),
            (Buffer::C64(d), Buffer::C64(s)) => prefix_arm!(d, s),
            (Buffer::C128(d), Buffer::C128(s)) => prefix_arm!(d, s),
            (
                Buffer::Str { bytes: d, itemsize: di },
                Buffer::Str { bytes: s, itemsize: si },
            ) => {
                *di = *si;
                d.clear();
                d.extend_from_slice(&s[..len * *si]);
            }
            _ => unreachable!("copy_prefix_from dtype mismatch"),
        }
    }

    /// Writes this buffer into a window of the caller's output view. The
    /// dtypes must already match (the evaluator casts beforehand).
    pub fn store(&self, out: &mut ArrayMut<'_>, offset: usize) {
        let len = self.len();
        macro_rules! store_arm {
            ($s:expr, $d:expr) => {
                $d[offset..offset + len].copy_from_slice($s)
            };
        }
        match (self, out) {
            (Buffer::Bool(s), ArrayMut::Bool(d)) => store_arm!(s, d),
            (Buffer::I8(s), ArrayMut::I8(d)) => store_arm!(s, d),
            (Buffer::I16(s), ArrayMut::I16(d)) => store_arm!(s, d),
            (Buffer::I32(s), ArrayMut::I32(d)) => store_arm!(s, d),
            (Buffer::I64(s), ArrayMut::I64(d)) => store_arm!(s, d),
            (Buffer::U8(s), ArrayMut::U8(d)) => store_arm!(s, d),
            (Buffer::U16(s), ArrayMut::U16(d)) => store_arm!(s, d),
            (Buffer::U32(s), ArrayMut::U32(d)) => store_arm!(s, d),
            (Buffer::U64(s), ArrayMut::U64(d)) => store_arm!(s, d),
            (Buffer::F32(s), ArrayMut::F32(d)) => store_arm!(s, d),
            (Buffer::F64(s), ArrayMut::F64(d)) => store_arm!(s, d),
            (Buffer::C64(s), ArrayMut::C64(d)) => store_arm!(s, d),
            (Buffer::C128(s), ArrayMut::C128(d)) => store_arm!(s, d),
            _ => unreachable!("store dtype mismatch"),
        }
    }
}

/// Dtype-keyed free list. `take` prefers a previously freed buffer of the
/// same dtype; `give` returns a buffer for reuse.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Vec<Buffer>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero-length buffer is never handed out; the result always has
    /// exactly `len` elements (contents unspecified, dtype exact).
    pub fn take(&mut self, dtype: DType, len: usize) -> Buffer {
        if let Some(i) = self.free.iter().position(|b| b.dtype() == dtype) {
            let mut b = self.free.swap_remove(i);
            b.resize(len);
            return b;
        }
        Buffer::zeroed(dtype, len)
    }

    pub fn give(&mut self, buf: Buffer) {
        self.free.push(buf);
    }
}

/// A single value of any numeric dtype, used for reduction accumulators,
/// scalar conditions, and literal broadcast sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Complex(Complex64),
}

impl Scalar {
    pub fn from_literal(lit: &Literal) -> Scalar {
        match lit {
            Literal::Bool(b) => Scalar::Bool(*b),
            Literal::Int(v) => Scalar::Int(*v),
            Literal::Float(v) => Scalar::Float(*v),
            Literal::Complex(c) => Scalar::Complex(*c),
            Literal::Str(_) => unreachable!("string literal in scalar context"),
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Bool(b) => b as i64 as f64,
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
            Scalar::Complex(c) => c.re,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Bool(b) => b as i64,
            Scalar::Int(v) => v,
            Scalar::UInt(v) => v as i64,
            Scalar::Float(v) => v as i64,
            Scalar::Complex(c) => c.re as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Scalar::Bool(b) => b as u64,
            Scalar::Int(v) => v as u64,
            Scalar::UInt(v) => v,
            Scalar::Float(v) => v as u64,
            Scalar::Complex(c) => c.re as u64,
        }
    }

    pub fn as_complex(self) -> Complex64 {
        match self {
            Scalar::Complex(c) => c,
            other => Complex64::new(other.as_f64(), 0.0),
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Scalar::Bool(b) => b,
            Scalar::Int(v) => v != 0,
            Scalar::UInt(v) => v != 0,
            Scalar::Float(v) => v != 0.0,
            Scalar::Complex(c) => c.re != 0.0 || c.im != 0.0,
        }
    }
}
