//! Rolling reduction accumulators.
//!
//! A [`Reduction`] holds the running result of one reduction node across
//! blocks: each block contributes a partial computed in the accumulator
//! dtype, merged in block order (for floats this block-order combination
//! *is* the defined result, not the numerically exact real sum). Integer
//! sums and products wrap in 64 bits of the input's signedness.
//!
//! NaN policy for min/max, in every flavor: NaN is never selected unless
//! both inputs are NaN.

use num_complex::Complex64;

use blockexpr_core::{DType, ReduceOp};

use crate::buffer::{Buffer, Scalar};

#[derive(Debug, Clone)]
pub struct Reduction {
    pub op: ReduceOp,
    input_dtype: DType,
    acc: Option<Scalar>,
}

fn nan_safe_min(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else if b < a {
        b
    } else {
        a
    }
}

fn nan_safe_max(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else if b > a {
        b
    } else {
        a
    }
}

impl Reduction {
    pub fn new(op: ReduceOp, input_dtype: DType) -> Self {
        Self {
            op,
            input_dtype,
            acc: None,
        }
    }

    /// Folds one block of input into the rolling accumulator.
    pub fn update(&mut self, block: &Buffer) {
        if block.is_empty() {
            return;
        }
        let partial = match self.op {
            ReduceOp::Sum => partial_sum(block),
            ReduceOp::Prod => partial_prod(block),
            ReduceOp::Min => partial_minmax(block, false),
            ReduceOp::Max => partial_minmax(block, true),
            ReduceOp::Any => partial_any(block),
            ReduceOp::All => partial_all(block),
        };
        self.merge(partial);
    }

    /// Folds a pre-reduced partial (from a fused predicate kernel).
    pub fn merge(&mut self, partial: Scalar) {
        let merged = match self.acc {
            None => partial,
            Some(acc) => combine(self.op, self.input_dtype, acc, partial),
        };
        self.acc = Some(merged);
    }

    /// The final value; empty inputs yield the operation's identity
    /// (`sum` 0, `prod` 1, `any` false, `all` true, `min`/`max` 0).
    pub fn finish(&self) -> Scalar {
        self.acc.unwrap_or(match self.op {
            ReduceOp::Sum => Scalar::Int(0),
            ReduceOp::Prod => Scalar::Int(1),
            ReduceOp::Any => Scalar::Bool(false),
            ReduceOp::All => Scalar::Bool(true),
            ReduceOp::Min | ReduceOp::Max => Scalar::Int(0),
        })
    }
}

/// Merges two partials in the accumulator domain of the input dtype.
fn combine(op: ReduceOp, input: DType, a: Scalar, b: Scalar) -> Scalar {
    match op {
        ReduceOp::Any => Scalar::Bool(a.as_bool() || b.as_bool()),
        ReduceOp::All => Scalar::Bool(a.as_bool() && b.as_bool()),
        ReduceOp::Sum | ReduceOp::Prod => {
            let mul = op == ReduceOp::Prod;
            match (a, b) {
                (Scalar::Complex(x), y) | (y, Scalar::Complex(x)) => {
                    let y = y.as_complex();
                    Scalar::Complex(if mul { x * y } else { x + y })
                }
                (Scalar::Float(x), y) | (y, Scalar::Float(x)) => {
                    let y = y.as_f64();
                    if input == DType::F32 {
                        // Combine in f32 so block merging matches a plain
                        // f32 loop.
                        let v = if mul {
                            x as f32 * y as f32
                        } else {
                            x as f32 + y as f32
                        };
                        Scalar::Float(v as f64)
                    } else {
                        Scalar::Float(if mul { x * y } else { x + y })
                    }
                }
                (Scalar::UInt(x), y) | (y, Scalar::UInt(x)) => {
                    let y = y.as_u64();
                    Scalar::UInt(if mul {
                        x.wrapping_mul(y)
                    } else {
                        x.wrapping_add(y)
                    })
                }
                (x, y) => {
                    let (x, y) = (x.as_i64(), y.as_i64());
                    Scalar::Int(if mul {
                        x.wrapping_mul(y)
                    } else {
                        x.wrapping_add(y)
                    })
                }
            }
        }
        ReduceOp::Min | ReduceOp::Max => {
            let max = op == ReduceOp::Max;
            match (a, b) {
                (Scalar::Float(x), y) | (y, Scalar::Float(x)) => {
                    let y = y.as_f64();
                    Scalar::Float(if max {
                        nan_safe_max(x, y)
                    } else {
                        nan_safe_min(x, y)
                    })
                }
                (Scalar::UInt(x), y) | (y, Scalar::UInt(x)) => {
                    let y = y.as_u64();
                    Scalar::UInt(if max { x.max(y) } else { x.min(y) })
                }
                (Scalar::Bool(x), Scalar::Bool(y)) => {
                    Scalar::Bool(if max { x || y } else { x && y })
                }
                (x, y) => {
                    let (x, y) = (x.as_i64(), y.as_i64());
                    Scalar::Int(if max { x.max(y) } else { x.min(y) })
                }
            }
        }
    }
}

fn partial_sum(block: &Buffer) -> Scalar {
    match block {
        Buffer::Bool(v) => Scalar::Int(v.iter().filter(|&&b| b).count() as i64),
        Buffer::I8(v) => Scalar::Int(v.iter().fold(0i64, |a, &x| a.wrapping_add(x as i64))),
        Buffer::I16(v) => Scalar::Int(v.iter().fold(0i64, |a, &x| a.wrapping_add(x as i64))),
        Buffer::I32(v) => Scalar::Int(v.iter().fold(0i64, |a, &x| a.wrapping_add(x as i64))),
        Buffer::I64(v) => Scalar::Int(v.iter().fold(0i64, |a, &x| a.wrapping_add(x))),
        Buffer::U8(v) => Scalar::UInt(v.iter().fold(0u64, |a, &x| a.wrapping_add(x as u64))),
        Buffer::U16(v) => Scalar::UInt(v.iter().fold(0u64, |a, &x| a.wrapping_add(x as u64))),
        Buffer::U32(v) => Scalar::UInt(v.iter().fold(0u64, |a, &x| a.wrapping_add(x as u64))),
        Buffer::U64(v) => Scalar::UInt(v.iter().fold(0u64, |a, &x| a.wrapping_add(x))),
        Buffer::F32(v) => Scalar::Float(v.iter().fold(0f32, |a, &x| a + x) as f64),
        Buffer::F64(v) => Scalar::Float(v.iter().fold(0f64, |a, &x| a + x)),
        Buffer::C64(v) => {
            let s = v
                .iter()
                .fold(num_complex::Complex32::new(0.0, 0.0), |a, &x| a + x);
            Scalar::Complex(Complex64::new(s.re as f64, s.im as f64))
        }
        Buffer::C128(v) => {
            Scalar::Complex(v.iter().fold(Complex64::new(0.0, 0.0), |a, &x| a + x))
        }
        Buffer::Str { .. } => unreachable!("sum over strings"),
    }
}

fn partial_prod(block: &Buffer) -> Scalar {
    match block {
        Buffer::Bool(v) => Scalar::Int(v.iter().all(|&b| b) as i64),
        Buffer::I8(v) => Scalar::Int(v.iter().fold(1i64, |a, &x| a.wrapping_mul(x as i64))),
        Buffer::I16(v) => Scalar::Int(v.iter().fold(1i64, |a, &x| a.wrapping_mul(x as i64))),
        Buffer::I32(v) => Scalar::Int(v.iter().fold(1i64, |a, &x| a.wrapping_mul(x as i64))),
        Buffer::I64(v) => Scalar::Int(v.iter().fold(1i64, |a, &x| a.wrapping_mul(x))),
        Buffer::U8(v) => Scalar::UInt(v.iter().fold(1u64, |a, &x| a.wrapping_mul(x as u64))),
        Buffer::U16(v) => Scalar::UInt(v.iter().fold(1u64, |a, &x| a.wrapping_mul(x as u64))),
        Buffer::U32(v) => Scalar::UInt(v.iter().fold(1u64, |a, &x| a.wrapping_mul(x as u64))),
        Buffer::U64(v) => Scalar::UInt(v.iter().fold(1u64, |a, &x| a.wrapping_mul(x))),
        Buffer::F32(v) => Scalar::Float(v.iter().fold(1f32, |a, &x| a * x) as f64),
        Buffer::F64(v) => Scalar::Float(v.iter().fold(1f64, |a, &x| a * x)),
        Buffer::C64(v) => {
            let s = v
                .iter()
                .fold(num_complex::Complex32::new(1.0, 0.0), |a, &x| a * x);
            Scalar::Complex(Complex64::new(s.re as f64, s.im as f64))
        }
        Buffer::C128(v) => {
            Scalar::Complex(v.iter().fold(Complex64::new(1.0, 0.0), |a, &x| a * x))
        }
        Buffer::Str { .. } => unreachable!("prod over strings"),
    }
}

fn partial_minmax(block: &Buffer, max: bool) -> Scalar {
    macro_rules! int_arm {
        ($v:expr, $wrap:ident, $cast:ty) => {{
            let it = $v.iter().map(|&x| x as $cast);
            Scalar::$wrap(if max { it.max().unwrap() } else { it.min().unwrap() })
        }};
    }
    match block {
        Buffer::Bool(v) => Scalar::Bool(if max {
            v.iter().any(|&b| b)
        } else {
            v.iter().all(|&b| b)
        }),
        Buffer::I8(v) => int_arm!(v, Int, i64),
        Buffer::I16(v) => int_arm!(v, Int, i64),
        Buffer::I32(v) => int_arm!(v, Int, i64),
        Buffer::I64(v) => int_arm!(v, Int, i64),
        Buffer::U8(v) => int_arm!(v, UInt, u64),
        Buffer::U16(v) => int_arm!(v, UInt, u64),
        Buffer::U32(v) => int_arm!(v, UInt, u64),
        Buffer::U64(v) => int_arm!(v, UInt, u64),
        Buffer::F32(v) => {
            let mut acc = v[0] as f64;
            for &x in &v[1..] {
                let x = x as f64;
                acc = if max {
                    nan_safe_max(acc, x)
                } else {
                    nan_safe_min(acc, x)
                };
            }
            Scalar::Float(acc)
        }
        Buffer::F64(v) => {
            let mut acc = v[0];
            for &x in &v[1..] {
                acc = if max {
                    nan_safe_max(acc, x)
                } else {
                    nan_safe_min(acc, x)
                };
            }
            Scalar::Float(acc)
        }
        Buffer::C64(_) | Buffer::C128(_) => unreachable!("min/max over complex"),
        Buffer::Str { .. } => unreachable!("min/max over strings"),
    }
}

fn partial_any(block: &Buffer) -> Scalar {
    match block {
        Buffer::Bool(v) => Scalar::Bool(v.iter().any(|&b| b)),
        _ => unreachable!("any over non-bool"),
    }
}

fn partial_all(block: &Buffer) -> Scalar {
    match block {
        Buffer::Bool(v) => Scalar::Bool(v.iter().all(|&b| b)),
        _ => unreachable!("all over non-bool"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_across_blocks_equals_single_block() {
        let data: Vec<i32> = (1..=10).collect();
        let mut whole = Reduction::new(ReduceOp::Sum, DType::I32);
        whole.update(&Buffer::I32(data.clone()));

        let mut split = Reduction::new(ReduceOp::Sum, DType::I32);
        split.update(&Buffer::I32(data[..4].to_vec()));
        split.update(&Buffer::I32(data[4..].to_vec()));

        assert_eq!(whole.finish(), Scalar::Int(55));
        assert_eq!(split.finish(), Scalar::Int(55));
    }

    #[test]
    fn bool_sum_counts_true() {
        let mut r = Reduction::new(ReduceOp::Sum, DType::Bool);
        r.update(&Buffer::Bool(vec![true, false, true, true]));
        assert_eq!(r.finish(), Scalar::Int(3));
    }

    #[test]
    fn unsigned_sum_accumulates_in_u64() {
        let mut r = Reduction::new(ReduceOp::Sum, DType::U16);
        r.update(&Buffer::U16(vec![u16::MAX, u16::MAX]));
        assert_eq!(r.finish(), Scalar::UInt(2 * u16::MAX as u64));
    }

    #[test]
    fn integer_sum_wraps_at_64_bits() {
        let mut r = Reduction::new(ReduceOp::Sum, DType::I64);
        r.update(&Buffer::I64(vec![i64::MAX, 1]));
        assert_eq!(r.finish(), Scalar::Int(i64::MIN));
    }

    #[test]
    fn min_max_skip_nan() {
        let mut mn = Reduction::new(ReduceOp::Min, DType::F64);
        mn.update(&Buffer::F64(vec![f64::NAN, 2.0, -1.0, f64::NAN]));
        assert_eq!(mn.finish(), Scalar::Float(-1.0));

        let mut mx = Reduction::new(ReduceOp::Max, DType::F64);
        mx.update(&Buffer::F64(vec![f64::NAN, 2.0]));
        assert_eq!(mx.finish(), Scalar::Float(2.0));

        // Both NaN: NaN survives.
        let mut both = Reduction::new(ReduceOp::Max, DType::F64);
        both.update(&Buffer::F64(vec![f64::NAN, f64::NAN]));
        match both.finish() {
            Scalar::Float(v) => assert!(v.is_nan()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn any_all_on_bool() {
        let mut any = Reduction::new(ReduceOp::Any, DType::Bool);
        any.update(&Buffer::Bool(vec![false, false]));
        any.update(&Buffer::Bool(vec![true]));
        assert_eq!(any.finish(), Scalar::Bool(true));

        let mut all = Reduction::new(ReduceOp::All, DType::Bool);
        all.update(&Buffer::Bool(vec![true, true]));
        all.update(&Buffer::Bool(vec![false]));
        assert_eq!(all.finish(), Scalar::Bool(false));
    }

    #[test]
    fn empty_input_yields_identity() {
        assert_eq!(Reduction::new(ReduceOp::Sum, DType::I32).finish(), Scalar::Int(0));
        assert_eq!(Reduction::new(ReduceOp::Prod, DType::I32).finish(), Scalar::Int(1));
        assert_eq!(
            Reduction::new(ReduceOp::All, DType::Bool).finish(),
            Scalar::Bool(true)
        );
    }

    #[test]
    fn fused_partials_merge_like_block_partials() {
        let mut r = Reduction::new(ReduceOp::Sum, DType::Bool);
        r.merge(Scalar::Int(3));
        r.merge(Scalar::Int(4));
        assert_eq!(r.finish(), Scalar::Int(7));
    }
}
