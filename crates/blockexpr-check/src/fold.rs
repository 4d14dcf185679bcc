//! Constant folding over analyzed arenas.
//!
//! Runs after inference, in one linear pass: because children always
//! precede parents in the arena, visiting nodes in id order folds
//! bottom-up. A node whose children are all literals is rewritten in
//! place to a literal of its already-inferred dtype; the orphaned child
//! nodes stay in the arena as unreachable entries.
//!
//! Folding is also where degenerate constants fail early: dividing two
//! integer literals by zero is a compile error, not a runtime trap.

use num_complex::Complex64;

use blockexpr_core::{
    BinaryOp, Builtin, CallTarget, CmpOp, CompileError, DType, ExprArena, Literal, NodeId,
    NodeKind, UnaryOp,
};

/// Folding value: literals lifted into a common arithmetic model.
#[derive(Debug, Clone, Copy)]
enum Cv {
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(Complex64),
}

impl Cv {
    fn from_literal(lit: &Literal) -> Option<Cv> {
        match lit {
            Literal::Bool(b) => Some(Cv::Bool(*b)),
            Literal::Int(v) => Some(Cv::Int(*v)),
            Literal::Float(v) => Some(Cv::Float(*v)),
            Literal::Complex(c) => Some(Cv::Complex(*c)),
            Literal::Str(_) => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Cv::Bool(b) => b as i64 as f64,
            Cv::Int(v) => v as f64,
            Cv::Float(v) => v,
            Cv::Complex(c) => c.re,
        }
    }

    fn as_complex(self) -> Complex64 {
        match self {
            Cv::Complex(c) => c,
            other => Complex64::new(other.as_f64(), 0.0),
        }
    }

    fn is_complex(self) -> bool {
        matches!(self, Cv::Complex(_))
    }

    fn is_float(self) -> bool {
        matches!(self, Cv::Float(_))
    }
}

/// Re-wraps a folded i64 into the node's inferred dtype so folding matches
/// what the wrapping runtime kernels would produce.
fn wrap_int(v: i64, dt: DType) -> i64 {
    match dt {
        DType::I8 => v as i8 as i64,
        DType::I16 => v as i16 as i64,
        DType::I32 => v as i32 as i64,
        DType::U8 => v as u8 as i64,
        DType::U16 => v as u16 as i64,
        DType::U32 => v as u32 as i64,
        _ => v,
    }
}

/// Folds every pure literal subtree in the arena. Must run after
/// inference (node dtypes drive integer wrapping).
pub fn fold_constants(arena: &mut ExprArena) -> Result<(), CompileError> {
    for i in 0..arena.len() {
        let id = NodeId(i as u32);
        let node = arena.get(id);
        let dtype = match node.dtype {
            Some(dt) => dt,
            None => continue, // statements and unanalyzed nodes
        };

        let foldable = matches!(
            node.kind,
            NodeKind::Unary(_)
                | NodeKind::Binary(_)
                | NodeKind::Compare(_)
                | NodeKind::Call(CallTarget::Builtin(_))
        );
        if !foldable {
            continue;
        }

        let mut vals = Vec::with_capacity(node.children.len());
        let mut all_literal = true;
        for &c in node.children.iter() {
            match &arena.get(c).kind {
                NodeKind::Literal(lit) => match Cv::from_literal(lit) {
                    Some(v) => vals.push(v),
                    None => {
                        all_literal = false;
                        break;
                    }
                },
                _ => {
                    all_literal = false;
                    break;
                }
            }
        }
        if !all_literal {
            continue;
        }

        let span = node.span;
        let folded = match node.kind.clone() {
            NodeKind::Unary(op) => fold_unary(op, vals[0], dtype),
            NodeKind::Binary(op) => fold_binary(op, vals[0], vals[1], dtype, span)?,
            NodeKind::Compare(op) => fold_compare(op, vals[0], vals[1]),
            NodeKind::Call(CallTarget::Builtin(b)) => fold_builtin(b, &vals, dtype),
            _ => unreachable!(),
        };

        if let Some(lit) = folded {
            let node = arena.get_mut(id);
            node.kind = NodeKind::Literal(lit);
            node.children.clear();
        }
    }
    Ok(())
}

fn fold_unary(op: UnaryOp, v: Cv, dt: DType) -> Option<Literal> {
    match (op, v) {
        (UnaryOp::Not, Cv::Bool(b)) => Some(Literal::Bool(!b)),
        (UnaryOp::Neg, Cv::Int(i)) => Some(Literal::Int(wrap_int(i.wrapping_neg(), dt))),
        (UnaryOp::Neg, Cv::Float(f)) => Some(Literal::Float(-f)),
        (UnaryOp::Neg, Cv::Complex(c)) => Some(Literal::Complex(-c)),
        (UnaryOp::BitNot, Cv::Int(i)) => Some(Literal::Int(wrap_int(!i, dt))),
        (UnaryOp::BitNot, Cv::Bool(b)) => Some(Literal::Bool(!b)),
        _ => None,
    }
}

fn fold_binary(
    op: BinaryOp,
    l: Cv,
    r: Cv,
    dt: DType,
    span: blockexpr_core::Span,
) -> Result<Option<Literal>, CompileError> {
    // Logical connectives.
    if let (BinaryOp::And | BinaryOp::Or, Cv::Bool(a), Cv::Bool(b)) = (op, l, r) {
        let v = if op == BinaryOp::And { a && b } else { a || b };
        return Ok(Some(Literal::Bool(v)));
    }

    // Complex arithmetic.
    if l.is_complex() || r.is_complex() {
        let (a, b) = (l.as_complex(), r.as_complex());
        let v = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powc(b),
            _ => return Ok(None),
        };
        return Ok(Some(Literal::Complex(v)));
    }

    // Float arithmetic.
    if l.is_float() || r.is_float() {
        let (a, b) = (l.as_f64(), r.as_f64());
        let v = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Mod => a % b,
            BinaryOp::Pow => a.powf(b),
            _ => return Ok(None),
        };
        return Ok(Some(Literal::Float(v)));
    }

    // Integer (and bool-as-integer) arithmetic.
    let (a, b) = match (l, r) {
        (Cv::Int(a), Cv::Int(b)) => (a, b),
        (Cv::Bool(a), Cv::Int(b)) => (a as i64, b),
        (Cv::Int(a), Cv::Bool(b)) => (a, b as i64),
        (Cv::Bool(a), Cv::Bool(b)) => match op {
            // Bool & | ^ stay bool.
            BinaryOp::BitAnd => return Ok(Some(Literal::Bool(a && b))),
            BinaryOp::BitOr => return Ok(Some(Literal::Bool(a || b))),
            BinaryOp::BitXor => return Ok(Some(Literal::Bool(a != b))),
            _ => (a as i64, b as i64),
        },
        _ => return Ok(None),
    };
    let v = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(CompileError::InvalidArg {
                    message: format!(
                        "division by zero in constant expression at byte {}",
                        span.start
                    ),
                });
            }
            a.wrapping_div(b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(CompileError::InvalidArg {
                    message: format!(
                        "modulo by zero in constant expression at byte {}",
                        span.start
                    ),
                });
            }
            a.wrapping_rem(b)
        }
        BinaryOp::Pow => {
            if b < 0 {
                return Ok(None); // runtime semantics, do not fold
            }
            let mut acc = 1i64;
            let mut base = a;
            let mut exp = b as u64;
            while exp > 0 {
                if exp & 1 == 1 {
                    acc = acc.wrapping_mul(base);
                }
                base = base.wrapping_mul(base);
                exp >>= 1;
            }
            acc
        }
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::And | BinaryOp::Or => return Ok(None),
    };
    Ok(Some(Literal::Int(wrap_int(v, dt))))
}

fn fold_compare(op: CmpOp, l: Cv, r: Cv) -> Option<Literal> {
    if l.is_complex() || r.is_complex() {
        let (a, b) = (l.as_complex(), r.as_complex());
        return match op {
            CmpOp::Eq => Some(Literal::Bool(a == b)),
            CmpOp::Ne => Some(Literal::Bool(a != b)),
            _ => None,
        };
    }
    let (a, b) = (l.as_f64(), r.as_f64());
    let v = match op {
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Ge => a >= b,
        CmpOp::Gt => a > b,
    };
    Some(Literal::Bool(v))
}

fn fold_builtin(b: Builtin, vals: &[Cv], dt: DType) -> Option<Literal> {
    if vals.iter().any(|v| v.is_complex()) {
        return None; // complex builtins evaluate at runtime
    }

    // abs of an integer literal keeps its integer dtype.
    if b == Builtin::Abs && dt.is_integer() {
        if let Cv::Int(v) = vals[0] {
            return Some(Literal::Int(wrap_int(v.wrapping_abs(), dt)));
        }
    }
    if dt.is_integer() {
        return None; // identity rounding on ints, not worth folding
    }

    let x = vals[0].as_f64();
    let v = match b {
        Builtin::Sqrt => x.sqrt(),
        Builtin::Cbrt => x.cbrt(),
        Builtin::Abs => x.abs(),
        Builtin::Exp => x.exp(),
        Builtin::Expm1 => x.exp_m1(),
        Builtin::Log => x.ln(),
        Builtin::Log2 => x.log2(),
        Builtin::Log10 => x.log10(),
        Builtin::Log1p => x.ln_1p(),
        Builtin::Sin => x.sin(),
        Builtin::Cos => x.cos(),
        Builtin::Tan => x.tan(),
        Builtin::Asin => x.asin(),
        Builtin::Acos => x.acos(),
        Builtin::Atan => x.atan(),
        Builtin::Sinh => x.sinh(),
        Builtin::Cosh => x.cosh(),
        Builtin::Tanh => x.tanh(),
        Builtin::Asinh => x.asinh(),
        Builtin::Acosh => x.acosh(),
        Builtin::Atanh => x.atanh(),
        Builtin::Ceil => x.ceil(),
        Builtin::Floor => x.floor(),
        Builtin::Round => x.round(),
        Builtin::Trunc => x.trunc(),
        Builtin::Atan2 => x.atan2(vals[1].as_f64()),
        Builtin::Pow => x.powf(vals[1].as_f64()),
        Builtin::Fmod => x % vals[1].as_f64(),
        Builtin::Hypot => x.hypot(vals[1].as_f64()),
        Builtin::Conj | Builtin::Real => x,
        Builtin::Imag => 0.0,
    };
    Some(Literal::Float(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::Analyzer;
    use blockexpr_core::VarDesc;
    use blockexpr_syntax::parse_expression;

    fn folded(src: &str) -> Result<(ExprArena, NodeId), CompileError> {
        let (mut arena, root) = parse_expression(src).unwrap();
        let vars = vec![VarDesc::array("x", DType::F64)];
        let mut an = Analyzer::new(&mut arena, &vars, vec![DType::F64]);
        an.infer_expr(root)?;
        fold_constants(&mut arena)?;
        Ok((arena, root))
    }

    fn root_literal(src: &str) -> Literal {
        let (arena, root) = folded(src).unwrap();
        match &arena.get(root).kind {
            NodeKind::Literal(lit) => lit.clone(),
            other => panic!("not folded: {other:?}"),
        }
    }

    #[test]
    fn integer_arithmetic_folds() {
        assert_eq!(root_literal("2 + 3 * 4"), Literal::Int(14));
        assert_eq!(root_literal("2 ** 10"), Literal::Int(1024));
        assert_eq!(root_literal("7 % 3"), Literal::Int(1));
        assert_eq!(root_literal("-(5)"), Literal::Int(-5));
    }

    #[test]
    fn float_arithmetic_folds() {
        assert_eq!(root_literal("1.5 * 4"), Literal::Float(6.0));
        assert_eq!(root_literal("1 / 2.0"), Literal::Float(0.5));
    }

    #[test]
    fn comparisons_fold_to_bool() {
        assert_eq!(root_literal("2 < 3"), Literal::Bool(true));
        assert_eq!(root_literal("2.5 == 2.5"), Literal::Bool(true));
        assert_eq!(root_literal("1 >= 2"), Literal::Bool(false));
    }

    #[test]
    fn builtins_fold_on_float_literals() {
        assert_eq!(root_literal("sqrt(16.0)"), Literal::Float(4.0));
        assert_eq!(root_literal("hypot(3.0, 4.0)"), Literal::Float(5.0));
    }

    #[test]
    fn complex_literal_arithmetic_folds() {
        match root_literal("2.0j * 2.0j") {
            Literal::Complex(c) => {
                assert_eq!(c.re, -4.0);
                assert_eq!(c.im, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn literal_division_by_zero_fails_at_compile() {
        let err = folded("1 / 0").unwrap_err();
        match err {
            CompileError::InvalidArg { message } => {
                assert!(message.contains("division by zero"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(folded("5 % 0").is_err());
        // Float division by zero is defined (inf), not an error.
        assert_eq!(root_literal("1.0 / 0"), Literal::Float(f64::INFINITY));
    }

    #[test]
    fn variables_block_folding() {
        let (arena, root) = folded("x + 1 + 2").unwrap();
        // `x + 1` is not foldable; the tree keeps its operators.
        assert!(matches!(arena.get(root).kind, NodeKind::Binary(_)));
    }

    #[test]
    fn folding_respects_inferred_integer_width() {
        // 2147483647 + 1 wraps in int32, matching the runtime kernels.
        assert_eq!(root_literal("2147483647 + 1"), Literal::Int(-2147483648));
    }

    proptest::proptest! {
        /// Folded integer arithmetic agrees with the wrapping semantics
        /// of the runtime kernels.
        #[test]
        fn folded_arithmetic_matches_wrapping_i32(a in -10_000i32..10_000, b in 1i32..10_000) {
            proptest::prop_assert_eq!(
                root_literal(&format!("{a} + {b}")),
                Literal::Int((a.wrapping_add(b)) as i64)
            );
            proptest::prop_assert_eq!(
                root_literal(&format!("{a} * {b}")),
                Literal::Int((a.wrapping_mul(b)) as i64)
            );
            proptest::prop_assert_eq!(
                root_literal(&format!("{a} / {b}")),
                Literal::Int((a / b) as i64)
            );
        }
    }
}
