//! End-to-end scenarios through the public API.

use blockexpr::{
    ArrayMut, ArrayRef, DType, EvalParams, Expression, JitMode, NdLayout, VarDesc,
};

#[test]
fn elementwise_int_add() {
    let expr = Expression::compile(
        "a + b",
        &[
            VarDesc::array("a", DType::I32),
            VarDesc::array("b", DType::I32),
        ],
        Some(DType::I32),
    )
    .unwrap();
    let a = [0i32, 1, 2, 3, 4];
    let b = [10i32, 20, 30, 40, 50];
    let mut out = [0i32; 5];
    expr.eval(
        &[ArrayRef::I32(&a), ArrayRef::I32(&b)],
        &mut ArrayMut::I32(&mut out),
        5,
        None,
    )
    .unwrap();
    assert_eq!(out, [10, 21, 32, 43, 54]);
}

#[test]
fn transcendental_pythagoras() {
    let expr = Expression::compile(
        "sqrt(a*a + b*b)",
        &[
            VarDesc::array("a", DType::F64),
            VarDesc::array("b", DType::F64),
        ],
        Some(DType::F64),
    )
    .unwrap();
    let a = [3.0f64, 5.0, 8.0];
    let b = [4.0f64, 12.0, 15.0];
    let mut out = [0f64; 3];
    expr.eval(
        &[ArrayRef::F64(&a), ArrayRef::F64(&b)],
        &mut ArrayMut::F64(&mut out),
        3,
        None,
    )
    .unwrap();
    let expected = [5.0f64, 13.0, 17.0];
    for (got, want) in out.iter().zip(&expected) {
        assert!((got - want).abs() <= want * f64::EPSILON, "{got} vs {want}");
    }
}

#[test]
fn mixed_types_with_declared_output() {
    let expr = Expression::compile(
        "a + b",
        &[
            VarDesc::array("a", DType::I32),
            VarDesc::array("b", DType::F64),
        ],
        Some(DType::F32),
    )
    .unwrap();
    assert_eq!(expr.out_dtype(), DType::F32);
    let a = [10i32, 20, 30, 40, 50];
    let b = [1.5f64, 2.5, 3.5, 4.5, 5.5];
    let mut out = [0f32; 5];
    expr.eval(
        &[ArrayRef::I32(&a), ArrayRef::F64(&b)],
        &mut ArrayMut::F32(&mut out),
        5,
        None,
    )
    .unwrap();
    assert_eq!(out, [11.5f32, 22.5, 33.5, 44.5, 55.5]);
}

#[test]
fn predicate_reduction() {
    let expr = Expression::compile("sum(x == 1)", &[VarDesc::array("x", DType::I32)], None)
        .unwrap();
    assert_eq!(expr.out_dtype(), DType::I64);
    let x = [0i32, 1, 1, 2, 1, 3];
    let mut out = [0i64; 1];
    expr.eval(&[ArrayRef::I32(&x)], &mut ArrayMut::I64(&mut out), 6, None)
        .unwrap();
    assert_eq!(out[0], 3);
}

#[test]
fn elementwise_where_clamp() {
    let expr = Expression::compile(
        "where(x < 0, 0, where(x > 1, 1, x))",
        &[VarDesc::array("x", DType::F64)],
        Some(DType::F64),
    )
    .unwrap();
    let x = [-0.5f64, 0.0, 0.3, 0.7, 1.0, 1.5];
    let mut out = [0f64; 6];
    expr.eval(&[ArrayRef::F64(&x)], &mut ArrayMut::F64(&mut out), 6, None)
        .unwrap();
    assert_eq!(out, [0.0, 0.0, 0.3, 0.7, 1.0, 1.0]);
}

const MANDELBROT: &str = "\
def kernel(cr, ci):
    zr = cr * 0.0
    zi = cr * 0.0
    count = cr * 0
    for i in range(100):
        zr2 = zr * zr - zi * zi + cr
        zi = 2.0 * zr * zi + ci
        zr = zr2
        still_in = zr * zr + zi * zi <= 4.0
        count = count + where(still_in, 1, 0)
        break if all(zr * zr + zi * zi > 4.0)
    return count
";

#[test]
fn multi_statement_mandelbrot() {
    let expr = Expression::compile(
        MANDELBROT,
        &[
            VarDesc::array("cr", DType::F64),
            VarDesc::array("ci", DType::F64),
        ],
        Some(DType::I32),
    )
    .unwrap();
    let cr = [-0.5f64, 1.0];
    let ci = [0.0f64, 0.0];
    let mut out = [0i32; 2];
    expr.eval(
        &[ArrayRef::F64(&cr), ArrayRef::F64(&ci)],
        &mut ArrayMut::I32(&mut out),
        2,
        None,
    )
    .unwrap();
    // c = -0.5 is in the set: all 100 iterations stay bounded.
    assert_eq!(out[0], 100);
    // c = 1.0 escapes within a few iterations.
    assert!(out[1] <= 3, "escape count {}", out[1]);
}

#[test]
fn nd_padding_reduction() {
    let layout = NdLayout {
        shape: vec![7, 7, 7],
        chunk: vec![64, 64, 64],
        block: vec![24, 24, 24],
    };
    let expr = Expression::compile_nd(
        "sum(x > 1)",
        &[VarDesc::array("x", DType::I32)],
        None,
        layout,
        None,
    )
    .unwrap();

    let valid = expr.valid_nitems(0, 0).unwrap();
    assert_eq!(valid, 343);

    // The block buffer holds padding garbage past the valid prefix.
    let total = 24 * 24 * 24;
    let mut x = vec![1_000_000i32; total];
    let mut expected = 0i64;
    for (i, v) in x.iter_mut().enumerate().take(valid) {
        *v = (i % 4) as i32;
        if *v > 1 {
            expected += 1;
        }
    }

    let mut out = [0i64; 1];
    expr.eval_nd(
        &[ArrayRef::I32(&x)],
        &mut ArrayMut::I64(&mut out),
        0,
        0,
        None,
    )
    .unwrap();
    assert_eq!(out[0], expected);
}

#[test]
fn nd_padding_elementwise_zeroes_the_tail() {
    let layout = NdLayout {
        shape: vec![10],
        chunk: vec![8],
        block: vec![4],
    };
    let expr = Expression::compile_nd(
        "x * 3",
        &[VarDesc::array("x", DType::I32)],
        None,
        layout,
        None,
    )
    .unwrap();
    assert_eq!(expr.valid_nitems(1, 0).unwrap(), 2);

    let x = [5i32, 6, -9, -9];
    let mut out = [77i32; 4];
    expr.eval_nd(&[ArrayRef::I32(&x)], &mut ArrayMut::I32(&mut out), 1, 0, None)
        .unwrap();
    assert_eq!(out, [15, 18, 0, 0]);
}

// ---------------------------------------------------------------------------
// general invariants
// ---------------------------------------------------------------------------

#[test]
fn determinism_for_fixed_inputs() {
    let expr = Expression::compile(
        "sin(x) * exp(x / 10.0)",
        &[VarDesc::array("x", DType::F64)],
        None,
    )
    .unwrap();
    let x: Vec<f64> = (0..5000).map(|i| i as f64 * 0.01 - 25.0).collect();
    let mut out1 = vec![0f64; x.len()];
    let mut out2 = vec![0f64; x.len()];
    expr.eval(&[ArrayRef::F64(&x)], &mut ArrayMut::F64(&mut out1), x.len(), None)
        .unwrap();
    expr.eval(&[ArrayRef::F64(&x)], &mut ArrayMut::F64(&mut out2), x.len(), None)
        .unwrap();
    assert_eq!(out1, out2);
}

#[test]
fn promotion_equivalence_against_manual_cast() {
    // a(int16) * b(uint16) promotes to int32: compare against computing
    // in pre-promoted arrays.
    let mixed = Expression::compile(
        "a * b",
        &[
            VarDesc::array("a", DType::I16),
            VarDesc::array("b", DType::U16),
        ],
        Some(DType::I32),
    )
    .unwrap();
    let promoted = Expression::compile(
        "a * b",
        &[
            VarDesc::array("a", DType::I32),
            VarDesc::array("b", DType::I32),
        ],
        Some(DType::I32),
    )
    .unwrap();

    let a16: Vec<i16> = (-100..100).collect();
    let b16: Vec<u16> = (0..200).map(|i| (i * 7) as u16).collect();
    let a32: Vec<i32> = a16.iter().map(|&v| v as i32).collect();
    let b32: Vec<i32> = b16.iter().map(|&v| v as i32).collect();

    let mut out1 = vec![0i32; a16.len()];
    let mut out2 = vec![0i32; a16.len()];
    mixed
        .eval(
            &[ArrayRef::I16(&a16), ArrayRef::U16(&b16)],
            &mut ArrayMut::I32(&mut out1),
            a16.len(),
            None,
        )
        .unwrap();
    promoted
        .eval(
            &[ArrayRef::I32(&a32), ArrayRef::I32(&b32)],
            &mut ArrayMut::I32(&mut out2),
            a32.len(),
            None,
        )
        .unwrap();
    assert_eq!(out1, out2);
}

#[test]
fn reduction_matches_plain_loop_over_many_blocks() {
    let n = 50_000usize;
    let x: Vec<f64> = (0..n).map(|i| (i as f64).sin()).collect();
    let expr = Expression::compile("sum(x)", &[VarDesc::array("x", DType::F64)], None).unwrap();
    let mut out = [0f64; 1];
    expr.eval(&[ArrayRef::F64(&x)], &mut ArrayMut::F64(&mut out), n, None)
        .unwrap();
    // Block-order partial combination differs from the naive loop by
    // rounding only.
    let naive: f64 = x.iter().sum();
    assert!((out[0] - naive).abs() < 1e-6, "{} vs {naive}", out[0]);
}

#[test]
fn jit_matches_interpreter_for_integer_expression() {
    let expr = Expression::compile(
        "(a * 3 + b) % 17",
        &[
            VarDesc::array("a", DType::I64),
            VarDesc::array("b", DType::I64),
        ],
        None,
    )
    .unwrap();
    let n = 10_000usize;
    let a: Vec<i64> = (0..n as i64).collect();
    let b: Vec<i64> = (0..n as i64).map(|i| i * i % 1000).collect();

    let mut interp = vec![0i64; n];
    expr.eval(
        &[ArrayRef::I64(&a), ArrayRef::I64(&b)],
        &mut ArrayMut::I64(&mut interp),
        n,
        Some(&EvalParams::with_jit(JitMode::Off)),
    )
    .unwrap();

    // With the JIT forced on, a missing C compiler degrades silently to
    // the interpreter, so the comparison holds either way.
    let mut jit = vec![0i64; n];
    expr.eval(
        &[ArrayRef::I64(&a), ArrayRef::I64(&b)],
        &mut ArrayMut::I64(&mut jit),
        n,
        Some(&EvalParams::with_jit(JitMode::On)),
    )
    .unwrap();

    assert_eq!(interp, jit);
}

#[test]
fn jit_matches_interpreter_for_float_kernel() {
    let src = "\
def kernel(x):
    y = x * 0.5
    if x > 1.0:
        y = y + 2.0
    else:
        y = y - 2.0
    return y
";
    let expr =
        Expression::compile(src, &[VarDesc::array("x", DType::F64)], None).unwrap();
    let n = 4096 * 3 + 17;
    let x: Vec<f64> = (0..n).map(|i| i as f64 * 0.001).collect();

    let mut interp = vec![0f64; n];
    expr.eval(
        &[ArrayRef::F64(&x)],
        &mut ArrayMut::F64(&mut interp),
        n,
        Some(&EvalParams::with_jit(JitMode::Off)),
    )
    .unwrap();

    let mut jit = vec![0f64; n];
    expr.eval(
        &[ArrayRef::F64(&x)],
        &mut ArrayMut::F64(&mut jit),
        n,
        Some(&EvalParams::with_jit(JitMode::On)),
    )
    .unwrap();

    for i in 0..n {
        assert!(
            (interp[i] - jit[i]).abs() <= f64::EPSILON * interp[i].abs().max(1.0),
            "lane {i}: {} vs {}",
            interp[i],
            jit[i]
        );
    }
}

#[test]
fn homogeneous_mode_takes_the_output_dtype() {
    let expr = Expression::compile(
        "a * b + 1",
        &[VarDesc::auto("a"), VarDesc::auto("b")],
        Some(DType::F32),
    )
    .unwrap();
    let a = [1.5f32, 2.5];
    let b = [2.0f32, 4.0];
    let mut out = [0f32; 2];
    expr.eval(
        &[ArrayRef::F32(&a), ArrayRef::F32(&b)],
        &mut ArrayMut::F32(&mut out),
        2,
        None,
    )
    .unwrap();
    assert_eq!(out, [4.0f32, 11.0]);
}

#[test]
fn complex_magnitude_end_to_end() {
    use num_complex::Complex64;
    let expr = Expression::compile(
        "abs(z * z + 1.0)",
        &[VarDesc::array("z", DType::C128)],
        None,
    )
    .unwrap();
    assert_eq!(expr.out_dtype(), DType::F64);
    let z = [Complex64::new(0.0, 1.0), Complex64::new(3.0, 4.0)];
    let mut out = [0f64; 2];
    expr.eval(&[ArrayRef::C128(&z)], &mut ArrayMut::F64(&mut out), 2, None)
        .unwrap();
    // i^2 + 1 = 0; (3+4i)^2 + 1 = -6 + 24i, |.| = sqrt(612).
    assert!(out[0].abs() < 1e-12);
    assert!((out[1] - 612.0f64.sqrt()).abs() < 1e-9);
}

#[test]
fn randomized_inputs_match_a_plain_loop() {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let n = 12_345usize;
    let a: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1000.0)).collect();
    let b: Vec<f64> = (0..n).map(|_| rng.gen_range(-10.0..10.0)).collect();

    let expr = Expression::compile(
        "sqrt(a) * b + 1.0",
        &[
            VarDesc::array("a", DType::F64),
            VarDesc::array("b", DType::F64),
        ],
        None,
    )
    .unwrap();
    let mut out = vec![0f64; n];
    expr.eval(
        &[ArrayRef::F64(&a), ArrayRef::F64(&b)],
        &mut ArrayMut::F64(&mut out),
        n,
        None,
    )
    .unwrap();

    for i in 0..n {
        let want = a[i].sqrt() * b[i] + 1.0;
        assert!(
            (out[i] - want).abs() <= f64::EPSILON * want.abs().max(1.0),
            "lane {i}: {} vs {want}",
            out[i]
        );
    }
}

#[test]
fn registered_closure_carries_state() {
    use std::sync::Arc;
    let scale = 2.5f64;
    let closure = blockexpr::ClosureFn::new(1, Arc::new(move |args: &[f64]| args[0] * scale));
    let expr = Expression::compile(
        "scaled(x) + 1.0",
        &[
            VarDesc::array("x", DType::F64),
            VarDesc::closure("scaled", closure),
        ],
        None,
    )
    .unwrap();
    let x = [2.0f64, 4.0];
    let mut out = [0f64; 2];
    expr.eval(&[ArrayRef::F64(&x)], &mut ArrayMut::F64(&mut out), 2, None)
        .unwrap();
    assert_eq!(out, [6.0, 11.0]);
}
