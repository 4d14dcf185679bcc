//! Padding-aware evaluation over rectangular chunked layouts.
//!
//! A plan compiled with an [`NdLayout`](blockexpr_core::NdLayout) knows
//! its logical shape, chunk tile, and block tile. For a given (chunk,
//! block) pair only the first `valid_nitems` elements of the caller's
//! block buffers are real data; [`evaluate_nd`] computes exactly those
//! and zero-fills the padding region of the output, so downstream
//! consumers can treat the whole block as initialized. Reductions
//! accumulate over valid elements only.

use blockexpr_core::{ArrayMut, ArrayRef, EvalError, EvalParams, Plan};

use crate::block::evaluate;

/// Count of non-padding elements of block `nblock` within chunk
/// `nchunk`.
pub fn valid_nitems(plan: &Plan, nchunk: i64, nblock: i64) -> Result<usize, EvalError> {
    let nd = plan
        .nd
        .as_ref()
        .ok_or_else(|| EvalError::invalid_arg("plan was compiled without nd metadata"))?;
    nd.valid_nitems(nchunk, nblock).ok_or_else(|| {
        EvalError::invalid_arg(format!(
            "(chunk {nchunk}, block {nblock}) is outside the nd grid"
        ))
    })
}

/// Evaluates one (chunk, block) tile: the valid prefix is computed, the
/// padding suffix of the output is zeroed.
pub fn evaluate_nd(
    plan: &Plan,
    vars: &[ArrayRef<'_>],
    out: &mut ArrayMut<'_>,
    nchunk: i64,
    nblock: i64,
    params: &EvalParams,
) -> Result<(), EvalError> {
    let valid = valid_nitems(plan, nchunk, nblock)?;
    let total = plan.nd.as_ref().expect("checked above").block_nitems();

    evaluate(plan, vars, out, valid, params)?;

    // Zero the padding region so every lane of the block is defined.
    let result_is_scalar = {
        let expr = if plan.script {
            crate::dsl::return_expr(plan)
        } else {
            plan.root
        };
        plan.arena.contains_reduce(expr)
    };
    let pad_from = if result_is_scalar { 1 } else { valid };
    if out.len() > pad_from {
        let upto = out.len().min(total.max(pad_from));
        zero_pad(out, pad_from, upto);
    }
    Ok(())
}

/// Writes zeros into `out[from..to]`; used for the padding region.
pub fn zero_pad(out: &mut ArrayMut<'_>, from: usize, to: usize) {
    macro_rules! zero_arm {
        ($d:expr, $z:expr) => {
            for v in &mut $d[from..to] {
                *v = $z;
            }
        };
    }
    match out {
        ArrayMut::Bool(d) => zero_arm!(d, false),
        ArrayMut::I8(d) => zero_arm!(d, 0),
        ArrayMut::I16(d) => zero_arm!(d, 0),
        ArrayMut::I32(d) => zero_arm!(d, 0),
        ArrayMut::I64(d) => zero_arm!(d, 0),
        ArrayMut::U8(d) => zero_arm!(d, 0),
        ArrayMut::U16(d) => zero_arm!(d, 0),
        ArrayMut::U32(d) => zero_arm!(d, 0),
        ArrayMut::U64(d) => zero_arm!(d, 0),
        ArrayMut::F32(d) => zero_arm!(d, 0.0),
        ArrayMut::F64(d) => zero_arm!(d, 0.0),
        ArrayMut::C64(d) => zero_arm!(d, num_complex::Complex32::new(0.0, 0.0)),
        ArrayMut::C128(d) => zero_arm!(d, num_complex::Complex64::new(0.0, 0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockexpr_check::{analyze, AnalyzeOptions};
    use blockexpr_core::{DType, NdLayout, VarDesc};
    use blockexpr_syntax::parse_expression;

    fn nd_plan(src: &str, vars: &[VarDesc], layout: NdLayout) -> Plan {
        let (arena, root) = parse_expression(src).unwrap();
        let opts = AnalyzeOptions {
            block_size: 512,
            nd: Some(layout),
        };
        analyze(arena, root, vars, None, opts).unwrap()
    }

    #[test]
    fn cube_reduction_counts_only_valid_elements() {
        // Logical 7x7x7 array in one 64^3 chunk of one 24^3 block.
        let layout = NdLayout {
            shape: vec![7, 7, 7],
            chunk: vec![64, 64, 64],
            block: vec![24, 24, 24],
        };
        let plan = nd_plan("sum(x > 1)", &[VarDesc::array("x", DType::I32)], layout);

        let valid = valid_nitems(&plan, 0, 0).unwrap();
        assert_eq!(valid, 343);

        // Valid prefix 0..343 holds the logical values; padding after it
        // holds garbage that must not leak into the result.
        let total = plan.nd.as_ref().unwrap().block_nitems();
        let mut x = vec![99i32; total];
        for (i, v) in x.iter_mut().enumerate().take(valid) {
            *v = (i % 5) as i32; // values 0..4, greater than 1 for 2,3,4
        }
        let expected = (0..valid).filter(|i| (i % 5) as i32 > 1).count() as i64;

        let mut out = vec![123i64; 4];
        evaluate_nd(
            &plan,
            &[ArrayRef::I32(&x)],
            &mut ArrayMut::I64(&mut out),
            0,
            0,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out[0], expected);
        // The rest of the output buffer was zeroed.
        assert_eq!(&out[1..], &[0, 0, 0]);
    }

    #[test]
    fn elementwise_padding_is_zeroed() {
        let layout = NdLayout {
            shape: vec![10],
            chunk: vec![8],
            block: vec![4],
        };
        let plan = nd_plan("x * 2", &[VarDesc::array("x", DType::I32)], layout);

        // Chunk 1 holds logical elements 8..10; its first block has two
        // valid elements.
        assert_eq!(valid_nitems(&plan, 1, 0).unwrap(), 2);

        let x = [100i32, 200, -7, -7];
        let mut out = [55i32; 4];
        evaluate_nd(
            &plan,
            &[ArrayRef::I32(&x)],
            &mut ArrayMut::I32(&mut out),
            1,
            0,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [200, 400, 0, 0]);
    }

    #[test]
    fn out_of_grid_indices_are_invalid() {
        let layout = NdLayout {
            shape: vec![10],
            chunk: vec![8],
            block: vec![4],
        };
        let plan = nd_plan("x * 2", &[VarDesc::array("x", DType::I32)], layout);
        assert!(valid_nitems(&plan, 5, 0).is_err());
        assert!(valid_nitems(&plan, 0, 9).is_err());
    }

    #[test]
    fn plan_without_nd_metadata_is_rejected() {
        let (arena, root) = parse_expression("x * 2").unwrap();
        let plan = analyze(
            arena,
            root,
            &[VarDesc::array("x", DType::I32)],
            None,
            AnalyzeOptions::default(),
        )
        .unwrap();
        let x = [1i32];
        let mut out = [0i32; 1];
        let err = evaluate_nd(
            &plan,
            &[ArrayRef::I32(&x)],
            &mut ArrayMut::I32(&mut out),
            0,
            0,
            &EvalParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::InvalidArg { .. }));
    }
}
