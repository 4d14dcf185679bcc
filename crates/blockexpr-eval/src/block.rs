//! The block-scheduled evaluator.
//!
//! [`evaluate`] validates the caller's arrays against the compiled plan,
//! then walks the input in blocks of `plan.block_size` elements. Within a
//! block the AST is evaluated post-order into pool-recycled typed
//! buffers; children whose dtype differs from the kernel's operand dtype
//! are lazily coerced through a cast temporary; the root result is cast
//! to the declared output dtype on the way out.
//!
//! All mutable state lives in the per-call [`Exec`]; the plan itself is
//! never written, so concurrent evaluate calls on one compiled
//! expression are sound by construction.

use blockexpr_core::{
    ArrayMut, ArrayRef, BinaryOp, Builtin, CallTarget, CmpOp, DType, EngineConfig, EvalError,
    EvalParams, Literal, NodeId, NodeKind, Plan, ReduceOp, UlpMode, UnaryOp, VarKind, MAX_ARITY,
    MAX_VARS,
};

use crate::buffer::{Buffer, BufferPool, Scalar};
use crate::kernels::scalar;
use crate::reduce::Reduction;
use crate::registry::KernelRegistry;

/// How a scalar expression resolves its reduction nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReduceLookup {
    /// Use the cross-block accumulators in [`Exec::accs`] (the final
    /// value of a whole evaluate call).
    Accumulated,
    /// Reduce over the current block only (DSL conditions and print).
    WithinBlock,
}

/// Per-call evaluation state.
pub(crate) struct Exec<'p, 'v> {
    pub plan: &'p Plan,
    vars: &'v [ArrayRef<'v>],
    /// Ordinal -> index into `vars` for array descriptors.
    array_index: Vec<Option<usize>>,
    pub pool: BufferPool,
    /// Slot id -> live buffer (DSL locals, phis, induction variables).
    pub locals: Vec<Buffer>,
    /// Cross-block reduction accumulators, keyed by reduce node id.
    pub accs: Vec<(NodeId, Reduction)>,
    force_scalar: bool,
    ulp: UlpMode,
    pub off: usize,
    pub len: usize,
    pub printed: bool,
}

impl<'p, 'v> Exec<'p, 'v> {
    pub fn new(plan: &'p Plan, vars: &'v [ArrayRef<'v>], params: &EvalParams) -> Self {
        let mut array_index = Vec::with_capacity(plan.vars.len());
        let mut next = 0usize;
        for v in &plan.vars {
            if v.kind.is_array() {
                array_index.push(Some(next));
                next += 1;
            } else {
                array_index.push(None);
            }
        }
        let locals = if plan.script {
            plan.slots
                .iter()
                .map(|s| Buffer::zeroed(s.dtype, if s.scalar { 1 } else { plan.block_size }))
                .collect()
        } else {
            Vec::new()
        };
        Exec {
            plan,
            vars,
            array_index,
            pool: BufferPool::new(),
            locals,
            accs: Vec::new(),
            force_scalar: params.force_scalar,
            ulp: params.ulp_mode.unwrap_or(EngineConfig::global().ulp_mode),
            off: 0,
            len: 0,
            printed: false,
        }
    }

    pub fn set_block(&mut self, off: usize, len: usize) {
        self.off = off;
        self.len = len;
    }

    /// Seeds one cross-block accumulator per reduction node under `expr`.
    pub fn seed_accumulators(&mut self, expr: NodeId) -> Vec<NodeId> {
        let plan = self.plan;
        let mut nodes = Vec::new();
        plan.arena.collect_reduce_nodes(expr, &mut nodes);
        self.accs = nodes
            .iter()
            .map(|&id| {
                let node = plan.arena.get(id);
                let NodeKind::Reduce { op, .. } = node.kind else {
                    unreachable!("collect_reduce_nodes returned a non-reduce node")
                };
                let input = plan.arena.dtype_of(node.children[0]);
                (id, Reduction::new(op, input))
            })
            .collect();
        nodes
    }

    /// Folds the current block into the accumulator of one reduce node.
    pub fn accumulate(&mut self, id: NodeId) -> Result<(), EvalError> {
        let node = self.plan.arena.get(id);
        let NodeKind::Reduce {
            op,
            fused_predicate,
        } = node.kind
        else {
            unreachable!("accumulate on a non-reduce node")
        };
        let child = node.children[0];
        if fused_predicate {
            let partial = self.fused_partial(child, op)?;
            self.acc_entry(id).merge(partial);
        } else {
            let buf = self.eval_vector(child)?;
            self.acc_entry(id).update(&buf);
            self.pool.give(buf);
        }
        Ok(())
    }

    fn acc_entry(&mut self, id: NodeId) -> &mut Reduction {
        &mut self
            .accs
            .iter_mut()
            .find(|(nid, _)| *nid == id)
            .expect("accumulator seeded for every reduce node")
            .1
    }

    /// Fused predicate reduction over the current block: compare and
    /// accumulate without materializing the bool mask.
    fn fused_partial(&mut self, cmp_node: NodeId, op: ReduceOp) -> Result<Scalar, EvalError> {
        let node = self.plan.arena.get(cmp_node);
        let NodeKind::Compare(cmp) = node.kind else {
            unreachable!("fused reduction over a non-comparison")
        };
        let (c0, c1) = (node.children[0], node.children[1]);
        let pd = DType::promote(self.plan.arena.dtype_of(c0), self.plan.arena.dtype_of(c1))
            .expect("validated at analysis");
        let a = self.eval_vector(c0)?;
        let a = self.coerce(a, pd);
        let b = self.eval_vector(c1)?;
        let b = self.coerce(b, pd);
        let mode = match op {
            ReduceOp::Sum => scalar::FusedMode::Count,
            ReduceOp::Any => scalar::FusedMode::Any,
            ReduceOp::All => scalar::FusedMode::All,
            other => unreachable!("fused mode for {other:?}"),
        };
        let partial = scalar::compare_fused(cmp, &a, &b, mode);
        self.pool.give(a);
        self.pool.give(b);
        Ok(partial)
    }

    /// Casts `buf` to `to` through a pool temporary; identity is free.
    pub fn coerce(&mut self, buf: Buffer, to: DType) -> Buffer {
        if buf.dtype() == to {
            return buf;
        }
        let mut out = self.pool.take(to, buf.len());
        scalar::cast(&buf, &mut out);
        self.pool.give(buf);
        out
    }

    // -----------------------------------------------------------------------
    // element-wise evaluation
    // -----------------------------------------------------------------------

    /// Evaluates an element-wise subtree for the current block, returning
    /// one buffer of `self.len` elements in the node's inferred dtype.
    pub fn eval_vector(&mut self, id: NodeId) -> Result<Buffer, EvalError> {
        let node = self.plan.arena.get(id);
        let dtype = self.plan.arena.dtype_of(id);
        let children: &[NodeId] = &node.children;

        match &node.kind {
            NodeKind::Literal(Literal::Str(bytes)) => {
                let mut packed = Vec::with_capacity(bytes.len() * self.len);
                for _ in 0..self.len {
                    packed.extend_from_slice(bytes);
                }
                Ok(Buffer::Str {
                    bytes: packed,
                    itemsize: bytes.len(),
                })
            }
            NodeKind::Literal(lit) => {
                let mut b = self.pool.take(dtype, self.len);
                scalar::fill(&mut b, Scalar::from_literal(lit));
                Ok(b)
            }

            NodeKind::Var { ordinal } => {
                let idx = self.array_index[*ordinal as usize]
                    .expect("non-array variable reference survived analysis");
                let mut b = self.pool.take(dtype, self.len);
                b.load(&self.vars[idx], self.off, self.len);
                Ok(b)
            }

            NodeKind::Local { slot } => {
                let mut b = self.pool.take(dtype, self.len);
                b.copy_prefix_from(&self.locals[*slot as usize], self.len);
                Ok(b)
            }

            NodeKind::Unary(op) => {
                let a = self.eval_vector(children[0])?;
                let mut out = self.pool.take(dtype, self.len);
                KernelRegistry::get().unary(*op)(&a, &mut out);
                self.pool.give(a);
                Ok(out)
            }

            NodeKind::Binary(op) => {
                let (c0, c1) = (children[0], children[1]);
                let pd =
                    DType::promote(self.plan.arena.dtype_of(c0), self.plan.arena.dtype_of(c1))
                        .expect("validated at analysis");
                let a = self.eval_vector(c0)?;
                let a = self.coerce(a, pd);
                let b = self.eval_vector(c1)?;
                let b = self.coerce(b, pd);
                let mut out = self.pool.take(dtype, self.len);
                KernelRegistry::get().binary(*op)(&a, &b, &mut out);
                self.pool.give(a);
                self.pool.give(b);
                Ok(out)
            }

            NodeKind::Compare(op) => {
                let (c0, c1) = (children[0], children[1]);
                let pd =
                    DType::promote(self.plan.arena.dtype_of(c0), self.plan.arena.dtype_of(c1))
                        .expect("validated at analysis");
                let a = self.eval_vector(c0)?;
                let a = self.coerce(a, pd);
                let b = self.eval_vector(c1)?;
                let b = self.coerce(b, pd);
                let mut out = self.pool.take(DType::Bool, self.len);
                KernelRegistry::get().compare(*op)(&a, &b, &mut out);
                self.pool.give(a);
                self.pool.give(b);
                Ok(out)
            }

            NodeKind::Where => {
                let cond = self.eval_vector(children[0])?;
                let t = self.eval_vector(children[1])?;
                let t = self.coerce(t, dtype);
                let f = self.eval_vector(children[2])?;
                let f = self.coerce(f, dtype);
                let mut out = self.pool.take(dtype, self.len);
                let Buffer::Bool(mask) = &cond else {
                    unreachable!("where condition is bool")
                };
                scalar::blend(mask, &t, &f, &mut out);
                self.pool.give(cond);
                self.pool.give(t);
                self.pool.give(f);
                Ok(out)
            }

            NodeKind::Call(CallTarget::Builtin(b)) => self.eval_builtin(*b, children, dtype),

            NodeKind::Call(CallTarget::Registered(ordinal)) => {
                self.eval_registered(*ordinal, children)
            }

            other => Err(EvalError::invalid_arg(format!(
                "internal: {other:?} in element-wise position"
            ))),
        }
    }

    fn eval_builtin(
        &mut self,
        b: Builtin,
        children: &[NodeId],
        dtype: DType,
    ) -> Result<Buffer, EvalError> {
        let mut pd = self.plan.arena.dtype_of(children[0]);
        for &c in &children[1..] {
            pd = DType::promote(pd, self.plan.arena.dtype_of(c)).expect("validated at analysis");
        }
        // Integer arguments to a float builtin are coerced straight to the
        // result's float dtype; otherwise arguments meet at their promoted
        // dtype (which may be wider than the result, e.g. abs on complex).
        let input_dt = if dtype.is_float() && pd.is_integer() {
            dtype
        } else {
            pd
        };

        let mut args = Vec::with_capacity(children.len());
        for &c in children {
            let a = self.eval_vector(c)?;
            args.push(self.coerce(a, input_dt));
        }
        let mut out = self.pool.take(dtype, self.len);
        match args.as_slice() {
            [a] => scalar::builtin1(b, a, &mut out, !self.force_scalar, self.ulp),
            [a0, a1] => scalar::builtin2(b, a0, a1, &mut out),
            _ => unreachable!("builtin arity validated at analysis"),
        }
        for a in args {
            self.pool.give(a);
        }
        Ok(out)
    }

    fn eval_registered(
        &mut self,
        ordinal: u32,
        children: &[NodeId],
    ) -> Result<Buffer, EvalError> {
        let mut args = Vec::with_capacity(children.len());
        for &c in children {
            let a = self.eval_vector(c)?;
            args.push(self.coerce(a, DType::F64));
        }
        let mut out = self.pool.take(DType::F64, self.len);
        {
            let Buffer::F64(o) = &mut out else { unreachable!() };
            let mut lanes = [0f64; MAX_ARITY];
            let nargs = children.len();
            for i in 0..self.len {
                for (k, a) in args.iter().enumerate() {
                    let Buffer::F64(v) = a else { unreachable!() };
                    lanes[k] = v[i];
                }
                o[i] = match &self.plan.vars[ordinal as usize].kind {
                    VarKind::Func(f) => f.call(&lanes[..nargs]),
                    VarKind::Closure(c) => c.call(&lanes[..nargs]),
                    VarKind::Array => unreachable!("array called as function"),
                };
            }
        }
        for a in args {
            self.pool.give(a);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // scalar evaluation
    // -----------------------------------------------------------------------

    /// Evaluates a scalar expression: literals, reductions, and
    /// element-wise combinations of those.
    pub fn eval_scalar(&mut self, id: NodeId, mode: ReduceLookup) -> Result<Scalar, EvalError> {
        let node = self.plan.arena.get(id);
        let dtype = self.plan.arena.dtype_of(id);
        let children: &[NodeId] = &node.children;

        match &node.kind {
            NodeKind::Literal(lit) => Ok(Scalar::from_literal(lit)),

            NodeKind::Reduce {
                op,
                fused_predicate,
            } => match mode {
                ReduceLookup::Accumulated => Ok(self.acc_entry(id).finish()),
                ReduceLookup::WithinBlock => {
                    let child = children[0];
                    let mut r = Reduction::new(*op, self.plan.arena.dtype_of(child));
                    if *fused_predicate {
                        let partial = self.fused_partial(child, *op)?;
                        r.merge(partial);
                    } else {
                        let buf = self.eval_vector(child)?;
                        r.update(&buf);
                        self.pool.give(buf);
                    }
                    Ok(r.finish())
                }
            },

            NodeKind::Unary(op) => {
                let a = self.eval_scalar(children[0], mode)?;
                Ok(scalar_unary(*op, a, dtype))
            }

            NodeKind::Binary(op) => {
                let a = self.eval_scalar(children[0], mode)?;
                let b = self.eval_scalar(children[1], mode)?;
                Ok(scalar_binary(*op, a, b, dtype))
            }

            NodeKind::Compare(op) => {
                let a = self.eval_scalar(children[0], mode)?;
                let b = self.eval_scalar(children[1], mode)?;
                Ok(scalar_compare(*op, a, b))
            }

            NodeKind::Call(CallTarget::Builtin(b)) => {
                let mut args = Vec::with_capacity(children.len());
                for &c in children {
                    args.push(self.eval_scalar(c, mode)?);
                }
                Ok(scalar_builtin(*b, &args, dtype))
            }

            other => Err(EvalError::invalid_arg(format!(
                "internal: {other:?} in scalar position"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// scalar arithmetic helpers
// ---------------------------------------------------------------------------

fn wrap_scalar_int(v: i64, dt: DType) -> Scalar {
    match dt {
        DType::I8 => Scalar::Int(v as i8 as i64),
        DType::I16 => Scalar::Int(v as i16 as i64),
        DType::I32 => Scalar::Int(v as i32 as i64),
        DType::U8 => Scalar::UInt(v as u8 as u64),
        DType::U16 => Scalar::UInt(v as u16 as u64),
        DType::U32 => Scalar::UInt(v as u32 as u64),
        DType::U64 => Scalar::UInt(v as u64),
        _ => Scalar::Int(v),
    }
}

pub(crate) fn scalar_binary(op: BinaryOp, a: Scalar, b: Scalar, dt: DType) -> Scalar {
    if op.is_logical() {
        let (x, y) = (a.as_bool(), b.as_bool());
        return Scalar::Bool(if op == BinaryOp::And { x && y } else { x || y });
    }
    if dt.is_complex() {
        let (x, y) = (a.as_complex(), b.as_complex());
        let v = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Pow => x.powc(y),
            other => unreachable!("complex scalar op {other:?}"),
        };
        return Scalar::Complex(v);
    }
    if dt.is_float() {
        let (x, y) = (a.as_f64(), b.as_f64());
        let v = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Mod => x % y,
            BinaryOp::Pow => x.powf(y),
            other => unreachable!("float scalar op {other:?}"),
        };
        return Scalar::Float(v);
    }
    if dt.is_bool() {
        let (x, y) = (a.as_bool(), b.as_bool());
        let v = match op {
            BinaryOp::BitAnd => x && y,
            BinaryOp::BitOr => x || y,
            BinaryOp::BitXor => x != y,
            other => unreachable!("bool scalar op {other:?}"),
        };
        return Scalar::Bool(v);
    }

    let (x, y) = (a.as_i64(), b.as_i64());
    let v = match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div => x.checked_div(y).unwrap_or(0),
        BinaryOp::Mod => x.checked_rem(y).unwrap_or(0),
        BinaryOp::Pow => scalar::ipow(x, y),
        BinaryOp::BitAnd => x & y,
        BinaryOp::BitOr => x | y,
        BinaryOp::BitXor => x ^ y,
        BinaryOp::Shl => x.wrapping_shl(y as u32),
        BinaryOp::Shr => x.wrapping_shr(y as u32),
        BinaryOp::And | BinaryOp::Or => unreachable!(),
    };
    wrap_scalar_int(v, dt)
}

pub(crate) fn scalar_unary(op: UnaryOp, a: Scalar, dt: DType) -> Scalar {
    match op {
        UnaryOp::Not => Scalar::Bool(!a.as_bool()),
        UnaryOp::Neg => match a {
            Scalar::Complex(c) => Scalar::Complex(-c),
            Scalar::Float(f) => Scalar::Float(-f),
            other => wrap_scalar_int(other.as_i64().wrapping_neg(), dt),
        },
        UnaryOp::BitNot => match a {
            Scalar::Bool(b) => Scalar::Bool(!b),
            other => wrap_scalar_int(!other.as_i64(), dt),
        },
    }
}

pub(crate) fn scalar_compare(op: CmpOp, a: Scalar, b: Scalar) -> Scalar {
    let v = match (a, b) {
        (Scalar::Complex(x), y) | (y, Scalar::Complex(x)) => {
            let y = y.as_complex();
            match op {
                CmpOp::Eq => x == y,
                CmpOp::Ne => x != y,
                _ => unreachable!("ordering on complex"),
            }
        }
        (Scalar::Int(x), Scalar::Int(y)) => match op {
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Ge => x >= y,
            CmpOp::Gt => x > y,
        },
        (x, y) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            match op {
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
                CmpOp::Eq => x == y,
                CmpOp::Ne => x != y,
                CmpOp::Ge => x >= y,
                CmpOp::Gt => x > y,
            }
        }
    };
    Scalar::Bool(v)
}

pub(crate) fn scalar_builtin(b: Builtin, args: &[Scalar], dt: DType) -> Scalar {
    if dt.is_complex() || args.iter().any(|a| matches!(a, Scalar::Complex(_))) {
        let x = args[0].as_complex();
        return Scalar::Complex(match b {
            Builtin::Pow => x.powc(args[1].as_complex()),
            _ => scalar::complex_unary(b, x),
        });
    }
    if dt.is_integer() {
        // abs / rounding on integer scalars.
        let x = args[0].as_i64();
        let v = match b {
            Builtin::Abs => x.wrapping_abs(),
            _ => x,
        };
        return wrap_scalar_int(v, dt);
    }
    let x = args[0].as_f64();
    let v = match b {
        Builtin::Atan2 => x.atan2(args[1].as_f64()),
        Builtin::Pow => x.powf(args[1].as_f64()),
        Builtin::Fmod => x % args[1].as_f64(),
        Builtin::Hypot => x.hypot(args[1].as_f64()),
        _ => scalar::f64_unary(b)(x),
    };
    Scalar::Float(v)
}

// ---------------------------------------------------------------------------
// entry point
// ---------------------------------------------------------------------------

/// Checks the caller's arrays against the compiled plan: count, dtypes,
/// string itemsizes, lengths, and the output view. Shared with the JIT
/// path, which bypasses the interpreter but not its contract.
pub fn validate_call(
    plan: &Plan,
    vars: &[ArrayRef<'_>],
    out: &ArrayMut<'_>,
    n: usize,
    scalar_result: bool,
) -> Result<(), EvalError> {
    let expected = plan.array_var_count();
    if vars.len() > MAX_VARS {
        return Err(EvalError::TooManyVars {
            count: vars.len(),
            limit: MAX_VARS,
        });
    }
    if vars.len() != expected {
        return Err(EvalError::var_mismatch(format!(
            "expected {expected} arrays, got {}",
            vars.len()
        )));
    }
    let mut next = 0usize;
    for (ordinal, desc) in plan.vars.iter().enumerate() {
        if !desc.kind.is_array() {
            continue;
        }
        let arr = &vars[next];
        next += 1;
        let want = plan.var_dtypes[ordinal];
        if arr.dtype() != want {
            return Err(EvalError::var_mismatch(format!(
                "variable '{}' compiled as {want}, passed as {}",
                desc.name,
                arr.dtype()
            )));
        }
        if let (ArrayRef::Str { itemsize, .. }, Some(want_isz)) = (arr, desc.itemsize) {
            if *itemsize != want_isz {
                return Err(EvalError::var_mismatch(format!(
                    "variable '{}' itemsize {} differs from compiled {want_isz}",
                    desc.name, itemsize
                )));
            }
        }
        if arr.len() < n {
            return Err(EvalError::var_mismatch(format!(
                "variable '{}' holds {} elements, need {n}",
                desc.name,
                arr.len()
            )));
        }
    }
    if out.dtype() != plan.out_dtype {
        return Err(EvalError::var_mismatch(format!(
            "output compiled as {}, passed as {}",
            plan.out_dtype,
            out.dtype()
        )));
    }
    let out_needed = if scalar_result { 1 } else { n };
    if out.len() < out_needed {
        return Err(EvalError::var_mismatch(format!(
            "output holds {} elements, need {out_needed}",
            out.len()
        )));
    }
    Ok(())
}

/// Evaluates `n` elements of a compiled expression.
///
/// `vars` are the data arrays in descriptor order (registered callables
/// take no entry). For reduction expressions the single result lands in
/// `out[0]`; otherwise `out[..n]` is filled.
pub fn evaluate(
    plan: &Plan,
    vars: &[ArrayRef<'_>],
    out: &mut ArrayMut<'_>,
    n: usize,
    params: &EvalParams,
) -> Result<(), EvalError> {
    let result_expr = if plan.script {
        crate::dsl::return_expr(plan)
    } else {
        plan.root
    };
    let scalar_result = plan.arena.contains_reduce(result_expr);
    validate_call(plan, vars, out, n, scalar_result)?;
    tracing::trace!(n, block_size = plan.block_size, script = plan.script, "evaluating");

    let mut exec = Exec::new(plan, vars, params);

    if plan.script {
        return crate::dsl::run(&mut exec, out, n);
    }

    let block = plan.block_size.max(1);
    if scalar_result {
        let nodes = exec.seed_accumulators(plan.root);
        let mut off = 0;
        while off < n {
            let len = block.min(n - off);
            exec.set_block(off, len);
            for &id in &nodes {
                exec.accumulate(id)?;
            }
            off += len;
        }
        let s = exec.eval_scalar(plan.root, ReduceLookup::Accumulated)?;
        let mut one = exec.pool.take(plan.out_dtype, 1);
        scalar::fill(&mut one, s);
        one.store(out, 0);
    } else {
        let mut off = 0;
        while off < n {
            let len = block.min(n - off);
            exec.set_block(off, len);
            let buf = exec.eval_vector(plan.root)?;
            let buf = exec.coerce(buf, plan.out_dtype);
            buf.store(out, off);
            exec.pool.give(buf);
            off += len;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockexpr_check::{analyze, AnalyzeOptions};
    use blockexpr_core::VarDesc;
    use blockexpr_syntax::parse_expression;

    fn compile(src: &str, vars: &[VarDesc], out: Option<DType>) -> Plan {
        let (arena, root) = parse_expression(src).unwrap();
        analyze(arena, root, vars, out, AnalyzeOptions::default()).unwrap()
    }

    fn compile_block(src: &str, vars: &[VarDesc], out: Option<DType>, block: usize) -> Plan {
        let (arena, root) = parse_expression(src).unwrap();
        let opts = AnalyzeOptions {
            block_size: block,
            nd: None,
        };
        analyze(arena, root, vars, out, opts).unwrap()
    }

    #[test]
    fn elementwise_int_add() {
        let plan = compile(
            "a + b",
            &[
                VarDesc::array("a", DType::I32),
                VarDesc::array("b", DType::I32),
            ],
            Some(DType::I32),
        );
        let a = [0i32, 1, 2, 3, 4];
        let b = [10i32, 20, 30, 40, 50];
        let mut out = [0i32; 5];
        evaluate(
            &plan,
            &[ArrayRef::I32(&a), ArrayRef::I32(&b)],
            &mut ArrayMut::I32(&mut out),
            5,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [10, 21, 32, 43, 54]);
    }

    #[test]
    fn mixed_types_cast_to_declared_output() {
        let plan = compile(
            "a + b",
            &[
                VarDesc::array("a", DType::I32),
                VarDesc::array("b", DType::F64),
            ],
            Some(DType::F32),
        );
        let a = [10i32, 20, 30, 40, 50];
        let b = [1.5f64, 2.5, 3.5, 4.5, 5.5];
        let mut out = [0f32; 5];
        evaluate(
            &plan,
            &[ArrayRef::I32(&a), ArrayRef::F64(&b)],
            &mut ArrayMut::F32(&mut out),
            5,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [11.5f32, 22.5, 33.5, 44.5, 55.5]);
    }

    #[test]
    fn transcendental_pythagoras() {
        let plan = compile(
            "sqrt(a*a + b*b)",
            &[
                VarDesc::array("a", DType::F64),
                VarDesc::array("b", DType::F64),
            ],
            Some(DType::F64),
        );
        let a = [3.0f64, 5.0, 8.0];
        let b = [4.0f64, 12.0, 15.0];
        let mut out = [0f64; 3];
        evaluate(
            &plan,
            &[ArrayRef::F64(&a), ArrayRef::F64(&b)],
            &mut ArrayMut::F64(&mut out),
            3,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [5.0, 13.0, 17.0]);
    }

    #[test]
    fn predicate_reduction_sums_matches() {
        let plan = compile("sum(x == 1)", &[VarDesc::array("x", DType::I32)], None);
        assert_eq!(plan.out_dtype, DType::I64);
        let x = [0i32, 1, 1, 2, 1, 3];
        let mut out = [0i64; 1];
        evaluate(
            &plan,
            &[ArrayRef::I32(&x)],
            &mut ArrayMut::I64(&mut out),
            6,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out[0], 3);
    }

    #[test]
    fn nested_where_clamps() {
        let plan = compile(
            "where(x < 0, 0, where(x > 1, 1, x))",
            &[VarDesc::array("x", DType::F64)],
            Some(DType::F64),
        );
        let x = [-0.5f64, 0.0, 0.3, 0.7, 1.0, 1.5];
        let mut out = [0f64; 6];
        evaluate(
            &plan,
            &[ArrayRef::F64(&x)],
            &mut ArrayMut::F64(&mut out),
            6,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [0.0, 0.0, 0.3, 0.7, 1.0, 1.0]);
    }

    #[test]
    fn block_size_independence() {
        let n = 1000;
        let a: Vec<f64> = (0..n).map(|i| i as f64 * 0.25).collect();
        let vars = [VarDesc::array("a", DType::F64)];
        let whole = compile_block("sqrt(a) + 2.0 * a", &vars, None, 4096);
        let tiny = compile_block("sqrt(a) + 2.0 * a", &vars, None, 7);

        let mut out1 = vec![0f64; n];
        let mut out2 = vec![0f64; n];
        evaluate(
            &whole,
            &[ArrayRef::F64(&a)],
            &mut ArrayMut::F64(&mut out1),
            n,
            &EvalParams::default(),
        )
        .unwrap();
        evaluate(
            &tiny,
            &[ArrayRef::F64(&a)],
            &mut ArrayMut::F64(&mut out2),
            n,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out1, out2);
    }

    #[test]
    fn reduction_across_blocks() {
        let n = 10_000usize;
        let x: Vec<i32> = (0..n as i32).collect();
        let plan = compile_block("sum(x)", &[VarDesc::array("x", DType::I32)], None, 512);
        let mut out = [0i64; 1];
        evaluate(
            &plan,
            &[ArrayRef::I32(&x)],
            &mut ArrayMut::I64(&mut out),
            n,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out[0], (n as i64 - 1) * n as i64 / 2);
    }

    #[test]
    fn scalar_combination_of_reductions() {
        let x = [1i32, 2, 3, 4];
        let plan = compile("sum(x) + max(x)", &[VarDesc::array("x", DType::I32)], None);
        assert_eq!(plan.out_dtype, DType::I64);
        let mut out = [0i64; 1];
        evaluate(
            &plan,
            &[ArrayRef::I32(&x)],
            &mut ArrayMut::I64(&mut out),
            4,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out[0], 14);
    }

    #[test]
    fn registered_function_applies_elementwise() {
        fn double(x: f64) -> f64 {
            2.0 * x
        }
        let vars = [
            VarDesc::array("a", DType::F64),
            VarDesc::func("twice", blockexpr_core::RegisteredFn::Arity1(double)),
        ];
        let plan = compile("twice(a) + 1.0", &vars, None);
        let a = [1.0f64, 2.0, 3.0];
        let mut out = [0f64; 3];
        evaluate(
            &plan,
            &[ArrayRef::F64(&a)],
            &mut ArrayMut::F64(&mut out),
            3,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [3.0, 5.0, 7.0]);
    }

    #[test]
    fn force_scalar_matches_simd() {
        let n = 777;
        let a: Vec<f64> = (0..n).map(|i| i as f64 * 1.3).collect();
        let plan = compile("sqrt(a)", &[VarDesc::array("a", DType::F64)], None);
        let mut simd = vec![0f64; n];
        let mut scal = vec![0f64; n];
        evaluate(
            &plan,
            &[ArrayRef::F64(&a)],
            &mut ArrayMut::F64(&mut simd),
            n,
            &EvalParams::default(),
        )
        .unwrap();
        evaluate(
            &plan,
            &[ArrayRef::F64(&a)],
            &mut ArrayMut::F64(&mut scal),
            n,
            &EvalParams::scalar(),
        )
        .unwrap();
        assert_eq!(simd, scal);
    }

    #[test]
    fn wrong_variable_count_is_var_mismatch() {
        let plan = compile(
            "a + b",
            &[
                VarDesc::array("a", DType::I32),
                VarDesc::array("b", DType::I32),
            ],
            None,
        );
        let a = [1i32, 2];
        let mut out = [0i32; 2];
        let err = evaluate(
            &plan,
            &[ArrayRef::I32(&a)],
            &mut ArrayMut::I32(&mut out),
            2,
            &EvalParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::VarMismatch { .. }));
    }

    #[test]
    fn wrong_dtype_is_var_mismatch() {
        let plan = compile("a * 2", &[VarDesc::array("a", DType::I32)], None);
        let a = [1i64, 2];
        let mut out = [0i32; 2];
        let err = evaluate(
            &plan,
            &[ArrayRef::I64(&a)],
            &mut ArrayMut::I32(&mut out),
            2,
            &EvalParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::VarMismatch { .. }));
    }

    #[test]
    fn string_equality_against_literal() {
        let plan = compile(
            "sum(s == 'ab')",
            &[VarDesc::string("s", 2)],
            None,
        );
        let bytes = *b"abxyab";
        let mut out = [0i64; 1];
        evaluate(
            &plan,
            &[ArrayRef::Str {
                bytes: &bytes,
                itemsize: 2,
            }],
            &mut ArrayMut::I64(&mut out),
            3,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out[0], 2);
    }

    #[test]
    fn complex_pipeline() {
        use num_complex::Complex64;
        let plan = compile(
            "abs(z * z)",
            &[VarDesc::array("z", DType::C128)],
            None,
        );
        assert_eq!(plan.out_dtype, DType::F64);
        let z = [Complex64::new(3.0, 4.0), Complex64::new(0.0, 1.0)];
        let mut out = [0f64; 2];
        evaluate(
            &plan,
            &[ArrayRef::C128(&z)],
            &mut ArrayMut::F64(&mut out),
            2,
            &EvalParams::default(),
        )
        .unwrap();
        assert!((out[0] - 25.0).abs() < 1e-12);
        assert!((out[1] - 1.0).abs() < 1e-12);
    }
}
