//! Identifier resolution, bottom-up type inference, and slot assignment.
//!
//! The [`Analyzer`] walks the parsed arena once, in statement order for
//! scripts and post-order for expressions. It rewrites every
//! [`NodeKind::Ident`] to a variable ordinal or local slot, checks each
//! operator against the type lattice, stamps the inferred dtype on every
//! node, and assigns the temporary slots the runtime reads and writes:
//! one per DSL assignment (SSA), one per control-flow phi, one per loop
//! induction variable.
//!
//! Scoping follows the function-level model of the script grammar: a name
//! assigned in both arms of an `if` is visible after it (through a phi
//! slot of the promoted dtype); a name assigned in only one arm is
//! dropped at the join. Loop-carried locals are reconciled through a phi
//! slot seeded before the loop; their dtype must stay stable across
//! iterations.

use indexmap::IndexMap;

use blockexpr_core::error::invalid_arg_type;
use blockexpr_core::{
    BinaryOp, Builtin, CallTarget, CmpOp, CompileError, DType, ExprArena, Literal, LoopCarry,
    NodeId, NodeKind, PhiEntry, ReduceOp, SlotDesc, Span, UnaryOp, VarDesc, VarKind,
};

pub struct Analyzer<'a> {
    arena: &'a mut ExprArena,
    vars: &'a [VarDesc],
    /// Effective dtype per descriptor (declared, or the output dtype in
    /// homogeneous mode).
    var_dtypes: Vec<DType>,
    pub slots: Vec<SlotDesc>,
    scope: IndexMap<String, u32>,
    loop_depth: u32,
    pub return_dtype: Option<DType>,
}

impl<'a> Analyzer<'a> {
    pub fn new(arena: &'a mut ExprArena, vars: &'a [VarDesc], var_dtypes: Vec<DType>) -> Self {
        Self {
            arena,
            vars,
            var_dtypes,
            slots: Vec::new(),
            scope: IndexMap::new(),
            loop_depth: 0,
            return_dtype: None,
        }
    }

    fn new_slot(&mut self, dtype: DType, scalar: bool) -> u32 {
        self.slots.push(SlotDesc { dtype, scalar });
        (self.slots.len() - 1) as u32
    }

    // -----------------------------------------------------------------------
    // expressions
    // -----------------------------------------------------------------------

    /// Resolves and types one expression subtree, returning its dtype.
    pub fn infer_expr(&mut self, id: NodeId) -> Result<DType, CompileError> {
        let node = self.arena.get(id);
        let span = node.span;
        let kind = node.kind.clone();
        let children: Vec<NodeId> = node.children.to_vec();

        let dtype = match kind {
            NodeKind::Literal(lit) => lit.dtype(),

            NodeKind::Ident(name) => self.resolve_ident(id, &name, span)?,

            // Already-resolved references only appear if a caller re-runs
            // analysis; keep them stable.
            NodeKind::Var { ordinal } => self.var_dtypes[ordinal as usize],
            NodeKind::Local { slot } => self.slots[slot as usize].dtype,

            NodeKind::Unary(op) => {
                let ct = self.infer_expr(children[0])?;
                self.unary_dtype(op, ct, span)?
            }

            NodeKind::Binary(op) => {
                let lt = self.infer_expr(children[0])?;
                let rt = self.infer_expr(children[1])?;
                self.binary_dtype(op, lt, rt, span)?
            }

            NodeKind::Compare(op) => {
                let lt = self.infer_expr(children[0])?;
                let rt = self.infer_expr(children[1])?;
                self.compare_dtype(op, lt, rt, span)?
            }

            NodeKind::Call(target) => self.infer_call(id, target, &children, span)?,

            NodeKind::Reduce { op, .. } => {
                let ct = self.infer_expr(children[0])?;
                self.infer_reduce(id, op, ct, children[0], span)?
            }

            NodeKind::Where => {
                let ct = self.infer_expr(children[0])?;
                if ct != DType::Bool {
                    return Err(invalid_arg_type(
                        format!("where() condition must be bool, got {ct}"),
                        span,
                    ));
                }
                let tt = self.infer_expr(children[1])?;
                let ft = self.infer_expr(children[2])?;
                if tt.is_string() || ft.is_string() {
                    return Err(invalid_arg_type(
                        "where() branches cannot be strings",
                        span,
                    ));
                }
                DType::promote(tt, ft).ok_or(CompileError::MixedTypeNested { span })?
            }

            other => {
                return Err(CompileError::InvalidArg {
                    message: format!("statement {other:?} in expression position"),
                })
            }
        };

        self.arena.get_mut(id).dtype = Some(dtype);
        Ok(dtype)
    }

    fn resolve_ident(
        &mut self,
        id: NodeId,
        name: &str,
        span: Span,
    ) -> Result<DType, CompileError> {
        if let Some(&slot) = self.scope.get(name) {
            self.arena.get_mut(id).kind = NodeKind::Local { slot };
            return Ok(self.slots[slot as usize].dtype);
        }
        if let Some(ordinal) = self.vars.iter().position(|v| v.name == name) {
            if !self.vars[ordinal].kind.is_array() {
                return Err(invalid_arg_type(
                    format!("'{name}' is a registered callable and must be called"),
                    span,
                ));
            }
            self.arena.get_mut(id).kind = NodeKind::Var {
                ordinal: ordinal as u32,
            };
            return Ok(self.var_dtypes[ordinal]);
        }
        Err(invalid_arg_type(format!("unknown identifier '{name}'"), span))
    }

    fn unary_dtype(&self, op: UnaryOp, ct: DType, span: Span) -> Result<DType, CompileError> {
        match op {
            UnaryOp::Neg => {
                if ct.is_string() || ct.is_bool() {
                    return Err(invalid_arg_type(format!("cannot negate {ct}"), span));
                }
                Ok(ct)
            }
            UnaryOp::BitNot => {
                if !ct.is_integer() {
                    return Err(invalid_arg_type(format!("'~' needs an integer, got {ct}"), span));
                }
                Ok(ct)
            }
            UnaryOp::Not => {
                if ct != DType::Bool {
                    return Err(invalid_arg_type(format!("'not' needs bool, got {ct}"), span));
                }
                Ok(DType::Bool)
            }
        }
    }

    fn binary_dtype(
        &self,
        op: BinaryOp,
        lt: DType,
        rt: DType,
        span: Span,
    ) -> Result<DType, CompileError> {
        if op.is_logical() {
            if lt != DType::Bool || rt != DType::Bool {
                return Err(invalid_arg_type(
                    format!("logical operator needs bool operands, got {lt} and {rt}"),
                    span,
                ));
            }
            return Ok(DType::Bool);
        }
        if op.is_bitwise() {
            if !lt.is_integer() || !rt.is_integer() {
                return Err(invalid_arg_type(
                    format!("bitwise operator needs integers, got {lt} and {rt}"),
                    span,
                ));
            }
            if matches!(op, BinaryOp::Shl | BinaryOp::Shr) && (lt.is_bool() || rt.is_bool()) {
                return Err(invalid_arg_type("cannot shift bool", span));
            }
            return DType::promote(lt, rt).ok_or(CompileError::MixedTypeNested { span });
        }

        // Arithmetic.
        if lt.is_string() || rt.is_string() {
            return Err(invalid_arg_type(
                format!("arithmetic on {lt} and {rt} is not defined"),
                span,
            ));
        }
        let p = DType::promote(lt, rt).ok_or(CompileError::MixedTypeNested { span })?;
        if p.is_bool() {
            return Err(invalid_arg_type(
                "arithmetic on two bools; use '&' and '|' instead",
                span,
            ));
        }
        if op == BinaryOp::Mod && p.is_complex() {
            return Err(CompileError::ComplexUnsupported {
                what: "%".to_string(),
                span,
            });
        }
        Ok(p)
    }

    fn compare_dtype(
        &self,
        op: CmpOp,
        lt: DType,
        rt: DType,
        span: Span,
    ) -> Result<DType, CompileError> {
        let p = DType::promote(lt, rt).ok_or(CompileError::MixedTypeNested { span })?;
        // Ordering on complex is rejected outright rather than silently
        // comparing real parts.
        if p.is_complex() && !op.is_equality() {
            return Err(invalid_arg_type(
                "ordering comparison is not defined for complex",
                span,
            ));
        }
        Ok(DType::Bool)
    }

    fn infer_call(
        &mut self,
        id: NodeId,
        target: CallTarget,
        children: &[NodeId],
        span: Span,
    ) -> Result<DType, CompileError> {
        match target {
            CallTarget::Builtin(b) => {
                if children.len() != b.arity() {
                    return Err(invalid_arg_type(
                        format!(
                            "{}() takes {} argument(s), got {}",
                            b.name(),
                            b.arity(),
                            children.len()
                        ),
                        span,
                    ));
                }
                let mut p: Option<DType> = None;
                for &c in children {
                    let ct = self.infer_expr(c)?;
                    if ct.is_string() {
                        return Err(invalid_arg_type(
                            format!("{}() does not accept strings", b.name()),
                            span,
                        ));
                    }
                    p = Some(match p {
                        None => ct,
                        Some(prev) => DType::promote(prev, ct)
                            .ok_or(CompileError::MixedTypeNested { span })?,
                    });
                }
                self.builtin_dtype(b, p.unwrap(), span)
            }
            CallTarget::Named(name) => {
                let Some(ordinal) = self.vars.iter().position(|v| v.name == name) else {
                    return Err(invalid_arg_type(format!("unknown function '{name}'"), span));
                };
                let arity = match &self.vars[ordinal].kind {
                    VarKind::Func(f) => f.arity(),
                    VarKind::Closure(c) => c.arity(),
                    VarKind::Array => {
                        return Err(invalid_arg_type(
                            format!("'{name}' is an array, not a callable"),
                            span,
                        ))
                    }
                };
                if children.len() != arity {
                    return Err(invalid_arg_type(
                        format!(
                            "{name}() takes {arity} argument(s), got {}",
                            children.len()
                        ),
                        span,
                    ));
                }
                for &c in children {
                    let ct = self.infer_expr(c)?;
                    if ct.is_string() || ct.is_complex() {
                        return Err(invalid_arg_type(
                            format!("{name}() arguments must be real numeric, got {ct}"),
                            span,
                        ));
                    }
                }
                self.arena.get_mut(id).kind =
                    NodeKind::Call(CallTarget::Registered(ordinal as u32));
                Ok(DType::F64)
            }
            CallTarget::Registered(ordinal) => {
                for &c in children {
                    self.infer_expr(c)?;
                }
                let _ = ordinal;
                Ok(DType::F64)
            }
        }
    }

    fn builtin_dtype(&self, b: Builtin, p: DType, span: Span) -> Result<DType, CompileError> {
        let float_of = |t: DType| if t == DType::F32 { DType::F32 } else { DType::F64 };
        if p.is_complex() {
            if !b.supports_complex() {
                return Err(CompileError::ComplexUnsupported {
                    what: b.name().to_string(),
                    span,
                });
            }
            if b.complex_result_is_real() {
                return Ok(if p == DType::C64 { DType::F32 } else { DType::F64 });
            }
            return Ok(p);
        }
        Ok(match b {
            Builtin::Abs if p.is_integer() => p,
            Builtin::Ceil | Builtin::Floor | Builtin::Round | Builtin::Trunc
                if p.is_integer() =>
            {
                p
            }
            Builtin::Real | Builtin::Conj => p,
            Builtin::Imag => float_of(p),
            _ => float_of(p),
        })
    }

    fn infer_reduce(
        &mut self,
        id: NodeId,
        op: ReduceOp,
        ct: DType,
        child: NodeId,
        span: Span,
    ) -> Result<DType, CompileError> {
        if ct.is_string() {
            return Err(CompileError::ReductionInvalid {
                message: format!("{}() is not defined for strings", op.name()),
                span,
            });
        }
        match op {
            ReduceOp::Any | ReduceOp::All => {
                if ct != DType::Bool {
                    return Err(CompileError::ReductionInvalid {
                        message: format!("{}() needs a bool operand, got {ct}", op.name()),
                        span,
                    });
                }
            }
            ReduceOp::Min | ReduceOp::Max => {
                if ct.is_complex() {
                    return Err(CompileError::ReductionInvalid {
                        message: format!("{}() is not defined for complex", op.name()),
                        span,
                    });
                }
            }
            ReduceOp::Sum | ReduceOp::Prod => {}
        }
        // sum(x == c) / any(x > c) lower to a fused kernel that never
        // materializes the bool intermediate.
        let fused = matches!(op, ReduceOp::Sum | ReduceOp::Any | ReduceOp::All)
            && matches!(self.arena.get(child).kind, NodeKind::Compare(_));
        self.arena.get_mut(id).kind = NodeKind::Reduce {
            op,
            fused_predicate: fused,
        };
        Ok(op.accumulator(ct))
    }

    // -----------------------------------------------------------------------
    // scalar / reduction structure checks
    // -----------------------------------------------------------------------

    pub fn is_scalar_expr(&self, id: NodeId) -> bool {
        self.arena.is_scalar_expr(id)
    }

    pub fn contains_reduce(&self, id: NodeId) -> bool {
        self.arena.contains_reduce(id)
    }

    /// Reductions may only appear in scalar context: either the whole
    /// expression is scalar, or there is no reduction at all.
    pub fn check_reduction_position(&self, id: NodeId) -> Result<(), CompileError> {
        if self.contains_reduce(id) && !self.is_scalar_expr(id) {
            return Err(CompileError::ReductionInvalid {
                message: "a reduction cannot mix with element-wise operands in one pass"
                    .to_string(),
                span: self.arena.get(id).span,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // statements
    // -----------------------------------------------------------------------

    pub fn analyze_stmt(&mut self, id: NodeId) -> Result<(), CompileError> {
        let node = self.arena.get(id);
        let span = node.span;
        let kind = node.kind.clone();
        let children: Vec<NodeId> = node.children.to_vec();

        match kind {
            NodeKind::Block => {
                for c in children {
                    self.analyze_stmt(c)?;
                }
                Ok(())
            }

            NodeKind::Assign { name, .. } => {
                let vt = self.infer_expr(children[0])?;
                if self.contains_reduce(children[0]) {
                    return Err(CompileError::ReductionInvalid {
                        message: format!(
                            "cannot assign a reduction to local '{name}'; reduce in the condition or return instead"
                        ),
                        span,
                    });
                }
                if vt.is_string() {
                    return Err(invalid_arg_type("locals cannot hold strings", span));
                }
                let slot = self.new_slot(vt, false);
                self.scope.insert(name.clone(), slot);
                self.arena.get_mut(id).kind = NodeKind::Assign { name, slot };
                Ok(())
            }

            NodeKind::Return => {
                let rt = self.infer_expr(children[0])?;
                self.check_reduction_position(children[0])?;
                self.return_dtype = Some(rt);
                Ok(())
            }

            NodeKind::If { .. } => self.analyze_if(id, &children, span),

            NodeKind::For { name, .. } => self.analyze_for(id, name, &children, span),

            NodeKind::Break => {
                if self.loop_depth == 0 {
                    return Err(CompileError::InvalidArg {
                        message: "break outside of a loop".to_string(),
                    });
                }
                if let Some(&cond) = children.first() {
                    let ct = self.infer_expr(cond)?;
                    if ct != DType::Bool {
                        return Err(invalid_arg_type(
                            format!("break condition must be bool, got {ct}"),
                            span,
                        ));
                    }
                    if !self.is_scalar_expr(cond) {
                        return Err(invalid_arg_type(
                            "break condition must be scalar; wrap it in any() or all()",
                            span,
                        ));
                    }
                }
                Ok(())
            }

            NodeKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(CompileError::InvalidArg {
                        message: "continue outside of a loop".to_string(),
                    });
                }
                Ok(())
            }

            NodeKind::Print { format } => {
                for &c in &children {
                    self.infer_expr(c)?;
                    self.check_reduction_position(c)?;
                }
                if let Some(fmt) = &format {
                    let holes = fmt.matches("{}").count();
                    if holes != children.len() {
                        return Err(CompileError::InvalidArg {
                            message: format!(
                                "print format has {holes} placeholder(s) but {} argument(s)",
                                children.len()
                            ),
                        });
                    }
                }
                Ok(())
            }

            other => Err(CompileError::InvalidArg {
                message: format!("unexpected node {other:?} in statement position"),
            }),
        }
    }

    fn analyze_if(
        &mut self,
        id: NodeId,
        children: &[NodeId],
        span: Span,
    ) -> Result<(), CompileError> {
        let cond = children[0];
        let ct = self.infer_expr(cond)?;
        if ct != DType::Bool {
            return Err(invalid_arg_type(
                format!("if condition must be bool, got {ct}"),
                span,
            ));
        }
        let scalar = self.is_scalar_expr(cond);
        if !scalar && self.contains_reduce(cond) {
            return Err(CompileError::ReductionInvalid {
                message: "an if condition must be fully scalar when it reduces".to_string(),
                span,
            });
        }

        let pre = self.scope.clone();
        self.analyze_stmt(children[1])?;
        let then_scope = self.scope.clone();

        self.scope = pre.clone();
        let else_scope = if let Some(&else_block) = children.get(2) {
            self.analyze_stmt(else_block)?;
            self.scope.clone()
        } else {
            pre.clone()
        };

        // Join: a name survives the if only when both paths define it.
        let mut joined = pre.clone();
        let mut phis = Vec::new();
        for (name, &then_slot) in &then_scope {
            let Some(&else_slot) = else_scope.get(name) else {
                joined.shift_remove(name);
                continue;
            };
            if then_slot == else_slot {
                continue; // untouched by both arms
            }
            let td = self.slots[then_slot as usize].dtype;
            let ed = self.slots[else_slot as usize].dtype;
            let dt = DType::promote(td, ed).ok_or(CompileError::MixedTypeNested { span })?;
            let phi_slot = self.new_slot(dt, false);
            phis.push(PhiEntry {
                name: name.clone(),
                phi_slot,
                then_slot,
                else_slot,
            });
            joined.insert(name.clone(), phi_slot);
        }
        self.scope = joined;
        self.arena.get_mut(id).kind = NodeKind::If { scalar, phis };
        Ok(())
    }

    fn analyze_for(
        &mut self,
        id: NodeId,
        name: String,
        children: &[NodeId],
        span: Span,
    ) -> Result<(), CompileError> {
        let count = children[0];
        let body = children[1];

        let ct = self.infer_expr(count)?;
        if !ct.is_integer() || ct.is_bool() {
            return Err(invalid_arg_type(
                format!("range() count must be an integer, got {ct}"),
                span,
            ));
        }
        if !self.is_scalar_expr(count) {
            return Err(invalid_arg_type("range() count must be scalar", span));
        }

        // Loop-carried locals: anything assigned in the body that already
        // exists gets a phi slot seeded from the pre-loop value.
        let mut assigned = Vec::new();
        self.collect_assigned(body, &mut assigned);
        let mut pending: Vec<(String, u32, u32)> = Vec::new();
        for carried_name in &assigned {
            if let Some(&init_slot) = self.scope.get(carried_name) {
                let phi_slot = self.new_slot(self.slots[init_slot as usize].dtype, false);
                self.scope.insert(carried_name.clone(), phi_slot);
                pending.push((carried_name.clone(), init_slot, phi_slot));
            }
        }

        // Broadcast induction variable.
        let var_slot = self.new_slot(DType::I32, false);
        self.scope.insert(name.clone(), var_slot);

        self.loop_depth += 1;
        let body_result = self.analyze_stmt(body);
        self.loop_depth -= 1;
        body_result?;

        let mut carried = Vec::new();
        for (carried_name, init_slot, phi_slot) in pending {
            let body_slot = *self.scope.get(&carried_name).expect("carried name in scope");
            if self.slots[body_slot as usize].dtype != self.slots[phi_slot as usize].dtype {
                return Err(invalid_arg_type(
                    format!(
                        "loop variable '{carried_name}' changes dtype across iterations ({} vs {})",
                        self.slots[phi_slot as usize].dtype,
                        self.slots[body_slot as usize].dtype
                    ),
                    span,
                ));
            }
            self.scope.insert(carried_name.clone(), phi_slot);
            carried.push(LoopCarry {
                name: carried_name,
                phi_slot,
                init_slot,
                body_slot,
            });
        }

        self.arena.get_mut(id).kind = NodeKind::For {
            name,
            var_slot,
            carried,
        };
        Ok(())
    }

    fn collect_assigned(&self, id: NodeId, out: &mut Vec<String>) {
        let node = self.arena.get(id);
        if let NodeKind::Assign { name, .. } = &node.kind {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        match node.kind {
            NodeKind::Block | NodeKind::If { .. } | NodeKind::For { .. } => {
                for &c in node.children.iter() {
                    self.collect_assigned(c, out);
                }
            }
            _ => {}
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use blockexpr_syntax::parse_expression;

    fn vars2() -> Vec<VarDesc> {
        vec![
            VarDesc::array("a", DType::I32),
            VarDesc::array("b", DType::F64),
        ]
    }

    fn infer(src: &str, vars: &[VarDesc]) -> Result<DType, CompileError> {
        let (mut arena, root) = parse_expression(src).unwrap();
        let dtypes: Vec<DType> = vars.iter().map(|v| v.dtype.unwrap()).collect();
        let mut an = Analyzer::new(&mut arena, vars, dtypes);
        let dt = an.infer_expr(root)?;
        an.check_reduction_position(root)?;
        Ok(dt)
    }

    #[test]
    fn mixed_arithmetic_promotes() {
        assert_eq!(infer("a + b", &vars2()).unwrap(), DType::F64);
        assert_eq!(infer("a * a", &vars2()).unwrap(), DType::I32);
        assert_eq!(infer("a + 1", &vars2()).unwrap(), DType::I32);
        assert_eq!(infer("a + 1.5", &vars2()).unwrap(), DType::F64);
    }

    #[test]
    fn comparisons_produce_bool() {
        assert_eq!(infer("a < b", &vars2()).unwrap(), DType::Bool);
        assert_eq!(infer("a == 1 and b > 0.0", &vars2()).unwrap(), DType::Bool);
    }

    #[test]
    fn logical_needs_bool() {
        let err = infer("a and b", &vars2()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidArgType { .. }));
    }

    #[test]
    fn unknown_identifier_is_reported() {
        let err = infer("a + zz", &vars2()).unwrap_err();
        match err {
            CompileError::InvalidArgType { message, .. } => {
                assert!(message.contains("zz"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn builtin_promotes_to_float() {
        assert_eq!(infer("sqrt(a)", &vars2()).unwrap(), DType::F64);
        let f32vars = vec![VarDesc::array("a", DType::F32), VarDesc::array("b", DType::F64)];
        assert_eq!(infer("sqrt(a)", &f32vars).unwrap(), DType::F32);
        assert_eq!(infer("abs(a)", &vars2()).unwrap(), DType::I32);
    }

    #[test]
    fn complex_ordering_is_rejected() {
        let cvars = vec![
            VarDesc::array("a", DType::C128),
            VarDesc::array("b", DType::C128),
        ];
        assert_eq!(infer("a == b", &cvars).unwrap(), DType::Bool);
        let err = infer("a < b", &cvars).unwrap_err();
        assert!(matches!(err, CompileError::InvalidArgType { .. }));
    }

    #[test]
    fn complex_mod_is_unsupported() {
        let cvars = vec![
            VarDesc::array("a", DType::C128),
            VarDesc::array("b", DType::C128),
        ];
        let err = infer("a % b", &cvars).unwrap_err();
        assert!(matches!(err, CompileError::ComplexUnsupported { .. }));
    }

    #[test]
    fn builtin_without_complex_kernel_is_rejected() {
        let cvars = vec![
            VarDesc::array("a", DType::C128),
            VarDesc::array("b", DType::C128),
        ];
        assert!(matches!(
            infer("atan(a)", &cvars).unwrap_err(),
            CompileError::ComplexUnsupported { .. }
        ));
        // But the supported set types through.
        assert_eq!(infer("exp(a)", &cvars).unwrap(), DType::C128);
        assert_eq!(infer("abs(a)", &cvars).unwrap(), DType::F64);
    }

    #[test]
    fn inverse_trig_builtins_resolve_under_their_short_names() {
        // The grammar's spellings, not numpy's arc-prefixed aliases.
        for src in ["asin(b)", "acos(b)", "atan(b)", "asinh(b)", "acosh(b)", "atanh(b)"] {
            assert_eq!(infer(src, &vars2()).unwrap(), DType::F64, "{src}");
        }
        assert_eq!(infer("atan2(b, b)", &vars2()).unwrap(), DType::F64);
        // An arc-prefixed name is not a builtin and resolves like any
        // unknown function.
        assert!(matches!(
            infer("arctan(b)", &vars2()).unwrap_err(),
            CompileError::InvalidArgType { .. }
        ));
    }

    #[test]
    fn reduction_accumulators() {
        assert_eq!(infer("sum(a)", &vars2()).unwrap(), DType::I64);
        assert_eq!(infer("sum(b)", &vars2()).unwrap(), DType::F64);
        assert_eq!(infer("max(a)", &vars2()).unwrap(), DType::I32);
        assert_eq!(infer("any(a > 1)", &vars2()).unwrap(), DType::Bool);
    }

    #[test]
    fn predicate_reductions_are_fused() {
        let (mut arena, root) = parse_expression("sum(a == 1)").unwrap();
        let vars = vars2();
        let mut an = Analyzer::new(&mut arena, &vars, vec![DType::I32, DType::F64]);
        an.infer_expr(root).unwrap();
        match &arena.get(root).kind {
            NodeKind::Reduce {
                fused_predicate, ..
            } => assert!(fused_predicate),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reduction_mixed_with_elementwise_is_invalid() {
        let err = infer("a - sum(a)", &vars2()).unwrap_err();
        assert!(matches!(err, CompileError::ReductionInvalid { .. }));
        // Scalar-only combinations are fine.
        assert_eq!(infer("sum(a) + 1", &vars2()).unwrap(), DType::I64);
    }

    #[test]
    fn any_needs_bool_operand() {
        let err = infer("any(a)", &vars2()).unwrap_err();
        assert!(matches!(err, CompileError::ReductionInvalid { .. }));
    }

    #[test]
    fn where_types_promote_across_branches() {
        assert_eq!(infer("where(a > 0, a, b)", &vars2()).unwrap(), DType::F64);
        let err = infer("where(a, a, b)", &vars2()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidArgType { .. }));
    }
}
