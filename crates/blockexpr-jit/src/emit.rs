//! Lowering of analyzed plans to a C translation unit.
//!
//! The emitted unit contains a single exported function
//! `void kernel(const void *const *vars, void *out, int64_t nitems)`
//! that hard-codes the variable dtypes, the expression tree, and the
//! output cast, and loops over all `nitems` elements. Statement kernels
//! lower per element: locals become C scalars, masked `if`/`else` become
//! real branches (equivalent to the interpreter's masked blend because
//! the arms are pure), and `for i in range(N)` becomes a C loop with the
//! same phi seeding/carry discipline as the interpreter.
//!
//! Promotion never relies on C's implicit conversions: every operand is
//! cast explicitly to the promoted dtype of its operator. Integer
//! division and modulo are zero-guarded so the kernel matches the
//! interpreter instead of trapping.
//!
//! Plans the lowering does not cover — reductions, print, scalar break
//! conditions, registered callables, complex and string dtypes — return
//! [`JitError::Unsupported`] and the caller falls back to the
//! interpreter.

use std::fmt::Write;

use blockexpr_core::{
    BinaryOp, Builtin, CallTarget, CmpOp, DType, Literal, NodeId, NodeKind, Plan, UnaryOp,
};

use crate::JitError;

/// Emission knobs gathered from the engine configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitOptions {
    /// Route scalar math through the host-installed bridge table instead
    /// of emitting libm calls.
    pub scalar_math_bridge: bool,
}

fn ctype(dt: DType) -> &'static str {
    match dt {
        DType::Bool => "uint8_t",
        DType::I8 => "int8_t",
        DType::I16 => "int16_t",
        DType::I32 => "int32_t",
        DType::I64 => "int64_t",
        DType::U8 => "uint8_t",
        DType::U16 => "uint16_t",
        DType::U32 => "uint32_t",
        DType::U64 => "uint64_t",
        DType::F32 => "float",
        DType::F64 => "double",
        DType::C64 | DType::C128 | DType::Str => unreachable!("unemittable dtype {dt}"),
    }
}

/// Verifies every reachable node lowers to C; the reason string feeds the
/// fallback diagnostic.
pub(crate) fn check_supported(plan: &Plan, id: NodeId) -> Result<(), JitError> {
    let node = plan.arena.get(id);
    let reject = |what: &str| {
        Err(JitError::Unsupported {
            reason: format!("{what} has no native lowering"),
        })
    };
    if let Some(dt) = node.dtype {
        if dt.is_complex() || dt.is_string() {
            return reject(&format!("dtype {dt}"));
        }
    }
    match &node.kind {
        NodeKind::Reduce { .. } => return reject("reduction"),
        NodeKind::Print { .. } => return reject("print"),
        NodeKind::Break | NodeKind::Continue => return reject("break/continue"),
        NodeKind::Call(CallTarget::Registered(_)) => return reject("registered callable"),
        NodeKind::Call(CallTarget::Named(_)) | NodeKind::Ident(_) => {
            return reject("unresolved name")
        }
        NodeKind::If { scalar: true, .. } => return reject("block-level condition"),
        NodeKind::Literal(Literal::Str(_)) => return reject("string literal"),
        NodeKind::Literal(Literal::Float(f)) if !f.is_finite() => {
            return reject("non-finite literal")
        }
        _ => {}
    }
    for &c in node.children.iter() {
        check_supported(plan, c)?;
    }
    Ok(())
}

/// Emits the full translation unit for a plan.
pub fn emit_c(plan: &Plan, opts: &EmitOptions) -> Result<String, JitError> {
    check_supported(plan, plan.root)?;

    let mut e = Emitter {
        plan,
        opts: *opts,
        out: String::with_capacity(4096),
    };
    e.preamble();
    e.kernel()?;
    Ok(e.out)
}

/// The bridge function names, in the exact field order of the Rust-side
/// table in [`crate::bridge`].
pub const BRIDGE_FNS: [&str; 28] = [
    "sqrt", "cbrt", "fabs", "exp", "expm1", "log", "log2", "log10", "log1p", "sin", "cos", "tan",
    "asin", "acos", "atan", "atan2", "sinh", "cosh", "tanh", "asinh", "acosh", "atanh", "pow",
    "fmod", "hypot", "ceil", "floor", "trunc",
];

struct Emitter<'p> {
    plan: &'p Plan,
    opts: EmitOptions,
    out: String,
}

impl<'p> Emitter<'p> {
    fn preamble(&mut self) {
        self.out.push_str("#include <stdint.h>\n");
        if !self.opts.scalar_math_bridge {
            self.out.push_str("#include <math.h>\n");
        }
        self.out.push('\n');
        self.out.push_str(
            "static inline int64_t me_ipow(int64_t base, int64_t e) {\n\
             \x20   if (e < 0) {\n\
             \x20       if (base == 1) return 1;\n\
             \x20       if (base == -1) return (e & 1) ? -1 : 1;\n\
             \x20       return 0;\n\
             \x20   }\n\
             \x20   uint64_t acc = 1, b = (uint64_t)base, ue = (uint64_t)e;\n\
             \x20   while (ue) { if (ue & 1) acc *= b; b *= b; ue >>= 1; }\n\
             \x20   return (int64_t)acc;\n\
             }\n\
             static inline int64_t me_iabs(int64_t v) {\n\
             \x20   return v < 0 ? (int64_t)(0ULL - (uint64_t)v) : v;\n\
             }\n\n",
        );
        if self.opts.scalar_math_bridge {
            self.out.push_str("typedef struct {\n");
            for name in BRIDGE_FNS {
                let args = if matches!(name, "atan2" | "pow" | "fmod" | "hypot") {
                    "double, double"
                } else {
                    "double"
                };
                let _ = writeln!(self.out, "    double (*{name})({args});");
            }
            self.out.push_str(
                "} me_bridge_t;\n\
                 static const me_bridge_t *me_bridge;\n\
                 void kernel_set_bridge(const me_bridge_t *b) { me_bridge = b; }\n\n",
            );
            // round is not in the bridge table; synthesize
            // round-half-away-from-zero so the kernel never needs libm
            // symbols.
            self.out.push_str(
                "static inline double me_round(double x) {\n\
                 \x20   return x < 0 ? me_bridge->ceil(x - 0.5) : me_bridge->floor(x + 0.5);\n\
                 }\n\n",
            );
        }
    }

    fn kernel(&mut self) -> Result<(), JitError> {
        let plan = self.plan;
        self.out
            .push_str("void kernel(const void *const *vars, void *out, int64_t nitems) {\n");

        // Typed base pointers in array order.
        let mut array_pos = 0usize;
        for (ordinal, desc) in plan.vars.iter().enumerate() {
            if !desc.kind.is_array() {
                continue;
            }
            let ty = ctype(plan.var_dtypes[ordinal]);
            let _ = writeln!(
                self.out,
                "    const {ty} *v{ordinal} = (const {ty} *)vars[{array_pos}];"
            );
            array_pos += 1;
        }
        let out_ty = ctype(plan.out_dtype);
        let _ = writeln!(self.out, "    {out_ty} *o = ({out_ty} *)out;");
        self.out
            .push_str("    for (int64_t i = 0; i < nitems; ++i) {\n");

        if plan.script {
            // Locals as per-element C scalars.
            for (slot, desc) in plan.slots.iter().enumerate() {
                let _ = writeln!(self.out, "        {} t{slot} = 0;", ctype(desc.dtype));
            }
            let body = plan.arena.get(plan.root).children[0];
            self.stmt(body, 2)?;
        } else {
            let expr = self.expr(plan.root);
            let store = self.store_cast(&expr);
            let _ = writeln!(self.out, "        o[i] = {store};");
        }

        self.out.push_str("    }\n}\n");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // statements
    // -----------------------------------------------------------------------

    fn stmt(&mut self, id: NodeId, depth: usize) -> Result<(), JitError> {
        let plan = self.plan;
        let pad = "    ".repeat(depth + 1);
        let node = plan.arena.get(id);
        let children: Vec<NodeId> = node.children.to_vec();

        match node.kind.clone() {
            NodeKind::Block => {
                for c in children {
                    self.stmt(c, depth)?;
                }
            }

            NodeKind::Assign { slot, .. } => {
                let ty = ctype(plan.slots[slot as usize].dtype);
                let value = self.expr(children[0]);
                let _ = writeln!(self.out, "{pad}t{slot} = ({ty})({value});");
            }

            NodeKind::Return => {
                let value = self.expr(children[0]);
                let store = self.store_cast(&value);
                let _ = writeln!(self.out, "{pad}o[i] = {store};");
            }

            NodeKind::If { scalar: false, phis } => {
                let cond = self.expr(children[0]);
                let _ = writeln!(self.out, "{pad}if ({cond}) {{");
                self.stmt(children[1], depth + 1)?;
                for phi in &phis {
                    let ty = ctype(plan.slots[phi.phi_slot as usize].dtype);
                    let _ = writeln!(
                        self.out,
                        "{pad}    t{} = ({ty})t{};",
                        phi.phi_slot, phi.then_slot
                    );
                }
                let _ = writeln!(self.out, "{pad}}} else {{");
                if let Some(&else_block) = children.get(2) {
                    self.stmt(else_block, depth + 1)?;
                }
                for phi in &phis {
                    let ty = ctype(plan.slots[phi.phi_slot as usize].dtype);
                    let _ = writeln!(
                        self.out,
                        "{pad}    t{} = ({ty})t{};",
                        phi.phi_slot, phi.else_slot
                    );
                }
                let _ = writeln!(self.out, "{pad}}}");
            }

            NodeKind::For {
                var_slot, carried, ..
            } => {
                for c in &carried {
                    let ty = ctype(plan.slots[c.phi_slot as usize].dtype);
                    let _ = writeln!(
                        self.out,
                        "{pad}t{} = ({ty})t{};",
                        c.phi_slot, c.init_slot
                    );
                }
                let count = self.expr(children[0]);
                let _ = writeln!(
                    self.out,
                    "{pad}for (int64_t q{} = 0; q{} < (int64_t)({count}); ++q{}) {{",
                    id.0, id.0, id.0
                );
                let _ = writeln!(self.out, "{pad}    t{var_slot} = (int32_t)q{};", id.0);
                for c in &carried {
                    let ty = ctype(plan.slots[c.body_slot as usize].dtype);
                    let _ = writeln!(
                        self.out,
                        "{pad}    t{} = ({ty})t{};",
                        c.body_slot, c.phi_slot
                    );
                }
                self.stmt(children[1], depth + 1)?;
                for c in &carried {
                    let ty = ctype(plan.slots[c.phi_slot as usize].dtype);
                    let _ = writeln!(
                        self.out,
                        "{pad}    t{} = ({ty})t{};",
                        c.phi_slot, c.body_slot
                    );
                }
                let _ = writeln!(self.out, "{pad}}}");
            }

            other => {
                return Err(JitError::Unsupported {
                    reason: format!("statement {other:?} has no native lowering"),
                })
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // expressions
    // -----------------------------------------------------------------------

    /// The output-store conversion. Numeric-to-bool is "not equal to
    /// zero", never a truncating cast.
    fn store_cast(&self, expr: &str) -> String {
        if self.plan.out_dtype == DType::Bool {
            format!("(uint8_t)(({expr}) != 0)")
        } else {
            format!("({})({expr})", ctype(self.plan.out_dtype))
        }
    }

    fn cast_to(&self, from: DType, to: DType, s: String) -> String {
        if from == to {
            s
        } else {
            format!("(({}){})", ctype(to), s)
        }
    }

    fn child_cast(&self, id: NodeId, to: DType) -> String {
        let from = self.plan.arena.dtype_of(id);
        let s = self.expr(id);
        self.cast_to(from, to, s)
    }

    fn expr(&self, id: NodeId) -> String {
        let plan = self.plan;
        let node = plan.arena.get(id);
        let dt = plan.arena.dtype_of(id);
        let children: &[NodeId] = &node.children;

        match &node.kind {
            NodeKind::Literal(Literal::Bool(b)) => (*b as u8).to_string(),
            NodeKind::Literal(Literal::Int(v)) => {
                if *v == i64::MIN {
                    "(-9223372036854775807LL - 1)".to_string()
                } else if dt == DType::I64 {
                    format!("{v}LL")
                } else {
                    format!("{v}")
                }
            }
            NodeKind::Literal(Literal::Float(f)) => {
                let mut s = format!("{f:?}");
                if !s.contains('.') && !s.contains('e') {
                    s.push_str(".0");
                }
                s
            }
            NodeKind::Literal(_) => unreachable!("rejected by check_supported"),

            NodeKind::Var { ordinal } => format!("v{ordinal}[i]"),
            NodeKind::Local { slot } => format!("t{slot}"),

            NodeKind::Unary(op) => {
                let a = self.expr(children[0]);
                match op {
                    UnaryOp::Neg => format!("(-({a}))"),
                    UnaryOp::BitNot if dt == DType::Bool => format!("(({a}) ^ 1)"),
                    UnaryOp::BitNot => format!("(({}) (~({a})))", ctype(dt)),
                    UnaryOp::Not => format!("(!({a}))"),
                }
            }

            NodeKind::Binary(op) => self.binary(*op, children, dt),

            NodeKind::Compare(op) => {
                let pd = DType::promote(
                    plan.arena.dtype_of(children[0]),
                    plan.arena.dtype_of(children[1]),
                )
                .expect("validated at analysis");
                let a = self.child_cast(children[0], pd);
                let b = self.child_cast(children[1], pd);
                let c = match op {
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                    CmpOp::Ge => ">=",
                    CmpOp::Gt => ">",
                };
                format!("(({a}) {c} ({b}))")
            }

            NodeKind::Where => {
                let cond = self.expr(children[0]);
                let t = self.child_cast(children[1], dt);
                let f = self.child_cast(children[2], dt);
                format!("(({cond}) ? ({t}) : ({f}))")
            }

            NodeKind::Call(CallTarget::Builtin(b)) => self.builtin(*b, children, dt),

            other => unreachable!("{other:?} rejected by check_supported"),
        }
    }

    fn binary(&self, op: BinaryOp, children: &[NodeId], dt: DType) -> String {
        let plan = self.plan;
        let pd = DType::promote(
            plan.arena.dtype_of(children[0]),
            plan.arena.dtype_of(children[1]),
        )
        .expect("validated at analysis");
        let a = self.child_cast(children[0], pd);
        let b = self.child_cast(children[1], pd);
        let ty = ctype(dt);

        match op {
            BinaryOp::And => format!("(({a}) && ({b}))"),
            BinaryOp::Or => format!("(({a}) || ({b}))"),
            BinaryOp::Add => format!("(({ty})(({a}) + ({b})))"),
            BinaryOp::Sub => format!("(({ty})(({a}) - ({b})))"),
            BinaryOp::Mul => format!("(({ty})(({a}) * ({b})))"),
            BinaryOp::Div if pd.is_integer() => {
                format!("((({b}) == 0) ? ({ty})0 : (({ty})(({a}) / ({b}))))")
            }
            BinaryOp::Div => format!("(({a}) / ({b}))"),
            BinaryOp::Mod if pd.is_integer() => {
                format!("((({b}) == 0) ? ({ty})0 : (({ty})(({a}) % ({b}))))")
            }
            BinaryOp::Mod => self.math2("fmod", &a, &b, dt),
            BinaryOp::Pow if pd.is_integer() => {
                format!("(({ty})me_ipow((int64_t)({a}), (int64_t)({b})))")
            }
            BinaryOp::Pow => self.math2("pow", &a, &b, dt),
            BinaryOp::BitAnd => format!("(({ty})(({a}) & ({b})))"),
            BinaryOp::BitOr => format!("(({ty})(({a}) | ({b})))"),
            BinaryOp::BitXor => format!("(({ty})(({a}) ^ ({b})))"),
            BinaryOp::Shl => {
                let bits = dt.width() * 8 - 1;
                format!("(({ty})(({a}) << (({b}) & {bits})))")
            }
            BinaryOp::Shr => {
                let bits = dt.width() * 8 - 1;
                format!("(({ty})(({a}) >> (({b}) & {bits})))")
            }
        }
    }

    /// A one-argument math call in the dtype's precision, via libm or the
    /// bridge.
    fn math1(&self, name: &str, a: &str, dt: DType) -> String {
        if self.opts.scalar_math_bridge {
            let call = if name == "round" {
                format!("me_round((double)({a}))")
            } else {
                format!("me_bridge->{name}((double)({a}))")
            };
            return self.cast_back(call, dt);
        }
        if dt == DType::F32 {
            format!("{name}f({a})")
        } else {
            format!("{name}({a})")
        }
    }

    fn math2(&self, name: &str, a: &str, b: &str, dt: DType) -> String {
        if self.opts.scalar_math_bridge {
            let call = format!("me_bridge->{name}((double)({a}), (double)({b}))");
            return self.cast_back(call, dt);
        }
        if dt == DType::F32 {
            format!("{name}f({a}, {b})")
        } else {
            format!("{name}({a}, {b})")
        }
    }

    fn cast_back(&self, call: String, dt: DType) -> String {
        if dt == DType::F32 {
            format!("((float){call})")
        } else {
            call
        }
    }

    fn builtin(&self, b: Builtin, children: &[NodeId], dt: DType) -> String {
        let plan = self.plan;
        let mut pd = plan.arena.dtype_of(children[0]);
        for &c in &children[1..] {
            pd = DType::promote(pd, plan.arena.dtype_of(c)).expect("validated at analysis");
        }
        let input_dt = if dt.is_float() && pd.is_integer() { dt } else { pd };
        let a = self.child_cast(children[0], input_dt);

        // Integer identities and abs.
        if dt.is_integer() {
            return match b {
                Builtin::Abs if dt.is_signed_int() => {
                    format!("(({})me_iabs((int64_t)({a})))", ctype(dt))
                }
                _ => a,
            };
        }

        let name = match b {
            Builtin::Sqrt => "sqrt",
            Builtin::Cbrt => "cbrt",
            Builtin::Abs => "fabs",
            Builtin::Exp => "exp",
            Builtin::Expm1 => "expm1",
            Builtin::Log => "log",
            Builtin::Log2 => "log2",
            Builtin::Log10 => "log10",
            Builtin::Log1p => "log1p",
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Asin => "asin",
            Builtin::Acos => "acos",
            Builtin::Atan => "atan",
            Builtin::Atan2 => "atan2",
            Builtin::Sinh => "sinh",
            Builtin::Cosh => "cosh",
            Builtin::Tanh => "tanh",
            Builtin::Asinh => "asinh",
            Builtin::Acosh => "acosh",
            Builtin::Atanh => "atanh",
            Builtin::Pow => "pow",
            Builtin::Fmod => "fmod",
            Builtin::Hypot => "hypot",
            Builtin::Ceil => "ceil",
            Builtin::Floor => "floor",
            Builtin::Round => "round",
            Builtin::Trunc => "trunc",
            Builtin::Real | Builtin::Conj => return a,
            Builtin::Imag => return "0.0".to_string(),
        };
        if children.len() == 2 {
            let b2 = self.child_cast(children[1], input_dt);
            self.math2(name, &a, &b2, dt)
        } else {
            self.math1(name, &a, dt)
        }
    }
}
