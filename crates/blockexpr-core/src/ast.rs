//! Expression AST stored in a contiguous arena.
//!
//! Nodes live in a single `Vec` indexed by [`NodeId`] and reference only
//! strictly earlier entries, so cycles are impossible by construction. The
//! parser produces nodes with unresolved [`NodeKind::Ident`] references and
//! no inferred types; the analyzer rewrites identifiers to variable
//! ordinals or local slots and fills in the `dtype` of every node.
//!
//! Operator vocabulary is grouped into small sub-enums
//! ([`UnaryOp`], [`BinaryOp`], [`CmpOp`], [`ReduceOp`]) so kernels and the
//! JIT emitter can dispatch on a compact discriminant.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::dtype::DType;
use crate::span::Span;

/// Index into the expression arena. Child ids are strictly smaller than the
/// parent's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement (`~`), integers only.
    BitNot,
    /// Logical negation (`not`), bool only.
    Not,
}

/// Binary arithmetic, bitwise, and logical operators.
///
/// Comparisons live in [`CmpOp`]; they produce bool regardless of operand
/// type and so follow different inference rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// Right-associative power.
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    /// Logical `and`; bool operands, no short-circuit at the element level.
    And,
    /// Logical `or`.
    Or,
}

impl BinaryOp {
    /// Bitwise and shift ops accept integers only.
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    /// Logical connectives accept bool only.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Comparison operators. Non-associative in the grammar: `a < b < c` is a
/// syntax error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl CmpOp {
    /// Equality comparisons are defined for every type including complex
    /// and strings; ordering is not.
    pub fn is_equality(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Ne)
    }
}

/// Reduction operators collapsing a block (and, across blocks, the whole
/// array) to one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
    Any,
    All,
}

impl ReduceOp {
    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Prod => "prod",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
            ReduceOp::Any => "any",
            ReduceOp::All => "all",
        }
    }

    pub fn parse(name: &str) -> Option<ReduceOp> {
        match name {
            "sum" => Some(ReduceOp::Sum),
            "prod" => Some(ReduceOp::Prod),
            "min" => Some(ReduceOp::Min),
            "max" => Some(ReduceOp::Max),
            "any" => Some(ReduceOp::Any),
            "all" => Some(ReduceOp::All),
            _ => None,
        }
    }

    /// Accumulator type for an input of type `input`: float and complex
    /// reductions keep the input type, integer sum/prod widen to the 64-bit
    /// type of matching signedness, min/max keep the input, any/all produce
    /// bool.
    pub fn accumulator(self, input: DType) -> DType {
        match self {
            ReduceOp::Any | ReduceOp::All => DType::Bool,
            ReduceOp::Min | ReduceOp::Max => input,
            ReduceOp::Sum | ReduceOp::Prod => {
                if input.is_float() || input.is_complex() {
                    input
                } else if input.is_unsigned_int() {
                    DType::U64
                } else {
                    // Bool and signed integers accumulate in i64.
                    DType::I64
                }
            }
        }
    }
}

/// Built-in transcendental and numeric functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    Sqrt,
    Cbrt,
    Abs,
    Exp,
    Expm1,
    Log,
    Log2,
    Log10,
    Log1p,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Pow,
    Fmod,
    Hypot,
    Ceil,
    Floor,
    Round,
    Trunc,
    Conj,
    Real,
    Imag,
}

impl Builtin {
    pub const ALL: [Builtin; 32] = [
        Builtin::Sqrt,
        Builtin::Cbrt,
        Builtin::Abs,
        Builtin::Exp,
        Builtin::Expm1,
        Builtin::Log,
        Builtin::Log2,
        Builtin::Log10,
        Builtin::Log1p,
        Builtin::Sin,
        Builtin::Cos,
        Builtin::Tan,
        Builtin::Asin,
        Builtin::Acos,
        Builtin::Atan,
        Builtin::Atan2,
        Builtin::Sinh,
        Builtin::Cosh,
        Builtin::Tanh,
        Builtin::Asinh,
        Builtin::Acosh,
        Builtin::Atanh,
        Builtin::Pow,
        Builtin::Fmod,
        Builtin::Hypot,
        Builtin::Ceil,
        Builtin::Floor,
        Builtin::Round,
        Builtin::Trunc,
        Builtin::Conj,
        Builtin::Real,
        Builtin::Imag,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Sqrt => "sqrt",
            Builtin::Cbrt => "cbrt",
            Builtin::Abs => "abs",
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
            Builtin::Conj => "conj",
            Builtin::Real => "real",
            Builtin::Imag => "imag",
        }
    }

    pub fn parse(name: &str) -> Option<Builtin> {
        Builtin::ALL.iter().copied().find(|b| b.name() == name)
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Atan2 | Builtin::Pow | Builtin::Fmod | Builtin::Hypot => 2,
            _ => 1,
        }
    }

    /// Whether a complex-input kernel exists for this builtin.
    pub fn supports_complex(self) -> bool {
        match self {
            Builtin::Sqrt
            | Builtin::Abs
            | Builtin::Exp
            | Builtin::Log
            | Builtin::Sin
            | Builtin::Cos
            | Builtin::Tan
            | Builtin::Sinh
            | Builtin::Cosh
            | Builtin::Tanh
            | Builtin::Pow
            | Builtin::Conj
            | Builtin::Real
            | Builtin::Imag => true,
            _ => false,
        }
    }

    /// `conj`, `real`, `imag`, and `abs` of a complex produce a real (or
    /// keep complex for conj); everything else maps type to itself after
    /// float promotion.
    pub fn complex_result_is_real(self) -> bool {
        matches!(self, Builtin::Abs | Builtin::Real | Builtin::Imag)
    }
}

/// Literal constant as written in the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    /// Decimal or hex integer. Literals that fit in i32 infer as `int32`,
    /// wider ones as `int64`.
    Int(i64),
    Float(f64),
    /// Pure-imaginary literals (`1.5j`) parse as `Complex64 { re: 0, im }`.
    Complex(Complex64),
    Str(Vec<u8>),
}

impl Literal {
    /// The dtype a literal infers to before any context-driven promotion.
    pub fn dtype(&self) -> DType {
        match self {
            Literal::Bool(_) => DType::Bool,
            Literal::Int(v) => {
                if i32::try_from(*v).is_ok() {
                    DType::I32
                } else {
                    DType::I64
                }
            }
            Literal::Float(_) => DType::F64,
            Literal::Complex(_) => DType::C128,
            Literal::Str(_) => DType::Str,
        }
    }
}

/// Call target: a bare name before resolution, a builtin or a registered
/// callable ordinal after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallTarget {
    Named(String),
    Builtin(Builtin),
    /// Ordinal into the variable descriptor table (a `Func` or `Closure`
    /// descriptor).
    Registered(u32),
}

/// Slot reconciliation record for one local name across an `if`/`else`
/// join. `then_slot`/`else_slot` hold the arm-final values; the runtime
/// blends them into `phi_slot` under the condition mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhiEntry {
    pub name: String,
    pub phi_slot: u32,
    pub then_slot: u32,
    pub else_slot: u32,
}

/// Loop-carried local: `phi_slot` is seeded from `init_slot` before the
/// loop and refreshed from `body_slot` after each iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopCarry {
    pub name: String,
    pub phi_slot: u32,
    pub init_slot: u32,
    pub body_slot: u32,
}

/// Placeholder slot index before the analyzer assigns real slots.
pub const UNASSIGNED_SLOT: u32 = u32::MAX;

/// Node payload. Statement kinds only appear in multi-statement programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Literal(Literal),
    /// Unresolved identifier; only present between parse and analysis.
    Ident(String),
    /// Reference to variable `ordinal` in the descriptor table.
    Var { ordinal: u32 },
    /// Read of a DSL local slot.
    Local { slot: u32 },
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CmpOp),
    Call(CallTarget),
    /// Reduction over the single child. `fused_predicate` marks the
    /// analyzer-recognized `sum(x == c)` pattern lowered to a fused
    /// mask-and-accumulate kernel.
    Reduce { op: ReduceOp, fused_predicate: bool },
    /// `where(cond, t, f)` element-wise select; children `[cond, t, f]`.
    Where,

    /// Statement sequence; children are statements in order.
    Block,
    /// `name = expr`; single child is the value.
    Assign { name: String, slot: u32 },
    /// `return expr`; single child.
    Return,
    /// `if cond: ... [else: ...]`; children `[cond, then_block]` or
    /// `[cond, then_block, else_block]`. `scalar` marks block-level
    /// (reduced) conditions that drive control flow instead of masking.
    If { scalar: bool, phis: Vec<PhiEntry> },
    /// `for name in range(count): body`; children `[count, body_block]`.
    For {
        name: String,
        var_slot: u32,
        carried: Vec<LoopCarry>,
    },
    /// `break` / `break if cond`; optional single child is the (scalar)
    /// condition.
    Break,
    Continue,
    /// `print(args...)` or `print(format, args...)`; children are the
    /// value arguments.
    Print { format: Option<String> },
    /// Top-level `def name(args...):`; single child is the body block.
    KernelDef { name: String, args: Vec<String> },
}

impl NodeKind {
    /// Statement kinds produce no value.
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            NodeKind::Block
                | NodeKind::Assign { .. }
                | NodeKind::Return
                | NodeKind::If { .. }
                | NodeKind::For { .. }
                | NodeKind::Break
                | NodeKind::Continue
                | NodeKind::Print { .. }
                | NodeKind::KernelDef { .. }
        )
    }
}

/// One arena entry: payload, source span, analyzer-inferred dtype, child
/// ids (always strictly smaller than this node's id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    /// `None` until the analyzer runs; statements stay `None`.
    pub dtype: Option<DType>,
    pub children: SmallVec<[NodeId; 2]>,
}

/// Append-only node arena. The root is by convention the last interesting
/// node pushed; the compiled plan records it explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExprArena {
    nodes: Vec<Node>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a node, checking the earlier-children invariant.
    ///
    /// # Panics
    ///
    /// Panics if any child id is not strictly smaller than the new node's
    /// id; the parsers only ever construct children first, so this is an
    /// internal bug, not an input error.
    pub fn push(&mut self, kind: NodeKind, span: Span, children: &[NodeId]) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for &c in children {
            assert!(c.0 < id.0, "child {c} must precede node {id}");
        }
        self.nodes.push(Node {
            kind,
            span,
            dtype: None,
            children: SmallVec::from_slice(children),
        });
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    /// Inferred dtype of a node; panics if analysis has not run. Used by
    /// the evaluator and the JIT emitter, which only see analyzed arenas.
    pub fn dtype_of(&self, id: NodeId) -> DType {
        self.get(id)
            .dtype
            .expect("node dtype queried before analysis")
    }

    /// Whether any reduction node appears in the subtree.
    pub fn contains_reduce(&self, id: NodeId) -> bool {
        let node = self.get(id);
        if matches!(node.kind, NodeKind::Reduce { .. }) {
            return true;
        }
        node.children.iter().any(|&c| self.contains_reduce(c))
    }

    /// A scalar expression produces one value per block: literals,
    /// reductions, and element-wise combinations of those.
    pub fn is_scalar_expr(&self, id: NodeId) -> bool {
        let node = self.get(id);
        match &node.kind {
            NodeKind::Literal(_) | NodeKind::Reduce { .. } => true,
            NodeKind::Unary(_)
            | NodeKind::Binary(_)
            | NodeKind::Compare(_)
            | NodeKind::Call(CallTarget::Builtin(_)) => {
                node.children.iter().all(|&c| self.is_scalar_expr(c))
            }
            _ => false,
        }
    }

    /// All reduction nodes in the subtree, in arena order.
    pub fn collect_reduce_nodes(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let node = self.get(id);
        if matches!(node.kind, NodeKind::Reduce { .. }) {
            out.push(id);
            return; // nested reductions are rejected at analysis
        }
        for &c in node.children.iter() {
            self.collect_reduce_nodes(c, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(arena: &mut ExprArena, lit: Literal) -> NodeId {
        arena.push(NodeKind::Literal(lit), Span::default(), &[])
    }

    #[test]
    fn children_precede_parents() {
        let mut arena = ExprArena::new();
        let a = leaf(&mut arena, Literal::Int(1));
        let b = leaf(&mut arena, Literal::Int(2));
        let sum = arena.push(NodeKind::Binary(BinaryOp::Add), Span::default(), &[a, b]);
        assert_eq!(sum.0, 2);
        assert!(arena.get(sum).children.iter().all(|c| c.0 < sum.0));
    }

    #[test]
    #[should_panic(expected = "must precede")]
    fn forward_reference_panics() {
        let mut arena = ExprArena::new();
        let a = leaf(&mut arena, Literal::Int(1));
        // Fabricate an id the arena has not issued yet.
        arena.push(NodeKind::Binary(BinaryOp::Add), Span::default(), &[a, NodeId(7)]);
    }

    #[test]
    fn literal_dtypes() {
        assert_eq!(Literal::Bool(true).dtype(), DType::Bool);
        assert_eq!(Literal::Int(7).dtype(), DType::I32);
        assert_eq!(Literal::Int(1 << 40).dtype(), DType::I64);
        assert_eq!(Literal::Float(0.5).dtype(), DType::F64);
        assert_eq!(
            Literal::Complex(Complex64::new(0.0, 1.0)).dtype(),
            DType::C128
        );
    }

    #[test]
    fn reduce_accumulator_typing() {
        assert_eq!(ReduceOp::Sum.accumulator(DType::Bool), DType::I64);
        assert_eq!(ReduceOp::Sum.accumulator(DType::I32), DType::I64);
        assert_eq!(ReduceOp::Sum.accumulator(DType::U16), DType::U64);
        assert_eq!(ReduceOp::Sum.accumulator(DType::F32), DType::F32);
        assert_eq!(ReduceOp::Prod.accumulator(DType::C128), DType::C128);
        assert_eq!(ReduceOp::Min.accumulator(DType::I16), DType::I16);
        assert_eq!(ReduceOp::Any.accumulator(DType::F64), DType::Bool);
        assert_eq!(ReduceOp::All.accumulator(DType::U8), DType::Bool);
    }

    #[test]
    fn builtin_names_roundtrip() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::parse(b.name()), Some(b), "{}", b.name());
        }
        assert_eq!(Builtin::parse("frobnicate"), None);
    }

    #[test]
    fn builtin_arities() {
        assert_eq!(Builtin::Sqrt.arity(), 1);
        assert_eq!(Builtin::Atan2.arity(), 2);
        assert_eq!(Builtin::Pow.arity(), 2);
        assert_eq!(Builtin::Hypot.arity(), 2);
    }

    #[test]
    fn statement_kinds_are_statements() {
        assert!(NodeKind::Block.is_statement());
        assert!(NodeKind::Return.is_statement());
        assert!(!NodeKind::Where.is_statement());
        assert!(!NodeKind::Literal(Literal::Int(0)).is_statement());
    }

    #[test]
    fn serde_roundtrip_node() {
        let mut arena = ExprArena::new();
        let a = leaf(&mut arena, Literal::Float(1.5));
        let b = leaf(&mut arena, Literal::Complex(Complex64::new(0.0, 2.0)));
        arena.push(NodeKind::Binary(BinaryOp::Mul), Span::new(0, 9), &[a, b]);

        let json = serde_json::to_string(&arena).unwrap();
        let back: ExprArena = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 3);
        let json2 = serde_json::to_string(&back).unwrap();
        assert_eq!(json, json2);
    }
}
