pub mod array;
pub mod ast;
pub mod config;
pub mod dtype;
pub mod error;
pub mod params;
pub mod plan;
pub mod span;
pub mod variable;

// Re-export commonly used types
pub use array::{ArrayMut, ArrayRef};
pub use ast::{
    Builtin, BinaryOp, CallTarget, CmpOp, ExprArena, Literal, LoopCarry, Node, NodeId, NodeKind,
    PhiEntry, ReduceOp, UnaryOp, UNASSIGNED_SLOT,
};
pub use config::{Compiler, EngineConfig, DEFAULT_BLOCK_SIZE};
pub use dtype::{CastKind, DType};
pub use error::{CompileError, EvalError};
pub use params::{EvalParams, JitMode, UlpMode};
pub use plan::{NdLayout, Plan, SlotDesc};
pub use span::{LineCol, Span};
pub use variable::{ClosureFn, RegisteredFn, VarDesc, VarKind, MAX_ARITY, MAX_VARS};
