//! Compile- and evaluate-time error types.
//!
//! Uses `thiserror` for structured, matchable variants. Internally every
//! fallible path propagates these with `?`; the public boundary converts
//! them to the negative status codes of the C-heritage interface via
//! [`CompileError::status`] / [`EvalError::status`] and mirrors the
//! message into a thread-local slot.

use thiserror::Error;

use crate::dtype::DType;
use crate::span::{LineCol, Span};

/// Errors reported by compile (parse + analysis).
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// Allocation failure while building the plan.
    #[error("out of memory")]
    Oom,

    /// Syntax error; `span.start` is the primary diagnostic position.
    #[error("parse error at byte {pos}: {message}", pos = span.start)]
    Parse {
        span: Span,
        message: String,
        /// Filled by the script lexer, absent for the algebraic form.
        line_col: Option<LineCol>,
    },

    /// Invalid compile parameters (empty source, too many variables,
    /// duplicate names, bad ND metadata).
    #[error("invalid argument: {message}")]
    InvalidArg { message: String },

    /// A builtin or operator has no complex implementation.
    #[error("'{what}' is not supported for complex operands")]
    ComplexUnsupported { what: String, span: Span },

    /// A reduction whose output type cannot hold the accumulator, or a
    /// reduction in a position requiring a second block traversal.
    #[error("invalid reduction: {message}")]
    ReductionInvalid { message: String, span: Span },

    /// Concrete output dtype with a mix of declared and `auto` variables.
    #[error("variable '{name}' mixes declared and inferred dtypes")]
    VarMixed { name: String },

    /// `auto` output with an undeclared variable dtype.
    #[error("variable '{name}' has no dtype and output dtype is inferred")]
    VarUnspecified { name: String },

    /// No kernel can satisfy a call or operator with these operand types.
    #[error("invalid argument type: {message}")]
    InvalidArgType { message: String, span: Span },

    /// Nested sub-expressions mix types in a way promotion cannot resolve
    /// (e.g. string with numeric).
    #[error("mixed types in nested expression")]
    MixedTypeNested { span: Span },
}

impl CompileError {
    /// Negative status code of the public boundary; success is 0.
    pub fn status(&self) -> i32 {
        match self {
            CompileError::Oom => -1,
            CompileError::Parse { .. } => -2,
            CompileError::InvalidArg { .. } => -3,
            CompileError::ComplexUnsupported { .. } => -4,
            CompileError::ReductionInvalid { .. } => -5,
            CompileError::VarMixed { .. } => -6,
            CompileError::VarUnspecified { .. } => -7,
            CompileError::InvalidArgType { .. } => -8,
            CompileError::MixedTypeNested { .. } => -9,
        }
    }

    /// Primary error byte position, when one exists.
    pub fn position(&self) -> Option<usize> {
        match self {
            CompileError::Parse { span, .. }
            | CompileError::ComplexUnsupported { span, .. }
            | CompileError::ReductionInvalid { span, .. }
            | CompileError::InvalidArgType { span, .. }
            | CompileError::MixedTypeNested { span } => Some(span.start),
            _ => None,
        }
    }
}

/// Errors reported by evaluate. Strictly misuse or resource failures;
/// numeric conditions (overflow, NaN) are defined behavior, not errors.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("out of memory")]
    Oom,

    /// The expression handle was already freed or never compiled.
    #[error("null expression")]
    NullExpr,

    #[error("too many variables: {count} (limit {limit})")]
    TooManyVars { count: usize, limit: usize },

    /// The caller's arrays disagree with the compiled descriptor table.
    #[error("variable mismatch: {message}")]
    VarMismatch { message: String },

    #[error("invalid argument: {message}")]
    InvalidArg { message: String },
}

impl EvalError {
    /// Negative status code of the public boundary; success is 0.
    pub fn status(&self) -> i32 {
        match self {
            EvalError::Oom => -1,
            EvalError::NullExpr => -10,
            EvalError::TooManyVars { .. } => -11,
            EvalError::VarMismatch { .. } => -12,
            EvalError::InvalidArg { .. } => -3,
        }
    }

    pub fn var_mismatch(message: impl Into<String>) -> Self {
        EvalError::VarMismatch {
            message: message.into(),
        }
    }

    pub fn invalid_arg(message: impl Into<String>) -> Self {
        EvalError::InvalidArg {
            message: message.into(),
        }
    }
}

/// Convenience constructor used across the analyzer.
pub fn invalid_arg_type(message: impl Into<String>, span: Span) -> CompileError {
    CompileError::InvalidArgType {
        message: message.into(),
        span,
    }
}

/// Type-mismatch message helper keeping diagnostics uniform.
pub fn type_mismatch(op: &str, lhs: DType, rhs: DType) -> String {
    format!("no kernel for '{op}' with operand types {lhs} and {rhs}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_status_codes_are_stable() {
        assert_eq!(CompileError::Oom.status(), -1);
        let parse = CompileError::Parse {
            span: Span::new(4, 5),
            message: "unexpected '@'".into(),
            line_col: None,
        };
        assert_eq!(parse.status(), -2);
        assert_eq!(parse.position(), Some(4));
        assert_eq!(
            CompileError::VarMixed { name: "a".into() }.status(),
            -6
        );
        assert_eq!(
            CompileError::VarUnspecified { name: "a".into() }.status(),
            -7
        );
        assert_eq!(
            CompileError::MixedTypeNested {
                span: Span::default()
            }
            .status(),
            -9
        );
    }

    #[test]
    fn eval_status_codes_are_stable() {
        assert_eq!(EvalError::Oom.status(), -1);
        assert_eq!(EvalError::NullExpr.status(), -10);
        assert_eq!(
            EvalError::TooManyVars {
                count: 99,
                limit: 64
            }
            .status(),
            -11
        );
        assert_eq!(EvalError::var_mismatch("x").status(), -12);
        assert_eq!(EvalError::invalid_arg("x").status(), -3);
    }

    #[test]
    fn parse_error_message_carries_position() {
        let err = CompileError::Parse {
            span: Span::new(12, 13),
            message: "unterminated string".into(),
            line_col: Some(LineCol::new(2, 3)),
        };
        let text = err.to_string();
        assert!(text.contains("byte 12"), "{text}");
    }

    #[test]
    fn type_mismatch_names_both_types() {
        let msg = type_mismatch("<<", DType::F64, DType::I32);
        assert!(msg.contains("float64"), "{msg}");
        assert!(msg.contains("int32"), "{msg}");
    }
}
