//! Semantic analysis: turns a parsed arena plus a variable descriptor
//! table into an immutable, evaluation-ready [`Plan`].
//!
//! The pipeline, in order: descriptor validation, output-mode validation
//! (homogeneous vs heterogeneous), resolution + inference + slot/phi
//! assignment ([`infer`]), constant folding ([`fold`]), reduction-position
//! checks, and plan assembly with the per-block arena size.

pub mod fold;
pub mod infer;

use blockexpr_core::{
    CompileError, DType, ExprArena, NdLayout, NodeId, NodeKind, Plan, VarDesc, MAX_VARS,
};

use crate::infer::Analyzer;

/// Non-source inputs to analysis.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub block_size: usize,
    pub nd: Option<NdLayout>,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            block_size: blockexpr_core::DEFAULT_BLOCK_SIZE,
            nd: None,
        }
    }
}

/// Analyzes a parsed arena into a [`Plan`].
///
/// `out_dtype` of `None` means "infer from the expression"; a concrete
/// dtype selects homogeneous mode (every `auto` variable takes it) or
/// heterogeneous mode (all variables declared, result cast at the root),
/// and mixing the two is a compile error.
pub fn analyze(
    mut arena: ExprArena,
    root: NodeId,
    vars: &[VarDesc],
    out_dtype: Option<DType>,
    opts: AnalyzeOptions,
) -> Result<Plan, CompileError> {
    validate_vars(vars)?;
    if let Some(nd) = &opts.nd {
        nd.validate()
            .map_err(|message| CompileError::InvalidArg { message })?;
    }

    let script = matches!(arena.get(root).kind, NodeKind::KernelDef { .. });
    let var_dtypes = effective_var_dtypes(vars, out_dtype)?;
    let plan_var_dtypes = var_dtypes.clone();

    // Script pre-checks that only need a read-only arena.
    let body = if script {
        let b = arena.get(root).children[0];
        if let NodeKind::KernelDef { args, .. } = &arena.get(root).kind {
            for arg in args {
                if !vars.iter().any(|v| v.name == *arg) {
                    return Err(CompileError::InvalidArg {
                        message: format!("kernel argument '{arg}' has no variable descriptor"),
                    });
                }
            }
        }
        validate_single_return(&arena, b)?;
        Some(b)
    } else {
        None
    };

    let mut analyzer = Analyzer::new(&mut arena, vars, var_dtypes);
    let inferred = if let Some(body) = body {
        analyzer.analyze_stmt(body)?;
        analyzer.return_dtype.ok_or_else(|| CompileError::InvalidArg {
            message: "kernel has no return statement".to_string(),
        })?
    } else {
        let dt = analyzer.infer_expr(root)?;
        analyzer.check_reduction_position(root)?;
        dt
    };
    let slots = std::mem::take(&mut analyzer.slots);
    drop(analyzer);

    fold::fold_constants(&mut arena)?;

    // The expression whose dtype becomes the output: the root itself, or
    // the return value of a kernel.
    let result_expr = match body {
        Some(b) => {
            let ret = *arena.get(b).children.last().expect("non-empty body");
            arena.get(ret).children[0]
        }
        None => root,
    };
    let reduces = arena.contains_reduce(result_expr);

    let out = out_dtype.unwrap_or(inferred);
    if let Some(declared) = out_dtype {
        // A declared output must be able to hold a reduction accumulator;
        // element-wise results may narrow freely (cast at root).
        if reduces && DType::promote(inferred, declared) != Some(declared) {
            return Err(CompileError::ReductionInvalid {
                message: format!(
                    "output dtype {declared} cannot hold the reduction accumulator {inferred}"
                ),
                span: arena.get(root).span,
            });
        }
    }

    let arena_bytes_per_block = Plan::compute_arena_bytes(&slots, opts.block_size);
    Ok(Plan {
        arena,
        vars: vars.to_vec(),
        var_dtypes: plan_var_dtypes,
        root,
        out_dtype: out,
        slots,
        block_size: opts.block_size,
        arena_bytes_per_block,
        nd: opts.nd,
        script,
    })
}

fn validate_vars(vars: &[VarDesc]) -> Result<(), CompileError> {
    if vars.len() > MAX_VARS {
        return Err(CompileError::InvalidArg {
            message: format!("too many variables: {} (limit {MAX_VARS})", vars.len()),
        });
    }
    for (i, v) in vars.iter().enumerate() {
        if v.name.is_empty() {
            return Err(CompileError::InvalidArg {
                message: format!("variable {i} has an empty name"),
            });
        }
        if vars[..i].iter().any(|p| p.name == v.name) {
            return Err(CompileError::InvalidArg {
                message: format!("duplicate variable name '{}'", v.name),
            });
        }
        if v.dtype == Some(DType::Str) && !matches!(v.itemsize, Some(n) if n > 0) {
            return Err(CompileError::InvalidArg {
                message: format!("string variable '{}' needs a positive itemsize", v.name),
            });
        }
    }
    Ok(())
}

/// Invariant 4 of the data model: for inferred output every variable is
/// concrete; for a declared output, variables are all-auto (homogeneous)
/// or all-concrete (heterogeneous).
fn effective_var_dtypes(
    vars: &[VarDesc],
    out_dtype: Option<DType>,
) -> Result<Vec<DType>, CompileError> {
    let arrays: Vec<&VarDesc> = vars.iter().filter(|v| v.kind.is_array()).collect();
    match out_dtype {
        None => {
            for v in &arrays {
                if v.dtype.is_none() {
                    return Err(CompileError::VarUnspecified {
                        name: v.name.clone(),
                    });
                }
            }
        }
        Some(o) => {
            if o == DType::Str {
                return Err(CompileError::InvalidArg {
                    message: "output dtype cannot be str".to_string(),
                });
            }
            let autos = arrays.iter().filter(|v| v.dtype.is_none()).count();
            if autos > 0 && autos < arrays.len() {
                let offender = arrays.iter().find(|v| v.dtype.is_none()).unwrap();
                return Err(CompileError::VarMixed {
                    name: offender.name.clone(),
                });
            }
        }
    }
    Ok(vars
        .iter()
        .map(|v| v.dtype.or(out_dtype).expect("validated above"))
        .collect())
}

/// The kernel body must contain exactly one `return`, as its final
/// top-level statement.
fn validate_single_return(arena: &ExprArena, body: NodeId) -> Result<(), CompileError> {
    fn count_returns(arena: &ExprArena, id: NodeId) -> usize {
        let node = arena.get(id);
        let own = matches!(node.kind, NodeKind::Return) as usize;
        own + node
            .children
            .iter()
            .map(|&c| count_returns(arena, c))
            .sum::<usize>()
    }

    let total = count_returns(arena, body);
    if total != 1 {
        return Err(CompileError::InvalidArg {
            message: format!("kernel must contain exactly one return, found {total}"),
        });
    }
    let last = *arena.get(body).children.last().expect("non-empty block");
    if !matches!(arena.get(last).kind, NodeKind::Return) {
        return Err(CompileError::InvalidArg {
            message: "return must be the final statement of the kernel".to_string(),
        });
    }
    Ok(())
}
