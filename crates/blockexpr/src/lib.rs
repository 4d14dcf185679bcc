//! blockexpr: compile a textual numerical expression once, evaluate it
//! repeatedly over large contiguous arrays.
//!
//! Two grammars are accepted: a single-line algebraic form
//! (`"sqrt(a*a + b*b)"`) and an indentation-based multi-statement kernel
//! (`"def kernel(a, b): ..."`), detected automatically. Compilation
//! produces an immutable [`Expression`] that any number of threads may
//! evaluate concurrently; evaluation runs in cache-sized blocks through
//! per-dtype kernels, with optional SIMD transcendentals and an optional
//! JIT that lowers the plan to native code through an external C
//! compiler (falling back to the interpreter on any JIT failure).
//!
//! ```no_run
//! use blockexpr::{ArrayMut, ArrayRef, DType, Expression, VarDesc};
//!
//! let expr = Expression::compile(
//!     "a + b",
//!     &[VarDesc::array("a", DType::I32), VarDesc::array("b", DType::I32)],
//!     Some(DType::I32),
//! )?;
//! let (a, b) = ([0i32, 1, 2], [10i32, 20, 30]);
//! let mut out = [0i32; 3];
//! expr.eval(
//!     &[ArrayRef::I32(&a), ArrayRef::I32(&b)],
//!     &mut ArrayMut::I32(&mut out),
//!     3,
//!     None,
//! )?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Errors are typed ([`CompileError`], [`EvalError`]); each maps to a
//! stable negative status code via its `status()` method for callers
//! that keep the C-heritage convention, and the message of the most
//! recent failure on the current thread is available through
//! [`last_error`].

use std::cell::RefCell;
use std::ffi::c_void;
use std::sync::{Arc, OnceLock};

pub use blockexpr_core::{
    ArrayMut, ArrayRef, ClosureFn, CompileError, DType, EngineConfig, EvalError, EvalParams,
    JitMode, NdLayout, Plan, RegisteredFn, UlpMode, VarDesc, VarKind,
};
pub use blockexpr_jit::{HostKernel, KernelHost};

use blockexpr_check::AnalyzeOptions;
use blockexpr_jit::{CSourceBackend, HostBackend, JitKernel, KernelBackend};
use blockexpr_syntax::{looks_like_script, parse_expression, parse_script};

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_last_error(message: String) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Message of the most recent failure (or JIT degradation) on this
/// thread, valid until the next blockexpr call on the same thread.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Engine version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// A compiled expression: immutable after compile, safe to evaluate from
/// any number of threads concurrently, dropped exactly once.
pub struct Expression {
    plan: Arc<Plan>,
    /// Lazily compiled on the first JIT-enabled evaluate; `None` inside
    /// means "tried and fell back".
    jit: OnceLock<Option<JitKernel>>,
    jit_hint: Option<JitMode>,
    host: Option<Arc<dyn KernelHost>>,
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expression")
            .field("out_dtype", &self.plan.out_dtype)
            .field("script", &self.plan.script)
            .field("jit", &self.jit.get())
            .finish()
    }
}

impl Expression {
    /// Compiles an expression against a variable descriptor table.
    ///
    /// `out_dtype` of `None` infers the output dtype from the
    /// expression; a concrete dtype selects homogeneous mode (all
    /// variables `auto`, each takes the output dtype) or heterogeneous
    /// mode (all variables declared, result cast at the root).
    pub fn compile(
        source: &str,
        vars: &[VarDesc],
        out_dtype: Option<DType>,
    ) -> Result<Expression, CompileError> {
        Self::compile_inner(source, vars, out_dtype, None, None)
    }

    /// As [`Expression::compile`], plus the rectangular layout used by
    /// [`Expression::eval_nd`] and an optional JIT policy hint.
    pub fn compile_nd(
        source: &str,
        vars: &[VarDesc],
        out_dtype: Option<DType>,
        layout: NdLayout,
        jit_hint: Option<JitMode>,
    ) -> Result<Expression, CompileError> {
        Self::compile_inner(source, vars, out_dtype, Some(layout), jit_hint)
    }

    fn compile_inner(
        source: &str,
        vars: &[VarDesc],
        out_dtype: Option<DType>,
        nd: Option<NdLayout>,
        jit_hint: Option<JitMode>,
    ) -> Result<Expression, CompileError> {
        clear_last_error();
        let result = (|| {
            if source.trim().is_empty() {
                return Err(CompileError::InvalidArg {
                    message: "empty expression".to_string(),
                });
            }
            let (arena, root) = if looks_like_script(source) {
                let (arena, root, _args) = parse_script(source)?;
                (arena, root)
            } else {
                parse_expression(source)?
            };
            let opts = AnalyzeOptions {
                block_size: EngineConfig::global().block_size,
                nd,
            };
            let plan = blockexpr_check::analyze(arena, root, vars, out_dtype, opts)?;
            Ok(Expression {
                plan: Arc::new(plan),
                jit: OnceLock::new(),
                jit_hint,
                host: None,
            })
        })();
        if let Err(e) = &result {
            set_last_error(e.to_string());
        }
        result
    }

    /// Registers host callbacks for kernel loading; the JIT then targets
    /// a portable bytecode image instead of a shared object.
    pub fn with_host(mut self, host: Arc<dyn KernelHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// The compiled output dtype.
    pub fn out_dtype(&self) -> DType {
        self.plan.out_dtype
    }

    /// The immutable compiled plan.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Evaluates `n` elements.
    ///
    /// `vars` holds one array per data descriptor, in descriptor order;
    /// registered callables take no entry. Reduction expressions write
    /// their single result to `out[0]`; everything else fills
    /// `out[..n]`.
    pub fn eval(
        &self,
        vars: &[ArrayRef<'_>],
        out: &mut ArrayMut<'_>,
        n: usize,
        params: Option<&EvalParams>,
    ) -> Result<(), EvalError> {
        clear_last_error();
        let params = params.copied().unwrap_or_default();
        let result = self.eval_inner(vars, out, n, &params);
        if let Err(e) = &result {
            set_last_error(e.to_string());
        }
        result
    }

    fn eval_inner(
        &self,
        vars: &[ArrayRef<'_>],
        out: &mut ArrayMut<'_>,
        n: usize,
        params: &EvalParams,
    ) -> Result<(), EvalError> {
        if self.jit_enabled(params) {
            if let Some(kernel) = self.jit_kernel() {
                blockexpr_eval::validate_call(&self.plan, vars, out, n, false)?;
                self.call_jit(kernel, vars, out, n);
                return Ok(());
            }
        }
        blockexpr_eval::evaluate(&self.plan, vars, out, n, params)
    }

    /// Padding-aware evaluation of one (chunk, block) tile: the valid
    /// prefix is computed, the padding suffix of `out` is zeroed.
    pub fn eval_nd(
        &self,
        vars: &[ArrayRef<'_>],
        out: &mut ArrayMut<'_>,
        nchunk: i64,
        nblock: i64,
        params: Option<&EvalParams>,
    ) -> Result<(), EvalError> {
        clear_last_error();
        let params = params.copied().unwrap_or_default();
        let result = (|| {
            if self.jit_enabled(&params) {
                if let Some(kernel) = self.jit_kernel() {
                    let valid = blockexpr_eval::valid_nitems(&self.plan, nchunk, nblock)?;
                    blockexpr_eval::validate_call(&self.plan, vars, out, valid, false)?;
                    self.call_jit(kernel, vars, out, valid);
                    let total = self.plan.nd.as_ref().expect("nd checked").block_nitems();
                    let upto = out.len().min(total.max(valid));
                    if upto > valid {
                        blockexpr_eval::zero_pad(out, valid, upto);
                    }
                    return Ok(());
                }
            }
            blockexpr_eval::evaluate_nd(&self.plan, vars, out, nchunk, nblock, &params)
        })();
        if let Err(e) = &result {
            set_last_error(e.to_string());
        }
        result
    }

    /// Count of non-padding elements of block `nblock` within chunk
    /// `nchunk`.
    pub fn valid_nitems(&self, nchunk: i64, nblock: i64) -> Result<usize, EvalError> {
        blockexpr_eval::valid_nitems(&self.plan, nchunk, nblock)
    }

    fn jit_enabled(&self, params: &EvalParams) -> bool {
        match params.jit_mode {
            JitMode::On => true,
            JitMode::Off => false,
            JitMode::Auto => match EngineConfig::global().jit {
                Some(enabled) => enabled,
                None => match self.jit_hint {
                    Some(JitMode::On) => true,
                    Some(JitMode::Off) => false,
                    // Auto policy: native code pays off for the
                    // multi-statement kernels, not one-operator trees.
                    _ => self.plan.script,
                },
            },
        }
    }

    /// The compiled kernel, building it on first use. Any failure is
    /// remembered as "interpret instead" and surfaced as a thread-local
    /// diagnostic, never as an error.
    fn jit_kernel(&self) -> Option<&JitKernel> {
        self.jit
            .get_or_init(|| {
                let config = EngineConfig::global();
                let result = match &self.host {
                    Some(host) => HostBackend { host: host.clone() }.compile(&self.plan, config),
                    None => CSourceBackend.compile(&self.plan, config),
                };
                match result {
                    Ok(kernel) => Some(kernel),
                    Err(e) => {
                        tracing::warn!(error = %e, "jit unavailable, interpreting");
                        set_last_error(format!("jit fell back to interpreter: {e}"));
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Drives the kernel block by block with adjusted base pointers.
    fn call_jit(&self, kernel: &JitKernel, vars: &[ArrayRef<'_>], out: &mut ArrayMut<'_>, n: usize) {
        let block = self.plan.block_size.max(1);
        let out_width = self.plan.out_dtype.width();
        let out_base = out.as_mut_ptr_bytes();
        let mut ptrs: Vec<*const c_void> = vec![std::ptr::null(); vars.len()];
        let mut off = 0usize;
        while off < n {
            let len = block.min(n - off);
            for (p, a) in ptrs.iter_mut().zip(vars) {
                // SAFETY: validate_call checked each array covers n
                // elements of its compiled dtype.
                *p = unsafe { a.as_ptr_bytes().add(off * a.itemsize()) } as *const c_void;
            }
            // SAFETY: the emitted kernel reads len elements from each
            // pointer and writes len elements of the output dtype.
            unsafe {
                kernel.call(&ptrs, out_base.add(off * out_width) as *mut c_void, len as i64);
            }
            off += len;
        }
    }
}
