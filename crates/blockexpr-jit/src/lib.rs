//! Native code generation for compiled plans.
//!
//! The backend lowers an analyzed plan to a small C translation unit,
//! compiles it with an external C compiler (`cc` or `tcc`), caches both
//! artifacts on disk under a content hash, and loads the shared object.
//! Hosts without native loading can register callbacks instead and
//! receive a portable bytecode image ([`host`]).
//!
//! Every error here is recoverable by design: the caller falls back to
//! the interpreter and the evaluation still succeeds.

pub mod bridge;
pub mod cache;
pub mod driver;
pub mod emit;
pub mod host;

use std::ffi::c_void;

use thiserror::Error;

use blockexpr_core::{EngineConfig, Plan};

pub use driver::{LoadedKernel, RawKernelFn};
pub use emit::EmitOptions;
pub use host::{HostBackend, HostKernel, KernelHost};

/// JIT failures. None of these abort an evaluation; they demote it to
/// the interpreted path.
#[derive(Debug, Error)]
pub enum JitError {
    /// The plan uses a construct with no native lowering.
    #[error("not jittable: {reason}")]
    Unsupported { reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compiler '{command}' not found on PATH")]
    CompilerNotFound { command: String },

    #[error("kernel compilation failed:\n{stderr}")]
    CompileFailed { stderr: String },

    #[error("loading kernel failed: {message}")]
    Load { message: String },

    #[error("kernel cache error: {message}")]
    Cache { message: String },

    #[error("host instantiate failed: {message}")]
    Host { message: String },
}

/// A compiled kernel from either backend.
pub enum JitKernel {
    Native(LoadedKernel),
    Host(Box<dyn HostKernel>),
}

impl JitKernel {
    /// Invokes the kernel.
    ///
    /// # Safety
    ///
    /// `vars` must hold one valid base pointer per array variable in
    /// descriptor order, each covering `nitems` elements of its compiled
    /// dtype; `out` must cover `nitems` elements of the output dtype.
    pub unsafe fn call(&self, vars: &[*const c_void], out: *mut c_void, nitems: i64) {
        match self {
            JitKernel::Native(k) => k.call(vars, out, nitems),
            JitKernel::Host(k) => k.call(vars, out, nitems),
        }
    }
}

impl std::fmt::Debug for JitKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JitKernel::Native(_) => write!(f, "JitKernel::Native"),
            JitKernel::Host(_) => write!(f, "JitKernel::Host"),
        }
    }
}

/// A code-generation strategy. The evaluator treats implementations
/// interchangeably; absence of a backend means "interpret".
pub trait KernelBackend: Send + Sync {
    fn compile(&self, plan: &Plan, config: &EngineConfig) -> Result<JitKernel, JitError>;
}

/// The default backend: emit C, compile, dlopen, cache on disk.
pub struct CSourceBackend;

impl KernelBackend for CSourceBackend {
    fn compile(&self, plan: &Plan, config: &EngineConfig) -> Result<JitKernel, JitError> {
        let opts = EmitOptions {
            scalar_math_bridge: config.scalar_math_bridge,
        };
        let source = emit::emit_c(plan, &opts)?;
        let key = cache::cache_key(&source, plan, config);

        if config.cache {
            let root = cache::cache_root(config);
            let so = cache::object_path(&root, &key);
            if so.exists() {
                tracing::debug!(%key, "jit cache hit");
            } else {
                let c = cache::source_path(&root, &key);
                cache::write_atomic(&c, source.as_bytes())?;
                // Build next to the final name, publish atomically so a
                // concurrent process never loads a half-written object.
                let tmp = root.join(format!(".{key}.{}.tmp", std::process::id()));
                driver::compile_shared_object(config.compiler, &c, &tmp)?;
                cache::publish(&tmp, &so)?;
                tracing::debug!(%key, compiler = config.compiler.command(), "jit kernel compiled");
            }
            let kernel = driver::load(&so, opts.scalar_math_bridge)?;
            Ok(JitKernel::Native(kernel))
        } else {
            let scratch = tempfile::tempdir()?;
            let c = scratch.path().join(format!("{key}.c"));
            std::fs::write(&c, &source)?;
            let so = scratch
                .path()
                .join(format!("{key}.{}", std::env::consts::DLL_EXTENSION));
            driver::compile_shared_object(config.compiler, &c, &so)?;
            let mut kernel = driver::load(&so, opts.scalar_math_bridge)?;
            kernel.scratch = Some(scratch);
            Ok(JitKernel::Native(kernel))
        }
    }
}
