//! Process-wide engine configuration.
//!
//! Every environment knob is read exactly once, on first use, into an
//! immutable [`EngineConfig`]; the hot path reads the struct, never the
//! environment. A per-call [`EvalParams`](crate::params::EvalParams)
//! record can override any knob for a single evaluate call.
//!
//! Recognized variables (all optional):
//!
//! | Variable                        | Meaning                              |
//! |---------------------------------|--------------------------------------|
//! | `BLOCKEXPR_JIT`                 | on/off override of the auto policy   |
//! | `BLOCKEXPR_CC`                  | `tcc` or `cc`                        |
//! | `BLOCKEXPR_SCALAR_MATH_BRIDGE`  | route scalar math via the bridge     |
//! | `BLOCKEXPR_VEC_MATH`            | emit SIMD math inline                |
//! | `BLOCKEXPR_HYBRID_VEC_MATH`     | hybrid expression vector-math policy |
//! | `BLOCKEXPR_CACHE`               | on-disk kernel cache on/off          |
//! | `BLOCKEXPR_CACHE_DIR`           | cache root path                      |
//! | `BLOCKEXPR_ULP_MODE`            | `default` / `1` / `3.5`              |
//! | `BLOCKEXPR_BLOCK_SIZE`          | block size in elements               |
//!
//! Boolean values accept `0/1/on/off/true/false`, case-insensitively.

use std::path::PathBuf;
use std::sync::OnceLock;

use crate::params::UlpMode;

/// Default block size in elements, tuned so a block of every operand plus
/// the temporary arena fits in L1/L2 for typical expressions.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Which C compiler drives the JIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compiler {
    /// The host C compiler (`cc`).
    Cc,
    /// The tiny C compiler (`tcc`), much faster to start.
    Tcc,
}

impl Compiler {
    pub fn command(self) -> &'static str {
        match self {
            Compiler::Cc => "cc",
            Compiler::Tcc => "tcc",
        }
    }
}

/// Immutable configuration snapshot.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `None` = auto policy (JIT multi-statement kernels only).
    pub jit: Option<bool>,
    pub compiler: Compiler,
    pub scalar_math_bridge: bool,
    pub vec_math: bool,
    pub hybrid_vec_math: bool,
    pub cache: bool,
    /// `None` = platform default cache location.
    pub cache_dir: Option<PathBuf>,
    pub ulp_mode: UlpMode,
    pub block_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            jit: None,
            compiler: Compiler::Cc,
            scalar_math_bridge: false,
            vec_math: true,
            hybrid_vec_math: false,
            cache: true,
            cache_dir: None,
            ulp_mode: UlpMode::Default,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Parses a boolean knob; unknown spellings are `None` (knob ignored).
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

impl EngineConfig {
    /// Reads every knob from the environment. Unparseable values fall back
    /// to the default rather than failing the process.
    pub fn from_env() -> Self {
        let mut cfg = EngineConfig::default();

        if let Ok(v) = std::env::var("BLOCKEXPR_JIT") {
            cfg.jit = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("BLOCKEXPR_CC") {
            match v.trim().to_ascii_lowercase().as_str() {
                "tcc" => cfg.compiler = Compiler::Tcc,
                "cc" => cfg.compiler = Compiler::Cc,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("BLOCKEXPR_SCALAR_MATH_BRIDGE") {
            if let Some(b) = parse_bool(&v) {
                cfg.scalar_math_bridge = b;
            }
        }
        if let Ok(v) = std::env::var("BLOCKEXPR_VEC_MATH") {
            if let Some(b) = parse_bool(&v) {
                cfg.vec_math = b;
            }
        }
        if let Ok(v) = std::env::var("BLOCKEXPR_HYBRID_VEC_MATH") {
            if let Some(b) = parse_bool(&v) {
                cfg.hybrid_vec_math = b;
            }
        }
        if let Ok(v) = std::env::var("BLOCKEXPR_CACHE") {
            if let Some(b) = parse_bool(&v) {
                cfg.cache = b;
            }
        }
        if let Ok(v) = std::env::var("BLOCKEXPR_CACHE_DIR") {
            if !v.trim().is_empty() {
                cfg.cache_dir = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("BLOCKEXPR_ULP_MODE") {
            if let Some(m) = UlpMode::parse(&v) {
                cfg.ulp_mode = m;
            }
        }
        if let Ok(v) = std::env::var("BLOCKEXPR_BLOCK_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if n > 0 {
                    cfg.block_size = n;
                }
            }
        }

        cfg
    }

    /// The process-wide snapshot, read from the environment on first use.
    pub fn global() -> &'static EngineConfig {
        static CONFIG: OnceLock<EngineConfig> = OnceLock::new();
        CONFIG.get_or_init(EngineConfig::from_env)
    }
}
