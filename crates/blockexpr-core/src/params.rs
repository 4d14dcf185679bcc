//! Per-call evaluation parameters.
//!
//! An [`EvalParams`] record overrides the process-wide configuration for a
//! single evaluate call; every field has a "use the configured default"
//! state.

use serde::{Deserialize, Serialize};

/// Accuracy/performance selector for SIMD transcendentals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UlpMode {
    /// The engine's balanced default.
    #[default]
    Default,
    /// Higher-accuracy paths (~1 ULP); forces scalar libm-accuracy
    /// implementations where the SIMD approximation is looser.
    Ulp1,
    /// Lower-accuracy SIMD approximations (~3.5 ULP).
    Ulp35,
}

impl UlpMode {
    /// Parses the configuration spelling: `default`, `1`, `3.5`.
    pub fn parse(s: &str) -> Option<UlpMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Some(UlpMode::Default),
            "1" => Some(UlpMode::Ulp1),
            "3.5" => Some(UlpMode::Ulp35),
            _ => None,
        }
    }
}

/// JIT policy for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitMode {
    /// JIT multi-statement kernels, interpret single expressions.
    #[default]
    Auto,
    /// Force the JIT for every expression; falls back silently on failure.
    On,
    /// Never JIT.
    Off,
}

/// Evaluation parameters; `Default` means "use the configured policy for
/// everything".
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalParams {
    /// Disable SIMD kernels and run scalar code only.
    pub force_scalar: bool,
    /// Override of the configured ULP mode.
    pub ulp_mode: Option<UlpMode>,
    /// Override of the configured JIT policy.
    pub jit_mode: JitMode,
}

impl EvalParams {
    pub fn scalar() -> Self {
        EvalParams {
            force_scalar: true,
            ..Default::default()
        }
    }

    pub fn with_jit(mode: JitMode) -> Self {
        EvalParams {
            jit_mode: mode,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulp_mode_parses_config_spellings() {
        assert_eq!(UlpMode::parse("default"), Some(UlpMode::Default));
        assert_eq!(UlpMode::parse("1"), Some(UlpMode::Ulp1));
        assert_eq!(UlpMode::parse("3.5"), Some(UlpMode::Ulp35));
        assert_eq!(UlpMode::parse(" DEFAULT "), Some(UlpMode::Default));
        assert_eq!(UlpMode::parse("2"), None);
    }

    #[test]
    fn defaults_defer_to_configuration() {
        let p = EvalParams::default();
        assert!(!p.force_scalar);
        assert_eq!(p.ulp_mode, None);
        assert_eq!(p.jit_mode, JitMode::Auto);
    }
}
