//! On-disk kernel cache.
//!
//! One directory holds, per cached kernel, a `<hash>.c` source and the
//! compiled `<hash>.<dll-ext>` image. The hash is blake3 over everything
//! that affects the generated code: the C source itself (which already
//! encodes the AST structure and dtypes), the block size, the compiler
//! choice, the ULP mode, the bridge flags, and the engine version — so a
//! stale cache can never be loaded across an upgrade.
//!
//! All writes go to a temporary file in the same directory followed by an
//! atomic rename; concurrent processes either see the finished file or
//! none at all.

use std::io::Write;
use std::path::{Path, PathBuf};

use blockexpr_core::{EngineConfig, Plan, UlpMode};

use crate::JitError;

/// Cache root: the configured directory, or a per-user subdirectory of
/// the system temp dir.
pub fn cache_root(config: &EngineConfig) -> PathBuf {
    match &config.cache_dir {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir().join("blockexpr-kernels"),
    }
}

/// Content hash naming the cached artifacts for one (plan, config) pair.
pub fn cache_key(c_source: &str, plan: &Plan, config: &EngineConfig) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(c_source.as_bytes());
    hasher.update(&(plan.block_size as u64).to_le_bytes());
    hasher.update(config.compiler.command().as_bytes());
    hasher.update(&[
        config.scalar_math_bridge as u8,
        config.vec_math as u8,
        config.hybrid_vec_math as u8,
        match config.ulp_mode {
            UlpMode::Default => 0,
            UlpMode::Ulp1 => 1,
            UlpMode::Ulp35 => 2,
        },
    ]);
    hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
    hasher.finalize().to_hex().to_string()
}

pub fn source_path(root: &Path, key: &str) -> PathBuf {
    root.join(format!("{key}.c"))
}

pub fn object_path(root: &Path, key: &str) -> PathBuf {
    root.join(format!("{key}.{}", std::env::consts::DLL_EXTENSION))
}

/// Writes `contents` to `final_path` via tempfile + atomic rename.
pub fn write_atomic(final_path: &Path, contents: &[u8]) -> Result<(), JitError> {
    let dir = final_path
        .parent()
        .ok_or_else(|| JitError::Cache {
            message: format!("cache path {} has no parent", final_path.display()),
        })?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.persist(final_path).map_err(|e| JitError::Cache {
        message: format!("persisting {}: {}", final_path.display(), e.error),
    })?;
    Ok(())
}

/// Atomically renames a finished build product into its cache slot.
pub fn publish(tmp: &Path, final_path: &Path) -> Result<(), JitError> {
    std::fs::rename(tmp, final_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockexpr_check::{analyze, AnalyzeOptions};
    use blockexpr_core::{Compiler, DType, VarDesc};
    use blockexpr_syntax::parse_expression;

    fn plan() -> Plan {
        let (arena, root) = parse_expression("a + 1").unwrap();
        analyze(
            arena,
            root,
            &[VarDesc::array("a", DType::I32)],
            None,
            AnalyzeOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn key_is_stable_for_identical_inputs() {
        let p = plan();
        let cfg = EngineConfig::default();
        assert_eq!(cache_key("src", &p, &cfg), cache_key("src", &p, &cfg));
    }

    #[test]
    fn key_changes_with_source_compiler_and_mode() {
        let p = plan();
        let cfg = EngineConfig::default();
        let base = cache_key("src", &p, &cfg);

        assert_ne!(base, cache_key("other", &p, &cfg));

        let mut tcc = cfg.clone();
        tcc.compiler = Compiler::Tcc;
        assert_ne!(base, cache_key("src", &p, &tcc));

        let mut ulp = cfg.clone();
        ulp.ulp_mode = UlpMode::Ulp35;
        assert_ne!(base, cache_key("src", &p, &ulp));

        let mut bridged = cfg;
        bridged.scalar_math_bridge = true;
        assert_ne!(base, cache_key("src", &p, &bridged));
    }

    #[test]
    fn atomic_write_creates_the_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.c");
        write_atomic(&path, b"void kernel(void) {}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"void kernel(void) {}");
        // No stray temporaries left behind.
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn artifact_paths_share_the_stem() {
        let root = Path::new("/tmp/cache");
        let src = source_path(root, "abc");
        let obj = object_path(root, "abc");
        assert_eq!(src.file_stem(), obj.file_stem());
        assert_eq!(src.extension().unwrap(), "c");
    }
}
