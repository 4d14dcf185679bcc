//! Compiler subprocess driver and shared-object loading.

use std::ffi::c_void;
use std::path::Path;
use std::process::Command;

use blockexpr_core::Compiler;

use crate::JitError;

/// The emitted entry point's signature.
pub type RawKernelFn = unsafe extern "C" fn(*const *const c_void, *mut c_void, i64);

type SetBridgeFn = unsafe extern "C" fn(*const c_void);

/// Compiles one C translation unit into a shared object.
pub fn compile_shared_object(
    compiler: Compiler,
    c_path: &Path,
    so_path: &Path,
) -> Result<(), JitError> {
    let cmd = compiler.command();
    let mut command = Command::new(cmd);
    command.arg("-O2");
    if compiler == Compiler::Cc {
        command.arg("-fPIC");
    }
    command
        .arg("-shared")
        .arg("-o")
        .arg(so_path)
        .arg(c_path)
        .arg("-lm");

    let output = command.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            JitError::CompilerNotFound {
                command: cmd.to_string(),
            }
        } else {
            JitError::Io(e)
        }
    })?;
    if !output.status.success() {
        return Err(JitError::CompileFailed {
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// A loaded native kernel: the shared object plus its entry point. The
/// library handle keeps the code mapped for as long as the kernel lives.
pub struct LoadedKernel {
    func: RawKernelFn,
    _lib: libloading::Library,
    /// Keeps un-cached build products alive until the kernel drops.
    pub(crate) scratch: Option<tempfile::TempDir>,
}

impl LoadedKernel {
    /// Invokes the kernel over `nitems` elements.
    ///
    /// # Safety
    ///
    /// `vars` must hold one valid base pointer per array variable in
    /// descriptor order, each covering `nitems` elements of the compiled
    /// dtype, and `out` must cover `nitems` elements of the output dtype.
    pub unsafe fn call(&self, vars: &[*const c_void], out: *mut c_void, nitems: i64) {
        (self.func)(vars.as_ptr(), out, nitems)
    }
}

impl std::fmt::Debug for LoadedKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoadedKernel(native)")
    }
}

/// Loads a compiled kernel and, when `install_bridge` is set, installs
/// the math bridge table through the exported `kernel_set_bridge`.
pub fn load(so_path: &Path, install_bridge: bool) -> Result<LoadedKernel, JitError> {
    // SAFETY: the object was produced by our own emitter and compiler
    // invocation; its only initialization is the optional bridge setter.
    let lib = unsafe { libloading::Library::new(so_path) }
        .map_err(|e| JitError::Load {
            message: format!("{}: {e}", so_path.display()),
        })?;

    let func: RawKernelFn = unsafe {
        *lib.get::<RawKernelFn>(b"kernel\0").map_err(|e| JitError::Load {
            message: format!("symbol 'kernel': {e}"),
        })?
    };

    if install_bridge {
        let set: SetBridgeFn = unsafe {
            *lib.get::<SetBridgeFn>(b"kernel_set_bridge\0")
                .map_err(|e| JitError::Load {
                    message: format!("symbol 'kernel_set_bridge': {e}"),
                })?
        };
        unsafe { set(crate::bridge::bridge_ptr()) };
    }

    Ok(LoadedKernel {
        func,
        _lib: lib,
        scratch: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_a_missing_object_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let so = dir.path().join("nonexistent.so");
        let err = load(&so, false).unwrap_err();
        assert!(matches!(err, JitError::Load { .. }));
    }
}
