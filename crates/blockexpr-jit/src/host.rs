//! Host-registered kernel loading.
//!
//! A host without native code loading (no dlopen, no compiler) may supply
//! a [`KernelHost`]: the backend then lowers the plan to a small portable
//! postfix bytecode image and hands it to the host's `instantiate`
//! callback, which returns a callable with the same contract as a native
//! kernel. Freeing happens through the returned box's `Drop`.
//!
//! # Image format
//!
//! Little-endian, stack-machine, one value stack slot per element lane:
//!
//! ```text
//! magic "BXK1" | out dtype u8 | array-var count u8 | ops...
//! op 0x01 VAR      payload: array position u8, dtype u8
//! op 0x02 LIT      payload: dtype u8, value 8 bytes (i64 or f64 bits)
//! op 0x03 CAST     payload: from u8, to u8
//! op 0x04 BINARY   payload: operator u8, operand dtype u8
//! op 0x05 COMPARE  payload: comparison u8, operand dtype u8
//! op 0x06 UNARY    payload: operator u8, operand dtype u8
//! op 0x07 BUILTIN  payload: builtin u8, arity u8, operand dtype u8
//! op 0x08 WHERE    payload: value dtype u8
//! ```
//!
//! Every operand is explicitly CAST to its operator's promoted dtype
//! before the operator op, so the host VM never needs the promotion
//! rules. Only single-expression (non-script) plans lower to bytecode.

use std::ffi::c_void;
use std::sync::Arc;

use blockexpr_core::{
    BinaryOp, Builtin, CallTarget, CmpOp, DType, EngineConfig, Literal, NodeId, NodeKind, Plan,
    UnaryOp,
};

use crate::{JitError, JitKernel, KernelBackend};

/// Host callbacks replacing dlopen.
pub trait KernelHost: Send + Sync {
    /// Instantiates a portable kernel image.
    fn instantiate(&self, image: &[u8]) -> Result<Box<dyn HostKernel>, String>;
}

/// A host-instantiated kernel; same calling contract as a native one.
pub trait HostKernel: Send + Sync {
    /// # Safety
    ///
    /// Same requirements as the native kernel entry: valid base pointers
    /// covering `nitems` elements each.
    unsafe fn call(&self, vars: &[*const c_void], out: *mut c_void, nitems: i64);
}

/// Backend that lowers to bytecode and loads through a [`KernelHost`].
pub struct HostBackend {
    pub host: Arc<dyn KernelHost>,
}

impl KernelBackend for HostBackend {
    fn compile(&self, plan: &Plan, _config: &EngineConfig) -> Result<JitKernel, JitError> {
        let image = emit_bytecode(plan)?;
        let kernel = self
            .host
            .instantiate(&image)
            .map_err(|message| JitError::Host { message })?;
        Ok(JitKernel::Host(kernel))
    }
}

fn dtype_code(dt: DType) -> u8 {
    match dt {
        DType::Bool => 0,
        DType::I8 => 1,
        DType::I16 => 2,
        DType::I32 => 3,
        DType::I64 => 4,
        DType::U8 => 5,
        DType::U16 => 6,
        DType::U32 => 7,
        DType::U64 => 8,
        DType::F32 => 9,
        DType::F64 => 10,
        DType::C64 | DType::C128 | DType::Str => unreachable!("unemittable dtype {dt}"),
    }
}

fn binary_code(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => 0,
        BinaryOp::Sub => 1,
        BinaryOp::Mul => 2,
        BinaryOp::Div => 3,
        BinaryOp::Mod => 4,
        BinaryOp::Pow => 5,
        BinaryOp::BitAnd => 6,
        BinaryOp::BitOr => 7,
        BinaryOp::BitXor => 8,
        BinaryOp::Shl => 9,
        BinaryOp::Shr => 10,
        BinaryOp::And => 11,
        BinaryOp::Or => 12,
    }
}

fn cmp_code(op: CmpOp) -> u8 {
    match op {
        CmpOp::Lt => 0,
        CmpOp::Le => 1,
        CmpOp::Eq => 2,
        CmpOp::Ne => 3,
        CmpOp::Ge => 4,
        CmpOp::Gt => 5,
    }
}

fn unary_code(op: UnaryOp) -> u8 {
    match op {
        UnaryOp::Neg => 0,
        UnaryOp::BitNot => 1,
        UnaryOp::Not => 2,
    }
}

/// Lowers a single-expression plan to the portable image.
pub fn emit_bytecode(plan: &Plan) -> Result<Vec<u8>, JitError> {
    if plan.script {
        return Err(JitError::Unsupported {
            reason: "statement kernels have no bytecode lowering".to_string(),
        });
    }
    crate::emit::check_supported(plan, plan.root)?;

    let mut image = Vec::with_capacity(64);
    image.extend_from_slice(b"BXK1");
    image.push(dtype_code(plan.out_dtype));
    image.push(plan.array_var_count() as u8);

    let mut array_pos = vec![0u8; plan.vars.len()];
    let mut next = 0u8;
    for (ordinal, desc) in plan.vars.iter().enumerate() {
        if desc.kind.is_array() {
            array_pos[ordinal] = next;
            next += 1;
        }
    }

    emit_node(plan, plan.root, &array_pos, &mut image)?;

    // The root value is cast to the output dtype by the final CAST.
    let root_dt = plan.arena.dtype_of(plan.root);
    if root_dt != plan.out_dtype {
        image.push(0x03);
        image.push(dtype_code(root_dt));
        image.push(dtype_code(plan.out_dtype));
    }
    Ok(image)
}

fn emit_cast(from: DType, to: DType, image: &mut Vec<u8>) {
    if from != to {
        image.push(0x03);
        image.push(dtype_code(from));
        image.push(dtype_code(to));
    }
}

fn emit_node(
    plan: &Plan,
    id: NodeId,
    array_pos: &[u8],
    image: &mut Vec<u8>,
) -> Result<(), JitError> {
    let node = plan.arena.get(id);
    let dt = plan.arena.dtype_of(id);
    let children: &[NodeId] = &node.children;

    match &node.kind {
        NodeKind::Literal(lit) => {
            image.push(0x02);
            image.push(dtype_code(dt));
            let bits: [u8; 8] = match lit {
                Literal::Bool(b) => (*b as i64).to_le_bytes(),
                Literal::Int(v) => v.to_le_bytes(),
                Literal::Float(f) => f.to_bits().to_le_bytes(),
                _ => unreachable!("rejected by check_supported"),
            };
            image.extend_from_slice(&bits);
        }

        NodeKind::Var { ordinal } => {
            image.push(0x01);
            image.push(array_pos[*ordinal as usize]);
            image.push(dtype_code(dt));
        }

        NodeKind::Unary(op) => {
            emit_node(plan, children[0], array_pos, image)?;
            image.push(0x06);
            image.push(unary_code(*op));
            image.push(dtype_code(dt));
        }

        NodeKind::Binary(op) => {
            let pd = promoted(plan, children);
            for &c in children {
                emit_node(plan, c, array_pos, image)?;
                emit_cast(plan.arena.dtype_of(c), pd, image);
            }
            image.push(0x04);
            image.push(binary_code(*op));
            image.push(dtype_code(pd));
        }

        NodeKind::Compare(op) => {
            let pd = promoted(plan, children);
            for &c in children {
                emit_node(plan, c, array_pos, image)?;
                emit_cast(plan.arena.dtype_of(c), pd, image);
            }
            image.push(0x05);
            image.push(cmp_code(*op));
            image.push(dtype_code(pd));
        }

        NodeKind::Call(CallTarget::Builtin(b)) => {
            let pd = promoted(plan, children);
            let input_dt = if dt.is_float() && pd.is_integer() { dt } else { pd };
            for &c in children {
                emit_node(plan, c, array_pos, image)?;
                emit_cast(plan.arena.dtype_of(c), input_dt, image);
            }
            image.push(0x07);
            image.push(builtin_code(*b));
            image.push(children.len() as u8);
            image.push(dtype_code(input_dt));
        }

        NodeKind::Where => {
            emit_node(plan, children[0], array_pos, image)?;
            for &c in &children[1..] {
                emit_node(plan, c, array_pos, image)?;
                emit_cast(plan.arena.dtype_of(c), dt, image);
            }
            image.push(0x08);
            image.push(dtype_code(dt));
        }

        other => {
            return Err(JitError::Unsupported {
                reason: format!("{other:?} has no bytecode lowering"),
            })
        }
    }
    Ok(())
}

fn promoted(plan: &Plan, children: &[NodeId]) -> DType {
    let mut pd = plan.arena.dtype_of(children[0]);
    for &c in &children[1..] {
        pd = DType::promote(pd, plan.arena.dtype_of(c)).expect("validated at analysis");
    }
    pd
}

fn builtin_code(b: Builtin) -> u8 {
    Builtin::ALL
        .iter()
        .position(|x| *x == b)
        .expect("builtin in ALL") as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockexpr_check::{analyze, AnalyzeOptions};
    use blockexpr_core::VarDesc;
    use blockexpr_syntax::parse_expression;

    fn plan(src: &str) -> Plan {
        let (arena, root) = parse_expression(src).unwrap();
        analyze(
            arena,
            root,
            &[
                VarDesc::array("a", DType::I32),
                VarDesc::array("b", DType::F64),
            ],
            None,
            AnalyzeOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn image_has_magic_and_header() {
        let image = emit_bytecode(&plan("a + b")).unwrap();
        assert_eq!(&image[..4], b"BXK1");
        assert_eq!(image[4], dtype_code(DType::F64));
        assert_eq!(image[5], 2);
    }

    #[test]
    fn operands_are_cast_before_the_operator() {
        let image = emit_bytecode(&plan("a + b")).unwrap();
        // VAR a, CAST i32->f64, VAR b, BINARY add.
        let body = &image[6..];
        assert_eq!(body[0], 0x01, "var op first");
        let cast_pos = body.iter().position(|&b| b == 0x03).unwrap();
        let add_pos = body.iter().rposition(|&b| b == 0x04).unwrap();
        assert!(cast_pos < add_pos, "cast precedes the operator");
    }

    #[test]
    fn reductions_have_no_bytecode_lowering() {
        let p = plan("sum(a)");
        assert!(matches!(
            emit_bytecode(&p).unwrap_err(),
            JitError::Unsupported { .. }
        ));
    }

    struct CountingHost;
    struct NoopKernel;

    impl HostKernel for NoopKernel {
        unsafe fn call(&self, _vars: &[*const c_void], _out: *mut c_void, _n: i64) {}
    }

    impl KernelHost for CountingHost {
        fn instantiate(&self, image: &[u8]) -> Result<Box<dyn HostKernel>, String> {
            if &image[..4] != b"BXK1" {
                return Err("bad magic".to_string());
            }
            Ok(Box::new(NoopKernel))
        }
    }

    #[test]
    fn host_backend_round_trips_through_instantiate() {
        let backend = HostBackend {
            host: Arc::new(CountingHost),
        };
        let kernel = backend
            .compile(&plan("a * 2"), &EngineConfig::default())
            .unwrap();
        assert!(matches!(kernel, JitKernel::Host(_)));
    }
}
