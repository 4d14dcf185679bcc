//! The kernel registry.
//!
//! Operator kernels are looked up by integer discriminant in a table that
//! is populated exactly once per process (acquire/release through
//! `OnceLock`); the per-dtype dispatch inside each kernel compiles to a
//! jump table, so a lookup plus a call is O(1). Builtins carry extra
//! per-call state (SIMD policy, ULP mode) and dispatch through
//! [`crate::kernels::scalar::builtin1`]/[`builtin2`] directly.

use std::sync::OnceLock;

use blockexpr_core::{BinaryOp, CmpOp, UnaryOp};

use crate::buffer::Buffer;
use crate::kernels::scalar;

pub type BinaryKernel = fn(&Buffer, &Buffer, &mut Buffer);
pub type CompareKernel = fn(&Buffer, &Buffer, &mut Buffer);
pub type UnaryKernel = fn(&Buffer, &mut Buffer);

pub struct KernelRegistry {
    binary: [BinaryKernel; 13],
    compare: [CompareKernel; 6],
    unary: [UnaryKernel; 3],
}

fn binary_index(op: BinaryOp) -> usize {
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

fn compare_index(op: CmpOp) -> usize {
    match op {
        CmpOp::Lt => 0,
        CmpOp::Le => 1,
        CmpOp::Eq => 2,
        CmpOp::Ne => 3,
        CmpOp::Ge => 4,
        CmpOp::Gt => 5,
    }
}

fn unary_index(op: UnaryOp) -> usize {
    match op {
        UnaryOp::Neg => 0,
        UnaryOp::BitNot => 1,
        UnaryOp::Not => 2,
    }
}

macro_rules! bin_entry {
    ($name:ident, $op:expr) => {
        fn $name(a: &Buffer, b: &Buffer, out: &mut Buffer) {
            scalar::binary($op, a, b, out)
        }
    };
}

macro_rules! cmp_entry {
    ($name:ident, $op:expr) => {
        fn $name(a: &Buffer, b: &Buffer, out: &mut Buffer) {
            scalar::compare($op, a, b, out)
        }
    };
}

macro_rules! un_entry {
    ($name:ident, $op:expr) => {
        fn $name(a: &Buffer, out: &mut Buffer) {
            scalar::unary($op, a, out)
        }
    };
}

bin_entry!(k_add, BinaryOp::Add);
bin_entry!(k_sub, BinaryOp::Sub);
bin_entry!(k_mul, BinaryOp::Mul);
bin_entry!(k_div, BinaryOp::Div);
bin_entry!(k_mod, BinaryOp::Mod);
bin_entry!(k_pow, BinaryOp::Pow);
bin_entry!(k_bitand, BinaryOp::BitAnd);
bin_entry!(k_bitor, BinaryOp::BitOr);
bin_entry!(k_bitxor, BinaryOp::BitXor);
bin_entry!(k_shl, BinaryOp::Shl);
bin_entry!(k_shr, BinaryOp::Shr);
bin_entry!(k_and, BinaryOp::And);
bin_entry!(k_or, BinaryOp::Or);

cmp_entry!(k_lt, CmpOp::Lt);
cmp_entry!(k_le, CmpOp::Le);
cmp_entry!(k_eq, CmpOp::Eq);
cmp_entry!(k_ne, CmpOp::Ne);
cmp_entry!(k_ge, CmpOp::Ge);
cmp_entry!(k_gt, CmpOp::Gt);

un_entry!(k_neg, UnaryOp::Neg);
un_entry!(k_bitnot, UnaryOp::BitNot);
un_entry!(k_not, UnaryOp::Not);

impl KernelRegistry {
    /// The process-wide registry, populated on first use.
    pub fn get() -> &'static KernelRegistry {
        static REGISTRY: OnceLock<KernelRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| KernelRegistry {
            binary: [
                k_add, k_sub, k_mul, k_div, k_mod, k_pow, k_bitand, k_bitor, k_bitxor, k_shl,
                k_shr, k_and, k_or,
            ],
            compare: [k_lt, k_le, k_eq, k_ne, k_ge, k_gt],
            unary: [k_neg, k_bitnot, k_not],
        })
    }

    pub fn binary(&self, op: BinaryOp) -> BinaryKernel {
        self.binary[binary_index(op)]
    }

    pub fn compare(&self, op: CmpOp) -> CompareKernel {
        self.compare[compare_index(op)]
    }

    pub fn unary(&self, op: UnaryOp) -> UnaryKernel {
        self.unary[unary_index(op)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockexpr_core::DType;

    #[test]
    fn registry_dispatches_by_discriminant() {
        let reg = KernelRegistry::get();
        let a = Buffer::I64(vec![6, 7]);
        let b = Buffer::I64(vec![2, 3]);
        let mut o = Buffer::zeroed(DType::I64, 2);
        reg.binary(BinaryOp::Mul)(&a, &b, &mut o);
        assert_eq!(o, Buffer::I64(vec![12, 21]));

        let mut m = Buffer::zeroed(DType::Bool, 2);
        reg.compare(CmpOp::Gt)(&a, &b, &mut m);
        assert_eq!(m, Buffer::Bool(vec![true, true]));

        let mut n = Buffer::zeroed(DType::I64, 2);
        reg.unary(UnaryOp::Neg)(&a, &mut n);
        assert_eq!(n, Buffer::I64(vec![-6, -7]));
    }

    #[test]
    fn registry_is_a_single_instance() {
        let a = KernelRegistry::get() as *const _;
        let b = KernelRegistry::get() as *const _;
        assert_eq!(a, b);
    }
}
