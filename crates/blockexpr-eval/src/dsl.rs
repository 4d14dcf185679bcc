//! Statement execution for multi-statement kernels.
//!
//! The statement walker runs once per block. Element-wise `if`/`else`
//! bodies execute unconditionally into their own SSA slots; the phi
//! entries recorded by the analyzer are then blended under the condition
//! mask. Scalar (reduced) conditions are evaluated once per block and
//! drive real control flow: a scalar `if` executes only the taken arm,
//! and a scalar `break` ends the loop for the whole block.
//!
//! `print` emits exactly one line per evaluate call, on the first block;
//! reduction operands print that block's reduced value. A `print`
//! skipped because a scalar `break` fired earlier never emits, so output
//! reflects state at break time.

use blockexpr_core::{ArrayMut, EvalError, NodeId, NodeKind, Plan};

use crate::block::{Exec, ReduceLookup};
use crate::buffer::{Buffer, Scalar};
use crate::kernels::scalar;

/// Statement-level control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cf {
    Normal,
    Break,
    Continue,
}

/// The expression of the kernel's single trailing `return`.
pub(crate) fn return_expr(plan: &Plan) -> NodeId {
    let body = plan.arena.get(plan.root).children[0];
    let ret = *plan
        .arena
        .get(body)
        .children
        .last()
        .expect("kernel body validated non-empty");
    plan.arena.get(ret).children[0]
}

/// Runs a kernel plan over `n` elements.
pub(crate) fn run(
    exec: &mut Exec<'_, '_>,
    out: &mut ArrayMut<'_>,
    n: usize,
) -> Result<(), EvalError> {
    let plan = exec.plan;
    let body = plan.arena.get(plan.root).children[0];
    let ret = return_expr(plan);
    let scalar_ret = plan.arena.contains_reduce(ret);
    if scalar_ret {
        exec.seed_accumulators(ret);
    }

    let block = plan.block_size.max(1);
    let mut off = 0;
    while off < n {
        let len = block.min(n - off);
        exec.set_block(off, len);
        let cf = exec_stmt(exec, body, out, scalar_ret)?;
        debug_assert_eq!(cf, Cf::Normal, "break/continue escaped the kernel body");
        off += len;
    }

    if scalar_ret {
        let s = exec.eval_scalar(ret, ReduceLookup::Accumulated)?;
        let mut one = exec.pool.take(plan.out_dtype, 1);
        scalar::fill(&mut one, s);
        one.store(out, 0);
        exec.pool.give(one);
    }
    Ok(())
}

fn exec_stmt(
    exec: &mut Exec<'_, '_>,
    id: NodeId,
    out: &mut ArrayMut<'_>,
    scalar_ret: bool,
) -> Result<Cf, EvalError> {
    let plan = exec.plan;
    let node = plan.arena.get(id);
    let children: &[NodeId] = &node.children;

    match &node.kind {
        NodeKind::Block => {
            for &c in children {
                let cf = exec_stmt(exec, c, out, scalar_ret)?;
                if cf != Cf::Normal {
                    return Ok(cf);
                }
            }
            Ok(Cf::Normal)
        }

        NodeKind::Assign { slot, .. } => {
            let buf = exec.eval_vector(children[0])?;
            let dt = plan.slots[*slot as usize].dtype;
            let buf = exec.coerce(buf, dt);
            let old = std::mem::replace(&mut exec.locals[*slot as usize], buf);
            exec.pool.give(old);
            Ok(Cf::Normal)
        }

        NodeKind::Return => {
            if scalar_ret {
                let ids: Vec<NodeId> = exec.accs.iter().map(|(nid, _)| *nid).collect();
                for nid in ids {
                    exec.accumulate(nid)?;
                }
            } else {
                let buf = exec.eval_vector(children[0])?;
                let buf = exec.coerce(buf, plan.out_dtype);
                buf.store(out, exec.off);
                exec.pool.give(buf);
            }
            Ok(Cf::Normal)
        }

        NodeKind::If { scalar, phis } => {
            if *scalar {
                let take = exec.eval_scalar(children[0], ReduceLookup::WithinBlock)?.as_bool();
                let mut cf = Cf::Normal;
                if take {
                    cf = exec_stmt(exec, children[1], out, scalar_ret)?;
                    for phi in phis {
                        copy_slot(exec, phi.then_slot, phi.phi_slot);
                    }
                } else {
                    if let Some(&else_block) = children.get(2) {
                        cf = exec_stmt(exec, else_block, out, scalar_ret)?;
                    }
                    for phi in phis {
                        copy_slot(exec, phi.else_slot, phi.phi_slot);
                    }
                }
                Ok(cf)
            } else {
                let mask_buf = exec.eval_vector(children[0])?;
                let cf_then = exec_stmt(exec, children[1], out, scalar_ret)?;
                let cf_else = match children.get(2) {
                    Some(&else_block) => exec_stmt(exec, else_block, out, scalar_ret)?,
                    None => Cf::Normal,
                };
                let Buffer::Bool(mask) = &mask_buf else {
                    unreachable!("if condition is bool")
                };
                for phi in phis {
                    let dt = plan.slots[phi.phi_slot as usize].dtype;
                    let t = slot_as_dtype(exec, phi.then_slot, dt);
                    let f = slot_as_dtype(exec, phi.else_slot, dt);
                    let mut blended = exec.pool.take(dt, exec.len);
                    scalar::blend(mask, &t, &f, &mut blended);
                    let old =
                        std::mem::replace(&mut exec.locals[phi.phi_slot as usize], blended);
                    exec.pool.give(old);
                    exec.pool.give(t);
                    exec.pool.give(f);
                }
                let mask_owner = mask_buf;
                exec.pool.give(mask_owner);
                Ok(if cf_then != Cf::Normal { cf_then } else { cf_else })
            }
        }

        NodeKind::For {
            var_slot, carried, ..
        } => {
            let count = exec
                .eval_scalar(children[0], ReduceLookup::WithinBlock)?
                .as_i64();
            for c in carried {
                copy_slot(exec, c.init_slot, c.phi_slot);
            }
            for i in 0..count.max(0) {
                // Broadcast induction variable.
                let lanes = exec.len;
                let b = &mut exec.locals[*var_slot as usize];
                b.resize(lanes);
                scalar::fill(b, Scalar::Int(i));

                // Seed the body chain so an iteration that skips an
                // assignment carries the previous value through.
                for c in carried {
                    copy_slot(exec, c.phi_slot, c.body_slot);
                }
                let cf = exec_stmt(exec, children[1], out, scalar_ret)?;
                for c in carried {
                    copy_slot(exec, c.body_slot, c.phi_slot);
                }
                if cf == Cf::Break {
                    break;
                }
            }
            Ok(Cf::Normal)
        }

        NodeKind::Break => {
            if let Some(&cond) = children.first() {
                let fire = exec.eval_scalar(cond, ReduceLookup::WithinBlock)?.as_bool();
                if !fire {
                    return Ok(Cf::Normal);
                }
            }
            Ok(Cf::Break)
        }

        NodeKind::Continue => Ok(Cf::Continue),

        NodeKind::Print { format } => {
            if exec.off == 0 && !exec.printed {
                print_line(exec, format.as_deref(), children)?;
                exec.printed = true;
            }
            Ok(Cf::Normal)
        }

        other => Err(EvalError::invalid_arg(format!(
            "internal: {other:?} in statement position"
        ))),
    }
}

/// Copies one slot's value into another, casting if the dtypes differ.
fn copy_slot(exec: &mut Exec<'_, '_>, from: u32, to: u32) {
    if from == to {
        return;
    }
    let len = exec.locals[from as usize].len();
    let to_dt = exec.plan.slots[to as usize].dtype;
    let mut tmp = exec.pool.take(to_dt, len);
    if exec.locals[from as usize].dtype() == to_dt {
        tmp.copy_prefix_from(&exec.locals[from as usize], len);
    } else {
        scalar::cast(&exec.locals[from as usize], &mut tmp);
    }
    let old = std::mem::replace(&mut exec.locals[to as usize], tmp);
    exec.pool.give(old);
}

/// A pool copy of a slot, cast to `dt`, at least `exec.len` lanes long.
fn slot_as_dtype(exec: &mut Exec<'_, '_>, slot: u32, dt: blockexpr_core::DType) -> Buffer {
    let src_dt = exec.locals[slot as usize].dtype();
    let src_len = exec.locals[slot as usize].len();
    let mut tmp = exec.pool.take(dt, src_len);
    if src_dt == dt {
        tmp.copy_prefix_from(&exec.locals[slot as usize], src_len);
    } else {
        scalar::cast(&exec.locals[slot as usize], &mut tmp);
    }
    tmp
}

fn print_line(
    exec: &mut Exec<'_, '_>,
    format: Option<&str>,
    args: &[NodeId],
) -> Result<(), EvalError> {
    let mut rendered = Vec::with_capacity(args.len());
    for &a in args {
        let text = if exec.plan.arena.is_scalar_expr(a) {
            format_scalar(exec.eval_scalar(a, ReduceLookup::WithinBlock)?)
        } else {
            let buf = exec.eval_vector(a)?;
            let text = format_first(&buf);
            exec.pool.give(buf);
            text
        };
        rendered.push(text);
    }

    let line = match format {
        Some(fmt) => {
            let mut line = String::with_capacity(fmt.len());
            let mut rest = fmt;
            let mut args = rendered.iter();
            while let Some(pos) = rest.find("{}") {
                line.push_str(&rest[..pos]);
                line.push_str(args.next().map(String::as_str).unwrap_or(""));
                rest = &rest[pos + 2..];
            }
            line.push_str(rest);
            line
        }
        None => rendered.join(" "),
    };
    println!("{line}");
    Ok(())
}

fn format_scalar(s: Scalar) -> String {
    match s {
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(v) => v.to_string(),
        Scalar::UInt(v) => v.to_string(),
        Scalar::Float(v) => v.to_string(),
        Scalar::Complex(c) => format!("({}+{}j)", c.re, c.im),
    }
}

fn format_first(buf: &Buffer) -> String {
    match buf {
        Buffer::Bool(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::I8(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::I16(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::I32(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::I64(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::U8(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::U16(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::U32(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::U64(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::F32(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::F64(v) => v.first().map(|x| x.to_string()).unwrap_or_default(),
        Buffer::C64(v) => v
            .first()
            .map(|x| format!("({}+{}j)", x.re, x.im))
            .unwrap_or_default(),
        Buffer::C128(v) => v
            .first()
            .map(|x| format!("({}+{}j)", x.re, x.im))
            .unwrap_or_default(),
        Buffer::Str { bytes, itemsize } => {
            if *itemsize == 0 || bytes.len() < *itemsize {
                String::new()
            } else {
                String::from_utf8_lossy(&bytes[..*itemsize]).into_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::evaluate;
    use blockexpr_check::{analyze, AnalyzeOptions};
    use blockexpr_core::{ArrayRef, DType, EvalParams, VarDesc};
    use blockexpr_syntax::parse_script;

    fn compile_kernel(src: &str, vars: &[VarDesc], out: Option<DType>, block: usize) -> Plan {
        let (arena, root, _) = parse_script(src).unwrap();
        let opts = AnalyzeOptions {
            block_size: block,
            nd: None,
        };
        analyze(arena, root, vars, out, opts).unwrap()
    }

    #[test]
    fn straight_line_kernel() {
        let src = "def kernel(x):\n    y = x * 2\n    z = y + 1\n    return z\n";
        let plan = compile_kernel(src, &[VarDesc::array("x", DType::F64)], None, 4096);
        let x = [1.0f64, 2.0, 3.0];
        let mut out = [0f64; 3];
        evaluate(
            &plan,
            &[ArrayRef::F64(&x)],
            &mut ArrayMut::F64(&mut out),
            3,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [3.0, 5.0, 7.0]);
    }

    #[test]
    fn masked_if_blends_per_element() {
        let src = "def kernel(x):\n    y = x\n    if x > 0.0:\n        y = x * 10\n    else:\n        y = x - 100\n    return y\n";
        let plan = compile_kernel(src, &[VarDesc::array("x", DType::F64)], None, 4096);
        let x = [1.0f64, -1.0, 2.0, -2.0];
        let mut out = [0f64; 4];
        evaluate(
            &plan,
            &[ArrayRef::F64(&x)],
            &mut ArrayMut::F64(&mut out),
            4,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [10.0, -101.0, 20.0, -102.0]);
    }

    #[test]
    fn masked_if_without_else_keeps_old_value() {
        let src = "def kernel(x):\n    y = x\n    if x > 0.0:\n        y = x * 10\n    return y\n";
        let plan = compile_kernel(src, &[VarDesc::array("x", DType::F64)], None, 4096);
        let x = [1.0f64, -3.0];
        let mut out = [0f64; 2];
        evaluate(
            &plan,
            &[ArrayRef::F64(&x)],
            &mut ArrayMut::F64(&mut out),
            2,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [10.0, -3.0]);
    }

    #[test]
    fn for_loop_accumulates() {
        let src = "def kernel(x):\n    acc = x * 0\n    for i in range(5):\n        acc = acc + x\n    return acc\n";
        let plan = compile_kernel(src, &[VarDesc::array("x", DType::F64)], None, 4096);
        let x = [1.0f64, 2.0];
        let mut out = [0f64; 2];
        evaluate(
            &plan,
            &[ArrayRef::F64(&x)],
            &mut ArrayMut::F64(&mut out),
            2,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [5.0, 10.0]);
    }

    #[test]
    fn induction_variable_broadcasts() {
        let src = "def kernel(x):\n    acc = x * 0\n    for i in range(4):\n        acc = acc + i\n    return acc\n";
        let plan = compile_kernel(src, &[VarDesc::array("x", DType::I32)], None, 4096);
        let x = [0i32, 0, 0];
        let mut out = [0i32; 3];
        evaluate(
            &plan,
            &[ArrayRef::I32(&x)],
            &mut ArrayMut::I32(&mut out),
            3,
            &EvalParams::default(),
        )
        .unwrap();
        // 0 + 1 + 2 + 3
        assert_eq!(out, [6, 6, 6]);
    }

    #[test]
    fn scalar_break_stops_the_block_loop() {
        let src = "def kernel(x):\n    acc = x * 0\n    for i in range(100):\n        acc = acc + 1\n        break if all(acc >= 3)\n    return acc\n";
        let plan = compile_kernel(src, &[VarDesc::array("x", DType::I32)], None, 4096);
        let x = [0i32, 0];
        let mut out = [0i32; 2];
        evaluate(
            &plan,
            &[ArrayRef::I32(&x)],
            &mut ArrayMut::I32(&mut out),
            2,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out, [3, 3]);
    }

    #[test]
    fn kernel_matches_across_block_sizes() {
        let src = "def kernel(x):\n    z = x * 0.0\n    for i in range(8):\n        z = z * 0.5 + x\n    return z\n";
        let vars = [VarDesc::array("x", DType::F64)];
        let big = compile_kernel(src, &vars, None, 4096);
        let small = compile_kernel(src, &vars, None, 3);
        let x: Vec<f64> = (0..50).map(|i| i as f64 * 0.1).collect();
        let mut out1 = vec![0f64; 50];
        let mut out2 = vec![0f64; 50];
        evaluate(
            &big,
            &[ArrayRef::F64(&x)],
            &mut ArrayMut::F64(&mut out1),
            50,
            &EvalParams::default(),
        )
        .unwrap();
        evaluate(
            &small,
            &[ArrayRef::F64(&x)],
            &mut ArrayMut::F64(&mut out2),
            50,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out1, out2);
    }

    #[test]
    fn scalar_return_reduces_across_blocks() {
        let src = "def kernel(x):\n    y = x * 2\n    return sum(y > 5)\n";
        let plan = compile_kernel(src, &[VarDesc::array("x", DType::I32)], None, 4);
        let x: Vec<i32> = (0..10).collect(); // 2x > 5 for x >= 3: 7 values
        let mut out = [0i64; 1];
        evaluate(
            &plan,
            &[ArrayRef::I32(&x)],
            &mut ArrayMut::I64(&mut out),
            10,
            &EvalParams::default(),
        )
        .unwrap();
        assert_eq!(out[0], 7);
    }

    #[test]
    fn mandelbrot_escape_counts() {
        let src = "\
def kernel(cr, ci):
    zr = cr * 0.0
    zi = cr * 0.0
    count = cr * 0
    for i in range(100):
        zr2 = zr * zr - zi * zi + cr
        zi = 2.0 * zr * zi + ci
        zr = zr2
        still_in = zr * zr + zi * zi <= 4.0
        count = count + where(still_in, 1, 0)
        break if all(zr * zr + zi * zi > 4.0)
    return count
";
        let plan = compile_kernel(
            src,
            &[
                VarDesc::array("cr", DType::F64),
                VarDesc::array("ci", DType::F64),
            ],
            // count carries float64 inside the loop; the declared output
            // casts the escape counts to int32 at the root.
            Some(DType::I32),
            4096,
        );
        let cr = [-0.5f64, 1.0];
        let ci = [0.0f64, 0.0];
        let mut out = [0i32; 2];
        evaluate(
            &plan,
            &[ArrayRef::F64(&cr), ArrayRef::F64(&ci)],
            &mut ArrayMut::I32(&mut out),
            2,
            &EvalParams::default(),
        )
        .unwrap();
        // c = -0.5 stays bounded: the full 100 iterations count.
        assert_eq!(out[0], 100);
        // c = 1.0 escapes almost immediately.
        assert!(out[1] <= 3, "escaped at {}", out[1]);
    }
}
