//! Constant folding.
//!
//! Pure integer and floating arithmetic with fully constant operands is
//! evaluated and uses of the result are redirected to a fresh constant of
//! identical type. Division and remainder by zero are never folded; the
//! instruction stays as written.

use crate::context::Context;
use crate::ir::entities::{Func, Type};
use crate::ir::instructions::{InstructionData, Opcode};
use crate::ir::module::Module;

pub(crate) fn run(ctx: &Context, module: &mut Module, func: Func) -> bool {
    let mut changed = false;
    let blocks = module.func(func).blocks.clone();
    for block in blocks {
        let insts = module.block(block).insts.clone();
        for inst in insts {
            let result = match module.inst_result(inst) {
                Some(r) => r,
                None => continue,
            };
            let ty = module.value_type(result);
            let folded = match module.inst(inst).clone() {
                InstructionData::Binary { opcode, args } => {
                    fold_binary(ctx, module, opcode, ty, args[0], args[1])
                }
                InstructionData::Unary { opcode, arg } => fold_unary(ctx, module, opcode, arg),
                InstructionData::IntCompare { cond, args } => {
                    match (module.as_const_int(args[0]), module.as_const_int(args[1])) {
                        (Some(x), Some(y)) => {
                            let bits = ctx.types().int_bits(module.value_type(args[0])).unwrap_or(64);
                            let x = normalize(x, bits, cond.is_unsigned());
                            let y = normalize(y, bits, cond.is_unsigned());
                            Some(Folded::Int(cond.evaluate(x, y) as i64))
                        }
                        _ => None,
                    }
                }
                InstructionData::FloatCompare { cond, args } => {
                    match (module.as_const_float(args[0]), module.as_const_float(args[1])) {
                        (Some(x), Some(y)) => Some(Folded::Int(cond.evaluate(x, y) as i64)),
                        _ => None,
                    }
                }
                _ => continue,
            };
            if let Some(folded) = folded {
                let constant = match folded {
                    Folded::Int(v) => {
                        let v = truncate(ctx, v, ty);
                        module.const_int(ty, v)
                    }
                    Folded::Float(v) => {
                        let v = if ty == crate::ir::types::F32 {
                            f64::from(v as f32)
                        } else {
                            v
                        };
                        module.const_float(ty, v)
                    }
                };
                module.replace_uses(func, result, constant);
                module.remove_inst(block, inst);
                changed = true;
            }
        }
    }
    changed
}

enum Folded {
    Int(i64),
    Float(f64),
}

/// Sign- or zero-extend a constant from its declared width so comparisons
/// see the value the hardware would.
fn normalize(v: i64, bits: u8, unsigned: bool) -> i64 {
    if bits >= 64 {
        return v;
    }
    let mask = (1u64 << bits) - 1;
    let uv = (v as u64) & mask;
    if unsigned {
        uv as i64
    } else {
        let sign = 1u64 << (bits - 1);
        ((uv ^ sign).wrapping_sub(sign)) as i64
    }
}

/// Wrap a folded result to the width of `ty`.
fn truncate(ctx: &Context, v: i64, ty: Type) -> i64 {
    match ctx.types().int_bits(ty) {
        Some(bits) if bits < 64 => {
            let mask = (1u64 << bits) - 1;
            let uv = (v as u64) & mask;
            if ctx.types().is_signed(ty) {
                let sign = 1u64 << (bits - 1);
                ((uv ^ sign).wrapping_sub(sign)) as i64
            } else {
                uv as i64
            }
        }
        _ => v,
    }
}

fn fold_binary(
    ctx: &Context,
    module: &Module,
    opcode: Opcode,
    ty: Type,
    a: crate::ir::entities::Value,
    b: crate::ir::entities::Value,
) -> Option<Folded> {
    if let (Some(x), Some(y)) = (module.as_const_int(a), module.as_const_int(b)) {
        let bits = ctx.types().int_bits(ty).unwrap_or(64);
        let shift_mask = i64::from(bits.max(1) - 1);
        let v = match opcode {
            Opcode::Iadd => x.wrapping_add(y),
            Opcode::Isub => x.wrapping_sub(y),
            Opcode::Imul => x.wrapping_mul(y),
            Opcode::Sdiv => {
                if y == 0 {
                    return None;
                }
                x.wrapping_div(y)
            }
            Opcode::Udiv => {
                if y == 0 {
                    return None;
                }
                let (ux, uy) = (normalize(x, bits, true) as u64, normalize(y, bits, true) as u64);
                (ux / uy) as i64
            }
            Opcode::Srem => {
                if y == 0 {
                    return None;
                }
                x.wrapping_rem(y)
            }
            Opcode::Urem => {
                if y == 0 {
                    return None;
                }
                let (ux, uy) = (normalize(x, bits, true) as u64, normalize(y, bits, true) as u64);
                (ux % uy) as i64
            }
            Opcode::Band => x & y,
            Opcode::Bor => x | y,
            Opcode::Bxor => x ^ y,
            Opcode::Ishl => x.wrapping_shl((y & shift_mask) as u32),
            Opcode::Ushr => {
                let ux = normalize(x, bits, true) as u64;
                (ux >> ((y & shift_mask) as u32)) as i64
            }
            Opcode::Sshr => {
                let sx = normalize(x, bits, false);
                sx >> ((y & shift_mask) as u32)
            }
            _ => return None,
        };
        return Some(Folded::Int(v));
    }
    if let (Some(x), Some(y)) = (module.as_const_float(a), module.as_const_float(b)) {
        let v = match opcode {
            Opcode::Fadd => x + y,
            Opcode::Fsub => x - y,
            Opcode::Fmul => x * y,
            Opcode::Fdiv => {
                if y == 0.0 {
                    return None;
                }
                x / y
            }
            _ => return None,
        };
        return Some(Folded::Float(v));
    }
    None
}

fn fold_unary(
    _ctx: &Context,
    module: &Module,
    opcode: Opcode,
    arg: crate::ir::entities::Value,
) -> Option<Folded> {
    if let Some(x) = module.as_const_int(arg) {
        let v = match opcode {
            Opcode::Ineg => x.wrapping_neg(),
            Opcode::Bnot => !x,
            _ => return None,
        };
        return Some(Folded::Int(v));
    }
    if let Some(x) = module.as_const_float(arg) {
        let v = match opcode {
            Opcode::Fneg => -x,
            Opcode::Fabs => x.abs(),
            _ => return None,
        };
        return Some(Folded::Float(v));
    }
    None
}
