//! Strength reduction peepholes.
//!
//! Rewrites individually profitable instructions: multiplication by a
//! power of two becomes a shift, multiplication by zero becomes the zero
//! constant, and the no-op identities (`x*1`, `x+0`, `x|0`, `x^0`,
//! `x<<0`, ...) forward their operand. Identity forwarding leaves the dead
//! instruction for DCE to collect.

use crate::context::Context;
use crate::ir::entities::{Func, Value};
use crate::ir::instructions::{InstructionData, Opcode};
use crate::ir::module::Module;

pub(crate) fn run(_ctx: &Context, module: &mut Module, func: Func) -> bool {
    let mut changed = false;
    let blocks = module.func(func).blocks.clone();
    for block in blocks {
        let insts = module.block(block).insts.clone();
        for inst in insts {
            let (opcode, x, y) = match module.inst(inst) {
                InstructionData::Binary { opcode, args } => (*opcode, args[0], args[1]),
                _ => continue,
            };
            let result = match module.inst_result(inst) {
                Some(r) => r,
                None => continue,
            };
            // Normalize the constant to the right-hand side for the
            // commutative cases.
            let (x, y) = if opcode.is_commutative()
                && module.as_const_int(x).is_some()
                && module.as_const_int(y).is_none()
            {
                (y, x)
            } else {
                (x, y)
            };
            let k = match module.as_const_int(y) {
                Some(k) => k,
                None => continue,
            };

            let rewrite = match (opcode, k) {
                (Opcode::Imul, 0) | (Opcode::Band, 0) => Rewrite::Constant(0),
                (Opcode::Imul, 1)
                | (Opcode::Sdiv, 1)
                | (Opcode::Udiv, 1)
                | (Opcode::Iadd, 0)
                | (Opcode::Isub, 0)
                | (Opcode::Bor, 0)
                | (Opcode::Bxor, 0)
                | (Opcode::Ishl, 0)
                | (Opcode::Ushr, 0)
                | (Opcode::Sshr, 0) => Rewrite::Forward(x),
                (Opcode::Imul, k) if k > 0 && (k as u64).is_power_of_two() => {
                    Rewrite::Shift(Opcode::Ishl, x, (k as u64).trailing_zeros())
                }
                (Opcode::Udiv, k) if k > 0 && (k as u64).is_power_of_two() => {
                    Rewrite::Shift(Opcode::Ushr, x, (k as u64).trailing_zeros())
                }
                _ => continue,
            };

            match rewrite {
                Rewrite::Forward(src) => {
                    if module.replace_uses(func, result, src) > 0 {
                        changed = true;
                    }
                }
                Rewrite::Constant(v) => {
                    if module.count_uses(func, result) > 0 {
                        let ty = module.value_type(result);
                        let zero = module.const_int(ty, v);
                        module.replace_uses(func, result, zero);
                        changed = true;
                    }
                }
                Rewrite::Shift(shift_op, src, amount) => {
                    let ty = module.value_type(result);
                    let amount = module.const_int(ty, i64::from(amount));
                    *module.inst_mut(inst) = InstructionData::Binary {
                        opcode: shift_op,
                        args: [src, amount],
                    };
                    changed = true;
                }
            }
        }
    }
    changed
}

enum Rewrite {
    /// Uses of the result become uses of this value.
    Forward(Value),
    /// Uses of the result become uses of a fresh constant.
    Constant(i64),
    /// The instruction itself is rewritten to a shift.
    Shift(Opcode, Value, u32),
}
