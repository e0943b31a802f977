//! Copy propagation.
//!
//! Instructions that merely reproduce one of their operands (`y = x + 0`,
//! `y = x | 0`, a bitcast to the same type, a select whose condition is a
//! known constant) are forwarded: later uses of `y` reference `x`
//! directly. The identity instruction itself is left for DCE.

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
            let result = match module.inst_result(inst) {
                Some(r) => r,
                None => continue,
            };
            let source = match module.inst(inst) {
                InstructionData::Binary { opcode, args } => {
                    identity_source(module, *opcode, args[0], args[1])
                }
                InstructionData::Conversion { opcode: Opcode::Bitcast, arg } => {
                    if module.value_type(*arg) == module.value_type(result) {
                        Some(*arg)
                    } else {
                        None
                    }
                }
                InstructionData::Select { args } => match module.as_const_int(args[0]) {
                    Some(0) => Some(args[2]),
                    Some(_) => Some(args[1]),
                    None => {
                        if args[1] == args[2] {
                            Some(args[1])
                        } else {
                            None
                        }
                    }
                },
                InstructionData::Phi { args, .. } => {
                    // A phi whose incomings are all the same value is a copy.
                    match args.split_first() {
                        Some((&first, rest)) if !rest.is_empty() && rest.iter().all(|&v| v == first) => {
                            Some(first)
                        }
                        _ => None,
                    }
                }
                _ => None,
            };
            if let Some(source) = source {
                if source != result && module.replace_uses(func, result, source) > 0 {
                    changed = true;
                }
            }
        }
    }
    changed
}

fn identity_source(module: &Module, opcode: Opcode, x: Value, y: Value) -> Option<Value> {
    let (x, y) = if opcode.is_commutative()
        && module.as_const_int(x).is_some()
        && module.as_const_int(y).is_none()
    {
        (y, x)
    } else {
        (x, y)
    };
    match (opcode, module.as_const_int(y)) {
        (Opcode::Iadd, Some(0))
        | (Opcode::Isub, Some(0))
        | (Opcode::Bor, Some(0))
        | (Opcode::Bxor, Some(0))
        | (Opcode::Imul, Some(1))
        | (Opcode::Ishl, Some(0))
        | (Opcode::Ushr, Some(0))
        | (Opcode::Sshr, Some(0)) => Some(x),
        _ => None,
    }
}
