//! Common subexpression elimination.
//!
//! Structurally identical pure instructions within one block share a single
//! computation. The table is scoped to the block (branch boundaries
//! invalidate by construction) and cleared at calls, matching the
//! conservative memory model.

use crate::context::Context;
use crate::ir::entities::{Func, Value};
use crate::ir::instructions::{InstructionData, Opcode};
use crate::ir::module::Module;
use rustc_hash::FxHashMap;

pub(crate) fn run(_ctx: &Context, module: &mut Module, func: Func) -> bool {
    let mut changed = false;
    let blocks = module.func(func).blocks.clone();
    for block in blocks {
        let mut available: FxHashMap<InstructionData, Value> = FxHashMap::default();
        let insts = module.block(block).insts.clone();
        for inst in insts {
            let data = module.inst(inst).clone();
            if data.opcode() == Opcode::Call {
                available.clear();
                continue;
            }
            if !data.opcode().is_pure() {
                continue;
            }
            let result = match module.inst_result(inst) {
                Some(r) => r,
                None => continue,
            };
            let key = canonical(&data);
            if let Some(&prior) = available.get(&key) {
                if module.value_type(prior) == module.value_type(result) {
                    module.replace_uses(func, result, prior);
                    module.remove_inst(block, inst);
                    changed = true;
                    continue;
                }
            }
            available.insert(key, result);
        }
    }
    changed
}

/// Sort the operands of commutative operations so `a + b` and `b + a`
/// share a table entry.
fn canonical(data: &InstructionData) -> InstructionData {
    match data {
        InstructionData::Binary { opcode, args } if opcode.is_commutative() && args[1] < args[0] => {
            InstructionData::Binary {
                opcode: *opcode,
                args: [args[1], args[0]],
            }
        }
        _ => data.clone(),
    }
}
