//! Dead code elimination.
//!
//! Removes instructions whose result has no remaining use and whose opcode
//! is free of observable effects. Stores, calls and terminators are never
//! dead; trapping divisions are kept as well.

use crate::context::Context;
use crate::ir::entities::{Func, Value};
use crate::ir::module::Module;
use rustc_hash::FxHashSet;

pub(crate) fn run(_ctx: &Context, module: &mut Module, func: Func) -> bool {
    let mut any_change = false;
    // Removing one instruction can make its operands dead; sweep until the
    // live set is stable.
    loop {
        let mut used: FxHashSet<Value> = FxHashSet::default();
        let blocks = module.func(func).blocks.clone();
        for &block in &blocks {
            for &inst in &module.block(block).insts {
                for arg in module.inst(inst).arguments() {
                    used.insert(arg);
                }
            }
        }

        let mut changed = false;
        for &block in &blocks {
            let insts = module.block(block).insts.clone();
            for inst in insts {
                let opcode = module.inst(inst).opcode();
                if opcode.has_side_effects() || opcode.is_terminator() || opcode.can_trap() {
                    continue;
                }
                let dead = match module.inst_result(inst) {
                    Some(result) => !used.contains(&result),
                    // A result-less instruction without side effects does
                    // not exist today, but stay conservative.
                    None => false,
                };
                if dead {
                    module.remove_inst(block, inst);
                    changed = true;
                }
            }
        }
        any_change |= changed;
        if !changed {
            break;
        }
    }
    any_change
}
