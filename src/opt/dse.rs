//! Dead store elimination.
//!
//! Within a straight-line block, a store that is provably overwritten by a
//! later store to the same address with no intervening load, call, or
//! possibly-aliasing access in between is dropped. Aliasing is conservative:
//! only distinct `stack_alloc` roots (and distinct globals) are disjoint.

use crate::context::Context;
use crate::ir::entities::{Func, Inst, Value};
use crate::ir::instructions::InstructionData;
use crate::ir::module::Module;
use crate::opt::may_alias;
use rustc_hash::FxHashMap;

pub(crate) fn run(_ctx: &Context, module: &mut Module, func: Func) -> bool {
    let mut changed = false;
    let blocks = module.func(func).blocks.clone();
    for block in blocks {
        // Pending stores whose value has not been observed yet.
        let mut pending: FxHashMap<Value, Inst> = FxHashMap::default();
        let mut dead: Vec<Inst> = Vec::new();
        let insts = module.block(block).insts.clone();
        for inst in insts {
            match module.inst(inst).clone() {
                InstructionData::Store { args } => {
                    let ptr = args[1];
                    if let Some(&prior) = pending.get(&ptr) {
                        dead.push(prior);
                        changed = true;
                    }
                    // A store may also satisfy reads of any aliasing
                    // pending address, so only exact matches stay pending.
                    pending.retain(|&p, _| p == ptr || !may_alias(module, p, ptr));
                    pending.insert(ptr, inst);
                }
                InstructionData::Load { ptr } => {
                    pending.retain(|&p, _| !may_alias(module, p, ptr));
                }
                InstructionData::Call { .. } => {
                    pending.clear();
                }
                data => {
                    // Any other instruction that could observe memory
                    // through its operands invalidates aliasing entries.
                    if data.opcode().has_side_effects() {
                        pending.clear();
                    }
                }
            }
        }
        for inst in dead {
            module.remove_inst(block, inst);
        }
    }
    changed
}
