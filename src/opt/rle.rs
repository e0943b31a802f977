//! Redundant load elimination.
//!
//! Within a straight-line block, a load from an address whose value is
//! already known — from a prior load of the same address, or from the
//! store that wrote it (store-to-load forwarding) — reuses the known value
//! instead. Calls and possibly-aliasing stores invalidate tracked facts.

use crate::context::Context;
use crate::ir::entities::{Func, Value};
use crate::ir::instructions::InstructionData;
use crate::ir::module::Module;
use crate::opt::may_alias;
use rustc_hash::FxHashMap;

pub(crate) fn run(_ctx: &Context, module: &mut Module, func: Func) -> bool {
    let mut changed = false;
    let blocks = module.func(func).blocks.clone();
    for block in blocks {
        // Known memory contents: address value -> value last seen there.
        let mut known: FxHashMap<Value, Value> = FxHashMap::default();
        let insts = module.block(block).insts.clone();
        for inst in insts {
            match module.inst(inst).clone() {
                InstructionData::Load { ptr } => {
                    let result = match module.inst_result(inst) {
                        Some(r) => r,
                        None => continue,
                    };
                    if let Some(&cached) = known.get(&ptr) {
                        module.replace_uses(func, result, cached);
                        module.remove_inst(block, inst);
                        changed = true;
                    } else {
                        known.insert(ptr, result);
                    }
                }
                InstructionData::Store { args } => {
                    let (value, ptr) = (args[0], args[1]);
                    known.retain(|&p, _| p == ptr || !may_alias(module, p, ptr));
                    known.insert(ptr, value);
                }
                InstructionData::Call { .. } => {
                    known.clear();
                }
                _ => {}
            }
        }
    }
    changed
}
