//! Stack layout computation shared by the backends.
//!
//! One scan over a function's instructions reserves a slot per
//! `stack_alloc` (sized by the allocated type), a spill temp per non-void
//! instruction result and per parameter, and measures the largest outgoing
//! argument list across all calls. Offsets are logical: they start at zero
//! and grow upward; each backend maps them onto its own frame addressing.

use crate::context::Context;
use crate::ir::entities::{Func, Inst, Value};
use crate::ir::instructions::InstructionData;
use crate::ir::module::Module;
use rustc_hash::FxHashMap;

/// The computed frame layout of one function.
pub struct FrameLayout {
    /// Logical byte offset of the buffer reserved by each `stack_alloc`.
    alloca_slots: FxHashMap<Inst, u32>,
    /// Logical byte offset of the spill temp of each instruction result.
    temp_slots: FxHashMap<Inst, u32>,
    /// Logical byte offset of the home slot of each parameter value.
    param_slots: FxHashMap<Value, u32>,
    /// Total size of the locals area (allocas + temps + parameter homes).
    pub locals_size: u32,
    /// Size of the largest outgoing argument list, in bytes.
    pub outgoing_size: u32,
}

impl FrameLayout {
    /// Scan `func` and lay out its frame. `arg_slot` is the size of one
    /// outgoing argument slot and `align` the required frame alignment.
    pub fn compute(ctx: &Context, module: &Module, func: Func, arg_slot: u32, align: u32) -> Self {
        let word = ctx.pointer_bytes();
        let mut layout = Self {
            alloca_slots: FxHashMap::default(),
            temp_slots: FxHashMap::default(),
            param_slots: FxHashMap::default(),
            locals_size: 0,
            outgoing_size: 0,
        };
        let mut offset = 0u32;
        let mut reserve = |size: u32, al: u32| -> u32 {
            let al = al.max(1);
            offset = (offset + al - 1) & !(al - 1);
            let at = offset;
            offset += size.max(1);
            at
        };

        for &param in &module.func(func).params {
            let ty = module.value_type(param);
            let size = ctx.size_of(ty).max(word);
            let at = reserve(size, ctx.align_of(ty).max(word));
            layout.param_slots.insert(param, at);
        }
        for &block in &module.func(func).blocks {
            for &inst in &module.block(block).insts {
                match module.inst(inst) {
                    InstructionData::StackAlloc { alloc_ty } => {
                        let at = reserve(ctx.size_of(*alloc_ty), ctx.align_of(*alloc_ty).max(word));
                        layout.alloca_slots.insert(inst, at);
                    }
                    InstructionData::Call { args, .. } => {
                        let outgoing = (args.len() as u32 - 1) * arg_slot;
                        layout.outgoing_size = layout.outgoing_size.max(outgoing);
                    }
                    _ => {}
                }
                if let Some(result) = module.inst_result(inst) {
                    let ty = module.value_type(result);
                    let size = ctx.size_of(ty).max(word);
                    let at = reserve(size, ctx.align_of(ty).max(word));
                    layout.temp_slots.insert(inst, at);
                }
            }
        }
        let align = align.max(1);
        layout.locals_size = (offset + align - 1) & !(align - 1);
        layout.outgoing_size = (layout.outgoing_size + align - 1) & !(align - 1);
        layout
    }

    /// Offset of the buffer reserved by a `stack_alloc` instruction.
    pub fn alloca_slot(&self, inst: Inst) -> Option<u32> {
        self.alloca_slots.get(&inst).copied()
    }

    /// Offset of the spill temp holding `inst`'s result.
    pub fn temp_slot(&self, inst: Inst) -> Option<u32> {
        self.temp_slots.get(&inst).copied()
    }

    /// Offset of the home slot of a parameter value.
    pub fn param_slot(&self, value: Value) -> Option<u32> {
        self.param_slots.get(&value).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::ir::builder::Builder;
    use crate::ir::function::Linkage;
    use crate::ir::types;
    use crate::settings::Arch;

    #[test]
    fn slots_and_outgoing() {
        let mut ctx = Context::new();
        ctx.set_arch(Arch::X86_64);
        let mut module = ctx.create_module("t");
        let callee_sig = ctx.func_type(types::VOID, &[types::I32, types::I32], false);
        let callee = module.declare_function("ext", callee_sig);
        let sig = ctx.func_type(types::I32, &[types::I32], false);
        let f = module.create_function("f", sig, Linkage::External, &[types::I32]);
        let entry = module.create_block(f, "entry");
        let p = module.func_param(f, 0).unwrap();
        let callee_addr = module.func_addr(callee);
        {
            let mut b = Builder::new(&mut ctx, &mut module);
            b.ctx().set_insert_point(entry);
            let slot = b.stack_alloc(types::I64).unwrap();
            let v = b.iadd(p, p).unwrap();
            let _ = b.call(callee_sig, callee_addr, &[v, v]).unwrap();
            let _ = slot;
            b.ret(Some(v)).unwrap();
        }
        let frame = FrameLayout::compute(&ctx, &module, f, 8, 16);
        // param home + alloca + two result temps, 16-aligned.
        assert!(frame.locals_size >= 8 + 8 + 8 + 8);
        assert_eq!(frame.locals_size % 16, 0);
        assert_eq!(frame.outgoing_size, 16);
        assert!(frame.param_slot(p).is_some());
    }
}
