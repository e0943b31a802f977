//! Control flow graph derived from branch targets.
//!
//! Predecessor and successor lists are not stored in the IR; they are
//! recomputed from the terminators whenever a pass or a backend needs them.

use crate::ir::entities::{Block, Func};
use crate::ir::module::Module;
use rustc_hash::FxHashMap;

/// Predecessor and successor lists for every block of one function.
pub struct ControlFlowGraph {
    preds: FxHashMap<Block, Vec<Block>>,
    succs: FxHashMap<Block, Vec<Block>>,
}

impl ControlFlowGraph {
    /// Compute the flow graph of `func`.
    pub fn compute(module: &Module, func: Func) -> Self {
        let mut cfg = Self {
            preds: FxHashMap::default(),
            succs: FxHashMap::default(),
        };
        for &block in &module.func(func).blocks {
            cfg.preds.entry(block).or_default();
            cfg.succs.entry(block).or_default();
        }
        for &block in &module.func(func).blocks {
            if let Some(&last) = module.block(block).insts.last() {
                for target in module.inst(last).branch_targets() {
                    cfg.succs.entry(block).or_default().push(target);
                    cfg.preds.entry(target).or_default().push(block);
                }
            }
        }
        cfg
    }

    /// Predecessors of `block`.
    pub fn preds(&self, block: Block) -> &[Block] {
        self.preds.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Successors of `block`.
    pub fn succs(&self, block: Block) -> &[Block] {
        self.succs.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Blocks reachable from the entry, in depth-first order.
    pub fn reachable(&self, entry: Block) -> Vec<Block> {
        let mut seen: Vec<Block> = Vec::new();
        let mut stack = vec![entry];
        while let Some(block) = stack.pop() {
            if seen.contains(&block) {
                continue;
            }
            seen.push(block);
            for &succ in self.succs(block) {
                if !seen.contains(&succ) {
                    stack.push(succ);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::ir::builder::Builder;
    use crate::ir::function::Linkage;
    use crate::ir::types;

    #[test]
    fn diamond() {
        let mut ctx = Context::new();
        let mut module = ctx.create_module("t");
        let sig = ctx.func_type(types::VOID, &[types::I32], false);
        let f = module.create_function("f", sig, Linkage::Internal, &[types::I32]);
        let entry = module.create_block(f, "entry");
        let then_b = module.create_block(f, "then");
        let else_b = module.create_block(f, "else");
        let merge = module.create_block(f, "merge");
        let p = module.func_param(f, 0).unwrap();
        {
            let mut b = Builder::new(&mut ctx, &mut module);
            b.ctx().set_insert_point(entry);
            let zero = b.module().const_int(types::I32, 0);
            let cond = b.icmp(crate::ir::condcodes::IntCC::NotEqual, p, zero).unwrap();
            b.brif(cond, then_b, else_b).unwrap();
            b.ctx().set_insert_point(then_b);
            b.jump(merge).unwrap();
            b.ctx().set_insert_point(else_b);
            b.jump(merge).unwrap();
            b.ctx().set_insert_point(merge);
            b.ret(None).unwrap();
        }
        let cfg = ControlFlowGraph::compute(&module, f);
        assert_eq!(cfg.succs(entry), &[then_b, else_b]);
        assert_eq!(cfg.preds(merge), &[then_b, else_b]);
        assert_eq!(cfg.reachable(entry).len(), 4);
    }
}
