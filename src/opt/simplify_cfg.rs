//! Control flow graph simplification.
//!
//! Three rewrites, repeated until the graph is stable:
//!
//! 1. blocks unreachable from the entry are removed;
//! 2. branches through a block containing only a jump are redirected to
//!    the jump's destination;
//! 3. a block whose sole successor has it as sole predecessor absorbs that
//!    successor.
//!
//! Concatenation in rewrite 3 preserves instruction order, so observable
//! side effects are never reordered across a call.

use crate::context::Context;
use crate::ir::entities::{Block, Func};
use crate::ir::flowgraph::ControlFlowGraph;
use crate::ir::instructions::InstructionData;
use crate::ir::module::Module;

pub(crate) fn run(_ctx: &Context, module: &mut Module, func: Func) -> bool {
    let mut any_change = false;
    loop {
        let changed = remove_unreachable(module, func)
            || forward_trivial_jumps(module, func)
            || merge_straight_line(module, func);
        any_change |= changed;
        if !changed {
            break;
        }
    }
    any_change
}

fn remove_unreachable(module: &mut Module, func: Func) -> bool {
    let entry = match module.func(func).entry_block() {
        Some(entry) => entry,
        None => return false,
    };
    let cfg = ControlFlowGraph::compute(module, func);
    let reachable = cfg.reachable(entry);
    let doomed: Vec<Block> = module
        .func(func)
        .blocks
        .iter()
        .copied()
        .filter(|b| !reachable.contains(b))
        .collect();
    if doomed.is_empty() {
        return false;
    }
    for &block in &doomed {
        log::debug!("{}: removing unreachable {}", module.func(func).name, block);
        module.remove_block(func, block);
    }
    for &block in &reachable {
        prune_phi_preds(module, block, &doomed);
    }
    true
}

/// Drop phi incomings whose predecessor is one of `gone`.
fn prune_phi_preds(module: &mut Module, block: Block, gone: &[Block]) {
    let insts = module.block(block).insts.clone();
    for inst in insts {
        if let InstructionData::Phi { args, preds } = module.inst_mut(inst) {
            let mut i = 0;
            while i < preds.len() {
                if gone.contains(&preds[i]) {
                    preds.remove(i);
                    args.remove(i);
                } else {
                    i += 1;
                }
            }
        }
    }
}

/// Rename predecessor `from` to `to` in the phis of `block`.
fn rename_phi_pred(module: &mut Module, block: Block, from: Block, to: Block) {
    let insts = module.block(block).insts.clone();
    for inst in insts {
        if let InstructionData::Phi { preds, .. } = module.inst_mut(inst) {
            for p in preds.iter_mut() {
                if *p == from {
                    *p = to;
                }
            }
        }
    }
}

/// Whether any phi of `block` lists `pred` as a predecessor.
fn phis_mention(module: &Module, block: Block, pred: Block) -> bool {
    module.block(block).insts.iter().any(|&inst| {
        matches!(module.inst(inst),
            InstructionData::Phi { preds, .. } if preds.contains(&pred))
    })
}

fn forward_trivial_jumps(module: &mut Module, func: Func) -> bool {
    let entry = match module.func(func).entry_block() {
        Some(entry) => entry,
        None => return false,
    };
    let cfg = ControlFlowGraph::compute(module, func);
    let blocks = module.func(func).blocks.clone();
    for block in blocks {
        if block == entry {
            continue;
        }
        let dest = {
            let insts = &module.block(block).insts;
            match insts.as_slice() {
                &[only] => match module.inst(only) {
                    InstructionData::Jump { dest } if *dest != block => *dest,
                    _ => continue,
                },
                _ => continue,
            }
        };
        let preds: Vec<Block> = cfg.preds(block).to_vec();
        if preds.is_empty() {
            continue;
        }
        if phis_mention(module, dest, block) {
            // Retargeting would need one incoming per new predecessor; only
            // the single-predecessor case keeps the pairing well defined.
            if preds.len() != 1 || phis_mention(module, dest, preds[0]) {
                continue;
            }
            rename_phi_pred(module, dest, block, preds[0]);
        }
        log::debug!(
            "{}: forwarding {} through {}",
            module.func(func).name,
            block,
            dest
        );
        for pred in preds {
            let last = module.block(pred).insts.last().copied();
            if let Some(last) = last {
                module.inst_mut(last).redirect_branch(block, dest);
            }
        }
        // `block` is now unreachable; the next sweep removes it.
        return true;
    }
    false
}

fn merge_straight_line(module: &mut Module, func: Func) -> bool {
    let entry = match module.func(func).entry_block() {
        Some(entry) => entry,
        None => return false,
    };
    let cfg = ControlFlowGraph::compute(module, func);
    let blocks = module.func(func).blocks.clone();
    for block in blocks {
        let succ = match cfg.succs(block) {
            &[succ] if succ != block && succ != entry => succ,
            _ => continue,
        };
        let succ_preds = cfg.preds(succ);
        if succ_preds.len() != 1 || succ_preds[0] != block {
            continue;
        }
        let jump = match module.block(block).insts.last().copied() {
            Some(inst) if matches!(module.inst(inst), InstructionData::Jump { .. }) => inst,
            _ => continue,
        };
        // The successor's phis have exactly one incoming; resolve them.
        let succ_insts = module.block(succ).insts.clone();
        for inst in succ_insts {
            if let InstructionData::Phi { args, preds } = module.inst(inst).clone() {
                if preds.len() != 1 || preds[0] != block || args.len() != 1 {
                    continue;
                }
                if let Some(result) = module.inst_result(inst) {
                    module.replace_uses(func, result, args[0]);
                }
                module.remove_inst(succ, inst);
            }
        }
        log::debug!(
            "{}: merging {} into {}",
            module.func(func).name,
            succ,
            block
        );
        module.remove_inst(block, jump);
        module.move_insts(succ, block);
        module.remove_block(func, succ);
        // Phis downstream of the pair now flow in from `block`.
        let downstream: Vec<Block> = match module.block(block).insts.last() {
            Some(&last) => module.inst(last).branch_targets().to_vec(),
            None => Vec::new(),
        };
        for d in downstream {
            rename_phi_pred(module, d, succ, block);
        }
        return true;
    }
    false
}
