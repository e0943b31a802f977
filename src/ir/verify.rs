//! Structural verifier.
//!
//! Backends run this before lowering a function so that malformed input is
//! rejected with a `Verifier` error and no partial output. The checks are
//! the ones lowering relies on: terminator placement, terminator operand
//! types, phi pair consistency, and result back-links.

use crate::context::Context;
use crate::ir::entities::Func;
use crate::ir::instructions::InstructionData;
use crate::ir::module::{Module, ValueKind};
use crate::result::{CodegenError, CodegenResult};

/// Check the structural invariants of `func`.
///
/// The final block is allowed to fall through without a terminator; every
/// backend emits an implicit return for that case. Any other unterminated
/// block, or a terminator anywhere but last, is an error.
pub fn verify_function(ctx: &Context, module: &Module, func: Func) -> CodegenResult<()> {
    let data = module.func(func);
    if data.is_declaration {
        return Ok(());
    }
    let fname = &data.name;
    if data.blocks.is_empty() {
        return Err(CodegenError::Verifier(format!(
            "function {fname} has no blocks"
        )));
    }
    let ret_ty = ctx
        .types()
        .func_info(data.sig)
        .map(|(ret, _, _)| ret)
        .ok_or_else(|| {
            CodegenError::Verifier(format!("function {fname} signature is not a function type"))
        })?;

    let last_block = *data.blocks.last().unwrap();
    for &block in &data.blocks {
        let insts = &module.block(block).insts;
        let bname = &module.block(block).name;
        for (i, &inst) in insts.iter().enumerate() {
            let is_last = i + 1 == insts.len();
            let opcode = module.inst(inst).opcode();
            if opcode.is_terminator() && !is_last {
                return Err(CodegenError::Verifier(format!(
                    "{fname}/{bname}: terminator {opcode} is not the last instruction"
                )));
            }
            match module.inst(inst) {
                InstructionData::Return { arg } => match arg {
                    Some(v) => {
                        if module.value_type(*v) != ret_ty {
                            return Err(CodegenError::Verifier(format!(
                                "{fname}/{bname}: return operand type mismatch"
                            )));
                        }
                    }
                    None => {
                        if !ctx.types().is_void(ret_ty) {
                            return Err(CodegenError::Verifier(format!(
                                "{fname}/{bname}: missing return operand"
                            )));
                        }
                    }
                },
                InstructionData::Brif { cond, .. } => {
                    if !ctx.types().is_int(module.value_type(*cond)) {
                        return Err(CodegenError::Verifier(format!(
                            "{fname}/{bname}: brif condition is not an integer"
                        )));
                    }
                }
                InstructionData::Phi { args, preds } => {
                    if args.len() != preds.len() {
                        return Err(CodegenError::Verifier(format!(
                            "{fname}/{bname}: phi operand/predecessor length mismatch"
                        )));
                    }
                }
                _ => {}
            }
            if let Some(result) = module.inst_result(inst) {
                match module.value(result).kind {
                    ValueKind::InstResult(producer) if producer == inst => {}
                    _ => {
                        return Err(CodegenError::Verifier(format!(
                            "{fname}/{bname}: result back-link of {inst} is inconsistent"
                        )));
                    }
                }
            }
        }
        if block != last_block && !module.is_terminated(block) {
            return Err(CodegenError::Verifier(format!(
                "{fname}/{bname}: block is not terminated"
            )));
        }
    }
    Ok(())
}

/// Verify every function with a body in `module`.
pub fn verify_module(ctx: &Context, module: &Module) -> CodegenResult<()> {
    for func in module.funcs() {
        verify_function(ctx, module, func)?;
    }
    Ok(())
}
