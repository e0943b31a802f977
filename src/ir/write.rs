//! Textual IR printer.
//!
//! Renders functions in a compact notation used by logs and tests:
//!
//! ```text
//! function %add1(i32) -> i32 {
//! block0:
//!     v1 = iadd v0, v100
//!     return v1
//! }
//! ```

use crate::context::Context;
use crate::ir::entities::{Func, Inst, Value};
use crate::ir::instructions::InstructionData;
use crate::ir::module::{Module, ValueKind};
use core::fmt::Write;

/// Render `func` as text.
pub fn function_to_string(ctx: &Context, module: &Module, func: Func) -> String {
    let mut out = String::new();
    let data = module.func(func);
    let (ret, params, variadic) = ctx
        .types()
        .func_info(data.sig)
        .unwrap_or((crate::ir::types::VOID, &[], false));
    let mut sig_parts: Vec<String> = params.iter().map(|&p| ctx.types().display(p)).collect();
    if variadic {
        sig_parts.push("...".to_string());
    }
    let _ = write!(
        out,
        "function %{}({}) -> {}",
        data.name,
        sig_parts.join(", "),
        ctx.types().display(ret)
    );
    if data.is_declaration {
        out.push('\n');
        return out;
    }
    out.push_str(" {\n");
    for &block in &data.blocks {
        let _ = writeln!(out, "{}:", module.block(block).name);
        for &inst in &module.block(block).insts {
            out.push_str("    ");
            write_inst(&mut out, module, inst);
            out.push('\n');
        }
    }
    out.push_str("}\n");
    out
}

fn operand(module: &Module, value: Value) -> String {
    match &module.value(value).kind {
        ValueKind::ConstInt(v) => format!("{v}"),
        ValueKind::ConstFloat(bits) => format!("{}", f64::from_bits(*bits)),
        ValueKind::ConstNull => "null".to_string(),
        ValueKind::ConstString(id) => format!("{id}"),
        ValueKind::ConstArray(_) => "array".to_string(),
        ValueKind::Global(gv) => format!("@{}", module.global(*gv).name),
        ValueKind::FuncAddr(f) => format!("%{}", module.func(*f).name),
        _ => value.to_string(),
    }
}

fn write_inst(out: &mut String, module: &Module, inst: Inst) {
    if let Some(result) = module.inst_result(inst) {
        let _ = write!(out, "{result} = ");
    }
    let data = module.inst(inst);
    let _ = write!(out, "{}", data.opcode());
    match data {
        InstructionData::IntCompare { cond, .. } => {
            let _ = write!(out, " {cond}");
        }
        InstructionData::FloatCompare { cond, .. } => {
            let _ = write!(out, " {cond}");
        }
        InstructionData::Jump { dest } => {
            let _ = write!(out, " {}", module.block(*dest).name);
            return;
        }
        InstructionData::Brif { cond, dests } => {
            let _ = write!(
                out,
                " {}, {}, {}",
                operand(module, *cond),
                module.block(dests[0]).name,
                module.block(dests[1]).name
            );
            return;
        }
        InstructionData::Phi { args, preds } => {
            let pairs: Vec<String> = args
                .iter()
                .zip(preds.iter())
                .map(|(&v, &b)| format!("[{}, {}]", operand(module, v), module.block(b).name))
                .collect();
            let _ = write!(out, " {}", pairs.join(", "));
            return;
        }
        InstructionData::FieldAddr { field, .. } => {
            let _ = write!(out, ".{field}");
        }
        _ => {}
    }
    let args = data.arguments();
    for (i, &arg) in args.iter().enumerate() {
        let sep = if i == 0 { " " } else { ", " };
        let _ = write!(out, "{}{}", sep, operand(module, arg));
    }
}
