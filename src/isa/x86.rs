//! x86 lowering: 32-bit cdecl and 64-bit System V / Darwin, AT&T syntax.
//!
//! Lowering follows the fixed convention shared by all backends: every
//! instruction result is committed to its frame temp after computation and
//! operands are rematerialized from temps, so values survive arbitrary
//! consumer distance without register allocation. The primary work
//! register (`%eax`/`%rax`, `%xmm0`) doubles as the return register.
//!
//! 64-bit integer operations are not lowered on the 32-bit target; they
//! produce the unsupported marker.

use crate::context::Context;
use crate::ir::entities::{Block, Func, Inst, StringId, Type, Value};
use crate::ir::instructions::{InstructionData, Opcode};
use crate::ir::module::{Module, ValueKind};
use crate::ir::types;
use crate::ir::verify::verify_function;
use crate::ir::condcodes::{FloatCC, IntCC};
use crate::isa::frame::FrameLayout;
use crate::isa::{ArchInfo, Endianness, StackDirection, TargetBackend};
use crate::result::CodegenResult;
use crate::settings::{Abi, Arch, CpuFeatures};
use core::fmt::Write as _;
use rustc_hash::FxHashMap;

static X86_INFO: ArchInfo = ArchInfo {
    name: "x86",
    pointer_width: 32,
    word_size: 4,
    gpr_count: 8,
    fpr_count: 8,
    endianness: Endianness::Little,
    stack_direction: StackDirection::Down,
    has_condition_codes: true,
    has_delay_slots: false,
};

static X86_64_INFO: ArchInfo = ArchInfo {
    name: "x86_64",
    pointer_width: 64,
    word_size: 8,
    gpr_count: 16,
    fpr_count: 16,
    endianness: Endianness::Little,
    stack_direction: StackDirection::Down,
    has_condition_codes: true,
    has_delay_slots: false,
};

pub(crate) fn backend(arch: Arch) -> Box<dyn TargetBackend> {
    Box::new(X86Backend {
        arch,
        strings: FxHashMap::default(),
        string_order: Vec::new(),
        float_lits: FxHashMap::default(),
        float_order: Vec::new(),
        label_count: 0,
    })
}

struct X86Backend {
    arch: Arch,
    strings: FxHashMap<StringId, String>,
    string_order: Vec<(String, StringId)>,
    float_lits: FxHashMap<(u64, u32), String>,
    float_order: Vec<(String, u64, u32)>,
    label_count: u32,
}

impl X86Backend {
    fn is64(&self) -> bool {
        self.arch == Arch::X86_64
    }

    fn local_label(&mut self, stem: &str) -> String {
        self.label_count += 1;
        format!(".L{}{}", stem, self.label_count)
    }

    fn string_label(&mut self, id: StringId) -> String {
        if let Some(l) = self.strings.get(&id) {
            return l.clone();
        }
        let l = format!(".LS{}", self.strings.len());
        self.strings.insert(id, l.clone());
        self.string_order.push((l.clone(), id));
        l
    }

    fn float_label(&mut self, bits: u64, size: u32) -> String {
        if let Some(l) = self.float_lits.get(&(bits, size)) {
            return l.clone();
        }
        let l = format!(".LC{}", self.float_lits.len());
        self.float_lits.insert((bits, size), l.clone());
        self.float_order.push((l.clone(), bits, size));
        l
    }
}

/// Symbol spelling: Darwin prepends an underscore.
fn sym(abi: Abi, name: &str) -> String {
    match abi {
        Abi::Darwin => format!("_{name}"),
        Abi::SysV => name.to_string(),
    }
}

fn block_label(module: &Module, func: Func, block: Block) -> String {
    format!(
        ".L{}_{}",
        module.func(func).name,
        module.block(block).name
    )
}

// Work register slots: 0 = a, 1 = c, 2 = d.
const GPR8: [&str; 3] = ["al", "cl", "dl"];
const GPR16: [&str; 3] = ["ax", "cx", "dx"];
const GPR32: [&str; 3] = ["eax", "ecx", "edx"];
const GPR64: [&str; 3] = ["rax", "rcx", "rdx"];

const ARG32: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
const ARG64: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

fn gpr(slot: usize, size: u32) -> &'static str {
    match size {
        1 => GPR8[slot],
        2 => GPR16[slot],
        4 => GPR32[slot],
        _ => GPR64[slot],
    }
}

fn suffix(size: u32) -> &'static str {
    match size {
        1 => "b",
        2 => "w",
        4 => "l",
        _ => "q",
    }
}

impl TargetBackend for X86Backend {
    fn info(&self) -> &'static ArchInfo {
        if self.is64() { &X86_64_INFO } else { &X86_INFO }
    }

    fn emit_module(&mut self, ctx: &Context, module: &Module) -> CodegenResult<String> {
        let mut out = String::new();
        let _ = writeln!(out, "\t.file\t\"{}\"", module.name);
        out.push_str("\t.text\n");
        for func in module.funcs() {
            if module.func(func).is_declaration {
                continue;
            }
            self.emit_function(ctx, module, func, &mut out)?;
        }
        self.emit_data(ctx, module, &mut out);
        Ok(out)
    }

    fn emit_function(
        &mut self,
        ctx: &Context,
        module: &Module,
        func: Func,
        out: &mut String,
    ) -> CodegenResult<()> {
        verify_function(ctx, module, func)?;
        log::debug!("lowering {} for {}", module.func(func).name, self.info().name);
        let frame = FrameLayout::compute(ctx, module, func, ctx.pointer_bytes(), 16);
        let mut e = Emitter {
            ctx,
            module,
            func,
            frame,
            abi: ctx.abi(),
            be: self,
            out,
        };
        e.function();
        Ok(())
    }

    fn reset(&mut self) {
        self.strings.clear();
        self.string_order.clear();
        self.float_lits.clear();
        self.float_order.clear();
        self.label_count = 0;
    }
}

struct Emitter<'a> {
    ctx: &'a Context,
    module: &'a Module,
    func: Func,
    frame: FrameLayout,
    abi: Abi,
    be: &'a mut X86Backend,
    out: &'a mut String,
}

impl<'a> Emitter<'a> {
    fn is64(&self) -> bool {
        self.be.is64()
    }

    fn word(&self) -> u32 {
        if self.is64() { 8 } else { 4 }
    }

    fn bp(&self) -> &'static str {
        if self.is64() { "rbp" } else { "ebp" }
    }

    fn line(&mut self, s: &str) {
        self.out.push('\t');
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn unsupported(&mut self, what: &str) {
        let _ = writeln!(self.out, "\t# anvil: unsupported {what}");
    }

    /// Frame displacement of a logical locals offset.
    fn slot_disp(&self, off: u32) -> i64 {
        i64::from(off) - i64::from(self.frame.locals_size)
    }

    fn slot_addr(&self, off: u32) -> String {
        format!("{}(%{})", self.slot_disp(off), self.bp())
    }

    /// Size class used for register operations on a value of `ty`: 4 or 8.
    fn reg_size(&self, ty: Type) -> u32 {
        let size = self.ctx.size_of(ty);
        if size == 8 && self.is64() { 8 } else { 4 }
    }

    fn value_size(&self, v: Value) -> u32 {
        self.ctx.size_of(self.module.value_type(v))
    }

    // ------------------------------------------------------------------
    // Operand materialization.

    /// Load the address held in a slot-resident pointer-like value, or the
    /// value itself, into work register `slot` (extended to register
    /// width). Emits the canonical sequence per value kind.
    fn mat_int(&mut self, v: Value, slot: usize) {
        let ty = self.module.value_type(v);
        let rsize = self.reg_size(ty);
        let reg = gpr(slot, rsize);
        match &self.module.value(v).kind {
            ValueKind::ConstInt(k) => {
                if rsize == 8 && (*k > i64::from(i32::MAX) || *k < i64::from(i32::MIN)) {
                    self.line(&format!("movabsq\t${}, %{}", k, reg));
                } else {
                    self.line(&format!("mov{}\t${}, %{}", suffix(rsize), k, reg));
                }
            }
            ValueKind::ConstNull => {
                self.line(&format!("mov{}\t$0, %{}", suffix(rsize), reg));
            }
            ValueKind::ConstString(id) => {
                let label = self.be.string_label(*id);
                if self.is64() {
                    self.line(&format!("leaq\t{}(%rip), %{}", label, reg));
                } else {
                    self.line(&format!("movl\t${}, %{}", label, reg));
                }
            }
            ValueKind::Global(gv) => {
                let name = sym(self.abi, &self.module.global(*gv).name);
                if self.is64() {
                    self.line(&format!("leaq\t{}(%rip), %{}", name, reg));
                } else {
                    self.line(&format!("movl\t${}, %{}", name, reg));
                }
            }
            ValueKind::FuncAddr(f) => {
                let name = sym(self.abi, &self.module.func(*f).name);
                if self.is64() {
                    self.line(&format!("leaq\t{}(%rip), %{}", name, reg));
                } else {
                    self.line(&format!("movl\t${}, %{}", name, reg));
                }
            }
            ValueKind::Param { .. } => {
                if let Some(off) = self.frame.param_slot(v) {
                    self.load_slot(ty, off, slot);
                }
            }
            ValueKind::InstResult(inst) => {
                let inst = *inst;
                if let Some(off) = self.frame.temp_slot(inst) {
                    self.load_slot(ty, off, slot);
                }
            }
            ValueKind::ConstFloat(_) | ValueKind::ConstArray(_) => {
                self.unsupported("aggregate or float operand in integer context");
            }
        }
    }

    /// Slot load with width-correct extension.
    fn load_slot(&mut self, ty: Type, off: u32, slot: usize) {
        let addr = self.slot_addr(off);
        let size = self.ctx.size_of(ty);
        let signed = self.ctx.types().is_signed(ty);
        let rsize = self.reg_size(ty);
        let reg = gpr(slot, rsize);
        match (size, signed) {
            (1, true) => self.line(&format!("movsb{}\t{}, %{}", suffix(rsize), addr, reg)),
            (1, false) => self.line(&format!("movzb{}\t{}, %{}", suffix(rsize), addr, reg)),
            (2, true) => self.line(&format!("movsw{}\t{}, %{}", suffix(rsize), addr, reg)),
            (2, false) => self.line(&format!("movzw{}\t{}, %{}", suffix(rsize), addr, reg)),
            (4, _) if rsize == 8 && signed => {
                self.line(&format!("movslq\t{}, %{}", addr, reg))
            }
            _ => self.line(&format!("mov{}\t{}, %{}", suffix(rsize), addr, reg)),
        }
    }

    /// Materialize a floating operand into `%xmm{idx}`.
    fn mat_float(&mut self, v: Value, idx: u32) {
        let ty = self.module.value_type(v);
        let mnem = if ty == types::F32 { "movss" } else { "movsd" };
        match &self.module.value(v).kind {
            ValueKind::ConstFloat(bits) => {
                let (bits, size) = if ty == types::F32 {
                    (u64::from((f64::from_bits(*bits) as f32).to_bits()), 4)
                } else {
                    (*bits, 8)
                };
                let label = self.be.float_label(bits, size);
                if self.is64() {
                    self.line(&format!("{}\t{}(%rip), %xmm{}", mnem, label, idx));
                } else {
                    self.line(&format!("{}\t{}, %xmm{}", mnem, label, idx));
                }
            }
            ValueKind::Param { .. } => {
                if let Some(off) = self.frame.param_slot(v) {
                    let addr = self.slot_addr(off);
                    self.line(&format!("{mnem}\t{addr}, %xmm{idx}"));
                }
            }
            ValueKind::InstResult(inst) => {
                if let Some(off) = self.frame.temp_slot(*inst) {
                    let addr = self.slot_addr(off);
                    self.line(&format!("{mnem}\t{addr}, %xmm{idx}"));
                }
            }
            _ => self.unsupported("operand in float context"),
        }
    }

    /// Commit the result sitting in work register 0 to its temp slot.
    fn store_result_gpr(&mut self, inst: Inst) {
        if let (Some(result), Some(off)) = (self.module.inst_result(inst), self.frame.temp_slot(inst)) {
            let size = self.value_size(result);
            if size == 8 && !self.is64() {
                self.unsupported("64-bit result on 32-bit target");
                return;
            }
            let addr = self.slot_addr(off);
            self.line(&format!("mov{}\t%{}, {}", suffix(size), gpr(0, size), addr));
        }
    }

    /// Commit the result sitting in `%xmm0` to its temp slot.
    fn store_result_xmm(&mut self, inst: Inst) {
        if let (Some(result), Some(off)) = (self.module.inst_result(inst), self.frame.temp_slot(inst)) {
            let ty = self.module.value_type(result);
            let mnem = if ty == types::F32 { "movss" } else { "movsd" };
            let addr = self.slot_addr(off);
            self.line(&format!("{mnem}\t%xmm0, {addr}"));
        }
    }

    /// Store `value` (materialized) into a phi's temp slot.
    fn store_phi_move(&mut self, phi_inst: Inst, value: Value) {
        let off = match self.frame.temp_slot(phi_inst) {
            Some(off) => off,
            None => return,
        };
        let ty = self.module.value_type(value);
        if self.ctx.types().is_float(ty) {
            self.mat_float(value, 0);
            let mnem = if ty == types::F32 { "movss" } else { "movsd" };
            let addr = self.slot_addr(off);
            self.line(&format!("{mnem}\t%xmm0, {addr}"));
        } else {
            let size = self.ctx.size_of(ty);
            if size == 8 && !self.is64() {
                self.unsupported("64-bit phi move on 32-bit target");
                return;
            }
            self.mat_int(value, 0);
            let addr = self.slot_addr(off);
            self.line(&format!("mov{}\t%{}, {}", suffix(size), gpr(0, size), addr));
        }
    }

    // ------------------------------------------------------------------
    // Function shell.

    fn function(&mut self) {
        let data = self.module.func(self.func);
        let name = sym(self.abi, &data.name);
        let blocks = data.blocks.clone();
        self.out.push('\n');
        if data.linkage == crate::ir::function::Linkage::External {
            self.line(&format!(".globl\t{name}"));
        }
        if self.abi == Abi::SysV {
            self.line(&format!(".type\t{name}, @function"));
        }
        let _ = writeln!(self.out, "{name}:");

        // Prologue.
        let frame_bytes = self.frame.locals_size + self.frame.outgoing_size;
        if self.is64() {
            self.line("pushq\t%rbp");
            self.line("movq\t%rsp, %rbp");
            if frame_bytes > 0 {
                self.line(&format!("subq\t${frame_bytes}, %rsp"));
            }
        } else {
            self.line("pushl\t%ebp");
            self.line("movl\t%esp, %ebp");
            if frame_bytes > 0 {
                self.line(&format!("subl\t${frame_bytes}, %esp"));
            }
        }
        self.spill_params();

        for (i, &block) in blocks.iter().enumerate() {
            let label = block_label(self.module, self.func, block);
            let _ = writeln!(self.out, "{label}:");
            let insts = self.module.block(block).insts.clone();
            for inst in insts {
                self.inst(inst);
            }
            let fallthrough = !self.module.is_terminated(block);
            if fallthrough && i + 1 == blocks.len() {
                self.implicit_return();
            }
        }
    }

    /// Copy incoming arguments into their frame home slots.
    fn spill_params(&mut self) {
        let params = self.module.func(self.func).params.clone();
        if self.is64() {
            let mut next_int = 0usize;
            let mut next_float = 0u32;
            let mut caller_off: i64 = 16;
            for &p in &params {
                let ty = self.module.value_type(p);
                let off = match self.frame.param_slot(p) {
                    Some(off) => off,
                    None => continue,
                };
                let addr = self.slot_addr(off);
                if self.ctx.types().is_float(ty) {
                    if next_float < 8 {
                        let mnem = if ty == types::F32 { "movss" } else { "movsd" };
                        self.line(&format!("{}\t%xmm{}, {}", mnem, next_float, addr));
                        next_float += 1;
                    } else {
                        self.line(&format!("movq\t{}(%rbp), %rax", caller_off));
                        self.line(&format!("movq\t%rax, {addr}"));
                        caller_off += 8;
                    }
                } else if next_int < 6 {
                    let size = self.ctx.size_of(ty);
                    let reg = match size {
                        1 | 2 | 4 => ARG32[next_int],
                        _ => ARG64[next_int],
                    };
                    // Narrow types arrive widened; store the full register
                    // and let loads re-narrow.
                    let s = if size == 8 { "q" } else { "l" };
                    self.line(&format!("mov{}\t%{}, {}", s, reg, addr));
                    next_int += 1;
                } else {
                    self.line(&format!("movq\t{}(%rbp), %rax", caller_off));
                    self.line(&format!("movq\t%rax, {addr}"));
                    caller_off += 8;
                }
            }
        } else {
            let mut caller_off: i64 = 8;
            for &p in &params {
                let ty = self.module.value_type(p);
                let off = match self.frame.param_slot(p) {
                    Some(off) => off,
                    None => continue,
                };
                let addr = self.slot_addr(off);
                let size = self.ctx.size_of(ty);
                if size == 8 && !self.ctx.types().is_float(ty) {
                    self.unsupported("64-bit integer parameter on 32-bit target");
                    caller_off += 8;
                    continue;
                }
                if size == 8 {
                    self.line(&format!("movl\t{}(%ebp), %eax", caller_off));
                    self.line(&format!("movl\t%eax, {addr}"));
                    let hi = self.slot_disp(off) + 4;
                    self.line(&format!("movl\t{}(%ebp), %eax", caller_off + 4));
                    self.line(&format!("movl\t%eax, {}(%ebp)", hi));
                    caller_off += 8;
                } else {
                    self.line(&format!("movl\t{}(%ebp), %eax", caller_off));
                    self.line(&format!("mov{}\t%{}, {}", suffix(size), gpr(0, size), addr));
                    caller_off += 4;
                }
            }
        }
    }

    /// Return sequence for a function that falls off its end: zero the
    /// return register per the signature, then the normal epilogue.
    fn implicit_return(&mut self) {
        let sig = self.module.func(self.func).sig;
        if let Some((ret, _, _)) = self.ctx.types().func_info(sig) {
            if self.ctx.types().is_float(ret) {
                if self.is64() {
                    self.line("pxor\t%xmm0, %xmm0");
                } else {
                    self.line("fldz");
                }
            } else if !self.ctx.types().is_void(ret) {
                self.line("xorl\t%eax, %eax");
            }
        }
        self.line("leave");
        self.line("ret");
    }

    fn epilogue_return(&mut self, value: Option<Value>) {
        if let Some(v) = value {
            let ty = self.module.value_type(v);
            if self.ctx.types().is_float(ty) {
                if self.is64() {
                    self.mat_float(v, 0);
                } else {
                    // cdecl returns floats on the x87 stack.
                    self.x87_load(v);
                }
            } else if !self.ctx.types().is_void(ty) {
                self.mat_int(v, 0);
            }
        }
        self.line("leave");
        self.line("ret");
    }

    /// Push a float value onto the x87 stack (32-bit float return path).
    fn x87_load(&mut self, v: Value) {
        let ty = self.module.value_type(v);
        let mnem = if ty == types::F32 { "flds" } else { "fldl" };
        match &self.module.value(v).kind {
            ValueKind::ConstFloat(bits) => {
                let (bits, size) = if ty == types::F32 {
                    (u64::from((f64::from_bits(*bits) as f32).to_bits()), 4)
                } else {
                    (*bits, 8)
                };
                let label = self.be.float_label(bits, size);
                self.line(&format!("{mnem}\t{label}"));
            }
            ValueKind::Param { .. } => {
                if let Some(off) = self.frame.param_slot(v) {
                    let addr = self.slot_addr(off);
                    self.line(&format!("{mnem}\t{addr}"));
                }
            }
            ValueKind::InstResult(inst) => {
                if let Some(off) = self.frame.temp_slot(*inst) {
                    let addr = self.slot_addr(off);
                    self.line(&format!("{mnem}\t{addr}"));
                }
            }
            _ => self.unsupported("operand in float context"),
        }
    }

    // ------------------------------------------------------------------
    // Per-instruction emission.

    fn inst(&mut self, inst: Inst) {
        let data = self.module.inst(inst).clone();
        match data {
            InstructionData::Binary { opcode, args } => self.binary(inst, opcode, args),
            InstructionData::Unary { opcode, arg } => self.unary(inst, opcode, arg),
            InstructionData::IntCompare { cond, args } => self.icmp(inst, cond, args),
            InstructionData::FloatCompare { cond, args } => self.fcmp(inst, cond, args),
            InstructionData::Conversion { opcode, arg } => self.conversion(inst, opcode, arg),
            InstructionData::StackAlloc { .. } => self.stack_alloc(inst),
            InstructionData::Load { ptr } => self.load(inst, ptr),
            InstructionData::Store { args } => self.store(args[0], args[1]),
            InstructionData::ElemAddr { elem_ty, args } => self.elem_addr(inst, elem_ty, &args),
            InstructionData::FieldAddr {
                struct_ty,
                field,
                base,
            } => self.field_addr(inst, struct_ty, field, base),
            InstructionData::Call { sig, args } => self.call(inst, sig, &args),
            InstructionData::Jump { dest } => self.jump(inst, dest),
            InstructionData::Brif { cond, dests } => self.brif(inst, cond, dests),
            InstructionData::Return { arg } => self.epilogue_return(arg),
            InstructionData::Phi { .. } => {
                // Incoming values are stored to this phi's temp by each
                // predecessor; nothing to compute here.
            }
            InstructionData::Select { args } => self.select(inst, args),
        }
    }

    fn int_type_ok(&mut self, ty: Type) -> bool {
        if self.ctx.size_of(ty) == 8 && !self.is64() {
            self.unsupported("64-bit integer operation on 32-bit target");
            return false;
        }
        true
    }

    fn binary(&mut self, inst: Inst, opcode: Opcode, args: [Value; 2]) {
        let ty = self.module.value_type(args[0]);
        if self.ctx.types().is_float(ty) {
            let mnem = match (opcode, ty == types::F32) {
                (Opcode::Fadd, false) => "addsd",
                (Opcode::Fadd, true) => "addss",
                (Opcode::Fsub, false) => "subsd",
                (Opcode::Fsub, true) => "subss",
                (Opcode::Fmul, false) => "mulsd",
                (Opcode::Fmul, true) => "mulss",
                (Opcode::Fdiv, false) => "divsd",
                (Opcode::Fdiv, true) => "divss",
                _ => {
                    self.unsupported(opcode.name());
                    return;
                }
            };
            self.mat_float(args[0], 0);
            self.mat_float(args[1], 1);
            self.line(&format!("{mnem}\t%xmm1, %xmm0"));
            self.store_result_xmm(inst);
            return;
        }
        if !self.int_type_ok(ty) {
            return;
        }
        let rsize = self.reg_size(ty);
        let (a, c) = (gpr(0, rsize), gpr(1, rsize));
        let s = suffix(rsize);
        self.mat_int(args[0], 0);
        self.mat_int(args[1], 1);
        match opcode {
            Opcode::Iadd => self.line(&format!("add{s}\t%{c}, %{a}")),
            Opcode::Isub => self.line(&format!("sub{s}\t%{c}, %{a}")),
            Opcode::Imul => self.line(&format!("imul{s}\t%{c}, %{a}")),
            Opcode::Band => self.line(&format!("and{s}\t%{c}, %{a}")),
            Opcode::Bor => self.line(&format!("or{s}\t%{c}, %{a}")),
            Opcode::Bxor => self.line(&format!("xor{s}\t%{c}, %{a}")),
            Opcode::Sdiv | Opcode::Srem => {
                self.line(if rsize == 8 { "cqto" } else { "cltd" });
                self.line(&format!("idiv{s}\t%{c}"));
                if opcode == Opcode::Srem {
                    self.line(&format!("mov{}\t%{}, %{}", s, gpr(2, rsize), a));
                }
            }
            Opcode::Udiv | Opcode::Urem => {
                self.line(&format!("xorl\t%{0}, %{0}", GPR32[2]));
                self.line(&format!("div{s}\t%{c}"));
                if opcode == Opcode::Urem {
                    self.line(&format!("mov{}\t%{}, %{}", s, gpr(2, rsize), a));
                }
            }
            Opcode::Ishl | Opcode::Ushr | Opcode::Sshr => {
                let mnem = match opcode {
                    Opcode::Ishl => "shl",
                    Opcode::Ushr => "shr",
                    _ => "sar",
                };
                self.line(&format!("{mnem}{s}\t%cl, %{a}"));
            }
            _ => self.unsupported(opcode.name()),
        }
        self.store_result_gpr(inst);
    }

    fn unary(&mut self, inst: Inst, opcode: Opcode, arg: Value) {
        let ty = self.module.value_type(arg);
        match opcode {
            Opcode::Ineg | Opcode::Bnot => {
                if !self.int_type_ok(ty) {
                    return;
                }
                let rsize = self.reg_size(ty);
                self.mat_int(arg, 0);
                let mnem = if opcode == Opcode::Ineg { "neg" } else { "not" };
                self.line(&format!("{}{}\t%{}", mnem, suffix(rsize), gpr(0, rsize)));
                self.store_result_gpr(inst);
            }
            Opcode::Fneg | Opcode::Fabs => {
                let f32ty = ty == types::F32;
                self.mat_float(arg, 0);
                let mask: u64 = match (opcode, f32ty) {
                    (Opcode::Fneg, true) => 0x8000_0000,
                    (Opcode::Fneg, false) => 0x8000_0000_0000_0000,
                    (Opcode::Fabs, true) => 0x7fff_ffff,
                    (_, false) => 0x7fff_ffff_ffff_ffff,
                    _ => unreachable!(),
                };
                let op = match (opcode, f32ty) {
                    (Opcode::Fneg, true) => "xorps",
                    (Opcode::Fneg, false) => "xorpd",
                    (Opcode::Fabs, true) => "andps",
                    (_, false) => "andpd",
                    _ => unreachable!(),
                };
                if self.is64() {
                    self.line(&format!("movabsq\t${mask}, %rax"));
                    self.line("movq\t%rax, %xmm1");
                } else {
                    // Build the mask through the literal pool on 32-bit.
                    let size = if f32ty { 4 } else { 8 };
                    let label = self.be.float_label(mask, size);
                    let mnem = if f32ty { "movss" } else { "movsd" };
                    self.line(&format!("{mnem}\t{label}, %xmm1"));
                }
                self.line(&format!("{op}\t%xmm1, %xmm0"));
                self.store_result_xmm(inst);
            }
            _ => self.unsupported(opcode.name()),
        }
    }

    fn icmp(&mut self, inst: Inst, cond: IntCC, args: [Value; 2]) {
        let ty = self.module.value_type(args[0]);
        if !self.int_type_ok(ty) {
            return;
        }
        let rsize = self.reg_size(ty);
        self.mat_int(args[0], 0);
        self.mat_int(args[1], 1);
        self.line(&format!(
            "cmp{}\t%{}, %{}",
            suffix(rsize),
            gpr(1, rsize),
            gpr(0, rsize)
        ));
        let set = match cond {
            IntCC::Equal => "sete",
            IntCC::NotEqual => "setne",
            IntCC::SignedLessThan => "setl",
            IntCC::SignedLessThanOrEqual => "setle",
            IntCC::SignedGreaterThan => "setg",
            IntCC::SignedGreaterThanOrEqual => "setge",
            IntCC::UnsignedLessThan => "setb",
            IntCC::UnsignedLessThanOrEqual => "setbe",
            IntCC::UnsignedGreaterThan => "seta",
            IntCC::UnsignedGreaterThanOrEqual => "setae",
        };
        self.line(&format!("{set}\t%al"));
        self.store_result_gpr(inst);
    }

    fn fcmp(&mut self, inst: Inst, cond: FloatCC, args: [Value; 2]) {
        let ty = self.module.value_type(args[0]);
        let cmp = if ty == types::F32 { "ucomiss" } else { "ucomisd" };
        // Compare operand order is arranged so the plain above/below
        // conditions are NaN-correct.
        let (x, y, set) = match cond {
            FloatCC::GreaterThan => (0, 1, "seta"),
            FloatCC::GreaterThanOrEqual => (0, 1, "setae"),
            FloatCC::LessThan => (1, 0, "seta"),
            FloatCC::LessThanOrEqual => (1, 0, "setae"),
            FloatCC::Equal | FloatCC::NotEqual => (0, 1, ""),
        };
        self.mat_float(args[x], 0);
        self.mat_float(args[y], 1);
        self.line(&format!("{cmp}\t%xmm1, %xmm0"));
        match cond {
            FloatCC::Equal => {
                self.line("setnp\t%al");
                self.line("sete\t%cl");
                self.line("andb\t%cl, %al");
            }
            FloatCC::NotEqual => {
                self.line("setp\t%al");
                self.line("setne\t%cl");
                self.line("orb\t%cl, %al");
            }
            _ => self.line(&format!("{set}\t%al")),
        }
        self.store_result_gpr(inst);
    }

    fn conversion(&mut self, inst: Inst, opcode: Opcode, arg: Value) {
        let result = match self.module.inst_result(inst) {
            Some(r) => r,
            None => return,
        };
        let to = self.module.value_type(result);
        let from = self.module.value_type(arg);
        match opcode {
            Opcode::Ireduce | Opcode::Bitcast | Opcode::PtrToInt | Opcode::IntToPtr => {
                if self.ctx.types().is_float(from) || self.ctx.types().is_float(to) {
                    // A bitcast between register files moves through memory
                    // (the slots already provide the memory).
                    if self.ctx.types().is_float(from) {
                        self.mat_float(arg, 0);
                        let mnem = if from == types::F32 { "movd" } else { "movq" };
                        let rsize = self.reg_size(to);
                        self.line(&format!("{}\t%xmm0, %{}", mnem, gpr(0, rsize)));
                        self.store_result_gpr(inst);
                    } else {
                        self.mat_int(arg, 0);
                        let mnem = if to == types::F32 { "movd" } else { "movq" };
                        let rsize = self.reg_size(from);
                        self.line(&format!("{}\t%{}, %xmm0", mnem, gpr(0, rsize)));
                        self.store_result_xmm(inst);
                    }
                    return;
                }
                if !self.int_type_ok(to) || !self.int_type_ok(from) {
                    return;
                }
                self.mat_int(arg, 0);
                self.store_result_gpr(inst);
            }
            Opcode::Uextend | Opcode::Sextend => {
                if !self.int_type_ok(to) {
                    return;
                }
                // The slot load already extends by the source signedness;
                // re-extend per the requested operation.
                self.mat_int(arg, 0);
                let fs = self.ctx.size_of(from);
                let rsize = self.reg_size(to);
                match (opcode, fs) {
                    (Opcode::Uextend, 1) => {
                        self.line(&format!("movzb{}\t%al, %{}", suffix(rsize), gpr(0, rsize)))
                    }
                    (Opcode::Uextend, 2) => {
                        self.line(&format!("movzw{}\t%ax, %{}", suffix(rsize), gpr(0, rsize)))
                    }
                    (Opcode::Uextend, 4) if rsize == 8 => self.line("movl\t%eax, %eax"),
                    (Opcode::Sextend, 1) => {
                        self.line(&format!("movsb{}\t%al, %{}", suffix(rsize), gpr(0, rsize)))
                    }
                    (Opcode::Sextend, 2) => {
                        self.line(&format!("movsw{}\t%ax, %{}", suffix(rsize), gpr(0, rsize)))
                    }
                    (Opcode::Sextend, 4) if rsize == 8 => self.line("movslq\t%eax, %rax"),
                    _ => {}
                }
                self.store_result_gpr(inst);
            }
            Opcode::Fpromote => {
                self.mat_float(arg, 0);
                self.line("cvtss2sd\t%xmm0, %xmm0");
                self.store_result_xmm(inst);
            }
            Opcode::Fdemote => {
                self.mat_float(arg, 0);
                self.line("cvtsd2ss\t%xmm0, %xmm0");
                self.store_result_xmm(inst);
            }
            Opcode::FcvtFromSint | Opcode::FcvtFromUint => {
                if !self.int_type_ok(from) {
                    return;
                }
                self.mat_int(arg, 0);
                let rsize = self.reg_size(from);
                let mnem = if to == types::F32 { "cvtsi2ss" } else { "cvtsi2sd" };
                if opcode == Opcode::FcvtFromUint && rsize == 4 && self.is64() {
                    // Zero-extend and convert from 64 bits so the full
                    // unsigned range is exact.
                    self.line("movl\t%eax, %eax");
                    self.line(&format!("{mnem}q\t%rax, %xmm0"));
                } else {
                    self.line(&format!("{}{}\t%{}, %xmm0", mnem, suffix(rsize), gpr(0, rsize)));
                }
                self.store_result_xmm(inst);
            }
            Opcode::FcvtToSint | Opcode::FcvtToUint => {
                if !self.int_type_ok(to) {
                    return;
                }
                self.mat_float(arg, 0);
                let rsize = self.reg_size(to);
                let mnem = if from == types::F32 { "cvttss2si" } else { "cvttsd2si" };
                self.line(&format!("{}{}\t%xmm0, %{}", mnem, suffix(rsize), gpr(0, rsize)));
                self.store_result_gpr(inst);
            }
            _ => self.unsupported(opcode.name()),
        }
    }

    fn stack_alloc(&mut self, inst: Inst) {
        if let Some(off) = self.frame.alloca_slot(inst) {
            let disp = self.slot_disp(off);
            if self.is64() {
                self.line(&format!("leaq\t{}(%rbp), %rax", disp));
            } else {
                self.line(&format!("leal\t{}(%ebp), %eax", disp));
            }
            self.store_result_gpr(inst);
        }
    }

    fn load(&mut self, inst: Inst, ptr: Value) {
        let result = match self.module.inst_result(inst) {
            Some(r) => r,
            None => return,
        };
        let ty = self.module.value_type(result);
        if self.ctx.types().is_float(ty) {
            self.mat_int(ptr, 1);
            let mnem = if ty == types::F32 { "movss" } else { "movsd" };
            let c = gpr(1, self.word());
            self.line(&format!("{mnem}\t(%{c}), %xmm0"));
            self.store_result_xmm(inst);
            return;
        }
        if !self.int_type_ok(ty) {
            return;
        }
        self.mat_int(ptr, 1);
        let c = gpr(1, self.word());
        let size = self.ctx.size_of(ty);
        let signed = self.ctx.types().is_signed(ty);
        let rsize = self.reg_size(ty);
        let a = gpr(0, rsize);
        match (size, signed) {
            (1, true) => self.line(&format!("movsb{}\t(%{}), %{}", suffix(rsize), c, a)),
            (1, false) => self.line(&format!("movzb{}\t(%{}), %{}", suffix(rsize), c, a)),
            (2, true) => self.line(&format!("movsw{}\t(%{}), %{}", suffix(rsize), c, a)),
            (2, false) => self.line(&format!("movzw{}\t(%{}), %{}", suffix(rsize), c, a)),
            _ => self.line(&format!("mov{}\t(%{}), %{}", suffix(rsize), c, a)),
        }
        self.store_result_gpr(inst);
    }

    fn store(&mut self, value: Value, ptr: Value) {
        let ty = self.module.value_type(value);
        if self.ctx.types().is_float(ty) {
            self.mat_float(value, 0);
            self.mat_int(ptr, 1);
            let mnem = if ty == types::F32 { "movss" } else { "movsd" };
            let c = gpr(1, self.word());
            self.line(&format!("{mnem}\t%xmm0, (%{c})"));
            return;
        }
        if !self.int_type_ok(ty) {
            return;
        }
        self.mat_int(value, 0);
        self.mat_int(ptr, 1);
        let size = self.ctx.size_of(ty);
        let c = gpr(1, self.word());
        self.line(&format!("mov{}\t%{}, (%{})", suffix(size), gpr(0, size), c));
    }

    fn elem_addr(&mut self, inst: Inst, elem_ty: Type, args: &[Value]) {
        let word = self.word();
        self.mat_int(args[0], 0);
        let mut cur_ty = elem_ty;
        for (n, &index) in args[1..].iter().enumerate() {
            if n > 0 {
                cur_ty = match self.ctx.types().array_info(cur_ty) {
                    Some((elem, _)) => elem,
                    None => cur_ty,
                };
            }
            let size = self.ctx.size_of(cur_ty).max(1);
            // The index may be narrower than a pointer; the slot load
            // already sign- or zero-extended it.
            self.mat_int(index, 1);
            let c = gpr(1, word);
            if size.is_power_of_two() {
                if size > 1 {
                    self.line(&format!(
                        "shl{}\t${}, %{}",
                        suffix(word),
                        size.trailing_zeros(),
                        c
                    ));
                }
            } else {
                self.line(&format!("imul{}\t${}, %{}", suffix(word), size, c));
            }
            self.line(&format!("add{}\t%{}, %{}", suffix(word), c, gpr(0, word)));
        }
        self.store_result_gpr(inst);
    }

    fn field_addr(&mut self, inst: Inst, struct_ty: Type, field: u32, base: Value) {
        let offset = self
            .ctx
            .types()
            .struct_info(struct_ty)
            .and_then(|(_, offsets)| offsets.get(field as usize).copied())
            .unwrap_or(0);
        self.mat_int(base, 0);
        if offset > 0 {
            let word = self.word();
            self.line(&format!("add{}\t${}, %{}", suffix(word), offset, gpr(0, word)));
        }
        self.store_result_gpr(inst);
    }

    fn call(&mut self, inst: Inst, sig: Type, args: &[Value]) {
        let callee = args[0];
        let actuals = &args[1..];
        if self.is64() {
            let mut next_int = 0usize;
            let mut next_float = 0u32;
            let mut stack_off = 0u32;
            for &arg in actuals {
                let ty = self.module.value_type(arg);
                if self.ctx.types().is_float(ty) {
                    if next_float < 8 {
                        self.mat_float(arg, next_float);
                        next_float += 1;
                    } else {
                        self.mat_float(arg, 8);
                        let mnem = if ty == types::F32 { "movss" } else { "movsd" };
                        self.line(&format!("{mnem}\t%xmm8, {stack_off}(%rsp)"));
                        stack_off += 8;
                    }
                } else if next_int < 6 {
                    self.mat_int(arg, 0);
                    let size = self.reg_size(ty);
                    let dst = if size == 8 { ARG64[next_int] } else { ARG32[next_int] };
                    self.line(&format!("mov{}\t%{}, %{}", suffix(size), gpr(0, size), dst));
                    next_int += 1;
                } else {
                    self.mat_int(arg, 0);
                    self.line(&format!("movq\t%rax, {stack_off}(%rsp)"));
                    stack_off += 8;
                }
            }
            match &self.module.value(callee).kind {
                ValueKind::FuncAddr(f) => {
                    let name = sym(self.abi, &self.module.func(*f).name);
                    if self
                        .ctx
                        .types()
                        .func_info(sig)
                        .map(|(_, _, variadic)| variadic)
                        .unwrap_or(false)
                    {
                        // Variadic calls advertise the number of vector regs
                        // used.
                        self.line(&format!("movl\t${next_float}, %eax"));
                    }
                    self.line(&format!("call\t{name}"));
                }
                _ => {
                    // Args are in place; use a scratch register the ABI
                    // leaves free.
                    self.mat_int(callee, 0);
                    self.line("movq\t%rax, %r10");
                    self.line("call\t*%r10");
                }
            }
        } else {
            let mut stack_off = 0u32;
            for &arg in actuals {
                let ty = self.module.value_type(arg);
                if self.ctx.types().is_float(ty) {
                    self.mat_float(arg, 0);
                    let mnem = if ty == types::F32 { "movss" } else { "movsd" };
                    self.line(&format!("{mnem}\t%xmm0, {stack_off}(%esp)"));
                    stack_off += self.ctx.size_of(ty).max(4);
                } else if self.ctx.size_of(ty) == 8 {
                    self.unsupported("64-bit integer argument on 32-bit target");
                    stack_off += 8;
                } else {
                    self.mat_int(arg, 0);
                    self.line(&format!("movl\t%eax, {stack_off}(%esp)"));
                    stack_off += 4;
                }
            }
            match &self.module.value(callee).kind {
                ValueKind::FuncAddr(f) => {
                    let name = sym(self.abi, &self.module.func(*f).name);
                    self.line(&format!("call\t{name}"));
                }
                _ => {
                    self.mat_int(callee, 1);
                    self.line("call\t*%ecx");
                }
            }
        }
        // Commit the return value.
        if let Some(result) = self.module.inst_result(inst) {
            let ty = self.module.value_type(result);
            if self.ctx.types().is_float(ty) {
                if self.is64() {
                    self.store_result_xmm(inst);
                } else if let Some(off) = self.frame.temp_slot(inst) {
                    let mnem = if ty == types::F32 { "fstps" } else { "fstpl" };
                    let addr = self.slot_addr(off);
                    self.line(&format!("{mnem}\t{addr}"));
                }
            } else {
                self.store_result_gpr(inst);
            }
        }
    }

    /// Emit the phi moves for the edge from the current block to `dest`,
    /// then return the label to branch to (a stub label when moves exist).
    fn edge_target(&mut self, from_inst: Inst, dest: Block) -> (String, Option<(String, Block, Vec<(Inst, Value)>)>) {
        let from_block = self.module.inst_block(from_inst).expect("inserted inst");
        let mut moves: Vec<(Inst, Value)> = Vec::new();
        for &inst in &self.module.block(dest).insts {
            if let InstructionData::Phi { args, preds } = self.module.inst(inst) {
                for (&v, &p) in args.iter().zip(preds.iter()) {
                    if p == from_block {
                        moves.push((inst, v));
                    }
                }
            }
        }
        let direct = block_label(self.module, self.func, dest);
        if moves.is_empty() {
            (direct, None)
        } else {
            let stub = self.be.local_label("edge");
            (stub.clone(), Some((stub, dest, moves)))
        }
    }

    fn emit_stub(&mut self, stub: (String, Block, Vec<(Inst, Value)>)) {
        let (label, dest, moves) = stub;
        let _ = writeln!(self.out, "{label}:");
        for (phi, value) in moves {
            self.store_phi_move(phi, value);
        }
        let target = block_label(self.module, self.func, dest);
        self.line(&format!("jmp\t{target}"));
    }

    fn jump(&mut self, inst: Inst, dest: Block) {
        let (target, stub) = self.edge_target(inst, dest);
        match stub {
            // A single unconditional edge needs no trampoline; store the
            // phi moves inline.
            Some((_, _, moves)) => {
                for (phi, value) in moves {
                    self.store_phi_move(phi, value);
                }
                let direct = block_label(self.module, self.func, dest);
                self.line(&format!("jmp\t{direct}"));
            }
            None => self.line(&format!("jmp\t{target}")),
        }
    }

    fn brif(&mut self, inst: Inst, cond: Value, dests: [Block; 2]) {
        self.mat_int(cond, 0);
        if self.module.value_is_bool(cond) {
            self.line("testb\t%al, %al");
        } else {
            let rsize = self.reg_size(self.module.value_type(cond));
            self.line(&format!("cmp{}\t$0, %{}", suffix(rsize), gpr(0, rsize)));
        }
        let (then_target, then_stub) = self.edge_target(inst, dests[0]);
        let (else_target, else_stub) = self.edge_target(inst, dests[1]);
        self.line(&format!("jne\t{then_target}"));
        self.line(&format!("jmp\t{else_target}"));
        if let Some(stub) = then_stub {
            self.emit_stub(stub);
        }
        if let Some(stub) = else_stub {
            self.emit_stub(stub);
        }
    }

    fn select(&mut self, inst: Inst, args: [Value; 3]) {
        let ty = self.module.value_type(args[1]);
        if self.ctx.types().is_float(ty) {
            // No conditional move between XMM registers; branch.
            let other = self.be.local_label("sel");
            let done = self.be.local_label("seldone");
            self.mat_int(args[0], 0);
            self.line("testb\t%al, %al");
            self.line(&format!("je\t{other}"));
            self.mat_float(args[1], 0);
            self.line(&format!("jmp\t{done}"));
            let _ = writeln!(self.out, "{other}:");
            self.mat_float(args[2], 0);
            let _ = writeln!(self.out, "{done}:");
            self.store_result_xmm(inst);
            return;
        }
        if !self.int_type_ok(ty) {
            return;
        }
        let rsize = self.reg_size(ty).max(4);
        // Conditional select: hardware CMOV when the CPU has it, a branch
        // pair otherwise.
        if self.is64() || self.ctx.has_feature(CpuFeatures::CMOV) {
            self.mat_int(args[2], 0);
            self.mat_int(args[1], 1);
            self.mat_int(args[0], 2);
            self.line("testb\t%dl, %dl");
            self.line(&format!("cmovne{}\t%{}, %{}", suffix(rsize), gpr(1, rsize), gpr(0, rsize)));
        } else {
            let other = self.be.local_label("sel");
            let done = self.be.local_label("seldone");
            self.mat_int(args[0], 0);
            self.line("testb\t%al, %al");
            self.line(&format!("je\t{other}"));
            self.mat_int(args[1], 0);
            self.line(&format!("jmp\t{done}"));
            let _ = writeln!(self.out, "{other}:");
            self.mat_int(args[2], 0);
            let _ = writeln!(self.out, "{done}:");
        }
        self.store_result_gpr(inst);
    }
}

impl X86Backend {
    fn emit_data(&mut self, ctx: &Context, module: &Module, out: &mut String) {
        let abi = ctx.abi();
        let globals: Vec<_> = module.globals().collect();
        if !globals.is_empty() {
            out.push_str("\n\t.data\n");
            for gv in globals {
                let data = module.global(gv);
                let name = sym(abi, &data.name);
                let align = ctx.align_of(data.ty).max(1);
                if data.linkage == crate::ir::function::Linkage::External {
                    let _ = writeln!(out, "\t.globl\t{name}");
                }
                let _ = writeln!(out, "\t.align\t{align}");
                let _ = writeln!(out, "{name}:");
                match &data.init {
                    Some(init) => self.emit_init(ctx, module, out, *init, data.ty),
                    None => {
                        let _ = writeln!(out, "\t.zero\t{}", ctx.size_of(data.ty).max(1));
                    }
                }
            }
        }
        if !self.string_order.is_empty() || !self.float_order.is_empty() {
            match abi {
                Abi::Darwin => out.push_str("\n\t.section\t__TEXT,__const\n"),
                Abi::SysV => out.push_str("\n\t.section\t.rodata\n"),
            }
            let strings = core::mem::take(&mut self.string_order);
            for (label, id) in &strings {
                let _ = writeln!(out, "{label}:");
                let _ = writeln!(out, "\t.asciz\t\"{}\"", escape_gnu(module.string(*id)));
            }
            self.string_order = strings;
            let floats = core::mem::take(&mut self.float_order);
            for (label, bits, size) in &floats {
                let _ = writeln!(out, "\t.align\t{size}");
                let _ = writeln!(out, "{label}:");
                if *size == 4 {
                    let _ = writeln!(out, "\t.long\t{}", *bits as u32);
                } else {
                    let _ = writeln!(out, "\t.quad\t{bits}");
                }
            }
            self.float_order = floats;
        }
    }

    fn emit_init(&mut self, ctx: &Context, module: &Module, out: &mut String, init: Value, ty: Type) {
        match &module.value(init).kind {
            ValueKind::ConstInt(v) => {
                let directive = match ctx.size_of(ty) {
                    1 => ".byte",
                    2 => ".short",
                    4 => ".long",
                    _ => ".quad",
                };
                let _ = writeln!(out, "\t{directive}\t{v}");
            }
            ValueKind::ConstFloat(bits) => {
                if ctx.size_of(ty) == 4 {
                    let _ = writeln!(out, "\t.long\t{}", (f64::from_bits(*bits) as f32).to_bits());
                } else {
                    let _ = writeln!(out, "\t.quad\t{bits}");
                }
            }
            ValueKind::ConstNull => {
                let _ = writeln!(out, "\t.zero\t{}", ctx.size_of(ty).max(1));
            }
            ValueKind::ConstString(id) => {
                if ctx.types().array_info(ty).is_some() {
                    let _ = writeln!(out, "\t.asciz\t\"{}\"", escape_gnu(module.string(*id)));
                } else {
                    let label = self.string_label(*id);
                    let directive = if self.is64() { ".quad" } else { ".long" };
                    let _ = writeln!(out, "\t{directive}\t{label}");
                }
            }
            ValueKind::ConstArray(elems) => {
                let elem_ty = ctx
                    .types()
                    .array_info(ty)
                    .map(|(elem, _)| elem)
                    .unwrap_or(ty);
                for &elem in elems {
                    self.emit_init(ctx, module, out, elem, elem_ty);
                }
            }
            _ => {
                let _ = writeln!(out, "\t# anvil: unsupported initializer");
            }
        }
    }
}

/// Escape a string for a GNU `.asciz` directive.
fn escape_gnu(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out
}
