//! PowerPC lowering: 32-bit SysV, 64-bit big-endian ELFv1 (function
//! descriptors and TOC), 64-bit little-endian ELFv2 (localentry).
//!
//! Work registers are `r11`/`r12`/`r10` and `f0`/`f12`. The TOC pointer is
//! saved in the caller's linkage slot in the prologue, direct calls are
//! followed by the linker's `nop` restore site, and indirect calls restore
//! `r2` explicitly, per the ELF conventions.

use crate::context::Context;
use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::entities::{Block, Func, Inst, StringId, Type, Value};
use crate::ir::instructions::{InstructionData, Opcode};
use crate::ir::module::{Module, ValueKind};
use crate::ir::types;
use crate::ir::verify::verify_function;
use crate::isa::frame::FrameLayout;
use crate::isa::{ArchInfo, Endianness, StackDirection, TargetBackend};
use crate::result::CodegenResult;
use crate::settings::{Arch, CpuFeatures};
use core::fmt::Write as _;
use rustc_hash::FxHashMap;

static PPC32_INFO: ArchInfo = ArchInfo {
    name: "ppc32",
    pointer_width: 32,
    word_size: 4,
    gpr_count: 32,
    fpr_count: 32,
    endianness: Endianness::Big,
    stack_direction: StackDirection::Down,
    has_condition_codes: true,
    has_delay_slots: false,
};

static PPC64_INFO: ArchInfo = ArchInfo {
    name: "ppc64",
    pointer_width: 64,
    word_size: 8,
    gpr_count: 32,
    fpr_count: 32,
    endianness: Endianness::Big,
    stack_direction: StackDirection::Down,
    has_condition_codes: true,
    has_delay_slots: false,
};

static PPC64LE_INFO: ArchInfo = ArchInfo {
    name: "ppc64le",
    pointer_width: 64,
    word_size: 8,
    gpr_count: 32,
    fpr_count: 32,
    endianness: Endianness::Little,
    stack_direction: StackDirection::Down,
    has_condition_codes: true,
    has_delay_slots: false,
};

pub(crate) fn backend(arch: Arch) -> Box<dyn TargetBackend> {
    Box::new(PpcBackend {
        arch,
        strings: FxHashMap::default(),
        string_order: Vec::new(),
        float_lits: FxHashMap::default(),
        float_order: Vec::new(),
        label_count: 0,
    })
}

struct PpcBackend {
    arch: Arch,
    strings: FxHashMap<StringId, String>,
    string_order: Vec<(String, StringId)>,
    float_lits: FxHashMap<(u64, u32), String>,
    float_order: Vec<(String, u64, u32)>,
    label_count: u32,
}

impl PpcBackend {
    fn is64(&self) -> bool {
        self.arch != Arch::Ppc32
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

fn block_label(module: &Module, func: Func, block: Block) -> String {
    format!(".L{}_{}", module.func(func).name, module.block(block).name)
}

impl TargetBackend for PpcBackend {
    fn info(&self) -> &'static ArchInfo {
        match self.arch {
            Arch::Ppc32 => &PPC32_INFO,
            Arch::Ppc64 => &PPC64_INFO,
            _ => &PPC64LE_INFO,
        }
    }

    fn emit_module(&mut self, ctx: &Context, module: &Module) -> CodegenResult<String> {
        let mut out = String::new();
        let _ = writeln!(out, "\t.file\t\"{}\"", module.name);
        if self.arch == Arch::Ppc64Le {
            out.push_str("\t.abiversion 2\n");
        }
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
        let word = if self.is64() { 8 } else { 4 };
        let frame = FrameLayout::compute(ctx, module, func, word, 16);
        let mut e = Emitter {
            ctx,
            module,
            func,
            frame,
            arch: self.arch,
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
    arch: Arch,
    be: &'a mut PpcBackend,
    out: &'a mut String,
}

impl<'a> Emitter<'a> {
    fn is64(&self) -> bool {
        self.arch != Arch::Ppc32
    }

    fn word(&self) -> u32 {
        if self.is64() { 8 } else { 4 }
    }

    /// Size of the ABI linkage area at the bottom of the frame.
    fn linkage_size(&self) -> u32 {
        match self.arch {
            Arch::Ppc32 => 8,
            Arch::Ppc64 => 48,
            _ => 32,
        }
    }

    /// Linkage slot holding the caller's TOC pointer (64-bit only).
    fn toc_slot(&self) -> u32 {
        if self.arch == Arch::Ppc64 { 40 } else { 24 }
    }

    fn line(&mut self, s: &str) {
        self.out.push('\t');
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn unsupported(&mut self, what: &str) {
        let _ = writeln!(self.out, "\t# anvil: unsupported {what}");
    }

    /// r1-relative displacement of a logical locals offset.
    fn slot_disp(&self, off: u32) -> u32 {
        self.linkage_size() + self.frame.outgoing_size + off
    }

    fn frame_bytes(&self) -> u32 {
        let raw = self.linkage_size() + self.frame.outgoing_size + self.frame.locals_size;
        (raw + 15) & !15
    }

    /// Load an integer immediate into `r{reg}`.
    fn load_imm(&mut self, reg: u32, value: i64) {
        if (-0x8000..0x8000).contains(&value) {
            self.line(&format!("li\tr{reg}, {value}"));
            return;
        }
        if (i64::from(i32::MIN)..=i64::from(i32::MAX)).contains(&value) || !self.is64() {
            let hi = ((value >> 16) & 0xffff) as u16;
            let lo = (value & 0xffff) as u16;
            self.line(&format!("lis\tr{reg}, {}", hi as i16));
            if lo != 0 {
                self.line(&format!("ori\tr{reg}, r{reg}, {lo}"));
            }
            return;
        }
        // Full 64-bit build: upper half, shift, lower half.
        let v = value as u64;
        let h1 = ((v >> 48) & 0xffff) as u16;
        let h2 = ((v >> 32) & 0xffff) as u16;
        let h3 = ((v >> 16) & 0xffff) as u16;
        let h4 = (v & 0xffff) as u16;
        self.line(&format!("lis\tr{reg}, {}", h1 as i16));
        self.line(&format!("ori\tr{reg}, r{reg}, {h2}"));
        self.line(&format!("sldi\tr{reg}, r{reg}, 32"));
        if h3 != 0 {
            self.line(&format!("oris\tr{reg}, r{reg}, {h3}"));
        }
        if h4 != 0 {
            self.line(&format!("ori\tr{reg}, r{reg}, {h4}"));
        }
    }

    /// Materialize the address of `name` into `r{reg}` (TOC-relative on
    /// 64-bit, absolute hi/lo on 32-bit).
    fn load_sym(&mut self, reg: u32, name: &str) {
        if self.is64() {
            self.line(&format!("addis\tr{reg}, r2, {name}@toc@ha"));
            self.line(&format!("addi\tr{reg}, r{reg}, {name}@toc@l"));
        } else {
            self.line(&format!("lis\tr{reg}, {name}@ha"));
            self.line(&format!("addi\tr{reg}, r{reg}, {name}@l"));
        }
    }

    /// Slot load into `r{reg}` with width-correct extension.
    fn load_slot_gpr(&mut self, ty: Type, disp: u32, reg: u32) {
        let size = self.ctx.size_of(ty);
        let signed = self.ctx.types().is_signed(ty);
        match (size, signed) {
            (1, false) => self.line(&format!("lbz\tr{reg}, {disp}(r1)")),
            (1, true) => {
                self.line(&format!("lbz\tr{reg}, {disp}(r1)"));
                self.line(&format!("extsb\tr{reg}, r{reg}"));
            }
            (2, false) => self.line(&format!("lhz\tr{reg}, {disp}(r1)")),
            (2, true) => self.line(&format!("lha\tr{reg}, {disp}(r1)")),
            (4, true) if self.is64() => self.line(&format!("lwa\tr{reg}, {disp}(r1)")),
            (4, _) => self.line(&format!("lwz\tr{reg}, {disp}(r1)")),
            _ => self.line(&format!("ld\tr{reg}, {disp}(r1)")),
        }
    }

    fn mat_int(&mut self, v: Value, reg: u32) {
        let ty = self.module.value_type(v);
        match &self.module.value(v).kind {
            ValueKind::ConstInt(k) => self.load_imm(reg, *k),
            ValueKind::ConstNull => self.line(&format!("li\tr{reg}, 0")),
            ValueKind::ConstString(id) => {
                let label = self.be.string_label(*id);
                self.load_sym(reg, &label);
            }
            ValueKind::Global(gv) => {
                let name = self.module.global(*gv).name.clone();
                self.load_sym(reg, &name);
            }
            ValueKind::FuncAddr(f) => {
                let name = self.module.func(*f).name.clone();
                self.load_sym(reg, &name);
            }
            ValueKind::Param { .. } => {
                if let Some(off) = self.frame.param_slot(v) {
                    let disp = self.slot_disp(off);
                    self.load_slot_gpr(ty, disp, reg);
                }
            }
            ValueKind::InstResult(inst) => {
                if let Some(off) = self.frame.temp_slot(*inst) {
                    let disp = self.slot_disp(off);
                    self.load_slot_gpr(ty, disp, reg);
                }
            }
            ValueKind::ConstFloat(_) | ValueKind::ConstArray(_) => {
                self.unsupported("aggregate or float operand in integer context");
            }
        }
    }

    /// Materialize a float operand into `f{reg}`.
    fn mat_float(&mut self, v: Value, reg: u32) {
        let ty = self.module.value_type(v);
        let mnem = if ty == types::F32 { "lfs" } else { "lfd" };
        match &self.module.value(v).kind {
            ValueKind::ConstFloat(bits) => {
                let (bits, size) = if ty == types::F32 {
                    (u64::from((f64::from_bits(*bits) as f32).to_bits()), 4)
                } else {
                    (*bits, 8)
                };
                let label = self.be.float_label(bits, size);
                self.load_sym(12, &label);
                self.line(&format!("{mnem}\tf{reg}, 0(r12)"));
            }
            ValueKind::Param { .. } => {
                if let Some(off) = self.frame.param_slot(v) {
                    let disp = self.slot_disp(off);
                    self.line(&format!("{mnem}\tf{reg}, {disp}(r1)"));
                }
            }
            ValueKind::InstResult(inst) => {
                if let Some(off) = self.frame.temp_slot(*inst) {
                    let disp = self.slot_disp(off);
                    self.line(&format!("{mnem}\tf{reg}, {disp}(r1)"));
                }
            }
            _ => self.unsupported("operand in float context"),
        }
    }

    fn store_gpr_to_slot(&mut self, size: u32, disp: u32, reg: u32) {
        match size {
            1 => self.line(&format!("stb\tr{reg}, {disp}(r1)")),
            2 => self.line(&format!("sth\tr{reg}, {disp}(r1)")),
            4 => self.line(&format!("stw\tr{reg}, {disp}(r1)")),
            _ => self.line(&format!("std\tr{reg}, {disp}(r1)")),
        }
    }

    fn store_result_gpr(&mut self, inst: Inst, reg: u32) {
        if let (Some(result), Some(off)) = (self.module.inst_result(inst), self.frame.temp_slot(inst)) {
            let size = self.ctx.size_of(self.module.value_type(result));
            if size == 8 && !self.is64() {
                self.unsupported("64-bit result on 32-bit target");
                return;
            }
            let disp = self.slot_disp(off);
            self.store_gpr_to_slot(size, disp, reg);
        }
    }

    fn store_result_fpr(&mut self, inst: Inst, reg: u32) {
        if let (Some(result), Some(off)) = (self.module.inst_result(inst), self.frame.temp_slot(inst)) {
            let mnem = if self.module.value_type(result) == types::F32 {
                "stfs"
            } else {
                "stfd"
            };
            let disp = self.slot_disp(off);
            self.line(&format!("{mnem}\tf{reg}, {disp}(r1)"));
        }
    }

    fn store_phi_move(&mut self, phi_inst: Inst, value: Value) {
        let off = match self.frame.temp_slot(phi_inst) {
            Some(off) => off,
            None => return,
        };
        let disp = self.slot_disp(off);
        let ty = self.module.value_type(value);
        if self.ctx.types().is_float(ty) {
            self.mat_float(value, 0);
            let mnem = if ty == types::F32 { "stfs" } else { "stfd" };
            self.line(&format!("{mnem}\tf0, {disp}(r1)"));
        } else {
            let size = self.ctx.size_of(ty);
            if size == 8 && !self.is64() {
                self.unsupported("64-bit phi move on 32-bit target");
                return;
            }
            self.mat_int(value, 11);
            self.store_gpr_to_slot(size, disp, 11);
        }
    }

    // ------------------------------------------------------------------

    fn function(&mut self) {
        let data = self.module.func(self.func);
        let name = data.name.clone();
        let blocks = data.blocks.clone();
        let external = data.linkage == crate::ir::function::Linkage::External;
        self.out.push('\n');
        match self.arch {
            Arch::Ppc64 => {
                // ELFv1 function descriptor in .opd; code at the local
                // entry label.
                if external {
                    self.line(&format!(".globl\t{name}"));
                }
                self.line(".section\t\".opd\",\"aw\"");
                self.line(".align\t3");
                let _ = writeln!(self.out, "{name}:");
                self.line(&format!(".quad\t.L.{name},.TOC.@tocbase,0"));
                self.line(".previous");
                self.line(&format!(".type\t{name}, @function"));
                let _ = writeln!(self.out, ".L.{name}:");
            }
            Arch::Ppc64Le => {
                if external {
                    self.line(&format!(".globl\t{name}"));
                }
                self.line(&format!(".type\t{name}, @function"));
                let _ = writeln!(self.out, "{name}:");
                self.line(&format!("addis\tr2, r12, .TOC.-{name}@ha"));
                self.line(&format!("addi\tr2, r2, .TOC.-{name}@l"));
                self.line(&format!(".localentry\t{name}, .-{name}"));
            }
            _ => {
                if external {
                    self.line(&format!(".globl\t{name}"));
                }
                self.line(&format!(".type\t{name}, @function"));
                let _ = writeln!(self.out, "{name}:");
            }
        }

        let fb = self.frame_bytes();
        self.line("mflr\tr0");
        if self.is64() {
            self.line(&format!("stdu\tr1, -{fb}(r1)"));
            self.line(&format!("std\tr0, {}(r1)", fb + 16));
            // Save the TOC pointer in our linkage area so post-call
            // restore sites can reload it.
            self.line(&format!("std\tr2, {}(r1)", self.toc_slot()));
        } else {
            self.line(&format!("stwu\tr1, -{fb}(r1)"));
            self.line(&format!("stw\tr0, {}(r1)", fb + 4));
        }
        self.spill_params();

        for (i, &block) in blocks.iter().enumerate() {
            let label = block_label(self.module, self.func, block);
            let _ = writeln!(self.out, "{label}:");
            let insts = self.module.block(block).insts.clone();
            for inst in insts {
                self.inst(inst);
            }
            if i + 1 == blocks.len() && !self.module.is_terminated(block) {
                self.implicit_return();
            }
        }
    }

    fn spill_params(&mut self) {
        let params = self.module.func(self.func).params.clone();
        let mut next_int = 3u32;
        let mut next_float = 1u32;
        let max_float = if self.is64() { 13 } else { 8 };
        let mut caller_off = self.frame_bytes() + self.linkage_size();
        for &p in &params {
            let ty = self.module.value_type(p);
            let off = match self.frame.param_slot(p) {
                Some(off) => off,
                None => continue,
            };
            let disp = self.slot_disp(off);
            if self.ctx.types().is_float(ty) {
                if next_float <= max_float {
                    let mnem = if ty == types::F32 { "stfs" } else { "stfd" };
                    self.line(&format!("{mnem}\tf{next_float}, {disp}(r1)"));
                    next_float += 1;
                } else {
                    self.line(&format!("lfd\tf0, {caller_off}(r1)"));
                    self.line(&format!("stfd\tf0, {disp}(r1)"));
                    caller_off += 8;
                }
            } else if next_int <= 10 {
                let size = self.ctx.size_of(ty);
                if size == 8 && !self.is64() {
                    self.unsupported("64-bit integer parameter on 32-bit target");
                    next_int += 1;
                    continue;
                }
                self.store_gpr_to_slot(size.max(self.word()), disp, next_int);
                next_int += 1;
            } else {
                let w = self.word();
                if w == 8 {
                    self.line(&format!("ld\tr11, {caller_off}(r1)"));
                } else {
                    self.line(&format!("lwz\tr11, {caller_off}(r1)"));
                }
                self.store_gpr_to_slot(w, disp, 11);
                caller_off += w;
            }
        }
    }

    fn epilogue(&mut self) {
        let fb = self.frame_bytes();
        if self.is64() {
            self.line(&format!("ld\tr0, {}(r1)", fb + 16));
        } else {
            self.line(&format!("lwz\tr0, {}(r1)", fb + 4));
        }
        self.line("mtlr\tr0");
        self.line(&format!("addi\tr1, r1, {fb}"));
        self.line("blr");
    }

    fn implicit_return(&mut self) {
        let sig = self.module.func(self.func).sig;
        if let Some((ret, _, _)) = self.ctx.types().func_info(sig) {
            if self.ctx.types().is_float(ret) {
                let label = self.be.float_label(0, 8);
                self.load_sym(12, &label);
                self.line("lfd\tf1, 0(r12)");
            } else if !self.ctx.types().is_void(ret) {
                self.line("li\tr3, 0");
            }
        }
        self.epilogue();
    }

    fn ret(&mut self, value: Option<Value>) {
        if let Some(v) = value {
            let ty = self.module.value_type(v);
            if self.ctx.types().is_float(ty) {
                self.mat_float(v, 1);
            } else if !self.ctx.types().is_void(ty) {
                self.mat_int(v, 3);
            }
        }
        self.epilogue();
    }

    // ------------------------------------------------------------------

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
                struct_ty, field, base,
            } => self.field_addr(inst, struct_ty, field, base),
            InstructionData::Call { sig, args } => self.call(inst, sig, &args),
            InstructionData::Jump { dest } => self.jump(inst, dest),
            InstructionData::Brif { cond, dests } => self.brif(inst, cond, dests),
            InstructionData::Return { arg } => self.ret(arg),
            InstructionData::Phi { .. } => {}
            InstructionData::Select { args } => self.select(inst, args),
        }
    }

    fn int_ok(&mut self, ty: Type) -> bool {
        if self.ctx.size_of(ty) == 8 && !self.is64() {
            self.unsupported("64-bit integer operation on 32-bit target");
            return false;
        }
        true
    }

    fn binary(&mut self, inst: Inst, opcode: Opcode, args: [Value; 2]) {
        let ty = self.module.value_type(args[0]);
        if self.ctx.types().is_float(ty) {
            let f32ty = ty == types::F32;
            let mnem = match (opcode, f32ty) {
                (Opcode::Fadd, false) => "fadd",
                (Opcode::Fadd, true) => "fadds",
                (Opcode::Fsub, false) => "fsub",
                (Opcode::Fsub, true) => "fsubs",
                (Opcode::Fmul, false) => "fmul",
                (Opcode::Fmul, true) => "fmuls",
                (Opcode::Fdiv, false) => "fdiv",
                (Opcode::Fdiv, true) => "fdivs",
                _ => {
                    self.unsupported(opcode.name());
                    return;
                }
            };
            self.mat_float(args[0], 0);
            self.mat_float(args[1], 12);
            self.line(&format!("{mnem}\tf0, f0, f12"));
            self.store_result_fpr(inst, 0);
            return;
        }
        if !self.int_ok(ty) {
            return;
        }
        let wide = self.ctx.size_of(ty) == 8;
        self.mat_int(args[0], 11);
        self.mat_int(args[1], 12);
        match opcode {
            Opcode::Iadd => self.line("add\tr11, r11, r12"),
            Opcode::Isub => self.line("subf\tr11, r12, r11"),
            Opcode::Imul => self.line(if wide { "mulld\tr11, r11, r12" } else { "mullw\tr11, r11, r12" }),
            Opcode::Sdiv => self.line(if wide { "divd\tr11, r11, r12" } else { "divw\tr11, r11, r12" }),
            Opcode::Udiv => self.line(if wide { "divdu\tr11, r11, r12" } else { "divwu\tr11, r11, r12" }),
            Opcode::Srem | Opcode::Urem => {
                let div = match (opcode, wide) {
                    (Opcode::Srem, true) => "divd",
                    (Opcode::Srem, false) => "divw",
                    (_, true) => "divdu",
                    (_, false) => "divwu",
                };
                self.line(&format!("{div}\tr10, r11, r12"));
                self.line(if wide { "mulld\tr10, r10, r12" } else { "mullw\tr10, r10, r12" });
                self.line("subf\tr11, r10, r11");
            }
            Opcode::Band => self.line("and\tr11, r11, r12"),
            Opcode::Bor => self.line("or\tr11, r11, r12"),
            Opcode::Bxor => self.line("xor\tr11, r11, r12"),
            Opcode::Ishl => self.line(if wide { "sld\tr11, r11, r12" } else { "slw\tr11, r11, r12" }),
            Opcode::Ushr => self.line(if wide { "srd\tr11, r11, r12" } else { "srw\tr11, r11, r12" }),
            Opcode::Sshr => self.line(if wide { "srad\tr11, r11, r12" } else { "sraw\tr11, r11, r12" }),
            _ => self.unsupported(opcode.name()),
        }
        self.store_result_gpr(inst, 11);
    }

    fn unary(&mut self, inst: Inst, opcode: Opcode, arg: Value) {
        let ty = self.module.value_type(arg);
        match opcode {
            Opcode::Ineg | Opcode::Bnot => {
                if !self.int_ok(ty) {
                    return;
                }
                self.mat_int(arg, 11);
                if opcode == Opcode::Ineg {
                    self.line("neg\tr11, r11");
                } else {
                    self.line("nor\tr11, r11, r11");
                }
                self.store_result_gpr(inst, 11);
            }
            Opcode::Fneg | Opcode::Fabs => {
                self.mat_float(arg, 0);
                let mnem = if opcode == Opcode::Fneg { "fneg" } else { "fabs" };
                self.line(&format!("{mnem}\tf0, f0"));
                self.store_result_fpr(inst, 0);
            }
            _ => self.unsupported(opcode.name()),
        }
    }

    /// Materialize a 0/1 from the current cr0 state via a branch pair.
    fn set_bool(&mut self, branch: &str) {
        let label = self.be.local_label("cc");
        self.line("li\tr11, 1");
        self.line(&format!("{branch}\t{label}"));
        self.line("li\tr11, 0");
        let _ = writeln!(self.out, "{label}:");
    }

    fn icmp(&mut self, inst: Inst, cond: IntCC, args: [Value; 2]) {
        let ty = self.module.value_type(args[0]);
        if !self.int_ok(ty) {
            return;
        }
        let wide = self.ctx.size_of(ty) == 8;
        self.mat_int(args[0], 11);
        self.mat_int(args[1], 12);
        let cmp = match (cond.is_unsigned() || self.ctx.types().is_ptr(ty), wide) {
            (true, true) => "cmpld",
            (true, false) => "cmplw",
            (false, true) => "cmpd",
            (false, false) => "cmpw",
        };
        self.line(&format!("{cmp}\tcr0, r11, r12"));
        let branch = match cond {
            IntCC::Equal => "beq",
            IntCC::NotEqual => "bne",
            IntCC::SignedLessThan | IntCC::UnsignedLessThan => "blt",
            IntCC::SignedLessThanOrEqual | IntCC::UnsignedLessThanOrEqual => "ble",
            IntCC::SignedGreaterThan | IntCC::UnsignedGreaterThan => "bgt",
            IntCC::SignedGreaterThanOrEqual | IntCC::UnsignedGreaterThanOrEqual => "bge",
        };
        self.set_bool(branch);
        self.store_result_gpr(inst, 11);
    }

    fn fcmp(&mut self, inst: Inst, cond: FloatCC, args: [Value; 2]) {
        self.mat_float(args[0], 0);
        self.mat_float(args[1], 12);
        self.line("fcmpu\tcr0, f0, f12");
        let branch = match cond {
            FloatCC::Equal => "beq",
            FloatCC::NotEqual => "bne",
            FloatCC::LessThan => "blt",
            FloatCC::LessThanOrEqual => "ble",
            FloatCC::GreaterThan => "bgt",
            FloatCC::GreaterThanOrEqual => "bge",
        };
        self.set_bool(branch);
        self.store_result_gpr(inst, 11);
    }

    fn conversion(&mut self, inst: Inst, opcode: Opcode, arg: Value) {
        let result = match self.module.inst_result(inst) {
            Some(r) => r,
            None => return,
        };
        let to = self.module.value_type(result);
        let from = self.module.value_type(arg);
        match opcode {
            Opcode::Ireduce | Opcode::PtrToInt | Opcode::IntToPtr => {
                if !self.int_ok(to) || !self.int_ok(from) {
                    return;
                }
                self.mat_int(arg, 11);
                self.store_result_gpr(inst, 11);
            }
            Opcode::Bitcast => {
                let from_f = self.ctx.types().is_float(from);
                let to_f = self.ctx.types().is_float(to);
                if from_f == to_f {
                    if from_f {
                        self.mat_float(arg, 0);
                        self.store_result_fpr(inst, 0);
                    } else {
                        if !self.int_ok(to) {
                            return;
                        }
                        self.mat_int(arg, 11);
                        self.store_result_gpr(inst, 11);
                    }
                    return;
                }
                // Cross-file bitcasts stage through the protected area
                // below the stack pointer.
                if from_f {
                    self.mat_float(arg, 0);
                    self.line("stfd\tf0, -8(r1)");
                    if self.is64() {
                        self.line("ld\tr11, -8(r1)");
                    } else {
                        self.line("lwz\tr11, -4(r1)");
                    }
                    self.store_result_gpr(inst, 11);
                } else {
                    if !self.int_ok(from) {
                        return;
                    }
                    self.mat_int(arg, 11);
                    if self.is64() {
                        self.line("std\tr11, -8(r1)");
                    } else {
                        self.line("stw\tr11, -4(r1)");
                    }
                    self.line("lfd\tf0, -8(r1)");
                    self.store_result_fpr(inst, 0);
                }
            }
            Opcode::Uextend => {
                self.mat_int(arg, 11);
                match self.ctx.size_of(from) {
                    1 => self.line("andi.\tr11, r11, 255"),
                    2 => self.line("andi.\tr11, r11, 65535"),
                    4 if self.is64() => self.line("clrldi\tr11, r11, 32"),
                    _ => {}
                }
                self.store_result_gpr(inst, 11);
            }
            Opcode::Sextend => {
                self.mat_int(arg, 11);
                match self.ctx.size_of(from) {
                    1 => self.line("extsb\tr11, r11"),
                    2 => self.line("extsh\tr11, r11"),
                    4 if self.is64() => self.line("extsw\tr11, r11"),
                    _ => {}
                }
                self.store_result_gpr(inst, 11);
            }
            Opcode::Fpromote => {
                // FPRs always hold double precision; the single-precision
                // slot load already widened.
                self.mat_float(arg, 0);
                self.store_result_fpr(inst, 0);
            }
            Opcode::Fdemote => {
                self.mat_float(arg, 0);
                self.line("frsp\tf0, f0");
                self.store_result_fpr(inst, 0);
            }
            Opcode::FcvtFromSint | Opcode::FcvtFromUint => {
                if !self.is64() {
                    self.unsupported("integer to float conversion on ppc32");
                    return;
                }
                self.mat_int(arg, 11);
                if opcode == Opcode::FcvtFromSint && self.ctx.size_of(from) == 4 {
                    self.line("extsw\tr11, r11");
                }
                self.line("std\tr11, -8(r1)");
                self.line("lfd\tf0, -8(r1)");
                self.line("fcfid\tf0, f0");
                if to == types::F32 {
                    self.line("frsp\tf0, f0");
                }
                self.store_result_fpr(inst, 0);
            }
            Opcode::FcvtToSint | Opcode::FcvtToUint => {
                self.mat_float(arg, 0);
                if self.is64() {
                    self.line("fctidz\tf0, f0");
                    self.line("stfd\tf0, -8(r1)");
                    self.line("ld\tr11, -8(r1)");
                } else {
                    self.line("fctiwz\tf0, f0");
                    self.line("stfd\tf0, -8(r1)");
                    self.line("lwz\tr11, -4(r1)");
                }
                self.store_result_gpr(inst, 11);
            }
            _ => self.unsupported(opcode.name()),
        }
    }

    fn stack_alloc(&mut self, inst: Inst) {
        if let Some(off) = self.frame.alloca_slot(inst) {
            let disp = self.slot_disp(off);
            self.line(&format!("addi\tr11, r1, {disp}"));
            self.store_result_gpr(inst, 11);
        }
    }

    fn load(&mut self, inst: Inst, ptr: Value) {
        let result = match self.module.inst_result(inst) {
            Some(r) => r,
            None => return,
        };
        let ty = self.module.value_type(result);
        self.mat_int(ptr, 12);
        if self.ctx.types().is_float(ty) {
            let mnem = if ty == types::F32 { "lfs" } else { "lfd" };
            self.line(&format!("{mnem}\tf0, 0(r12)"));
            self.store_result_fpr(inst, 0);
            return;
        }
        if !self.int_ok(ty) {
            return;
        }
        let size = self.ctx.size_of(ty);
        let signed = self.ctx.types().is_signed(ty);
        match (size, signed) {
            (1, false) => self.line("lbz\tr11, 0(r12)"),
            (1, true) => {
                self.line("lbz\tr11, 0(r12)");
                self.line("extsb\tr11, r11");
            }
            (2, false) => self.line("lhz\tr11, 0(r12)"),
            (2, true) => self.line("lha\tr11, 0(r12)"),
            (4, true) if self.is64() => self.line("lwa\tr11, 0(r12)"),
            (4, _) => self.line("lwz\tr11, 0(r12)"),
            _ => self.line("ld\tr11, 0(r12)"),
        }
        self.store_result_gpr(inst, 11);
    }

    fn store(&mut self, value: Value, ptr: Value) {
        let ty = self.module.value_type(value);
        if self.ctx.types().is_float(ty) {
            self.mat_float(value, 0);
            self.mat_int(ptr, 12);
            let mnem = if ty == types::F32 { "stfs" } else { "stfd" };
            self.line(&format!("{mnem}\tf0, 0(r12)"));
            return;
        }
        if !self.int_ok(ty) {
            return;
        }
        self.mat_int(value, 11);
        self.mat_int(ptr, 12);
        match self.ctx.size_of(ty) {
            1 => self.line("stb\tr11, 0(r12)"),
            2 => self.line("sth\tr11, 0(r12)"),
            4 => self.line("stw\tr11, 0(r12)"),
            _ => self.line("std\tr11, 0(r12)"),
        }
    }

    fn elem_addr(&mut self, inst: Inst, elem_ty: Type, args: &[Value]) {
        self.mat_int(args[0], 11);
        let mut cur_ty = elem_ty;
        for (n, &index) in args[1..].iter().enumerate() {
            if n > 0 {
                cur_ty = match self.ctx.types().array_info(cur_ty) {
                    Some((elem, _)) => elem,
                    None => cur_ty,
                };
            }
            let size = self.ctx.size_of(cur_ty).max(1);
            self.mat_int(index, 12);
            if size.is_power_of_two() {
                if size > 1 {
                    let sh = size.trailing_zeros();
                    self.line(&if self.is64() {
                        format!("sldi\tr12, r12, {sh}")
                    } else {
                        format!("slwi\tr12, r12, {sh}")
                    });
                }
            } else {
                self.line(&format!("mulli\tr12, r12, {size}"));
            }
            self.line("add\tr11, r11, r12");
        }
        self.store_result_gpr(inst, 11);
    }

    fn field_addr(&mut self, inst: Inst, struct_ty: Type, field: u32, base: Value) {
        let offset = self
            .ctx
            .types()
            .struct_info(struct_ty)
            .and_then(|(_, offsets)| offsets.get(field as usize).copied())
            .unwrap_or(0);
        self.mat_int(base, 11);
        if offset > 0 {
            self.line(&format!("addi\tr11, r11, {offset}"));
        }
        self.store_result_gpr(inst, 11);
    }

    fn call(&mut self, inst: Inst, _sig: Type, args: &[Value]) {
        let callee = args[0];
        let actuals = &args[1..];
        let mut next_int = 3u32;
        let mut next_float = 1u32;
        let max_float = if self.is64() { 13 } else { 8 };
        let pbase = self.linkage_size();
        let mut stack_off = 0u32;
        for &arg in actuals {
            let ty = self.module.value_type(arg);
            if self.ctx.types().is_float(ty) {
                if next_float <= max_float {
                    self.mat_float(arg, next_float);
                    next_float += 1;
                } else {
                    self.mat_float(arg, 0);
                    self.line(&format!("stfd\tf0, {}(r1)", pbase + stack_off));
                    stack_off += 8;
                }
            } else if next_int <= 10 {
                if self.ctx.size_of(ty) == 8 && !self.is64() {
                    self.unsupported("64-bit integer argument on 32-bit target");
                    next_int += 1;
                    continue;
                }
                self.mat_int(arg, next_int);
                next_int += 1;
            } else {
                self.mat_int(arg, 11);
                self.store_gpr_to_slot(self.word(), pbase + stack_off, 11);
                stack_off += self.word();
            }
        }
        match &self.module.value(callee).kind {
            ValueKind::FuncAddr(f) => {
                let name = self.module.func(*f).name.clone();
                self.line(&format!("bl\t{name}"));
                if self.is64() {
                    self.line("nop");
                }
            }
            _ => match self.arch {
                Arch::Ppc64 => {
                    // Indirect through a function descriptor: entry, TOC.
                    self.mat_int(callee, 12);
                    self.line("ld\tr0, 0(r12)");
                    self.line("ld\tr2, 8(r12)");
                    self.line("mtctr\tr0");
                    self.line("bctrl");
                    self.line(&format!("ld\tr2, {}(r1)", self.toc_slot()));
                }
                Arch::Ppc64Le => {
                    self.mat_int(callee, 12);
                    self.line("mtctr\tr12");
                    self.line("bctrl");
                    self.line(&format!("ld\tr2, {}(r1)", self.toc_slot()));
                }
                _ => {
                    self.mat_int(callee, 12);
                    self.line("mtctr\tr12");
                    self.line("bctrl");
                }
            },
        }
        if let Some(result) = self.module.inst_result(inst) {
            let ty = self.module.value_type(result);
            if self.ctx.types().is_float(ty) {
                self.store_result_fpr(inst, 1);
            } else {
                self.store_result_gpr(inst, 3);
            }
        }
    }

    fn edge_moves(&self, from_inst: Inst, dest: Block) -> Vec<(Inst, Value)> {
        let from_block = self.module.inst_block(from_inst).expect("inserted inst");
        let mut moves = Vec::new();
        for &inst in &self.module.block(dest).insts {
            if let InstructionData::Phi { args, preds } = self.module.inst(inst) {
                for (&v, &p) in args.iter().zip(preds.iter()) {
                    if p == from_block {
                        moves.push((inst, v));
                    }
                }
            }
        }
        moves
    }

    fn jump(&mut self, inst: Inst, dest: Block) {
        for (phi, value) in self.edge_moves(inst, dest) {
            self.store_phi_move(phi, value);
        }
        let target = block_label(self.module, self.func, dest);
        self.line(&format!("b\t{target}"));
    }

    fn brif(&mut self, inst: Inst, cond: Value, dests: [Block; 2]) {
        self.mat_int(cond, 11);
        let cmp = if self.ctx.size_of(self.module.value_type(cond)) == 8 {
            "cmpdi"
        } else {
            "cmpwi"
        };
        self.line(&format!("{cmp}\tcr0, r11, 0"));
        let then_moves = self.edge_moves(inst, dests[0]);
        let else_moves = self.edge_moves(inst, dests[1]);
        let then_label = block_label(self.module, self.func, dests[0]);
        let else_label = block_label(self.module, self.func, dests[1]);
        let then_target = if then_moves.is_empty() {
            then_label.clone()
        } else {
            self.be.local_label("edge")
        };
        let else_target = if else_moves.is_empty() {
            else_label.clone()
        } else {
            self.be.local_label("edge")
        };
        self.line(&format!("bne\tcr0, {then_target}"));
        self.line(&format!("b\t{else_target}"));
        if !then_moves.is_empty() {
            let _ = writeln!(self.out, "{then_target}:");
            for (phi, value) in then_moves {
                self.store_phi_move(phi, value);
            }
            self.line(&format!("b\t{then_label}"));
        }
        if !else_moves.is_empty() {
            let _ = writeln!(self.out, "{else_target}:");
            for (phi, value) in else_moves {
                self.store_phi_move(phi, value);
            }
            self.line(&format!("b\t{else_label}"));
        }
    }

    fn select(&mut self, inst: Inst, args: [Value; 3]) {
        let ty = self.module.value_type(args[1]);
        if !self.ctx.types().is_float(ty)
            && self.ctx.has_feature(CpuFeatures::ISEL)
            && self.int_ok(ty)
        {
            // Hardware integer select: cr0.eq is set when the condition is
            // zero, so the false arm rides in the RA slot.
            self.mat_int(args[1], 11);
            self.mat_int(args[2], 12);
            self.mat_int(args[0], 10);
            self.line("cmpwi\tcr0, r10, 0");
            self.line("isel\tr11, r12, r11, 2");
            self.store_result_gpr(inst, 11);
            return;
        }
        // Branch-on-compare fallback, also used for floats.
        let other = self.be.local_label("sel");
        let done = self.be.local_label("seldone");
        self.mat_int(args[0], 10);
        self.line("cmpwi\tcr0, r10, 0");
        self.line(&format!("beq\t{other}"));
        if self.ctx.types().is_float(ty) {
            self.mat_float(args[1], 0);
        } else {
            self.mat_int(args[1], 11);
        }
        self.line(&format!("b\t{done}"));
        let _ = writeln!(self.out, "{other}:");
        if self.ctx.types().is_float(ty) {
            self.mat_float(args[2], 0);
        } else {
            self.mat_int(args[2], 11);
        }
        let _ = writeln!(self.out, "{done}:");
        if self.ctx.types().is_float(ty) {
            self.store_result_fpr(inst, 0);
        } else {
            self.store_result_gpr(inst, 11);
        }
    }
}

impl PpcBackend {
    fn emit_data(&mut self, ctx: &Context, module: &Module, out: &mut String) {
        let globals: Vec<_> = module.globals().collect();
        if !globals.is_empty() {
            out.push_str("\n\t.data\n");
            for gv in globals {
                let data = module.global(gv);
                let align = ctx.align_of(data.ty).max(1);
                if data.linkage == crate::ir::function::Linkage::External {
                    let _ = writeln!(out, "\t.globl\t{}", data.name);
                }
                let _ = writeln!(out, "\t.balign\t{align}");
                let _ = writeln!(out, "{}:", data.name);
                match &data.init {
                    Some(init) => self.emit_init(ctx, module, out, *init, data.ty),
                    None => {
                        let _ = writeln!(out, "\t.zero\t{}", ctx.size_of(data.ty).max(1));
                    }
                }
            }
        }
        if !self.string_order.is_empty() || !self.float_order.is_empty() {
            out.push_str("\n\t.section\t.rodata\n");
            let strings = core::mem::take(&mut self.string_order);
            for (label, id) in &strings {
                let _ = writeln!(out, "{label}:");
                let _ = writeln!(out, "\t.asciz\t\"{}\"", escape_gnu(module.string(*id)));
            }
            self.string_order = strings;
            let floats = core::mem::take(&mut self.float_order);
            for (label, bits, size) in &floats {
                let _ = writeln!(out, "\t.balign\t{size}");
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
