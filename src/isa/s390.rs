//! Mainframe lowering in HLASM syntax: System/370 (24-bit), System/370-XA
//! (31-bit), ESA/390 (31-bit) and z/Architecture (64-bit).
//!
//! OS linkage throughout: callers pass a parameter-address list in R1 with
//! the high bit of the last entry set (the VL convention, on the 24/31-bit
//! variants), R13 chains save areas, R15 carries the integer return value
//! and F0 the floating return value. Each function owns a static frame
//! (save area, saved R1, outgoing parameter list and values, locals)
//! addressed through R13, so the generated code is not reentrant — the
//! classic arrangement for this linkage.
//!
//! Floating point arithmetic selects between hexadecimal (ADR/SDR/...) and
//! IEEE binary (ADBR/SDBR/...) mnemonics per the context's FP-format
//! selector; `Mixed` resolves by the CPU model's binary-FP facility.

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
use crate::settings::{Arch, CpuFeatures, FpFormat};
use core::fmt::Write as _;
use rustc_hash::{FxHashMap, FxHashSet};

static S370_INFO: ArchInfo = ArchInfo {
    name: "s370",
    pointer_width: 24,
    word_size: 4,
    gpr_count: 16,
    fpr_count: 4,
    endianness: Endianness::Big,
    stack_direction: StackDirection::Up,
    has_condition_codes: true,
    has_delay_slots: false,
};

static S370XA_INFO: ArchInfo = ArchInfo {
    name: "s370xa",
    pointer_width: 31,
    word_size: 4,
    gpr_count: 16,
    fpr_count: 4,
    endianness: Endianness::Big,
    stack_direction: StackDirection::Up,
    has_condition_codes: true,
    has_delay_slots: false,
};

static ESA390_INFO: ArchInfo = ArchInfo {
    name: "esa390",
    pointer_width: 31,
    word_size: 4,
    gpr_count: 16,
    fpr_count: 16,
    endianness: Endianness::Big,
    stack_direction: StackDirection::Up,
    has_condition_codes: true,
    has_delay_slots: false,
};

static ZARCH_INFO: ArchInfo = ArchInfo {
    name: "zarch",
    pointer_width: 64,
    word_size: 8,
    gpr_count: 16,
    fpr_count: 16,
    endianness: Endianness::Big,
    stack_direction: StackDirection::Up,
    has_condition_codes: true,
    has_delay_slots: false,
};

pub(crate) fn backend(arch: Arch) -> Box<dyn TargetBackend> {
    Box::new(S390Backend {
        arch,
        symbols: FxHashMap::default(),
        used_symbols: FxHashSet::default(),
        strings: FxHashMap::default(),
        string_order: Vec::new(),
        label_count: 0,
        frame_count: 0,
    })
}

struct S390Backend {
    arch: Arch,
    /// IR name to HLASM symbol (8 characters, uppercase).
    symbols: FxHashMap<String, String>,
    used_symbols: FxHashSet<String>,
    strings: FxHashMap<StringId, String>,
    string_order: Vec<(String, StringId)>,
    label_count: u32,
    frame_count: u32,
}

impl S390Backend {
    fn is64(&self) -> bool {
        self.arch == Arch::ZArch
    }

    /// Mangle an IR name into a valid HLASM symbol.
    fn mangle(&mut self, name: &str) -> String {
        if let Some(s) = self.symbols.get(name) {
            return s.clone();
        }
        let mut base: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '@' || *c == '#' || *c == '$')
            .collect::<String>()
            .to_ascii_uppercase();
        if base.is_empty() || base.as_bytes()[0].is_ascii_digit() {
            base.insert(0, '@');
        }
        base.truncate(8);
        let mut candidate = base.clone();
        let mut n = 1u32;
        while self.used_symbols.contains(&candidate) {
            let suffix = n.to_string();
            let mut stem = base.clone();
            stem.truncate(8 - suffix.len());
            candidate = format!("{stem}{suffix}");
            n += 1;
        }
        self.used_symbols.insert(candidate.clone());
        self.symbols.insert(name.to_string(), candidate.clone());
        candidate
    }

    fn code_label(&mut self) -> String {
        self.label_count += 1;
        format!("L{:04}", self.label_count)
    }

    fn string_label(&mut self, id: StringId) -> String {
        if let Some(l) = self.strings.get(&id) {
            return l.clone();
        }
        let l = format!("S@{:04}", self.strings.len() + 1);
        self.strings.insert(id, l.clone());
        self.string_order.push((l.clone(), id));
        l
    }
}

/// One HLASM statement: label from column 1, opcode, operands.
fn stmt(out: &mut String, label: &str, op: &str, operands: &str) {
    if operands.is_empty() {
        let _ = writeln!(out, "{:<8} {}", label, op);
    } else {
        let _ = writeln!(out, "{:<8} {:<5} {}", label, op, operands);
    }
}

fn comment(out: &mut String, text: &str) {
    let _ = writeln!(out, "* {text}");
}

impl TargetBackend for S390Backend {
    fn info(&self) -> &'static ArchInfo {
        match self.arch {
            Arch::S370 => &S370_INFO,
            Arch::S370Xa => &S370XA_INFO,
            Arch::Esa390 => &ESA390_INFO,
            _ => &ZARCH_INFO,
        }
    }

    fn emit_module(&mut self, ctx: &Context, module: &Module) -> CodegenResult<String> {
        let mut out = String::new();
        comment(&mut out, &format!("ANVIL MODULE {} FOR {}", module.name.to_ascii_uppercase(), self.info().name.to_ascii_uppercase()));
        for n in 0..16 {
            stmt(&mut out, &format!("R{n}"), "EQU", &n.to_string());
        }
        for n in [0u32, 2, 4, 6] {
            stmt(&mut out, &format!("F{n}"), "EQU", &n.to_string());
        }
        for func in module.funcs() {
            if module.func(func).is_declaration {
                continue;
            }
            self.emit_function(ctx, module, func, &mut out)?;
        }
        self.emit_data(ctx, module, &mut out);
        stmt(&mut out, "", "END", "");
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
        let word = if self.is64() { 8u32 } else { 4 };
        // Outgoing slot = one list word plus one 8-byte value buffer.
        let frame = FrameLayout::compute(ctx, module, func, word + 8, 8);
        self.frame_count += 1;
        let frame_label = format!("F@{:04}", self.frame_count);
        let mut e = Emitter {
            ctx,
            module,
            func,
            frame,
            arch: self.arch,
            frame_label,
            block_labels: FxHashMap::default(),
            be: self,
            out,
        };
        e.function();
        Ok(())
    }

    fn reset(&mut self) {
        self.symbols.clear();
        self.used_symbols.clear();
        self.strings.clear();
        self.string_order.clear();
        self.label_count = 0;
        self.frame_count = 0;
    }
}

struct Emitter<'a> {
    ctx: &'a Context,
    module: &'a Module,
    func: Func,
    frame: FrameLayout,
    arch: Arch,
    frame_label: String,
    block_labels: FxHashMap<Block, String>,
    be: &'a mut S390Backend,
    out: &'a mut String,
}

impl<'a> Emitter<'a> {
    fn is64(&self) -> bool {
        self.arch == Arch::ZArch
    }

    fn word(&self) -> u32 {
        if self.is64() { 8 } else { 4 }
    }

    /// The VL high-bit convention applies to the 24/31-bit variants only.
    fn uses_vl_bit(&self) -> bool {
        !self.is64()
    }

    fn ieee(&self) -> bool {
        match self.ctx.fp_format() {
            FpFormat::Ieee => true,
            FpFormat::Hex => false,
            FpFormat::Mixed => self.ctx.has_feature(CpuFeatures::BFP),
        }
    }

    // Frame layout: save area, saved R1, outgoing (list words then value
    // buffers), locals.
    fn save_area_size(&self) -> u32 {
        18 * self.word()
    }

    fn saved_r1_off(&self) -> u32 {
        self.save_area_size()
    }

    fn plist_off(&self) -> u32 {
        self.saved_r1_off() + self.word()
    }

    fn max_args(&self) -> u32 {
        self.frame.outgoing_size / (self.word() + 8)
    }

    fn arg_value_off(&self, i: u32) -> u32 {
        self.plist_off() + self.max_args() * self.word() + i * 8
    }

    fn locals_off(&self) -> u32 {
        self.plist_off() + self.frame.outgoing_size
    }

    fn frame_size(&self) -> u32 {
        self.locals_off() + self.frame.locals_size
    }

    fn slot_disp(&self, off: u32) -> u32 {
        self.locals_off() + off
    }

    fn stmt(&mut self, label: &str, op: &str, operands: &str) {
        stmt(self.out, label, op, operands);
    }

    fn ins(&mut self, op: &str, operands: &str) {
        stmt(self.out, "", op, operands);
    }

    fn unsupported(&mut self, what: &str) {
        comment(self.out, &format!("ANVIL UNSUPPORTED {}", what.to_ascii_uppercase()));
    }

    fn place_label(&mut self, label: &str) {
        stmt(self.out, label, "DS", "0H");
    }

    // ------------------------------------------------------------------
    // Materialization.

    /// Load an immediate into `R{reg}`.
    fn load_imm(&mut self, reg: u32, value: i64) {
        if (0..4096).contains(&value) {
            self.ins("LA", &format!("R{reg},{value}"));
        } else if self.is64() {
            if (-32768..32768).contains(&value) {
                self.ins("LGHI", &format!("R{reg},{value}"));
            } else {
                self.ins("LG", &format!("R{reg},=FD'{value}'"));
            }
        } else {
            self.ins("L", &format!("R{reg},=F'{value}'"));
        }
    }

    /// Load the address of an assembler symbol into `R{reg}`.
    fn load_addr(&mut self, reg: u32, symbol: &str, external: bool) {
        if self.arch == Arch::Esa390 || self.is64() {
            if !external && self.ctx.has_feature(CpuFeatures::REL_LONG) {
                self.ins("LARL", &format!("R{reg},{symbol}"));
                return;
            }
        }
        let con = if external { "=V" } else { "=A" };
        if self.is64() {
            self.ins("LGF", &format!("R{reg},{con}({symbol})"));
        } else {
            self.ins("L", &format!("R{reg},{con}({symbol})"));
        }
    }

    /// Load a value from `disp(R{base})` into `R{reg}` per `ty`'s width.
    fn load_mem(&mut self, ty: Type, disp: u32, base: u32, reg: u32) {
        let size = self.ctx.size_of(ty);
        let signed = self.ctx.types().is_signed(ty);
        let at = format!("R{reg},{disp}(,R{base})");
        if self.is64() {
            match (size, signed) {
                (1, true) => self.ins("LGB", &at),
                (1, false) => self.ins("LLGC", &at),
                (2, true) => self.ins("LGH", &at),
                (2, false) => self.ins("LLGH", &at),
                (4, true) => self.ins("LGF", &at),
                (4, false) => self.ins("LLGF", &at),
                _ => self.ins("LG", &at),
            }
            return;
        }
        match (size, signed) {
            (1, _) => {
                self.ins("LA", &format!("R{reg},0"));
                self.ins("IC", &at);
                if signed {
                    self.ins("SLL", &format!("R{reg},24"));
                    self.ins("SRA", &format!("R{reg},24"));
                }
            }
            (2, true) => self.ins("LH", &at),
            (2, false) => {
                self.ins("LA", &format!("R{reg},0"));
                self.ins("ICM", &format!("R{reg},3,{disp}(R{base})"));
            }
            _ => self.ins("L", &at),
        }
    }

    /// Store `R{reg}` to `disp(R{base})` at `size` bytes.
    fn store_mem(&mut self, size: u32, disp: u32, base: u32, reg: u32) {
        let at = format!("R{reg},{disp}(,R{base})");
        match size {
            1 => self.ins("STC", &at),
            2 => self.ins("STH", &at),
            4 => self.ins("ST", &at),
            _ => {
                if self.is64() {
                    self.ins("STG", &at)
                } else {
                    self.unsupported("8-BYTE INTEGER STORE")
                }
            }
        }
    }

    fn int_ok(&mut self, ty: Type) -> bool {
        if self.ctx.size_of(ty) == 8 && !self.is64() && !self.ctx.types().is_float(ty) {
            self.unsupported("64-BIT INTEGER OPERATION");
            return false;
        }
        true
    }

    /// Materialize an integer-class operand into `R{reg}`.
    fn mat_int(&mut self, v: Value, reg: u32) {
        let ty = self.module.value_type(v);
        match self.module.value(v).kind.clone() {
            ValueKind::ConstInt(k) => self.load_imm(reg, k),
            ValueKind::ConstNull => self.ins("LA", &format!("R{reg},0")),
            ValueKind::ConstString(id) => {
                let label = self.be.string_label(id);
                self.load_addr(reg, &label, false);
            }
            ValueKind::Global(gv) => {
                let name = self.module.global(gv).name.clone();
                let symbol = self.be.mangle(&name);
                self.load_addr(reg, &symbol, false);
            }
            ValueKind::FuncAddr(f) => {
                let data = self.module.func(f);
                let external = data.is_declaration;
                let name = data.name.clone();
                let symbol = self.be.mangle(&name);
                self.load_addr(reg, &symbol, external);
            }
            ValueKind::Param { index, .. } => {
                self.param_addr(index, 14);
                self.load_mem(ty, 0, 14, reg);
            }
            ValueKind::InstResult(inst) => {
                if let Some(off) = self.frame.temp_slot(inst) {
                    let disp = self.slot_disp(off);
                    self.load_mem(ty, disp, 13, reg);
                }
            }
            ValueKind::ConstFloat(_) | ValueKind::ConstArray(_) => {
                self.unsupported("AGGREGATE OR FLOAT OPERAND IN INTEGER CONTEXT");
            }
        }
    }

    /// Leave the address of parameter `index` in `R{reg}`.
    fn param_addr(&mut self, index: u32, reg: u32) {
        let saved = self.saved_r1_off();
        let word = self.word();
        if self.is64() {
            self.ins("LG", &format!("R{reg},{saved}(,R13)"));
            self.ins("LG", &format!("R{reg},{}(,R{reg})", index * word));
        } else {
            self.ins("L", &format!("R{reg},{saved}(,R13)"));
            self.ins("L", &format!("R{reg},{}(,R{reg})", index * word));
            // Drop the VL end-of-list bit from the address.
            self.ins("LA", &format!("R{reg},0(,R{reg})"));
        }
    }

    /// A floating literal in the pool, typed per the active FP format.
    fn float_literal(&self, value: f64, f32ty: bool) -> String {
        let ty = match (self.ieee(), f32ty) {
            (true, true) => "EB",
            (true, false) => "DB",
            (false, true) => "E",
            (false, false) => "D",
        };
        let mut text = format!("{value:E}");
        if !text.contains('E') {
            text.push_str("E0");
        }
        format!("={ty}'{text}'")
    }

    /// Materialize a float operand into `F{reg}`.
    fn mat_float(&mut self, v: Value, reg: u32) {
        let ty = self.module.value_type(v);
        let f32ty = ty == types::F32;
        let load = if f32ty { "LE" } else { "LD" };
        match self.module.value(v).kind.clone() {
            ValueKind::ConstFloat(bits) => {
                let lit = self.float_literal(f64::from_bits(bits), f32ty);
                self.ins(load, &format!("F{reg},{lit}"));
            }
            ValueKind::Param { index, .. } => {
                self.param_addr(index, 14);
                self.ins(load, &format!("F{reg},0(,R14)"));
            }
            ValueKind::InstResult(inst) => {
                if let Some(off) = self.frame.temp_slot(inst) {
                    let disp = self.slot_disp(off);
                    self.ins(load, &format!("F{reg},{disp}(,R13)"));
                }
            }
            _ => self.unsupported("OPERAND IN FLOAT CONTEXT"),
        }
    }

    fn store_result_gpr(&mut self, inst: Inst, reg: u32) {
        if let (Some(result), Some(off)) = (self.module.inst_result(inst), self.frame.temp_slot(inst)) {
            let size = self.ctx.size_of(self.module.value_type(result));
            let disp = self.slot_disp(off);
            self.store_mem(size, disp, 13, reg);
        }
    }

    fn store_result_fpr(&mut self, inst: Inst, reg: u32) {
        if let (Some(result), Some(off)) = (self.module.inst_result(inst), self.frame.temp_slot(inst)) {
            let f32ty = self.module.value_type(result) == types::F32;
            let disp = self.slot_disp(off);
            let mnem = if f32ty { "STE" } else { "STD" };
            self.ins(mnem, &format!("F{reg},{disp}(,R13)"));
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
            let mnem = if ty == types::F32 { "STE" } else { "STD" };
            self.ins(mnem, &format!("F0,{disp}(,R13)"));
        } else {
            if !self.int_ok(ty) {
                return;
            }
            self.mat_int(value, 2);
            self.store_mem(self.ctx.size_of(ty), disp, 13, 2);
        }
    }

    // ------------------------------------------------------------------
    // Function shell.

    fn function(&mut self) {
        let data = self.module.func(self.func);
        let name = data.name.clone();
        let external = data.linkage == crate::ir::function::Linkage::External;
        let blocks = data.blocks.clone();
        let symbol = self.be.mangle(&name);
        let frame_label = self.frame_label.clone();

        comment(self.out, &format!("FUNCTION {}", name.to_ascii_uppercase()));
        self.stmt(&symbol, "CSECT", "");
        if external {
            self.ins("ENTRY", &symbol);
        }
        if self.is64() {
            self.ins("STMG", "R14,R12,8(R13)");
            self.ins("LGR", "R12,R15");
            self.stmt("", "USING", &format!("{symbol},R12"));
            self.load_addr(15, &frame_label, false);
            self.ins("STG", "R13,0(,R15)");
            self.ins("LGR", "R13,R15");
            let saved = self.saved_r1_off();
            self.ins("STG", &format!("R1,{saved}(,R13)"));
        } else {
            self.ins("STM", "R14,R12,12(R13)");
            if self.arch == Arch::S370 {
                self.ins("BALR", "R12,0");
                self.stmt("", "USING", "*,R12");
            } else {
                self.ins("LR", "R12,R15");
                self.stmt("", "USING", &format!("{symbol},R12"));
            }
            self.load_addr(15, &frame_label, false);
            self.ins("ST", "R13,4(,R15)");
            self.ins("LR", "R13,R15");
            let saved = self.saved_r1_off();
            self.ins("ST", &format!("R1,{saved}(,R13)"));
        }

        let mut block_labels: FxHashMap<Block, String> = FxHashMap::default();
        for &block in &blocks {
            let label = self.be.code_label();
            block_labels.insert(block, label);
        }
        self.block_labels = block_labels;

        for (i, &block) in blocks.iter().enumerate() {
            let label = self.block_labels[&block].clone();
            self.place_label(&label);
            let insts = self.module.block(block).insts.clone();
            for inst in insts {
                self.inst(inst);
            }
            if i + 1 == blocks.len() && !self.module.is_terminated(block) {
                self.implicit_return();
            }
        }

        // Literal pool, then the static frame.
        self.ins("LTORG", "");
        let frame_size = self.frame_size();
        self.stmt(&frame_label, "DS", "0D");
        self.ins("DS", &format!("XL{frame_size}"));
    }

    fn epilogue(&mut self) {
        if self.is64() {
            self.ins("LG", "R13,0(,R13)");
            self.ins("LG", "R14,8(,R13)");
            self.ins("LMG", "R0,R12,24(R13)");
        } else {
            self.ins("L", "R13,4(,R13)");
            self.ins("L", "R14,12(,R13)");
            self.ins("LM", "R0,R12,20(R13)");
        }
        self.ins("BR", "R14");
    }

    fn implicit_return(&mut self) {
        let sig = self.module.func(self.func).sig;
        if let Some((ret, _, _)) = self.ctx.types().func_info(sig) {
            if self.ctx.types().is_float(ret) {
                let lit = self.float_literal(0.0, false);
                self.ins("LD", &format!("F0,{lit}"));
            } else if !self.ctx.types().is_void(ret) {
                self.ins("LA", "R15,0");
            }
        }
        self.epilogue();
    }

    fn ret(&mut self, value: Option<Value>) {
        if let Some(v) = value {
            let ty = self.module.value_type(v);
            if self.ctx.types().is_float(ty) {
                self.mat_float(v, 0);
            } else if !self.ctx.types().is_void(ty) {
                self.mat_int(v, 15);
            }
        }
        self.epilogue();
    }

    // ------------------------------------------------------------------
    // Instructions.

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

    fn binary(&mut self, inst: Inst, opcode: Opcode, args: [Value; 2]) {
        let ty = self.module.value_type(args[0]);
        if self.ctx.types().is_float(ty) {
            self.float_binary(inst, opcode, args, ty == types::F32);
            return;
        }
        if !self.int_ok(ty) {
            return;
        }
        self.mat_int(args[0], 2);
        self.mat_int(args[1], 3);
        if self.is64() {
            match opcode {
                Opcode::Iadd => self.ins("AGR", "R2,R3"),
                Opcode::Isub => self.ins("SGR", "R2,R3"),
                Opcode::Imul => self.ins("MSGR", "R2,R3"),
                Opcode::Sdiv | Opcode::Srem => {
                    self.ins("LGR", "R5,R2");
                    self.ins("DSGR", "R4,R3");
                    self.ins("LGR", if opcode == Opcode::Sdiv { "R2,R5" } else { "R2,R4" });
                }
                Opcode::Udiv | Opcode::Urem => {
                    self.ins("LGHI", "R4,0");
                    self.ins("LGR", "R5,R2");
                    self.ins("DLGR", "R4,R3");
                    self.ins("LGR", if opcode == Opcode::Udiv { "R2,R5" } else { "R2,R4" });
                }
                Opcode::Band => self.ins("NGR", "R2,R3"),
                Opcode::Bor => self.ins("OGR", "R2,R3"),
                Opcode::Bxor => self.ins("XGR", "R2,R3"),
                Opcode::Ishl => self.ins("SLLG", "R2,R2,0(R3)"),
                Opcode::Ushr => self.ins("SRLG", "R2,R2,0(R3)"),
                Opcode::Sshr => self.ins("SRAG", "R2,R2,0(R3)"),
                _ => self.unsupported(opcode.name()),
            }
        } else {
            match opcode {
                Opcode::Iadd => self.ins("AR", "R2,R3"),
                Opcode::Isub => self.ins("SR", "R2,R3"),
                Opcode::Imul => {
                    if self.arch == Arch::Esa390 {
                        self.ins("MSR", "R2,R3");
                    } else {
                        self.ins("LR", "R5,R2");
                        self.ins("MR", "R4,R3");
                        self.ins("LR", "R2,R5");
                    }
                }
                Opcode::Sdiv | Opcode::Srem => {
                    self.ins("LR", "R5,R2");
                    self.ins("SRDA", "R4,32");
                    self.ins("DR", "R4,R3");
                    self.ins("LR", if opcode == Opcode::Sdiv { "R2,R5" } else { "R2,R4" });
                }
                Opcode::Udiv | Opcode::Urem => {
                    // No unsigned divide before z; clear the high half and
                    // use the signed divide.
                    self.ins("LA", "R4,0");
                    self.ins("LR", "R5,R2");
                    self.ins("DR", "R4,R3");
                    self.ins("LR", if opcode == Opcode::Udiv { "R2,R5" } else { "R2,R4" });
                }
                Opcode::Band => self.ins("NR", "R2,R3"),
                Opcode::Bor => self.ins("OR", "R2,R3"),
                Opcode::Bxor => self.ins("XR", "R2,R3"),
                Opcode::Ishl => self.ins("SLL", "R2,0(R3)"),
                Opcode::Ushr => self.ins("SRL", "R2,0(R3)"),
                Opcode::Sshr => self.ins("SRA", "R2,0(R3)"),
                _ => self.unsupported(opcode.name()),
            }
        }
        self.store_result_gpr(inst, 2);
    }

    fn float_binary(&mut self, inst: Inst, opcode: Opcode, args: [Value; 2], f32ty: bool) {
        self.mat_float(args[0], 0);
        self.mat_float(args[1], 2);
        let mnem = match (opcode, self.ieee(), f32ty) {
            (Opcode::Fadd, true, false) => "ADBR",
            (Opcode::Fadd, false, false) => "ADR",
            (Opcode::Fadd, true, true) => "AEBR",
            (Opcode::Fadd, false, true) => "AER",
            (Opcode::Fsub, true, false) => "SDBR",
            (Opcode::Fsub, false, false) => "SDR",
            (Opcode::Fsub, true, true) => "SEBR",
            (Opcode::Fsub, false, true) => "SER",
            (Opcode::Fmul, true, false) => "MDBR",
            (Opcode::Fmul, false, false) => "MDR",
            (Opcode::Fmul, true, true) => "MEEBR",
            (Opcode::Fmul, false, true) => "MER",
            (Opcode::Fdiv, true, false) => "DDBR",
            (Opcode::Fdiv, false, false) => "DDR",
            (Opcode::Fdiv, true, true) => "DEBR",
            (Opcode::Fdiv, false, true) => "DER",
            _ => {
                self.unsupported(opcode.name());
                return;
            }
        };
        self.ins(mnem, "F0,F2");
        self.store_result_fpr(inst, 0);
    }

    fn unary(&mut self, inst: Inst, opcode: Opcode, arg: Value) {
        let ty = self.module.value_type(arg);
        match opcode {
            Opcode::Ineg => {
                if !self.int_ok(ty) {
                    return;
                }
                self.mat_int(arg, 2);
                self.ins(if self.is64() { "LCGR" } else { "LCR" }, "R2,R2");
                self.store_result_gpr(inst, 2);
            }
            Opcode::Bnot => {
                if !self.int_ok(ty) {
                    return;
                }
                self.mat_int(arg, 2);
                if self.is64() {
                    self.ins("LGHI", "R3,-1");
                    self.ins("XGR", "R2,R3");
                } else {
                    self.ins("X", "R2,=F'-1'");
                }
                self.store_result_gpr(inst, 2);
            }
            Opcode::Fneg | Opcode::Fabs => {
                let f32ty = ty == types::F32;
                self.mat_float(arg, 0);
                let mnem = match (opcode, self.ieee(), f32ty) {
                    (Opcode::Fneg, true, false) => "LCDBR",
                    (Opcode::Fneg, false, false) => "LCDR",
                    (Opcode::Fneg, true, true) => "LCEBR",
                    (Opcode::Fneg, false, true) => "LCER",
                    (_, true, false) => "LPDBR",
                    (_, false, false) => "LPDR",
                    (_, true, true) => "LPEBR",
                    (_, false, true) => "LPER",
                };
                self.ins(mnem, "F0,F0");
                self.store_result_fpr(inst, 0);
            }
            _ => self.unsupported(opcode.name()),
        }
    }

    /// Materialize a 0/1 in R2 from the current condition code.
    ///
    /// Both constant loads are CC-transparent, so they may sit between the
    /// compare and the conditional load or branch consuming it.
    fn set_bool(&mut self, branch: &str, mask: u32) {
        if self.ctx.has_feature(CpuFeatures::LOAD_ON_COND) && self.is64() {
            self.ins("LGHI", "R2,0");
            self.ins("LGHI", "R3,1");
            self.ins("LOCGR", &format!("R2,R3,{mask}"));
            return;
        }
        let label = self.be.code_label();
        // LA does not disturb the condition code set by the compare.
        self.ins("LA", "R2,1");
        self.ins(branch, &label);
        self.ins("LA", "R2,0");
        self.place_label(&label);
    }

    fn icmp(&mut self, inst: Inst, cond: IntCC, args: [Value; 2]) {
        let ty = self.module.value_type(args[0]);
        if !self.int_ok(ty) {
            return;
        }
        self.mat_int(args[0], 2);
        self.mat_int(args[1], 3);
        let unsigned = cond.is_unsigned() || self.ctx.types().is_ptr(ty);
        let cmp = match (self.is64(), unsigned) {
            (true, true) => "CLGR",
            (true, false) => "CGR",
            (false, true) => "CLR",
            (false, false) => "CR",
        };
        self.ins(cmp, "R2,R3");
        let (branch, mask) = match cond {
            IntCC::Equal => ("BE", 8),
            IntCC::NotEqual => ("BNE", 7),
            IntCC::SignedLessThan | IntCC::UnsignedLessThan => ("BL", 4),
            IntCC::SignedLessThanOrEqual | IntCC::UnsignedLessThanOrEqual => ("BNH", 12),
            IntCC::SignedGreaterThan | IntCC::UnsignedGreaterThan => ("BH", 2),
            IntCC::SignedGreaterThanOrEqual | IntCC::UnsignedGreaterThanOrEqual => ("BNL", 10),
        };
        self.set_bool(branch, mask);
        self.store_result_gpr(inst, 2);
    }

    fn fcmp(&mut self, inst: Inst, cond: FloatCC, args: [Value; 2]) {
        let f32ty = self.module.value_type(args[0]) == types::F32;
        self.mat_float(args[0], 0);
        self.mat_float(args[1], 2);
        let cmp = match (self.ieee(), f32ty) {
            (true, false) => "CDBR",
            (false, false) => "CDR",
            (true, true) => "CEBR",
            (false, true) => "CER",
        };
        self.ins(cmp, "F0,F2");
        let (branch, mask) = match cond {
            FloatCC::Equal => ("BE", 8),
            FloatCC::NotEqual => ("BNE", 7),
            FloatCC::LessThan => ("BL", 4),
            FloatCC::LessThanOrEqual => ("BNH", 12),
            FloatCC::GreaterThan => ("BH", 2),
            FloatCC::GreaterThanOrEqual => ("BNL", 10),
        };
        self.set_bool(branch, mask);
        self.store_result_gpr(inst, 2);
    }

    fn conversion(&mut self, inst: Inst, opcode: Opcode, arg: Value) {
        let result = match self.module.inst_result(inst) {
            Some(r) => r,
            None => return,
        };
        let to = self.module.value_type(result);
        let from = self.module.value_type(arg);
        match opcode {
            Opcode::Ireduce | Opcode::PtrToInt | Opcode::IntToPtr | Opcode::Bitcast => {
                if self.ctx.types().is_float(from) || self.ctx.types().is_float(to) {
                    self.unsupported("BITCAST ACROSS REGISTER FILES");
                    return;
                }
                if !self.int_ok(to) || !self.int_ok(from) {
                    return;
                }
                self.mat_int(arg, 2);
                self.store_result_gpr(inst, 2);
            }
            Opcode::Uextend => {
                if !self.int_ok(to) {
                    return;
                }
                self.mat_int(arg, 2);
                match self.ctx.size_of(from) {
                    1 => {
                        if self.is64() {
                            self.ins("LLGCR", "R2,R2");
                        } else {
                            self.ins("N", "R2,=X'000000FF'");
                        }
                    }
                    2 => {
                        if self.is64() {
                            self.ins("LLGHR", "R2,R2");
                        } else {
                            self.ins("N", "R2,=X'0000FFFF'");
                        }
                    }
                    4 if self.is64() => self.ins("LLGFR", "R2,R2"),
                    _ => {}
                }
                self.store_result_gpr(inst, 2);
            }
            Opcode::Sextend => {
                if !self.int_ok(to) {
                    return;
                }
                self.mat_int(arg, 2);
                if self.is64() && self.ctx.size_of(from) == 4 {
                    self.ins("LGFR", "R2,R2");
                }
                // Narrower sources were sign-extended by the load.
                self.store_result_gpr(inst, 2);
            }
            Opcode::Fpromote => {
                self.mat_float(arg, 0);
                let mnem = if self.ieee() { "LDEBR" } else { "LDER" };
                self.ins(mnem, "F0,F0");
                self.store_result_fpr(inst, 0);
            }
            Opcode::Fdemote => {
                self.mat_float(arg, 0);
                let mnem = if self.ieee() { "LEDBR" } else { "LRER" };
                self.ins(mnem, "F0,F0");
                self.store_result_fpr(inst, 0);
            }
            Opcode::FcvtFromSint | Opcode::FcvtFromUint => {
                if !self.ieee() {
                    self.unsupported("INTEGER TO HEX FLOAT CONVERSION");
                    return;
                }
                self.mat_int(arg, 2);
                let f32ty = to == types::F32;
                if self.is64() {
                    self.ins(if f32ty { "CEGBR" } else { "CDGBR" }, "F0,R2");
                } else {
                    self.ins(if f32ty { "CEFBR" } else { "CDFBR" }, "F0,R2");
                }
                self.store_result_fpr(inst, 0);
            }
            Opcode::FcvtToSint | Opcode::FcvtToUint => {
                if !self.ieee() {
                    self.unsupported("HEX FLOAT TO INTEGER CONVERSION");
                    return;
                }
                self.mat_float(arg, 0);
                let f32ty = from == types::F32;
                if self.is64() {
                    self.ins(if f32ty { "CGEBR" } else { "CGDBR" }, "R2,5,F0");
                } else {
                    self.ins(if f32ty { "CFEBR" } else { "CFDBR" }, "R2,5,F0");
                }
                self.store_result_gpr(inst, 2);
            }
            _ => self.unsupported(opcode.name()),
        }
    }

    fn stack_alloc(&mut self, inst: Inst) {
        if let Some(off) = self.frame.alloca_slot(inst) {
            let disp = self.slot_disp(off);
            self.ins("LA", &format!("R2,{disp}(,R13)"));
            self.store_result_gpr(inst, 2);
        }
    }

    fn load(&mut self, inst: Inst, ptr: Value) {
        let result = match self.module.inst_result(inst) {
            Some(r) => r,
            None => return,
        };
        let ty = self.module.value_type(result);
        self.mat_int(ptr, 3);
        if self.ctx.types().is_float(ty) {
            let mnem = if ty == types::F32 { "LE" } else { "LD" };
            self.ins(mnem, "F0,0(,R3)");
            self.store_result_fpr(inst, 0);
            return;
        }
        if !self.int_ok(ty) {
            return;
        }
        self.load_mem(ty, 0, 3, 2);
        self.store_result_gpr(inst, 2);
    }

    fn store(&mut self, value: Value, ptr: Value) {
        let ty = self.module.value_type(value);
        if self.ctx.types().is_float(ty) {
            self.mat_float(value, 0);
            self.mat_int(ptr, 3);
            let mnem = if ty == types::F32 { "STE" } else { "STD" };
            self.ins(mnem, "F0,0(,R3)");
            return;
        }
        if !self.int_ok(ty) {
            return;
        }
        self.mat_int(value, 2);
        self.mat_int(ptr, 3);
        self.store_mem(self.ctx.size_of(ty), 0, 3, 2);
    }

    fn elem_addr(&mut self, inst: Inst, elem_ty: Type, args: &[Value]) {
        self.mat_int(args[0], 2);
        let mut cur_ty = elem_ty;
        for (n, &index) in args[1..].iter().enumerate() {
            if n > 0 {
                cur_ty = match self.ctx.types().array_info(cur_ty) {
                    Some((elem, _)) => elem,
                    None => cur_ty,
                };
            }
            let size = self.ctx.size_of(cur_ty).max(1);
            self.mat_int(index, 3);
            if size.is_power_of_two() {
                if size > 1 {
                    let sh = size.trailing_zeros();
                    if self.is64() {
                        self.ins("SLLG", &format!("R3,R3,{sh}"));
                    } else {
                        self.ins("SLL", &format!("R3,{sh}"));
                    }
                }
            } else if self.is64() {
                self.ins("LGHI", &format!("R4,{size}"));
                self.ins("MSGR", "R3,R4");
            } else if self.arch == Arch::Esa390 {
                self.ins("LA", &format!("R4,{size}"));
                self.ins("MSR", "R3,R4");
            } else {
                self.ins("LR", "R5,R3");
                self.ins("M", &format!("R4,=F'{size}'"));
                self.ins("LR", "R3,R5");
            }
            self.ins(if self.is64() { "AGR" } else { "AR" }, "R2,R3");
        }
        self.store_result_gpr(inst, 2);
    }

    fn field_addr(&mut self, inst: Inst, struct_ty: Type, field: u32, base: Value) {
        let offset = self
            .ctx
            .types()
            .struct_info(struct_ty)
            .and_then(|(_, offsets)| offsets.get(field as usize).copied())
            .unwrap_or(0);
        self.mat_int(base, 2);
        if offset > 0 {
            self.ins("LA", &format!("R2,{offset}(,R2)"));
        }
        self.store_result_gpr(inst, 2);
    }

    fn call(&mut self, inst: Inst, _sig: Type, args: &[Value]) {
        let callee = args[0];
        let actuals = &args[1..];
        let word = self.word();
        let plist = self.plist_off();
        // Build each argument value, then its address in the list.
        for (i, &arg) in actuals.iter().enumerate() {
            let i = i as u32;
            let vdisp = self.arg_value_off(i);
            let ty = self.module.value_type(arg);
            if self.ctx.types().is_float(ty) {
                self.mat_float(arg, 0);
                let mnem = if ty == types::F32 { "STE" } else { "STD" };
                self.ins(mnem, &format!("F0,{vdisp}(,R13)"));
            } else {
                if !self.int_ok(ty) {
                    continue;
                }
                self.mat_int(arg, 2);
                self.store_mem(self.ctx.size_of(ty).max(word), vdisp, 13, 2);
            }
            self.ins("LA", &format!("R14,{vdisp}(,R13)"));
            if self.is64() {
                self.ins("STG", &format!("R14,{}(,R13)", plist + i * word));
            } else {
                self.ins("ST", &format!("R14,{}(,R13)", plist + i * word));
            }
        }
        let last_off = if actuals.is_empty() {
            None
        } else {
            Some(plist + (actuals.len() as u32 - 1) * word)
        };
        if let (Some(off), true) = (last_off, self.uses_vl_bit()) {
            // Mark the end of the parameter list.
            self.ins("OI", &format!("{off}(R13),X'80'"));
        }
        if !actuals.is_empty() {
            self.ins("LA", &format!("R1,{plist}(,R13)"));
        } else {
            self.ins("LA", "R1,0");
        }
        match self.module.value(callee).kind.clone() {
            ValueKind::FuncAddr(f) => {
                let data = self.module.func(f);
                let external = data.is_declaration;
                let name = data.name.clone();
                let symbol = self.be.mangle(&name);
                self.load_addr(15, &symbol, external);
            }
            _ => self.mat_int(callee, 15),
        }
        let link = if matches!(self.arch, Arch::S370 | Arch::S370Xa) {
            "BALR"
        } else {
            "BASR"
        };
        self.ins(link, "R14,R15");
        if let (Some(off), true) = (last_off, self.uses_vl_bit()) {
            // Make the list area reusable.
            self.ins("NI", &format!("{off}(R13),X'7F'"));
        }
        if let Some(result) = self.module.inst_result(inst) {
            let ty = self.module.value_type(result);
            if self.ctx.types().is_float(ty) {
                self.store_result_fpr(inst, 0);
            } else {
                self.store_result_gpr(inst, 15);
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
        let target = self.block_labels[&dest].clone();
        self.ins("B", &target);
    }

    fn brif(&mut self, inst: Inst, cond: Value, dests: [Block; 2]) {
        self.mat_int(cond, 2);
        self.ins(if self.is64() { "LTGR" } else { "LTR" }, "R2,R2");
        let then_moves = self.edge_moves(inst, dests[0]);
        let else_moves = self.edge_moves(inst, dests[1]);
        let then_label = self.block_labels[&dests[0]].clone();
        let else_label = self.block_labels[&dests[1]].clone();
        let then_target = if then_moves.is_empty() {
            then_label.clone()
        } else {
            self.be.code_label()
        };
        let else_target = if else_moves.is_empty() {
            else_label.clone()
        } else {
            self.be.code_label()
        };
        self.ins("BNZ", &then_target);
        self.ins("B", &else_target);
        if !then_moves.is_empty() {
            self.place_label(&then_target);
            for (phi, value) in then_moves {
                self.store_phi_move(phi, value);
            }
            self.ins("B", &then_label);
        }
        if !else_moves.is_empty() {
            self.place_label(&else_target);
            for (phi, value) in else_moves {
                self.store_phi_move(phi, value);
            }
            self.ins("B", &else_label);
        }
    }

    fn select(&mut self, inst: Inst, args: [Value; 3]) {
        let ty = self.module.value_type(args[1]);
        if !self.ctx.types().is_float(ty)
            && self.is64()
            && self.ctx.has_feature(CpuFeatures::LOAD_ON_COND)
        {
            // Hardware conditional load: R2 keeps the true arm unless the
            // condition was zero.
            self.mat_int(args[1], 2);
            self.mat_int(args[2], 3);
            self.mat_int(args[0], 4);
            self.ins("LTGR", "R4,R4");
            self.ins("LOCGR", "R2,R3,8");
            self.store_result_gpr(inst, 2);
            return;
        }
        let other = self.be.code_label();
        let done = self.be.code_label();
        self.mat_int(args[0], 4);
        self.ins(if self.is64() { "LTGR" } else { "LTR" }, "R4,R4");
        self.ins("BZ", &other);
        if self.ctx.types().is_float(ty) {
            self.mat_float(args[1], 0);
        } else {
            if !self.int_ok(ty) {
                return;
            }
            self.mat_int(args[1], 2);
        }
        self.ins("B", &done);
        self.place_label(&other);
        if self.ctx.types().is_float(ty) {
            self.mat_float(args[2], 0);
        } else {
            self.mat_int(args[2], 2);
        }
        self.place_label(&done);
        if self.ctx.types().is_float(ty) {
            self.store_result_fpr(inst, 0);
        } else {
            self.store_result_gpr(inst, 2);
        }
    }
}

impl S390Backend {
    fn emit_data(&mut self, ctx: &Context, module: &Module, out: &mut String) {
        let globals: Vec<_> = module.globals().collect();
        if globals.is_empty() && self.string_order.is_empty() {
            return;
        }
        comment(out, "MODULE DATA");
        stmt(out, "@DATA", "CSECT", "");
        for gv in globals {
            let data = module.global(gv);
            let symbol = self.mangle(&data.name.clone());
            if data.linkage == crate::ir::function::Linkage::External {
                stmt(out, "", "ENTRY", &symbol);
            }
            stmt(out, &symbol, "DS", "0D");
            match &data.init {
                Some(init) => {
                    let init = *init;
                    self.emit_init(ctx, module, out, init, data.ty);
                }
                None => {
                    stmt(out, "", "DC", &format!("XL{}'00'", ctx.size_of(data.ty).max(1)));
                }
            }
        }
        let strings = core::mem::take(&mut self.string_order);
        for (label, id) in &strings {
            emit_ebcdic_string(out, label, module.string(*id));
        }
        self.string_order = strings;
    }

    fn emit_init(&mut self, ctx: &Context, module: &Module, out: &mut String, init: Value, ty: Type) {
        match &module.value(init).kind {
            ValueKind::ConstInt(v) => {
                let operand = match ctx.size_of(ty) {
                    1 => format!("AL1({v})"),
                    2 => format!("H'{v}'"),
                    4 => format!("F'{v}'"),
                    _ => format!("FD'{v}'"),
                };
                stmt(out, "", "DC", &operand);
            }
            ValueKind::ConstFloat(bits) => {
                let value = f64::from_bits(*bits);
                let f32ty = ctx.size_of(ty) == 4;
                // Data constants follow the module's FP selector the same
                // way the arithmetic does.
                let ieee = match ctx.fp_format() {
                    FpFormat::Ieee => true,
                    FpFormat::Hex => false,
                    FpFormat::Mixed => ctx.has_feature(CpuFeatures::BFP),
                };
                let tycode = match (ieee, f32ty) {
                    (true, true) => "EB",
                    (true, false) => "DB",
                    (false, true) => "E",
                    (false, false) => "D",
                };
                let mut text = format!("{value:E}");
                if !text.contains('E') {
                    text.push_str("E0");
                }
                stmt(out, "", "DC", &format!("{tycode}'{text}'"));
            }
            ValueKind::ConstNull => {
                stmt(out, "", "DC", &format!("XL{}'00'", ctx.size_of(ty).max(1)));
            }
            ValueKind::ConstString(id) => {
                if ctx.types().array_info(ty).is_some() {
                    let s = module.string(*id).to_string();
                    emit_ebcdic_string(out, "", &s);
                } else {
                    let label = self.string_label(*id);
                    stmt(out, "", "DC", &format!("A({label})"));
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
            _ => comment(out, "ANVIL UNSUPPORTED INITIALIZER"),
        }
    }
}

/// ASCII to EBCDIC (code page 037), for the printable range and common
/// controls; everything else maps to the substitute character.
fn ascii_to_ebcdic(b: u8) -> u8 {
    const TABLE: [u8; 128] = [
        0x00, 0x01, 0x02, 0x03, 0x37, 0x2D, 0x2E, 0x2F, 0x16, 0x05, 0x25, 0x0B, 0x0C, 0x0D, 0x0E,
        0x0F, 0x10, 0x11, 0x12, 0x13, 0x3C, 0x3D, 0x32, 0x26, 0x18, 0x19, 0x3F, 0x27, 0x1C, 0x1D,
        0x1E, 0x1F, 0x40, 0x5A, 0x7F, 0x7B, 0x5B, 0x6C, 0x50, 0x7D, 0x4D, 0x5D, 0x5C, 0x4E, 0x6B,
        0x60, 0x4B, 0x61, 0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0x7A, 0x5E,
        0x4C, 0x7E, 0x6E, 0x6F, 0x7C, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0xD1,
        0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8,
        0xE9, 0xBA, 0xE0, 0xBB, 0xB0, 0x6D, 0x79, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88,
        0x89, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6,
        0xA7, 0xA8, 0xA9, 0xC0, 0x4F, 0xD0, 0xA1, 0x07,
    ];
    if b < 0x80 {
        TABLE[b as usize]
    } else {
        0x3F
    }
}

/// Emit a NUL-terminated string as alternating C'...' runs (printable,
/// with quote and ampersand doubling) and X'..' hex constants carrying the
/// EBCDIC bytes of the non-printables.
fn emit_ebcdic_string(out: &mut String, label: &str, s: &str) {
    let mut first = true;
    let mut run = String::new();
    let mut take_label = |first: &mut bool| -> String {
        if *first {
            *first = false;
            label.to_string()
        } else {
            String::new()
        }
    };
    for &b in s.as_bytes() {
        if (0x20..0x7f).contains(&b) {
            match b {
                b'\'' => run.push_str("''"),
                b'&' => run.push_str("&&"),
                _ => run.push(b as char),
            }
        } else {
            if !run.is_empty() {
                let l = take_label(&mut first);
                stmt(out, &l, "DC", &format!("C'{run}'"));
                run.clear();
            }
            let l = take_label(&mut first);
            stmt(out, &l, "DC", &format!("X'{:02X}'", ascii_to_ebcdic(b)));
        }
    }
    if !run.is_empty() {
        let l = take_label(&mut first);
        stmt(out, &l, "DC", &format!("C'{run}'"));
        run.clear();
    }
    // Terminator.
    let l = take_label(&mut first);
    stmt(out, &l, "DC", "X'00'");
}
