//! AArch64 lowering, GNU assembler syntax, SysV and Darwin ABI variants.
//!
//! Work registers are `x9`/`x10`/`x11` and `d16`/`d17`; results travel
//! through per-instruction frame temps addressed from `sp` above the
//! outgoing argument area. The conditional-select helper always has
//! hardware `csel`/`fcsel` on this target, so no emulation path exists
//! here.

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
use crate::settings::{Abi, Arch};
use core::fmt::Write as _;
use rustc_hash::FxHashMap;

static AARCH64_INFO: ArchInfo = ArchInfo {
    name: "aarch64",
    pointer_width: 64,
    word_size: 8,
    gpr_count: 31,
    fpr_count: 32,
    endianness: Endianness::Little,
    stack_direction: StackDirection::Down,
    has_condition_codes: true,
    has_delay_slots: false,
};

pub(crate) fn backend(_arch: Arch) -> Box<dyn TargetBackend> {
    Box::new(Aarch64Backend {
        strings: FxHashMap::default(),
        string_order: Vec::new(),
        float_lits: FxHashMap::default(),
        float_order: Vec::new(),
        label_count: 0,
    })
}

struct Aarch64Backend {
    strings: FxHashMap<StringId, String>,
    string_order: Vec<(String, StringId)>,
    float_lits: FxHashMap<(u64, u32), String>,
    float_order: Vec<(String, u64, u32)>,
    label_count: u32,
}

impl Aarch64Backend {
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

fn sym(abi: Abi, name: &str) -> String {
    match abi {
        Abi::Darwin => format!("_{name}"),
        Abi::SysV => name.to_string(),
    }
}

fn block_label(module: &Module, func: Func, block: Block) -> String {
    format!(".L{}_{}", module.func(func).name, module.block(block).name)
}

/// Integer work register `slot` at the width class of `size` bytes.
fn wreg(slot: usize, size: u32) -> String {
    let n = [9, 10, 11][slot];
    if size == 8 {
        format!("x{n}")
    } else {
        format!("w{n}")
    }
}

/// Float work register `slot` for the given type.
fn freg(slot: usize, f32ty: bool) -> String {
    let n = [16, 17][slot];
    if f32ty {
        format!("s{n}")
    } else {
        format!("d{n}")
    }
}

impl TargetBackend for Aarch64Backend {
    fn info(&self) -> &'static ArchInfo {
        &AARCH64_INFO
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
        log::debug!("lowering {} for aarch64", module.func(func).name);
        let frame = FrameLayout::compute(ctx, module, func, 8, 16);
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
    be: &'a mut Aarch64Backend,
    out: &'a mut String,
}

impl<'a> Emitter<'a> {
    fn line(&mut self, s: &str) {
        self.out.push('\t');
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn unsupported(&mut self, what: &str) {
        let _ = writeln!(self.out, "\t// anvil: unsupported {what}");
    }

    /// Locals live above the outgoing argument area, addressed from sp.
    fn slot_off(&self, off: u32) -> u32 {
        self.frame.outgoing_size + off
    }

    fn frame_bytes(&self) -> u32 {
        self.frame.locals_size + self.frame.outgoing_size
    }

    /// Materialize an arbitrary 64-bit immediate with movz/movk.
    fn load_imm(&mut self, reg_n: u32, value: u64, is64: bool) {
        let reg = if is64 {
            format!("x{reg_n}")
        } else {
            format!("w{reg_n}")
        };
        let chunks = if is64 { 4 } else { 2 };
        self.line(&format!("movz\t{}, #{}", reg, value & 0xffff));
        for i in 1..chunks {
            let chunk = (value >> (16 * i)) & 0xffff;
            if chunk != 0 {
                self.line(&format!("movk\t{}, #{}, lsl #{}", reg, chunk, 16 * i));
            }
        }
    }

    /// Materialize the address of `name` into `x{reg_n}`.
    fn load_sym(&mut self, reg_n: u32, name: &str) {
        match self.abi {
            Abi::Darwin => {
                self.line(&format!("adrp\tx{reg_n}, {name}@PAGE"));
                self.line(&format!("add\tx{reg_n}, x{reg_n}, {name}@PAGEOFF"));
            }
            Abi::SysV => {
                self.line(&format!("adrp\tx{reg_n}, {name}"));
                self.line(&format!("add\tx{reg_n}, x{reg_n}, :lo12:{name}"));
            }
        }
    }

    /// Slot load into `x/w{reg_n}` with width-correct extension.
    fn load_slot_gpr(&mut self, ty: Type, off: u32, reg_n: u32) {
        let at = self.slot_off(off);
        let size = self.ctx.size_of(ty);
        let signed = self.ctx.types().is_signed(ty);
        let mnem = match (size, signed) {
            (1, true) => "ldrsb",
            (1, false) => "ldrb",
            (2, true) => "ldrsh",
            (2, false) => "ldrh",
            _ => "ldr",
        };
        let reg = if size == 8 {
            format!("x{reg_n}")
        } else {
            format!("w{reg_n}")
        };
        self.line(&format!("{mnem}\t{reg}, [sp, #{at}]"));
    }

    /// Materialize an integer-class operand into `x/w{reg_n}`.
    fn mat_int(&mut self, v: Value, reg_n: u32) {
        let ty = self.module.value_type(v);
        let size = self.ctx.size_of(ty);
        match &self.module.value(v).kind {
            ValueKind::ConstInt(k) => self.load_imm(reg_n, *k as u64, size == 8),
            ValueKind::ConstNull => self.line(&format!("mov\tx{reg_n}, xzr")),
            ValueKind::ConstString(id) => {
                let label = self.be.string_label(*id);
                self.load_sym(reg_n, &label);
            }
            ValueKind::Global(gv) => {
                let name = sym(self.abi, &self.module.global(*gv).name);
                self.load_sym(reg_n, &name);
            }
            ValueKind::FuncAddr(f) => {
                let name = sym(self.abi, &self.module.func(*f).name);
                self.load_sym(reg_n, &name);
            }
            ValueKind::Param { .. } => {
                if let Some(off) = self.frame.param_slot(v) {
                    self.load_slot_gpr(ty, off, reg_n);
                }
            }
            ValueKind::InstResult(inst) => {
                if let Some(off) = self.frame.temp_slot(*inst) {
                    self.load_slot_gpr(ty, off, reg_n);
                }
            }
            ValueKind::ConstFloat(_) | ValueKind::ConstArray(_) => {
                self.unsupported("aggregate or float operand in integer context");
            }
        }
    }

    /// Materialize a float operand into `d/s` register `slot`.
    fn mat_float(&mut self, v: Value, slot: usize) {
        let ty = self.module.value_type(v);
        let f32ty = ty == types::F32;
        let reg = freg(slot, f32ty);
        match &self.module.value(v).kind {
            ValueKind::ConstFloat(bits) => {
                let (bits, size) = if f32ty {
                    (u64::from((f64::from_bits(*bits) as f32).to_bits()), 4)
                } else {
                    (*bits, 8)
                };
                let label = self.be.float_label(bits, size);
                self.load_sym(12, &label);
                self.line(&format!("ldr\t{reg}, [x12]"));
            }
            ValueKind::Param { .. } => {
                if let Some(off) = self.frame.param_slot(v) {
                    let at = self.slot_off(off);
                    self.line(&format!("ldr\t{reg}, [sp, #{at}]"));
                }
            }
            ValueKind::InstResult(inst) => {
                if let Some(off) = self.frame.temp_slot(*inst) {
                    let at = self.slot_off(off);
                    self.line(&format!("ldr\t{reg}, [sp, #{at}]"));
                }
            }
            _ => self.unsupported("operand in float context"),
        }
    }

    fn store_result_gpr(&mut self, inst: Inst) {
        if let (Some(result), Some(off)) = (self.module.inst_result(inst), self.frame.temp_slot(inst)) {
            let ty = self.module.value_type(result);
            let size = self.ctx.size_of(ty);
            let at = self.slot_off(off);
            let mnem = match size {
                1 => "strb",
                2 => "strh",
                _ => "str",
            };
            let reg = wreg(0, size);
            self.line(&format!("{mnem}\t{reg}, [sp, #{at}]"));
        }
    }

    fn store_result_fpr(&mut self, inst: Inst) {
        if let (Some(result), Some(off)) = (self.module.inst_result(inst), self.frame.temp_slot(inst)) {
            let f32ty = self.module.value_type(result) == types::F32;
            let at = self.slot_off(off);
            let reg = freg(0, f32ty);
            self.line(&format!("str\t{reg}, [sp, #{at}]"));
        }
    }

    fn store_phi_move(&mut self, phi_inst: Inst, value: Value) {
        let off = match self.frame.temp_slot(phi_inst) {
            Some(off) => off,
            None => return,
        };
        let ty = self.module.value_type(value);
        let at = self.slot_off(off);
        if self.ctx.types().is_float(ty) {
            self.mat_float(value, 0);
            let reg = freg(0, ty == types::F32);
            self.line(&format!("str\t{reg}, [sp, #{at}]"));
        } else {
            self.mat_int(value, 9);
            let size = self.ctx.size_of(ty);
            let mnem = match size {
                1 => "strb",
                2 => "strh",
                _ => "str",
            };
            self.line(&format!("{mnem}\t{}, [sp, #{at}]", wreg(0, size)));
        }
    }

    // ------------------------------------------------------------------

    fn function(&mut self) {
        let data = self.module.func(self.func);
        let name = sym(self.abi, &data.name);
        let blocks = data.blocks.clone();
        self.out.push('\n');
        if data.linkage == crate::ir::function::Linkage::External {
            self.line(&format!(".globl\t{name}"));
        }
        if self.abi == Abi::SysV {
            self.line(&format!(".type\t{name}, %function"));
        }
        self.line(".balign\t4");
        let _ = writeln!(self.out, "{name}:");

        self.line("stp\tx29, x30, [sp, #-16]!");
        self.line("mov\tx29, sp");
        let fb = self.frame_bytes();
        if fb > 0 {
            self.line(&format!("sub\tsp, sp, #{fb}"));
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
        let mut next_int = 0u32;
        let mut next_float = 0u32;
        let mut caller_off: u32 = 16;
        for &p in &params {
            let ty = self.module.value_type(p);
            let off = match self.frame.param_slot(p) {
                Some(off) => off,
                None => continue,
            };
            let at = self.slot_off(off);
            if self.ctx.types().is_float(ty) {
                if next_float < 8 {
                    let reg = if ty == types::F32 {
                        format!("s{next_float}")
                    } else {
                        format!("d{next_float}")
                    };
                    self.line(&format!("str\t{reg}, [sp, #{at}]"));
                    next_float += 1;
                } else {
                    self.line(&format!("ldr\tx9, [x29, #{caller_off}]"));
                    self.line(&format!("str\tx9, [sp, #{at}]"));
                    caller_off += 8;
                }
            } else if next_int < 8 {
                let size = self.ctx.size_of(ty);
                let reg = if size == 8 {
                    format!("x{next_int}")
                } else {
                    format!("w{next_int}")
                };
                self.line(&format!("str\t{reg}, [sp, #{at}]"));
                next_int += 1;
            } else {
                self.line(&format!("ldr\tx9, [x29, #{caller_off}]"));
                self.line(&format!("str\tx9, [sp, #{at}]"));
                caller_off += 8;
            }
        }
    }

    fn epilogue(&mut self) {
        let fb = self.frame_bytes();
        if fb > 0 {
            self.line(&format!("add\tsp, sp, #{fb}"));
        }
        self.line("ldp\tx29, x30, [sp], #16");
        self.line("ret");
    }

    fn implicit_return(&mut self) {
        let sig = self.module.func(self.func).sig;
        if let Some((ret, _, _)) = self.ctx.types().func_info(sig) {
            if self.ctx.types().is_float(ret) {
                self.line("fmov\td0, xzr");
            } else if !self.ctx.types().is_void(ret) {
                self.line("mov\tx0, xzr");
            }
        }
        self.epilogue();
    }

    fn ret(&mut self, value: Option<Value>) {
        if let Some(v) = value {
            let ty = self.module.value_type(v);
            if self.ctx.types().is_float(ty) {
                self.mat_float(v, 0);
                let from = freg(0, ty == types::F32);
                let to = if ty == types::F32 { "s0" } else { "d0" };
                self.line(&format!("fmov\t{to}, {from}"));
            } else if !self.ctx.types().is_void(ty) {
                self.mat_int(v, 9);
                let size = self.ctx.size_of(ty);
                if size == 8 {
                    self.line("mov\tx0, x9");
                } else {
                    self.line("mov\tw0, w9");
                }
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
                struct_ty, field, base, ..
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
            let f32ty = ty == types::F32;
            let mnem = match opcode {
                Opcode::Fadd => "fadd",
                Opcode::Fsub => "fsub",
                Opcode::Fmul => "fmul",
                Opcode::Fdiv => "fdiv",
                _ => {
                    self.unsupported(opcode.name());
                    return;
                }
            };
            self.mat_float(args[0], 0);
            self.mat_float(args[1], 1);
            let (a, b) = (freg(0, f32ty), freg(1, f32ty));
            self.line(&format!("{mnem}\t{a}, {a}, {b}"));
            self.store_result_fpr(inst);
            return;
        }
        let size = self.ctx.size_of(ty);
        self.mat_int(args[0], 9);
        self.mat_int(args[1], 10);
        let (a, b) = (wreg(0, size), wreg(1, size));
        match opcode {
            Opcode::Iadd => self.line(&format!("add\t{a}, {a}, {b}")),
            Opcode::Isub => self.line(&format!("sub\t{a}, {a}, {b}")),
            Opcode::Imul => self.line(&format!("mul\t{a}, {a}, {b}")),
            Opcode::Sdiv => self.line(&format!("sdiv\t{a}, {a}, {b}")),
            Opcode::Udiv => self.line(&format!("udiv\t{a}, {a}, {b}")),
            Opcode::Srem => {
                let t = wreg(2, size);
                self.line(&format!("sdiv\t{t}, {a}, {b}"));
                self.line(&format!("msub\t{a}, {t}, {b}, {a}"));
            }
            Opcode::Urem => {
                let t = wreg(2, size);
                self.line(&format!("udiv\t{t}, {a}, {b}"));
                self.line(&format!("msub\t{a}, {t}, {b}, {a}"));
            }
            Opcode::Band => self.line(&format!("and\t{a}, {a}, {b}")),
            Opcode::Bor => self.line(&format!("orr\t{a}, {a}, {b}")),
            Opcode::Bxor => self.line(&format!("eor\t{a}, {a}, {b}")),
            Opcode::Ishl => self.line(&format!("lsl\t{a}, {a}, {b}")),
            Opcode::Ushr => self.line(&format!("lsr\t{a}, {a}, {b}")),
            Opcode::Sshr => self.line(&format!("asr\t{a}, {a}, {b}")),
            _ => self.unsupported(opcode.name()),
        }
        self.store_result_gpr(inst);
    }

    fn unary(&mut self, inst: Inst, opcode: Opcode, arg: Value) {
        let ty = self.module.value_type(arg);
        match opcode {
            Opcode::Ineg | Opcode::Bnot => {
                let size = self.ctx.size_of(ty);
                self.mat_int(arg, 9);
                let a = wreg(0, size);
                let mnem = if opcode == Opcode::Ineg { "neg" } else { "mvn" };
                self.line(&format!("{mnem}\t{a}, {a}"));
                self.store_result_gpr(inst);
            }
            Opcode::Fneg | Opcode::Fabs => {
                let f32ty = ty == types::F32;
                self.mat_float(arg, 0);
                let a = freg(0, f32ty);
                let mnem = if opcode == Opcode::Fneg { "fneg" } else { "fabs" };
                self.line(&format!("{mnem}\t{a}, {a}"));
                self.store_result_fpr(inst);
            }
            _ => self.unsupported(opcode.name()),
        }
    }

    fn int_cond(cond: IntCC) -> &'static str {
        match cond {
            IntCC::Equal => "eq",
            IntCC::NotEqual => "ne",
            IntCC::SignedLessThan => "lt",
            IntCC::SignedLessThanOrEqual => "le",
            IntCC::SignedGreaterThan => "gt",
            IntCC::SignedGreaterThanOrEqual => "ge",
            IntCC::UnsignedLessThan => "lo",
            IntCC::UnsignedLessThanOrEqual => "ls",
            IntCC::UnsignedGreaterThan => "hi",
            IntCC::UnsignedGreaterThanOrEqual => "hs",
        }
    }

    fn icmp(&mut self, inst: Inst, cond: IntCC, args: [Value; 2]) {
        let size = self.ctx.size_of(self.module.value_type(args[0]));
        self.mat_int(args[0], 9);
        self.mat_int(args[1], 10);
        self.line(&format!("cmp\t{}, {}", wreg(0, size), wreg(1, size)));
        self.line(&format!("cset\tw9, {}", Self::int_cond(cond)));
        self.store_result_gpr(inst);
    }

    fn fcmp(&mut self, inst: Inst, cond: FloatCC, args: [Value; 2]) {
        let f32ty = self.module.value_type(args[0]) == types::F32;
        self.mat_float(args[0], 0);
        self.mat_float(args[1], 1);
        self.line(&format!("fcmp\t{}, {}", freg(0, f32ty), freg(1, f32ty)));
        // mi/ls reject the unordered outcome; gt/ge already do.
        let cc = match cond {
            FloatCC::Equal => "eq",
            FloatCC::NotEqual => "ne",
            FloatCC::LessThan => "mi",
            FloatCC::LessThanOrEqual => "ls",
            FloatCC::GreaterThan => "gt",
            FloatCC::GreaterThanOrEqual => "ge",
        };
        self.line(&format!("cset\tw9, {cc}"));
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
            Opcode::Ireduce | Opcode::PtrToInt | Opcode::IntToPtr => {
                self.mat_int(arg, 9);
                self.store_result_gpr(inst);
            }
            Opcode::Bitcast => {
                let from_f = self.ctx.types().is_float(from);
                let to_f = self.ctx.types().is_float(to);
                match (from_f, to_f) {
                    (true, false) => {
                        self.mat_float(arg, 0);
                        let size = self.ctx.size_of(to);
                        self.line(&format!("fmov\t{}, {}", wreg(0, size), freg(0, from == types::F32)));
                        self.store_result_gpr(inst);
                    }
                    (false, true) => {
                        self.mat_int(arg, 9);
                        let size = self.ctx.size_of(from);
                        self.line(&format!("fmov\t{}, {}", freg(0, to == types::F32), wreg(0, size)));
                        self.store_result_fpr(inst);
                    }
                    _ => {
                        self.mat_int(arg, 9);
                        self.store_result_gpr(inst);
                    }
                }
            }
            Opcode::Uextend | Opcode::Sextend => {
                self.mat_int(arg, 9);
                let fs = self.ctx.size_of(from);
                let wide = self.ctx.size_of(to) == 8;
                match (opcode, fs, wide) {
                    (Opcode::Uextend, 1, _) => self.line("uxtb\tw9, w9"),
                    (Opcode::Uextend, 2, _) => self.line("uxth\tw9, w9"),
                    (Opcode::Uextend, 4, true) => self.line("mov\tw9, w9"),
                    (Opcode::Sextend, 1, false) => self.line("sxtb\tw9, w9"),
                    (Opcode::Sextend, 2, false) => self.line("sxth\tw9, w9"),
                    (Opcode::Sextend, 1, true) => self.line("sxtb\tx9, w9"),
                    (Opcode::Sextend, 2, true) => self.line("sxth\tx9, w9"),
                    (Opcode::Sextend, 4, true) => self.line("sxtw\tx9, w9"),
                    _ => {}
                }
                self.store_result_gpr(inst);
            }
            Opcode::Fpromote => {
                self.mat_float(arg, 0);
                self.line("fcvt\td16, s16");
                self.store_result_fpr(inst);
            }
            Opcode::Fdemote => {
                self.mat_float(arg, 0);
                self.line("fcvt\ts16, d16");
                self.store_result_fpr(inst);
            }
            Opcode::FcvtFromSint | Opcode::FcvtFromUint => {
                self.mat_int(arg, 9);
                let mnem = if opcode == Opcode::FcvtFromSint { "scvtf" } else { "ucvtf" };
                let src = wreg(0, self.ctx.size_of(from));
                let dst = freg(0, to == types::F32);
                self.line(&format!("{mnem}\t{dst}, {src}"));
                self.store_result_fpr(inst);
            }
            Opcode::FcvtToSint | Opcode::FcvtToUint => {
                self.mat_float(arg, 0);
                let mnem = if opcode == Opcode::FcvtToSint { "fcvtzs" } else { "fcvtzu" };
                let src = freg(0, from == types::F32);
                let dst = wreg(0, self.ctx.size_of(to));
                self.line(&format!("{mnem}\t{dst}, {src}"));
                self.store_result_gpr(inst);
            }
            _ => self.unsupported(opcode.name()),
        }
    }

    fn stack_alloc(&mut self, inst: Inst) {
        if let Some(off) = self.frame.alloca_slot(inst) {
            let at = self.slot_off(off);
            self.line(&format!("add\tx9, sp, #{at}"));
            self.store_result_gpr(inst);
        }
    }

    fn load(&mut self, inst: Inst, ptr: Value) {
        let result = match self.module.inst_result(inst) {
            Some(r) => r,
            None => return,
        };
        let ty = self.module.value_type(result);
        self.mat_int(ptr, 10);
        if self.ctx.types().is_float(ty) {
            let reg = freg(0, ty == types::F32);
            self.line(&format!("ldr\t{reg}, [x10]"));
            self.store_result_fpr(inst);
            return;
        }
        let size = self.ctx.size_of(ty);
        let signed = self.ctx.types().is_signed(ty);
        let mnem = match (size, signed) {
            (1, true) => "ldrsb",
            (1, false) => "ldrb",
            (2, true) => "ldrsh",
            (2, false) => "ldrh",
            _ => "ldr",
        };
        self.line(&format!("{mnem}\t{}, [x10]", wreg(0, size)));
        self.store_result_gpr(inst);
    }

    fn store(&mut self, value: Value, ptr: Value) {
        let ty = self.module.value_type(value);
        if self.ctx.types().is_float(ty) {
            self.mat_float(value, 0);
            self.mat_int(ptr, 10);
            let reg = freg(0, ty == types::F32);
            self.line(&format!("str\t{reg}, [x10]"));
            return;
        }
        self.mat_int(value, 9);
        self.mat_int(ptr, 10);
        let size = self.ctx.size_of(ty);
        let mnem = match size {
            1 => "strb",
            2 => "strh",
            _ => "str",
        };
        self.line(&format!("{mnem}\t{}, [x10]", wreg(0, size)));
    }

    fn elem_addr(&mut self, inst: Inst, elem_ty: Type, args: &[Value]) {
        self.mat_int(args[0], 9);
        let mut cur_ty = elem_ty;
        for (n, &index) in args[1..].iter().enumerate() {
            if n > 0 {
                cur_ty = match self.ctx.types().array_info(cur_ty) {
                    Some((elem, _)) => elem,
                    None => cur_ty,
                };
            }
            let size = self.ctx.size_of(cur_ty).max(1);
            self.mat_int(index, 10);
            // Index arithmetic happens at pointer width; the slot load
            // already extended the index.
            if size.is_power_of_two() {
                if size > 1 {
                    self.line(&format!("lsl\tx10, x10, #{}", size.trailing_zeros()));
                }
            } else {
                self.load_imm(11, u64::from(size), true);
                self.line("mul\tx10, x10, x11");
            }
            self.line("add\tx9, x9, x10");
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
        self.mat_int(base, 9);
        if offset > 0 {
            self.line(&format!("add\tx9, x9, #{offset}"));
        }
        self.store_result_gpr(inst);
    }

    fn call(&mut self, inst: Inst, _sig: Type, args: &[Value]) {
        let callee = args[0];
        let actuals = &args[1..];
        let mut next_int = 0u32;
        let mut next_float = 0u32;
        let mut stack_off = 0u32;
        for &arg in actuals {
            let ty = self.module.value_type(arg);
            if self.ctx.types().is_float(ty) {
                if next_float < 8 {
                    self.mat_float(arg, 0);
                    let from = freg(0, ty == types::F32);
                    let to = if ty == types::F32 {
                        format!("s{next_float}")
                    } else {
                        format!("d{next_float}")
                    };
                    self.line(&format!("fmov\t{to}, {from}"));
                    next_float += 1;
                } else {
                    self.mat_float(arg, 0);
                    let reg = freg(0, ty == types::F32);
                    self.line(&format!("str\t{reg}, [sp, #{stack_off}]"));
                    stack_off += 8;
                }
            } else if next_int < 8 {
                self.mat_int(arg, 9);
                let size = self.ctx.size_of(ty);
                if size == 8 {
                    self.line(&format!("mov\tx{next_int}, x9"));
                } else {
                    self.line(&format!("mov\tw{next_int}, w9"));
                }
                next_int += 1;
            } else {
                self.mat_int(arg, 9);
                self.line(&format!("str\tx9, [sp, #{stack_off}]"));
                stack_off += 8;
            }
        }
        match &self.module.value(callee).kind {
            ValueKind::FuncAddr(f) => {
                let name = sym(self.abi, &self.module.func(*f).name);
                self.line(&format!("bl\t{name}"));
            }
            _ => {
                self.mat_int(callee, 11);
                self.line("blr\tx11");
            }
        }
        if let Some(result) = self.module.inst_result(inst) {
            let ty = self.module.value_type(result);
            if let Some(off) = self.frame.temp_slot(inst) {
                let at = self.slot_off(off);
                if self.ctx.types().is_float(ty) {
                    let reg = if ty == types::F32 { "s0" } else { "d0" };
                    self.line(&format!("str\t{reg}, [sp, #{at}]"));
                } else {
                    let size = self.ctx.size_of(ty);
                    let mnem = match size {
                        1 => "strb",
                        2 => "strh",
                        _ => "str",
                    };
                    let reg = if size == 8 { "x0" } else { "w0" };
                    self.line(&format!("{mnem}\t{reg}, [sp, #{at}]"));
                }
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
        self.mat_int(cond, 9);
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
        self.line(&format!("cbnz\tw9, {then_target}"));
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
        if self.ctx.types().is_float(ty) {
            let f32ty = ty == types::F32;
            self.mat_float(args[1], 0);
            self.mat_float(args[2], 1);
            self.mat_int(args[0], 9);
            self.line("cmp\tw9, #0");
            let (a, b) = (freg(0, f32ty), freg(1, f32ty));
            self.line(&format!("fcsel\t{a}, {a}, {b}, ne"));
            self.store_result_fpr(inst);
            return;
        }
        let size = self.ctx.size_of(ty);
        self.mat_int(args[1], 10);
        self.mat_int(args[2], 11);
        self.mat_int(args[0], 9);
        self.line("cmp\tw9, #0");
        let (d, a, b) = (wreg(0, size), wreg(1, size), wreg(2, size));
        self.line(&format!("csel\t{d}, {a}, {b}, ne"));
        self.store_result_gpr(inst);
    }
}

impl Aarch64Backend {
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
                let _ = writeln!(out, "\t.balign\t{align}");
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
                    let _ = writeln!(out, "\t.quad\t{label}");
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
                let _ = writeln!(out, "\t// anvil: unsupported initializer");
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
