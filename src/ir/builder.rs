//! The instruction builder.
//!
//! One strongly-typed constructor per operation. Every constructor checks
//! its input contract, then appends exactly one instruction to the block
//! referenced by the context's insertion point. No terminator is ever
//! generated implicitly; callers terminate each block themselves.

use crate::context::Context;
use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::entities::{Block, Func, Inst, Type, Value};
use crate::ir::instructions::{InstructionData, Opcode};
use crate::ir::module::Module;
use crate::ir::types;
use crate::result::{CodegenError, CodegenResult};
use smallvec::SmallVec;

/// Builds instructions at the context's insertion point.
pub struct Builder<'a> {
    ctx: &'a mut Context,
    module: &'a mut Module,
}

impl<'a> Builder<'a> {
    /// Create a builder over `module` driven by `ctx`'s insertion point.
    pub fn new(ctx: &'a mut Context, module: &'a mut Module) -> Self {
        Self { ctx, module }
    }

    /// The module being built.
    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    /// The context driving this builder.
    pub fn ctx(&mut self) -> &mut Context {
        self.ctx
    }

    fn block(&self) -> CodegenResult<Block> {
        self.ctx
            .insert_point()
            .ok_or_else(|| CodegenError::Internal("no active insertion block".to_string()))
    }

    fn current_func(&self) -> CodegenResult<Func> {
        Ok(self.module.block(self.block()?).func)
    }

    fn invalid(op: &str, msg: &str) -> CodegenError {
        CodegenError::InvalidArgument(format!("{op}: {msg}"))
    }

    fn push(&mut self, data: InstructionData) -> CodegenResult<Inst> {
        let block = self.block()?;
        let inst = self.module.make_inst(data);
        self.module.append_inst(block, inst);
        Ok(inst)
    }

    fn push_with_result(
        &mut self,
        data: InstructionData,
        ty: Type,
        is_bool: bool,
    ) -> CodegenResult<Value> {
        let inst = self.push(data)?;
        Ok(self.module.attach_result(inst, ty, is_bool))
    }

    fn check_same_type(&self, op: &str, x: Value, y: Value) -> CodegenResult<Type> {
        let tx = self.module.value_type(x);
        let ty = self.module.value_type(y);
        if tx != ty {
            return Err(Self::invalid(op, "operand types must match"));
        }
        Ok(tx)
    }

    fn check_int(&self, op: &str, v: Value) -> CodegenResult<Type> {
        let ty = self.module.value_type(v);
        if !self.ctx.types().is_int(ty) {
            return Err(Self::invalid(op, "operand must be an integer"));
        }
        Ok(ty)
    }

    fn check_float(&self, op: &str, v: Value) -> CodegenResult<Type> {
        let ty = self.module.value_type(v);
        if !self.ctx.types().is_float(ty) {
            return Err(Self::invalid(op, "operand must be floating point"));
        }
        Ok(ty)
    }

    fn check_ptr(&self, op: &str, v: Value) -> CodegenResult<Type> {
        let ty = self.module.value_type(v);
        if !self.ctx.types().is_ptr(ty) {
            return Err(Self::invalid(op, "operand must be a pointer"));
        }
        Ok(ty)
    }

    fn int_binary(&mut self, opcode: Opcode, x: Value, y: Value) -> CodegenResult<Value> {
        let ty = self.check_same_type(opcode.name(), x, y)?;
        self.check_int(opcode.name(), x)?;
        self.push_with_result(InstructionData::Binary { opcode, args: [x, y] }, ty, false)
    }

    fn float_binary(&mut self, opcode: Opcode, x: Value, y: Value) -> CodegenResult<Value> {
        let ty = self.check_same_type(opcode.name(), x, y)?;
        self.check_float(opcode.name(), x)?;
        self.push_with_result(InstructionData::Binary { opcode, args: [x, y] }, ty, false)
    }

    // ------------------------------------------------------------------
    // Integer arithmetic and bitwise operations.

    pub fn iadd(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Iadd, x, y)
    }

    pub fn isub(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Isub, x, y)
    }

    pub fn imul(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Imul, x, y)
    }

    pub fn sdiv(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Sdiv, x, y)
    }

    pub fn udiv(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Udiv, x, y)
    }

    pub fn srem(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Srem, x, y)
    }

    pub fn urem(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Urem, x, y)
    }

    pub fn band(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Band, x, y)
    }

    pub fn bor(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Bor, x, y)
    }

    pub fn bxor(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.int_binary(Opcode::Bxor, x, y)
    }

    /// Shift left; the result type is the type of the shifted value.
    pub fn ishl(&mut self, x: Value, amount: Value) -> CodegenResult<Value> {
        let ty = self.check_int("ishl", x)?;
        self.check_int("ishl", amount)?;
        self.push_with_result(
            InstructionData::Binary {
                opcode: Opcode::Ishl,
                args: [x, amount],
            },
            ty,
            false,
        )
    }

    /// Logical shift right.
    pub fn ushr(&mut self, x: Value, amount: Value) -> CodegenResult<Value> {
        let ty = self.check_int("ushr", x)?;
        self.check_int("ushr", amount)?;
        self.push_with_result(
            InstructionData::Binary {
                opcode: Opcode::Ushr,
                args: [x, amount],
            },
            ty,
            false,
        )
    }

    /// Arithmetic shift right.
    pub fn sshr(&mut self, x: Value, amount: Value) -> CodegenResult<Value> {
        let ty = self.check_int("sshr", x)?;
        self.check_int("sshr", amount)?;
        self.push_with_result(
            InstructionData::Binary {
                opcode: Opcode::Sshr,
                args: [x, amount],
            },
            ty,
            false,
        )
    }

    pub fn ineg(&mut self, x: Value) -> CodegenResult<Value> {
        let ty = self.check_int("ineg", x)?;
        self.push_with_result(
            InstructionData::Unary {
                opcode: Opcode::Ineg,
                arg: x,
            },
            ty,
            false,
        )
    }

    pub fn bnot(&mut self, x: Value) -> CodegenResult<Value> {
        let ty = self.check_int("bnot", x)?;
        self.push_with_result(
            InstructionData::Unary {
                opcode: Opcode::Bnot,
                arg: x,
            },
            ty,
            false,
        )
    }

    // ------------------------------------------------------------------
    // Comparisons.

    /// Integer (or pointer) comparison; produces a single-byte boolean.
    pub fn icmp(&mut self, cond: IntCC, x: Value, y: Value) -> CodegenResult<Value> {
        let ty = self.check_same_type("icmp", x, y)?;
        if !self.ctx.types().is_int(ty) && !self.ctx.types().is_ptr(ty) {
            return Err(Self::invalid("icmp", "operands must be integers or pointers"));
        }
        self.push_with_result(
            InstructionData::IntCompare { cond, args: [x, y] },
            types::I8,
            true,
        )
    }

    /// Float comparison; produces a single-byte boolean.
    pub fn fcmp(&mut self, cond: FloatCC, x: Value, y: Value) -> CodegenResult<Value> {
        self.check_same_type("fcmp", x, y)?;
        self.check_float("fcmp", x)?;
        self.push_with_result(
            InstructionData::FloatCompare { cond, args: [x, y] },
            types::I8,
            true,
        )
    }

    // ------------------------------------------------------------------
    // Floating point arithmetic.

    pub fn fadd(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.float_binary(Opcode::Fadd, x, y)
    }

    pub fn fsub(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.float_binary(Opcode::Fsub, x, y)
    }

    pub fn fmul(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.float_binary(Opcode::Fmul, x, y)
    }

    pub fn fdiv(&mut self, x: Value, y: Value) -> CodegenResult<Value> {
        self.float_binary(Opcode::Fdiv, x, y)
    }

    pub fn fneg(&mut self, x: Value) -> CodegenResult<Value> {
        let ty = self.check_float("fneg", x)?;
        self.push_with_result(
            InstructionData::Unary {
                opcode: Opcode::Fneg,
                arg: x,
            },
            ty,
            false,
        )
    }

    pub fn fabs(&mut self, x: Value) -> CodegenResult<Value> {
        let ty = self.check_float("fabs", x)?;
        self.push_with_result(
            InstructionData::Unary {
                opcode: Opcode::Fabs,
                arg: x,
            },
            ty,
            false,
        )
    }

    // ------------------------------------------------------------------
    // Conversions. Each takes the destination type first.

    fn conversion(&mut self, opcode: Opcode, to: Type, x: Value) -> CodegenResult<Value> {
        self.push_with_result(InstructionData::Conversion { opcode, arg: x }, to, false)
    }

    /// Truncate an integer to a narrower integer type.
    pub fn ireduce(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        let from = self.check_int("ireduce", x)?;
        let (fb, tb) = (
            self.ctx.types().int_bits(from).unwrap_or(0),
            self.ctx.types().int_bits(to).unwrap_or(0),
        );
        if tb == 0 || tb > fb {
            return Err(Self::invalid("ireduce", "destination must be a narrower integer"));
        }
        self.conversion(Opcode::Ireduce, to, x)
    }

    /// Zero-extend an integer to a wider integer type.
    pub fn uextend(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        let from = self.check_int("uextend", x)?;
        let (fb, tb) = (
            self.ctx.types().int_bits(from).unwrap_or(0),
            self.ctx.types().int_bits(to).unwrap_or(0),
        );
        if tb == 0 || tb < fb {
            return Err(Self::invalid("uextend", "destination must be a wider integer"));
        }
        self.conversion(Opcode::Uextend, to, x)
    }

    /// Sign-extend an integer to a wider integer type.
    pub fn sextend(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        let from = self.check_int("sextend", x)?;
        let (fb, tb) = (
            self.ctx.types().int_bits(from).unwrap_or(0),
            self.ctx.types().int_bits(to).unwrap_or(0),
        );
        if tb == 0 || tb < fb {
            return Err(Self::invalid("sextend", "destination must be a wider integer"));
        }
        self.conversion(Opcode::Sextend, to, x)
    }

    /// Reinterpret bits as another type of the same size.
    pub fn bitcast(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        let from = self.module.value_type(x);
        if self.ctx.size_of(from) != self.ctx.size_of(to) {
            return Err(Self::invalid("bitcast", "types must have the same size"));
        }
        self.conversion(Opcode::Bitcast, to, x)
    }

    /// Convert a pointer to an integer.
    pub fn ptr_to_int(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        self.check_ptr("ptr_to_int", x)?;
        if !self.ctx.types().is_int(to) {
            return Err(Self::invalid("ptr_to_int", "destination must be an integer"));
        }
        self.conversion(Opcode::PtrToInt, to, x)
    }

    /// Convert an integer to a pointer.
    pub fn int_to_ptr(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        self.check_int("int_to_ptr", x)?;
        if !self.ctx.types().is_ptr(to) {
            return Err(Self::invalid("int_to_ptr", "destination must be a pointer"));
        }
        self.conversion(Opcode::IntToPtr, to, x)
    }

    /// Promote f32 to f64.
    pub fn fpromote(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        let from = self.check_float("fpromote", x)?;
        if from != types::F32 || to != types::F64 {
            return Err(Self::invalid("fpromote", "must promote f32 to f64"));
        }
        self.conversion(Opcode::Fpromote, to, x)
    }

    /// Demote f64 to f32.
    pub fn fdemote(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        let from = self.check_float("fdemote", x)?;
        if from != types::F64 || to != types::F32 {
            return Err(Self::invalid("fdemote", "must demote f64 to f32"));
        }
        self.conversion(Opcode::Fdemote, to, x)
    }

    /// Convert a signed integer to floating point.
    pub fn fcvt_from_sint(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        self.check_int("fcvt_from_sint", x)?;
        if !self.ctx.types().is_float(to) {
            return Err(Self::invalid("fcvt_from_sint", "destination must be floating point"));
        }
        self.conversion(Opcode::FcvtFromSint, to, x)
    }

    /// Convert an unsigned integer to floating point.
    pub fn fcvt_from_uint(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        self.check_int("fcvt_from_uint", x)?;
        if !self.ctx.types().is_float(to) {
            return Err(Self::invalid("fcvt_from_uint", "destination must be floating point"));
        }
        self.conversion(Opcode::FcvtFromUint, to, x)
    }

    /// Convert floating point to a signed integer, truncating.
    pub fn fcvt_to_sint(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        self.check_float("fcvt_to_sint", x)?;
        if !self.ctx.types().is_int(to) {
            return Err(Self::invalid("fcvt_to_sint", "destination must be an integer"));
        }
        self.conversion(Opcode::FcvtToSint, to, x)
    }

    /// Convert floating point to an unsigned integer, truncating.
    pub fn fcvt_to_uint(&mut self, to: Type, x: Value) -> CodegenResult<Value> {
        self.check_float("fcvt_to_uint", x)?;
        if !self.ctx.types().is_int(to) {
            return Err(Self::invalid("fcvt_to_uint", "destination must be an integer"));
        }
        self.conversion(Opcode::FcvtToUint, to, x)
    }

    // ------------------------------------------------------------------
    // Memory.

    /// Reserve a stack slot for a value of `ty`; returns its address.
    pub fn stack_alloc(&mut self, ty: Type) -> CodegenResult<Value> {
        if self.ctx.types().is_void(ty) {
            return Err(Self::invalid("stack_alloc", "cannot allocate void"));
        }
        let ptr = self.ctx.ptr_type(ty);
        self.push_with_result(InstructionData::StackAlloc { alloc_ty: ty }, ptr, false)
    }

    /// Load a value of `ty` through `ptr`; the pointee must agree.
    pub fn load(&mut self, ty: Type, ptr: Value) -> CodegenResult<Value> {
        let pty = self.check_ptr("load", ptr)?;
        if self.ctx.types().pointee(pty) != Some(ty) {
            return Err(Self::invalid("load", "pointee type does not match"));
        }
        self.push_with_result(InstructionData::Load { ptr }, ty, false)
    }

    /// Store `value` through `ptr`; the pointee must agree.
    pub fn store(&mut self, value: Value, ptr: Value) -> CodegenResult<Inst> {
        let pty = self.check_ptr("store", ptr)?;
        if self.ctx.types().pointee(pty) != Some(self.module.value_type(value)) {
            return Err(Self::invalid("store", "pointee type does not match"));
        }
        self.push(InstructionData::Store { args: [value, ptr] })
    }

    /// Compute the address of an element: `base` plus each index scaled by
    /// the element size of `elem_ty` (and of nested array element types for
    /// further indices). Returns a pointer to `elem_ty`.
    pub fn elem_addr(
        &mut self,
        elem_ty: Type,
        base: Value,
        indices: &[Value],
    ) -> CodegenResult<Value> {
        self.check_ptr("elem_addr", base)?;
        if indices.is_empty() {
            return Err(Self::invalid("elem_addr", "at least one index is required"));
        }
        for &index in indices {
            self.check_int("elem_addr", index)?;
        }
        let mut args: SmallVec<[Value; 3]> = SmallVec::new();
        args.push(base);
        args.extend_from_slice(indices);
        let ptr = self.ctx.ptr_type(elem_ty);
        self.push_with_result(InstructionData::ElemAddr { elem_ty, args }, ptr, false)
    }

    /// Compute the address of field `field` of the struct pointed to by
    /// `base`. Returns a pointer to the field's type.
    pub fn field_addr(&mut self, struct_ty: Type, base: Value, field: u32) -> CodegenResult<Value> {
        self.check_ptr("field_addr", base)?;
        let field_ty = match self.ctx.types().struct_info(struct_ty) {
            Some((fields, _)) => match fields.get(field as usize) {
                Some(&ty) => ty,
                None => return Err(Self::invalid("field_addr", "field index out of range")),
            },
            None => return Err(Self::invalid("field_addr", "type is not a struct")),
        };
        let ptr = self.ctx.ptr_type(field_ty);
        self.push_with_result(
            InstructionData::FieldAddr {
                struct_ty,
                field,
                base,
            },
            ptr,
            false,
        )
    }

    // ------------------------------------------------------------------
    // Calls.

    /// Call `callee` with signature `sig`. Returns the result value, or
    /// `None` for a void return.
    pub fn call(&mut self, sig: Type, callee: Value, args: &[Value]) -> CodegenResult<Option<Value>> {
        let (ret, params, variadic) = match self.ctx.types().func_info(sig) {
            Some(info) => (info.0, info.1.to_vec(), info.2),
            None => return Err(Self::invalid("call", "signature is not a function type")),
        };
        let callee_ty = self.module.value_type(callee);
        let callee_ok = callee_ty == sig
            || self.ctx.types().pointee(callee_ty) == Some(sig);
        if !callee_ok {
            return Err(Self::invalid("call", "callee does not have the given signature"));
        }
        if args.len() < params.len() || (!variadic && args.len() != params.len()) {
            return Err(Self::invalid("call", "argument count does not match signature"));
        }
        for (&arg, &param) in args.iter().zip(params.iter()) {
            if self.module.value_type(arg) != param {
                return Err(Self::invalid("call", "argument type does not match parameter"));
            }
        }
        let mut all: SmallVec<[Value; 4]> = SmallVec::new();
        all.push(callee);
        all.extend_from_slice(args);
        if self.ctx.types().is_void(ret) {
            self.push(InstructionData::Call { sig, args: all })?;
            Ok(None)
        } else {
            let v = self.push_with_result(InstructionData::Call { sig, args: all }, ret, false)?;
            Ok(Some(v))
        }
    }

    // ------------------------------------------------------------------
    // Control flow.

    fn check_target(&self, op: &str, dest: Block) -> CodegenResult<()> {
        if self.module.block(dest).func != self.current_func()? {
            return Err(Self::invalid(op, "target block belongs to another function"));
        }
        Ok(())
    }

    /// Unconditional branch.
    pub fn jump(&mut self, dest: Block) -> CodegenResult<Inst> {
        self.check_target("jump", dest)?;
        self.push(InstructionData::Jump { dest })
    }

    /// Conditional branch on a non-zero condition.
    pub fn brif(&mut self, cond: Value, then_dest: Block, else_dest: Block) -> CodegenResult<Inst> {
        let cty = self.module.value_type(cond);
        if !self.ctx.types().is_int(cty) {
            return Err(Self::invalid("brif", "condition must be an integer"));
        }
        self.check_target("brif", then_dest)?;
        self.check_target("brif", else_dest)?;
        self.push(InstructionData::Brif {
            cond,
            dests: [then_dest, else_dest],
        })
    }

    /// Return from the current function.
    pub fn ret(&mut self, value: Option<Value>) -> CodegenResult<Inst> {
        let func = self.current_func()?;
        let sig = self.module.func(func).sig;
        let ret_ty = self
            .ctx
            .types()
            .func_info(sig)
            .map(|(ret, _, _)| ret)
            .ok_or_else(|| Self::invalid("return", "function has no signature"))?;
        match value {
            Some(v) => {
                if self.module.value_type(v) != ret_ty {
                    return Err(Self::invalid("return", "operand type does not match return type"));
                }
            }
            None => {
                if !self.ctx.types().is_void(ret_ty) {
                    return Err(Self::invalid("return", "missing operand for non-void return"));
                }
            }
        }
        self.push(InstructionData::Return { arg: value })
    }

    // ------------------------------------------------------------------
    // Misc.

    /// Create an empty φ-node of type `ty`. Incoming pairs are added with
    /// `add_phi_incoming`.
    pub fn phi(&mut self, ty: Type) -> CodegenResult<Value> {
        self.push_with_result(
            InstructionData::Phi {
                args: SmallVec::new(),
                preds: SmallVec::new(),
            },
            ty,
            false,
        )
    }

    /// Add an incoming (value, predecessor) pair to a φ-node.
    pub fn add_phi_incoming(&mut self, phi: Value, value: Value, pred: Block) -> CodegenResult<()> {
        let inst = self
            .module
            .producer(phi)
            .ok_or_else(|| Self::invalid("phi", "value is not a phi result"))?;
        if self.module.value_type(value) != self.module.value_type(phi) {
            return Err(Self::invalid("phi", "incoming type does not match phi type"));
        }
        let phi_block = self
            .module
            .inst_block(inst)
            .ok_or_else(|| Self::invalid("phi", "phi is not inserted in a block"))?;
        let phi_func = self.module.block(phi_block).func;
        if self.module.block(pred).func != phi_func {
            return Err(Self::invalid("phi", "predecessor belongs to another function"));
        }
        match self.module.inst_mut(inst) {
            InstructionData::Phi { args, preds } => {
                args.push(value);
                preds.push(pred);
                Ok(())
            }
            _ => Err(Self::invalid("phi", "value is not a phi result")),
        }
    }

    /// Choose between `x` and `y` on a non-zero condition.
    pub fn select(&mut self, cond: Value, x: Value, y: Value) -> CodegenResult<Value> {
        let cty = self.module.value_type(cond);
        if !self.ctx.types().is_int(cty) {
            return Err(Self::invalid("select", "condition must be an integer"));
        }
        let ty = self.check_same_type("select", x, y)?;
        self.push_with_result(InstructionData::Select { args: [cond, x, y] }, ty, false)
    }
}
