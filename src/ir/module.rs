//! The module: root owner of all IR objects.
//!
//! Functions, globals, blocks, instructions and values are stored in dense
//! arenas keyed by entity references. Cross-references between IR objects
//! are indices into these arenas, so the cyclic graph (operands pointing at
//! producing instructions, branches pointing at blocks) involves no owning
//! pointers between peers and teardown is a plain drop.

use crate::entity::{PrimaryMap, SecondaryMap};
use crate::ir::entities::{Block, Func, GlobalVar, Inst, StringId, Type, Value};
use crate::ir::function::{BlockData, FunctionData, Linkage};
use crate::ir::instructions::InstructionData;
use crate::settings::CallConv;
use rustc_hash::FxHashMap;

/// What a value is.
#[derive(Clone, PartialEq, Debug)]
pub enum ValueKind {
    /// Integer constant, stored sign-extended.
    ConstInt(i64),
    /// Floating constant, stored as the bits of the `f64` value.
    ConstFloat(u64),
    /// Null pointer constant.
    ConstNull,
    /// Pointer to an interned string.
    ConstString(StringId),
    /// Constant aggregate; elements are themselves constant values.
    ConstArray(Vec<Value>),
    /// Address of a global variable.
    Global(GlobalVar),
    /// Address of a function.
    FuncAddr(Func),
    /// Parameter `index` of `func`.
    Param { func: Func, index: u32 },
    /// Result of an instruction; the back-link to its producer.
    InstResult(Inst),
}

/// A value: kind, type, optional name, and the boolean property used to
/// skip redundant zero-compares downstream.
#[derive(Clone, Debug)]
pub struct ValueData {
    pub kind: ValueKind,
    pub ty: Type,
    pub name: Option<String>,
    pub is_bool: bool,
}

/// A global variable.
#[derive(Clone, Debug)]
pub struct GlobalData {
    pub name: String,
    pub ty: Type,
    pub linkage: Linkage,
    /// Constant initializer; `None` means zero-fill.
    pub init: Option<Value>,
    /// The value handle representing this global's address.
    pub handle: Value,
}

/// A compilation module.
pub struct Module {
    /// Module name, used in emitted file headers.
    pub name: String,
    funcs: PrimaryMap<Func, FunctionData>,
    globals: PrimaryMap<GlobalVar, GlobalData>,
    blocks: PrimaryMap<Block, BlockData>,
    insts: PrimaryMap<Inst, InstructionData>,
    values: PrimaryMap<Value, ValueData>,
    results: SecondaryMap<Inst, Option<Value>>,
    inst_blocks: SecondaryMap<Inst, Option<Block>>,
    strings: PrimaryMap<StringId, String>,
    string_index: FxHashMap<String, StringId>,
}

impl Module {
    /// Create an empty module.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            funcs: PrimaryMap::new(),
            globals: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            values: PrimaryMap::new(),
            results: SecondaryMap::new(),
            inst_blocks: SecondaryMap::new(),
            strings: PrimaryMap::new(),
            string_index: FxHashMap::default(),
        }
    }

    // ------------------------------------------------------------------
    // Functions.

    /// Define a function with a body to be filled in.
    ///
    /// Parameter values are created eagerly, one per signature parameter.
    pub fn create_function(
        &mut self,
        name: &str,
        sig: Type,
        linkage: Linkage,
        param_types: &[Type],
    ) -> Func {
        let func = self.funcs.next_key();
        let params = param_types
            .iter()
            .enumerate()
            .map(|(index, &ty)| {
                self.values.push(ValueData {
                    kind: ValueKind::Param {
                        func,
                        index: index as u32,
                    },
                    ty,
                    name: None,
                    is_bool: false,
                })
            })
            .collect();
        self.funcs.push(FunctionData {
            name: name.to_string(),
            sig,
            linkage,
            call_conv: CallConv::Default,
            blocks: Vec::new(),
            params,
            handle: None,
            is_declaration: false,
        })
    }

    /// Declare an external function with no body.
    pub fn declare_function(&mut self, name: &str, sig: Type) -> Func {
        let func = self.create_function(name, sig, Linkage::External, &[]);
        self.funcs[func].is_declaration = true;
        func
    }

    /// Get a function's data.
    pub fn func(&self, func: Func) -> &FunctionData {
        &self.funcs[func]
    }

    /// Get a function's data, mutably.
    pub fn func_mut(&mut self, func: Func) -> &mut FunctionData {
        &mut self.funcs[func]
    }

    /// Iterate over all functions in creation order.
    pub fn funcs(&self) -> impl Iterator<Item = Func> {
        self.funcs.keys()
    }

    /// Parameter `index` of `func`.
    pub fn func_param(&self, func: Func, index: usize) -> Option<Value> {
        self.funcs[func].params.get(index).copied()
    }

    /// The value handle for referencing `func` as a call operand.
    pub fn func_addr(&mut self, func: Func) -> Value {
        if let Some(v) = self.funcs[func].handle {
            return v;
        }
        let sig = self.funcs[func].sig;
        let v = self.values.push(ValueData {
            kind: ValueKind::FuncAddr(func),
            ty: sig,
            name: Some(self.funcs[func].name.clone()),
            is_bool: false,
        });
        self.funcs[func].handle = Some(v);
        v
    }

    // ------------------------------------------------------------------
    // Blocks.

    /// Append a new empty block to `func`.
    pub fn create_block(&mut self, func: Func, name: &str) -> Block {
        let block = self.blocks.push(BlockData {
            name: name.to_string(),
            func,
            insts: Vec::new(),
        });
        self.funcs[func].blocks.push(block);
        block
    }

    /// Get a block's data.
    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block]
    }

    /// Get a block's data, mutably.
    pub fn block_mut(&mut self, block: Block) -> &mut BlockData {
        &mut self.blocks[block]
    }

    /// Whether `block` ends with a terminator.
    pub fn is_terminated(&self, block: Block) -> bool {
        self.blocks[block]
            .insts
            .last()
            .map(|&inst| self.insts[inst].opcode().is_terminator())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Instructions.

    /// Allocate an instruction without inserting it anywhere.
    pub fn make_inst(&mut self, data: InstructionData) -> Inst {
        self.insts.push(data)
    }

    /// Attach a result value to `inst`.
    pub fn attach_result(&mut self, inst: Inst, ty: Type, is_bool: bool) -> Value {
        debug_assert!(self.results[inst].is_none());
        let v = self.values.push(ValueData {
            kind: ValueKind::InstResult(inst),
            ty,
            name: None,
            is_bool,
        });
        self.results[inst] = Some(v);
        v
    }

    /// Append `inst` at the end of `block`.
    pub fn append_inst(&mut self, block: Block, inst: Inst) {
        self.blocks[block].insts.push(inst);
        self.inst_blocks[inst] = Some(block);
    }

    /// Remove `inst` from `block`'s layout. The arena entry stays so
    /// existing references remain valid; it is simply no longer executed.
    pub fn remove_inst(&mut self, block: Block, inst: Inst) {
        self.blocks[block].insts.retain(|&i| i != inst);
        self.inst_blocks[inst] = None;
    }

    /// The block currently containing `inst`, if it is inserted anywhere.
    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.inst_blocks[inst]
    }

    /// Move every instruction of `from` to the end of `to`, in order.
    pub fn move_insts(&mut self, from: Block, to: Block) {
        let moved = core::mem::take(&mut self.blocks[from].insts);
        for &inst in &moved {
            self.inst_blocks[inst] = Some(to);
        }
        self.blocks[to].insts.extend(moved);
    }

    /// Drop `block` from `func`'s layout. The arena entry stays valid.
    pub fn remove_block(&mut self, func: Func, block: Block) {
        self.funcs[func].blocks.retain(|&b| b != block);
    }

    /// Get an instruction's data.
    pub fn inst(&self, inst: Inst) -> &InstructionData {
        &self.insts[inst]
    }

    /// Get an instruction's data, mutably.
    pub fn inst_mut(&mut self, inst: Inst) -> &mut InstructionData {
        &mut self.insts[inst]
    }

    /// The result value of `inst`, if it produces one.
    pub fn inst_result(&self, inst: Inst) -> Option<Value> {
        self.results[inst]
    }

    // ------------------------------------------------------------------
    // Values and constants.

    /// Get a value's data.
    pub fn value(&self, value: Value) -> &ValueData {
        &self.values[value]
    }

    /// Get a value's type.
    pub fn value_type(&self, value: Value) -> Type {
        self.values[value].ty
    }

    /// Whether the value carries the is-boolean property.
    pub fn value_is_bool(&self, value: Value) -> bool {
        self.values[value].is_bool
    }

    /// Set a value's diagnostic name.
    pub fn set_value_name(&mut self, value: Value, name: &str) {
        self.values[value].name = Some(name.to_string());
    }

    /// Total number of values allocated, including orphaned ones.
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Create an integer constant of type `ty`.
    pub fn const_int(&mut self, ty: Type, v: i64) -> Value {
        self.values.push(ValueData {
            kind: ValueKind::ConstInt(v),
            ty,
            name: None,
            is_bool: false,
        })
    }

    /// Create a floating constant of type `ty`.
    pub fn const_float(&mut self, ty: Type, v: f64) -> Value {
        self.values.push(ValueData {
            kind: ValueKind::ConstFloat(v.to_bits()),
            ty,
            name: None,
            is_bool: false,
        })
    }

    /// Create a null pointer constant of pointer type `ty`.
    pub fn const_null(&mut self, ty: Type) -> Value {
        self.values.push(ValueData {
            kind: ValueKind::ConstNull,
            ty,
            name: None,
            is_bool: false,
        })
    }

    /// Create a string constant of pointer type `ty`, interning the bytes
    /// in the module's string pool.
    pub fn const_string(&mut self, ty: Type, s: &str) -> Value {
        let id = self.intern_string(s);
        self.values.push(ValueData {
            kind: ValueKind::ConstString(id),
            ty,
            name: None,
            is_bool: false,
        })
    }

    /// Create a constant aggregate of array type `ty`.
    pub fn const_array(&mut self, ty: Type, elems: &[Value]) -> Value {
        self.values.push(ValueData {
            kind: ValueKind::ConstArray(elems.to_vec()),
            ty,
            name: None,
            is_bool: false,
        })
    }

    /// If `value` is an integer constant, its payload.
    pub fn as_const_int(&self, value: Value) -> Option<i64> {
        match self.values[value].kind {
            ValueKind::ConstInt(v) => Some(v),
            _ => None,
        }
    }

    /// If `value` is a floating constant, its payload.
    pub fn as_const_float(&self, value: Value) -> Option<f64> {
        match self.values[value].kind {
            ValueKind::ConstFloat(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }

    /// The instruction producing `value`, when it is an instruction result.
    pub fn producer(&self, value: Value) -> Option<Inst> {
        match self.values[value].kind {
            ValueKind::InstResult(inst) => Some(inst),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Globals.

    /// Add a global variable; `init == None` requests zero-fill.
    pub fn add_global(
        &mut self,
        name: &str,
        ty: Type,
        ptr_ty: Type,
        linkage: Linkage,
        init: Option<Value>,
    ) -> GlobalVar {
        let gv = self.globals.next_key();
        let handle = self.values.push(ValueData {
            kind: ValueKind::Global(gv),
            ty: ptr_ty,
            name: Some(name.to_string()),
            is_bool: false,
        });
        self.globals.push(GlobalData {
            name: name.to_string(),
            ty,
            linkage,
            init,
            handle,
        })
    }

    /// Get a global's data.
    pub fn global(&self, gv: GlobalVar) -> &GlobalData {
        &self.globals[gv]
    }

    /// Set or replace a global's initializer.
    pub fn set_global_init(&mut self, gv: GlobalVar, init: Value) {
        self.globals[gv].init = Some(init);
    }

    /// The value handle for a global's address.
    pub fn global_addr(&self, gv: GlobalVar) -> Value {
        self.globals[gv].handle
    }

    /// Iterate over all globals in creation order.
    pub fn globals(&self) -> impl Iterator<Item = GlobalVar> {
        self.globals.keys()
    }

    // ------------------------------------------------------------------
    // Strings.

    /// Intern `s` in the module string pool.
    pub fn intern_string(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.string_index.get(s) {
            return id;
        }
        let id = self.strings.push(s.to_string());
        self.string_index.insert(s.to_string(), id);
        id
    }

    /// Get an interned string.
    pub fn string(&self, id: StringId) -> &str {
        &self.strings[id]
    }

    /// Iterate over the string pool.
    pub fn strings(&self) -> impl Iterator<Item = (StringId, &String)> + '_ {
        self.strings.iter()
    }

    // ------------------------------------------------------------------
    // Whole-function edits used by the optimizer.

    /// Replace every operand use of `from` with `to` inside `func`.
    /// Returns the number of operands rewritten.
    pub fn replace_uses(&mut self, func: Func, from: Value, to: Value) -> u32 {
        let mut count = 0;
        let blocks = self.funcs[func].blocks.clone();
        for block in blocks {
            let insts = self.blocks[block].insts.clone();
            for inst in insts {
                self.insts[inst].map_args(|v| {
                    if v == from {
                        count += 1;
                        to
                    } else {
                        v
                    }
                });
            }
        }
        count
    }

    /// Count operand uses of `value` inside `func`.
    pub fn count_uses(&self, func: Func, value: Value) -> u32 {
        let mut count = 0;
        for &block in &self.funcs[func].blocks {
            for &inst in &self.blocks[block].insts {
                for arg in self.insts[inst].arguments() {
                    if arg == value {
                        count += 1;
                    }
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{self, TypeStore};

    #[test]
    fn string_pool_interns() {
        let mut module = Module::new("test");
        let a = module.intern_string("hello");
        let b = module.intern_string("hello");
        let c = module.intern_string("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(module.string(a), "hello");
    }

    #[test]
    fn function_params_and_handle() {
        let mut ts = TypeStore::new();
        let sig = ts.make_func(types::I32, &[types::I32, types::I32], false);
        let mut module = Module::new("test");
        let f = module.create_function("add2", sig, Linkage::External, &[types::I32, types::I32]);
        assert_eq!(module.func(f).params.len(), 2);
        let p0 = module.func_param(f, 0).unwrap();
        assert_eq!(module.value_type(p0), types::I32);
        let h1 = module.func_addr(f);
        let h2 = module.func_addr(f);
        assert_eq!(h1, h2);
    }

    #[test]
    fn result_backlink() {
        use crate::ir::instructions::{InstructionData, Opcode};
        let mut module = Module::new("test");
        let x = module.const_int(types::I32, 1);
        let y = module.const_int(types::I32, 2);
        let inst = module.make_inst(InstructionData::Binary {
            opcode: Opcode::Iadd,
            args: [x, y],
        });
        let r = module.attach_result(inst, types::I32, false);
        assert_eq!(module.producer(r), Some(inst));
        assert_eq!(module.inst_result(inst), Some(r));
    }
}
