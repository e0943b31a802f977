//! Functions and their contents.
//!
//! A function owns nothing directly; its blocks, instructions and values
//! live in the module's arenas and the function holds their references in
//! program order.

use crate::ir::entities::{Block, Func, Type, Value};
use crate::settings::CallConv;

/// Linkage of a function or global variable.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Linkage {
    /// Visible outside the module.
    #[default]
    External,
    /// Local to the module.
    Internal,
}

/// A function definition or declaration.
#[derive(Clone, Debug)]
pub struct FunctionData {
    /// Symbol name.
    pub name: String,
    /// The interned function type carrying return/params/variadic.
    pub sig: Type,
    /// Symbol visibility.
    pub linkage: Linkage,
    /// Calling convention tag; `Default` defers to the backend.
    pub call_conv: CallConv,
    /// Blocks in layout order. The first block is the entry.
    pub blocks: Vec<Block>,
    /// Parameter values, one per signature parameter.
    pub params: Vec<Value>,
    /// Value handle used when this function appears as a call operand,
    /// created lazily.
    pub handle: Option<Value>,
    /// True when the function has no body (an external declaration).
    pub is_declaration: bool,
}

impl FunctionData {
    /// The entry block, if any blocks have been created.
    pub fn entry_block(&self) -> Option<Block> {
        self.blocks.first().copied()
    }
}

/// A basic block: a named, ordered sequence of instructions.
#[derive(Clone, Debug)]
pub struct BlockData {
    /// Label stem used in emitted assembly.
    pub name: String,
    /// The function this block belongs to.
    pub func: Func,
    /// Instructions in execution order.
    pub insts: Vec<crate::ir::entities::Inst>,
}
