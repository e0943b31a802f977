//! Representation of ANVIL IR: types, values, instructions, blocks,
//! functions and modules.

pub mod builder;
pub mod condcodes;
pub mod entities;
pub mod flowgraph;
pub mod function;
pub mod instructions;
pub mod module;
pub mod types;
pub mod verify;
pub mod write;

pub use crate::ir::builder::Builder;
pub use crate::ir::condcodes::{CondCode, FloatCC, IntCC};
pub use crate::ir::entities::{Block, Func, GlobalVar, Inst, StringId, Type, Value};
pub use crate::ir::flowgraph::ControlFlowGraph;
pub use crate::ir::function::{BlockData, FunctionData, Linkage};
pub use crate::ir::instructions::{InstructionData, Opcode};
pub use crate::ir::module::{GlobalData, Module, ValueData, ValueKind};
pub use crate::ir::types::{TypeData, TypeStore};
