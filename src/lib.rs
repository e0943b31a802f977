//! ANVIL retargetable code generator library.
//!
//! Callers construct an architecture-neutral intermediate representation of
//! procedures — types, globals, functions, basic blocks, typed
//! instructions — and request assembly text for a selected target
//! architecture.
//!
//! The usual flow:
//!
//! 1. create a [`Context`] and configure architecture, ABI, floating point
//!    format and optimization level;
//! 2. create a [`ir::Module`], declare and define functions, and build
//!    instructions through [`ir::Builder`];
//! 3. optionally run the [`opt::PassManager`] over the module;
//! 4. call [`Context::render_module`] to obtain assembler source.
//!
//! A context and everything reachable from it is single-threaded; separate
//! contexts are independent and may be used concurrently.

pub mod entity;
pub mod ir;
pub mod isa;
pub mod opt;
pub mod settings;

mod context;
mod result;

pub use crate::context::Context;
pub use crate::result::{CodegenError, CodegenResult, ErrorCode};
