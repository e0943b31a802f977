//! Compilation context: one session of configuration, types and backend
//! state.
//!
//! A context and everything reachable from it is single-threaded state.
//! Separate contexts are fully independent and may be used from different
//! threads without interaction.

use crate::ir::entities::{Block, Func, Type};
use crate::ir::module::Module;
use crate::ir::types::{TypeData, TypeStore};
use crate::isa::{self, TargetBackend};
use crate::result::{CodegenError, CodegenResult, ErrorCode};
use crate::settings::{Abi, Arch, CpuFeatures, CpuModel, FpFormat, OptLevel};
use core::mem;
use std::path::Path;

/// Persistent state for one compilation session.
pub struct Context {
    types: TypeStore,
    arch: Option<Arch>,
    abi: Abi,
    fp_format: FpFormat,
    opt_level: OptLevel,
    cpu: CpuModel,
    features: CpuFeatures,
    insert_point: Option<Block>,
    backend: Option<Box<dyn TargetBackend>>,
    backend_arch: Option<Arch>,
    last_error: Option<(ErrorCode, String)>,
}

impl Context {
    /// Create a context with default configuration and no architecture
    /// selected.
    pub fn new() -> Self {
        Self {
            types: TypeStore::new(),
            arch: None,
            abi: Abi::default(),
            fp_format: FpFormat::default(),
            opt_level: OptLevel::default(),
            cpu: CpuModel::default(),
            features: CpuFeatures::none(),
            insert_point: None,
            backend: None,
            backend_arch: None,
            last_error: None,
        }
    }

    /// Create a module owned by this session.
    pub fn create_module(&self, name: &str) -> Module {
        Module::new(name)
    }

    // ------------------------------------------------------------------
    // Configuration.

    /// Select the target architecture. Unbinds any existing backend so the
    /// next emission builds a fresh one.
    pub fn set_arch(&mut self, arch: Arch) {
        self.arch = Some(arch);
        self.backend = None;
        self.backend_arch = None;
    }

    /// The selected architecture, if any.
    pub fn arch(&self) -> Option<Arch> {
        self.arch
    }

    /// Select the ABI variant.
    pub fn set_abi(&mut self, abi: Abi) {
        self.abi = abi;
    }

    /// The selected ABI variant.
    pub fn abi(&self) -> Abi {
        self.abi
    }

    /// Select the floating point format.
    pub fn set_fp_format(&mut self, fp: FpFormat) {
        self.fp_format = fp;
    }

    /// The selected floating point format.
    pub fn fp_format(&self) -> FpFormat {
        self.fp_format
    }

    /// Set the optimization level consumed by `PassManager::with_context`.
    pub fn set_opt_level(&mut self, level: OptLevel) {
        self.opt_level = level;
    }

    /// The selected optimization level.
    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// Select the CPU model; resets the feature bits to the model's set.
    pub fn set_cpu(&mut self, cpu: CpuModel) {
        self.cpu = cpu;
        self.features = cpu.features();
    }

    /// The selected CPU model.
    pub fn cpu(&self) -> CpuModel {
        self.cpu
    }

    /// Enable an individual CPU feature bit on top of the model's set.
    pub fn enable_feature(&mut self, bit: u32) {
        self.features = self.features.with(bit);
    }

    /// Query a CPU feature bit.
    pub fn has_feature(&self, bit: u32) -> bool {
        self.features.has(bit)
    }

    /// Pointer size in bytes for the selected architecture (8 when none is
    /// selected yet).
    pub fn pointer_bytes(&self) -> u32 {
        self.arch.map(Arch::pointer_bytes).unwrap_or(8)
    }

    // ------------------------------------------------------------------
    // Types.

    /// Read-only access to the type table.
    pub fn types(&self) -> &TypeStore {
        &self.types
    }

    /// Intern an arbitrary type descriptor.
    pub fn intern_type(&mut self, data: TypeData) -> Type {
        self.types.intern(data)
    }

    /// Construct a pointer type.
    pub fn ptr_type(&mut self, pointee: Type) -> Type {
        self.types.make_ptr(pointee)
    }

    /// Construct an array type.
    pub fn array_type(&mut self, elem: Type, len: u32) -> Type {
        self.types.make_array(elem, len)
    }

    /// Construct a struct type, computing field offsets with the current
    /// target's layout rules.
    pub fn struct_type(&mut self, fields: &[Type]) -> Type {
        let ptr = self.pointer_bytes();
        self.types.make_struct(fields, ptr)
    }

    /// Construct a function type.
    pub fn func_type(&mut self, ret: Type, params: &[Type], variadic: bool) -> Type {
        self.types.make_func(ret, params, variadic)
    }

    /// Size of `ty` in bytes under the current target.
    pub fn size_of(&self, ty: Type) -> u32 {
        self.types.size_of(ty, self.pointer_bytes())
    }

    /// Alignment of `ty` in bytes under the current target.
    pub fn align_of(&self, ty: Type) -> u32 {
        self.types.align_of(ty, self.pointer_bytes())
    }

    // ------------------------------------------------------------------
    // Insertion point.

    /// Set the block that builder operations append to.
    pub fn set_insert_point(&mut self, block: Block) {
        self.insert_point = Some(block);
    }

    /// Clear the insertion point.
    pub fn clear_insert_point(&mut self) {
        self.insert_point = None;
    }

    /// The current insertion block.
    pub fn insert_point(&self) -> Option<Block> {
        self.insert_point
    }

    /// Run `f` with the insertion point at `block`, restoring the previous
    /// insertion point afterwards.
    pub fn with_block<R>(&mut self, block: Block, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = mem::replace(&mut self.insert_point, Some(block));
        let result = f(self);
        self.insert_point = saved;
        result
    }

    // ------------------------------------------------------------------
    // Errors.

    /// Record `err` as the session's last error and pass it through.
    pub fn record_error(&mut self, err: CodegenError) -> CodegenError {
        self.last_error = Some((err.code(), err.to_string()));
        err
    }

    /// The code and message of the most recent error, if any.
    pub fn last_error(&self) -> Option<(ErrorCode, &str)> {
        self.last_error
            .as_ref()
            .map(|(code, msg)| (*code, msg.as_str()))
    }

    // ------------------------------------------------------------------
    // Emission.

    fn take_backend(&mut self) -> CodegenResult<Box<dyn TargetBackend>> {
        let arch = match self.arch {
            Some(arch) => arch,
            None => return Err(CodegenError::NoBackend),
        };
        match self.backend.take() {
            Some(mut backend) if self.backend_arch == Some(arch) => {
                backend.reset();
                Ok(backend)
            }
            _ => {
                log::debug!("binding backend for {arch}");
                self.backend_arch = Some(arch);
                isa::lookup(arch)
            }
        }
    }

    /// Render the whole module as assembly text for the selected target.
    ///
    /// On failure the error is recorded and no partial output is returned.
    pub fn render_module(&mut self, module: &Module) -> CodegenResult<String> {
        let mut backend = match self.take_backend() {
            Ok(b) => b,
            Err(err) => return Err(self.record_error(err)),
        };
        let result = backend.emit_module(self, module);
        self.backend = Some(backend);
        match result {
            Ok(text) => Ok(text),
            Err(err) => Err(self.record_error(err)),
        }
    }

    /// Render a single function as assembly text for the selected target.
    pub fn render_function(&mut self, module: &Module, func: Func) -> CodegenResult<String> {
        let mut backend = match self.take_backend() {
            Ok(b) => b,
            Err(err) => return Err(self.record_error(err)),
        };
        let mut out = String::new();
        let result = backend.emit_function(self, module, func, &mut out);
        self.backend = Some(backend);
        match result {
            Ok(()) => Ok(out),
            Err(err) => Err(self.record_error(err)),
        }
    }

    /// Render the module and write the text to `path`.
    pub fn write_module(&mut self, module: &Module, path: &Path) -> CodegenResult<()> {
        let text = self.render_module(module)?;
        match std::fs::write(path, text) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.record_error(CodegenError::Io(err))),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types;

    #[test]
    fn with_block_restores_insertion_point() {
        let mut ctx = Context::new();
        let mut module = ctx.create_module("t");
        let sig = ctx.func_type(types::VOID, &[], false);
        let f = module.create_function("f", sig, crate::ir::function::Linkage::Internal, &[]);
        let b0 = module.create_block(f, "entry");
        let b1 = module.create_block(f, "other");
        ctx.set_insert_point(b0);
        ctx.with_block(b1, |ctx| {
            assert_eq!(ctx.insert_point(), Some(b1));
        });
        assert_eq!(ctx.insert_point(), Some(b0));
    }

    #[test]
    fn render_without_arch_is_no_backend() {
        let mut ctx = Context::new();
        let module = ctx.create_module("t");
        let err = ctx.render_module(&module).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoBackend);
        assert_eq!(ctx.last_error().unwrap().0, ErrorCode::NoBackend);
    }

    #[test]
    fn struct_layout_follows_selected_arch() {
        let mut ctx = Context::new();
        ctx.set_arch(crate::settings::Arch::X86);
        let p = ctx.ptr_type(types::I8);
        let s = ctx.struct_type(&[p, types::I8]);
        assert_eq!(ctx.size_of(s), 8);
        ctx.set_arch(crate::settings::Arch::X86_64);
        let s64 = ctx.struct_type(&[p, types::I8]);
        assert_eq!(ctx.size_of(s64), 16);
    }
}
