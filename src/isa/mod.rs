//! Target instruction set architectures.
//!
//! Each sub-module lowers the IR for one architecture family and exposes a
//! constructor returning a boxed [`TargetBackend`]. The [`lookup`] function
//! is the registry mapping an [`Arch`] to its backend; the set of entries
//! is fixed at build time by the enabled cargo features.
//!
//! Backends are stateful across one module lowering (label counters, frame
//! maps, literal pools) and are reset between modules through
//! [`TargetBackend::reset`].

use crate::context::Context;
use crate::ir::entities::Func;
use crate::ir::module::Module;
use crate::result::{CodegenError, CodegenResult};
use crate::settings::Arch;

pub(crate) mod frame;

#[cfg(feature = "x86")]
mod x86;

#[cfg(feature = "s390")]
mod s390;

#[cfg(feature = "ppc")]
mod ppc;

#[cfg(feature = "arm64")]
mod aarch64;

/// Byte order of a target.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Endianness {
    Little,
    Big,
}

/// Which way the stack frame is allocated.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StackDirection {
    /// Frames grow towards lower addresses (the RISC and x86 ABIs).
    Down,
    /// Frames are chained upward through save areas (mainframe linkage).
    Up,
}

/// Descriptive record for an architecture.
pub struct ArchInfo {
    /// Short architecture name.
    pub name: &'static str,
    /// Effective pointer width in bits (24 and 31 exist here).
    pub pointer_width: u8,
    /// Natural word size in bytes.
    pub word_size: u8,
    /// Number of general purpose registers.
    pub gpr_count: u8,
    /// Number of floating point registers.
    pub fpr_count: u8,
    /// Byte order.
    pub endianness: Endianness,
    /// Stack growth direction.
    pub stack_direction: StackDirection,
    /// Whether the architecture has condition codes.
    pub has_condition_codes: bool,
    /// Whether branches have delay slots.
    pub has_delay_slots: bool,
}

/// Methods specialized to a target architecture.
///
/// A backend never aborts on an opcode it cannot lower; it emits a
/// recognizable comment marker (`unsupported:` on GNU targets, an
/// `UNSUPPORTED` comment line on HLASM targets) and continues. Structural
/// errors abandon the function with an error and no partial output.
pub trait TargetBackend {
    /// The descriptive record for this architecture.
    fn info(&self) -> &'static ArchInfo;

    /// Lower every function with a body, then the data, and return the
    /// complete assembler source for `module`.
    fn emit_module(&mut self, ctx: &Context, module: &Module) -> CodegenResult<String>;

    /// Lower a single function, appending its text to `out`.
    fn emit_function(
        &mut self,
        ctx: &Context,
        module: &Module,
        func: Func,
        out: &mut String,
    ) -> CodegenResult<()>;

    /// Drop per-module scratch state. Called between module lowerings when
    /// a backend instance is reused.
    fn reset(&mut self) {}
}

/// Look up the backend for `arch`.
///
/// Returns `Unsupported` when the matching cargo feature was disabled at
/// build time.
pub fn lookup(arch: Arch) -> CodegenResult<Box<dyn TargetBackend>> {
    match arch {
        Arch::X86 | Arch::X86_64 => {
            #[cfg(feature = "x86")]
            {
                Ok(x86::backend(arch))
            }
            #[cfg(not(feature = "x86"))]
            {
                Err(CodegenError::Unsupported(format!(
                    "{arch} support was disabled at build time"
                )))
            }
        }
        Arch::S370 | Arch::S370Xa | Arch::Esa390 | Arch::ZArch => {
            #[cfg(feature = "s390")]
            {
                Ok(s390::backend(arch))
            }
            #[cfg(not(feature = "s390"))]
            {
                Err(CodegenError::Unsupported(format!(
                    "{arch} support was disabled at build time"
                )))
            }
        }
        Arch::Ppc32 | Arch::Ppc64 | Arch::Ppc64Le => {
            #[cfg(feature = "ppc")]
            {
                Ok(ppc::backend(arch))
            }
            #[cfg(not(feature = "ppc"))]
            {
                Err(CodegenError::Unsupported(format!(
                    "{arch} support was disabled at build time"
                )))
            }
        }
        Arch::Aarch64 => {
            #[cfg(feature = "arm64")]
            {
                Ok(aarch64::backend(arch))
            }
            #[cfg(not(feature = "arm64"))]
            {
                Err(CodegenError::Unsupported(format!(
                    "{arch} support was disabled at build time"
                )))
            }
        }
    }
}
