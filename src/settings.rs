//! Shared settings: target selection, ABI variant, floating point format,
//! CPU model and feature bits, optimization level.
//!
//! These are plain data carried by the `Context`. Backends read them at
//! lowering time; the type system reads the architecture for layout rules.

use core::fmt;

/// A target architecture.
///
/// This enumeration is the sole architecture selector; there is no triple
/// parsing because several of the recognized targets (the mainframe
/// addressing modes in particular) have no conventional triple spelling.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Arch {
    /// 32-bit x86.
    X86,
    /// 64-bit x86.
    X86_64,
    /// System/370, 24-bit addressing.
    S370,
    /// System/370-XA, 31-bit addressing.
    S370Xa,
    /// ESA/390, 31-bit addressing with relative-branch facilities.
    Esa390,
    /// z/Architecture, 64-bit.
    ZArch,
    /// 32-bit PowerPC, big-endian SysV.
    Ppc32,
    /// 64-bit PowerPC, big-endian ELFv1 (TOC and function descriptors).
    Ppc64,
    /// 64-bit PowerPC, little-endian ELFv2.
    Ppc64Le,
    /// 64-bit ARM.
    Aarch64,
}

impl Arch {
    /// All recognized architectures, in declaration order.
    pub fn all() -> &'static [Arch] {
        &[
            Arch::X86,
            Arch::X86_64,
            Arch::S370,
            Arch::S370Xa,
            Arch::Esa390,
            Arch::ZArch,
            Arch::Ppc32,
            Arch::Ppc64,
            Arch::Ppc64Le,
            Arch::Aarch64,
        ]
    }

    /// Width of a pointer, in bytes.
    ///
    /// The 24- and 31-bit mainframe modes store pointers in 4-byte words.
    pub fn pointer_bytes(self) -> u32 {
        match self {
            Arch::X86 | Arch::Ppc32 => 4,
            Arch::S370 | Arch::S370Xa | Arch::Esa390 => 4,
            Arch::X86_64 | Arch::ZArch | Arch::Ppc64 | Arch::Ppc64Le | Arch::Aarch64 => 8,
        }
    }

    /// Width of a pointer, in bits of effective address.
    pub fn pointer_bits(self) -> u32 {
        match self {
            Arch::S370 => 24,
            Arch::S370Xa | Arch::Esa390 => 31,
            _ => self.pointer_bytes() * 8,
        }
    }

    /// Whether this is one of the HLASM mainframe targets.
    pub fn is_mainframe(self) -> bool {
        matches!(self, Arch::S370 | Arch::S370Xa | Arch::Esa390 | Arch::ZArch)
    }

    /// Whether general registers are 64 bits wide.
    pub fn has_64bit_regs(self) -> bool {
        matches!(
            self,
            Arch::X86_64 | Arch::ZArch | Arch::Ppc64 | Arch::Ppc64Le | Arch::Aarch64
        )
    }

    /// Short name used in logs and generated-file headers.
    pub fn name(self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::S370 => "s370",
            Arch::S370Xa => "s370xa",
            Arch::Esa390 => "esa390",
            Arch::ZArch => "zarch",
            Arch::Ppc32 => "ppc32",
            Arch::Ppc64 => "ppc64",
            Arch::Ppc64Le => "ppc64le",
            Arch::Aarch64 => "aarch64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// ABI variant within an architecture.
///
/// The mainframe targets always use OS linkage and ignore this selector.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Abi {
    /// ELF / System V conventions.
    #[default]
    SysV,
    /// Darwin: leading-underscore symbols, Mach-O section spellings.
    Darwin,
}

/// Floating point representation selector.
///
/// Only the mainframe targets support more than one hardware format; the
/// other backends always emit IEEE-754 operations.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum FpFormat {
    /// IEEE-754 binary floating point.
    #[default]
    Ieee,
    /// System/360 hexadecimal floating point.
    Hex,
    /// Follow the CPU model: IEEE when the binary-FP facility is present,
    /// hexadecimal otherwise.
    Mixed,
}

/// Optimization levels.
///
/// Each built-in pass declares a minimum level; setting a level enables
/// exactly the passes whose minimum is less than or equal to it.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum OptLevel {
    /// Run no passes at all.
    #[default]
    None,
    /// Folding, peepholes, copy forwarding, dead code removal.
    Basic,
    /// Everything in `Basic` plus CFG and memory cleanups.
    Standard,
    /// Currently the same pass set as `Standard`; reserved headroom.
    Aggressive,
}

/// Individual CPU capabilities consulted during lowering.
///
/// Backends route every gated decision through a small helper owning both
/// the hardware form and the emulation fallback, so these bits are read in
/// one place per feature.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct CpuFeatures {
    bits: u32,
}

impl CpuFeatures {
    /// x86 conditional move.
    pub const CMOV: u32 = 1 << 0;
    /// x86 hardware population count.
    pub const POPCNT: u32 = 1 << 1;
    /// Mainframe binary (IEEE-754) floating point facility.
    pub const BFP: u32 = 1 << 2;
    /// Mainframe load/store-on-condition (z196 and later).
    pub const LOAD_ON_COND: u32 = 1 << 3;
    /// PowerPC integer select.
    pub const ISEL: u32 = 1 << 4;
    /// Mainframe relative-long addressing (LARL and friends).
    pub const REL_LONG: u32 = 1 << 5;

    /// No features at all.
    pub fn none() -> Self {
        Self { bits: 0 }
    }

    /// Add a feature bit.
    pub fn with(self, bit: u32) -> Self {
        Self {
            bits: self.bits | bit,
        }
    }

    /// Query a feature bit.
    pub fn has(self, bit: u32) -> bool {
        self.bits & bit != 0
    }
}

/// A named CPU model. Selecting a model selects its feature set; individual
/// bits can still be toggled afterwards through the `Context`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum CpuModel {
    /// Baseline for the selected architecture.
    #[default]
    Generic,
    /// x86: P6 family, first with CMOV.
    PentiumPro,
    /// x86: Nehalem, first with POPCNT.
    Nehalem,
    /// Mainframe: first z/Architecture machine, carries the BFP facility.
    Z900,
    /// Mainframe: z196, adds load/store-on-condition.
    Z196,
    /// PowerPC: POWER7, carries isel.
    Power7,
    /// PowerPC: POWER8.
    Power8,
    /// ARM: Cortex-A72 class.
    CortexA72,
}

impl CpuModel {
    /// The feature set implied by this model.
    pub fn features(self) -> CpuFeatures {
        let f = CpuFeatures::none();
        match self {
            CpuModel::Generic => f,
            CpuModel::PentiumPro => f.with(CpuFeatures::CMOV),
            CpuModel::Nehalem => f.with(CpuFeatures::CMOV).with(CpuFeatures::POPCNT),
            CpuModel::Z900 => f.with(CpuFeatures::BFP).with(CpuFeatures::REL_LONG),
            CpuModel::Z196 => f
                .with(CpuFeatures::BFP)
                .with(CpuFeatures::REL_LONG)
                .with(CpuFeatures::LOAD_ON_COND),
            CpuModel::Power7 | CpuModel::Power8 => f.with(CpuFeatures::ISEL),
            CpuModel::CortexA72 => f,
        }
    }
}

/// Calling convention tag attached to a function.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum CallConv {
    /// Whatever the selected architecture and ABI imply.
    #[default]
    Default,
    /// Force System V conventions.
    SystemV,
    /// Force Darwin conventions.
    Darwin,
    /// Force mainframe OS linkage.
    OsLinkage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_levels_are_ordered() {
        assert!(OptLevel::None < OptLevel::Basic);
        assert!(OptLevel::Basic < OptLevel::Standard);
        assert!(OptLevel::Standard < OptLevel::Aggressive);
    }

    #[test]
    fn pointer_widths() {
        assert_eq!(Arch::S370.pointer_bits(), 24);
        assert_eq!(Arch::S370Xa.pointer_bits(), 31);
        assert_eq!(Arch::S370Xa.pointer_bytes(), 4);
        assert_eq!(Arch::ZArch.pointer_bytes(), 8);
        assert_eq!(Arch::Ppc64Le.pointer_bits(), 64);
    }

    #[test]
    fn model_features() {
        assert!(CpuModel::Z196.features().has(CpuFeatures::LOAD_ON_COND));
        assert!(!CpuModel::Z900.features().has(CpuFeatures::LOAD_ON_COND));
        assert!(CpuModel::Nehalem.features().has(CpuFeatures::CMOV));
    }
}
