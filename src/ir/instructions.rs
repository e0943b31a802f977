//! Instruction formats and opcodes.
//!
//! `InstructionData` is an enum of per-format variants so the common
//! operations (operand iteration, branch target queries, structural
//! comparison for CSE) can be written once per format instead of once per
//! opcode. The opcode itself is stored only where a format covers more than
//! one.

use crate::ir::condcodes::{FloatCC, IntCC};
use crate::ir::entities::{Block, Type, Value};
use core::fmt::{self, Display, Formatter};
use smallvec::SmallVec;

/// An instruction opcode.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    // Integer arithmetic.
    Iadd,
    Isub,
    Imul,
    Sdiv,
    Udiv,
    Srem,
    Urem,
    Ineg,
    // Bitwise.
    Band,
    Bor,
    Bxor,
    Bnot,
    Ishl,
    Ushr,
    Sshr,
    // Comparisons.
    Icmp,
    Fcmp,
    // Floating point arithmetic.
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fneg,
    Fabs,
    // Conversions.
    Ireduce,
    Uextend,
    Sextend,
    Bitcast,
    PtrToInt,
    IntToPtr,
    Fpromote,
    Fdemote,
    FcvtFromSint,
    FcvtFromUint,
    FcvtToSint,
    FcvtToUint,
    // Memory.
    StackAlloc,
    Load,
    Store,
    ElemAddr,
    FieldAddr,
    // Control.
    Jump,
    Brif,
    Return,
    Call,
    // Misc.
    Phi,
    Select,
}

impl Opcode {
    /// Whether this opcode must appear last in a block.
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Brif | Opcode::Return)
    }

    /// Whether this opcode transfers control to another block.
    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Brif)
    }

    /// Whether this opcode has an observable effect beyond its result.
    pub fn has_side_effects(self) -> bool {
        matches!(self, Opcode::Store | Opcode::Call)
    }

    /// Whether this opcode can trap at run time (division by zero).
    pub fn can_trap(self) -> bool {
        matches!(
            self,
            Opcode::Sdiv | Opcode::Udiv | Opcode::Srem | Opcode::Urem
        )
    }

    /// Whether the instruction computes a pure function of its operands and
    /// is therefore a candidate for folding and subexpression sharing.
    ///
    /// Loads are excluded (memory-dependent), as are allocas (distinct
    /// identity per execution) and phis (control-dependent).
    pub fn is_pure(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Iadd | Isub
                | Imul
                | Ineg
                | Band
                | Bor
                | Bxor
                | Bnot
                | Ishl
                | Ushr
                | Sshr
                | Icmp
                | Fcmp
                | Fadd
                | Fsub
                | Fmul
                | Fdiv
                | Fneg
                | Fabs
                | Ireduce
                | Uextend
                | Sextend
                | Bitcast
                | PtrToInt
                | IntToPtr
                | Fpromote
                | Fdemote
                | FcvtFromSint
                | FcvtFromUint
                | FcvtToSint
                | FcvtToUint
                | ElemAddr
                | FieldAddr
                | Select
        )
    }

    /// Whether operand order is irrelevant, for CSE key normalization.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Iadd | Opcode::Imul | Opcode::Band | Opcode::Bor | Opcode::Bxor
        )
    }

    /// The name used by the IR printer.
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Iadd => "iadd",
            Isub => "isub",
            Imul => "imul",
            Sdiv => "sdiv",
            Udiv => "udiv",
            Srem => "srem",
            Urem => "urem",
            Ineg => "ineg",
            Band => "band",
            Bor => "bor",
            Bxor => "bxor",
            Bnot => "bnot",
            Ishl => "ishl",
            Ushr => "ushr",
            Sshr => "sshr",
            Icmp => "icmp",
            Fcmp => "fcmp",
            Fadd => "fadd",
            Fsub => "fsub",
            Fmul => "fmul",
            Fdiv => "fdiv",
            Fneg => "fneg",
            Fabs => "fabs",
            Ireduce => "ireduce",
            Uextend => "uextend",
            Sextend => "sextend",
            Bitcast => "bitcast",
            PtrToInt => "ptr_to_int",
            IntToPtr => "int_to_ptr",
            Fpromote => "fpromote",
            Fdemote => "fdemote",
            FcvtFromSint => "fcvt_from_sint",
            FcvtFromUint => "fcvt_from_uint",
            FcvtToSint => "fcvt_to_sint",
            FcvtToUint => "fcvt_to_uint",
            StackAlloc => "stack_alloc",
            Load => "load",
            Store => "store",
            ElemAddr => "elem_addr",
            FieldAddr => "field_addr",
            Jump => "jump",
            Brif => "brif",
            Return => "return",
            Call => "call",
            Phi => "phi",
            Select => "select",
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contents of an instruction.
///
/// Auxiliary non-value fields (branch targets, phi predecessors, the struct
/// type consulted by `field_addr`) live here next to the operands.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum InstructionData {
    /// Two-operand arithmetic or bitwise operation.
    Binary { opcode: Opcode, args: [Value; 2] },
    /// One-operand operation (`ineg`, `bnot`, `fneg`, `fabs`).
    Unary { opcode: Opcode, arg: Value },
    /// Integer comparison producing a boolean byte.
    IntCompare { cond: IntCC, args: [Value; 2] },
    /// Float comparison producing a boolean byte.
    FloatCompare { cond: FloatCC, args: [Value; 2] },
    /// Width or representation change; the destination type is the
    /// instruction's result type.
    Conversion { opcode: Opcode, arg: Value },
    /// Reserve a stack slot for a value of `alloc_ty`.
    StackAlloc { alloc_ty: Type },
    /// Read through a pointer.
    Load { ptr: Value },
    /// `args[0]` stored through `args[1]`.
    Store { args: [Value; 2] },
    /// Element address: base pointer plus scaled indices.
    ElemAddr {
        elem_ty: Type,
        args: SmallVec<[Value; 3]>,
    },
    /// Field address: base pointer plus a compile-time struct offset.
    FieldAddr {
        struct_ty: Type,
        field: u32,
        base: Value,
    },
    /// Call through `args[0]` with signature `sig`; the remaining args are
    /// the actual parameters.
    Call {
        sig: Type,
        args: SmallVec<[Value; 4]>,
    },
    /// Unconditional branch.
    Jump { dest: Block },
    /// Conditional branch: `dests[0]` when `cond` is non-zero, else
    /// `dests[1]`.
    Brif { cond: Value, dests: [Block; 2] },
    /// Return, with an operand unless the function returns void.
    Return { arg: Option<Value> },
    /// φ-node: `args[i]` flows in from predecessor `preds[i]`.
    Phi {
        args: SmallVec<[Value; 4]>,
        preds: SmallVec<[Block; 4]>,
    },
    /// `args[0] ? args[1] : args[2]`.
    Select { args: [Value; 3] },
}

impl InstructionData {
    /// The opcode of this instruction.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Binary { opcode, .. }
            | Self::Unary { opcode, .. }
            | Self::Conversion { opcode, .. } => *opcode,
            Self::IntCompare { .. } => Opcode::Icmp,
            Self::FloatCompare { .. } => Opcode::Fcmp,
            Self::StackAlloc { .. } => Opcode::StackAlloc,
            Self::Load { .. } => Opcode::Load,
            Self::Store { .. } => Opcode::Store,
            Self::ElemAddr { .. } => Opcode::ElemAddr,
            Self::FieldAddr { .. } => Opcode::FieldAddr,
            Self::Call { .. } => Opcode::Call,
            Self::Jump { .. } => Opcode::Jump,
            Self::Brif { .. } => Opcode::Brif,
            Self::Return { .. } => Opcode::Return,
            Self::Phi { .. } => Opcode::Phi,
            Self::Select { .. } => Opcode::Select,
        }
    }

    /// Collect the value operands in order.
    pub fn arguments(&self) -> SmallVec<[Value; 4]> {
        let mut out = SmallVec::new();
        match self {
            Self::Binary { args, .. }
            | Self::IntCompare { args, .. }
            | Self::FloatCompare { args, .. }
            | Self::Store { args } => out.extend_from_slice(args),
            Self::Unary { arg, .. } | Self::Conversion { arg, .. } => out.push(*arg),
            Self::Load { ptr } => out.push(*ptr),
            Self::ElemAddr { args, .. } => out.extend_from_slice(args),
            Self::FieldAddr { base, .. } => out.push(*base),
            Self::Call { args, .. } => out.extend_from_slice(args),
            Self::Brif { cond, .. } => out.push(*cond),
            Self::Return { arg } => out.extend(arg.iter().copied()),
            Self::Phi { args, .. } => out.extend_from_slice(args),
            Self::Select { args } => out.extend_from_slice(args),
            Self::StackAlloc { .. } | Self::Jump { .. } => {}
        }
        out
    }

    /// Rewrite every value operand through `f`.
    pub fn map_args(&mut self, mut f: impl FnMut(Value) -> Value) {
        match self {
            Self::Binary { args, .. }
            | Self::IntCompare { args, .. }
            | Self::FloatCompare { args, .. }
            | Self::Store { args } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Self::Unary { arg, .. } | Self::Conversion { arg, .. } => *arg = f(*arg),
            Self::Load { ptr } => *ptr = f(*ptr),
            Self::ElemAddr { args, .. } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Self::FieldAddr { base, .. } => *base = f(*base),
            Self::Call { args, .. } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Self::Brif { cond, .. } => *cond = f(*cond),
            Self::Return { arg } => {
                if let Some(a) = arg {
                    *a = f(*a);
                }
            }
            Self::Phi { args, .. } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Self::Select { args } => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            Self::StackAlloc { .. } | Self::Jump { .. } => {}
        }
    }

    /// The blocks this instruction can transfer control to.
    pub fn branch_targets(&self) -> SmallVec<[Block; 2]> {
        let mut out = SmallVec::new();
        match self {
            Self::Jump { dest } => out.push(*dest),
            Self::Brif { dests, .. } => out.extend_from_slice(dests),
            _ => {}
        }
        out
    }

    /// Redirect every branch target equal to `from` towards `to`.
    pub fn redirect_branch(&mut self, from: Block, to: Block) {
        match self {
            Self::Jump { dest } => {
                if *dest == from {
                    *dest = to;
                }
            }
            Self::Brif { dests, .. } => {
                for d in dests.iter_mut() {
                    if *d == from {
                        *d = to;
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::Brif.is_branch());
        assert!(!Opcode::Call.is_terminator());
        assert!(Opcode::Call.has_side_effects());
        assert!(Opcode::Udiv.can_trap());
        assert!(Opcode::Iadd.is_pure());
        assert!(!Opcode::Load.is_pure());
        assert!(Opcode::Imul.is_commutative());
        assert!(!Opcode::Isub.is_commutative());
    }

    #[test]
    fn operand_mapping() {
        let a = Value::from_u32(0);
        let b = Value::from_u32(1);
        let c = Value::from_u32(2);
        let mut data = InstructionData::Binary {
            opcode: Opcode::Iadd,
            args: [a, b],
        };
        data.map_args(|v| if v == b { c } else { v });
        assert_eq!(data.arguments().as_slice(), &[a, c]);
    }

    #[test]
    fn branch_queries() {
        let b0 = Block::from_u32(0);
        let b1 = Block::from_u32(1);
        let b2 = Block::from_u32(2);
        let mut data = InstructionData::Brif {
            cond: Value::from_u32(0),
            dests: [b0, b1],
        };
        assert_eq!(data.branch_targets().as_slice(), &[b0, b1]);
        data.redirect_branch(b1, b2);
        assert_eq!(data.branch_targets().as_slice(), &[b0, b2]);
    }
}
