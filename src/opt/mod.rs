//! The optimizer: a pass manager over per-function rewrite passes.
//!
//! Each built-in pass declares a minimum optimization level; setting a
//! level enables exactly the passes at or below it. Passes run in
//! registration order and the whole set repeats until a full sweep reports
//! no change or the iteration cap is reached. Passes must preserve program
//! semantics and block-terminator invariants; they report whether they
//! changed the IR and never raise errors.

use crate::context::Context;
use crate::ir::entities::Func;
use crate::ir::module::Module;
use crate::settings::OptLevel;

mod const_fold;
mod copy_prop;
mod cse;
mod dce;
mod dse;
mod rle;
mod simplify_cfg;
mod strength;

/// Bound on full pass-set repetitions per function, preventing
/// non-terminating rewrite cycles.
const MAX_ITERATIONS: u32 = 8;

type BuiltinPass = fn(&Context, &mut Module, Func) -> bool;

/// A dynamically registered pass.
pub type CustomPass = Box<dyn FnMut(&Context, &mut Module, Func) -> bool>;

enum PassFn {
    Builtin(BuiltinPass),
    Custom(CustomPass),
}

struct PassEntry {
    name: String,
    min_level: OptLevel,
    /// Explicit enable/disable overriding the level gate.
    forced: Option<bool>,
    run: PassFn,
}

impl PassEntry {
    fn enabled(&self, level: OptLevel) -> bool {
        self.forced.unwrap_or(level >= self.min_level)
    }
}

/// Owns the registered passes and drives them to a fixed point.
pub struct PassManager {
    passes: Vec<PassEntry>,
    level: OptLevel,
}

impl PassManager {
    /// Create a manager with the built-in passes registered and the given
    /// optimization level.
    pub fn new(level: OptLevel) -> Self {
        let mut pm = Self {
            passes: Vec::new(),
            level,
        };
        pm.register_builtin("const_fold", OptLevel::Basic, const_fold::run);
        pm.register_builtin("strength", OptLevel::Basic, strength::run);
        pm.register_builtin("copy_prop", OptLevel::Basic, copy_prop::run);
        pm.register_builtin("simplify_cfg", OptLevel::Standard, simplify_cfg::run);
        pm.register_builtin("dse", OptLevel::Standard, dse::run);
        pm.register_builtin("rle", OptLevel::Standard, rle::run);
        pm.register_builtin("cse", OptLevel::Standard, cse::run);
        pm.register_builtin("dce", OptLevel::Basic, dce::run);
        pm
    }

    /// Create a manager taking its level from the context.
    pub fn with_context(ctx: &Context) -> Self {
        Self::new(ctx.opt_level())
    }

    fn register_builtin(&mut self, name: &str, min_level: OptLevel, run: BuiltinPass) {
        self.passes.push(PassEntry {
            name: name.to_string(),
            min_level,
            forced: None,
            run: PassFn::Builtin(run),
        });
    }

    /// Register a custom pass that runs after the built-ins, enabled from
    /// `min_level` upward.
    pub fn register(&mut self, name: &str, min_level: OptLevel, run: CustomPass) {
        self.passes.push(PassEntry {
            name: name.to_string(),
            min_level,
            forced: None,
            run: PassFn::Custom(run),
        });
    }

    /// Set the optimization level, clearing per-pass overrides.
    pub fn set_level(&mut self, level: OptLevel) {
        self.level = level;
        for pass in &mut self.passes {
            pass.forced = None;
        }
    }

    /// The current optimization level.
    pub fn level(&self) -> OptLevel {
        self.level
    }

    /// Force a pass on regardless of level. Unknown names are ignored.
    pub fn enable(&mut self, name: &str) {
        if let Some(pass) = self.passes.iter_mut().find(|p| p.name == name) {
            pass.forced = Some(true);
        }
    }

    /// Force a pass off regardless of level. Unknown names are ignored.
    pub fn disable(&mut self, name: &str) {
        if let Some(pass) = self.passes.iter_mut().find(|p| p.name == name) {
            pass.forced = Some(false);
        }
    }

    /// Names of the passes enabled at the current level.
    pub fn enabled_passes(&self) -> Vec<&str> {
        self.passes
            .iter()
            .filter(|p| p.enabled(self.level))
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Run the enabled passes on one function until nothing changes.
    /// Returns whether any pass changed the IR.
    pub fn run_function(&mut self, ctx: &Context, module: &mut Module, func: Func) -> bool {
        if module.func(func).is_declaration {
            return false;
        }
        let level = self.level;
        let mut any_change = false;
        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &mut self.passes {
                if !pass.enabled(level) {
                    continue;
                }
                let pass_changed = match &mut pass.run {
                    PassFn::Builtin(f) => f(ctx, module, func),
                    PassFn::Custom(f) => f(ctx, module, func),
                };
                if pass_changed {
                    log::debug!(
                        "{}: {} changed the IR (iteration {})",
                        module.func(func).name,
                        pass.name,
                        iteration
                    );
                }
                changed |= pass_changed;
            }
            any_change |= changed;
            if !changed {
                break;
            }
        }
        any_change
    }

    /// Run the enabled passes over every function with a body.
    pub fn run_module(&mut self, ctx: &Context, module: &mut Module) -> bool {
        let funcs: Vec<Func> = module.funcs().collect();
        let mut changed = false;
        for func in funcs {
            changed |= self.run_function(ctx, module, func);
        }
        changed
    }
}

/// Conservative may-alias query shared by the memory passes.
///
/// Two addresses are provably disjoint only when they are results of two
/// different `stack_alloc` instructions, or a `stack_alloc` and a distinct
/// global. Everything else may alias.
pub(crate) fn may_alias(module: &Module, p: crate::ir::entities::Value, q: crate::ir::entities::Value) -> bool {
    use crate::ir::instructions::InstructionData;
    use crate::ir::module::ValueKind;

    if p == q {
        return true;
    }
    let root_kind = |v: crate::ir::entities::Value| -> Option<RootId> {
        match &module.value(v).kind {
            ValueKind::Global(gv) => Some(RootId::Global(*gv)),
            ValueKind::InstResult(inst) => match module.inst(*inst) {
                InstructionData::StackAlloc { .. } => Some(RootId::Alloca(*inst)),
                _ => None,
            },
            _ => None,
        }
    };
    match (root_kind(p), root_kind(q)) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

#[derive(PartialEq, Eq)]
enum RootId {
    Alloca(crate::ir::entities::Inst),
    Global(crate::ir::entities::GlobalVar),
}
