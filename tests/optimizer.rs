//! Optimizer behavior: the level gates, the fixpoint contract, and the
//! end-to-end rewrite scenarios.

use anvil::ir::condcodes::IntCC;
use anvil::ir::function::Linkage;
use anvil::ir::module::{Module, ValueKind};
use anvil::ir::types;
use anvil::ir::{Builder, Func, Opcode};
use anvil::opt::PassManager;
use anvil::settings::{Arch, OptLevel};
use anvil::Context;

fn count_insts(module: &Module, func: Func) -> usize {
    module
        .func(func)
        .blocks
        .iter()
        .map(|&b| module.block(b).insts.len())
        .sum()
}

fn opcodes(module: &Module, func: Func) -> Vec<Opcode> {
    module
        .func(func)
        .blocks
        .iter()
        .flat_map(|&b| module.block(b).insts.iter())
        .map(|&i| module.inst(i).opcode())
        .collect()
}

#[test]
fn level_gates_are_deterministic() {
    let pm = PassManager::new(OptLevel::None);
    assert!(pm.enabled_passes().is_empty());
    let pm = PassManager::new(OptLevel::Basic);
    let basic = pm.enabled_passes();
    assert!(basic.contains(&"const_fold"));
    assert!(basic.contains(&"dce"));
    assert!(!basic.contains(&"cse"));
    let pm = PassManager::new(OptLevel::Standard);
    let standard = pm.enabled_passes();
    for pass in basic {
        assert!(standard.contains(&pass));
    }
    assert!(standard.contains(&"dse"));
    assert!(standard.contains(&"rle"));
    assert!(standard.contains(&"simplify_cfg"));
}

#[test]
fn copy_propagation_forwards_through_identity_add() {
    // y = x + 0; r = y + 1; return r  =>  return x + 1.
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("copyprop");
    let sig = ctx.func_type(types::I32, &[types::I32], false);
    let f = module.create_function("f", sig, Linkage::External, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let x = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let zero = b.module().const_int(types::I32, 0);
        let one = b.module().const_int(types::I32, 1);
        let y = b.iadd(x, zero).unwrap();
        let r = b.iadd(y, one).unwrap();
        b.ret(Some(r)).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Basic);
    assert!(pm.run_function(&ctx, &mut module, f));

    assert_eq!(count_insts(&module, f), 2);
    let remaining = opcodes(&module, f);
    assert_eq!(remaining, vec![Opcode::Iadd, Opcode::Return]);
    // The surviving add reads the parameter directly.
    let add = module.block(entry).insts[0];
    let args = module.inst(add).arguments();
    assert!(args.contains(&x));
}

#[test]
fn dead_store_is_overwritten() {
    // store 1 -> *p; store 2 -> *p; ret  =>  store 2 -> *p; ret.
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("dse");
    let p_ty = ctx.ptr_type(types::I32);
    let sig = ctx.func_type(types::VOID, &[p_ty], false);
    let f = module.create_function("f", sig, Linkage::External, &[p_ty]);
    let entry = module.create_block(f, "entry");
    let p = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let one = b.module().const_int(types::I32, 1);
        let two = b.module().const_int(types::I32, 2);
        b.store(one, p).unwrap();
        b.store(two, p).unwrap();
        b.ret(None).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Standard);
    assert!(pm.run_function(&ctx, &mut module, f));

    assert_eq!(opcodes(&module, f), vec![Opcode::Store, Opcode::Return]);
    let store = module.block(entry).insts[0];
    let stored = module.inst(store).arguments()[0];
    assert_eq!(module.value(stored).kind, ValueKind::ConstInt(2));
}

#[test]
fn redundant_load_is_reused() {
    // a = load *p; b = load *p; r = a + b  =>  one load, r = a + a.
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("rle");
    let p_ty = ctx.ptr_type(types::I32);
    let sig = ctx.func_type(types::I32, &[p_ty], false);
    let f = module.create_function("f", sig, Linkage::External, &[p_ty]);
    let entry = module.create_block(f, "entry");
    let p = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let a = b.load(types::I32, p).unwrap();
        let b2 = b.load(types::I32, p).unwrap();
        let r = b.iadd(a, b2).unwrap();
        b.ret(Some(r)).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Standard);
    assert!(pm.run_function(&ctx, &mut module, f));

    let remaining = opcodes(&module, f);
    assert_eq!(
        remaining,
        vec![Opcode::Load, Opcode::Iadd, Opcode::Return]
    );
    let load = module.block(entry).insts[0];
    let loaded = module.inst_result(load).unwrap();
    let add = module.block(entry).insts[1];
    assert_eq!(module.inst(add).arguments().as_slice(), &[loaded, loaded]);
}

#[test]
fn store_forwards_to_later_load() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("stl");
    let sig = ctx.func_type(types::I32, &[types::I32], false);
    let f = module.create_function("f", sig, Linkage::External, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let x = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let slot = b.stack_alloc(types::I32).unwrap();
        b.store(x, slot).unwrap();
        let y = b.load(types::I32, slot).unwrap();
        b.ret(Some(y)).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Standard);
    pm.run_function(&ctx, &mut module, f);

    // The load is gone; the return references the parameter.
    assert!(!opcodes(&module, f).contains(&Opcode::Load));
    let last = *module.block(entry).insts.last().unwrap();
    assert_eq!(module.inst(last).arguments().as_slice(), &[x]);
}

#[test]
fn empty_diamond_collapses() {
    // entry brif -> (then: jump merge | else: jump merge); merge: ret.
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("cfg");
    let sig = ctx.func_type(types::VOID, &[types::I32], false);
    let f = module.create_function("f", sig, Linkage::External, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let then_b = module.create_block(f, "then");
    let else_b = module.create_block(f, "else");
    let merge = module.create_block(f, "merge");
    let p = module.func_param(f, 0).unwrap();
    {
        ctx.set_insert_point(entry);
        let mut b = Builder::new(&mut ctx, &mut module);
        let zero = b.module().const_int(types::I32, 0);
        let c = b.icmp(IntCC::NotEqual, p, zero).unwrap();
        b.brif(c, then_b, else_b).unwrap();
        b.ctx().set_insert_point(then_b);
        b.jump(merge).unwrap();
        b.ctx().set_insert_point(else_b);
        b.jump(merge).unwrap();
        b.ctx().set_insert_point(merge);
        b.ret(None).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Standard);
    assert!(pm.run_function(&ctx, &mut module, f));

    // The empty blocks are gone and the branch goes straight to merge.
    let blocks = &module.func(f).blocks;
    assert!(!blocks.contains(&then_b));
    assert!(!blocks.contains(&else_b));
    let term = *module.block(entry).insts.last().unwrap();
    for target in module.inst(term).branch_targets() {
        assert_eq!(target, merge);
    }
}

#[test]
fn constants_fold_but_division_by_zero_does_not() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("fold");
    let sig = ctx.func_type(types::I32, &[], false);
    let f = module.create_function("f", sig, Linkage::External, &[]);
    let entry = module.create_block(f, "entry");
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let two = b.module().const_int(types::I32, 2);
        let three = b.module().const_int(types::I32, 3);
        let zero = b.module().const_int(types::I32, 0);
        let sum = b.iadd(two, three).unwrap();
        let div = b.sdiv(sum, zero).unwrap();
        b.ret(Some(div)).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Basic);
    pm.run_function(&ctx, &mut module, f);

    // The add folded away; the trapping division stayed.
    let remaining = opcodes(&module, f);
    assert_eq!(remaining, vec![Opcode::Sdiv, Opcode::Return]);
    let div = module.block(entry).insts[0];
    let dividend = module.inst(div).arguments()[0];
    assert_eq!(module.value(dividend).kind, ValueKind::ConstInt(5));
}

#[test]
fn multiply_by_power_of_two_becomes_shift() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("strength");
    let sig = ctx.func_type(types::I32, &[types::I32], false);
    let f = module.create_function("f", sig, Linkage::External, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let x = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let eight = b.module().const_int(types::I32, 8);
        let v = b.imul(x, eight).unwrap();
        b.ret(Some(v)).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Basic);
    assert!(pm.run_function(&ctx, &mut module, f));

    let shl = module.block(entry).insts[0];
    assert_eq!(module.inst(shl).opcode(), Opcode::Ishl);
    let amount = module.inst(shl).arguments()[1];
    assert_eq!(module.value(amount).kind, ValueKind::ConstInt(3));
}

#[test]
fn common_subexpressions_are_shared() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("cse");
    let sig = ctx.func_type(types::I32, &[types::I32, types::I32], false);
    let f = module.create_function("f", sig, Linkage::External, &[types::I32, types::I32]);
    let entry = module.create_block(f, "entry");
    let x = module.func_param(f, 0).unwrap();
    let y = module.func_param(f, 1).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let a = b.imul(x, y).unwrap();
        let c = b.imul(y, x).unwrap();
        let r = b.iadd(a, c).unwrap();
        b.ret(Some(r)).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Standard);
    assert!(pm.run_function(&ctx, &mut module, f));

    let remaining = opcodes(&module, f);
    assert_eq!(remaining, vec![Opcode::Imul, Opcode::Iadd, Opcode::Return]);
}

#[test]
fn second_run_reaches_fixpoint() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("fixpoint");
    let sig = ctx.func_type(types::I32, &[types::I32], false);
    let f = module.create_function("f", sig, Linkage::External, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let x = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let zero = b.module().const_int(types::I32, 0);
        let four = b.module().const_int(types::I32, 4);
        let y = b.iadd(x, zero).unwrap();
        let z = b.imul(y, four).unwrap();
        let w = b.iadd(z, zero).unwrap();
        b.ret(Some(w)).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Standard);
    assert!(pm.run_module(&ctx, &mut module));
    assert!(!pm.run_module(&ctx, &mut module));
}

#[test]
fn optimizer_at_level_none_changes_nothing() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("noop");
    let sig = ctx.func_type(types::I32, &[types::I32], false);
    let f = module.create_function("f", sig, Linkage::External, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let x = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let zero = b.module().const_int(types::I32, 0);
        let y = b.iadd(x, zero).unwrap();
        b.ret(Some(y)).unwrap();
    }
    let before = count_insts(&module, f);
    let mut pm = PassManager::new(OptLevel::None);
    assert!(!pm.run_module(&ctx, &mut module));
    assert_eq!(count_insts(&module, f), before);
}

#[test]
fn custom_passes_run_and_report() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("custom");
    let sig = ctx.func_type(types::VOID, &[], false);
    let f = module.create_function("f", sig, Linkage::Internal, &[]);
    let entry = module.create_block(f, "entry");
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        b.ret(None).unwrap();
    }
    let mut pm = PassManager::new(OptLevel::Basic);
    let counter = std::rc::Rc::new(std::cell::Cell::new(0u32));
    let seen = counter.clone();
    pm.register(
        "probe",
        OptLevel::Basic,
        Box::new(move |_ctx, _module, _func| {
            seen.set(seen.get() + 1);
            // Report no change so the fixpoint loop terminates.
            false
        }),
    );
    assert!(pm.enabled_passes().contains(&"probe"));
    pm.disable("probe");
    assert!(!pm.enabled_passes().contains(&"probe"));
    pm.enable("probe");
    assert!(pm.enabled_passes().contains(&"probe"));
    pm.run_function(&ctx, &mut module, f);
    assert!(counter.get() >= 1);
}
