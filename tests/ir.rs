//! Structural invariants of the IR: type identity, SSA form, block
//! termination, builder input contracts.

use anvil::ir::condcodes::IntCC;
use anvil::ir::function::Linkage;
use anvil::ir::types;
use anvil::ir::{Builder, Opcode};
use anvil::settings::Arch;
use anvil::{Context, ErrorCode};

#[test]
fn structurally_equal_types_are_identical() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let p1 = ctx.ptr_type(types::I32);
    let p2 = ctx.ptr_type(types::I32);
    assert_eq!(p1, p2);
    let s1 = ctx.struct_type(&[types::I8, types::I32, p1]);
    let s2 = ctx.struct_type(&[types::I8, types::I32, p2]);
    assert_eq!(s1, s2);
    let a1 = ctx.array_type(s1, 4);
    let a2 = ctx.array_type(s2, 4);
    assert_eq!(a1, a2);
    let f1 = ctx.func_type(types::I32, &[p1, types::I64], true);
    let f2 = ctx.func_type(types::I32, &[p2, types::I64], true);
    assert_eq!(f1, f2);
    assert_ne!(f1, ctx.func_type(types::I32, &[p1, types::I64], false));
}

#[test]
fn every_result_backlinks_to_its_producer() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("ssa");
    let sig = ctx.func_type(types::I32, &[types::I32], false);
    let f = module.create_function("f", sig, Linkage::External, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let p = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    let mut b = Builder::new(&mut ctx, &mut module);
    let v1 = b.iadd(p, p).unwrap();
    let v2 = b.imul(v1, p).unwrap();
    b.ret(Some(v2)).unwrap();

    for v in [v1, v2] {
        let inst = module.producer(v).expect("instruction result");
        assert_eq!(module.inst_result(inst), Some(v));
    }
    assert_ne!(v1, v2);
}

#[test]
fn builder_rejects_mismatched_operands() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("bad");
    let sig = ctx.func_type(types::VOID, &[types::I32, types::I64], false);
    let f = module.create_function("f", sig, Linkage::Internal, &[types::I32, types::I64]);
    let entry = module.create_block(f, "entry");
    let a = module.func_param(f, 0).unwrap();
    let b_param = module.func_param(f, 1).unwrap();
    ctx.set_insert_point(entry);
    let mut b = Builder::new(&mut ctx, &mut module);
    let err = b.iadd(a, b_param).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    let err = b.fadd(a, a).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn builder_without_insertion_point_is_internal_error() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("noblock");
    let x = module.const_int(types::I32, 1);
    let mut b = Builder::new(&mut ctx, &mut module);
    let err = b.iadd(x, x).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
}

#[test]
fn load_store_enforce_pointee_agreement() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("mem");
    let sig = ctx.func_type(types::VOID, &[], false);
    let f = module.create_function("f", sig, Linkage::Internal, &[]);
    let entry = module.create_block(f, "entry");
    ctx.set_insert_point(entry);
    let mut b = Builder::new(&mut ctx, &mut module);
    let slot = b.stack_alloc(types::I32).unwrap();
    assert!(b.load(types::I32, slot).is_ok());
    assert_eq!(
        b.load(types::I64, slot).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );
    let wide = b.module().const_int(types::I64, 9);
    assert_eq!(
        b.store(wide, slot).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );
}

#[test]
fn comparisons_produce_boolean_bytes() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("cmp");
    let sig = ctx.func_type(types::VOID, &[types::I32, types::I32], false);
    let f = module.create_function("f", sig, Linkage::Internal, &[types::I32, types::I32]);
    let entry = module.create_block(f, "entry");
    let a = module.func_param(f, 0).unwrap();
    let b_param = module.func_param(f, 1).unwrap();
    ctx.set_insert_point(entry);
    let mut b = Builder::new(&mut ctx, &mut module);
    let c = b.icmp(IntCC::SignedLessThan, a, b_param).unwrap();
    assert_eq!(module.value_type(c), types::I8);
    assert!(module.value_is_bool(c));
}

#[test]
fn call_arity_and_types_are_checked() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("call");
    let callee_sig = ctx.func_type(types::I32, &[types::I32], false);
    let callee = module.declare_function("ext", callee_sig);
    let callee_addr = module.func_addr(callee);
    let sig = ctx.func_type(types::VOID, &[types::I32], false);
    let f = module.create_function("f", sig, Linkage::Internal, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let p = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    let mut b = Builder::new(&mut ctx, &mut module);
    assert_eq!(
        b.call(callee_sig, callee_addr, &[]).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );
    let wide = b.module().const_int(types::I64, 3);
    assert_eq!(
        b.call(callee_sig, callee_addr, &[wide]).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );
    let r = b.call(callee_sig, callee_addr, &[p]).unwrap();
    assert!(r.is_some());
}

#[test]
fn phi_incoming_types_must_match() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("phi");
    let sig = ctx.func_type(types::I32, &[types::I32], false);
    let f = module.create_function("f", sig, Linkage::Internal, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let merge = module.create_block(f, "merge");
    let p = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        b.jump(merge).unwrap();
    }
    ctx.set_insert_point(merge);
    let mut b = Builder::new(&mut ctx, &mut module);
    let phi = b.phi(types::I32).unwrap();
    b.add_phi_incoming(phi, p, entry).unwrap();
    let wide = b.module().const_int(types::I64, 1);
    assert_eq!(
        b.add_phi_incoming(phi, wide, entry).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );
}

#[test]
fn unterminated_middle_block_is_rejected_before_lowering() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("broken");
    let sig = ctx.func_type(types::VOID, &[], false);
    let f = module.create_function("f", sig, Linkage::Internal, &[]);
    let first = module.create_block(f, "first");
    let second = module.create_block(f, "second");
    let _ = first;
    ctx.set_insert_point(second);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        b.ret(None).unwrap();
    }
    // `first` has no terminator and is not the final block.
    let err = ctx.render_module(&module).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Verifier);
    assert_eq!(ctx.last_error().unwrap().0, ErrorCode::Verifier);
}

#[test]
fn terminators_end_blocks_and_fallthrough_is_allowed_last() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("fall");
    let sig = ctx.func_type(types::I32, &[], false);
    let f = module.create_function("f", sig, Linkage::External, &[]);
    let entry = module.create_block(f, "entry");
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let one = b.module().const_int(types::I32, 1);
        let two = b.module().const_int(types::I32, 2);
        b.iadd(one, two).unwrap();
        // No explicit return: the backend supplies the epilogue.
    }
    assert!(!module.is_terminated(entry));
    let text = ctx.render_module(&module).unwrap();
    assert!(text.contains("ret"));
}

#[test]
fn printer_renders_functions() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("print");
    let sig = ctx.func_type(types::I32, &[types::I32], false);
    let f = module.create_function("double_it", sig, Linkage::External, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let p = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let v = b.iadd(p, p).unwrap();
        b.ret(Some(v)).unwrap();
    }
    let text = anvil::ir::write::function_to_string(&ctx, &module, f);
    assert!(text.contains("function %double_it(i32) -> i32"));
    assert!(text.contains(Opcode::Iadd.name()));
    assert!(text.contains("return"));
}
