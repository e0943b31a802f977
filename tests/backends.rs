//! Backend behavior: completeness over the opcode set, round-trip
//! stability, ABI and FP-format specifics, data emission.

use anvil::ir::condcodes::{FloatCC, IntCC};
use anvil::ir::function::Linkage;
use anvil::ir::module::Module;
use anvil::ir::types;
use anvil::ir::Builder;
use anvil::opt::PassManager;
use anvil::settings::{Abi, Arch, CpuModel, FpFormat, OptLevel};
use anvil::Context;

/// Build a module exercising the full operation surface: arithmetic,
/// bitwise, comparisons, floats, conversions, memory, calls, phis, select
/// and both branch forms.
fn build_omnibus(ctx: &mut Context) -> Module {
    let mut module = ctx.create_module("omnibus");
    let i32p = ctx.ptr_type(types::I32);
    let callee_sig = ctx.func_type(types::I32, &[types::I32, types::F64], false);
    let callee = module.declare_function("helper", callee_sig);
    let callee_addr = module.func_addr(callee);

    let pair = ctx.struct_type(&[types::I32, types::F64]);
    let sig = ctx.func_type(types::I32, &[types::I32, types::I32, i32p, types::F64], false);
    let f = module.create_function(
        "omni",
        sig,
        Linkage::External,
        &[types::I32, types::I32, i32p, types::F64],
    );
    let entry = module.create_block(f, "entry");
    let loop_b = module.create_block(f, "loop");
    let exit_b = module.create_block(f, "exit");
    let x = module.func_param(f, 0).unwrap();
    let y = module.func_param(f, 1).unwrap();
    let p = module.func_param(f, 2).unwrap();
    let d = module.func_param(f, 3).unwrap();

    ctx.set_insert_point(entry);
    let mut b = Builder::new(ctx, &mut module);
    let sum = b.iadd(x, y).unwrap();
    let diff = b.isub(sum, y).unwrap();
    let prod = b.imul(diff, x).unwrap();
    let quot = b.sdiv(prod, y).unwrap();
    let uq = b.udiv(prod, y).unwrap();
    let rem = b.srem(prod, y).unwrap();
    let urem = b.urem(prod, y).unwrap();
    let anded = b.band(quot, rem).unwrap();
    let ored = b.bor(anded, uq).unwrap();
    let xored = b.bxor(ored, urem).unwrap();
    let notted = b.bnot(xored).unwrap();
    let negd = b.ineg(notted).unwrap();
    let three = b.module().const_int(types::I32, 3);
    let shl = b.ishl(negd, three).unwrap();
    let lshr = b.ushr(shl, three).unwrap();
    let ashr = b.sshr(lshr, three).unwrap();

    let slot = b.stack_alloc(types::I32).unwrap();
    b.store(ashr, slot).unwrap();
    let loaded = b.load(types::I32, slot).unwrap();
    let elem = b.elem_addr(types::I32, p, &[loaded]).unwrap();
    let elem_val = b.load(types::I32, elem).unwrap();
    let pair_slot = b.stack_alloc(pair).unwrap();
    let fld = b.field_addr(pair, pair_slot, 1).unwrap();
    b.store(d, fld).unwrap();

    let fsum = b.fadd(d, d).unwrap();
    let fdif = b.fsub(fsum, d).unwrap();
    let fprod = b.fmul(fdif, d).unwrap();
    let fquot = b.fdiv(fprod, d).unwrap();
    let fneg = b.fneg(fquot).unwrap();
    let fabs = b.fabs(fneg).unwrap();
    let fsmall = b.fdemote(types::F32, fabs).unwrap();
    let fwide = b.fpromote(types::F64, fsmall).unwrap();
    let fint = b.fcvt_to_sint(types::I32, fwide).unwrap();
    let fuint = b.fcvt_to_uint(types::U32, fwide).unwrap();
    let _ = fuint;
    let refloat = b.fcvt_from_sint(types::F64, fint).unwrap();
    let _refloat2 = b.fcvt_from_uint(types::F64, fint).unwrap();
    let fcond = b.fcmp(FloatCC::LessThan, refloat, d).unwrap();
    let _ = fcond;

    let narrow = b.ireduce(types::I8, elem_val).unwrap();
    let wide_u = b.uextend(types::I32, narrow).unwrap();
    let wide_s = b.sextend(types::I32, narrow).unwrap();
    let bits = b.bitcast(types::U32, wide_s).unwrap();
    let _ = bits;
    let addr_int = b.ptr_to_int(types::I32, p).unwrap();
    let back = b.int_to_ptr(i32p, addr_int).unwrap();
    let _ = back;

    let called = b
        .call(callee_sig, callee_addr, &[wide_u, d])
        .unwrap()
        .unwrap();
    let cond = b.icmp(IntCC::SignedGreaterThan, called, x).unwrap();
    let sel = b.select(cond, called, x).unwrap();
    b.brif(cond, loop_b, exit_b).unwrap();

    b.ctx().set_insert_point(loop_b);
    let phi = b.phi(types::I32).unwrap();
    b.add_phi_incoming(phi, sel, entry).unwrap();
    b.jump(exit_b).unwrap();

    b.ctx().set_insert_point(exit_b);
    b.ret(Some(sel)).unwrap();
    module
}

#[test]
fn every_backend_lowers_the_full_surface() {
    let _ = env_logger::builder().is_test(true).try_init();
    for &arch in Arch::all() {
        let mut ctx = Context::new();
        ctx.set_arch(arch);
        let module = build_omnibus(&mut ctx);
        let text = ctx
            .render_module(&module)
            .unwrap_or_else(|e| panic!("{arch}: {e}"));
        assert!(!text.is_empty(), "{arch}: empty output");
        // Nothing may be silently omitted: the output either lowers an
        // operation or carries the recognizable marker.
        if text.to_ascii_lowercase().contains("unsupported") {
            assert!(
                text.contains("anvil: unsupported") || text.contains("ANVIL UNSUPPORTED"),
                "{arch}: marker format"
            );
        }
    }
}

#[test]
fn rendering_is_deterministic_and_level_none_is_identity() {
    for &arch in [Arch::X86_64, Arch::S370Xa, Arch::Ppc64, Arch::Aarch64].iter() {
        let mut ctx1 = Context::new();
        ctx1.set_arch(arch);
        let module1 = build_omnibus(&mut ctx1);
        let direct = ctx1.render_module(&module1).unwrap();

        let mut ctx2 = Context::new();
        ctx2.set_arch(arch);
        ctx2.set_opt_level(OptLevel::None);
        let mut module2 = build_omnibus(&mut ctx2);
        let mut pm = PassManager::with_context(&ctx2);
        assert!(!pm.run_module(&ctx2, &mut module2));
        let through_opt = ctx2.render_module(&module2).unwrap();

        assert_eq!(direct, through_opt, "{arch}: level None altered output");
    }
}

#[test]
fn mainframe_call_marks_and_clears_the_parameter_list() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::S370Xa);
    let mut module = ctx.create_module("vlbit");
    let callee_sig = ctx.func_type(types::VOID, &[types::I32], false);
    let callee = module.declare_function("extproc", callee_sig);
    let callee_addr = module.func_addr(callee);
    let sig = ctx.func_type(types::VOID, &[types::I32], false);
    let f = module.create_function("caller", sig, Linkage::External, &[types::I32]);
    let entry = module.create_block(f, "entry");
    let x = module.func_param(f, 0).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        b.call(callee_sig, callee_addr, &[x]).unwrap();
        b.ret(None).unwrap();
    }
    let text = ctx.render_module(&module).unwrap();
    let set = text.find("X'80'").expect("VL bit set on the last address");
    let call = text.find("BALR").expect("call instruction");
    let clear = text.find("X'7F'").expect("VL bit cleared after the call");
    assert!(set < call && call < clear, "set, call, clear must be ordered");
    assert!(text.contains("OI"));
    assert!(text.contains("NI"));
}

#[test]
fn fp_format_selects_hex_or_ieee_mnemonics() {
    let build = |ctx: &mut Context| {
        let mut module = ctx.create_module("fp");
        let sig = ctx.func_type(types::F64, &[types::F64, types::F64], false);
        let f = module.create_function("fadd2", sig, Linkage::External, &[types::F64, types::F64]);
        let entry = module.create_block(f, "entry");
        let a = module.func_param(f, 0).unwrap();
        let b_param = module.func_param(f, 1).unwrap();
        ctx.set_insert_point(entry);
        let mut b = Builder::new(ctx, &mut module);
        let s = b.fadd(a, b_param).unwrap();
        b.ret(Some(s)).unwrap();
        module
    };

    let mut ctx = Context::new();
    ctx.set_arch(Arch::Esa390);
    ctx.set_fp_format(FpFormat::Hex);
    let module = build(&mut ctx);
    let hex = ctx.render_module(&module).unwrap();
    assert!(hex.contains("ADR"), "hex format must use ADR");
    assert!(!hex.contains("ADBR"));

    let mut ctx = Context::new();
    ctx.set_arch(Arch::Esa390);
    ctx.set_fp_format(FpFormat::Ieee);
    let module = build(&mut ctx);
    let ieee = ctx.render_module(&module).unwrap();
    assert!(ieee.contains("ADBR"), "IEEE format must use ADBR");

    // Mixed resolves by the CPU's binary-FP facility.
    let mut ctx = Context::new();
    ctx.set_arch(Arch::ZArch);
    ctx.set_fp_format(FpFormat::Mixed);
    ctx.set_cpu(CpuModel::Z900);
    let module = build(&mut ctx);
    let mixed = ctx.render_module(&module).unwrap();
    assert!(mixed.contains("ADBR"));
}

#[test]
fn darwin_abi_prefixes_symbols() {
    let build = |ctx: &mut Context| {
        let mut module = ctx.create_module("abi");
        let sig = ctx.func_type(types::I32, &[], false);
        let f = module.create_function("main_entry", sig, Linkage::External, &[]);
        let entry = module.create_block(f, "entry");
        ctx.set_insert_point(entry);
        let mut b = Builder::new(ctx, &mut module);
        let v = b.module().const_int(types::I32, 7);
        b.ret(Some(v)).unwrap();
        module
    };

    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    ctx.set_abi(Abi::Darwin);
    let module = build(&mut ctx);
    let text = ctx.render_module(&module).unwrap();
    assert!(text.contains("_main_entry:"));

    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let module = build(&mut ctx);
    let text = ctx.render_module(&module).unwrap();
    assert!(text.contains("main_entry:"));
    assert!(!text.contains("_main_entry:"));
}

#[test]
fn elfv1_emits_descriptors_and_elfv2_localentry() {
    let build = |ctx: &mut Context| {
        let mut module = ctx.create_module("toc");
        let sig = ctx.func_type(types::I32, &[types::I32], false);
        let f = module.create_function("addone", sig, Linkage::External, &[types::I32]);
        let entry = module.create_block(f, "entry");
        let p = module.func_param(f, 0).unwrap();
        ctx.set_insert_point(entry);
        let mut b = Builder::new(ctx, &mut module);
        let one = b.module().const_int(types::I32, 1);
        let v = b.iadd(p, one).unwrap();
        b.ret(Some(v)).unwrap();
        module
    };

    let mut ctx = Context::new();
    ctx.set_arch(Arch::Ppc64);
    let module = build(&mut ctx);
    let v1 = ctx.render_module(&module).unwrap();
    assert!(v1.contains(".opd"), "ELFv1 needs a function descriptor");
    assert!(v1.contains(".TOC.@tocbase"));
    assert!(v1.contains("std\tr2"));

    let mut ctx = Context::new();
    ctx.set_arch(Arch::Ppc64Le);
    let module = build(&mut ctx);
    let v2 = ctx.render_module(&module).unwrap();
    assert!(v2.contains(".localentry"));
    assert!(v2.contains(".abiversion 2"));
}

#[test]
fn globals_and_strings_reach_the_data_sections() {
    let build = |ctx: &mut Context| {
        let mut module = ctx.create_module("data");
        let i8p = ctx.ptr_type(types::I8);
        let i32p = ctx.ptr_type(types::I32);
        let forty_two = module.const_int(types::I32, 42);
        module.add_global("counter", types::I32, i32p, Linkage::External, Some(forty_two));
        let sig = ctx.func_type(i8p, &[], false);
        let f = module.create_function("greeting", sig, Linkage::External, &[]);
        let entry = module.create_block(f, "entry");
        ctx.set_insert_point(entry);
        let mut b = Builder::new(ctx, &mut module);
        let s = b.module().const_string(i8p, "Hi\n");
        b.ret(Some(s)).unwrap();
        module
    };

    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let module = build(&mut ctx);
    let text = ctx.render_module(&module).unwrap();
    assert!(text.contains(".data"));
    assert!(text.contains("counter:"));
    assert!(text.contains(".long\t42"));
    assert!(text.contains(".asciz\t\"Hi\\n\""));

    // The same program on a mainframe target: EBCDIC text, hex escapes for
    // the non-printable newline, literal pool closed by LTORG.
    let mut ctx = Context::new();
    ctx.set_arch(Arch::ZArch);
    let module = build(&mut ctx);
    let text = ctx.render_module(&module).unwrap();
    assert!(text.contains("LTORG"));
    assert!(text.contains("C'Hi'"));
    assert!(text.contains("X'25'"), "EBCDIC newline as hex");
    assert!(text.contains("F'42'"));
}

#[test]
fn zero_fill_globals_and_register_equates_on_hlasm() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::S370);
    let mut module = ctx.create_module("equates");
    let p = ctx.ptr_type(types::I64);
    module.add_global("scratch", types::I64, p, Linkage::Internal, None);
    let sig = ctx.func_type(types::VOID, &[], false);
    let f = module.create_function("noop", sig, Linkage::External, &[]);
    let entry = module.create_block(f, "entry");
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        b.ret(None).unwrap();
    }
    let text = ctx.render_module(&module).unwrap();
    assert!(text.contains("R15      EQU"));
    assert!(text.contains("XL8'00'"));
    assert!(text.contains("END"));
}

#[test]
fn unsupported_wide_integers_are_marked_on_narrow_targets() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86);
    let mut module = ctx.create_module("wide");
    let sig = ctx.func_type(types::I64, &[types::I64, types::I64], false);
    let f = module.create_function("add64", sig, Linkage::External, &[types::I64, types::I64]);
    let entry = module.create_block(f, "entry");
    let a = module.func_param(f, 0).unwrap();
    let b_param = module.func_param(f, 1).unwrap();
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        let v = b.iadd(a, b_param).unwrap();
        b.ret(Some(v)).unwrap();
    }
    let text = ctx.render_module(&module).unwrap();
    assert!(text.contains("# anvil: unsupported"));
}

#[test]
fn backend_rebinds_when_the_architecture_changes() {
    let mut ctx = Context::new();
    ctx.set_arch(Arch::X86_64);
    let mut module = ctx.create_module("rebind");
    let sig = ctx.func_type(types::VOID, &[], false);
    let f = module.create_function("f", sig, Linkage::External, &[]);
    let entry = module.create_block(f, "entry");
    ctx.set_insert_point(entry);
    {
        let mut b = Builder::new(&mut ctx, &mut module);
        b.ret(None).unwrap();
    }
    let x86 = ctx.render_module(&module).unwrap();
    assert!(x86.contains("ret"));
    ctx.set_arch(Arch::Aarch64);
    let arm = ctx.render_module(&module).unwrap();
    assert!(arm.contains("ldp\tx29, x30"));
    assert_ne!(x86, arm);
}
