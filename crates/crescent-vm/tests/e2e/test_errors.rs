use super::helpers::*;
use crescent_core::value::TValue;
use crescent_vm::opcode::{Instruction, OpCode};
use crescent_vm::{CancelToken, FunctionProto, RuntimeError};

/// error() with a string message is catchable by pcall.
#[test]
fn test_pcall_catches_error_string() {
    let mut bad = Asm::new().regs(4);
    let kerr = bad.ks("error");
    let kmsg = bad.ks("boom");
    bad.bx(OpCode::GetGlobal, 0, kerr)
        .bx(OpCode::LoadK, 1, kmsg)
        .op(OpCode::Call, 0, 2, 1)
        .op(OpCode::Return, 0, 1, 0);

    let mut asm = Asm::new().regs(4);
    let child = asm.child(bad.build());
    let kpcall = asm.ks("pcall");
    asm.bx(OpCode::GetGlobal, 0, kpcall)
        .bx(OpCode::Closure, 1, child)
        .op(OpCode::Call, 0, 2, 0)
        .op(OpCode::Return, 0, 0, 0);
    let (vm, r) = run(asm.build());
    assert_bool(&r, 0, false);
    assert!(str_contains(&vm, r[1], "boom"));
}

/// error() with a non-string object travels through unchanged.
#[test]
fn test_error_object_identity() {
    let mut vm = new_vm();
    let marker = vm.new_table();
    vm.set_global("marker", TValue::from_table(marker)).unwrap();

    // pcall(function() error(marker) end)
    let mut bad = Asm::new().regs(4);
    let kerr = bad.ks("error");
    let kmark = bad.ks("marker");
    bad.bx(OpCode::GetGlobal, 0, kerr)
        .bx(OpCode::GetGlobal, 1, kmark)
        .op(OpCode::Call, 0, 2, 1)
        .op(OpCode::Return, 0, 1, 0);
    let mut asm = Asm::new().regs(4);
    let child = asm.child(bad.build());
    let kpcall = asm.ks("pcall");
    asm.bx(OpCode::GetGlobal, 0, kpcall)
        .bx(OpCode::Closure, 1, child)
        .op(OpCode::Call, 0, 2, 0)
        .op(OpCode::Return, 0, 0, 0);
    let fid = vm.load_proto(asm.build());
    vm.push(TValue::from_function(fid));
    vm.call(0, 2).unwrap();
    let obj = vm.pop();
    let ok = vm.pop();
    assert_eq!(ok.as_bool(), Some(false));
    assert_eq!(obj, TValue::from_table(marker));
}

/// xpcall runs the handler once; its result replaces the error object.
#[test]
fn test_xpcall_handler_replaces_error() {
    fn handler(vm: &mut crescent_vm::Vm) -> Result<i32, RuntimeError> {
        let msg = vm.check_string(1)?;
        let s = vm.new_string(format!("caught: {msg}"));
        vm.push(s);
        Ok(1)
    }
    let mut vm = new_vm();
    vm.register("handler", handler).unwrap();

    let mut bad = Asm::new().regs(2);
    let knil = bad.k(crescent_vm::Constant::Nil);
    let k1 = bad.kn(1.0);
    bad.op(OpCode::Add, 0, kst(knil), kst(k1))
        .op(OpCode::Return, 0, 2, 0);

    let mut asm = Asm::new().regs(6);
    let child = asm.child(bad.build());
    let kxpcall = asm.ks("xpcall");
    let khandler = asm.ks("handler");
    asm.bx(OpCode::GetGlobal, 0, kxpcall)
        .bx(OpCode::Closure, 1, child)
        .bx(OpCode::GetGlobal, 2, khandler)
        .op(OpCode::Call, 0, 3, 0)
        .op(OpCode::Return, 0, 0, 0);
    let fid = vm.load_proto(asm.build());
    vm.push(TValue::from_function(fid));
    vm.call(0, 2).unwrap();
    let obj = vm.pop();
    let ok = vm.pop();
    assert_eq!(ok.as_bool(), Some(false));
    let sid = obj.as_string().unwrap();
    let msg = vm.strings.get_lossy(sid).into_owned();
    assert!(msg.starts_with("caught:"), "got: {msg}");
    assert!(msg.contains("__add"), "got: {msg}");
}

/// The unwinder closes upvalues of every frame it pops.
#[test]
fn test_unwind_closes_upvalues() {
    // inner: captures x, then fails; the closure escapes through a global
    let mut get = Asm::new().upvalues(1).regs(2);
    get.op(OpCode::GetUpval, 0, 0, 0)
        .op(OpCode::Return, 0, 2, 0);

    let mut bad = Asm::new().regs(8);
    let get_id = bad.child(get.build());
    let k7 = bad.kn(7.0);
    let kg = bad.ks("g");
    let kerr = bad.ks("error");
    let kmsg = bad.ks("fail");
    bad.bx(OpCode::LoadK, 0, k7) // x = 7
        .bx(OpCode::Closure, 1, get_id)
        .op(OpCode::Move, 0, 0, 0) // capture slot 0
        .bx(OpCode::SetGlobal, 1, kg) // g = closure
        .bx(OpCode::GetGlobal, 2, kerr)
        .bx(OpCode::LoadK, 3, kmsg)
        .op(OpCode::Call, 2, 2, 1) // error("fail")
        .op(OpCode::Return, 0, 1, 0);

    let mut vm = new_vm();
    let fid = vm.load_proto(bad.build());
    vm.push(TValue::from_function(fid));
    let err = vm.pcall(0, 0, None).unwrap_err();
    assert!(err.to_string().contains("fail"));

    // The escaped closure still sees x = 7: the unwinder closed it.
    let g = vm.get_global("g").unwrap();
    vm.push(g);
    vm.call(0, 1).unwrap();
    assert_eq!(vm.pop().as_number(), Some(7.0));
}

/// Messages raised inside scripted frames carry source:line prefixes when
/// debug info is present.
#[test]
fn test_error_position_annotation() {
    let mut asm = Asm::new().regs(2);
    let knil = asm.k(crescent_vm::Constant::Nil);
    let k1 = asm.kn(1.0);
    asm.op(OpCode::Add, 0, kst(knil), kst(k1))
        .op(OpCode::Return, 0, 2, 0);
    let mut proto = asm.build();
    proto.source = "chunk.cr".to_string();
    proto.lines = vec![5, 6];

    let mut vm = new_vm();
    match vm.run_proto(proto) {
        Err(e) => {
            let msg = e.to_string();
            assert!(msg.starts_with("chunk.cr:5:"), "got: {msg}");
        }
        Ok(_) => panic!("expected error"),
    }
}

/// Cancellation interrupts a busy loop and reports its reason.
#[test]
fn test_cancellation_interrupts_loop() {
    let mut vm = new_vm();
    let token = CancelToken::new();
    vm.set_cancel_token(token.clone());

    let spinner = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        token.cancel("deadline reached");
    });

    // while true do end
    let proto = FunctionProto {
        code: vec![
            Instruction::asbx(OpCode::Jmp, 0, -1),
            Instruction::abc(OpCode::Return, 0, 1, 0),
        ],
        used_registers: 2,
        source: "spin".to_string(),
        ..Default::default()
    };
    match vm.run_proto(proto) {
        Err(RuntimeError::Cancelled(reason)) => assert_eq!(reason, "deadline reached"),
        other => panic!("expected cancellation, got {other:?}"),
    }
    spinner.join().unwrap();
}

/// A pre-signalled token fires before the first instruction.
#[test]
fn test_cancellation_pre_signalled() {
    let mut vm = new_vm();
    let token = CancelToken::new();
    token.cancel("never started");
    vm.set_cancel_token(token);

    let mut asm = Asm::new().regs(2);
    let k1 = asm.kn(1.0);
    asm.bx(OpCode::LoadK, 0, k1).op(OpCode::Return, 0, 2, 0);
    match vm.run_proto(asm.build()) {
        Err(RuntimeError::Cancelled(reason)) => assert_eq!(reason, "never started"),
        other => panic!("expected cancellation, got {other:?}"),
    }
}

/// Calling a non-function is an error; __call-less tables included.
#[test]
fn test_call_non_function() {
    let mut asm = Asm::new().regs(4);
    let k1 = asm.kn(1.0);
    asm.bx(OpCode::LoadK, 0, k1)
        .op(OpCode::Call, 0, 1, 1)
        .op(OpCode::Return, 0, 1, 0);
    let msg = run_err(asm.build());
    assert!(msg.contains("non-function"), "got: {msg}");
}

/// Indexing a non-table without __index is an error.
#[test]
fn test_index_non_table() {
    let mut asm = Asm::new().regs(4);
    let k1 = asm.kn(1.0);
    let kf = asm.ks("field");
    asm.bx(OpCode::LoadK, 0, k1)
        .op(OpCode::GetTableKS, 1, 0, kst(kf))
        .op(OpCode::Return, 1, 2, 0);
    let msg = run_err(asm.build());
    assert!(msg.contains("attempt to index"), "got: {msg}");
}

/// Comparing mismatched types is an error that pcall can catch.
#[test]
fn test_compare_type_mismatch() {
    let mut asm = Asm::new().regs(4);
    let k1 = asm.kn(1.0);
    let ks = asm.ks("x");
    asm.op(OpCode::Lt, 1, kst(k1), kst(ks))
        .sbx(OpCode::Jmp, 0, 0)
        .op(OpCode::Return, 0, 1, 0);
    let msg = run_err(asm.build());
    assert!(msg.contains("attempt to compare"), "got: {msg}");
}
