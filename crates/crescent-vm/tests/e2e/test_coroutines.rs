use super::helpers::*;
use crescent_core::value::TValue;
use crescent_vm::opcode::OpCode;
use crescent_vm::Resume;

fn yield_and_double() -> crescent_vm::FunctionProto {
    // function(a, b) local c = coroutine.yield(a + b); return c * 2 end
    let mut f = Asm::new().params(2).regs(6);
    let k2 = f.kn(2.0);
    let kco = f.ks("coroutine");
    let kyield = f.ks("yield");
    f.bx(OpCode::GetGlobal, 2, kco)
        .op(OpCode::GetTableKS, 2, 2, kst(kyield))
        .op(OpCode::Add, 3, 0, 1)
        .op(OpCode::Call, 2, 2, 2)
        .op(OpCode::Mul, 2, 2, kst(k2))
        .op(OpCode::Return, 2, 2, 0);
    f.build()
}

/// Values flow in through resume and out through yield, both directions.
#[test]
fn test_resume_yield_roundtrip() {
    let mut vm = new_vm();
    let fid = vm.load_proto(yield_and_double());
    let co = vm.new_coroutine(fid);

    match vm.resume(co, vec![TValue::from_number(3.0), TValue::from_number(4.0)]) {
        Ok(Resume::Yield(vals)) => {
            assert_eq!(vals.len(), 1);
            assert_eq!(vals[0].as_number(), Some(7.0));
        }
        other => panic!("expected yield, got {other:?}"),
    }
    assert_eq!(vm.coroutine_status(co), "suspended");

    match vm.resume(co, vec![TValue::from_number(10.0)]) {
        Ok(Resume::Return(vals)) => {
            assert_eq!(vals.len(), 1);
            assert_eq!(vals[0].as_number(), Some(20.0));
        }
        other => panic!("expected return, got {other:?}"),
    }
    assert_eq!(vm.coroutine_status(co), "dead");

    match vm.resume(co, vec![]) {
        Ok(Resume::Error(obj)) => {
            assert!(str_contains(&vm, obj, "dead coroutine"));
        }
        other => panic!("expected dead-coroutine error, got {other:?}"),
    }
}

/// The same flow driven entirely from script code.
#[test]
fn test_scripted_create_resume() {
    let mut asm = Asm::new().regs(10);
    let body = asm.child(yield_and_double());
    let kco = asm.ks("coroutine");
    let kcreate = asm.ks("create");
    let kresume = asm.ks("resume");
    let k3 = asm.kn(3.0);
    let k4 = asm.kn(4.0);
    let k10 = asm.kn(10.0);
    asm.bx(OpCode::GetGlobal, 0, kco)
        .op(OpCode::GetTableKS, 1, 0, kst(kcreate))
        .bx(OpCode::Closure, 2, body)
        .op(OpCode::Call, 1, 2, 2) // co = coroutine.create(body)
        .op(OpCode::GetTableKS, 2, 0, kst(kresume))
        .op(OpCode::Move, 3, 2, 0)
        .op(OpCode::Move, 4, 1, 0)
        .bx(OpCode::LoadK, 5, k3)
        .bx(OpCode::LoadK, 6, k4)
        .op(OpCode::Call, 3, 4, 3) // ok, v = resume(co, 3, 4)
        .op(OpCode::Move, 5, 2, 0)
        .op(OpCode::Move, 6, 1, 0)
        .bx(OpCode::LoadK, 7, k10)
        .op(OpCode::Call, 5, 3, 3) // ok2, v2 = resume(co, 10)
        .op(OpCode::Return, 3, 5, 0);
    let (_, r) = run(asm.build());
    assert_bool(&r, 0, true);
    assert_num(&r, 1, 7.0);
    assert_bool(&r, 2, true);
    assert_num(&r, 3, 20.0);
}

/// coroutine.wrap re-raises nothing on the happy path and skips the flag.
#[test]
fn test_wrap_returns_values_directly() {
    // body: coroutine.yield(1); return 2
    let mut body = Asm::new().regs(4);
    let kco = body.ks("coroutine");
    let kyield = body.ks("yield");
    let k1 = body.kn(1.0);
    let k2 = body.kn(2.0);
    body.bx(OpCode::GetGlobal, 0, kco)
        .op(OpCode::GetTableKS, 0, 0, kst(kyield))
        .bx(OpCode::LoadK, 1, k1)
        .op(OpCode::Call, 0, 2, 1)
        .bx(OpCode::LoadK, 0, k2)
        .op(OpCode::Return, 0, 2, 0);

    let mut asm = Asm::new().regs(8);
    let body_id = asm.child(body.build());
    let kco = asm.ks("coroutine");
    let kwrap = asm.ks("wrap");
    asm.bx(OpCode::GetGlobal, 0, kco)
        .op(OpCode::GetTableKS, 0, 0, kst(kwrap))
        .bx(OpCode::Closure, 1, body_id)
        .op(OpCode::Call, 0, 2, 2) // f = coroutine.wrap(body)
        .op(OpCode::Move, 1, 0, 0)
        .op(OpCode::Call, 1, 1, 2) // f() -> 1
        .op(OpCode::Move, 2, 0, 0)
        .op(OpCode::Call, 2, 1, 2) // f() -> 2
        .op(OpCode::Return, 1, 3, 0);
    let (_, r) = run(asm.build());
    assert_num(&r, 0, 1.0);
    assert_num(&r, 1, 2.0);
}

/// Errors inside a plain coroutine surface as (false, message).
#[test]
fn test_error_in_coroutine_reports_to_resumer() {
    // body: error("boom")
    let mut body = Asm::new().regs(4);
    let kerr = body.ks("error");
    let kboom = body.ks("boom");
    body.bx(OpCode::GetGlobal, 0, kerr)
        .bx(OpCode::LoadK, 1, kboom)
        .op(OpCode::Call, 0, 2, 1)
        .op(OpCode::Return, 0, 1, 0);

    let mut vm = new_vm();
    let fid = vm.load_proto(body.build());
    let co = vm.new_coroutine(fid);
    match vm.resume(co, vec![]) {
        Ok(Resume::Error(obj)) => assert!(str_contains(&vm, obj, "boom")),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(vm.coroutine_status(co), "dead");
}

/// Errors inside a wrapped coroutine rethrow in the resumer.
#[test]
fn test_error_in_wrapped_coroutine_rethrows() {
    let mut body = Asm::new().regs(4);
    let kerr = body.ks("error");
    let kboom = body.ks("boom");
    body.bx(OpCode::GetGlobal, 0, kerr)
        .bx(OpCode::LoadK, 1, kboom)
        .op(OpCode::Call, 0, 2, 1)
        .op(OpCode::Return, 0, 1, 0);

    let mut vm = new_vm();
    let fid = vm.load_proto(body.build());
    let co = vm.new_wrapped_coroutine(fid);
    match vm.resume(co, vec![]) {
        Err(e) => assert!(e.to_string().contains("boom")),
        other => panic!("expected rethrown error, got {other:?}"),
    }
}

/// Yielding from the main thread is a coroutine-misuse error.
#[test]
fn test_yield_outside_coroutine_fails() {
    let mut asm = Asm::new().regs(4);
    let kco = asm.ks("coroutine");
    let kyield = asm.ks("yield");
    let k1 = asm.kn(1.0);
    asm.bx(OpCode::GetGlobal, 0, kco)
        .op(OpCode::GetTableKS, 0, 0, kst(kyield))
        .bx(OpCode::LoadK, 1, k1)
        .op(OpCode::Call, 0, 2, 1)
        .op(OpCode::Return, 0, 1, 0);
    let msg = run_err(asm.build());
    assert!(msg.contains("outside of a coroutine"), "got: {msg}");
}

/// Resuming the running coroutine is a misuse error.
#[test]
fn test_resume_running_coroutine_fails() {
    // body: coroutine.resume(co) where co is the running coroutine itself,
    // passed in as its argument
    let mut body = Asm::new().params(1).regs(6);
    let kco = body.ks("coroutine");
    let kresume = body.ks("resume");
    body.bx(OpCode::GetGlobal, 1, kco)
        .op(OpCode::GetTableKS, 1, 1, kst(kresume))
        .op(OpCode::Move, 2, 0, 0)
        .op(OpCode::Call, 1, 2, 0) // ok, err = resume(self)
        .op(OpCode::Return, 1, 0, 0);

    let mut vm = new_vm();
    let fid = vm.load_proto(body.build());
    let co = vm.new_coroutine(fid);
    let co_val = TValue::from_thread(co);
    match vm.resume(co, vec![co_val]) {
        Ok(Resume::Return(vals)) => {
            assert_eq!(vals[0].as_bool(), Some(false));
            assert!(str_contains(&vm, vals[1], "running"));
        }
        other => panic!("expected return, got {other:?}"),
    }
}

/// A host function can be a coroutine body.
#[test]
fn test_host_function_coroutine_body() {
    fn body(vm: &mut crescent_vm::Vm) -> Result<i32, crescent_vm::RuntimeError> {
        let n = vm.check_number(1)?;
        vm.push(TValue::from_number(n + 1.0));
        Ok(1)
    }
    let mut vm = new_vm();
    let fid = vm.new_function(body);
    let co = vm.new_coroutine(fid);
    match vm.resume(co, vec![TValue::from_number(41.0)]) {
        Ok(Resume::Return(vals)) => assert_eq!(vals[0].as_number(), Some(42.0)),
        other => panic!("expected return, got {other:?}"),
    }
    assert_eq!(vm.coroutine_status(co), "dead");
}
