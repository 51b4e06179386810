use super::helpers::*;
use crescent_core::object::Type;
use crescent_core::value::TValue;
use crescent_vm::opcode::OpCode;
use crescent_vm::{RuntimeError, Vm};

/// Host functions read 1-based arguments, push results, return the count.
#[test]
fn test_register_and_call_host_function() {
    fn swap(vm: &mut Vm) -> Result<i32, RuntimeError> {
        let a = vm.check_any(1)?;
        let b = vm.check_any(2)?;
        vm.push(b);
        vm.push(a);
        Ok(2)
    }
    let mut vm = new_vm();
    vm.register("swap", swap).unwrap();

    let f = vm.get_global("swap").unwrap();
    vm.push(f);
    vm.push(TValue::from_number(1.0));
    vm.push(TValue::from_number(2.0));
    vm.call(2, 2).unwrap();
    let second = vm.pop();
    let first = vm.pop();
    assert_eq!(first.as_number(), Some(2.0));
    assert_eq!(second.as_number(), Some(1.0));
}

/// Negative indices read from the top.
#[test]
fn test_negative_indexing() {
    fn last(vm: &mut Vm) -> Result<i32, RuntimeError> {
        let v = vm.get(-1);
        vm.push(v);
        Ok(1)
    }
    let mut vm = new_vm();
    vm.register("last", last).unwrap();
    let f = vm.get_global("last").unwrap();
    vm.push(f);
    vm.push(TValue::from_number(1.0));
    vm.push(TValue::from_number(99.0));
    vm.call(2, 1).unwrap();
    assert_eq!(vm.pop().as_number(), Some(99.0));
}

/// Fast host functions run without frame construction.
#[test]
fn test_fast_function() {
    fn fadd(vm: &mut Vm) -> Result<i32, RuntimeError> {
        let a = vm.check_number(1)?;
        let b = vm.check_number(2)?;
        vm.push(TValue::from_number(a + b));
        Ok(1)
    }
    let mut vm = new_vm();
    vm.register_fast("fadd", fadd).unwrap();

    let mut asm = Asm::new().regs(6);
    let kf = asm.ks("fadd");
    let k20 = asm.kn(20.0);
    let k22 = asm.kn(22.0);
    asm.bx(OpCode::GetGlobal, 0, kf)
        .bx(OpCode::LoadK, 1, k20)
        .bx(OpCode::LoadK, 2, k22)
        .op(OpCode::Call, 0, 3, 2)
        .op(OpCode::Return, 0, 2, 0);
    let fid = vm.load_proto(asm.build());
    vm.push(TValue::from_function(fid));
    vm.call(0, 1).unwrap();
    assert_eq!(vm.pop().as_number(), Some(42.0));
}

/// A host function may call back into script code.
#[test]
fn test_host_function_calls_back() {
    fn apply(vm: &mut Vm) -> Result<i32, RuntimeError> {
        let f = vm.check_any(1)?;
        let x = vm.check_any(2)?;
        vm.push(f);
        vm.push(x);
        vm.call(1, 1)?;
        Ok(1)
    }
    let mut vm = new_vm();
    vm.register("apply", apply).unwrap();

    // double(x) = x * 2
    let mut double = Asm::new().params(1).regs(4);
    let k2 = double.kn(2.0);
    double
        .op(OpCode::Mul, 1, 0, kst(k2))
        .op(OpCode::Return, 1, 2, 0);
    let did = vm.load_proto(double.build());

    let f = vm.get_global("apply").unwrap();
    vm.push(f);
    vm.push(TValue::from_function(did));
    vm.push(TValue::from_number(21.0));
    vm.call(2, 1).unwrap();
    assert_eq!(vm.pop().as_number(), Some(42.0));
}

/// Userdata carries a host payload and dispatches through its metatable.
#[test]
fn test_userdata_with_index_metatable() {
    let mut vm = new_vm();
    let ud = vm.heap.alloc_userdata(Box::new(7usize));
    let fields = vm.new_table();
    let answer = vm.strings.intern(b"answer");
    vm.heap
        .table_mut(fields)
        .raw_set_str(answer, TValue::from_number(42.0));
    let mt = vm.new_table();
    let index = vm.events.index;
    vm.heap
        .table_mut(mt)
        .raw_set_str(index, TValue::from_table(fields));
    vm.heap.userdata_mut(ud).metatable = Some(mt);
    vm.set_global("ud", TValue::from_userdata(ud)).unwrap();

    let mut asm = Asm::new().regs(4);
    let kud = asm.ks("ud");
    let kans = asm.ks("answer");
    asm.bx(OpCode::GetGlobal, 0, kud)
        .op(OpCode::GetTableKS, 1, 0, kst(kans))
        .op(OpCode::Return, 1, 2, 0);
    let fid = vm.load_proto(asm.build());
    vm.push(TValue::from_function(fid));
    vm.call(0, 1).unwrap();
    assert_eq!(vm.pop().as_number(), Some(42.0));

    // The payload is still reachable from the host side
    assert_eq!(
        vm.heap.userdata(ud).data.downcast_ref::<usize>(),
        Some(&7)
    );
}

/// Custom types: registered name, typed wrap/unwrap, per-type metatable.
#[test]
fn test_custom_type_roundtrip() {
    #[derive(Debug, PartialEq)]
    struct Point {
        x: f64,
        y: f64,
    }

    let mut vm = new_vm();
    let mt = vm.new_table();
    let kind = vm.strings.intern(b"kind");
    let pt = vm.new_string("point");
    vm.heap.table_mut(mt).raw_set_str(kind, pt);
    let handle = vm.register_custom_type::<Point>("point", Some(mt));

    let v = handle.wrap(&mut vm, Point { x: 1.0, y: 2.0 });
    assert_eq!(vm.type_name(v), "point");
    assert_eq!(vm.type_of(v), Type::Custom(handle.tag()));
    assert_eq!(handle.get(&vm, v), Some(&Point { x: 1.0, y: 2.0 }));

    handle.get_mut(&mut vm, v).unwrap().x = 9.0;
    assert_eq!(handle.get(&vm, v).unwrap().x, 9.0);

    // Wrong type unwraps to None
    let other = vm.register_custom_type::<u8>("byte", None);
    assert_eq!(other.get(&vm, v), None);

    // The registered metatable answers metamethod lookups
    let got = vm.get_field_str(v, "kind");
    assert!(got.is_err()); // no __index on the metatable: plain field lookup fails
}

/// Per-type metatables cover the primitive types.
#[test]
fn test_type_metatable_for_numbers() {
    let mut vm = new_vm();
    let methods = vm.new_table();
    let double = vm.strings.intern(b"double");
    // number.double is a host function
    fn double_fn(vm: &mut Vm) -> Result<i32, RuntimeError> {
        let n = vm.check_number(1)?;
        vm.push(TValue::from_number(n * 2.0));
        Ok(1)
    }
    let fid = vm.new_function(double_fn);
    vm.heap
        .table_mut(methods)
        .raw_set_str(double, TValue::from_function(fid));
    let mt = vm.new_table();
    let index = vm.events.index;
    vm.heap
        .table_mut(mt)
        .raw_set_str(index, TValue::from_table(methods));
    vm.set_type_metatable(Type::Number, Some(mt));

    let got = vm
        .get_field_str(TValue::from_number(3.0), "double")
        .unwrap();
    assert!(got.is_function());
    vm.push(got);
    vm.push(TValue::from_number(21.0));
    vm.call(1, 1).unwrap();
    assert_eq!(vm.pop().as_number(), Some(42.0));
}

/// display strings for reference values name their type.
#[test]
fn test_display_value() {
    let mut vm = new_vm();
    assert_eq!(vm.display_value(TValue::nil()), "nil");
    assert_eq!(vm.display_value(TValue::from_bool(true)), "true");
    assert_eq!(vm.display_value(TValue::from_number(2.5)), "2.5");
    let t = vm.new_table();
    assert!(vm.display_value(TValue::from_table(t)).starts_with("table: "));
}

/// __tostring overrides display through the host interface.
#[test]
fn test_tostring_metamethod() {
    fn stringer(vm: &mut Vm) -> Result<i32, RuntimeError> {
        let s = vm.new_string("custom!");
        vm.push(s);
        Ok(1)
    }
    let mut vm = new_vm();
    let fid = vm.new_function(stringer);
    let mt = vm.new_table();
    let tostring = vm.events.tostring;
    vm.heap
        .table_mut(mt)
        .raw_set_str(tostring, TValue::from_function(fid));
    let t = vm.new_table();
    vm.heap.table_mut(t).metatable = Some(mt);
    let s = vm.to_display_string(TValue::from_table(t)).unwrap();
    assert_eq!(s, "custom!");
}

/// Option knobs: a small frame limit trips earlier.
#[test]
fn test_call_stack_size_option() {
    let mut vm = Vm::new(crescent_vm::Options {
        call_stack_size: 8,
        ..Default::default()
    });
    crescent_stdlib::open_libs(&mut vm).unwrap();

    // f(n) = f(n) (non-tail)
    let mut f = Asm::new().regs(4);
    let kf = f.ks("f");
    f.bx(OpCode::GetGlobal, 0, kf)
        .op(OpCode::Call, 0, 1, 1)
        .op(OpCode::Return, 0, 1, 0);
    let mut asm = Asm::new().regs(4);
    let child = asm.child(f.build());
    let kf = asm.ks("f");
    asm.bx(OpCode::Closure, 0, child)
        .bx(OpCode::SetGlobal, 0, kf)
        .bx(OpCode::GetGlobal, 0, kf)
        .op(OpCode::Call, 0, 1, 1)
        .op(OpCode::Return, 0, 1, 0);
    let err = vm.run_proto(asm.build()).unwrap_err();
    assert!(matches!(err, RuntimeError::StackOverflow));
}
