use super::helpers::*;
use crescent_core::value::TValue;
use crescent_vm::opcode::OpCode;

/// Iteration visits the array part first in ascending order, then the map
/// part in insertion order:
///   t.a = 1; t[1] = 10; t.b = 2; t[2] = 20
///   pairs(t) -> (1,10), (2,20), ("a",1), ("b",2)
#[test]
fn test_pairs_iteration_order() {
    let mut vm = new_vm();
    let t = vm.new_table();
    let a = vm.strings.intern(b"a");
    let b = vm.strings.intern(b"b");
    vm.heap.table_mut(t).raw_set_str(a, TValue::from_number(1.0));
    vm.heap.table_mut(t).raw_set_int(1, TValue::from_number(10.0));
    vm.heap.table_mut(t).raw_set_str(b, TValue::from_number(2.0));
    vm.heap.table_mut(t).raw_set_int(2, TValue::from_number(20.0));
    vm.set_global("t", TValue::from_table(t)).unwrap();

    // keys = {}; vals = {}; n = 0
    // for k, v in pairs(t) do n = n + 1; keys[n] = k; vals[n] = v end
    // return keys, vals, n
    let mut asm = Asm::new().regs(12);
    let k0 = asm.kn(0.0);
    let k1 = asm.kn(1.0);
    let kpairs = asm.ks("pairs");
    let kt = asm.ks("t");
    asm.op(OpCode::NewTable, 0, 0, 0) // keys
        .op(OpCode::NewTable, 1, 0, 0) // vals
        .bx(OpCode::LoadK, 2, k0) // n
        .bx(OpCode::GetGlobal, 3, kpairs)
        .bx(OpCode::GetGlobal, 4, kt)
        .op(OpCode::Call, 3, 2, 4) // iter, state, ctl at r3..r5
        .sbx(OpCode::Jmp, 0, 3) // enter at TFORLOOP
        .op(OpCode::Add, 2, 2, kst(k1)) // body: n = n + 1
        .op(OpCode::SetTable, 0, 2, 6) // keys[n] = k
        .op(OpCode::SetTable, 1, 2, 7) // vals[n] = v
        .op(OpCode::TForLoop, 3, 0, 2)
        .sbx(OpCode::Jmp, 0, -5)
        .op(OpCode::Return, 0, 4, 0);
    let fid = vm.load_proto(asm.build());
    vm.push(TValue::from_function(fid));
    vm.call(0, 3).unwrap();
    let n = vm.pop();
    let vals = vm.pop().as_table().unwrap();
    let keys = vm.pop().as_table().unwrap();

    assert_eq!(n.as_number(), Some(4.0));
    let key_at = |i: i64| vm.heap.table(keys).raw_get_int(i);
    let val_at = |i: i64| vm.heap.table(vals).raw_get_int(i);
    assert_eq!(key_at(1).as_number(), Some(1.0));
    assert_eq!(val_at(1).as_number(), Some(10.0));
    assert_eq!(key_at(2).as_number(), Some(2.0));
    assert_eq!(val_at(2).as_number(), Some(20.0));
    assert_eq!(key_at(3).as_string(), Some(a));
    assert_eq!(val_at(3).as_number(), Some(1.0));
    assert_eq!(key_at(4).as_string(), Some(b));
    assert_eq!(val_at(4).as_number(), Some(2.0));
}

/// Get after set returns the stored value; set nil erases.
#[test]
fn test_get_set_roundtrip_via_host() {
    let mut vm = new_vm();
    let t = vm.new_table();
    let key = vm.new_string("k");
    vm.raw_set(t, key, TValue::from_number(9.0)).unwrap();
    assert_eq!(vm.raw_get(t, key).as_number(), Some(9.0));
    vm.raw_set(t, key, TValue::nil()).unwrap();
    assert!(vm.raw_get(t, key).is_nil());
}

/// next() from the host interface walks every pair exactly once.
#[test]
fn test_table_next_walk() {
    let mut vm = new_vm();
    let t = vm.new_table();
    for i in 1..=3 {
        vm.heap
            .table_mut(t)
            .raw_set_int(i, TValue::from_number((i * 10) as f64));
    }
    let name = vm.strings.intern(b"name");
    let val = vm.new_string("x");
    vm.heap.table_mut(t).raw_set_str(name, val);

    let mut seen = Vec::new();
    let mut key = TValue::nil();
    while let Some((k, v)) = vm.table_next(t, key).unwrap() {
        seen.push((k, v));
        key = k;
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0].0.as_number(), Some(1.0));
    assert_eq!(seen[2].1.as_number(), Some(30.0));
    assert_eq!(seen[3].0.as_string(), Some(name));

    let bogus = vm.new_string("bogus");
    assert!(vm.table_next(t, bogus).is_err());
}

/// ipairs stops at the first hole; pairs does not.
#[test]
fn test_ipairs_stops_at_hole() {
    let mut vm = new_vm();
    let t = vm.new_table();
    vm.heap.table_mut(t).raw_set_int(1, TValue::from_number(1.0));
    vm.heap.table_mut(t).raw_set_int(2, TValue::from_number(2.0));
    vm.heap.table_mut(t).raw_set_int(4, TValue::from_number(4.0));
    vm.set_global("t", TValue::from_table(t)).unwrap();

    // n = 0; for i, v in ipairs(t) do n = n + v end; return n
    let mut asm = Asm::new().regs(10);
    let k0 = asm.kn(0.0);
    let kipairs = asm.ks("ipairs");
    let kt = asm.ks("t");
    asm.bx(OpCode::LoadK, 0, k0)
        .bx(OpCode::GetGlobal, 1, kipairs)
        .bx(OpCode::GetGlobal, 2, kt)
        .op(OpCode::Call, 1, 2, 4)
        .sbx(OpCode::Jmp, 0, 1)
        .op(OpCode::Add, 0, 0, 5) // body: n = n + v
        .op(OpCode::TForLoop, 1, 0, 2)
        .sbx(OpCode::Jmp, 0, -3)
        .op(OpCode::Return, 0, 2, 0);
    let fid = vm.load_proto(asm.build());
    vm.push(TValue::from_function(fid));
    vm.call(0, 1).unwrap();
    assert_eq!(vm.pop().as_number(), Some(3.0)); // 1 + 2, stops at the hole
}

/// SETLIST with C == 0 takes the batch index from the next code word.
#[test]
fn test_setlist_extended_batch() {
    use crescent_vm::opcode::Instruction;
    let mut asm = Asm::new().regs(4);
    let k1 = asm.kn(1.0);
    let k51 = asm.kn(51.0);
    asm.op(OpCode::NewTable, 0, 0, 0)
        .bx(OpCode::LoadK, 1, k1)
        .op(OpCode::SetList, 0, 1, 0);
    // raw continuation word: batch 2 -> offset 50
    asm.raw_word(Instruction(2));
    asm.op(OpCode::GetTable, 1, 0, kst(k51))
        .op(OpCode::Return, 1, 2, 0);
    let (_, r) = run(asm.build());
    assert_num(&r, 0, 1.0);
}
