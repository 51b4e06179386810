//! The `coroutine` module: glue over the VM's coroutine scheduler.

use crescent_core::value::TValue;
use crescent_vm::{Resume, RuntimeError, Vm};

pub fn open(vm: &mut Vm) -> Result<(), RuntimeError> {
    let co_table = vm.new_table();
    let entries: &[(&str, crescent_vm::HostFn)] = &[
        ("create", co_create),
        ("resume", co_resume),
        ("yield", co_yield),
        ("wrap", co_wrap),
        ("status", co_status),
        ("running", co_running),
    ];
    for (name, f) in entries {
        let fid = vm.new_function(*f);
        let sid = vm.strings.intern(name.as_bytes());
        vm.heap
            .table_mut(co_table)
            .raw_set_str(sid, TValue::from_function(fid));
    }
    vm.set_global("coroutine", TValue::from_table(co_table))
}

fn co_create(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let f = vm.check_function(1)?;
    let co = vm.new_coroutine(f);
    vm.push(TValue::from_thread(co));
    Ok(1)
}

fn co_resume(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let co = vm.check_thread(1)?;
    let top = vm.get_top();
    let args: Vec<TValue> = (2..=top).map(|i| vm.get(i as i32)).collect();
    match vm.resume(co, args)? {
        Resume::Yield(values) | Resume::Return(values) => {
            vm.push(TValue::from_bool(true));
            let n = values.len();
            for v in values {
                vm.push(v);
            }
            Ok(1 + n as i32)
        }
        Resume::Error(obj) => {
            vm.push(TValue::from_bool(false));
            vm.push(obj);
            Ok(2)
        }
    }
}

fn co_yield(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let top = vm.get_top();
    let values: Vec<TValue> = (1..=top).map(|i| vm.get(i as i32)).collect();
    Ok(vm.coroutine_yield(values))
}

fn co_wrap(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let f = vm.check_function(1)?;
    let co = vm.new_wrapped_coroutine(f);
    let fid = vm.new_closure(wrap_aux, vec![TValue::from_thread(co)]);
    vm.push(TValue::from_function(fid));
    Ok(1)
}

fn wrap_aux(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let co = match vm.upvalue(0).as_thread() {
        Some(co) => co,
        None => return Err(vm.error("wrapped coroutine is missing")),
    };
    let top = vm.get_top();
    let args: Vec<TValue> = (1..=top).map(|i| vm.get(i as i32)).collect();
    match vm.resume(co, args)? {
        Resume::Yield(values) | Resume::Return(values) => {
            let n = values.len();
            for v in values {
                vm.push(v);
            }
            Ok(n as i32)
        }
        Resume::Error(obj) => {
            if let Some(sid) = obj.as_string() {
                let msg = vm.strings.get_lossy(sid).into_owned();
                return Err(vm.error(msg));
            }
            Err(RuntimeError::Value(obj))
        }
    }
}

fn co_status(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let co = vm.check_thread(1)?;
    let status = vm.coroutine_status(co);
    let sv = vm.new_string(status);
    vm.push(sv);
    Ok(1)
}

fn co_running(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let current = vm.current_thread();
    if current.0 == 0 {
        vm.push(TValue::nil());
    } else {
        vm.push(TValue::from_thread(current));
    }
    Ok(1)
}
