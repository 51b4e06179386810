//! The base functions (no namespace).

use crescent_core::value::TValue;
use crescent_vm::{RuntimeError, Vm, MULTRET};

pub fn open(vm: &mut Vm) -> Result<(), RuntimeError> {
    vm.register("assert", base_assert)?;
    vm.register("error", base_error)?;
    vm.register("getmetatable", base_getmetatable)?;
    vm.register("setmetatable", base_setmetatable)?;
    vm.register("ipairs", base_ipairs)?;
    vm.register("pairs", base_pairs)?;
    vm.register("next", base_next)?;
    vm.register("pcall", base_pcall)?;
    vm.register("xpcall", base_xpcall)?;
    vm.register("print", base_print)?;
    vm.register("rawequal", base_rawequal)?;
    vm.register("rawget", base_rawget)?;
    vm.register("rawset", base_rawset)?;
    vm.register("rawlen", base_rawlen)?;
    vm.register("select", base_select)?;
    vm.register("tonumber", base_tonumber)?;
    vm.register("tostring", base_tostring)?;
    vm.register("type", base_type)?;
    vm.register("unpack", base_unpack)?;
    let globals = TValue::from_table(vm.globals);
    vm.set_global("_G", globals)?;
    let version = vm.new_string("crescent 0.1");
    vm.set_global("_VERSION", version)?;
    Ok(())
}

fn base_assert(vm: &mut Vm) -> Result<i32, RuntimeError> {
    if vm.check_any(1)?.is_falsy() {
        let msg = vm.opt_string(2, "assertion failed!")?;
        return Err(vm.error(msg));
    }
    Ok(vm.get_top() as i32)
}

fn base_error(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let obj = vm.check_any(1)?;
    let level = vm.opt_int(2, 1)?;
    if let Some(sid) = obj.as_string() {
        if level > 0 {
            let msg = vm.strings.get_lossy(sid).into_owned();
            let pos = vm.where_((level - 1) as usize);
            return Err(RuntimeError::Runtime(format!("{pos}{msg}")));
        }
    }
    Err(RuntimeError::Value(obj))
}

fn base_getmetatable(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let v = vm.check_any(1)?;
    match vm.get_metatable(v) {
        Some(mt) => {
            let guard = vm.events.metatable;
            let protected = vm.heap.table(mt).raw_get_str(guard);
            if protected.is_nil() {
                vm.push(TValue::from_table(mt));
            } else {
                vm.push(protected);
            }
        }
        None => vm.push(TValue::nil()),
    }
    Ok(1)
}

fn base_setmetatable(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let target = vm.check_any(1)?;
    vm.check_table(1)?;
    let mt_val = vm.get(2);
    let mt = if mt_val.is_nil() {
        None
    } else if let Some(t) = mt_val.as_table() {
        Some(t)
    } else {
        return Err(vm.type_error(2, "nil or table"));
    };
    if let Some(old) = vm.get_metatable(target) {
        let guard = vm.events.metatable;
        if !vm.heap.table(old).raw_get_str(guard).is_nil() {
            return Err(vm.error("cannot change a protected metatable"));
        }
    }
    vm.set_metatable(target, mt);
    vm.push(target);
    Ok(1)
}

fn base_ipairs_aux(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let t = vm.check_table(1)?;
    let i = vm.check_int(2)? + 1;
    let v = vm.heap.table(t).raw_get_int(i);
    if v.is_nil() {
        vm.push(TValue::nil());
        Ok(1)
    } else {
        vm.push(TValue::from_number(i as f64));
        vm.push(v);
        Ok(2)
    }
}

fn base_ipairs(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let t = vm.check_table(1)?;
    let aux = vm.new_function(base_ipairs_aux);
    vm.push(TValue::from_function(aux));
    vm.push(TValue::from_table(t));
    vm.push(TValue::from_number(0.0));
    Ok(3)
}

fn base_pairs(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let t = vm.check_table(1)?;
    let aux = vm.new_function(base_next);
    vm.push(TValue::from_function(aux));
    vm.push(TValue::from_table(t));
    vm.push(TValue::nil());
    Ok(3)
}

fn base_next(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let t = vm.check_table(1)?;
    let key = vm.get(2);
    match vm.table_next(t, key)? {
        Some((k, v)) => {
            vm.push(k);
            vm.push(v);
            Ok(2)
        }
        None => {
            vm.push(TValue::nil());
            Ok(1)
        }
    }
}

fn base_pcall(vm: &mut Vm) -> Result<i32, RuntimeError> {
    vm.check_any(1)?;
    let nargs = vm.get_top() - 1;
    match vm.pcall(nargs, MULTRET, None) {
        Ok(()) => {
            vm.insert(TValue::from_bool(true), 1);
            Ok(vm.get_top() as i32)
        }
        Err(e) => {
            let obj = e.to_value(&mut vm.strings);
            vm.set_top(0);
            vm.push(TValue::from_bool(false));
            vm.push(obj);
            Ok(2)
        }
    }
}

fn base_xpcall(vm: &mut Vm) -> Result<i32, RuntimeError> {
    vm.check_any(1)?;
    vm.check_function(2)?;
    let handler = vm.get(2);
    let top = vm.get_top();
    let fn_val = vm.get(1);
    vm.push(fn_val);
    match vm.pcall(0, MULTRET, Some(handler)) {
        Ok(()) => {
            vm.insert(TValue::from_bool(true), top + 1);
            Ok((vm.get_top() - top) as i32)
        }
        Err(e) => {
            let obj = e.to_value(&mut vm.strings);
            vm.push(TValue::from_bool(false));
            vm.push(obj);
            Ok(2)
        }
    }
}

fn base_print(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let n = vm.get_top();
    let mut parts = Vec::with_capacity(n);
    for i in 1..=n {
        let v = vm.get(i as i32);
        parts.push(vm.to_display_string(v)?);
    }
    println!("{}", parts.join("\t"));
    Ok(0)
}

fn base_rawequal(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let a = vm.check_any(1)?;
    let b = vm.check_any(2)?;
    let eq = crescent_vm::compare::equals(vm, a, b, true)?;
    vm.push(TValue::from_bool(eq));
    Ok(1)
}

fn base_rawget(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let t = vm.check_table(1)?;
    let key = vm.check_any(2)?;
    let v = vm.raw_get(t, key);
    vm.push(v);
    Ok(1)
}

fn base_rawset(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let t = vm.check_table(1)?;
    let key = vm.check_any(2)?;
    let value = vm.check_any(3)?;
    vm.raw_set(t, key, value)?;
    let tv = vm.get(1);
    vm.push(tv);
    Ok(1)
}

fn base_rawlen(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let v = vm.check_any(1)?;
    if let Some(sid) = v.as_string() {
        let n = vm.strings.get(sid).len();
        vm.push(TValue::from_number(n as f64));
        return Ok(1);
    }
    if let Some(t) = v.as_table() {
        let n = vm.heap.table(t).len();
        vm.push(TValue::from_number(n as f64));
        return Ok(1);
    }
    Err(vm.type_error(1, "table or string"))
}

fn base_select(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let top = vm.get_top();
    let first = vm.check_any(1)?;
    if let Some(sid) = first.as_string() {
        if vm.strings.get_bytes(sid) == b"#" {
            vm.push(TValue::from_number((top - 1) as f64));
            return Ok(1);
        }
        return Err(vm.type_error(1, "number"));
    }
    let mut n = vm.check_int(1)?;
    if n < 0 {
        n += top as i64;
    }
    if n < 1 {
        return Err(vm.arg_error(1, "index out of range"));
    }
    Ok(((top as i64) - n).max(0) as i32)
}

fn base_tonumber(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let base = vm.opt_int(2, 10)?;
    if base == 10 {
        let v = vm.check_any(1)?;
        match crescent_vm::coerce::to_number(v, &vm.strings) {
            Some(n) => vm.push(TValue::from_number(n)),
            None => vm.push(TValue::nil()),
        }
        return Ok(1);
    }
    if !(2..=36).contains(&base) {
        return Err(vm.arg_error(2, "base out of range"));
    }
    let s = vm.check_string(1)?;
    match i64::from_str_radix(s.trim(), base as u32) {
        Ok(n) => vm.push(TValue::from_number(n as f64)),
        Err(_) => vm.push(TValue::nil()),
    }
    Ok(1)
}

fn base_tostring(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let v = vm.check_any(1)?;
    let s = vm.to_display_string(v)?;
    let sv = vm.new_string(s);
    vm.push(sv);
    Ok(1)
}

fn base_type(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let v = vm.check_any(1)?;
    let name = vm.type_name(v).to_string();
    let sv = vm.new_string(name);
    vm.push(sv);
    Ok(1)
}

fn base_unpack(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let t = vm.check_table(1)?;
    let i = vm.opt_int(2, 1)?;
    let j = {
        let default = vm.heap.table(t).len();
        vm.opt_int(3, default)?
    };
    let mut count = 0;
    let mut k = i;
    while k <= j {
        let v = vm.heap.table(t).raw_get_int(k);
        vm.push(v);
        count += 1;
        k += 1;
    }
    Ok(count)
}
