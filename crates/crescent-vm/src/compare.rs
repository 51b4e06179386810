//! Equality and ordering, with metamethod fallback.

use crate::error::RuntimeError;
use crate::metamethod::{self, call_meta2};
use crate::state::Vm;
use crescent_core::object::{self, Type};
use crescent_core::string::StringId;
use crescent_core::value::TValue;

/// Equality. Strings compare by content, numbers by value; tables, userdata
/// and custom data compare by identity and then by `__eq` when both sides
/// share the same event function. `raw` skips the metamethod.
pub fn equals(vm: &mut Vm, lhs: TValue, rhs: TValue, raw: bool) -> Result<bool, RuntimeError> {
    let lt = object::type_of(lhs, &vm.heap);
    let rt = object::type_of(rhs, &vm.heap);
    if lt != rt {
        return Ok(false);
    }
    match lt {
        Type::Nil => Ok(true),
        Type::Number | Type::Boolean | Type::String => Ok(lhs == rhs),
        Type::Table | Type::Userdata | Type::Custom(_) => {
            if lhs == rhs {
                return Ok(true);
            }
            if raw {
                return Ok(false);
            }
            let event = vm.events.eq;
            Ok(object_rational(vm, lhs, rhs, event)? == Some(true))
        }
        _ => Ok(lhs == rhs),
    }
}

/// Strict ordering: numbers by value, strings byte-wise, otherwise `__lt`.
pub fn less_than(vm: &mut Vm, lhs: TValue, rhs: TValue) -> Result<bool, RuntimeError> {
    if let Some(a) = lhs.as_number() {
        if let Some(b) = rhs.as_number() {
            return Ok(a < b);
        }
        return Err(compare_error(vm, lhs, rhs));
    }
    if object::type_of(lhs, &vm.heap) != object::type_of(rhs, &vm.heap) {
        return Err(compare_error(vm, lhs, rhs));
    }
    if let (Some(a), Some(b)) = (lhs.as_string(), rhs.as_string()) {
        return Ok(str_cmp(vm, a, b) == std::cmp::Ordering::Less);
    }
    let event = vm.events.lt;
    match object_rational(vm, lhs, rhs, event)? {
        Some(res) => Ok(res),
        None => Err(compare_error(vm, lhs, rhs)),
    }
}

/// Non-strict ordering: numbers and strings directly, otherwise `__le`,
/// falling back to `not (rhs < lhs)` via `__lt`.
pub fn less_equal(vm: &mut Vm, lhs: TValue, rhs: TValue) -> Result<bool, RuntimeError> {
    if let Some(a) = lhs.as_number() {
        if let Some(b) = rhs.as_number() {
            return Ok(a <= b);
        }
        return Err(compare_error(vm, lhs, rhs));
    }
    if object::type_of(lhs, &vm.heap) != object::type_of(rhs, &vm.heap) {
        return Err(compare_error(vm, lhs, rhs));
    }
    if let (Some(a), Some(b)) = (lhs.as_string(), rhs.as_string()) {
        return Ok(str_cmp(vm, a, b) != std::cmp::Ordering::Greater);
    }
    let le = vm.events.le;
    match object_rational(vm, lhs, rhs, le)? {
        Some(res) => Ok(res),
        None => {
            let lt = vm.events.lt;
            match object_rational(vm, rhs, lhs, lt)? {
                Some(res) => Ok(!res),
                None => Err(compare_error(vm, lhs, rhs)),
            }
        }
    }
}

/// Dispatch a comparison event shared by both operands. `None` when no
/// common handler exists.
fn object_rational(
    vm: &mut Vm,
    lhs: TValue,
    rhs: TValue,
    event: StringId,
) -> Result<Option<bool>, RuntimeError> {
    let m1 = metamethod::meta_op1(vm, lhs, event);
    let m2 = metamethod::meta_op1(vm, rhs, event);
    if m1.is_function() && m1 == m2 {
        let res = call_meta2(vm, m1, lhs, rhs)?;
        return Ok(Some(res.is_truthy()));
    }
    Ok(None)
}

fn str_cmp(vm: &Vm, a: StringId, b: StringId) -> std::cmp::Ordering {
    vm.strings.get_bytes(a).cmp(vm.strings.get_bytes(b))
}

fn compare_error(vm: &Vm, lhs: TValue, rhs: TValue) -> RuntimeError {
    let lt = vm.type_name(lhs).to_string();
    let rt = vm.type_name(rhs).to_string();
    vm.error(format!("attempt to compare {lt} with {rt}"))
}
