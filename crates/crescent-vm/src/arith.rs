//! Arithmetic, length, and concatenation, with metamethod fallback.

use crate::coerce;
use crate::error::RuntimeError;
use crate::metamethod::{self, call_meta2};
use crate::state::Vm;
use crescent_core::string::StringId;
use crescent_core::value::TValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    pub(crate) fn event(self, vm: &Vm) -> StringId {
        let ev = &vm.events;
        match self {
            ArithOp::Add => ev.add,
            ArithOp::Sub => ev.sub,
            ArithOp::Mul => ev.mul,
            ArithOp::Div => ev.div,
            ArithOp::Mod => ev.modulo,
            ArithOp::Pow => ev.pow,
        }
    }

    pub fn event_name(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Div => "__div",
            ArithOp::Mod => "__mod",
            ArithOp::Pow => "__pow",
        }
    }
}

/// Remainder with the divisor's sign: `a - b*floor(a/b)`.
pub fn modulo(lhs: f64, rhs: f64) -> f64 {
    let v = lhs % rhs;
    if (rhs > 0.0 && v < 0.0) || (rhs < 0.0 && v > 0.0) {
        v + rhs
    } else {
        v
    }
}

/// Arithmetic on two numbers. Division by zero follows IEEE semantics.
pub fn number_arith(op: ArithOp, lhs: f64, rhs: f64) -> f64 {
    match op {
        ArithOp::Add => lhs + rhs,
        ArithOp::Sub => lhs - rhs,
        ArithOp::Mul => lhs * rhs,
        ArithOp::Div => lhs / rhs,
        ArithOp::Mod => modulo(lhs, rhs),
        ArithOp::Pow => lhs.powf(rhs),
    }
}

/// Full arithmetic: numbers directly, otherwise metamethod, otherwise
/// string coercion, otherwise a type error naming the event.
pub fn arith(vm: &mut Vm, op: ArithOp, lhs: TValue, rhs: TValue) -> Result<TValue, RuntimeError> {
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return Ok(TValue::from_number(number_arith(op, a, b)));
    }
    object_arith(vm, op, lhs, rhs)
}

fn object_arith(
    vm: &mut Vm,
    op: ArithOp,
    mut lhs: TValue,
    mut rhs: TValue,
) -> Result<TValue, RuntimeError> {
    let event = op.event(vm);
    let handler = metamethod::meta_op2(vm, lhs, rhs, event);
    if handler.is_function() {
        return call_meta2(vm, handler, lhs, rhs);
    }
    if let Some(sid) = lhs.as_string() {
        if let Some(n) = coerce::to_number(TValue::from_string(sid), &vm.strings) {
            lhs = TValue::from_number(n);
        }
    }
    if let Some(sid) = rhs.as_string() {
        if let Some(n) = coerce::to_number(TValue::from_string(sid), &vm.strings) {
            rhs = TValue::from_number(n);
        }
    }
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return Ok(TValue::from_number(number_arith(op, a, b)));
    }
    let lt = vm.type_name(lhs).to_string();
    let rt = vm.type_name(rhs).to_string();
    Err(vm.error(format!(
        "cannot perform {} operation between {lt} and {rt}",
        op.event_name()
    )))
}

/// Unary minus: numbers directly, then `__unm`, then string coercion.
pub fn unary_minus(vm: &mut Vm, v: TValue) -> Result<TValue, RuntimeError> {
    if let Some(n) = v.as_number() {
        return Ok(TValue::from_number(-n));
    }
    let event = vm.events.unm;
    let handler = metamethod::meta_op1(vm, v, event);
    if handler.is_function() {
        return call_meta1(vm, handler, v);
    }
    if let Some(sid) = v.as_string() {
        let s = vm.strings.get_lossy(sid).into_owned();
        if let Some(n) = coerce::parse_number(&s) {
            return Ok(TValue::from_number(-n));
        }
    }
    Err(vm.error("__unm undefined"))
}

/// Length: byte count for strings, `__len` when set, array border for
/// tables, otherwise an error.
pub fn length(vm: &mut Vm, v: TValue) -> Result<TValue, RuntimeError> {
    if let Some(sid) = v.as_string() {
        let n = vm.strings.get(sid).len();
        return Ok(TValue::from_number(n as f64));
    }
    let event = vm.events.len;
    let handler = metamethod::meta_op1(vm, v, event);
    if handler.is_function() {
        return call_meta1(vm, handler, v);
    }
    if let Some(t) = v.as_table() {
        return Ok(TValue::from_number(vm.heap.table(t).len() as f64));
    }
    Err(vm.error("__len undefined"))
}

fn call_meta1(vm: &mut Vm, f: TValue, a: TValue) -> Result<TValue, RuntimeError> {
    vm.th_mut().regs.push(f);
    vm.th_mut().regs.push(a);
    vm.call_r(1, 1, None)?;
    Ok(vm.th_mut().regs.pop())
}

/// Concatenate registers [last - total + 1, last], right to left, coalescing
/// consecutive string-or-number runs and dispatching `__concat` at the first
/// non-coercible operand.
pub fn concat(vm: &mut Vm, total: usize, last: usize) -> Result<TValue, RuntimeError> {
    let mut rhs = vm.th().regs.get(last);
    let mut total = total as i64 - 1;
    let mut i = last as i64 - 1;
    while total > 0 {
        let lhs = vm.th().regs.get(i as usize);
        if coerce::can_coerce_to_string(lhs) && coerce::can_coerce_to_string(rhs) {
            // Coalesce the maximal run of coercible operands ending here.
            let mut parts: Vec<Vec<u8>> = Vec::new();
            parts.push(coerce::coerced_bytes(rhs, &vm.strings).unwrap());
            while total > 0 {
                let lhs = vm.th().regs.get(i as usize);
                if !coerce::can_coerce_to_string(lhs) {
                    break;
                }
                parts.push(coerce::coerced_bytes(lhs, &vm.strings).unwrap());
                i -= 1;
                total -= 1;
            }
            let mut joined = Vec::new();
            for part in parts.iter().rev() {
                joined.extend_from_slice(part);
            }
            rhs = TValue::from_string(vm.strings.intern(&joined));
        } else {
            let event = vm.events.concat;
            let handler = metamethod::meta_op2(vm, lhs, rhs, event);
            if !handler.is_function() {
                let lt = vm.type_name(lhs).to_string();
                let rt = vm.type_name(rhs).to_string();
                return Err(vm.error(format!(
                    "cannot perform concat operation between {lt} and {rt}"
                )));
            }
            rhs = call_meta2(vm, handler, lhs, rhs)?;
            total -= 1;
            i -= 1;
        }
    }
    Ok(rhs)
}
