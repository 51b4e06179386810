//! Metatable event resolution: `__index`/`__newindex` chains, binary and
//! unary event lookup, and the per-type metatable store.

use crate::error::RuntimeError;
use crate::state::Vm;
use crescent_core::heap::GcIdx;
use crescent_core::object::{self, Type};
use crescent_core::string::{StringId, StringInterner};
use crescent_core::table::Table;
use crescent_core::value::TValue;

/// Bound on `__index`/`__newindex` chain length.
const MAX_CHAIN: usize = 100;

/// Pre-interned event names.
#[derive(Clone, Copy)]
pub struct EventNames {
    pub add: StringId,
    pub sub: StringId,
    pub mul: StringId,
    pub div: StringId,
    pub modulo: StringId,
    pub pow: StringId,
    pub unm: StringId,
    pub len: StringId,
    pub concat: StringId,
    pub eq: StringId,
    pub lt: StringId,
    pub le: StringId,
    pub index: StringId,
    pub newindex: StringId,
    pub call: StringId,
    pub tostring: StringId,
    pub metatable: StringId,
}

impl EventNames {
    pub fn init(strings: &mut StringInterner) -> Self {
        EventNames {
            add: strings.intern(b"__add"),
            sub: strings.intern(b"__sub"),
            mul: strings.intern(b"__mul"),
            div: strings.intern(b"__div"),
            modulo: strings.intern(b"__mod"),
            pow: strings.intern(b"__pow"),
            unm: strings.intern(b"__unm"),
            len: strings.intern(b"__len"),
            concat: strings.intern(b"__concat"),
            eq: strings.intern(b"__eq"),
            lt: strings.intern(b"__lt"),
            le: strings.intern(b"__le"),
            index: strings.intern(b"__index"),
            newindex: strings.intern(b"__newindex"),
            call: strings.intern(b"__call"),
            tostring: strings.intern(b"__tostring"),
            metatable: strings.intern(b"__metatable"),
        }
    }
}

/// The metatable governing a value: the instance metatable for tables and
/// userdata, the registered metatable for custom data, and the per-type
/// metatable for everything else.
pub fn metatable_of(vm: &Vm, v: TValue) -> Option<GcIdx<Table>> {
    if let Some(t) = v.as_table() {
        return vm.heap.table(t).metatable;
    }
    if let Some(u) = v.as_userdata() {
        return vm.heap.userdata(u).metatable;
    }
    if let Some(c) = v.as_custom() {
        let tag = vm.heap.custom(c).type_tag;
        return vm.custom_type_metatable(tag);
    }
    let ty = object::type_of(v, &vm.heap);
    vm.type_metatable(ty).and_then(|mt| mt.as_table())
}

/// Look up `event` on the value's metatable. Nil when absent.
pub fn meta_op1(vm: &Vm, v: TValue, event: StringId) -> TValue {
    match metatable_of(vm, v) {
        Some(mt) => vm.heap.table(mt).raw_get_str(event),
        None => TValue::nil(),
    }
}

/// Look up `event` on the left operand's metatable, falling back to the
/// right operand's.
pub fn meta_op2(vm: &Vm, lhs: TValue, rhs: TValue, event: StringId) -> TValue {
    let op = meta_op1(vm, lhs, event);
    if !op.is_nil() {
        return op;
    }
    meta_op1(vm, rhs, event)
}

/// Call a metamethod with two arguments, returning its first result.
pub(crate) fn call_meta2(
    vm: &mut Vm,
    f: TValue,
    a: TValue,
    b: TValue,
) -> Result<TValue, RuntimeError> {
    vm.th_mut().regs.push(f);
    vm.th_mut().regs.push(a);
    vm.th_mut().regs.push(b);
    vm.call_r(2, 1, None)?;
    Ok(vm.th_mut().regs.pop())
}

/// Index `obj[key]` with the `__index` chain.
pub fn get_field(vm: &mut Vm, obj: TValue, key: TValue) -> Result<TValue, RuntimeError> {
    let event = vm.events.index;
    let mut cur = obj;
    for _ in 0..MAX_CHAIN {
        if let Some(t) = cur.as_table() {
            let raw = vm.heap.table(t).raw_get(key);
            if !raw.is_nil() {
                return Ok(raw);
            }
            let meta = meta_op1(vm, cur, event);
            if meta.is_nil() {
                return Ok(TValue::nil());
            }
            if meta.is_function() {
                return call_meta2(vm, meta, cur, key);
            }
            cur = meta;
        } else {
            let meta = meta_op1(vm, cur, event);
            if meta.is_nil() {
                let ty = vm.type_name(cur).to_string();
                return Err(vm.error(format!("attempt to index a non-table object({ty})")));
            }
            if meta.is_function() {
                return call_meta2(vm, meta, cur, key);
            }
            cur = meta;
        }
    }
    Err(vm.error("'__index' chain too long; possible loop"))
}

/// `get_field` specialized to an interned string key.
pub fn get_field_str(vm: &mut Vm, obj: TValue, key: StringId) -> Result<TValue, RuntimeError> {
    let event = vm.events.index;
    let mut cur = obj;
    for _ in 0..MAX_CHAIN {
        if let Some(t) = cur.as_table() {
            let raw = vm.heap.table(t).raw_get_str(key);
            if !raw.is_nil() {
                return Ok(raw);
            }
            let meta = meta_op1(vm, cur, event);
            if meta.is_nil() {
                return Ok(TValue::nil());
            }
            if meta.is_function() {
                return call_meta2(vm, meta, cur, TValue::from_string(key));
            }
            cur = meta;
        } else {
            let meta = meta_op1(vm, cur, event);
            if meta.is_nil() {
                let ty = vm.type_name(cur).to_string();
                let name = vm.strings.get_lossy(key).into_owned();
                return Err(vm.error(format!(
                    "attempt to index a non-table object({ty}) with key '{name}'"
                )));
            }
            if meta.is_function() {
                return call_meta2(vm, meta, cur, TValue::from_string(key));
            }
            cur = meta;
        }
    }
    Err(vm.error("'__index' chain too long; possible loop"))
}

/// Assign `obj[key] = value` with the `__newindex` chain. An existing raw
/// slot is overwritten directly, bypassing the metamethod.
pub fn set_field(
    vm: &mut Vm,
    obj: TValue,
    key: TValue,
    value: TValue,
) -> Result<(), RuntimeError> {
    let event = vm.events.newindex;
    let mut cur = obj;
    for _ in 0..MAX_CHAIN {
        if let Some(t) = cur.as_table() {
            if vm.heap.table(t).has_slot(key) {
                return vm
                    .heap
                    .table_mut(t)
                    .raw_set(key, value)
                    .map_err(|msg| vm.error(msg));
            }
            let meta = meta_op1(vm, cur, event);
            if meta.is_nil() {
                return vm
                    .heap
                    .table_mut(t)
                    .raw_set(key, value)
                    .map_err(|msg| vm.error(msg));
            }
            if meta.is_function() {
                call_meta3(vm, meta, cur, key, value)?;
                return Ok(());
            }
            cur = meta;
        } else {
            let meta = meta_op1(vm, cur, event);
            if meta.is_nil() {
                let ty = vm.type_name(cur).to_string();
                return Err(vm.error(format!("attempt to index a non-table object({ty})")));
            }
            if meta.is_function() {
                call_meta3(vm, meta, cur, key, value)?;
                return Ok(());
            }
            cur = meta;
        }
    }
    Err(vm.error("'__newindex' chain too long; possible loop"))
}

/// `set_field` specialized to an interned string key.
pub fn set_field_str(
    vm: &mut Vm,
    obj: TValue,
    key: StringId,
    value: TValue,
) -> Result<(), RuntimeError> {
    set_field(vm, obj, TValue::from_string(key), value)
}

fn call_meta3(
    vm: &mut Vm,
    f: TValue,
    a: TValue,
    b: TValue,
    c: TValue,
) -> Result<(), RuntimeError> {
    vm.th_mut().regs.push(f);
    vm.th_mut().regs.push(a);
    vm.th_mut().regs.push(b);
    vm.th_mut().regs.push(c);
    vm.call_r(3, 0, None)
}

impl Vm {
    /// The per-type metatable for a built-in type, if set.
    pub fn type_metatable(&self, ty: Type) -> Option<TValue> {
        self.type_mts.get(&ty).copied()
    }

    /// Install a per-type metatable for a built-in type.
    pub fn set_type_metatable(&mut self, ty: Type, mt: Option<GcIdx<Table>>) {
        match mt {
            Some(idx) => {
                self.type_mts.insert(ty, TValue::from_table(idx));
            }
            None => {
                self.type_mts.remove(&ty);
            }
        }
    }

    /// The metatable governing a value, as a table index.
    pub fn get_metatable(&self, v: TValue) -> Option<GcIdx<Table>> {
        metatable_of(self, v)
    }

    /// Set the metatable of a value: per-instance for tables and userdata,
    /// per-type for everything else.
    pub fn set_metatable(&mut self, v: TValue, mt: Option<GcIdx<Table>>) {
        if let Some(t) = v.as_table() {
            self.heap.table_mut(t).metatable = mt;
        } else if let Some(u) = v.as_userdata() {
            self.heap.userdata_mut(u).metatable = mt;
        } else {
            let ty = object::type_of(v, &self.heap);
            self.set_type_metatable(ty, mt);
        }
    }
}
