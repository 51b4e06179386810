//! The host interface: stack discipline, globals and fields, registration,
//! and value display.

use crate::coerce;
use crate::error::RuntimeError;
use crate::frame::MULTRET;
use crate::metamethod;
use crate::proto::FunctionProto;
use crate::state::{HostFn, Vm};
use crescent_core::heap::GcIdx;
use crescent_core::string::StringId;
use crescent_core::table::Table;
use crescent_core::value::{FuncId, TValue};

impl Vm {
    /// Base of 1-indexed host access: the running frame's locals, or the
    /// fast-call window while a fast host function executes.
    fn abs_base(&self) -> usize {
        if let Some(fb) = self.fast_base {
            return fb;
        }
        self.th().frames.last().map(|f| f.local_base).unwrap_or(0)
    }

    /// Number of values above the frame base (the argument count inside a
    /// host function).
    pub fn get_top(&self) -> usize {
        self.th().regs.top().saturating_sub(self.abs_base())
    }

    /// Set the frame-relative top. Negative indices count from the top, so
    /// `set_top(-2)` pops one value.
    pub fn set_top(&mut self, idx: i32) {
        let base = self.abs_base();
        let new_top = if idx >= 0 {
            base + idx as usize
        } else {
            let top = self.th().regs.top() as i64;
            (top + idx as i64 + 1).max(base as i64) as usize
        };
        self.th_mut().regs.set_top(new_top);
    }

    /// Read by 1-based index (negative indexes from the top). Out-of-range
    /// reads yield nil.
    pub fn get(&self, idx: i32) -> TValue {
        let base = self.abs_base();
        let top = self.th().regs.top();
        if idx > 0 {
            let i = base + idx as usize - 1;
            if i < top {
                self.th().regs.get(i)
            } else {
                TValue::nil()
            }
        } else if idx < 0 {
            let i = top as i64 + idx as i64;
            if i >= base as i64 {
                self.th().regs.get(i as usize)
            } else {
                TValue::nil()
            }
        } else {
            TValue::nil()
        }
    }

    pub fn push(&mut self, v: TValue) {
        self.th_mut().regs.push(v);
    }

    pub fn pop(&mut self) -> TValue {
        self.th_mut().regs.pop()
    }

    /// Intern a byte string into a value.
    pub fn new_string(&mut self, s: impl AsRef<[u8]>) -> TValue {
        TValue::from_string(self.strings.intern(s.as_ref()))
    }

    pub fn new_table(&mut self) -> GcIdx<Table> {
        self.heap.alloc_table(0, 0)
    }

    // ---- Globals and fields ----

    pub fn get_global(&mut self, name: &str) -> Result<TValue, RuntimeError> {
        let sid = self.strings.intern(name.as_bytes());
        let g = TValue::from_table(self.globals);
        metamethod::get_field_str(self, g, sid)
    }

    pub fn set_global(&mut self, name: &str, v: TValue) -> Result<(), RuntimeError> {
        let sid = self.strings.intern(name.as_bytes());
        let g = TValue::from_table(self.globals);
        metamethod::set_field_str(self, g, sid, v)
    }

    /// Metamethod-aware index.
    pub fn get_field(&mut self, obj: TValue, key: TValue) -> Result<TValue, RuntimeError> {
        metamethod::get_field(self, obj, key)
    }

    /// Metamethod-aware index with a string key.
    pub fn get_field_str(&mut self, obj: TValue, key: &str) -> Result<TValue, RuntimeError> {
        let sid = self.strings.intern(key.as_bytes());
        metamethod::get_field_str(self, obj, sid)
    }

    /// Metamethod-aware assignment.
    pub fn set_field(
        &mut self,
        obj: TValue,
        key: TValue,
        value: TValue,
    ) -> Result<(), RuntimeError> {
        metamethod::set_field(self, obj, key, value)
    }

    /// Metamethod-aware assignment with a string key.
    pub fn set_field_str(
        &mut self,
        obj: TValue,
        key: &str,
        value: TValue,
    ) -> Result<(), RuntimeError> {
        let sid = self.strings.intern(key.as_bytes());
        metamethod::set_field_str(self, obj, sid, value)
    }

    /// Raw table read, bypassing `__index`.
    pub fn raw_get(&self, t: GcIdx<Table>, key: TValue) -> TValue {
        self.heap.table(t).raw_get(key)
    }

    /// Raw table write, bypassing `__newindex`.
    pub fn raw_set(
        &mut self,
        t: GcIdx<Table>,
        key: TValue,
        value: TValue,
    ) -> Result<(), RuntimeError> {
        self.heap
            .table_mut(t)
            .raw_set(key, value)
            .map_err(|msg| self.error(msg))
    }

    /// Iteration step in insertion order; errors on a key absent from the
    /// table.
    pub fn table_next(
        &self,
        t: GcIdx<Table>,
        key: TValue,
    ) -> Result<Option<(TValue, TValue)>, RuntimeError> {
        self.heap
            .table(t)
            .next(key)
            .map_err(|_| self.error("invalid key to 'next'"))
    }

    // ---- Registration ----

    /// Register a host function under a global name.
    pub fn register(&mut self, name: &str, f: HostFn) -> Result<FuncId, RuntimeError> {
        let fid = self.new_function(f);
        self.set_global(name, TValue::from_function(fid))?;
        Ok(fid)
    }

    /// Register a fast host function (no frame construction; must not call
    /// back into script code) under a global name.
    pub fn register_fast(&mut self, name: &str, f: HostFn) -> Result<FuncId, RuntimeError> {
        let fid = self.new_fast_function(f);
        self.set_global(name, TValue::from_function(fid))?;
        Ok(fid)
    }

    // ---- Convenience execution ----

    /// Load a prototype and run its top-level closure with no arguments,
    /// returning everything it returns.
    pub fn run_proto(&mut self, proto: FunctionProto) -> Result<Vec<TValue>, RuntimeError> {
        let fid = self.load_proto(proto);
        self.push(TValue::from_function(fid));
        let base = self.th().regs.top() - 1;
        self.call(0, MULTRET)?;
        let top = self.th().regs.top();
        let results = (base..top).map(|i| self.th().regs.get(i)).collect();
        self.th_mut().regs.set_top(base);
        Ok(results)
    }

    // ---- Display ----

    /// Plain display form, ignoring `__tostring`.
    pub fn display_value(&self, v: TValue) -> String {
        if v.is_nil() {
            return "nil".to_string();
        }
        if let Some(b) = v.as_bool() {
            return if b { "true" } else { "false" }.to_string();
        }
        if let Some(n) = v.as_number() {
            return coerce::number_to_string(n);
        }
        if let Some(sid) = v.as_string() {
            return self.strings.get_lossy(sid).into_owned();
        }
        let idx = v.ref_index().unwrap_or(0);
        format!("{}: 0x{:08x}", self.type_name(v), idx)
    }

    /// Display form honoring `__tostring`.
    pub fn to_display_string(&mut self, v: TValue) -> Result<String, RuntimeError> {
        let event = self.events.tostring;
        let handler = metamethod::meta_op1(self, v, event);
        if handler.is_function() {
            self.push(handler);
            self.push(v);
            self.call_r(1, 1, None)?;
            let res = self.pop();
            if let Some(sid) = res.as_string() {
                return Ok(self.strings.get_lossy(sid).into_owned());
            }
            return Ok(self.display_value(res));
        }
        Ok(self.display_value(v))
    }

    /// The interned id of a string value, when it is one.
    pub fn string_id(&self, v: TValue) -> Option<StringId> {
        v.as_string()
    }

    /// Insert a value at 1-based frame position `pos`, shifting later values
    /// up by one.
    pub fn insert(&mut self, v: TValue, pos: usize) {
        let abs = self.abs_base() + pos - 1;
        self.th_mut().regs.insert(v, abs);
    }

    /// Upvalue `i` of the running (host) function.
    pub fn upvalue(&self, i: usize) -> TValue {
        match self.th().frames.last() {
            Some(cf) => match self.func(cf.func).upvalues.get(i) {
                Some(&uv) => self.upval_value(uv),
                None => TValue::nil(),
            },
            None => TValue::nil(),
        }
    }
}
