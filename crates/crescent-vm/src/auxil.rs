//! Argument-checking helpers for host functions.

use crate::coerce;
use crate::error::RuntimeError;
use crate::state::Vm;
use crescent_core::channel::Channel;
use crescent_core::heap::{GcIdx, Userdata};
use crescent_core::table::Table;
use crescent_core::value::{FuncId, TValue, ThreadId};

impl Vm {
    /// "bad argument #n (message)" annotated with the call site.
    pub fn arg_error(&self, n: usize, msg: &str) -> RuntimeError {
        self.error(format!("bad argument #{n} ({msg})"))
    }

    /// "bad argument #n (T expected, got U)".
    pub fn type_error(&self, n: usize, expected: &str) -> RuntimeError {
        let got = self.type_name(self.get(n as i32)).to_string();
        self.arg_error(n, &format!("{expected} expected, got {got}"))
    }

    /// The argument must be present (nil is fine).
    pub fn check_any(&self, n: usize) -> Result<TValue, RuntimeError> {
        if n > self.get_top() {
            return Err(self.arg_error(n, "value expected"));
        }
        Ok(self.get(n as i32))
    }

    /// A number, coercing numeric strings.
    pub fn check_number(&self, n: usize) -> Result<f64, RuntimeError> {
        coerce::to_number(self.get(n as i32), &self.strings)
            .ok_or_else(|| self.type_error(n, "number"))
    }

    /// A number truncated to an integer.
    pub fn check_int(&self, n: usize) -> Result<i64, RuntimeError> {
        Ok(self.check_number(n)? as i64)
    }

    /// A string, coercing numbers.
    pub fn check_string(&self, n: usize) -> Result<String, RuntimeError> {
        let v = self.get(n as i32);
        if let Some(sid) = v.as_string() {
            return Ok(self.strings.get_lossy(sid).into_owned());
        }
        if let Some(num) = v.as_number() {
            return Ok(coerce::number_to_string(num));
        }
        Err(self.type_error(n, "string"))
    }

    pub fn check_bool(&self, n: usize) -> Result<bool, RuntimeError> {
        self.get(n as i32)
            .as_bool()
            .ok_or_else(|| self.type_error(n, "boolean"))
    }

    pub fn check_table(&self, n: usize) -> Result<GcIdx<Table>, RuntimeError> {
        self.get(n as i32)
            .as_table()
            .ok_or_else(|| self.type_error(n, "table"))
    }

    pub fn check_function(&self, n: usize) -> Result<FuncId, RuntimeError> {
        self.get(n as i32)
            .as_function()
            .ok_or_else(|| self.type_error(n, "function"))
    }

    pub fn check_thread(&self, n: usize) -> Result<ThreadId, RuntimeError> {
        self.get(n as i32)
            .as_thread()
            .ok_or_else(|| self.type_error(n, "thread"))
    }

    pub fn check_channel(&self, n: usize) -> Result<Channel, RuntimeError> {
        match self.get(n as i32).as_channel() {
            Some(idx) => Ok(self.heap.channel(idx).clone()),
            None => Err(self.type_error(n, "channel")),
        }
    }

    pub fn check_userdata(&self, n: usize) -> Result<GcIdx<Userdata>, RuntimeError> {
        self.get(n as i32)
            .as_userdata()
            .ok_or_else(|| self.type_error(n, "userdata"))
    }

    /// A number, or `default` when the argument is absent or nil.
    pub fn opt_number(&self, n: usize, default: f64) -> Result<f64, RuntimeError> {
        if self.get(n as i32).is_nil() {
            return Ok(default);
        }
        self.check_number(n)
    }

    pub fn opt_int(&self, n: usize, default: i64) -> Result<i64, RuntimeError> {
        if self.get(n as i32).is_nil() {
            return Ok(default);
        }
        self.check_int(n)
    }

    pub fn opt_string(&self, n: usize, default: &str) -> Result<String, RuntimeError> {
        if self.get(n as i32).is_nil() {
            return Ok(default.to_string());
        }
        self.check_string(n)
    }

    pub fn opt_bool(&self, n: usize, default: bool) -> Result<bool, RuntimeError> {
        if self.get(n as i32).is_nil() {
            return Ok(default);
        }
        self.check_bool(n)
    }
}
