//! The interpreter context: object heap, string interner, loaded prototypes,
//! functions, threads, and the call machinery shared by the dispatch loop and
//! the host interface.

use crate::cancel::CancelToken;
use crate::custom::CustomTypeEntry;
use crate::dispatch;
use crate::error::RuntimeError;
use crate::frame::{CallFrame, MULTRET};
use crate::metamethod::{self, EventNames};
use crate::proto::{Constant, FunctionProto, Proto};
use crate::registers::Registers;
use crescent_core::heap::{GcIdx, Heap, UpVal, UpValLocation};
use crescent_core::object::Type;
use crescent_core::string::StringInterner;
use crescent_core::table::Table;
use crescent_core::value::{FuncId, TValue, ThreadId};
use std::collections::HashMap;
use std::rc::Rc;

/// A host function: reads its arguments by 1-based index, pushes its results,
/// and returns the result count. A negative return is the yield sentinel.
pub type HostFn = fn(&mut Vm) -> Result<i32, RuntimeError>;

/// What a function object executes.
pub enum FuncKind {
    Script { proto: Rc<Proto> },
    /// `fast` host functions are invoked without frame construction and must
    /// not call back into script code.
    Host { func: HostFn, fast: bool },
}

/// A callable: a scripted closure or a registered host function, with its
/// environment table and captured upvalues.
pub struct Function {
    pub kind: FuncKind,
    pub env: GcIdx<Table>,
    pub upvalues: Vec<GcIdx<UpVal>>,
}

impl Function {
    pub fn is_host(&self) -> bool {
        matches!(self.kind, FuncKind::Host { .. })
    }

    pub fn is_fast_host(&self) -> bool {
        matches!(self.kind, FuncKind::Host { fast: true, .. })
    }

    pub fn proto(&self) -> Option<&Rc<Proto>> {
        match &self.kind {
            FuncKind::Script { proto } => Some(proto),
            FuncKind::Host { .. } => None,
        }
    }
}

/// Context creation options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Initial register-file capacity per thread.
    pub registry_size: usize,
    /// Maximum call-frame depth before "stack overflow".
    pub call_stack_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            registry_size: 1024,
            call_stack_size: 256,
        }
    }
}

/// Per-coroutine execution state.
pub(crate) struct ThreadState {
    pub regs: Registers,
    pub frames: Vec<CallFrame>,
    /// Open upvalues of this thread, sorted descending by register slot.
    pub open_upvals: Vec<(usize, GcIdx<UpVal>)>,
    pub parent: Option<ThreadId>,
    /// Errors rethrow in the parent instead of reporting as (false, msg).
    pub wrapped: bool,
    pub dead: bool,
    pub started: bool,
    /// The closure the first resume will enter.
    pub start_fn: Option<FuncId>,
}

impl ThreadState {
    pub fn new(registry_size: usize) -> Self {
        ThreadState {
            regs: Registers::new(registry_size),
            frames: Vec::new(),
            open_upvals: Vec::new(),
            parent: None,
            wrapped: false,
            dead: false,
            started: false,
            start_fn: None,
        }
    }
}

/// An interpreter context. Not safe for parallel access; channels are the
/// only cross-context primitive.
pub struct Vm {
    pub heap: Heap,
    pub strings: StringInterner,
    pub(crate) protos: Vec<Rc<Proto>>,
    pub(crate) functions: Vec<Function>,
    pub(crate) threads: Vec<ThreadState>,
    pub(crate) current: ThreadId,
    pub globals: GcIdx<Table>,
    pub(crate) type_mts: HashMap<Type, TValue>,
    pub(crate) custom_types: Vec<CustomTypeEntry>,
    pub events: EventNames,
    pub(crate) cancel: Option<CancelToken>,
    /// Local base override while a fast host function runs.
    pub(crate) fast_base: Option<usize>,
    pub(crate) options: Options,
}

impl Vm {
    pub fn new(options: Options) -> Self {
        let mut heap = Heap::new();
        let mut strings = StringInterner::new();
        let globals = heap.alloc_table(0, 32);
        let events = EventNames::init(&mut strings);
        let main = ThreadState::new(options.registry_size);
        Vm {
            heap,
            strings,
            protos: Vec::new(),
            functions: Vec::new(),
            threads: vec![main],
            current: ThreadId(0),
            globals,
            type_mts: HashMap::new(),
            custom_types: Vec::new(),
            events,
            cancel: None,
            fast_base: None,
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    // ---- Thread access ----

    #[inline]
    pub(crate) fn th(&self) -> &ThreadState {
        &self.threads[self.current.0 as usize]
    }

    #[inline]
    pub(crate) fn th_mut(&mut self) -> &mut ThreadState {
        &mut self.threads[self.current.0 as usize]
    }

    #[inline]
    pub(crate) fn thread(&self, id: ThreadId) -> &ThreadState {
        &self.threads[id.0 as usize]
    }

    #[inline]
    pub(crate) fn thread_mut(&mut self, id: ThreadId) -> &mut ThreadState {
        &mut self.threads[id.0 as usize]
    }

    pub fn current_thread(&self) -> ThreadId {
        self.current
    }

    pub(crate) fn func(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    /// The prototype of the frame on top of the current thread's stack.
    /// Must only be called when that frame runs a scripted function.
    pub(crate) fn current_proto(&self) -> Rc<Proto> {
        let fid = self.th().frames.last().unwrap().func;
        self.func(fid)
            .proto()
            .expect("current frame is not a scripted function")
            .clone()
    }

    pub(crate) fn current_is_host(&self) -> bool {
        match self.th().frames.last() {
            Some(cf) => self.func(cf.func).is_host(),
            None => false,
        }
    }

    // ---- Function and thread allocation ----

    pub(crate) fn alloc_function(&mut self, f: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(f);
        id
    }

    /// Register a host function closing over the globals environment.
    pub fn new_function(&mut self, f: HostFn) -> FuncId {
        let env = self.globals;
        self.alloc_function(Function {
            kind: FuncKind::Host { func: f, fast: false },
            env,
            upvalues: Vec::new(),
        })
    }

    /// Register a fast host function: invoked without frame construction.
    /// Such a function must not call back into script code.
    pub fn new_fast_function(&mut self, f: HostFn) -> FuncId {
        let env = self.globals;
        self.alloc_function(Function {
            kind: FuncKind::Host { func: f, fast: true },
            env,
            upvalues: Vec::new(),
        })
    }

    /// Register a host function closing over the given values as (closed)
    /// upvalues, readable inside the function via `Vm::upvalue`.
    pub fn new_closure(&mut self, f: HostFn, upvalues: Vec<TValue>) -> FuncId {
        let env = self.globals;
        let upvals = upvalues
            .into_iter()
            .map(|v| self.heap.alloc_upval(UpValLocation::Closed(v)))
            .collect();
        self.alloc_function(Function {
            kind: FuncKind::Host { func: f, fast: false },
            env,
            upvalues: upvals,
        })
    }

    // ---- Prototype loading ----

    /// Load a prototype tree, producing a top-level closure whose environment
    /// is the globals table.
    pub fn load_proto(&mut self, proto: FunctionProto) -> FuncId {
        let id = self.register_proto(proto);
        let env = self.globals;
        self.alloc_function(Function {
            kind: FuncKind::Script {
                proto: self.protos[id].clone(),
            },
            env,
            upvalues: Vec::new(),
        })
    }

    fn register_proto(&mut self, mut proto: FunctionProto) -> usize {
        let children = std::mem::take(&mut proto.protos);
        let child_ids: Vec<usize> = children
            .into_iter()
            .map(|child| self.register_proto(child))
            .collect();
        let mut constants = Vec::with_capacity(proto.constants.len());
        let mut string_consts = Vec::with_capacity(proto.constants.len());
        for k in &proto.constants {
            match k {
                Constant::Nil => {
                    constants.push(TValue::nil());
                    string_consts.push(None);
                }
                Constant::Bool(b) => {
                    constants.push(TValue::from_bool(*b));
                    string_consts.push(None);
                }
                Constant::Number(n) => {
                    constants.push(TValue::from_number(*n));
                    string_consts.push(None);
                }
                Constant::Str(bytes) => {
                    let sid = self.strings.intern(bytes);
                    constants.push(TValue::from_string(sid));
                    string_consts.push(Some(sid));
                }
            }
        }
        let loaded = Proto {
            code: proto.code,
            constants,
            string_consts,
            child_ids,
            num_params: proto.num_params,
            is_vararg: proto.is_vararg,
            num_upvalues: proto.num_upvalues,
            used_registers: proto.used_registers,
            source: proto.source,
            line_defined: proto.line_defined,
            lines: proto.lines,
        };
        self.protos.push(Rc::new(loaded));
        self.protos.len() - 1
    }

    // ---- Upvalues ----

    pub(crate) fn upval_value(&self, uv: GcIdx<UpVal>) -> TValue {
        match self.heap.upval(uv).location {
            UpValLocation::Open { thread, slot } => self.thread(thread).regs.get(slot),
            UpValLocation::Closed(v) => v,
        }
    }

    pub(crate) fn set_upval_value(&mut self, uv: GcIdx<UpVal>, value: TValue) {
        match self.heap.upval(uv).location {
            UpValLocation::Open { thread, slot } => {
                self.thread_mut(thread).regs.set(slot, value);
            }
            UpValLocation::Closed(_) => {
                self.heap.upval_mut(uv).location = UpValLocation::Closed(value);
            }
        }
    }

    /// The open upvalue for a register slot of the current thread, creating
    /// and chaining it on first capture so later captures share the record.
    pub(crate) fn find_upvalue(&mut self, slot: usize) -> GcIdx<UpVal> {
        let tid = self.current.0 as usize;
        for &(s, idx) in &self.threads[tid].open_upvals {
            if s == slot {
                return idx;
            }
        }
        let idx = self.heap.alloc_upval(UpValLocation::Open {
            thread: self.current,
            slot,
        });
        let th = &mut self.threads[tid];
        th.open_upvals.push((slot, idx));
        th.open_upvals.sort_by(|a, b| b.0.cmp(&a.0));
        idx
    }

    /// Close every open upvalue of the current thread at or above `level`,
    /// converting each record in place so sharing survives.
    pub(crate) fn close_upvalues(&mut self, level: usize) {
        self.close_upvalues_of(self.current, level);
    }

    // ---- Call machinery ----

    /// Resolve a value to a callable. A `__call` metamethod reports
    /// `meta = true`; the original receiver then becomes the first argument.
    pub(crate) fn resolve_callable(&mut self, lv: TValue) -> Result<(FuncId, bool), RuntimeError> {
        if let Some(fid) = lv.as_function() {
            return Ok((fid, false));
        }
        let event = self.events.call;
        let m = metamethod::meta_op1(self, lv, event);
        if let Some(fid) = m.as_function() {
            return Ok((fid, true));
        }
        Err(self.error("attempt to call a non-function object"))
    }

    pub(crate) fn push_call_frame(
        &mut self,
        frame: CallFrame,
        callee: TValue,
        meta: bool,
    ) -> Result<(), RuntimeError> {
        let tid = self.current.0 as usize;
        if self.threads[tid].frames.len() >= self.options.call_stack_size {
            return Err(RuntimeError::StackOverflow);
        }
        self.threads[tid].frames.push(frame);
        let idx = self.threads[tid].frames.len() - 1;
        if meta {
            self.threads[tid].frames[idx].nargs += 1;
            let lbase = self.threads[tid].frames[idx].local_base;
            self.threads[tid].regs.insert(callee, lbase);
        }
        self.init_call_frame(idx);
        Ok(())
    }

    /// Lay out the register window for the frame at `frame_idx`: nil-fill
    /// missing parameters, reserve the function's registers, and for vararg
    /// functions relocate the fixed parameters above the vararg block.
    pub(crate) fn init_call_frame(&mut self, frame_idx: usize) {
        let tid = self.current.0 as usize;
        let cf = &self.threads[tid].frames[frame_idx];
        let fid = cf.func;
        let local_base = cf.local_base;
        let nargs0 = cf.nargs;
        match &self.functions[fid.0 as usize].kind {
            FuncKind::Host { .. } => {
                self.threads[tid].regs.set_top(local_base + nargs0);
            }
            FuncKind::Script { proto } => {
                let np = proto.num_params as usize;
                let used = proto.used_registers as usize;
                let is_vararg = proto.is_vararg;
                let regs = &mut self.threads[tid].regs;
                let mut nargs = nargs0;
                if nargs < np {
                    for i in nargs..np {
                        regs.set(local_base + i, TValue::nil());
                    }
                    nargs = np;
                    regs.set_top(local_base + np);
                }
                if !is_vararg {
                    let n = nargs.max(used);
                    for i in np..n {
                        regs.set(local_base + i, TValue::nil());
                    }
                    regs.set_top(local_base + used);
                } else {
                    // Relocate the fixed parameters above the vararg block:
                    //   fn | p1 p2 v1 v2  ->  fn | nil nil v1 v2 p1 p2
                    // so VARARG can copy out of [base+np+1, local_base).
                    regs.set_top(local_base + nargs + np);
                    for i in 0..np {
                        let v = regs.get(local_base + i);
                        regs.set(local_base + nargs + i, v);
                        regs.set(local_base + i, TValue::nil());
                    }
                    let new_lbase = local_base + nargs;
                    regs.set_top(new_lbase + used);
                    self.threads[tid].frames[frame_idx].local_base = new_lbase;
                }
            }
        }
    }

    /// Remove the frame beneath the top one (tail calls into host functions
    /// collapse the scripted caller).
    pub(crate) fn remove_caller_frame(&mut self) {
        let tid = self.current.0 as usize;
        let n = self.threads[tid].frames.len();
        self.threads[tid].frames.remove(n - 2);
    }

    /// Call the value sitting below `nargs` arguments on the register top,
    /// placing `nret` results at `rbase` (defaults to the callee slot).
    pub(crate) fn call_r(
        &mut self,
        nargs: usize,
        nret: i32,
        rbase: Option<usize>,
    ) -> Result<(), RuntimeError> {
        let base = self.th().regs.top() - nargs - 1;
        let rbase = rbase.unwrap_or(base);
        let lv = self.th().regs.get(base);
        let (fid, meta) = self.resolve_callable(lv)?;
        let entry_thread = self.current;
        if self.func(fid).is_fast_host() {
            dispatch::call_fast_host(self, fid, base, nargs, nret)?;
        } else {
            self.push_call_frame(
                CallFrame {
                    func: fid,
                    pc: 0,
                    base,
                    local_base: base + 1,
                    return_base: rbase,
                    nargs,
                    nret,
                    tail_call: 0,
                },
                lv,
                meta,
            )?;
            if self.func(fid).is_host() {
                dispatch::call_host_function(self, false)?;
            } else {
                let depth = self.th().frames.len() - 1;
                dispatch::run_loop(self, Some(depth))?;
            }
        }
        if self.current != entry_thread {
            return Err(RuntimeError::Runtime(
                "attempt to yield across a callback boundary".to_string(),
            ));
        }
        if nret != MULTRET {
            let t = rbase + nret as usize;
            self.th_mut().regs.set_top(t);
        }
        Ok(())
    }

    /// Call with `nargs` arguments and `nret` results (MULTRET for all).
    pub fn call(&mut self, nargs: usize, nret: i32) -> Result<(), RuntimeError> {
        self.call_r(nargs, nret, None)
    }

    /// Protected call: on error the frame stack unwinds to this boundary,
    /// closing upvalues at each step; the optional handler runs once (itself
    /// protected) and its result replaces the error object.
    pub fn pcall(
        &mut self,
        nargs: usize,
        nret: i32,
        errfunc: Option<TValue>,
    ) -> Result<(), RuntimeError> {
        let saved_depth = self.th().frames.len();
        let base = self.th().regs.top() - nargs - 1;
        match self.call_r(nargs, nret, None) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.unwind_to(saved_depth);
                let mut err = e;
                if let Some(handler) = errfunc {
                    let obj = err.to_value(&mut self.strings);
                    self.th_mut().regs.push(handler);
                    self.th_mut().regs.push(obj);
                    match self.call_r(1, 1, None) {
                        Ok(()) => {
                            let v = self.th_mut().regs.pop();
                            err = RuntimeError::Value(v);
                        }
                        Err(handler_err) => {
                            self.unwind_to(saved_depth);
                            err = handler_err;
                        }
                    }
                }
                self.th_mut().regs.set_top(base);
                Err(err)
            }
        }
    }

    /// Pop frames of the current thread down to `depth`, closing upvalues of
    /// every popped frame.
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        while self.th().frames.len() > depth {
            let lbase = self.th().frames.last().unwrap().local_base;
            self.close_upvalues(lbase);
            self.th_mut().frames.pop();
        }
    }

    // ---- Errors ----

    /// Position prefix `source:line: ` of the `level`-th innermost scripted
    /// frame, or an empty string without debug information.
    pub fn where_(&self, level: usize) -> String {
        let th = self.th();
        let mut remaining = level;
        for cf in th.frames.iter().rev() {
            if let FuncKind::Script { proto } = &self.functions[cf.func.0 as usize].kind {
                if remaining == 0 {
                    let pc = cf.pc.saturating_sub(1);
                    if let Some(line) = proto.line_at(pc) {
                        return format!("{}:{}: ", proto.source, line);
                    }
                    return String::new();
                }
                remaining -= 1;
            }
        }
        String::new()
    }

    /// A runtime error annotated with the current call-site position.
    pub fn error(&self, msg: impl AsRef<str>) -> RuntimeError {
        RuntimeError::Runtime(format!("{}{}", self.where_(0), msg.as_ref()))
    }

    // ---- Cancellation ----

    /// Attach a cancellation token; it is polled between instructions.
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = Some(token);
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Options::default())
    }
}
