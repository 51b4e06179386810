//! Cooperative coroutines: child threads resumed on the host call stack,
//! suspended through the host-function yield sentinel.

use crate::dispatch;
use crate::error::RuntimeError;
use crate::frame::{CallFrame, MULTRET};
use crate::state::{ThreadState, Vm};
use crescent_core::value::{FuncId, TValue, ThreadId};

/// Outcome of one resume.
#[derive(Debug)]
pub enum Resume {
    /// The coroutine suspended; these are the values passed to yield.
    Yield(Vec<TValue>),
    /// The coroutine finished; these are its return values.
    Return(Vec<TValue>),
    /// The coroutine failed (or was misused); the error object.
    Error(TValue),
}

impl Vm {
    /// Create a suspended coroutine that will enter `f` on first resume.
    pub fn new_coroutine(&mut self, f: FuncId) -> ThreadId {
        self.alloc_thread(f, false)
    }

    /// Like `new_coroutine`, but errors rethrow in the resumer instead of
    /// reporting as an error result.
    pub fn new_wrapped_coroutine(&mut self, f: FuncId) -> ThreadId {
        self.alloc_thread(f, true)
    }

    fn alloc_thread(&mut self, f: FuncId, wrapped: bool) -> ThreadId {
        let mut th = ThreadState::new(self.options().registry_size);
        th.start_fn = Some(f);
        th.wrapped = wrapped;
        let id = ThreadId(self.threads.len() as u32);
        self.threads.push(th);
        id
    }

    /// Resume a coroutine with arguments. On first resume they become the
    /// body's parameters; afterwards they become the results of the
    /// suspended yield expression. Errors inside a wrapped coroutine
    /// propagate as `Err`; everything else reports through `Resume`.
    pub fn resume(&mut self, co: ThreadId, args: Vec<TValue>) -> Result<Resume, RuntimeError> {
        if co == self.current {
            return Ok(self.resume_misuse("cannot resume a running coroutine"));
        }
        if self.thread(co).dead {
            return Ok(self.resume_misuse("cannot resume a dead coroutine"));
        }
        if self.thread(co).parent.is_some() {
            return Ok(self.resume_misuse("cannot resume a non-suspended coroutine"));
        }

        let parent = self.current;
        self.thread_mut(co).parent = Some(parent);
        self.current = co;

        if !self.thread(co).started {
            self.thread_mut(co).started = true;
            let f = match self.thread(co).start_fn {
                Some(f) => f,
                None => {
                    self.thread_mut(co).parent = None;
                    self.current = parent;
                    return Ok(self.resume_misuse("cannot resume a coroutine without a function"));
                }
            };
            let fv = TValue::from_function(f);
            let nargs = args.len();
            self.thread_mut(co).regs.set(0, fv);
            for (i, arg) in args.into_iter().enumerate() {
                self.thread_mut(co).regs.set(1 + i, arg);
            }
            self.push_call_frame(
                CallFrame {
                    func: f,
                    pc: 0,
                    base: 0,
                    local_base: 1,
                    return_base: 0,
                    nargs,
                    nret: MULTRET,
                    tail_call: 0,
                },
                fv,
                false,
            )?;
        } else {
            for arg in args {
                self.thread_mut(co).regs.push(arg);
            }
        }

        let parent_top = self.thread(parent).regs.top();
        thread_run(self)?;

        if self.current == co {
            // A host-bodied coroutine ran to completion without ever
            // switching; finish it by hand.
            let top = self.thread(co).regs.top();
            let values: Vec<TValue> = (0..top).map(|i| self.thread(co).regs.get(i)).collect();
            self.thread_mut(co).parent = None;
            self.kill_thread(co);
            self.current = parent;
            return Ok(Resume::Return(values));
        }

        let new_top = self.thread(parent).regs.top();
        let mut values: Vec<TValue> = (parent_top..new_top)
            .map(|i| self.thread(parent).regs.get(i))
            .collect();
        self.thread_mut(parent).regs.set_top(parent_top);

        if !self.thread(co).wrapped {
            let flag = if values.is_empty() {
                TValue::nil()
            } else {
                values.remove(0)
            };
            if flag.is_falsy() {
                let obj = values.first().copied().unwrap_or(TValue::nil());
                return Ok(Resume::Error(obj));
            }
        }
        if self.thread(co).dead {
            Ok(Resume::Return(values))
        } else {
            Ok(Resume::Yield(values))
        }
    }

    fn resume_misuse(&mut self, msg: &str) -> Resume {
        let sid = self.strings.intern(msg.as_bytes());
        Resume::Error(TValue::from_string(sid))
    }

    /// The yield sentinel: lay the values out for the parent to collect and
    /// report a negative result count. Only meaningful as the return value
    /// of a host function.
    pub fn coroutine_yield(&mut self, values: Vec<TValue>) -> i32 {
        self.set_top(0);
        for v in values {
            self.push(v);
        }
        -1
    }

    /// True when the current thread can yield (it has a resumer).
    pub fn is_yieldable(&self) -> bool {
        self.th().parent.is_some()
    }

    /// Coroutine lifecycle state: "running", "suspended", "normal" (it
    /// resumed the running chain), or "dead".
    pub fn coroutine_status(&self, co: ThreadId) -> &'static str {
        if self.thread(co).dead {
            return "dead";
        }
        if co == self.current {
            return "running";
        }
        let mut t = self.current;
        while let Some(p) = self.thread(t).parent {
            if p == co {
                return "normal";
            }
            t = p;
        }
        "suspended"
    }

    /// Transfer control back to the resumer: push the status flag (for the
    /// plain resume flavor), move `nargs` values from this thread's register
    /// top onto the parent's, drop the suspended call frame, and make the
    /// parent current.
    pub(crate) fn switch_to_parent_thread(
        &mut self,
        nargs: usize,
        haserror: bool,
        kill: bool,
    ) -> Result<(), RuntimeError> {
        let co = self.current;
        let parent = match self.thread(co).parent {
            Some(p) => p,
            None => return Err(self.error("cannot yield from outside of a coroutine")),
        };
        self.thread_mut(co).parent = None;
        if !self.thread(co).wrapped {
            self.thread_mut(parent)
                .regs
                .push(TValue::from_bool(!haserror));
        }
        let top = self.thread(co).regs.top();
        let start = top - nargs.min(top);
        for i in 0..nargs {
            let v = self.thread(co).regs.get(start + i);
            self.thread_mut(parent).regs.push(v);
        }
        self.thread_mut(co).regs.set_top(start);
        if let Some(cf) = self.thread(co).frames.last() {
            let offset = cf.local_base - cf.return_base;
            self.thread_mut(co).frames.pop();
            let t = self.thread(co).regs.top().saturating_sub(offset);
            self.thread_mut(co).regs.set_top(t);
        }
        self.current = parent;
        if kill {
            self.kill_thread(co);
        }
        Ok(())
    }

    /// Terminate a coroutine: close its remaining upvalues, drop its frames,
    /// and mark it dead.
    pub(crate) fn kill_thread(&mut self, id: ThreadId) {
        self.close_upvalues_of(id, 0);
        let th = self.thread_mut(id);
        th.frames.clear();
        th.dead = true;
    }

    pub(crate) fn close_upvalues_of(&mut self, tid: ThreadId, level: usize) {
        let t = tid.0 as usize;
        let mut i = 0;
        while i < self.threads[t].open_upvals.len() {
            let (slot, uv) = self.threads[t].open_upvals[i];
            if slot >= level {
                let value = self.threads[t].regs.get(slot);
                self.heap.upval_mut(uv).location =
                    crescent_core::heap::UpValLocation::Closed(value);
                self.threads[t].open_upvals.remove(i);
            } else {
                i += 1;
            }
        }
    }
}

/// Run the current thread to its next suspension point, reporting failures
/// to the resumer: for the plain flavor the error lands on the parent stack
/// as `(false, object)`; for the wrap flavor it rethrows in the parent.
pub(crate) fn thread_run(vm: &mut Vm) -> Result<(), RuntimeError> {
    if vm.th().frames.is_empty() {
        return Ok(());
    }
    match dispatch::run_loop(vm, None) {
        Ok(()) => Ok(()),
        Err(e) => {
            let co = vm.current;
            let parent = vm.thread(co).parent;
            match parent {
                None => Err(e),
                Some(p) => {
                    vm.unwind_to(0);
                    if vm.thread(co).wrapped {
                        vm.thread_mut(co).parent = None;
                        vm.kill_thread(co);
                        vm.current = p;
                        Err(e)
                    } else {
                        let obj = e.to_value(&mut vm.strings);
                        vm.thread_mut(co).regs.set_top(0);
                        vm.thread_mut(co).regs.push(obj);
                        vm.switch_to_parent_thread(1, true, true)?;
                        Ok(())
                    }
                }
            }
        }
    }
}
