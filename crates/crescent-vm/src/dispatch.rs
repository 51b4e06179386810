//! The fetch-decode-execute loop.
//!
//! Each opcode handler resolves to one of four flow statuses: keep going,
//! re-cache the running function (tail call into a scripted callee),
//! re-cache the whole frame (a scripted call entered or left), or exit the
//! loop (base frame returned, coroutine switched, or an error propagated).

use crate::arith::{self, ArithOp};
use crate::compare;
use crate::error::RuntimeError;
use crate::frame::{CallFrame, MULTRET};
use crate::metamethod;
use crate::opcode::{self, Instruction, OpCode, FIELDS_PER_FLUSH};
use crate::proto::Proto;
use crate::state::{FuncKind, Function, Vm};
use crescent_core::string::StringId;
use crescent_core::value::{FuncId, TValue};
use std::rc::Rc;

/// Dispatch status of one handled instruction.
pub(crate) enum Flow {
    /// Continue with the next instruction.
    Ok,
    /// Same frame, different function: re-cache its code.
    FnChanged,
    /// The current frame changed: re-cache everything.
    FrameChanged,
    /// Leave the dispatch loop.
    Exit,
}

/// Run the current thread until the base frame returns, a coroutine switch
/// leaves this loop, or an error unwinds. `base_depth` is the frame index
/// this invocation must not descend past; None runs until the thread drains.
pub(crate) fn run_loop(vm: &mut Vm, base_depth: Option<usize>) -> Result<(), RuntimeError> {
    if vm.th().frames.is_empty() {
        return Ok(());
    }
    if vm.current_is_host() {
        call_host_function(vm, false)?;
        return Ok(());
    }
    if vm.cancel.is_some() {
        main_loop_with_cancel(vm, base_depth)
    } else {
        main_loop(vm, base_depth)
    }
}

fn main_loop(vm: &mut Vm, base_depth: Option<usize>) -> Result<(), RuntimeError> {
    let mut proto = vm.current_proto();
    loop {
        let inst = {
            let cf = vm.th_mut().frames.last_mut().unwrap();
            let inst = proto.code[cf.pc];
            cf.pc += 1;
            inst
        };
        match step(vm, inst, &proto, base_depth)? {
            Flow::Ok => {}
            Flow::FnChanged | Flow::FrameChanged => proto = vm.current_proto(),
            Flow::Exit => return Ok(()),
        }
    }
}

fn main_loop_with_cancel(vm: &mut Vm, base_depth: Option<usize>) -> Result<(), RuntimeError> {
    let token = vm.cancel.clone().unwrap();
    let mut proto = vm.current_proto();
    loop {
        if token.is_cancelled() {
            return Err(RuntimeError::Cancelled(token.reason()));
        }
        let inst = {
            let cf = vm.th_mut().frames.last_mut().unwrap();
            let inst = proto.code[cf.pc];
            cf.pc += 1;
            inst
        };
        match step(vm, inst, &proto, base_depth)? {
            Flow::Ok => {}
            Flow::FnChanged | Flow::FrameChanged => proto = vm.current_proto(),
            Flow::Exit => return Ok(()),
        }
    }
}

/// Register-or-constant operand.
#[inline]
fn rk(vm: &Vm, proto: &Proto, lbase: usize, operand: u32) -> TValue {
    if opcode::is_k(operand) {
        proto.constants[opcode::rk_index(operand)]
    } else {
        vm.th().regs.get(lbase + operand as usize)
    }
}

/// Register-or-constant operand that must be a string.
#[inline]
fn rk_string(
    vm: &Vm,
    proto: &Proto,
    lbase: usize,
    operand: u32,
) -> Result<StringId, RuntimeError> {
    if opcode::is_k(operand) {
        proto.string_consts[opcode::rk_index(operand)]
            .ok_or_else(|| vm.error("string constant expected"))
    } else {
        vm.th()
            .regs
            .get(lbase + operand as usize)
            .as_string()
            .ok_or_else(|| vm.error("string expected"))
    }
}

/// Place a callee's `n` return values (declared count `b`, B operand of
/// RETURN) at `regv`, padding with nil past what it produced.
fn copy_return_values(vm: &mut Vm, regv: usize, start: usize, n: usize, b: usize) {
    let regs = &mut vm.th_mut().regs;
    if b == 1 {
        regs.fill_nil(regv, n);
    } else {
        regs.copy_range(regv, start, None, n);
        if b > 1 && n > b - 1 {
            regs.fill_nil(regv + b - 1, n - (b - 1));
        }
    }
}

/// Invoke the host function on top of the frame stack. Returns true when
/// control left this thread (the host yielded, or a tail call finished the
/// coroutine).
pub(crate) fn call_host_function(vm: &mut Vm, tailcall: bool) -> Result<bool, RuntimeError> {
    let (fid, nret, return_base) = {
        let cf = vm.th().frames.last().unwrap();
        (cf.func, cf.nret, cf.return_base)
    };
    let func = match &vm.func(fid).kind {
        FuncKind::Host { func, .. } => *func,
        FuncKind::Script { .. } => unreachable!("host frame holds a scripted function"),
    };
    let ret = func(vm)?;
    if tailcall {
        vm.remove_caller_frame();
    }
    if ret < 0 {
        let n = vm.get_top();
        vm.switch_to_parent_thread(n, false, false)?;
        return Ok(true);
    }
    let ret = ret as usize;
    let wantret = if nret == MULTRET { ret } else { nret as usize };
    if tailcall && vm.th().parent.is_some() && vm.th().frames.len() == 1 {
        if wantret > ret {
            let start = vm.th().regs.top() - ret;
            vm.th_mut().regs.copy_range(start, start, None, wantret);
        }
        vm.switch_to_parent_thread(wantret, false, true)?;
        return Ok(true);
    }
    let top = vm.th().regs.top();
    vm.th_mut().regs.copy_range(return_base, top - ret, None, wantret);
    vm.th_mut().frames.pop();
    Ok(false)
}

/// Invoke a fast host function without frame construction: arguments are
/// read relative to `ra + 1`, results land at `ra`.
pub(crate) fn call_fast_host(
    vm: &mut Vm,
    fid: FuncId,
    ra: usize,
    nargs: usize,
    nret: i32,
) -> Result<(), RuntimeError> {
    vm.th_mut().regs.set_top(ra + 1 + nargs);
    let func = match &vm.func(fid).kind {
        FuncKind::Host { func, .. } => *func,
        FuncKind::Script { .. } => unreachable!("fast call of a scripted function"),
    };
    vm.fast_base = Some(ra + 1);
    let ret = func(vm);
    vm.fast_base = None;
    let ret = ret?;
    if ret < 0 {
        return Err(vm.error("attempt to yield from a fast function"));
    }
    let ret = ret as usize;
    let wantret = if nret == MULTRET { ret } else { nret as usize };
    let top = vm.th().regs.top();
    vm.th_mut().regs.copy_range(ra, top - ret, None, wantret);
    Ok(())
}

fn step(
    vm: &mut Vm,
    inst: Instruction,
    proto: &Rc<Proto>,
    base_depth: Option<usize>,
) -> Result<Flow, RuntimeError> {
    let op = match inst.opcode() {
        Some(op) => op,
        None => return Err(vm.error(format!("invalid opcode {}", inst.raw_opcode()))),
    };
    let (lbase, cur_fid) = {
        let cf = vm.th().frames.last().unwrap();
        (cf.local_base, cf.func)
    };
    let a = inst.a() as usize;
    let ra = lbase + a;

    match op {
        OpCode::Move => {
            let b = inst.b() as usize;
            let v = vm.th().regs.get(lbase + b);
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::MoveN => {
            let b = inst.b() as usize;
            let c = inst.c();
            let v = vm.th().regs.get(lbase + b);
            vm.th_mut().regs.set(ra, v);
            for _ in 0..c {
                let fused = {
                    let cf = vm.th_mut().frames.last_mut().unwrap();
                    let w = proto.code[cf.pc];
                    cf.pc += 1;
                    w
                };
                let fa = fused.a() as usize;
                let fb = fused.b() as usize;
                let v = vm.th().regs.get(lbase + fb);
                vm.th_mut().regs.set(lbase + fa, v);
            }
        }

        OpCode::LoadK => {
            let bx = inst.bx() as usize;
            let v = proto.constants[bx];
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::LoadBool => {
            let b = inst.b();
            let c = inst.c();
            vm.th_mut().regs.set(ra, TValue::from_bool(b != 0));
            if c != 0 {
                vm.th_mut().frames.last_mut().unwrap().pc += 1;
            }
        }

        OpCode::LoadNil => {
            let b = inst.b() as usize;
            for i in ra..=lbase + b {
                vm.th_mut().regs.set(i, TValue::nil());
            }
        }

        OpCode::GetUpval => {
            let b = inst.b() as usize;
            let uv = vm.func(cur_fid).upvalues[b];
            let v = vm.upval_value(uv);
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::SetUpval => {
            let b = inst.b() as usize;
            let uv = vm.func(cur_fid).upvalues[b];
            let v = vm.th().regs.get(ra);
            vm.set_upval_value(uv, v);
        }

        OpCode::GetGlobal => {
            let bx = inst.bx() as usize;
            let sid = proto.string_consts[bx]
                .ok_or_else(|| vm.error("string constant expected"))?;
            let env = TValue::from_table(vm.func(cur_fid).env);
            let v = metamethod::get_field_str(vm, env, sid)?;
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::SetGlobal => {
            let bx = inst.bx() as usize;
            let sid = proto.string_consts[bx]
                .ok_or_else(|| vm.error("string constant expected"))?;
            let env = TValue::from_table(vm.func(cur_fid).env);
            let v = vm.th().regs.get(ra);
            metamethod::set_field_str(vm, env, sid, v)?;
        }

        OpCode::GetTable => {
            let b = inst.b() as usize;
            let key = rk(vm, proto, lbase, inst.c());
            let obj = vm.th().regs.get(lbase + b);
            let v = metamethod::get_field(vm, obj, key)?;
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::GetTableKS => {
            let b = inst.b() as usize;
            let key = rk_string(vm, proto, lbase, inst.c())?;
            let obj = vm.th().regs.get(lbase + b);
            let v = metamethod::get_field_str(vm, obj, key)?;
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::SetTable => {
            let obj = vm.th().regs.get(ra);
            let key = rk(vm, proto, lbase, inst.b());
            let value = rk(vm, proto, lbase, inst.c());
            // Metatable-free tables take the raw path directly.
            match obj.as_table() {
                Some(t) if vm.heap.table(t).metatable.is_none() => {
                    vm.heap
                        .table_mut(t)
                        .raw_set(key, value)
                        .map_err(|msg| vm.error(msg))?;
                }
                _ => metamethod::set_field(vm, obj, key, value)?,
            }
        }

        OpCode::SetTableKS => {
            let obj = vm.th().regs.get(ra);
            let key = rk_string(vm, proto, lbase, inst.b())?;
            let value = rk(vm, proto, lbase, inst.c());
            match obj.as_table() {
                Some(t) if vm.heap.table(t).metatable.is_none() => {
                    vm.heap.table_mut(t).raw_set_str(key, value);
                }
                _ => metamethod::set_field_str(vm, obj, key, value)?,
            }
        }

        OpCode::NewTable => {
            let b = inst.b() as usize;
            let c = inst.c() as usize;
            let t = vm.heap.alloc_table(b, c);
            vm.th_mut().regs.set(ra, TValue::from_table(t));
        }

        OpCode::SelfOp => {
            let b = inst.b() as usize;
            let key = rk_string(vm, proto, lbase, inst.c())?;
            let receiver = vm.th().regs.get(lbase + b);
            let v = metamethod::get_field_str(vm, receiver, key)?;
            vm.th_mut().regs.set(ra, v);
            vm.th_mut().regs.set(ra + 1, receiver);
        }

        OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
            let aop = match op {
                OpCode::Add => ArithOp::Add,
                OpCode::Sub => ArithOp::Sub,
                OpCode::Mul => ArithOp::Mul,
                OpCode::Div => ArithOp::Div,
                OpCode::Mod => ArithOp::Mod,
                _ => ArithOp::Pow,
            };
            let lhs = rk(vm, proto, lbase, inst.b());
            let rhs = rk(vm, proto, lbase, inst.c());
            let v = arith::arith(vm, aop, lhs, rhs)?;
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::Unm => {
            let v = rk(vm, proto, lbase, inst.b());
            let v = arith::unary_minus(vm, v)?;
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::Not => {
            let b = inst.b() as usize;
            let v = vm.th().regs.get(lbase + b);
            vm.th_mut().regs.set(ra, TValue::from_bool(v.is_falsy()));
        }

        OpCode::Len => {
            let v = rk(vm, proto, lbase, inst.b());
            let v = arith::length(vm, v)?;
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::Concat => {
            let b = inst.b() as usize;
            let c = inst.c() as usize;
            let rb = lbase + b;
            let rc = lbase + c;
            let v = arith::concat(vm, rc - rb + 1, rc)?;
            vm.th_mut().regs.set(ra, v);
        }

        OpCode::Jmp => {
            let sbx = inst.sbx();
            let cf = vm.th_mut().frames.last_mut().unwrap();
            cf.pc = (cf.pc as i64 + sbx as i64) as usize;
        }

        OpCode::Eq => {
            let lhs = rk(vm, proto, lbase, inst.b());
            let rhs = rk(vm, proto, lbase, inst.c());
            let res = compare::equals(vm, lhs, rhs, false)?;
            if usize::from(!res) == a {
                vm.th_mut().frames.last_mut().unwrap().pc += 1;
            }
        }

        OpCode::Lt => {
            let lhs = rk(vm, proto, lbase, inst.b());
            let rhs = rk(vm, proto, lbase, inst.c());
            let res = compare::less_than(vm, lhs, rhs)?;
            if usize::from(!res) == a {
                vm.th_mut().frames.last_mut().unwrap().pc += 1;
            }
        }

        OpCode::Le => {
            let lhs = rk(vm, proto, lbase, inst.b());
            let rhs = rk(vm, proto, lbase, inst.c());
            let res = compare::less_equal(vm, lhs, rhs)?;
            if usize::from(!res) == a {
                vm.th_mut().frames.last_mut().unwrap().pc += 1;
            }
        }

        OpCode::Test => {
            let c = inst.c();
            let v = vm.th().regs.get(ra);
            if v.is_truthy() == (c == 0) {
                vm.th_mut().frames.last_mut().unwrap().pc += 1;
            }
        }

        OpCode::TestSet => {
            let b = inst.b() as usize;
            let c = inst.c();
            let v = vm.th().regs.get(lbase + b);
            if v.is_truthy() != (c == 0) {
                vm.th_mut().regs.set(ra, v);
            } else {
                vm.th_mut().frames.last_mut().unwrap().pc += 1;
            }
        }

        OpCode::Call => {
            let b = inst.b() as usize;
            let c = inst.c() as usize;
            let top = vm.th().regs.top();
            let nargs = if b == 0 { top - (ra + 1) } else { b - 1 };
            let nret = if c == 0 { MULTRET } else { (c - 1) as i32 };
            let lv = vm.th().regs.get(ra);
            let (fid, meta) = vm.resolve_callable(lv)?;
            if vm.func(fid).is_fast_host() {
                call_fast_host(vm, fid, ra, nargs, nret)?;
                return Ok(Flow::Ok);
            }
            vm.push_call_frame(
                CallFrame {
                    func: fid,
                    pc: 0,
                    base: ra,
                    local_base: ra + 1,
                    return_base: ra,
                    nargs,
                    nret,
                    tail_call: 0,
                },
                lv,
                meta,
            )?;
            if vm.func(fid).is_host() {
                if call_host_function(vm, false)? {
                    return Ok(Flow::Exit);
                }
                return Ok(Flow::Ok);
            }
            return Ok(Flow::FrameChanged);
        }

        OpCode::TailCall => {
            let b = inst.b() as usize;
            let top = vm.th().regs.top();
            let nargs = if b == 0 { top - (ra + 1) } else { b - 1 };
            let lv = vm.th().regs.get(ra);
            let (fid, meta) = vm.resolve_callable(lv)?;
            vm.close_upvalues(lbase);
            if vm.func(fid).is_host() {
                let caller_idx = vm.th().frames.len() - 1;
                let (return_base, nret) = {
                    let cf = vm.th().frames.last().unwrap();
                    (cf.return_base, cf.nret)
                };
                vm.push_call_frame(
                    CallFrame {
                        func: fid,
                        pc: 0,
                        base: ra,
                        local_base: ra + 1,
                        return_base,
                        nargs,
                        nret,
                        tail_call: 0,
                    },
                    lv,
                    meta,
                )?;
                if call_host_function(vm, true)? {
                    return Ok(Flow::Exit);
                }
                if vm.th().frames.is_empty()
                    || vm.current_is_host()
                    || Some(caller_idx) == base_depth
                {
                    return Ok(Flow::Exit);
                }
                return Ok(Flow::FrameChanged);
            }
            // Scripted callee: reuse the caller's frame in place.
            let frame_idx = vm.th().frames.len() - 1;
            let base = vm.th().frames[frame_idx].base;
            {
                let cf = &mut vm.th_mut().frames[frame_idx];
                cf.func = fid;
                cf.pc = 0;
                cf.base = ra;
                cf.local_base = ra + 1;
                cf.nargs = nargs;
                cf.tail_call += 1;
            }
            let lbase2 = ra + 1;
            if meta {
                vm.th_mut().frames[frame_idx].nargs += 1;
                vm.th_mut().regs.insert(lv, lbase2);
            }
            vm.init_call_frame(frame_idx);
            let new_lbase = vm.th().frames[frame_idx].local_base;
            let top = vm.th().regs.top();
            vm.th_mut().regs.copy_range(base, ra, None, top - ra);
            {
                let cf = &mut vm.th_mut().frames[frame_idx];
                cf.base = base;
                cf.local_base = base + (new_lbase - lbase2 + 1);
            }
            return Ok(Flow::FnChanged);
        }

        OpCode::Return => {
            let b = inst.b() as usize;
            vm.close_upvalues(lbase);
            let top = vm.th().regs.top();
            let nret_avail = if b == 0 { top - ra } else { b - 1 };
            let (cf_nret, cf_return_base) = {
                let cf = vm.th().frames.last().unwrap();
                (cf.nret, cf.return_base)
            };
            let n = if cf_nret == MULTRET {
                nret_avail
            } else {
                cf_nret as usize
            };
            if vm.th().parent.is_some() && vm.th().frames.len() == 1 {
                let t = vm.th().regs.top();
                copy_return_values(vm, t, ra, n, b);
                vm.switch_to_parent_thread(n, false, true)?;
                return Ok(Flow::Exit);
            }
            let fidx = vm.th().frames.len() - 1;
            let islast = Some(fidx) == base_depth;
            vm.th_mut().frames.pop();
            copy_return_values(vm, cf_return_base, ra, n, b);
            if islast || vm.th().frames.is_empty() || vm.current_is_host() {
                return Ok(Flow::Exit);
            }
            return Ok(Flow::FrameChanged);
        }

        OpCode::ForLoop => {
            let init = vm
                .th()
                .regs
                .get(ra)
                .as_number()
                .ok_or_else(|| vm.error("for statement init must be a number"))?;
            let limit = vm
                .th()
                .regs
                .get(ra + 1)
                .as_number()
                .ok_or_else(|| vm.error("for statement limit must be a number"))?;
            let step = vm
                .th()
                .regs
                .get(ra + 2)
                .as_number()
                .ok_or_else(|| vm.error("for statement step must be a number"))?;
            let next = init + step;
            vm.th_mut().regs.set(ra, TValue::from_number(next));
            if (step > 0.0 && next <= limit) || (step <= 0.0 && next >= limit) {
                let sbx = inst.sbx();
                let cf = vm.th_mut().frames.last_mut().unwrap();
                cf.pc = (cf.pc as i64 + sbx as i64) as usize;
                vm.th_mut().regs.set(ra + 3, TValue::from_number(next));
            } else {
                vm.th_mut().regs.set_top(ra + 1);
            }
        }

        OpCode::ForPrep => {
            let init = vm
                .th()
                .regs
                .get(ra)
                .as_number()
                .ok_or_else(|| vm.error("for statement init must be a number"))?;
            let step = vm
                .th()
                .regs
                .get(ra + 2)
                .as_number()
                .ok_or_else(|| vm.error("for statement step must be a number"))?;
            vm.th_mut().regs.set(ra, TValue::from_number(init - step));
            let sbx = inst.sbx();
            let cf = vm.th_mut().frames.last_mut().unwrap();
            cf.pc = (cf.pc as i64 + sbx as i64) as usize;
        }

        OpCode::TForLoop => {
            let c = inst.c() as usize;
            {
                let regs = &mut vm.th_mut().regs;
                regs.set_top(ra + 5);
                let ctl = regs.get(ra + 2);
                regs.set(ra + 5, ctl);
                let state = regs.get(ra + 1);
                regs.set(ra + 4, state);
                let iter = regs.get(ra);
                regs.set(ra + 3, iter);
            }
            vm.call_r(2, c as i32, Some(ra + 3))?;
            let first = vm.th().regs.get(ra + 3);
            if !first.is_nil() {
                vm.th_mut().regs.set(ra + 2, first);
                let cf = vm.th_mut().frames.last_mut().unwrap();
                let jmp = proto.code[cf.pc];
                cf.pc = (cf.pc as i64 + jmp.sbx() as i64) as usize;
            }
            vm.th_mut().frames.last_mut().unwrap().pc += 1;
        }

        OpCode::SetList => {
            let b = inst.b() as usize;
            let mut c = inst.c() as i64;
            if c == 0 {
                let cf = vm.th_mut().frames.last_mut().unwrap();
                c = proto.code[cf.pc].0 as i64;
                cf.pc += 1;
            }
            let offset = (c - 1) * FIELDS_PER_FLUSH;
            let t = vm
                .th()
                .regs
                .get(ra)
                .as_table()
                .ok_or_else(|| vm.error("SETLIST needs a table"))?;
            let nelem = if b == 0 {
                vm.th().regs.top() - ra - 1
            } else {
                b
            };
            for i in 1..=nelem {
                let v = vm.th().regs.get(ra + i);
                vm.heap.table_mut(t).raw_set_int(offset + i as i64, v);
            }
        }

        OpCode::Close => {
            vm.close_upvalues(ra);
        }

        OpCode::Closure => {
            let bx = inst.bx() as usize;
            let child_id = proto.child_ids[bx];
            let child = vm.protos[child_id].clone();
            let env = vm.func(cur_fid).env;
            let n_up = child.num_upvalues as usize;
            let mut upvals = Vec::with_capacity(n_up);
            for _ in 0..n_up {
                let pseudo = {
                    let cf = vm.th_mut().frames.last_mut().unwrap();
                    let w = proto.code[cf.pc];
                    cf.pc += 1;
                    w
                };
                let b = pseudo.b() as usize;
                match pseudo.opcode() {
                    Some(OpCode::Move) => {
                        let uv = vm.find_upvalue(lbase + b);
                        upvals.push(uv);
                    }
                    Some(OpCode::GetUpval) => {
                        upvals.push(vm.func(cur_fid).upvalues[b]);
                    }
                    _ => return Err(vm.error("malformed upvalue binding in closure")),
                }
            }
            let fid = vm.alloc_function(Function {
                kind: FuncKind::Script { proto: child },
                env,
                upvalues: upvals,
            });
            vm.th_mut().regs.set(ra, TValue::from_function(fid));
        }

        OpCode::VarArg => {
            let b = inst.b() as usize;
            let (base, local_base, nargs) = {
                let cf = vm.th().frames.last().unwrap();
                (cf.base, cf.local_base, cf.nargs)
            };
            let nparams = proto.num_params as usize;
            let nvarargs = nargs.saturating_sub(nparams);
            let nwant = if b == 0 { nvarargs } else { b - 1 };
            vm.th_mut()
                .regs
                .copy_range(ra, base + nparams + 1, Some(local_base), nwant);
        }

        OpCode::Nop => {}
    }
    Ok(Flow::Ok)
}
