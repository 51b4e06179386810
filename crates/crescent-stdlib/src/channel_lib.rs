//! The `channel` module: unbounded FIFOs usable across contexts running on
//! distinct native threads.
//!
//! Heap references are context-local, so only self-contained values (nil,
//! booleans, numbers, strings) may cross a channel.

use crescent_core::channel::{Channel, Message};
use crescent_core::object::Type;
use crescent_core::value::TValue;
use crescent_vm::{RuntimeError, Vm};

pub fn open(vm: &mut Vm) -> Result<(), RuntimeError> {
    let ch_table = vm.new_table();
    let make = vm.new_function(channel_make);
    let sid = vm.strings.intern(b"make");
    vm.heap
        .table_mut(ch_table)
        .raw_set_str(sid, TValue::from_function(make));
    vm.set_global("channel", TValue::from_table(ch_table))?;

    // Methods hang off the channel type metatable.
    let methods = vm.new_table();
    let entries: &[(&str, crescent_vm::HostFn)] = &[
        ("send", channel_send),
        ("receive", channel_receive),
        ("close", channel_close),
    ];
    for (name, f) in entries {
        let fid = vm.new_function(*f);
        let sid = vm.strings.intern(name.as_bytes());
        vm.heap
            .table_mut(methods)
            .raw_set_str(sid, TValue::from_function(fid));
    }
    let mt = vm.new_table();
    let index = vm.events.index;
    vm.heap
        .table_mut(mt)
        .raw_set_str(index, TValue::from_table(methods));
    vm.set_type_metatable(Type::Channel, Some(mt));
    Ok(())
}

/// Register an existing channel handle into this context, e.g. one received
/// from another context before spawning it.
pub fn share_channel(vm: &mut Vm, ch: Channel) -> TValue {
    TValue::from_channel(vm.heap.alloc_channel(ch))
}

fn channel_make(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let idx = vm.heap.alloc_channel(Channel::new());
    vm.push(TValue::from_channel(idx));
    Ok(1)
}

fn channel_send(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let ch = vm.check_channel(1)?;
    let v = vm.check_any(2)?;
    let msg = value_to_message(vm, v)?;
    if ch.send(msg).is_err() {
        return Err(vm.error("send on a closed channel"));
    }
    Ok(0)
}

fn channel_receive(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let ch = vm.check_channel(1)?;
    match ch.receive() {
        Some(msg) => {
            let v = message_to_value(vm, msg);
            vm.push(TValue::from_bool(true));
            vm.push(v);
        }
        None => {
            vm.push(TValue::from_bool(false));
            vm.push(TValue::nil());
        }
    }
    Ok(2)
}

fn channel_close(vm: &mut Vm) -> Result<i32, RuntimeError> {
    let ch = vm.check_channel(1)?;
    ch.close();
    Ok(0)
}

fn value_to_message(vm: &Vm, v: TValue) -> Result<Message, RuntimeError> {
    if v.is_nil() {
        return Ok(Message::Nil);
    }
    if let Some(b) = v.as_bool() {
        return Ok(Message::Bool(b));
    }
    if let Some(n) = v.as_number() {
        return Ok(Message::Number(n));
    }
    if let Some(sid) = v.as_string() {
        return Ok(Message::Str(vm.strings.get_bytes(sid).to_vec()));
    }
    let ty = vm.type_name(v).to_string();
    Err(vm.error(format!("cannot send a {ty} through a channel")))
}

fn message_to_value(vm: &mut Vm, msg: Message) -> TValue {
    match msg {
        Message::Nil => TValue::nil(),
        Message::Bool(b) => TValue::from_bool(b),
        Message::Number(n) => TValue::from_number(n),
        Message::Str(bytes) => TValue::from_string(vm.strings.intern(&bytes)),
    }
}
