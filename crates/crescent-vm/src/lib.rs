//! crescent-vm: the execution engine — register file, call frames, dispatch
//! loop, metatable engine, coroutines, error unwinder, and host interface.

mod api;
pub mod arith;
mod auxil;
pub mod cancel;
pub mod coerce;
pub mod compare;
pub mod coroutine;
pub mod custom;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod metamethod;
pub mod opcode;
pub mod proto;
pub mod registers;
pub mod state;

pub use cancel::CancelToken;
pub use coroutine::Resume;
pub use custom::CustomTypeHandle;
pub use error::RuntimeError;
pub use frame::MULTRET;
pub use proto::{Constant, FunctionProto};
pub use state::{FuncKind, Function, HostFn, Options, Vm};
