//! Standard modules shipped with the core: the base functions, `coroutine`,
//! and `channel`. The remaining modules (string, table, io, os, math, debug,
//! package) are external collaborators.

pub mod base;
pub mod channel_lib;
pub mod coroutine_lib;

use crescent_vm::{RuntimeError, Vm};

/// The name each module registers under. The base functions have no
/// namespace.
pub const BASE_LIB_NAME: &str = "";
pub const COROUTINE_LIB_NAME: &str = "coroutine";
pub const CHANNEL_LIB_NAME: &str = "channel";

type Opener = fn(&mut Vm) -> Result<(), RuntimeError>;

const LIBS: &[(&str, Opener)] = &[
    (BASE_LIB_NAME, base::open),
    (COROUTINE_LIB_NAME, coroutine_lib::open),
    (CHANNEL_LIB_NAME, channel_lib::open),
];

/// Open every in-repo standard module.
pub fn open_libs(vm: &mut Vm) -> Result<(), RuntimeError> {
    for (_, opener) in LIBS {
        opener(vm)?;
    }
    Ok(())
}
