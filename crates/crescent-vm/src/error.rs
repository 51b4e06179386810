//! Runtime error values.
//!
//! Errors carry either a message (annotated with a `source:line:` prefix at
//! the raise site) or an arbitrary script value from `error(obj)`. The
//! protected-call unwinder in `state.rs` catches them at its boundary.

use crescent_core::string::StringInterner;
use crescent_core::value::TValue;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum RuntimeError {
    /// A message, usually already carrying its call-site annotation.
    #[error("{0}")]
    Runtime(String),
    /// An arbitrary error object thrown by `error(obj)`.
    #[error("error object")]
    Value(TValue),
    #[error("stack overflow")]
    StackOverflow,
    /// The context's cancellation token fired.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl RuntimeError {
    /// The error object a protected call hands back to script code.
    pub fn to_value(&self, strings: &mut StringInterner) -> TValue {
        match self {
            RuntimeError::Runtime(msg) => TValue::from_string(strings.intern(msg.as_bytes())),
            RuntimeError::Value(v) => *v,
            RuntimeError::StackOverflow => TValue::from_string(strings.intern(b"stack overflow")),
            RuntimeError::Cancelled(reason) => {
                TValue::from_string(strings.intern(format!("cancelled: {reason}").as_bytes()))
            }
        }
    }
}
