//! Cooperative cancellation, polled between instructions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct Inner {
    flag: AtomicBool,
    reason: Mutex<String>,
}

/// A token attached to a context. Any holder of a clone may signal it; the
/// interpreter polls it at instruction boundaries and raises a cancellation
/// error when set.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                reason: Mutex::new(String::new()),
            }),
        }
    }

    pub fn cancel(&self, reason: &str) {
        *self.inner.reason.lock().unwrap() = reason.to_string();
        self.inner.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> String {
        self.inner.reason.lock().unwrap().clone()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
