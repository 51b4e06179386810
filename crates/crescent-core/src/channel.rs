//! Unbounded FIFO channels, the cross-context synchronization primitive.
//!
//! Heap indices are context-local, so values crossing a channel travel as
//! self-contained messages; the VM layer converts to and from `TValue` and
//! rejects context-bound values.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// A value in transit: only context-independent kinds may cross.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Vec<u8>),
}

/// Sending on a closed channel.
#[derive(Debug, PartialEq, Eq)]
pub struct ClosedChannel;

struct State {
    items: VecDeque<Message>,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    ready: Condvar,
}

/// A shared unbounded FIFO. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    pub fn new() -> Self {
        Channel {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    closed: false,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Enqueue a message. Never blocks; fails once the channel is closed.
    pub fn send(&self, msg: Message) -> Result<(), ClosedChannel> {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            return Err(ClosedChannel);
        }
        state.items.push_back(msg);
        self.inner.ready.notify_one();
        Ok(())
    }

    /// Dequeue a message, blocking until one arrives. Returns None once the
    /// channel is closed and drained.
    pub fn receive(&self) -> Option<Message> {
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if let Some(msg) = state.items.pop_front() {
                return Some(msg);
            }
            if state.closed {
                return None;
            }
            state = self.inner.ready.wait(state).unwrap();
        }
    }

    /// Dequeue without blocking.
    pub fn try_receive(&self) -> Option<Message> {
        self.inner.state.lock().unwrap().items.pop_front()
    }

    /// Close the channel; pending messages remain receivable.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.closed = true;
        self.inner.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity of the underlying queue, for equality between handles.
    pub fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel({:p})", Arc::as_ptr(&self.inner))
    }
}
