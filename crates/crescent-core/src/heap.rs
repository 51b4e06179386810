//! Object heap: arena-based allocation with typed indices.
//!
//! Objects live for the lifetime of their interpreter context; the arenas
//! are dropped wholesale at teardown.

use crate::channel::Channel;
use crate::table::Table;
use crate::value::{ThreadId, TValue};
use std::any::Any;
use std::marker::PhantomData;

/// A typed index into one of the heap's arenas.
#[derive(Debug)]
pub struct GcIdx<T>(pub u32, pub PhantomData<T>);

impl<T> GcIdx<T> {
    pub fn new(index: u32) -> Self {
        GcIdx(index, PhantomData)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl<T> Clone for GcIdx<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcIdx<T> {}

impl<T> PartialEq for GcIdx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for GcIdx<T> {}

impl<T> std::hash::Hash for GcIdx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// An upvalue: open (pointing at a register slot) or closed (owning a value).
#[derive(Debug)]
pub struct UpVal {
    pub location: UpValLocation,
}

/// Where an upvalue's value lives.
#[derive(Debug)]
pub enum UpValLocation {
    /// A register slot of a still-live frame on the given thread. Slots are
    /// absolute indices into the thread's register file, so register-file
    /// reallocation cannot invalidate them.
    Open { thread: ThreadId, slot: usize },
    /// The frame exited; the upvalue owns its value.
    Closed(TValue),
}

/// A mutable host payload with its own metatable and environment.
pub struct Userdata {
    pub data: Box<dyn Any>,
    pub env: Option<GcIdx<Table>>,
    pub metatable: Option<GcIdx<Table>>,
}

/// A value of a host-registered custom type. The metatable and type name
/// live in the per-type registry, not on the instance.
pub struct CustomData {
    pub type_tag: u16,
    pub data: Box<dyn Any>,
}

/// Arena heap for the context-shared object kinds.
pub struct Heap {
    tables: Vec<Table>,
    upvals: Vec<UpVal>,
    userdata: Vec<Userdata>,
    channels: Vec<Channel>,
    custom: Vec<CustomData>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            tables: Vec::new(),
            upvals: Vec::new(),
            userdata: Vec::new(),
            channels: Vec::new(),
            custom: Vec::new(),
        }
    }

    pub fn alloc_table(&mut self, array_hint: usize, hash_hint: usize) -> GcIdx<Table> {
        let idx = self.tables.len() as u32;
        self.tables.push(Table::new(array_hint, hash_hint));
        GcIdx::new(idx)
    }

    pub fn table(&self, idx: GcIdx<Table>) -> &Table {
        &self.tables[idx.0 as usize]
    }

    pub fn table_mut(&mut self, idx: GcIdx<Table>) -> &mut Table {
        &mut self.tables[idx.0 as usize]
    }

    pub fn alloc_upval(&mut self, location: UpValLocation) -> GcIdx<UpVal> {
        let idx = self.upvals.len() as u32;
        self.upvals.push(UpVal { location });
        GcIdx::new(idx)
    }

    pub fn upval(&self, idx: GcIdx<UpVal>) -> &UpVal {
        &self.upvals[idx.0 as usize]
    }

    pub fn upval_mut(&mut self, idx: GcIdx<UpVal>) -> &mut UpVal {
        &mut self.upvals[idx.0 as usize]
    }

    pub fn alloc_userdata(&mut self, data: Box<dyn Any>) -> GcIdx<Userdata> {
        let idx = self.userdata.len() as u32;
        self.userdata.push(Userdata {
            data,
            env: None,
            metatable: None,
        });
        GcIdx::new(idx)
    }

    pub fn userdata(&self, idx: GcIdx<Userdata>) -> &Userdata {
        &self.userdata[idx.0 as usize]
    }

    pub fn userdata_mut(&mut self, idx: GcIdx<Userdata>) -> &mut Userdata {
        &mut self.userdata[idx.0 as usize]
    }

    pub fn alloc_channel(&mut self, ch: Channel) -> GcIdx<Channel> {
        let idx = self.channels.len() as u32;
        self.channels.push(ch);
        GcIdx::new(idx)
    }

    pub fn channel(&self, idx: GcIdx<Channel>) -> &Channel {
        &self.channels[idx.0 as usize]
    }

    pub fn alloc_custom(&mut self, type_tag: u16, data: Box<dyn Any>) -> GcIdx<CustomData> {
        let idx = self.custom.len() as u32;
        self.custom.push(CustomData { type_tag, data });
        GcIdx::new(idx)
    }

    pub fn custom(&self, idx: GcIdx<CustomData>) -> &CustomData {
        &self.custom[idx.0 as usize]
    }

    pub fn custom_mut(&mut self, idx: GcIdx<CustomData>) -> &mut CustomData {
        &mut self.custom[idx.0 as usize]
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
