//! Value type classification and type names.

use crate::heap::Heap;
use crate::value::{self, TValue};

/// The dynamic type of a value, as seen by scripts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Nil,
    Boolean,
    Number,
    String,
    Function,
    Userdata,
    Thread,
    Table,
    Channel,
    /// A host-registered custom type; the tag indexes the VM's type registry.
    Custom(u16),
}

impl Type {
    /// The script-visible name. Custom types report through the VM registry;
    /// here they fall back to "userdata".
    pub fn name(self) -> &'static str {
        match self {
            Type::Nil => "nil",
            Type::Boolean => "boolean",
            Type::Number => "number",
            Type::String => "string",
            Type::Function => "function",
            Type::Userdata => "userdata",
            Type::Thread => "thread",
            Type::Table => "table",
            Type::Channel => "channel",
            Type::Custom(_) => "userdata",
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify a value. The heap is needed only to resolve custom type tags.
pub fn type_of(val: TValue, heap: &Heap) -> Type {
    if val.is_nil() {
        return Type::Nil;
    }
    if val.is_bool() {
        return Type::Boolean;
    }
    if val.is_number() {
        return Type::Number;
    }
    match val.ref_sub_tag() {
        Some(value::REF_SUB_STRING) => Type::String,
        Some(value::REF_SUB_TABLE) => Type::Table,
        Some(value::REF_SUB_FUNCTION) => Type::Function,
        Some(value::REF_SUB_USERDATA) => Type::Userdata,
        Some(value::REF_SUB_THREAD) => Type::Thread,
        Some(value::REF_SUB_CHANNEL) => Type::Channel,
        Some(value::REF_SUB_CUSTOM) => {
            let idx = val.as_custom().unwrap();
            Type::Custom(heap.custom(idx).type_tag)
        }
        _ => Type::Nil,
    }
}
