//! Host-registered custom value types: each gets its own type tag, name and
//! metatable, and a typed handle for wrapping and unwrapping payloads.

use crate::state::Vm;
use crescent_core::heap::GcIdx;
use crescent_core::object::{self, Type};
use crescent_core::table::Table;
use crescent_core::value::TValue;
use std::marker::PhantomData;

/// Registry record for one custom type.
pub struct CustomTypeEntry {
    pub name: String,
    pub metatable: Option<GcIdx<Table>>,
}

/// A typed handle returned by registration; wraps and unwraps values of `T`.
pub struct CustomTypeHandle<T> {
    tag: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CustomTypeHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for CustomTypeHandle<T> {}

impl<T: 'static> CustomTypeHandle<T> {
    pub fn tag(self) -> u16 {
        self.tag
    }

    /// Box a host value into a script-visible custom value.
    pub fn wrap(self, vm: &mut Vm, value: T) -> TValue {
        let idx = vm.heap.alloc_custom(self.tag, Box::new(value));
        TValue::from_custom(idx)
    }

    /// Borrow the payload, when the value is of this type.
    pub fn get(self, vm: &Vm, v: TValue) -> Option<&T> {
        let idx = v.as_custom()?;
        let cd = vm.heap.custom(idx);
        if cd.type_tag != self.tag {
            return None;
        }
        cd.data.downcast_ref::<T>()
    }

    /// Mutably borrow the payload, when the value is of this type.
    pub fn get_mut(self, vm: &mut Vm, v: TValue) -> Option<&mut T> {
        let idx = v.as_custom()?;
        let cd = vm.heap.custom_mut(idx);
        if cd.type_tag != self.tag {
            return None;
        }
        cd.data.downcast_mut::<T>()
    }
}

impl Vm {
    /// Register a custom type with its script-visible name and metatable.
    pub fn register_custom_type<T: 'static>(
        &mut self,
        name: &str,
        metatable: Option<GcIdx<Table>>,
    ) -> CustomTypeHandle<T> {
        let tag = self.custom_types.len() as u16;
        self.custom_types.push(CustomTypeEntry {
            name: name.to_string(),
            metatable,
        });
        CustomTypeHandle {
            tag,
            _marker: PhantomData,
        }
    }

    pub(crate) fn custom_type_metatable(&self, tag: u16) -> Option<GcIdx<Table>> {
        self.custom_types.get(tag as usize).and_then(|e| e.metatable)
    }

    /// Script-visible type name of a value; custom types report their
    /// registered name.
    pub fn type_name(&self, v: TValue) -> &str {
        match object::type_of(v, &self.heap) {
            Type::Custom(tag) => self
                .custom_types
                .get(tag as usize)
                .map(|e| e.name.as_str())
                .unwrap_or("userdata"),
            ty => ty.name(),
        }
    }

    /// Dynamic type of a value.
    pub fn type_of(&self, v: TValue) -> Type {
        object::type_of(v, &self.heap)
    }
}
