//! Hybrid array + hash table with insertion-order iteration.

use crate::heap::GcIdx;
use crate::string::StringId;
use crate::value::TValue;
use indexmap::IndexMap;

/// Largest positive integer key stored densely in the array part; integer
/// keys at or beyond this go to the hash part.
pub const MAX_ARRAY_INDEX: i64 = 1 << 24;

const DEFAULT_ARRAY_CAP: usize = 32;

/// A key in the hash part of a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    /// Number key, stored as raw bits (-0.0 normalized to 0.0, NaN rejected).
    Number(u64),
    Str(StringId),
    Bool(bool),
    /// Reference key (table, function, ...), identified by raw value bits.
    Ref(u64),
}

/// A table: dense 1-based array part plus an insertion-order-preserving map.
pub struct Table {
    array: Vec<TValue>,
    hash: IndexMap<TableKey, TValue>,
    pub metatable: Option<GcIdx<Table>>,
}

/// Integer array index for a number key, if it is one.
#[inline]
fn array_index(n: f64) -> Option<usize> {
    if n.fract() == 0.0 && n >= 1.0 && n < MAX_ARRAY_INDEX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

/// Convert a value to a hash key. None for nil and NaN.
fn key_of(v: TValue) -> Option<TableKey> {
    if v.is_nil() {
        return None;
    }
    if let Some(n) = v.as_number() {
        if n.is_nan() {
            return None;
        }
        let n = if n == 0.0 { 0.0 } else { n };
        return Some(TableKey::Number(n.to_bits()));
    }
    if let Some(b) = v.as_bool() {
        return Some(TableKey::Bool(b));
    }
    if let Some(sid) = v.as_string() {
        return Some(TableKey::Str(sid));
    }
    Some(TableKey::Ref(v.raw_bits()))
}

fn key_to_value(k: TableKey) -> TValue {
    match k {
        TableKey::Number(bits) => TValue::from_number(f64::from_bits(bits)),
        TableKey::Str(sid) => TValue::from_string(sid),
        TableKey::Bool(b) => TValue::from_bool(b),
        TableKey::Ref(bits) => TValue::from_raw_bits(bits),
    }
}

impl Table {
    /// Create an empty table with array/hash capacity hints.
    pub fn new(array_hint: usize, hash_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            hash: IndexMap::with_capacity(hash_hint),
            metatable: None,
        }
    }

    /// Raw get without `__index`.
    pub fn raw_get(&self, key: TValue) -> TValue {
        if let Some(n) = key.as_number() {
            if let Some(i) = array_index(n) {
                if i <= self.array.len() {
                    return self.array[i - 1];
                }
                return TValue::nil();
            }
        }
        match key_of(key) {
            Some(tk) => self.hash.get(&tk).copied().unwrap_or(TValue::nil()),
            None => TValue::nil(),
        }
    }

    /// Raw set without `__newindex`. Rejects nil and NaN keys.
    pub fn raw_set(&mut self, key: TValue, value: TValue) -> Result<(), &'static str> {
        if key.is_nil() {
            return Err("table index is nil");
        }
        if let Some(n) = key.as_number() {
            if n.is_nan() {
                return Err("table index is NaN");
            }
            if let Some(i) = array_index(n) {
                self.set_array(i, value);
                return Ok(());
            }
        }
        let tk = key_of(key).unwrap();
        if value.is_nil() {
            self.hash.shift_remove(&tk);
        } else {
            self.hash.insert(tk, value);
        }
        Ok(())
    }

    /// Array-part store, filling any intervening holes with nil.
    fn set_array(&mut self, key: usize, value: TValue) {
        let index = key - 1;
        let alen = self.array.len();
        if index < alen {
            self.array[index] = value;
        } else if !value.is_nil() {
            if self.array.capacity() == 0 {
                self.array.reserve(DEFAULT_ARRAY_CAP);
            }
            for _ in alen..index {
                self.array.push(TValue::nil());
            }
            self.array.push(value);
        }
    }

    /// Raw get at an integer position.
    pub fn raw_get_int(&self, key: i64) -> TValue {
        if key >= 1 && (key as usize) <= self.array.len() {
            return self.array[(key - 1) as usize];
        }
        self.hash
            .get(&TableKey::Number((key as f64).to_bits()))
            .copied()
            .unwrap_or(TValue::nil())
    }

    /// Raw set at an integer position.
    pub fn raw_set_int(&mut self, key: i64, value: TValue) {
        if key >= 1 && key < MAX_ARRAY_INDEX {
            self.set_array(key as usize, value);
            return;
        }
        let tk = TableKey::Number((key as f64).to_bits());
        if value.is_nil() {
            self.hash.shift_remove(&tk);
        } else {
            self.hash.insert(tk, value);
        }
    }

    /// Raw get at a string key.
    pub fn raw_get_str(&self, key: StringId) -> TValue {
        self.hash
            .get(&TableKey::Str(key))
            .copied()
            .unwrap_or(TValue::nil())
    }

    /// Raw set at a string key.
    pub fn raw_set_str(&mut self, key: StringId, value: TValue) {
        if value.is_nil() {
            self.hash.shift_remove(&TableKey::Str(key));
        } else {
            self.hash.insert(TableKey::Str(key), value);
        }
    }

    /// True when the key names an existing storage slot: an allocated array
    /// position (a nil hole still counts) or a live hash entry. Assignment
    /// into an existing slot bypasses `__newindex`.
    pub fn has_slot(&self, key: TValue) -> bool {
        if let Some(n) = key.as_number() {
            if let Some(i) = array_index(n) {
                return i <= self.array.len();
            }
        }
        match key_of(key) {
            Some(tk) => self.hash.contains_key(&tk),
            None => false,
        }
    }

    /// A border of the array part: some n with t[n] ~= nil and t[n+1] == nil.
    pub fn len(&self) -> i64 {
        if self.array.is_empty() {
            return 0;
        }
        if !self.array.last().unwrap().is_nil() {
            return self.array.len() as i64;
        }
        let mut lo = 0usize;
        let mut hi = self.array.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.array[mid].is_nil() {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo as i64
    }

    /// True when both parts hold no live entries.
    pub fn is_empty(&self) -> bool {
        self.hash.is_empty() && self.array.iter().all(|v| v.is_nil())
    }

    /// The largest positive integer key with a non-nil value in the array part.
    pub fn max_n(&self) -> i64 {
        for i in (0..self.array.len()).rev() {
            if !self.array[i].is_nil() {
                return (i + 1) as i64;
            }
        }
        0
    }

    /// Append a value after the last non-nil array slot. Nil is ignored.
    pub fn append(&mut self, value: TValue) {
        if value.is_nil() {
            return;
        }
        if self.array.is_empty() || !self.array.last().unwrap().is_nil() {
            self.array.push(value);
        } else {
            let mut i = self.array.len() - 1;
            while i > 0 && self.array[i - 1].is_nil() {
                i -= 1;
            }
            self.array[i] = value;
        }
    }

    /// Insert a value at position `pos`, shifting later array elements up.
    pub fn insert(&mut self, pos: i64, value: TValue) {
        if pos > self.array.len() as i64 {
            self.raw_set_int(pos, value);
            return;
        }
        if pos <= 0 {
            let _ = self.raw_set(TValue::from_number(pos as f64), value);
            return;
        }
        let i = (pos - 1) as usize;
        self.array.insert(i, value);
    }

    /// Remove and return the element at position `pos`, shifting later
    /// elements down. Out-of-range positions remove nothing.
    pub fn remove(&mut self, pos: i64) -> TValue {
        let alen = self.array.len();
        if alen == 0 {
            return TValue::nil();
        }
        let i = pos - 1;
        if i >= alen as i64 {
            TValue::nil()
        } else if i == alen as i64 - 1 || i < 0 {
            self.array.pop().unwrap_or(TValue::nil())
        } else {
            self.array.remove(i as usize)
        }
    }

    /// Successor of `key` in iteration order: the array part in ascending
    /// index order, then hash entries in insertion order. A nil key starts
    /// the iteration; `Ok(None)` marks its end; `Err(())` means the key is
    /// not present in the table.
    #[allow(clippy::result_unit_err)]
    pub fn next(&self, key: TValue) -> Result<Option<(TValue, TValue)>, ()> {
        let start = if key.is_nil() {
            Some(0)
        } else if let Some(n) = key.as_number() {
            match array_index(n) {
                Some(i) if i <= self.array.len() => Some(i),
                _ => None,
            }
        } else {
            None
        };

        if let Some(from) = start {
            for j in from..self.array.len() {
                if !self.array[j].is_nil() {
                    return Ok(Some((TValue::from_number((j + 1) as f64), self.array[j])));
                }
            }
            return Ok(self
                .hash
                .get_index(0)
                .map(|(&k, &v)| (key_to_value(k), v)));
        }

        let tk = match key_of(key) {
            Some(tk) => tk,
            None => return Err(()),
        };
        match self.hash.get_index_of(&tk) {
            Some(idx) => Ok(self
                .hash
                .get_index(idx + 1)
                .map(|(&k, &v)| (key_to_value(k), v))),
            None => Err(()),
        }
    }

    /// Number of live array slots (for capacity-aware bulk operations).
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Number of entries in the hash part.
    pub fn hash_len(&self) -> usize {
        self.hash.len()
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table(array={}, hash={})",
            self.array.len(),
            self.hash.len()
        )
    }
}
