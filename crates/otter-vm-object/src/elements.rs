//! Elements kinds and indexed backing stores

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Largest hole an array may grow over before it becomes a dictionary
pub const MAX_GAP: u32 = 1024;

/// Arrays longer than this are never kept in fast mode
pub const MAX_FAST_ARRAY_LENGTH: u32 = 32 * 1024 * 1024;

/// Capacity after growing a fast backing store past `old_capacity`
pub fn new_elements_capacity(old_capacity: u32) -> u32 {
    old_capacity + (old_capacity >> 1) + 16
}

/// Typed array element type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypedArrayKind {
    /// Int8Array
    Int8,
    /// Uint8Array
    Uint8,
    /// Uint8ClampedArray
    Uint8Clamped,
    /// Int16Array
    Int16,
    /// Uint16Array
    Uint16,
    /// Int32Array
    Int32,
    /// Uint32Array
    Uint32,
    /// Float32Array
    Float32,
    /// Float64Array
    Float64,
}

impl TypedArrayKind {
    /// Every typed array kind
    pub const ALL: [TypedArrayKind; 9] = [
        TypedArrayKind::Int8,
        TypedArrayKind::Uint8,
        TypedArrayKind::Uint8Clamped,
        TypedArrayKind::Int16,
        TypedArrayKind::Uint16,
        TypedArrayKind::Int32,
        TypedArrayKind::Uint32,
        TypedArrayKind::Float32,
        TypedArrayKind::Float64,
    ];

    /// Convert a number to the value an element of this kind stores
    pub fn coerce(self, n: f64) -> f64 {
        fn wrap(n: f64, bits: u32, signed: bool) -> f64 {
            if !n.is_finite() {
                return 0.0;
            }
            let modulus = 2f64.powi(bits as i32);
            let mut v = n.trunc() % modulus;
            if v < 0.0 {
                v += modulus;
            }
            if signed && v >= modulus / 2.0 {
                v -= modulus;
            }
            v
        }
        match self {
            TypedArrayKind::Int8 => wrap(n, 8, true),
            TypedArrayKind::Uint8 => wrap(n, 8, false),
            TypedArrayKind::Uint8Clamped => {
                if n.is_nan() {
                    0.0
                } else {
                    n.clamp(0.0, 255.0).round_ties_even()
                }
            }
            TypedArrayKind::Int16 => wrap(n, 16, true),
            TypedArrayKind::Uint16 => wrap(n, 16, false),
            TypedArrayKind::Int32 => wrap(n, 32, true),
            TypedArrayKind::Uint32 => wrap(n, 32, false),
            TypedArrayKind::Float32 => n as f32 as f64,
            TypedArrayKind::Float64 => n,
        }
    }
}

/// Representation class of an object's indexed storage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementsKind {
    /// Small integers, no holes
    PackedSmi,
    /// Small integers with holes
    HoleySmi,
    /// Any values, no holes
    Packed,
    /// Any values with holes
    Holey,
    /// Doubles, no holes
    PackedDouble,
    /// Doubles with holes
    HoleyDouble,
    /// Sparse dictionary
    Dictionary,
    /// Arguments object aliasing the activation record
    SloppyArguments,
    /// Characters of a string wrapper
    StringWrapper,
    /// Typed array storage
    Typed(TypedArrayKind),
}

impl ElementsKind {
    /// Smi, double or object kinds
    pub fn is_fast(self) -> bool {
        matches!(
            self,
            ElementsKind::PackedSmi
                | ElementsKind::HoleySmi
                | ElementsKind::Packed
                | ElementsKind::Holey
                | ElementsKind::PackedDouble
                | ElementsKind::HoleyDouble
        )
    }

    /// Smi-only kinds
    pub fn is_smi(self) -> bool {
        matches!(self, ElementsKind::PackedSmi | ElementsKind::HoleySmi)
    }

    /// Double kinds
    pub fn is_double(self) -> bool {
        matches!(self, ElementsKind::PackedDouble | ElementsKind::HoleyDouble)
    }

    /// Generic object kinds
    pub fn is_object(self) -> bool {
        matches!(self, ElementsKind::Packed | ElementsKind::Holey)
    }

    /// Holey fast kinds
    pub fn is_holey(self) -> bool {
        matches!(
            self,
            ElementsKind::HoleySmi | ElementsKind::Holey | ElementsKind::HoleyDouble
        )
    }

    /// Typed array kinds
    pub fn is_typed(self) -> bool {
        matches!(self, ElementsKind::Typed(_))
    }

    /// Holey variant of a fast kind
    pub fn to_holey(self) -> Self {
        match self {
            ElementsKind::PackedSmi => ElementsKind::HoleySmi,
            ElementsKind::Packed => ElementsKind::Holey,
            ElementsKind::PackedDouble => ElementsKind::HoleyDouble,
            other => other,
        }
    }

    /// Double kind with the same packedness
    pub fn to_double(self) -> Self {
        if self.is_holey() {
            ElementsKind::HoleyDouble
        } else {
            ElementsKind::PackedDouble
        }
    }

    /// Object kind with the same packedness
    pub fn to_object(self) -> Self {
        if self.is_holey() {
            ElementsKind::Holey
        } else {
            ElementsKind::Packed
        }
    }

    fn value_rank(self) -> u8 {
        if self.is_smi() {
            0
        } else if self.is_double() {
            1
        } else {
            2
        }
    }

    /// Whether `to` is a strictly more general fast kind than `self`
    pub fn is_more_general_transition(self, to: ElementsKind) -> bool {
        if !self.is_fast() || !to.is_fast() || self == to {
            return false;
        }
        if self.is_holey() && !to.is_holey() {
            return false;
        }
        // Doubles never go back to smis and objects never to doubles.
        if self.is_double() && to.is_smi() {
            return false;
        }
        to.value_rank() >= self.value_rank()
    }

    /// Least general fast kind able to hold `value`, keeping packedness
    pub fn for_value(self, value: &Value) -> Self {
        if !self.is_fast() {
            return self;
        }
        if self.is_smi() {
            match value {
                Value::Smi(_) => self,
                Value::HeapNumber(_) => self.to_double(),
                _ => self.to_object(),
            }
        } else if self.is_double() {
            if value.is_number() { self } else { self.to_object() }
        } else {
            self
        }
    }

    /// Whether a store of `value` needs no elements kind change
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ElementsKind::PackedSmi | ElementsKind::HoleySmi => value.is_smi(),
            ElementsKind::PackedDouble | ElementsKind::HoleyDouble => value.is_number(),
            _ => true,
        }
    }
}

/// A fast elements slot
#[derive(Clone, Debug)]
pub enum Element {
    /// Missing element; lookups continue on the prototype chain
    Hole,
    /// Present element
    Value(Value),
}

impl Element {
    /// The value, if present
    pub fn value(&self) -> Option<&Value> {
        match self {
            Element::Hole => None,
            Element::Value(v) => Some(v),
        }
    }
}

/// Indexed backing store
#[derive(Clone, Debug)]
pub enum ElementsStore {
    /// Fast contiguous slots; shared between arrays when copy-on-write
    Fast {
        /// Slots up to the capacity
        slots: Arc<Vec<Element>>,
        /// Shared with another array; copy before writing
        copy_on_write: bool,
    },
    /// Sparse elements
    Dictionary(BTreeMap<u32, Value>),
    /// Typed array contents
    Typed(Vec<f64>),
}

impl Default for ElementsStore {
    fn default() -> Self {
        ElementsStore::Fast {
            slots: Arc::new(Vec::new()),
            copy_on_write: false,
        }
    }
}

impl ElementsStore {
    /// Fast store from values
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        ElementsStore::Fast {
            slots: Arc::new(values.into_iter().map(Element::Value).collect()),
            copy_on_write: false,
        }
    }

    /// Capacity of a fast store, length of a typed store
    pub fn capacity(&self) -> u32 {
        match self {
            ElementsStore::Fast { slots, .. } => slots.len() as u32,
            ElementsStore::Dictionary(_) => 0,
            ElementsStore::Typed(data) => data.len() as u32,
        }
    }

    /// Shared copy-on-write store
    pub fn is_copy_on_write(&self) -> bool {
        matches!(self, ElementsStore::Fast { copy_on_write: true, .. })
    }

    /// Raw slot read
    pub fn get(&self, index: u32) -> Option<Element> {
        match self {
            ElementsStore::Fast { slots, .. } => slots.get(index as usize).cloned(),
            ElementsStore::Dictionary(map) => Some(map.get(&index).cloned().map_or(Element::Hole, Element::Value)),
            ElementsStore::Typed(data) => data.get(index as usize).map(|n| Element::Value(Value::number(*n))),
        }
    }

    /// Mutable fast slots, copying a copy-on-write store first
    pub fn fast_slots_mut(&mut self) -> Option<&mut Vec<Element>> {
        match self {
            ElementsStore::Fast { slots, copy_on_write } => {
                if *copy_on_write {
                    *slots = Arc::new(slots.as_ref().clone());
                    *copy_on_write = false;
                }
                Some(Arc::make_mut(slots))
            }
            _ => None,
        }
    }

    /// Share this fast store with another array, marking both copy-on-write
    pub fn share_copy_on_write(&mut self) -> Option<ElementsStore> {
        match self {
            ElementsStore::Fast { slots, copy_on_write } => {
                *copy_on_write = true;
                Some(ElementsStore::Fast {
                    slots: slots.clone(),
                    copy_on_write: true,
                })
            }
            _ => None,
        }
    }

    /// Whether two stores share the same fast backing
    pub fn shares_backing_with(&self, other: &ElementsStore) -> bool {
        match (self, other) {
            (ElementsStore::Fast { slots: a, .. }, ElementsStore::Fast { slots: b, .. }) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_more_general_transition() {
        use ElementsKind::*;
        assert!(PackedSmi.is_more_general_transition(HoleySmi));
        assert!(PackedSmi.is_more_general_transition(PackedDouble));
        assert!(HoleySmi.is_more_general_transition(Holey));
        assert!(!HoleySmi.is_more_general_transition(PackedDouble));
        assert!(!PackedDouble.is_more_general_transition(PackedSmi));
        assert!(!Packed.is_more_general_transition(PackedDouble));
        assert!(!Packed.is_more_general_transition(Packed));
    }

    #[test]
    fn test_for_value() {
        use ElementsKind::*;
        assert_eq!(PackedSmi.for_value(&Value::HeapNumber(1.5)), PackedDouble);
        assert_eq!(HoleySmi.for_value(&Value::string("a")), Holey);
        assert_eq!(PackedDouble.for_value(&Value::Smi(3)), PackedDouble);
    }

    #[test]
    fn test_typed_coerce() {
        assert_eq!(TypedArrayKind::Uint8.coerce(257.0), 1.0);
        assert_eq!(TypedArrayKind::Int8.coerce(200.0), -56.0);
        assert_eq!(TypedArrayKind::Uint8Clamped.coerce(300.0), 255.0);
        assert_eq!(TypedArrayKind::Int32.coerce(f64::NAN), 0.0);
    }

    #[test]
    fn test_copy_on_write() {
        let mut a = ElementsStore::from_values([Value::Smi(1), Value::Smi(2)]);
        let b = a.share_copy_on_write().unwrap();
        assert!(a.shares_backing_with(&b));
        a.fast_slots_mut().unwrap()[0] = Element::Value(Value::Smi(9));
        assert!(!a.shares_backing_with(&b));
        assert!(!a.is_copy_on_write());
        assert_eq!(b.get(0).unwrap().value(), Some(&Value::Smi(1)));
    }
}
