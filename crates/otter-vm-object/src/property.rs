//! Property names, keys and per-property metadata

use crate::string::JsString;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

static ITERATOR_SYMBOL: LazyLock<Arc<Symbol>> =
    LazyLock::new(|| Arc::new(Symbol::create(Some("Symbol.iterator"), false)));

/// A JavaScript symbol
#[derive(Debug)]
pub struct Symbol {
    id: u64,
    description: Option<Arc<str>>,
    private: bool,
}

impl Symbol {
    fn create(description: Option<&str>, private: bool) -> Self {
        Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: description.map(Arc::from),
            private,
        }
    }

    /// Create a fresh public symbol
    pub fn new(description: Option<&str>) -> Arc<Self> {
        Arc::new(Self::create(description, false))
    }

    /// Create a private symbol (never visible on prototypes)
    pub fn private(description: Option<&str>) -> Arc<Self> {
        Arc::new(Self::create(description, true))
    }

    /// The well-known `Symbol.iterator`
    pub fn iterator() -> Arc<Self> {
        ITERATOR_SYMBOL.clone()
    }

    /// Unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Description text, if any
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Private symbols are own-only
    pub fn is_private(&self) -> bool {
        self.private
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

/// Property name (string or symbol)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Name {
    /// Internalized string name
    String(Arc<JsString>),
    /// Symbol name
    Symbol(Arc<Symbol>),
}

impl Name {
    /// Create a string name
    pub fn string(s: &str) -> Self {
        Self::String(JsString::intern(s))
    }

    /// Create a symbol name
    pub fn symbol(symbol: Arc<Symbol>) -> Self {
        Self::Symbol(symbol)
    }

    /// Whether this is a string name
    pub fn is_string(&self) -> bool {
        matches!(self, Name::String(_))
    }

    /// Whether this is a private symbol
    pub fn is_private(&self) -> bool {
        matches!(self, Name::Symbol(s) if s.is_private())
    }

    /// Whether this is `Symbol.iterator`
    pub fn is_iterator_symbol(&self) -> bool {
        matches!(self, Name::Symbol(s) if s.id() == ITERATOR_SYMBOL.id())
    }

    /// Canonical array index, if this string name is one
    pub fn as_array_index(&self) -> Option<u32> {
        match self {
            Name::String(s) => s.as_array_index(),
            Name::Symbol(_) => None,
        }
    }

    /// String content for string names
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Name::String(s) => Some(s.as_str()),
            Name::Symbol(_) => None,
        }
    }

    /// Stable hash used by the caches
    pub fn hash_value(&self) -> u64 {
        match self {
            Name::String(s) => s.hash_value(),
            Name::Symbol(s) => s.id().wrapping_mul(0x9E37_79B9_7F4A_7C15),
        }
    }

    /// Convert to a value
    pub fn to_value(&self) -> Value {
        match self {
            Name::String(s) => Value::String(s.clone()),
            Name::Symbol(s) => Value::Symbol(s.clone()),
        }
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_value());
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Name::String(s) => f.write_str(s.as_str()),
            Name::Symbol(s) => write!(f, "Symbol({})", s.description().unwrap_or("")),
        }
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

/// A normalized property key: either an element index or a name
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyKey {
    /// Element index
    Index(u32),
    /// Named property
    Name(Name),
}

impl PropertyKey {
    /// Build a key from a name, folding array-index strings into indices
    pub fn from_name(name: Name) -> Self {
        match name.as_array_index() {
            Some(index) => Self::Index(index),
            None => Self::Name(name),
        }
    }
}

/// Property attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyAttributes {
    /// Property is writable
    pub writable: bool,
    /// Property is enumerable
    pub enumerable: bool,
    /// Property is configurable
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Default data property attributes
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-writable, otherwise default
    pub const fn read_only() -> Self {
        Self {
            writable: false,
            enumerable: true,
            configurable: true,
        }
    }

    /// Attributes of built-in methods and accessors
    pub const fn builtin() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        Self::data()
    }
}

/// Data or accessor property
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    /// Holds a value
    Data,
    /// Holds a getter/setter
    Accessor,
}

/// Where a fast-mode property keeps its value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyLocation {
    /// In the object's field storage
    Field,
    /// In the shape's descriptor (constants and accessors)
    Descriptor,
}

/// Field representation tracked by shapes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Representation {
    /// No value stored yet
    None,
    /// Small integer
    Smi,
    /// Unboxed double
    Double,
    /// Any heap object other than a number
    HeapObject,
    /// Anything
    Tagged,
}

impl Representation {
    /// The most specific representation for `value`
    pub fn for_value(value: &Value) -> Self {
        match value {
            Value::Smi(_) => Representation::Smi,
            Value::HeapNumber(_) => Representation::Double,
            Value::String(_) | Value::Symbol(_) | Value::Object(_) => Representation::HeapObject,
            Value::Undefined | Value::Null | Value::Boolean(_) => Representation::HeapObject,
        }
    }

    /// Whether a field of this representation can hold `value` as is
    pub fn fits(self, value: &Value) -> bool {
        match self {
            Representation::None => false,
            Representation::Smi => matches!(value, Value::Smi(_)),
            Representation::Double => value.is_number(),
            Representation::HeapObject => !value.is_number(),
            Representation::Tagged => true,
        }
    }

    /// Least upper bound of two representations
    pub fn generalize(self, other: Representation) -> Representation {
        use Representation::*;
        match (self, other) {
            (None, r) | (r, None) => r,
            (a, b) if a == b => a,
            (Smi, Double) | (Double, Smi) => Double,
            _ => Tagged,
        }
    }
}

/// Where a field lives inside an object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldIndex {
    /// Property index across in-object and backing-store fields
    pub index: usize,
    /// Stored inside the object itself
    pub in_object: bool,
    /// Stored as an unboxed double
    pub is_double: bool,
}

impl FieldIndex {
    /// Build the index for property field `index` of a shape with
    /// `inobject_properties` in-object slots
    pub fn for_property(index: usize, inobject_properties: usize, representation: Representation) -> Self {
        Self {
            index,
            in_object: index < inobject_properties,
            is_double: representation == Representation::Double,
        }
    }
}

/// Built-in object slots exposed through native accessors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinField {
    /// `length` of a string or string wrapper
    StringLength,
    /// `length` of a JS array
    ArrayLength,
}

/// Per-property metadata kept in shape descriptors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyDetails {
    /// Data or accessor
    pub kind: PropertyKind,
    /// Field or descriptor
    pub location: PropertyLocation,
    /// Field representation (fields only)
    pub representation: Representation,
    /// Attributes
    pub attributes: PropertyAttributes,
    /// Property field index (fields only)
    pub field_index: usize,
}

impl PropertyDetails {
    /// Details of a data field
    pub fn field(field_index: usize, representation: Representation, attributes: PropertyAttributes) -> Self {
        Self {
            kind: PropertyKind::Data,
            location: PropertyLocation::Field,
            representation,
            attributes,
            field_index,
        }
    }

    /// Details of a descriptor-held constant or accessor
    pub fn descriptor(kind: PropertyKind, attributes: PropertyAttributes) -> Self {
        Self {
            kind,
            location: PropertyLocation::Descriptor,
            representation: Representation::Tagged,
            attributes,
            field_index: 0,
        }
    }

    /// Not writable
    pub fn is_read_only(&self) -> bool {
        !self.attributes.writable
    }
}

/// Strictness of the code performing a store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LanguageMode {
    /// Failed stores are silently ignored
    #[default]
    Sloppy,
    /// Failed stores throw
    Strict,
}
