//! Prototype chain validity cells and global property cells

use crate::accessors::AccessorPair;
use crate::property::{Name, PropertyAttributes};
use crate::value::Value;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Token proving that a prototype chain segment is structurally unchanged
///
/// A cell starts valid and is invalidated exactly once; a fresh cell is
/// created for the chain the next time one is requested.
#[derive(Debug)]
pub struct ValidityCell {
    id: u64,
    valid: AtomicBool,
}

impl ValidityCell {
    /// Create a valid cell
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed),
            valid: AtomicBool::new(true),
        })
    }

    /// Cell id, for tracing
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Still valid
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the chain as changed
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

/// Contents of a global property cell
#[derive(Clone, Debug)]
pub enum CellContents {
    /// No property; the cell records a negative lookup
    Hole,
    /// Data property
    Data(Value),
    /// Accessor property
    Accessor(Arc<AccessorPair>),
}

/// Storage for one global object property
///
/// Caches hold cells weakly. A cell whose property is deleted becomes a
/// hole and is dropped from the global dictionary.
#[derive(Debug)]
pub struct PropertyCell {
    name: Name,
    contents: RwLock<CellContents>,
    attributes: RwLock<PropertyAttributes>,
}

impl PropertyCell {
    /// Create an empty cell
    pub fn empty(name: Name) -> Arc<Self> {
        Arc::new(Self {
            name,
            contents: RwLock::new(CellContents::Hole),
            attributes: RwLock::new(PropertyAttributes::data()),
        })
    }

    /// Property name
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Whether the cell holds no property
    pub fn is_hole(&self) -> bool {
        matches!(*self.contents.read(), CellContents::Hole)
    }

    /// Current contents
    pub fn contents(&self) -> CellContents {
        self.contents.read().clone()
    }

    /// Data value, if this is a data property
    pub fn value(&self) -> Option<Value> {
        match &*self.contents.read() {
            CellContents::Data(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Attributes
    pub fn attributes(&self) -> PropertyAttributes {
        *self.attributes.read()
    }

    /// Replace contents and attributes
    pub fn set(&self, contents: CellContents, attributes: PropertyAttributes) {
        *self.contents.write() = contents;
        *self.attributes.write() = attributes;
    }

    /// Overwrite the value of a data property
    pub fn set_value(&self, value: Value) {
        *self.contents.write() = CellContents::Data(value);
    }

    /// Turn the cell into a hole
    pub fn invalidate(&self) {
        *self.contents.write() = CellContents::Hole;
    }
}
