//! JavaScript objects
//!
//! An object is its shape plus storage: in-object and out-of-object field
//! slots for fast-mode properties, a name dictionary for dictionary-mode
//! objects, property cells for the global object and an elements backing
//! store. Objects used as prototypes own a validity cell that every shape
//! change invalidates, together with the cells of objects further down the
//! chain that registered as users.

use crate::accessors::{AccessorPair, FunctionData, NativeAccessor};
use crate::elements::{ElementsKind, ElementsStore, MAX_FAST_ARRAY_LENGTH, MAX_GAP, new_elements_capacity};
use crate::error::VmResult;
use crate::property::{FieldIndex, Name, PropertyAttributes, PropertyKey};
use crate::shape::{DescriptorValue, ShapeRef};
use crate::string::JsString;
use crate::validity::{CellContents, PropertyCell, ValidityCell};
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Proxy `get` trap: `(target, key, receiver)`
pub type ProxyGetTrap = Arc<dyn Fn(&JsObject, &PropertyKey, &Value) -> VmResult<Value> + Send + Sync>;

/// Proxy `set` trap: `(target, key, value, receiver)`
pub type ProxySetTrap = Arc<dyn Fn(&JsObject, &PropertyKey, Value, &Value) -> VmResult<bool> + Send + Sync>;

/// Proxy internals
pub struct ProxyData {
    /// Target object
    pub target: JsObject,
    /// `get` trap; forwards to the target when absent
    pub get: Option<ProxyGetTrap>,
    /// `set` trap; forwards to the target when absent
    pub set: Option<ProxySetTrap>,
}

/// Module namespace exports; `None` marks an uninitialized binding
pub struct ModuleExports {
    /// Export names
    pub names: Vec<Name>,
    cells: Vec<RwLock<Option<Value>>>,
}

impl ModuleExports {
    pub(crate) fn new(names: Vec<Name>, cells: Vec<RwLock<Option<Value>>>) -> Self {
        Self { names, cells }
    }

    /// Read export `index`
    pub fn get(&self, index: usize) -> Option<Value> {
        self.cells.get(index).and_then(|c| c.read().clone())
    }

    /// Initialize or update export `index`
    pub fn set(&self, index: usize, value: Value) {
        if let Some(cell) = self.cells.get(index) {
            *cell.write() = Some(value);
        }
    }
}

/// Sloppy-mode arguments object internals
pub struct ArgumentsData {
    /// Activation record the mapped indices alias
    pub context: Arc<RwLock<Vec<Value>>>,
    /// Indices below this read and write the context
    pub mapped_count: u32,
}

/// Host data attached to special objects
pub enum ObjectKind {
    /// Ordinary object or array
    Ordinary,
    /// Function
    Function(FunctionData),
    /// Proxy
    Proxy(ProxyData),
    /// String wrapper
    StringWrapper(Arc<JsString>),
    /// Module namespace
    ModuleNamespace(ModuleExports),
    /// Arguments object
    Arguments(ArgumentsData),
    /// Global object
    Global,
}

/// Value of a dictionary-mode property
#[derive(Clone, Debug)]
pub enum DictionaryValue {
    /// Data property
    Data(Value),
    /// JS accessor pair
    Accessor(Arc<AccessorPair>),
    /// Native accessor
    Native(Arc<NativeAccessor>),
}

/// Dictionary-mode property entry
#[derive(Clone, Debug)]
pub struct DictionaryEntry {
    /// Value or accessor
    pub value: DictionaryValue,
    /// Attributes
    pub attributes: PropertyAttributes,
}

#[derive(Default)]
struct PrototypeInfo {
    validity_cell: Option<Arc<ValidityCell>>,
    users: Vec<WeakObject>,
    registered_with: Option<u64>,
}

struct ObjectState {
    shape: ShapeRef,
    inobject: Vec<Value>,
    out_of_object: Vec<Value>,
    dictionary: Option<IndexMap<Name, DictionaryEntry>>,
    cells: Option<IndexMap<Name, Arc<PropertyCell>>>,
    elements: ElementsStore,
    length: u32,
}

struct ObjectData {
    state: RwLock<ObjectState>,
    kind: ObjectKind,
    is_prototype: AtomicBool,
    access_allowed: AtomicBool,
    prototype_info: Mutex<PrototypeInfo>,
    elements_protector: OnceLock<Arc<ValidityCell>>,
}

/// A JavaScript object handle
#[derive(Clone)]
pub struct JsObject(Arc<ObjectData>);

/// Weak object reference
#[derive(Clone, Debug, Default)]
pub struct WeakObject(Weak<ObjectData>);

impl WeakObject {
    /// Upgrade if the object is alive
    pub fn upgrade(&self) -> Option<JsObject> {
        self.0.upgrade().map(JsObject)
    }

    /// Whether the object is still alive
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Whether this refers to `obj`
    pub fn refers_to(&self, obj: &JsObject) -> bool {
        Weak::as_ptr(&self.0) == Arc::as_ptr(&obj.0)
    }
}

impl std::fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ObjectData")
    }
}

impl JsObject {
    /// Create an object with `shape` and host data `kind`
    pub fn new(shape: ShapeRef, kind: ObjectKind) -> Self {
        let dictionary = (shape.is_dictionary_map() && !shape.is_js_global_object_map()).then(IndexMap::new);
        let cells = shape.is_js_global_object_map().then(IndexMap::new);
        let elements = match shape.elements_kind() {
            ElementsKind::Dictionary => ElementsStore::Dictionary(BTreeMap::new()),
            ElementsKind::Typed(_) => ElementsStore::Typed(Vec::new()),
            _ => ElementsStore::default(),
        };
        let state = ObjectState {
            inobject: vec![Value::Undefined; shape.inobject_properties()],
            out_of_object: vec![Value::Undefined; shape.out_of_object_capacity()],
            shape,
            dictionary,
            cells,
            elements,
            length: 0,
        };
        JsObject(Arc::new(ObjectData {
            state: RwLock::new(state),
            kind,
            is_prototype: AtomicBool::new(false),
            access_allowed: AtomicBool::new(true),
            prototype_info: Mutex::new(PrototypeInfo::default()),
            elements_protector: OnceLock::new(),
        }))
    }

    /// Stable identity while the object is alive
    pub fn id(&self) -> u64 {
        Arc::as_ptr(&self.0) as usize as u64
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &JsObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Weak reference
    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Arc::downgrade(&self.0))
    }

    /// Current shape
    #[inline]
    pub fn shape(&self) -> ShapeRef {
        self.0.state.read().shape.clone()
    }

    /// Prototype
    pub fn prototype(&self) -> Option<JsObject> {
        self.0.state.read().shape.prototype().cloned()
    }

    /// Host data
    pub fn kind(&self) -> &ObjectKind {
        &self.0.kind
    }

    /// Function internals
    pub fn function_data(&self) -> Option<&FunctionData> {
        match &self.0.kind {
            ObjectKind::Function(data) => Some(data),
            _ => None,
        }
    }

    /// Proxy internals
    pub fn proxy_data(&self) -> Option<&ProxyData> {
        match &self.0.kind {
            ObjectKind::Proxy(data) => Some(data),
            _ => None,
        }
    }

    /// Wrapped string of a string wrapper
    pub fn wrapped_string(&self) -> Option<&Arc<JsString>> {
        match &self.0.kind {
            ObjectKind::StringWrapper(s) => Some(s),
            _ => None,
        }
    }

    /// Module namespace exports
    pub fn module_exports(&self) -> Option<&ModuleExports> {
        match &self.0.kind {
            ObjectKind::ModuleNamespace(exports) => Some(exports),
            _ => None,
        }
    }

    /// Arguments object internals
    pub fn arguments_data(&self) -> Option<&ArgumentsData> {
        match &self.0.kind {
            ObjectKind::Arguments(data) => Some(data),
            _ => None,
        }
    }

    // ---------------------------------------------------------------------
    // Shape changes
    // ---------------------------------------------------------------------

    /// Move the object to `shape`, growing storage as needed. Changing the
    /// shape of a prototype invalidates the chains depending on it.
    pub fn set_shape(&self, shape: ShapeRef) {
        let old = {
            let mut state = self.0.state.write();
            let needed = shape.out_of_object_capacity();
            if state.out_of_object.len() < needed {
                state.out_of_object.resize(needed, Value::Undefined);
            }
            if state.inobject.len() < shape.inobject_properties() {
                let inobject = shape.inobject_properties();
                state.inobject.resize(inobject, Value::Undefined);
            }
            std::mem::replace(&mut state.shape, shape)
        };
        if old.is_prototype_map() {
            old.mark_abandoned();
        }
        if self.is_prototype() {
            self.invalidate_prototype_chains();
        }
    }

    /// Migrate off a deprecated shape. Returns whether anything changed.
    pub fn migrate_instance(&self) -> bool {
        let shape = self.shape();
        if !shape.is_deprecated() {
            return false;
        }
        self.set_shape(shape.update());
        true
    }

    /// Grow the out-of-object backing store by `additional` slots
    pub fn extend_property_backing_store(&self, additional: usize) {
        let mut state = self.0.state.write();
        let len = state.out_of_object.len() + additional;
        state.out_of_object.resize(len, Value::Undefined);
    }

    /// Current out-of-object backing store length
    pub fn out_of_object_len(&self) -> usize {
        self.0.state.read().out_of_object.len()
    }

    /// Switch to dictionary-mode properties
    pub fn normalize_properties(&self) {
        let shape = self.shape();
        if shape.is_dictionary_map() {
            return;
        }
        let mut dictionary = IndexMap::new();
        {
            let state = self.0.state.read();
            for (i, descriptor) in shape.descriptors().iter().enumerate() {
                let value = match &descriptor.value {
                    DescriptorValue::Field => {
                        let Some(index) = shape.field_index(i) else { continue };
                        DictionaryValue::Data(Self::read_field_locked(&state, index).unwrap_or_default())
                    }
                    DescriptorValue::Constant(v) => DictionaryValue::Data(v.clone()),
                    DescriptorValue::AccessorPair(pair) => DictionaryValue::Accessor(pair.clone()),
                    DescriptorValue::Native(info) => DictionaryValue::Native(info.clone()),
                };
                dictionary.insert(
                    descriptor.name.clone(),
                    DictionaryEntry {
                        value,
                        attributes: descriptor.details.attributes,
                    },
                );
            }
        }
        let normalized = shape.normalize();
        {
            let mut state = self.0.state.write();
            state.dictionary = Some(dictionary);
            state.inobject.iter_mut().for_each(|v| *v = Value::Undefined);
            state.out_of_object.clear();
        }
        self.set_shape(normalized);
    }

    /// Make the object non-extensible
    pub fn prevent_extensions(&self) {
        let shape = self.shape();
        if shape.is_extensible() {
            self.set_shape(shape.copy_for_prevent_extensions());
        }
    }

    /// New properties may be added
    pub fn is_extensible(&self) -> bool {
        self.0.state.read().shape.is_extensible()
    }

    // ---------------------------------------------------------------------
    // Fast properties
    // ---------------------------------------------------------------------

    fn read_field_locked(state: &ObjectState, index: FieldIndex) -> Option<Value> {
        if index.in_object {
            state.inobject.get(index.index).cloned()
        } else {
            let offset = index.index.checked_sub(state.shape.inobject_properties())?;
            state.out_of_object.get(offset).cloned()
        }
    }

    /// Read a field slot
    pub fn read_field(&self, index: FieldIndex) -> Option<Value> {
        Self::read_field_locked(&self.0.state.read(), index)
    }

    /// Write a field slot. Fails if the slot does not exist.
    pub fn write_field(&self, index: FieldIndex, value: Value) -> bool {
        let mut state = self.0.state.write();
        let slot = if index.in_object {
            state.inobject.get_mut(index.index)
        } else {
            let inobject = state.shape.inobject_properties();
            match index.index.checked_sub(inobject) {
                Some(offset) => state.out_of_object.get_mut(offset),
                None => None,
            }
        };
        match slot {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Move to `shape` and write the new field in one step. Fails without
    /// changes if the object's shape is not `expected` any more.
    pub fn transition_and_write_field(&self, expected: &ShapeRef, shape: ShapeRef, index: FieldIndex, value: Value) -> bool {
        {
            let state = self.0.state.read();
            if !Arc::ptr_eq(&state.shape, expected) {
                return false;
            }
        }
        self.set_shape(shape);
        self.write_field(index, value)
    }

    // ---------------------------------------------------------------------
    // Dictionary properties
    // ---------------------------------------------------------------------

    /// Dictionary entry for `name`
    pub fn dictionary_get(&self, name: &Name) -> Option<DictionaryEntry> {
        self.0.state.read().dictionary.as_ref()?.get(name).cloned()
    }

    /// Whether the dictionary holds `name`
    pub fn dictionary_contains(&self, name: &Name) -> bool {
        self.0
            .state
            .read()
            .dictionary
            .as_ref()
            .is_some_and(|d| d.contains_key(name))
    }

    /// Overwrite an existing writable data entry
    pub fn dictionary_set_value(&self, name: &Name, value: Value) -> bool {
        let mut state = self.0.state.write();
        let Some(entry) = state.dictionary.as_mut().and_then(|d| d.get_mut(name)) else {
            return false;
        };
        if !entry.attributes.writable || !matches!(entry.value, DictionaryValue::Data(_)) {
            return false;
        }
        entry.value = DictionaryValue::Data(value);
        true
    }

    /// Insert or replace an entry
    pub fn dictionary_insert(&self, name: Name, entry: DictionaryEntry) {
        let mut state = self.0.state.write();
        state.dictionary.get_or_insert_with(IndexMap::new).insert(name, entry);
    }

    /// Remove an entry
    pub fn dictionary_remove(&self, name: &Name) -> Option<DictionaryEntry> {
        self.0.state.write().dictionary.as_mut()?.shift_remove(name)
    }

    // ---------------------------------------------------------------------
    // Global property cells
    // ---------------------------------------------------------------------

    /// Property cell for `name`, including empty (hole) cells
    pub fn property_cell(&self, name: &Name) -> Option<Arc<PropertyCell>> {
        self.0.state.read().cells.as_ref()?.get(name).cloned()
    }

    /// Cell for `name`, creating an empty one that records the absence
    pub fn ensure_empty_property_cell(&self, name: &Name) -> Arc<PropertyCell> {
        let mut state = self.0.state.write();
        let cells = state.cells.get_or_insert_with(IndexMap::new);
        cells
            .entry(name.clone())
            .or_insert_with(|| PropertyCell::empty(name.clone()))
            .clone()
    }

    /// Delete a global property; its cell becomes a hole and is dropped
    pub fn delete_property_cell(&self, name: &Name) -> bool {
        let removed = self.0.state.write().cells.as_mut().and_then(|c| c.shift_remove(name));
        match removed {
            Some(cell) => {
                cell.invalidate();
                true
            }
            None => false,
        }
    }

    /// Define a global property in a (possibly pre-existing empty) cell
    pub fn define_property_cell(&self, name: &Name, contents: CellContents, attributes: PropertyAttributes) -> Arc<PropertyCell> {
        let cell = self.ensure_empty_property_cell(name);
        cell.set(contents, attributes);
        cell
    }

    // ---------------------------------------------------------------------
    // Elements
    // ---------------------------------------------------------------------

    /// Elements kind
    pub fn elements_kind(&self) -> ElementsKind {
        self.0.state.read().shape.elements_kind()
    }

    /// Is a JS array
    pub fn is_js_array(&self) -> bool {
        self.0.state.read().shape.is_js_array_map()
    }

    /// Run `f` on the elements store
    pub fn with_elements<R>(&self, f: impl FnOnce(&ElementsStore) -> R) -> R {
        f(&self.0.state.read().elements)
    }

    /// Run `f` on the mutable elements store and length
    pub fn with_elements_mut<R>(&self, f: impl FnOnce(&mut ElementsStore, &mut u32) -> R) -> R {
        let result = {
            let mut guard = self.0.state.write();
            let state = &mut *guard;
            f(&mut state.elements, &mut state.length)
        };
        if let Some(protector) = self.0.elements_protector.get() {
            protector.invalidate();
        }
        result
    }

    /// Replace the elements store
    pub fn set_elements(&self, elements: ElementsStore, length: u32) {
        let mut state = self.0.state.write();
        state.elements = elements;
        state.length = length;
    }

    /// Array length or typed array length
    pub fn length(&self) -> u32 {
        self.0.state.read().length
    }

    /// Backing store capacity
    pub fn elements_capacity(&self) -> u32 {
        self.0.state.read().elements.capacity()
    }

    /// Elements backed by a copy-on-write store
    pub fn has_copy_on_write_elements(&self) -> bool {
        self.0.state.read().elements.is_copy_on_write()
    }

    /// Whether storing at `index` would push fast elements into
    /// dictionary mode
    pub fn would_convert_to_slow_elements(&self, index: u32) -> bool {
        let state = self.0.state.read();
        if !state.shape.elements_kind().is_fast() {
            return false;
        }
        should_convert_to_slow_elements(state.elements.capacity(), index)
    }

    /// Change the elements kind, converting the backing store if needed
    pub fn transition_elements_kind(&self, kind: ElementsKind) {
        let shape = self.shape();
        if shape.elements_kind() == kind {
            return;
        }
        if kind == ElementsKind::Dictionary {
            let mut state = self.0.state.write();
            let mut dictionary = BTreeMap::new();
            if let ElementsStore::Fast { slots, .. } = &state.elements {
                for (i, slot) in slots.iter().enumerate() {
                    if let Some(v) = slot.value() {
                        dictionary.insert(i as u32, v.clone());
                    }
                }
            }
            state.elements = ElementsStore::Dictionary(dictionary);
        }
        self.set_shape(shape.transition_elements_to(kind));
    }

    /// Share this array's fast backing store with a new array of the same
    /// shape, as array literals do
    pub fn clone_with_copy_on_write_elements(&self) -> Option<JsObject> {
        let shape = self.shape();
        let (elements, length) = {
            let mut state = self.0.state.write();
            let elements = state.elements.share_copy_on_write()?;
            (elements, state.length)
        };
        let copy = JsObject::new(shape, ObjectKind::Ordinary);
        copy.set_elements(elements, length);
        Some(copy)
    }

    /// Whether two objects share one fast backing store
    pub fn shares_elements_with(&self, other: &JsObject) -> bool {
        let a = self.0.state.read();
        let b = other.0.state.read();
        a.elements.shares_backing_with(&b.elements)
    }

    pub(crate) fn set_elements_protector(&self, cell: Arc<ValidityCell>) {
        let _ = self.0.elements_protector.set(cell);
    }

    // ---------------------------------------------------------------------
    // Access checks
    // ---------------------------------------------------------------------

    /// Whether the current context may access this object
    pub fn has_access(&self) -> bool {
        self.0.access_allowed.load(Ordering::Acquire)
    }

    /// Grant or revoke access
    pub fn set_access_allowed(&self, allowed: bool) {
        self.0.access_allowed.store(allowed, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // Prototype bookkeeping
    // ---------------------------------------------------------------------

    /// Used as some shape's prototype
    pub fn is_prototype(&self) -> bool {
        self.0.is_prototype.load(Ordering::Acquire)
    }

    /// Mark as a prototype, moving to an unshared prototype map
    pub fn make_prototype(&self) {
        if self.0.is_prototype.swap(true, Ordering::AcqRel) {
            return;
        }
        let shape = self.shape();
        if !shape.is_prototype_map() {
            let mut state = self.0.state.write();
            state.shape = shape.copy_as_prototype_map();
        }
    }

    /// Change the prototype
    pub fn set_prototype(&self, prototype: Option<JsObject>) {
        if let Some(proto) = &prototype {
            proto.make_prototype();
        }
        let next = self.shape().transition_to_prototype(prototype);
        let next = if self.is_prototype() && !next.is_prototype_map() {
            next.copy_as_prototype_map()
        } else {
            next
        };
        self.set_shape(next);
    }

    fn register_user(&self, user: &JsObject) {
        let mut info = self.0.prototype_info.lock();
        if !info.users.iter().any(|u| u.refers_to(user)) {
            info.users.retain(WeakObject::is_alive);
            info.users.push(user.downgrade());
        }
    }

    /// Validity cell covering the prototype chain of `shape`
    ///
    /// `None` when the shape has no prototype. Every prototype on the
    /// chain registers as a user of the next so that changes further up
    /// invalidate the returned cell.
    pub fn prototype_chain_validity_cell(shape: &ShapeRef) -> Option<Arc<ValidityCell>> {
        let prototype = shape.prototype()?.clone();
        prototype.make_prototype();
        let mut current = prototype.clone();
        loop {
            let Some(next) = current.prototype() else { break };
            next.make_prototype();
            {
                let mut info = current.0.prototype_info.lock();
                if info.registered_with == Some(next.id()) {
                    break;
                }
                info.registered_with = Some(next.id());
            }
            next.register_user(&current);
            current = next;
        }
        let mut info = prototype.0.prototype_info.lock();
        match &info.validity_cell {
            Some(cell) if cell.is_valid() => Some(cell.clone()),
            _ => {
                let cell = ValidityCell::new();
                info.validity_cell = Some(cell.clone());
                Some(cell)
            }
        }
    }

    /// Invalidate this prototype's cell and those of its users
    pub fn invalidate_prototype_chains(&self) {
        let users = {
            let mut info = self.0.prototype_info.lock();
            if let Some(cell) = info.validity_cell.take() {
                tracing::trace!(target: "otter::shape", cell = cell.id(), object = self.id(), "invalidating prototype chain");
                cell.invalidate();
            }
            info.users.retain(WeakObject::is_alive);
            info.users.clone()
        };
        for user in users {
            if let Some(user) = user.upgrade() {
                user.invalidate_prototype_chains();
            }
        }
    }
}

/// Fast-elements growth policy
pub fn should_convert_to_slow_elements(capacity: u32, index: u32) -> bool {
    if index < capacity {
        return false;
    }
    if index - capacity >= MAX_GAP {
        return true;
    }
    new_elements_capacity(index.saturating_add(1)) > MAX_FAST_ARRAY_LENGTH
}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.state.try_read() {
            Some(state) => write!(f, "JsObject({:#x}, shape={})", self.id(), state.shape.id().as_u64()),
            None => write!(f, "JsObject({:#x})", self.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{InstanceType, Shape};

    #[test]
    fn test_fields_and_storage_growth() {
        let root = Shape::builder(InstanceType::Object).inobject_properties(1).build();
        let obj = JsObject::new(root.clone(), ObjectKind::Ordinary);
        let (s1, _) = root.transition_to_data_field(&Name::string("a"), &Value::Smi(1), PropertyAttributes::data());
        obj.set_shape(s1.clone());
        assert!(obj.write_field(s1.field_index(0).unwrap(), Value::Smi(1)));
        let (s2, _) = s1.transition_to_data_field(&Name::string("b"), &Value::Smi(2), PropertyAttributes::data());
        obj.set_shape(s2.clone());
        assert_eq!(obj.out_of_object_len(), s2.out_of_object_capacity());
        assert!(obj.write_field(s2.field_index(1).unwrap(), Value::Smi(2)));
        assert_eq!(obj.read_field(s2.field_index(1).unwrap()), Some(Value::Smi(2)));
    }

    #[test]
    fn test_prototype_chain_invalidation() {
        let base = Shape::builder(InstanceType::Object).build();
        let grand = JsObject::new(base.clone(), ObjectKind::Ordinary);
        let parent_shape = base.transition_to_prototype(Some(grand.clone()));
        let parent = JsObject::new(parent_shape.clone(), ObjectKind::Ordinary);
        let child_shape = base.transition_to_prototype(Some(parent.clone()));

        let cell = JsObject::prototype_chain_validity_cell(&child_shape).unwrap();
        assert!(cell.is_valid());
        let same = JsObject::prototype_chain_validity_cell(&child_shape).unwrap();
        assert!(Arc::ptr_eq(&cell, &same));

        // Changing the grandparent invalidates the child's chain.
        let (next, _) = grand
            .shape()
            .transition_to_data_field(&Name::string("x"), &Value::Smi(1), PropertyAttributes::data());
        grand.set_shape(next);
        assert!(!cell.is_valid());
        let fresh = JsObject::prototype_chain_validity_cell(&child_shape).unwrap();
        assert!(fresh.is_valid());
    }

    #[test]
    fn test_global_cells() {
        let shape = Shape::builder(InstanceType::GlobalObject).dictionary().build();
        let global = JsObject::new(shape, ObjectKind::Global);
        let name = Name::string("g");
        let empty = global.ensure_empty_property_cell(&name);
        assert!(empty.is_hole());
        let defined = global.define_property_cell(&name, CellContents::Data(Value::Smi(1)), PropertyAttributes::data());
        assert!(Arc::ptr_eq(&empty, &defined));
        assert!(global.delete_property_cell(&name));
        assert!(defined.is_hole());
        assert!(global.property_cell(&name).is_none());
    }

    #[test]
    fn test_slow_elements_policy() {
        assert!(!should_convert_to_slow_elements(4, 3));
        assert!(!should_convert_to_slow_elements(4, 10));
        assert!(should_convert_to_slow_elements(4, 4 + MAX_GAP));
    }
}
