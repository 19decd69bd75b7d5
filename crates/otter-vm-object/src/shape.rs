//! Hidden Classes (Shapes) for property access optimization.
//!
//! A Shape describes the layout of an object: its own property descriptors,
//! where each field lives, the elements kind of its indexed storage and its
//! prototype. Objects with the same shape have identical layouts, which is
//! what lets the inline caches key handlers by shape identity.
//!
//! Shapes are never changed in place. Adding a property, changing the
//! elements kind or the prototype moves the object to another shape found
//! through the transition tree. The one mutable bit is deprecation: a shape
//! whose field representation had to be generalized is deprecated and
//! points at its replacement; instances migrate lazily.

use crate::accessors::{AccessorPair, InterceptorInfo, NativeAccessor, TemplateId};
use crate::elements::ElementsKind;
use crate::object::JsObject;
use crate::property::{
    FieldIndex, Name, PropertyAttributes, PropertyDetails, PropertyKind, PropertyLocation, Representation,
};
use crate::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

/// Fast-mode objects with more own properties than this are normalized
pub const MAX_FAST_PROPERTIES: usize = 128;

/// Out-of-object slots added whenever the property backing store grows
pub const FIELDS_ADDED: usize = 3;

/// Default number of in-object property slots for ordinary objects
pub const DEFAULT_INOBJECT_PROPERTIES: usize = 4;

/// Shared shape handle
pub type ShapeRef = Arc<Shape>;

/// Unique, never reused shape identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeId(u64);

impl ShapeId {
    /// Raw id
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Kind of heap object a shape describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceType {
    /// Ordinary object
    Object,
    /// JS array
    Array,
    /// Function
    Function,
    /// Global object
    GlobalObject,
    /// Global proxy
    GlobalProxy,
    /// Proxy
    Proxy,
    /// Typed array
    TypedArray,
    /// Arguments object
    Arguments,
    /// Primitive wrapper (`new String("x")`)
    StringWrapper,
    /// Module namespace object
    ModuleNamespace,
    /// Primitive string
    String,
    /// Primitive number
    HeapNumber,
    /// Primitive boolean
    Boolean,
    /// Primitive symbol
    Symbol,
    /// `undefined` / `null`
    Oddball,
}

impl InstanceType {
    /// Primitive value types
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            InstanceType::String
                | InstanceType::HeapNumber
                | InstanceType::Boolean
                | InstanceType::Symbol
                | InstanceType::Oddball
        )
    }

    /// Objects in the JS sense (including proxies)
    pub fn is_js_receiver(self) -> bool {
        !self.is_primitive()
    }

    /// Receivers with ordinary property storage
    pub fn is_js_object(self) -> bool {
        self.is_js_receiver() && self != InstanceType::Proxy
    }
}

/// Value part of a descriptor
#[derive(Clone, Debug)]
pub enum DescriptorValue {
    /// Value lives in the object's field storage
    Field,
    /// Constant held by the shape
    Constant(Value),
    /// JS getter/setter pair
    AccessorPair(Arc<AccessorPair>),
    /// Native accessor
    Native(Arc<NativeAccessor>),
}

/// One own property of a fast-mode shape
#[derive(Clone, Debug)]
pub struct Descriptor {
    /// Property name
    pub name: Name,
    /// Metadata
    pub details: PropertyDetails,
    /// Constant or accessor payload
    pub value: DescriptorValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TransitionKey {
    Data(Name, PropertyAttributes),
    Constant(Name, PropertyAttributes),
    ElementsKind(ElementsKind),
    Prototype(u64),
    PreventExtensions,
}

/// A Shape defines the layout of properties in an object.
pub struct Shape {
    id: ShapeId,
    instance_type: InstanceType,
    elements_kind: ElementsKind,
    prototype: Option<JsObject>,
    descriptors: Vec<Descriptor>,
    index: FxHashMap<Name, usize>,
    inobject_properties: usize,
    used_fields: usize,
    unused_property_fields: usize,
    is_dictionary: bool,
    extensible: bool,
    is_prototype_map: bool,
    access_check_needed: bool,
    named_interceptor: Option<Arc<InterceptorInfo>>,
    indexed_interceptor: Option<Arc<InterceptorInfo>>,
    template: Option<TemplateId>,
    /// The shape this one was transitioned from.
    back_pointer: Option<ShapeRef>,
    deprecated: AtomicBool,
    abandoned: AtomicBool,
    update_target: RwLock<Option<ShapeRef>>,
    /// Both directions are strong. Unused children are released by
    /// `prune_transitions`, the whole tree by `clear_transitions`.
    transitions: RwLock<FxHashMap<TransitionKey, ShapeRef>>,
}

/// Builder for root shapes
pub struct ShapeBuilder {
    instance_type: InstanceType,
    elements_kind: ElementsKind,
    prototype: Option<JsObject>,
    inobject_properties: usize,
    is_dictionary: bool,
    access_check_needed: bool,
    named_interceptor: Option<Arc<InterceptorInfo>>,
    indexed_interceptor: Option<Arc<InterceptorInfo>>,
    template: Option<TemplateId>,
}

impl ShapeBuilder {
    /// Set the prototype
    pub fn prototype(mut self, prototype: Option<JsObject>) -> Self {
        self.prototype = prototype;
        self
    }

    /// Set the elements kind
    pub fn elements_kind(mut self, kind: ElementsKind) -> Self {
        self.elements_kind = kind;
        self
    }

    /// Set the number of in-object property slots
    pub fn inobject_properties(mut self, count: usize) -> Self {
        self.inobject_properties = count;
        self
    }

    /// Start in dictionary mode
    pub fn dictionary(mut self) -> Self {
        self.is_dictionary = true;
        self
    }

    /// Require access checks
    pub fn access_check_needed(mut self) -> Self {
        self.access_check_needed = true;
        self
    }

    /// Install a named interceptor
    pub fn named_interceptor(mut self, interceptor: InterceptorInfo) -> Self {
        self.named_interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Install an indexed interceptor
    pub fn indexed_interceptor(mut self, interceptor: InterceptorInfo) -> Self {
        self.indexed_interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Instances of this API template
    pub fn template(mut self, template: TemplateId) -> Self {
        self.template = Some(template);
        self
    }

    /// Create the shape
    pub fn build(self) -> ShapeRef {
        Arc::new(Shape {
            id: Shape::next_id(),
            instance_type: self.instance_type,
            elements_kind: self.elements_kind,
            prototype: self.prototype,
            descriptors: Vec::new(),
            index: FxHashMap::default(),
            inobject_properties: self.inobject_properties,
            used_fields: 0,
            unused_property_fields: self.inobject_properties,
            is_dictionary: self.is_dictionary,
            extensible: true,
            is_prototype_map: false,
            access_check_needed: self.access_check_needed,
            named_interceptor: self.named_interceptor,
            indexed_interceptor: self.indexed_interceptor,
            template: self.template,
            back_pointer: None,
            deprecated: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            update_target: RwLock::new(None),
            transitions: RwLock::new(FxHashMap::default()),
        })
    }
}

impl Shape {
    fn next_id() -> ShapeId {
        ShapeId(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Start building a root shape
    pub fn builder(instance_type: InstanceType) -> ShapeBuilder {
        ShapeBuilder {
            instance_type,
            elements_kind: ElementsKind::PackedSmi,
            prototype: None,
            inobject_properties: if instance_type.is_js_object() { DEFAULT_INOBJECT_PROPERTIES } else { 0 },
            is_dictionary: false,
            access_check_needed: false,
            named_interceptor: None,
            indexed_interceptor: None,
            template: None,
        }
    }

    /// Copy everything but identity, transitions and deprecation state.
    fn copy(&self) -> Shape {
        Shape {
            id: Self::next_id(),
            instance_type: self.instance_type,
            elements_kind: self.elements_kind,
            prototype: self.prototype.clone(),
            descriptors: self.descriptors.clone(),
            index: self.index.clone(),
            inobject_properties: self.inobject_properties,
            used_fields: self.used_fields,
            unused_property_fields: self.unused_property_fields,
            is_dictionary: self.is_dictionary,
            extensible: self.extensible,
            is_prototype_map: self.is_prototype_map,
            access_check_needed: self.access_check_needed,
            named_interceptor: self.named_interceptor.clone(),
            indexed_interceptor: self.indexed_interceptor.clone(),
            template: self.template,
            back_pointer: None,
            deprecated: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            update_target: RwLock::new(None),
            transitions: RwLock::new(FxHashMap::default()),
        }
    }

    fn find_transition(&self, key: &TransitionKey) -> Option<ShapeRef> {
        self.transitions.read().get(key).cloned()
    }

    /// Record `child` as the transition for `key`. Prototype maps are never
    /// shared, so they keep no transitions.
    fn insert_transition(self: &Arc<Self>, key: TransitionKey, mut child: Shape) -> ShapeRef {
        child.back_pointer = Some(Arc::clone(self));
        if self.is_prototype_map {
            return Arc::new(child);
        }
        let mut transitions = self.transitions.write();
        // Double-check after acquiring the write lock
        if let Some(existing) = transitions.get(&key) {
            return Arc::clone(existing);
        }
        let child = Arc::new(child);
        transitions.insert(key, Arc::clone(&child));
        child
    }

    fn push_descriptor(&mut self, descriptor: Descriptor) {
        self.index.insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
    }

    /// Shape identity
    #[inline]
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Instance type
    #[inline]
    pub fn instance_type(&self) -> InstanceType {
        self.instance_type
    }

    /// Elements kind
    #[inline]
    pub fn elements_kind(&self) -> ElementsKind {
        self.elements_kind
    }

    /// Prototype object (`None` for a null prototype)
    pub fn prototype(&self) -> Option<&JsObject> {
        self.prototype.as_ref()
    }

    /// Own descriptors in insertion order
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Descriptor by index
    pub fn descriptor(&self, index: usize) -> Option<&Descriptor> {
        self.descriptors.get(index)
    }

    /// Index of the descriptor for `name`
    pub fn lookup(&self, name: &Name) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Number of own descriptors
    pub fn number_of_own_descriptors(&self) -> usize {
        self.descriptors.len()
    }

    /// Location of descriptor `index`'s field
    pub fn field_index(&self, index: usize) -> Option<FieldIndex> {
        let descriptor = self.descriptors.get(index)?;
        if descriptor.details.location != PropertyLocation::Field {
            return None;
        }
        Some(FieldIndex::for_property(
            descriptor.details.field_index,
            self.inobject_properties,
            descriptor.details.representation,
        ))
    }

    /// In-object slot count
    pub fn inobject_properties(&self) -> usize {
        self.inobject_properties
    }

    /// Spare field slots before the backing store must grow
    pub fn unused_property_fields(&self) -> usize {
        self.unused_property_fields
    }

    /// Required length of the out-of-object property backing store
    pub fn out_of_object_capacity(&self) -> usize {
        (self.used_fields + self.unused_property_fields).saturating_sub(self.inobject_properties)
    }

    /// Properties live in a per-object dictionary
    #[inline]
    pub fn is_dictionary_map(&self) -> bool {
        self.is_dictionary
    }

    /// New properties may be added
    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    /// Map of an object used as a prototype
    pub fn is_prototype_map(&self) -> bool {
        self.is_prototype_map
    }

    /// Prototype map whose object has moved on to another shape
    pub fn is_abandoned_prototype_map(&self) -> bool {
        self.is_prototype_map && self.abandoned.load(Ordering::Acquire)
    }

    pub(crate) fn mark_abandoned(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    /// Accesses need a security check
    pub fn is_access_check_needed(&self) -> bool {
        self.access_check_needed
    }

    /// Named interceptor
    pub fn named_interceptor(&self) -> Option<&Arc<InterceptorInfo>> {
        self.named_interceptor.as_ref()
    }

    /// Indexed interceptor
    pub fn indexed_interceptor(&self) -> Option<&Arc<InterceptorInfo>> {
        self.indexed_interceptor.as_ref()
    }

    /// API template of instances
    pub fn template(&self) -> Option<TemplateId> {
        self.template
    }

    /// Shape this one transitioned from
    pub fn back_pointer(&self) -> Option<&ShapeRef> {
        self.back_pointer.as_ref()
    }

    /// Whether the shape has been replaced
    #[inline]
    pub fn is_deprecated(&self) -> bool {
        self.deprecated.load(Ordering::Acquire)
    }

    /// Deprecate in favour of `target`
    pub fn deprecate(&self, target: ShapeRef) {
        tracing::debug!(
            target: "otter::shape",
            from = self.id.0,
            to = target.id.0,
            "deprecating shape"
        );
        *self.update_target.write() = Some(target);
        self.deprecated.store(true, Ordering::Release);
    }

    /// The up-to-date replacement of a deprecated shape (self otherwise)
    pub fn update(self: &Arc<Self>) -> ShapeRef {
        let mut current = Arc::clone(self);
        loop {
            let next = current.update_target.read().clone();
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// Instances are arrays
    pub fn is_js_array_map(&self) -> bool {
        self.instance_type == InstanceType::Array
    }

    /// Primitive value map
    pub fn is_primitive_map(&self) -> bool {
        self.instance_type.is_primitive()
    }

    /// Primitive string map
    pub fn is_string_map(&self) -> bool {
        self.instance_type == InstanceType::String
    }

    /// Receivers in the JS sense
    pub fn is_js_receiver_map(&self) -> bool {
        self.instance_type.is_js_receiver()
    }

    /// Receivers with ordinary storage
    pub fn is_js_object_map(&self) -> bool {
        self.instance_type.is_js_object()
    }

    /// Global object
    pub fn is_js_global_object_map(&self) -> bool {
        self.instance_type == InstanceType::GlobalObject
    }

    /// Global proxy
    pub fn is_js_global_proxy_map(&self) -> bool {
        self.instance_type == InstanceType::GlobalProxy
    }

    /// Proxy
    pub fn is_js_proxy_map(&self) -> bool {
        self.instance_type == InstanceType::Proxy
    }

    /// Primitive wrapper
    pub fn is_js_value_map(&self) -> bool {
        self.instance_type == InstanceType::StringWrapper
    }

    /// Typed array storage
    pub fn has_fixed_typed_array_elements(&self) -> bool {
        self.elements_kind.is_typed()
    }

    /// Arguments object storage
    pub fn has_sloppy_arguments_elements(&self) -> bool {
        self.elements_kind == ElementsKind::SloppyArguments
    }

    /// Dictionary elements
    pub fn has_dictionary_elements(&self) -> bool {
        self.elements_kind == ElementsKind::Dictionary
    }

    /// Whether some prototype (but not the receiver) has non-fast elements
    pub fn dictionary_elements_in_prototype_chain_only(&self) -> bool {
        let mut current = self.prototype.clone();
        while let Some(proto) = current {
            let shape = proto.shape();
            if shape.is_js_proxy_map()
                || matches!(
                    shape.elements_kind(),
                    ElementsKind::Dictionary | ElementsKind::SloppyArguments | ElementsKind::StringWrapper
                )
            {
                return true;
            }
            current = shape.prototype().cloned();
        }
        false
    }

    /// Add a data field, re-using an existing transition when possible.
    ///
    /// Returns the target shape and whether it was freshly created. An
    /// existing target whose field representation cannot hold `value` is
    /// generalized (and the old target deprecated).
    pub fn transition_to_data_field(
        self: &Arc<Self>,
        name: &Name,
        value: &Value,
        attributes: PropertyAttributes,
    ) -> (ShapeRef, bool) {
        if self.is_dictionary {
            return (Arc::clone(self), false);
        }
        if self.descriptors.len() >= MAX_FAST_PROPERTIES {
            return (self.normalize(), true);
        }
        let key = TransitionKey::Data(name.clone(), attributes);
        if let Some(existing) = self.find_transition(&key) {
            let existing = existing.update();
            let last = existing.descriptors.len() - 1;
            let representation = existing.descriptors[last].details.representation;
            if representation.fits(value) {
                return (existing, false);
            }
            let generalized = representation.generalize(Representation::for_value(value));
            return (existing.generalize_field(last, generalized), true);
        }

        let mut child = self.copy();
        let field_index = child.used_fields;
        child.used_fields += 1;
        if child.unused_property_fields > 0 {
            child.unused_property_fields -= 1;
        } else {
            child.unused_property_fields = FIELDS_ADDED - 1;
        }
        child.push_descriptor(Descriptor {
            name: name.clone(),
            details: PropertyDetails::field(field_index, Representation::for_value(value), attributes),
            value: DescriptorValue::Field,
        });
        (self.insert_transition(key, child), true)
    }

    /// Add a constant held by the shape
    pub fn transition_to_constant(self: &Arc<Self>, name: &Name, value: Value, attributes: PropertyAttributes) -> ShapeRef {
        let key = TransitionKey::Constant(name.clone(), attributes);
        if let Some(existing) = self.find_transition(&key) {
            let same = existing.descriptors.last().is_some_and(|d| match &d.value {
                DescriptorValue::Constant(c) => c.strict_equals(&value),
                _ => false,
            });
            if same {
                return existing;
            }
        }
        let mut child = self.copy();
        child.push_descriptor(Descriptor {
            name: name.clone(),
            details: PropertyDetails::descriptor(PropertyKind::Data, attributes),
            value: DescriptorValue::Constant(value),
        });
        child.back_pointer = Some(Arc::clone(self));
        Arc::new(child)
    }

    /// Add or replace an accessor property. Accessor transitions are not
    /// shared.
    pub fn copy_with_accessor(self: &Arc<Self>, name: &Name, value: DescriptorValue, attributes: PropertyAttributes) -> ShapeRef {
        let mut child = self.copy();
        let details = PropertyDetails::descriptor(PropertyKind::Accessor, attributes);
        match child.index.get(name).copied() {
            Some(existing) => {
                child.descriptors[existing] = Descriptor {
                    name: name.clone(),
                    details,
                    value,
                };
            }
            None => child.push_descriptor(Descriptor {
                name: name.clone(),
                details,
                value,
            }),
        }
        child.back_pointer = Some(Arc::clone(self));
        Arc::new(child)
    }

    /// Replace descriptor `index` with a field of `representation`,
    /// deprecating this shape in favour of the result.
    pub fn generalize_field(self: &Arc<Self>, index: usize, representation: Representation) -> ShapeRef {
        let mut replacement = self.copy();
        replacement.back_pointer = self.back_pointer.clone();
        let old = &self.descriptors[index];
        let details = if old.details.location == PropertyLocation::Field {
            PropertyDetails::field(old.details.field_index, representation, old.details.attributes)
        } else {
            // Constant becomes a fresh field.
            let field_index = replacement.used_fields;
            replacement.used_fields += 1;
            if replacement.unused_property_fields > 0 {
                replacement.unused_property_fields -= 1;
            } else {
                replacement.unused_property_fields = FIELDS_ADDED - 1;
            }
            PropertyDetails::field(field_index, representation, old.details.attributes)
        };
        replacement.descriptors[index] = Descriptor {
            name: old.name.clone(),
            details,
            value: DescriptorValue::Field,
        };
        let replacement = Arc::new(replacement);

        // Re-point the parent's transition at the replacement.
        if let Some(parent) = &self.back_pointer
            && index + 1 == self.descriptors.len()
            && !parent.is_prototype_map
        {
            let key = TransitionKey::Data(old.name.clone(), old.details.attributes);
            let mut transitions = parent.transitions.write();
            if transitions.get(&key).is_some_and(|child| Arc::ptr_eq(child, self)) {
                transitions.insert(key, Arc::clone(&replacement));
            }
        }
        self.deprecate(Arc::clone(&replacement));
        replacement
    }

    /// Cached elements kind transition, without creating one
    pub fn find_elements_transition(&self, kind: ElementsKind) -> Option<ShapeRef> {
        if kind == self.elements_kind {
            return None;
        }
        self.find_transition(&TransitionKey::ElementsKind(kind))
    }

    /// Shape with a different elements kind
    pub fn transition_elements_to(self: &Arc<Self>, kind: ElementsKind) -> ShapeRef {
        if kind == self.elements_kind {
            return Arc::clone(self);
        }
        let key = TransitionKey::ElementsKind(kind);
        if let Some(existing) = self.find_transition(&key) {
            return existing;
        }
        let mut child = self.copy();
        child.elements_kind = kind;
        self.insert_transition(key, child)
    }

    /// Record `target` as this shape's transition to its elements kind
    pub(crate) fn link_elements_transition(&self, target: &ShapeRef) {
        if target.elements_kind != self.elements_kind && !self.is_prototype_map {
            self.transitions
                .write()
                .insert(TransitionKey::ElementsKind(target.elements_kind), Arc::clone(target));
        }
    }

    /// The most general candidate this shape reaches through elements kind
    /// transitions
    pub fn find_elements_kind_transitioned_map(&self, candidates: &[ShapeRef]) -> Option<ShapeRef> {
        let mut best: Option<ShapeRef> = None;
        for candidate in candidates {
            let kind = candidate.elements_kind;
            if !self.elements_kind.is_more_general_transition(kind) {
                continue;
            }
            let Some(reached) = self.find_elements_transition(kind) else {
                continue;
            };
            if !Arc::ptr_eq(&reached, candidate) {
                continue;
            }
            let better = best
                .as_ref()
                .is_none_or(|b| b.elements_kind.is_more_general_transition(kind));
            if better {
                best = Some(Arc::clone(candidate));
            }
        }
        best
    }

    /// Shape with another prototype
    pub fn transition_to_prototype(self: &Arc<Self>, prototype: Option<JsObject>) -> ShapeRef {
        let key = TransitionKey::Prototype(prototype.as_ref().map_or(0, JsObject::id));
        if let Some(existing) = self.find_transition(&key) {
            return existing;
        }
        let mut child = self.copy();
        child.prototype = prototype;
        self.insert_transition(key, child)
    }

    /// Dictionary-mode copy. Never shared.
    pub fn normalize(&self) -> ShapeRef {
        let mut normalized = self.copy();
        normalized.is_dictionary = true;
        normalized.descriptors.clear();
        normalized.index.clear();
        normalized.used_fields = 0;
        normalized.unused_property_fields = 0;
        tracing::debug!(target: "otter::shape", from = self.id.0, to = normalized.id.0, "normalizing shape");
        Arc::new(normalized)
    }

    /// Non-extensible copy
    pub fn copy_for_prevent_extensions(self: &Arc<Self>) -> ShapeRef {
        let key = TransitionKey::PreventExtensions;
        if let Some(existing) = self.find_transition(&key) {
            return existing;
        }
        let mut child = self.copy();
        child.extensible = false;
        self.insert_transition(key, child)
    }

    /// Unshared copy used once the object becomes a prototype
    pub fn copy_as_prototype_map(&self) -> ShapeRef {
        let mut copy = self.copy();
        copy.is_prototype_map = true;
        copy.back_pointer = self.back_pointer.clone();
        Arc::new(copy)
    }

    /// Root of the transition tree this shape belongs to
    pub fn transition_root(self: &Arc<Self>) -> ShapeRef {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.back_pointer.clone() {
            current = parent;
        }
        current
    }

    /// Number of transitions recorded on this shape
    pub fn transition_count(&self) -> usize {
        self.transitions.read().len()
    }

    /// Release transition targets that nothing but the tree refers to.
    ///
    /// Children are pruned before their parent, so a chain of unused
    /// shapes goes in one call. Returns how many transitions were removed.
    pub fn prune_transitions(&self) -> usize {
        let children: Vec<ShapeRef> = self.transitions.read().values().cloned().collect();
        let mut removed: usize = children.iter().map(|child| child.prune_transitions()).sum();
        drop(children);
        let mut transitions = self.transitions.write();
        let before = transitions.len();
        transitions.retain(|_, child| Arc::strong_count(child) > 1);
        removed += before - transitions.len();
        removed
    }

    /// Drop every transition below this shape
    pub fn clear_transitions(&self) {
        let children = std::mem::take(&mut *self.transitions.write());
        for child in children.values() {
            child.clear_transitions();
        }
    }

    /// Own property names in insertion order
    pub fn own_keys(&self) -> Vec<Name> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id.0)
            .field("instance_type", &self.instance_type)
            .field("elements_kind", &self.elements_kind)
            .field("descriptors", &self.descriptors.len())
            .field("dictionary", &self.is_dictionary)
            .field("deprecated", &self.is_deprecated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> ShapeRef {
        Shape::builder(InstanceType::Object).build()
    }

    #[test]
    fn test_transition_reuse() {
        let root = root();
        let name = Name::string("x");
        let (a, created_a) = root.transition_to_data_field(&name, &Value::Smi(1), PropertyAttributes::data());
        let (b, created_b) = root.transition_to_data_field(&name, &Value::Smi(2), PropertyAttributes::data());
        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lookup(&name), Some(0));
        assert!(Arc::ptr_eq(a.back_pointer().unwrap(), &root));
    }

    #[test]
    fn test_field_generalization_deprecates() {
        let root = root();
        let name = Name::string("x");
        let (smi, _) = root.transition_to_data_field(&name, &Value::Smi(1), PropertyAttributes::data());
        let (double, created) = root.transition_to_data_field(&name, &Value::HeapNumber(1.5), PropertyAttributes::data());
        assert!(created);
        assert!(smi.is_deprecated());
        assert!(Arc::ptr_eq(&smi.update(), &double));
        assert_eq!(double.descriptor(0).unwrap().details.representation, Representation::Double);
        let (again, created) = root.transition_to_data_field(&name, &Value::Smi(3), PropertyAttributes::data());
        assert!(!created);
        assert!(Arc::ptr_eq(&again, &double));
    }

    #[test]
    fn test_unused_fields_and_storage() {
        let mut shape = Shape::builder(InstanceType::Object).inobject_properties(1).build();
        let (s1, _) = shape.transition_to_data_field(&Name::string("a"), &Value::Smi(1), PropertyAttributes::data());
        assert_eq!(s1.unused_property_fields(), 0);
        assert!(s1.field_index(0).unwrap().in_object);
        shape = s1;
        let (s2, _) = shape.transition_to_data_field(&Name::string("b"), &Value::Smi(1), PropertyAttributes::data());
        assert_eq!(s2.unused_property_fields(), FIELDS_ADDED - 1);
        assert_eq!(s2.out_of_object_capacity(), FIELDS_ADDED);
        assert!(!s2.field_index(1).unwrap().in_object);
    }

    #[test]
    fn test_elements_kind_transitions() {
        let root = Shape::builder(InstanceType::Array).build();
        let double = root.transition_elements_to(ElementsKind::PackedDouble);
        let holey = root.transition_elements_to(ElementsKind::HoleySmi);
        assert!(Arc::ptr_eq(&double, &root.transition_elements_to(ElementsKind::PackedDouble)));
        let found = root.find_elements_kind_transitioned_map(&[holey.clone(), double.clone()]);
        assert!(found.is_some());
        assert!(root.find_elements_kind_transitioned_map(&[root.clone()]).is_none());
        assert!(holey.find_elements_kind_transitioned_map(&[double]).is_none());
    }

    #[test]
    fn test_transitions_outlive_instances() {
        let root = root();
        let name = Name::string("x");
        let id = {
            let (child, _) = root.transition_to_data_field(&name, &Value::Smi(1), PropertyAttributes::data());
            child.id()
        };
        let (again, created) = root.transition_to_data_field(&name, &Value::Smi(2), PropertyAttributes::data());
        assert!(!created);
        assert_eq!(again.id(), id);
        assert!(Arc::ptr_eq(&again.transition_root(), &root));
    }

    #[test]
    fn test_prune_releases_unused_chains() {
        let root = root();
        let (a, _) = root.transition_to_data_field(&Name::string("a"), &Value::Smi(1), PropertyAttributes::data());
        let (ab, _) = a.transition_to_data_field(&Name::string("b"), &Value::Smi(1), PropertyAttributes::data());
        let (kept, _) = root.transition_to_data_field(&Name::string("c"), &Value::Smi(1), PropertyAttributes::data());
        drop((a, ab));

        assert_eq!(root.prune_transitions(), 2);
        assert_eq!(root.transition_count(), 1);
        let (c, created) = root.transition_to_data_field(&Name::string("c"), &Value::Smi(2), PropertyAttributes::data());
        assert!(!created);
        assert!(Arc::ptr_eq(&c, &kept));
        let (_, created) = root.transition_to_data_field(&Name::string("a"), &Value::Smi(1), PropertyAttributes::data());
        assert!(created);

        root.clear_transitions();
        assert_eq!(root.transition_count(), 0);
    }

    #[test]
    fn test_normalize_is_fresh() {
        let root = root();
        let a = root.normalize();
        let b = root.normalize();
        assert!(a.is_dictionary_map());
        assert_ne!(a.id(), b.id());
    }
}
