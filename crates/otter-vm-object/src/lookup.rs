//! Property lookup along the prototype chain
//!
//! The iterator stops at every holder that needs special treatment (proxy,
//! access check, interceptor) and at the property itself. Callers drive it
//! with [`LookupIterator::next`] when they want to continue past an
//! interceptor that produced nothing or an access check that passed.

use crate::accessors::{AccessorPair, InterceptorInfo, NativeAccessor};
use crate::object::{DictionaryValue, JsObject};
use crate::property::{FieldIndex, Name, PropertyAttributes, PropertyDetails, PropertyKind, PropertyLocation, Representation};
use crate::realm::Realm;
use crate::shape::{DescriptorValue, ShapeRef};
use crate::validity::{CellContents, PropertyCell};
use crate::value::Value;
use std::sync::Arc;

/// Where the lookup stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupState {
    /// Property absent from the whole chain
    NotFound,
    /// Prepared to add the property to the receiver
    Transition,
    /// Holder has a named interceptor
    Interceptor,
    /// Holder requires an access check
    AccessCheck,
    /// Accessor property found
    Accessor,
    /// Data property found
    Data,
    /// Numeric string name on a typed array
    IntegerIndexedExotic,
    /// Holder is a proxy
    JsProxy,
}

/// Accessor found by a lookup
#[derive(Clone, Debug)]
pub enum AccessorValue {
    /// JS getter/setter pair
    Pair(Arc<AccessorPair>),
    /// Native accessor
    Native(Arc<NativeAccessor>),
}

/// Target of a prepared store transition
#[derive(Clone, Debug)]
pub enum TransitionTarget {
    /// New shape for the receiver
    Shape(ShapeRef),
    /// Global property cell to fill
    Cell(Arc<PropertyCell>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Start,
    AfterAccessCheck,
    AfterInterceptor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NonMasking {
    Uninitialized,
    Skip,
    Process,
}

/// Name lookup on a receiver and its prototype chain
pub struct LookupIterator {
    receiver: Value,
    name: Name,
    start: Option<JsObject>,
    holder: Option<JsObject>,
    holder_shape: Option<ShapeRef>,
    phase: Phase,
    state: LookupState,
    non_masking: NonMasking,
    number: Option<usize>,
    details: Option<PropertyDetails>,
    transition: Option<TransitionTarget>,
}

/// Whether `s` is the canonical string form of some number
pub fn is_canonical_numeric_string(s: &str) -> bool {
    if s == "-0" {
        return true;
    }
    match s.parse::<f64>() {
        Ok(n) => Value::number(n).to_display_string() == s,
        Err(_) => false,
    }
}

impl LookupIterator {
    /// Look up `name` on `receiver`. Primitive receivers start at their
    /// wrapper prototype.
    pub fn new(realm: &Realm, receiver: Value, name: Name) -> Self {
        let start = if name.is_private() {
            receiver.as_object().cloned()
        } else {
            realm.prototype_for_primitive(&receiver)
        };
        Self::with_start(receiver, start, name)
    }

    /// Look up `name` starting at `start` with `receiver` as `this`
    pub fn with_start(receiver: Value, start: Option<JsObject>, name: Name) -> Self {
        let mut it = Self {
            receiver,
            name,
            holder: start.clone(),
            start,
            holder_shape: None,
            phase: Phase::Start,
            state: LookupState::NotFound,
            non_masking: NonMasking::Uninitialized,
            number: None,
            details: None,
            transition: None,
        };
        it.search();
        it
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> LookupState {
        self.state
    }

    /// Property name
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Receiver (`this` for accessors)
    pub fn receiver(&self) -> &Value {
        &self.receiver
    }

    /// Current holder
    pub fn holder(&self) -> Option<&JsObject> {
        self.holder.as_ref()
    }

    /// Shape of the current holder when the lookup stopped
    pub fn holder_shape(&self) -> Option<&ShapeRef> {
        self.holder_shape.as_ref()
    }

    /// Property found (data or accessor)
    pub fn is_found(&self) -> bool {
        matches!(self.state, LookupState::Data | LookupState::Accessor)
    }

    /// Details of the found property
    pub fn property_details(&self) -> Option<PropertyDetails> {
        self.details
    }

    /// Descriptor index on a fast-mode holder
    pub fn descriptor_number(&self) -> Option<usize> {
        self.number
    }

    /// Field slot of a fast-mode data field
    pub fn field_index(&self) -> Option<FieldIndex> {
        let details = self.details?;
        if details.location != PropertyLocation::Field {
            return None;
        }
        self.holder_shape.as_ref()?.field_index(self.number?)
    }

    /// Field representation of a fast-mode data field
    pub fn representation(&self) -> Option<Representation> {
        self.details
            .filter(|d| d.location == PropertyLocation::Field)
            .map(|d| d.representation)
    }

    /// Holder is the receiver itself
    pub fn holder_is_receiver(&self) -> bool {
        match (&self.holder, self.receiver.as_object()) {
            (Some(holder), Some(receiver)) => holder.ptr_eq(receiver),
            _ => false,
        }
    }

    /// Holder stores properties in a dictionary or in global cells
    pub fn is_dictionary_holder(&self) -> bool {
        self.holder_shape.as_ref().is_some_and(|s| s.is_dictionary_map())
    }

    /// Holder is a global object
    pub fn is_global_holder(&self) -> bool {
        self.holder_shape.as_ref().is_some_and(|s| s.is_js_global_object_map())
    }

    /// Property cell on a global holder
    pub fn property_cell(&self) -> Option<Arc<PropertyCell>> {
        if !self.is_global_holder() {
            return None;
        }
        self.holder.as_ref()?.property_cell(&self.name)
    }

    /// Named interceptor of the holder
    pub fn get_interceptor(&self) -> Option<Arc<InterceptorInfo>> {
        self.holder_shape.as_ref()?.named_interceptor().cloned()
    }

    /// Access check on the holder passes
    pub fn has_access(&self) -> bool {
        self.holder.as_ref().is_some_and(JsObject::has_access)
    }

    /// Value of the found data property
    pub fn get_data_value(&self) -> Option<Value> {
        if self.state != LookupState::Data {
            return None;
        }
        let holder = self.holder.as_ref()?;
        let shape = self.holder_shape.as_ref()?;
        if shape.is_js_global_object_map() {
            return holder.property_cell(&self.name)?.value();
        }
        if shape.is_dictionary_map() {
            return match holder.dictionary_get(&self.name)?.value {
                DictionaryValue::Data(v) => Some(v),
                _ => None,
            };
        }
        match &shape.descriptor(self.number?)?.value {
            DescriptorValue::Field => holder.read_field(self.field_index()?),
            DescriptorValue::Constant(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Constant held by the holder's shape
    pub fn get_constant(&self) -> Option<Value> {
        match &self.holder_shape.as_ref()?.descriptor(self.number?)?.value {
            DescriptorValue::Constant(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Accessor of the found accessor property
    pub fn get_accessors(&self) -> Option<AccessorValue> {
        if self.state != LookupState::Accessor {
            return None;
        }
        let holder = self.holder.as_ref()?;
        let shape = self.holder_shape.as_ref()?;
        if shape.is_js_global_object_map() {
            return match holder.property_cell(&self.name)?.contents() {
                CellContents::Accessor(pair) => Some(AccessorValue::Pair(pair)),
                _ => None,
            };
        }
        if shape.is_dictionary_map() {
            return match holder.dictionary_get(&self.name)?.value {
                DictionaryValue::Accessor(pair) => Some(AccessorValue::Pair(pair)),
                DictionaryValue::Native(info) => Some(AccessorValue::Native(info)),
                DictionaryValue::Data(_) => None,
            };
        }
        match &shape.descriptor(self.number?)?.value {
            DescriptorValue::AccessorPair(pair) => Some(AccessorValue::Pair(pair.clone())),
            DescriptorValue::Native(info) => Some(AccessorValue::Native(info.clone())),
            _ => None,
        }
    }

    /// Continue past the current stop
    pub fn next(&mut self) {
        match self.state {
            LookupState::AccessCheck | LookupState::Interceptor => {}
            _ => {
                self.holder = self
                    .holder_shape
                    .as_ref()
                    .and_then(|s| s.prototype().cloned())
                    .filter(|_| !self.name.is_private());
                self.phase = Phase::Start;
            }
        }
        self.search();
    }

    /// Re-examine the current holder after it changed shape
    pub fn reload(&mut self) {
        self.phase = Phase::AfterInterceptor;
        self.search();
    }

    fn skip_interceptor(&mut self, interceptor: &InterceptorInfo) -> bool {
        if interceptor.non_masking {
            match self.non_masking {
                NonMasking::Uninitialized | NonMasking::Skip => {
                    self.non_masking = NonMasking::Skip;
                    true
                }
                NonMasking::Process => false,
            }
        } else {
            self.non_masking == NonMasking::Process
        }
    }

    fn search(&mut self) {
        self.number = None;
        self.details = None;
        loop {
            let Some(holder) = self.holder.clone() else {
                if self.non_masking == NonMasking::Skip {
                    // Nothing found: consult the non-masking interceptors.
                    self.non_masking = NonMasking::Process;
                    self.holder = self.start.clone();
                    self.phase = Phase::Start;
                    continue;
                }
                self.holder_shape = None;
                self.state = LookupState::NotFound;
                return;
            };
            let shape = holder.shape();
            self.holder_shape = Some(shape.clone());

            if self.phase == Phase::Start {
                if shape.is_js_proxy_map() {
                    self.state = LookupState::JsProxy;
                    return;
                }
                self.phase = Phase::AfterAccessCheck;
                if shape.is_access_check_needed() {
                    self.state = LookupState::AccessCheck;
                    return;
                }
            }
            if self.phase == Phase::AfterAccessCheck {
                self.phase = Phase::AfterInterceptor;
                if let Some(interceptor) = shape.named_interceptor()
                    && !self.name.is_private()
                    && !self.skip_interceptor(interceptor)
                {
                    self.state = LookupState::Interceptor;
                    return;
                }
            }

            if self.non_masking != NonMasking::Process {
                if shape.has_fixed_typed_array_elements()
                    && self.name.as_str().is_some_and(is_canonical_numeric_string)
                {
                    self.state = LookupState::IntegerIndexedExotic;
                    return;
                }
                if let Some(state) = self.lookup_own(&holder, &shape) {
                    self.state = state;
                    return;
                }
            }
            if self.name.is_private() {
                self.holder = None;
                continue;
            }
            self.holder = shape.prototype().cloned();
            self.phase = Phase::Start;
        }
    }

    fn lookup_own(&mut self, holder: &JsObject, shape: &ShapeRef) -> Option<LookupState> {
        let (kind, attributes) = if shape.is_js_global_object_map() {
            let cell = holder.property_cell(&self.name).filter(|c| !c.is_hole())?;
            let kind = match cell.contents() {
                CellContents::Accessor(_) => PropertyKind::Accessor,
                _ => PropertyKind::Data,
            };
            (kind, cell.attributes())
        } else if shape.is_dictionary_map() {
            let entry = holder.dictionary_get(&self.name)?;
            let kind = match entry.value {
                DictionaryValue::Data(_) => PropertyKind::Data,
                _ => PropertyKind::Accessor,
            };
            (kind, entry.attributes)
        } else {
            let number = shape.lookup(&self.name)?;
            let details = shape.descriptor(number)?.details;
            self.number = Some(number);
            self.details = Some(details);
            return Some(match details.kind {
                PropertyKind::Data => LookupState::Data,
                PropertyKind::Accessor => LookupState::Accessor,
            });
        };
        self.details = Some(PropertyDetails::descriptor(kind, attributes));
        Some(match kind {
            PropertyKind::Data => LookupState::Data,
            PropertyKind::Accessor => LookupState::Accessor,
        })
    }

    // ---------------------------------------------------------------------
    // Store preparation
    // ---------------------------------------------------------------------

    /// Make the found own data property able to hold `value`, generalizing
    /// its field representation or turning a constant into a field.
    pub fn prepare_for_data_property(&mut self, value: &Value) {
        if self.state != LookupState::Data || !self.holder_is_receiver() {
            return;
        }
        let Some(holder) = self.holder.clone() else { return };
        if holder.migrate_instance() {
            self.reload();
        }
        let Some(shape) = self.holder_shape.clone() else { return };
        if shape.is_dictionary_map() {
            return;
        }
        let Some(number) = self.number else { return };
        let Some(descriptor) = shape.descriptor(number) else { return };
        match &descriptor.value {
            DescriptorValue::Field => {
                let current = descriptor.details.representation;
                if current.fits(value) {
                    return;
                }
                let generalized = shape.generalize_field(number, current.generalize(Representation::for_value(value)));
                holder.set_shape(generalized);
            }
            DescriptorValue::Constant(constant) => {
                if constant.strict_equals(value) {
                    return;
                }
                let constant = constant.clone();
                let generalized = shape.generalize_field(
                    number,
                    Representation::for_value(&constant).generalize(Representation::for_value(value)),
                );
                if let Some(index) = generalized.field_index(number) {
                    holder.set_shape(generalized);
                    holder.write_field(index, constant);
                }
            }
            _ => return,
        }
        self.reload();
    }

    /// Prepare adding the property to `receiver`. Returns whether a new
    /// shape transition was created for it.
    pub fn prepare_transition_to_data_property(
        &mut self,
        receiver: &JsObject,
        value: &Value,
        attributes: PropertyAttributes,
    ) -> bool {
        if self.state == LookupState::Transition {
            return false;
        }
        receiver.migrate_instance();
        let shape = receiver.shape();
        self.holder = Some(receiver.clone());
        self.holder_shape = Some(shape.clone());
        self.number = None;
        self.details = None;
        self.state = LookupState::Transition;
        if shape.is_js_global_object_map() {
            self.transition = Some(TransitionTarget::Cell(receiver.ensure_empty_property_cell(&self.name)));
            return false;
        }
        if shape.is_dictionary_map() {
            self.transition = Some(TransitionTarget::Shape(shape));
            return false;
        }
        let (target, created) = shape.transition_to_data_field(&self.name, value, attributes);
        self.transition = Some(TransitionTarget::Shape(target));
        created
    }

    /// The prepared transition can be cached in a handler
    pub fn is_cacheable_transition(&self) -> bool {
        match &self.transition {
            Some(TransitionTarget::Cell(_)) => true,
            Some(TransitionTarget::Shape(target)) => {
                !target.is_dictionary_map() && !target.is_deprecated() && target.back_pointer().is_some()
            }
            None => false,
        }
    }

    /// Prepared target shape
    pub fn transition_map(&self) -> Option<&ShapeRef> {
        match &self.transition {
            Some(TransitionTarget::Shape(shape)) => Some(shape),
            _ => None,
        }
    }

    /// Prepared global property cell
    pub fn transition_cell(&self) -> Option<&Arc<PropertyCell>> {
        match &self.transition {
            Some(TransitionTarget::Cell(cell)) => Some(cell),
            _ => None,
        }
    }

    /// Adding to `receiver` would extend a non-extensible object
    pub fn extending_non_extensible(&self, receiver: &JsObject) -> bool {
        !receiver.is_extensible()
    }
}

impl std::fmt::Debug for LookupIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupIterator")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("holder", &self.holder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessors::InterceptorInfo;
    use crate::ops;

    #[test]
    fn test_finds_own_and_inherited() {
        let realm = Realm::new();
        let proto = realm.new_object();
        ops::set_property(&realm, &Value::object(proto.clone()), &Name::string("p"), Value::Smi(1), Default::default()).unwrap();
        let obj = realm.new_object_with_prototype(Some(proto.clone()));
        ops::set_property(&realm, &Value::object(obj.clone()), &Name::string("o"), Value::Smi(2), Default::default()).unwrap();

        let it = LookupIterator::new(&realm, Value::object(obj.clone()), Name::string("o"));
        assert_eq!(it.state(), LookupState::Data);
        assert!(it.holder_is_receiver());
        assert!(it.field_index().is_some());

        let it = LookupIterator::new(&realm, Value::object(obj.clone()), Name::string("p"));
        assert_eq!(it.state(), LookupState::Data);
        assert!(it.holder().unwrap().ptr_eq(&proto));
        assert_eq!(it.get_data_value(), Some(Value::Smi(1)));

        let it = LookupIterator::new(&realm, Value::object(obj), Name::string("missing"));
        assert_eq!(it.state(), LookupState::NotFound);
    }

    #[test]
    fn test_non_masking_interceptor_consulted_last() {
        let realm = Realm::new();
        let obj = realm.new_object_with_interceptor(InterceptorInfo::new().non_masking());
        let it = LookupIterator::new(&realm, Value::object(obj.clone()), Name::string("toString_missing"));
        assert_eq!(it.state(), LookupState::Interceptor);

        ops::set_property(&realm, &Value::object(realm.object_prototype().clone()), &Name::string("shared"), Value::Smi(1), Default::default()).unwrap();
        let it = LookupIterator::new(&realm, Value::object(obj), Name::string("shared"));
        assert_eq!(it.state(), LookupState::Data);
    }

    #[test]
    fn test_transition_preparation() {
        let realm = Realm::new();
        let obj = realm.new_object();
        let mut it = LookupIterator::new(&realm, Value::object(obj.clone()), Name::string("fresh_name_xyz"));
        let created = it.prepare_transition_to_data_property(&obj, &Value::Smi(1), PropertyAttributes::data());
        assert!(created);
        assert!(it.is_cacheable_transition());
        let target = it.transition_map().unwrap().clone();

        let other = realm.new_object();
        let mut it = LookupIterator::new(&realm, Value::object(other.clone()), Name::string("fresh_name_xyz"));
        assert!(!it.prepare_transition_to_data_property(&other, &Value::Smi(2), PropertyAttributes::data()));
        assert!(Arc::ptr_eq(it.transition_map().unwrap(), &target));
    }

    #[test]
    fn test_canonical_numeric_strings() {
        assert!(is_canonical_numeric_string("1.5"));
        assert!(is_canonical_numeric_string("-0"));
        assert!(!is_canonical_numeric_string("01"));
        assert!(!is_canonical_numeric_string("foo"));
    }
}
