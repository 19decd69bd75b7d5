//! Generic property access
//!
//! These are the semantics every inline cache handler must reproduce, and
//! the path taken by misses, slow handlers and megamorphic sites.

use crate::accessors::{FunctionKind, InterceptorInfo, NativeAccessor};
use crate::elements::{Element, ElementsKind, ElementsStore, new_elements_capacity};
use crate::error::{MessageTemplate, VmError, VmResult};
use crate::lookup::{AccessorValue, LookupIterator, LookupState};
use crate::object::{DictionaryEntry, DictionaryValue, JsObject};
use crate::property::{LanguageMode, Name, PropertyAttributes, PropertyKey};
use crate::realm::Realm;
use crate::shape::DescriptorValue;
use crate::validity::CellContents;
use crate::value::Value;
use std::sync::Arc;

fn fail(mode: LanguageMode, error: impl FnOnce() -> VmError) -> VmResult<()> {
    match mode {
        LanguageMode::Strict => Err(error()),
        LanguageMode::Sloppy => Ok(()),
    }
}

fn no_access() -> VmError {
    VmError::new_type_error(MessageTemplate::NoAccess, &[])
}

fn illegal_invocation() -> VmError {
    VmError::type_error("Illegal invocation")
}

/// `ToPropertyKey` for primitive keys
pub fn to_property_key(key: &Value) -> PropertyKey {
    match key {
        Value::Smi(n) if *n >= 0 => PropertyKey::Index(*n as u32),
        Value::HeapNumber(n) if n.fract() == 0.0 && *n >= 0.0 && *n < u32::MAX as f64 => PropertyKey::Index(*n as u32),
        other => PropertyKey::from_name(other.to_name()),
    }
}

/// Call `function` with `this`
pub fn call(function: &Value, this: &Value, args: &[Value]) -> VmResult<Value> {
    let Some(data) = function.as_object().and_then(|f| f.function_data()) else {
        return Err(VmError::new_type_error(
            MessageTemplate::CalledNonCallable,
            &[&function.to_display_string()],
        ));
    };
    if let FunctionKind::Api { signature: Some(_) } = data.kind {
        let template = this.as_object().and_then(|o| o.shape().template());
        if !data.is_compatible_receiver(template) {
            return Err(illegal_invocation());
        }
    }
    (data.call)(this, args)
}

/// Run a JS getter; `undefined` getters yield `undefined`
pub fn call_accessor_getter(getter: &Value, receiver: &Value) -> VmResult<Value> {
    if getter.is_undefined() {
        return Ok(Value::Undefined);
    }
    call(getter, receiver, &[])
}

/// Run a native getter after checking the receiver
pub fn call_native_getter(info: &NativeAccessor, receiver: &Value, holder: &JsObject) -> VmResult<Value> {
    if let Some(expected) = info.expected_receiver {
        let actual = receiver.as_object().map(|o| o.shape().instance_type());
        if actual != Some(expected) {
            return Err(illegal_invocation());
        }
    }
    match &info.getter {
        Some(getter) => getter(receiver, holder),
        None => Ok(Value::Undefined),
    }
}

/// Run a native setter after checking the receiver
pub fn call_native_setter(
    info: &NativeAccessor,
    receiver: &Value,
    holder: &JsObject,
    value: Value,
    mode: LanguageMode,
) -> VmResult<()> {
    if let Some(expected) = info.expected_receiver {
        let actual = receiver.as_object().map(|o| o.shape().instance_type());
        if actual != Some(expected) {
            return Err(illegal_invocation());
        }
    }
    match &info.setter {
        Some(setter) => setter(receiver, holder, value),
        None => fail(mode, || {
            VmError::new_type_error(
                MessageTemplate::NoSetterInCallback,
                &[&info.name.to_string(), &receiver.to_display_string()],
            )
        }),
    }
}

/// Ask a named interceptor for a value
pub fn call_interceptor_getter(interceptor: &InterceptorInfo, receiver: &Value, key: &PropertyKey) -> VmResult<Option<Value>> {
    match &interceptor.getter {
        Some(getter) => getter(receiver, key),
        None => Ok(None),
    }
}

// =============================================================================
// Loads
// =============================================================================

/// `receiver[name]`
pub fn get_property(realm: &Realm, receiver: &Value, name: &Name) -> VmResult<Value> {
    if receiver.is_null_or_undefined() {
        return Err(VmError::new_type_error(
            MessageTemplate::NonObjectPropertyLoad,
            &[&name.to_string(), receiver.type_name()],
        ));
    }
    if let Value::String(s) = receiver
        && name.as_str() == Some("length")
    {
        return Ok(Value::number(s.len() as f64));
    }
    if let Some(index) = name.as_array_index() {
        return get_element(realm, receiver, index);
    }
    let mut it = LookupIterator::new(realm, receiver.clone(), name.clone());
    get_property_with(realm, &mut it)
}

/// Finish a load from a positioned lookup
pub fn get_property_with(realm: &Realm, it: &mut LookupIterator) -> VmResult<Value> {
    loop {
        match it.state() {
            LookupState::NotFound | LookupState::Transition | LookupState::IntegerIndexedExotic => {
                return Ok(Value::Undefined);
            }
            LookupState::JsProxy => {
                let Some(proxy) = it.holder().cloned() else {
                    return Ok(Value::Undefined);
                };
                return proxy_get(realm, &proxy, &PropertyKey::Name(it.name().clone()), it.receiver());
            }
            LookupState::AccessCheck => {
                if !it.has_access() {
                    return Err(no_access());
                }
                it.next();
            }
            LookupState::Interceptor => {
                if let Some(interceptor) = it.get_interceptor() {
                    let key = PropertyKey::Name(it.name().clone());
                    if let Some(value) = call_interceptor_getter(&interceptor, it.receiver(), &key)? {
                        return Ok(value);
                    }
                }
                it.next();
            }
            LookupState::Accessor => return get_accessor_property(it),
            LookupState::Data => return Ok(it.get_data_value().unwrap_or_default()),
        }
    }
}

/// Read the accessor the lookup stopped at
pub fn get_accessor_property(it: &LookupIterator) -> VmResult<Value> {
    let Some(holder) = it.holder() else {
        return Ok(Value::Undefined);
    };
    match it.get_accessors() {
        Some(AccessorValue::Pair(pair)) => call_accessor_getter(&pair.getter, it.receiver()),
        Some(AccessorValue::Native(info)) => call_native_getter(&info, it.receiver(), holder),
        None => Ok(Value::Undefined),
    }
}

enum ElementLookup {
    Found(Value),
    Absent,
    Stop,
}

fn own_element(realm: &Realm, obj: &JsObject, index: u32, receiver: &Value) -> VmResult<ElementLookup> {
    if obj.proxy_data().is_some() {
        return proxy_get(realm, obj, &PropertyKey::Index(index), receiver).map(ElementLookup::Found);
    }
    let shape = obj.shape();
    if shape.is_access_check_needed() && !obj.has_access() {
        return Err(no_access());
    }
    if let Some(interceptor) = shape.indexed_interceptor()
        && let Some(value) = call_interceptor_getter(interceptor, receiver, &PropertyKey::Index(index))?
    {
        return Ok(ElementLookup::Found(value));
    }
    match shape.elements_kind() {
        ElementsKind::Typed(_) => {
            return Ok(match obj.with_elements(|e| e.get(index)) {
                Some(Element::Value(v)) => ElementLookup::Found(v),
                _ => ElementLookup::Stop,
            });
        }
        ElementsKind::SloppyArguments => {
            if let Some(args) = obj.arguments_data()
                && index < args.mapped_count
            {
                let value = args.context.read().get(index as usize).cloned().unwrap_or_default();
                return Ok(ElementLookup::Found(value));
            }
        }
        ElementsKind::StringWrapper => {
            if let Some(c) = obj.wrapped_string().and_then(|s| s.char_at(index as usize)) {
                return Ok(ElementLookup::Found(Value::String(c)));
            }
        }
        _ => {}
    }
    if obj.is_js_array() && index >= obj.length() {
        return Ok(ElementLookup::Absent);
    }
    Ok(match obj.with_elements(|e| e.get(index)) {
        Some(Element::Value(v)) => ElementLookup::Found(v),
        _ => ElementLookup::Absent,
    })
}

fn get_element_from(realm: &Realm, start: Option<JsObject>, receiver: &Value, index: u32) -> VmResult<Value> {
    let mut current = start;
    while let Some(obj) = current {
        match own_element(realm, &obj, index, receiver)? {
            ElementLookup::Found(v) => return Ok(v),
            ElementLookup::Stop => return Ok(Value::Undefined),
            ElementLookup::Absent => {}
        }
        current = obj.prototype();
    }
    Ok(Value::Undefined)
}

/// `receiver[index]`
pub fn get_element(realm: &Realm, receiver: &Value, index: u32) -> VmResult<Value> {
    if receiver.is_null_or_undefined() {
        return Err(VmError::new_type_error(
            MessageTemplate::NonObjectPropertyLoad,
            &[&index.to_string(), receiver.type_name()],
        ));
    }
    if let Value::String(s) = receiver
        && let Some(c) = s.char_at(index as usize)
    {
        return Ok(Value::String(c));
    }
    get_element_from(realm, realm.prototype_for_primitive(receiver), receiver, index)
}

/// `object[key]` for any key
pub fn get_object_property(realm: &Realm, object: &Value, key: &Value) -> VmResult<Value> {
    if object.is_null_or_undefined() {
        return Err(VmError::new_type_error(
            MessageTemplate::NonObjectPropertyLoad,
            &[&key.to_display_string(), object.type_name()],
        ));
    }
    match to_property_key(key) {
        PropertyKey::Index(index) => get_element(realm, object, index),
        PropertyKey::Name(name) => get_property(realm, object, &name),
    }
}

fn proxy_get(realm: &Realm, proxy: &JsObject, key: &PropertyKey, receiver: &Value) -> VmResult<Value> {
    let Some(data) = proxy.proxy_data() else {
        return Ok(Value::Undefined);
    };
    if let Some(trap) = &data.get {
        return trap(&data.target, key, receiver);
    }
    match key {
        PropertyKey::Index(index) => get_element_from(realm, Some(data.target.clone()), receiver, *index),
        PropertyKey::Name(name) => {
            let mut it = LookupIterator::with_start(receiver.clone(), Some(data.target.clone()), name.clone());
            get_property_with(realm, &mut it)
        }
    }
}

// =============================================================================
// Stores
// =============================================================================

/// `receiver[name] = value`
pub fn set_property(realm: &Realm, receiver: &Value, name: &Name, value: Value, mode: LanguageMode) -> VmResult<()> {
    if receiver.is_null_or_undefined() {
        return Err(VmError::new_type_error(
            MessageTemplate::NonObjectPropertyStore,
            &[&name.to_string(), receiver.type_name()],
        ));
    }
    if let Some(index) = name.as_array_index() {
        return set_element(realm, receiver, index, value, mode);
    }
    let mut it = LookupIterator::new(realm, receiver.clone(), name.clone());
    set_property_with(realm, &mut it, value, mode)
}

/// Finish a store from a positioned lookup
pub fn set_property_with(realm: &Realm, it: &mut LookupIterator, value: Value, mode: LanguageMode) -> VmResult<()> {
    loop {
        match it.state() {
            LookupState::JsProxy => {
                let Some(proxy) = it.holder().cloned() else {
                    return Ok(());
                };
                let receiver = it.receiver().clone();
                return proxy_set(realm, &proxy, &PropertyKey::Name(it.name().clone()), value, &receiver, mode);
            }
            LookupState::AccessCheck => {
                if !it.has_access() {
                    return Err(no_access());
                }
                it.next();
            }
            LookupState::Interceptor => {
                if it.holder_is_receiver()
                    && let Some(interceptor) = it.get_interceptor()
                    && let Some(setter) = &interceptor.setter
                    && setter(it.receiver(), &PropertyKey::Name(it.name().clone()), &value)?
                {
                    return Ok(());
                }
                it.next();
            }
            LookupState::Accessor => {
                if let Some(AccessorValue::Native(info)) = it.get_accessors()
                    && info.is_special_data_property
                    && !it.holder_is_receiver()
                {
                    break;
                }
                return set_accessor_property(it, value, mode);
            }
            LookupState::IntegerIndexedExotic => return Ok(()),
            LookupState::Data => {
                if it.property_details().is_some_and(|d| d.is_read_only()) {
                    let name = it.name().to_string();
                    return fail(mode, || {
                        VmError::new_type_error(MessageTemplate::StrictReadOnlyProperty, &[&name])
                    });
                }
                if it.holder_is_receiver() {
                    write_data_property(it, value);
                    return Ok(());
                }
                break;
            }
            LookupState::NotFound | LookupState::Transition => break,
        }
    }
    add_own_property(it.receiver(), it.name(), value, mode)
}

fn add_own_property(receiver: &Value, name: &Name, value: Value, mode: LanguageMode) -> VmResult<()> {
    let Some(obj) = receiver.as_object() else {
        let message = format!(
            "Cannot create property '{}' on {} '{}'",
            name,
            receiver.type_name(),
            receiver.to_display_string()
        );
        return fail(mode, || VmError::type_error(message));
    };
    if !obj.is_extensible() {
        return fail(mode, || {
            VmError::new_type_error(MessageTemplate::ObjectNotExtensible, &[&name.to_string()])
        });
    }
    add_data_property(obj, name, value, PropertyAttributes::data());
    Ok(())
}

/// Store to the data property the lookup found on the receiver
pub fn write_data_property(it: &mut LookupIterator, value: Value) {
    let Some(holder) = it.holder().cloned() else { return };
    it.prepare_for_data_property(&value);
    let shape = holder.shape();
    if shape.is_js_global_object_map() {
        if let Some(cell) = holder.property_cell(it.name()) {
            cell.set_value(value);
        }
        return;
    }
    if shape.is_dictionary_map() {
        holder.dictionary_set_value(it.name(), value);
        return;
    }
    if let Some(index) = it.field_index() {
        holder.write_field(index, value);
    }
}

/// Run the setter the lookup stopped at
pub fn set_accessor_property(it: &LookupIterator, value: Value, mode: LanguageMode) -> VmResult<()> {
    let Some(holder) = it.holder() else { return Ok(()) };
    match it.get_accessors() {
        Some(AccessorValue::Pair(pair)) => {
            if pair.setter.is_undefined() {
                let name = it.name().to_string();
                let receiver = it.receiver().to_display_string();
                return fail(mode, || {
                    VmError::new_type_error(MessageTemplate::NoSetterInCallback, &[&name, &receiver])
                });
            }
            call(&pair.setter, it.receiver(), &[value]).map(|_| ())
        }
        Some(AccessorValue::Native(info)) => call_native_setter(&info, it.receiver(), holder, value, mode),
        None => Ok(()),
    }
}

/// Add a new own data property without any checks
pub fn add_data_property(obj: &JsObject, name: &Name, value: Value, attributes: PropertyAttributes) {
    obj.migrate_instance();
    let shape = obj.shape();
    if shape.is_js_global_object_map() {
        obj.define_property_cell(name, CellContents::Data(value), attributes);
        return;
    }
    if shape.is_dictionary_map() {
        obj.dictionary_insert(
            name.clone(),
            DictionaryEntry {
                value: DictionaryValue::Data(value),
                attributes,
            },
        );
        if obj.is_prototype() {
            obj.invalidate_prototype_chains();
        }
        return;
    }
    let (target, _) = shape.transition_to_data_field(name, &value, attributes);
    if target.is_dictionary_map() {
        obj.normalize_properties();
        obj.dictionary_insert(
            name.clone(),
            DictionaryEntry {
                value: DictionaryValue::Data(value),
                attributes,
            },
        );
        return;
    }
    let number = target.number_of_own_descriptors() - 1;
    if let Some(index) = target.field_index(number) {
        obj.set_shape(target);
        obj.write_field(index, value);
    }
}

fn has_own_named_property(obj: &JsObject, name: &Name) -> bool {
    let shape = obj.shape();
    if shape.is_js_global_object_map() {
        obj.property_cell(name).is_some_and(|c| !c.is_hole())
    } else if shape.is_dictionary_map() {
        obj.dictionary_contains(name)
    } else {
        shape.lookup(name).is_some()
    }
}

/// `Object.defineProperty(obj, name, { value, ...attributes })`
pub fn define_data_property(obj: &JsObject, name: &Name, value: Value, attributes: PropertyAttributes) {
    if !has_own_named_property(obj, name) {
        add_data_property(obj, name, value, attributes);
        return;
    }
    let shape = obj.shape();
    if shape.is_js_global_object_map() {
        obj.define_property_cell(name, CellContents::Data(value), attributes);
        return;
    }
    obj.normalize_properties();
    obj.dictionary_insert(
        name.clone(),
        DictionaryEntry {
            value: DictionaryValue::Data(value),
            attributes,
        },
    );
    if obj.is_prototype() {
        obj.invalidate_prototype_chains();
    }
}

/// Define a data property whose value the shape holds as a constant, the
/// way methods on prototypes are installed
pub fn define_constant_property(obj: &JsObject, name: &Name, value: Value, attributes: PropertyAttributes) {
    let shape = obj.shape();
    if shape.is_dictionary_map() || has_own_named_property(obj, name) {
        define_data_property(obj, name, value, attributes);
        return;
    }
    obj.set_shape(shape.transition_to_constant(name, value, attributes));
}

/// Define a JS getter/setter pair
pub fn define_accessor_property(obj: &JsObject, name: &Name, getter: Value, setter: Value, attributes: PropertyAttributes) {
    let pair = crate::accessors::AccessorPair::new(getter, setter);
    let shape = obj.shape();
    if shape.is_js_global_object_map() {
        obj.define_property_cell(name, CellContents::Accessor(pair), attributes);
        return;
    }
    if shape.is_dictionary_map() {
        obj.dictionary_insert(
            name.clone(),
            DictionaryEntry {
                value: DictionaryValue::Accessor(pair),
                attributes,
            },
        );
        if obj.is_prototype() {
            obj.invalidate_prototype_chains();
        }
        return;
    }
    obj.set_shape(shape.copy_with_accessor(name, DescriptorValue::AccessorPair(pair), attributes));
}

/// Define a native accessor
pub fn define_native_accessor(obj: &JsObject, info: NativeAccessor, attributes: PropertyAttributes) {
    let name = info.name.clone();
    let info = Arc::new(info);
    let shape = obj.shape();
    if shape.is_dictionary_map() {
        obj.dictionary_insert(
            name,
            DictionaryEntry {
                value: DictionaryValue::Native(info),
                attributes,
            },
        );
        if obj.is_prototype() {
            obj.invalidate_prototype_chains();
        }
        return;
    }
    obj.set_shape(shape.copy_with_accessor(&name, DescriptorValue::Native(info), attributes));
}

/// `delete obj[name]`
pub fn delete_property(obj: &JsObject, name: &Name) -> bool {
    obj.migrate_instance();
    let shape = obj.shape();
    if shape.is_js_global_object_map() {
        if obj
            .property_cell(name)
            .is_some_and(|c| !c.is_hole() && !c.attributes().configurable)
        {
            return false;
        }
        obj.delete_property_cell(name);
        return true;
    }
    if shape.is_dictionary_map() {
        if obj.dictionary_get(name).is_some_and(|e| !e.attributes.configurable) {
            return false;
        }
        obj.dictionary_remove(name);
        if obj.is_prototype() {
            obj.invalidate_prototype_chains();
        }
        return true;
    }
    let Some(number) = shape.lookup(name) else {
        return true;
    };
    let Some(descriptor) = shape.descriptor(number) else {
        return true;
    };
    if !descriptor.details.attributes.configurable {
        return false;
    }
    // Deleting the most recently added field rolls back the transition.
    if number + 1 == shape.number_of_own_descriptors()
        && !shape.is_prototype_map()
        && let Some(parent) = shape.back_pointer()
        && parent.number_of_own_descriptors() == number
        && matches!(descriptor.value, DescriptorValue::Field)
    {
        if let Some(index) = shape.field_index(number) {
            obj.write_field(index, Value::Undefined);
        }
        obj.set_shape(parent.clone());
        return true;
    }
    obj.normalize_properties();
    obj.dictionary_remove(name);
    if obj.is_prototype() {
        obj.invalidate_prototype_chains();
    }
    true
}

// =============================================================================
// Element stores
// =============================================================================

/// `receiver[index] = value`
pub fn set_element(realm: &Realm, receiver: &Value, index: u32, value: Value, mode: LanguageMode) -> VmResult<()> {
    match receiver {
        Value::Undefined | Value::Null => Err(VmError::new_type_error(
            MessageTemplate::NonObjectPropertyStore,
            &[&index.to_string(), receiver.type_name()],
        )),
        Value::Object(obj) => set_object_element(realm, obj, index, value, mode),
        Value::String(s) if (index as usize) < s.len() => fail(mode, || {
            VmError::new_type_error(MessageTemplate::StrictReadOnlyProperty, &[&index.to_string()])
        }),
        other => {
            let message = format!(
                "Cannot create property '{}' on {} '{}'",
                index,
                other.type_name(),
                other.to_display_string()
            );
            fail(mode, || VmError::type_error(message))
        }
    }
}

fn set_object_element(realm: &Realm, obj: &JsObject, index: u32, value: Value, mode: LanguageMode) -> VmResult<()> {
    if obj.proxy_data().is_some() {
        return proxy_set(realm, obj, &PropertyKey::Index(index), value, &Value::Object(obj.clone()), mode);
    }
    let shape = obj.shape();
    if shape.is_access_check_needed() && !obj.has_access() {
        return Err(no_access());
    }
    if let Some(interceptor) = shape.indexed_interceptor()
        && let Some(setter) = &interceptor.setter
        && setter(&Value::Object(obj.clone()), &PropertyKey::Index(index), &value)?
    {
        return Ok(());
    }
    match shape.elements_kind() {
        ElementsKind::Typed(kind) => {
            let n = value.to_number()?;
            obj.with_elements_mut(|elements, _| {
                if let ElementsStore::Typed(data) = elements
                    && let Some(slot) = data.get_mut(index as usize)
                {
                    *slot = kind.coerce(n);
                }
            });
            return Ok(());
        }
        ElementsKind::SloppyArguments => {
            if let Some(args) = obj.arguments_data()
                && index < args.mapped_count
            {
                if let Some(slot) = args.context.write().get_mut(index as usize) {
                    *slot = value;
                }
                return Ok(());
            }
        }
        ElementsKind::StringWrapper => {
            if obj.wrapped_string().is_some_and(|s| (index as usize) < s.len()) {
                return fail(mode, || {
                    VmError::new_type_error(MessageTemplate::StrictReadOnlyProperty, &[&index.to_string()])
                });
            }
        }
        _ => {}
    }
    store_own_element(obj, index, value, mode)
}

/// Store into the receiver's own elements, transitioning the elements kind
/// and growing or normalizing the backing store as needed
pub fn store_own_element(obj: &JsObject, index: u32, value: Value, mode: LanguageMode) -> VmResult<()> {
    let kind = obj.elements_kind();
    let is_array = obj.is_js_array();
    let exists = obj.with_elements(|e| matches!(e.get(index), Some(Element::Value(_))));
    if !exists && !obj.is_extensible() {
        return fail(mode, || {
            VmError::new_type_error(MessageTemplate::ObjectNotExtensible, &[&index.to_string()])
        });
    }

    if kind == ElementsKind::Dictionary || (kind.is_fast() && obj.would_convert_to_slow_elements(index)) {
        obj.transition_elements_kind(ElementsKind::Dictionary);
        obj.with_elements_mut(|elements, length| {
            if let ElementsStore::Dictionary(map) = elements {
                map.insert(index, value);
            }
            if is_array && index >= *length {
                *length = index + 1;
            }
        });
        return Ok(());
    }

    if kind.is_fast() {
        let length = if is_array { obj.length() } else { obj.elements_capacity() };
        let mut target = kind.for_value(&value);
        if index > length {
            target = target.to_holey();
        }
        if target != kind {
            obj.transition_elements_kind(target);
        }
    }
    obj.with_elements_mut(|elements, length| {
        if let Some(slots) = elements.fast_slots_mut() {
            let i = index as usize;
            if i >= slots.len() {
                slots.resize(new_elements_capacity(index + 1) as usize, Element::Hole);
            }
            slots[i] = Element::Value(value);
        }
        if is_array && index >= *length {
            *length = index + 1;
        }
    });
    Ok(())
}

/// `array.length = value`
pub fn set_array_length(array: &JsObject, value: &Value) -> VmResult<()> {
    let n = value.to_number()?;
    if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
        return Err(VmError::range_error("Invalid array length"));
    }
    let new_length = n as u32;
    let old_length = array.length();
    array.with_elements_mut(|elements, length| {
        if new_length < *length {
            match elements {
                ElementsStore::Dictionary(map) => map.retain(|k, _| *k < new_length),
                other => {
                    if let Some(slots) = other.fast_slots_mut() {
                        slots.truncate(new_length as usize);
                    }
                }
            }
        }
        *length = new_length;
    });
    let kind = array.elements_kind();
    if new_length > old_length && kind.is_fast() && !kind.is_holey() {
        array.transition_elements_kind(kind.to_holey());
    }
    Ok(())
}

/// `object[key] = value` for any key
pub fn set_object_property(realm: &Realm, object: &Value, key: &Value, value: Value, mode: LanguageMode) -> VmResult<()> {
    if object.is_null_or_undefined() {
        return Err(VmError::new_type_error(
            MessageTemplate::NonObjectPropertyStore,
            &[&key.to_display_string(), object.type_name()],
        ));
    }
    match to_property_key(key) {
        PropertyKey::Index(index) => set_element(realm, object, index, value, mode),
        PropertyKey::Name(name) => set_property(realm, object, &name, value, mode),
    }
}

fn proxy_set(
    realm: &Realm,
    proxy: &JsObject,
    key: &PropertyKey,
    value: Value,
    receiver: &Value,
    mode: LanguageMode,
) -> VmResult<()> {
    let Some(data) = proxy.proxy_data() else {
        return Ok(());
    };
    if let Some(trap) = &data.set {
        if trap(&data.target, key, value, receiver)? {
            return Ok(());
        }
        return fail(mode, || VmError::type_error("'set' on proxy: trap returned falsish"));
    }
    let target = Value::Object(data.target.clone());
    match key {
        PropertyKey::Index(index) => set_element(realm, &target, *index, value, mode),
        PropertyKey::Name(name) => set_property(realm, &target, name, value, mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::TypedArrayKind;

    fn name(s: &str) -> Name {
        Name::string(s)
    }

    #[test]
    fn test_get_set_roundtrip_and_transitions() {
        let realm = Realm::new();
        let a = realm.new_object();
        let b = realm.new_object();
        set_property(&realm, &Value::object(a.clone()), &name("x"), Value::Smi(1), LanguageMode::Sloppy).unwrap();
        set_property(&realm, &Value::object(b.clone()), &name("x"), Value::Smi(2), LanguageMode::Sloppy).unwrap();
        assert!(Arc::ptr_eq(&a.shape(), &b.shape()));
        assert_eq!(get_property(&realm, &Value::object(b), &name("x")).unwrap(), Value::Smi(2));
    }

    #[test]
    fn test_representation_generalization() {
        let realm = Realm::new();
        let a = realm.new_object();
        let av = Value::object(a.clone());
        set_property(&realm, &av, &name("x"), Value::Smi(1), LanguageMode::Sloppy).unwrap();
        let smi_shape = a.shape();
        set_property(&realm, &av, &name("x"), Value::string("s"), LanguageMode::Sloppy).unwrap();
        assert!(smi_shape.is_deprecated());
        assert_eq!(get_property(&realm, &av, &name("x")).unwrap(), Value::string("s"));
    }

    #[test]
    fn test_null_receiver_errors() {
        let realm = Realm::new();
        let err = get_property(&realm, &Value::Undefined, &name("foo")).unwrap_err();
        assert!(err.is_type_error());
        assert!(err.to_string().contains("Cannot read property 'foo' of undefined"));
    }

    #[test]
    fn test_strict_read_only() {
        let realm = Realm::new();
        let obj = realm.new_object();
        define_data_property(&obj, &name("ro"), Value::Smi(1), PropertyAttributes::read_only());
        let ov = Value::object(obj);
        assert!(set_property(&realm, &ov, &name("ro"), Value::Smi(2), LanguageMode::Sloppy).is_ok());
        assert!(set_property(&realm, &ov, &name("ro"), Value::Smi(2), LanguageMode::Strict).is_err());
        assert_eq!(get_property(&realm, &ov, &name("ro")).unwrap(), Value::Smi(1));
    }

    #[test]
    fn test_array_growth_and_holes() {
        let realm = Realm::new();
        let array = realm.new_array(vec![Value::Smi(1), Value::Smi(2)]);
        let av = Value::object(array.clone());
        set_element(&realm, &av, 2, Value::Smi(3), LanguageMode::Sloppy).unwrap();
        assert_eq!(array.length(), 3);
        assert_eq!(array.elements_kind(), ElementsKind::PackedSmi);
        set_element(&realm, &av, 5, Value::HeapNumber(1.5), LanguageMode::Sloppy).unwrap();
        assert_eq!(array.elements_kind(), ElementsKind::HoleyDouble);
        assert_eq!(get_element(&realm, &av, 4).unwrap(), Value::Undefined);
        set_element(&realm, &av, 5000, Value::Smi(1), LanguageMode::Sloppy).unwrap();
        assert_eq!(array.elements_kind(), ElementsKind::Dictionary);
        assert_eq!(array.length(), 5001);
    }

    #[test]
    fn test_typed_array_stores() {
        let realm = Realm::new();
        let ta = realm.new_typed_array(TypedArrayKind::Uint8, 2);
        let tv = Value::object(ta.clone());
        set_element(&realm, &tv, 0, Value::Smi(257), LanguageMode::Strict).unwrap();
        set_element(&realm, &tv, 9, Value::Smi(1), LanguageMode::Strict).unwrap();
        assert_eq!(get_element(&realm, &tv, 0).unwrap(), Value::Smi(1));
        assert_eq!(get_element(&realm, &tv, 9).unwrap(), Value::Undefined);
        assert_eq!(ta.length(), 2);
    }

    #[test]
    fn test_copy_on_write_arrays() {
        let realm = Realm::new();
        let literal = realm.new_array(vec![Value::Smi(1), Value::Smi(2)]);
        let copy = literal.clone_with_copy_on_write_elements().unwrap();
        assert!(copy.shares_elements_with(&literal));
        set_element(&realm, &Value::object(copy.clone()), 0, Value::Smi(9), LanguageMode::Sloppy).unwrap();
        assert!(!copy.shares_elements_with(&literal));
        assert_eq!(get_element(&realm, &Value::object(literal), 0).unwrap(), Value::Smi(1));
    }

    #[test]
    fn test_delete_last_property_rolls_back() {
        let realm = Realm::new();
        let obj = realm.new_object();
        let ov = Value::object(obj.clone());
        set_property(&realm, &ov, &name("a"), Value::Smi(1), LanguageMode::Sloppy).unwrap();
        let after_a = obj.shape();
        set_property(&realm, &ov, &name("b"), Value::Smi(2), LanguageMode::Sloppy).unwrap();
        assert!(delete_property(&obj, &name("b")));
        assert!(Arc::ptr_eq(&obj.shape(), &after_a));
        assert!(delete_property(&obj, &name("a")) && !obj.shape().is_dictionary_map());
        set_property(&realm, &ov, &name("c"), Value::Smi(3), LanguageMode::Sloppy).unwrap();
        set_property(&realm, &ov, &name("d"), Value::Smi(4), LanguageMode::Sloppy).unwrap();
        assert!(delete_property(&obj, &name("c")));
        assert!(obj.shape().is_dictionary_map());
        assert_eq!(get_property(&realm, &ov, &name("d")).unwrap(), Value::Smi(4));
    }

    #[test]
    fn test_sloppy_arguments_alias_context() {
        let realm = Realm::new();
        let context = Arc::new(parking_lot::RwLock::new(vec![Value::Smi(1), Value::Smi(2)]));
        let args = realm.new_sloppy_arguments(context.clone(), 2, vec![Value::Smi(3)]);
        let av = Value::object(args);
        assert_eq!(get_element(&realm, &av, 1).unwrap(), Value::Smi(2));
        set_element(&realm, &av, 0, Value::Smi(10), LanguageMode::Sloppy).unwrap();
        assert_eq!(context.read()[0], Value::Smi(10));
        assert_eq!(get_element(&realm, &av, 2).unwrap(), Value::Smi(3));
    }

    #[test]
    fn test_string_receivers() {
        let realm = Realm::new();
        let s = Value::string("abc");
        assert_eq!(get_property(&realm, &s, &name("length")).unwrap(), Value::Smi(3));
        assert_eq!(get_element(&realm, &s, 1).unwrap(), Value::string("b"));
        assert_eq!(get_element(&realm, &s, 7).unwrap(), Value::Undefined);
    }
}
