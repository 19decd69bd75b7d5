//! Handler execution
//!
//! These functions run a cached handler against a concrete receiver. They
//! never touch feedback: a handler whose assumptions no longer hold reports
//! [`HandlerOutcome::Miss`] and the caller takes the IC miss path, while
//! [`HandlerOutcome::Slow`] asks for the generic operation without a miss.

use crate::handler::{
    DictionaryMode, ElementAccess, ElementHandler, Handler, HolderRef, PrototypeChainHandler, PrototypeCheck,
};
use crate::store_mode::KeyedAccessStoreMode;
use otter_vm_object::elements::new_elements_capacity;
use otter_vm_object::object::DictionaryValue;
use otter_vm_object::{
    BuiltinField, CellContents, DescriptorValue, Element, ElementsKind, ElementsStore, JsObject, LanguageMode,
    LookupIterator, Name, PropertyCell, Realm, ShapeRef, Value, VmResult, ops,
};

/// Result of running a handler
#[derive(Debug)]
pub(crate) enum HandlerOutcome<T> {
    /// The handler performed the access
    Done(T),
    /// The handler does not apply; update feedback
    Miss,
    /// Use the generic operation, leaving feedback alone
    Slow,
}

use HandlerOutcome::{Done, Miss, Slow};

// =============================================================================
// Prototype chain validation
// =============================================================================

fn checks_pass(realm: &Realm, checks: &[PrototypeCheck], name: &Name) -> bool {
    checks.iter().all(|check| match check {
        PrototypeCheck::NativeContext(id) => realm.id() == *id,
        PrototypeCheck::GlobalPropertyCell(cell) => cell.upgrade().is_some_and(|c| c.is_hole()),
        PrototypeCheck::DictionaryNegativeLookup(obj) => obj.upgrade().is_some_and(|o| !o.dictionary_contains(name)),
    })
}

fn chain_is_valid(realm: &Realm, receiver: &Value, chain: &PrototypeChainHandler, name: &Name) -> bool {
    if chain.validity_cell.as_ref().is_some_and(|c| !c.is_valid()) {
        return false;
    }
    if chain.holder.as_ref().is_some_and(|h| !h.is_alive()) {
        return false;
    }
    if chain.lookup_on_receiver && receiver.as_object().is_none_or(|o| o.dictionary_contains(name)) {
        return false;
    }
    if chain.access_check_on_receiver && receiver.as_object().is_some_and(|o| !o.has_access()) {
        return false;
    }
    checks_pass(realm, &chain.checks, name)
}

/// Object a base handler operates on
fn resolve_holder(receiver: &Value, holder: Option<&HolderRef>) -> Option<JsObject> {
    match holder {
        Some(HolderRef::Object(obj)) => obj.upgrade(),
        Some(HolderRef::Cell(_)) => None,
        None => receiver.as_object().cloned(),
    }
}

// =============================================================================
// Named loads
// =============================================================================

/// Run a load handler for `receiver[name]`
pub(crate) fn load(
    realm: &Realm,
    receiver: &Value,
    shape: &ShapeRef,
    name: &Name,
    handler: &Handler,
) -> VmResult<HandlerOutcome<Value>> {
    load_from(realm, receiver, shape, name, handler, None)
}

fn load_from(
    realm: &Realm,
    receiver: &Value,
    shape: &ShapeRef,
    name: &Name,
    handler: &Handler,
    holder: Option<&HolderRef>,
) -> VmResult<HandlerOutcome<Value>> {
    match handler {
        Handler::Slow => return Ok(Slow),
        Handler::PrototypeChain(chain) => {
            if !chain_is_valid(realm, receiver, chain, name) {
                return Ok(Miss);
            }
            return load_from(realm, receiver, shape, name, &chain.base, chain.holder.as_ref());
        }
        Handler::Compiled(compiled) => {
            if !compiled.matches(shape) || &compiled.name != name {
                return Ok(Miss);
            }
            return load_from(realm, receiver, shape, name, &compiled.body, holder);
        }
        Handler::NonExistent => return Ok(Done(Value::Undefined)),
        Handler::StringLength => {
            return Ok(match receiver {
                Value::String(s) => Done(Value::number(s.len() as f64)),
                _ => Miss,
            });
        }
        Handler::PropertyCell(cell) => {
            let Some(cell) = cell.upgrade() else { return Ok(Miss) };
            return load_cell(receiver, &cell);
        }
        Handler::Transition(_) | Handler::Element(_) | Handler::ElementsTransitionAndStore(_) => return Ok(Miss),
        _ => {}
    }

    let Some(holder) = resolve_holder(receiver, holder) else {
        return Ok(Miss);
    };
    let outcome = match handler {
        Handler::Field { index, .. } => holder.read_field(*index).map_or(Miss, Done),
        Handler::Constant { descriptor } => match holder.shape().descriptor(*descriptor).map(|d| &d.value) {
            Some(DescriptorValue::Constant(value)) => Done(value.clone()),
            _ => Miss,
        },
        Handler::Accessor { descriptor } | Handler::ApiAccessor { descriptor } => {
            let getter = match holder.shape().descriptor(*descriptor).map(|d| &d.value) {
                Some(DescriptorValue::AccessorPair(pair)) => pair.getter.clone(),
                _ => return Ok(Miss),
            };
            Done(ops::call_accessor_getter(&getter, receiver)?)
        }
        Handler::NativeAccessor { descriptor } => {
            let info = match holder.shape().descriptor(*descriptor).map(|d| &d.value) {
                Some(DescriptorValue::Native(info)) => info.clone(),
                _ => return Ok(Miss),
            };
            Done(ops::call_native_getter(&info, receiver, &holder)?)
        }
        Handler::BuiltinField(BuiltinField::ArrayLength) => Done(Value::number(holder.length() as f64)),
        Handler::BuiltinField(BuiltinField::StringLength) | Handler::StringWrapperLength => {
            match holder.wrapped_string() {
                Some(s) => Done(Value::number(s.len() as f64)),
                None => Miss,
            }
        }
        Handler::FunctionPrototype => match holder.function_data() {
            Some(data) => Done(data.prototype.read().clone()),
            None => Miss,
        },
        // Uninitialized exports throw from the runtime path.
        Handler::ModuleExport(index) => match holder.module_exports() {
            Some(exports) => exports.get(*index).map_or(Slow, Done),
            None => Miss,
        },
        Handler::Dictionary(DictionaryMode::Normal) => match holder.dictionary_get(name).map(|e| e.value) {
            Some(DictionaryValue::Data(value)) => Done(value),
            Some(DictionaryValue::Accessor(pair)) => Done(ops::call_accessor_getter(&pair.getter, receiver)?),
            Some(DictionaryValue::Native(info)) => Done(ops::call_native_getter(&info, receiver, &holder)?),
            None => Miss,
        },
        Handler::Dictionary(DictionaryMode::Global) => match holder.property_cell(name) {
            Some(cell) => return load_cell(receiver, &cell),
            None => Miss,
        },
        Handler::Interceptor | Handler::Proxy => {
            let mut it = LookupIterator::with_start(receiver.clone(), Some(holder), name.clone());
            Done(ops::get_property_with(realm, &mut it)?)
        }
        _ => Miss,
    };
    Ok(outcome)
}

fn load_cell(receiver: &Value, cell: &PropertyCell) -> VmResult<HandlerOutcome<Value>> {
    Ok(match cell.contents() {
        CellContents::Hole => Miss,
        CellContents::Data(value) => Done(value),
        CellContents::Accessor(pair) => Done(ops::call_accessor_getter(&pair.getter, receiver)?),
    })
}

// =============================================================================
// Named stores
// =============================================================================

/// Run a store handler for `receiver[name] = value`
pub(crate) fn store(
    realm: &Realm,
    receiver: &Value,
    shape: &ShapeRef,
    name: &Name,
    value: &Value,
    mode: LanguageMode,
    handler: &Handler,
) -> VmResult<HandlerOutcome<()>> {
    store_to(realm, receiver, shape, name, value, mode, handler, None)
}

#[allow(clippy::too_many_arguments)]
fn store_to(
    realm: &Realm,
    receiver: &Value,
    shape: &ShapeRef,
    name: &Name,
    value: &Value,
    mode: LanguageMode,
    handler: &Handler,
    holder: Option<&HolderRef>,
) -> VmResult<HandlerOutcome<()>> {
    match handler {
        Handler::Slow => return Ok(Slow),
        Handler::PrototypeChain(chain) => {
            if !chain_is_valid(realm, receiver, chain, name) {
                return Ok(Miss);
            }
            return store_to(realm, receiver, shape, name, value, mode, &chain.base, chain.holder.as_ref());
        }
        Handler::Compiled(compiled) => {
            if !compiled.matches(shape) || &compiled.name != name {
                return Ok(Miss);
            }
            return store_to(realm, receiver, shape, name, value, mode, &compiled.body, holder);
        }
        Handler::PropertyCell(cell) => {
            let Some(cell) = cell.upgrade() else { return Ok(Miss) };
            return Ok(store_cell(&cell, value));
        }
        Handler::Transition(transition) => {
            let Some(obj) = receiver.as_object() else { return Ok(Miss) };
            let Some(target) = transition.live_target() else { return Ok(Miss) };
            if transition.validity_cell.as_ref().is_some_and(|c| !c.is_valid())
                || !checks_pass(realm, &transition.checks, name)
                || !transition.representation.fits(value)
            {
                return Ok(Miss);
            }
            if transition.extend_storage {
                let needed = target.out_of_object_capacity().saturating_sub(obj.out_of_object_len());
                obj.extend_property_backing_store(needed);
            }
            return Ok(if obj.transition_and_write_field(shape, target, transition.field_index, value.clone()) {
                Done(())
            } else {
                Miss
            });
        }
        _ => {}
    }

    let Some(holder) = resolve_holder(receiver, holder) else {
        return Ok(Miss);
    };
    let outcome = match handler {
        Handler::Field { index, representation } => {
            if representation.fits(value) && holder.write_field(*index, value.clone()) {
                Done(())
            } else {
                Miss
            }
        }
        Handler::Dictionary(DictionaryMode::Normal) => {
            if holder.dictionary_set_value(name, value.clone()) {
                Done(())
            } else {
                Miss
            }
        }
        Handler::Dictionary(DictionaryMode::Global) => match holder.property_cell(name) {
            Some(cell) => store_cell(&cell, value),
            None => Miss,
        },
        Handler::Accessor { descriptor } | Handler::ApiAccessor { descriptor } => {
            let setter = match holder.shape().descriptor(*descriptor).map(|d| &d.value) {
                Some(DescriptorValue::AccessorPair(pair)) => pair.setter.clone(),
                _ => return Ok(Miss),
            };
            if setter.is_undefined() {
                return Ok(Slow);
            }
            ops::call(&setter, receiver, std::slice::from_ref(value))?;
            Done(())
        }
        Handler::NativeAccessor { descriptor } => {
            let info = match holder.shape().descriptor(*descriptor).map(|d| &d.value) {
                Some(DescriptorValue::Native(info)) => info.clone(),
                _ => return Ok(Miss),
            };
            ops::call_native_setter(&info, receiver, &holder, value.clone(), mode)?;
            Done(())
        }
        Handler::Interceptor | Handler::Proxy => {
            let mut it = LookupIterator::with_start(receiver.clone(), Some(holder), name.clone());
            ops::set_property_with(realm, &mut it, value.clone(), mode)?;
            Done(())
        }
        _ => Miss,
    };
    Ok(outcome)
}

fn store_cell(cell: &PropertyCell, value: &Value) -> HandlerOutcome<()> {
    if cell.value().is_none() || !cell.attributes().writable {
        return Miss;
    }
    cell.set_value(value.clone());
    Done(())
}

// =============================================================================
// Element loads
// =============================================================================

/// Run a keyed load handler for `receiver[index]`
pub(crate) fn load_element(
    realm: &Realm,
    receiver: &Value,
    index: u32,
    handler: &Handler,
) -> VmResult<HandlerOutcome<Value>> {
    match handler {
        Handler::Slow => Ok(Slow),
        Handler::Element(element) => load_element_with(realm, receiver, index, element),
        _ => Ok(Miss),
    }
}

fn load_element_with(
    realm: &Realm,
    receiver: &Value,
    index: u32,
    handler: &ElementHandler,
) -> VmResult<HandlerOutcome<Value>> {
    if handler.access == ElementAccess::IndexedString {
        return Ok(match receiver {
            Value::String(s) => s.char_at(index as usize).map_or(Slow, |c| Done(Value::String(c))),
            _ => Miss,
        });
    }
    let Some(obj) = receiver.as_object() else {
        return Ok(Miss);
    };
    let outcome = match handler.access {
        ElementAccess::Fast => {
            let limit = if handler.is_js_array {
                obj.length()
            } else {
                obj.elements_capacity()
            };
            let element = if index < limit {
                obj.with_elements(|e| e.get(index))
            } else {
                None
            };
            match element {
                Some(Element::Value(value)) => Done(value),
                // Holes and out-of-bounds reads see the prototype chain.
                _ if handler.convert_hole_to_undefined && realm.no_elements_protector_intact() => {
                    Done(Value::Undefined)
                }
                _ => Slow,
            }
        }
        ElementAccess::Typed => match obj.with_elements(|e| e.get(index)) {
            Some(Element::Value(value)) if index < obj.length() => Done(value),
            _ => Done(Value::Undefined),
        },
        ElementAccess::Dictionary => match obj.with_elements(|e| e.get(index)) {
            Some(Element::Value(value)) => Done(value),
            _ => Slow,
        },
        ElementAccess::SloppyArguments => {
            let mapped = obj
                .arguments_data()
                .filter(|args| index < args.mapped_count)
                .map(|args| args.context.read().get(index as usize).cloned().unwrap_or_default());
            match mapped.or_else(|| obj.with_elements(|e| e.get(index)).and_then(|e| e.value().cloned())) {
                Some(value) => Done(value),
                None => Slow,
            }
        }
        ElementAccess::Interceptor => Done(ops::get_element(realm, receiver, index)?),
        ElementAccess::IndexedString => Miss,
    };
    Ok(outcome)
}

// =============================================================================
// Element stores
// =============================================================================

/// Run a keyed store handler for `receiver[index] = value`
pub(crate) fn store_element(
    realm: &Realm,
    receiver: &Value,
    index: u32,
    value: &Value,
    mode: LanguageMode,
    handler: &Handler,
) -> VmResult<HandlerOutcome<()>> {
    let Some(obj) = receiver.as_object() else {
        return Ok(if handler.is_slow() { Slow } else { Miss });
    };
    match handler {
        Handler::Slow => Ok(Slow),
        Handler::Element(element) => store_element_with(realm, obj, index, value, mode, element),
        Handler::ElementsTransitionAndStore(transition) => {
            let Some(target) = transition.target.upgrade().filter(|t| !t.is_deprecated()) else {
                return Ok(Miss);
            };
            if !transition.store.elements_kind.accepts(value) {
                return Ok(Miss);
            }
            obj.transition_elements_kind(target.elements_kind());
            store_element_with(realm, obj, index, value, mode, &transition.store)
        }
        _ => Ok(Miss),
    }
}

fn store_element_with(
    realm: &Realm,
    obj: &JsObject,
    index: u32,
    value: &Value,
    mode: LanguageMode,
    handler: &ElementHandler,
) -> VmResult<HandlerOutcome<()>> {
    if handler.validity_cell.as_ref().is_some_and(|c| !c.is_valid()) {
        return Ok(Miss);
    }
    let outcome = match handler.access {
        ElementAccess::Fast => store_fast_element(realm, obj, index, value, handler),
        ElementAccess::Typed => {
            let ElementsKind::Typed(kind) = handler.elements_kind else {
                return Ok(Miss);
            };
            let n = value.to_number()?;
            if index < obj.length() {
                obj.with_elements_mut(|elements, _| {
                    if let ElementsStore::Typed(data) = elements
                        && let Some(slot) = data.get_mut(index as usize)
                    {
                        *slot = kind.coerce(n);
                    }
                });
                Done(())
            } else if handler.store_mode == KeyedAccessStoreMode::IgnoreOutOfBounds {
                Done(())
            } else {
                Miss
            }
        }
        ElementAccess::Dictionary => {
            ops::store_own_element(obj, index, value.clone(), mode)?;
            Done(())
        }
        ElementAccess::SloppyArguments => {
            let mapped = obj.arguments_data().filter(|args| index < args.mapped_count);
            match mapped {
                Some(args) => {
                    if let Some(slot) = args.context.write().get_mut(index as usize) {
                        *slot = value.clone();
                    }
                }
                None => ops::store_own_element(obj, index, value.clone(), mode)?,
            }
            Done(())
        }
        ElementAccess::IndexedString | ElementAccess::Interceptor => Slow,
    };
    Ok(outcome)
}

fn store_fast_element(
    realm: &Realm,
    obj: &JsObject,
    index: u32,
    value: &Value,
    handler: &ElementHandler,
) -> HandlerOutcome<()> {
    if !handler.elements_kind.accepts(value) {
        return Miss;
    }
    let copies = handler.store_mode == KeyedAccessStoreMode::HandleCopyOnWrite || handler.store_mode.is_grow();
    if obj.has_copy_on_write_elements() && !copies {
        return Miss;
    }
    let limit = if handler.is_js_array {
        obj.length()
    } else {
        obj.elements_capacity()
    };

    if index < limit {
        // Filling a hole must not skip an indexed setter on the prototype chain.
        let is_hole = obj.with_elements(|e| !matches!(e.get(index), Some(Element::Value(_))));
        if is_hole && !realm.no_elements_protector_intact() {
            return Miss;
        }
        let written = obj.with_elements_mut(|elements, _| {
            match elements.fast_slots_mut().and_then(|slots| slots.get_mut(index as usize)) {
                Some(slot) => {
                    *slot = Element::Value(value.clone());
                    true
                }
                None => false,
            }
        });
        return if written { Done(()) } else { Miss };
    }

    let can_grow = handler.is_js_array
        && handler.store_mode.is_grow()
        && index == limit
        && obj.is_extensible()
        && realm.no_elements_protector_intact()
        && !obj.would_convert_to_slow_elements(index);
    if !can_grow {
        return Miss;
    }
    obj.with_elements_mut(|elements, length| {
        if let Some(slots) = elements.fast_slots_mut() {
            let i = index as usize;
            if i >= slots.len() {
                slots.resize(new_elements_capacity(index + 1) as usize, Element::Hole);
            }
            slots[i] = Element::Value(value.clone());
            *length = index + 1;
        }
    });
    Done(())
}

