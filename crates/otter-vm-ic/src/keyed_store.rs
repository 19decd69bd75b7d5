//! Keyed stores: `o[key] = v`
//!
//! Element stores infer a [`KeyedAccessStoreMode`] from the receiver, the
//! index and the value, perform the store through the runtime and only then
//! update feedback, so the handler describes the receiver as the store left
//! it.

use crate::feedback::KeyType;
use crate::handler::{ElementAccess, ElementHandler, ElementsTransitionHandler, Handler};
use crate::handler_cache::{HandlerKey, HandlerKind};
use crate::ic::{Ic, IcPolicy};
use crate::keyed_load::{index_name, live_target_maps, vector_needs_update};
use crate::state::IcState;
use crate::store::{self, StoreIc};
use crate::store_mode::{KeyedAccessStoreMode, compute_transitioned_map, get_store_mode, non_transitioning_store_mode};
use otter_vm_object::{
    ElementsKind, JsObject, LanguageMode, LookupIterator, PropertyKey, ShapeRef, Value, VmResult, ops,
};
use std::sync::Arc;

/// Handler policy of `o[key] = v` with a name key
pub(crate) struct KeyedStoreIc;

impl IcPolicy for KeyedStoreIc {
    fn handler_kind(&self) -> HandlerKind {
        HandlerKind::Store
    }

    fn map_independent_handler(&self, ic: &mut Ic<'_>, lookup: &mut LookupIterator) -> Option<Handler> {
        StoreIc.map_independent_handler(ic, lookup)
    }

    fn compile_handler(&self, ic: &mut Ic<'_>, lookup: &LookupIterator) -> Handler {
        StoreIc.compile_handler(ic, lookup)
    }
}

/// Miss path of a keyed store
pub(crate) fn store(ic: &mut Ic<'_>, receiver: &Value, key: &Value, value: &Value, mode: LanguageMode) -> VmResult<()> {
    let realm = ic.realm();
    if ic.migrate_deprecated(receiver) {
        return ops::set_object_property(realm, receiver, key, value.clone(), mode);
    }

    let index = match ops::to_property_key(key) {
        PropertyKey::Name(name) => {
            store::store(ic, &KeyedStoreIc, receiver, &name, value, mode)?;
            if ic.use_ic() && vector_needs_update(ic) {
                ic.configure_megamorphic(KeyType::Property);
                ic.slow_stub_reason = Some("unhandled internalized string key");
                ic.trace_ic(&name);
            }
            return Ok(());
        }
        PropertyKey::Index(index) => index,
    };

    let mut use_ic = ic.use_ic();
    let object = receiver.as_object();
    if let Some(obj) = object {
        let shape = obj.shape();
        if shape.is_js_value_map() || shape.is_access_check_needed() || shape.is_js_global_proxy_map() {
            use_ic = false;
        } else if realm.is_in_array_prototype_chain(&shape) {
            // Element stores to these must reach the runtime to guard hole reads.
            ic.slow_stub_reason = Some("map in array prototype");
            use_ic = false;
        }
    }

    let old_shape = object.filter(|_| use_ic).map(JsObject::shape);
    let receiver_was_cow = object.is_some_and(JsObject::has_copy_on_write_elements);
    let store_mode = match object {
        Some(obj) if use_ic && obj.proxy_data().is_none() => get_store_mode(obj, index, value),
        _ => KeyedAccessStoreMode::Standard,
    };

    ops::set_element(realm, receiver, index, value.clone(), mode)?;

    if use_ic {
        match (&old_shape, object) {
            (Some(old), Some(obj)) => {
                if old.is_abandoned_prototype_map() {
                    ic.slow_stub_reason = Some("receiver with prototype map");
                } else if old.dictionary_elements_in_prototype_chain_only() {
                    ic.slow_stub_reason = Some("dictionary or proxy prototype");
                } else {
                    update_store_element(ic, old, store_mode, receiver_was_cow, &obj.shape());
                }
            }
            _ => ic.slow_stub_reason = Some("non-JSObject receiver"),
        }
    }

    if ic.use_ic() && vector_needs_update(ic) {
        ic.configure_megamorphic(KeyType::Element);
    }
    ic.trace_ic_with(&index_name(index), store_mode.trace_modifier());
    Ok(())
}

/// Store mode shared by the slot's element handlers
fn current_store_mode(ic: &Ic<'_>) -> KeyedAccessStoreMode {
    ic.vector.with(ic.slot, |feedback| {
        feedback
            .live_entries()
            .iter()
            .find_map(|(_, handler)| match handler {
                Handler::Element(element) => Some(element.store_mode),
                Handler::ElementsTransitionAndStore(transition) => Some(transition.store.store_mode),
                _ => None,
            })
            .unwrap_or_default()
    })
}

fn update_store_element(
    ic: &mut Ic<'_>,
    receiver_shape: &ShapeRef,
    store_mode: KeyedAccessStoreMode,
    receiver_was_cow: bool,
    new_receiver_shape: &ShapeRef,
) {
    if ic.state >= IcState::Megamorphic {
        return;
    }
    let mut target_maps = live_target_maps(ic);

    if target_maps.is_empty() {
        let monomorphic = compute_transitioned_map(receiver_shape, store_mode);
        let mode = non_transitioning_store_mode(store_mode, receiver_was_cow);
        let handler = store_element_handler(ic, &monomorphic, mode);
        ic.configure_elements(vec![(monomorphic, handler)]);
        return;
    }

    if target_maps.iter().any(|m| m.is_js_value_map()) {
        ic.slow_stub_reason = Some("JSValue");
        return;
    }

    let old_store_mode = current_store_mode(ic);
    if ic.state == IcState::Monomorphic {
        let previous = &target_maps[0];
        if Ic::is_transition_of_monomorphic_target(previous, new_receiver_shape) {
            // Same elements family, moved to a more general kind: stay monomorphic on the new shape.
            let mode = non_transitioning_store_mode(store_mode, receiver_was_cow);
            let handler = store_element_handler(ic, new_receiver_shape, mode);
            ic.configure_elements(vec![(new_receiver_shape.clone(), handler)]);
            return;
        }
        let unchanged = Arc::ptr_eq(receiver_shape, previous) && Arc::ptr_eq(new_receiver_shape, receiver_shape);
        let widens = matches!(
            store_mode,
            KeyedAccessStoreMode::GrowNoTransition
                | KeyedAccessStoreMode::IgnoreOutOfBounds
                | KeyedAccessStoreMode::HandleCopyOnWrite
        );
        if unchanged && old_store_mode == KeyedAccessStoreMode::Standard && widens {
            // A plain store handler can become one that grows, drops OOB writes or copies.
            let handler = store_element_handler(ic, receiver_shape, store_mode);
            ic.configure_elements(vec![(receiver_shape.clone(), handler)]);
            return;
        }
    }

    let mut map_added = add_one_receiver_map_if_missing(&mut target_maps, receiver_shape);
    if store_mode.is_transition() {
        let transitioned = compute_transitioned_map(receiver_shape, store_mode);
        map_added |= add_one_receiver_map_if_missing(&mut target_maps, &transitioned);
    }
    if !map_added {
        ic.slow_stub_reason = Some("same map added twice");
        return;
    }

    if target_maps.len() > ic.runtime.config().max_keyed_polymorphic {
        ic.slow_stub_reason = Some("max polymorph exceeded");
        return;
    }

    // Every polymorphic handler has to use one store mode.
    let mut store_mode = non_transitioning_store_mode(store_mode, receiver_was_cow);
    if old_store_mode != KeyedAccessStoreMode::Standard {
        if store_mode == KeyedAccessStoreMode::Standard {
            store_mode = old_store_mode;
        } else if store_mode != old_store_mode {
            ic.slow_stub_reason = Some("store mode mismatch");
            return;
        }
    }

    if store_mode != KeyedAccessStoreMode::Standard {
        let typed = target_maps.iter().filter(|m| m.has_fixed_typed_array_elements()).count();
        if typed != 0 && typed != target_maps.len() {
            ic.slow_stub_reason = Some("unsupported combination of external and normal arrays");
            return;
        }
    }

    let entries = target_maps
        .iter()
        .map(|shape| {
            let handler = polymorphic_store_handler(ic, shape, &target_maps, store_mode);
            (shape.clone(), handler)
        })
        .collect();
    ic.configure_elements(entries);
}

fn add_one_receiver_map_if_missing(maps: &mut Vec<ShapeRef>, shape: &ShapeRef) -> bool {
    if maps.iter().any(|m| Arc::ptr_eq(m, shape)) {
        return false;
    }
    maps.push(shape.clone());
    true
}

/// Handler for one shape of a polymorphic set, moving receivers of a
/// transition source shape to its target in the set first
fn polymorphic_store_handler(
    ic: &Ic<'_>,
    shape: &ShapeRef,
    target_maps: &[ShapeRef],
    store_mode: KeyedAccessStoreMode,
) -> Handler {
    if !shape.is_js_receiver_map() {
        return Handler::Slow;
    }
    let Some(target) = shape.find_elements_kind_transitioned_map(target_maps) else {
        return store_element_handler(ic, shape, store_mode);
    };
    match store_element_handler(ic, &target, store_mode) {
        Handler::Element(store) => Handler::ElementsTransitionAndStore(Arc::new(ElementsTransitionHandler {
            target: Arc::downgrade(&target),
            store,
        })),
        other => other,
    }
}

/// Element store handler for receivers of `shape`, shared through the handler cache
fn store_element_handler(ic: &Ic<'_>, shape: &ShapeRef, store_mode: KeyedAccessStoreMode) -> Handler {
    let cache = ic.runtime.handler_cache();
    let key = HandlerKey::element(shape, HandlerKind::StoreElement, store_mode);
    if let Some(handler) = cache.lookup(&key) {
        return handler;
    }
    let handler = build_store_element_handler(shape, store_mode);
    if ic.runtime.config().handler_stats {
        ic.runtime.stats().record_handler(handler.kind_name());
    }
    cache.insert(key, shape, handler.clone());
    handler
}

fn build_store_element_handler(shape: &ShapeRef, store_mode: KeyedAccessStoreMode) -> Handler {
    if !shape.is_js_receiver_map()
        || shape.is_js_proxy_map()
        || shape.is_js_value_map()
        || shape.indexed_interceptor().is_some()
    {
        return Handler::Slow;
    }
    let kind = shape.elements_kind();
    let access = match kind {
        ElementsKind::SloppyArguments => ElementAccess::SloppyArguments,
        ElementsKind::Dictionary | ElementsKind::StringWrapper => ElementAccess::Dictionary,
        kind if kind.is_typed() => ElementAccess::Typed,
        _ => ElementAccess::Fast,
    };
    Handler::element(ElementHandler {
        access,
        elements_kind: kind,
        convert_hole_to_undefined: false,
        is_js_array: shape.is_js_array_map(),
        store_mode,
        validity_cell: JsObject::prototype_chain_validity_cell(shape),
    })
}
