//! Keyed loads: `o[key]`
//!
//! Name keys take the named load path with the keyed slot. Index keys
//! cache one element handler per receiver shape.

use crate::feedback::{Feedback, KeyType};
use crate::handler::{ElementAccess, ElementHandler, Handler};
use crate::handler_cache::{HandlerKey, HandlerKind};
use crate::ic::{Ic, IcPolicy};
use crate::load::{self, LoadIc};
use crate::state::IcState;
use crate::store_mode::KeyedAccessStoreMode;
use otter_vm_object::{ElementsKind, LookupIterator, Name, PropertyKey, Realm, ShapeRef, Value, VmResult, ops};
use std::sync::Arc;

/// Handler policy of `o[key]` with a name key
pub(crate) struct KeyedLoadIc;

impl IcPolicy for KeyedLoadIc {
    fn handler_kind(&self) -> HandlerKind {
        HandlerKind::Load
    }

    fn map_independent_handler(&self, ic: &mut Ic<'_>, lookup: &mut LookupIterator) -> Option<Handler> {
        LoadIc.map_independent_handler(ic, lookup)
    }

    fn compile_handler(&self, ic: &mut Ic<'_>, lookup: &LookupIterator) -> Handler {
        LoadIc.compile_handler(ic, lookup)
    }
}

/// Name used to trace an element access
pub(crate) fn index_name(index: u32) -> Name {
    Name::string(&index.to_string())
}

/// The slot still needs a state for this miss
pub(crate) fn vector_needs_update(ic: &Ic<'_>) -> bool {
    if ic.is_vector_set() {
        return false;
    }
    ic.vector.with(ic.slot, Feedback::key_type) != Some(KeyType::Element)
}

/// Miss path of a keyed load
pub(crate) fn load(ic: &mut Ic<'_>, receiver: &Value, key: &Value) -> VmResult<Value> {
    let realm = ic.realm();
    if ic.migrate_deprecated(receiver) {
        return ops::get_object_property(realm, receiver, key);
    }

    let index = match ops::to_property_key(key) {
        PropertyKey::Name(name) => {
            let value = load::load(ic, &KeyedLoadIc, receiver, &name)?;
            if ic.use_ic() && vector_needs_update(ic) {
                ic.configure_megamorphic(KeyType::Property);
                ic.trace_ic(&name);
            }
            return Ok(value);
        }
        PropertyKey::Index(index) => index,
    };

    if ic.use_ic() {
        ic.update_receiver_shape(receiver);
        let shape = ic.receiver_shape.clone();
        if !shape.is_access_check_needed()
            && !shape.is_js_value_map()
            && (receiver.is_object() || receiver.is_string())
        {
            update_load_element(ic, receiver);
            if ic.is_vector_set() {
                ic.trace_ic(&index_name(index));
            }
        }
        if vector_needs_update(ic) {
            ic.configure_megamorphic(KeyType::Element);
            ic.trace_ic(&index_name(index));
        }
    }
    ops::get_element(realm, receiver, index)
}

/// Live, non-deprecated shapes the slot remembers
pub(crate) fn live_target_maps(ic: &Ic<'_>) -> Vec<ShapeRef> {
    let mut maps = ic.target_maps();
    maps.retain(|m| !m.is_deprecated());
    maps
}

fn update_load_element(ic: &mut Ic<'_>, receiver: &Value) {
    if ic.state >= IcState::Megamorphic {
        return;
    }
    let receiver_shape = ic.receiver_shape.clone();
    let mut target_maps = live_target_maps(ic);

    if target_maps.is_empty() {
        let handler = load_element_handler(ic, &receiver_shape);
        ic.configure_elements(vec![(receiver_shape, handler)]);
        return;
    }

    if target_maps.iter().any(|m| m.is_js_value_map() || m.is_js_proxy_map()) {
        ic.slow_stub_reason = Some("JSValue or JSProxy");
        return;
    }

    // Assume an array moving to a more general elements kind leaves its old shape behind.
    if ic.state == IcState::Monomorphic
        && !receiver.is_string()
        && !receiver_shape.is_js_proxy_map()
        && target_maps[0]
            .elements_kind()
            .is_more_general_transition(receiver_shape.elements_kind())
    {
        let handler = load_element_handler(ic, &receiver_shape);
        ic.configure_elements(vec![(receiver_shape, handler)]);
        return;
    }

    if target_maps.iter().any(|m| Arc::ptr_eq(m, &receiver_shape)) {
        ic.slow_stub_reason = Some("same map added twice");
        return;
    }
    target_maps.push(receiver_shape);

    if target_maps.len() > ic.runtime.config().max_keyed_polymorphic {
        ic.slow_stub_reason = Some("max polymorph exceeded");
        return;
    }

    let entries = target_maps
        .into_iter()
        .map(|shape| {
            let handler = load_element_handler(ic, &shape);
            (shape, handler)
        })
        .collect();
    ic.configure_elements(entries);
}

/// Element load handler for receivers of `shape`, shared through the handler cache
fn load_element_handler(ic: &Ic<'_>, shape: &ShapeRef) -> Handler {
    let cache = ic.runtime.handler_cache();
    let key = HandlerKey::element(shape, HandlerKind::LoadElement, KeyedAccessStoreMode::Standard);
    if let Some(handler) = cache.lookup(&key) {
        return handler;
    }
    let handler = build_load_element_handler(ic.realm(), shape);
    if ic.runtime.config().handler_stats {
        ic.runtime.stats().record_handler(handler.kind_name());
    }
    cache.insert(key, shape, handler.clone());
    handler
}

fn build_load_element_handler(realm: &Realm, shape: &ShapeRef) -> Handler {
    let element = |access: ElementAccess, convert_hole_to_undefined: bool| {
        Handler::element(ElementHandler {
            access,
            elements_kind: shape.elements_kind(),
            convert_hole_to_undefined,
            is_js_array: shape.is_js_array_map(),
            store_mode: KeyedAccessStoreMode::Standard,
            validity_cell: None,
        })
    };

    let masking_interceptor = shape
        .indexed_interceptor()
        .is_some_and(|i| i.getter.is_some() && !i.non_masking);
    if masking_interceptor {
        return element(ElementAccess::Interceptor, false);
    }
    if shape.is_string_map() {
        return element(ElementAccess::IndexedString, false);
    }
    if !shape.is_js_receiver_map() || shape.is_js_proxy_map() {
        return Handler::Slow;
    }
    match shape.elements_kind() {
        ElementsKind::SloppyArguments => element(ElementAccess::SloppyArguments, false),
        ElementsKind::Dictionary | ElementsKind::StringWrapper => element(ElementAccess::Dictionary, false),
        kind if kind.is_typed() => element(ElementAccess::Typed, false),
        kind => {
            // Only the pristine array shapes read holes as undefined without a chain walk.
            let convert_hole_to_undefined =
                realm.is_initial_array_shape(shape) && kind.is_holey() && realm.no_elements_protector_intact();
            element(ElementAccess::Fast, convert_hole_to_undefined)
        }
    }
}
