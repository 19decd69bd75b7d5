//! Named and global stores

use crate::handler::{CompiledHandler, DictionaryMode, Handler, TransitionHandler};
use crate::handler_cache::HandlerKind;
use crate::ic::{Ic, IcPolicy};
use crate::state::IcState;
use otter_vm_object::{
    AccessorValue, JsObject, LanguageMode, LookupIterator, LookupState, MessageTemplate, Name, PropertyAttributes,
    Value, VariableMode, VmError, VmResult, ops,
};
use std::sync::Arc;

/// Handler policy of `o.name = v` and `o["name"] = v` stores
pub(crate) struct StoreIc;

impl IcPolicy for StoreIc {
    fn handler_kind(&self) -> HandlerKind {
        HandlerKind::Store
    }

    fn map_independent_handler(&self, ic: &mut Ic<'_>, lookup: &mut LookupIterator) -> Option<Handler> {
        map_independent_handler(ic, lookup)
    }

    fn compile_handler(&self, ic: &mut Ic<'_>, lookup: &LookupIterator) -> Handler {
        let body = match api_setter(ic, lookup) {
            Some(handler) => handler,
            None => ic.slow_stub("no compiled handler"),
        };
        Handler::Compiled(Arc::new(CompiledHandler {
            shape: Arc::downgrade(&ic.receiver_shape),
            name: lookup.name().clone(),
            body,
        }))
    }
}

/// Outcome of preparing a store for caching
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteLookup {
    /// No handler can cover this store
    Uncacheable,
    /// A handler can be computed from the lookup
    Cacheable {
        /// The store created a brand new shape transition
        created_new_transition: bool,
    },
}

/// Object a store to `receiver` adds properties to
fn store_target(receiver: &JsObject) -> Option<JsObject> {
    if receiver.shape().is_js_global_proxy_map() {
        return receiver.prototype();
    }
    Some(receiver.clone())
}

fn prepare_transition(it: &mut LookupIterator, receiver: &JsObject, value: &Value) -> WriteLookup {
    let Some(target) = store_target(receiver) else {
        return WriteLookup::Uncacheable;
    };
    if it.extending_non_extensible(&target) {
        return WriteLookup::Uncacheable;
    }
    let created_new_transition = it.prepare_transition_to_data_property(&target, value, PropertyAttributes::data());
    if it.is_cacheable_transition() {
        WriteLookup::Cacheable { created_new_transition }
    } else {
        WriteLookup::Uncacheable
    }
}

fn lookup_for_write(ic: &mut Ic<'_>, it: &mut LookupIterator, value: &Value) -> WriteLookup {
    let Some(receiver) = it.receiver().as_object().cloned() else {
        return WriteLookup::Uncacheable;
    };
    let cacheable = |yes: bool| {
        if yes {
            WriteLookup::Cacheable {
                created_new_transition: false,
            }
        } else {
            WriteLookup::Uncacheable
        }
    };

    while it.state() != LookupState::NotFound {
        match it.state() {
            LookupState::JsProxy | LookupState::AccessCheck | LookupState::IntegerIndexedExotic => {
                return WriteLookup::Uncacheable;
            }
            LookupState::Interceptor => {
                if let Some(interceptor) = it.get_interceptor() {
                    if it.holder_is_receiver() {
                        return cacheable(!interceptor.non_masking && interceptor.setter.is_some());
                    }
                    if interceptor.getter.is_some() || interceptor.query.is_some() {
                        return WriteLookup::Uncacheable;
                    }
                }
            }
            LookupState::Accessor => {
                return cacheable(!it.property_details().is_some_and(|d| d.is_read_only()));
            }
            LookupState::Data => {
                if it.property_details().is_some_and(|d| d.is_read_only()) {
                    return WriteLookup::Uncacheable;
                }
                if it.holder_is_receiver() {
                    it.prepare_for_data_property(value);
                    ic.update_receiver_shape(it.receiver());
                    return cacheable(true);
                }
                // Stores through a global proxy land on the global object.
                if receiver.shape().is_js_global_proxy_map() {
                    let holder_is_global = receiver
                        .prototype()
                        .zip(it.holder())
                        .is_some_and(|(global, holder)| global.ptr_eq(holder));
                    return cacheable(holder_is_global);
                }
                return prepare_transition(it, &receiver, value);
            }
            LookupState::NotFound | LookupState::Transition => break,
        }
        it.next();
    }
    prepare_transition(it, &receiver, value)
}

/// Miss path of a named store
pub(crate) fn store(
    ic: &mut Ic<'_>,
    policy: &dyn IcPolicy,
    receiver: &Value,
    name: &Name,
    value: &Value,
    mode: LanguageMode,
) -> VmResult<()> {
    let realm = ic.realm();
    if receiver.is_null_or_undefined() {
        if ic.use_ic() && ic.state != IcState::Premonomorphic {
            ic.update_receiver_shape(receiver);
            let slow = ic.slow_stub("non-object receiver");
            ic.patch_cache(name, slow);
            ic.trace_ic(name);
        }
        return Err(VmError::new_type_error(
            MessageTemplate::NonObjectPropertyStore,
            &[&name.to_string(), receiver.type_name()],
        ));
    }

    let mut use_ic = ic.use_ic();
    if ic.migrate_deprecated(receiver) {
        use_ic = false;
    }
    ic.update_receiver_shape(receiver);
    if name.is_private() && receiver.as_object().is_some_and(|o| o.proxy_data().is_some()) {
        use_ic = false;
    }

    if use_ic {
        let mut it = LookupIterator::new(realm, receiver.clone(), name.clone());
        update_caches(ic, policy, &mut it, value);
    }
    ops::set_property(realm, receiver, name, value.clone(), mode)
}

fn update_caches(ic: &mut Ic<'_>, policy: &dyn IcPolicy, lookup: &mut LookupIterator, value: &Value) {
    let name = lookup.name().clone();
    if ic.state == IcState::Uninitialized && !ic.is_global() {
        ic.configure_premonomorphic();
        ic.trace_ic(&name);
        return;
    }

    let handler = match lookup_for_write(ic, lookup, value) {
        WriteLookup::Cacheable { created_new_transition } => {
            if ic.is_global()
                && lookup.state() == LookupState::Data
                && lookup.holder_is_receiver()
                && let Some(cell) = lookup.property_cell()
            {
                ic.configure_property_cell(&cell);
                ic.trace_ic(&name);
                return;
            }
            if created_new_transition {
                // A fresh transition is rarely taken twice.
                ic.slow_stub_reason = Some("new transition");
                ic.trace_ic(&name);
                return;
            }
            ic.compute_handler(policy, lookup)
        }
        WriteLookup::Uncacheable => ic.slow_stub("LookupForWrite said 'false'"),
    };

    ic.patch_cache(&name, handler);
    ic.trace_ic(&name);
}

/// Miss path of an unqualified global write
pub(crate) fn store_global(
    ic: &mut Ic<'_>,
    policy: &dyn IcPolicy,
    name: &Name,
    value: &Value,
    mode: LanguageMode,
) -> VmResult<()> {
    let realm = ic.realm();
    if name.is_string()
        && let Some(found) = realm.script_contexts().lookup(name)
    {
        if found.mode == VariableMode::Const {
            return Err(VmError::new_type_error(MessageTemplate::ConstAssign, &[&name.to_string()]));
        }
        if found.context.get(found.slot_index).is_none() {
            return Err(VmError::new_reference_error(MessageTemplate::NotDefined, &[&name.to_string()]));
        }
        if ic.use_ic() {
            ic.configure_lexical_var(found.context.clone(), found.slot_index, found.mode);
            ic.trace_ic(name);
        }
        found.context.set(found.slot_index, value.clone());
        return Ok(());
    }

    let global = Value::Object(realm.global().clone());
    if mode == LanguageMode::Strict && !LookupIterator::new(realm, global.clone(), name.clone()).is_found() {
        // Nothing is prepared or cached for a store that throws.
        return Err(VmError::new_reference_error(MessageTemplate::NotDefined, &[&name.to_string()]));
    }
    store(ic, policy, &global, name, value, mode)
}

// =============================================================================
// Handlers
// =============================================================================

fn for_holder(ic: &Ic<'_>, lookup: &LookupIterator, base: Handler) -> Handler {
    match lookup.holder() {
        Some(holder) if !lookup.holder_is_receiver() => ic.from_prototype(base, holder, lookup.name()),
        _ => base,
    }
}

/// Setter of a simple API accessor pair, ignoring the allow-list
fn api_setter(ic: &mut Ic<'_>, lookup: &LookupIterator) -> Option<Handler> {
    let Some(AccessorValue::Pair(pair)) = lookup.get_accessors() else {
        return None;
    };
    let data = pair.setter.as_object().and_then(JsObject::function_data)?;
    if !data.is_simple_api_call() {
        return None;
    }
    let compatible = data.is_compatible_receiver(ic.receiver_shape.template());
    let handler = match lookup.descriptor_number() {
        Some(descriptor) if compatible => for_holder(ic, lookup, Handler::ApiAccessor { descriptor }),
        _ => ic.slow_stub("incompatible receiver"),
    };
    Some(handler)
}

fn map_independent_handler(ic: &mut Ic<'_>, lookup: &mut LookupIterator) -> Option<Handler> {
    let name = lookup.name().clone();
    let handler = match lookup.state() {
        LookupState::Transition => transition_handler(ic, lookup, &name),

        LookupState::Interceptor => Handler::Interceptor,

        LookupState::Accessor => {
            if lookup.is_dictionary_holder() {
                return Some(ic.slow_stub("accessor on dictionary-mode holder"));
            }
            match lookup.get_accessors() {
                Some(AccessorValue::Native(info)) => {
                    if info.setter.is_none() {
                        ic.slow_stub("setter == 0")
                    } else if info.is_special_data_property && !lookup.holder_is_receiver() {
                        ic.slow_stub("special data property in prototype chain")
                    } else if !info.is_compatible_receiver(ic.receiver_shape.instance_type()) {
                        ic.slow_stub("incompatible receiver type")
                    } else {
                        match lookup.descriptor_number() {
                            Some(descriptor) => for_holder(ic, lookup, Handler::NativeAccessor { descriptor }),
                            None => ic.slow_stub("native accessor without descriptor"),
                        }
                    }
                }
                Some(AccessorValue::Pair(pair)) => {
                    if !pair.setter.is_callable() {
                        return Some(ic.slow_stub("setter not a function"));
                    }
                    let is_api = pair
                        .setter
                        .as_object()
                        .and_then(JsObject::function_data)
                        .is_some_and(|f| f.is_simple_api_call());
                    if is_api {
                        if !ic.runtime.config().map_independent.api_getters {
                            return None;
                        }
                        return api_setter(ic, lookup);
                    }
                    match lookup.descriptor_number() {
                        Some(descriptor) => for_holder(ic, lookup, Handler::Accessor { descriptor }),
                        None => ic.slow_stub("accessor without descriptor"),
                    }
                }
                None => ic.slow_stub("accessor vanished"),
            }
        }

        LookupState::Data => {
            if lookup.is_global_holder() && !lookup.holder_is_receiver() {
                // Reached through a global proxy.
                for_holder(ic, lookup, Handler::Dictionary(DictionaryMode::Global))
            } else if lookup.is_global_holder() {
                match lookup.property_cell() {
                    Some(cell) => Handler::PropertyCell(Arc::downgrade(&cell)),
                    None => ic.slow_stub("global property without cell"),
                }
            } else if lookup.is_dictionary_holder() {
                Handler::Dictionary(DictionaryMode::Normal)
            } else if let (Some(index), Some(representation)) = (lookup.field_index(), lookup.representation()) {
                Handler::Field { index, representation }
            } else {
                ic.slow_stub("constant property")
            }
        }

        LookupState::JsProxy => for_holder(ic, lookup, Handler::Proxy),

        LookupState::NotFound | LookupState::AccessCheck | LookupState::IntegerIndexedExotic => {
            unreachable!("no store handler for lookup state {:?}", lookup.state())
        }
    };
    Some(handler)
}

fn transition_handler(ic: &mut Ic<'_>, lookup: &LookupIterator, name: &Name) -> Handler {
    // Global objects keep their properties in cells; a new one just fills its cell.
    if let Some(cell) = lookup.transition_cell() {
        return Handler::PropertyCell(Arc::downgrade(cell));
    }
    let Some(target) = lookup.transition_map().cloned() else {
        return ic.slow_stub("transition without target");
    };
    if target.is_dictionary_map() || ic.receiver_shape.is_dictionary_map() {
        return ic.slow_stub("dictionary transition");
    }

    let runtime = ic.runtime;
    let cache = runtime.handler_cache();
    if let Some(cached) = cache.lookup_transition(&ic.receiver_shape, name)
        && cached.live_target().is_some_and(|t| Arc::ptr_eq(&t, &target))
    {
        return Handler::Transition(cached);
    }

    let Some(number) = target.number_of_own_descriptors().checked_sub(1) else {
        return ic.slow_stub("transition without descriptor");
    };
    let (Some(field_index), Some(descriptor)) = (target.field_index(number), target.descriptor(number)) else {
        return ic.slow_stub("transition to a non-field");
    };
    let handler = Arc::new(TransitionHandler {
        target: Arc::downgrade(&target),
        field_index,
        representation: descriptor.details.representation,
        extend_storage: target.back_pointer().is_some_and(|b| b.unused_property_fields() == 0),
        validity_cell: JsObject::prototype_chain_validity_cell(&ic.receiver_shape),
        checks: ic.chain_checks(None, None, name).checks,
    });
    cache.insert_transition(&ic.receiver_shape, name, handler.clone());
    Handler::Transition(handler)
}
