//! Named and global loads
//!
//! `LoadIc` decides which handler a load site installs. The flow functions
//! run on a miss: they update feedback and then perform the load through
//! the generic runtime, so a miss is always semantically transparent.

use crate::feedback::FeedbackSlotKind;
use crate::handler::{CompiledHandler, DictionaryMode, Handler, HolderRef};
use crate::handler_cache::HandlerKind;
use crate::ic::{Ic, IcPolicy};
use crate::state::IcState;
use otter_vm_object::{
    AccessorValue, BuiltinField, JsObject, LookupIterator, LookupState, MessageTemplate, Name, Value, VmError,
    VmResult, ops,
};
use std::sync::Arc;

/// Handler policy of `o.name` and `o["name"]` loads
pub(crate) struct LoadIc;

impl IcPolicy for LoadIc {
    fn handler_kind(&self) -> HandlerKind {
        HandlerKind::Load
    }

    fn map_independent_handler(&self, ic: &mut Ic<'_>, lookup: &mut LookupIterator) -> Option<Handler> {
        map_independent_handler(ic, lookup)
    }

    fn compile_handler(&self, ic: &mut Ic<'_>, lookup: &LookupIterator) -> Handler {
        let body = match shortcut(ic, lookup) {
            Some(shortcut) => shortcut_handler(ic, lookup, shortcut),
            None => ic.slow_stub("no compiled handler"),
        };
        Handler::Compiled(Arc::new(CompiledHandler {
            shape: Arc::downgrade(&ic.receiver_shape),
            name: lookup.name().clone(),
            body,
        }))
    }
}

fn is_length(name: &Name) -> bool {
    name.as_str() == Some("length")
}

/// `"length"` of a primitive string, which no lookup finds
fn is_string_length(receiver: &Value, name: &Name) -> bool {
    receiver.is_string() && is_length(name)
}

fn should_throw_reference_error(kind: FeedbackSlotKind) -> bool {
    matches!(kind, FeedbackSlotKind::LoadGlobal { inside_typeof: false })
}

fn not_defined(name: &Name) -> VmError {
    VmError::new_reference_error(MessageTemplate::NotDefined, &[&name.to_string()])
}

// =============================================================================
// Flow
// =============================================================================

/// Skip stops a load never caches on
fn lookup_for_read(it: &mut LookupIterator) {
    while it.state() != LookupState::NotFound {
        match it.state() {
            LookupState::Interceptor => {
                let has_getter = it.get_interceptor().is_some_and(|i| i.getter.is_some());
                if has_getter {
                    return;
                }
            }
            LookupState::AccessCheck => {
                // Global proxies are access checked by the handler itself.
                let is_own_global_proxy = it.holder_is_receiver()
                    && it.holder_shape().is_some_and(|s| s.is_js_global_proxy_map());
                if !is_own_global_proxy {
                    return;
                }
            }
            LookupState::Transition => unreachable!("read lookup reached a transition"),
            LookupState::NotFound
            | LookupState::Accessor
            | LookupState::Data
            | LookupState::IntegerIndexedExotic
            | LookupState::JsProxy => return,
        }
        it.next();
    }
}

/// Miss path of a named load
pub(crate) fn load(ic: &mut Ic<'_>, policy: &dyn IcPolicy, receiver: &Value, name: &Name) -> VmResult<Value> {
    let realm = ic.realm();
    if receiver.is_null_or_undefined() {
        if ic.use_ic() && ic.state != IcState::Premonomorphic {
            // Keep the site moving through the lattice.
            ic.update_receiver_shape(receiver);
            let slow = ic.slow_stub("non-object receiver");
            ic.patch_cache(name, slow);
            ic.trace_ic(name);
        }
        if name.is_iterator_symbol() {
            return Err(VmError::new_type_error(
                MessageTemplate::NotIterable,
                &[&receiver.to_display_string()],
            ));
        }
        return Err(VmError::new_type_error(
            MessageTemplate::NonObjectPropertyLoad,
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

    let mut it = LookupIterator::new(realm, receiver.clone(), name.clone());
    lookup_for_read(&mut it);

    let found = it.state() != LookupState::NotFound || is_string_length(receiver, name);
    if found || !should_throw_reference_error(ic.kind) {
        if use_ic {
            update_caches(ic, policy, &mut it);
        }
        return ops::get_property(realm, receiver, name);
    }
    Err(not_defined(name))
}

fn update_caches(ic: &mut Ic<'_>, policy: &dyn IcPolicy, lookup: &mut LookupIterator) {
    let name = lookup.name().clone();
    if ic.state == IcState::Uninitialized && !ic.is_global() {
        // Wait for a second execution before caching anything.
        ic.configure_premonomorphic();
        ic.trace_ic(&name);
        return;
    }

    let handler = if lookup.state() == LookupState::AccessCheck {
        ic.slow_stub("access check")
    } else if lookup.state() == LookupState::NotFound && !is_string_length(lookup.receiver(), &name) {
        ic.full_chain(Handler::NonExistent, None, &name)
    } else {
        if ic.is_global()
            && lookup.state() == LookupState::Data
            && lookup.holder_is_receiver()
            && let Some(cell) = lookup.property_cell()
        {
            ic.configure_property_cell(&cell);
            ic.trace_ic(&name);
            return;
        }
        ic.compute_handler(policy, lookup)
    };

    ic.patch_cache(&name, handler);
    ic.trace_ic(&name);
}

/// Miss path of an unqualified global read
pub(crate) fn load_global(ic: &mut Ic<'_>, policy: &dyn IcPolicy, name: &Name) -> VmResult<Value> {
    let realm = ic.realm();
    if name.is_string()
        && let Some(found) = realm.script_contexts().lookup(name)
    {
        // Bindings in their dead zone leave the feedback alone.
        let Some(value) = found.context.get(found.slot_index) else {
            return Err(not_defined(name));
        };
        if ic.use_ic() {
            ic.configure_lexical_var(found.context.clone(), found.slot_index, found.mode);
            ic.trace_ic(name);
        }
        return Ok(value);
    }
    let global = Value::Object(realm.global().clone());
    load(ic, policy, &global, name)
}

// =============================================================================
// Handlers
// =============================================================================

/// Well-known properties with canned handlers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shortcut {
    StringLength,
    StringWrapperLength,
    FunctionPrototype,
    BuiltinField(BuiltinField),
    ModuleExport(usize),
    ApiGetter,
}

fn shortcut(ic: &Ic<'_>, lookup: &LookupIterator) -> Option<Shortcut> {
    let receiver = lookup.receiver();
    let name = lookup.name();
    if is_string_length(receiver, name) {
        return Some(Shortcut::StringLength);
    }
    if is_length(name) && ic.receiver_shape.is_js_value_map() {
        return Some(Shortcut::StringWrapperLength);
    }
    if name.as_str() == Some("prototype")
        && receiver
            .as_object()
            .and_then(JsObject::function_data)
            .is_some_and(|f| f.is_constructor)
    {
        return Some(Shortcut::FunctionPrototype);
    }
    if lookup.state() != LookupState::Accessor {
        return None;
    }
    match lookup.get_accessors()? {
        AccessorValue::Native(info) => {
            if let Some(field) = info.builtin_field {
                let compatible = match field {
                    BuiltinField::ArrayLength => ic.receiver_shape.is_js_array_map(),
                    BuiltinField::StringLength => ic.receiver_shape.is_js_value_map(),
                };
                if compatible {
                    return Some(Shortcut::BuiltinField(field));
                }
            }
            info.module_export.map(Shortcut::ModuleExport)
        }
        AccessorValue::Pair(pair) => pair
            .getter
            .as_object()
            .and_then(JsObject::function_data)
            .is_some_and(|f| f.is_simple_api_call())
            .then_some(Shortcut::ApiGetter),
    }
}

fn shortcut_allowed(ic: &Ic<'_>, shortcut: Shortcut) -> bool {
    let allowed = &ic.runtime.config().map_independent;
    match shortcut {
        Shortcut::StringLength => allowed.string_length,
        Shortcut::StringWrapperLength => allowed.string_wrapper_length,
        Shortcut::FunctionPrototype => allowed.function_prototype,
        Shortcut::BuiltinField(_) => allowed.builtin_fields,
        Shortcut::ModuleExport(_) => allowed.module_exports,
        Shortcut::ApiGetter => allowed.api_getters,
    }
}

/// `base` for the lookup's holder: bare when the receiver holds the
/// property, behind prototype checks otherwise
fn for_holder(ic: &Ic<'_>, lookup: &LookupIterator, base: Handler) -> Handler {
    match lookup.holder() {
        Some(holder) if !lookup.holder_is_receiver() => ic.from_prototype(base, holder, lookup.name()),
        _ => base,
    }
}

fn shortcut_handler(ic: &mut Ic<'_>, lookup: &LookupIterator, shortcut: Shortcut) -> Handler {
    match shortcut {
        Shortcut::StringLength => Handler::StringLength,
        Shortcut::StringWrapperLength => Handler::StringWrapperLength,
        Shortcut::FunctionPrototype => Handler::FunctionPrototype,
        Shortcut::BuiltinField(field) => Handler::BuiltinField(field),
        Shortcut::ModuleExport(index) => for_holder(ic, lookup, Handler::ModuleExport(index)),
        Shortcut::ApiGetter => {
            if ic.vector.has_break_info() {
                return ic.slow_stub("break point on accessor");
            }
            let Some(descriptor) = lookup.descriptor_number() else {
                return ic.slow_stub("api getter on dictionary holder");
            };
            let compatible = match lookup.get_accessors() {
                Some(AccessorValue::Pair(pair)) => pair
                    .getter
                    .as_object()
                    .and_then(JsObject::function_data)
                    .is_some_and(|f| f.is_compatible_receiver(ic.receiver_shape.template())),
                _ => false,
            };
            if !compatible || lookup.is_dictionary_holder() {
                return ic.slow_stub("incompatible api receiver");
            }
            for_holder(ic, lookup, Handler::ApiAccessor { descriptor })
        }
    }
}

fn map_independent_handler(ic: &mut Ic<'_>, lookup: &mut LookupIterator) -> Option<Handler> {
    if let Some(shortcut) = shortcut(ic, lookup) {
        if !shortcut_allowed(ic, shortcut) {
            return None;
        }
        return Some(shortcut_handler(ic, lookup, shortcut));
    }

    let name = lookup.name().clone();
    let receiver_is_holder = lookup.holder_is_receiver();
    let handler = match lookup.state() {
        LookupState::Interceptor => {
            let holder = lookup.holder()?.clone();
            let non_masking = lookup.get_interceptor().is_some_and(|i| i.non_masking);
            if non_masking {
                // A miss in the interceptor continues the lookup up the chain.
                let holder_ref = (!receiver_is_holder || ic.is_global()).then_some(&holder);
                ic.full_chain(Handler::Interceptor, holder_ref, &name)
            } else if receiver_is_holder {
                Handler::Interceptor
            } else {
                ic.from_prototype(Handler::Interceptor, &holder, &name)
            }
        }

        LookupState::Accessor => match lookup.get_accessors() {
            Some(AccessorValue::Pair(pair)) => {
                if ic.vector.has_break_info() {
                    return Some(ic.slow_stub("break point on accessor"));
                }
                if !pair.getter.is_callable() {
                    return Some(ic.slow_stub("getter is not callable"));
                }
                accessor_pair_handler(ic, lookup, &name)
            }
            Some(AccessorValue::Native(info)) => {
                let compatible = info.is_compatible_receiver(ic.receiver_shape.instance_type());
                if info.getter.is_none()
                    || !compatible
                    || lookup.is_dictionary_holder()
                    || (info.is_sloppy && !lookup.receiver().is_object())
                {
                    ic.slow_stub("incompatible native accessor")
                } else {
                    match lookup.descriptor_number() {
                        Some(descriptor) => for_holder(ic, lookup, Handler::NativeAccessor { descriptor }),
                        None => ic.slow_stub("native accessor without descriptor"),
                    }
                }
            }
            None => ic.slow_stub("accessor vanished"),
        },

        LookupState::Data => data_handler(ic, lookup, &name),

        LookupState::IntegerIndexedExotic => Handler::NonExistent,

        LookupState::JsProxy => match lookup.holder() {
            Some(proxy) if !receiver_is_holder => {
                let proxy = proxy.clone();
                ic.from_prototype(Handler::Proxy, &proxy, &name)
            }
            _ => Handler::Proxy,
        },

        LookupState::AccessCheck | LookupState::NotFound | LookupState::Transition => {
            unreachable!("no load handler for lookup state {:?}", lookup.state())
        }
    };
    Some(handler)
}

fn accessor_pair_handler(ic: &mut Ic<'_>, lookup: &LookupIterator, name: &Name) -> Handler {
    if lookup.is_global_holder() {
        return global_cell_handler(ic, lookup, name);
    }
    if lookup.is_dictionary_holder() {
        return for_holder(ic, lookup, Handler::Dictionary(DictionaryMode::Normal));
    }
    match lookup.descriptor_number() {
        Some(descriptor) => for_holder(ic, lookup, Handler::Accessor { descriptor }),
        None => ic.slow_stub("accessor without descriptor"),
    }
}

fn data_handler(ic: &mut Ic<'_>, lookup: &LookupIterator, name: &Name) -> Handler {
    if lookup.is_global_holder() {
        return global_cell_handler(ic, lookup, name);
    }
    if lookup.is_dictionary_holder() {
        return for_holder(ic, lookup, Handler::Dictionary(DictionaryMode::Normal));
    }
    if let (Some(index), Some(representation)) = (lookup.field_index(), lookup.representation()) {
        return for_holder(ic, lookup, Handler::Field { index, representation });
    }
    match lookup.descriptor_number() {
        Some(descriptor) => for_holder(ic, lookup, Handler::Constant { descriptor }),
        None => ic.slow_stub("data property without descriptor"),
    }
}

/// Read a global object's property through its cell, or by name when the
/// global is only on the receiver's prototype chain
fn global_cell_handler(ic: &mut Ic<'_>, lookup: &LookupIterator, name: &Name) -> Handler {
    if !lookup.holder_is_receiver() {
        return for_holder(ic, lookup, Handler::Dictionary(DictionaryMode::Global));
    }
    let (Some(holder), Some(cell)) = (lookup.holder(), lookup.property_cell()) else {
        return ic.slow_stub("global property without cell");
    };
    let weak = Arc::downgrade(&cell);
    let checks = ic.chain_checks(Some(holder), Some(HolderRef::Cell(weak.clone())), name);
    Handler::PropertyCell(weak).with_checks(checks, false)
}
