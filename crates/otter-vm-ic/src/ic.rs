//! IC state machine
//!
//! An [`Ic`] lives for the duration of one miss of one feedback slot. It
//! re-validates what the slot remembers, asks its [`IcPolicy`] for a
//! handler and moves the slot forward through the state lattice. Feedback
//! is only ever written through [`Ic::patch_cache`] and the `configure_*`
//! helpers.

use crate::feedback::{Feedback, FeedbackSlot, FeedbackSlotKind, FeedbackVector, KeyType, MapHandler, MapHandlers};
use crate::handler::{ChainChecks, Handler, HolderRef, PrototypeCheck, PrototypeChecks};
use crate::handler_cache::{HandlerKey, HandlerKind};
use crate::runtime::IcRuntime;
use crate::state::IcState;
use crate::stub_cache::{StubCache, StubCacheKind};
use otter_vm_object::{
    JsObject, LookupIterator, Name, PropertyCell, Realm, ScriptContext, ShapeRef, Value, VariableMode,
};
use std::sync::Arc;

/// What differs between load, store, keyed load and keyed store ICs
pub(crate) trait IcPolicy {
    /// Kind under which compiled handlers are cached
    fn handler_kind(&self) -> HandlerKind;

    /// Handler that needs no shape-specific compilation, if there is one
    fn map_independent_handler(&self, ic: &mut Ic<'_>, lookup: &mut LookupIterator) -> Option<Handler>;

    /// Shape-specific handler for what `map_independent_handler` declined
    fn compile_handler(&self, ic: &mut Ic<'_>, lookup: &LookupIterator) -> Handler;
}

/// One miss of one feedback slot
pub(crate) struct Ic<'a> {
    pub(crate) runtime: &'a IcRuntime,
    pub(crate) vector: &'a FeedbackVector,
    pub(crate) slot: FeedbackSlot,
    pub(crate) kind: FeedbackSlotKind,
    pub(crate) state: IcState,
    old_state: IcState,
    pub(crate) receiver_shape: ShapeRef,
    maybe_handler: Option<Handler>,
    vector_set: bool,
    pub(crate) slow_stub_reason: Option<&'static str>,
}

impl<'a> Ic<'a> {
    pub(crate) fn new(runtime: &'a IcRuntime, vector: &'a FeedbackVector, slot: FeedbackSlot, receiver: &Value) -> Self {
        let state = vector.state(slot);
        Self {
            runtime,
            vector,
            slot,
            // Runtime entry points only get here for slots the vector has.
            kind: vector.kind(slot).unwrap_or(FeedbackSlotKind::LoadProperty),
            state,
            old_state: state,
            receiver_shape: runtime.realm().receiver_shape(receiver),
            maybe_handler: None,
            vector_set: false,
            slow_stub_reason: None,
        }
    }

    #[inline]
    pub(crate) fn realm(&self) -> &'a Realm {
        self.runtime.realm()
    }

    #[inline]
    pub(crate) fn use_ic(&self) -> bool {
        self.runtime.config().use_ic
    }

    pub(crate) fn is_keyed(&self) -> bool {
        self.kind.is_keyed()
    }

    pub(crate) fn is_global(&self) -> bool {
        self.kind.is_global()
    }

    pub(crate) fn is_vector_set(&self) -> bool {
        self.vector_set
    }

    fn stub_cache(&self) -> &'a StubCache {
        if self.kind.is_load() {
            self.runtime.stub_cache(StubCacheKind::Load)
        } else {
            self.runtime.stub_cache(StubCacheKind::Store)
        }
    }

    fn feedback(&self) -> Feedback {
        self.vector.get(self.slot)
    }

    /// Live shapes the slot remembers, in order
    pub(crate) fn target_maps(&self) -> Vec<ShapeRef> {
        self.vector.with(self.slot, Feedback::target_maps)
    }

    /// Record why the next handler is [`Handler::Slow`]
    pub(crate) fn slow_stub(&mut self, reason: &'static str) -> Handler {
        self.slow_stub_reason = Some(reason);
        Handler::Slow
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    pub(crate) fn update_receiver_shape(&mut self, receiver: &Value) {
        self.receiver_shape = self.realm().receiver_shape(receiver);
    }

    /// Re-validate what the slot remembers for the receiver's shape
    pub(crate) fn update_state(&mut self, receiver: &Value, name: Option<&Name>) {
        self.update_receiver_shape(receiver);
        let Some(name) = name.filter(|n| n.is_string()) else { return };
        if !matches!(self.state, IcState::Monomorphic | IcState::Polymorphic) {
            return;
        }
        if receiver.is_null_or_undefined() {
            return;
        }
        if self.should_recompute_handler(name) {
            self.old_state = self.state;
            self.state = IcState::RecomputeHandler;
        }
    }

    fn recompute_handler_for_name(&self, name: &Name) -> bool {
        if self.is_keyed() {
            return self.vector.with(self.slot, |f| f.name() == Some(name));
        }
        true
    }

    fn should_recompute_handler(&mut self, name: &Name) -> bool {
        if !self.recompute_handler_for_name(name) {
            return false;
        }
        let shape = self.receiver_shape.clone();
        self.maybe_handler = self.vector.with(self.slot, |f| f.find_handler(&shape));

        // Contextual accesses just refresh the handler.
        if self.is_global() {
            return true;
        }
        if self.maybe_handler.is_some() {
            return true;
        }
        if !self.receiver_shape.is_js_object_map() {
            return false;
        }
        let Some(first) = self.target_maps().into_iter().next() else {
            return false;
        };
        if first.is_deprecated() {
            return true;
        }
        first
            .elements_kind()
            .is_more_general_transition(self.receiver_shape.elements_kind())
    }

    /// Move the receiver off a deprecated shape. Returns whether it had one.
    pub(crate) fn migrate_deprecated(&self, receiver: &Value) -> bool {
        let Some(obj) = receiver.as_object() else { return false };
        if !obj.shape().is_deprecated() {
            return false;
        }
        let migrated = obj.migrate_instance();
        if migrated {
            tracing::debug!(target: "otter::ic", object = obj.id(), "migrated deprecated receiver");
        }
        migrated
    }

    // -------------------------------------------------------------------------
    // Feedback writes
    // -------------------------------------------------------------------------

    fn record_configure(&mut self, feedback: Feedback) {
        self.vector.set(self.slot, feedback);
        self.vector_set = true;
    }

    pub(crate) fn configure_premonomorphic(&mut self) {
        self.record_configure(Feedback::Premonomorphic);
    }

    pub(crate) fn configure_monomorphic(&mut self, name: &Name, shape: &ShapeRef, handler: Handler) {
        let name = self.is_keyed().then(|| name.clone());
        self.record_configure(Feedback::Monomorphic {
            name,
            entry: MapHandler::new(shape, handler),
        });
    }

    fn configure_polymorphic(&mut self, name: &Name, entries: MapHandlers) {
        let name = self.is_keyed().then(|| name.clone());
        self.record_configure(Feedback::Polymorphic { name, entries });
    }

    /// Element handlers of a keyed site, one per shape
    pub(crate) fn configure_elements(&mut self, mut entries: Vec<(ShapeRef, Handler)>) {
        if entries.len() == 1
            && let Some((shape, handler)) = entries.pop()
        {
            self.record_configure(Feedback::Monomorphic {
                name: None,
                entry: MapHandler::new(&shape, handler),
            });
            return;
        }
        let entries = entries.iter().map(|(shape, handler)| MapHandler::new(shape, handler.clone())).collect();
        self.record_configure(Feedback::Polymorphic { name: None, entries });
    }

    pub(crate) fn configure_megamorphic(&mut self, key_type: KeyType) {
        self.record_configure(Feedback::Megamorphic { key_type });
    }

    pub(crate) fn configure_property_cell(&mut self, cell: &Arc<PropertyCell>) {
        self.record_configure(Feedback::PropertyCell(Arc::downgrade(cell)));
    }

    pub(crate) fn configure_lexical_var(&mut self, context: Arc<ScriptContext>, slot: usize, mode: VariableMode) {
        self.record_configure(Feedback::LexicalVar { context, slot, mode });
    }

    /// Install `handler` for the receiver's shape
    pub(crate) fn patch_cache(&mut self, name: &Name, handler: Handler) {
        if self.runtime.config().handler_stats {
            self.runtime.stats().record_handler(handler.kind_name());
        }
        match self.state {
            IcState::Generic => return,
            IcState::Uninitialized | IcState::Premonomorphic => {
                self.update_monomorphic(name, handler);
                return;
            }
            IcState::Monomorphic | IcState::RecomputeHandler if self.is_global() => {
                self.update_monomorphic(name, handler);
                return;
            }
            IcState::Monomorphic | IcState::RecomputeHandler | IcState::Polymorphic => {
                if self.update_polymorphic(name, &handler) {
                    return;
                }
                // A keyed site cannot tell which key its old handlers were for.
                if !self.is_keyed() || self.state == IcState::RecomputeHandler {
                    self.copy_ic_to_megamorphic_cache(name);
                }
                self.configure_megamorphic(KeyType::Property);
            }
            IcState::Megamorphic => {}
        }
        self.stub_cache().set(&self.receiver_shape, name, handler);
        self.vector_set = true;
    }

    fn update_monomorphic(&mut self, name: &Name, handler: Handler) {
        let shape = self.receiver_shape.clone();
        self.configure_monomorphic(name, &shape, handler);
    }

    fn copy_ic_to_megamorphic_cache(&self, name: &Name) {
        let cache = self.stub_cache();
        for (shape, handler) in self.feedback().live_entries() {
            cache.set(&shape, name, handler);
        }
    }

    /// Whether `target` is what `source` becomes after an elements kind
    /// generalization
    pub(crate) fn is_transition_of_monomorphic_target(source: &ShapeRef, target: &ShapeRef) -> bool {
        if source.is_abandoned_prototype_map() {
            return false;
        }
        if !source
            .elements_kind()
            .is_more_general_transition(target.elements_kind())
        {
            return false;
        }
        source
            .find_elements_kind_transitioned_map(std::slice::from_ref(target))
            .is_some_and(|t| Arc::ptr_eq(&t, target))
    }

    fn update_polymorphic(&mut self, name: &Name, handler: &Handler) -> bool {
        let feedback = self.feedback();
        if self.is_keyed() && self.state != IcState::RecomputeHandler && feedback.name() != Some(name) {
            return false;
        }
        let shape = self.receiver_shape.clone();
        let entries = feedback.live_entries();
        let mut deprecated = 0;
        let mut overwrite: Option<usize> = None;

        for (i, (current, current_handler)) in entries.iter().enumerate() {
            if current.is_deprecated() {
                deprecated += 1;
            } else if Arc::ptr_eq(current, &shape) {
                // Same shape and handler means no progress through the lattice.
                if current_handler == handler && self.state != IcState::RecomputeHandler {
                    return false;
                }
                // A prototype chain check failed; replace the handler.
                overwrite = Some(i);
            } else if overwrite.is_none() && Self::is_transition_of_monomorphic_target(current, &shape) {
                overwrite = Some(i);
            }
        }

        let valid = entries.len() - deprecated - usize::from(overwrite.is_some());
        if valid >= self.runtime.config().max_polymorphic {
            return false;
        }
        if entries.is_empty() && !matches!(self.state, IcState::Monomorphic | IcState::Polymorphic) {
            return false;
        }

        if valid + 1 == 1 {
            self.configure_monomorphic(name, &shape, handler.clone());
            return true;
        }
        if self.is_keyed() && feedback.name() != Some(name) {
            return false;
        }

        let mut rebuilt = MapHandlers::new();
        for (i, (current, current_handler)) in entries.into_iter().enumerate() {
            if Some(i) == overwrite {
                rebuilt.push(MapHandler::new(&shape, handler.clone()));
            } else if !current.is_deprecated() {
                rebuilt.push(MapHandler::new(&current, current_handler));
            }
        }
        if overwrite.is_none() {
            rebuilt.push(MapHandler::new(&shape, handler.clone()));
        }
        self.configure_polymorphic(name, rebuilt);
        true
    }

    // -------------------------------------------------------------------------
    // Handlers
    // -------------------------------------------------------------------------

    /// Canned handler, cached handler or a freshly compiled one
    pub(crate) fn compute_handler(&mut self, policy: &dyn IcPolicy, lookup: &mut LookupIterator) -> Handler {
        if let Some(handler) = policy.map_independent_handler(self, lookup) {
            return handler;
        }

        let key = HandlerKey::named(&self.receiver_shape, lookup.name(), policy.handler_kind());
        let runtime = self.runtime;
        let cache = runtime.handler_cache();
        if let Some(cached) = cache.lookup(&key) {
            // Never hand back the handler that just missed.
            let reuse = match &self.maybe_handler {
                Some(current) => current != &cached,
                None if self.state == IcState::Megamorphic && lookup.receiver().is_heap_object() => self
                    .stub_cache()
                    .get(&self.receiver_shape, lookup.name())
                    .is_none_or(|h| h != cached),
                None => true,
            };
            if reuse {
                tracing::trace!(
                    target: "otter::ic",
                    shape = self.receiver_shape.id().as_u64(),
                    name = %lookup.name(),
                    "handler cache hit"
                );
                return cached;
            }
        }

        let handler = policy.compile_handler(self, lookup);
        cache.insert(key, &self.receiver_shape, handler.clone());
        handler
    }

    /// Prototype-chain validation for the receiver's shape
    ///
    /// Explicit checks are collected for every prototype from the
    /// receiver up to (not including) `end`, or up to the end of the chain
    /// when `end` is `None`. `holder` is what the base handler operates on.
    pub(crate) fn chain_checks(&self, end: Option<&JsObject>, holder: Option<HolderRef>, name: &Name) -> ChainChecks {
        let shape = &self.receiver_shape;
        let realm = self.realm();
        let mut checks = PrototypeChecks::new();

        let holder_has_receiver_shape = end.is_some_and(|h| Arc::ptr_eq(&h.shape(), shape));
        if !holder_has_receiver_shape {
            if shape.is_primitive_map() || shape.is_js_global_proxy_map() {
                // Handlers for primitives may be shared across realms through the stub cache.
                checks.push(PrototypeCheck::NativeContext(realm.id()));
            } else if shape.is_js_global_object_map() {
                let cell = realm.global().ensure_empty_property_cell(name);
                checks.push(PrototypeCheck::GlobalPropertyCell(Arc::downgrade(&cell)));
            }

            let mut current = shape.prototype().cloned();
            while let Some(object) = current {
                if end.is_some_and(|h| h.ptr_eq(&object)) {
                    break;
                }
                let object_shape = object.shape();
                if object_shape.is_js_global_object_map() {
                    let cell = object.ensure_empty_property_cell(name);
                    checks.push(PrototypeCheck::GlobalPropertyCell(Arc::downgrade(&cell)));
                } else if object_shape.is_dictionary_map() {
                    checks.push(PrototypeCheck::DictionaryNegativeLookup(object.downgrade()));
                }
                if name.is_private() {
                    break;
                }
                current = object.prototype();
            }
        }

        let access_check_on_receiver = shape.is_primitive_map() || shape.is_access_check_needed();
        ChainChecks {
            validity_cell: JsObject::prototype_chain_validity_cell(shape),
            holder,
            checks,
            lookup_on_receiver: !access_check_on_receiver
                && shape.is_dictionary_map()
                && !shape.is_js_global_object_map(),
            access_check_on_receiver,
        }
    }

    /// `base` applied to `holder`, a prototype of the receiver
    pub(crate) fn from_prototype(&self, base: Handler, holder: &JsObject, name: &Name) -> Handler {
        let checks = self.chain_checks(Some(holder), Some(HolderRef::Object(holder.downgrade())), name);
        base.with_checks(checks, false)
    }

    /// `base` behind checks covering the whole prototype chain
    pub(crate) fn full_chain(&self, base: Handler, holder: Option<&JsObject>, name: &Name) -> Handler {
        let holder = holder.map(|h| HolderRef::Object(h.downgrade()));
        let checks = self.chain_checks(None, holder, name);
        if checks.is_trivial() {
            return base;
        }
        base.with_checks(checks, true)
    }

    // -------------------------------------------------------------------------
    // Tracing
    // -------------------------------------------------------------------------

    pub(crate) fn trace_ic(&self, name: &Name) {
        self.trace_ic_with(name, "");
    }

    /// Emit one transition event; `modifier` decorates keyed store marks
    pub(crate) fn trace_ic_with(&self, name: &Name, modifier: &str) {
        let new_state = self.vector.state(self.slot);
        if new_state != self.old_state {
            self.runtime.stats().record_transition();
        }
        if !self.runtime.config().trace_ic {
            return;
        }
        tracing::debug!(
            target: "otter::ic",
            ic = self.kind.ic_name(),
            slot = self.slot.0,
            name = %name,
            transition = %format_args!("{}->{}{}", self.old_state.mark(), new_state.mark(), modifier),
            shape = self.receiver_shape.id().as_u64(),
            reason = self.slow_stub_reason.unwrap_or(""),
            "ic transition"
        );
    }
}
