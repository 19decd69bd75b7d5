//! IC runtime
//!
//! [`IcRuntime`] owns the realm together with the process-wide caches the
//! inline caches share: the load and store megamorphic stub caches and the
//! shape-keyed handler cache. Every property access of the interpreter goes
//! through one of its entry points with the feedback slot of the access site.
//!
//! Each entry point first tries the feedback the slot holds. A handler that
//! applies performs the access directly; one that asks for the slow path
//! defers to the generic runtime without touching feedback; anything else is
//! a miss and runs the IC for the site, which updates feedback and then
//! performs the access generically.

use crate::config::IcConfig;
use crate::dispatch::{self, HandlerOutcome};
use crate::feedback::{Feedback, FeedbackSlot, FeedbackSlotKind, FeedbackVector};
use crate::handler::Handler;
use crate::handler_cache::HandlerCache;
use crate::ic::Ic;
use crate::keyed_load;
use crate::keyed_store;
use crate::load::{self, LoadIc};
use crate::stats::IcStats;
use crate::store::{self, StoreIc};
use crate::stub_cache::{StubCache, StubCacheKind};
use otter_vm_object::{
    LanguageMode, LookupIterator, MessageTemplate, Name, PropertyKey, Realm, ScriptContext, ShapeRef, Value,
    VariableMode, VmError, VmResult, ops,
};
use std::sync::Arc;

/// What a slot offers for one access
enum Cached {
    /// A handler to run
    Handler(Handler),
    /// A script-scope binding
    Lexical {
        context: Arc<ScriptContext>,
        slot: usize,
        mode: VariableMode,
    },
    /// Megamorphic named access: consult the stub cache
    StubCache,
    /// Always use the generic runtime
    Generic,
    /// Nothing applies
    Miss,
}

/// Inline cache runtime for one realm
pub struct IcRuntime {
    realm: Realm,
    config: IcConfig,
    load_cache: StubCache,
    store_cache: StubCache,
    handler_cache: HandlerCache,
    stats: IcStats,
}

impl IcRuntime {
    /// Runtime with the default configuration
    pub fn new(realm: Realm) -> Self {
        Self::with_config(realm, IcConfig::default())
    }

    /// Runtime with a custom configuration
    pub fn with_config(realm: Realm, config: IcConfig) -> Self {
        let load_cache = StubCache::new(
            StubCacheKind::Load,
            config.primary_table_size,
            config.secondary_table_size,
        );
        let store_cache = StubCache::new(
            StubCacheKind::Store,
            config.primary_table_size,
            config.secondary_table_size,
        );
        tracing::debug!(
            target: "otter::ic",
            use_ic = config.use_ic,
            max_polymorphic = config.max_polymorphic,
            max_keyed_polymorphic = config.max_keyed_polymorphic,
            "ic runtime created"
        );
        Self {
            realm,
            config,
            load_cache,
            store_cache,
            handler_cache: HandlerCache::new(),
            stats: IcStats::new(),
        }
    }

    /// The realm accesses run in
    #[inline]
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// Active configuration
    #[inline]
    pub fn config(&self) -> &IcConfig {
        &self.config
    }

    /// Megamorphic stub cache for loads or stores
    pub fn stub_cache(&self, kind: StubCacheKind) -> &StubCache {
        match kind {
            StubCacheKind::Load => &self.load_cache,
            StubCacheKind::Store => &self.store_cache,
        }
    }

    /// Shape-keyed handler cache
    pub fn handler_cache(&self) -> &HandlerCache {
        &self.handler_cache
    }

    /// Hit, miss and transition counters
    pub fn stats(&self) -> &IcStats {
        &self.stats
    }

    /// Release unused transition targets, then drop the stub caches and
    /// handler cache entries whose shapes died. Returns how many handler
    /// cache entries were removed.
    pub fn purge(&self) -> usize {
        self.load_cache.clear();
        self.store_cache.clear();
        self.realm.purge_transitions();
        self.handler_cache.purge()
    }

    // -------------------------------------------------------------------------
    // Feedback
    // -------------------------------------------------------------------------

    fn cached(&self, vector: &FeedbackVector, slot: FeedbackSlot, shape: &ShapeRef, name: Option<&Name>) -> Cached {
        let names_match = |expected: &Option<Name>| expected.as_ref().is_none_or(|e| Some(e) == name);
        let cached = vector.with(slot, |feedback| match feedback {
            Feedback::Uninitialized | Feedback::Premonomorphic => Cached::Miss,
            Feedback::Monomorphic { name: expected, entry } => {
                if names_match(expected) && entry.is_for(shape) {
                    Cached::Handler(entry.handler.clone())
                } else {
                    Cached::Miss
                }
            }
            Feedback::Polymorphic { name: expected, entries } => {
                match entries.iter().find(|e| e.is_for(shape)) {
                    Some(entry) if names_match(expected) => Cached::Handler(entry.handler.clone()),
                    _ => Cached::Miss,
                }
            }
            // Element keys of a megamorphic site use the generic element access.
            Feedback::Megamorphic { .. } if name.is_none() => Cached::Generic,
            Feedback::Megamorphic { .. } => Cached::StubCache,
            Feedback::PropertyCell(cell) => Cached::Handler(Handler::PropertyCell(cell.clone())),
            Feedback::LexicalVar { context, slot, mode } => Cached::Lexical {
                context: context.clone(),
                slot: *slot,
                mode: *mode,
            },
            Feedback::Generic => Cached::Generic,
        });
        match cached {
            // Receivers on deprecated shapes are migrated by the miss path.
            Cached::Handler(_) if shape.is_deprecated() => Cached::Miss,
            Cached::StubCache => {
                let kind = if vector.kind(slot).is_some_and(FeedbackSlotKind::is_load) {
                    StubCacheKind::Load
                } else {
                    StubCacheKind::Store
                };
                match name.and_then(|n| self.stub_cache(kind).get(shape, n)) {
                    Some(handler) => Cached::Handler(handler),
                    None => Cached::Miss,
                }
            }
            other => other,
        }
    }

    // A slot the vector does not have behaves like a site with ICs disabled.
    fn uses_feedback(&self, vector: &FeedbackVector, slot: FeedbackSlot) -> bool {
        self.config.use_ic && vector.has_slot(slot)
    }

    fn record<T>(&self, outcome: &HandlerOutcome<T>) {
        match outcome {
            HandlerOutcome::Done(_) => self.stats.record_hit(),
            HandlerOutcome::Miss => self.stats.record_miss(),
            HandlerOutcome::Slow => self.stats.record_slow(),
        }
    }

    // -------------------------------------------------------------------------
    // Loads
    // -------------------------------------------------------------------------

    /// `receiver.name`
    pub fn load_property(
        &self,
        vector: &FeedbackVector,
        slot: FeedbackSlot,
        receiver: &Value,
        name: &Name,
    ) -> VmResult<Value> {
        if !self.uses_feedback(vector, slot) {
            return ops::get_property(&self.realm, receiver, name);
        }
        let shape = self.realm.receiver_shape(receiver);
        let outcome = match self.cached(vector, slot, &shape, Some(name)) {
            Cached::Handler(handler) => dispatch::load(&self.realm, receiver, &shape, name, &handler)?,
            Cached::Generic => HandlerOutcome::Slow,
            _ => HandlerOutcome::Miss,
        };
        self.record(&outcome);
        match outcome {
            HandlerOutcome::Done(value) => Ok(value),
            HandlerOutcome::Slow => ops::get_property(&self.realm, receiver, name),
            HandlerOutcome::Miss => {
                let mut ic = Ic::new(self, vector, slot, receiver);
                ic.update_state(receiver, Some(name));
                load::load(&mut ic, &LoadIc, receiver, name)
            }
        }
    }

    /// Unqualified read of `name`
    pub fn load_global(&self, vector: &FeedbackVector, slot: FeedbackSlot, name: &Name) -> VmResult<Value> {
        if !self.uses_feedback(vector, slot) {
            return self.generic_load_global(vector, slot, name);
        }
        let global = Value::Object(self.realm.global().clone());
        let shape = self.realm.receiver_shape(&global);
        let outcome = match self.cached(vector, slot, &shape, Some(name)) {
            Cached::Handler(handler) => dispatch::load(&self.realm, &global, &shape, name, &handler)?,
            Cached::Lexical { context, slot, .. } => context.get(slot).map_or(HandlerOutcome::Miss, HandlerOutcome::Done),
            Cached::Generic => HandlerOutcome::Slow,
            _ => HandlerOutcome::Miss,
        };
        self.record(&outcome);
        match outcome {
            HandlerOutcome::Done(value) => Ok(value),
            HandlerOutcome::Slow => self.generic_load_global(vector, slot, name),
            HandlerOutcome::Miss => {
                let mut ic = Ic::new(self, vector, slot, &global);
                ic.update_state(&global, Some(name));
                load::load_global(&mut ic, &LoadIc, name)
            }
        }
    }

    fn generic_load_global(&self, vector: &FeedbackVector, slot: FeedbackSlot, name: &Name) -> VmResult<Value> {
        let not_defined = || VmError::new_reference_error(MessageTemplate::NotDefined, &[&name.to_string()]);
        if let Some(found) = self.realm.script_contexts().lookup(name) {
            return found.context.get(found.slot_index).ok_or_else(not_defined);
        }
        let global = Value::Object(self.realm.global().clone());
        let inside_typeof = matches!(
            vector.kind(slot),
            Some(FeedbackSlotKind::LoadGlobal { inside_typeof: true })
        );
        if !inside_typeof && !LookupIterator::new(&self.realm, global.clone(), name.clone()).is_found() {
            return Err(not_defined());
        }
        ops::get_property(&self.realm, &global, name)
    }

    /// `receiver[key]`
    pub fn load_keyed(&self, vector: &FeedbackVector, slot: FeedbackSlot, receiver: &Value, key: &Value) -> VmResult<Value> {
        if !self.uses_feedback(vector, slot) {
            return ops::get_object_property(&self.realm, receiver, key);
        }
        let shape = self.realm.receiver_shape(receiver);
        let property_key = ops::to_property_key(key);
        let key_name = match &property_key {
            PropertyKey::Name(name) => Some(name),
            PropertyKey::Index(_) => None,
        };
        let outcome = match (self.cached(vector, slot, &shape, key_name), &property_key) {
            (Cached::Handler(handler), PropertyKey::Name(name)) => {
                dispatch::load(&self.realm, receiver, &shape, name, &handler)?
            }
            (Cached::Handler(handler), PropertyKey::Index(index)) => {
                dispatch::load_element(&self.realm, receiver, *index, &handler)?
            }
            (Cached::Generic, _) => HandlerOutcome::Slow,
            _ => HandlerOutcome::Miss,
        };
        self.record(&outcome);
        match outcome {
            HandlerOutcome::Done(value) => Ok(value),
            HandlerOutcome::Slow => ops::get_object_property(&self.realm, receiver, key),
            HandlerOutcome::Miss => {
                let mut ic = Ic::new(self, vector, slot, receiver);
                ic.update_state(receiver, key_name);
                keyed_load::load(&mut ic, receiver, key)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Stores
    // -------------------------------------------------------------------------

    /// `receiver.name = value`
    pub fn store_property(
        &self,
        vector: &FeedbackVector,
        slot: FeedbackSlot,
        receiver: &Value,
        name: &Name,
        value: Value,
    ) -> VmResult<()> {
        let mode = vector.kind(slot).map_or(LanguageMode::Sloppy, FeedbackSlotKind::language_mode);
        if !self.uses_feedback(vector, slot) {
            return ops::set_property(&self.realm, receiver, name, value, mode);
        }
        let shape = self.realm.receiver_shape(receiver);
        let outcome = match self.cached(vector, slot, &shape, Some(name)) {
            Cached::Handler(handler) => dispatch::store(&self.realm, receiver, &shape, name, &value, mode, &handler)?,
            Cached::Generic => HandlerOutcome::Slow,
            _ => HandlerOutcome::Miss,
        };
        self.record(&outcome);
        match outcome {
            HandlerOutcome::Done(()) => Ok(()),
            HandlerOutcome::Slow => ops::set_property(&self.realm, receiver, name, value, mode),
            HandlerOutcome::Miss => {
                let mut ic = Ic::new(self, vector, slot, receiver);
                ic.update_state(receiver, Some(name));
                store::store(&mut ic, &StoreIc, receiver, name, &value, mode)
            }
        }
    }

    /// Unqualified write of `name`
    pub fn store_global(&self, vector: &FeedbackVector, slot: FeedbackSlot, name: &Name, value: Value) -> VmResult<()> {
        let mode = vector.kind(slot).map_or(LanguageMode::Sloppy, FeedbackSlotKind::language_mode);
        if !self.uses_feedback(vector, slot) {
            return self.generic_store_global(name, value, mode);
        }
        let global = Value::Object(self.realm.global().clone());
        let shape = self.realm.receiver_shape(&global);
        let outcome = match self.cached(vector, slot, &shape, Some(name)) {
            Cached::Handler(handler) => dispatch::store(&self.realm, &global, &shape, name, &value, mode, &handler)?,
            Cached::Lexical { mode: VariableMode::Const, .. } => {
                return Err(VmError::new_type_error(MessageTemplate::ConstAssign, &[&name.to_string()]));
            }
            Cached::Lexical { context, slot, .. } => match context.get(slot) {
                Some(_) => {
                    context.set(slot, value.clone());
                    HandlerOutcome::Done(())
                }
                None => HandlerOutcome::Miss,
            },
            Cached::Generic => HandlerOutcome::Slow,
            _ => HandlerOutcome::Miss,
        };
        self.record(&outcome);
        match outcome {
            HandlerOutcome::Done(()) => Ok(()),
            HandlerOutcome::Slow => self.generic_store_global(name, value, mode),
            HandlerOutcome::Miss => {
                let mut ic = Ic::new(self, vector, slot, &global);
                ic.update_state(&global, Some(name));
                store::store_global(&mut ic, &StoreIc, name, &value, mode)
            }
        }
    }

    fn generic_store_global(&self, name: &Name, value: Value, mode: LanguageMode) -> VmResult<()> {
        if let Some(found) = self.realm.script_contexts().lookup(name) {
            if found.mode == VariableMode::Const {
                return Err(VmError::new_type_error(MessageTemplate::ConstAssign, &[&name.to_string()]));
            }
            if found.context.get(found.slot_index).is_none() {
                return Err(VmError::new_reference_error(MessageTemplate::NotDefined, &[&name.to_string()]));
            }
            found.context.set(found.slot_index, value);
            return Ok(());
        }
        let global = Value::Object(self.realm.global().clone());
        if mode == LanguageMode::Strict && !LookupIterator::new(&self.realm, global.clone(), name.clone()).is_found() {
            return Err(VmError::new_reference_error(MessageTemplate::NotDefined, &[&name.to_string()]));
        }
        ops::set_property(&self.realm, &global, name, value, mode)
    }

    /// `receiver[key] = value`
    pub fn store_keyed(
        &self,
        vector: &FeedbackVector,
        slot: FeedbackSlot,
        receiver: &Value,
        key: &Value,
        value: Value,
    ) -> VmResult<()> {
        let mode = vector.kind(slot).map_or(LanguageMode::Sloppy, FeedbackSlotKind::language_mode);
        if !self.uses_feedback(vector, slot) {
            return ops::set_object_property(&self.realm, receiver, key, value, mode);
        }
        let shape = self.realm.receiver_shape(receiver);
        let property_key = ops::to_property_key(key);
        let key_name = match &property_key {
            PropertyKey::Name(name) => Some(name),
            PropertyKey::Index(_) => None,
        };
        let outcome = match (self.cached(vector, slot, &shape, key_name), &property_key) {
            (Cached::Handler(handler), PropertyKey::Name(name)) => {
                dispatch::store(&self.realm, receiver, &shape, name, &value, mode, &handler)?
            }
            (Cached::Handler(handler), PropertyKey::Index(index)) => {
                dispatch::store_element(&self.realm, receiver, *index, &value, mode, &handler)?
            }
            (Cached::Generic, _) => HandlerOutcome::Slow,
            _ => HandlerOutcome::Miss,
        };
        self.record(&outcome);
        match outcome {
            HandlerOutcome::Done(()) => Ok(()),
            HandlerOutcome::Slow => ops::set_object_property(&self.realm, receiver, key, value, mode),
            HandlerOutcome::Miss => {
                let mut ic = Ic::new(self, vector, slot, receiver);
                ic.update_state(receiver, key_name);
                keyed_store::store(&mut ic, receiver, key, &value, mode)
            }
        }
    }
}

impl std::fmt::Debug for IcRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcRuntime")
            .field("config", &self.config)
            .field("load_cache", &self.load_cache.len())
            .field("store_cache", &self.store_cache.len())
            .field("handler_cache", &self.handler_cache.len())
            .finish()
    }
}
