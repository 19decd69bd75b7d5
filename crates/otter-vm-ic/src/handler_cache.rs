//! Shape-keyed handler cache
//!
//! Handlers that could not be built map-independently are compiled once per
//! `(shape, name, kind)` and kept here so other sites seeing the same shape
//! can reuse them. Store transitions get their own table keyed by the shape
//! the store starts from.

use crate::handler::{Handler, TransitionHandler};
use crate::store_mode::KeyedAccessStoreMode;
use dashmap::DashMap;
use otter_vm_object::{Name, Shape, ShapeId, ShapeRef};
use rustc_hash::FxBuildHasher;
use std::sync::{Arc, Weak};

/// Operation a cached handler performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Named load
    Load,
    /// Named store
    Store,
    /// Indexed load
    LoadElement,
    /// Indexed store
    StoreElement,
}

/// Cache key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    /// Receiver shape
    pub shape: ShapeId,
    /// Property name; `None` for element handlers
    pub name: Option<Name>,
    /// Operation
    pub kind: HandlerKind,
    /// Store mode of element store handlers
    pub store_mode: KeyedAccessStoreMode,
}

impl HandlerKey {
    /// Key of a named handler
    pub fn named(shape: &ShapeRef, name: &Name, kind: HandlerKind) -> Self {
        Self {
            shape: shape.id(),
            name: Some(name.clone()),
            kind,
            store_mode: KeyedAccessStoreMode::Standard,
        }
    }

    /// Key of an element handler
    pub fn element(shape: &ShapeRef, kind: HandlerKind, store_mode: KeyedAccessStoreMode) -> Self {
        Self {
            shape: shape.id(),
            name: None,
            kind,
            store_mode,
        }
    }
}

struct CachedHandler {
    shape: Weak<Shape>,
    handler: Handler,
}

/// Handlers shared across feedback slots
#[derive(Default)]
pub struct HandlerCache {
    handlers: DashMap<HandlerKey, CachedHandler, FxBuildHasher>,
    transitions: DashMap<(ShapeId, Name), Arc<TransitionHandler>, FxBuildHasher>,
}

impl HandlerCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached handler for `key`, dropping it if its shape died
    pub fn lookup(&self, key: &HandlerKey) -> Option<Handler> {
        {
            let entry = self.handlers.get(key)?;
            if entry.shape.strong_count() > 0 {
                return Some(entry.handler.clone());
            }
        }
        self.handlers.remove(key);
        None
    }

    /// Remember `handler` for receivers of `shape`
    pub fn insert(&self, key: HandlerKey, shape: &ShapeRef, handler: Handler) {
        self.handlers.insert(
            key,
            CachedHandler {
                shape: Arc::downgrade(shape),
                handler,
            },
        );
    }

    /// Transition handler for adding `name` to `shape`, while still usable
    pub fn lookup_transition(&self, shape: &ShapeRef, name: &Name) -> Option<Arc<TransitionHandler>> {
        let key = (shape.id(), name.clone());
        let found = self.transitions.get(&key).map(|t| t.clone());
        match found {
            Some(handler) if handler.is_valid() => Some(handler),
            Some(_) => {
                self.transitions.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Remember a transition handler
    pub fn insert_transition(&self, shape: &ShapeRef, name: &Name, handler: Arc<TransitionHandler>) {
        self.transitions.insert((shape.id(), name.clone()), handler);
    }

    /// Drop entries whose shapes or targets died
    pub fn purge(&self) -> usize {
        let before = self.len();
        self.handlers.retain(|_, entry| entry.shape.strong_count() > 0);
        self.transitions.retain(|_, handler| handler.is_valid());
        let removed = before - self.len();
        if removed > 0 {
            tracing::debug!(target: "otter::ic", removed, "purged handler cache");
        }
        removed
    }

    /// Number of cached handlers, transitions included
    pub fn len(&self) -> usize {
        self.handlers.len() + self.transitions.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything
    pub fn clear(&self) {
        self.handlers.clear();
        self.transitions.clear();
    }
}

impl std::fmt::Debug for HandlerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCache")
            .field("handlers", &self.handlers.len())
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::PrototypeChecks;
    use otter_vm_object::{FieldIndex, InstanceType, Representation};

    fn shape() -> ShapeRef {
        Shape::builder(InstanceType::Object).build()
    }

    #[test]
    fn test_lookup_by_kind() {
        let cache = HandlerCache::new();
        let s = shape();
        let x = Name::string("x");
        cache.insert(HandlerKey::named(&s, &x, HandlerKind::Load), &s, Handler::NonExistent);
        assert_eq!(
            cache.lookup(&HandlerKey::named(&s, &x, HandlerKind::Load)),
            Some(Handler::NonExistent)
        );
        assert_eq!(cache.lookup(&HandlerKey::named(&s, &x, HandlerKind::Store)), None);
        assert_eq!(
            cache.lookup(&HandlerKey::element(&s, HandlerKind::StoreElement, KeyedAccessStoreMode::Standard)),
            None
        );
    }

    #[test]
    fn test_dead_shape_entries_are_dropped() {
        let cache = HandlerCache::new();
        let s = shape();
        let key = HandlerKey::named(&s, &Name::string("x"), HandlerKind::Load);
        cache.insert(key.clone(), &s, Handler::Slow);
        drop(s);
        assert_eq!(cache.lookup(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_transitions_expire_with_target() {
        let cache = HandlerCache::new();
        let from = shape();
        let target = shape();
        let name = Name::string("y");
        let handler = Arc::new(TransitionHandler {
            target: Arc::downgrade(&target),
            field_index: FieldIndex::for_property(0, 4, Representation::Smi),
            representation: Representation::Smi,
            extend_storage: false,
            validity_cell: None,
            checks: PrototypeChecks::new(),
        });
        cache.insert_transition(&from, &name, handler.clone());
        assert!(cache.lookup_transition(&from, &name).is_some_and(|t| Arc::ptr_eq(&t, &handler)));
        drop(target);
        assert_eq!(cache.purge(), 1);
        assert!(cache.lookup_transition(&from, &name).is_none());
    }

    #[test]
    fn test_concurrent_inserts_and_lookups() {
        let cache = HandlerCache::new();
        let shapes: Vec<ShapeRef> = (0..32).map(|_| shape()).collect();
        let x = Name::string("x");

        std::thread::scope(|scope| {
            for t in 0..4 {
                let (cache, shapes, x) = (&cache, &shapes, &x);
                scope.spawn(move || {
                    for (i, s) in shapes.iter().enumerate().skip(t) {
                        let key = HandlerKey::named(s, x, HandlerKind::Load);
                        cache.insert(key.clone(), s, Handler::Constant { descriptor: i });
                        assert_eq!(cache.lookup(&key), Some(Handler::Constant { descriptor: i }));
                    }
                });
            }
        });

        assert_eq!(cache.len(), shapes.len());
        drop(shapes);
        assert_eq!(cache.purge(), 32);
        assert!(cache.is_empty());
    }
}
