//! Megamorphic stub cache
//!
//! A two-level, fixed-size hash table from `(shape, name)` to handler,
//! shared by every megamorphic site of one kind. New entries go to the
//! primary table; the entry they displace moves to the secondary table.
//! Collisions simply overwrite: a lookup that finds nothing, or finds an
//! entry for a dead shape, is a miss and the IC takes the runtime path.
//!
//! Readers and writers may run on different threads. Each entry has its own
//! lock so a lost update only costs a future miss.

use crate::handler::Handler;
use otter_vm_object::{Name, Shape, ShapeRef};
use parking_lot::RwLock;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Clone)]
struct Entry {
    shape: Weak<Shape>,
    name: Name,
    handler: Handler,
}

impl Entry {
    fn matches(&self, shape: &ShapeRef, name: &Name) -> bool {
        std::ptr::eq(self.shape.as_ptr(), Arc::as_ptr(shape)) && self.shape.strong_count() > 0 && &self.name == name
    }
}

/// Which ICs a stub cache serves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StubCacheKind {
    /// Named and keyed loads
    Load,
    /// Named and keyed stores
    Store,
}

/// Megamorphic handler cache
pub struct StubCache {
    kind: StubCacheKind,
    primary: Box<[RwLock<Option<Entry>>]>,
    secondary: Box<[RwLock<Option<Entry>>]>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StubCache {
    /// Create a cache with the given table sizes (powers of two)
    pub fn new(kind: StubCacheKind, primary_size: usize, secondary_size: usize) -> Self {
        let table = |size: usize| {
            (0..size.max(1).next_power_of_two())
                .map(|_| RwLock::new(None))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        };
        Self {
            kind,
            primary: table(primary_size),
            secondary: table(secondary_size),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Which ICs this cache serves
    pub fn kind(&self) -> StubCacheKind {
        self.kind
    }

    fn primary_offset(&self, shape: &ShapeRef, name: &Name) -> usize {
        let mut hasher = FxHasher::default();
        shape.id().hash(&mut hasher);
        let map_bits = hasher.finish();
        let mixed = name.hash_value().wrapping_add(map_bits) ^ (self.kind as u64);
        (mixed as usize) & (self.primary.len() - 1)
    }

    fn secondary_offset(&self, primary: usize, name: &Name) -> usize {
        let mut hasher = FxHasher::default();
        primary.hash(&mut hasher);
        name.hash_value().hash(&mut hasher);
        (hasher.finish() as usize) & (self.secondary.len() - 1)
    }

    /// Look in both tables
    pub fn get(&self, shape: &ShapeRef, name: &Name) -> Option<Handler> {
        let primary = self.primary_offset(shape, name);
        let found = self.primary[primary]
            .read()
            .as_ref()
            .filter(|e| e.matches(shape, name))
            .map(|e| e.handler.clone())
            .or_else(|| {
                let secondary = self.secondary_offset(primary, name);
                self.secondary[secondary]
                    .read()
                    .as_ref()
                    .filter(|e| e.matches(shape, name))
                    .map(|e| e.handler.clone())
            });
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert, pushing the displaced primary entry to the secondary table
    pub fn set(&self, shape: &ShapeRef, name: &Name, handler: Handler) {
        let primary = self.primary_offset(shape, name);
        let entry = Entry {
            shape: Arc::downgrade(shape),
            name: name.clone(),
            handler,
        };
        let displaced = self.primary[primary].write().replace(entry);
        if let Some(old) = displaced
            && !(std::ptr::eq(old.shape.as_ptr(), Arc::as_ptr(shape)) && &old.name == name)
            && old.shape.strong_count() > 0
        {
            let old_primary = match old.shape.upgrade() {
                Some(old_shape) => self.primary_offset(&old_shape, &old.name),
                None => primary,
            };
            let secondary = self.secondary_offset(old_primary, &old.name);
            *self.secondary[secondary].write() = Some(old);
        }
        tracing::trace!(
            target: "otter::ic",
            cache = ?self.kind,
            shape = shape.id().as_u64(),
            name = %name,
            "stub cache insert"
        );
    }

    /// Drop every entry
    pub fn clear(&self) {
        for slot in self.primary.iter().chain(self.secondary.iter()) {
            *slot.write() = None;
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .filter(|slot| slot.read().as_ref().is_some_and(|e| e.shape.strong_count() > 0))
            .count()
    }

    /// Whether the cache holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation
    pub fn lookup_counts(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for StubCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubCache")
            .field("kind", &self.kind)
            .field("primary", &self.primary.len())
            .field("secondary", &self.secondary.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_vm_object::InstanceType;

    fn shape() -> ShapeRef {
        Shape::builder(InstanceType::Object).build()
    }

    #[test]
    fn test_set_get() {
        let cache = StubCache::new(StubCacheKind::Load, 64, 16);
        let a = shape();
        let b = shape();
        let x = Name::string("x");
        cache.set(&a, &x, Handler::NonExistent);
        assert_eq!(cache.get(&a, &x), Some(Handler::NonExistent));
        assert_eq!(cache.get(&b, &x), None);
        assert_eq!(cache.get(&a, &Name::string("y")), None);
        assert_eq!(cache.lookup_counts(), (1, 2));
    }

    #[test]
    fn test_displaced_entries_survive_in_secondary() {
        // A one-entry primary table forces every insert to collide.
        let cache = StubCache::new(StubCacheKind::Store, 1, 64);
        let a = shape();
        let b = shape();
        let x = Name::string("x");
        cache.set(&a, &x, Handler::Slow);
        cache.set(&b, &x, Handler::NonExistent);
        assert_eq!(cache.get(&b, &x), Some(Handler::NonExistent));
        assert_eq!(cache.get(&a, &x), Some(Handler::Slow));
    }

    #[test]
    fn test_dead_shapes_miss() {
        let cache = StubCache::new(StubCacheKind::Load, 16, 16);
        let x = Name::string("x");
        let a = shape();
        cache.set(&a, &x, Handler::Slow);
        assert_eq!(cache.len(), 1);
        drop(a);
        assert_eq!(cache.len(), 0);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_set_and_get() {
        let cache = StubCache::new(StubCacheKind::Load, 16, 8);
        let shapes: Vec<ShapeRef> = (0..24).map(|_| shape()).collect();
        let names: Vec<Name> = (0..3).map(|i| Name::string(&format!("p{i}"))).collect();
        // Each (shape, name) pair has its own handler; a hit must never return another pair's.
        let expected = |s: usize, n: usize| Handler::Constant { descriptor: s * names.len() + n };

        std::thread::scope(|scope| {
            for t in 0..4 {
                let (cache, shapes, names) = (&cache, &shapes, &names);
                scope.spawn(move || {
                    for round in 0..500 {
                        let s = (t * 7 + round) % shapes.len();
                        let n = round % names.len();
                        cache.set(&shapes[s], &names[n], expected(s, n));
                        let other = (s + t) % shapes.len();
                        if let Some(handler) = cache.get(&shapes[other], &names[n]) {
                            assert_eq!(handler, expected(other, n));
                        }
                    }
                });
            }
        });

        let (hits, misses) = cache.lookup_counts();
        assert_eq!(hits + misses, 2000);
        assert!(cache.len() <= 16 + 8);
        for (s, shape) in shapes.iter().enumerate() {
            for (n, name) in names.iter().enumerate() {
                if let Some(handler) = cache.get(shape, name) {
                    assert_eq!(handler, expected(s, n));
                }
            }
        }
    }
}
