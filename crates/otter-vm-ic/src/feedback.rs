//! Feedback vectors
//!
//! Every property access site owns one slot. The slot records what the IC
//! learned about the receivers it has seen; only the IC miss path writes it.

use crate::error::IcResult;
use crate::handler::Handler;
use crate::state::IcState;
use otter_vm_object::{LanguageMode, Name, PropertyCell, ScriptContext, Shape, ShapeRef, VariableMode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Index of a slot in a feedback vector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedbackSlot(pub usize);

/// Kind of access site a slot belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackSlotKind {
    /// `o.name`
    LoadProperty,
    /// Unqualified global read
    LoadGlobal {
        /// `typeof name`: a missing binding reads as `undefined`
        inside_typeof: bool,
    },
    /// `o[key]`
    LoadKeyed,
    /// `o.name = v`
    StoreProperty(LanguageMode),
    /// Unqualified global write
    StoreGlobal(LanguageMode),
    /// `o[key] = v`
    StoreKeyed(LanguageMode),
}

impl FeedbackSlotKind {
    /// Keyed access
    pub fn is_keyed(self) -> bool {
        matches!(self, FeedbackSlotKind::LoadKeyed | FeedbackSlotKind::StoreKeyed(_))
    }

    /// Global access
    pub fn is_global(self) -> bool {
        matches!(self, FeedbackSlotKind::LoadGlobal { .. } | FeedbackSlotKind::StoreGlobal(_))
    }

    /// Any load
    pub fn is_load(self) -> bool {
        matches!(
            self,
            FeedbackSlotKind::LoadProperty | FeedbackSlotKind::LoadGlobal { .. } | FeedbackSlotKind::LoadKeyed
        )
    }

    /// Language mode of a store site
    pub fn language_mode(self) -> LanguageMode {
        match self {
            FeedbackSlotKind::StoreProperty(mode)
            | FeedbackSlotKind::StoreGlobal(mode)
            | FeedbackSlotKind::StoreKeyed(mode) => mode,
            _ => LanguageMode::Sloppy,
        }
    }

    /// IC name used in traces
    pub fn ic_name(self) -> &'static str {
        match self {
            FeedbackSlotKind::LoadProperty => "LoadIC",
            FeedbackSlotKind::LoadGlobal { .. } => "LoadGlobalIC",
            FeedbackSlotKind::LoadKeyed => "KeyedLoadIC",
            FeedbackSlotKind::StoreProperty(_) => "StoreIC",
            FeedbackSlotKind::StoreGlobal(_) => "StoreGlobalIC",
            FeedbackSlotKind::StoreKeyed(_) => "KeyedStoreIC",
        }
    }
}

/// Whether a megamorphic keyed site saw names or element indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Named keys
    Property,
    /// Integer indices
    Element,
}

/// One remembered shape and its handler
#[derive(Clone, Debug)]
pub struct MapHandler {
    /// Receiver shape
    pub shape: Weak<Shape>,
    /// Handler for it
    pub handler: Handler,
}

impl MapHandler {
    /// Entry for `shape`
    pub fn new(shape: &ShapeRef, handler: Handler) -> Self {
        Self {
            shape: Arc::downgrade(shape),
            handler,
        }
    }

    /// Whether the entry is for `shape`
    pub fn is_for(&self, shape: &ShapeRef) -> bool {
        std::ptr::eq(self.shape.as_ptr(), Arc::as_ptr(shape)) && self.shape.strong_count() > 0
    }
}

/// Polymorphic entries
pub type MapHandlers = SmallVec<[MapHandler; 4]>;

/// Contents of one feedback slot
#[derive(Clone, Debug, Default)]
pub enum Feedback {
    /// Never executed
    #[default]
    Uninitialized,
    /// Executed once
    Premonomorphic,
    /// One shape
    Monomorphic {
        /// Key of a keyed site that saw a single name
        name: Option<Name>,
        /// The entry
        entry: MapHandler,
    },
    /// Several shapes
    Polymorphic {
        /// Key of a keyed site that saw a single name
        name: Option<Name>,
        /// The entries, no shape twice
        entries: MapHandlers,
    },
    /// Too many shapes; consult the stub cache
    Megamorphic {
        /// What a keyed site was indexed with
        key_type: KeyType,
    },
    /// Global data property read straight from its cell
    PropertyCell(Weak<PropertyCell>),
    /// Script-scope `let`/`const` binding
    LexicalVar {
        /// Context holding the binding
        context: Arc<ScriptContext>,
        /// Slot within the context
        slot: usize,
        /// Binding kind
        mode: VariableMode,
    },
    /// Everything goes to the runtime
    Generic,
}

impl Feedback {
    /// IC state the contents correspond to
    pub fn state(&self) -> IcState {
        match self {
            Feedback::Uninitialized => IcState::Uninitialized,
            Feedback::Premonomorphic => IcState::Premonomorphic,
            Feedback::Monomorphic { .. } | Feedback::PropertyCell(_) | Feedback::LexicalVar { .. } => {
                IcState::Monomorphic
            }
            Feedback::Polymorphic { .. } => IcState::Polymorphic,
            Feedback::Megamorphic { .. } => IcState::Megamorphic,
            Feedback::Generic => IcState::Generic,
        }
    }

    /// Live shapes the slot remembers, in order
    pub fn target_maps(&self) -> Vec<ShapeRef> {
        match self {
            Feedback::Monomorphic { entry, .. } => entry.shape.upgrade().into_iter().collect(),
            Feedback::Polymorphic { entries, .. } => entries.iter().filter_map(|e| e.shape.upgrade()).collect(),
            _ => Vec::new(),
        }
    }

    /// Remembered entries whose shape is still alive
    pub fn live_entries(&self) -> Vec<(ShapeRef, Handler)> {
        let entries: &[MapHandler] = match self {
            Feedback::Monomorphic { entry, .. } => std::slice::from_ref(entry),
            Feedback::Polymorphic { entries, .. } => entries,
            _ => &[],
        };
        entries
            .iter()
            .filter_map(|e| e.shape.upgrade().map(|s| (s, e.handler.clone())))
            .collect()
    }

    /// Handler remembered for `shape`
    pub fn find_handler(&self, shape: &ShapeRef) -> Option<Handler> {
        match self {
            Feedback::Monomorphic { entry, .. } if entry.is_for(shape) => Some(entry.handler.clone()),
            Feedback::Polymorphic { entries, .. } => {
                entries.iter().find(|e| e.is_for(shape)).map(|e| e.handler.clone())
            }
            _ => None,
        }
    }

    /// Name recorded by a keyed site
    pub fn name(&self) -> Option<&Name> {
        match self {
            Feedback::Monomorphic { name, .. } | Feedback::Polymorphic { name, .. } => name.as_ref(),
            _ => None,
        }
    }

    /// Key type of a megamorphic keyed site
    pub fn key_type(&self) -> Option<KeyType> {
        match self {
            Feedback::Megamorphic { key_type } => Some(*key_type),
            _ => None,
        }
    }
}

/// Per-function feedback storage
pub struct FeedbackVector {
    kinds: Vec<FeedbackSlotKind>,
    slots: RwLock<Vec<Feedback>>,
    has_break_info: AtomicBool,
}

impl FeedbackVector {
    /// Vector with one uninitialized slot per kind
    pub fn new(kinds: Vec<FeedbackSlotKind>) -> Self {
        let slots = vec![Feedback::Uninitialized; kinds.len()];
        Self {
            kinds,
            slots: RwLock::new(slots),
            has_break_info: AtomicBool::new(false),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the vector has no slots
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Kind of `slot`, `None` when the vector has no such slot
    pub fn kind(&self, slot: FeedbackSlot) -> Option<FeedbackSlotKind> {
        self.kinds.get(slot.0).copied()
    }

    /// Whether `slot` belongs to this vector
    pub fn has_slot(&self, slot: FeedbackSlot) -> bool {
        slot.0 < self.kinds.len()
    }

    /// Snapshot of a slot's contents
    pub fn get(&self, slot: FeedbackSlot) -> Feedback {
        self.slots.read().get(slot.0).cloned().unwrap_or_default()
    }

    /// Run `f` on a slot without cloning it
    pub fn with<R>(&self, slot: FeedbackSlot, f: impl FnOnce(&Feedback) -> R) -> R {
        let slots = self.slots.read();
        match slots.get(slot.0) {
            Some(feedback) => f(feedback),
            None => f(&Feedback::Uninitialized),
        }
    }

    /// Overwrite a slot
    pub fn set(&self, slot: FeedbackSlot, feedback: Feedback) {
        if let Some(current) = self.slots.write().get_mut(slot.0) {
            *current = feedback;
        }
    }

    /// IC state of a slot
    pub fn state(&self, slot: FeedbackSlot) -> IcState {
        self.with(slot, Feedback::state)
    }

    /// Reset a slot to uninitialized
    pub fn clear(&self, slot: FeedbackSlot) {
        self.set(slot, Feedback::Uninitialized);
    }

    /// Reset every slot
    pub fn clear_all(&self) {
        self.slots.write().iter_mut().for_each(|f| *f = Feedback::Uninitialized);
    }

    /// Give up on a keyed store site for good
    pub fn set_generic(&self, slot: FeedbackSlot) {
        if matches!(self.kinds.get(slot.0), Some(FeedbackSlotKind::StoreKeyed(_))) {
            self.set(slot, Feedback::Generic);
        }
    }

    /// The owning function has break points
    pub fn has_break_info(&self) -> bool {
        self.has_break_info.load(Ordering::Acquire)
    }

    /// Set or clear break points on the owning function
    pub fn set_break_info(&self, value: bool) {
        self.has_break_info.store(value, Ordering::Release);
    }

    /// Serializable view of every slot
    pub fn snapshot(&self) -> FeedbackSnapshot {
        let slots = self.slots.read();
        FeedbackSnapshot {
            slots: self
                .kinds
                .iter()
                .zip(slots.iter())
                .enumerate()
                .map(|(index, (kind, feedback))| SlotSnapshot::new(index, *kind, feedback))
                .collect(),
        }
    }
}

impl std::fmt::Debug for FeedbackVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackVector")
            .field("slots", &self.kinds.len())
            .field("has_break_info", &self.has_break_info())
            .finish()
    }
}

/// Diagnostic view of one slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    /// Slot index
    pub slot: usize,
    /// Slot kind
    pub kind: FeedbackSlotKind,
    /// IC state
    pub state: IcState,
    /// Name a keyed site is specialized to
    pub name: Option<String>,
    /// Remembered `(shape, handler kind)` pairs
    pub maps: Vec<(u64, String)>,
    /// Key type of a megamorphic keyed site
    pub key_type: Option<KeyType>,
}

impl SlotSnapshot {
    fn new(slot: usize, kind: FeedbackSlotKind, feedback: &Feedback) -> Self {
        Self {
            slot,
            kind,
            state: feedback.state(),
            name: feedback.name().map(ToString::to_string),
            maps: feedback
                .live_entries()
                .into_iter()
                .map(|(shape, handler)| (shape.id().as_u64(), handler.kind_name().to_string()))
                .collect(),
            key_type: feedback.key_type(),
        }
    }
}

/// Diagnostic view of a whole vector
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSnapshot {
    /// One entry per slot
    pub slots: Vec<SlotSnapshot>,
}

impl FeedbackSnapshot {
    /// JSON rendering
    pub fn to_json(&self) -> IcResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_vm_object::{InstanceType, Shape};

    #[test]
    fn test_states_and_lookup() {
        let vector = FeedbackVector::new(vec![FeedbackSlotKind::LoadProperty, FeedbackSlotKind::LoadKeyed]);
        let slot = FeedbackSlot(0);
        assert_eq!(vector.state(slot), IcState::Uninitialized);

        let shape = Shape::builder(InstanceType::Object).build();
        vector.set(
            slot,
            Feedback::Monomorphic {
                name: None,
                entry: MapHandler::new(&shape, Handler::NonExistent),
            },
        );
        assert_eq!(vector.state(slot), IcState::Monomorphic);
        assert_eq!(vector.get(slot).find_handler(&shape), Some(Handler::NonExistent));

        let other = Shape::builder(InstanceType::Object).build();
        assert_eq!(vector.get(slot).find_handler(&other), None);

        vector.clear(slot);
        assert_eq!(vector.state(slot), IcState::Uninitialized);
    }

    #[test]
    fn test_dead_shapes_drop_out() {
        let shape = Shape::builder(InstanceType::Object).build();
        let keep = Shape::builder(InstanceType::Object).build();
        let mut entries = MapHandlers::new();
        entries.push(MapHandler::new(&shape, Handler::Slow));
        entries.push(MapHandler::new(&keep, Handler::Slow));
        let feedback = Feedback::Polymorphic { name: None, entries };
        drop(shape);
        let maps = feedback.target_maps();
        assert_eq!(maps.len(), 1);
        assert!(Arc::ptr_eq(&maps[0], &keep));
    }

    #[test]
    fn test_generic_only_for_keyed_stores() {
        let vector = FeedbackVector::new(vec![
            FeedbackSlotKind::LoadKeyed,
            FeedbackSlotKind::StoreKeyed(LanguageMode::Strict),
        ]);
        vector.set_generic(FeedbackSlot(0));
        vector.set_generic(FeedbackSlot(1));
        assert_eq!(vector.state(FeedbackSlot(0)), IcState::Uninitialized);
        assert_eq!(vector.state(FeedbackSlot(1)), IcState::Generic);
    }

    #[test]
    fn test_out_of_range_slot() {
        let vector = FeedbackVector::new(vec![FeedbackSlotKind::LoadProperty]);
        let missing = FeedbackSlot(3);
        assert!(vector.has_slot(FeedbackSlot(0)));
        assert!(!vector.has_slot(missing));
        assert_eq!(vector.kind(missing), None);
        assert_eq!(vector.state(missing), IcState::Uninitialized);
        vector.set(missing, Feedback::Generic);
        vector.set_generic(missing);
        assert!(matches!(vector.get(missing), Feedback::Uninitialized));
    }

    #[test]
    fn test_snapshot_json() {
        let vector = FeedbackVector::new(vec![FeedbackSlotKind::StoreProperty(LanguageMode::Sloppy)]);
        vector.set(FeedbackSlot(0), Feedback::Megamorphic { key_type: KeyType::Property });
        let snapshot = vector.snapshot();
        assert_eq!(snapshot.slots[0].state, IcState::Megamorphic);
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("Megamorphic"));
        let parsed: FeedbackSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
