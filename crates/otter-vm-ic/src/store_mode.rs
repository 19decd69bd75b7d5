//! Keyed store modes
//!
//! A keyed store site infers from the receiver, index and value how its
//! element handler should behave: plain store, elements kind transition,
//! growth at the end of an array, ignoring out-of-bounds typed array writes
//! or copying a copy-on-write backing store first.

use otter_vm_object::{ElementsKind, JsObject, ShapeRef, Value};
use serde::{Deserialize, Serialize};

/// Store mode of a keyed element store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyedAccessStoreMode {
    /// In-bounds store that keeps the elements kind
    #[default]
    Standard,
    /// In-bounds store generalizing to object elements
    TransitionToObject,
    /// In-bounds store generalizing smi to double elements
    TransitionToDouble,
    /// Append to an array without changing its kind
    GrowNoTransition,
    /// Append generalizing to object elements
    GrowTransitionToObject,
    /// Append generalizing smi to double elements
    GrowTransitionToDouble,
    /// Typed array store that drops out-of-bounds writes
    IgnoreOutOfBounds,
    /// Store into a copy-on-write backing store
    HandleCopyOnWrite,
}

impl KeyedAccessStoreMode {
    /// Stores that append to an array
    pub fn is_grow(self) -> bool {
        matches!(
            self,
            KeyedAccessStoreMode::GrowNoTransition
                | KeyedAccessStoreMode::GrowTransitionToObject
                | KeyedAccessStoreMode::GrowTransitionToDouble
        )
    }

    /// Stores that change the elements kind
    pub fn is_transition(self) -> bool {
        matches!(
            self,
            KeyedAccessStoreMode::TransitionToObject
                | KeyedAccessStoreMode::TransitionToDouble
                | KeyedAccessStoreMode::GrowTransitionToObject
                | KeyedAccessStoreMode::GrowTransitionToDouble
        )
    }

    /// The mode with the elements kind change stripped
    pub fn non_transitioning(self) -> Self {
        if self >= KeyedAccessStoreMode::IgnoreOutOfBounds {
            self
        } else if self >= KeyedAccessStoreMode::GrowNoTransition {
            KeyedAccessStoreMode::GrowNoTransition
        } else {
            KeyedAccessStoreMode::Standard
        }
    }

    /// Modifier appended to IC trace marks
    pub fn trace_modifier(self) -> &'static str {
        match self {
            KeyedAccessStoreMode::HandleCopyOnWrite => ".COW",
            KeyedAccessStoreMode::IgnoreOutOfBounds => ".IGNORE_OOB",
            mode if mode.is_grow() => ".GROW",
            _ => "",
        }
    }
}

/// Infer the store mode for `receiver[index] = value`
pub fn get_store_mode(receiver: &JsObject, index: u32, value: &Value) -> KeyedAccessStoreMode {
    let is_array = receiver.is_js_array();
    let limit = if is_array {
        receiver.length()
    } else {
        receiver.elements_capacity()
    };
    let oob = index >= limit;
    let allow_growth = is_array && oob && !receiver.would_convert_to_slow_elements(index);
    let kind = receiver.elements_kind();

    if allow_growth {
        if kind.is_smi() {
            if value.is_heap_number() {
                return KeyedAccessStoreMode::GrowTransitionToDouble;
            }
            if value.is_heap_object() {
                return KeyedAccessStoreMode::GrowTransitionToObject;
            }
        } else if kind.is_double() && !value.is_number() {
            return KeyedAccessStoreMode::GrowTransitionToObject;
        }
        return KeyedAccessStoreMode::GrowNoTransition;
    }

    if kind.is_smi() {
        if value.is_heap_number() {
            return KeyedAccessStoreMode::TransitionToDouble;
        }
        if value.is_heap_object() {
            return KeyedAccessStoreMode::TransitionToObject;
        }
    } else if kind.is_double() && !value.is_number() {
        return KeyedAccessStoreMode::TransitionToObject;
    }
    if kind.is_typed() && oob {
        return KeyedAccessStoreMode::IgnoreOutOfBounds;
    }
    if receiver.has_copy_on_write_elements() {
        return KeyedAccessStoreMode::HandleCopyOnWrite;
    }
    KeyedAccessStoreMode::Standard
}

/// Mode a cached handler uses after a store of `mode` already ran
///
/// Handlers never transition the elements kind themselves. A receiver that
/// had copy-on-write elements keeps needing the copy for other instances.
pub fn non_transitioning_store_mode(mode: KeyedAccessStoreMode, receiver_was_cow: bool) -> KeyedAccessStoreMode {
    match mode.non_transitioning() {
        KeyedAccessStoreMode::Standard if receiver_was_cow => KeyedAccessStoreMode::HandleCopyOnWrite,
        other => other,
    }
}

/// Elements kind a store of `mode` leaves a `shape` receiver in
pub fn transitioned_kind(kind: ElementsKind, mode: KeyedAccessStoreMode) -> ElementsKind {
    match mode {
        KeyedAccessStoreMode::TransitionToObject | KeyedAccessStoreMode::GrowTransitionToObject => kind.to_object(),
        KeyedAccessStoreMode::TransitionToDouble | KeyedAccessStoreMode::GrowTransitionToDouble => kind.to_double(),
        _ => kind,
    }
}

/// Shape a store of `mode` leaves a `shape` receiver with
pub fn compute_transitioned_map(shape: &ShapeRef, mode: KeyedAccessStoreMode) -> ShapeRef {
    let kind = transitioned_kind(shape.elements_kind(), mode);
    if kind == shape.elements_kind() {
        return shape.clone();
    }
    shape.transition_elements_to(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_vm_object::{Realm, TypedArrayKind};

    #[test]
    fn test_non_transitioning() {
        use KeyedAccessStoreMode::*;
        assert_eq!(TransitionToDouble.non_transitioning(), Standard);
        assert_eq!(GrowTransitionToObject.non_transitioning(), GrowNoTransition);
        assert_eq!(HandleCopyOnWrite.non_transitioning(), HandleCopyOnWrite);
        assert_eq!(IgnoreOutOfBounds.non_transitioning(), IgnoreOutOfBounds);
        assert_eq!(non_transitioning_store_mode(TransitionToObject, true), HandleCopyOnWrite);
        assert_eq!(non_transitioning_store_mode(GrowTransitionToDouble, true), GrowNoTransition);
        assert_eq!(non_transitioning_store_mode(Standard, false), Standard);
    }

    #[test]
    fn test_grow_modes() {
        let realm = Realm::new();
        let array = realm.new_array(vec![Value::Smi(1), Value::Smi(2), Value::Smi(3)]);
        assert_eq!(
            get_store_mode(&array, 3, &Value::HeapNumber(4.5)),
            KeyedAccessStoreMode::GrowTransitionToDouble
        );
        assert_eq!(
            get_store_mode(&array, 3, &Value::string("s")),
            KeyedAccessStoreMode::GrowTransitionToObject
        );
        assert_eq!(get_store_mode(&array, 3, &Value::Smi(4)), KeyedAccessStoreMode::GrowNoTransition);
        assert_eq!(get_store_mode(&array, 1, &Value::Smi(4)), KeyedAccessStoreMode::Standard);
        assert_eq!(
            get_store_mode(&array, 1, &Value::HeapNumber(0.5)),
            KeyedAccessStoreMode::TransitionToDouble
        );
        // Too far past the end to stay fast.
        assert_eq!(get_store_mode(&array, 100_000, &Value::Smi(4)), KeyedAccessStoreMode::Standard);
    }

    #[test]
    fn test_typed_and_copy_on_write_modes() {
        let realm = Realm::new();
        let typed = realm.new_typed_array(TypedArrayKind::Float64, 4);
        assert_eq!(get_store_mode(&typed, 9, &Value::Smi(1)), KeyedAccessStoreMode::IgnoreOutOfBounds);
        assert_eq!(get_store_mode(&typed, 1, &Value::Smi(1)), KeyedAccessStoreMode::Standard);

        let literal = realm.new_array(vec![Value::string("a"), Value::string("b")]);
        let copy = literal.clone_with_copy_on_write_elements().unwrap();
        assert_eq!(get_store_mode(&copy, 0, &Value::Smi(1)), KeyedAccessStoreMode::HandleCopyOnWrite);
    }

    #[test]
    fn test_trace_modifiers() {
        assert_eq!(KeyedAccessStoreMode::HandleCopyOnWrite.trace_modifier(), ".COW");
        assert_eq!(KeyedAccessStoreMode::GrowTransitionToDouble.trace_modifier(), ".GROW");
        assert_eq!(KeyedAccessStoreMode::Standard.trace_modifier(), "");
    }

    #[test]
    fn test_compute_transitioned_map() {
        let realm = Realm::new();
        let shape = realm.initial_array_shape(ElementsKind::HoleySmi).unwrap().clone();
        let target = compute_transitioned_map(&shape, KeyedAccessStoreMode::GrowTransitionToDouble);
        assert_eq!(target.elements_kind(), ElementsKind::HoleyDouble);
        assert!(std::sync::Arc::ptr_eq(
            &compute_transitioned_map(&shape, KeyedAccessStoreMode::GrowNoTransition),
            &shape
        ));
    }
}
