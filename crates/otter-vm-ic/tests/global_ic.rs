//! Global IC integration tests
//!
//! Script context bindings, global property cells and the reference error
//! rules of unqualified reads and writes.

use otter_vm_ic::{Feedback, FeedbackSlot, FeedbackSlotKind, FeedbackVector, IcConfig, IcRuntime, IcState};
use otter_vm_object::ops;
use otter_vm_object::{LanguageMode, Name, Realm, Value, VariableMode};

const SLOT: FeedbackSlot = FeedbackSlot(0);

fn name(s: &str) -> Name {
    Name::string(s)
}

fn load_site() -> FeedbackVector {
    FeedbackVector::new(vec![FeedbackSlotKind::LoadGlobal { inside_typeof: false }])
}

fn typeof_site() -> FeedbackVector {
    FeedbackVector::new(vec![FeedbackSlotKind::LoadGlobal { inside_typeof: true }])
}

fn store_site(mode: LanguageMode) -> FeedbackVector {
    FeedbackVector::new(vec![FeedbackSlotKind::StoreGlobal(mode)])
}

fn define_global(runtime: &IcRuntime, key: &str, value: Value) {
    let global = Value::object(runtime.realm().global().clone());
    ops::set_property(runtime.realm(), &global, &name(key), value, LanguageMode::Sloppy).unwrap();
}

// ============================================================================
// Script context bindings
// ============================================================================

#[test]
fn test_let_binding_dead_zone_then_cached() {
    let realm = Realm::new();
    realm.script_contexts().declare(&[("x", VariableMode::Let)]);
    let runtime = IcRuntime::new(realm);
    let vector = load_site();

    let err = runtime.load_global(&vector, SLOT, &name("x")).unwrap_err();
    assert!(err.is_reference_error());
    assert_eq!(vector.state(SLOT), IcState::Uninitialized);

    runtime.realm().script_contexts().initialize("x", Value::Smi(5));
    assert_eq!(runtime.load_global(&vector, SLOT, &name("x")).unwrap(), Value::Smi(5));
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);
    assert!(matches!(vector.get(SLOT), Feedback::LexicalVar { .. }));

    let hits = runtime.stats().snapshot().hits;
    assert_eq!(runtime.load_global(&vector, SLOT, &name("x")).unwrap(), Value::Smi(5));
    assert_eq!(runtime.stats().snapshot().hits, hits + 1);
}

#[test]
fn test_const_store_throws() {
    let realm = Realm::new();
    realm.script_contexts().declare(&[("c", VariableMode::Const)]);
    realm.script_contexts().initialize("c", Value::Smi(1));
    let runtime = IcRuntime::new(realm);
    let vector = store_site(LanguageMode::Sloppy);

    for _ in 0..2 {
        let err = runtime
            .store_global(&vector, SLOT, &name("c"), Value::Smi(2))
            .unwrap_err();
        assert!(err.is_type_error());
    }
    let loads = load_site();
    assert_eq!(runtime.load_global(&loads, SLOT, &name("c")).unwrap(), Value::Smi(1));
}

#[test]
fn test_store_in_dead_zone_throws() {
    let realm = Realm::new();
    realm.script_contexts().declare(&[("t", VariableMode::Let)]);
    let runtime = IcRuntime::new(realm);
    let vector = store_site(LanguageMode::Strict);
    let err = runtime
        .store_global(&vector, SLOT, &name("t"), Value::Smi(1))
        .unwrap_err();
    assert!(err.is_reference_error());
}

#[test]
fn test_let_store_through_lexical_feedback() {
    let realm = Realm::new();
    realm.script_contexts().declare(&[("y", VariableMode::Let)]);
    realm.script_contexts().initialize("y", Value::Smi(1));
    let runtime = IcRuntime::new(realm);
    let vector = store_site(LanguageMode::Strict);

    runtime.store_global(&vector, SLOT, &name("y"), Value::Smi(2)).unwrap();
    assert!(matches!(vector.get(SLOT), Feedback::LexicalVar { .. }));
    let hits = runtime.stats().snapshot().hits;
    runtime.store_global(&vector, SLOT, &name("y"), Value::Smi(3)).unwrap();
    assert_eq!(runtime.stats().snapshot().hits, hits + 1);

    let loads = load_site();
    assert_eq!(runtime.load_global(&loads, SLOT, &name("y")).unwrap(), Value::Smi(3));
    // Script bindings are not properties of the global object.
    let global = Value::object(runtime.realm().global().clone());
    assert_eq!(ops::get_property(runtime.realm(), &global, &name("y")).unwrap(), Value::Undefined);
}

// ============================================================================
// Global property cells
// ============================================================================

#[test]
fn test_property_cell_load() {
    let runtime = IcRuntime::new(Realm::new());
    define_global(&runtime, "g", Value::Smi(1));
    let vector = load_site();

    assert_eq!(runtime.load_global(&vector, SLOT, &name("g")).unwrap(), Value::Smi(1));
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);
    assert!(matches!(vector.get(SLOT), Feedback::PropertyCell(_)));

    define_global(&runtime, "g", Value::Smi(2));
    let hits = runtime.stats().snapshot().hits;
    assert_eq!(runtime.load_global(&vector, SLOT, &name("g")).unwrap(), Value::Smi(2));
    assert_eq!(runtime.stats().snapshot().hits, hits + 1);

    assert!(ops::delete_property(runtime.realm().global(), &name("g")));
    let err = runtime.load_global(&vector, SLOT, &name("g")).unwrap_err();
    assert!(err.is_reference_error());
}

#[test]
fn test_undeclared_read_throws() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    for _ in 0..2 {
        let err = runtime.load_global(&vector, SLOT, &name("missing")).unwrap_err();
        assert!(err.is_reference_error());
    }

    let uncached = IcRuntime::with_config(Realm::new(), IcConfig::default().with_use_ic(false));
    let vector = load_site();
    let err = uncached.load_global(&vector, SLOT, &name("missing")).unwrap_err();
    assert!(err.is_reference_error());
    assert_eq!(vector.state(SLOT), IcState::Uninitialized);
}

#[test]
fn test_typeof_missing_reads_undefined() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = typeof_site();
    for _ in 0..2 {
        assert_eq!(runtime.load_global(&vector, SLOT, &name("later")).unwrap(), Value::Undefined);
    }
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);

    // The cached absence must not hide a property defined afterwards.
    define_global(&runtime, "later", Value::Smi(7));
    assert_eq!(runtime.load_global(&vector, SLOT, &name("later")).unwrap(), Value::Smi(7));
    assert_eq!(runtime.load_global(&vector, SLOT, &name("later")).unwrap(), Value::Smi(7));
}

#[test]
fn test_strict_undeclared_store_throws_without_cell() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = store_site(LanguageMode::Strict);
    let err = runtime
        .store_global(&vector, SLOT, &name("undeclared"), Value::Smi(1))
        .unwrap_err();
    assert!(err.is_reference_error());
    assert!(runtime.realm().global().property_cell(&name("undeclared")).is_none());
    assert_eq!(vector.state(SLOT), IcState::Uninitialized);
}

#[test]
fn test_sloppy_store_creates_global() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = store_site(LanguageMode::Sloppy);
    runtime.store_global(&vector, SLOT, &name("s"), Value::Smi(1)).unwrap();
    runtime.store_global(&vector, SLOT, &name("s"), Value::Smi(2)).unwrap();
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);

    let hits = runtime.stats().snapshot().hits;
    runtime.store_global(&vector, SLOT, &name("s"), Value::Smi(3)).unwrap();
    assert_eq!(runtime.stats().snapshot().hits, hits + 1);

    let loads = load_site();
    assert_eq!(runtime.load_global(&loads, SLOT, &name("s")).unwrap(), Value::Smi(3));
    assert!(runtime.realm().global().property_cell(&name("s")).is_some());
}
