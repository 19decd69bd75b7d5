//! Named load IC integration tests
//!
//! State transitions, handler reuse and invalidation of `o.name` sites.

use otter_vm_ic::handler::PrototypeCheck;
use otter_vm_ic::{
    FeedbackSlot, FeedbackSlotKind, FeedbackVector, Handler, IcConfig, IcRuntime, IcState, MapIndependentHandlers,
    StubCacheKind,
};
use otter_vm_object::object::ProxyGetTrap;
use otter_vm_object::ops;
use otter_vm_object::{
    InterceptorInfo, JsObject, LanguageMode, Name, PropertyAttributes, PropertyKey, Realm, Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const SLOT: FeedbackSlot = FeedbackSlot(0);

fn name(s: &str) -> Name {
    Name::string(s)
}

fn load_site() -> FeedbackVector {
    FeedbackVector::new(vec![FeedbackSlotKind::LoadProperty])
}

fn object_with(realm: &Realm, props: &[(&str, Value)]) -> JsObject {
    let obj = realm.new_object();
    for (key, value) in props {
        ops::set_property(realm, &Value::object(obj.clone()), &name(key), value.clone(), LanguageMode::Strict)
            .unwrap();
    }
    obj
}

fn load(runtime: &IcRuntime, vector: &FeedbackVector, obj: &JsObject, key: &str) -> Value {
    runtime
        .load_property(vector, SLOT, &Value::object(obj.clone()), &name(key))
        .unwrap()
}

// ============================================================================
// State transitions
// ============================================================================

#[test]
fn test_monomorphic_field_load() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    let a = object_with(runtime.realm(), &[("x", Value::Smi(1))]);

    assert_eq!(vector.state(SLOT), IcState::Uninitialized);
    assert_eq!(load(&runtime, &vector, &a, "x"), Value::Smi(1));
    assert_eq!(vector.state(SLOT), IcState::Premonomorphic);
    assert_eq!(load(&runtime, &vector, &a, "x"), Value::Smi(1));
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);

    let handler = vector.get(SLOT).find_handler(&a.shape());
    assert!(matches!(handler, Some(Handler::Field { .. })));

    // Same construction, same shape: served by the cached handler.
    let b = object_with(runtime.realm(), &[("x", Value::Smi(2))]);
    assert!(Arc::ptr_eq(&a.shape(), &b.shape()));
    assert_eq!(load(&runtime, &vector, &b, "x"), Value::Smi(2));
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);

    let stats = runtime.stats().snapshot();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_short_lived_objects_share_a_shape() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    for i in 0..20 {
        let obj = object_with(runtime.realm(), &[("x", Value::Smi(i))]);
        assert_eq!(load(&runtime, &vector, &obj, "x"), Value::Smi(i));
    }
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);
    let stats = runtime.stats().snapshot();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 18);
}

#[test]
fn test_second_shape_goes_polymorphic() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    let a = object_with(runtime.realm(), &[("x", Value::Smi(1))]);
    let b = object_with(runtime.realm(), &[("y", Value::Smi(0)), ("x", Value::Smi(2))]);
    assert!(!Arc::ptr_eq(&a.shape(), &b.shape()));

    load(&runtime, &vector, &a, "x");
    load(&runtime, &vector, &a, "x");
    assert_eq!(load(&runtime, &vector, &b, "x"), Value::Smi(2));
    assert_eq!(vector.state(SLOT), IcState::Polymorphic);
    assert_eq!(vector.get(SLOT).target_maps().len(), 2);

    // Both shapes hit now.
    let before = runtime.stats().snapshot().hits;
    assert_eq!(load(&runtime, &vector, &a, "x"), Value::Smi(1));
    assert_eq!(load(&runtime, &vector, &b, "x"), Value::Smi(2));
    assert_eq!(runtime.stats().snapshot().hits, before + 2);
}

#[test]
fn test_too_many_shapes_go_megamorphic() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    let objects: Vec<JsObject> = (0..5)
        .map(|i| {
            let key = format!("p{i}");
            object_with(runtime.realm(), &[(key.as_str(), Value::Smi(i)), ("x", Value::Smi(i * 10))])
        })
        .collect();

    load(&runtime, &vector, &objects[0], "x");
    for obj in &objects[..4] {
        load(&runtime, &vector, obj, "x");
    }
    assert_eq!(vector.state(SLOT), IcState::Polymorphic);
    assert_eq!(vector.get(SLOT).target_maps().len(), 4);

    assert_eq!(load(&runtime, &vector, &objects[4], "x"), Value::Smi(40));
    assert_eq!(vector.state(SLOT), IcState::Megamorphic);
    assert!(
        runtime
            .stub_cache(StubCacheKind::Load)
            .get(&objects[4].shape(), &name("x"))
            .is_some()
    );

    for (i, obj) in objects.iter().enumerate() {
        assert_eq!(load(&runtime, &vector, obj, "x"), Value::Smi(i as i32 * 10));
    }
    assert_eq!(vector.state(SLOT), IcState::Megamorphic);
}

#[test]
fn test_lattice_never_regresses() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    let objects: Vec<JsObject> = (0..8)
        .map(|i| {
            let key = format!("q{i}");
            object_with(runtime.realm(), &[(key.as_str(), Value::Smi(i)), ("x", Value::Smi(i))])
        })
        .collect();

    let mut level = vector.state(SLOT).level();
    for round in 0..3 {
        for obj in objects.iter().take(2 + round * 3) {
            assert_eq!(load(&runtime, &vector, obj, "x"), obj_x(&runtime, obj));
            let next = vector.state(SLOT).level();
            assert!(next >= level, "state went from level {level} to {next}");
            level = next;
        }
    }
    assert_eq!(vector.state(SLOT), IcState::Megamorphic);
}

fn obj_x(runtime: &IcRuntime, obj: &JsObject) -> Value {
    ops::get_property(runtime.realm(), &Value::object(obj.clone()), &name("x")).unwrap()
}

#[test]
fn test_use_ic_off_keeps_slot_uninitialized() {
    let runtime = IcRuntime::with_config(Realm::new(), IcConfig::default().with_use_ic(false));
    let vector = load_site();
    let a = object_with(runtime.realm(), &[("x", Value::Smi(3))]);
    for _ in 0..4 {
        assert_eq!(load(&runtime, &vector, &a, "x"), Value::Smi(3));
    }
    assert_eq!(vector.state(SLOT), IcState::Uninitialized);
}

// ============================================================================
// Staleness
// ============================================================================

#[test]
fn test_deprecated_shape_is_recomputed() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    let a = object_with(runtime.realm(), &[("x", Value::Smi(1))]);
    let b = object_with(runtime.realm(), &[("x", Value::Smi(2))]);
    let old_shape = a.shape();
    load(&runtime, &vector, &a, "x");
    load(&runtime, &vector, &a, "x");
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);

    // Generalizing the field deprecates the shape `b` still uses.
    ops::set_property(
        runtime.realm(),
        &Value::object(a.clone()),
        &name("x"),
        Value::HeapNumber(0.5),
        LanguageMode::Strict,
    )
    .unwrap();
    assert!(old_shape.is_deprecated());

    assert_eq!(load(&runtime, &vector, &b, "x"), Value::Smi(2));
    assert!(!b.shape().is_deprecated());
    assert_eq!(load(&runtime, &vector, &b, "x"), Value::Smi(2));
    assert_eq!(load(&runtime, &vector, &a, "x"), Value::HeapNumber(0.5));

    assert_eq!(vector.state(SLOT), IcState::Monomorphic);
    let maps = vector.get(SLOT).target_maps();
    assert_eq!(maps.len(), 1);
    assert!(Arc::ptr_eq(&maps[0], &a.shape()));
}

#[test]
fn test_deleted_property_is_not_read_from_cache() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    let obj = object_with(runtime.realm(), &[("x", Value::Smi(1)), ("y", Value::Smi(2))]);
    load(&runtime, &vector, &obj, "x");
    load(&runtime, &vector, &obj, "x");

    assert!(ops::delete_property(&obj, &name("x")));
    assert_eq!(load(&runtime, &vector, &obj, "x"), Value::Undefined);
    assert_eq!(load(&runtime, &vector, &obj, "x"), Value::Undefined);
}

#[test]
fn test_prototype_change_invalidates_chain_handler() {
    let realm = Realm::new();
    let grand = realm.new_object();
    ops::set_property(&realm, &Value::object(grand.clone()), &name("v"), Value::Smi(1), LanguageMode::Strict)
        .unwrap();
    let parent = realm.new_object_with_prototype(Some(grand));
    let child = realm.new_object_with_prototype(Some(parent.clone()));

    let runtime = IcRuntime::new(realm);
    let vector = load_site();
    load(&runtime, &vector, &child, "v");
    assert_eq!(load(&runtime, &vector, &child, "v"), Value::Smi(1));
    assert!(matches!(
        vector.get(SLOT).find_handler(&child.shape()),
        Some(Handler::PrototypeChain(_))
    ));
    assert_eq!(load(&runtime, &vector, &child, "v"), Value::Smi(1));

    // Shadow the property one level closer to the receiver.
    ops::set_property(
        runtime.realm(),
        &Value::object(parent),
        &name("v"),
        Value::Smi(2),
        LanguageMode::Strict,
    )
    .unwrap();
    assert_eq!(load(&runtime, &vector, &child, "v"), Value::Smi(2));
    assert_eq!(load(&runtime, &vector, &child, "v"), Value::Smi(2));
}

#[test]
fn test_missing_property_appears_on_prototype() {
    let realm = Realm::new();
    let proto = realm.new_object();
    let obj = realm.new_object_with_prototype(Some(proto.clone()));
    let runtime = IcRuntime::new(realm);
    let vector = load_site();

    assert_eq!(load(&runtime, &vector, &obj, "late"), Value::Undefined);
    assert_eq!(load(&runtime, &vector, &obj, "late"), Value::Undefined);
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);
    assert_eq!(load(&runtime, &vector, &obj, "late"), Value::Undefined);

    ops::set_property(
        runtime.realm(),
        &Value::object(proto),
        &name("late"),
        Value::Smi(9),
        LanguageMode::Strict,
    )
    .unwrap();
    assert_eq!(load(&runtime, &vector, &obj, "late"), Value::Smi(9));
}

// ============================================================================
// Accessors and canned handlers
// ============================================================================

#[test]
fn test_getter_on_prototype() {
    let realm = Realm::new();
    let proto = realm.new_object();
    let getter = realm.new_function("get", |this, _| Ok(Value::number(if this.is_object() { 7.0 } else { 0.0 })));
    ops::define_accessor_property(
        &proto,
        &name("acc"),
        Value::object(getter),
        Value::Undefined,
        PropertyAttributes::data(),
    );
    let obj = realm.new_object_with_prototype(Some(proto));
    let runtime = IcRuntime::new(realm);
    let vector = load_site();

    for _ in 0..3 {
        assert_eq!(load(&runtime, &vector, &obj, "acc"), Value::Smi(7));
    }
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);
    assert_eq!(runtime.stats().snapshot().hits, 1);
}

#[test]
fn test_break_point_forces_slow_accessor() {
    let realm = Realm::new();
    let proto = realm.new_object();
    let getter = realm.new_function("get", |_, _| Ok(Value::Smi(3)));
    ops::define_accessor_property(
        &proto,
        &name("acc"),
        Value::object(getter),
        Value::Undefined,
        PropertyAttributes::data(),
    );
    let obj = realm.new_object_with_prototype(Some(proto));
    let runtime = IcRuntime::new(realm);
    let vector = load_site();
    vector.set_break_info(true);

    for _ in 0..3 {
        assert_eq!(load(&runtime, &vector, &obj, "acc"), Value::Smi(3));
    }
    assert_eq!(vector.get(SLOT).find_handler(&obj.shape()), Some(Handler::Slow));
    assert_eq!(runtime.stats().snapshot().hits, 0);
}

#[test]
fn test_string_length_handler() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    let s = Value::string("hello");
    for _ in 0..3 {
        assert_eq!(
            runtime.load_property(&vector, SLOT, &s, &name("length")).unwrap(),
            Value::Smi(5)
        );
    }
    let shape = runtime.realm().receiver_shape(&s);
    assert_eq!(vector.get(SLOT).find_handler(&shape), Some(Handler::StringLength));
}

#[test]
fn test_disabled_shortcut_compiles_handler() {
    let config = IcConfig::default().with_map_independent(MapIndependentHandlers::none());
    let runtime = IcRuntime::with_config(Realm::new(), config);
    let vector = load_site();
    let s = Value::string("abc");
    for _ in 0..3 {
        assert_eq!(
            runtime.load_property(&vector, SLOT, &s, &name("length")).unwrap(),
            Value::Smi(3)
        );
    }
    let shape = runtime.realm().receiver_shape(&s);
    assert!(matches!(vector.get(SLOT).find_handler(&shape), Some(Handler::Compiled(_))));
    assert!(!runtime.handler_cache().is_empty());
}

#[test]
fn test_null_receiver_throws() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    for _ in 0..2 {
        let err = runtime
            .load_property(&vector, SLOT, &Value::Null, &name("x"))
            .unwrap_err();
        assert!(err.is_type_error());
    }
    let shape = runtime.realm().receiver_shape(&Value::Null);
    assert_eq!(vector.get(SLOT).find_handler(&shape), Some(Handler::Slow));
}

#[test]
fn test_handler_stats() {
    let config = IcConfig::default().with_handler_stats(true);
    let runtime = IcRuntime::with_config(Realm::new(), config);
    let vector = load_site();
    let a = object_with(runtime.realm(), &[("x", Value::Smi(1))]);
    load(&runtime, &vector, &a, "x");
    load(&runtime, &vector, &a, "x");
    assert_eq!(runtime.stats().handler_count("Field"), 1);
}

#[test]
fn test_unknown_slot_takes_generic_path() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    let a = object_with(runtime.realm(), &[("x", Value::Smi(1))]);
    let receiver = Value::object(a);
    for _ in 0..3 {
        assert_eq!(
            runtime.load_property(&vector, FeedbackSlot(9), &receiver, &name("x")).unwrap(),
            Value::Smi(1)
        );
    }
    assert_eq!(vector.state(SLOT), IcState::Uninitialized);
    assert_eq!(runtime.stats().snapshot().misses, 0);
}

// ============================================================================
// Exotic receivers and holders
// ============================================================================

#[test]
fn test_module_export_reads_binding() {
    let runtime = IcRuntime::new(Realm::new());
    let namespace = runtime
        .realm()
        .new_module_namespace(&[("a", Some(Value::Smi(1))), ("b", None)]);
    let receiver = Value::object(namespace.clone());

    let vector = load_site();
    for _ in 0..2 {
        assert_eq!(load(&runtime, &vector, &namespace, "a"), Value::Smi(1));
    }
    assert_eq!(
        vector.get(SLOT).find_handler(&namespace.shape()),
        Some(Handler::ModuleExport(0))
    );
    let before = runtime.stats().snapshot();
    assert_eq!(load(&runtime, &vector, &namespace, "a"), Value::Smi(1));
    assert_eq!(runtime.stats().snapshot().hits, before.hits + 1);

    // A binding in its dead zone throws every time, cached or not.
    let tdz = load_site();
    for _ in 0..2 {
        let err = runtime.load_property(&tdz, SLOT, &receiver, &name("b")).unwrap_err();
        assert!(err.is_reference_error());
    }
    assert_eq!(tdz.get(SLOT).find_handler(&namespace.shape()), Some(Handler::ModuleExport(1)));
    let before = runtime.stats().snapshot();
    let err = runtime.load_property(&tdz, SLOT, &receiver, &name("b")).unwrap_err();
    assert!(err.is_reference_error());
    assert_eq!(runtime.stats().snapshot().slow, before.slow + 1);

    namespace.module_exports().unwrap().set(1, Value::Smi(2));
    let before = runtime.stats().snapshot();
    assert_eq!(load(&runtime, &tdz, &namespace, "b"), Value::Smi(2));
    assert_eq!(runtime.stats().snapshot().hits, before.hits + 1);
    assert_eq!(tdz.state(SLOT), IcState::Monomorphic);
}

#[test]
fn test_primitive_receiver_checks_realm() {
    let runtime = IcRuntime::new(Realm::new());
    let vector = load_site();
    let receiver = Value::Smi(5);
    let answer = name("answer");

    for _ in 0..3 {
        assert_eq!(
            runtime.load_property(&vector, SLOT, &receiver, &answer).unwrap(),
            Value::Undefined
        );
    }
    let shape = runtime.realm().receiver_shape(&receiver);
    let handler = vector.get(SLOT).find_handler(&shape).unwrap();
    assert_eq!(handler.kind_name(), "FullChain");
    let Handler::PrototypeChain(chain) = handler else {
        panic!("expected a prototype chain handler");
    };
    let realm_id = runtime.realm().id();
    assert!(
        chain
            .checks
            .iter()
            .any(|check| matches!(check, PrototypeCheck::NativeContext(id) if *id == realm_id))
    );

    ops::set_property(
        runtime.realm(),
        &Value::object(runtime.realm().number_prototype().clone()),
        &answer,
        Value::Smi(42),
        LanguageMode::Strict,
    )
    .unwrap();
    assert_eq!(
        runtime.load_property(&vector, SLOT, &receiver, &answer).unwrap(),
        Value::Smi(42)
    );
}

#[test]
fn test_dictionary_prototype_negative_lookup() {
    let realm = Realm::new();
    let proto = realm.new_object();
    proto.normalize_properties();
    let obj = realm.new_object_with_prototype(Some(proto.clone()));
    let runtime = IcRuntime::new(realm);
    let vector = load_site();

    for _ in 0..3 {
        assert_eq!(load(&runtime, &vector, &obj, "missing"), Value::Undefined);
    }
    let Some(Handler::PrototypeChain(chain)) = vector.get(SLOT).find_handler(&obj.shape()) else {
        panic!("expected a prototype chain handler");
    };
    assert!(chain.full_chain);
    assert!(
        chain
            .checks
            .iter()
            .any(|check| matches!(check, PrototypeCheck::DictionaryNegativeLookup(_)))
    );

    ops::set_property(
        runtime.realm(),
        &Value::object(proto),
        &name("missing"),
        Value::Smi(7),
        LanguageMode::Strict,
    )
    .unwrap();
    assert_eq!(load(&runtime, &vector, &obj, "missing"), Value::Smi(7));
}

#[test]
fn test_proxy_get_trap_runs_on_every_load() {
    let realm = Realm::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let trap: ProxyGetTrap = Arc::new(move |_target: &JsObject, key: &PropertyKey, _receiver: &Value| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(match key {
            PropertyKey::Name(n) if n.as_str() == Some("x") => Value::Smi(11),
            _ => Value::Undefined,
        })
    });
    let proxy = realm.new_proxy(realm.new_object(), Some(trap), None);
    let runtime = IcRuntime::new(realm);
    let vector = load_site();

    for _ in 0..3 {
        assert_eq!(load(&runtime, &vector, &proxy, "x"), Value::Smi(11));
    }
    assert_eq!(calls.load(Ordering::Relaxed), 3);
    assert_eq!(vector.get(SLOT).find_handler(&proxy.shape()), Some(Handler::Proxy));
    assert_eq!(vector.state(SLOT), IcState::Monomorphic);
}

#[test]
fn test_masking_interceptor_answers_first() {
    let realm = Realm::new();
    let obj = realm.new_object_with_interceptor(InterceptorInfo::new().with_getter(|_, _| Ok(Some(Value::Smi(7)))));
    let runtime = IcRuntime::new(realm);
    let vector = load_site();

    for _ in 0..3 {
        assert_eq!(load(&runtime, &vector, &obj, "anything"), Value::Smi(7));
    }
    assert_eq!(vector.get(SLOT).find_handler(&obj.shape()), Some(Handler::Interceptor));
}

#[test]
fn test_non_masking_interceptor_behind_chain_checks() {
    let realm = Realm::new();
    let obj = realm.new_object_with_interceptor(
        InterceptorInfo::new()
            .with_getter(|_, key| {
                Ok(match key {
                    PropertyKey::Name(n) if n.as_str() == Some("virtual") => Some(Value::Smi(7)),
                    _ => None,
                })
            })
            .non_masking(),
    );
    let runtime = IcRuntime::new(realm);

    let vector = load_site();
    for _ in 0..3 {
        assert_eq!(load(&runtime, &vector, &obj, "virtual"), Value::Smi(7));
    }
    let handler = vector.get(SLOT).find_handler(&obj.shape()).unwrap();
    assert_eq!(handler.kind_name(), "FullChain");

    // Properties on the chain win over a non-masking interceptor.
    ops::set_property(
        runtime.realm(),
        &Value::object(runtime.realm().object_prototype().clone()),
        &name("virtual"),
        Value::Smi(1),
        LanguageMode::Strict,
    )
    .unwrap();
    assert_eq!(load(&runtime, &vector, &obj, "virtual"), Value::Smi(1));

    let absent = load_site();
    for _ in 0..3 {
        assert_eq!(load(&runtime, &absent, &obj, "absent"), Value::Undefined);
    }
}
