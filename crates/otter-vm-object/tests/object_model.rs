//! Object model integration tests
//!
//! Shapes, prototype validity, elements and the generic property paths.

use otter_vm_object::ops;
use otter_vm_object::{
    ElementsKind, InterceptorInfo, JsObject, LanguageMode, Name, PropertyAttributes, PropertyKey, Realm, Value,
    VariableMode,
};
use std::sync::Arc;

fn name(s: &str) -> Name {
    Name::string(s)
}

fn set(realm: &Realm, obj: &JsObject, key: &str, value: Value) {
    ops::set_property(realm, &Value::object(obj.clone()), &name(key), value, LanguageMode::Strict).unwrap();
}

fn get(realm: &Realm, obj: &JsObject, key: &str) -> Value {
    ops::get_property(realm, &Value::object(obj.clone()), &name(key)).unwrap()
}

// ============================================================================
// Shapes
// ============================================================================

#[test]
fn test_same_construction_same_shape() {
    let realm = Realm::new();
    let a = realm.new_object();
    let b = realm.new_object();
    for obj in [&a, &b] {
        set(&realm, obj, "x", Value::Smi(1));
        set(&realm, obj, "y", Value::Smi(2));
    }
    assert!(Arc::ptr_eq(&a.shape(), &b.shape()));

    let c = realm.new_object();
    set(&realm, &c, "y", Value::Smi(2));
    set(&realm, &c, "x", Value::Smi(1));
    assert!(!Arc::ptr_eq(&a.shape(), &c.shape()));
}

#[test]
fn test_deprecated_shape_migrates() {
    let realm = Realm::new();
    let a = realm.new_object();
    let b = realm.new_object();
    set(&realm, &a, "v", Value::Smi(1));
    set(&realm, &b, "v", Value::Smi(2));
    let old = b.shape();

    set(&realm, &a, "v", Value::HeapNumber(0.5));
    assert!(old.is_deprecated());
    assert!(b.migrate_instance());
    assert!(Arc::ptr_eq(&a.shape(), &b.shape()));
    assert_eq!(get(&realm, &b, "v"), Value::Smi(2));
}

#[test]
fn test_many_properties_go_dictionary() {
    let realm = Realm::new();
    let obj = realm.new_object();
    for i in 0..200 {
        set(&realm, &obj, &format!("p{i}"), Value::Smi(i));
    }
    assert!(obj.shape().is_dictionary_map());
    assert_eq!(get(&realm, &obj, "p0"), Value::Smi(0));
    assert_eq!(get(&realm, &obj, "p199"), Value::Smi(199));
}

// ============================================================================
// Prototypes
// ============================================================================

#[test]
fn test_prototype_change_invalidates_cell() {
    let realm = Realm::new();
    let proto = realm.new_object();
    let obj = realm.new_object_with_prototype(Some(proto.clone()));
    let cell = JsObject::prototype_chain_validity_cell(&obj.shape()).unwrap();
    assert!(cell.is_valid());

    set(&realm, realm.object_prototype(), "added_to_root", Value::Smi(1));
    assert!(!cell.is_valid());
    assert_eq!(get(&realm, &obj, "added_to_root"), Value::Smi(1));
}

#[test]
fn test_accessor_on_prototype() {
    let realm = Realm::new();
    let proto = realm.new_object();
    let getter = realm.new_function("get", |this, _| {
        Ok(Value::number(if this.is_object() { 7.0 } else { 0.0 }))
    });
    ops::define_accessor_property(
        &proto,
        &name("acc"),
        Value::object(getter),
        Value::Undefined,
        PropertyAttributes::data(),
    );
    let obj = realm.new_object_with_prototype(Some(proto));
    assert_eq!(get(&realm, &obj, "acc"), Value::Smi(7));
    let err = ops::set_property(&realm, &Value::object(obj), &name("acc"), Value::Smi(1), LanguageMode::Strict);
    assert!(err.is_err());
}

#[test]
fn test_interceptor_supplies_values() {
    let realm = Realm::new();
    let obj = realm.new_object_with_interceptor(InterceptorInfo::new().with_getter(|_, key| {
        Ok(match key {
            PropertyKey::Name(n) if n.as_str() == Some("magic") => Some(Value::Smi(42)),
            _ => None,
        })
    }));
    assert_eq!(get(&realm, &obj, "magic"), Value::Smi(42));
    assert_eq!(get(&realm, &obj, "other"), Value::Undefined);
}

// ============================================================================
// Globals and script contexts
// ============================================================================

#[test]
fn test_global_property_cells() {
    let realm = Realm::new();
    let global = realm.global().clone();
    set(&realm, &global, "g", Value::Smi(1));
    let cell = global.property_cell(&name("g")).unwrap();
    assert_eq!(cell.value(), Some(Value::Smi(1)));
    set(&realm, &global, "g", Value::Smi(2));
    assert_eq!(cell.value(), Some(Value::Smi(2)));
    assert!(ops::delete_property(&global, &name("g")));
    assert!(cell.is_hole());
}

#[test]
fn test_script_context_bindings() {
    let realm = Realm::new();
    realm.script_contexts().declare(&[("answer", VariableMode::Let)]);
    let found = realm.script_contexts().lookup(&name("answer")).unwrap();
    assert!(found.context.get(found.slot_index).is_none());
    realm.script_contexts().initialize("answer", Value::Smi(42));
    assert_eq!(found.context.get(found.slot_index), Some(Value::Smi(42)));
}

// ============================================================================
// Elements
// ============================================================================

#[test]
fn test_elements_kind_lattice() {
    let realm = Realm::new();
    let array = realm.new_array(vec![Value::Smi(1)]);
    let av = Value::object(array.clone());
    ops::set_element(&realm, &av, 1, Value::HeapNumber(2.5), LanguageMode::Strict).unwrap();
    assert_eq!(array.elements_kind(), ElementsKind::PackedDouble);
    ops::set_element(&realm, &av, 2, Value::string("s"), LanguageMode::Strict).unwrap();
    assert_eq!(array.elements_kind(), ElementsKind::Packed);
    assert!(realm.is_initial_array_shape(&array.shape()));
    assert_eq!(array.length(), 3);
}

#[test]
fn test_array_length_truncation() {
    let realm = Realm::new();
    let array = realm.new_array(vec![Value::Smi(1), Value::Smi(2), Value::Smi(3)]);
    set(&realm, &array, "length", Value::Smi(1));
    assert_eq!(array.length(), 1);
    assert_eq!(ops::get_element(&realm, &Value::object(array.clone()), 2).unwrap(), Value::Undefined);
    assert_eq!(get(&realm, &array, "length"), Value::Smi(1));
}

#[test]
fn test_elements_on_prototype_break_protector() {
    let realm = Realm::new();
    assert!(realm.no_elements_protector_intact());
    ops::set_element(
        &realm,
        &Value::object(realm.array_prototype().clone()),
        0,
        Value::Smi(1),
        LanguageMode::Strict,
    )
    .unwrap();
    assert!(!realm.no_elements_protector_intact());
    let holey = realm.new_holey_array(2);
    assert_eq!(ops::get_element(&realm, &Value::object(holey), 0).unwrap(), Value::Smi(1));
}
