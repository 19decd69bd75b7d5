//! Realm: intrinsics, root shapes and the script context table

use crate::accessors::{FunctionData, FunctionKind, InterceptorInfo, NativeAccessor, NativeFn, TemplateId};
use crate::elements::{ElementsKind, ElementsStore, TypedArrayKind};
use crate::error::VmResult;
use crate::object::{ArgumentsData, JsObject, ModuleExports, ObjectKind, ProxyData, ProxyGetTrap, ProxySetTrap};
use crate::property::{BuiltinField, Name, PropertyAttributes};
use crate::shape::{DescriptorValue, InstanceType, Shape, ShapeRef};
use crate::string::JsString;
use crate::validity::ValidityCell;
use crate::value::Value;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REALM_ID: AtomicU64 = AtomicU64::new(1);

/// Lexical binding kind of a script-scope variable
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableMode {
    /// `let`
    Let,
    /// `const`
    Const,
}

/// One top-level lexical binding
pub struct ScriptSlot {
    /// Binding name
    pub name: Name,
    /// `let` or `const`
    pub mode: VariableMode,
    value: RwLock<Option<Value>>,
}

/// Lexical bindings declared by one script
pub struct ScriptContext {
    slots: Vec<ScriptSlot>,
}

impl ScriptContext {
    /// Slot metadata
    pub fn slot(&self, index: usize) -> Option<&ScriptSlot> {
        self.slots.get(index)
    }

    /// Current value; `None` while the binding is in its dead zone
    pub fn get(&self, index: usize) -> Option<Value> {
        self.slots.get(index).and_then(|s| s.value.read().clone())
    }

    /// Write a slot
    pub fn set(&self, index: usize, value: Value) {
        if let Some(slot) = self.slots.get(index) {
            *slot.value.write() = Some(value);
        }
    }
}

/// Location of a script-scope binding
#[derive(Clone, Debug)]
pub struct ScriptContextLookup {
    /// Context holding the binding
    pub context: Arc<ScriptContext>,
    /// Index of the context in the table
    pub context_index: usize,
    /// Slot within the context
    pub slot_index: usize,
    /// `let` or `const`
    pub mode: VariableMode,
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.slots.iter().map(|s| s.name.to_string())).finish()
    }
}

/// All script contexts of a realm
#[derive(Default)]
pub struct ScriptContextTable {
    contexts: RwLock<Vec<Arc<ScriptContext>>>,
}

impl ScriptContextTable {
    /// Declare the lexical bindings of a new script. Bindings start
    /// uninitialized.
    pub fn declare(&self, bindings: &[(&str, VariableMode)]) -> usize {
        let context = ScriptContext {
            slots: bindings
                .iter()
                .map(|(name, mode)| ScriptSlot {
                    name: Name::string(name),
                    mode: *mode,
                    value: RwLock::new(None),
                })
                .collect(),
        };
        let mut contexts = self.contexts.write();
        contexts.push(Arc::new(context));
        contexts.len() - 1
    }

    /// Find a binding by name
    pub fn lookup(&self, name: &Name) -> Option<ScriptContextLookup> {
        let contexts = self.contexts.read();
        for (context_index, context) in contexts.iter().enumerate() {
            if let Some(slot_index) = context.slots.iter().position(|s| &s.name == name) {
                return Some(ScriptContextLookup {
                    context: context.clone(),
                    context_index,
                    slot_index,
                    mode: context.slots[slot_index].mode,
                });
            }
        }
        None
    }

    /// Initialize a binding, ending its dead zone
    pub fn initialize(&self, name: &str, value: Value) -> bool {
        match self.lookup(&Name::string(name)) {
            Some(found) => {
                found.context.set(found.slot_index, value);
                true
            }
            None => false,
        }
    }
}

/// Intrinsics and root shapes of one JS realm
pub struct Realm {
    id: u64,
    object_prototype: JsObject,
    function_prototype: JsObject,
    array_prototype: JsObject,
    string_prototype: JsObject,
    number_prototype: JsObject,
    boolean_prototype: JsObject,
    symbol_prototype: JsObject,
    global: JsObject,
    script_contexts: ScriptContextTable,
    object_shape: ShapeRef,
    function_shape: ShapeRef,
    constructor_shape: ShapeRef,
    array_shapes: Vec<ShapeRef>,
    string_wrapper_shape: ShapeRef,
    arguments_shape: ShapeRef,
    typed_array_shapes: Vec<(TypedArrayKind, ShapeRef)>,
    string_map: ShapeRef,
    heap_number_map: ShapeRef,
    boolean_map: ShapeRef,
    symbol_map: ShapeRef,
    oddball_map: ShapeRef,
    no_elements_protector: Arc<ValidityCell>,
    /// Roots of custom shapes handed to `new_object_with_shape`
    custom_roots: RwLock<Vec<ShapeRef>>,
}

const FAST_KINDS: [ElementsKind; 6] = [
    ElementsKind::PackedSmi,
    ElementsKind::HoleySmi,
    ElementsKind::PackedDouble,
    ElementsKind::HoleyDouble,
    ElementsKind::Packed,
    ElementsKind::Holey,
];

fn string_length_accessor() -> Arc<NativeAccessor> {
    Arc::new(
        NativeAccessor::new(Name::string("length"))
            .with_builtin_field(BuiltinField::StringLength)
            .with_getter(|receiver, _holder| {
                let len = match receiver {
                    Value::String(s) => s.len(),
                    Value::Object(obj) => obj.wrapped_string().map_or(0, |s| s.len()),
                    _ => 0,
                };
                Ok(Value::number(len as f64))
            }),
    )
}

fn array_length_accessor() -> Arc<NativeAccessor> {
    Arc::new(
        NativeAccessor::new(Name::string("length"))
            .with_builtin_field(BuiltinField::ArrayLength)
            .with_expected_receiver(InstanceType::Array)
            .special_data_property()
            .with_getter(|receiver, _holder| {
                Ok(receiver
                    .as_object()
                    .map_or(Value::Smi(0), |obj| Value::number(obj.length() as f64)))
            })
            .with_setter(|receiver, _holder, value| {
                if let Some(obj) = receiver.as_object() {
                    crate::ops::set_array_length(obj, &value)?;
                }
                Ok(())
            }),
    )
}

fn function_prototype_accessor() -> Arc<NativeAccessor> {
    Arc::new(
        NativeAccessor::new(Name::string("prototype"))
            .with_expected_receiver(InstanceType::Function)
            .special_data_property()
            .with_getter(|receiver, _holder| {
                Ok(receiver
                    .as_object()
                    .and_then(|f| f.function_data().map(|d| d.prototype.read().clone()))
                    .unwrap_or_default())
            })
            .with_setter(|receiver, _holder, value| {
                if let Some(data) = receiver.as_object().and_then(|f| f.function_data()) {
                    *data.prototype.write() = value;
                }
                Ok(())
            }),
    )
}

impl Realm {
    /// Create a realm with fresh intrinsics
    pub fn new() -> Self {
        let object_prototype = JsObject::new(
            Shape::builder(InstanceType::Object).elements_kind(ElementsKind::HoleySmi).build(),
            ObjectKind::Ordinary,
        );
        object_prototype.make_prototype();
        let proto = |instance_type: InstanceType| {
            let obj = JsObject::new(
                Shape::builder(instance_type)
                    .prototype(Some(object_prototype.clone()))
                    .elements_kind(ElementsKind::HoleySmi)
                    .build(),
                ObjectKind::Ordinary,
            );
            obj.make_prototype();
            obj
        };
        let function_prototype = proto(InstanceType::Object);
        let array_prototype = proto(InstanceType::Object);
        let number_prototype = proto(InstanceType::Object);
        let boolean_prototype = proto(InstanceType::Object);
        let symbol_prototype = proto(InstanceType::Object);

        let string_wrapper_root = Shape::builder(InstanceType::StringWrapper)
            .prototype(Some(object_prototype.clone()))
            .elements_kind(ElementsKind::StringWrapper)
            .inobject_properties(0)
            .build();
        let string_prototype = JsObject::new(string_wrapper_root, ObjectKind::StringWrapper(JsString::intern("")));
        string_prototype.make_prototype();

        let no_elements_protector = ValidityCell::new();
        object_prototype.set_elements_protector(no_elements_protector.clone());
        array_prototype.set_elements_protector(no_elements_protector.clone());

        let object_shape = Shape::builder(InstanceType::Object)
            .prototype(Some(object_prototype.clone()))
            .elements_kind(ElementsKind::HoleySmi)
            .build();
        let function_shape = Shape::builder(InstanceType::Function)
            .prototype(Some(function_prototype.clone()))
            .inobject_properties(0)
            .build();
        let constructor_shape = function_shape.copy_with_accessor(
            &Name::string("prototype"),
            DescriptorValue::Native(function_prototype_accessor()),
            PropertyAttributes {
                writable: true,
                enumerable: false,
                configurable: false,
            },
        );

        let array_root = Shape::builder(InstanceType::Array)
            .prototype(Some(array_prototype.clone()))
            .inobject_properties(0)
            .build()
            .copy_with_accessor(
                &Name::string("length"),
                DescriptorValue::Native(array_length_accessor()),
                PropertyAttributes {
                    writable: true,
                    enumerable: false,
                    configurable: false,
                },
            );
        let array_shapes: Vec<ShapeRef> = FAST_KINDS.iter().map(|kind| array_root.transition_elements_to(*kind)).collect();
        // Elements kind transitions between initial array shapes stay
        // within the set.
        for from in &array_shapes {
            for to in &array_shapes {
                if from.elements_kind().is_more_general_transition(to.elements_kind()) {
                    from.link_elements_transition(to);
                }
            }
        }

        let string_wrapper_shape = Shape::builder(InstanceType::StringWrapper)
            .prototype(Some(string_prototype.clone()))
            .elements_kind(ElementsKind::StringWrapper)
            .build()
            .copy_with_accessor(
                &Name::string("length"),
                DescriptorValue::Native(string_length_accessor()),
                PropertyAttributes {
                    writable: false,
                    enumerable: false,
                    configurable: false,
                },
            );
        let arguments_shape = Shape::builder(InstanceType::Arguments)
            .prototype(Some(object_prototype.clone()))
            .elements_kind(ElementsKind::SloppyArguments)
            .build();
        let typed_array_shapes = TypedArrayKind::ALL
            .iter()
            .map(|kind| {
                let shape = Shape::builder(InstanceType::TypedArray)
                    .prototype(Some(object_prototype.clone()))
                    .elements_kind(ElementsKind::Typed(*kind))
                    .inobject_properties(0)
                    .build();
                (*kind, shape)
            })
            .collect();

        let primitive = |instance_type: InstanceType, prototype: Option<&JsObject>| {
            Shape::builder(instance_type).prototype(prototype.cloned()).build()
        };
        let string_map = primitive(InstanceType::String, Some(&string_prototype));
        let heap_number_map = primitive(InstanceType::HeapNumber, Some(&number_prototype));
        let boolean_map = primitive(InstanceType::Boolean, Some(&boolean_prototype));
        let symbol_map = primitive(InstanceType::Symbol, Some(&symbol_prototype));
        let oddball_map = primitive(InstanceType::Oddball, None);

        let global = JsObject::new(
            Shape::builder(InstanceType::GlobalObject)
                .prototype(Some(object_prototype.clone()))
                .elements_kind(ElementsKind::HoleySmi)
                .inobject_properties(0)
                .dictionary()
                .build(),
            ObjectKind::Global,
        );

        Self {
            id: NEXT_REALM_ID.fetch_add(1, Ordering::Relaxed),
            object_prototype,
            function_prototype,
            array_prototype,
            string_prototype,
            number_prototype,
            boolean_prototype,
            symbol_prototype,
            global,
            script_contexts: ScriptContextTable::default(),
            object_shape,
            function_shape,
            constructor_shape,
            array_shapes,
            string_wrapper_shape,
            arguments_shape,
            typed_array_shapes,
            string_map,
            heap_number_map,
            boolean_map,
            symbol_map,
            oddball_map,
            no_elements_protector,
            custom_roots: RwLock::new(Vec::new()),
        }
    }

    /// Realm identity
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `Object.prototype`
    pub fn object_prototype(&self) -> &JsObject {
        &self.object_prototype
    }

    /// `Function.prototype`
    pub fn function_prototype(&self) -> &JsObject {
        &self.function_prototype
    }

    /// `Array.prototype`
    pub fn array_prototype(&self) -> &JsObject {
        &self.array_prototype
    }

    /// `String.prototype`
    pub fn string_prototype(&self) -> &JsObject {
        &self.string_prototype
    }

    /// `Number.prototype`
    pub fn number_prototype(&self) -> &JsObject {
        &self.number_prototype
    }

    /// The global object
    pub fn global(&self) -> &JsObject {
        &self.global
    }

    /// Script-scope lexical bindings
    pub fn script_contexts(&self) -> &ScriptContextTable {
        &self.script_contexts
    }

    /// Root shape of plain objects
    pub fn object_shape(&self) -> &ShapeRef {
        &self.object_shape
    }

    /// Builder for custom object shapes inheriting from `Object.prototype`
    pub fn object_shape_builder(&self) -> crate::shape::ShapeBuilder {
        Shape::builder(InstanceType::Object)
            .prototype(Some(self.object_prototype.clone()))
            .elements_kind(ElementsKind::HoleySmi)
    }

    /// Initial array shape for a fast elements kind
    pub fn initial_array_shape(&self, kind: ElementsKind) -> Option<&ShapeRef> {
        FAST_KINDS.iter().position(|k| *k == kind).map(|i| &self.array_shapes[i])
    }

    /// One of the realm's initial array shapes
    pub fn is_initial_array_shape(&self, shape: &ShapeRef) -> bool {
        self.array_shapes.iter().any(|s| Arc::ptr_eq(s, shape))
    }

    /// Whether `shape` belongs to `Array.prototype` or `Object.prototype`
    pub fn is_in_array_prototype_chain(&self, shape: &ShapeRef) -> bool {
        Arc::ptr_eq(shape, &self.array_prototype.shape()) || Arc::ptr_eq(shape, &self.object_prototype.shape())
    }

    fn transition_roots(&self) -> Vec<ShapeRef> {
        let mut shapes = vec![
            self.object_shape.clone(),
            self.function_shape.clone(),
            self.constructor_shape.clone(),
            self.string_wrapper_shape.clone(),
            self.arguments_shape.clone(),
        ];
        shapes.extend(self.array_shapes.iter().cloned());
        shapes.extend(self.typed_array_shapes.iter().map(|(_, shape)| shape.clone()));
        shapes.extend(self.custom_roots.read().iter().cloned());

        let mut roots: Vec<ShapeRef> = Vec::new();
        for shape in shapes {
            let root = shape.transition_root();
            if !roots.iter().any(|r| Arc::ptr_eq(r, &root)) {
                roots.push(root);
            }
        }
        roots
    }

    /// Release transition targets that no object and no other shape
    /// refers to. Returns how many transitions were removed.
    pub fn purge_transitions(&self) -> usize {
        let removed: usize = self.transition_roots().iter().map(|root| root.prune_transitions()).sum();
        if removed > 0 {
            tracing::debug!(target: "otter::shape", realm = self.id, removed, "pruned transitions");
        }
        removed
    }

    /// Array and object prototypes still have no elements
    pub fn no_elements_protector_intact(&self) -> bool {
        self.no_elements_protector.is_valid()
    }

    /// Cell invalidated when an element is added to an initial prototype
    pub fn no_elements_protector(&self) -> &Arc<ValidityCell> {
        &self.no_elements_protector
    }

    /// Prototype used for property lookups on a primitive
    pub fn prototype_for_primitive(&self, value: &Value) -> Option<JsObject> {
        match value {
            Value::String(_) => Some(self.string_prototype.clone()),
            Value::Smi(_) | Value::HeapNumber(_) => Some(self.number_prototype.clone()),
            Value::Boolean(_) => Some(self.boolean_prototype.clone()),
            Value::Symbol(_) => Some(self.symbol_prototype.clone()),
            Value::Object(obj) => Some(obj.clone()),
            Value::Undefined | Value::Null => None,
        }
    }

    /// Shape an inline cache keys on for `value`
    pub fn receiver_shape(&self, value: &Value) -> ShapeRef {
        match value {
            Value::Object(obj) => obj.shape(),
            Value::String(_) => self.string_map.clone(),
            Value::Smi(_) | Value::HeapNumber(_) => self.heap_number_map.clone(),
            Value::Boolean(_) => self.boolean_map.clone(),
            Value::Symbol(_) => self.symbol_map.clone(),
            Value::Undefined | Value::Null => self.oddball_map.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // Factories
    // ---------------------------------------------------------------------

    /// `{}`
    pub fn new_object(&self) -> JsObject {
        JsObject::new(self.object_shape.clone(), ObjectKind::Ordinary)
    }

    /// `Object.create(prototype)`
    pub fn new_object_with_prototype(&self, prototype: Option<JsObject>) -> JsObject {
        if let Some(proto) = &prototype {
            proto.make_prototype();
        }
        JsObject::new(self.object_shape.transition_to_prototype(prototype), ObjectKind::Ordinary)
    }

    /// Object with a custom root shape
    pub fn new_object_with_shape(&self, shape: ShapeRef) -> JsObject {
        let root = shape.transition_root();
        let known = self.custom_roots.read().iter().any(|r| Arc::ptr_eq(r, &root));
        if !known {
            self.custom_roots.write().push(root);
        }
        JsObject::new(shape, ObjectKind::Ordinary)
    }

    /// Object whose named properties go through `interceptor`
    pub fn new_object_with_interceptor(&self, interceptor: InterceptorInfo) -> JsObject {
        self.new_object_with_shape(self.object_shape_builder().named_interceptor(interceptor).build())
    }

    /// Object requiring access checks
    pub fn new_access_checked_object(&self) -> JsObject {
        self.new_object_with_shape(self.object_shape_builder().access_check_needed().build())
    }

    /// Instance of an API template
    pub fn new_template_instance(&self, template: TemplateId) -> JsObject {
        self.new_object_with_shape(self.object_shape_builder().template(template).build())
    }

    /// Array literal with the least general fast kind for `values`
    pub fn new_array(&self, values: Vec<Value>) -> JsObject {
        let kind = values.iter().fold(ElementsKind::PackedSmi, |k, v| k.for_value(v));
        self.new_array_with_kind(values, kind)
    }

    /// Array with an explicit fast elements kind
    pub fn new_array_with_kind(&self, values: Vec<Value>, kind: ElementsKind) -> JsObject {
        let shape = self
            .initial_array_shape(kind)
            .cloned()
            .unwrap_or_else(|| self.array_shapes[0].transition_elements_to(kind));
        let len = values.len() as u32;
        let array = JsObject::new(shape, ObjectKind::Ordinary);
        array.set_elements(ElementsStore::from_values(values), len);
        array
    }

    /// `new Array(len)`: holey, all slots empty
    pub fn new_holey_array(&self, len: u32) -> JsObject {
        let array = JsObject::new(self.array_shapes[1].clone(), ObjectKind::Ordinary);
        array.set_elements(
            ElementsStore::Fast {
                slots: Arc::new(vec![crate::elements::Element::Hole; len as usize]),
                copy_on_write: false,
            },
            len,
        );
        array
    }

    /// Typed array of `len` zeroes
    pub fn new_typed_array(&self, kind: TypedArrayKind, len: u32) -> JsObject {
        let shape = self
            .typed_array_shapes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| {
                Shape::builder(InstanceType::TypedArray)
                    .prototype(Some(self.object_prototype.clone()))
                    .elements_kind(ElementsKind::Typed(kind))
                    .build()
            });
        let array = JsObject::new(shape, ObjectKind::Ordinary);
        array.set_elements(ElementsStore::Typed(vec![0.0; len as usize]), len);
        array
    }

    fn make_function(&self, shape: ShapeRef, name: &str, kind: FunctionKind, is_constructor: bool, call: NativeFn) -> JsObject {
        JsObject::new(
            shape,
            ObjectKind::Function(FunctionData {
                name: name.to_string(),
                kind,
                call,
                is_constructor,
                prototype: RwLock::new(Value::Undefined),
            }),
        )
    }

    /// Native closure
    pub fn new_function(
        &self,
        name: &str,
        f: impl Fn(&Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    ) -> JsObject {
        self.make_function(self.function_shape.clone(), name, FunctionKind::Closure, false, Arc::new(f))
    }

    /// Constructor with its own `prototype` object
    pub fn new_constructor(
        &self,
        name: &str,
        f: impl Fn(&Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    ) -> JsObject {
        let ctor = self.make_function(self.constructor_shape.clone(), name, FunctionKind::Closure, true, Arc::new(f));
        if let Some(data) = ctor.function_data() {
            *data.prototype.write() = Value::Object(self.new_object());
        }
        ctor
    }

    /// API function with an optional receiver signature
    pub fn new_api_function(
        &self,
        name: &str,
        signature: Option<TemplateId>,
        f: impl Fn(&Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    ) -> JsObject {
        self.make_function(self.function_shape.clone(), name, FunctionKind::Api { signature }, false, Arc::new(f))
    }

    /// `new String(s)`
    pub fn new_string_wrapper(&self, s: &str) -> JsObject {
        JsObject::new(self.string_wrapper_shape.clone(), ObjectKind::StringWrapper(JsString::intern(s)))
    }

    /// `new Proxy(target, handler)` with optional native traps
    pub fn new_proxy(&self, target: JsObject, get: Option<ProxyGetTrap>, set: Option<ProxySetTrap>) -> JsObject {
        let shape = Shape::builder(InstanceType::Proxy).inobject_properties(0).build();
        JsObject::new(shape, ObjectKind::Proxy(ProxyData { target, get, set }))
    }

    /// Module namespace with the given exports; `None` values are in their
    /// dead zone
    pub fn new_module_namespace(&self, exports: &[(&str, Option<Value>)]) -> JsObject {
        let mut shape = Shape::builder(InstanceType::ModuleNamespace).inobject_properties(0).build();
        let mut names = Vec::with_capacity(exports.len());
        for (index, (name, _)) in exports.iter().enumerate() {
            let name = Name::string(name);
            let export_name = name.to_string();
            let accessor = NativeAccessor::new(name.clone())
                .with_module_export(index)
                .with_getter(move |_receiver, holder| {
                    holder.module_exports().and_then(|e| e.get(index)).ok_or_else(|| {
                        crate::error::VmError::new_reference_error(
                            crate::error::MessageTemplate::NotDefined,
                            &[&export_name],
                        )
                    })
                });
            shape = shape.copy_with_accessor(
                &name,
                DescriptorValue::Native(Arc::new(accessor)),
                PropertyAttributes {
                    writable: true,
                    enumerable: true,
                    configurable: false,
                },
            );
            names.push(name);
        }
        let shape = shape.copy_for_prevent_extensions();
        let cells = exports.iter().map(|(_, v)| RwLock::new(v.clone())).collect();
        JsObject::new(shape, ObjectKind::ModuleNamespace(ModuleExports::new(names, cells)))
    }

    /// Sloppy-mode arguments object aliasing `context` for the first
    /// `mapped_count` indices
    pub fn new_sloppy_arguments(&self, context: Arc<RwLock<Vec<Value>>>, mapped_count: u32, unmapped: Vec<Value>) -> JsObject {
        let mut backing: Vec<Value> = vec![Value::Undefined; mapped_count as usize];
        backing.extend(unmapped);
        let len = backing.len() as u32;
        let args = JsObject::new(
            self.arguments_shape.clone(),
            ObjectKind::Arguments(ArgumentsData { context, mapped_count }),
        );
        args.set_elements(ElementsStore::from_values(backing), len);
        args
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Realm {
    fn drop(&mut self) {
        // Parents and children refer to each other.
        for root in self.transition_roots() {
            root.clear_transitions();
        }
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_array_shapes() {
        let realm = Realm::new();
        let smis = realm.new_array(vec![Value::Smi(1), Value::Smi(2)]);
        let doubles = realm.new_array(vec![Value::Smi(1), Value::HeapNumber(1.5)]);
        assert_eq!(smis.elements_kind(), ElementsKind::PackedSmi);
        assert_eq!(doubles.elements_kind(), ElementsKind::PackedDouble);
        assert!(realm.is_initial_array_shape(&smis.shape()));
        let holey = realm.initial_array_shape(ElementsKind::Holey).unwrap();
        assert!(Arc::ptr_eq(&smis.shape().transition_elements_to(ElementsKind::Holey), holey));
    }

    #[test]
    fn test_purge_transitions_keeps_live_shapes() {
        let realm = Realm::new();
        let add = |obj: &JsObject, key: &str| {
            crate::ops::set_property(
                &realm,
                &Value::object(obj.clone()),
                &Name::string(key),
                Value::Smi(1),
                crate::property::LanguageMode::Strict,
            )
            .unwrap();
        };
        let kept = realm.new_object();
        add(&kept, "a");
        {
            let temporary = realm.new_object();
            add(&temporary, "b");
        }
        assert_eq!(realm.object_shape().transition_count(), 2);

        assert_eq!(realm.purge_transitions(), 1);
        assert_eq!(realm.object_shape().transition_count(), 1);
        let again = realm.new_object();
        add(&again, "a");
        assert!(Arc::ptr_eq(&again.shape(), &kept.shape()));
    }

    #[test]
    fn test_primitive_receiver_shapes() {
        let realm = Realm::new();
        let a = realm.receiver_shape(&Value::string("a"));
        let b = realm.receiver_shape(&Value::string("b"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_string_map());
        assert!(Arc::ptr_eq(
            &realm.receiver_shape(&Value::Smi(1)),
            &realm.receiver_shape(&Value::HeapNumber(0.5))
        ));
    }

    #[test]
    fn test_script_context_table() {
        let realm = Realm::new();
        realm.script_contexts().declare(&[("x", VariableMode::Let), ("y", VariableMode::Const)]);
        let found = realm.script_contexts().lookup(&Name::string("y")).unwrap();
        assert_eq!(found.mode, VariableMode::Const);
        assert_eq!(found.context.get(found.slot_index), None);
        assert!(realm.script_contexts().initialize("y", Value::Smi(3)));
        assert_eq!(found.context.get(found.slot_index), Some(Value::Smi(3)));
    }
}
