//! Accessors, interceptors and native callables

use crate::error::VmResult;
use crate::object::JsObject;
use crate::property::{BuiltinField, Name, PropertyKey};
use crate::shape::InstanceType;
use crate::value::Value;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TEMPLATE_ID: AtomicU64 = AtomicU64::new(1);

/// Native function body: `(this, args) -> result`
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> VmResult<Value> + Send + Sync>;

/// Native accessor getter: `(receiver, holder) -> value`
pub type NativeGetter = Arc<dyn Fn(&Value, &JsObject) -> VmResult<Value> + Send + Sync>;

/// Native accessor setter: `(receiver, holder, value)`
pub type NativeSetter = Arc<dyn Fn(&Value, &JsObject, Value) -> VmResult<()> + Send + Sync>;

/// Interceptor getter; `None` lets the lookup continue
pub type InterceptorGetter = Arc<dyn Fn(&Value, &PropertyKey) -> VmResult<Option<Value>> + Send + Sync>;

/// Interceptor setter; `false` lets the store continue
pub type InterceptorSetter = Arc<dyn Fn(&Value, &PropertyKey, &Value) -> VmResult<bool> + Send + Sync>;

/// Interceptor query; `true` when the interceptor claims the property
pub type InterceptorQuery = Arc<dyn Fn(&Value, &PropertyKey) -> bool + Send + Sync>;

/// Identity of an API function template
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TemplateId(u64);

impl TemplateId {
    /// Allocate a fresh template id
    pub fn new() -> Self {
        Self(NEXT_TEMPLATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

/// How a function object is implemented
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    /// Ordinary script closure
    Closure,
    /// API function created from a template
    Api {
        /// Receivers must be instances of this template
        signature: Option<TemplateId>,
    },
}

/// Callable part of a function object
pub struct FunctionData {
    /// Function name
    pub name: String,
    /// Closure or API function
    pub kind: FunctionKind,
    /// Native body
    pub call: NativeFn,
    /// Can be used with `new`
    pub is_constructor: bool,
    /// Value of the `prototype` property of constructors
    pub prototype: RwLock<Value>,
}

impl FunctionData {
    /// API function whose receiver compatibility can be checked from its
    /// shape alone
    pub fn is_simple_api_call(&self) -> bool {
        matches!(self.kind, FunctionKind::Api { .. })
    }

    /// Whether a receiver with `template` satisfies the signature
    pub fn is_compatible_receiver(&self, template: Option<TemplateId>) -> bool {
        match self.kind {
            FunctionKind::Api { signature: Some(expected) } => template == Some(expected),
            _ => true,
        }
    }
}

impl std::fmt::Debug for FunctionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionData")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("is_constructor", &self.is_constructor)
            .finish()
    }
}

/// JS getter/setter pair; absent halves are `undefined`
#[derive(Clone, Debug, Default)]
pub struct AccessorPair {
    /// Getter function or `undefined`
    pub getter: Value,
    /// Setter function or `undefined`
    pub setter: Value,
}

impl AccessorPair {
    /// Create a pair
    pub fn new(getter: Value, setter: Value) -> Arc<Self> {
        Arc::new(Self { getter, setter })
    }
}

/// Native accessor backed by host callbacks
pub struct NativeAccessor {
    /// Property name
    pub name: Name,
    /// Getter callback
    pub getter: Option<NativeGetter>,
    /// Setter callback
    pub setter: Option<NativeSetter>,
    /// Receivers must have this instance type
    pub expected_receiver: Option<InstanceType>,
    /// Getter may observe non-object receivers unwrapped
    pub is_sloppy: bool,
    /// Behaves like a data property for stores on the prototype chain
    pub is_special_data_property: bool,
    /// Reads a built-in object slot directly
    pub builtin_field: Option<BuiltinField>,
    /// Reads module export `n` of a namespace object
    pub module_export: Option<usize>,
}

impl NativeAccessor {
    /// Create an accessor with no callbacks
    pub fn new(name: Name) -> Self {
        Self {
            name,
            getter: None,
            setter: None,
            expected_receiver: None,
            is_sloppy: false,
            is_special_data_property: false,
            builtin_field: None,
            module_export: None,
        }
    }

    /// Set the getter
    pub fn with_getter(
        mut self,
        getter: impl Fn(&Value, &JsObject) -> VmResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Set the setter
    pub fn with_setter(
        mut self,
        setter: impl Fn(&Value, &JsObject, Value) -> VmResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Restrict receivers to one instance type
    pub fn with_expected_receiver(mut self, instance_type: InstanceType) -> Self {
        self.expected_receiver = Some(instance_type);
        self
    }

    /// Mark the getter as sloppy
    pub fn sloppy(mut self) -> Self {
        self.is_sloppy = true;
        self
    }

    /// Mark as a special data property
    pub fn special_data_property(mut self) -> Self {
        self.is_special_data_property = true;
        self
    }

    /// Alias a built-in object slot
    pub fn with_builtin_field(mut self, field: BuiltinField) -> Self {
        self.builtin_field = Some(field);
        self
    }

    /// Alias a module export
    pub fn with_module_export(mut self, index: usize) -> Self {
        self.module_export = Some(index);
        self
    }

    /// Whether a receiver of `instance_type` may use this accessor
    pub fn is_compatible_receiver(&self, instance_type: InstanceType) -> bool {
        self.expected_receiver.is_none_or(|expected| expected == instance_type)
    }
}

impl std::fmt::Debug for NativeAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeAccessor")
            .field("name", &self.name)
            .field("has_getter", &self.getter.is_some())
            .field("has_setter", &self.setter.is_some())
            .field("builtin_field", &self.builtin_field)
            .field("module_export", &self.module_export)
            .finish()
    }
}

/// Host interceptor installed on a shape
pub struct InterceptorInfo {
    /// Getter callback
    pub getter: Option<InterceptorGetter>,
    /// Setter callback
    pub setter: Option<InterceptorSetter>,
    /// Query callback
    pub query: Option<InterceptorQuery>,
    /// Own properties take precedence over the interceptor
    pub non_masking: bool,
}

impl InterceptorInfo {
    /// Masking interceptor with no callbacks
    pub fn new() -> Self {
        Self {
            getter: None,
            setter: None,
            query: None,
            non_masking: false,
        }
    }

    /// Set the getter
    pub fn with_getter(
        mut self,
        getter: impl Fn(&Value, &PropertyKey) -> VmResult<Option<Value>> + Send + Sync + 'static,
    ) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Set the setter
    pub fn with_setter(
        mut self,
        setter: impl Fn(&Value, &PropertyKey, &Value) -> VmResult<bool> + Send + Sync + 'static,
    ) -> Self {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Set the query callback
    pub fn with_query(mut self, query: impl Fn(&Value, &PropertyKey) -> bool + Send + Sync + 'static) -> Self {
        self.query = Some(Arc::new(query));
        self
    }

    /// Mark as non-masking
    pub fn non_masking(mut self) -> Self {
        self.non_masking = true;
        self
    }
}

impl Default for InterceptorInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterceptorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorInfo")
            .field("has_getter", &self.getter.is_some())
            .field("has_setter", &self.setter.is_some())
            .field("non_masking", &self.non_masking)
            .finish()
    }
}
