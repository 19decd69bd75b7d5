//! IC handlers
//!
//! A handler describes how to perform one load or store for receivers of
//! one shape. Handlers are immutable once built and shared freely between
//! feedback slots, the megamorphic stub caches and the handler cache.
//!
//! Anything a handler refers to that may die independently of the shape it
//! is cached for (holders, transition targets, property cells) is held
//! weakly. A dead reference makes the handler report a miss.

use crate::store_mode::KeyedAccessStoreMode;
use otter_vm_object::{
    BuiltinField, ElementsKind, FieldIndex, JsObject, Name, PropertyCell, Representation, Shape, ShapeRef,
    ValidityCell, WeakObject,
};
use smallvec::SmallVec;
use std::sync::{Arc, Weak};

/// Which property store a dictionary handler reads
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DictionaryMode {
    /// Name dictionary of a dictionary-mode object
    Normal,
    /// Property cells of a global object, found by name
    Global,
}

/// Weak reference to the object a prototype-chain handler reads from
#[derive(Clone, Debug)]
pub enum HolderRef {
    /// Holder object
    Object(WeakObject),
    /// Property cell of a global holder
    Cell(Weak<PropertyCell>),
}

impl HolderRef {
    /// Whether the referent is still alive
    pub fn is_alive(&self) -> bool {
        match self {
            HolderRef::Object(obj) => obj.is_alive(),
            HolderRef::Cell(cell) => cell.strong_count() > 0,
        }
    }
}

/// Explicit check a prototype-chain handler runs before its base handler
///
/// Validity cells do not notice properties added to dictionary-mode
/// prototypes or global objects, nor a change of realm for primitive
/// receivers, so those need one of these.
#[derive(Clone, Debug)]
pub enum PrototypeCheck {
    /// Receiver belongs to the realm with this id
    NativeContext(u64),
    /// The global property cell is still empty
    GlobalPropertyCell(Weak<PropertyCell>),
    /// The dictionary-mode prototype does not have the name
    DictionaryNegativeLookup(WeakObject),
}

/// Prototype checks of one handler
pub type PrototypeChecks = SmallVec<[PrototypeCheck; 2]>;

/// Prototype-chain validation computed for one receiver shape and holder
#[derive(Clone, Debug, Default)]
pub struct ChainChecks {
    /// Cell covering the receiver's prototype chain
    pub validity_cell: Option<Arc<ValidityCell>>,
    /// Object (or cell) the base handler operates on
    pub holder: Option<HolderRef>,
    /// Explicit checks
    pub checks: PrototypeChecks,
    /// Receiver is a dictionary-mode object that must not have the name
    pub lookup_on_receiver: bool,
    /// Receiver needs an access check
    pub access_check_on_receiver: bool,
}

impl ChainChecks {
    /// Whether the handler needs a wrapper at all
    pub fn is_trivial(&self) -> bool {
        self.validity_cell.is_none()
            && self.checks.is_empty()
            && self.holder.is_none()
            && !self.lookup_on_receiver
            && !self.access_check_on_receiver
    }
}

/// Base handler wrapped with prototype-chain validation
#[derive(Debug)]
pub struct PrototypeChainHandler {
    /// Operation performed once the chain checks pass
    pub base: Handler,
    /// Cell covering the receiver's prototype chain
    pub validity_cell: Option<Arc<ValidityCell>>,
    /// Object (or cell) the base handler operates on; the receiver when absent
    pub holder: Option<HolderRef>,
    /// Explicit checks
    pub checks: PrototypeChecks,
    /// The receiver is a dictionary-mode object that must not have the name
    pub lookup_on_receiver: bool,
    /// The receiver needs an access check
    pub access_check_on_receiver: bool,
    /// Validates the chain up to its end rather than up to the holder
    pub full_chain: bool,
}

/// Store that adds a field and moves the receiver to a new shape
#[derive(Debug)]
pub struct TransitionHandler {
    /// Shape after the store
    pub target: Weak<Shape>,
    /// Slot of the new field
    pub field_index: FieldIndex,
    /// Representation the stored value must fit
    pub representation: Representation,
    /// The out-of-object backing store has to grow first
    pub extend_storage: bool,
    /// Cell covering the receiver's prototype chain
    pub validity_cell: Option<Arc<ValidityCell>>,
    /// Explicit checks that nothing on the chain intercepts the store
    pub checks: PrototypeChecks,
}

impl TransitionHandler {
    /// Live, up-to-date target shape
    pub fn live_target(&self) -> Option<ShapeRef> {
        self.target.upgrade().filter(|t| !t.is_deprecated())
    }

    /// Target alive and chain unchanged
    pub fn is_valid(&self) -> bool {
        self.live_target().is_some() && self.validity_cell.as_ref().is_none_or(|c| c.is_valid())
    }
}

/// How an element handler reaches the receiver's elements
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementAccess {
    /// Smi, double or object backing store
    Fast,
    /// Typed array
    Typed,
    /// Sparse dictionary
    Dictionary,
    /// Mapped arguments object
    SloppyArguments,
    /// Character of a primitive string
    IndexedString,
    /// Masking indexed interceptor
    Interceptor,
}

/// Indexed load or store for one shape
#[derive(Debug)]
pub struct ElementHandler {
    /// Backing store access
    pub access: ElementAccess,
    /// Elements kind of the shape the handler was built for
    pub elements_kind: ElementsKind,
    /// A hole reads as `undefined` without walking the prototype chain
    pub convert_hole_to_undefined: bool,
    /// Receiver is a JS array (bounds use `length`)
    pub is_js_array: bool,
    /// Store mode (stores only)
    pub store_mode: KeyedAccessStoreMode,
    /// Cell covering the receiver's prototype chain (stores only)
    pub validity_cell: Option<Arc<ValidityCell>>,
}

/// Keyed store that first moves the receiver to a more general elements kind
#[derive(Debug)]
pub struct ElementsTransitionHandler {
    /// Shape to transition to
    pub target: Weak<Shape>,
    /// Store performed on the transitioned receiver
    pub store: Arc<ElementHandler>,
}

/// Shape-specific handler kept in the handler cache
#[derive(Debug)]
pub struct CompiledHandler {
    /// Shape the handler was compiled for
    pub shape: Weak<Shape>,
    /// Property name
    pub name: Name,
    /// Operation it performs
    pub body: Handler,
}

impl CompiledHandler {
    /// Whether the handler applies to receivers of `shape`
    pub fn matches(&self, shape: &ShapeRef) -> bool {
        self.shape.upgrade().is_some_and(|s| Arc::ptr_eq(&s, shape))
    }
}

/// Load or store handler
#[derive(Clone, Debug)]
pub enum Handler {
    /// Take the generic runtime path
    Slow,
    /// Read or write a fast field
    Field {
        /// Field slot
        index: FieldIndex,
        /// Field representation
        representation: Representation,
    },
    /// Constant held by the holder's shape
    Constant {
        /// Descriptor number
        descriptor: usize,
    },
    /// JS getter or setter of the holder's descriptor
    Accessor {
        /// Descriptor number
        descriptor: usize,
    },
    /// Simple API getter or setter of the holder's descriptor
    ApiAccessor {
        /// Descriptor number
        descriptor: usize,
    },
    /// Native accessor of the holder's descriptor
    NativeAccessor {
        /// Descriptor number
        descriptor: usize,
    },
    /// Built-in slot read through its native accessor
    BuiltinField(BuiltinField),
    /// `length` of a primitive string
    StringLength,
    /// `length` of a string wrapper
    StringWrapperLength,
    /// `prototype` of a constructor
    FunctionPrototype,
    /// Module namespace export
    ModuleExport(usize),
    /// Dictionary lookup on the holder
    Dictionary(DictionaryMode),
    /// Named interceptor of the holder
    Interceptor,
    /// Proxy trap
    Proxy,
    /// Property absent: loads yield `undefined`
    NonExistent,
    /// Store into a global property cell
    PropertyCell(Weak<PropertyCell>),
    /// Base handler behind prototype-chain checks
    PrototypeChain(Arc<PrototypeChainHandler>),
    /// Store adding a field
    Transition(Arc<TransitionHandler>),
    /// Indexed access
    Element(Arc<ElementHandler>),
    /// Indexed store after an elements kind transition
    ElementsTransitionAndStore(Arc<ElementsTransitionHandler>),
    /// Shape-specific handler from the handler cache
    Compiled(Arc<CompiledHandler>),
}

impl Handler {
    /// Wrap `self` with prototype-chain checks
    pub fn with_checks(self, checks: ChainChecks, full_chain: bool) -> Handler {
        Handler::PrototypeChain(Arc::new(PrototypeChainHandler {
            base: self,
            validity_cell: checks.validity_cell,
            holder: checks.holder,
            checks: checks.checks,
            lookup_on_receiver: checks.lookup_on_receiver,
            access_check_on_receiver: checks.access_check_on_receiver,
            full_chain,
        }))
    }

    /// Element handler
    pub fn element(handler: ElementHandler) -> Handler {
        Handler::Element(Arc::new(handler))
    }

    /// Whether this handler always defers to the runtime
    pub fn is_slow(&self) -> bool {
        matches!(self, Handler::Slow)
    }

    /// Short name used by statistics and traces
    pub fn kind_name(&self) -> &'static str {
        match self {
            Handler::Slow => "Slow",
            Handler::Field { .. } => "Field",
            Handler::Constant { .. } => "Constant",
            Handler::Accessor { .. } => "Accessor",
            Handler::ApiAccessor { .. } => "ApiAccessor",
            Handler::NativeAccessor { .. } => "NativeAccessor",
            Handler::BuiltinField(_) => "BuiltinField",
            Handler::StringLength => "StringLength",
            Handler::StringWrapperLength => "StringWrapperLength",
            Handler::FunctionPrototype => "FunctionPrototype",
            Handler::ModuleExport(_) => "ModuleExport",
            Handler::Dictionary(DictionaryMode::Normal) => "Dictionary",
            Handler::Dictionary(DictionaryMode::Global) => "GlobalDictionary",
            Handler::Interceptor => "Interceptor",
            Handler::Proxy => "Proxy",
            Handler::NonExistent => "NonExistent",
            Handler::PropertyCell(_) => "PropertyCell",
            Handler::PrototypeChain(chain) if chain.full_chain => "FullChain",
            Handler::PrototypeChain(_) => "FromPrototype",
            Handler::Transition(_) => "Transition",
            Handler::Element(_) => "Element",
            Handler::ElementsTransitionAndStore(_) => "ElementsTransitionAndStore",
            Handler::Compiled(_) => "Compiled",
        }
    }

    /// The handler with prototype-chain and compiled wrappers removed
    pub fn base(&self) -> &Handler {
        match self {
            Handler::PrototypeChain(chain) => chain.base.base(),
            Handler::Compiled(compiled) => compiled.body.base(),
            other => other,
        }
    }

    /// Holder object of a prototype-chain handler, if still alive
    pub fn holder_object(&self) -> Option<JsObject> {
        match self {
            Handler::PrototypeChain(chain) => match &chain.holder {
                Some(HolderRef::Object(obj)) => obj.upgrade(),
                _ => None,
            },
            Handler::Compiled(compiled) => compiled.body.holder_object(),
            _ => None,
        }
    }
}

/// Identity: shared handlers compare by reference, simple ones by value
impl PartialEq for Handler {
    fn eq(&self, other: &Handler) -> bool {
        use Handler::*;
        match (self, other) {
            (Slow, Slow)
            | (StringLength, StringLength)
            | (StringWrapperLength, StringWrapperLength)
            | (FunctionPrototype, FunctionPrototype)
            | (Interceptor, Interceptor)
            | (Proxy, Proxy)
            | (NonExistent, NonExistent) => true,
            (
                Field {
                    index: a,
                    representation: ra,
                },
                Field {
                    index: b,
                    representation: rb,
                },
            ) => a == b && ra == rb,
            (Constant { descriptor: a }, Constant { descriptor: b })
            | (Accessor { descriptor: a }, Accessor { descriptor: b })
            | (ApiAccessor { descriptor: a }, ApiAccessor { descriptor: b })
            | (NativeAccessor { descriptor: a }, NativeAccessor { descriptor: b })
            | (ModuleExport(a), ModuleExport(b)) => a == b,
            (BuiltinField(a), BuiltinField(b)) => a == b,
            (Dictionary(a), Dictionary(b)) => a == b,
            (PropertyCell(a), PropertyCell(b)) => Weak::ptr_eq(a, b),
            (PrototypeChain(a), PrototypeChain(b)) => Arc::ptr_eq(a, b),
            (Transition(a), Transition(b)) => Arc::ptr_eq(a, b),
            (Element(a), Element(b)) => Arc::ptr_eq(a, b),
            (ElementsTransitionAndStore(a), ElementsTransitionAndStore(b)) => Arc::ptr_eq(a, b),
            (Compiled(a), Compiled(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_vm_object::InstanceType;

    #[test]
    fn test_identity() {
        let field = Handler::Field {
            index: FieldIndex::for_property(0, 4, Representation::Smi),
            representation: Representation::Smi,
        };
        assert_eq!(field, field.clone());
        assert_ne!(field, Handler::Slow);

        let a = Handler::Slow.with_checks(ChainChecks::default(), false);
        let b = Handler::Slow.with_checks(ChainChecks::default(), false);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.base(), &Handler::Slow);
        assert_eq!(a.kind_name(), "FromPrototype");
    }

    #[test]
    fn test_dead_references() {
        let shape = otter_vm_object::Shape::builder(InstanceType::Object).build();
        let compiled = CompiledHandler {
            shape: Arc::downgrade(&shape),
            name: Name::string("x"),
            body: Handler::Slow,
        };
        assert!(compiled.matches(&shape));
        drop(shape);
        let other = otter_vm_object::Shape::builder(InstanceType::Object).build();
        assert!(!compiled.matches(&other));

        let cell = PropertyCell::empty(Name::string("g"));
        let holder = HolderRef::Cell(Arc::downgrade(&cell));
        assert!(holder.is_alive());
        drop(cell);
        assert!(!holder.is_alive());
    }
}
