//! # Otter VM Object Model
//!
//! The heap-side half of property access: hidden classes (shapes) with
//! transition trees, elements kinds and backing stores, prototype validity
//! cells, global property cells and the generic runtime operations that
//! every inline cache handler falls back to.
//!
//! ## Design Principles
//!
//! - **Thread-safe**: objects and shapes are `Send + Sync`
//! - **Shared shapes**: objects built the same way share one shape
//! - **Retained transitions**: a transition tree keeps its shapes until
//!   [`Realm::purge_transitions`](realm::Realm::purge_transitions) prunes
//!   the unused ones or the realm is dropped

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod accessors;
pub mod elements;
pub mod error;
pub mod lookup;
pub mod object;
pub mod ops;
pub mod property;
pub mod realm;
pub mod shape;
pub mod string;
pub mod validity;
pub mod value;

pub use accessors::{AccessorPair, FunctionData, FunctionKind, InterceptorInfo, NativeAccessor, TemplateId};
pub use elements::{Element, ElementsKind, ElementsStore, TypedArrayKind};
pub use error::{MessageTemplate, VmError, VmResult};
pub use lookup::{AccessorValue, LookupIterator, LookupState};
pub use object::{JsObject, ObjectKind, WeakObject};
pub use property::{
    BuiltinField, FieldIndex, LanguageMode, Name, PropertyAttributes, PropertyDetails, PropertyKey, PropertyKind,
    PropertyLocation, Representation, Symbol,
};
pub use realm::{Realm, ScriptContext, ScriptContextLookup, VariableMode};
pub use shape::{Descriptor, DescriptorValue, InstanceType, Shape, ShapeId, ShapeRef};
pub use string::JsString;
pub use validity::{CellContents, PropertyCell, ValidityCell};
pub use value::Value;
