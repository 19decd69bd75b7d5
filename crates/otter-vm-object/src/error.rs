//! VM error types

use crate::value::Value;
use thiserror::Error;

/// VM execution errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (e.g., property load on `undefined`)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Reference error (undeclared or uninitialized binding)
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Range error
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Internal error
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Thrown JS exception, propagated unchanged
    #[error("Uncaught exception: {0}")]
    Exception(Box<ThrownValue>),
}

/// A thrown JavaScript value
#[derive(Debug)]
pub struct ThrownValue {
    /// The thrown value
    pub value: Value,
    /// The thrown value (as a string representation)
    pub message: String,
}

impl std::fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl VmError {
    /// Create a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        VmError::TypeError(message.into())
    }

    /// Create a reference error
    pub fn reference_error(message: impl Into<String>) -> Self {
        VmError::ReferenceError(message.into())
    }

    /// Create a range error
    pub fn range_error(message: impl Into<String>) -> Self {
        VmError::RangeError(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        VmError::InternalError(message.into())
    }

    /// Wrap a thrown JS value
    pub fn exception(value: Value) -> Self {
        let message = value.to_display_string();
        VmError::Exception(Box::new(ThrownValue { value, message }))
    }

    /// Type error from a message template
    pub fn new_type_error(template: MessageTemplate, args: &[&str]) -> Self {
        VmError::TypeError(template.format(args))
    }

    /// Reference error from a message template
    pub fn new_reference_error(template: MessageTemplate, args: &[&str]) -> Self {
        VmError::ReferenceError(template.format(args))
    }

    /// Is this a type error
    pub fn is_type_error(&self) -> bool {
        matches!(self, VmError::TypeError(_))
    }

    /// Is this a reference error
    pub fn is_reference_error(&self) -> bool {
        matches!(self, VmError::ReferenceError(_))
    }
}

/// User-visible error messages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageTemplate {
    /// `Cannot read property '%' of %`
    NonObjectPropertyLoad,
    /// `Cannot set property '%' of %`
    NonObjectPropertyStore,
    /// `% is not defined`
    NotDefined,
    /// `Assignment to constant variable.`
    ConstAssign,
    /// `% is not iterable`
    NotIterable,
    /// `Cannot assign to read only property '%' of object`
    StrictReadOnlyProperty,
    /// `Cannot add property %, object is not extensible`
    ObjectNotExtensible,
    /// `Cannot set property % of % which has only a getter`
    NoSetterInCallback,
    /// `% is not a function`
    CalledNonCallable,
    /// `no access`
    NoAccess,
    /// `Cannot convert undefined or null to object`
    UndefinedOrNullToObject,
}

impl MessageTemplate {
    fn text(self) -> &'static str {
        match self {
            MessageTemplate::NonObjectPropertyLoad => "Cannot read property '%' of %",
            MessageTemplate::NonObjectPropertyStore => "Cannot set property '%' of %",
            MessageTemplate::NotDefined => "% is not defined",
            MessageTemplate::ConstAssign => "Assignment to constant variable.",
            MessageTemplate::NotIterable => "% is not iterable",
            MessageTemplate::StrictReadOnlyProperty => "Cannot assign to read only property '%' of object",
            MessageTemplate::ObjectNotExtensible => "Cannot add property %, object is not extensible",
            MessageTemplate::NoSetterInCallback => "Cannot set property % of % which has only a getter",
            MessageTemplate::CalledNonCallable => "% is not a function",
            MessageTemplate::NoAccess => "no access",
            MessageTemplate::UndefinedOrNullToObject => "Cannot convert undefined or null to object",
        }
    }

    /// Substitute `%` placeholders left to right
    pub fn format(self, args: &[&str]) -> String {
        let mut out = String::new();
        let mut args = args.iter();
        for c in self.text().chars() {
            if c == '%' {
                out.push_str(args.next().copied().unwrap_or(""));
            } else {
                out.push(c);
            }
        }
        out
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_format() {
        assert_eq!(
            MessageTemplate::NonObjectPropertyLoad.format(&["x", "undefined"]),
            "Cannot read property 'x' of undefined"
        );
        assert_eq!(MessageTemplate::NotDefined.format(&["foo"]), "foo is not defined");
    }

    #[test]
    fn test_error_display() {
        let err = VmError::new_reference_error(MessageTemplate::NotDefined, &["x"]);
        assert!(err.is_reference_error());
        assert_eq!(err.to_string(), "ReferenceError: x is not defined");
    }
}
