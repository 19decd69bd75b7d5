//! JavaScript values
//!
//! Small integers are kept apart from heap numbers because the inline
//! caches specialize on that distinction (field representations and
//! elements kinds).

use crate::error::{VmError, VmResult};
use crate::object::JsObject;
use crate::property::{Name, Symbol};
use crate::string::JsString;
use std::sync::Arc;

/// A JavaScript value
#[derive(Clone)]
pub enum Value {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// Small integer
    Smi(i32),
    /// Boxed double
    HeapNumber(f64),
    /// String
    String(Arc<JsString>),
    /// Symbol
    Symbol(Arc<Symbol>),
    /// Object
    Object(JsObject),
}

impl Value {
    /// `undefined`
    pub const fn undefined() -> Self {
        Value::Undefined
    }

    /// `null`
    pub const fn null() -> Self {
        Value::Null
    }

    /// Small integer
    pub const fn int32(n: i32) -> Self {
        Value::Smi(n)
    }

    /// Number, canonicalized to a small integer when integral
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64 && !(n == 0.0 && n.is_sign_negative())
        {
            Value::Smi(n as i32)
        } else {
            Value::HeapNumber(n)
        }
    }

    /// Internalized string
    pub fn string(s: &str) -> Self {
        Value::String(JsString::intern(s))
    }

    /// Object value
    pub fn object(obj: JsObject) -> Self {
        Value::Object(obj)
    }

    /// Is `undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Is `null` or `undefined`
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Is a small integer
    pub fn is_smi(&self) -> bool {
        matches!(self, Value::Smi(_))
    }

    /// Is a boxed double
    pub fn is_heap_number(&self) -> bool {
        matches!(self, Value::HeapNumber(_))
    }

    /// Is any number
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Smi(_) | Value::HeapNumber(_))
    }

    /// Is a string
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Heap-allocated (everything but small integers)
    pub fn is_heap_object(&self) -> bool {
        !self.is_smi()
    }

    /// Is an object
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Get the object, if any
    pub fn as_object(&self) -> Option<&JsObject> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Get the string, if any
    pub fn as_string(&self) -> Option<&Arc<JsString>> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value of a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Smi(n) => Some(*n as f64),
            Value::HeapNumber(n) => Some(*n),
            _ => None,
        }
    }

    /// Is a callable object
    pub fn is_callable(&self) -> bool {
        self.as_object().is_some_and(|obj| obj.function_data().is_some())
    }

    /// ToNumber for the value kinds the object model stores into typed arrays
    pub fn to_number(&self) -> VmResult<f64> {
        Ok(match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::Smi(n) => *n as f64,
            Value::HeapNumber(n) => *n,
            Value::String(s) => {
                let trimmed = s.as_str().trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Symbol(_) => {
                return Err(VmError::type_error("Cannot convert a Symbol value to a number"));
            }
            Value::Object(_) => f64::NAN,
        })
    }

    /// Property name for a primitive key (`ToPropertyKey` without objects)
    pub fn to_name(&self) -> Name {
        match self {
            Value::Symbol(s) => Name::Symbol(s.clone()),
            Value::String(s) => Name::String(s.clone()),
            other => Name::string(&other.to_display_string()),
        }
    }

    /// `typeof` style type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Smi(_) | Value::HeapNumber(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Object(obj) if obj.function_data().is_some() => "function",
            Value::Object(_) => "object",
        }
    }

    /// Display text used for keys and messages
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Smi(n) => n.to_string(),
            Value::HeapNumber(n) => format_number(*n),
            Value::String(s) => s.as_str().to_string(),
            Value::Symbol(s) => format!("Symbol({})", s.description().unwrap_or("")),
            Value::Object(_) => "#<Object>".to_string(),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Smi(n) => write!(f, "{n}"),
            Value::HeapNumber(n) => write!(f, "{n:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Symbol(s) => write!(f, "Symbol({})", s.description().unwrap_or("")),
            Value::Object(obj) => write!(f, "{obj:?}"),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Smi(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<JsObject> for Value {
    fn from(obj: JsObject) -> Self {
        Value::Object(obj)
    }
}
