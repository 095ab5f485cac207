//! Runtime values.
//!
//! `Value` is what expressions evaluate to and what resolved props carry.
//! It is a small JavaScript-like value model: JSON data plus `undefined`
//! and callable functions. Containers are reference counted, so cloning a
//! value never deep-copies a list or an object.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::ExpressionError;
use crate::parser::Closure;

pub type Object = IndexMap<String, Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Text(Rc<str>),
    List(Rc<Vec<Value>>),
    Object(Rc<Object>),
    Function(Function),
}

/// Something an expression can call.
#[derive(Clone)]
pub enum Function {
    /// Host-provided function, e.g. an injected utility.
    Native(NativeFunction),
    /// Arrow function compiled from an expression.
    Closure(Rc<Closure>),
}

type NativeCall = dyn Fn(&[Value]) -> Result<Value, ExpressionError>;

#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    call: Rc<NativeCall>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<Rc<str>>,
        call: impl Fn(&[Value]) -> Result<Value, ExpressionError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            call: Rc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, arguments: &[Value]) -> Result<Value, ExpressionError> {
        (self.call)(arguments)
    }
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Self::Native(native) => native.name(),
            Self::Closure(_) => "anonymous",
        }
    }

    pub fn call(&self, arguments: &[Value]) -> Result<Value, ExpressionError> {
        match self {
            Self::Native(native) => native.call(arguments),
            Self::Closure(closure) => closure.call(arguments),
        }
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Native(a), Self::Native(b)) => Rc::ptr_eq(&a.call, &b.call),
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    pub fn text(text: impl Into<Rc<str>>) -> Self {
        Self::Text(text.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(Rc::new(items.into_iter().collect()))
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(Rc::new(
            fields
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        ))
    }

    pub fn native(
        name: impl Into<Rc<str>>,
        call: impl Fn(&[Value]) -> Result<Value, ExpressionError> + 'static,
    ) -> Self {
        Self::Function(Function::Native(NativeFunction::new(name, call)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::List(_) => "array",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(value) => *value,
            Self::Number(number) => *number != 0.0 && !number.is_nan(),
            Self::Text(text) => !text.is_empty(),
            Self::List(_) | Self::Object(_) | Self::Function(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    /// JavaScript `Number(value)` coercion.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(value) => f64::from(u8::from(*value)),
            Self::Number(number) => *number,
            Self::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Self::List(_) | Self::Object(_) | Self::Function(_) => f64::NAN,
        }
    }

    /// JavaScript `String(value)` coercion.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(value) => value.to_string(),
            Self::Number(number) => format_number(*number),
            Self::Text(text) => text.to_string(),
            Self::List(items) => items
                .iter()
                .map(|item| {
                    if item.is_nullish() {
                        String::new()
                    } else {
                        item.to_display_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Self::Object(_) => "[object Object]".to_string(),
            Self::Function(function) => format!("function {}() {{ [native code] }}", function.name()),
        }
    }

    /// Property read with JavaScript semantics for the shapes we model.
    pub fn property(&self, name: &str) -> Value {
        match (self, name) {
            (Self::Object(fields), _) => fields.get(name).cloned().unwrap_or_default(),
            (Self::List(items), "length") => Self::Number(items.len() as f64),
            (Self::Text(text), "length") => Self::Number(text.chars().count() as f64),
            (Self::List(items), index) => index
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index).cloned())
                .unwrap_or_default(),
            _ => Self::Undefined,
        }
    }

    /// `===`
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `==`, limited to the coercions that matter for schema expressions.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Self::Number(_), Self::Text(_) | Self::Bool(_))
            | (Self::Text(_) | Self::Bool(_), Self::Number(_))
            | (Self::Bool(_), Self::Text(_))
            | (Self::Text(_), Self::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_eq(other),
        }
    }

    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(value) => Self::Bool(*value),
            JsonValue::Number(number) => Self::Number(number.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(text) => Self::text(text.as_str()),
            JsonValue::Array(items) => Self::list(items.iter().map(Self::from_json)),
            JsonValue::Object(fields) => Self::object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value))),
            ),
        }
    }

    /// Lossy conversion back to JSON; functions become their display string
    /// and `undefined` object fields are dropped.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Undefined | Self::Null => JsonValue::Null,
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Number(number) => number_to_json(*number),
            Self::Text(text) => JsonValue::String(text.to_string()),
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(fields) => JsonValue::Object(
                fields
                    .iter()
                    .filter(|(_, value)| !matches!(value, Self::Undefined))
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Self::Function(function) => JsonValue::String(format!("[function {}]", function.name())),
        }
    }
}

fn format_number(number: f64) -> String {
    if number.is_nan() {
        "NaN".to_string()
    } else if number.is_infinite() {
        if number > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if number == 0.0 {
        "0".to_string()
    } else {
        number.to_string()
    }
}

fn number_to_json(number: f64) -> JsonValue {
    if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
        JsonValue::from(number as i64)
    } else {
        serde_json::Number::from_f64(number)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

impl PartialEq for Value {
    /// Structural equality; functions compare by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => self.strict_eq(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(number) => write!(f, "{}", format_number(*number)),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
            Self::Object(fields) => f.debug_map().entries(fields.iter()).finish(),
            Self::Function(function) => write!(f, "[function {}]", function.name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<&JsonValue> for Value {
    fn from(value: &JsonValue) -> Self {
        Self::from_json(value)
    }
}
