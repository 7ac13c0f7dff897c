//! Dynamic runtime values
//!
//! [`Value`] is the datum every template renders against. Lists and maps are distinct
//! variants: a list is always a dense sequence, a map always an ordered string-keyed
//! object, so section semantics never have to guess from key patterns.

use std::{borrow::Cow, fmt, sync::Arc};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Number;

use crate::helper::HelperFn;

/// Ordered string-keyed map of values
pub type Map = IndexMap<String, Value>;

/// Caller-supplied sequence, traversed afresh every time a section walks it
#[derive(Clone)]
pub struct Iterable(Arc<dyn Fn() -> Box<dyn Iterator<Item = Value>> + Send + Sync>);

impl Iterable {
    pub fn new<F, I>(source: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Value>,
        I::IntoIter: 'static,
    {
        Self(Arc::new(move || Box::new(source().into_iter())))
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = Value>> {
        (self.0)()
    }
}

/// A helper function carried inside the input data
#[derive(Clone)]
pub struct Callable(pub(crate) Arc<HelperFn>);

impl Callable {
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(&[Value], &mut crate::HelperOptions<'_>) -> crate::HelperResult + Send + Sync + 'static,
    {
        Self(Arc::new(function))
    }
}

/// The dynamic runtime datum
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Pre-escaped text, rendered verbatim
    Safe(String),
    Array(Vec<Value>),
    Object(Map),
    Iterable(Iterable),
    Callable(Callable),
}

impl Value {
    /// Converts any serializable type through its JSON representation
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::from)
    }

    pub fn safe(text: impl Into<String>) -> Self {
        Self::Safe(text.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Safe(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Member access: map keys, and integer indexes into lists
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key),
            Self::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// The `length` property of lists and strings
    pub(crate) fn length(&self) -> Option<Value> {
        match self {
            Self::Array(items) => Some(Value::from(items.len() as u64)),
            Self::String(s) | Self::Safe(s) => Some(Value::from(s.chars().count() as u64)),
            _ => None,
        }
    }

    pub(crate) fn is_empty_collection(&self) -> bool {
        match self {
            Self::Array(items) => items.is_empty(),
            Self::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    fn is_zero(&self) -> bool {
        match self {
            Self::Number(n) => n.as_f64() == Some(0.0),
            _ => false,
        }
    }

    /// Truthiness used by `if`/`unless`
    ///
    /// Falsy values are null, false, the empty string, an empty list or map, and zero unless
    /// `include_zero` is set.
    pub fn is_truthy(&self, include_zero: bool) -> bool {
        match self {
            Self::Null | Self::Bool(false) => false,
            Self::String(s) | Self::Safe(s) => !s.is_empty(),
            Self::Number(_) => include_zero || !self.is_zero(),
            Self::Array(_) | Self::Object(_) => !self.is_empty_collection(),
            _ => true,
        }
    }

    /// Whether an inverted section `{{^x}}` renders its body
    ///
    /// Narrower than [`Value::is_truthy`]: empty strings and zero do not count.
    pub fn is_inverted_section(&self) -> bool {
        matches!(self, Self::Null | Self::Bool(false)) || self.is_empty_collection()
    }

    /// Text form used for interpolation, before any escaping
    pub fn render(&self) -> Cow<'_, str> {
        match self {
            Self::Null | Self::Callable(_) => Cow::Borrowed(""),
            Self::Bool(true) => Cow::Borrowed("true"),
            Self::Bool(false) => Cow::Borrowed("false"),
            Self::Number(n) => Cow::Owned(number_to_string(n)),
            Self::String(s) | Self::Safe(s) => Cow::Borrowed(s),
            Self::Object(_) => Cow::Borrowed("[object Object]"),
            Self::Array(items) => Cow::Owned(join(items.iter())),
            Self::Iterable(iterable) => Cow::Owned(join(iterable.iter().collect::<Vec<_>>().iter())),
        }
    }
}

fn join<'a>(items: impl Iterator<Item = &'a Value>) -> String {
    items
        .map(|item| item.render().into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Integral floats print without a fraction
fn number_to_string(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// A map is sparse unless its keys are exactly `0..n`; `@index` then reports the key itself
pub(crate) fn is_sparse(map: &Map) -> bool {
    map.keys()
        .enumerate()
        .any(|(i, key)| key.parse::<usize>().ok() != Some(i))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.as_f64() == b.as_f64(),
            (Self::String(a), Self::String(b)) | (Self::Safe(a), Self::Safe(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Iterable(a), Self::Iterable(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Self::Callable(a), Self::Callable(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Safe(s) => write!(f, "Safe({s:?})"),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Self::Iterable(_) => f.write_str("Iterable"),
            Self::Callable(_) => f.write_str("Callable"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number((n as u64).into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Self::Object(map)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Iterable> for Value {
    fn from(iterable: Iterable) -> Self {
        Self::Iterable(iterable)
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Self::Callable(callable)
    }
}
