//! Runtime values.

use crate::buffer::OutputBuffer;
use crate::codec::Encoder;
use crate::error::EncodingError;
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Variables visible to a page, keyed by name.
pub type Bindings = IndexMap<SmolStr, Value>;

/// An immutable, shared string with a stable identity.
///
/// Clones share the allocation, so a clone has the same [`Text::identity`]
/// as its source. The encoding state registry relies on this.
#[derive(Clone)]
pub struct Text(Arc<str>);

impl Text {
    /// Creates a new text with a fresh identity.
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Text(text.into())
    }

    /// Returns the text as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a key identifying this allocation.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }

    /// Returns `true` if both texts share one allocation.
    pub fn same_identity(&self, other: &Text) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Text {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Text {}

impl PartialEq<str> for Text {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Text {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Text {
    fn from(text: &str) -> Self {
        Text::new(text)
    }
}

impl From<String> for Text {
    fn from(text: String) -> Self {
        Text::new(text)
    }
}

/// Character content that may be stored in one piece or in segments.
pub trait CharSequence {
    /// Returns the content when it is stored contiguously.
    fn contiguous(&self) -> Option<&str>;

    /// Appends the content to `out`.
    fn copy_into(&self, out: &mut String);

    /// Returns the content as one string, copying only when necessary.
    fn to_contiguous(&self) -> std::borrow::Cow<'_, str> {
        match self.contiguous() {
            Some(text) => std::borrow::Cow::Borrowed(text),
            None => {
                let mut out = String::new();
                self.copy_into(&mut out);
                std::borrow::Cow::Owned(out)
            }
        }
    }
}

impl CharSequence for str {
    fn contiguous(&self) -> Option<&str> {
        Some(self)
    }

    fn copy_into(&self, out: &mut String) {
        out.push_str(self);
    }
}

impl CharSequence for String {
    fn contiguous(&self) -> Option<&str> {
        Some(self)
    }

    fn copy_into(&self, out: &mut String) {
        out.push_str(self);
    }
}

impl CharSequence for Text {
    fn contiguous(&self) -> Option<&str> {
        Some(self.as_str())
    }

    fn copy_into(&self, out: &mut String) {
        out.push_str(self.as_str());
    }
}

/// A value that knows how to encode itself.
///
/// Writing such a value through an encoding channel calls [`Encodeable::encode`]
/// instead of converting it to text first.
pub trait Encodeable: fmt::Debug + Send + Sync {
    /// Renders the value encoded with `encoder`, or unencoded when `None`.
    fn encode(&self, encoder: Option<&dyn Encoder>) -> Result<Text, EncodingError>;

    /// Returns a property of the value, if it has one.
    fn property(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// A dynamically typed runtime value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Decimal.
    Float(f64),
    /// String.
    Str(Text),
    /// Ordered list.
    List(Vec<Value>),
    /// Map with insertion-ordered keys.
    Map(IndexMap<SmolStr, Value>),
    /// Captured output.
    Buffer(OutputBuffer),
    /// Host object that encodes itself.
    Object(Arc<dyn Encodeable>),
}

impl Value {
    /// Creates a string value.
    pub fn str(text: impl Into<Text>) -> Self {
        Value::Str(text.into())
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness: null, `false`, zero and empty values are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::Str(text) => !text.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Buffer(buffer) => !buffer.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Float(_) => "BigDecimal",
            Value::Str(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Buffer(_) => "StreamCharBuffer",
            Value::Object(_) => "Object",
        }
    }

    /// Converts the value to text.
    ///
    /// Strings keep their identity. `null` becomes `"null"`, as in string
    /// interpolation; output channels skip `null` before getting here.
    pub fn to_text(&self) -> Text {
        match self {
            Value::Str(text) => text.clone(),
            Value::Buffer(buffer) => buffer.to_text(),
            Value::Object(object) => match object.encode(None) {
                Ok(text) => text,
                Err(_) => Text::from(format!("{object:?}")),
            },
            other => Text::from(other.to_string()),
        }
    }

    /// Returns the string content for string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Equality that compares numbers across int and float, and strings
    /// with captured output by content.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, x)| b.get(key).is_some_and(|y| x.loose_eq(y)))
            }
            (Value::Str(_) | Value::Buffer(_), Value::Str(_) | Value::Buffer(_)) => {
                self.to_text().as_str() == other.to_text().as_str()
            }
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
                    write!(f, "{value:.1}")
                } else {
                    write!(f, "{value}")
                }
            }
            Value::Str(text) => f.write_str(text),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                if entries.is_empty() {
                    return f.write_str("[:]");
                }
                f.write_str("[")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}:{value}")?;
                }
                f.write_str("]")
            }
            Value::Buffer(buffer) => f.write_str(&buffer.to_text()),
            Value::Object(_) => f.write_str(&self.to_text()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        i64::try_from(value).map_or(Value::Float(value as f64), Value::Int)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Text::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Text::from(value))
    }
}

impl From<Text> for Value {
    fn from(value: Text) -> Self {
        Value::Str(value)
    }
}

impl From<OutputBuffer> for Value {
    fn from(value: OutputBuffer) -> Self {
        Value::Buffer(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl FromIterator<(SmolStr, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (SmolStr, Value)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_identity() {
        let text = Text::from("hello");
        let clone = text.clone();
        let copy = Text::from("hello");
        assert!(text.same_identity(&clone));
        assert_eq!(text.identity(), clone.identity());
        assert!(!text.same_identity(&copy));
        assert_eq!(text, copy);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::from(vec![1]).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from(vec![1, 2]).to_string(), "[1, 2]");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Map(IndexMap::new()).to_string(), "[:]");
        let map: Value = [(SmolStr::new("a"), Value::from(1))].into_iter().collect();
        assert_eq!(map.to_string(), "[a:1]");
    }

    #[test]
    fn test_to_text_keeps_identity() {
        let text = Text::from("same");
        let value = Value::Str(text.clone());
        assert!(value.to_text().same_identity(&text));
    }

    #[test]
    fn test_loose_eq() {
        assert!(Value::Int(2).loose_eq(&Value::Float(2.0)));
        assert!(Value::from("a").loose_eq(&Value::from("a")));
        assert!(!Value::from("1").loose_eq(&Value::Int(1)));
        assert!(!Value::Null.loose_eq(&Value::from("")));
    }
}
