//! Dynamic field value type.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A dynamic field value held by a record or a child row.
///
/// Values serialize untagged, so `null`, `true`, `42`, `4.2`, `"text"` and
/// `[1, 2]` in JSON map directly onto the corresponding variant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null / absent value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string.
    Text(String),
    /// List of values.
    List(Vec<Value>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is null or an empty string.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Equality that treats `1` and `1.0` as the same value.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                self.compare(other) == Some(Ordering::Equal)
            }
            _ => self == other,
        }
    }

    /// Orders two values of compatible types.
    ///
    /// Returns `None` when either side is null or the types cannot be
    /// compared (text against a number, for instance).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                self.as_float()?.partial_cmp(&other.as_float()?)
            }
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Coerces a textual value to the type of `reference`.
    ///
    /// Operator-entered condition values arrive as text; before comparing
    /// them against a record value they are converted to that value's type.
    /// Values that fail to convert are returned unchanged.
    pub fn coerce_like(&self, reference: &Value) -> Value {
        let Value::Text(text) = self else {
            return self.clone();
        };
        let trimmed = text.trim();
        match reference {
            Value::Integer(_) => trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .or_else(|_| trimmed.parse::<f64>().map(Value::Float))
                .unwrap_or_else(|_| self.clone()),
            Value::Float(_) => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| self.clone()),
            Value::Bool(_) => Value::Bool(matches!(
                trimmed.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "y"
            )),
            Value::List(_) => Value::parse_list(trimmed),
            _ => self.clone(),
        }
    }

    /// Parses a list literal: a JSON array, or comma separated items.
    pub fn parse_list(text: &str) -> Value {
        if text.starts_with('[') {
            if let Ok(value @ Value::List(_)) = serde_json::from_str::<Value>(text) {
                return value;
            }
        }
        Value::List(
            text.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::Text(s.to_string()))
                .collect(),
        )
    }

    /// A canonical string used to match child rows by key.
    ///
    /// Whole floats render like integers so `2` and `2.0` share a key.
    pub fn key_repr(&self) -> String {
        match self {
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{}", *f as i64),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`),
/// so text ordering matches chronological ordering.
impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Text(t.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_maps_onto_variants() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 3, 2.5, "x", [1, "a"]]"#).unwrap();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Bool(true));
        assert_eq!(values[2], Value::Integer(3));
        assert_eq!(values[3], Value::Float(2.5));
        assert_eq!(values[4], Value::Text("x".into()));
        assert_eq!(values[5], Value::List(vec![Value::Integer(1), Value::Text("a".into())]));
    }

    #[test]
    fn numeric_comparison_crosses_types() {
        assert!(Value::Integer(2).loosely_equals(&Value::Float(2.0)));
        assert_eq!(Value::Integer(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
        assert_eq!(Value::from("a").compare(&Value::Integer(1)), None);
    }

    #[test]
    fn coercion_follows_reference_type() {
        assert_eq!(Value::from("42").coerce_like(&Value::Integer(0)), Value::Integer(42));
        assert_eq!(Value::from("4.5").coerce_like(&Value::Float(0.0)), Value::Float(4.5));
        assert_eq!(Value::from("Yes").coerce_like(&Value::Bool(false)), Value::Bool(true));
        assert_eq!(Value::from("no").coerce_like(&Value::Bool(true)), Value::Bool(false));
        assert_eq!(
            Value::from("a, b").coerce_like(&Value::List(vec![])),
            Value::List(vec!["a".into(), "b".into()])
        );
        // unparseable stays text
        assert_eq!(Value::from("abc").coerce_like(&Value::Integer(0)), Value::from("abc"));
    }

    #[test]
    fn list_literal_parsing() {
        assert_eq!(
            Value::parse_list(r#"["Open", "Closed"]"#),
            Value::List(vec!["Open".into(), "Closed".into()])
        );
        assert_eq!(Value::parse_list(""), Value::List(vec![]));
    }

    #[test]
    fn key_repr_normalizes_whole_floats() {
        assert_eq!(Value::Float(2.0).key_repr(), Value::Integer(2).key_repr());
        assert_eq!(Value::from("k").key_repr(), "k");
    }

    #[test]
    fn timestamps_order_as_text() {
        let earlier: Value = DateTime::<Utc>::from_timestamp(1_700_000_000, 5_000).unwrap().into();
        let later: Value = DateTime::<Utc>::from_timestamp(1_700_000_000, 900_000_000).unwrap().into();
        assert_eq!(earlier.compare(&later), Some(Ordering::Less));
    }

    #[test]
    fn blank_values() {
        assert!(Value::Null.is_blank());
        assert!(Value::from("").is_blank());
        assert!(!Value::Integer(0).is_blank());
    }
}
