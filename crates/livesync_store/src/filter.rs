//! Comparison operators, filters and queries.

use crate::record::Record;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Comparison operator used by query filters and sync conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Equal.
    #[serde(rename = "==")]
    Eq,
    /// Not equal.
    #[serde(rename = "!=")]
    Ne,
    /// Greater than.
    #[serde(rename = ">")]
    Gt,
    /// Less than.
    #[serde(rename = "<")]
    Lt,
    /// Greater than or equal.
    #[serde(rename = ">=")]
    Ge,
    /// Less than or equal.
    #[serde(rename = "<=")]
    Le,
    /// Member of a list.
    #[serde(rename = "in")]
    In,
    /// Not a member of a list.
    #[serde(rename = "not in")]
    NotIn,
    /// Substring match (text only).
    #[serde(rename = "contains")]
    Contains,
    /// Prefix match (text only).
    #[serde(rename = "starts with")]
    StartsWith,
    /// Suffix match (text only).
    #[serde(rename = "ends with")]
    EndsWith,
}

impl Operator {
    /// All operators in display order.
    pub const ALL: [Operator; 11] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Lt,
        Operator::Ge,
        Operator::Le,
        Operator::In,
        Operator::NotIn,
        Operator::Contains,
        Operator::StartsWith,
        Operator::EndsWith,
    ];

    /// The operator's textual form.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts with",
            Operator::EndsWith => "ends with",
        }
    }

    /// Evaluates `actual <op> expected`.
    ///
    /// Text in `expected` is first coerced to the type of `actual`. Ordering
    /// comparisons involving null or incompatible types are false, and the
    /// text operators only match text on both sides.
    pub fn evaluate(self, actual: &Value, expected: &Value) -> bool {
        match self {
            Operator::Eq => Self::equals(actual, expected),
            Operator::Ne => !Self::equals(actual, expected),
            Operator::Gt => Self::ordered(actual, expected, |o| o == Ordering::Greater),
            Operator::Lt => Self::ordered(actual, expected, |o| o == Ordering::Less),
            Operator::Ge => Self::ordered(actual, expected, |o| o != Ordering::Less),
            Operator::Le => Self::ordered(actual, expected, |o| o != Ordering::Greater),
            Operator::In => Self::member(actual, expected),
            Operator::NotIn => !Self::member(actual, expected),
            Operator::Contains => Self::text(actual, expected, |a, e| a.contains(e)),
            Operator::StartsWith => Self::text(actual, expected, |a, e| a.starts_with(e)),
            Operator::EndsWith => Self::text(actual, expected, |a, e| a.ends_with(e)),
        }
    }

    fn equals(actual: &Value, expected: &Value) -> bool {
        if actual.is_null() || expected.is_null() {
            return actual.is_null() && expected.is_null();
        }
        actual.loosely_equals(&expected.coerce_like(actual))
    }

    fn ordered(actual: &Value, expected: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
        actual
            .compare(&expected.coerce_like(actual))
            .is_some_and(pred)
    }

    fn member(actual: &Value, expected: &Value) -> bool {
        if actual.is_null() {
            return false;
        }
        let list = match expected {
            Value::List(_) => expected.clone(),
            Value::Text(text) => Value::parse_list(text),
            other => Value::List(vec![other.clone()]),
        };
        list.as_list().is_some_and(|items| {
            items
                .iter()
                .any(|item| actual.loosely_equals(&item.coerce_like(actual)))
        })
    }

    fn text(actual: &Value, expected: &Value, pred: impl Fn(&str, &str) -> bool) -> bool {
        match (actual.as_text(), expected.as_text()) {
            (Some(a), Some(e)) => pred(a, e),
            _ => false,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s.trim())
            .ok_or_else(|| format!("unknown operator: {s}"))
    }
}

/// A single `(field, operator, value)` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    /// Field name.
    pub field: String,
    /// Operator.
    pub op: Operator,
    /// Expected value.
    pub value: Value,
}

impl FieldCondition {
    /// Creates a condition.
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Shorthand for an equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    /// Evaluates the condition against a record.
    pub fn matches(&self, record: &Record) -> bool {
        self.op.evaluate(&record.get(&self.field), &self.value)
    }
}

/// A record filter: every `all` condition holds and, when `any` is
/// non-empty, at least one `any` condition holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Conjunctive conditions.
    #[serde(default)]
    pub all: Vec<FieldCondition>,
    /// Disjunctive conditions.
    #[serde(default)]
    pub any: Vec<FieldCondition>,
}

impl Filter {
    /// A filter matching every record.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Adds a conjunctive condition.
    #[must_use]
    pub fn and(mut self, condition: FieldCondition) -> Self {
        self.all.push(condition);
        self
    }

    /// Adds a disjunctive condition.
    #[must_use]
    pub fn or(mut self, condition: FieldCondition) -> Self {
        self.any.push(condition);
        self
    }

    /// Appends the conditions of `other`.
    #[must_use]
    pub fn merge(mut self, other: Filter) -> Self {
        self.all.extend(other.all);
        self.any.extend(other.any);
        self
    }

    /// Returns true if the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty()
    }

    /// Evaluates the filter against a record.
    pub fn matches(&self, record: &Record) -> bool {
        self.all.iter().all(|c| c.matches(record))
            && (self.any.is_empty() || self.any.iter().any(|c| c.matches(record)))
    }
}

/// Result ordering for [`Query`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    /// Store-default order.
    #[default]
    Unordered,
    /// Oldest modification first.
    ModifiedAsc,
    /// Newest modification first.
    ModifiedDesc,
}

/// A find query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Record filter.
    #[serde(default)]
    pub filter: Filter,
    /// Maximum number of identities returned.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Result ordering.
    #[serde(default)]
    pub order: Order,
}

impl Query {
    /// Creates an unlimited, unordered query.
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Sets the limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }
}
