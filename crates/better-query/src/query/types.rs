//! Query value and token types.
//!
//! Provides the building blocks shared by the grammar, the tree builder and
//! both adapters:
//! - FilterValue: loosely-typed leaf value of a where condition
//! - Operator / ConditionToken: parsed form of a where key
//! - QuerySort / SortDirection: ordering specification
//! - PageResult: one page of results with paging calculations

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Filter value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// SQL NULL / missing value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Float value.
    Float(f64),
    /// String value.
    String(String),
    /// List of values (for `in`, `hasany`, `hasall`).
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Convert a JSON value. Objects have no filter representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => Some(FilterValue::Null),
            Value::Bool(b) => Some(FilterValue::Boolean(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FilterValue::Integer(i)),
                None => n.as_f64().map(FilterValue::Float),
            },
            Value::String(s) => Some(FilterValue::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(FilterValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(FilterValue::List),
            Value::Object(_) => None,
        }
    }

    /// Convert to string representation.
    pub fn as_string(&self) -> Option<String> {
        match self {
            FilterValue::String(s) => Some(s.clone()),
            FilterValue::Integer(i) => Some(i.to_string()),
            FilterValue::Float(f) => Some(f.to_string()),
            FilterValue::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Convert to integer if possible.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FilterValue::Integer(i) => Some(*i),
            FilterValue::String(s) => s.trim().parse().ok(),
            FilterValue::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FilterValue::Null)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FilterValue::List(_))
    }

    /// Loose equality used by in-memory evaluation: integers, numeric strings
    /// and booleans compare by numeric value, everything else structurally.
    pub fn loose_eq(&self, other: &FilterValue) -> bool {
        match (self, other) {
            (FilterValue::Float(a), b) | (b, FilterValue::Float(a)) => {
                b.as_f64().is_some_and(|b| (*a - b).abs() < f64::EPSILON)
            }
            (FilterValue::String(a), FilterValue::String(b)) => a == b,
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => a == b,
            },
        }
    }

    /// Convert to float if possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Float(f) => Some(*f),
            FilterValue::Integer(i) => Some(*i as f64),
            FilterValue::String(s) => s.trim().parse().ok(),
            FilterValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Null => f.write_str("NULL"),
            FilterValue::Boolean(b) => write!(f, "{b}"),
            FilterValue::Integer(i) => write!(f, "{i}"),
            FilterValue::Float(x) => write!(f, "{x}"),
            FilterValue::String(s) => write!(f, "'{s}'"),
            FilterValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Integer(i64::from(value))
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        FilterValue::Integer(i64::from(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FilterValue::Null, Into::into)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>, const N: usize> From<[T; N]> for FilterValue {
    fn from(values: [T; N]) -> Self {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Comparison operators accepted in where keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// `=` (implicit when a key has no operator).
    Equals,
    /// `!=`
    NotEquals,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessOrEqual,
    /// `in`: value in list.
    In,
    /// `like`: `%` in the value is a wildcard.
    Like,
    /// `has`: relation contains the value (object mapper only).
    Has,
    /// `hasany`: relation contains any of the values (object mapper only).
    HasAny,
    /// `hasall`: relation contains all of the values (object mapper only).
    HasAll,
}

impl Operator {
    /// Operators every adapter understands.
    pub const BASIC: [Operator; 8] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::GreaterThan,
        Operator::GreaterOrEqual,
        Operator::LessThan,
        Operator::LessOrEqual,
        Operator::In,
        Operator::Like,
    ];

    /// Relation-traversal operators.
    pub const RELATION: [Operator; 3] = [Operator::Has, Operator::HasAny, Operator::HasAll];

    /// The token written in a where key.
    pub const fn token(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::In => "in",
            Operator::Like => "like",
            Operator::Has => "has",
            Operator::HasAny => "hasany",
            Operator::HasAll => "hasall",
        }
    }

    pub const fn is_relation(self) -> bool {
        matches!(self, Operator::Has | Operator::HasAny | Operator::HasAll)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A parsed where key: field, operator and negation flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionToken {
    pub field: String,
    pub operator: Operator,
    pub negated: bool,
}

/// Sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySort {
    /// Field to sort by.
    pub field: String,

    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl QuerySort {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction '{other}'")),
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// Rows on this page.
    pub items: Vec<serde_json::Value>,

    /// Total count (before paging).
    pub total: u64,

    /// Current page number (1-indexed).
    pub page: u32,

    /// Items per page.
    pub per_page: u32,

    /// Total number of pages.
    pub total_pages: u32,

    /// Whether there's a next page.
    pub has_next: bool,

    /// Whether there's a previous page.
    pub has_prev: bool,
}

impl PageResult {
    /// Create a new result with paging calculations.
    pub fn new(items: Vec<serde_json::Value>, total: u64, page: u32, per_page: u32) -> Self {
        let total_pages = page_count(total, per_page);

        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// Number of pages needed for `total` rows. A zero page size means one page.
pub(crate) fn page_count(total: u64, per_page: u32) -> u32 {
    if per_page == 0 {
        return 1;
    }
    u32::try_from(total.div_ceil(u64::from(per_page))).unwrap_or(u32::MAX)
}
