//! Typed where-spec.
//!
//! A where-spec is an ordered list of entries. String keys become
//! conditions, positional entries are nested groups, raw callbacks, `or`
//! chunk separators or annotations. JSON input is parsed into this form once,
//! before any tree building happens.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::facade::BetterQuery;
use super::types::FilterValue;
use crate::adapter::QueryAdapter;
use crate::error::{QueryError, QueryResult};

/// Callback producing a backend predicate the where-spec cannot express.
///
/// Invoked with the adapter's query template, the entry's positional key
/// and the facade being compiled. Positional keys number the entries that
/// are not keyed conditions (groups, `or` markers, annotations and raw
/// callbacks) from 0, so `[("a", 1), raw]` calls the callback with 0.
pub type RawFn<A> = dyn Fn(
        &<A as QueryAdapter>::Native,
        usize,
        &BetterQuery<A>,
    ) -> QueryResult<<A as QueryAdapter>::Predicate>
    + Send
    + Sync;

/// A raw constraint callback.
pub struct RawConstraint<A: QueryAdapter> {
    callback: Arc<RawFn<A>>,
}

impl<A: QueryAdapter> RawConstraint<A> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&A::Native, usize, &BetterQuery<A>) -> QueryResult<A::Predicate>
            + Send
            + Sync
            + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub(crate) fn call(
        &self,
        native: &A::Native,
        position: usize,
        query: &BetterQuery<A>,
    ) -> QueryResult<A::Predicate> {
        (self.callback)(native, position, query)
    }
}

impl<A: QueryAdapter> Clone for RawConstraint<A> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<A: QueryAdapter> fmt::Debug for RawConstraint<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawConstraint(..)")
    }
}

/// One entry of a where-spec.
#[derive(Debug, Clone)]
pub enum WhereEntry<A: QueryAdapter> {
    /// `"field [!]operator" => value`
    Condition { key: String, value: FilterValue },
    /// Nested where-spec, AND-combined.
    Group(WhereSpec<A>),
    /// Raw predicate callback.
    Raw(RawConstraint<A>),
    /// Chunk separator; chunks are OR-combined.
    Or,
    /// Positional scalar that carries no constraint.
    Annotation(FilterValue),
}

/// Ordered where-spec entries.
#[derive(Debug, Clone)]
pub struct WhereSpec<A: QueryAdapter> {
    entries: Vec<WhereEntry<A>>,
}

impl<A: QueryAdapter> Default for WhereSpec<A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<A: QueryAdapter> WhereSpec<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition such as `("title like", "%rust%")`.
    pub fn condition(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.entries.push(WhereEntry::Condition {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Start a new OR chunk.
    pub fn or(mut self) -> Self {
        self.entries.push(WhereEntry::Or);
        self
    }

    pub fn group(mut self, spec: WhereSpec<A>) -> Self {
        self.entries.push(WhereEntry::Group(spec));
        self
    }

    pub fn raw<F>(mut self, callback: F) -> Self
    where
        F: Fn(&A::Native, usize, &BetterQuery<A>) -> QueryResult<A::Predicate>
            + Send
            + Sync
            + 'static,
    {
        self.entries.push(WhereEntry::Raw(RawConstraint::new(callback)));
        self
    }

    pub fn annotation(mut self, value: impl Into<FilterValue>) -> Self {
        self.entries.push(WhereEntry::Annotation(value.into()));
        self
    }

    pub fn push(&mut self, entry: WhereEntry<A>) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[WhereEntry<A>] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Parse a JSON where-spec.
    ///
    /// Objects map string keys to conditions; keys made only of digits are
    /// positional. Arrays are read as positional entries. A positional object
    /// or array is a nested group, the string `"or"` (any case) separates
    /// chunks and any other scalar is an annotation.
    pub fn from_json(value: &Value) -> QueryResult<Self> {
        let mut spec = Self::new();
        match value {
            Value::Object(map) => {
                for (key, value) in map {
                    let entry = if is_positional_key(key) {
                        positional_entry(value)?
                    } else {
                        let value = FilterValue::from_json(value).ok_or_else(|| {
                            QueryError::invalid_value(
                                key,
                                "objects are only allowed under positional keys",
                            )
                        })?;
                        WhereEntry::Condition {
                            key: key.clone(),
                            value,
                        }
                    };
                    spec.push(entry);
                }
            }
            Value::Array(items) => {
                for item in items {
                    spec.push(positional_entry(item)?);
                }
            }
            Value::Null => {}
            other => {
                return Err(QueryError::invalid_value(
                    "<root>",
                    format!("expected an object or array, got {other}"),
                ));
            }
        }
        Ok(spec)
    }
}

impl<A: QueryAdapter> FromIterator<WhereEntry<A>> for WhereSpec<A> {
    fn from_iter<I: IntoIterator<Item = WhereEntry<A>>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn is_positional_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

fn positional_entry<A: QueryAdapter>(value: &Value) -> QueryResult<WhereEntry<A>> {
    Ok(match value {
        Value::Object(_) | Value::Array(_) => WhereEntry::Group(WhereSpec::from_json(value)?),
        Value::String(s) if s.trim().eq_ignore_ascii_case("or") => WhereEntry::Or,
        scalar => WhereEntry::Annotation(FilterValue::from_json(scalar).unwrap_or(FilterValue::Null)),
    })
}
