//! Constraint tree builder.
//!
//! Walks a where-spec and produces the adapter's predicate tree:
//! - entries are split into chunks at `or` markers; chunks are OR-combined
//! - entries of a chunk are AND-combined
//! - nested groups recurse, raw callbacks are used verbatim
//! - `uid` conditions also match translations through the table's
//!   parent-pointer field

use super::facade::BetterQuery;
use super::grammar::parse_condition;
use super::types::FilterValue;
use super::where_spec::{WhereEntry, WhereSpec};
use crate::adapter::QueryAdapter;
use crate::error::{QueryError, QueryResult};

/// Field name of the record identifier.
const UID_FIELD: &str = "uid";

/// Builds predicates for one facade.
pub struct ConstraintBuilder<'a, A: QueryAdapter> {
    query: &'a BetterQuery<A>,
}

impl<'a, A: QueryAdapter> ConstraintBuilder<'a, A> {
    pub fn new(query: &'a BetterQuery<A>) -> Self {
        Self { query }
    }

    fn adapter(&self) -> &'a A {
        self.query.adapter()
    }

    /// Build the predicate of a where-spec. An empty spec yields `None`.
    pub fn build(&self, spec: &WhereSpec<A>) -> QueryResult<Option<A::Predicate>> {
        let chunks = split_chunks(spec.entries());

        if let [chunk] = chunks.as_slice() {
            return self.build_chunk(chunk);
        }

        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            if let Some(predicate) = self.build_chunk(chunk)? {
                parts.push(predicate);
            }
        }

        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.adapter().make_or(parts)))
    }

    fn build_chunk(&self, chunk: &[(usize, &WhereEntry<A>)]) -> QueryResult<Option<A::Predicate>> {
        if chunk.is_empty() {
            return Ok(None);
        }

        let mut nodes = Vec::with_capacity(chunk.len());
        for &(positional, entry) in chunk {
            match entry {
                WhereEntry::Condition { key, value } => nodes.push(self.condition(key, value)?),
                WhereEntry::Raw(raw) => {
                    nodes.push(raw.call(self.adapter().native(), positional, self.query)?);
                }
                WhereEntry::Group(spec) => {
                    if let Some(predicate) = self.build(spec)? {
                        nodes.push(predicate);
                    }
                }
                WhereEntry::Annotation(value) => {
                    tracing::debug!(positional, value = %value, "skipping annotation entry");
                }
                // Separators never end up inside a chunk.
                WhereEntry::Or => {}
            }
        }

        if nodes.is_empty() {
            return Err(QueryError::Build {
                reason: format!(
                    "{} where entries on '{}' produced no constraint",
                    chunk.len(),
                    self.adapter().table_name()
                ),
            });
        }

        Ok(Some(self.adapter().make_and(nodes)))
    }

    fn condition(&self, key: &str, value: &FilterValue) -> QueryResult<A::Predicate> {
        let adapter = self.adapter();
        let token = parse_condition(key, adapter.supports_relation_operators())?;

        if token.field == UID_FIELD
            && !token.operator.is_relation()
            && let Some(parent) = adapter
                .context()
                .schema()
                .parent_pointer_field(adapter.table_name())
        {
            // Negate the pair as a whole: `!=` must exclude the record and
            // its translations alike.
            let own = adapter.make_condition(token.operator, UID_FIELD, value, false)?;
            let translated = adapter.make_condition(token.operator, &parent, value, false)?;
            let either = adapter.make_or(vec![own, translated]);
            return Ok(if token.negated {
                adapter.negate(either)
            } else {
                either
            });
        }

        adapter.make_condition(token.operator, &token.field, value, token.negated)
    }
}

/// Split entries at `or` markers. Entries other than conditions carry their
/// positional key: they are numbered from 0 in order, `or` markers included,
/// while keyed conditions are not counted. Always returns at least one
/// (possibly empty) chunk.
fn split_chunks<A: QueryAdapter>(entries: &[WhereEntry<A>]) -> Vec<Vec<(usize, &WhereEntry<A>)>> {
    let mut chunks = vec![Vec::new()];
    let mut next_key = 0;
    for entry in entries {
        let key = next_key;
        if !matches!(entry, WhereEntry::Condition { .. }) {
            next_key += 1;
        }
        if matches!(entry, WhereEntry::Or) {
            chunks.push(Vec::new());
        } else if let Some(current) = chunks.last_mut() {
            current.push((key, entry));
        }
    }
    chunks
}
