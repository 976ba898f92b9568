//! Backend adapters.
//!
//! An adapter turns parsed where conditions into backend-native predicates,
//! combines them, and finally produces a native query with the compiled root
//! predicate and the settings-derived side constraints applied.
//!
//! - SqlAdapter: sea-query `SelectStatement` / `Condition`
//! - MapperAdapter: object-mapper `MapperQuery` / `Constraint`

mod mapper;
mod sql;

use std::fmt;

use crate::context::QueryContext;
use crate::error::{QueryError, QueryResult};
use crate::query::settings::{LanguageScope, PageRef, PidScope, QuerySettings};
use crate::query::types::{FilterValue, Operator, QuerySort};

pub use mapper::{ComparisonOperator, Constraint, LanguageAspect, MapperAdapter, MapperQuery, MapperSettings};
pub use sql::SqlAdapter;

/// Backend-specific translation of where conditions.
pub trait QueryAdapter: Clone + fmt::Debug + Send + Sync + 'static {
    /// Backend-native predicate (a node of the compiled constraint tree).
    type Predicate: Clone + fmt::Debug + Send + Sync;

    /// Backend-native query object.
    type Native: Clone + fmt::Debug + Send + Sync;

    /// Table the query selects from.
    fn table_name(&self) -> &str;

    fn context(&self) -> &QueryContext;

    /// Whether `has`, `hasany` and `hasall` are available.
    fn supports_relation_operators(&self) -> bool {
        false
    }

    /// Query template handed to raw constraint callbacks.
    fn native(&self) -> &Self::Native;

    /// Translate one condition into a predicate.
    fn make_condition(
        &self,
        operator: Operator,
        field: &str,
        value: &FilterValue,
        negated: bool,
    ) -> QueryResult<Self::Predicate>;

    /// AND-combine predicates. A single predicate is returned unchanged.
    fn make_and(&self, predicates: Vec<Self::Predicate>) -> Self::Predicate;

    /// OR-combine predicates. A single predicate is returned unchanged.
    fn make_or(&self, predicates: Vec<Self::Predicate>) -> Self::Predicate;

    /// Logical negation of a predicate.
    fn negate(&self, predicate: Self::Predicate) -> Self::Predicate;

    /// Produce a fresh native query with `root` and the settings applied.
    fn finalize_constraints(&self, root: Option<Self::Predicate>) -> QueryResult<Self::Native>;

    fn settings(&self) -> &QuerySettings;

    fn settings_mut(&mut self) -> &mut QuerySettings;

    fn set_limit(&mut self, limit: Option<u64>) {
        self.settings_mut().limit = limit;
    }

    fn set_offset(&mut self, offset: Option<u64>) {
        self.settings_mut().offset = offset;
    }

    fn set_orderings(&mut self, orderings: Vec<QuerySort>) {
        self.settings_mut().orderings = orderings;
    }

    fn ensure_array_value(&self, value: FilterValue, context: &str) -> Vec<FilterValue> {
        ensure_array_value(value, context)
    }

    /// Page ids the query is scoped to; `None` when page scoping is off.
    fn resolve_pids(&self) -> QueryResult<Option<Vec<i64>>> {
        resolve_pids(&self.settings().pids, self.context())
    }

    /// Language id the query is scoped to; `None` when no language
    /// constraint applies.
    fn resolve_language(&self) -> Option<i64> {
        let id = match self.settings().language {
            LanguageScope::Disabled => return None,
            LanguageScope::Current => self.context().languages().current_language_id(),
            LanguageScope::Id(id) => id,
        };
        // -1 addresses all languages.
        (id >= 0).then_some(id)
    }
}

/// Normalize a scalar-or-list value into a list.
///
/// Lists are returned unchanged, `Null` becomes an empty list and a
/// comma-separated string is split into its trimmed parts.
pub fn ensure_array_value(value: FilterValue, context: &str) -> Vec<FilterValue> {
    match value {
        FilterValue::List(items) => items,
        FilterValue::Null => Vec::new(),
        FilterValue::String(s) if s.contains(',') => {
            tracing::trace!(context = %context, value = %s, "splitting comma-separated value");
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| match part.parse::<i64>() {
                    Ok(i) => FilterValue::Integer(i),
                    Err(_) => FilterValue::String(part.to_string()),
                })
                .collect()
        }
        scalar => vec![scalar],
    }
}

fn resolve_pids(scope: &PidScope, ctx: &QueryContext) -> QueryResult<Option<Vec<i64>>> {
    let pids = match scope {
        PidScope::Disabled => return Ok(None),
        PidScope::Current => ctx.pages().current_page_ids(),
        PidScope::Pages(refs) => refs
            .iter()
            .map(|r| match r {
                PageRef::Id(id) => Ok(*id),
                PageRef::Symbol(symbol) => ctx
                    .pages()
                    .resolve(symbol)
                    .ok_or_else(|| QueryError::UnresolvedPage(symbol.clone())),
            })
            .collect::<QueryResult<Vec<_>>>()?,
    };

    if pids.is_empty() {
        tracing::debug!("no storage pages resolved; page scoping skipped");
        return Ok(None);
    }
    Ok(Some(pids))
}

/// Combine a list through `combine` unless it holds exactly one element.
pub(crate) fn combine_unless_single<P>(predicates: Vec<P>, combine: impl FnOnce(Vec<P>) -> P) -> P {
    match <[P; 1]>::try_from(predicates) {
        Ok([single]) => single,
        Err(predicates) => combine(predicates),
    }
}
