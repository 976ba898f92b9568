//! SQL adapter using SeaQuery.
//!
//! Compiles where conditions into sea-query `Condition`s and finalizes them
//! into a `SelectStatement` with support for:
//! - Enable fields (deleted, hidden, start/end time)
//! - Storage page scoping
//! - Language scoping with overlay modes
//! - Ordering and pagination

use sea_query::{
    Alias, Asterisk, Cond, Condition, Expr, ExprTrait, Order, PostgresQueryBuilder, Query,
    SelectStatement, SimpleExpr,
};

use super::{QueryAdapter, combine_unless_single};
use crate::context::{QueryContext, TableSchema};
use crate::error::{QueryError, QueryResult};
use crate::query::settings::{OverlayMode, QuerySettings};
use crate::query::types::{FilterValue, Operator, SortDirection};

/// Adapter targeting a raw SQL query builder.
#[derive(Debug, Clone)]
pub struct SqlAdapter {
    table: String,
    base: SelectStatement,
    settings: QuerySettings,
    context: QueryContext,
}

impl SqlAdapter {
    /// Create an adapter selecting every column of `table`.
    pub fn new(table: impl Into<String>, context: QueryContext) -> Self {
        let table = table.into();
        let mut base = Query::select();
        base.column((Alias::new(&table), Asterisk))
            .from(Alias::new(&table));

        Self {
            table,
            base,
            settings: QuerySettings::default(),
            context,
        }
    }

    /// Replace the initial settings.
    pub fn with_settings(mut self, settings: QuerySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Render a statement for PostgreSQL.
    pub fn to_sql(query: &SelectStatement) -> String {
        query.to_string(PostgresQueryBuilder)
    }

    /// Column of the base table, or `table.column` for dotted fields.
    fn field_expr(&self, field: &str) -> SimpleExpr {
        match field.split_once('.') {
            Some((table, column)) => Expr::col((Alias::new(table), Alias::new(column))).into(),
            None => Expr::col((Alias::new(&self.table), Alias::new(field))).into(),
        }
    }

    /// Enable-field filters unless hidden/deleted records are included.
    fn enable_field_filters(&self, schema: &TableSchema) -> Vec<SimpleExpr> {
        let mut filters = Vec::new();

        if !self.settings.include_deleted
            && let Some(ref deleted) = schema.deleted_field
        {
            filters.push(self.field_expr(deleted).eq(0));
        }

        if self.settings.include_hidden {
            return filters;
        }

        let now = self.context.now();
        if let Some(ref hidden) = schema.hidden_field {
            filters.push(self.field_expr(hidden).eq(0));
        }
        if let Some(ref start) = schema.start_time_field {
            filters.push(self.field_expr(start).lte(now));
        }
        if let Some(ref end) = schema.end_time_field {
            filters.push(
                Cond::any()
                    .add(self.field_expr(end).eq(0))
                    .add(self.field_expr(end).gt(now))
                    .into(),
            );
        }
        filters
    }

    /// Storage page filter.
    ///
    /// Uses `= $val` for a single page, `IN (...)` for several.
    fn storage_page_filter(&self, schema: &TableSchema, pids: &[i64]) -> SimpleExpr {
        let col = self.field_expr(&schema.storage_page_field);
        match pids {
            [single] => col.eq(*single),
            many => col.is_in(many.iter().copied()),
        }
    }

    /// Language filter for translatable tables.
    fn language_filter(&self, schema: &TableSchema) -> Option<SimpleExpr> {
        let field = schema.language_field.as_deref()?;
        let id = self.resolve_language()?;
        let col = self.field_expr(field);

        if id == 0 {
            return Some(col.is_in([0, -1]));
        }

        match self.settings.overlay_mode {
            OverlayMode::Off => Some(col.is_in([id, -1])),
            OverlayMode::Mixed => Some(col.is_in([0, -1])),
            OverlayMode::Strict => match schema.parent_pointer_field.as_deref() {
                Some(parent) => Some(self.strict_overlay_filter(field, parent, id)),
                None => {
                    tracing::warn!(
                        table = %self.table,
                        "strict overlay needs a parent pointer field; selecting records in the requested language"
                    );
                    Some(col.is_in([id, -1]))
                }
            },
        }
    }

    /// Default-language records that have a translation in `id`, plus
    /// records marked for all languages.
    fn strict_overlay_filter(&self, language_field: &str, parent_field: &str, id: i64) -> SimpleExpr {
        let translation = Alias::new("translation");
        let translated_parents = Query::select()
            .column((translation.clone(), Alias::new(parent_field)))
            .from_as(Alias::new(&self.table), translation.clone())
            .and_where(Expr::col((translation, Alias::new(language_field))).eq(id))
            .to_owned();

        Cond::any()
            .add(self.field_expr(language_field).eq(-1))
            .add(
                Cond::all()
                    .add(self.field_expr(language_field).eq(0))
                    .add(
                        Expr::col((Alias::new(&self.table), Alias::new("uid")))
                            .in_subquery(translated_parents),
                    ),
            )
            .into()
    }

    /// Add ORDER BY clauses.
    fn add_sorts(&self, query: &mut SelectStatement) {
        for sort in &self.settings.orderings {
            let order = match sort.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            query.order_by_expr(self.field_expr(&sort.field), order);
        }
    }
}

impl QueryAdapter for SqlAdapter {
    type Predicate = Condition;
    type Native = SelectStatement;

    fn table_name(&self) -> &str {
        &self.table
    }

    fn context(&self) -> &QueryContext {
        &self.context
    }

    fn native(&self) -> &SelectStatement {
        &self.base
    }

    fn make_condition(
        &self,
        operator: Operator,
        field: &str,
        value: &FilterValue,
        negated: bool,
    ) -> QueryResult<Condition> {
        let key = format!("{field} {operator}");
        let col = self.field_expr(field);

        let expr = match operator {
            Operator::Equals => match value {
                FilterValue::Null => col.is_null(),
                FilterValue::List(items) => col.is_in(sql_values(&key, items)?),
                scalar => col.eq(sql_value(&key, scalar)?),
            },
            Operator::NotEquals => match value {
                FilterValue::Null => col.is_not_null(),
                FilterValue::List(items) => col.is_not_in(sql_values(&key, items)?),
                scalar => col.ne(sql_value(&key, scalar)?),
            },
            Operator::GreaterThan => col.gt(sql_value(&key, value)?),
            Operator::GreaterOrEqual => col.gte(sql_value(&key, value)?),
            Operator::LessThan => col.lt(sql_value(&key, value)?),
            Operator::LessOrEqual => col.lte(sql_value(&key, value)?),
            Operator::In => {
                let items = self.ensure_array_value(value.clone(), &key);
                col.is_in(sql_values(&key, &items)?)
            }
            Operator::Like => {
                let pattern = value
                    .as_string()
                    .ok_or_else(|| QueryError::invalid_value(&key, "like expects a scalar"))?;
                col.like(pattern)
            }
            Operator::Has | Operator::HasAny | Operator::HasAll => {
                return Err(QueryError::grammar(
                    &key,
                    format!("operator '{operator}' is not supported by the SQL adapter"),
                ));
            }
        };

        let condition = Cond::all().add(expr);
        Ok(if negated { condition.not() } else { condition })
    }

    fn make_and(&self, predicates: Vec<Condition>) -> Condition {
        combine_unless_single(predicates, |all| {
            all.into_iter().fold(Cond::all(), |cond, p| cond.add(p))
        })
    }

    fn make_or(&self, predicates: Vec<Condition>) -> Condition {
        combine_unless_single(predicates, |all| {
            all.into_iter().fold(Cond::any(), |cond, p| cond.add(p))
        })
    }

    fn negate(&self, predicate: Condition) -> Condition {
        predicate.not()
    }

    fn finalize_constraints(&self, root: Option<Condition>) -> QueryResult<SelectStatement> {
        let schema = self.context.table_schema(&self.table);
        let mut parts: Vec<Condition> = root.into_iter().collect();

        for filter in self.enable_field_filters(&schema) {
            parts.push(Cond::all().add(filter));
        }
        if let Some(pids) = self.resolve_pids()? {
            parts.push(Cond::all().add(self.storage_page_filter(&schema, &pids)));
        }
        if let Some(filter) = self.language_filter(&schema) {
            parts.push(Cond::all().add(filter));
        }

        let mut query = self.base.clone();
        if !parts.is_empty() {
            query.cond_where(parts.into_iter().fold(Cond::all(), |cond, p| cond.add(p)));
        }

        self.add_sorts(&mut query);

        if let Some(limit) = self.settings.limit {
            query.limit(limit);
        }
        if let Some(offset) = self.settings.offset {
            query.offset(offset);
        }

        tracing::trace!(table = %self.table, sql = %Self::to_sql(&query), "finalized sql query");
        Ok(query)
    }

    fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut QuerySettings {
        &mut self.settings
    }
}

fn sql_value(key: &str, value: &FilterValue) -> QueryResult<sea_query::Value> {
    match value {
        FilterValue::Null => Ok(Option::<String>::None.into()),
        FilterValue::Boolean(b) => Ok((*b).into()),
        FilterValue::Integer(i) => Ok((*i).into()),
        FilterValue::Float(f) => Ok((*f).into()),
        FilterValue::String(s) => Ok(s.clone().into()),
        FilterValue::List(_) => Err(QueryError::invalid_value(
            key,
            "a list is only valid with '=', '!=' or 'in'",
        )),
    }
}

fn sql_values(key: &str, values: &[FilterValue]) -> QueryResult<Vec<sea_query::Value>> {
    values.iter().map(|v| sql_value(key, v)).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::{FixedLanguage, StaticPages, StaticSchema};
    use crate::query::settings::{LanguageScope, PidScope};
    use crate::query::types::QuerySort;

    const NOW: i64 = 1_700_000_000;

    fn content_schema() -> TableSchema {
        TableSchema {
            language_field: Some("sys_language_uid".to_string()),
            parent_pointer_field: Some("l10n_parent".to_string()),
            deleted_field: Some("deleted".to_string()),
            hidden_field: Some("hidden".to_string()),
            start_time_field: Some("starttime".to_string()),
            end_time_field: Some("endtime".to_string()),
            ..Default::default()
        }
    }

    fn adapter(table: &str, language: i64) -> SqlAdapter {
        let schema = StaticSchema::default().with_table("tt_content", content_schema());
        let ctx = QueryContext::new(
            Arc::new(schema),
            Arc::new(StaticPages {
                current: vec![1],
                ..Default::default()
            }),
            Arc::new(FixedLanguage(language)),
        )
        .with_fixed_time(NOW);
        SqlAdapter::new(table, ctx)
    }

    fn sql_of(adapter: &SqlAdapter, condition: Condition) -> String {
        let mut plain = adapter.clone();
        plain.settings_mut().pids = PidScope::Disabled;
        plain.settings_mut().language = LanguageScope::Disabled;
        SqlAdapter::to_sql(&plain.finalize_constraints(Some(condition)).unwrap())
    }

    #[test]
    fn equals_condition() {
        let a = adapter("tx_news", 0);
        let cond = a
            .make_condition(Operator::Equals, "title", &"rust".into(), false)
            .unwrap();
        let sql = sql_of(&a, cond);
        assert!(sql.contains(r#""tx_news"."title" = 'rust'"#), "{sql}");
    }

    #[test]
    fn equals_null_becomes_is_null() {
        let a = adapter("tx_news", 0);
        let cond = a
            .make_condition(Operator::Equals, "teaser", &FilterValue::Null, false)
            .unwrap();
        assert!(sql_of(&a, cond).contains("IS NULL"));

        let cond = a
            .make_condition(Operator::NotEquals, "teaser", &FilterValue::Null, false)
            .unwrap();
        assert!(sql_of(&a, cond).contains("IS NOT NULL"));
    }

    #[test]
    fn in_condition_with_list_and_scalar() {
        let a = adapter("tx_news", 0);
        let cond = a
            .make_condition(Operator::In, "status", &[1, 2, 3].into(), false)
            .unwrap();
        let sql = sql_of(&a, cond);
        assert!(sql.contains(r#""status" IN (1, 2, 3)"#), "{sql}");

        let cond = a
            .make_condition(Operator::In, "status", &FilterValue::from(4), false)
            .unwrap();
        let sql = sql_of(&a, cond);
        assert!(sql.contains(r#""status" IN (4)"#), "{sql}");
    }

    #[test]
    fn like_keeps_wildcards() {
        let a = adapter("tx_news", 0);
        let cond = a
            .make_condition(Operator::Like, "name", &"%foo%".into(), false)
            .unwrap();
        let sql = sql_of(&a, cond);
        assert!(sql.contains(r#""name" LIKE '%foo%'"#), "{sql}");
    }

    #[test]
    fn negation_wraps_in_not() {
        let a = adapter("tx_news", 0);
        let cond = a
            .make_condition(Operator::Like, "name", &"%foo%".into(), true)
            .unwrap();
        let sql = sql_of(&a, cond);
        assert!(sql.contains("NOT"), "{sql}");
        assert!(sql.contains(r#""name" LIKE '%foo%'"#), "{sql}");
    }

    #[test]
    fn comparison_rejects_lists() {
        let a = adapter("tx_news", 0);
        let err = a
            .make_condition(Operator::GreaterThan, "age", &[1, 2].into(), false)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidValue { .. }));
    }

    #[test]
    fn relation_operators_are_rejected() {
        let a = adapter("tx_news", 0);
        assert!(!a.supports_relation_operators());
        let err = a
            .make_condition(Operator::Has, "company.uid", &12.into(), false)
            .unwrap_err();
        assert!(matches!(err, QueryError::Grammar { .. }));
    }

    #[test]
    fn compiled_statements_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Condition>();
        assert_send_sync::<SelectStatement>();
        assert_send_sync::<SqlAdapter>();
    }

    #[test]
    fn negate_wraps_combined_condition() {
        let a = adapter("tt_content", 0);
        let either = a.make_or(vec![
            a.make_condition(Operator::Equals, "uid", &12.into(), false)
                .unwrap(),
            a.make_condition(Operator::Equals, "l10n_parent", &12.into(), false)
                .unwrap(),
        ]);
        let sql = sql_of(&a, a.negate(either));
        assert!(sql.contains("NOT ("), "{sql}");
        assert!(
            sql.contains(r#""tt_content"."uid" = 12 OR "tt_content"."l10n_parent" = 12"#),
            "{sql}"
        );
    }

    #[test]
    fn dotted_field_addresses_joined_table() {
        let a = adapter("tx_news", 0);
        let cond = a
            .make_condition(Operator::Equals, "category.title", &"x".into(), false)
            .unwrap();
        assert!(sql_of(&a, cond).contains(r#""category"."title" = 'x'"#));
    }

    #[test]
    fn single_predicate_is_not_wrapped() {
        let a = adapter("tx_news", 0);
        let cond = a
            .make_condition(Operator::Equals, "uid", &1.into(), false)
            .unwrap();
        let combined = a.make_and(vec![cond.clone()]);
        assert_eq!(sql_of(&a, combined), sql_of(&a, cond));
    }

    #[test]
    fn or_combination_renders_or() {
        let a = adapter("tx_news", 0);
        let left = a
            .make_condition(Operator::Equals, "uid", &1.into(), false)
            .unwrap();
        let right = a
            .make_condition(Operator::Equals, "uid", &2.into(), false)
            .unwrap();
        let sql = sql_of(&a, a.make_or(vec![left, right]));
        assert!(sql.contains(r#""uid" = 1 OR "tx_news"."uid" = 2"#), "{sql}");
    }

    #[test]
    fn enable_fields_applied_by_default() {
        let a = adapter("tt_content", 0);
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());

        assert!(sql.contains(r#""tt_content"."deleted" = 0"#), "{sql}");
        assert!(sql.contains(r#""tt_content"."hidden" = 0"#), "{sql}");
        assert!(sql.contains(&format!(r#""tt_content"."starttime" <= {NOW}"#)), "{sql}");
        assert!(sql.contains(&format!(r#""tt_content"."endtime" > {NOW}"#)), "{sql}");
    }

    #[test]
    fn include_hidden_and_deleted_drop_enable_fields() {
        let mut a = adapter("tt_content", 0);
        a.settings_mut().include_hidden = true;
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(!sql.contains("hidden"), "{sql}");
        assert!(!sql.contains("starttime"), "{sql}");
        assert!(sql.contains("deleted"), "{sql}");

        a.settings_mut().include_deleted = true;
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(!sql.contains("deleted"), "{sql}");
    }

    #[test]
    fn storage_pages_single_and_many() {
        let mut a = adapter("tx_news", 0);
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(sql.contains(r#""tx_news"."pid" = 1"#), "{sql}");

        a.settings_mut().pids = PidScope::from_value(vec![4, 5].into());
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(sql.contains(r#""tx_news"."pid" IN (4, 5)"#), "{sql}");

        a.settings_mut().pids = PidScope::Disabled;
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(!sql.contains("pid"), "{sql}");
        assert!(!sql.contains("WHERE"), "{sql}");
    }

    #[test]
    fn language_default_selects_default_and_all() {
        let a = adapter("tt_content", 0);
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(sql.contains(r#""sys_language_uid" IN (0, -1)"#), "{sql}");
    }

    #[test]
    fn language_overlay_modes() {
        let mut a = adapter("tt_content", 2);

        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(sql.contains(r#""sys_language_uid" IN (0, -1)"#), "mixed: {sql}");

        a.settings_mut().overlay_mode = OverlayMode::Off;
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(sql.contains(r#""sys_language_uid" IN (2, -1)"#), "off: {sql}");

        a.settings_mut().overlay_mode = OverlayMode::Strict;
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(sql.contains(r#""translation"."l10n_parent""#), "strict: {sql}");
        assert!(sql.contains(r#""translation"."sys_language_uid" = 2"#), "strict: {sql}");
    }

    #[test]
    fn language_skipped_for_untranslatable_tables_and_all_languages() {
        let a = adapter("tx_news", 2);
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(!sql.contains("sys_language_uid"), "{sql}");

        let mut a = adapter("tt_content", 0);
        a.settings_mut().language = LanguageScope::Id(-1);
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());
        assert!(!sql.contains("sys_language_uid"), "{sql}");
    }

    #[test]
    fn orderings_limit_offset() {
        let mut a = adapter("tx_news", 0);
        a.set_orderings(vec![
            QuerySort::new("sticky", SortDirection::Desc),
            QuerySort::new("title", SortDirection::Asc),
        ]);
        a.set_limit(Some(10));
        a.set_offset(Some(20));
        let sql = SqlAdapter::to_sql(&a.finalize_constraints(None).unwrap());

        assert!(
            sql.contains(r#"ORDER BY "tx_news"."sticky" DESC, "tx_news"."title" ASC"#),
            "{sql}"
        );
        assert!(sql.contains("LIMIT 10"), "{sql}");
        assert!(sql.contains("OFFSET 20"), "{sql}");
    }

    #[test]
    fn finalize_does_not_touch_template() {
        let a = adapter("tx_news", 0);
        let _ = a.finalize_constraints(None).unwrap();
        let template = SqlAdapter::to_sql(a.native());
        assert_eq!(template, r#"SELECT "tx_news".* FROM "tx_news""#);
    }
}
