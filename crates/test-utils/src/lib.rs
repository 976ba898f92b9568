//! BetterQuery test utilities.
//!
//! Helpers for integration testing: a fixture schema and context, a SQL
//! executor that records statements, and an in-memory repository that
//! evaluates object-mapper queries over JSON records.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sea_query::SelectStatement;
use serde_json::Value as JsonValue;

use better_query::adapter::{ComparisonOperator, Constraint, MapperAdapter, MapperQuery};
use better_query::context::{FixedLanguage, QueryContext, StaticPages, StaticSchema, TableSchema};
use better_query::query::{FilterValue, OverlayMode, SortDirection};
use better_query::{BetterQuery, QueryExecutor, SqlAdapter};

/// Clock used by fixture contexts.
pub const FIXED_TIME: i64 = 1_700_000_000;

/// Current page of fixture contexts.
pub const CURRENT_PAGE: i64 = 1;

/// Page id behind the `storage` symbol.
pub const STORAGE_PAGE: i64 = 12;

/// Translatable content table with all control fields.
pub fn content_schema() -> TableSchema {
    TableSchema {
        language_field: Some("sys_language_uid".to_string()),
        parent_pointer_field: Some("l10n_parent".to_string()),
        deleted_field: Some("deleted".to_string()),
        hidden_field: Some("hidden".to_string()),
        start_time_field: Some("starttime".to_string()),
        end_time_field: Some("endtime".to_string()),
        ..TableSchema::default()
    }
}

/// Table without a parent-pointer field.
pub fn news_schema() -> TableSchema {
    TableSchema {
        deleted_field: Some("deleted".to_string()),
        hidden_field: Some("hidden".to_string()),
        ..TableSchema::default()
    }
}

/// `tt_content` (translatable) and `tx_news` (not translatable).
pub fn fixture_schema() -> StaticSchema {
    StaticSchema::default()
        .with_table("tt_content", content_schema())
        .with_table("tx_news", news_schema())
}

/// Context with the fixture schema, page 1 as current page, the `storage`
/// symbol, language 0 and a fixed clock.
pub fn fixture_context() -> QueryContext {
    fixture_context_in_language(0)
}

pub fn fixture_context_in_language(language: i64) -> QueryContext {
    QueryContext::new(
        Arc::new(fixture_schema()),
        Arc::new(StaticPages {
            current: vec![CURRENT_PAGE],
            symbols: HashMap::from([("storage".to_string(), STORAGE_PAGE)]),
        }),
        Arc::new(FixedLanguage(language)),
    )
    .with_fixed_time(FIXED_TIME)
}

/// SQL query on `table` with the fixture context.
pub fn sql_query(table: &str) -> BetterQuery<SqlAdapter> {
    BetterQuery::new(SqlAdapter::new(table, fixture_context()))
}

/// SQL query without page and language scoping, so only the where-spec and
/// enable fields show up in the statement.
pub fn bare_sql_query(table: &str) -> BetterQuery<SqlAdapter> {
    sql_query(table)
        .with_pids(false)
        .with_language(false, Default::default())
}

/// Mapper query for the `News` entity stored in `tx_news`.
pub fn news_query() -> BetterQuery<MapperAdapter> {
    BetterQuery::new(MapperAdapter::new("News", "tx_news", fixture_context()))
}

/// Records returned by [`news_repository`].
pub fn news_records() -> Vec<JsonValue> {
    vec![
        serde_json::json!({
            "uid": 1, "pid": 1, "title": "Rust 2024 released", "hidden": 0, "deleted": 0,
            "sys_language_uid": 0, "views": 120,
            "company": {"uid": 12, "name": "Ferrous"},
            "tags": [{"uid": 1}, {"uid": 2}]
        }),
        serde_json::json!({
            "uid": 2, "pid": 1, "title": "Async traits", "hidden": 0, "deleted": 0,
            "sys_language_uid": 0, "views": 80,
            "company": {"uid": 7, "name": "Tokio Labs"},
            "tags": [{"uid": 2}, {"uid": 3}]
        }),
        serde_json::json!({
            "uid": 3, "pid": 12, "title": "Storage news", "hidden": 0, "deleted": 0,
            "sys_language_uid": 0, "views": 5,
            "company": {"uid": 12, "name": "Ferrous"},
            "tags": [{"uid": 3}]
        }),
        serde_json::json!({
            "uid": 4, "pid": 1, "title": "Hidden draft", "hidden": 1, "deleted": 0,
            "sys_language_uid": 0, "views": 0,
            "company": {"uid": 12, "name": "Ferrous"},
            "tags": []
        }),
        serde_json::json!({
            "uid": 5, "pid": 1, "title": "Removed post", "hidden": 0, "deleted": 1,
            "sys_language_uid": 0, "views": 300,
            "company": {"uid": 7, "name": "Tokio Labs"},
            "tags": [{"uid": 1}]
        }),
        serde_json::json!({
            "uid": 6, "pid": 1, "title": "Rust 2024 veröffentlicht", "hidden": 0, "deleted": 0,
            "sys_language_uid": 1, "l10n_parent": 1, "views": 40,
            "company": {"uid": 12, "name": "Ferrous"},
            "tags": [{"uid": 1}]
        }),
    ]
}

/// Repository holding [`news_records`].
pub fn news_repository() -> Arc<MemoryRepository> {
    Arc::new(MemoryRepository::new(news_records()))
}

/// SQL executor that records every statement and answers canned rows.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<String>>,
    rows: Vec<JsonValue>,
    count: u64,
    failure: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `fetch_all` with `rows`.
    pub fn with_rows(mut self, rows: Vec<JsonValue>) -> Self {
        self.rows = rows;
        self
    }

    /// Answer `fetch_count` with `count`.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Fail every call with `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Statements executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn last_statement(&self) -> Option<String> {
        self.statements.lock().last().cloned()
    }

    fn record(&self, query: &SelectStatement) -> anyhow::Result<()> {
        self.statements.lock().push(SqlAdapter::to_sql(query));
        match &self.failure {
            Some(message) => Err(anyhow::anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl QueryExecutor<SelectStatement> for RecordingExecutor {
    async fn fetch_all(&self, query: &SelectStatement) -> anyhow::Result<Vec<JsonValue>> {
        self.record(query)?;
        Ok(self.rows.clone())
    }

    async fn fetch_count(&self, query: &SelectStatement) -> anyhow::Result<u64> {
        self.record(query)?;
        Ok(self.count)
    }
}

/// Evaluates mapper queries over JSON records.
///
/// Storage pages, hidden/deleted flags and the language aspect are read
/// from the `pid`, `hidden`, `deleted`, `sys_language_uid` and
/// `l10n_parent` properties when a record has them.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Vec<JsonValue>,
    executed: Mutex<Vec<MapperQuery>>,
}

impl MemoryRepository {
    pub fn new(records: Vec<JsonValue>) -> Self {
        Self {
            records,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Queries executed so far, in order.
    pub fn executed(&self) -> Vec<MapperQuery> {
        self.executed.lock().clone()
    }

    /// Matching records with orderings, offset and limit applied.
    pub fn select(&self, query: &MapperQuery) -> Vec<JsonValue> {
        self.executed.lock().push(query.clone());

        let mut rows: Vec<JsonValue> = self
            .records
            .iter()
            .filter(|record| self.in_scope(query, record))
            .filter(|record| query.constraint.as_ref().is_none_or(|c| matches(c, record)))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            query.orderings.iter().fold(Ordering::Equal, |ordering, sort| {
                ordering.then_with(|| {
                    let ordering = compare_json(a.get(&sort.field), b.get(&sort.field));
                    match sort.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                })
            })
        });

        let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        rows.into_iter().skip(offset).take(limit).collect()
    }

    fn in_scope(&self, query: &MapperQuery, record: &JsonValue) -> bool {
        let settings = &query.settings;
        let flag = |name: &str| record.get(name).and_then(JsonValue::as_i64).unwrap_or(0);

        if settings.respect_storage_page && !settings.storage_page_ids.contains(&flag("pid")) {
            return false;
        }
        if !settings.include_deleted && flag("deleted") != 0 {
            return false;
        }
        if !settings.ignore_enable_fields && flag("hidden") != 0 {
            return false;
        }

        let Some(language) = settings.language else {
            return true;
        };
        let record_language = flag("sys_language_uid");
        if record_language == -1 {
            return true;
        }
        match language.overlay {
            OverlayMode::Off => record_language == language.id,
            OverlayMode::Mixed => record_language == 0,
            OverlayMode::Strict => {
                record_language == 0
                    && (language.id == 0 || self.has_translation(flag("uid"), language.id))
            }
        }
    }

    fn has_translation(&self, uid: i64, language: i64) -> bool {
        self.records.iter().any(|record| {
            record.get("l10n_parent").and_then(JsonValue::as_i64) == Some(uid)
                && record.get("sys_language_uid").and_then(JsonValue::as_i64) == Some(language)
        })
    }
}

#[async_trait]
impl QueryExecutor<MapperQuery> for MemoryRepository {
    async fn fetch_all(&self, query: &MapperQuery) -> anyhow::Result<Vec<JsonValue>> {
        Ok(self.select(query))
    }

    async fn fetch_count(&self, query: &MapperQuery) -> anyhow::Result<u64> {
        Ok(self.select(query).len() as u64)
    }
}

/// Whether `record` satisfies `constraint`.
pub fn matches(constraint: &Constraint, record: &JsonValue) -> bool {
    match constraint {
        Constraint::And(parts) => parts.iter().all(|c| matches(c, record)),
        Constraint::Or(parts) => parts.iter().any(|c| matches(c, record)),
        Constraint::Not(inner) => !matches(inner, record),
        Constraint::Comparison {
            property,
            operator,
            operand,
        } => compare(&resolve_path(record, property), *operator, operand),
    }
}

/// Values reached by a dotted path. Arrays met on the way are expanded.
fn resolve_path<'a>(record: &'a JsonValue, path: &str) -> Vec<&'a JsonValue> {
    path.split('.').fold(vec![record], |current, segment| {
        current
            .into_iter()
            .flat_map(|value| match value {
                JsonValue::Array(items) => items.iter().collect(),
                other => vec![other],
            })
            .filter_map(|value| value.get(segment))
            .collect()
    })
}

fn compare(values: &[&JsonValue], operator: ComparisonOperator, operand: &FilterValue) -> bool {
    let scalars = || values.iter().filter_map(|v| FilterValue::from_json(v));
    let equals = || {
        if operand.is_null() {
            values.is_empty() || values.iter().any(|v| v.is_null())
        } else {
            scalars().any(|v| v.loose_eq(operand))
        }
    };

    match operator {
        ComparisonOperator::Equals => equals(),
        ComparisonOperator::NotEquals => !equals(),
        ComparisonOperator::In => match operand {
            FilterValue::List(items) => scalars().any(|v| items.iter().any(|i| v.loose_eq(i))),
            single => scalars().any(|v| v.loose_eq(single)),
        },
        ComparisonOperator::Like => {
            let Some(pattern) = operand.as_string() else {
                return false;
            };
            scalars().any(|v| v.as_string().is_some_and(|s| like(&s, &pattern)))
        }
        ComparisonOperator::LessThan => ordered(values, operand, Ordering::is_lt),
        ComparisonOperator::LessThanOrEqual => ordered(values, operand, Ordering::is_le),
        ComparisonOperator::GreaterThan => ordered(values, operand, Ordering::is_gt),
        ComparisonOperator::GreaterThanOrEqual => ordered(values, operand, Ordering::is_ge),
        ComparisonOperator::Contains => values.iter().any(|value| match value {
            JsonValue::Array(items) => items.iter().any(|item| member_matches(item, operand)),
            other => member_matches(other, operand),
        }),
    }
}

/// A relation member matches by value, or by its `uid` when it is an object.
fn member_matches(member: &JsonValue, operand: &FilterValue) -> bool {
    let member = match member {
        JsonValue::Object(map) => map.get("uid").unwrap_or(&JsonValue::Null),
        other => other,
    };
    FilterValue::from_json(member).is_some_and(|v| v.loose_eq(operand))
}

fn ordered(values: &[&JsonValue], operand: &FilterValue, test: fn(Ordering) -> bool) -> bool {
    values.iter().filter_map(|v| FilterValue::from_json(v)).any(|value| {
        match (value.as_f64(), operand.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).is_some_and(test),
            _ => match (value.as_string(), operand.as_string()) {
                (Some(a), Some(b)) => test(a.cmp(&b)),
                _ => false,
            },
        }
    })
}

/// SQL `LIKE` with `%` and `_` wildcards.
fn like(value: &str, pattern: &str) -> bool {
    fn go(value: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => value.is_empty(),
            Some(('%', rest)) => (0..=value.len()).any(|i| go(&value[i..], rest)),
            Some(('_', rest)) => !value.is_empty() && go(&value[1..], rest),
            Some((c, rest)) => value.first() == Some(c) && go(&value[1..], rest),
        }
    }
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    go(&value, &pattern)
}

fn compare_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    match (a, b) {
        (Some(JsonValue::Number(a)), Some(JsonValue::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(a)), Some(JsonValue::String(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
