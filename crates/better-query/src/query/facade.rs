//! Query facade.
//!
//! `BetterQuery` owns named where-groups, an adapter and an optional
//! executor. Configuring methods return a new value and leave the receiver
//! untouched; clones share the group list until one of them changes it.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde_json::Value;

use super::settings::{LanguageOptions, LanguageScope, PidScope, QuerySettings};
use super::tree::ConstraintBuilder;
use super::types::{FilterValue, PageResult, QuerySort, SortDirection, page_count};
use super::where_spec::WhereSpec;
use crate::adapter::{QueryAdapter, SqlAdapter};
use crate::error::{QueryError, QueryResult};
use crate::executor::QueryExecutor;

/// Group used by callers that do not name one.
pub const DEFAULT_GROUP: &str = "";

/// A named where-spec.
///
/// Names starting with `"or "` (any case) register an OR group stored under
/// the key `"OR <name>"`.
#[derive(Debug, Clone)]
pub struct WhereGroup<A: QueryAdapter> {
    key: String,
    name: String,
    or: bool,
    spec: WhereSpec<A>,
}

impl<A: QueryAdapter> WhereGroup<A> {
    pub fn new(name: &str, spec: WhereSpec<A>) -> Self {
        let (key, name, or) = parse_group_name(name);
        Self { key, name, or, spec }
    }

    /// Registry key (`"OR <name>"` for OR groups).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Name without the OR prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_or(&self) -> bool {
        self.or
    }

    pub fn spec(&self) -> &WhereSpec<A> {
        &self.spec
    }
}

/// Returns `(key, name, or)` for a group name.
fn parse_group_name(raw: &str) -> (String, String, bool) {
    let trimmed = raw.trim();
    let is_or = trimmed.len() > 3
        && trimmed
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("or "));

    match trimmed.get(3..) {
        Some(rest) if is_or => {
            let name = rest.trim().to_string();
            (format!("OR {name}"), name, true)
        }
        _ => (trimmed.to_string(), trimmed.to_string(), false),
    }
}

/// Fluent query over an adapter.
pub struct BetterQuery<A: QueryAdapter> {
    adapter: A,
    groups: Arc<Vec<WhereGroup<A>>>,
    executor: Option<Arc<dyn QueryExecutor<A::Native>>>,
}

impl<A: QueryAdapter> Clone for BetterQuery<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            groups: Arc::clone(&self.groups),
            executor: self.executor.clone(),
        }
    }
}

impl<A: QueryAdapter> fmt::Debug for BetterQuery<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BetterQuery")
            .field("adapter", &self.adapter)
            .field("groups", &self.groups)
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

impl<A: QueryAdapter> BetterQuery<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            groups: Arc::new(Vec::new()),
            executor: None,
        }
    }

    fn derive(&self, configure: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        configure(&mut next);
        next
    }

    fn derive_settings(&self, configure: impl FnOnce(&mut QuerySettings)) -> Self {
        self.derive(|q| configure(q.adapter.settings_mut()))
    }

    pub fn with_executor(&self, executor: Arc<dyn QueryExecutor<A::Native>>) -> Self {
        self.derive(|q| q.executor = Some(executor))
    }

    /// Register `spec` under `group`, replacing a group with the same key in
    /// place.
    pub fn with_where(&self, spec: WhereSpec<A>, group: &str) -> Self {
        let group = WhereGroup::new(group, spec);
        self.derive(|q| {
            let groups = Arc::make_mut(&mut q.groups);
            match groups.iter().position(|g| g.key == group.key) {
                Some(index) => groups[index] = group,
                None => groups.push(group),
            }
        })
    }

    /// Replace all groups.
    pub fn with_where_groups<I, S>(&self, groups: I) -> Self
    where
        I: IntoIterator<Item = (S, WhereSpec<A>)>,
        S: AsRef<str>,
    {
        let mut cleared = self.clone();
        cleared.groups = Arc::new(Vec::new());
        groups
            .into_iter()
            .fold(cleared, |q, (name, spec)| q.with_where(spec, name.as_ref()))
    }

    pub fn remove_where_group(&self, name: &str) -> Self {
        let (key, _, _) = parse_group_name(name);
        self.derive(|q| Arc::make_mut(&mut q.groups).retain(|g| g.key != key))
    }

    /// `true` scopes to the current pages, `false` disables page scoping,
    /// anything else is a list of page ids or symbols.
    pub fn with_pids(&self, value: impl Into<FilterValue>) -> Self {
        let scope = PidScope::from_value(value.into());
        self.derive_settings(|s| s.pids = scope)
    }

    pub fn with_language(&self, language: impl Into<LanguageScope>, options: LanguageOptions) -> Self {
        let language = language.into();
        self.derive_settings(|s| {
            s.language = language;
            if let Some(mode) = options.overlay_mode {
                s.overlay_mode = mode;
            }
        })
    }

    pub fn with_include_hidden(&self, include: bool) -> Self {
        self.derive_settings(|s| s.include_hidden = include)
    }

    pub fn with_include_deleted(&self, include: bool) -> Self {
        self.derive_settings(|s| s.include_deleted = include)
    }

    pub fn with_limit(&self, limit: impl Into<Option<u64>>) -> Self {
        let limit = limit.into();
        self.derive(|q| q.adapter.set_limit(limit))
    }

    pub fn with_offset(&self, offset: impl Into<Option<u64>>) -> Self {
        let offset = offset.into();
        self.derive(|q| q.adapter.set_offset(offset))
    }

    /// Order by a single field, replacing earlier orderings.
    pub fn with_order(&self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.with_orderings(vec![QuerySort::new(field, direction)])
    }

    /// Append an ordering after the existing ones.
    pub fn with_additional_order(&self, field: impl Into<String>, direction: SortDirection) -> Self {
        let sort = QuerySort::new(field, direction);
        self.derive_settings(|s| s.orderings.push(sort))
    }

    /// Replace all orderings.
    pub fn with_orderings(&self, orderings: Vec<QuerySort>) -> Self {
        self.derive(|q| q.adapter.set_orderings(orderings))
    }

    pub fn with_items_per_page(&self, items_per_page: u32) -> Self {
        self.derive_settings(|s| s.items_per_page = items_per_page)
    }

    /// Where-spec of a group, looked up by name without the OR prefix, so
    /// `"OR name"` and `"name"` answer the first group registered as `name`.
    pub fn get_where(&self, name: &str) -> Option<&WhereSpec<A>> {
        let (_, name, _) = parse_group_name(name);
        self.groups
            .iter()
            .find(|g| g.name == name)
            .map(WhereGroup::spec)
    }

    pub fn get_where_groups(&self) -> &[WhereGroup<A>] {
        &self.groups
    }

    /// Resolved storage page ids; `None` when page scoping is off.
    pub fn get_pids(&self) -> QueryResult<Option<Vec<i64>>> {
        self.adapter.resolve_pids()
    }

    pub fn get_settings(&self) -> &QuerySettings {
        self.adapter.settings()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Compile the where-groups into a fresh native query.
    ///
    /// AND groups are AND-combined; when OR groups exist, the AND node and
    /// every OR group are OR-combined.
    pub fn compile(&self) -> QueryResult<A::Native> {
        let builder = ConstraintBuilder::new(self);
        let mut and_parts = Vec::new();
        let mut or_parts = Vec::new();

        for group in self.groups.iter() {
            let Some(predicate) = builder.build(&group.spec)? else {
                tracing::debug!(group = %group.key, "where group is empty");
                continue;
            };
            if group.or {
                or_parts.push(predicate);
            } else {
                and_parts.push(predicate);
            }
        }

        let and_node = (!and_parts.is_empty()).then(|| self.adapter.make_and(and_parts));
        let root = if or_parts.is_empty() {
            and_node
        } else {
            let mut parts = Vec::with_capacity(or_parts.len() + 1);
            parts.extend(and_node);
            parts.extend(or_parts);
            Some(self.adapter.make_or(parts))
        };

        tracing::debug!(
            table = %self.adapter.table_name(),
            groups = self.groups.len(),
            "compiled where groups"
        );
        self.adapter.finalize_constraints(root)
    }

    fn executor(&self) -> QueryResult<&dyn QueryExecutor<A::Native>> {
        self.executor.as_deref().ok_or(QueryError::MissingExecutor)
    }

    /// All matching rows.
    pub async fn get_all(&self) -> QueryResult<Vec<Value>> {
        let native = self.compile()?;
        self.executor()?
            .fetch_all(&native)
            .await
            .map_err(QueryError::Backend)
    }

    /// Number of matching rows.
    pub async fn get_count(&self) -> QueryResult<u64> {
        let native = self.compile()?;
        self.executor()?
            .fetch_count(&native)
            .await
            .map_err(QueryError::Backend)
    }

    /// First matching row. Compiles a clone limited to one row.
    pub async fn get_first(&self) -> QueryResult<Option<Value>> {
        let rows = self.with_limit(1).get_all().await?;
        Ok(rows.into_iter().next())
    }

    /// Rows of page `page` (1-based; values below 1 read page 1).
    pub async fn get_page(&mut self, page: u32) -> QueryResult<Vec<Value>> {
        let per_page = self.get_settings().items_per_page;
        let offset = u64::from(page.max(1) - 1) * u64::from(per_page);
        let window = PageWindow::open(self, Some(u64::from(per_page)), Some(offset));
        window.get_all().await
    }

    /// Page numbers `1..=n` for the current item count.
    pub async fn get_pages(&mut self) -> QueryResult<Vec<u32>> {
        let per_page = self.get_settings().items_per_page;
        let total = self.count_unpaged().await?;
        Ok((1..=page_count(total, per_page)).collect())
    }

    /// Rows of page `page` with paging information.
    pub async fn get_page_result(&mut self, page: u32) -> QueryResult<PageResult> {
        let page = page.max(1);
        let per_page = self.get_settings().items_per_page;
        let items = self.get_page(page).await?;
        let total = self.count_unpaged().await?;
        Ok(PageResult::new(items, total, page, per_page))
    }

    async fn count_unpaged(&mut self) -> QueryResult<u64> {
        let window = PageWindow::open(self, None, None);
        window.get_count().await
    }
}

impl BetterQuery<SqlAdapter> {
    /// Compiled statement rendered for PostgreSQL.
    pub fn to_sql(&self) -> QueryResult<String> {
        Ok(SqlAdapter::to_sql(&self.compile()?))
    }
}

/// Temporary limit/offset override, restored on drop.
struct PageWindow<'q, A: QueryAdapter> {
    query: &'q mut BetterQuery<A>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl<'q, A: QueryAdapter> PageWindow<'q, A> {
    fn open(query: &'q mut BetterQuery<A>, limit: Option<u64>, offset: Option<u64>) -> Self {
        let settings = query.adapter.settings();
        let (previous_limit, previous_offset) = (settings.limit, settings.offset);
        query.adapter.set_limit(limit);
        query.adapter.set_offset(offset);
        Self {
            query,
            limit: previous_limit,
            offset: previous_offset,
        }
    }
}

impl<A: QueryAdapter> Deref for PageWindow<'_, A> {
    type Target = BetterQuery<A>;

    fn deref(&self) -> &Self::Target {
        self.query
    }
}

impl<A: QueryAdapter> Drop for PageWindow<'_, A> {
    fn drop(&mut self) {
        self.query.adapter.set_limit(self.limit);
        self.query.adapter.set_offset(self.offset);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapter::{ComparisonOperator, Constraint, MapperAdapter};
    use crate::context::QueryContext;

    type Spec = WhereSpec<MapperAdapter>;

    fn query() -> BetterQuery<MapperAdapter> {
        BetterQuery::new(MapperAdapter::new("News", "tx_news", QueryContext::default()))
            .with_pids(false)
            .with_language(false, LanguageOptions::default())
    }

    fn eq(property: &str, value: i64) -> Constraint {
        Constraint::comparison(property, ComparisonOperator::Equals, value)
    }

    #[test]
    fn group_name_parsing() {
        assert_eq!(
            parse_group_name("or extra"),
            ("OR extra".to_string(), "extra".to_string(), true)
        );
        assert_eq!(
            parse_group_name(" OR  extra "),
            ("OR extra".to_string(), "extra".to_string(), true)
        );
        assert_eq!(
            parse_group_name("ordering"),
            ("ordering".to_string(), "ordering".to_string(), false)
        );
        assert_eq!(parse_group_name("or"), ("or".to_string(), "or".to_string(), false));
    }

    #[test]
    fn configuring_leaves_receiver_untouched() {
        let base = query();
        let filtered = base.with_where(Spec::new().condition("a", 1), DEFAULT_GROUP);
        let limited = filtered.with_limit(5);

        assert!(base.get_where_groups().is_empty());
        assert_eq!(filtered.get_where_groups().len(), 1);
        assert_eq!(filtered.get_settings().limit, None);
        assert_eq!(limited.get_settings().limit, Some(5));
    }

    #[test]
    fn re_registering_overwrites_in_place() {
        let q = query()
            .with_where(Spec::new().condition("a", 1), "first")
            .with_where(Spec::new().condition("b", 2), "second")
            .with_where(Spec::new().condition("c", 3), "first");

        let names: Vec<&str> = q.get_where_groups().iter().map(WhereGroup::key).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(
            q.compile().unwrap().constraint,
            Some(Constraint::And(vec![eq("c", 3), eq("b", 2)]))
        );
    }

    #[test]
    fn or_prefix_addresses_one_entry() {
        let q = query()
            .with_where(Spec::new().condition("a", 1), "or extra")
            .with_where(Spec::new().condition("b", 2), "OR extra");

        assert_eq!(q.get_where_groups().len(), 1);
        let group = &q.get_where_groups()[0];
        assert!(group.is_or());
        assert_eq!(group.key(), "OR extra");
        assert_eq!(group.name(), "extra");

        assert!(q.get_where("extra").is_some());
        assert!(q.get_where("or extra").is_some());
        assert!(q.get_where("missing").is_none());
    }

    #[test]
    fn or_and_plain_groups_are_distinct_but_share_lookup() {
        let q = query()
            .with_where(Spec::new().condition("a", 1), "OR mine")
            .with_where(Spec::new().condition("b", 2), "mine");

        assert_eq!(q.get_where_groups().len(), 2);
        assert!(q.get_where_groups()[0].is_or());
        assert!(!q.get_where_groups()[1].is_or());

        let by_or = q.get_where("OR mine").unwrap();
        let by_name = q.get_where("mine").unwrap();
        assert!(std::ptr::eq(by_or, by_name));
        assert_eq!(by_or.len(), 1);
    }

    #[test]
    fn with_where_groups_replaces_registry() {
        let q = query()
            .with_where(Spec::new().condition("a", 1), "old")
            .with_where_groups([("new", Spec::new().condition("b", 2))]);

        let keys: Vec<&str> = q.get_where_groups().iter().map(WhereGroup::key).collect();
        assert_eq!(keys, vec!["new"]);
    }

    #[test]
    fn remove_where_group_normalizes_name() {
        let q = query()
            .with_where(Spec::new().condition("a", 1), "OR extra")
            .with_where(Spec::new().condition("b", 2), DEFAULT_GROUP);
        let removed = q.remove_where_group("or extra");
        assert_eq!(removed.get_where_groups().len(), 1);
        assert_eq!(q.get_where_groups().len(), 2);
    }

    #[test]
    fn or_groups_combine_with_and_node() {
        let q = query().with_where_groups([
            ("first", Spec::new().condition("a", 1)),
            ("second", Spec::new().condition("b", 2)),
            ("or alt", Spec::new().condition("c", 3)),
        ]);

        assert_eq!(
            q.compile().unwrap().constraint,
            Some(Constraint::Or(vec![
                Constraint::And(vec![eq("a", 1), eq("b", 2)]),
                eq("c", 3),
            ]))
        );
    }

    #[test]
    fn only_or_groups() {
        let q = query()
            .with_where(Spec::new().condition("a", 1), "or one")
            .with_where(Spec::new().condition("b", 2), "or two");
        assert_eq!(
            q.compile().unwrap().constraint,
            Some(Constraint::Or(vec![eq("a", 1), eq("b", 2)]))
        );
    }

    #[test]
    fn empty_groups_are_skipped() {
        let q = query()
            .with_where(Spec::new(), "empty")
            .with_where(Spec::new().condition("a", 1), DEFAULT_GROUP);
        assert_eq!(q.compile().unwrap().constraint, Some(eq("a", 1)));
        assert_eq!(query().compile().unwrap().constraint, None);
    }

    #[test]
    fn language_options_set_overlay() {
        use crate::query::settings::OverlayMode;

        let q = query().with_language(3, LanguageOptions::overlay(OverlayMode::Strict));
        assert_eq!(q.get_settings().language, LanguageScope::Id(3));
        assert_eq!(q.get_settings().overlay_mode, OverlayMode::Strict);

        let kept = q.with_language(true, LanguageOptions::default());
        assert_eq!(kept.get_settings().overlay_mode, OverlayMode::Strict);
    }

    #[test]
    fn with_order_replaces_and_additional_order_appends() {
        let base = query().with_order("title", SortDirection::Asc);
        let reordered = base.with_order("crdate", SortDirection::Desc);
        assert_eq!(
            reordered.get_settings().orderings,
            vec![QuerySort::new("crdate", SortDirection::Desc)]
        );
        assert_eq!(
            base.get_settings().orderings,
            vec![QuerySort::new("title", SortDirection::Asc)]
        );

        let both = base.with_additional_order("crdate", SortDirection::Desc);
        assert_eq!(
            both.get_settings().orderings,
            vec![
                QuerySort::new("title", SortDirection::Asc),
                QuerySort::new("crdate", SortDirection::Desc),
            ]
        );

        let replaced = both.with_orderings(vec![QuerySort::new("uid", SortDirection::Asc)]);
        assert_eq!(
            replaced.get_settings().orderings,
            vec![QuerySort::new("uid", SortDirection::Asc)]
        );
    }

    #[test]
    fn page_window_restores_on_drop() {
        let mut q = query().with_limit(7);
        {
            let window = PageWindow::open(&mut q, Some(10), Some(20));
            assert_eq!(window.get_settings().limit, Some(10));
            assert_eq!(window.get_settings().offset, Some(20));
        }
        assert_eq!(q.get_settings().limit, Some(7));
        assert_eq!(q.get_settings().offset, None);
    }

    #[tokio::test]
    async fn execution_without_executor_fails() {
        let q = query();
        assert!(matches!(q.get_all().await, Err(QueryError::MissingExecutor)));
        assert!(matches!(q.get_count().await, Err(QueryError::MissingExecutor)));
    }
}
