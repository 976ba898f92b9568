//! Collaborators consulted while compiling a query.
//!
//! The builder never reaches into global state. Table control fields, page
//! ids and the current language come from the providers bundled in a
//! [`QueryContext`], which adapters share through `Arc`s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Control fields of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Column holding the language id of a record.
    pub language_field: Option<String>,

    /// Column pointing from a translation to its default-language record.
    pub parent_pointer_field: Option<String>,

    /// Soft-delete flag column.
    pub deleted_field: Option<String>,

    /// Hidden flag column.
    pub hidden_field: Option<String>,

    /// Publish start timestamp column.
    pub start_time_field: Option<String>,

    /// Publish end timestamp column (0 = no end).
    pub end_time_field: Option<String>,

    /// Column holding the storage page id.
    #[serde(default = "default_storage_page_field")]
    pub storage_page_field: String,
}

fn default_storage_page_field() -> String {
    "pid".to_string()
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            language_field: None,
            parent_pointer_field: None,
            deleted_field: None,
            hidden_field: None,
            start_time_field: None,
            end_time_field: None,
            storage_page_field: default_storage_page_field(),
        }
    }
}

/// Source of table control fields.
pub trait SchemaProvider: Send + Sync {
    /// Schema of a table, if the table is known.
    fn table(&self, name: &str) -> Option<TableSchema>;

    /// Parent-pointer field of a translatable table.
    fn parent_pointer_field(&self, name: &str) -> Option<String> {
        self.table(name).and_then(|t| t.parent_pointer_field)
    }
}

/// Schema declared up front, typically loaded from a schema file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticSchema {
    #[serde(default)]
    pub tables: HashMap<String, TableSchema>,
}

impl StaticSchema {
    pub fn with_table(mut self, name: impl Into<String>, schema: TableSchema) -> Self {
        self.tables.insert(name.into(), schema);
        self
    }
}

impl SchemaProvider for StaticSchema {
    fn table(&self, name: &str) -> Option<TableSchema> {
        self.tables.get(name).cloned()
    }
}

/// Resolves page scopes to numeric page ids.
pub trait PageIdResolver: Send + Sync {
    /// Page ids of the current scope (`with_pids(true)`).
    fn current_page_ids(&self) -> Vec<i64>;

    /// Resolve a symbolic page reference.
    fn resolve(&self, symbol: &str) -> Option<i64>;
}

/// Fixed page ids and symbol table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticPages {
    #[serde(default)]
    pub current: Vec<i64>,

    #[serde(default)]
    pub symbols: HashMap<String, i64>,
}

impl PageIdResolver for StaticPages {
    fn current_page_ids(&self) -> Vec<i64> {
        self.current.clone()
    }

    fn resolve(&self, symbol: &str) -> Option<i64> {
        self.symbols.get(symbol).copied()
    }
}

/// Resolves the language of the current request.
pub trait LanguageResolver: Send + Sync {
    fn current_language_id(&self) -> i64;
}

/// A site language as configured for a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteLanguage {
    pub language_id: i64,

    /// Locale or BCP 47 tag (e.g. "de-DE").
    #[serde(default)]
    pub locale: String,

    #[serde(default)]
    pub title: String,
}

/// Always answers the same language.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FixedLanguage(pub i64);

impl LanguageResolver for FixedLanguage {
    fn current_language_id(&self) -> i64 {
        self.0
    }
}

impl LanguageResolver for SiteLanguage {
    fn current_language_id(&self) -> i64 {
        self.language_id
    }
}

/// Collaborators shared by every adapter built from the same site setup.
#[derive(Clone)]
pub struct QueryContext {
    schema: Arc<dyn SchemaProvider>,
    pages: Arc<dyn PageIdResolver>,
    languages: Arc<dyn LanguageResolver>,
    fixed_time: Option<i64>,
}

impl QueryContext {
    pub fn new(
        schema: Arc<dyn SchemaProvider>,
        pages: Arc<dyn PageIdResolver>,
        languages: Arc<dyn LanguageResolver>,
    ) -> Self {
        Self {
            schema,
            pages,
            languages,
            fixed_time: None,
        }
    }

    /// Pin the clock used for start/end time checks.
    pub fn with_fixed_time(mut self, timestamp: i64) -> Self {
        self.fixed_time = Some(timestamp);
        self
    }

    pub fn schema(&self) -> &dyn SchemaProvider {
        self.schema.as_ref()
    }

    pub fn pages(&self) -> &dyn PageIdResolver {
        self.pages.as_ref()
    }

    pub fn languages(&self) -> &dyn LanguageResolver {
        self.languages.as_ref()
    }

    /// Schema of a table, falling back to the default control fields.
    pub fn table_schema(&self, table: &str) -> TableSchema {
        self.schema.table(table).unwrap_or_default()
    }

    /// Current Unix timestamp.
    pub fn now(&self) -> i64 {
        self.fixed_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new(
            Arc::new(StaticSchema::default()),
            Arc::new(StaticPages::default()),
            Arc::new(FixedLanguage(0)),
        )
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("fixed_time", &self.fixed_time)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn table_schema_defaults() {
        let schema = TableSchema::default();
        assert_eq!(schema.storage_page_field, "pid");
        assert!(schema.parent_pointer_field.is_none());
    }

    #[test]
    fn static_schema_parent_pointer_lookup() {
        let schema = StaticSchema::default().with_table(
            "tt_content",
            TableSchema {
                parent_pointer_field: Some("l10n_parent".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(
            schema.parent_pointer_field("tt_content"),
            Some("l10n_parent".to_string())
        );
        assert_eq!(schema.parent_pointer_field("tx_news"), None);
    }

    #[test]
    fn static_pages_resolution() {
        let pages = StaticPages {
            current: vec![3],
            symbols: HashMap::from([("storage".to_string(), 12)]),
        };
        assert_eq!(pages.current_page_ids(), vec![3]);
        assert_eq!(pages.resolve("storage"), Some(12));
        assert_eq!(pages.resolve("missing"), None);
    }

    #[test]
    fn context_unknown_table_uses_default_schema() {
        let ctx = QueryContext::default().with_fixed_time(1_700_000_000);
        assert_eq!(ctx.table_schema("anything").storage_page_field, "pid");
        assert_eq!(ctx.now(), 1_700_000_000);
        assert_eq!(ctx.languages().current_language_id(), 0);
    }
}
