//! Configuration loaded from environment variables and a schema file.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::context::{FixedLanguage, QueryContext, StaticPages, StaticSchema, TableSchema};
use crate::query::settings::{DEFAULT_ITEMS_PER_PAGE, OverlayMode, QuerySettings};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL. Only needed to execute queries.
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Per-statement timeout (default: 10s).
    pub statement_timeout: Duration,

    /// Schema file declaring tables, pages and the current language.
    pub schema_file: Option<PathBuf>,

    /// Default page size (default: 10).
    pub items_per_page: u32,

    /// Default language overlay mode (default: mixed).
    pub language_overlay: OverlayMode,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let database_max_connections = var("DATABASE_MAX_CONNECTIONS", "10")
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let statement_timeout_ms: u64 = var("STATEMENT_TIMEOUT_MS", "10000")
            .parse()
            .context("STATEMENT_TIMEOUT_MS must be a valid u64")?;

        let schema_file = lookup("SCHEMA_FILE")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let items_per_page = var("ITEMS_PER_PAGE", &DEFAULT_ITEMS_PER_PAGE.to_string())
            .parse()
            .context("ITEMS_PER_PAGE must be a valid u32")?;

        let language_overlay = var("LANGUAGE_OVERLAY", "mixed")
            .parse::<OverlayMode>()
            .map_err(anyhow::Error::msg)
            .context("LANGUAGE_OVERLAY must be off, mixed or strict")?;

        Ok(Self {
            database_url,
            database_max_connections,
            statement_timeout: Duration::from_millis(statement_timeout_ms),
            schema_file,
            items_per_page,
            language_overlay,
        })
    }

    /// Settings new adapters start from.
    pub fn default_settings(&self) -> QuerySettings {
        QuerySettings {
            items_per_page: self.items_per_page,
            overlay_mode: self.language_overlay,
            ..QuerySettings::default()
        }
    }

    /// Query context from the configured schema file, or an empty one.
    pub fn query_context(&self) -> Result<QueryContext> {
        match &self.schema_file {
            Some(path) => Ok(SchemaFile::load(path)?.into_context()),
            None => Ok(QueryContext::default()),
        }
    }
}

/// Contents of a schema file.
///
/// ```toml
/// [tables.tt_content]
/// language_field = "sys_language_uid"
/// parent_pointer_field = "l10n_parent"
///
/// [pages]
/// current = [1]
/// symbols = { storage = 12 }
///
/// [language]
/// current = 0
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub tables: HashMap<String, TableSchema>,

    #[serde(default)]
    pub pages: StaticPages,

    #[serde(default)]
    pub language: LanguageSection,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct LanguageSection {
    /// Language id of the current request.
    #[serde(default)]
    pub current: i64,
}

impl SchemaFile {
    /// Load a TOML or YAML schema file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read schema file {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let schema: SchemaFile = match extension.as_deref() {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("failed to parse TOML schema {}", path.display()))?,
            Some("yaml" | "yml") => serde_yml::from_str(&content)
                .with_context(|| format!("failed to parse YAML schema {}", path.display()))?,
            _ => bail!(
                "unsupported schema file extension: {} (expected .toml, .yaml or .yml)",
                path.display()
            ),
        };

        tracing::debug!(
            path = %path.display(),
            tables = schema.tables.len(),
            "loaded schema file"
        );
        Ok(schema)
    }

    pub fn into_context(self) -> QueryContext {
        QueryContext::new(
            Arc::new(StaticSchema {
                tables: self.tables,
            }),
            Arc::new(self.pages),
            Arc::new(FixedLanguage(self.language.current)),
        )
    }
}
