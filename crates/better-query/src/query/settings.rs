//! Query settings owned by an adapter.
//!
//! Settings describe the implicit scope of a query (storage pages, language,
//! record visibility) plus ordering and paging. They are applied by the
//! adapter at finalize time, never as part of the where-spec tree.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::{FilterValue, QuerySort};

/// Default number of items per page.
pub const DEFAULT_ITEMS_PER_PAGE: u32 = 10;

/// Storage page scope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidScope {
    /// Pages provided by the page-id resolver for the current request.
    #[default]
    Current,
    /// No page scoping.
    Disabled,
    /// Explicit list of page references.
    Pages(Vec<PageRef>),
}

/// A page id or a symbolic name resolved by the page-id resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageRef {
    Id(i64),
    Symbol(String),
}

impl PidScope {
    /// Interpret a loosely-typed value: `true` is the current scope, `false`
    /// disables scoping, anything else is a list of page references.
    pub fn from_value(value: FilterValue) -> Self {
        match value {
            FilterValue::Boolean(true) => PidScope::Current,
            FilterValue::Boolean(false) => PidScope::Disabled,
            other => PidScope::Pages(
                crate::adapter::ensure_array_value(other, "pids")
                    .into_iter()
                    .map(PageRef::from_value)
                    .collect(),
            ),
        }
    }
}

impl PageRef {
    fn from_value(value: FilterValue) -> Self {
        match value {
            FilterValue::Integer(id) => PageRef::Id(id),
            FilterValue::String(s) => match s.trim().parse() {
                Ok(id) => PageRef::Id(id),
                Err(_) => PageRef::Symbol(s.trim().to_string()),
            },
            // Non-numeric scalars fail at resolution time.
            other => PageRef::Symbol(other.to_string()),
        }
    }
}

/// Language scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageScope {
    /// No language constraint.
    Disabled,
    /// Language of the current request, from the language resolver.
    #[default]
    Current,
    /// Explicit language id; negative ids address all languages.
    Id(i64),
}

impl From<bool> for LanguageScope {
    fn from(value: bool) -> Self {
        if value {
            LanguageScope::Current
        } else {
            LanguageScope::Disabled
        }
    }
}

impl From<i64> for LanguageScope {
    fn from(value: i64) -> Self {
        LanguageScope::Id(value)
    }
}

impl From<&crate::context::SiteLanguage> for LanguageScope {
    fn from(value: &crate::context::SiteLanguage) -> Self {
        LanguageScope::Id(value.language_id)
    }
}

/// How translated records are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayMode {
    /// Select records stored in the requested language.
    Off,
    /// Select default-language records; translations are overlaid later.
    #[default]
    Mixed,
    /// Select default-language records that have a translation in the
    /// requested language.
    Strict,
}

impl FromStr for OverlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(OverlayMode::Off),
            "mixed" | "on" => Ok(OverlayMode::Mixed),
            "strict" => Ok(OverlayMode::Strict),
            other => Err(format!("unknown overlay mode '{other}'")),
        }
    }
}

/// Options for `with_language`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LanguageOptions {
    /// Overlay mode to use; `None` keeps the current mode.
    pub overlay_mode: Option<OverlayMode>,
}

impl LanguageOptions {
    pub fn overlay(mode: OverlayMode) -> Self {
        Self {
            overlay_mode: Some(mode),
        }
    }
}

/// Settings owned by a query adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySettings {
    #[serde(default)]
    pub pids: PidScope,

    #[serde(default)]
    pub language: LanguageScope,

    #[serde(default)]
    pub overlay_mode: OverlayMode,

    /// Include records hidden by enable fields (hidden flag, start/end time).
    #[serde(default)]
    pub include_hidden: bool,

    /// Include records flagged as deleted.
    #[serde(default)]
    pub include_deleted: bool,

    #[serde(default)]
    pub orderings: Vec<QuerySort>,

    pub limit: Option<u64>,

    pub offset: Option<u64>,

    #[serde(default = "default_items_per_page")]
    pub items_per_page: u32,
}

fn default_items_per_page() -> u32 {
    DEFAULT_ITEMS_PER_PAGE
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            pids: PidScope::default(),
            language: LanguageScope::default(),
            overlay_mode: OverlayMode::default(),
            include_hidden: false,
            include_deleted: false,
            orderings: Vec::new(),
            limit: None,
            offset: None,
            items_per_page: default_items_per_page(),
        }
    }
}
