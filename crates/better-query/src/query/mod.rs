//! BetterQuery: nested where-specs compiled through a backend adapter.
//!
//! A query is configured through the immutable [`BetterQuery`] facade:
//! - where-specs are registered in named groups (`"OR name"` groups are
//!   OR-combined with the rest)
//! - settings (pages, language, visibility, ordering, paging) live in the
//!   adapter
//! - `compile()` builds the predicate tree and asks the adapter for a fresh
//!   native query; the async readers hand it to the configured executor

pub mod facade;
pub mod grammar;
pub mod settings;
pub mod tree;
pub mod types;
pub mod where_spec;

pub use facade::{BetterQuery, DEFAULT_GROUP, WhereGroup};
pub use grammar::parse_condition;
pub use settings::{
    DEFAULT_ITEMS_PER_PAGE, LanguageOptions, LanguageScope, OverlayMode, PageRef, PidScope,
    QuerySettings,
};
pub use tree::ConstraintBuilder;
pub use types::{
    ConditionToken, FilterValue, Operator, PageResult, QuerySort, SortDirection,
};
pub use where_spec::{RawConstraint, RawFn, WhereEntry, WhereSpec};
