//! BetterQuery
//!
//! Compiles nested, loosely-typed where-specs into sea-query statements or
//! object-mapper queries. The `bq` binary wraps the library for ad-hoc use.

pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod query;

pub use adapter::{MapperAdapter, QueryAdapter, SqlAdapter};
pub use context::QueryContext;
pub use error::{QueryError, QueryResult};
pub use executor::QueryExecutor;
pub use query::{BetterQuery, FilterValue, WhereSpec};
