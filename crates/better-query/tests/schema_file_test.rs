#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Schema files feeding queries.

use std::io::Write;
use std::path::PathBuf;

use better_query::config::{Config, SchemaFile};
use better_query::query::DEFAULT_GROUP;
use better_query::{BetterQuery, SqlAdapter, WhereSpec};
use tempfile::{Builder, NamedTempFile};

const TOML_SCHEMA: &str = r#"
[tables.tt_content]
language_field = "sys_language_uid"
parent_pointer_field = "l10n_parent"
deleted_field = "deleted"

[pages]
current = [4]
symbols = { storage = 12 }

[language]
current = 2
"#;

const YAML_SCHEMA: &str = r#"
tables:
  tt_content:
    language_field: sys_language_uid
    parent_pointer_field: l10n_parent
pages:
  current: [4, 5]
"#;

fn schema_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn toml_schema_drives_compilation() {
    let file = schema_file(".toml", TOML_SCHEMA);
    let ctx = SchemaFile::load(file.path()).unwrap().into_context();

    let sql = BetterQuery::new(SqlAdapter::new("tt_content", ctx))
        .with_where(WhereSpec::new().condition("uid", 7), DEFAULT_GROUP)
        .to_sql()
        .unwrap();

    assert!(
        sql.contains(r#""tt_content"."uid" = 7 OR "tt_content"."l10n_parent" = 7"#),
        "{sql}"
    );
    assert!(sql.contains(r#""tt_content"."deleted" = 0"#), "{sql}");
    assert!(sql.contains(r#""tt_content"."pid" = 4"#), "{sql}");
    // Language 2 in mixed mode selects default-language records.
    assert!(sql.contains(r#""tt_content"."sys_language_uid" IN (0, -1)"#), "{sql}");
}

#[test]
fn toml_schema_resolves_symbols() {
    let file = schema_file(".toml", TOML_SCHEMA);
    let ctx = SchemaFile::load(file.path()).unwrap().into_context();

    let query = BetterQuery::new(SqlAdapter::new("tt_content", ctx)).with_pids("storage");
    assert_eq!(query.get_pids().unwrap(), Some(vec![12]));
}

#[test]
fn yaml_schema_loads() {
    let file = schema_file(".yaml", YAML_SCHEMA);
    let schema = SchemaFile::load(file.path()).unwrap();
    assert_eq!(schema.pages.current, vec![4, 5]);
    assert_eq!(schema.language.current, 0);

    let ctx = schema.into_context();
    assert_eq!(
        ctx.schema().parent_pointer_field("tt_content").as_deref(),
        Some("l10n_parent")
    );
    assert!(ctx.schema().table("tx_news").is_none());
}

#[test]
fn unsupported_extension_is_rejected() {
    let file = schema_file(".json", "{}");
    let err = SchemaFile::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("unsupported schema file extension"));
}

#[test]
fn malformed_schema_names_the_file() {
    let file = schema_file(".toml", "[tables\n");
    let err = SchemaFile::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("failed to parse TOML schema"));
}

#[test]
fn config_reads_schema_file_path() {
    let file = schema_file(".yml", YAML_SCHEMA);
    let path: PathBuf = file.path().to_path_buf();
    let path_text = path.display().to_string();

    let config = Config::from_lookup(|name| match name {
        "SCHEMA_FILE" => Some(path_text.clone()),
        _ => None,
    })
    .unwrap();

    assert_eq!(config.schema_file.as_deref(), Some(path.as_path()));
    let ctx = config.query_context().unwrap();
    assert_eq!(ctx.pages().current_page_ids(), vec![4, 5]);
}
