//! `bq`: compile and run where-specs from the command line.
//!
//! Usage:
//!   bq compile --table tx_news --where '{"title like": "%rust%"}'
//!   bq run --table tx_news --where spec.json --page 2

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use better_query::config::Config;
use better_query::executor::{PgExecutor, create_pool};
use better_query::query::{LanguageOptions, LanguageScope, OverlayMode, QuerySort, SortDirection};
use better_query::{BetterQuery, FilterValue, MapperAdapter, QueryAdapter, SqlAdapter, WhereSpec};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Schema file (TOML or YAML); overrides SCHEMA_FILE.
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the compiled query.
    Compile(QueryArgs),
    /// Execute the query against DATABASE_URL and print the rows as JSON.
    Run(QueryArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum AdapterKind {
    Sql,
    Mapper,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Table to select from.
    #[arg(long)]
    table: String,

    /// Where-spec as a JSON file path or inline JSON.
    #[arg(long = "where")]
    where_spec: String,

    /// Where group to register the spec under ("or <name>" for an OR group).
    #[arg(long, default_value = better_query::query::DEFAULT_GROUP)]
    group: String,

    #[arg(long, value_enum, default_value_t = AdapterKind::Sql)]
    adapter: AdapterKind,

    /// Entity name reported by the mapper adapter (defaults to the table).
    #[arg(long)]
    entity: Option<String>,

    #[arg(long)]
    limit: Option<u64>,

    #[arg(long)]
    offset: Option<u64>,

    /// Page to read (1-based); uses the configured items per page.
    #[arg(long)]
    page: Option<u32>,

    /// Ordering as FIELD[:asc|desc]; repeatable.
    #[arg(long = "order")]
    orders: Vec<String>,

    /// Page scope: true, false, or a comma-separated list of ids/symbols.
    #[arg(long)]
    pids: Option<String>,

    /// Language scope: true, false, or a language id.
    #[arg(long)]
    language: Option<String>,

    /// Language overlay mode: off, mixed or strict.
    #[arg(long)]
    overlay: Option<String>,

    #[arg(long)]
    include_hidden: bool,

    #[arg(long)]
    include_deleted: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(schema) = cli.schema {
        config.schema_file = Some(schema);
    }

    match cli.command {
        Command::Compile(args) => compile(&config, &args),
        Command::Run(args) => run(&config, &args).await,
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn compile(config: &Config, args: &QueryArgs) -> Result<()> {
    let context = config.query_context()?;
    let spec_json = read_where_spec(&args.where_spec)?;

    match args.adapter {
        AdapterKind::Sql => {
            let adapter =
                SqlAdapter::new(&args.table, context).with_settings(config.default_settings());
            let query = configure(BetterQuery::new(adapter), args, &spec_json)?;
            println!("{}", query.to_sql()?);
        }
        AdapterKind::Mapper => {
            let entity = args.entity.as_deref().unwrap_or(&args.table);
            let adapter = MapperAdapter::new(entity, &args.table, context)
                .with_settings(config.default_settings());
            let query = configure(BetterQuery::new(adapter), args, &spec_json)?;
            println!("{}", serde_json::to_string_pretty(&query.compile()?)?);
        }
    }
    Ok(())
}

async fn run(config: &Config, args: &QueryArgs) -> Result<()> {
    if args.adapter != AdapterKind::Sql {
        bail!("only the sql adapter can be executed from the command line");
    }

    let context = config.query_context()?;
    let spec_json = read_where_spec(&args.where_spec)?;
    let pool = create_pool(config).await?;
    let executor = Arc::new(PgExecutor::new(pool, config.statement_timeout));

    let adapter = SqlAdapter::new(&args.table, context).with_settings(config.default_settings());
    let mut query =
        configure(BetterQuery::new(adapter), args, &spec_json)?.with_executor(executor);

    let output = match args.page {
        Some(page) => serde_json::to_value(query.get_page_result(page).await?)?,
        None => serde_json::Value::Array(query.get_all().await?),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Read inline JSON, or JSON from a file when the argument names one.
fn read_where_spec(raw: &str) -> Result<serde_json::Value> {
    let path = Path::new(raw);
    let content = if path.is_file() {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read where-spec {}", path.display()))?
    } else {
        raw.to_string()
    };
    serde_json::from_str(&content).context("where-spec must be valid JSON")
}

fn configure<A: QueryAdapter>(
    query: BetterQuery<A>,
    args: &QueryArgs,
    spec_json: &serde_json::Value,
) -> Result<BetterQuery<A>> {
    let spec = WhereSpec::<A>::from_json(spec_json)?;
    let mut query = query
        .with_where(spec, &args.group)
        .with_include_hidden(args.include_hidden)
        .with_include_deleted(args.include_deleted)
        .with_limit(args.limit)
        .with_offset(args.offset);

    if !args.orders.is_empty() {
        let orderings = args
            .orders
            .iter()
            .map(String::as_str)
            .map(parse_order)
            .collect::<Result<Vec<_>>>()?;
        query = query.with_orderings(orderings);
    }

    if let Some(pids) = &args.pids {
        query = query.with_pids(parse_pids(pids));
    }

    let overlay = args
        .overlay
        .as_deref()
        .map(str::parse::<OverlayMode>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let options = LanguageOptions {
        overlay_mode: overlay,
    };
    if let Some(language) = &args.language {
        let scope = match language.trim().to_ascii_lowercase().as_str() {
            "true" => LanguageScope::Current,
            "false" => LanguageScope::Disabled,
            id => LanguageScope::Id(
                id.parse()
                    .with_context(|| format!("invalid language '{language}'"))?,
            ),
        };
        query = query.with_language(scope, options);
    } else if options.overlay_mode.is_some() {
        let current = query.get_settings().language;
        query = query.with_language(current, options);
    }

    Ok(query)
}

fn parse_pids(raw: &str) -> FilterValue {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => FilterValue::Boolean(true),
        "false" => FilterValue::Boolean(false),
        _ => FilterValue::String(raw.trim().to_string()),
    }
}

fn parse_order(raw: &str) -> Result<QuerySort> {
    let (field, direction) = match raw.split_once(':') {
        Some((field, direction)) => (
            field,
            direction
                .parse::<SortDirection>()
                .map_err(anyhow::Error::msg)?,
        ),
        None => (raw, SortDirection::default()),
    };
    if field.trim().is_empty() {
        bail!("empty field in ordering '{raw}'");
    }
    Ok(QuerySort::new(field.trim(), direction))
}
