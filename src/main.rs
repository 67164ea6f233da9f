//! # Database Chat CLI (`dbc`)
//!
//! The `dbc` binary is the chat surface over the query-resolution
//! pipeline. It connects to the configured SQLite database, builds the
//! metadata graph, and resolves natural-language questions into
//! validated, executed SELECT queries.
//!
//! ## Usage
//!
//! ```bash
//! dbc --config ./config/dbc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dbc init` | Introspect the target database and build the metadata graph |
//! | `dbc ask "<question>"` | Resolve one question into an executed query and answer |
//! | `dbc annotate "<statement>"` | Store a schema annotation ("the orders table stores ...") |
//! | `dbc annotations` | List stored annotations |
//! | `dbc schema` | Print the introspected schema |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use dbchat::answer::render_rows;
use dbchat::config::{self, Config};
use dbchat::db;
use dbchat::executor::SqliteExecutor;
use dbchat::extract;
use dbchat::graph::{open_graph, MetadataGraph};
use dbchat::llm::create_provider;
use dbchat::models::{Annotation, SchemaSnapshot};
use dbchat::schema::{SchemaSource, SqliteIntrospector};
use dbchat::workflow::Orchestrator;

/// Database chat assistant — natural-language questions answered with
/// validated, read-only SQL.
#[derive(Parser)]
#[command(
    name = "dbc",
    about = "Database chat assistant — natural-language questions answered with validated, read-only SQL",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dbc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Introspect the target database and build the metadata graph.
    ///
    /// Idempotent — running it again refreshes the graph against the
    /// current schema without duplicating nodes.
    Init,

    /// Ask a question about the data.
    Ask {
        /// The natural-language question.
        question: String,

        /// Print the generated SQL and raw rows alongside the answer.
        #[arg(long)]
        show_sql: bool,
    },

    /// Store a schema annotation, e.g. "the orders table stores customer purchases".
    Annotate {
        /// The annotation statement.
        statement: String,
    },

    /// List stored annotations.
    Annotations,

    /// Print the introspected schema.
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let (snapshot, graph) = open_pipeline(&cfg).await?;
            let annotations = graph.annotations().await?;
            println!(
                "Graph built for '{}': {} table(s), {} annotation(s).",
                snapshot.database,
                snapshot.tables.len(),
                annotations.len()
            );
        }
        Commands::Ask { question, show_sql } => {
            let (snapshot, graph) = open_pipeline(&cfg).await?;
            let pool = db::connect(&cfg.database.path).await?;
            let provider: Arc<_> = Arc::from(create_provider(&cfg.llm)?);
            let executor = Arc::new(SqliteExecutor::with_row_limit(
                pool,
                cfg.pipeline.max_result_rows,
            ));

            let orchestrator = Orchestrator::new(
                Arc::from(graph),
                provider,
                executor,
                Some(snapshot),
                cfg.database.name.clone(),
                &cfg.pipeline,
            );

            let outcome = orchestrator.run(&question, &[]).await;
            println!("{}", outcome.answer);
            if show_sql {
                if let Some(sql) = &outcome.sql {
                    println!("\nSQL: {}", sql);
                }
                if let Some(rows) = &outcome.rows {
                    if !rows.rows.is_empty() {
                        println!("\n{}", render_rows(rows));
                    }
                }
            }
        }
        Commands::Annotate { statement } => {
            let (_, graph) = open_pipeline(&cfg).await?;
            let Some(candidate) = extract::extract(&statement) else {
                println!(
                    "Could not parse an annotation from that statement. Use a form like:\n\
                     - \"The orders table contains customer purchase records\"\n\
                     - \"The orders.status column stores order status values\""
                );
                return Ok(());
            };

            let entity_name = if candidate.entity_name.is_empty() {
                cfg.database.name.clone()
            } else {
                candidate.entity_name
            };
            let annotation = Annotation::new(
                candidate.entity,
                entity_name.clone(),
                candidate.parent_table,
                candidate.content.clone(),
            );
            graph.store_annotation(annotation).await?;
            println!("Annotation saved for '{}': {}", entity_name, candidate.content);
        }
        Commands::Annotations => {
            let (_, graph) = open_pipeline(&cfg).await?;
            let annotations = graph.annotations().await?;
            if annotations.is_empty() {
                println!("No annotations stored.");
            }
            for a in annotations {
                match &a.parent_table {
                    Some(table) => {
                        println!("[column] {}.{}: {}", table, a.entity_name, a.content)
                    }
                    None => println!("[{}] {}: {}", a.entity.as_str(), a.entity_name, a.content),
                }
            }
        }
        Commands::Schema => {
            let (snapshot, _) = open_pipeline(&cfg).await?;
            print_schema(&snapshot);
        }
    }

    Ok(())
}

/// Connect to the target database, introspect its schema, and open the
/// metadata graph (building it against the current snapshot).
async fn open_pipeline(cfg: &Config) -> anyhow::Result<(SchemaSnapshot, Box<dyn MetadataGraph>)> {
    let pool = db::connect(&cfg.database.path).await?;
    let introspector = SqliteIntrospector::new(pool, cfg.database.name.clone());
    let snapshot = introspector.fetch_schema().await?;
    let graph = open_graph(
        &cfg.graph.backend,
        cfg.graph.path.as_deref(),
        &snapshot,
    )
    .await?;
    Ok((snapshot, graph))
}

fn print_schema(snapshot: &SchemaSnapshot) {
    println!("Database: {}\n", snapshot.database);
    for table in &snapshot.tables {
        println!("Table: {}", table.name);
        for col in &table.columns {
            let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
            println!("  - {}: {} {}", col.name, col.data_type, nullable);
        }
        if !table.primary_keys.is_empty() {
            println!("  Primary keys: {}", table.primary_keys.join(", "));
        }
        for fk in &table.foreign_keys {
            println!(
                "  FK: {}.{} -> {}.{}",
                fk.from_table, fk.from_column, fk.to_table, fk.to_column
            );
        }
        println!();
    }
}
