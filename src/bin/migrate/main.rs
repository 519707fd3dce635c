//! Migration CLI - stages source tables and runs the transform passes,
//! emitting one JSON summary object per invocation

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hoa_migration::migration::fetch::SourceClient;
use hoa_migration::migration::types::{MigrateStats, RunSummary, StagedTable};
use hoa_migration::migration::{stage, transform, write};
use regex::Regex;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "migrate")]
#[command(about = "HOA source-data migration pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch one source table and stage its records verbatim
    Stage {
        base_id: String,
        /// Source table name
        #[arg(long)]
        table: String,
        /// Source view to narrow the record set
        #[arg(long)]
        view: Option<String>,
        /// Re-count source records after staging and compare
        #[arg(long)]
        verify: bool,
    },
    /// Stage every table in the base (bulk import)
    StageAll {
        base_id: String,
        /// Only stage tables whose name matches this regex
        #[arg(long)]
        include: Option<String>,
        /// Skip tables whose name matches this regex
        #[arg(long)]
        exclude: Option<String>,
        /// Re-count source records after staging and compare
        #[arg(long)]
        verify: bool,
    },
    /// Transform staged records into homeowner rows
    Homeowners {
        base_id: String,
        /// Source table name (default "Homeowners")
        #[arg(long)]
        table: Option<String>,
        /// Run every lookup and transform but write nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Transform staged records into household-member rows
    Members {
        base_id: String,
        /// Source table name (default "Household Members")
        #[arg(long)]
        table: Option<String>,
        /// Source table the parent homeowners were staged from
        #[arg(long)]
        parent_table: Option<String>,
        /// Run every lookup and transform but write nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Transform staged records into vehicle and sticker rows
    Stickers {
        base_id: String,
        /// Source table name (default "Vehicle Stickers")
        #[arg(long)]
        table: Option<String>,
        /// Source table the parent homeowners were staged from
        #[arg(long)]
        parent_table: Option<String>,
        /// Run every lookup and transform but write nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Stage the three default tables, then run every transform pass in
    /// dependency order. With --dry-run the staging step is skipped and
    /// the transforms run over whatever is already staged.
    All {
        base_id: String,
        #[arg(long)]
        dry_run: bool,
    },
}

/// Configuration loaded from the environment. Required values are fatal
/// when absent - no silent defaults for credentials.
#[derive(Debug, Clone)]
struct Config {
    database_url: String,
    source_api_url: String,
    source_api_key: String,
}

impl Config {
    fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            source_api_key: std::env::var("SOURCE_API_KEY")
                .context("SOURCE_API_KEY must be set")?,
            source_api_url: std::env::var("SOURCE_API_URL")
                .unwrap_or_else(|_| "https://api.airtable.com".to_string()),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to target store")?;
    info!("Target store connected");

    let client = SourceClient::new(&config.source_api_url, &config.source_api_key)?;

    let summary = run(&cli.command, &client, &db).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run(command: &Commands, client: &SourceClient, db: &PgPool) -> Result<RunSummary> {
    match command {
        Commands::Stage {
            base_id,
            table,
            view,
            verify,
        } => {
            let outcome =
                stage_table(client, db, base_id, table, None, view.as_deref(), *verify).await?;
            Ok(RunSummary {
                command: "stage".to_string(),
                base_id: base_id.clone(),
                table: Some(table.clone()),
                dry_run: false,
                tables: Some(vec![outcome]),
                stats: MigrateStats::default(),
            })
        }
        Commands::StageAll {
            base_id,
            include,
            exclude,
            verify,
        } => {
            let include = compile_filter(include.as_deref()).context("bad --include regex")?;
            let exclude = compile_filter(exclude.as_deref()).context("bad --exclude regex")?;

            let tables = client.list_tables(base_id).await?;
            info!("Base {} has {} tables", base_id, tables.len());

            let mut outcomes = Vec::new();
            for table in tables {
                if let Some(re) = &include {
                    if !re.is_match(&table.name) {
                        info!("Skipping {} (does not match --include)", table.name);
                        continue;
                    }
                }
                if let Some(re) = &exclude {
                    if re.is_match(&table.name) {
                        info!("Skipping {} (matches --exclude)", table.name);
                        continue;
                    }
                }
                let outcome = stage_table(
                    client,
                    db,
                    base_id,
                    &table.name,
                    Some(&table.id),
                    None,
                    *verify,
                )
                .await?;
                outcomes.push(outcome);
            }

            Ok(RunSummary {
                command: "stage-all".to_string(),
                base_id: base_id.clone(),
                table: None,
                dry_run: false,
                tables: Some(outcomes),
                stats: MigrateStats::default(),
            })
        }
        Commands::Homeowners {
            base_id,
            table,
            dry_run,
        } => {
            let table = table
                .as_deref()
                .unwrap_or(transform::DEFAULT_HOMEOWNERS_TABLE);
            let stats = write::run_homeowners(db, base_id, table, *dry_run).await?;
            Ok(summary("homeowners", base_id, Some(table), *dry_run, stats))
        }
        Commands::Members {
            base_id,
            table,
            parent_table,
            dry_run,
        } => {
            let table = table.as_deref().unwrap_or(transform::DEFAULT_MEMBERS_TABLE);
            let parent = parent_table
                .as_deref()
                .unwrap_or(transform::DEFAULT_HOMEOWNERS_TABLE);
            let stats = write::run_members(db, base_id, table, parent, *dry_run).await?;
            Ok(summary("members", base_id, Some(table), *dry_run, stats))
        }
        Commands::Stickers {
            base_id,
            table,
            parent_table,
            dry_run,
        } => {
            let table = table
                .as_deref()
                .unwrap_or(transform::DEFAULT_STICKERS_TABLE);
            let parent = parent_table
                .as_deref()
                .unwrap_or(transform::DEFAULT_HOMEOWNERS_TABLE);
            let stats = write::run_stickers(db, base_id, table, parent, *dry_run).await?;
            Ok(summary("stickers", base_id, Some(table), *dry_run, stats))
        }
        Commands::All { base_id, dry_run } => {
            let mut outcomes = None;
            if *dry_run {
                info!("Dry run: transforming already-staged data, staging skipped");
            } else {
                let mut staged = Vec::new();
                for table in [
                    transform::DEFAULT_HOMEOWNERS_TABLE,
                    transform::DEFAULT_MEMBERS_TABLE,
                    transform::DEFAULT_STICKERS_TABLE,
                ] {
                    staged.push(stage_table(client, db, base_id, table, None, None, false).await?);
                }
                outcomes = Some(staged);
            }

            // Dependency order: homeowners before the stages that link to them.
            let mut stats = write::run_homeowners(
                db,
                base_id,
                transform::DEFAULT_HOMEOWNERS_TABLE,
                *dry_run,
            )
            .await?;
            stats.absorb(
                &write::run_members(
                    db,
                    base_id,
                    transform::DEFAULT_MEMBERS_TABLE,
                    transform::DEFAULT_HOMEOWNERS_TABLE,
                    *dry_run,
                )
                .await?,
            );
            stats.absorb(
                &write::run_stickers(
                    db,
                    base_id,
                    transform::DEFAULT_STICKERS_TABLE,
                    transform::DEFAULT_HOMEOWNERS_TABLE,
                    *dry_run,
                )
                .await?,
            );

            Ok(RunSummary {
                command: "all".to_string(),
                base_id: base_id.clone(),
                table: None,
                dry_run: *dry_run,
                tables: outcomes,
                stats,
            })
        }
    }
}

fn summary(
    command: &str,
    base_id: &str,
    table: Option<&str>,
    dry_run: bool,
    stats: MigrateStats,
) -> RunSummary {
    RunSummary {
        command: command.to_string(),
        base_id: base_id.to_string(),
        table: table.map(str::to_string),
        dry_run,
        tables: None,
        stats,
    }
}

fn compile_filter(pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern.map(Regex::new).transpose().map_err(Into::into)
}

/// Fetch, stage, and optionally verify one table. Verification re-counts
/// the source and compares against the staged row count; a mismatch is
/// reported but does not fail the run.
async fn stage_table(
    client: &SourceClient,
    db: &PgPool,
    base_id: &str,
    table: &str,
    table_id: Option<&str>,
    view: Option<&str>,
    verify: bool,
) -> Result<StagedTable> {
    let records = client.fetch_all_records(base_id, table, view).await?;
    let fetched = records.len();
    let staged = stage::stage_records(db, base_id, table, table_id, &records).await?;

    let verified = if verify {
        let staged_rows = stage::staged_count(db, base_id, table).await? as usize;
        let source_rows = client.fetch_all_records(base_id, table, view).await?.len();
        let matches = staged_rows == source_rows;
        if matches {
            info!("Verified {}: {} rows staged and at source", table, staged_rows);
        } else {
            warn!(
                "Verification mismatch for {}: {} staged vs {} at source",
                table, staged_rows, source_rows
            );
        }
        Some(matches)
    } else {
        None
    };

    Ok(StagedTable {
        table: table.to_string(),
        fetched,
        staged,
        verified,
    })
}
