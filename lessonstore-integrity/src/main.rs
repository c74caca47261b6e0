//! lessonstore-integrity - command-line entry point
//!
//! Runs one pass per invocation against a lesson store. Summaries go to
//! stdout, logs to stderr.
//!
//! Exit codes: 0 success, 1 fatal error, 2 prerequisite cycles found,
//! 130 cancelled.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lessonstore_common::config::IntegrityConfig;
use lessonstore_common::db::{
    ensure_initialized, init_store, open_store, ColumnDefinition, SchemaMigrator, StructuralDelta, TagProvenance,
};
use lessonstore_integrity::ingest::{ingest, load_documents, IngestOptions};
use lessonstore_integrity::{
    DuplicateResolver, IdentityValidator, PlaceholderPolicy, PrerequisiteGraphValidator, StoreStatus, Summarize,
    TagAssociationManager, TitleMatch,
};
use sqlx::SqlitePool;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Pass completed, including a pass with nothing to do
    Success,
    /// Store missing, transaction failure or inconsistent store
    Fatal,
    /// Prerequisite cycles found
    Cycles,
    Cancelled,
}

impl Outcome {
    fn code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Fatal => 1,
            Outcome::Cycles => 2,
            Outcome::Cancelled => 130,
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.code())
    }
}

/// Command-line arguments for lessonstore-integrity
#[derive(Parser, Debug)]
#[command(name = "lessonstore-integrity")]
#[command(about = "Content integrity and schema migration for lesson stores")]
#[command(version)]
struct Cli {
    /// Store file (overrides LESSONSTORE_DB and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (overrides LESSONSTORE_CONFIG and the default locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the store if needed and apply the declared schema
    Init,

    /// Apply the declared schema to an existing store
    Migrate,

    /// Add one column if it is not already present
    AddColumn {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        /// SQL type, e.g. INTEGER or TEXT
        #[arg(long = "type")]
        sql_type: String,
        /// Default literal applied to existing rows
        #[arg(long)]
        default: Option<String>,
        #[arg(long)]
        not_null: bool,
    },

    /// Load lesson documents from a directory and run every pass
    Ingest { dir: PathBuf },

    /// Replace invalid or repeated identifiers
    RepairIds,

    /// Delete duplicate lessons, keeping the most recently updated
    Dedupe {
        /// Compare titles ignoring case and surrounding whitespace
        #[arg(long)]
        normalize_titles: bool,
    },

    /// Strip invalid prerequisite edges
    ValidatePrereqs {
        /// Placeholder identifier prefix (repeatable; replaces configured prefixes)
        #[arg(long = "placeholder-prefix")]
        placeholder_prefixes: Vec<String>,
        /// Fail with exit code 2 if prerequisites form a cycle
        #[arg(long)]
        check_cycles: bool,
    },

    /// Give every untagged lesson the fallback system tag
    TagSweep {
        #[arg(long)]
        fallback_tag: Option<String>,
    },

    /// Tag management
    #[command(subcommand)]
    Tag(TagCommand),

    /// Row counts and schema drift
    Status,
}

#[derive(Subcommand, Debug)]
enum TagCommand {
    /// Create a tag, or show the existing one with that name
    Create {
        name: String,
        /// Owner of a user tag; omit for a system tag
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Associate a lesson with a tag
    Associate { lesson_id: String, tag_id: String },

    /// List system tags, plus a user's own tags with --user
    List {
        #[arg(long)]
        user: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter_handle = init_tracing();

    info!(
        "Starting lessonstore-integrity v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = match IntegrityConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Outcome::Fatal.into();
        }
    };

    if std::env::var_os("RUST_LOG").is_none() {
        if let Err(e) = filter_handle.reload(EnvFilter::new(&config.log_level)) {
            warn!("Could not apply log level '{}': {}", config.log_level, e);
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return Outcome::Fatal.into();
        }
    };

    let outcome = runtime.block_on(async {
        tokio::select! {
            result = run(cli, config) => Some(result),
            _ = cancel_signal() => None,
        }
    });

    settle(outcome).into()
}

/// Outcome of a finished run, or of a cancelled one (`None`)
fn settle(run: Option<Result<Outcome>>) -> Outcome {
    match run {
        Some(Ok(outcome)) => outcome,
        Some(Err(e)) => {
            error!("{:#}", e);
            Outcome::Fatal
        }
        None => {
            eprintln!("Cancelled; the active pass was rolled back");
            Outcome::Cancelled
        }
    }
}

/// Log to stderr; RUST_LOG wins, otherwise the config level is applied once loaded
fn init_tracing() -> reload::Handle<EnvFilter, Registry> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    handle
}

/// Resolves on Ctrl+C or SIGTERM
async fn cancel_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling");
        },
    }
}

async fn run(cli: Cli, config: IntegrityConfig) -> Result<Outcome> {
    let store_path = config.resolve_store_path(cli.db.as_deref());
    info!("Store: {}", store_path.display());

    match cli.command {
        Command::Init => {
            let (_pool, report) = init_store(&store_path)
                .await
                .with_context(|| format!("Failed to initialize {}", store_path.display()))?;
            print!("{}", report);
            println!("{}", report.summary());
        }

        Command::Migrate => {
            let pool = open(&store_path).await?;
            let report = SchemaMigrator::migrate(&pool).await.context("Migration failed")?;
            print!("{}", report);
            println!("{}", report.summary());
        }

        Command::AddColumn {
            table,
            column,
            sql_type,
            default,
            not_null,
        } => {
            let pool = open(&store_path).await?;
            let mut definition = ColumnDefinition::new(column, sql_type);
            if let Some(default) = default {
                definition = definition.default(default);
            }
            if not_null {
                definition = definition.not_null();
            }
            let delta = StructuralDelta::add_column(table, definition);
            let outcome = SchemaMigrator::apply_delta(&pool, &delta)
                .await
                .with_context(|| format!("Failed to {}", delta))?;
            println!("{}: {}", delta, outcome);
        }

        Command::Ingest { dir } => {
            let pool = open_initialized(&store_path).await?;
            let corpus = load_documents(&dir)?;
            for record in &corpus.malformed {
                println!("Skipped {}: {}", record.path.display(), record.reason);
            }

            let options = IngestOptions {
                policy: PlaceholderPolicy::new(&config.prerequisites.placeholder_prefixes),
                title_match: title_match(config.duplicates.normalize_titles),
                check_cycles: config.prerequisites.check_cycles,
                fallback_tag: Some(config.tags.fallback_tag.clone()),
            };
            let report = ingest(&pool, corpus, &options).await.context("Ingest failed")?;

            for deletion in &report.duplicates.deletions {
                println!("Duplicate {}", deletion);
            }
            for violation in &report.store_prerequisites.cycles {
                println!("Cycle: {}", violation);
            }
            println!(
                "Inserted {} lesson(s), {} tag(s) created, {} association(s)",
                report.insert.inserted, report.insert.tags_created, report.insert.associations_created
            );
            println!("{}", report.summary());

            if report.store_prerequisites.has_cycles() {
                return Ok(Outcome::Cycles);
            }
        }

        Command::RepairIds => {
            let pool = open_initialized(&store_path).await?;
            let report = IdentityValidator::repair_store(&pool).await.context("Identifier repair failed")?;
            for repair in &report.repairs {
                println!("Repaired {}", repair);
            }
            if report.orphaned_progress > 0 {
                println!(
                    "{} progress row(s) still reference retired lesson identifiers",
                    report.orphaned_progress
                );
            }
            println!("{}", report.summary());
        }

        Command::Dedupe { normalize_titles } => {
            let pool = open_initialized(&store_path).await?;
            let matching = title_match(normalize_titles || config.duplicates.normalize_titles);
            let report = DuplicateResolver::resolve(&pool, matching)
                .await
                .context("Duplicate resolution failed")?;
            for deletion in &report.deletions {
                println!("Duplicate {}", deletion);
            }
            for collision in &report.order_collisions {
                println!(
                    "Order collision {}#{}: {}",
                    collision.domain,
                    collision.order_index,
                    collision.lesson_ids.join(", ")
                );
            }
            println!("{}", report.summary());
        }

        Command::ValidatePrereqs {
            placeholder_prefixes,
            check_cycles,
        } => {
            let pool = open_initialized(&store_path).await?;
            let policy = if placeholder_prefixes.is_empty() {
                PlaceholderPolicy::new(&config.prerequisites.placeholder_prefixes)
            } else {
                PlaceholderPolicy::new(&placeholder_prefixes)
            };
            let report = PrerequisiteGraphValidator::validate_store(
                &pool,
                &policy,
                check_cycles || config.prerequisites.check_cycles,
            )
            .await
            .context("Prerequisite validation failed")?;

            for edge in &report.stripped {
                println!("Stripped {}", edge);
            }
            for violation in &report.cycles {
                println!("Cycle: {}", violation);
            }
            println!("{}", report.summary());

            if report.has_cycles() {
                return Ok(Outcome::Cycles);
            }
        }

        Command::TagSweep { fallback_tag } => {
            let pool = open_initialized(&store_path).await?;
            let name = fallback_tag.unwrap_or_else(|| config.tags.fallback_tag.clone());
            let report = TagAssociationManager::sweep_untagged(&pool, &name)
                .await
                .context("Tag sweep failed")?;
            for lesson_id in &report.lessons_tagged {
                println!("Tagged {} with '{}'", lesson_id, report.fallback_tag.name);
            }
            println!("{}", report.summary());
        }

        Command::Tag(command) => {
            let pool = open_initialized(&store_path).await?;
            run_tag_command(&pool, command).await?;
        }

        Command::Status => {
            let pool = open_initialized(&store_path).await?;
            let status = StoreStatus::collect(&pool).await?;
            print!("{}", status);
        }
    }

    Ok(Outcome::Success)
}

async fn run_tag_command(pool: &SqlitePool, command: TagCommand) -> Result<()> {
    match command {
        TagCommand::Create {
            name,
            user,
            description,
        } => {
            let provenance = TagProvenance::from_owner(user);
            let tag = TagAssociationManager::create_or_fetch(pool, &name, &provenance, description.as_deref())
                .await
                .with_context(|| format!("Failed to create tag '{}'", name))?;
            println!("{}\t{}\t{}", tag.tag_id, tag.name, tag.provenance);
        }

        TagCommand::Associate { lesson_id, tag_id } => {
            let created = TagAssociationManager::associate(pool, &lesson_id, &tag_id).await?;
            if created {
                println!("Associated {} with {}", lesson_id, tag_id);
            } else {
                println!("{} already associated with {}", lesson_id, tag_id);
            }
        }

        TagCommand::List { user } => {
            let tags = match user {
                Some(user) => TagAssociationManager::list_visible_tags(pool, &user).await?,
                None => TagAssociationManager::list_system_tags(pool).await?,
            };
            for tag in tags {
                println!("{}\t{}\t{}", tag.tag_id, tag.name, tag.provenance);
            }
        }
    }
    Ok(())
}

fn title_match(normalize: bool) -> TitleMatch {
    if normalize {
        TitleMatch::Normalized
    } else {
        TitleMatch::Exact
    }
}

async fn open(path: &Path) -> Result<SqlitePool> {
    open_store(path)
        .await
        .with_context(|| format!("Cannot open store {} (run `init` to create it)", path.display()))
}

async fn open_initialized(path: &Path) -> Result<SqlitePool> {
    let pool = open(path).await?;
    ensure_initialized(&pool).await?;
    Ok(pool)
}
