use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use pageslug_core::backfill::{BackfillReport, SlugBackfillJob};
use pageslug_core::config::load_config;
use pageslug_core::migrate::{current_version, pending_migration_count, run_migrations};
use pageslug_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    ensure_database_ready, init_layout, inspect_runtime, resolve_paths,
};
use pageslug_core::sqlite::SqliteStore;
use pageslug_core::store::{CompletionFlag, PageQuery, RecordStore};

#[derive(Debug, Parser)]
#[command(
    name = "pageslug",
    version,
    about = "Backfill URL slugs for page records that predate the slug field"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "SQLite database holding the page table")]
    db: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            db: cli.db.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Db(DbArgs),
    Slugs(SlugsArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .pageslug/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Stats,
    Migrate,
}

#[derive(Debug, Args)]
struct SlugsArgs {
    #[command(subcommand)]
    command: SlugsSubcommand,
}

#[derive(Debug, Subcommand)]
enum SlugsSubcommand {
    #[command(about = "Report whether a slug backfill is needed")]
    Status,
    #[command(about = "Fill missing slugs and mark the backfill complete")]
    Backfill(BackfillArgs),
}

#[derive(Debug, Args)]
struct BackfillArgs {
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
    #[arg(long, help = "Run even when the status check reports nothing to do")]
    force: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Stats => run_db_stats(&runtime),
            DbSubcommand::Migrate => run_db_migrate(&runtime),
        },
        Some(Commands::Slugs(SlugsArgs { command })) => match command {
            SlugsSubcommand::Status => run_slugs_status(&runtime),
            SlugsSubcommand::Backfill(args) => run_slugs_backfill(&runtime, args),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("Initialized pageslug runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_path(&paths.db_path));
    if report.applied.is_empty() {
        println!("applied: <none>");
    } else {
        for migration in &report.applied {
            println!("applied: {}", migration.label());
        }
    }
    println!("current_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("pending_migrations: {}", pending_migration_count(&paths)?);

    if status.db_exists {
        let config = load_config(&paths.config_path)?;
        let store = SqliteStore::open(&paths.db_path, &config.table(), &config.field())?;
        println!("schema_version: {}", current_version(store.connection())?);
        println!("table: {}", store.table_name());
        if store.supports_slugs()? {
            let total = store.count(&PageQuery::default())?;
            let missing = store.count(&PageQuery::missing_slug())?;
            println!("pages.total: {total}");
            println!("pages.with_slug: {}", total.saturating_sub(missing));
            println!("pages.missing_slug: {missing}");
        } else {
            println!("pages: <no {} column>", store.field_name());
        }
        println!("backfill_complete: {}", format_flag(store.is_set()?));
    }
    print_warnings(&status.warnings);
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_slugs_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_database_ready(&paths, &status)?;

    let config = load_config(&paths.config_path)?;
    let (table, field) = (config.table(), config.field());
    let policy = config.policy_for(&table, &field)?;
    let store = SqliteStore::open(&paths.db_path, &table, &field)?;
    let job = SlugBackfillJob::for_store(&store, policy);

    println!("slugs status");
    println!("target: {table}.{field}");
    println!("unique_in_site: {}", format_flag(job.policy().unique_in_site));
    println!("unique_in_pid: {}", format_flag(job.policy().unique_in_pid));
    println!("completed: {}", format_flag(store.is_set()?));
    if store.supports_slugs()? {
        println!("outstanding: {}", job.outstanding()?);
    } else {
        println!("outstanding: n/a (no {field} column)");
    }
    println!("backfill_needed: {}", format_flag(job.is_backfill_needed()?));
    print_diagnostics(runtime, &paths);

    Ok(())
}

fn run_slugs_backfill(runtime: &RuntimeOptions, args: BackfillArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_database_ready(&paths, &status)?;

    let config = load_config(&paths.config_path)?;
    let (table, field) = (config.table(), config.field());
    let policy = config.policy_for(&table, &field)?;
    let store = SqliteStore::open(&paths.db_path, &table, &field)?;
    let job = SlugBackfillJob::for_store(&store, policy);

    if !args.force && !job.is_backfill_needed()? {
        log::info!("no slug backfill needed for {table}.{field}");
        if args.json {
            println!("{}", serde_json::to_string_pretty(&BackfillReport::default())?);
        } else {
            println!("slugs backfill: nothing to do");
        }
        return Ok(());
    }

    let report = job
        .run()
        .with_context(|| format!("slug backfill of {table}.{field} failed"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_report(report: &BackfillReport) {
    println!("slugs backfill");
    println!(
        "legacy_table: {}",
        report.legacy_table.as_deref().unwrap_or("<none>")
    );
    for message in &report.messages {
        println!("  {message}");
    }
    println!("updated: {}", report.messages.len());
    println!("from_legacy: {}", report.from_legacy);
    println!("from_alias: {}", report.from_alias);
    println!("generated: {}", report.generated);
    println!("suffixed: {}", report.suffixed);
}

fn print_warnings(warnings: &[String]) {
    if !warnings.is_empty() {
        println!("warnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
        db: runtime.db.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
