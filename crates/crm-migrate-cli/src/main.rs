//! crm-migrate CLI - move the CRM tables from the managed PostgreSQL backend
//! into MySQL.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use crm_migrate::{
    Config, Exporter, MigrateError, MigrationRun, MysqlWriter, Orchestrator, PostgresReader,
    ReconciliationResult, RunLog, SourceReader, StagingStore, TableCatalog, TableStatus,
    TargetWriter, Verifier,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "crm-migrate")]
#[command(about = "Migrate the CRM tables from the managed PostgreSQL backend to MySQL")]
#[command(version)]
struct Cli {
    /// Directory for exported JSON files and the run log [env: MIGRATE_DATA_DIR]
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, global = true, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export every source table to JSON files in the data directory
    Export,

    /// Load previously exported JSON files into the target database
    Import,

    /// Migrate directly from the source database to the target database
    Migrate,

    /// Compare source and target row counts without moving data
    Verify,

    /// Print the ranked table plan
    Tables,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    // A missing .env file is normal; the environment may already be set.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let plan = TableCatalog::builtin().plan()?;

    if let Commands::Tables = cli.command {
        print_plan(&plan, cli.output_json)?;
        return Ok(());
    }

    let mut config = Config::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.migration.data_dir = dir;
    }

    match cli.command {
        Commands::Tables => unreachable!(), // Handled above

        Commands::Export => {
            let source = PostgresReader::new(config.require_source()?).await?;
            let cancel = setup_signal_handler()?;
            let store = StagingStore::new(&config.migration.data_dir);

            let result = Exporter::new(&source, &store, config.migration.page_size)
                .with_cancel(cancel.clone())
                .export(&plan)
                .await;
            source.close().await;
            let (run, metadata) = result?;

            if cli.output_json {
                println!("{}", run.to_json()?);
            } else {
                print_summary("Export completed!", &run);
                println!(
                    "  Files: {} ({} records)",
                    store.dir().display(),
                    metadata.total_records
                );
            }
            finish(&cancel)?;
        }

        Commands::Import => {
            // Checked before any connection is attempted.
            let store = StagingStore::open(&config.migration.data_dir)?;
            let target_config = config.require_target()?;

            if let Some(metadata) = store.read_metadata()? {
                info!(
                    "Importing export from {} ({} records in {} tables)",
                    metadata.exported_at,
                    metadata.total_records,
                    metadata.tables.len()
                );
            } else {
                warn!("No {} in {}", crm_migrate::staging::METADATA_FILE, store.dir().display());
            }

            let target = MysqlWriter::new(target_config).await?;
            let cancel = setup_signal_handler()?;
            let store = Arc::new(store);
            let run = migrate(
                store.clone(),
                Arc::new(target),
                &config,
                &plan,
                cancel.clone(),
            )
            .await;

            save_run_log(&run, &store.run_log_path())?;
            report(&run, "Import completed!", cli.output_json)?;
            finish(&cancel)?;
        }

        Commands::Migrate => {
            let (source, target) = connect_both(&config).await?;
            let cancel = setup_signal_handler()?;

            let run = migrate(
                Arc::new(source),
                Arc::new(target),
                &config,
                &plan,
                cancel.clone(),
            )
            .await;

            let store = StagingStore::new(&config.migration.data_dir);
            store.ensure_dir()?;
            save_run_log(&run, &store.run_log_path())?;
            report(&run, "Migration completed!", cli.output_json)?;
            finish(&cancel)?;
        }

        Commands::Verify => {
            let (source, target) = connect_both(&config).await?;

            let verifier = Verifier::new(&source, &target);
            let mut results = Vec::with_capacity(plan.len());
            for spec in &plan {
                results.push(verifier.verify(&spec.name).await);
            }
            source.close().await;
            target.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("\nVerification completed!");
                print_reconciliation(&results);
            }
        }
    }

    Ok(())
}

/// Connect the source, then the target; the source is closed again if the
/// target cannot be reached.
async fn connect_both(config: &Config) -> Result<(PostgresReader, MysqlWriter), MigrateError> {
    let source_config = config.require_source()?;
    let target_config = config.require_target()?;

    let source = PostgresReader::new(source_config).await?;
    match MysqlWriter::new(target_config).await {
        Ok(target) => Ok((source, target)),
        Err(e) => {
            source.close().await;
            Err(e)
        }
    }
}

/// Run the orchestrator and release both endpoints afterwards.
async fn migrate(
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    config: &Config,
    plan: &[crm_migrate::TableSpec],
    cancel: CancellationToken,
) -> MigrationRun {
    let run = Orchestrator::new(source.clone(), target.clone(), &config.migration)
        .with_cancel(cancel)
        .run(plan)
        .await;
    source.close().await;
    target.close().await;
    run
}

fn save_run_log(run: &MigrationRun, path: &std::path::Path) -> Result<(), MigrateError> {
    RunLog::from_run(run).save(path)?;
    info!("Run log written to {}", path.display());
    Ok(())
}

fn report(run: &MigrationRun, title: &str, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", run.to_json()?);
    } else {
        print_summary(title, run);
        print_reconciliation(&run.reconciliation);
    }
    Ok(())
}

/// Table failures leave the exit code alone; an interrupted run does not.
fn finish(cancel: &CancellationToken) -> Result<(), MigrateError> {
    if cancel.is_cancelled() {
        return Err(MigrateError::Cancelled);
    }
    Ok(())
}

fn print_plan(plan: &[crm_migrate::TableSpec], output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }
    println!("Load order ({} tables):", plan.len());
    for spec in plan {
        println!("  {:>3}  {}", spec.rank, spec.name);
    }
    Ok(())
}

fn print_summary(title: &str, run: &MigrationRun) {
    println!("\n{}", title);
    println!("  Run ID: {}", run.run_id);
    println!("  Duration: {:.2}s", run.duration_seconds());
    println!(
        "  Tables: {} ok, {} failed, {} cancelled (of {})",
        run.tables_imported(),
        run.tables_failed(),
        run.tables_cancelled(),
        run.tables.len()
    );
    println!(
        "  Records: {} extracted, {} loaded, {} duplicates skipped, {} failed",
        run.total_extracted(),
        run.total_records(),
        run.total_skipped_duplicates(),
        run.total_failed_rows()
    );
    println!();
    for table in &run.tables {
        println!(
            "  {:<20} {:<10} extracted {:>8}  loaded {:>8}  duplicates {:>8}  failed {:>6}",
            table.name,
            table.status,
            table.extracted,
            table.loaded,
            table.skipped_duplicates,
            table.failed
        );
    }

    let failed: Vec<_> = run
        .tables
        .iter()
        .filter(|t| t.status == TableStatus::Failed)
        .collect();
    if !failed.is_empty() {
        println!("\n  Failed tables:");
        for table in failed {
            println!(
                "    {}: {}",
                table.name,
                table.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

fn print_reconciliation(results: &[ReconciliationResult]) {
    if results.is_empty() {
        return;
    }
    let matching = results.iter().filter(|r| r.matches).count();
    println!("\n  Reconciliation: {}/{} tables match", matching, results.len());
    for r in results.iter().filter(|r| !r.matches) {
        match &r.error {
            Some(err) => println!("    {}: {}", r.table, err),
            None => println!(
                "    {}: source={} target={} (MISMATCH)",
                r.table, r.source_count, r.target_count
            ),
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays machine-readable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
///
/// Work in progress stops at the next page or batch boundary.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Finishing the current batch and stopping...",
            name
        );
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current batch and stopping...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
