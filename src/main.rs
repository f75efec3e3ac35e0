use std::{path::PathBuf, sync::Arc, time::Instant};

use archive_pacer::{
    archive::{
        CoordinatorRun, InitReport, RunContext, RunError, RunStatus, format_duration,
        initialize_boundaries, run_coordinator, summarize,
    },
    config::PacerConfig,
    db::DbPool,
    lock::{LockWaiter, RedisLockProbe},
    observability,
    trigger::TriggerClient,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Paces archival-rule boundaries for an external archival worker",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "archive-pacer.toml")]
    config: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize boundaries, then run the paced archival loop (default)
    Run,
    /// Compute and store the initial boundaries only
    Init,
    /// Create the archive rule tables and exit
    Migrate,
    /// Load and validate the config file, then print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match PacerConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                args.config.display(),
                e
            );
            std::process::exit(1);
        }
    };

    let command = args.command.unwrap_or(Command::Run);
    if let Command::CheckConfig = command {
        print_effective_config(&args.config, &config);
        return;
    }

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    tracing::info!(
        config_file = %args.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Archive pacer starting"
    );

    let ok = match command {
        Command::Migrate => run_migrate(&config).await,
        Command::Init => run_init_only(&config).await,
        Command::Run => run_paced(&config).await,
        Command::CheckConfig => true,
    };

    if !ok {
        std::process::exit(1);
    }
}

/// Open the rule store, applying migrations first when the config asks for it.
async fn connect_database(config: &PacerConfig) -> Option<DbPool> {
    let db = match DbPool::from_config(&config.database, &config.archive.tables).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            return None;
        }
    };

    if config.database.run_migrations()
        && let Err(e) = db.run_migrations().await
    {
        tracing::error!(error = %e, "Failed to run database migrations");
        db.close().await;
        return None;
    }

    Some(db)
}

async fn run_migrate(config: &PacerConfig) -> bool {
    let Some(db) = connect_database(config).await else {
        return false;
    };

    let result = db.run_migrations().await;
    db.close().await;

    match result {
        Ok(()) => {
            tracing::info!("Database migrations completed successfully");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to run database migrations");
            false
        }
    }
}

async fn run_init_only(config: &PacerConfig) -> bool {
    let Some(db) = connect_database(config).await else {
        return false;
    };

    let outcome = async {
        let ctx = build_context(config, &db, CancellationToken::new(), false)
            .await
            .ok_or(())?;
        initialize(&ctx).await.map_err(|_| ())
    }
    .await;

    db.close().await;
    outcome.is_ok()
}

async fn run_paced(config: &PacerConfig) -> bool {
    let started = Instant::now();
    let Some(db) = connect_database(config).await else {
        return false;
    };

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let ok = match build_context(config, &db, cancel, config.trigger.check_keep_alive).await {
        Some(ctx) => match execute(&ctx).await {
            Ok(run) => {
                report_run(&run);
                !run.status.is_failure()
            }
            Err(e) => {
                tracing::error!(error = %e, "Archive run aborted");
                false
            }
        },
        None => false,
    };

    db.close().await;
    tracing::info!("Database connections closed");

    let elapsed = started.elapsed();
    println!("Total run time: {}", format_duration(elapsed));
    tracing::info!(elapsed_secs = elapsed.as_secs_f64(), "Total run time");
    ok
}

/// Connect to Redis and build the trigger client once. The keep-alive check,
/// when asked for, goes through the same client the run uses.
async fn build_context(
    config: &PacerConfig,
    db: &DbPool,
    cancel: CancellationToken,
    check_keep_alive: bool,
) -> Option<RunContext> {
    let probe = match RedisLockProbe::from_config(&config.redis).await {
        Ok(probe) => probe,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to Redis");
            return None;
        }
    };
    if let Err(e) = probe.ping().await {
        tracing::error!(error = %e, "Redis did not answer PING");
        return None;
    }

    let trigger = match TriggerClient::from_config(&config.trigger) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build trigger client");
            return None;
        }
    };
    if check_keep_alive {
        trigger.report_keep_alive().await;
    }

    Some(RunContext {
        rules: db.archive_rules(),
        lock: LockWaiter::from_config(Arc::new(probe), &config.lock),
        trigger,
        archive: config.archive.clone(),
        cancel,
    })
}

async fn initialize(ctx: &RunContext) -> Result<InitReport, RunError> {
    let now = chrono::Local::now().naive_local();
    match initialize_boundaries(ctx, now).await {
        Ok(report) => {
            println!("{report}");
            Ok(report)
        }
        Err(e) => {
            tracing::error!(error = %e, "Boundary initialization failed");
            Err(RunError::Init(e))
        }
    }
}

async fn execute(ctx: &RunContext) -> Result<CoordinatorRun, RunError> {
    let report = initialize(ctx).await?;

    if report.headers.is_empty() {
        tracing::warn!("No auto-archive tables configured; skipping the archival loop");
        return Ok(CoordinatorRun {
            records: Vec::new(),
            status: RunStatus::Completed,
        });
    }

    Ok(run_coordinator(ctx, &report.headers).await)
}

fn report_run(run: &CoordinatorRun) {
    match summarize(&run.records) {
        Some(summary) => println!("{summary}"),
        None => println!("No iterations completed"),
    }

    match &run.status {
        RunStatus::Completed => tracing::info!(iterations = run.records.len(), "Archive run complete"),
        RunStatus::Cancelled => tracing::warn!(
            iterations = run.records.len(),
            "Archive run cancelled by signal"
        ),
        RunStatus::Failed(e) => tracing::error!(
            iterations = run.records.len(),
            error = %e,
            "Archive run stopped on fatal error"
        ),
    }
}

fn print_effective_config(path: &std::path::Path, config: &PacerConfig) {
    println!("Config file: {}", path.display());
    println!("[archive]");
    println!("  increment_value        = {}", config.archive.increment_value);
    println!("  default_min_id_value   = {}", config.archive.default_min_id_value);
    println!("  total_iterations       = {}", config.archive.total_iterations);
    println!("  default_retention_days = {}", config.archive.default_retention_days);
    println!("  header_table           = {}", config.archive.tables.header_table);
    println!("  term_table             = {}", config.archive.tables.term_table);
    println!("[database]");
    println!("  {}", config.database.describe());
    println!("  run_migrations         = {}", config.database.run_migrations());
    println!("[lock]");
    println!("  key                    = {}", config.lock.key);
    println!("  wait_seconds           = {}", config.lock.wait_seconds);
    match config.lock.max_wait_secs {
        Some(max) => println!("  max_wait_secs          = {max}"),
        None => println!("  max_wait_secs          = unbounded"),
    }
    println!("[trigger]");
    println!("  url                    = {}", config.trigger.url);
    println!("  timeout_secs           = {}", config.trigger.timeout_secs);
    println!("  check_keep_alive       = {}", config.trigger.check_keep_alive);
    println!("  retry total            = {}", config.trigger.retry_policy.total);
    println!("  retry backoff_factor   = {}", config.trigger.retry_policy.backoff_factor);
    println!(
        "  retry status_forcelist = {:?}",
        config.trigger.retry_policy.status_forcelist
    );
    println!("Configuration is valid");
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Shutdown signal received, stopping at the next lock check");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
