//! # CrawlForge Supervisor
//!
//! Process entry point (§4.10): wires Store, Rotation Manager, Robots
//! Cache, Fetcher, and Scheduler together, runs the Monitoring API
//! alongside the crawl loop, and owns signal handling and exit codes.
//!
//! Grounded in the teacher's `riptide-workers/src/main.rs` (argument
//! struct, `tokio::select!`-based shutdown race, structured logging
//! setup) and `riptide-api/src/main.rs` (`TcpListener::bind` +
//! `axum::serve` for the HTTP surface running alongside the main loop).
//! `riptide-cli/src/error.rs`'s `ExitCode` convention is extended here
//! from its two codes (0/1) to this spec's four (0/1/2/3).

mod config;

use clap::Parser;
use config::{Cli, RuntimeConfig};
use crawlforge_api::{ApiState, BufferMakeWriter, LogBuffer};
use crawlforge_fetch::{Fetcher, FetcherConfig};
use crawlforge_robots::{RobotsCache, RobotsConfig};
use crawlforge_rotation::RotationManager;
use crawlforge_scheduler::{Scheduler, SchedulerConfig};
use crawlforge_store::memory::InMemoryStore;
use crawlforge_store::postgres::PostgresStore;
use crawlforge_store::Store;
use crawlforge_types::{CrawlError, Progress, StoreError};
use std::collections::HashMap;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// A repeat shutdown signal within this window forces an immediate exit
/// instead of waiting out the drain (§4.10).
const FORCE_EXIT_WINDOW: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.status || cli.reset {
        init_plain_tracing();
        return run_control_command(&cli).await;
    }

    let config = match RuntimeConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_plain_tracing();
            error!(error = %err, "invalid configuration");
            return ExitCode::from(3);
        }
    };

    let log_buffer = init_tracing();
    run_supervisor(config, log_buffer).await
}

/// Structured JSON logging to stdout plus an in-process ring buffer
/// (`LogBuffer`) the Monitoring API's `/logs` endpoint reads from. The
/// teacher has no in-process log readback, only `tracing`/OTel export —
/// `BufferMakeWriter` is layered on top of it rather than replacing it.
fn init_tracing() -> Arc<LogBuffer> {
    let log_buffer = LogBuffer::new(2000);
    let json_format = std::env::var("CRAWLFORGE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let buffer_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(BufferMakeWriter(log_buffer.clone()));

    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).with(buffer_layer).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).with(buffer_layer).init();
    }

    log_buffer
}

/// `--status`/`--reset` don't run the Monitoring API, so there's no
/// reason to pay for a log ring buffer that nothing will ever read.
fn init_plain_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

async fn build_store(database_url: &str) -> Result<Arc<dyn Store>, CrawlError> {
    let store = PostgresStore::connect(database_url)
        .await
        .map_err(|e| CrawlError::Store(StoreError::Permanent(e.to_string())))?;
    store
        .migrate()
        .await
        .map_err(|e| CrawlError::Store(StoreError::Permanent(e.to_string())))?;
    Ok(Arc::new(store))
}

async fn build_primary_or_memory(database_url: &Option<String>) -> Result<Arc<dyn Store>, CrawlError> {
    match database_url {
        Some(url) => build_store(url).await,
        None => {
            warn!("no database configured, using an in-memory store (state will not survive a restart)");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

async fn run_control_command(cli: &Cli) -> ExitCode {
    let store = match build_primary_or_memory(&cli.database_url).await {
        Ok(store) => store,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(2);
        }
    };

    if cli.status {
        return print_status(store.as_ref()).await;
    }

    reset_progress(store.as_ref(), cli.batch_size).await
}

async fn print_status(store: &dyn Store) -> ExitCode {
    match store.load_progress().await {
        Ok(progress) => {
            let progress = progress.unwrap_or_else(|| Progress::initial(1));
            match serde_json::to_string_pretty(&progress) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("failed to render progress: {err}");
                    ExitCode::from(1)
                }
            }
        }
        Err(err) => {
            eprintln!("failed to load progress: {err}");
            ExitCode::from(2)
        }
    }
}

async fn reset_progress(store: &dyn Store, batch_size: usize) -> ExitCode {
    print!("This clears the crawl checkpoint. Continue? [y/N] ");
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        eprintln!("failed to read confirmation, aborting reset");
        return ExitCode::from(3);
    }
    if !answer.trim().eq_ignore_ascii_case("y") {
        println!("aborted, no changes made");
        return ExitCode::SUCCESS;
    }

    match store.save_progress(&Progress::initial(batch_size)).await {
        Ok(()) => {
            println!("progress reset");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("failed to reset progress: {err}");
            ExitCode::from(2)
        }
    }
}

async fn run_supervisor(config: RuntimeConfig, log_buffer: Arc<LogBuffer>) -> ExitCode {
    info!(
        bind = %config.bind,
        batch_size = config.batch_size,
        write_targets = config.write_targets.len(),
        "starting crawlforge supervisor"
    );

    let primary = match build_store(&config.primary_database_url).await {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "failed to connect to primary store");
            return ExitCode::from(2);
        }
    };

    let mut write_targets: HashMap<String, Arc<dyn Store>> = HashMap::new();
    for spec in &config.write_targets {
        let store = if spec.url == config.primary_database_url {
            primary.clone()
        } else {
            match build_store(&spec.url).await {
                Ok(store) => store,
                Err(err) => {
                    error!(error = %err, database = %spec.name, "failed to connect to write target");
                    return ExitCode::from(2);
                }
            }
        };
        write_targets.insert(spec.name.clone(), store);
    }

    let rotation = Arc::new(RotationManager::new(config.initial_database_usage()));

    let robots = match RobotsCache::new(RobotsConfig {
        user_agent: config.user_agent.clone(),
        ..Default::default()
    }) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(err) => {
            error!(error = %err, "failed to build robots cache");
            return ExitCode::from(3);
        }
    };

    let fetcher_config = FetcherConfig {
        global_concurrency: config.global_concurrency,
        per_host_concurrency: config.per_host_concurrency,
        min_host_delay: config.min_host_delay,
        per_url_budget: config.global_timeout,
        retry_attempts: config.retry_attempts,
        respect_robots: config.respect_robots,
        user_agents: vec![config.user_agent.clone()],
        ..Default::default()
    };
    let fetcher = match Fetcher::new(fetcher_config, robots) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(err) => {
            error!(error = %err, "failed to build fetcher");
            return ExitCode::from(3);
        }
    };

    let scheduler_config = SchedulerConfig {
        batch_size: config.batch_size,
        recrawl_window: config.recrawl_window,
        ..Default::default()
    };
    let scheduler = Scheduler::new(primary.clone(), write_targets, rotation.clone(), fetcher, scheduler_config);

    let api_state = ApiState::new(primary.clone(), rotation.clone(), log_buffer);
    let api_router = crawlforge_api::router(api_state);
    let listener = match tokio::net::TcpListener::bind(config.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, bind = %config.bind, "failed to bind monitoring api");
            return ExitCode::from(3);
        }
    };
    let api_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, api_router).await {
            error!(error = %err, "monitoring api server exited");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(wait_for_shutdown(shutdown_tx));

    let exit_code = match scheduler.run(shutdown_rx).await {
        Ok(reason) => {
            info!(?reason, "scheduler stopped");
            ExitCode::SUCCESS
        }
        Err(CrawlError::Store(_)) => {
            error!("scheduler stopped on an unrecoverable store error");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(error = %err, "scheduler stopped on a fatal error");
            ExitCode::from(1)
        }
    };

    api_task.abort();
    signal_task.abort();
    exit_code
}

/// First interrupt/terminate flips `shutdown_tx` to request a drain. A
/// second one within `FORCE_EXIT_WINDOW` exits immediately rather than
/// waiting out `drain_timeout` — the normal drain path has already
/// committed Progress after every completed batch, so there is no
/// additional in-memory state to flush on the forced path.
async fn wait_for_shutdown(shutdown_tx: watch::Sender<bool>) {
    wait_for_signal().await;
    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    tokio::select! {
        _ = wait_for_signal() => {
            warn!("second shutdown signal received, exiting immediately");
            std::process::exit(0);
        }
        _ = tokio::time::sleep(FORCE_EXIT_WINDOW) => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
