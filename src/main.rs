//! Main entry point for the Algo Arena matchmaking and sync service
//!
//! Production entry point that loads configuration, initializes the service
//! components and runs until a shutdown signal arrives.

use algo_arena::config::{validate_config, AppConfig};
use algo_arena::service::{AppState, HealthCheck, HealthStatus};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Algo Arena - Matchmaking and match synchronization for competitive programming battles
#[derive(Parser)]
#[command(
    name = "algo-arena",
    version,
    about = "Matchmaking and synchronization engine for competitive programming battles",
    long_about = "Algo Arena pairs players into rated 1v1 and 3v3 coding battles using \
                 expanding rating-tolerance windows, keeps live matches synchronized over a \
                 kind-tagged event bus, resolves concurrent submissions against \
                 server-assigned timestamps, and settles Elo ratings when matches end."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health/metrics server port")]
    health_port: Option<u16>,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Set up structured logging; RUST_LOG wins over the configured level.
fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_level.into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wire up the service, run a health check against it, and exit.
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Running health check");

    let app_state = Arc::new(AppState::new(config).await?);
    let health = HealthCheck::check(app_state).await;

    println!("Health Check: {:?}", health.status);
    println!("  Players Waiting: {}", health.stats.players_waiting);
    println!("  Active Matches: {}", health.stats.active_matches);
    for check in &health.checks {
        println!(
            "  [{:?}] {}{}",
            check.status,
            check.name,
            check
                .message
                .as_deref()
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        );
    }

    if health.status == HealthStatus::Unhealthy {
        std::process::exit(1);
    }
    std::process::exit(0);
}

/// Block until SIGINT or SIGTERM arrives.
async fn wait_for_shutdown_signal() {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Log the effective configuration at startup.
fn display_startup_banner(config: &AppConfig) {
    info!("Algo Arena matchmaking service");
    info!("   service: {}", config.service.name);
    info!("   log level: {}", config.service.log_level);
    info!("   health port: {}", config.service.health_port);
    info!("   amqp: {}", config.amqp.url);
    info!(
        "   rating window: {} -> {} over {}s",
        config.matchmaking.initial_window,
        config.matchmaking.max_window,
        config.matchmaking.window_growth_seconds
    );
    info!(
        "   match duration: {}s, forfeit after {}s of silence",
        config.sync.match_duration_seconds, config.sync.forfeit_after_seconds
    );
}

/// Config file (or environment) plus CLI overrides, validated.
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from {}", config_path.display());
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration is valid");
        display_startup_banner(&config);
        info!("Dry run complete, not starting the service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Wiring service components");
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting background tasks and health server");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("Algo Arena is running");
    info!("Press Ctrl+C to shut down");

    wait_for_shutdown_signal().await;

    info!("Shutting down");
    let shutdown_timeout = config.shutdown_timeout();
    match tokio::time::timeout(shutdown_timeout, app_state.shutdown()).await {
        Ok(()) => info!("Shutdown complete"),
        Err(_) => warn!("Shutdown timed out after {:?}, exiting anyway", shutdown_timeout),
    }

    info!("Algo Arena stopped");
    Ok(())
}
