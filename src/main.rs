//! herakles-proc-usage - self-monitoring exporter for process CPU, RSS and VSS

use axum::{routing::get, Router};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};

use herakles_proc_usage::platform::ENGINE;
use herakles_proc_usage::start_platform_sampler;

mod cache;
mod cli;
mod commands;
mod config;
mod handlers;
mod health_stats;
mod metrics;
mod refresh;
mod state;

use cli::{Args, Commands, LogLevel, OutputFormat};
use commands::{command_check, command_config, command_sample};
use config::{
    render_config, resolve_config, validate_effective_config, Config, DEFAULT_BIND_ADDR,
    DEFAULT_PORT,
};
use handlers::{health_handler, metrics_handler};
use refresh::{spawn_refresh_task, update_cache};
use state::AppState;

/// Prints the effective configuration
fn show_config(config: &Config, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", render_config(config, format, false)?);
    Ok(())
}

/// Resolves the effective log level (CLI if not the default > config > info)
fn resolve_log_level(config: &Config, args: &Args) -> LevelFilter {
    let from_cli = match args.log_level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };
    if from_cli != LevelFilter::INFO {
        return from_cli;
    }
    config
        .log_level
        .as_deref()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::INFO)
}

fn setup_logging(config: &Config, args: &Args) {
    let log_level = resolve_log_level(config, args);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {}", log_level);
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;
        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }
        return show_config(&config, args.config_format);
    }

    let config = resolve_config(&args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        return match command {
            Commands::Check => command_check(&config),
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), *format, *commented),
            Commands::Sample {
                iterations,
                interval_ms,
                format,
            } => {
                setup_logging(&config, &args);
                command_sample(*iterations, *interval_ms, *format).await
            }
        };
    }

    setup_logging(&config, &args);
    info!("Starting herakles-proc-usage with {} engine", ENGINE);

    let bind_ip_str = config
        .bind
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::new(bind_ip_str.parse::<IpAddr>()?, port);
    let refresh_interval = Duration::from_secs(config.refresh_interval_secs());
    let enable_health = config.enable_health.unwrap_or(true);

    let provider = start_platform_sampler()?;
    let state = Arc::new(AppState::new(Arc::from(provider), config)?);
    debug!("Prometheus registry initialized");

    // Perform initial sample before starting server
    info!("Performing initial usage refresh");
    if let Err(e) = update_cache(&state).await {
        error!("Initial usage refresh failed: {}", e);
    }

    let background_task = spawn_refresh_task(state.clone(), refresh_interval);

    // Setup graceful shutdown signal handlers
    let shutdown_signal = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    };

    let mut app = Router::new().route("/metrics", get(metrics_handler));
    if enable_health {
        app = app.route("/health", get(health_handler));
    }
    let app = app.with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!(
        "herakles-proc-usage listening on http://{}:{}",
        bind_ip_str, port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Cleanup: cancel background task before exit
    background_task.abort();
    let _ = background_task.await;

    info!("herakles-proc-usage stopped gracefully");
    Ok(())
}
