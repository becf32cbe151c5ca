//! AuthMux CLI
//!
//! Bootstraps OAuth for one server from a standard `mcpServers` config file
//! and prints the JSON response.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use authmux_core::{branding, LogConfig, OAuthSettings, ServerConfigFile, ServerLogManager};
use authmux_gateway::OAuthOrchestrator;
use clap::Parser;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "authmux", version, about = "Bootstrap OAuth for an MCP server")]
struct Args {
    /// Server config file (`{"mcpServers": {...}}`)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Key of the server entry to authorize
    server_id: String,

    /// Orchestrator settings file (JSON); `AUTHMUX_*` env vars override it
    #[arg(long, short = 's')]
    settings: Option<PathBuf>,

    /// Keep running until the session completes, fails or times out
    #[arg(long)]
    wait: bool,

    /// Open the authorization URL in the default browser
    #[arg(long)]
    open: bool,
}

/// Initialize tracing with console (stderr) and daily-rotated file output
///
/// Stdout is reserved for the JSON response.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    dotenvy::dotenv().ok();

    let logs_dir = branding::logs_dir();
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
    }

    // authmux.2026-01-22.log
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(branding::LOG_PREFIX)
        .filename_suffix("log")
        .build(&logs_dir)
        .context("Failed to create log file appender")?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info")
            .add_directive("authmux=debug".parse().unwrap())
            .add_directive("authmux_core=debug".parse().unwrap())
            .add_directive("authmux_gateway=debug".parse().unwrap())
    });

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let _guard = init_tracing()?;

    let settings = OAuthSettings::load(args.settings.as_deref())?;
    let session_timeout = settings.session_timeout();
    let request = ServerConfigFile::load(&args.config)?.request_for(&args.server_id)?;

    let orchestrator = OAuthOrchestrator::new(settings)?
        .with_log_manager(Arc::new(ServerLogManager::new(LogConfig::default())));
    info!(
        server_id = %request.server_id,
        version = env!("CARGO_PKG_VERSION"),
        "Starting {} OAuth bootstrap",
        branding::DISPLAY_NAME
    );

    let response = tokio::select! {
        response = orchestrator.start_oauth(request) => response,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            orchestrator.shutdown().await;
            return Ok(ExitCode::from(130));
        }
    };
    println!("{}", serde_json::to_string_pretty(&response)?);

    if let (true, Some(url)) = (args.open, response.oauth_url.as_deref()) {
        if let Err(e) = open::that(url) {
            warn!("Failed to open browser: {}", e);
        }
    }

    if args.wait && response.success {
        tokio::select! {
            snapshot = orchestrator.wait_for_completion(&args.server_id, session_timeout) => {
                if let Some(snapshot) = snapshot {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling session");
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
