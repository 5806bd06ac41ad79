//! STAC Auth Proxy - authentication and filtering for STAC APIs
//!
//! Runs a reverse proxy in front of a STAC API that enforces OpenID Connect
//! authentication and injects CQL2 filters into upstream requests.

use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    prelude::*,
    EnvFilter, Layer, Registry,
};

use stac_auth_proxy::{
    app::{enabled_stages, required_conformances},
    config::{LogFormat, LogTarget, LoggingConfig},
    create_app,
    services::run_startup_checks,
    AppConfig, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    // Check for --help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    // Check for --version flag
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("STAC Auth Proxy {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config.logging);

    info!("STAC Auth Proxy starting up");
    info!(upstream = %config.upstream_url, "Configuration loaded successfully");

    let state = AppState::new(config.clone()).context("Failed to initialize application")?;

    run_startup_checks(&config, &state.http, &required_conformances(&config))
        .await
        .context("Startup checks failed")?;

    let stages: Vec<&str> = enabled_stages(&config).iter().map(|stage| stage.name()).collect();
    info!("Middleware stages: {}", stages.join(", "));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = create_app(state);

    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind server address")?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("STAC Auth Proxy shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber; the returned guard flushes the log file on drop
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if matches!(config.target, LogTarget::Console | LogTarget::Both) {
        layers.push(fmt_layer(&config.format, std::io::stdout));
    }
    if matches!(config.target, LogTarget::File | LogTarget::Both) {
        if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                config.log_dir, e
            );
        }
        let appender = if config.daily_rotation {
            tracing_appender::rolling::daily(&config.log_dir, &config.log_prefix)
        } else {
            tracing_appender::rolling::never(&config.log_dir, &config.log_prefix)
        };
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt_layer(&config.format, writer));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();
    guard
}

fn fmt_layer<W>(format: &LogFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().with_target(false).boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

/// Print help message
fn print_help() {
    println!(
        r#"STAC Auth Proxy {}

USAGE:
    stac-auth-proxy [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information

ENVIRONMENT:
    STAC_AUTH_PROXY_CONFIG  Path to configuration file (default: config.yaml)
    UPSTREAM_URL            STAC API to proxy (required)
    OIDC_DISCOVERY_URL      OpenID Connect discovery document (required)
    RUST_LOG                Log filter, overrides logging.level

    Every configuration key can be set through the environment variable of
    the same name in upper case, e.g. DEFAULT_PUBLIC=true.

CONFIGURATION:
    The application looks for configuration files in the following order:
    1. Path specified by STAC_AUTH_PROXY_CONFIG environment variable
    2. ./config.yaml
    3. ./config/config.yaml
    4. /etc/stac-auth-proxy/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
