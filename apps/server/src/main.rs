//! Connect Render - standalone headless device joining a Connect control
//! session.
//!
//! Streams audio to a DLNA/UPnP renderer on the LAN or a local output
//! device, controlled over a WebSocket by a Connect controller app.

mod config;

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use connect_core::bootstrap::bootstrap_services;
use connect_core::error::RenderError;
use tokio::signal;

/// Connect Render - headless device joining a Connect control session.
#[derive(Parser, Debug)]
#[command(name = "connect-render")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CONNECT_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// HTTP discovery port (overrides config file and environment).
    #[arg(short = 'p', long, env = "CONNECT_HTTP_PORT")]
    http_port: Option<u16>,

    /// LAN IP to advertise in mDNS and audio-proxy URLs (overrides config
    /// file and environment).
    #[arg(short = 'a', long, env = "CONNECT_ADVERTISE_IP")]
    advertise_ip: Option<IpAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Connect Render v{}", env!("CARGO_PKG_VERSION"));

    let mut core_config = match config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load configuration: {}", e);
            return ExitCode::from(1);
        }
    };

    if let Some(port) = args.http_port {
        core_config.server.http_port = port;
    }
    if let Some(ip) = args.advertise_ip {
        core_config.server.advertise_ip = Some(ip);
    }

    if let Err(e) = core_config.validate() {
        log::error!("invalid configuration: {}", e);
        return ExitCode::from(1);
    }

    log::info!(
        "configuration loaded: http_port={}, proxy_port={}, backend={:?}",
        core_config.server.http_port,
        core_config.server.proxy_port,
        core_config.backend.kind
    );

    let services = match bootstrap_services(&core_config).await {
        Ok(services) => services,
        Err(e @ RenderError::Authentication(_)) => {
            log::error!("authentication failed: {}", e);
            return ExitCode::from(2);
        }
        Err(e) => {
            log::error!("failed to bootstrap services: {}", e);
            return ExitCode::from(3);
        }
    };

    log::info!("services bootstrapped, joining session");

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up");

    services.shutdown().await;

    log::info!("shutdown complete");
    ExitCode::SUCCESS
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
