//! OCPP Central System CLI Server
//!
//! Headless OCPP 1.6 central system suitable for deployment as a systemd
//! service, Docker container, or standalone process.
//!
//! ```sh
//! # Run with default config (~/.config/ocpp-central/config.toml)
//! ocpp-central
//!
//! # Custom config path
//! ocpp-central --config /etc/ocpp-central/config.toml
//!
//! # Override the listen address
//! ocpp-central --host 127.0.0.1 --port 9000
//!
//! # Validate config without starting
//! ocpp-central --check
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use ocpp_central::config::{AppConfig, LoggingConfig};
use ocpp_central::server::{init_tracing, OcppServer};
use ocpp_central::shared::os_shutdown_signal;

/// OCPP 1.6 central system for EV charging stations.
#[derive(Parser, Debug)]
#[command(
    name = "ocpp-central",
    version,
    about = "OCPP 1.6 Central System",
    long_about = "WebSocket server accepting OCPP 1.6 charge points (ws:// or wss://).\n\n\
                  Default config: ~/.config/ocpp-central/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "OCPP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    host: Option<IpAddr>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli
        .config
        .unwrap_or_else(ocpp_central::default_config_path);

    let mut config = match AppConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            if cli.check {
                eprintln!("❌ Invalid configuration: {}", e);
                std::process::exit(1);
            }
            init_tracing(&LoggingConfig::default());
            error!("Failed to load config from {}: {}", config_path.display(), e);
            return Err(e.into());
        }
    };

    // ── Apply CLI overrides ────────────────────────────────────
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    if !cli.check {
        init_tracing(&config.logging);
        info!("Configuration loaded from {}", config_path.display());
    }
    if let Some(host) = cli.host {
        info!("CLI override: host = {}", host);
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        info!("CLI override: port = {}", port);
        config.server.port = port;
    }

    let features = config.feature_profiles()?;
    let strategy = config.start_strategy()?;

    // ── Config validation mode ─────────────────────────────────
    if cli.check {
        println!("✅ Configuration is valid");
        println!("   Config file : {}", config_path.display());
        println!(
            "   Listen      : {}://{}",
            strategy.scheme(),
            config.server.bind_addr()
        );
        println!(
            "   Features    : {}",
            features
                .enabled()
                .iter()
                .map(|f| f.config_name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!(
            "   Auth        : {}",
            if config.gate().is_open() { "open" } else { "basic" }
        );
        println!("   Log level   : {}", config.logging.level);
        return Ok(());
    }

    // ── Prometheus metrics exporter ────────────────────────────
    if let Some(listen) = config.metrics.listen {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(listen)
            .install()?;
        info!("📊 Prometheus metrics available at http://{}/metrics", listen);
    }

    // ── Start server ───────────────────────────────────────────
    let server = OcppServer::from_config(&config)?;
    server
        .start(config.server.host, config.server.port)
        .await?;

    info!("🚀 Press Ctrl+C to shutdown gracefully.");

    os_shutdown_signal().await;
    server
        .stop_within(Duration::from_secs(config.server.shutdown_timeout))
        .await;

    Ok(())
}
