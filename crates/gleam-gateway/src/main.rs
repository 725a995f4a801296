//! # gleam-gateway
//!
//! Gateway binary: loads settings, opens the backend pools, registers the
//! built-in services, and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use gleam_core::logging;
use gleam_pool::ResourcePools;
use gleam_rpc::RouterBuilder;
use gleam_server::manager::Authenticator;
use gleam_server::services::register_builtin;
use gleam_server::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use gleam_server::{ConnectionConfig, GatewayServer, SharedToken};
use gleam_settings::GatewaySettings;

/// Gleam RPC gateway.
#[derive(Parser, Debug)]
#[command(name = "gleam-gateway", about = "Persistent-connection RPC gateway")]
struct Cli {
    /// Settings file (defaults to `~/.gleam/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Gateway port (0 for auto-assign; overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// HTTP health/metrics port (0 disables; overrides settings).
    #[arg(long)]
    http_port: Option<u16>,

    /// `SQLite` database file (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Require this token in every `Hello`.
    #[arg(long)]
    auth_token: Option<String>,

    /// Seconds to wait for sessions to drain on shutdown.
    #[arg(long)]
    shutdown_timeout: Option<u64>,
}

impl Cli {
    fn apply(&self, settings: &mut GatewaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(port) = self.http_port {
            settings.server.http_port = port;
        }
        if let Some(path) = &self.db_path {
            settings.database.path = Some(path.display().to_string());
        }
    }

    fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
            .map_or(DEFAULT_SHUTDOWN_TIMEOUT, Duration::from_secs)
    }
}

fn load(cli: &Cli) -> Result<GatewaySettings> {
    let mut settings = match &cli.config {
        Some(path) => gleam_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => gleam_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = match gleam_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    if let Some(path) = &settings.database.path {
        ensure_parent_dir(path)?;
    }
    let resources = ResourcePools::from_settings(&settings.database, &settings.cache)
        .await
        .context("Failed to open backend pools")?;

    let mut builder = RouterBuilder::new().handler_timeout(settings.dispatch.handler_timeout());
    register_builtin(&mut builder).context("Failed to register built-in services")?;
    let router = builder.build();
    info!(routes = router.routes().len(), "router ready");

    let authenticator = cli
        .auth_token
        .clone()
        .map(|token| Arc::new(SharedToken(token)) as Arc<dyn Authenticator>);
    let server = GatewayServer::with_hooks(
        ConnectionConfig::from(&settings),
        router,
        Arc::new(resources),
        metrics,
        authenticator,
        Vec::new(),
    );

    let tcp_addr = format!("{}:{}", settings.server.host, settings.server.port);
    let http_addr = (settings.server.http_port != 0)
        .then(|| format!("{}:{}", settings.server.host, settings.server.http_port));
    let bound = server
        .start(&tcp_addr, http_addr.as_deref())
        .await
        .context("Failed to start gateway")?;
    info!(tcp = %bound.tcp, http = ?bound.http, version = gleam_core::constants::VERSION, "gleam gateway started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("received Ctrl-C, shutting down");

    if server.shutdown(cli.shutdown_timeout()).await {
        info!("shutdown complete");
    } else {
        warn!("shutdown timed out with connections still open");
    }
    Ok(())
}
