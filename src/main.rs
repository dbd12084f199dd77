//! wsconn server
//!
//! Accepts WebSocket connections and echoes every message back, sending a
//! heartbeat to each client while it stays connected.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wsconn::config::Settings;
use wsconn::server::WebSocketServer;

/// wsconn server
///
/// Queue-based WebSocket echo server with heartbeats
#[derive(Parser, Debug)]
#[command(name = "wsconn")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the settings file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides the settings file)
    #[arg(long)]
    bind: Option<String>,

    /// Upgrade path (overrides the settings file)
    #[arg(long)]
    path: Option<String>,

    /// Print the effective settings as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Settings from the file (or defaults) with command line overrides applied
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };

        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(bind) = &self.bind {
            settings.server.bind = bind.clone();
        }
        if let Some(path) = &self.path {
            settings.server.path = path.clone();
        }

        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let settings = args.settings()?;
    if args.print_config {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    info!("wsconn v{}", env!("CARGO_PKG_VERSION"));

    if !settings.server.allowed_origins.is_empty() {
        info!("Allowed origins: {:?}", settings.server.allowed_origins);
    }

    let server = Arc::new(WebSocketServer::new(settings.server_config()));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
