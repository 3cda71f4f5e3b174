//! lucia-server: encrypted agent channel server.
//!
//! Accepts WebSocket connections, runs the ECDH handshake with an attached
//! attestation report, and routes AES-GCM encrypted application messages.

mod attestation;
mod catalog;
mod config;
mod connection;
mod handshake;
mod responder;
mod router;
mod server;
mod session;
mod state;
mod transport;

use clap::Parser;
use config::ServerConfig;
use server::LuciaServer;
use state::StatePolicy;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// lucia-server — encrypted agent channel server
#[derive(Parser, Debug)]
#[command(name = "lucia-server", version, about = "Encrypted agent channel server")]
struct Cli {
    /// Listen port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.lucia/config.toml")]
    config: String,

    /// Fetch attestation reports from this service instead of generating them
    #[arg(long)]
    attestation_url: Option<String>,

    /// Shared state concurrency policy (serialized, unguarded)
    #[arg(long)]
    state_policy: Option<StatePolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting lucia-server");

    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        cli.host.as_deref(),
        cli.port,
        cli.attestation_url.as_deref(),
        cli.state_policy,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let lucia_server = match LuciaServer::new(server_config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };
    let shutdown = lucia_server.shutdown_handle();

    tokio::select! {
        result = lucia_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            let _ = shutdown.send(());
        }
    }

    info!("lucia-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
