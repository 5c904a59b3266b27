use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use mtls_proxy::config::load_config;
use mtls_proxy::error::ProxyError;
use mtls_proxy::limiter::RateLimiter;
use mtls_proxy::router::Router;
use mtls_proxy::server::Server;
use mtls_proxy::{logging, tls};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args = Args::parse();

    let config = load_config(&args.config)?;

    let limiter = RateLimiter::new(config.rate_limiter.capacity, config.rate_limiter.refill_rate);
    let router = Arc::new(Router::new(limiter));

    info!("Backend servers:");
    for (i, address) in config.backends.iter().enumerate() {
        router.add_backend(address.clone());
        info!("  {}: {}", i + 1, address);
    }

    let tls_config = tls::build_server_config(
        &config.tls.cert_file,
        &config.tls.key_file,
        &config.tls.ca_file,
    )?;

    let server = Arc::new(Server::new(
        router,
        Arc::new(tls_config),
        config.allowed_clients.clone(),
        config.acl_sets(),
    )?);

    let listen_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("unable to bind server listener on {}", listen_addr))?;

    // Trigger graceful shutdown on INT or TERM
    let shutdown_server = Arc::clone(&server);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutting down the server...");
        shutdown_server.begin_shutdown();
    });

    match server.run(listener).await {
        Ok(()) => {
            info!("Server stopped.");
            Ok(())
        }
        Err(ProxyError::ShutdownTimeout { pending }) => {
            // Exiting anyway; the OS tears the stragglers down
            warn!("Abandoning {} connection(s) still in flight", pending);
            Ok(())
        }
        Err(e) => {
            error!("Server failed: {}", e);
            Err(e.into())
        }
    }
}

/// Wait for a shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
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
