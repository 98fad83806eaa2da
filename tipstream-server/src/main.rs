//! tipstream payment server.
//!
//! # Usage
//!
//! ```bash
//! # Run with config.toml from the current directory
//! cargo run -p tipstream-server --release
//!
//! # Custom config path and log level
//! CONFIG=/etc/tipstream.toml RUST_LOG=tipstream=debug cargo run -p tipstream-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `50052`)
//! - `RUST_LOG` - Log level filter (default: `info`)
//!
//! A `.env` file in the working directory is loaded first.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tipstream::networks::NetworkRegistry;
use tipstream::poller::Poller;
use tipstream::registry::Registry;
use tipstream::service::PaymentService;
use tipstream::timestamp::SystemClock;
use tracing_subscriber::EnvFilter;

use tipstream_server::chains::build_adapters;
use tipstream_server::config::ServerConfig;
use tipstream_server::notify::OverlayNotifier;
use tipstream_server::util::SigDown;
use tipstream_server::{AppState, router};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Payment server failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        adapters = config.adapters.len(),
        ttl_secs = config.engine.payment_ttl_secs,
        "Loaded configuration"
    );
    if config.adapters.is_empty() {
        tracing::warn!("No chain adapters configured, every payment link will be rejected");
    }

    let networks = NetworkRegistry::new()
        .with(tipstream_evm::EVM_NETWORKS, tipstream_evm::EVM_TOKENS)
        .with(tipstream_svm::SOLANA_NETWORKS, tipstream_svm::SOLANA_TOKENS);
    let http = reqwest::Client::new();
    let adapters = build_adapters(&config.adapters, &networks)?;

    let registry = Arc::new(Registry::new(
        config.engine.clone(),
        Arc::new(adapters),
        Arc::new(SystemClock),
    ));
    let sig_down = SigDown::try_new()?;
    let shutdown = sig_down.cancellation_token();

    let poller = Arc::new(Poller::new(Arc::clone(&registry)));
    let poller_handle = Arc::clone(&poller).spawn(shutdown.child_token());

    let notifier = match &config.overlay {
        Some(overlay) => {
            let notifier =
                OverlayNotifier::new(http, &overlay.url, Duration::from_secs(overlay.timeout_secs))?;
            tracing::info!(overlay = %overlay.url, "Overlay notifications enabled");
            Some(notifier.spawn(registry.subscribe(), shutdown.child_token()))
        }
        None => None,
    };

    let service = PaymentService::new(registry);
    let qr_eviction = service.spawn_qr_eviction(shutdown.child_token());
    let state = Arc::new(AppState {
        service,
        poller: Some(poller),
    });
    let app = router(state);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Payment server listening on http://{addr}");

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    // the server may also stop on its own; make sure the background tasks follow
    shutdown.cancel();
    poller_handle.stop().await;
    if let Some(task) = notifier {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Overlay notifier task failed");
        }
    }
    if let Err(e) = qr_eviction.await {
        tracing::error!(error = %e, "QR eviction task failed");
    }
    sig_down.recv().await;

    tracing::info!("Payment server shut down gracefully");
    Ok(())
}
