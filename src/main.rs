//! Tesseract Bridge - cross-chain transfer orchestration service
//!
//! Serves intent parsing, quotes and transfer tracking over HTTP, and executes intents with
//! a server-side wallet when one is configured.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

use tesseract_bridge::api::{self, AppState};
use tesseract_bridge::chain::ChainProviders;
use tesseract_bridge::chains::ChainRegistry;
use tesseract_bridge::config::Settings;
use tesseract_bridge::metrics::MetricsServer;
use tesseract_bridge::signer::{Signer, WalletSigner};
use tesseract_bridge::IntentEngine;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Tesseract Bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let registry = Arc::new(ChainRegistry::from_settings(&settings));
    let providers = Arc::new(ChainProviders::new(&settings, &registry)?);
    info!("Chain connections initialized");

    let engine = Arc::new(IntentEngine::connect(&settings, registry, providers.clone()).await?);
    let resumed = engine.resume().await?;
    info!("Intent engine initialized, {} transfers resumed", resumed);

    let signer: Option<Arc<dyn Signer>> = match &settings.wallet.private_key_env {
        Some(var) => Some(Arc::new(WalletSigner::from_env(var, providers.clone())?)),
        None => {
            info!("No wallet configured, intent execution disabled");
            None
        }
    };

    // Start API server
    let api_handle = tokio::spawn({
        let state = AppState {
            engine: engine.clone(),
            providers: Some(providers.clone()),
            signer,
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Chain health and quote cache maintenance
    let maintenance_handle = tokio::spawn({
        let engine = engine.clone();
        let providers = providers.clone();
        async move {
            loop {
                tokio::time::sleep(MAINTENANCE_INTERVAL).await;

                for (chain_id, healthy) in providers.health_check().await {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                let purged = engine.purge_expired_quotes().await;
                debug!("Maintenance pass purged {} quotes", purged);
            }
        }
    });

    info!("Tesseract Bridge is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Monitor loops persist their state on every transition and resume on restart
    engine.shutdown();

    api_handle.abort();
    maintenance_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Tesseract Bridge stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tesseract_bridge=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
