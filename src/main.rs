use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use oauth2_server::clock::{Clock, SystemClock};
use oauth2_server::configuration::{get_configuration, EvictionMode};
use oauth2_server::startup::{build_core, run};
use oauth2_server::store::{create_token_store, spawn_eviction_sweeper};
use oauth2_server::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting authorization server");

    let configuration = get_configuration().map_err(|e| {
        tracing::error!("Failed to read configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;
    tracing::info!("Configuration loaded successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = create_token_store(&configuration.token_store, clock.clone())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create token store: {}", e);
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Token store error")
        })?;
    tracing::info!(backend = store.name(), "Token store ready");

    let core = build_core(&configuration, store.clone(), clock).map_err(|e| {
        tracing::error!("Failed to provision authorization core: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Provisioning error")
    })?;

    let sweeper = match configuration.token_store.eviction {
        EvictionMode::Sweep => {
            let interval = Duration::from_secs(configuration.token_store.sweep_interval_seconds.max(1));
            tracing::info!(interval_seconds = interval.as_secs(), "Starting eviction sweeper");
            Some(spawn_eviction_sweeper(store, interval))
        }
        EvictionMode::Lazy => None,
    };

    let address = configuration.application.address();
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, core)?;
    let result = server.await;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
        tracing::info!("Eviction sweeper stopped");
    }

    result
}
