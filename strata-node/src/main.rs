use serde::{Deserialize, Serialize};
use shared::config::CacheSettings;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use storage_engine::{LocalBus, MemoryRemoteStore};
use strata::ports::{Bus, RemoteStore};
use strata::{BusListener, CacheContext, CacheRegistry, JsonCodec};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Profile {
    id: u64,
    display_name: String,
}

type ProfileRegistry = CacheRegistry<u64, Profile>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Strata node");

    // Load environment variables
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let settings = CacheSettings::from_env()?;
    info!(
        "Caches {:?}, dynamic: {}, topic: '{}'",
        settings.cache_names, settings.dynamic, settings.remote.topic
    );

    // Two registries over one remote store and one bus stand in for two processes
    let remote = MemoryRemoteStore::new();
    let bus = LocalBus::new();

    let (primary, primary_listener) = start_node(&settings, &remote, &bus).await?;
    let (replica, replica_listener) = start_node(&settings, &remote, &bus).await?;

    let cache_name = settings
        .cache_names
        .first()
        .cloned()
        .unwrap_or_else(|| "profiles".to_string());

    demo(&primary, &replica, &cache_name).await?;

    info!("Strata node started successfully, waiting for shutdown");

    tokio::select! {
        _ = primary_listener => warn!("Primary listener stopped"),
        _ = replica_listener => warn!("Replica listener stopped"),
        _ = shutdown_signal() => info!("Shutdown signal received"),
    }

    info!("Strata node shutting down");
    Ok(())
}

async fn start_node(
    settings: &CacheSettings,
    remote: &MemoryRemoteStore,
    bus: &LocalBus,
) -> shared::Result<(Arc<ProfileRegistry>, JoinHandle<()>)> {
    let remote: Arc<dyn RemoteStore> = Arc::new(remote.clone());
    let bus: Arc<dyn Bus> = Arc::new(bus.clone());

    let registry = Arc::new(CacheRegistry::new(
        settings.clone(),
        CacheContext::new(remote, bus.clone()),
    ));
    let engines = registry.load_initial().await?;
    info!("Registry ready with {} caches", engines.len());

    let listener = BusListener::new(registry.clone(), bus, Arc::new(JsonCodec))
        .start()
        .await?;

    Ok((registry, listener))
}

/// Load on one node, watch it appear on the other, then evict it everywhere
async fn demo(
    primary: &ProfileRegistry,
    replica: &ProfileRegistry,
    cache_name: &str,
) -> shared::Result<()> {
    let on_primary = primary.require(cache_name).await?;
    let on_replica = replica.require(cache_name).await?;

    let profile = on_primary
        .get(1, || async {
            Ok::<_, Infallible>(Some(Profile {
                id: 1,
                display_name: "Ada".to_string(),
            }))
        })
        .await?;
    info!(
        "Loaded {:?} under remote key '{}'",
        profile,
        on_primary.remote_key(&1)?
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    info!("Replica local copy: {:?}", on_replica.get_local(&1).await);

    on_primary.evict(&1).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!(
        "After evict, replica local copy: {:?}",
        on_replica.get_local(&1).await
    );

    Ok(())
}

/// Resolves on Ctrl+C, or on SIGTERM where the platform has it
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c() => info!("Received Ctrl+C signal"),
                _ = sigterm.recv() => info!("Received terminate signal"),
            },
            Err(e) => {
                warn!("SIGTERM unavailable ({}), stopping on Ctrl+C only", e);
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

/// Never resolves if the Ctrl+C handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
