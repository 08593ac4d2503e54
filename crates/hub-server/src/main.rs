//! Hub control core server
//!
//! Wires the event bus, state tree and shading controller together and
//! runs until interrupted.

mod config;

use anyhow::Result;
use config::{HubConfig, StorageBackend};
use hub_event_bus::EventBus;
use hub_recorder::{JsonStore, SqliteStore};
use hub_shading::{
    CloudCoverPositionCalculator, FixedCloudCoverCalculator, FixedHeatGainCalculator,
    ShadingController,
};
use hub_state_tree::{StatePersistence, StateTree};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// The central hub instance
///
/// Constructed once at startup; every component receives its
/// collaborators explicitly.
pub struct Hub {
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// State tree holding all hub state
    pub tree: Arc<StateTree>,
    /// Shading control loop
    pub shading: Arc<ShadingController>,
}

impl Hub {
    /// Build a hub from configuration, loading persisted state
    pub fn new(config: &HubConfig) -> Result<Self> {
        let store: Arc<dyn StatePersistence> = match config.storage.backend {
            StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.storage.path)?),
            StorageBackend::Json => Arc::new(JsonStore::open(&config.storage.path)?),
        };

        let bus = Arc::new(EventBus::new());
        let tree = Arc::new(StateTree::load(bus.clone(), store)?);

        let shading = Arc::new(ShadingController::new(
            tree.clone(),
            bus.clone(),
            Arc::new(FixedHeatGainCalculator::new(0.0)),
            Arc::new(FixedCloudCoverCalculator::new(0.0)),
            Arc::new(CloudCoverPositionCalculator::new()),
            config.shading.clone(),
        )?);

        Ok(Self { bus, tree, shading })
    }

    /// Start background components
    pub fn start(&self) {
        self.shading.clone().start();
    }

    /// Stop background components and release timers
    pub fn stop(&self) {
        self.shading.stop();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "homehub.yaml".to_string());
    let config = HubConfig::load(&config_path)?;
    info!(config = %config_path, "Starting hub");

    let hub = Hub::new(&config)?;
    hub.start();
    info!(
        nodes = hub.tree.len(),
        event_types = hub.bus.listener_count(),
        "Hub is running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    hub.stop();

    Ok(())
}
