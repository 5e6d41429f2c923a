//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided capabilities (remote gateway, network
//! monitor, clock, optionally a storage backend) into the local store and the
//! sync engine. Native hosts enable the `sqlite` feature and pass a database
//! path; other hosts hand in their own [`StorageBackend`].

pub mod error;

pub use error::{CoreError, Result};

use std::path::Path;
use std::sync::Arc;

use bridge_traits::storage::StorageBackend;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use core_runtime::logging::strip_path;
use core_store::{LocalStore, SCHEMA_VERSION};
use core_sync::{SyncConfig, SyncCoordinator};
use tracing::info;

/// Primary façade exposed to host applications.
///
/// UI reads and writes go straight to [`store`](Self::store) and never wait
/// on the network; [`sync`](Self::sync) exposes the background engine.
#[derive(Clone)]
pub struct CoreService {
    store: Arc<LocalStore>,
    coordinator: Arc<SyncCoordinator>,
    events: EventBus,
}

impl CoreService {
    /// Open the local store, build the sync engine and, unless disabled,
    /// start background sync.
    ///
    /// ```no_run
    /// # async fn example(gateway: std::sync::Arc<dyn bridge_traits::RemoteGateway>) -> core_service::Result<()> {
    /// use core_runtime::config::CoreConfig;
    /// use core_service::CoreService;
    /// use core_sync::SyncConfig;
    ///
    /// let config = CoreConfig::builder()
    ///     .database_path("/data/logbody.db")
    ///     .remote_gateway(gateway)
    ///     .build()?;
    /// let core = CoreService::bootstrap(config, SyncConfig::default()).await?;
    /// core.sync().set_active_owner(Some("user-1".to_string()));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bootstrap(config: CoreConfig, sync_config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let backend = open_backend(&config).await?;
        let store = Arc::new(LocalStore::new(backend, Arc::clone(&config.clock)));
        store.initialize(SCHEMA_VERSION).await?;

        let network_monitor = if config.features.enable_network_awareness {
            config.network_monitor.clone()
        } else {
            None
        };

        let events = EventBus::default();
        let coordinator = Arc::new(SyncCoordinator::new(
            sync_config,
            Arc::clone(&store),
            Arc::clone(&config.remote_gateway),
            network_monitor,
            events.clone(),
        )?);

        if config.features.enable_background_sync {
            coordinator.start()?;
        }

        info!(
            database = config
                .database_path
                .as_deref()
                .and_then(|path| path.to_str())
                .map(strip_path)
                .unwrap_or("<host backend>"),
            background_sync = config.features.enable_background_sync,
            network_aware = config.features.enable_network_awareness,
            "Core service ready"
        );

        Ok(Self {
            store,
            coordinator,
            events,
        })
    }

    /// The local store. All UI reads and writes go here.
    pub fn store(&self) -> Arc<LocalStore> {
        Arc::clone(&self.store)
    }

    pub fn sync(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Wipe every local record and sync state. Call on sign-out.
    pub async fn sign_out(&self) -> Result<()> {
        self.coordinator.clear_all_data().await?;
        info!("Local data cleared on sign-out");
        Ok(())
    }

    /// Stop background sync and release the store.
    pub async fn shutdown(&self) -> Result<()> {
        self.coordinator.shutdown().await;
        self.store.close().await?;
        Ok(())
    }
}

async fn open_backend(config: &CoreConfig) -> Result<Arc<dyn StorageBackend>> {
    if let Some(backend) = &config.storage_backend {
        return Ok(Arc::clone(backend));
    }

    if let Some(path) = &config.database_path {
        if let Some(backend) = open_sqlite(path).await? {
            return Ok(backend);
        }
    }

    Err(CoreError::CapabilityMissing {
        capability: "StorageBackend".to_string(),
        message: "No storage backend was provided and no SQLite database is available"
            .to_string(),
    })
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(path: &Path) -> Result<Option<Arc<dyn StorageBackend>>> {
    use core_store::adapters::SqliteBackend;
    use core_store::db::DatabaseConfig;

    let backend = SqliteBackend::new(DatabaseConfig::new(path))
        .await
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    Ok(Some(Arc::new(backend)))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_path: &Path) -> Result<Option<Arc<dyn StorageBackend>>> {
    Ok(None)
}
