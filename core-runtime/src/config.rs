//! Host capabilities and switches handed to the core at startup.
//!
//! The host must supply a [`RemoteGateway`] and somewhere to keep records:
//! either a SQLite file path or its own [`StorageBackend`]. A monitor and a
//! clock are optional. [`CoreConfigBuilder::build`] refuses an incomplete
//! set instead of letting the first sync pass fail.
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .database_path(app_dir.join("logbody.db"))
//!     .remote_gateway(Arc::new(HostedGateway::new(session)))
//!     .network_monitor(Arc::new(ReachabilityMonitor::default()))
//!     .enable_network_awareness(true)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, NetworkMonitor, RemoteGateway, StorageBackend, SystemClock};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct CoreConfig {
    /// SQLite file used when no `storage_backend` is injected
    pub database_path: Option<PathBuf>,
    /// Wins over `database_path` when both are set
    pub storage_backend: Option<Arc<dyn StorageBackend>>,
    pub remote_gateway: Arc<dyn RemoteGateway>,
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,
    pub clock: Arc<dyn Clock>,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Periodic reconciliation and tombstone sweeps
    pub enable_background_sync: bool,
    /// Skip passes while offline, sync on reconnect. Needs a monitor.
    pub enable_network_awareness: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_background_sync: true,
            enable_network_awareness: false,
        }
    }
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = |set: bool| if set { "<injected>" } else { "<none>" };
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("storage_backend", &present(self.storage_backend.is_some()))
            .field("remote_gateway", &"<injected>")
            .field("network_monitor", &present(self.network_monitor.is_some()))
            .field("features", &self.features)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Check that storage is reachable and the flags match the capabilities.
    pub fn validate(&self) -> Result<()> {
        self.check_storage()?;
        self.check_features()
    }

    fn check_storage(&self) -> Result<()> {
        match (&self.database_path, &self.storage_backend) {
            (Some(path), _) if path.as_os_str().is_empty() => {
                Err(Error::Config("database_path is empty".to_string()))
            }
            (None, None) => Err(missing(
                "StorageBackend",
                "set database_path for the built-in SQLite cache or inject a StorageBackend",
            )),
            _ => Ok(()),
        }
    }

    fn check_features(&self) -> Result<()> {
        if self.features.enable_network_awareness && self.network_monitor.is_none() {
            return Err(Error::Config(
                "enable_network_awareness requires a NetworkMonitor".to_string(),
            ));
        }
        Ok(())
    }
}

fn missing(capability: &str, hint: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: hint.to_string(),
    }
}

#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    storage_backend: Option<Arc<dyn StorageBackend>>,
    remote_gateway: Option<Arc<dyn RemoteGateway>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn storage_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.storage_backend = Some(backend);
        self
    }

    pub fn remote_gateway(mut self, gateway: Arc<dyn RemoteGateway>) -> Self {
        self.remote_gateway = Some(gateway);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn enable_background_sync(mut self, enabled: bool) -> Self {
        self.features.enable_background_sync = enabled;
        self
    }

    pub fn enable_network_awareness(mut self, enabled: bool) -> Self {
        self.features.enable_network_awareness = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn build(self) -> Result<CoreConfig> {
        let Some(remote_gateway) = self.remote_gateway else {
            return Err(missing(
                "RemoteGateway",
                "inject a client for the hosted backend that upserts records by id",
            ));
        };

        let config = CoreConfig {
            database_path: self.database_path,
            storage_backend: self.storage_backend,
            remote_gateway,
            network_monitor: self.network_monitor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features,
        };
        config.validate()?;
        Ok(config)
    }
}
