//! Connectivity as reported by the host.
//!
//! The coordinator skips sync passes while the device is offline and runs
//! one as soon as a `Connected` update arrives.

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    /// The platform cannot tell; treated as online
    Indeterminate,
}

#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    /// Cellular or otherwise billed by volume
    pub is_metered: bool,
}

impl NetworkInfo {
    pub fn connected() -> Self {
        Self::with_status(NetworkStatus::Connected)
    }

    pub fn disconnected() -> Self {
        Self::with_status(NetworkStatus::Disconnected)
    }

    fn with_status(status: NetworkStatus) -> Self {
        Self {
            status,
            is_metered: false,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.status == NetworkStatus::Disconnected
    }
}

/// Host reachability source: `NWPathMonitor`, `ConnectivityManager`,
/// `navigator.onLine`, or a desktop equivalent.
#[async_trait::async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Only a definite `Disconnected` counts as offline. A failed probe or an
    /// indeterminate status lets the pass run and the gateway call decide.
    async fn is_connected(&self) -> bool {
        match self.get_network_info().await {
            Ok(info) => !info.is_offline(),
            Err(_) => true,
        }
    }

    /// Updates pushed by the host on every status change.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

#[async_trait::async_trait]
pub trait NetworkChangeStream: Send {
    /// `None` once the host closes the stream.
    async fn next(&mut self) -> Option<NetworkInfo>;
}
