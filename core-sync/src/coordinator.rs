//! # Sync Coordinator
//!
//! Schedules reconciliation and tombstone sweeps, and exposes the sync state
//! the UI shows.
//!
//! ## Overview
//!
//! The `SyncCoordinator` owns the sync engine (tracker, reconciler,
//! collector) and decides when it runs:
//! - every `sync_interval`, starting at [`start`](SyncCoordinator::start)
//! - when connectivity comes back (Disconnected → Connected)
//! - on [`request_sync`](SyncCoordinator::request_sync)
//!
//! Tombstone sweeps run at start and every `sweep_interval`. Passes are
//! skipped while offline.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncCoordinator};
//!
//! let coordinator = Arc::new(SyncCoordinator::new(
//!     SyncConfig::default(),
//!     store,
//!     gateway,
//!     Some(network_monitor),
//!     EventBus::default(),
//! )?);
//! coordinator.set_active_owner(Some("user-1".to_string()));
//! coordinator.start()?;
//!
//! let state = coordinator.state();
//! println!("{} records waiting", state.pending_count);
//!
//! coordinator.shutdown().await;
//! ```

use bridge_traits::network::{NetworkChangeStream, NetworkInfo, NetworkMonitor};
use bridge_traits::remote::RemoteGateway;
use chrono::{DateTime, Utc};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, Receiver, SyncEvent, SyncStatusKind};
use core_store::{EntityKind, LocalStore, StoreError, SyncStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backoff::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES};
use crate::conflict::ConflictPolicy;
use crate::reconciler::{PassReport, Reconciler};
use crate::tombstone::{SweepReport, TombstoneCollector};
use crate::tracker::SyncStateTracker;
use crate::{Result, SyncError};

const DAY: u64 = 24 * 60 * 60;

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between scheduled reconciliation passes
    pub sync_interval: Duration,

    /// Time between tombstone sweeps
    pub sweep_interval: Duration,

    /// Age after which a synced tombstone is purged
    pub retention_window: Duration,

    /// First retry delay; doubles with every failure
    pub base_delay: Duration,

    /// Upper bound for the retry delay
    pub max_delay: Duration,

    /// Failures after which the user is told (retrying continues)
    pub max_retries: u32,

    /// Age after which clean sync metadata is dropped
    pub metadata_retention: Duration,

    /// How far back the first pull for an owner reaches
    pub pull_lookback: Duration,

    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(6 * 60 * 60),
            retention_window: Duration::from_secs(30 * DAY),
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            metadata_retention: Duration::from_secs(90 * DAY),
            pull_lookback: Duration::from_secs(7 * DAY),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() || self.sweep_interval.is_zero() {
            return Err(SyncError::Config(
                "Sync and sweep intervals must be greater than zero".to_string(),
            ));
        }
        if self.base_delay.is_zero() {
            return Err(SyncError::Config(
                "Retry base delay must be greater than zero".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(SyncError::Config(format!(
                "Retry base delay ({:?}) exceeds max delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }

        to_chrono("retention_window", self.retention_window)?;
        to_chrono("metadata_retention", self.metadata_retention)?;
        to_chrono("pull_lookback", self.pull_lookback)?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.base_delay, self.max_delay, self.max_retries)
    }
}

fn to_chrono(name: &str, duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|_| SyncError::Config(format!("{} is out of range", name)))
}

/// Sync state shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncState {
    pub is_syncing: bool,
    /// End of the last run that completed without failures
    pub last_sync_date: Option<DateTime<Utc>>,
    pub status: SyncStatusKind,
    pub pending_count: u64,
    pub error: Option<String>,
}

/// Schedules the sync engine and reports its state.
pub struct SyncCoordinator {
    config: SyncConfig,
    store: Arc<LocalStore>,
    tracker: Arc<SyncStateTracker>,
    reconciler: Arc<Reconciler>,
    collector: Arc<TombstoneCollector>,
    events: EventBus,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,

    state: RwLock<SyncState>,
    active_owner: RwLock<Option<String>>,
    /// Newest remote stamp pulled, per owner and entity store
    pull_cursors: Mutex<HashMap<(String, EntityKind), DateTime<Utc>>>,

    /// Serializes runs and sign-out
    run_lock: tokio::sync::Mutex<()>,
    wake: Notify,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Create a coordinator over an initialized store.
    ///
    /// Pass `network_monitor` only when network awareness is enabled;
    /// without one the coordinator assumes it is always online.
    pub fn new(
        config: SyncConfig,
        store: Arc<LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        network_monitor: Option<Arc<dyn NetworkMonitor>>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;

        let tracker = Arc::new(SyncStateTracker::new(Arc::clone(&store)));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            gateway,
            config.retry_policy(),
            config.conflict_policy,
            events.clone(),
        ));
        let collector = Arc::new(TombstoneCollector::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            events.clone(),
            to_chrono("retention_window", config.retention_window)?,
            to_chrono("metadata_retention", config.metadata_retention)?,
        ));

        Ok(Self {
            config,
            store,
            tracker,
            reconciler,
            collector,
            events,
            network_monitor,
            state: RwLock::new(SyncState::default()),
            active_owner: RwLock::new(None),
            pull_cursors: Mutex::new(HashMap::new()),
            run_lock: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn tracker(&self) -> &Arc<SyncStateTracker> {
        &self.tracker
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn state(&self) -> SyncState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Stream of sync and cache events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    fn update_state(&self, update: impl FnOnce(&mut SyncState)) -> SyncState {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut state);
        state.clone()
    }

    fn publish_status(&self, state: &SyncState) {
        self.events
            .emit(CoreEvent::Sync(SyncEvent::StatusChanged {
                status: state.status,
                pending_count: state.pending_count,
            }))
            .ok();
    }

    async fn pending_count(&self) -> Result<u64> {
        Ok(self.store.get_unsynced_items().await?.total() as u64)
    }

    /// Owner whose remote changes are pulled. `None` disables pulling.
    pub fn set_active_owner(&self, owner_id: Option<String>) {
        let mut active = self
            .active_owner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *active != owner_id {
            debug!(has_owner = owner_id.is_some(), "Active owner changed");
            *active = owner_id;
        }
    }

    fn active_owner(&self) -> Option<String> {
        self.active_owner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Stored status of one record, with `Failed` derived from its sync
    /// metadata: a pending record whose last push failed.
    pub async fn record_status(&self, kind: EntityKind, id: &str) -> Result<Option<SyncStatus>> {
        let Some(status) = self.store.status_of(kind, id).await? else {
            return Ok(None);
        };

        if status == SyncStatus::Pending {
            let failing = self
                .tracker
                .get(kind, id)
                .await?
                .is_some_and(|metadata| metadata.is_failing());
            if failing {
                return Ok(Some(SyncStatus::Failed));
            }
        }

        Ok(Some(status))
    }

    async fn is_online(&self) -> bool {
        match &self.network_monitor {
            Some(monitor) => monitor.is_connected().await,
            None => true,
        }
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Ask the background loop for a run as soon as possible.
    pub fn request_sync(&self) {
        self.wake.notify_one();
    }

    /// Reconcile every store, then pull remote changes for the active owner.
    ///
    /// Returns no reports when offline.
    pub async fn sync_now(&self) -> Result<Vec<PassReport>> {
        if !self.is_online().await {
            debug!("Offline; sync skipped");
            return Ok(Vec::new());
        }
        self.run_sync().await
    }

    #[instrument(skip(self))]
    async fn run_sync(&self) -> Result<Vec<PassReport>> {
        let _run = self.run_lock.lock().await;

        let pending_count = self.pending_count().await?;
        let state = self.update_state(|state| {
            state.is_syncing = true;
            state.status = SyncStatusKind::Syncing;
            state.pending_count = pending_count;
        });
        self.publish_status(&state);

        let result = self.reconciler.reconcile_all().await;
        let pull_error = match &result {
            Ok(_) => self.pull_active_owner().await.err(),
            Err(_) => None,
        };

        let pending_count = self.pending_count().await.unwrap_or(pending_count);
        let now = self.store.clock().now();
        let failed: u64 = result
            .as_ref()
            .map(|reports| reports.iter().map(|r| r.failed).sum())
            .unwrap_or(0);

        let error = match (&result, &pull_error) {
            (Err(err), _) => Some(err.to_string()),
            (Ok(_), Some(err)) => Some(format!("Pull failed: {}", err)),
            (Ok(_), None) if failed > 0 => Some(format!("{} record(s) failed to sync", failed)),
            _ => None,
        };

        let state = self.update_state(|state| {
            state.is_syncing = false;
            state.pending_count = pending_count;
            match &error {
                Some(message) => {
                    state.status = SyncStatusKind::Error;
                    state.error = Some(message.clone());
                }
                None => {
                    state.status = SyncStatusKind::Success;
                    state.error = None;
                    state.last_sync_date = Some(now);
                }
            }
        });
        self.publish_status(&state);

        match &error {
            Some(message) => warn!(pending_count, error = %message, "Sync run finished with errors"),
            None => info!(pending_count, "Sync run finished"),
        }

        result
    }

    async fn pull_active_owner(&self) -> Result<()> {
        let Some(owner_id) = self.active_owner() else {
            return Ok(());
        };
        let lookback = to_chrono("pull_lookback", self.config.pull_lookback)?;

        for kind in EntityKind::ALL {
            let key = (owner_id.clone(), kind);
            let since = self
                .pull_cursors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(&key)
                .copied()
                .unwrap_or_else(|| self.store.clock().now() - lookback);

            let report = self
                .reconciler
                .pull_updates(kind, &owner_id, Some(since))
                .await?;

            if let Some(latest) = report.latest {
                let mut cursors = self
                    .pull_cursors
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let cursor = cursors.entry(key).or_insert(latest);
                *cursor = (*cursor).max(latest);
            }
        }

        Ok(())
    }

    /// Purge expired tombstones now.
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        self.collector.sweep().await
    }

    /// Clear backoff and the review flag of one pending record and schedule
    /// a run.
    pub async fn retry_record(&self, kind: EntityKind, id: &str) -> Result<()> {
        match self.store.status_of(kind, id).await? {
            None => Err(SyncError::Store(StoreError::NotFound {
                entity_type: kind.as_str().to_string(),
                id: id.to_string(),
            })),
            Some(SyncStatus::Synced) => Err(SyncError::InvalidStatus(format!(
                "{} {} is already synced",
                kind, id
            ))),
            Some(_) => {
                self.tracker.reset(kind, id).await?;
                info!(entity_type = %kind, id, "Manual retry requested");
                self.request_sync();
                Ok(())
            }
        }
    }

    /// Wipe every local store and reset the sync state. Used on sign-out.
    pub async fn clear_all_data(&self) -> Result<()> {
        let _run = self.run_lock.lock().await;

        self.store.clear_all_data().await?;
        self.pull_cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.set_active_owner(None);

        let state = self.update_state(|state| *state = SyncState::default());
        self.events
            .emit(CoreEvent::Cache(CacheEvent::DataCleared))
            .ok();
        self.publish_status(&state);
        Ok(())
    }

    // =========================================================================
    // Background loop
    // =========================================================================

    /// Spawn the scheduling loop. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(SyncError::InvalidStatus(
                "Sync coordinator has been shut down".to_string(),
            ));
        }

        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move { this.run_loop().await }));
        info!(
            sync_interval_secs = self.config.sync_interval.as_secs(),
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            network_aware = self.network_monitor.is_some(),
            "Sync coordinator started"
        );
        Ok(())
    }

    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Sync loop ended abnormally");
            }
        }
        info!("Sync coordinator stopped");
    }

    async fn run_loop(self: Arc<Self>) {
        let mut sync_tick = tokio::time::interval(self.config.sync_interval);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = tokio::time::interval(self.config.sweep_interval);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut changes = self.subscribe_network().await;
        let mut online = self.is_online().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sweep_tick.tick() => {
                    if let Err(err) = self.sweep_now().await {
                        warn!(error = %err, "Tombstone sweep failed");
                    }
                }
                _ = sync_tick.tick() => self.scheduled_sync("timer", online).await,
                _ = self.wake.notified() => self.scheduled_sync("request", online).await,
                change = next_change(&mut changes) => match change {
                    Some(info) => {
                        let now_online = !info.is_offline();
                        let restored = !online && now_online;
                        online = now_online;
                        if restored {
                            info!("Connectivity restored");
                            self.scheduled_sync("reconnect", online).await;
                        }
                    }
                    None => changes = None,
                },
            }
        }

        debug!("Sync loop exited");
    }

    async fn subscribe_network(&self) -> Option<Box<dyn NetworkChangeStream>> {
        let monitor = self.network_monitor.as_ref()?;
        match monitor.subscribe_changes().await {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!(error = %err, "Network change stream unavailable; relying on polling");
                None
            }
        }
    }

    async fn scheduled_sync(&self, trigger: &'static str, online: bool) {
        if !online || !self.is_online().await {
            debug!(trigger, "Offline; sync skipped");
            return;
        }
        debug!(trigger, "Sync triggered");
        if let Err(err) = self.run_sync().await {
            warn!(trigger, error = %err, "Sync run failed");
        }
    }
}

async fn next_change(stream: &mut Option<Box<dyn NetworkChangeStream>>) -> Option<NetworkInfo> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
