//! Shared fixtures for the sync integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::network::{NetworkChangeStream, NetworkInfo, NetworkMonitor};
use bridge_traits::remote::{GatewayError, PushAck, RemoteGateway, RemoteRecord};
use bridge_traits::time::ManualClock;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use core_runtime::events::{CoreEvent, Receiver};
use core_store::adapters::SqliteBackend;
use core_store::db::DatabaseConfig;
use core_store::{BodyMetric, LocalStore, WeightUnit, SCHEMA_VERSION};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

pub async fn sqlite_store(clock: Arc<ManualClock>) -> Arc<LocalStore> {
    let backend = SqliteBackend::new(DatabaseConfig::in_memory()).await.unwrap();
    let store = Arc::new(LocalStore::new(Arc::new(backend), clock));
    store.initialize(SCHEMA_VERSION).await.unwrap();
    store
}

pub fn weigh_in(id: &str, owner: &str, d: u32, weight: f64) -> BodyMetric {
    BodyMetric::new(id, owner, day(d)).with_weight(weight, WeightUnit::Kg)
}

/// Remote copy of a body metric as the server would return it.
pub fn remote_weigh_in(
    id: &str,
    owner: &str,
    d: u32,
    weight: f64,
    last_modified: DateTime<Utc>,
) -> RemoteRecord {
    RemoteRecord {
        entity_type: "body_metrics".to_string(),
        id: id.to_string(),
        owner_id: owner.to_string(),
        last_modified,
        is_deleted: false,
        payload: serde_json::to_value(weigh_in(id, owner, d, weight)).unwrap(),
    }
}

/// Poll `condition` for up to two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub fn drain(events: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

// ============================================================================
// Fake remote
// ============================================================================

#[derive(Default)]
struct RemoteState {
    records: HashMap<(String, String), RemoteRecord>,
    push_error: Option<GatewayError>,
    pull_error: Option<GatewayError>,
    pushes: Vec<RemoteRecord>,
}

/// In-process remote that upserts by id and can be switched into failure modes.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
    push_gate: Mutex<Option<Arc<Notify>>>,
    parked: Notify,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn go_offline(&self) {
        let mut state = self.state.lock().unwrap();
        state.push_error = Some(GatewayError::Network("offline".to_string()));
        state.pull_error = Some(GatewayError::Network("offline".to_string()));
    }

    pub fn go_online(&self) {
        let mut state = self.state.lock().unwrap();
        state.push_error = None;
        state.pull_error = None;
    }

    pub fn fail_pushes_with(&self, error: GatewayError) {
        self.state.lock().unwrap().push_error = Some(error);
    }

    pub fn seed(&self, record: RemoteRecord) {
        let key = (record.entity_type.clone(), record.id.clone());
        self.state.lock().unwrap().records.insert(key, record);
    }

    pub fn record(&self, entity_type: &str, id: &str) -> Option<RemoteRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&(entity_type.to_string(), id.to_string()))
            .cloned()
    }

    pub fn push_count(&self) -> usize {
        self.state.lock().unwrap().pushes.len()
    }

    pub fn pushes_of(&self, entity_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .pushes
            .iter()
            .filter(|r| r.entity_type == entity_type)
            .count()
    }

    /// Make the next push wait until the returned gate is notified.
    pub fn hold_next_push(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.push_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Resolves once a held push is waiting on its gate.
    pub async fn push_parked(&self) {
        self.parked.notified().await;
    }
}

#[async_trait]
impl RemoteGateway for FakeRemote {
    async fn push(&self, record: &RemoteRecord) -> Result<PushAck, GatewayError> {
        let gate = self.push_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.parked.notify_one();
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.push_error {
            return Err(err.clone());
        }

        state.pushes.push(record.clone());
        state
            .records
            .insert((record.entity_type.clone(), record.id.clone()), record.clone());

        Ok(PushAck {
            server_last_modified: record.last_modified,
            deleted: record.is_deleted,
        })
    }

    async fn pull(
        &self,
        entity_type: &str,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRecord>, GatewayError> {
        let state = self.state.lock().unwrap();
        if let Some(err) = &state.pull_error {
            return Err(err.clone());
        }

        Ok(state
            .records
            .values()
            .filter(|r| r.entity_type == entity_type && r.owner_id == owner_id)
            .filter(|r| since.map_or(true, |since| r.last_modified >= since))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Fake network
// ============================================================================

/// Network monitor driven by the test through [`FakeNetwork::set`].
pub struct FakeNetwork {
    current: Mutex<NetworkInfo>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<NetworkInfo>>>,
}

impl FakeNetwork {
    pub fn new(initial: NetworkInfo) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(initial),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn set(&self, info: NetworkInfo) {
        *self.current.lock().unwrap() = info.clone();
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(info.clone()).is_ok());
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<NetworkInfo>);

#[async_trait]
impl NetworkChangeStream for ChannelStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.0.recv().await
    }
}

#[async_trait]
impl NetworkMonitor for FakeNetwork {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        Ok(Box::new(ChannelStream(rx)))
    }
}
