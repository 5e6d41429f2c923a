//! Local store
//!
//! [`LocalStore`] is the only component that persists domain data. UI-facing
//! reads and writes go straight to it and never wait on the network. Every
//! write stamps the record `pending` with a fresh `last_modified`; tombstones
//! stay on disk but are filtered out of every read.

use bridge_traits::storage::{Document, IndexQuery, KeyRange, StorageBackend};
use bridge_traits::time::Clock;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, StoreError};
use crate::models::{
    BodyMetric, Cached, DailyMetric, DateRange, DatedEntity, Entity, EntityKind, Profile,
    SyncStatus,
};
use crate::schema::{all_store_names, index, local_schema, SYNC_METADATA_STORE};

/// Pending records across every entity store, tombstones included.
#[derive(Debug, Clone, Default)]
pub struct UnsyncedItems {
    pub body_metrics: Vec<Cached<BodyMetric>>,
    pub daily_metrics: Vec<Cached<DailyMetric>>,
    pub profiles: Vec<Cached<Profile>>,
}

impl UnsyncedItems {
    pub fn total(&self) -> usize {
        self.body_metrics.len() + self.daily_metrics.len() + self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Durable per-owner cache over a [`StorageBackend`].
///
/// Construct once at startup, call [`initialize`](Self::initialize), then
/// share the handle (`Arc<LocalStore>`) with the UI layer and the sync engine.
pub struct LocalStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    initialized: OnceCell<u32>,
    closed: AtomicBool,
    /// Serializes read-modify-write sequences
    write_lock: tokio::sync::Mutex<()>,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            initialized: OnceCell::new(),
            closed: AtomicBool::new(false),
            write_lock: tokio::sync::Mutex::new(()),
            last_stamp: Mutex::new(None),
        }
    }

    /// Time source shared with the sync engine
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create stores and indices if absent.
    ///
    /// Idempotent. Concurrent callers share one in-flight initialization.
    pub async fn initialize(&self, schema_version: u32) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }

        let version = *self
            .initialized
            .get_or_try_init(|| async {
                if let Some(existing) = self.backend.schema_version().await? {
                    if existing > schema_version {
                        return Err(StoreError::InvalidInput {
                            field: "schema_version".to_string(),
                            message: format!(
                                "Stored schema {} is newer than requested {}",
                                existing, schema_version
                            ),
                        });
                    }
                }

                self.backend
                    .ensure_schema(&local_schema(schema_version))
                    .await?;
                info!(schema_version, "Local store initialized");
                Ok::<u32, StoreError>(schema_version)
            })
            .await?;

        if version != schema_version {
            warn!(
                active = version,
                requested = schema_version,
                "Local store already initialized with another schema version"
            );
        }

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized() && !self.closed.load(Ordering::SeqCst)
    }

    /// Release the backend. Every later call fails with [`StoreError::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.close().await?;
        info!("Local store closed");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if !self.initialized.initialized() {
            return Err(StoreError::NotInitialized);
        }
        Ok(())
    }

    /// Strictly increasing write stamp, also above `floor` (the record's
    /// current stamp, which may come from a remote clock).
    fn next_stamp(&self, floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let mut last = self
            .last_stamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut stamp = self.clock.now();
        for bound in [*last, floor].into_iter().flatten() {
            if stamp <= bound {
                stamp = bound + Duration::milliseconds(1);
            }
        }

        *last = Some(stamp);
        stamp
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Upsert by id. Stamps `pending` and `last_modified`; keeps `is_deleted`.
    #[instrument(skip(self, entity), fields(entity_type = %T::KIND, id = %entity.id()))]
    pub async fn put<T: Entity>(&self, entity: T) -> Result<Cached<T>> {
        self.ensure_ready()?;
        entity.validate().map_err(|message| StoreError::InvalidInput {
            field: T::KIND.as_str().to_string(),
            message,
        })?;

        let store = T::KIND.store_name();
        let _guard = self.write_lock.lock().await;

        let existing = self.backend.get(store, entity.id()).await?;
        let is_deleted = existing
            .as_ref()
            .and_then(|doc| doc.get("is_deleted"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let floor = existing.as_ref().and_then(doc_last_modified);

        let record = Cached {
            data: entity,
            sync_status: SyncStatus::Pending,
            is_deleted,
            last_modified: self.next_stamp(floor),
        };

        let doc = serde_json::to_value(&record)?;
        self.backend.put(store, record.id(), &doc).await?;

        debug!(last_modified = %record.last_modified, "Record stored as pending");
        Ok(record)
    }

    /// Mark a record deleted. The row stays until it is purged.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        self.ensure_ready()?;
        let store = kind.store_name();
        let _guard = self.write_lock.lock().await;

        let mut doc = self
            .backend
            .get(store, id)
            .await?
            .ok_or_else(|| not_found(kind, id))?;

        let stamp = self.next_stamp(doc_last_modified(&doc));
        let fields = doc.as_object_mut().ok_or_else(|| malformed(kind, id))?;
        fields.insert("is_deleted".to_string(), Value::Bool(true));
        fields.insert(
            "sync_status".to_string(),
            serde_json::to_value(SyncStatus::Pending)?,
        );
        fields.insert("last_modified".to_string(), serde_json::to_value(stamp)?);

        self.backend.put(store, id, &doc).await?;
        debug!(last_modified = %stamp, "Record soft-deleted");
        Ok(())
    }

    /// Hard removal. Returns whether the row existed.
    pub async fn purge(&self, kind: EntityKind, id: &str) -> Result<bool> {
        self.ensure_ready()?;
        let _guard = self.write_lock.lock().await;

        let removed = self.backend.delete(kind.store_name(), id).await?;
        if removed {
            debug!(entity_type = %kind, id, "Record purged");
        }
        Ok(removed)
    }

    /// Set `sync_status = synced` without touching payload or stamp, but only
    /// if `last_modified` still equals `expected`. A write that landed while
    /// the push was in flight keeps the record pending.
    pub async fn mark_synced(
        &self,
        kind: EntityKind,
        id: &str,
        expected: DateTime<Utc>,
    ) -> Result<bool> {
        self.ensure_ready()?;
        let store = kind.store_name();
        let _guard = self.write_lock.lock().await;

        let Some(mut doc) = self.backend.get(store, id).await? else {
            return Ok(false);
        };

        if doc_last_modified(&doc) != Some(expected) {
            debug!(entity_type = %kind, id, "Record changed during sync; leaving pending");
            return Ok(false);
        }

        let fields = doc.as_object_mut().ok_or_else(|| malformed(kind, id))?;
        fields.insert(
            "sync_status".to_string(),
            serde_json::to_value(SyncStatus::Synced)?,
        );
        self.backend.put(store, id, &doc).await?;
        Ok(true)
    }

    /// Store a record confirmed by the remote exactly as given.
    pub async fn apply_remote<T: Entity>(&self, record: &Cached<T>) -> Result<()> {
        self.ensure_ready()?;
        let _guard = self.write_lock.lock().await;

        let doc = serde_json::to_value(record)?;
        self.backend
            .put(T::KIND.store_name(), record.id(), &doc)
            .await?;
        debug!(entity_type = %T::KIND, id = %record.id(), "Remote record applied");
        Ok(())
    }

    /// Like [`apply_remote`](Self::apply_remote), but only while the local
    /// row still carries `expected` as its stamp (`None`: the row is absent).
    pub async fn apply_remote_if_unchanged<T: Entity>(
        &self,
        record: &Cached<T>,
        expected: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.ensure_ready()?;
        let store = T::KIND.store_name();
        let _guard = self.write_lock.lock().await;

        let current = self.backend.get(store, record.id()).await?;
        if current.as_ref().and_then(doc_last_modified) != expected {
            debug!(entity_type = %T::KIND, id = %record.id(), "Local record changed; remote copy not applied");
            return Ok(false);
        }

        let doc = serde_json::to_value(record)?;
        self.backend.put(store, record.id(), &doc).await?;
        debug!(entity_type = %T::KIND, id = %record.id(), "Remote record applied");
        Ok(true)
    }

    /// Hard removal guarded by the record's stamp.
    pub async fn purge_if_unchanged(
        &self,
        kind: EntityKind,
        id: &str,
        expected: DateTime<Utc>,
    ) -> Result<bool> {
        self.ensure_ready()?;
        let store = kind.store_name();
        let _guard = self.write_lock.lock().await;

        let Some(doc) = self.backend.get(store, id).await? else {
            return Ok(false);
        };
        if doc_last_modified(&doc) != Some(expected) {
            debug!(entity_type = %kind, id, "Record changed; purge skipped");
            return Ok(false);
        }

        let removed = self.backend.delete(store, id).await?;
        if removed {
            debug!(entity_type = %kind, id, "Record purged");
        }
        Ok(removed)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// All live records of `owner_id`, optionally limited to an inclusive
    /// date range. Order is unspecified.
    pub async fn get_all<T: Entity>(
        &self,
        owner_id: &str,
        range: Option<DateRange>,
    ) -> Result<Vec<Cached<T>>> {
        self.ensure_ready()?;

        let query = match range {
            Some(range) if T::KIND.is_dated() => IndexQuery::new(index::OWNER_DATE)
                .eq(owner_id)
                .range(KeyRange::inclusive(
                    Some(serde_json::to_value(range.from)?),
                    Some(serde_json::to_value(range.to)?),
                )),
            Some(_) => {
                return Err(StoreError::InvalidInput {
                    field: "date_range".to_string(),
                    message: format!("{} records have no date", T::KIND),
                })
            }
            None => IndexQuery::new(index::OWNER_ID).eq(owner_id),
        };

        let docs = self.backend.query(T::KIND.store_name(), &query).await?;
        Ok(live(decode_all(docs)?))
    }

    /// First live record of `owner_id` on `date`
    pub async fn get_one<T: DatedEntity>(
        &self,
        owner_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Cached<T>>> {
        self.ensure_ready()?;

        let query = IndexQuery::new(index::OWNER_DATE)
            .eq(owner_id)
            .eq(serde_json::to_value(date)?);
        let docs = self.backend.query(T::KIND.store_name(), &query).await?;

        Ok(live(decode_all::<T>(docs)?).into_iter().next())
    }

    /// Live record by id
    pub async fn get<T: Entity>(&self, id: &str) -> Result<Option<Cached<T>>> {
        Ok(self.get_record::<T>(id).await?.filter(|r| !r.is_deleted))
    }

    /// Record by id, tombstones included. For the sync engine.
    pub async fn get_record<T: Entity>(&self, id: &str) -> Result<Option<Cached<T>>> {
        self.ensure_ready()?;
        self.backend
            .get(T::KIND.store_name(), id)
            .await?
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .transpose()
    }

    /// Profile of `owner_id` (profiles are keyed by owner)
    pub async fn get_profile(&self, owner_id: &str) -> Result<Option<Cached<Profile>>> {
        self.get::<Profile>(owner_id).await
    }

    /// Every record of one store with `status`, tombstones included.
    pub async fn list_by_status<T: Entity>(&self, status: SyncStatus) -> Result<Vec<Cached<T>>> {
        self.ensure_ready()?;

        let query = IndexQuery::new(index::SYNC_STATUS).eq(status.as_str());
        let docs = self.backend.query(T::KIND.store_name(), &query).await?;
        decode_all(docs)
    }

    /// Stored status of a record, tombstones included
    pub async fn status_of(&self, kind: EntityKind, id: &str) -> Result<Option<SyncStatus>> {
        self.ensure_ready()?;

        let Some(doc) = self.backend.get(kind.store_name(), id).await? else {
            return Ok(None);
        };
        let status = doc
            .get("sync_status")
            .cloned()
            .ok_or_else(|| malformed(kind, id))?;
        Ok(Some(serde_json::from_value(status)?))
    }

    // =========================================================================
    // Bulk
    // =========================================================================

    /// Union of pending records across every entity store
    pub async fn get_unsynced_items(&self) -> Result<UnsyncedItems> {
        Ok(UnsyncedItems {
            body_metrics: self.list_by_status(SyncStatus::Pending).await?,
            daily_metrics: self.list_by_status(SyncStatus::Pending).await?,
            profiles: self.list_by_status(SyncStatus::Pending).await?,
        })
    }

    /// Wipe every store, sync metadata included. Used on sign-out.
    pub async fn clear_all_data(&self) -> Result<()> {
        self.ensure_ready()?;
        let _guard = self.write_lock.lock().await;

        for store in all_store_names() {
            self.backend.clear(store).await?;
        }
        info!("All local data cleared");
        Ok(())
    }

    // =========================================================================
    // Sync Metadata
    // =========================================================================

    pub async fn get_metadata<M: DeserializeOwned>(&self, key: &str) -> Result<Option<M>> {
        self.ensure_ready()?;
        self.backend
            .get(SYNC_METADATA_STORE, key)
            .await?
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .transpose()
    }

    pub async fn put_metadata<M: Serialize>(&self, key: &str, metadata: &M) -> Result<()> {
        self.ensure_ready()?;
        let doc = serde_json::to_value(metadata)?;
        self.backend.put(SYNC_METADATA_STORE, key, &doc).await?;
        Ok(())
    }

    pub async fn delete_metadata(&self, key: &str) -> Result<bool> {
        self.ensure_ready()?;
        Ok(self.backend.delete(SYNC_METADATA_STORE, key).await?)
    }

    pub async fn scan_metadata<M: DeserializeOwned>(&self) -> Result<Vec<M>> {
        self.ensure_ready()?;
        self.backend
            .scan(SYNC_METADATA_STORE)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .collect()
    }
}

fn doc_last_modified(doc: &Document) -> Option<DateTime<Utc>> {
    doc.get("last_modified")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn decode_all<T: Entity>(docs: Vec<Document>) -> Result<Vec<Cached<T>>> {
    docs.into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
        .collect()
}

fn live<T>(records: Vec<Cached<T>>) -> Vec<Cached<T>> {
    records.into_iter().filter(|r| !r.is_deleted).collect()
}

fn not_found(kind: EntityKind, id: &str) -> StoreError {
    StoreError::NotFound {
        entity_type: kind.as_str().to_string(),
        id: id.to_string(),
    }
}

fn malformed(kind: EntityKind, id: &str) -> StoreError {
    StoreError::InvalidInput {
        field: kind.as_str().to_string(),
        message: format!("Stored document {} is malformed", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryBackend;
    use crate::models::WeightUnit;
    use crate::schema::SCHEMA_VERSION;
    use async_trait::async_trait;
    use bridge_traits::error::BridgeError;
    use bridge_traits::storage::StorageSchema;
    use bridge_traits::time::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    async fn create_test_store() -> (LocalStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = LocalStore::new(Arc::new(MemoryBackend::new()), clock.clone());
        store.initialize(SCHEMA_VERSION).await.unwrap();
        (store, clock)
    }

    fn weigh_in(id: &str, d: u32, weight: f64) -> BodyMetric {
        BodyMetric::new(id, "u1", day(d)).with_weight(weight, WeightUnit::Kg)
    }

    /// Counts schema creations to observe single-flight initialization.
    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryBackend,
        ensure_calls: AtomicUsize,
    }

    #[async_trait]
    impl StorageBackend for CountingBackend {
        async fn ensure_schema(&self, schema: &StorageSchema) -> bridge_traits::Result<()> {
            self.ensure_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.ensure_schema(schema).await
        }
        async fn schema_version(&self) -> bridge_traits::Result<Option<u32>> {
            self.inner.schema_version().await
        }
        async fn put(&self, store: &str, key: &str, doc: &Document) -> bridge_traits::Result<()> {
            self.inner.put(store, key, doc).await
        }
        async fn get(&self, store: &str, key: &str) -> bridge_traits::Result<Option<Document>> {
            self.inner.get(store, key).await
        }
        async fn delete(&self, store: &str, key: &str) -> bridge_traits::Result<bool> {
            self.inner.delete(store, key).await
        }
        async fn query(
            &self,
            store: &str,
            query: &IndexQuery,
        ) -> bridge_traits::Result<Vec<Document>> {
            self.inner.query(store, query).await
        }
        async fn scan(&self, store: &str) -> bridge_traits::Result<Vec<Document>> {
            self.inner.scan(store).await
        }
        async fn clear(&self, store: &str) -> bridge_traits::Result<()> {
            self.inner.clear(store).await
        }
        async fn close(&self) -> bridge_traits::Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_initialize_is_single_flight() {
        let backend = Arc::new(CountingBackend::default());
        let store = LocalStore::new(backend.clone(), Arc::new(ManualClock::new(start())));

        let (a, b) = tokio::join!(
            store.initialize(SCHEMA_VERSION),
            store.initialize(SCHEMA_VERSION)
        );
        a.unwrap();
        b.unwrap();
        store.initialize(SCHEMA_VERSION).await.unwrap();

        assert_eq!(backend.ensure_calls.load(Ordering::SeqCst), 1);
        assert!(store.is_initialized());
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let store = LocalStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(ManualClock::new(start())),
        );
        let result = store.put(weigh_in("m1", 15, 80.0)).await;
        assert!(matches!(result, Err(StoreError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_refuses_schema_downgrade() {
        let backend = Arc::new(MemoryBackend::new());
        backend.ensure_schema(&local_schema(2)).await.unwrap();

        let store = LocalStore::new(backend, Arc::new(ManualClock::new(start())));
        assert!(store.initialize(1).await.is_err());
    }

    #[tokio::test]
    async fn test_put_stamps_pending_and_strictly_increasing() {
        let (store, _clock) = create_test_store().await;

        let first = store.put(weigh_in("m1", 15, 80.0)).await.unwrap();
        assert_eq!(first.sync_status, SyncStatus::Pending);
        assert_eq!(first.last_modified, start());

        // Clock has not moved: the stamp still advances
        let second = store.put(weigh_in("m1", 15, 79.5)).await.unwrap();
        assert!(second.last_modified > first.last_modified);

        let stored = store.get::<BodyMetric>("m1").await.unwrap().unwrap();
        assert_eq!(stored.data.weight, Some(79.5));
        assert_eq!(stored.last_modified, second.last_modified);
    }

    #[tokio::test]
    async fn test_put_stays_above_remote_stamp() {
        let (store, _clock) = create_test_store().await;
        let mut remote = store.put(weigh_in("m1", 15, 80.0)).await.unwrap();
        remote.sync_status = SyncStatus::Synced;
        remote.last_modified = start() + Duration::hours(2);
        store.apply_remote(&remote).await.unwrap();

        let edited = store.put(weigh_in("m1", 15, 78.0)).await.unwrap();
        assert!(edited.last_modified > remote.last_modified);
    }

    #[tokio::test]
    async fn test_get_all_filters_owner_range_and_tombstones() {
        let (store, _clock) = create_test_store().await;
        store.put(weigh_in("m1", 1, 80.0)).await.unwrap();
        store.put(weigh_in("m2", 10, 79.0)).await.unwrap();
        store.put(weigh_in("m3", 20, 78.0)).await.unwrap();
        store
            .put(BodyMetric::new("m4", "u2", day(10)))
            .await
            .unwrap();
        store.soft_delete(EntityKind::BodyMetric, "m3").await.unwrap();

        let all = store.get_all::<BodyMetric>("u1", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let ranged = store
            .get_all::<BodyMetric>("u1", Some(DateRange::new(day(5), day(31))))
            .await
            .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].id(), "m2");
    }

    #[tokio::test]
    async fn test_get_all_rejects_range_for_profiles() {
        let (store, _clock) = create_test_store().await;
        let result = store
            .get_all::<Profile>("u1", Some(DateRange::new(day(1), day(2))))
            .await;
        assert!(matches!(result, Err(StoreError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_get_one_skips_tombstones() {
        let (store, _clock) = create_test_store().await;
        store.put(weigh_in("m1", 15, 80.0)).await.unwrap();

        let found = store.get_one::<BodyMetric>("u1", day(15)).await.unwrap();
        assert_eq!(found.unwrap().sync_status, SyncStatus::Pending);

        store.soft_delete(EntityKind::BodyMetric, "m1").await.unwrap();
        assert!(store
            .get_one::<BodyMetric>("u1", day(15))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_row_and_marks_pending() {
        let (store, clock) = create_test_store().await;
        let stored = store.put(weigh_in("m1", 15, 80.0)).await.unwrap();
        store
            .mark_synced(EntityKind::BodyMetric, "m1", stored.last_modified)
            .await
            .unwrap();

        clock.advance(Duration::minutes(5));
        store.soft_delete(EntityKind::BodyMetric, "m1").await.unwrap();

        assert!(store.get::<BodyMetric>("m1").await.unwrap().is_none());
        let tombstone = store.get_record::<BodyMetric>("m1").await.unwrap().unwrap();
        assert!(tombstone.is_deleted);
        assert_eq!(tombstone.sync_status, SyncStatus::Pending);
        assert_eq!(tombstone.last_modified, start() + Duration::minutes(5));

        // Writing the record again keeps the tombstone flag
        store.put(weigh_in("m1", 15, 81.0)).await.unwrap();
        assert!(store.get::<BodyMetric>("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_missing_record() {
        let (store, _clock) = create_test_store().await;
        let result = store.soft_delete(EntityKind::DailyMetric, "nope").await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_mark_synced_requires_unchanged_stamp() {
        let (store, _clock) = create_test_store().await;
        let pushed = store.put(weigh_in("m1", 15, 80.0)).await.unwrap();
        store.put(weigh_in("m1", 15, 79.0)).await.unwrap();

        let applied = store
            .mark_synced(EntityKind::BodyMetric, "m1", pushed.last_modified)
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(
            store.status_of(EntityKind::BodyMetric, "m1").await.unwrap(),
            Some(SyncStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_list_by_status_and_unsynced_items() {
        let (store, _clock) = create_test_store().await;
        let m1 = store.put(weigh_in("m1", 1, 80.0)).await.unwrap();
        store.put(weigh_in("m2", 2, 79.0)).await.unwrap();
        store
            .put(DailyMetric::new("d1", "u1", day(2)).with_steps(12_000))
            .await
            .unwrap();
        store
            .put(Profile::new("u1", "someone@example.com"))
            .await
            .unwrap();
        store
            .mark_synced(EntityKind::BodyMetric, "m1", m1.last_modified)
            .await
            .unwrap();
        store.soft_delete(EntityKind::BodyMetric, "m2").await.unwrap();

        let synced = store
            .list_by_status::<BodyMetric>(SyncStatus::Synced)
            .await
            .unwrap();
        assert_eq!(synced.len(), 1);

        let unsynced = store.get_unsynced_items().await.unwrap();
        assert_eq!(unsynced.body_metrics.len(), 1);
        assert!(unsynced.body_metrics[0].is_deleted);
        assert_eq!(unsynced.daily_metrics.len(), 1);
        assert_eq!(unsynced.profiles.len(), 1);
        assert_eq!(unsynced.total(), 3);
    }

    #[tokio::test]
    async fn test_get_profile() {
        let (store, _clock) = create_test_store().await;
        store
            .put(Profile::new("u1", "someone@example.com"))
            .await
            .unwrap();

        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.data.email, "someone@example.com");
        assert!(store.get_profile("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_and_clear_all_data() {
        let (store, _clock) = create_test_store().await;
        store.put(weigh_in("m1", 1, 80.0)).await.unwrap();
        store.put(weigh_in("m2", 2, 80.0)).await.unwrap();
        store
            .put_metadata("body_metrics:m2", &serde_json::json!({ "retry_count": 1 }))
            .await
            .unwrap();

        assert!(store.purge(EntityKind::BodyMetric, "m1").await.unwrap());
        assert!(!store.purge(EntityKind::BodyMetric, "m1").await.unwrap());
        assert!(store.get_record::<BodyMetric>("m1").await.unwrap().is_none());

        store.clear_all_data().await.unwrap();
        assert!(store.get_all::<BodyMetric>("u1", None).await.unwrap().is_empty());
        assert!(store
            .scan_metadata::<serde_json::Value>()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_quota_exceeded_surfaces_to_caller() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = LocalStore::new(Arc::new(MemoryBackend::with_quota(1)), clock);
        store.initialize(SCHEMA_VERSION).await.unwrap();

        store.put(weigh_in("m1", 1, 80.0)).await.unwrap();
        let err = store.put(weigh_in("m2", 2, 80.0)).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(store.get::<BodyMetric>("m2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_before_storage() {
        let (store, _clock) = create_test_store().await;
        let result = store.put(weigh_in("m1", 1, -3.0)).await;
        assert!(matches!(result, Err(StoreError::InvalidInput { .. })));
        assert!(store.get_record::<BodyMetric>("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_daily_metric_unique_per_day() {
        let (store, _clock) = create_test_store().await;
        store
            .put(DailyMetric::new("d1", "u1", day(3)))
            .await
            .unwrap();
        let err = store
            .put(DailyMetric::new("d2", "u1", day(3)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Backend(BridgeError::ConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_close_blocks_further_use() {
        let (store, _clock) = create_test_store().await;
        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(!store.is_initialized());
        assert!(matches!(
            store.get::<BodyMetric>("m1").await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            store.initialize(SCHEMA_VERSION).await,
            Err(StoreError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_guarded_remote_apply_and_purge() {
        let (store, _clock) = create_test_store().await;
        let local = store.put(weigh_in("m1", 15, 80.0)).await.unwrap();

        let mut remote = local.clone();
        remote.data.weight = Some(77.0);
        remote.sync_status = SyncStatus::Synced;
        remote.last_modified = start() + Duration::hours(1);

        // Stale expectation: the local write wins
        let stale = local.last_modified - Duration::seconds(5);
        assert!(!store.apply_remote_if_unchanged(&remote, Some(stale)).await.unwrap());
        assert!(!store.apply_remote_if_unchanged(&remote, None).await.unwrap());

        assert!(store
            .apply_remote_if_unchanged(&remote, Some(local.last_modified))
            .await
            .unwrap());
        let stored = store.get::<BodyMetric>("m1").await.unwrap().unwrap();
        assert_eq!(stored, remote);

        assert!(!store
            .purge_if_unchanged(EntityKind::BodyMetric, "m1", local.last_modified)
            .await
            .unwrap());
        assert!(store
            .purge_if_unchanged(EntityKind::BodyMetric, "m1", remote.last_modified)
            .await
            .unwrap());
        assert!(store.get_record::<BodyMetric>("m1").await.unwrap().is_none());
    }
}
