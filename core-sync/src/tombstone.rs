//! Tombstone collection
//!
//! Soft-deleted records stay on disk until the remote has confirmed the
//! deletion. A sweep purges tombstones that are `synced` and older than the
//! retention window. Their sync metadata stays behind for audit and is only
//! dropped once it ages past `metadata_retention`. A tombstone that is still
//! `pending` is never touched, whatever its age.

use chrono::Duration;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_store::{
    BodyMetric, DailyMetric, Entity, EntityKind, LocalStore, Profile, SyncStatus,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::tracker::SyncStateTracker;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub purged: u64,
    pub metadata_collected: u64,
}

pub struct TombstoneCollector {
    store: Arc<LocalStore>,
    tracker: Arc<SyncStateTracker>,
    events: EventBus,
    retention_window: Duration,
    metadata_retention: Duration,
}

impl TombstoneCollector {
    pub fn new(
        store: Arc<LocalStore>,
        tracker: Arc<SyncStateTracker>,
        events: EventBus,
        retention_window: Duration,
        metadata_retention: Duration,
    ) -> Self {
        Self {
            store,
            tracker,
            events,
            retention_window,
            metadata_retention,
        }
    }

    /// Sweep every entity store.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for kind in EntityKind::ALL {
            report.purged += match kind {
                EntityKind::BodyMetric => self.sweep_store::<BodyMetric>().await?,
                EntityKind::DailyMetric => self.sweep_store::<DailyMetric>().await?,
                EntityKind::Profile => self.sweep_store::<Profile>().await?,
            };
        }

        report.metadata_collected = self
            .tracker
            .collect_garbage(self.metadata_retention)
            .await?;

        if report.purged > 0 {
            info!(purged = report.purged, "Expired tombstones purged");
            self.events
                .emit(CoreEvent::Cache(CacheEvent::TombstonesPurged {
                    count: report.purged,
                }))
                .ok();
        }

        Ok(report)
    }

    async fn sweep_store<T: Entity>(&self) -> Result<u64> {
        let kind = T::KIND;
        let now = self.store.clock().now();
        let mut purged = 0;

        for record in self.store.list_by_status::<T>(SyncStatus::Synced).await? {
            let expired = now.signed_duration_since(record.last_modified) > self.retention_window;
            if !record.is_deleted || !expired {
                continue;
            }

            if self
                .store
                .purge_if_unchanged(kind, record.id(), record.last_modified)
                .await?
            {
                purged += 1;
            }
        }

        debug!(entity_type = %kind, purged, "Store swept");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use core_store::adapters::MemoryBackend;
    use core_store::{Cached, SCHEMA_VERSION};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<LocalStore>,
        clock: Arc<ManualClock>,
        tracker: Arc<SyncStateTracker>,
        collector: TombstoneCollector,
    }

    async fn create_fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(LocalStore::new(Arc::new(MemoryBackend::new()), clock.clone()));
        store.initialize(SCHEMA_VERSION).await.unwrap();
        let tracker = Arc::new(SyncStateTracker::new(store.clone()));
        let collector = TombstoneCollector::new(
            store.clone(),
            tracker.clone(),
            EventBus::default(),
            Duration::days(30),
            Duration::days(90),
        );
        Fixture {
            store,
            clock,
            tracker,
            collector,
        }
    }

    async fn synced_tombstone(store: &LocalStore, id: &str) -> Cached<DailyMetric> {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut record = store.put(DailyMetric::new(id, "u1", day)).await.unwrap();
        record.is_deleted = true;
        record.sync_status = SyncStatus::Synced;
        store.apply_remote(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_retention_boundary() {
        let fixture = create_fixture().await;
        synced_tombstone(&fixture.store, "d1").await;

        // Exactly at the window: kept
        fixture.clock.advance(Duration::days(30));
        assert_eq!(fixture.collector.sweep().await.unwrap().purged, 0);
        assert!(fixture
            .store
            .get_record::<DailyMetric>("d1")
            .await
            .unwrap()
            .is_some());

        fixture.clock.advance(Duration::seconds(1));
        assert_eq!(fixture.collector.sweep().await.unwrap().purged, 1);
        assert!(fixture
            .store
            .get_record::<DailyMetric>("d1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_pending_tombstones_are_never_purged() {
        let fixture = create_fixture().await;
        fixture
            .store
            .put(DailyMetric::new("d1", "u1", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
            .await
            .unwrap();
        fixture
            .store
            .soft_delete(EntityKind::DailyMetric, "d1")
            .await
            .unwrap();

        fixture.clock.advance(Duration::days(365));
        assert_eq!(fixture.collector.sweep().await.unwrap().purged, 0);
        assert!(fixture
            .store
            .get_record::<DailyMetric>("d1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_live_synced_records_are_kept() {
        let fixture = create_fixture().await;
        let mut record = fixture
            .store
            .put(DailyMetric::new("d1", "u1", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
            .await
            .unwrap();
        record.sync_status = SyncStatus::Synced;
        fixture.store.apply_remote(&record).await.unwrap();

        fixture.clock.advance(Duration::days(365));
        assert_eq!(fixture.collector.sweep().await.unwrap().purged, 0);
    }

    #[tokio::test]
    async fn test_sync_metadata_outlives_purged_tombstone() {
        let fixture = create_fixture().await;
        synced_tombstone(&fixture.store, "d1").await;
        fixture
            .tracker
            .record_attempt(EntityKind::DailyMetric, "d1")
            .await
            .unwrap();
        fixture
            .tracker
            .record_success(EntityKind::DailyMetric, "d1")
            .await
            .unwrap();

        fixture.clock.advance(Duration::days(31));
        let report = fixture.collector.sweep().await.unwrap();
        assert_eq!(report.purged, 1);
        assert_eq!(report.metadata_collected, 0);

        let metadata = fixture
            .tracker
            .get(EntityKind::DailyMetric, "d1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.last_sync_success, Some(start()));

        fixture.clock.advance(Duration::days(60));
        assert_eq!(fixture.collector.sweep().await.unwrap().metadata_collected, 1);
        assert!(fixture
            .tracker
            .get(EntityKind::DailyMetric, "d1")
            .await
            .unwrap()
            .is_none());
    }
}
