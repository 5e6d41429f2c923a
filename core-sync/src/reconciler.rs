//! # Reconciler
//!
//! Moves cached records from `pending` to `synced` through the
//! [`RemoteGateway`], resolving conflicts against the remote copy.
//!
//! ## Pass
//!
//! For one entity store at a time:
//!
//! 1. Take the in-flight guard for the store, or skip the pass if another
//!    pass holds it.
//! 2. Select pending records. Records with recorded failures are only taken
//!    once their backoff window has elapsed; records flagged for review wait
//!    for a manual retry.
//! 3. Pull the remote copies of the candidates (one call per owner) and apply
//!    the [`ConflictPolicy`]. A pending write that loses is discarded and the
//!    remote copy adopted.
//! 4. Push the rest. An acknowledged tombstone is purged at once; any other
//!    acknowledged record is marked `synced`. Failures are counted in the
//!    [`SyncStateTracker`] and the record stays `pending`.
//!
//! The in-flight state is never persisted: an interrupted pass leaves its
//! records `pending` and they are pushed again next time, so delivery is
//! at-least-once and the remote must upsert by id.

use bridge_traits::remote::{GatewayError, RemoteGateway, RemoteRecord};
use chrono::{DateTime, Utc};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_store::{
    BodyMetric, Cached, DailyMetric, Entity, EntityKind, LocalStore, Profile, SyncStatus,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::backoff::RetryPolicy;
use crate::conflict::{ConflictPolicy, Resolution};
use crate::error::Result;
use crate::tracker::SyncStateTracker;

// ============================================================================
// Reports
// ============================================================================

/// Outcome of one reconciliation pass over one entity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub entity_type: EntityKind,
    /// Records selected for pushing
    pub candidates: u64,
    pub pushed: u64,
    /// Pending writes that lost to a newer remote copy
    pub discarded: u64,
    pub failed: u64,
    /// Tombstones purged after the remote confirmed the deletion
    pub purged: u64,
    /// Pending records left alone (backoff window or review flag)
    pub skipped: u64,
    /// Another pass over the same store was already running
    pub busy: bool,
}

impl PassReport {
    fn new(entity_type: EntityKind) -> Self {
        Self {
            entity_type,
            candidates: 0,
            pushed: 0,
            discarded: 0,
            failed: 0,
            purged: 0,
            skipped: 0,
            busy: false,
        }
    }
}

/// Outcome of pulling remote changes for one owner and entity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    pub entity_type: EntityKind,
    /// Remote records written into the local store
    pub applied: u64,
    /// Local rows removed because the remote deleted them
    pub purged: u64,
    /// Pending local writes that lost to the remote copy
    pub discarded: u64,
    /// Pending local writes that won and will be pushed
    pub kept_local: u64,
    /// Malformed remote records, or rows that changed mid-pull
    pub skipped: u64,
    /// Newest remote `last_modified` seen; the next pull cursor
    pub latest: Option<DateTime<Utc>>,
    pub busy: bool,
}

impl PullReport {
    fn new(entity_type: EntityKind) -> Self {
        Self {
            entity_type,
            applied: 0,
            purged: 0,
            discarded: 0,
            kept_local: 0,
            skipped: 0,
            latest: None,
            busy: false,
        }
    }
}

enum Outcome {
    Pushed,
    Applied,
    Purged,
    Discarded,
    Failed,
    Unchanged,
}

// ============================================================================
// In-flight guard
// ============================================================================

type InFlight = Arc<Mutex<HashSet<EntityKind>>>;

/// Marks one entity store as being reconciled; released on drop.
struct InFlightGuard {
    in_flight: InFlight,
    kind: EntityKind,
}

impl InFlightGuard {
    fn acquire(in_flight: &InFlight, kind: EntityKind) -> Option<Self> {
        let mut held = in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(kind) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            kind,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.kind);
    }
}

struct Candidate<T> {
    record: Cached<T>,
    last_synced: Option<DateTime<Utc>>,
}

/// Remote copies of the candidates, fetched before pushing.
#[derive(Default)]
struct RemoteSnapshot {
    records: HashMap<String, RemoteRecord>,
    /// Owners whose pull failed
    unreachable: HashMap<String, GatewayError>,
}

// ============================================================================
// Reconciler
// ============================================================================

pub struct Reconciler {
    store: Arc<LocalStore>,
    tracker: Arc<SyncStateTracker>,
    gateway: Arc<dyn RemoteGateway>,
    retry: RetryPolicy,
    policy: ConflictPolicy,
    events: EventBus,
    in_flight: InFlight,
}

impl Reconciler {
    pub fn new(
        store: Arc<LocalStore>,
        tracker: Arc<SyncStateTracker>,
        gateway: Arc<dyn RemoteGateway>,
        retry: RetryPolicy,
        policy: ConflictPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            tracker,
            gateway,
            retry,
            policy,
            events,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Whether a pass over `kind` is running right now.
    pub fn is_in_flight(&self, kind: EntityKind) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&kind)
    }

    fn emit(&self, event: SyncEvent) {
        self.events.emit(CoreEvent::Sync(event)).ok();
    }

    /// Run one pass over every entity store, profiles first.
    pub async fn reconcile_all(&self) -> Result<Vec<PassReport>> {
        let mut reports = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            reports.push(self.reconcile(kind).await?);
        }
        Ok(reports)
    }

    /// Run one pass over the store of `kind`.
    pub async fn reconcile(&self, kind: EntityKind) -> Result<PassReport> {
        match kind {
            EntityKind::BodyMetric => self.reconcile_store::<BodyMetric>().await,
            EntityKind::DailyMetric => self.reconcile_store::<DailyMetric>().await,
            EntityKind::Profile => self.reconcile_store::<Profile>().await,
        }
    }

    /// Fetch remote changes of `kind` for `owner_id` made at or after `since`
    /// and merge them into the local store under the conflict policy.
    pub async fn pull_updates(
        &self,
        kind: EntityKind,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<PullReport> {
        match kind {
            EntityKind::BodyMetric => self.pull_store::<BodyMetric>(owner_id, since).await,
            EntityKind::DailyMetric => self.pull_store::<DailyMetric>(owner_id, since).await,
            EntityKind::Profile => self.pull_store::<Profile>(owner_id, since).await,
        }
    }

    #[instrument(skip(self), fields(entity_type = %T::KIND))]
    async fn reconcile_store<T: Entity>(&self) -> Result<PassReport> {
        let kind = T::KIND;
        let mut report = PassReport::new(kind);

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, kind) else {
            debug!("Reconciliation already in flight; skipping pass");
            report.busy = true;
            return Ok(report);
        };

        let candidates = self.collect_candidates::<T>(&mut report).await?;
        if candidates.is_empty() {
            debug!(skipped = report.skipped, "Nothing to reconcile");
            return Ok(report);
        }

        report.candidates = candidates.len() as u64;
        self.emit(SyncEvent::PassStarted {
            entity_type: kind.as_str().to_string(),
            candidates: report.candidates,
        });

        let snapshot = if self.policy.needs_remote_state() {
            self.fetch_remote_state(&candidates).await
        } else {
            RemoteSnapshot::default()
        };

        for candidate in &candidates {
            let outcome = match snapshot.unreachable.get(candidate.record.owner_id()) {
                Some(err) => {
                    let id = candidate.record.id();
                    self.tracker.record_attempt(kind, id).await?;
                    self.handle_failure(kind, id, err).await?;
                    Outcome::Failed
                }
                None => {
                    let remote = snapshot.records.get(candidate.record.id());
                    self.sync_record(candidate, remote).await?
                }
            };

            match outcome {
                Outcome::Pushed => report.pushed += 1,
                Outcome::Purged => report.purged += 1,
                Outcome::Discarded => report.discarded += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Applied | Outcome::Unchanged => report.skipped += 1,
            }
        }

        info!(
            candidates = report.candidates,
            pushed = report.pushed,
            discarded = report.discarded,
            failed = report.failed,
            purged = report.purged,
            skipped = report.skipped,
            "Reconciliation pass completed"
        );
        self.emit(SyncEvent::PassCompleted {
            entity_type: kind.as_str().to_string(),
            pushed: report.pushed,
            discarded: report.discarded,
            failed: report.failed,
            purged: report.purged,
            skipped: report.skipped,
        });

        Ok(report)
    }

    async fn collect_candidates<T: Entity>(
        &self,
        report: &mut PassReport,
    ) -> Result<Vec<Candidate<T>>> {
        let kind = T::KIND;
        let now = self.store.clock().now();
        let mut candidates = Vec::new();

        for record in self.store.list_by_status::<T>(SyncStatus::Pending).await? {
            let metadata = self.tracker.get(kind, record.id()).await?;
            let eligible = metadata
                .as_ref()
                .map_or(true, |metadata| self.retry.is_eligible(metadata, now));

            if eligible {
                candidates.push(Candidate {
                    last_synced: metadata.and_then(|m| m.last_sync_success),
                    record,
                });
            } else {
                report.skipped += 1;
            }
        }

        Ok(candidates)
    }

    /// One pull per owner, starting at the oldest stamp that can matter.
    async fn fetch_remote_state<T: Entity>(&self, candidates: &[Candidate<T>]) -> RemoteSnapshot {
        let kind = T::KIND;
        let mut by_owner: BTreeMap<&str, Vec<&Candidate<T>>> = BTreeMap::new();
        for candidate in candidates {
            by_owner
                .entry(candidate.record.owner_id())
                .or_default()
                .push(candidate);
        }

        let mut snapshot = RemoteSnapshot::default();
        for (owner_id, owned) in by_owner {
            let since = owned
                .iter()
                .map(|c| self.policy.pull_floor(c.record.last_modified, c.last_synced))
                .collect::<Option<Vec<_>>>()
                .and_then(|floors| floors.into_iter().min());
            let wanted: HashSet<&str> = owned.iter().map(|c| c.record.id()).collect();

            match self.gateway.pull(kind.as_str(), owner_id, since).await {
                Ok(records) => {
                    for record in records {
                        if wanted.contains(record.id.as_str()) {
                            snapshot.records.insert(record.id.clone(), record);
                        }
                    }
                }
                Err(err) => {
                    warn!(entity_type = %kind, error = %err, "Could not fetch remote state");
                    snapshot.unreachable.insert(owner_id.to_string(), err);
                }
            }
        }

        snapshot
    }

    async fn sync_record<T: Entity>(
        &self,
        candidate: &Candidate<T>,
        remote: Option<&RemoteRecord>,
    ) -> Result<Outcome> {
        let kind = T::KIND;
        let local = &candidate.record;
        let id = local.id();

        let resolution = self.policy.resolve(
            local.last_modified,
            remote.map(|r| r.last_modified),
            candidate.last_synced,
        );
        if let (Resolution::AdoptRemote, Some(remote)) = (resolution, remote) {
            return self.adopt_remote(local, remote).await;
        }

        self.tracker.record_attempt(kind, id).await?;
        let wire = local.to_remote()?;

        match self.gateway.push(&wire).await {
            Ok(ack) => {
                // The metadata row outlives the purge as an audit of the confirmed delete
                self.tracker.record_success(kind, id).await?;

                let settled = if local.is_deleted && ack.deleted {
                    if self
                        .store
                        .purge_if_unchanged(kind, id, local.last_modified)
                        .await?
                    {
                        debug!(entity_type = %kind, id, "Deletion confirmed; tombstone purged");
                        return Ok(Outcome::Purged);
                    }
                    false
                } else {
                    self.store
                        .mark_synced(kind, id, local.last_modified)
                        .await?
                };

                if !settled {
                    debug!(entity_type = %kind, id, "Record changed while in flight; stays pending");
                }
                Ok(Outcome::Pushed)
            }
            Err(err) => {
                self.handle_failure(kind, id, &err).await?;
                Ok(Outcome::Failed)
            }
        }
    }

    /// Replace a pending local write with the remote copy.
    async fn adopt_remote<T: Entity>(
        &self,
        local: &Cached<T>,
        remote: &RemoteRecord,
    ) -> Result<Outcome> {
        let kind = T::KIND;
        let id = local.id();

        let replaced = if remote.is_deleted {
            let purged = self
                .store
                .purge_if_unchanged(kind, id, local.last_modified)
                .await?;
            if purged {
                self.tracker.record_success(kind, id).await?;
            }
            purged
        } else {
            let cached = match Cached::<T>::from_remote(remote) {
                Ok(cached) => cached,
                Err(err) => {
                    warn!(entity_type = %kind, id, error = %err, "Remote copy is malformed");
                    self.tracker.record_attempt(kind, id).await?;
                    let err = GatewayError::Validation(format!("Malformed remote record: {}", err));
                    self.handle_failure(kind, id, &err).await?;
                    return Ok(Outcome::Failed);
                }
            };
            let applied = self
                .store
                .apply_remote_if_unchanged(&cached, Some(local.last_modified))
                .await?;
            if applied {
                self.tracker.record_success(kind, id).await?;
            }
            applied
        };

        if !replaced {
            debug!(entity_type = %kind, id, "Record changed during resolution; stays pending");
            return Ok(Outcome::Unchanged);
        }

        info!(
            entity_type = %kind,
            id,
            local_modified = %local.last_modified,
            remote_modified = %remote.last_modified,
            "Pending local write discarded in favour of the remote copy"
        );
        self.emit(SyncEvent::ConflictDiscarded {
            entity_type: kind.as_str().to_string(),
            id: id.to_string(),
        });
        Ok(Outcome::Discarded)
    }

    async fn handle_failure(&self, kind: EntityKind, id: &str, err: &GatewayError) -> Result<()> {
        let message = err.to_string();
        let retry_count = self.tracker.record_failure(kind, id, &message).await?;
        let retryable = err.is_retryable();
        let backoff_ms = self.retry.delay_millis(retry_count);

        warn!(
            entity_type = %kind,
            id,
            retry_count,
            retryable,
            backoff_ms,
            error = %err,
            "Push failed"
        );
        self.emit(SyncEvent::RecordFailed {
            entity_type: kind.as_str().to_string(),
            id: id.to_string(),
            message: message.clone(),
            retryable,
            retry_count,
        });

        if !retryable {
            self.tracker.flag_for_review(kind, id).await?;
            self.emit(SyncEvent::NeedsReview {
                entity_type: kind.as_str().to_string(),
                id: id.to_string(),
                message,
            });
        } else if self.retry.is_escalation(retry_count) {
            warn!(entity_type = %kind, id, retry_count, "Retries exhausted; escalating");
            self.emit(SyncEvent::RetriesExhausted {
                entity_type: kind.as_str().to_string(),
                id: id.to_string(),
                retry_count,
            });
        }

        Ok(())
    }

    #[instrument(skip(self), fields(entity_type = %T::KIND))]
    async fn pull_store<T: Entity>(
        &self,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<PullReport> {
        let kind = T::KIND;
        let mut report = PullReport::new(kind);

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, kind) else {
            debug!("Reconciliation already in flight; skipping pull");
            report.busy = true;
            return Ok(report);
        };

        let records = self.gateway.pull(kind.as_str(), owner_id, since).await?;

        for remote in &records {
            report.latest = report.latest.max(Some(remote.last_modified));

            match self.store.get_record::<T>(&remote.id).await? {
                None if remote.is_deleted => {}
                None => match Cached::<T>::from_remote(remote) {
                    Ok(cached) => {
                        if self.store.apply_remote_if_unchanged(&cached, None).await? {
                            report.applied += 1;
                        } else {
                            report.skipped += 1;
                        }
                    }
                    Err(err) => {
                        warn!(id = %remote.id, error = %err, "Skipping malformed remote record");
                        report.skipped += 1;
                    }
                },
                Some(local) if local.is_pending() => {
                    let last_synced = self
                        .tracker
                        .get(kind, local.id())
                        .await?
                        .and_then(|m| m.last_sync_success);
                    let resolution = self.policy.resolve(
                        local.last_modified,
                        Some(remote.last_modified),
                        last_synced,
                    );
                    match resolution {
                        Resolution::PushLocal => report.kept_local += 1,
                        Resolution::AdoptRemote => match self.adopt_remote(&local, remote).await? {
                            Outcome::Discarded => report.discarded += 1,
                            _ => report.skipped += 1,
                        },
                    }
                }
                Some(local) => {
                    let outcome = self.refresh_synced(&local, remote).await?;
                    match outcome {
                        Outcome::Purged => report.purged += 1,
                        Outcome::Applied => report.applied += 1,
                        _ => report.skipped += 1,
                    }
                }
            }
        }

        debug!(
            pulled = records.len(),
            applied = report.applied,
            purged = report.purged,
            discarded = report.discarded,
            kept_local = report.kept_local,
            "Remote changes merged"
        );
        Ok(report)
    }

    /// Bring a synced local copy up to date with the remote.
    async fn refresh_synced<T: Entity>(
        &self,
        local: &Cached<T>,
        remote: &RemoteRecord,
    ) -> Result<Outcome> {
        let kind = T::KIND;
        let id = local.id();

        if remote.is_deleted {
            if self
                .store
                .purge_if_unchanged(kind, id, local.last_modified)
                .await?
            {
                return Ok(Outcome::Purged);
            }
            return Ok(Outcome::Unchanged);
        }

        if remote.last_modified == local.last_modified {
            return Ok(Outcome::Unchanged);
        }

        let cached = match Cached::<T>::from_remote(remote) {
            Ok(cached) => cached,
            Err(err) => {
                warn!(id, error = %err, "Skipping malformed remote record");
                return Ok(Outcome::Unchanged);
            }
        };

        if self
            .store
            .apply_remote_if_unchanged(&cached, Some(local.last_modified))
            .await?
        {
            Ok(Outcome::Applied)
        } else {
            Ok(Outcome::Unchanged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_is_exclusive_and_released_on_drop() {
        let in_flight: InFlight = Arc::new(Mutex::new(HashSet::new()));

        let guard = InFlightGuard::acquire(&in_flight, EntityKind::BodyMetric).unwrap();
        assert!(InFlightGuard::acquire(&in_flight, EntityKind::BodyMetric).is_none());

        // Other stores are independent
        let other = InFlightGuard::acquire(&in_flight, EntityKind::Profile);
        assert!(other.is_some());

        drop(guard);
        assert!(InFlightGuard::acquire(&in_flight, EntityKind::BodyMetric).is_some());
    }
}
