//! Domain models for the local cache
//!
//! Every cached document is a domain payload wrapped in [`Cached`], which adds
//! the sync bookkeeping the local store owns: `sync_status`, `is_deleted` and
//! `last_modified`.

use bridge_traits::remote::RemoteRecord;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, StoreError};

// =============================================================================
// Entity Kinds & Sync Status
// =============================================================================

/// The three cached entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    BodyMetric,
    DailyMetric,
    Profile,
}

impl EntityKind {
    /// Reconciliation order: the profile first, since metric rows reference it
    /// remotely.
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Profile,
        EntityKind::BodyMetric,
        EntityKind::DailyMetric,
    ];

    /// Local store and remote collection name
    pub fn store_name(&self) -> &'static str {
        match self {
            EntityKind::BodyMetric => "body_metrics",
            EntityKind::DailyMetric => "daily_metrics",
            EntityKind::Profile => "profiles",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.store_name()
    }

    /// Whether records of this kind carry a `date` field
    pub fn is_dated(&self) -> bool {
        !matches!(self, EntityKind::Profile)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "body_metrics" => Ok(EntityKind::BodyMetric),
            "daily_metrics" => Ok(EntityKind::DailyMetric),
            "profiles" => Ok(EntityKind::Profile),
            _ => Err(StoreError::InvalidInput {
                field: "entity_type".to_string(),
                message: format!("Unknown entity type: {}", s),
            }),
        }
    }
}

/// Sync status of a cached record
///
/// The store only ever writes `Pending` (local mutation) and `Synced`
/// (confirmed by the remote). `Failed` is derived from sync metadata for
/// display; it is accepted when reading so older documents still decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(StoreError::InvalidInput {
                field: "sync_status".to_string(),
                message: format!("Unknown sync status: {}", s),
            }),
        }
    }
}

// =============================================================================
// Entity Traits
// =============================================================================

/// A domain payload that can be cached and synced.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn owner_id(&self) -> &str;

    /// Local sanity checks run before a write is accepted.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// An entity recorded against a calendar day.
pub trait DatedEntity: Entity {
    fn date(&self) -> NaiveDate;
}

/// Inclusive calendar-day range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// Fresh client-generated record id.
///
/// Ids are minted on the device that creates the record, so they must be
/// unique without asking the remote.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Cached Record
// =============================================================================

/// A domain payload plus local sync bookkeeping, stored as one flat document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cached<T> {
    #[serde(flatten)]
    pub data: T,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub is_deleted: bool,
    pub last_modified: DateTime<Utc>,
}

impl<T: Entity> Cached<T> {
    pub fn id(&self) -> &str {
        self.data.id()
    }

    pub fn owner_id(&self) -> &str {
        self.data.owner_id()
    }

    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    /// Wire form for the remote gateway
    pub fn to_remote(&self) -> Result<RemoteRecord> {
        Ok(RemoteRecord {
            entity_type: T::KIND.as_str().to_string(),
            id: self.id().to_string(),
            owner_id: self.owner_id().to_string(),
            last_modified: self.last_modified,
            is_deleted: self.is_deleted,
            payload: serde_json::to_value(&self.data)?,
        })
    }

    /// Local copy of a record confirmed by the remote
    pub fn from_remote(record: &RemoteRecord) -> Result<Self> {
        if record.entity_type != T::KIND.as_str() {
            return Err(StoreError::InvalidInput {
                field: "entity_type".to_string(),
                message: format!(
                    "Expected {} but the remote sent {}",
                    T::KIND,
                    record.entity_type
                ),
            });
        }

        let data: T = serde_json::from_value(record.payload.clone())?;
        if data.id() != record.id {
            return Err(StoreError::InvalidInput {
                field: "id".to_string(),
                message: format!("Payload id {} does not match record id {}", data.id(), record.id),
            });
        }

        Ok(Self {
            data,
            sync_status: SyncStatus::Synced,
            is_deleted: record.is_deleted,
            last_modified: record.last_modified,
        })
    }
}

// =============================================================================
// Units
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    Kg,
    Lbs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeightUnit {
    Cm,
    Ft,
}

// =============================================================================
// Body Metric
// =============================================================================

/// One body-composition measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyMetric {
    pub id: String,
    pub owner_id: String,
    pub date: NaiveDate,
    pub weight: Option<f64>,
    pub weight_unit: Option<WeightUnit>,
    pub body_fat_percentage: Option<f64>,
    /// Measurement method as entered (navy, dexa, scale, ...)
    pub body_fat_method: Option<String>,
    pub waist: Option<f64>,
    pub neck: Option<f64>,
    pub hip: Option<f64>,
    pub photo_url: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BodyMetric {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            date,
            weight: None,
            weight_unit: None,
            body_fat_percentage: None,
            body_fat_method: None,
            waist: None,
            neck: None,
            hip: None,
            photo_url: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_weight(mut self, weight: f64, unit: WeightUnit) -> Self {
        self.weight = Some(weight);
        self.weight_unit = Some(unit);
        self
    }

    pub fn with_body_fat(mut self, percentage: f64, method: impl Into<String>) -> Self {
        self.body_fat_percentage = Some(percentage);
        self.body_fat_method = Some(method.into());
        self
    }
}

impl Entity for BodyMetric {
    const KIND: EntityKind = EntityKind::BodyMetric;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_ids(&self.id, &self.owner_id)?;

        if let Some(weight) = self.weight {
            if !(weight.is_finite() && weight > 0.0) {
                return Err(format!("Weight {} must be positive", weight));
            }
        }

        if let Some(body_fat) = self.body_fat_percentage {
            if !(0.0..=100.0).contains(&body_fat) {
                return Err(format!("Body fat {}% is out of range", body_fat));
            }
        }

        for (name, value) in [("waist", self.waist), ("neck", self.neck), ("hip", self.hip)] {
            if let Some(value) = value {
                if !(value.is_finite() && value > 0.0) {
                    return Err(format!("{} measurement must be positive", name));
                }
            }
        }

        Ok(())
    }
}

impl DatedEntity for BodyMetric {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

// =============================================================================
// Daily Metric
// =============================================================================

/// Daily activity totals; at most one per owner and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetric {
    pub id: String,
    pub owner_id: String,
    pub date: NaiveDate,
    pub steps: Option<u32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DailyMetric {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            date,
            steps: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }
}

impl Entity for DailyMetric {
    const KIND: EntityKind = EntityKind::DailyMetric;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_ids(&self.id, &self.owner_id)
    }
}

impl DatedEntity for DailyMetric {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Account profile; its id is the owner id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub owner_id: String,
    pub email: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub height: Option<f64>,
    pub height_unit: Option<HeightUnit>,
    pub goal_weight: Option<f64>,
    pub goal_weight_unit: Option<WeightUnit>,
    /// Free-form client settings
    #[serde(default)]
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(owner_id: impl Into<String>, email: impl Into<String>) -> Self {
        let owner_id = owner_id.into();
        let now = Utc::now();
        Self {
            id: owner_id.clone(),
            owner_id,
            email: email.into(),
            username: None,
            full_name: None,
            avatar_url: None,
            bio: None,
            height: None,
            height_unit: None,
            goal_weight: None,
            goal_weight_unit: None,
            settings: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Profile {
    const KIND: EntityKind = EntityKind::Profile;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_ids(&self.id, &self.owner_id)?;

        if self.id != self.owner_id {
            return Err("Profile id must equal its owner id".to_string());
        }

        if !self.email.contains('@') {
            return Err("Profile email is not a valid address".to_string());
        }

        if let Some(height) = self.height {
            if !(height.is_finite() && height > 0.0) {
                return Err("Height must be positive".to_string());
            }
        }

        Ok(())
    }
}

fn validate_ids(id: &str, owner_id: &str) -> std::result::Result<(), String> {
    if id.trim().is_empty() {
        return Err("Record id cannot be empty".to_string());
    }
    if owner_id.trim().is_empty() {
        return Err("Owner id cannot be empty".to_string());
    }
    Ok(())
}
