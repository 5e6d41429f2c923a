//! Persisted local schema
//!
//! | Store | Key | Indices |
//! |---|---|---|
//! | body_metrics | id | owner_id; owner_id+date; sync_status |
//! | daily_metrics | id | owner_id; owner_id+date (unique); sync_status |
//! | profiles | id | email (unique); sync_status; owner_id |
//! | sync_metadata | entity_type:entity_id | entity_type+entity_id (unique) |

use bridge_traits::storage::{StorageSchema, StoreSpec};

use crate::models::EntityKind;

/// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Store holding per-record sync bookkeeping
pub const SYNC_METADATA_STORE: &str = "sync_metadata";

/// Index names shared by every backend
pub mod index {
    pub const OWNER_ID: &str = "owner_id";
    pub const OWNER_DATE: &str = "owner_id_date";
    pub const SYNC_STATUS: &str = "sync_status";
    pub const EMAIL: &str = "email";
    pub const ENTITY: &str = "entity_type_entity_id";
}

/// Every store name, entity stores first
pub fn all_store_names() -> [&'static str; 4] {
    [
        EntityKind::BodyMetric.store_name(),
        EntityKind::DailyMetric.store_name(),
        EntityKind::Profile.store_name(),
        SYNC_METADATA_STORE,
    ]
}

/// Build the local schema at `version`.
pub fn local_schema(version: u32) -> StorageSchema {
    StorageSchema {
        version,
        stores: vec![
            StoreSpec::new(EntityKind::BodyMetric.store_name())
                .index(index::OWNER_ID, &["owner_id"])
                .index(index::OWNER_DATE, &["owner_id", "date"])
                .index(index::SYNC_STATUS, &["sync_status"]),
            StoreSpec::new(EntityKind::DailyMetric.store_name())
                .index(index::OWNER_ID, &["owner_id"])
                .unique_index(index::OWNER_DATE, &["owner_id", "date"])
                .index(index::SYNC_STATUS, &["sync_status"]),
            StoreSpec::new(EntityKind::Profile.store_name())
                .unique_index(index::EMAIL, &["email"])
                .index(index::SYNC_STATUS, &["sync_status"])
                .index(index::OWNER_ID, &["owner_id"]),
            StoreSpec::new(SYNC_METADATA_STORE)
                .unique_index(index::ENTITY, &["entity_type", "entity_id"]),
        ],
    }
}

/// Primary key of a sync metadata row
pub fn sync_metadata_key(entity_type: &str, entity_id: &str) -> String {
    format!("{}:{}", entity_type, entity_id)
}
