//! Storage Backend Abstraction
//!
//! Durable document storage with secondary indices, modelled on the object
//! store + index shape that browsers expose, so the same cache logic runs on
//! an embedded SQL engine on native targets.
//!
//! ## Model
//!
//! - A **store** holds JSON object documents keyed by a string primary key.
//! - An **index** names an ordered list of top-level document fields. Queries
//!   match an equality prefix of those fields and may add an inclusive range
//!   on the field that follows the prefix.
//! - Unique indices are enforced by the backend and surface as
//!   [`BridgeError::ConstraintViolation`](crate::BridgeError::ConstraintViolation).
//! - A backend that runs out of space must report
//!   [`BridgeError::QuotaExceeded`](crate::BridgeError::QuotaExceeded), never a
//!   generic I/O error.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::storage::{IndexQuery, KeyRange, StorageBackend};
//!
//! async fn march_entries(backend: &dyn StorageBackend) -> Result<Vec<Document>> {
//!     let query = IndexQuery::new("owner_id_date")
//!         .eq("u1")
//!         .range(KeyRange::inclusive(Some("2024-03-01".into()), Some("2024-03-31".into())));
//!     backend.query("body_metrics", &query).await
//! }
//! ```

use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{BridgeError, Result};

/// A stored document: always a JSON object.
pub type Document = Value;

/// Secondary index definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    /// Top-level document fields, in index order
    pub fields: Vec<String>,
    pub unique: bool,
}

/// Object store definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    pub name: String,
    pub indices: Vec<IndexSpec>,
}

impl StoreSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indices: Vec::new(),
        }
    }

    /// Add a non-unique index
    pub fn index(self, name: &str, fields: &[&str]) -> Self {
        self.with_index(name, fields, false)
    }

    /// Add a unique index
    pub fn unique_index(self, name: &str, fields: &[&str]) -> Self {
        self.with_index(name, fields, true)
    }

    fn with_index(mut self, name: &str, fields: &[&str], unique: bool) -> Self {
        self.indices.push(IndexSpec {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique,
        });
        self
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexSpec> {
        self.indices.iter().find(|index| index.name == name)
    }
}

/// Full persisted schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSchema {
    pub version: u32,
    pub stores: Vec<StoreSpec>,
}

impl StorageSchema {
    pub fn find_store(&self, name: &str) -> Option<&StoreSpec> {
        self.stores.iter().find(|store| store.name == name)
    }
}

/// Inclusive bounds on one indexed field. A missing bound is open.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyRange {
    pub lower: Option<Value>,
    pub upper: Option<Value>,
}

impl KeyRange {
    pub fn inclusive(lower: Option<Value>, upper: Option<Value>) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, value: &Value) -> bool {
        let above = match &self.lower {
            Some(lower) => matches!(
                compare_values(value, lower),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            None => true,
        };
        let below = match &self.upper {
            Some(upper) => matches!(
                compare_values(value, upper),
                Some(Ordering::Less | Ordering::Equal)
            ),
            None => true,
        };
        above && below
    }
}

/// Query against one secondary index
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexQuery {
    pub index: String,
    /// Values for the leading index fields
    pub equals: Vec<Value>,
    /// Bounds on the field right after the equality prefix
    pub range: Option<KeyRange>,
}

impl IndexQuery {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            equals: Vec::new(),
            range: None,
        }
    }

    pub fn eq(mut self, value: impl Into<Value>) -> Self {
        self.equals.push(value.into());
        self
    }

    pub fn range(mut self, range: KeyRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Check the query shape against the index it targets.
    pub fn validate(&self, index: &IndexSpec) -> Result<()> {
        let needed = self.equals.len() + usize::from(self.range.is_some());
        if self.equals.is_empty() && self.range.is_none() {
            return Err(BridgeError::OperationFailed(format!(
                "Query on index {} has no conditions",
                index.name
            )));
        }
        if needed > index.fields.len() {
            return Err(BridgeError::OperationFailed(format!(
                "Query on index {} uses {} fields but the index has {}",
                index.name,
                needed,
                index.fields.len()
            )));
        }
        Ok(())
    }

    /// Evaluate the query against a document in memory.
    pub fn matches(&self, index: &IndexSpec, doc: &Document) -> bool {
        for (field, expected) in index.fields.iter().zip(&self.equals) {
            match doc.get(field) {
                Some(actual) if compare_values(actual, expected) == Some(Ordering::Equal) => {}
                _ => return false,
            }
        }

        match (&self.range, index.fields.get(self.equals.len())) {
            (Some(range), Some(field)) => doc.get(field).is_some_and(|v| range.contains(v)),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Order two scalar JSON values of the same kind. Mixed kinds and
/// non-scalars are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Storage backend trait
///
/// Every operation is one atomic unit from the caller's point of view; the
/// cache layer never needs multi-call transactions.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create every store and index in `schema` that does not exist yet and
    /// record the schema version. Must be idempotent.
    async fn ensure_schema(&self, schema: &StorageSchema) -> Result<()>;

    /// Version recorded by the last `ensure_schema`, if any
    async fn schema_version(&self) -> Result<Option<u32>>;

    /// Insert or replace the document stored under `key`
    async fn put(&self, store: &str, key: &str, doc: &Document) -> Result<()>;

    async fn get(&self, store: &str, key: &str) -> Result<Option<Document>>;

    /// Remove a document; returns whether it existed
    async fn delete(&self, store: &str, key: &str) -> Result<bool>;

    /// Documents matching an index query, in no particular order
    async fn query(&self, store: &str, query: &IndexQuery) -> Result<Vec<Document>>;

    /// Every document in the store
    async fn scan(&self, store: &str) -> Result<Vec<Document>>;

    /// Remove every document in the store
    async fn clear(&self, store: &str) -> Result<()>;

    /// Release the underlying handle
    async fn close(&self) -> Result<()>;
}
