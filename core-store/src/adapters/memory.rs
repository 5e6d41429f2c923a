//! In-memory storage backend
//!
//! Keeps every store in a `BTreeMap` behind one mutex. Useful for tests and
//! for hosts that cannot ship SQLite. An optional document quota lets tests
//! exercise the quota-exceeded path.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::storage::{
    compare_values, Document, IndexQuery, IndexSpec, StorageBackend, StorageSchema, StoreSpec,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct MemoryState {
    version: Option<u32>,
    specs: HashMap<String, StoreSpec>,
    stores: HashMap<String, BTreeMap<String, Document>>,
    closed: bool,
}

impl MemoryState {
    fn document_count(&self) -> usize {
        self.stores.values().map(BTreeMap::len).sum()
    }

    fn store(&self, name: &str) -> Result<&BTreeMap<String, Document>> {
        self.stores
            .get(name)
            .ok_or_else(|| BridgeError::OperationFailed(format!("Unknown store: {}", name)))
    }

    fn store_mut(&mut self, name: &str) -> Result<&mut BTreeMap<String, Document>> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| BridgeError::OperationFailed(format!("Unknown store: {}", name)))
    }
}

/// In-memory implementation of [`StorageBackend`]
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    max_documents: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new documents once `max_documents` are stored across all stores.
    pub fn with_quota(max_documents: usize) -> Self {
        Self {
            state: Mutex::default(),
            max_documents: Some(max_documents),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let state = self
            .state
            .lock()
            .map_err(|_| BridgeError::OperationFailed("Memory backend lock poisoned".to_string()))?;
        if state.closed {
            return Err(BridgeError::NotAvailable("Memory backend is closed".to_string()));
        }
        Ok(state)
    }
}

/// Values of the index fields, or `None` when any of them is missing.
fn index_key<'a>(index: &IndexSpec, doc: &'a Document) -> Option<Vec<&'a serde_json::Value>> {
    index
        .fields
        .iter()
        .map(|field| doc.get(field).filter(|v| !v.is_null()))
        .collect()
}

fn same_key(a: &[&serde_json::Value], b: &[&serde_json::Value]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| compare_values(x, y) == Some(Ordering::Equal))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn ensure_schema(&self, schema: &StorageSchema) -> Result<()> {
        let mut state = self.lock()?;
        for spec in &schema.stores {
            state.stores.entry(spec.name.clone()).or_default();
            state.specs.insert(spec.name.clone(), spec.clone());
        }
        state.version = Some(schema.version);
        debug!(version = schema.version, "Memory backend schema ready");
        Ok(())
    }

    async fn schema_version(&self) -> Result<Option<u32>> {
        Ok(self.lock()?.version)
    }

    async fn put(&self, store: &str, key: &str, doc: &Document) -> Result<()> {
        let mut state = self.lock()?;
        let exists = state.store(store)?.contains_key(key);

        if let Some(max) = self.max_documents {
            if !exists && state.document_count() >= max {
                return Err(BridgeError::QuotaExceeded(format!(
                    "Memory backend holds the maximum of {} documents",
                    max
                )));
            }
        }

        if let Some(spec) = state.specs.get(store) {
            for index in spec.indices.iter().filter(|index| index.unique) {
                let Some(new_key) = index_key(index, doc) else {
                    continue;
                };
                let clash = state.store(store)?.iter().any(|(other_id, other)| {
                    other_id != key
                        && index_key(index, other).is_some_and(|k| same_key(&k, &new_key))
                });
                if clash {
                    return Err(BridgeError::ConstraintViolation(format!(
                        "Unique index {} on {} already holds this key",
                        index.name, store
                    )));
                }
            }
        }

        state.store_mut(store)?.insert(key.to_string(), doc.clone());
        Ok(())
    }

    async fn get(&self, store: &str, key: &str) -> Result<Option<Document>> {
        Ok(self.lock()?.store(store)?.get(key).cloned())
    }

    async fn delete(&self, store: &str, key: &str) -> Result<bool> {
        Ok(self.lock()?.store_mut(store)?.remove(key).is_some())
    }

    async fn query(&self, store: &str, query: &IndexQuery) -> Result<Vec<Document>> {
        let state = self.lock()?;
        let index = state
            .specs
            .get(store)
            .and_then(|spec| spec.find_index(&query.index))
            .ok_or_else(|| {
                BridgeError::OperationFailed(format!(
                    "Unknown index {} on store {}",
                    query.index, store
                ))
            })?;
        query.validate(index)?;

        Ok(state
            .store(store)?
            .values()
            .filter(|doc| query.matches(index, doc))
            .cloned()
            .collect())
    }

    async fn scan(&self, store: &str) -> Result<Vec<Document>> {
        Ok(self.lock()?.store(store)?.values().cloned().collect())
    }

    async fn clear(&self, store: &str) -> Result<()> {
        self.lock()?.store_mut(store)?.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BridgeError::OperationFailed("Memory backend lock poisoned".to_string()))?;
        state.closed = true;
        Ok(())
    }
}
