//! Native SQLite Storage Backend
//!
//! Implements [`StorageBackend`] on top of `sqlx` with the native SQLite
//! driver. Used on desktop and mobile targets.
//!
//! ## Layout
//!
//! - One table per store: `id TEXT PRIMARY KEY, doc TEXT` with the document
//!   kept as JSON text.
//! - One expression index per declared index over
//!   `json_extract(doc, '$.<field>')`, `UNIQUE` where the schema says so.
//! - The schema version lives in `PRAGMA user_version`.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::storage::{Document, IndexQuery, IndexSpec, StorageBackend, StorageSchema};
use serde_json::Value;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Pool, Row, Sqlite};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::db::{create_pool, DatabaseConfig};

/// SQLite result code for a full disk or exhausted quota
const SQLITE_FULL: &str = "13";
/// SQLITE_CONSTRAINT_UNIQUE / SQLITE_CONSTRAINT_PRIMARYKEY
const SQLITE_CONSTRAINT_CODES: [&str; 3] = ["2067", "1555", "19"];

/// Native SQLite implementation of [`StorageBackend`]
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    schema: RwLock<Option<StorageSchema>>,
}

enum SqlParam {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl SqliteBackend {
    /// Open a pool with `config` and wrap it.
    pub async fn new(config: DatabaseConfig) -> crate::Result<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            schema: RwLock::new(None),
        }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn index_spec(&self, store: &str, index: &str) -> Result<IndexSpec> {
        let schema = self
            .schema
            .read()
            .map_err(|_| BridgeError::OperationFailed("Schema lock poisoned".to_string()))?;

        schema
            .as_ref()
            .and_then(|schema| schema.find_store(store))
            .and_then(|spec| spec.find_index(index))
            .cloned()
            .ok_or_else(|| {
                BridgeError::OperationFailed(format!("Unknown index {} on store {}", index, store))
            })
    }

    fn bind_params<'q>(
        query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
        params: &'q [SqlParam],
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        let mut query = query;
        for param in params {
            query = match param {
                SqlParam::Text(s) => query.bind(s.as_str()),
                SqlParam::Integer(i) => query.bind(*i),
                SqlParam::Real(r) => query.bind(*r),
            };
        }
        query
    }

    fn decode_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Document>> {
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn ensure_schema(&self, schema: &StorageSchema) -> Result<()> {
        info!(version = schema.version, "Ensuring SQLite cache schema");

        for store in &schema.stores {
            check_identifier(&store.name)?;

            let create_table = format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (id TEXT PRIMARY KEY NOT NULL, doc TEXT NOT NULL)",
                store.name
            );
            sqlx::query(&create_table)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("Create table failed", e))?;

            for index in &store.indices {
                check_identifier(&index.name)?;
                let columns = index
                    .fields
                    .iter()
                    .map(|field| json_column(field))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ");

                let create_index = format!(
                    "CREATE {}INDEX IF NOT EXISTS \"idx_{}_{}\" ON \"{}\" ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    store.name,
                    index.name,
                    store.name,
                    columns
                );
                sqlx::query(&create_index)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("Create index failed", e))?;
            }

            debug!(store = %store.name, indices = store.indices.len(), "Store ready");
        }

        sqlx::query(&format!("PRAGMA user_version = {}", schema.version))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Set schema version failed", e))?;

        let mut current = self
            .schema
            .write()
            .map_err(|_| BridgeError::OperationFailed("Schema lock poisoned".to_string()))?;
        *current = Some(schema.clone());

        Ok(())
    }

    async fn schema_version(&self) -> Result<Option<u32>> {
        let row = sqlx::query("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Read schema version failed", e))?;

        let version: i64 = row
            .try_get(0)
            .map_err(|e| map_sqlx_error("Read schema version failed", e))?;

        Ok(match version {
            0 => None,
            v => u32::try_from(v).ok(),
        })
    }

    async fn put(&self, store: &str, key: &str, doc: &Document) -> Result<()> {
        check_identifier(store)?;
        let text = serde_json::to_string(doc)
            .map_err(|e| BridgeError::OperationFailed(format!("Encode document failed: {}", e)))?;

        sqlx::query(&format!(
            "INSERT INTO \"{}\" (id, doc) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET doc = excluded.doc",
            store
        ))
        .bind(key)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("Put failed", e))?;

        Ok(())
    }

    async fn get(&self, store: &str, key: &str) -> Result<Option<Document>> {
        check_identifier(store)?;

        let row = sqlx::query(&format!("SELECT doc FROM \"{}\" WHERE id = ?", store))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Get failed", e))?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn delete(&self, store: &str, key: &str) -> Result<bool> {
        check_identifier(store)?;

        let result = sqlx::query(&format!("DELETE FROM \"{}\" WHERE id = ?", store))
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Delete failed", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, store: &str, query: &IndexQuery) -> Result<Vec<Document>> {
        check_identifier(store)?;
        let index = self.index_spec(store, &query.index)?;
        query.validate(&index)?;

        let mut clauses = Vec::new();
        let mut params = Vec::new();

        for (field, value) in index.fields.iter().zip(&query.equals) {
            let column = json_column(field)?;
            match to_param(value)? {
                Some(param) => {
                    clauses.push(format!("{} = ?", column));
                    params.push(param);
                }
                None => clauses.push(format!("{} IS NULL", column)),
            }
        }

        if let Some(range) = &query.range {
            let column = index
                .fields
                .get(query.equals.len())
                .map(|field| json_column(field))
                .transpose()?
                .ok_or_else(|| BridgeError::OperationFailed("Range has no field".to_string()))?;

            if let Some(param) = range.lower.as_ref().map(to_param).transpose()?.flatten() {
                clauses.push(format!("{} >= ?", column));
                params.push(param);
            }
            if let Some(param) = range.upper.as_ref().map(to_param).transpose()?.flatten() {
                clauses.push(format!("{} <= ?", column));
                params.push(param);
            }
        }

        let mut sql = format!("SELECT doc FROM \"{}\"", store);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        debug!(store, index = %query.index, param_count = params.len(), "Executing index query");

        let rows = Self::bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Query failed", e))?;

        Self::decode_rows(rows)
    }

    async fn scan(&self, store: &str) -> Result<Vec<Document>> {
        check_identifier(store)?;

        let rows = sqlx::query(&format!("SELECT doc FROM \"{}\"", store))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Scan failed", e))?;

        Self::decode_rows(rows)
    }

    async fn clear(&self, store: &str) -> Result<()> {
        check_identifier(store)?;

        sqlx::query(&format!("DELETE FROM \"{}\"", store))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Clear failed", e))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing database connection pool");
        self.pool.close().await;
        Ok(())
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let text: String = row
        .try_get("doc")
        .map_err(|e| map_sqlx_error("Read document failed", e))?;
    serde_json::from_str(&text)
        .map_err(|e| BridgeError::OperationFailed(format!("Decode document failed: {}", e)))
}

fn json_column(field: &str) -> Result<String> {
    check_identifier(field)?;
    Ok(format!("json_extract(doc, '$.{}')", field))
}

/// Names are spliced into SQL, so only plain identifiers are allowed.
fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BridgeError::OperationFailed(format!(
            "Invalid store, index or field name: {:?}",
            name
        )))
    }
}

/// `json_extract` yields 1/0 for JSON booleans and NULL for JSON null.
fn to_param(value: &Value) -> Result<Option<SqlParam>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(SqlParam::Integer(i64::from(*b)))),
        Value::String(s) => Ok(Some(SqlParam::Text(s.clone()))),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(Some(SqlParam::Integer(i))),
            (None, Some(f)) => Ok(Some(SqlParam::Real(f))),
            (None, None) => Err(BridgeError::OperationFailed(format!(
                "Unsupported numeric key: {}",
                n
            ))),
        },
        Value::Array(_) | Value::Object(_) => Err(BridgeError::OperationFailed(
            "Index keys must be scalar values".to_string(),
        )),
    }
}

fn map_sqlx_error(context: &str, err: sqlx::Error) -> BridgeError {
    if let Some(db_err) = err.as_database_error() {
        let code = db_err.code();
        let code = code.as_deref();

        if code == Some(SQLITE_FULL) {
            warn!(error = %db_err, "SQLite storage is full");
            return BridgeError::QuotaExceeded(db_err.to_string());
        }

        if db_err.is_unique_violation() || code.is_some_and(|c| SQLITE_CONSTRAINT_CODES.contains(&c)) {
            return BridgeError::ConstraintViolation(db_err.to_string());
        }
    }

    BridgeError::DatabaseError(format!("{}: {}", context, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{index, local_schema, SCHEMA_VERSION};
    use bridge_traits::storage::KeyRange;
    use serde_json::json;

    async fn create_test_backend() -> SqliteBackend {
        let backend = SqliteBackend::new(DatabaseConfig::in_memory()).await.unwrap();
        backend
            .ensure_schema(&local_schema(SCHEMA_VERSION))
            .await
            .unwrap();
        backend
    }

    fn metric(id: &str, owner: &str, date: &str) -> Document {
        json!({ "id": id, "owner_id": owner, "date": date, "sync_status": "pending" })
    }

    #[tokio::test]
    async fn test_schema_version_is_recorded() {
        let backend = SqliteBackend::new(DatabaseConfig::in_memory()).await.unwrap();
        assert_eq!(backend.schema_version().await.unwrap(), None);

        backend.ensure_schema(&local_schema(SCHEMA_VERSION)).await.unwrap();
        backend.ensure_schema(&local_schema(SCHEMA_VERSION)).await.unwrap();
        assert_eq!(backend.schema_version().await.unwrap(), Some(SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = create_test_backend().await;
        let doc = metric("m1", "u1", "2024-03-15");

        backend.put("body_metrics", "m1", &doc).await.unwrap();
        assert_eq!(backend.get("body_metrics", "m1").await.unwrap(), Some(doc));

        assert!(backend.delete("body_metrics", "m1").await.unwrap());
        assert!(!backend.delete("body_metrics", "m1").await.unwrap());
        assert_eq!(backend.get("body_metrics", "m1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_query_with_date_range() {
        let backend = create_test_backend().await;
        for (id, owner, date) in [
            ("m1", "u1", "2024-02-28"),
            ("m2", "u1", "2024-03-01"),
            ("m3", "u1", "2024-03-31"),
            ("m4", "u2", "2024-03-15"),
        ] {
            backend
                .put("body_metrics", id, &metric(id, owner, date))
                .await
                .unwrap();
        }

        let query = IndexQuery::new(index::OWNER_DATE).eq("u1").range(KeyRange::inclusive(
            Some(json!("2024-03-01")),
            Some(json!("2024-03-31")),
        ));
        let mut ids: Vec<String> = backend
            .query("body_metrics", &query)
            .await
            .unwrap()
            .into_iter()
            .map(|doc| doc["id"].as_str().unwrap().to_string())
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_unique_index_is_enforced() {
        let backend = create_test_backend().await;
        backend
            .put("daily_metrics", "d1", &metric("d1", "u1", "2024-03-15"))
            .await
            .unwrap();

        let err = backend
            .put("daily_metrics", "d2", &metric("d2", "u1", "2024-03-15"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ConstraintViolation(_)));

        // Replacing the same key is not a violation
        backend
            .put("daily_metrics", "d1", &metric("d1", "u1", "2024-03-15"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_and_scan() {
        let backend = create_test_backend().await;
        backend
            .put("body_metrics", "m1", &metric("m1", "u1", "2024-03-15"))
            .await
            .unwrap();
        assert_eq!(backend.scan("body_metrics").await.unwrap().len(), 1);

        backend.clear("body_metrics").await.unwrap();
        assert!(backend.scan("body_metrics").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_names() {
        let backend = create_test_backend().await;
        let result = backend.scan("body_metrics; DROP TABLE profiles").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_index_is_an_error() {
        let backend = create_test_backend().await;
        let result = backend
            .query("body_metrics", &IndexQuery::new("weight").eq(80))
            .await;
        assert!(result.is_err());
    }
}
