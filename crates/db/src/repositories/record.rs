use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use super::{RecordStore, RepositoryError, Snapshot};
use crate::DbPool;

pub struct SqlRecordStore {
    pool: DbPool,
}

impl SqlRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn current_version(&self, collection: &str) -> Result<u64, RepositoryError> {
        let version = sqlx::query_scalar::<_, i64>(
            "SELECT version FROM record_collection WHERE name = ?",
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        match version {
            Some(value) => parse_version(collection, value),
            None => Ok(0),
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for SqlRecordStore {
    async fn load(&self, collection: &str) -> Result<Snapshot, RepositoryError> {
        let row = sqlx::query(
            "SELECT version, records_json
             FROM record_collection
             WHERE name = ?",
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(Snapshot::default());
        };

        let version = parse_version(collection, row.try_get("version")?)?;
        let raw = row.try_get::<String, _>("records_json")?;
        let records = serde_json::from_str::<Vec<Value>>(&raw).map_err(|error| {
            RepositoryError::Decode(format!(
                "collection `{collection}` does not hold a JSON array: {error}"
            ))
        })?;

        Ok(Snapshot { records, version })
    }

    async fn save(
        &self,
        collection: &str,
        records: Vec<Value>,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let records_json = serde_json::to_string(&records)
            .map_err(|error| RepositoryError::Encode(error.to_string()))?;
        let expected = to_column(collection, expected_version)?;
        let next = expected + 1;
        let updated_at = Utc::now().to_rfc3339();

        // Version check and write happen in one statement.
        let result = if expected == 0 {
            sqlx::query(
                "INSERT INTO record_collection (name, version, records_json, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(name) DO UPDATE SET
                    version = excluded.version,
                    records_json = excluded.records_json,
                    updated_at = excluded.updated_at
                 WHERE record_collection.version = 0",
            )
            .bind(collection)
            .bind(next)
            .bind(&records_json)
            .bind(&updated_at)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE record_collection
                 SET version = ?, records_json = ?, updated_at = ?
                 WHERE name = ? AND version = ?",
            )
            .bind(next)
            .bind(&records_json)
            .bind(&updated_at)
            .bind(collection)
            .bind(expected)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let actual = self.current_version(collection).await?;
            return Err(RepositoryError::Conflict {
                collection: collection.to_string(),
                expected: expected_version,
                actual,
            });
        }

        Ok(expected_version + 1)
    }
}

fn parse_version(collection: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid version for collection `{collection}` (expected non-negative): {value}"
        ))
    })
}

fn to_column(collection: &str, version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version).map_err(|_| {
        RepositoryError::Encode(format!("version {version} for `{collection}` exceeds i64"))
    })
}
