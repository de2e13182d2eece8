use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use super::{RecordStore, RepositoryError, Snapshot};

#[derive(Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<HashMap<String, Snapshot>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn load(&self, collection: &str) -> Result<Snapshot, RepositoryError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }

    async fn save(
        &self,
        collection: &str,
        records: Vec<Value>,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let mut collections = self.collections.write().await;
        let actual = collections.get(collection).map(|snapshot| snapshot.version).unwrap_or(0);
        if actual != expected_version {
            return Err(RepositoryError::Conflict {
                collection: collection.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let version = actual + 1;
        collections.insert(collection.to_string(), Snapshot { records, version });
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::repositories::{InMemoryRecordStore, RecordStore, RepositoryError};

    #[tokio::test]
    async fn unknown_collection_loads_empty_at_version_zero() {
        let store = InMemoryRecordStore::new();
        let snapshot = store.load("pipelines").await.expect("load");

        assert!(snapshot.records.is_empty());
        assert_eq!(snapshot.version, 0);
    }

    #[tokio::test]
    async fn save_replaces_records_and_bumps_version() {
        let store = InMemoryRecordStore::new();
        let first = store.save("pipelines", vec![json!({"id": "a"})], 0).await.expect("save");
        let second = store
            .save("pipelines", vec![json!({"id": "b"}), json!({"id": "c"})], first)
            .await
            .expect("save again");

        let snapshot = store.load("pipelines").await.expect("load");
        assert_eq!(second, 2);
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.records, vec![json!({"id": "b"}), json!({"id": "c"})]);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict_and_leaves_data_untouched() {
        let store = InMemoryRecordStore::new();
        store.save("pipelines", vec![json!({"id": "a"})], 0).await.expect("save");

        let error = store
            .save("pipelines", vec![], 0)
            .await
            .expect_err("stale writer should conflict");
        assert!(matches!(error, RepositoryError::Conflict { expected: 0, actual: 1, .. }));

        let snapshot = store.load("pipelines").await.expect("load");
        assert_eq!(snapshot.records.len(), 1);
    }

    #[tokio::test]
    async fn collections_are_versioned_independently() {
        let store = InMemoryRecordStore::new();
        store.save("pipelines", vec![], 0).await.expect("save pipelines");
        let version = store.save("purchases", vec![], 0).await.expect("save purchases");
        assert_eq!(version, 1);
    }
}
