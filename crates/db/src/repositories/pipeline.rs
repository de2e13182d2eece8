use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use dealflow_core::domain::node::PipelineNode;
use dealflow_core::domain::purchase::PurchaseRecord;
use dealflow_core::tree::{build_tree_with_depth, flatten_tree, PipelineTree, DEFAULT_MAX_DEPTH};

use super::{RecordStore, RepositoryError};

pub const PIPELINES_COLLECTION: &str = "pipelines";
pub const PURCHASES_COLLECTION: &str = "purchases";

/// Typed view over the record store. The whole pipeline forest, stages and items
/// included, lives in the `pipelines` collection, so a transition is persisted by
/// exactly one `save`.
pub struct PipelineRepository<S> {
    store: S,
    max_depth: usize,
}

impl<S> PipelineRepository<S>
where
    S: RecordStore,
{
    pub fn new(store: S) -> Self {
        Self::with_max_depth(store, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(store: S, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn load_nodes(&self) -> Result<(Vec<PipelineNode>, u64), RepositoryError> {
        let snapshot = self.store.load(PIPELINES_COLLECTION).await?;
        let mut nodes: Vec<PipelineNode> = decode_all(PIPELINES_COLLECTION, snapshot.records)?;
        for node in &mut nodes {
            node.normalize_stages()?;
        }
        Ok((nodes, snapshot.version))
    }

    pub async fn load_tree(&self) -> Result<(PipelineTree, u64), RepositoryError> {
        let (nodes, version) = self.load_nodes().await?;
        let tree = build_tree_with_depth(nodes, self.max_depth)?;
        Ok((tree, version))
    }

    pub async fn save_tree(
        &self,
        tree: &PipelineTree,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let records = encode_all(&flatten_tree(tree))?;
        self.store.save(PIPELINES_COLLECTION, records, expected_version).await
    }

    pub async fn load_purchases(&self) -> Result<(Vec<PurchaseRecord>, u64), RepositoryError> {
        let snapshot = self.store.load(PURCHASES_COLLECTION).await?;
        let purchases = decode_all(PURCHASES_COLLECTION, snapshot.records)?;
        Ok((purchases, snapshot.version))
    }

    pub async fn save_purchases(
        &self,
        purchases: &[PurchaseRecord],
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let records = encode_all(purchases)?;
        self.store.save(PURCHASES_COLLECTION, records, expected_version).await
    }
}

fn decode_all<T>(collection: &str, records: Vec<Value>) -> Result<Vec<T>, RepositoryError>
where
    T: DeserializeOwned,
{
    records
        .into_iter()
        .enumerate()
        .map(|(position, record)| {
            serde_json::from_value(record).map_err(|error| {
                RepositoryError::Decode(format!(
                    "record {position} in `{collection}` is malformed: {error}"
                ))
            })
        })
        .collect()
}

fn encode_all<T>(records: &[T]) -> Result<Vec<Value>, RepositoryError>
where
    T: Serialize,
{
    records
        .iter()
        .map(|record| {
            serde_json::to_value(record).map_err(|error| RepositoryError::Encode(error.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use dealflow_core::domain::node::{PipelineId, PipelineNode};
    use dealflow_core::domain::purchase::{PaymentStatus, PurchaseId, PurchaseRecord};
    use dealflow_core::domain::stage::StageName;
    use dealflow_core::errors::TreeError;
    use dealflow_core::tree::build_tree;

    use crate::repositories::{
        InMemoryRecordStore, PipelineRepository, RecordStore, RepositoryError,
        PIPELINES_COLLECTION,
    };

    fn node(id: &str, parent: Option<&str>) -> PipelineNode {
        PipelineNode::with_id(
            PipelineId(id.to_string()),
            format!("Pipeline {id}"),
            parent.map(|parent| PipelineId(parent.to_string())),
        )
    }

    #[tokio::test]
    async fn tree_round_trips_through_the_store() {
        let repository = PipelineRepository::new(InMemoryRecordStore::new());
        let tree = build_tree(vec![node("root", None), node("child", Some("root"))])
            .expect("build");

        let version = repository.save_tree(&tree, 0).await.expect("save");
        let (loaded, loaded_version) = repository.load_tree().await.expect("load");

        assert_eq!(loaded_version, version);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.children_of(&PipelineId("root".to_string())).len(), 1);
    }

    #[tokio::test]
    async fn stored_records_use_parent_id_key() {
        let store = InMemoryRecordStore::new();
        let repository = PipelineRepository::new(store);
        let tree = build_tree(vec![node("root", None), node("child", Some("root"))])
            .expect("build");
        repository.save_tree(&tree, 0).await.expect("save");

        let snapshot = repository.store().load(PIPELINES_COLLECTION).await.expect("raw load");
        assert_eq!(snapshot.records[1]["parentId"], json!("root"));
        assert_eq!(snapshot.records[0]["stages"].as_array().map(Vec::len), Some(8));
    }

    #[tokio::test]
    async fn legacy_records_missing_stages_are_normalized() {
        let store = InMemoryRecordStore::new();
        store
            .save(PIPELINES_COLLECTION, vec![json!({"id": "legacy", "name": "Legacy"})], 0)
            .await
            .expect("seed raw record");
        let repository = PipelineRepository::new(store);

        let (nodes, _) = repository.load_nodes().await.expect("load");
        assert_eq!(nodes[0].stages.len(), StageName::ALL.len());
    }

    #[tokio::test]
    async fn cyclic_storage_is_reported_as_tree_error() {
        let store = InMemoryRecordStore::new();
        store
            .save(
                PIPELINES_COLLECTION,
                vec![
                    json!({"id": "a", "name": "A", "parentId": "b"}),
                    json!({"id": "b", "name": "B", "parentId": "a"}),
                ],
                0,
            )
            .await
            .expect("seed raw records");
        let repository = PipelineRepository::new(store);

        let error = repository.load_tree().await.expect_err("cycle");
        assert!(matches!(error, RepositoryError::Tree(TreeError::Cycle(_))));
    }

    #[tokio::test]
    async fn malformed_records_are_decode_errors() {
        let store = InMemoryRecordStore::new();
        store
            .save(PIPELINES_COLLECTION, vec![json!({"name": "no id"})], 0)
            .await
            .expect("seed raw record");
        let repository = PipelineRepository::new(store);

        let error = repository.load_nodes().await.expect_err("missing id");
        assert!(matches!(error, RepositoryError::Decode(ref message) if message.contains("record 0")));
    }

    #[tokio::test]
    async fn purchases_round_trip() {
        let repository = PipelineRepository::new(InMemoryRecordStore::new());
        let purchases = vec![PurchaseRecord {
            id: PurchaseId("po-1".to_string()),
            vendor: "Acme Steel".to_string(),
            bill_number: Some("B-77".to_string()),
            total: Decimal::new(12_500, 0),
            payment_status: PaymentStatus::PartiallyPaid,
        }];

        repository.save_purchases(&purchases, 0).await.expect("save purchases");
        let (loaded, version) = repository.load_purchases().await.expect("load purchases");
        assert_eq!(loaded, purchases);
        assert_eq!(version, 1);
    }
}
