use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use dealflow_core::errors::{ApplicationError, TreeError};

pub mod memory;
pub mod pipeline;
pub mod record;

pub use memory::InMemoryRecordStore;
pub use pipeline::{PipelineRepository, PIPELINES_COLLECTION, PURCHASES_COLLECTION};
pub use record::SqlRecordStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error(
        "collection `{collection}` is at version {actual}, save expected version {expected}"
    )]
    Conflict { collection: String, expected: u64, actual: u64 },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { collection, expected, actual } => {
                Self::Consistency { collection, expected, actual }
            }
            RepositoryError::Tree(error) => Self::from(error),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Everything stored under one collection name, plus the version it was read at.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub records: Vec<Value>,
    pub version: u64,
}

/// Whole-collection persistence. There is no partial update: `save` replaces
/// every record under the name, and only if nobody saved since `expected_version`.
/// A collection that was never written reads back empty at version 0.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self, collection: &str) -> Result<Snapshot, RepositoryError>;

    /// Returns the new version on success.
    async fn save(
        &self,
        collection: &str,
        records: Vec<Value>,
        expected_version: u64,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    async fn load(&self, collection: &str) -> Result<Snapshot, RepositoryError> {
        (**self).load(collection).await
    }

    async fn save(
        &self,
        collection: &str,
        records: Vec<Value>,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        (**self).save(collection, records, expected_version).await
    }
}
