use crate::error::StoreError;
use crate::models::{DeleteSelector, DistanceMetric, ScoredRecord, SearchFilter, VectorRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// Logical surface of the remote vector database. One collection holds
/// fixed-dimension vectors plus JSON payloads; search is nearest-neighbor
/// with optional equality filtering.
///
/// Implementations report `StoreError::AlreadyExists` from
/// `create_collection` when the name is taken so callers can attach instead.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), StoreError>;

    async fn get_record(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<VectorRecord>, StoreError>;

    async fn insert_many(
        &self,
        collection: &str,
        records: &[VectorRecord],
    ) -> Result<(), StoreError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredRecord>, StoreError>;

    async fn delete(&self, collection: &str, selector: &DeleteSelector) -> Result<(), StoreError>;
}

/// Lets independent managers share one backend, which is how concurrent
/// ingestion jobs attach to the same collection.
#[async_trait]
impl<S: VectorStore + ?Sized> VectorStore for Arc<S> {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), StoreError> {
        (**self).create_collection(name, dimension, metric).await
    }

    async fn get_record(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<VectorRecord>, StoreError> {
        (**self).get_record(collection, id).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        records: &[VectorRecord],
    ) -> Result<(), StoreError> {
        (**self).insert_many(collection, records).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        (**self).search(collection, vector, limit, filter).await
    }

    async fn delete(&self, collection: &str, selector: &DeleteSelector) -> Result<(), StoreError> {
        (**self).delete(collection, selector).await
    }
}
