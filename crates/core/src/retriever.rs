use crate::embeddings::Embedder;
use crate::error::{RetrievalError, StoreError};
use crate::extractor::vectorization_text;
use crate::index::IndexStoreManager;
use crate::models::{
    Chunk, ChunkMetadata, DeleteSelector, DistanceMetric, RetrievedChunk, SearchFilter,
    VectorRecord,
};
use crate::store::VectorStore;
use serde_json::Value;
use tracing::debug;

/// Query-time façade: embeds text, searches the collection, and maps
/// store payloads back into chunks.
pub struct Retriever<S, E> {
    manager: IndexStoreManager<S>,
    embedder: E,
    collection: String,
}

impl<S: VectorStore, E: Embedder> Retriever<S, E> {
    pub fn new(manager: IndexStoreManager<S>, embedder: E, collection: impl Into<String>) -> Self {
        Self {
            manager,
            embedder,
            collection: collection.into(),
        }
    }

    pub fn manager(&self) -> &IndexStoreManager<S> {
        &self.manager
    }

    /// Creates or attaches to the backing collection and waits until it
    /// verifiably serves reads and writes.
    pub async fn ensure_collection(&self, dimension: usize) -> Result<(), RetrievalError> {
        self.manager
            .get_or_create_collection(&self.collection, dimension, DistanceMetric::Cosine)
            .await?;
        Ok(())
    }

    /// Nearest-neighbor retrieval, optionally restricted to one course.
    /// Results come back in the store's descending-score order.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        course_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }

        let vector = self.embedder.embed(query).await?;
        let filter = course_id.map(SearchFilter::course);

        let hits = self
            .manager
            .search(&self.collection, &vector, top_k, filter.as_ref())
            .await?;
        debug!(collection = %self.collection, hits = hits.len(), "retrieval complete");

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                payload_to_chunk(hit.record.id, hit.record.payload).map(|chunk| RetrievedChunk {
                    chunk,
                    score: hit.score,
                })
            })
            .collect())
    }

    /// Embeds each chunk's provenance-tagged text and stores the batch.
    /// Returns the ids the store actually confirmed, which may be a
    /// subset when a whole insert batch had to be skipped.
    pub async fn add_chunks(&self, chunks: &[Chunk]) -> Result<Vec<String>, RetrievalError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(vectorization_text).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let records = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                Ok(VectorRecord {
                    id: chunk.id.clone(),
                    vector,
                    payload: chunk_payload(chunk)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(self.manager.insert(&self.collection, &records).await?)
    }

    pub async fn delete_chunks(&self, ids: Vec<String>) -> Result<(), RetrievalError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.manager
            .delete(&self.collection, &DeleteSelector::Ids(ids))
            .await?;
        Ok(())
    }

    /// Removes every chunk derived from one uploaded artifact.
    pub async fn delete_material(&self, source_id: &str) -> Result<(), RetrievalError> {
        self.manager
            .delete(
                &self.collection,
                &DeleteSelector::Filter(SearchFilter::source(source_id)),
            )
            .await?;
        Ok(())
    }
}

/// Flattens a chunk into the payload document stored next to its vector.
/// Metadata fields sit at the top level so equality filters can address
/// them directly.
fn chunk_payload(chunk: &Chunk) -> Result<Value, StoreError> {
    let mut payload = serde_json::to_value(&chunk.metadata)?;
    payload["content"] = Value::String(chunk.content.clone());
    Ok(payload)
}

fn payload_to_chunk(id: String, mut payload: Value) -> Option<Chunk> {
    let content = match payload.as_object_mut()?.remove("content") {
        Some(Value::String(content)) => content,
        _ => return None,
    };
    let metadata: ChunkMetadata = serde_json::from_value(payload).ok()?;
    Some(Chunk {
        id,
        content,
        metadata,
    })
}
