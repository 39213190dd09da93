use crate::error::StoreError;
use crate::models::{DeleteSelector, DistanceMetric, ScoredRecord, SearchFilter, VectorRecord};
use crate::store::VectorStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// In-process vector store with the same contract as the remote one,
/// including failure injection so retry and readiness paths can be
/// exercised deterministically in tests.
#[derive(Default)]
pub struct MemoryVectorStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    unready_reads: u32,
    failing_inserts: u32,
    poisoned_id: Option<String>,
}

struct Collection {
    dimension: usize,
    records: BTreeMap<String, VectorRecord>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` record reads report "not found" regardless of
    /// contents, simulating an eventually-consistent collection.
    pub fn unready_reads(&self, count: u32) {
        self.inner.lock().expect("memory store lock").unready_reads = count;
    }

    /// The next `count` insert calls fail, then inserts recover.
    pub fn fail_next_inserts(&self, count: u32) {
        self.inner.lock().expect("memory store lock").failing_inserts = count;
    }

    /// Any insert batch containing `id` fails permanently.
    pub fn poison_inserts_containing(&self, id: impl Into<String>) {
        self.inner.lock().expect("memory store lock").poisoned_id = Some(id.into());
    }

    pub fn record_count(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .expect("memory store lock")
            .collections
            .get(collection)
            .map(|c| c.records.len())
            .unwrap_or(0)
    }
}

fn matches_filter(payload: &Value, filter: &SearchFilter) -> bool {
    filter.equals.iter().all(|(key, expected)| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|actual| actual == expected)
    })
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        _metric: DistanceMetric,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        if inner.collections.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        inner.collections.insert(
            name.to_string(),
            Collection {
                dimension,
                records: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn get_record(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<VectorRecord>, StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        if inner.unready_reads > 0 {
            inner.unready_reads -= 1;
            return Ok(None);
        }
        Ok(inner
            .collections
            .get(collection)
            .and_then(|c| c.records.get(id))
            .cloned())
    }

    async fn insert_many(
        &self,
        collection: &str,
        records: &[VectorRecord],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");

        if inner.failing_inserts > 0 {
            inner.failing_inserts -= 1;
            return Err(StoreError::Request("injected transient insert failure".to_string()));
        }

        if let Some(poisoned) = &inner.poisoned_id {
            if records.iter().any(|record| &record.id == poisoned) {
                return Err(StoreError::Request(format!(
                    "injected failure for batch containing {poisoned}"
                )));
            }
        }

        let target = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::Request(format!("unknown collection: {collection}")))?;

        for record in records {
            if record.vector.len() != target.dimension {
                return Err(StoreError::Request(format!(
                    "vector dimension {} does not match collection dimension {}",
                    record.vector.len(),
                    target.dimension
                )));
            }
            target.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        let inner = self.inner.lock().expect("memory store lock");
        let target = inner
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::Request(format!("unknown collection: {collection}")))?;

        let mut hits: Vec<ScoredRecord> = target
            .records
            .values()
            .filter(|record| {
                filter
                    .filter(|f| !f.is_empty())
                    .map(|f| matches_filter(&record.payload, f))
                    .unwrap_or(true)
            })
            .map(|record| ScoredRecord {
                record: record.clone(),
                score: cosine_similarity(&record.vector, vector),
            })
            .collect();

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, selector: &DeleteSelector) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let target = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::Request(format!("unknown collection: {collection}")))?;

        match selector {
            DeleteSelector::Ids(ids) => {
                for id in ids {
                    target.records.remove(id);
                }
            }
            DeleteSelector::Filter(filter) => {
                target
                    .records
                    .retain(|_, record| !matches_filter(&record.payload, filter));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, vector: Vec<f32>, course: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            payload: json!({ "course_id": course, "content": id }),
        }
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_honors_filter() {
        let store = MemoryVectorStore::new();
        store
            .create_collection("c", 2, DistanceMetric::Cosine)
            .await
            .unwrap();
        store
            .insert_many(
                "c",
                &[
                    record("a", vec![1.0, 0.0], "ds101"),
                    record("b", vec![0.0, 1.0], "ds101"),
                    record("other", vec![1.0, 0.0], "cs202"),
                ],
            )
            .await
            .unwrap();

        let filter = SearchFilter::course("ds101");
        let hits = store
            .search("c", &[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn filter_delete_cascades_by_source() {
        let store = MemoryVectorStore::new();
        store
            .create_collection("c", 1, DistanceMetric::Cosine)
            .await
            .unwrap();
        let mut doomed = record("x", vec![1.0], "ds101");
        doomed.payload = json!({ "source_id": "hash1" });
        let mut kept = record("y", vec![1.0], "ds101");
        kept.payload = json!({ "source_id": "hash2" });
        store.insert_many("c", &[doomed, kept]).await.unwrap();

        store
            .delete("c", &DeleteSelector::Filter(SearchFilter::source("hash1")))
            .await
            .unwrap();

        assert_eq!(store.record_count("c"), 1);
        assert!(store.get_record("c", "y").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_create_reports_already_exists() {
        let store = MemoryVectorStore::new();
        store
            .create_collection("c", 4, DistanceMetric::Cosine)
            .await
            .unwrap();
        let error = store
            .create_collection("c", 4, DistanceMetric::Cosine)
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = MemoryVectorStore::new();
        store
            .create_collection("c", 3, DistanceMetric::Cosine)
            .await
            .unwrap();
        let error = store
            .insert_many("c", &[record("a", vec![1.0], "ds101")])
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::Request(_)));
    }
}
