use crate::error::StoreError;
use crate::models::{
    DeleteSelector, DistanceMetric, ScoredRecord, SearchFilter, VectorRecord,
};
use crate::store::VectorStore;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_INSERT_BATCH_SIZE: usize = 20;

/// Bounded retry with attempt-scaled backoff. Attempt `n` waits
/// `base_delay * n` before retrying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Wraps a [`VectorStore`] with the operational behavior the remote
/// backend needs: collection readiness probing, batched inserts that
/// survive partial failure, and bounded retries on reads and deletes.
pub struct IndexStoreManager<S> {
    store: S,
    retry: RetryPolicy,
    batch_size: usize,
}

impl<S: VectorStore> IndexStoreManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates the collection or attaches to an existing one, then
    /// verifies it actually serves writes: insert a throwaway record,
    /// read it back, delete it. Remote collections are eventually
    /// consistent, so an unreadable probe retries the whole cycle.
    pub async fn get_or_create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), StoreError> {
        match self.store.create_collection(name, dimension, metric).await {
            Ok(()) => info!(collection = name, dimension, "created collection"),
            Err(StoreError::AlreadyExists(_)) => {
                debug!(collection = name, "collection exists, attaching")
            }
            Err(error) => return Err(error),
        }

        let mut last_error = String::from("probe record never became readable");
        for attempt in 1..=self.retry.max_attempts {
            tokio::time::sleep(self.retry.delay_for(attempt)).await;

            let probe = VectorRecord {
                id: Uuid::new_v4().to_string(),
                vector: vec![1.0; dimension],
                payload: json!({ "probe": true }),
            };

            if let Err(error) = self.store.insert_many(name, &[probe.clone()]).await {
                warn!(collection = name, attempt, %error, "probe insert failed");
                last_error = error.to_string();
                continue;
            }

            match self.store.get_record(name, &probe.id).await {
                Ok(Some(_)) => {
                    // Cleanup is best-effort; a stray probe point is harmless.
                    if let Err(error) = self
                        .store
                        .delete(name, &DeleteSelector::Ids(vec![probe.id.clone()]))
                        .await
                    {
                        warn!(collection = name, %error, "probe cleanup failed");
                    }
                    info!(collection = name, attempt, "collection verified ready");
                    return Ok(());
                }
                Ok(None) => {
                    warn!(collection = name, attempt, "probe record not yet readable");
                }
                Err(error) => {
                    warn!(collection = name, attempt, %error, "probe read failed");
                    last_error = error.to_string();
                }
            }
        }

        Err(StoreError::NotReady {
            collection: name.to_string(),
            attempts: self.retry.max_attempts,
            last_error,
        })
    }

    /// Inserts records in fixed-size batches. Each batch is retried up
    /// to the policy ceiling; a batch that still fails is skipped and
    /// logged rather than failing the whole call. Returns the ids that
    /// were actually confirmed.
    pub async fn insert(
        &self,
        collection: &str,
        records: &[VectorRecord],
    ) -> Result<Vec<String>, StoreError> {
        let mut confirmed = Vec::with_capacity(records.len());

        for batch in records.chunks(self.batch_size) {
            let mut stored = false;
            for attempt in 1..=self.retry.max_attempts {
                match self.store.insert_many(collection, batch).await {
                    Ok(()) => {
                        stored = true;
                        break;
                    }
                    Err(error) => {
                        warn!(
                            collection,
                            attempt,
                            batch_len = batch.len(),
                            %error,
                            "insert batch failed"
                        );
                        if attempt < self.retry.max_attempts {
                            tokio::time::sleep(self.retry.delay_for(attempt)).await;
                        }
                    }
                }
            }

            if stored {
                confirmed.extend(batch.iter().map(|record| record.id.clone()));
            } else {
                warn!(
                    collection,
                    batch_len = batch.len(),
                    "skipping batch after exhausting retries"
                );
            }
        }

        Ok(confirmed)
    }

    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            match self.store.search(collection, vector, limit, filter).await {
                Ok(hits) => return Ok(hits),
                Err(error) => {
                    warn!(collection, attempt, %error, "search failed");
                    last_error = error.to_string();
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        Err(StoreError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }

    pub async fn delete(
        &self,
        collection: &str,
        selector: &DeleteSelector,
    ) -> Result<(), StoreError> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            match self.store.delete(collection, selector).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(collection, attempt, %error, "delete failed");
                    last_error = error.to_string();
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        Err(StoreError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }
}
