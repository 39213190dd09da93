use crate::error::StoreError;
use crate::models::{DeleteSelector, DistanceMetric, ScoredRecord, SearchFilter, VectorRecord};
use crate::store::VectorStore;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Vector store speaking the Qdrant-style REST API over HTTP.
pub struct HttpVectorStore {
    endpoint: String,
    client: Client,
}

impl HttpVectorStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{collection}", self.endpoint)
    }

    fn filter_json(filter: &SearchFilter) -> Value {
        let must: Vec<Value> = filter
            .equals
            .iter()
            .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
            .collect();
        json!({ "must": must })
    }

    fn backend_error(details: impl Into<String>) -> StoreError {
        StoreError::BackendResponse {
            backend: "vector-store".to_string(),
            details: details.into(),
        }
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.collection_url(name))
            .json(&json!({
                "vectors": { "size": dimension, "distance": metric.as_str() }
            }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(StoreError::AlreadyExists(name.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                // Some server builds answer a duplicate create with 400 and
                // an "already exists" message rather than 409.
                if body.contains("already exists") {
                    Err(StoreError::AlreadyExists(name.to_string()))
                } else {
                    Err(Self::backend_error(format!("create returned {status}: {body}")))
                }
            }
        }
    }

    async fn get_record(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<VectorRecord>, StoreError> {
        let response = self
            .client
            .post(format!("{}/points", self.collection_url(collection)))
            .json(&json!({
                "ids": [id],
                "with_payload": true,
                "with_vector": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::backend_error(format!(
                "point lookup returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let point = match parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .and_then(|points| points.first())
        {
            Some(point) => point.clone(),
            None => return Ok(None),
        };

        let vector = point
            .pointer("/vector")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|v| v as f32)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(VectorRecord {
            id: point_id(&point),
            vector,
            payload: point.pointer("/payload").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn insert_many(
        &self,
        collection: &str,
        records: &[VectorRecord],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let points: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "vector": record.vector,
                    "payload": record.payload,
                })
            })
            .collect();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(collection)))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::backend_error(format!("insert returned {status}: {body}")));
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
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = Self::filter_json(filter);
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url(collection)))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(format!(
                "search returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .into_iter()
            .map(|hit| {
                let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                ScoredRecord {
                    record: VectorRecord {
                        id: point_id(&hit),
                        vector: Vec::new(),
                        payload: hit.pointer("/payload").cloned().unwrap_or(Value::Null),
                    },
                    score,
                }
            })
            .collect())
    }

    async fn delete(&self, collection: &str, selector: &DeleteSelector) -> Result<(), StoreError> {
        let body = match selector {
            DeleteSelector::Ids(ids) => json!({ "points": ids }),
            DeleteSelector::Filter(filter) => json!({ "filter": Self::filter_json(filter) }),
        };

        let response = self
            .client
            .post(format!(
                "{}/points/delete?wait=true",
                self.collection_url(collection)
            ))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(format!(
                "delete returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn point_id(point: &Value) -> String {
    match point.pointer("/id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn equality_filter_maps_to_match_clauses() {
        let mut equals = BTreeMap::new();
        equals.insert("course_id".to_string(), "ds101".to_string());
        let filter = SearchFilter { equals };

        let rendered = HttpVectorStore::filter_json(&filter);
        assert_eq!(
            rendered,
            json!({ "must": [{ "key": "course_id", "match": { "value": "ds101" } }] })
        );
    }

    #[test]
    fn point_ids_accept_string_and_number_forms() {
        assert_eq!(point_id(&json!({ "id": "abc" })), "abc");
        assert_eq!(point_id(&json!({ "id": 7 })), "7");
        assert_eq!(point_id(&json!({})), "");
    }
}
