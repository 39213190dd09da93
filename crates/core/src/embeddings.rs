use crate::error::RetrievalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Order-preserving embedding provider. Implementations must map empty or
/// whitespace-only input to a zero vector without calling the provider, and
/// `embed_batch` output must align index-for-index with its input.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

pub fn zero_vector(dimensions: usize) -> Vec<f32> {
    vec![0.0; dimensions.max(1)]
}

/// Splits a batch into (original index, text) pairs worth embedding.
fn non_empty_entries(texts: &[String]) -> Vec<(usize, &str)> {
    texts
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(index, text)| (index, text.as_str()))
        .collect()
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        }
    }

    async fn request_embeddings(&self, inputs: Vec<&str>) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let payload = EmbeddingRequest {
            input: inputs,
            model: &self.model,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| RetrievalError::Embedding(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "provider returned {status}: {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| RetrievalError::Embedding(error.to_string()))?;

        // The provider reports an index per item; re-sort to input order.
        parsed.data.sort_by_key(|item| item.index);
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        if text.trim().is_empty() {
            return Ok(zero_vector(self.dimensions));
        }

        let mut vectors = self.request_embeddings(vec![text]).await?;
        vectors
            .pop()
            .ok_or_else(|| RetrievalError::Embedding("provider returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let entries = non_empty_entries(texts);
        let mut result = vec![zero_vector(self.dimensions); texts.len()];
        if entries.is_empty() {
            return Ok(result);
        }

        let inputs: Vec<&str> = entries.iter().map(|(_, text)| *text).collect();
        let vectors = self.request_embeddings(inputs).await?;
        if vectors.len() != entries.len() {
            return Err(RetrievalError::Embedding(format!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                entries.len()
            )));
        }

        for ((index, _), vector) in entries.into_iter().zip(vectors) {
            result[index] = vector;
        }
        Ok(result)
    }
}

/// Deterministic character-trigram hashing embedder. No network, stable
/// across runs; used for local development and tests.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimensions: 128 }
    }
}

impl HashEmbedder {
    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = zero_vector(self.dimensions);
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if text.trim().is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let first = embedder.embed("gradient descent and momentum").await.unwrap();
        let second = embedder.embed("gradient descent and momentum").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 128);
    }

    #[tokio::test]
    async fn batch_output_aligns_with_input() {
        let embedder = HashEmbedder { dimensions: 16 };
        let texts = vec![
            "first".to_string(),
            "   ".to_string(),
            "third".to_string(),
            String::new(),
        ];

        let vectors = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), texts.len());
        assert_eq!(vectors[1], zero_vector(16));
        assert_eq!(vectors[3], zero_vector(16));
        assert_ne!(vectors[0], zero_vector(16));
        assert_eq!(vectors[0], embedder.embed("first").await.unwrap());
        assert_eq!(vectors[2], embedder.embed("third").await.unwrap());
    }

    #[tokio::test]
    async fn whitespace_input_maps_to_zero_vector() {
        let embedder = HashEmbedder { dimensions: 8 };
        let vector = embedder.embed(" \t\n").await.unwrap();
        assert_eq!(vector, zero_vector(8));
    }

    #[test]
    fn empty_entries_are_filtered_with_positions() {
        let texts = vec!["a".to_string(), " ".to_string(), "b".to_string()];
        let entries = non_empty_entries(&texts);
        assert_eq!(entries, vec![(0, "a"), (2, "b")]);
    }
}
