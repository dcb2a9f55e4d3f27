//! Sentence embeddings behind a narrow async trait.
//!
//! The rest of the crate only sees [`Embedder`]; the concrete client talks to
//! the OpenAI embeddings endpoint. Unit tests use `mockall`'s generated
//! `MockEmbedder` instead of the network.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Errors from the embedding backend. Callers are expected to degrade to a
/// zero vector ("no semantic signal") rather than abort.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding backend returned no data")]
    EmptyResponse,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait Embedder: Send + Sync {
    /// Embeds a single text into a vector of [`Embedder::dimension`] floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// The fixed dimension every vector produced by this embedder has.
    fn dimension(&self) -> usize;
}

// --- OpenAI implementation ---

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, dimension: usize) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "dimensions": self.dimension,
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<EmbeddingResponse>()
            .await?;

        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbeddingError::EmptyResponse)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// --- Vector helpers ---

/// An all-zero vector of the given dimension, the "no semantic signal" value.
pub fn zero_vector(dimension: usize) -> Vec<f32> {
    vec![0.0; dimension]
}

/// True if the vector carries no signal (zero norm or empty).
pub fn is_zero(vector: &[f32]) -> bool {
    vector.iter().all(|x| *x == 0.0)
}

/// L2-normalises a vector in place. The zero vector is left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two unit vectors, i.e. their dot product.
/// Mismatched dimensions contribute nothing beyond the shared prefix.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
