use crate::error::EmbeddingError;
use crate::models::{Chunk, EmbeddingVector};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Hashes character trigrams into a fixed number of buckets; local and
/// deterministic, needs no model download.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
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
impl EmbeddingBackend for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "char-ngram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbeddingBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl HttpEmbeddingBackend {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingError::BackendStatus {
                backend: self.endpoint.clone(),
                status: status.as_u16(),
                details,
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

/// Splits chunks into batches, embeds them concurrently and reassembles the
/// vectors in chunk order.
#[derive(Clone)]
pub struct BatchEmbedder {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
}

impl BatchEmbedder {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        batch_size: usize,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub fn backend(&self) -> &Arc<dyn EmbeddingBackend> {
        &self.backend
    }

    pub fn dimensions(&self) -> usize {
        self.backend.dimensions()
    }

    pub async fn embed(&self, chunks: &[Chunk]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        let dimensions = self.backend.dimensions();
        let mut tasks = JoinSet::new();
        let mut batches = Vec::new();

        for (batch_index, batch) in chunks.chunks(self.batch_size).enumerate() {
            while tasks.len() >= self.concurrency {
                if let Some(joined) = tasks.join_next().await {
                    collect_batch(&mut tasks, &mut batches, joined)?;
                }
            }

            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let backend = Arc::clone(&self.backend);
            let retry = self.retry;

            tasks.spawn(async move {
                let vectors = retry.run(|| backend.embed_batch(&texts)).await?;
                check_batch(&texts, &vectors, dimensions)?;
                debug!(batch = batch_index, size = texts.len(), "embedded batch");
                Ok::<_, EmbeddingError>((batch_index, vectors))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            collect_batch(&mut tasks, &mut batches, joined)?;
        }

        batches.sort_by_key(|(batch_index, _)| *batch_index);
        let vectors: Vec<EmbeddingVector> = batches
            .into_iter()
            .flat_map(|(_, vectors)| vectors)
            .enumerate()
            .map(|(position, values)| EmbeddingVector { position, values })
            .collect();

        if vectors.len() != chunks.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: chunks.len(),
                actual: vectors.len(),
            });
        }

        Ok(vectors)
    }
}

type BatchResult = Result<(usize, Vec<Vec<f32>>), EmbeddingError>;

fn collect_batch(
    tasks: &mut JoinSet<BatchResult>,
    batches: &mut Vec<(usize, Vec<Vec<f32>>)>,
    joined: Result<BatchResult, JoinError>,
) -> Result<(), EmbeddingError> {
    match joined {
        Ok(Ok(batch)) => {
            batches.push(batch);
            Ok(())
        }
        Ok(Err(error)) => {
            tasks.abort_all();
            Err(error)
        }
        Err(join_error) if join_error.is_panic() => {
            std::panic::resume_unwind(join_error.into_panic())
        }
        Err(_) => Ok(()),
    }
}

fn check_batch(
    texts: &[String],
    vectors: &[Vec<f32>],
    dimensions: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != texts.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: texts.len(),
            actual: vectors.len(),
        });
    }
    if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimensions) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimensions,
            actual: vector.len(),
        });
    }
    Ok(())
}
