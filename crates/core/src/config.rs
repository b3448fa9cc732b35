use crate::chunking::ChunkingConfig;
use crate::embeddings::{
    CharacterNgramEmbedder, EmbeddingBackend, HttpEmbeddingBackend, DEFAULT_BATCH_SIZE,
    DEFAULT_CONCURRENCY, DEFAULT_EMBEDDING_DIMENSIONS,
};
use crate::error::IndexError;
use crate::extractor::{ExtractorRegistry, OcrEndpointConfig, PdfExtractor, PlainTextExtractor};
use crate::persistence::SaveMode;
use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_DATA_PATH: &str = "data/";
pub const DEFAULT_OUTPUT_PATH: &str = "vector_store/db";
pub const DEFAULT_MIN_FREE_DISK_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Local character n-gram hashing.
    Ngram,
    /// OpenAI-compatible HTTP endpoint.
    Http,
}

#[derive(Debug, Clone)]
pub struct EmbeddingOptions {
    pub backend: BackendKind,
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Ngram,
            endpoint: None,
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for one indexing run. Built once at startup and shared
/// read-only by every stage.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub data_path: PathBuf,
    pub output_path: PathBuf,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingOptions,
    pub retry: RetryPolicy,
    pub force: bool,
    pub include_plain_text: bool,
    pub min_free_disk_bytes: u64,
    pub ocr: Option<OcrEndpointConfig>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingOptions::default(),
            retry: RetryPolicy::default(),
            force: false,
            include_plain_text: false,
            min_free_disk_bytes: DEFAULT_MIN_FREE_DISK_BYTES,
            ocr: None,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), IndexError> {
        self.chunking.validate()?;

        if self.data_path.as_os_str().is_empty() {
            return Err(IndexError::Configuration("data path is empty".to_string()));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(IndexError::Configuration("output path is empty".to_string()));
        }
        if self.output_path.file_name().is_none() {
            return Err(IndexError::Configuration(format!(
                "output path {} must name a directory",
                self.output_path.display()
            )));
        }
        if self.data_path.components().eq(self.output_path.components()) {
            return Err(IndexError::Configuration(
                "data path and output path must differ".to_string(),
            ));
        }

        let embedding = &self.embedding;
        if embedding.dimensions == 0 {
            return Err(IndexError::Configuration(
                "embedding dimensions must be greater than 0".to_string(),
            ));
        }
        if embedding.batch_size == 0 || embedding.concurrency == 0 {
            return Err(IndexError::Configuration(
                "embedding batch size and concurrency must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(IndexError::Configuration(
                "retry attempts must be greater than 0".to_string(),
            ));
        }
        if embedding.backend == BackendKind::Http {
            let endpoint = embedding.endpoint.as_deref().ok_or_else(missing_endpoint)?;
            validate_http_url(endpoint, "embedding endpoint")?;
            if embedding.model.trim().is_empty() {
                return Err(IndexError::Configuration(
                    "the http backend needs a model name".to_string(),
                ));
            }
        }
        if let Some(ocr) = &self.ocr {
            validate_http_url(&ocr.endpoint, "OCR endpoint")?;
        }

        Ok(())
    }

    pub fn save_mode(&self) -> SaveMode {
        if self.force {
            SaveMode::Force
        } else {
            SaveMode::SkipIfExists
        }
    }

    pub fn extractor_registry(&self) -> ExtractorRegistry {
        let mut registry = ExtractorRegistry::new();
        match &self.ocr {
            Some(ocr) => registry.register(PdfExtractor::with_ocr_fallback(ocr.clone())),
            None => registry.register(PdfExtractor::new()),
        }
        if self.include_plain_text {
            registry.register(PlainTextExtractor);
        }
        registry
    }

    pub fn embedding_backend(&self) -> Result<Arc<dyn EmbeddingBackend>, IndexError> {
        let options = &self.embedding;
        match options.backend {
            BackendKind::Ngram => Ok(Arc::new(CharacterNgramEmbedder {
                dimensions: options.dimensions,
            })),
            BackendKind::Http => {
                let endpoint = options.endpoint.as_deref().ok_or_else(missing_endpoint)?;
                let backend = HttpEmbeddingBackend::new(
                    endpoint,
                    options.model.clone(),
                    options.api_key.clone(),
                    options.dimensions,
                    options.timeout,
                )?;
                Ok(Arc::new(backend))
            }
        }
    }
}

fn missing_endpoint() -> IndexError {
    IndexError::Configuration("the http backend needs an embedding endpoint".to_string())
}

fn validate_http_url(raw: &str, what: &str) -> Result<(), IndexError> {
    let parsed = Url::parse(raw)
        .map_err(|error| IndexError::Configuration(format!("invalid {what} {raw}: {error}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(IndexError::Configuration(format!(
            "{what} must use http or https, got {scheme}"
        ))),
    }
}
