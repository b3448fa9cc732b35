use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no input documents: {0}")]
    NoInput(String),

    #[error("embedding backend error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("corrupt vector store at {}: {details}", .location.display())]
    CorruptStore { location: PathBuf, details: String },

    #[error("vector/metadata misalignment: {0}")]
    Alignment(String),

    #[error("no chunks produced from {0}")]
    EmptyCorpus(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl IndexError {
    pub(crate) fn corrupt(location: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Self::CorruptStore {
            location: location.into(),
            details: details.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to extract {}: {cause}", .document.display())]
pub struct ExtractionError {
    pub document: PathBuf,
    pub cause: String,
}

impl ExtractionError {
    pub fn new(document: impl Into<PathBuf>, cause: impl ToString) -> Self {
        Self {
            document: document.into(),
            cause: cause.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend {backend} returned {status}: {details}")]
    BackendStatus {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("backend returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<EmbeddingError>,
    },
}

impl EmbeddingError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(error) => {
                error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
            }
            Self::BackendStatus { status, .. } => *status == 429 || *status >= 500,
            Self::CountMismatch { .. }
            | Self::DimensionMismatch { .. }
            | Self::Exhausted { .. } => false,
        }
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
