pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod retry;
pub mod scanner;

#[cfg(test)]
mod fixtures;

pub use chunking::{chunk_unit, normalize_whitespace, split_windows, ChunkingConfig};
pub use config::{BackendKind, EmbeddingOptions, IndexConfig};
pub use embeddings::{
    BatchEmbedder, CharacterNgramEmbedder, EmbeddingBackend, HttpEmbeddingBackend,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, ExtractionError, IndexError, Result};
pub use extractor::{
    DocumentExtractor, ExtractorRegistry, OcrEndpointConfig, PdfExtractor, PlainTextExtractor,
    TextUnits,
};
pub use index::{build_index, Neighbor, VectorStore};
pub use models::{Chunk, DocumentKind, EmbeddingVector, SourceDocument, SourceLocator, TextUnit};
pub use persistence::{SaveMode, SaveOutcome, StoreSummary};
pub use pipeline::{IndexPipeline, PipelineOutcome, PipelineReport, SkippedDocument};
pub use retry::RetryPolicy;
pub use scanner::{available_space, check_free_space, scan_corpus, CorpusScan, DiskSpace};
