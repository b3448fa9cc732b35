use crate::chunking::{chunk_unit, ChunkingConfig};
use crate::config::IndexConfig;
use crate::embeddings::{BatchEmbedder, EmbeddingBackend};
use crate::error::{ExtractionError, IndexError};
use crate::extractor::ExtractorRegistry;
use crate::index::{build_index, VectorStore};
use crate::models::{Chunk, SourceDocument};
use crate::persistence::{self, SaveMode, SaveOutcome, StoreSummary};
use crate::scanner::{check_free_space, scan_corpus, CorpusScan};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Built(StoreSummary),
    AlreadyPresent(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    pub documents: usize,
    pub skipped: Vec<SkippedDocument>,
    pub chunk_count: usize,
    pub elapsed: Duration,
}

/// Scan, extract, chunk, embed, build and persist in a single pass.
pub struct IndexPipeline {
    config: IndexConfig,
    registry: Arc<ExtractorRegistry>,
    embedder: BatchEmbedder,
}

impl IndexPipeline {
    pub fn new(
        config: IndexConfig,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self, IndexError> {
        config.validate()?;
        if backend.dimensions() == 0 {
            return Err(IndexError::Configuration(format!(
                "embedding backend {} reports zero dimensions",
                backend.name()
            )));
        }

        let registry = Arc::new(config.extractor_registry());
        let embedder = BatchEmbedder::new(
            backend,
            config.embedding.batch_size,
            config.embedding.concurrency,
            config.retry,
        );
        Ok(Self {
            config,
            registry,
            embedder,
        })
    }

    pub fn from_config(config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;
        let backend = config.embedding_backend()?;
        Self::new(config, backend)
    }

    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub async fn run(&self) -> Result<PipelineReport, IndexError> {
        let started = Instant::now();
        let output = &self.config.output_path;
        let mode = self.config.save_mode();

        if mode == SaveMode::SkipIfExists && persistence::exists(output) {
            warn!(
                location = %output.display(),
                "vector store already exists; use --force to regenerate"
            );
            return Ok(PipelineReport {
                outcome: PipelineOutcome::AlreadyPresent(output.clone()),
                documents: 0,
                skipped: Vec::new(),
                chunk_count: 0,
                elapsed: started.elapsed(),
            });
        }

        let scan = scan_corpus(&self.config.data_path, &self.registry)?;
        check_free_space(output, self.config.min_free_disk_bytes);
        info!(
            "Processing {} files ({:.1} MB total), estimated {} minutes",
            scan.documents.len(),
            scan.total_megabytes(),
            scan.estimated_minutes()
        );
        info!(
            output = %output.display(),
            embedder = self.embedder.backend().name(),
            "building vector store"
        );

        let (chunks, skipped) = self.extract_chunks(&scan).await?;
        if chunks.is_empty() {
            return Err(IndexError::EmptyCorpus(format!(
                "{} ({} of {} documents unreadable)",
                scan.root.display(),
                skipped.len(),
                scan.documents.len()
            )));
        }
        let chunk_count = chunks.len();
        info!(chunk_count, skipped = skipped.len(), "chunked documents");

        let vectors = self.embedder.embed(&chunks).await?;
        let store = build_index(self.embedder.dimensions(), vectors, chunks)?;

        let outcome = tokio::task::block_in_place(|| commit(&store, output, mode))?;

        Ok(PipelineReport {
            outcome,
            documents: scan.documents.len(),
            skipped,
            chunk_count,
            elapsed: started.elapsed(),
        })
    }

    /// Extracts and chunks documents on the blocking pool. A failing document
    /// is logged and skipped; chunk order follows scan order.
    async fn extract_chunks(
        &self,
        scan: &CorpusScan,
    ) -> Result<(Vec<Chunk>, Vec<SkippedDocument>), IndexError> {
        let workers = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(4);
        let mut tasks = JoinSet::new();
        let mut finished = Vec::with_capacity(scan.documents.len());

        for (index, document) in scan.documents.iter().cloned().enumerate() {
            while tasks.len() >= workers {
                if let Some(joined) = tasks.join_next().await {
                    finished.push(joined.map_err(|error| IndexError::Task(error.to_string()))?);
                }
            }

            let registry = Arc::clone(&self.registry);
            let chunking = self.config.chunking;
            tasks.spawn_blocking(move || {
                let result = chunk_document(&registry, &document, chunking);
                (index, document.path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            finished.push(joined.map_err(|error| IndexError::Task(error.to_string()))?);
        }
        finished.sort_by_key(|(index, _, _)| *index);

        let mut chunks = Vec::new();
        let mut skipped = Vec::new();
        for (_, path, result) in finished {
            match result {
                Ok(document_chunks) => chunks.extend(document_chunks),
                Err(error) => {
                    warn!(path = %path.display(), cause = %error.cause, "skipping document");
                    skipped.push(SkippedDocument {
                        path,
                        reason: error.cause,
                    });
                }
            }
        }

        Ok((chunks, skipped))
    }
}

/// Saves `store` and re-opens what landed at `output`. Blocks on fsync and a
/// full checksum pass.
fn commit(
    store: &VectorStore,
    output: &Path,
    mode: SaveMode,
) -> Result<PipelineOutcome, IndexError> {
    match persistence::save(store, output, mode)? {
        SaveOutcome::AlreadyPresent(location) => Ok(PipelineOutcome::AlreadyPresent(location)),
        SaveOutcome::Written(_) => {
            let summary = persistence::verify(output)?;
            if summary.vector_count != store.len() {
                return Err(IndexError::corrupt(
                    output,
                    format!(
                        "reopened store has {} vectors, built {}",
                        summary.vector_count,
                        store.len()
                    ),
                ));
            }
            info!(
                "Vector index size: {:.1} MB, metadata size: {:.1} MB",
                megabytes(summary.vector_bytes),
                megabytes(summary.metadata_bytes)
            );
            Ok(PipelineOutcome::Built(summary))
        }
    }
}

fn chunk_document(
    registry: &ExtractorRegistry,
    document: &SourceDocument,
    chunking: ChunkingConfig,
) -> Result<Vec<Chunk>, ExtractionError> {
    let mut chunks = Vec::new();
    let mut units = 0usize;

    for unit in registry.extract(document)? {
        let unit = unit?;
        units += 1;
        chunks.extend(chunk_unit(&unit, chunking));
    }

    if chunks.is_empty() {
        return Err(ExtractionError::new(&document.path, "no readable text"));
    }

    debug!(path = %document.path.display(), units, chunks = chunks.len(), "chunked document");
    Ok(chunks)
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbeddingError;
    use crate::extractor::{DocumentExtractor, OcrEndpointConfig, PdfExtractor, PlainTextExtractor};
    use crate::fixtures::{serve, write_pdf};
    use crate::models::DocumentKind;
    use crate::persistence::{METADATA_FILE, VECTOR_FILE};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    struct RejectingBackend;

    #[async_trait]
    impl EmbeddingBackend for RejectingBackend {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::BackendStatus {
                backend: "rejecting".to_string(),
                status: 503,
                details: "model offline".to_string(),
            })
        }
    }

    fn config(data: &Path, output: &Path) -> IndexConfig {
        IndexConfig {
            data_path: data.to_path_buf(),
            output_path: output.to_path_buf(),
            include_plain_text: true,
            min_free_disk_bytes: 0,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
            ..IndexConfig::default()
        }
    }

    fn page_text(seed: &str, len: usize) -> String {
        format!("{seed} pump pressure reading ").chars().cycle().take(len).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn two_pdfs_produce_one_vector_per_chunk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        write_pdf(
            &data.join("manual.pdf"),
            &[
                page_text("alpha", 1_300).as_str(),
                page_text("bravo", 480).as_str(),
                page_text("charlie", 2_000).as_str(),
            ],
        )?;
        write_pdf(&data.join("sheet.pdf"), &[page_text("delta", 950).as_str()])?;
        let output = dir.path().join("vector_store").join("db");

        let mut expected = 0;
        let chunking = ChunkingConfig::default();
        for name in ["manual.pdf", "sheet.pdf"] {
            let path = data.join(name);
            let document = SourceDocument {
                size_bytes: fs::metadata(&path)?.len(),
                path,
                kind: DocumentKind::Pdf,
            };
            for unit in PdfExtractor::new().extract(&document)? {
                let len = unit?.text.chars().count();
                expected += if len <= chunking.size {
                    1
                } else {
                    (len - chunking.overlap).div_ceil(chunking.size - chunking.overlap)
                };
            }
        }

        let pipeline = IndexPipeline::from_config(config(&data, &output))?;
        let report = pipeline.run().await?;

        assert_eq!(report.documents, 2);
        assert!(report.skipped.is_empty());
        assert_eq!(report.chunk_count, expected);
        assert!(matches!(
            report.outcome,
            PipelineOutcome::Built(ref summary) if summary.vector_count == expected
        ));

        let store = persistence::load(&output)?;
        assert_eq!(store.len(), expected);
        assert_eq!(store.chunks().len(), store.vectors().len());
        let pages: std::collections::BTreeSet<u32> =
            store.chunks().iter().map(|chunk| chunk.locator.page).collect();
        assert_eq!(pages.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_data_directory_creates_no_output() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        let output = dir.path().join("db");

        let result = IndexPipeline::from_config(config(&data, &output))?.run().await;

        assert!(matches!(result, Err(IndexError::NoInput(_))));
        assert!(!output.exists());
        Ok(())
    }

    #[test]
    fn overlap_not_below_size_fails_before_reading() {
        let mut settings = config(Path::new("/definitely/not/here"), Path::new("/tmp/out-db"));
        settings.chunking = ChunkingConfig {
            size: 50,
            overlap: 50,
        };

        let result = IndexPipeline::from_config(settings);
        assert!(matches!(result, Err(IndexError::Configuration(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn existing_store_is_left_alone_without_force(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        fs::write(data.join("notes.txt"), page_text("echo", 1_200))?;
        let output = dir.path().join("db");

        IndexPipeline::from_config(config(&data, &output))?.run().await?;
        let vectors_before = fs::read(output.join(VECTOR_FILE))?;
        let modified_before = fs::metadata(output.join(METADATA_FILE))?.modified()?;

        fs::write(data.join("more.txt"), page_text("foxtrot", 3_000))?;
        let report = IndexPipeline::from_config(config(&data, &output))?.run().await?;

        assert_eq!(report.outcome, PipelineOutcome::AlreadyPresent(output.clone()));
        assert_eq!(report.chunk_count, 0);
        assert_eq!(fs::read(output.join(VECTOR_FILE))?, vectors_before);
        assert_eq!(
            fs::metadata(output.join(METADATA_FILE))?.modified()?,
            modified_before
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn force_rebuild_replaces_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        fs::write(data.join("notes.txt"), page_text("golf", 400))?;
        let output = dir.path().join("db");

        IndexPipeline::from_config(config(&data, &output))?.run().await?;
        assert_eq!(persistence::load(&output)?.len(), 1);

        fs::write(data.join("notes.txt"), page_text("golf", 1_400))?;
        let mut forced = config(&data, &output);
        forced.force = true;
        let report = IndexPipeline::from_config(forced)?.run().await?;

        assert_eq!(report.chunk_count, 3);
        assert_eq!(persistence::load(&output)?.len(), 3);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rebuilds_produce_identical_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        fs::write(data.join("a.txt"), page_text("hotel", 2_345))?;
        fs::write(data.join("b.md"), page_text("india", 777))?;
        let output = dir.path().join("db");
        let mut forced = config(&data, &output);
        forced.force = true;

        IndexPipeline::from_config(forced.clone())?.run().await?;
        let first = persistence::load(&output)?;
        IndexPipeline::from_config(forced)?.run().await?;
        let second = persistence::load(&output)?;

        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreadable_documents_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        fs::write(data.join("broken.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(data.join("notes.txt"), page_text("juliet", 600))?;
        let output = dir.path().join("db");

        let report = IndexPipeline::from_config(config(&data, &output))?.run().await?;

        assert_eq!(report.documents, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            report.skipped[0].path.file_name().and_then(|name| name.to_str()),
            Some("broken.pdf")
        );
        assert_eq!(report.chunk_count, 2);
        assert_eq!(persistence::load(&output)?.len(), 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unparsable_pdf_falls_back_to_ocr_endpoint() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        fs::write(data.join("scanned.pdf"), b"%PDF-1.4\n%broken")?;
        let output = dir.path().join("db");
        let recognized = serde_json::json!({
            "pages": [{ "page": 1, "text": page_text("lima", 300) }]
        });
        let (base_url, server) = serve(vec![(200, recognized.to_string())])?;

        let mut with_ocr = config(&data, &output);
        with_ocr.ocr = Some(OcrEndpointConfig {
            endpoint: format!("{base_url}/ocr"),
            api_key: None,
        });
        let report = IndexPipeline::from_config(with_ocr)?.run().await?;

        assert!(report.skipped.is_empty());
        assert_eq!(report.chunk_count, 1);
        let store = persistence::load(&output)?;
        assert_eq!(store.len(), 1);
        assert!(store.chunks()[0].text.starts_with("lima pump"));

        let requests = server.join().map_err(|_| "ocr server panicked")??;
        let sent: serde_json::Value = serde_json::from_str(&requests[0])?;
        assert!(sent["source_path"]
            .as_str()
            .is_some_and(|path| path.ends_with("scanned.pdf")));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn custom_registry_limits_indexed_kinds() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        write_pdf(&data.join("manual.pdf"), &[page_text("mike", 700).as_str()])?;
        fs::write(data.join("notes.txt"), page_text("november", 300))?;
        let output = dir.path().join("db");

        let mut registry = ExtractorRegistry::new();
        registry.register(PlainTextExtractor);
        let report = IndexPipeline::from_config(config(&data, &output))?
            .with_registry(registry)
            .run()
            .await?;

        assert_eq!(report.documents, 1);
        assert_eq!(report.chunk_count, 1);
        let store = persistence::load(&output)?;
        assert!(store.chunks()[0].locator.source_path.ends_with("notes.txt"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn all_documents_unreadable_is_an_empty_corpus(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        fs::write(data.join("broken.pdf"), b"%PDF-1.4\n%broken")?;
        let output = dir.path().join("db");

        let result = IndexPipeline::from_config(config(&data, &output))?.run().await;

        assert!(matches!(result, Err(IndexError::EmptyCorpus(_))));
        assert!(!output.exists());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn embedding_failure_leaves_previous_store() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        fs::create_dir(&data)?;
        fs::write(data.join("notes.txt"), page_text("kilo", 900))?;
        let output = dir.path().join("db");

        IndexPipeline::from_config(config(&data, &output))?.run().await?;
        let before = fs::read(output.join(VECTOR_FILE))?;

        let mut forced = config(&data, &output);
        forced.force = true;
        let result = IndexPipeline::new(forced, Arc::new(RejectingBackend))?
            .run()
            .await;

        assert!(matches!(
            result,
            Err(IndexError::Embedding(EmbeddingError::Exhausted { attempts: 2, .. }))
        ));
        assert_eq!(fs::read(output.join(VECTOR_FILE))?, before);
        Ok(())
    }
}
