use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use docindex_core::config::{DEFAULT_DATA_PATH, DEFAULT_MIN_FREE_DISK_BYTES, DEFAULT_OUTPUT_PATH};
use docindex_core::persistence;
use docindex_core::{
    BackendKind, ChunkingConfig, EmbeddingOptions, IndexConfig, IndexPipeline, OcrEndpointConfig,
    PipelineOutcome, RetryPolicy,
};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docindex", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose (debug) logging unless RUST_LOG is set.
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Build the vector store from a folder of documents.
    Init(InitArgs),
    /// Re-open an existing vector store and report its size.
    Verify {
        /// Directory that holds the vector store.
        #[arg(long, env = "DOCINDEX_OUTPUT_PATH", default_value = DEFAULT_OUTPUT_PATH)]
        output_path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Ngram,
    Http,
}

#[derive(Args)]
struct InitArgs {
    /// Regenerate the store even if one already exists.
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Directory containing the source documents.
    #[arg(long, env = "DOCINDEX_DATA_PATH", default_value = DEFAULT_DATA_PATH)]
    data_path: PathBuf,

    /// Directory the vector store is written to.
    #[arg(long, env = "DOCINDEX_OUTPUT_PATH", default_value = DEFAULT_OUTPUT_PATH)]
    output_path: PathBuf,

    /// Chunk size in characters.
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,

    /// Overlap between consecutive chunks in characters.
    #[arg(long, default_value_t = 50)]
    chunk_overlap: u64,

    /// Also index .txt and .md files.
    #[arg(long, default_value_t = false)]
    include_text: bool,

    /// Embedding backend.
    #[arg(long, value_enum, default_value = "ngram")]
    embedding_backend: BackendArg,

    /// Base URL of an OpenAI-compatible embeddings API (http backend).
    #[arg(long, env = "DOCINDEX_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Embedding model name (http backend).
    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// API key sent as a bearer token (http backend).
    #[arg(long, env = "DOCINDEX_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Vector dimensionality produced by the backend.
    #[arg(long, default_value = "128")]
    embedding_dimensions: usize,

    /// Chunks sent per embedding request.
    #[arg(long, default_value = "32")]
    batch_size: usize,

    /// Embedding requests in flight at once.
    #[arg(long, default_value = "4")]
    concurrency: usize,

    /// Attempts per embedding request before the run fails.
    #[arg(long, default_value = "4")]
    max_attempts: u32,

    /// Per-request timeout in seconds (http backend).
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,

    /// Multimodal OCR endpoint used for PDFs that cannot be parsed.
    #[arg(long, env = "LLM_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// API key for the OCR endpoint.
    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,
}

impl InitArgs {
    fn into_config(self) -> anyhow::Result<IndexConfig> {
        let chunking = ChunkingConfig {
            size: usize::try_from(self.chunk_size).context("chunk size does not fit in memory")?,
            overlap: usize::try_from(self.chunk_overlap)
                .context("chunk overlap does not fit in memory")?,
        };
        let ocr = self
            .ocr_endpoint
            .filter(|endpoint| !endpoint.trim().is_empty())
            .map(|endpoint| OcrEndpointConfig {
                endpoint: endpoint.trim().to_string(),
                api_key: self
                    .ocr_api_key
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty()),
            });

        Ok(IndexConfig {
            data_path: self.data_path,
            output_path: self.output_path,
            chunking,
            embedding: EmbeddingOptions {
                backend: match self.embedding_backend {
                    BackendArg::Ngram => BackendKind::Ngram,
                    BackendArg::Http => BackendKind::Http,
                },
                endpoint: self.embedding_endpoint,
                model: self.embedding_model,
                api_key: self.embedding_api_key,
                dimensions: self.embedding_dimensions,
                batch_size: self.batch_size,
                concurrency: self.concurrency,
                timeout: Duration::from_secs(self.request_timeout_secs),
            },
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
            force: self.force,
            include_plain_text: self.include_text,
            min_free_disk_bytes: DEFAULT_MIN_FREE_DISK_BYTES,
            ocr,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docindex boot"
    );

    match cli.command {
        Command::Init(args) => init(args).await,
        Command::Verify { output_path } => {
            let summary = persistence::verify(&output_path)?;
            println!(
                "{} vectors ({} dimensions) at {}",
                summary.vector_count,
                summary.dimensions,
                summary.location.display()
            );
            println!(
                "vector index size: {:.1} MB, metadata size: {:.1} MB",
                megabytes(summary.vector_bytes),
                megabytes(summary.metadata_bytes)
            );
            Ok(())
        }
    }
}

async fn init(args: InitArgs) -> anyhow::Result<()> {
    let mut config = args.into_config()?;
    config.validate()?;

    if !config.force && persistence::exists(&config.output_path) {
        warn!(location = %config.output_path.display(), "vector store already exists");
        warn!("use --force to regenerate or remove the directory manually");
        if std::io::stdin().is_terminal() {
            if !confirm_overwrite()? {
                info!("operation cancelled by user, existing store kept");
                return Ok(());
            }
            config.force = true;
        }
    }

    let pipeline = IndexPipeline::from_config(config)?;
    let report = tokio::select! {
        biased;
        report = pipeline.run() => report?,
        _ = tokio::signal::ctrl_c() => bail!("operation cancelled by user"),
    };

    for skipped in &report.skipped {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
    }

    match report.outcome {
        PipelineOutcome::AlreadyPresent(location) => {
            println!("vector store already exists at {}", location.display());
        }
        PipelineOutcome::Built(summary) => {
            info!(
                "processing time: {:.1} minutes",
                report.elapsed.as_secs_f64() / 60.0
            );
            println!(
                "{} chunks from {} documents indexed at {} ({} skipped)",
                report.chunk_count,
                report.documents - report.skipped.len(),
                summary.location.display(),
                report.skipped.len()
            );
        }
    }

    Ok(())
}

fn confirm_overwrite() -> anyhow::Result<bool> {
    print!("Do you want to continue and overwrite? (y/N): ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
