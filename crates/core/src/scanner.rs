use crate::error::IndexError;
use crate::extractor::ExtractorRegistry;
use crate::models::SourceDocument;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::{info, warn};
use walkdir::WalkDir;

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct CorpusScan {
    pub root: PathBuf,
    pub documents: Vec<SourceDocument>,
    pub total_bytes: u64,
}

impl CorpusScan {
    pub fn total_megabytes(&self) -> f64 {
        self.total_bytes as f64 / BYTES_PER_MEGABYTE
    }

    /// Rough wall-clock estimate: one minute per megabyte, at least one.
    pub fn estimated_minutes(&self) -> u64 {
        (self.total_megabytes() as u64).max(1)
    }
}

/// Recursively collects every file under `folder` that has a registered
/// extractor, sorted by path.
pub fn scan_corpus(folder: &Path, registry: &ExtractorRegistry) -> Result<CorpusScan, IndexError> {
    if !folder.is_dir() {
        return Err(IndexError::NoInput(format!(
            "data directory not found: {}",
            folder.display()
        )));
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(kind) = registry.kind_for_path(entry.path()) else {
            continue;
        };
        let size_bytes = entry.metadata().map(|meta| meta.len()).unwrap_or_default();
        documents.push(SourceDocument {
            path: entry.path().to_path_buf(),
            size_bytes,
            kind,
        });
    }

    if documents.is_empty() {
        return Err(IndexError::NoInput(format!(
            "no {} files found in {}",
            registry.supported_extensions().join("/"),
            folder.display()
        )));
    }

    documents.sort_unstable_by(|left, right| left.path.cmp(&right.path));
    let total_bytes = documents.iter().map(|document| document.size_bytes).sum();

    info!(count = documents.len(), folder = %folder.display(), "found documents");
    for document in &documents {
        info!(
            "  - {} ({:.1} MB)",
            document.path.display(),
            document.size_bytes as f64 / BYTES_PER_MEGABYTE
        );
    }

    Ok(CorpusScan {
        root: folder.to_path_buf(),
        documents,
        total_bytes,
    })
}

/// Free bytes on the disk that holds `path` (or its closest existing ancestor).
pub fn available_space(path: &Path) -> Option<u64> {
    let existing = path.ancestors().find(|candidate| candidate.exists())?;
    let resolved = existing.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| resolved.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub available: u64,
    pub low: bool,
}

/// Logs a warning when less than `threshold_bytes` are free near `path`.
/// Never fails the run; `None` when no mounted disk covers `path`.
pub fn check_free_space(path: &Path, threshold_bytes: u64) -> Option<DiskSpace> {
    let available = available_space(path)?;
    let low = available < threshold_bytes;
    if low {
        warn!(
            "Low disk space: {:.1} GB available near {}",
            available as f64 / (BYTES_PER_MEGABYTE * 1024.0),
            path.display()
        );
    }
    Some(DiskSpace { available, low })
}
