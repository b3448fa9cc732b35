use crate::error::IndexError;
use crate::index::VectorStore;
use crate::models::{Chunk, EmbeddingVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const VECTOR_FILE: &str = "index.vec";
pub const METADATA_FILE: &str = "index.json";

const VECTOR_MAGIC: &[u8; 8] = b"DIXVEC01";
const HEADER_LEN: usize = 8 + 4 + 8;
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    SkipIfExists,
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Written(StoreSummary),
    AlreadyPresent(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSummary {
    pub location: PathBuf,
    pub vector_count: usize,
    pub dimensions: usize,
    pub vector_bytes: u64,
    pub metadata_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreMetadata {
    format_version: u32,
    dimensions: usize,
    vector_count: usize,
    vector_sha256: String,
    created_at: DateTime<Utc>,
    records: Vec<Chunk>,
}

/// True when both halves of a store are present at `location`.
pub fn exists(location: &Path) -> bool {
    location.join(VECTOR_FILE).is_file() && location.join(METADATA_FILE).is_file()
}

/// Writes `store` to `location` so that readers see either the previous
/// contents or the complete new store, never a mix.
pub fn save(
    store: &VectorStore,
    location: &Path,
    mode: SaveMode,
) -> Result<SaveOutcome, IndexError> {
    if mode == SaveMode::SkipIfExists && exists(location) {
        info!(location = %location.display(), "vector store already exists, skipping write");
        return Ok(SaveOutcome::AlreadyPresent(location.to_path_buf()));
    }

    ensure_replaceable(location)?;
    let (parent, name) = split_location(location)?;
    fs::create_dir_all(&parent)?;

    let staging = StagingDir::create(&parent, &name)?;
    let checksum = write_vectors(&staging.path.join(VECTOR_FILE), store)?;
    write_metadata(&staging.path.join(METADATA_FILE), store, checksum)?;
    sync_dir(&staging.path);

    let staged = load(&staging.path)?;
    if staged.len() != store.len() || staged.dimensions() != store.dimensions() {
        return Err(IndexError::corrupt(
            &staging.path,
            format!(
                "staged store reloaded with {} vectors of {} dimensions, wrote {} of {}",
                staged.len(),
                staged.dimensions(),
                store.len(),
                store.dimensions()
            ),
        ));
    }

    swap_into_place(staging, location, &parent, &name)?;
    debug!(location = %location.display(), vectors = store.len(), "vector store committed");

    Ok(SaveOutcome::Written(summarize(location, store)?))
}

pub fn load(location: &Path) -> Result<VectorStore, IndexError> {
    let vector_path = location.join(VECTOR_FILE);
    let metadata_path = location.join(METADATA_FILE);

    match (vector_path.is_file(), metadata_path.is_file()) {
        (true, true) => {}
        (false, false) => return Err(IndexError::corrupt(location, "no vector store found")),
        (false, true) => {
            return Err(IndexError::corrupt(location, format!("{VECTOR_FILE} is missing")))
        }
        (true, false) => {
            return Err(IndexError::corrupt(location, format!("{METADATA_FILE} is missing")))
        }
    }

    let bytes = fs::read(&vector_path)?;
    let metadata: StoreMetadata = serde_json::from_slice(&fs::read(&metadata_path)?)
        .map_err(|error| IndexError::corrupt(location, format!("unreadable metadata: {error}")))?;

    if metadata.format_version != FORMAT_VERSION {
        return Err(IndexError::corrupt(
            location,
            format!("unsupported format version {}", metadata.format_version),
        ));
    }
    if sha256_hex(&bytes) != metadata.vector_sha256 {
        return Err(IndexError::corrupt(location, "vector file checksum mismatch"));
    }

    let (dimensions, count) =
        read_header(&bytes).map_err(|details| IndexError::corrupt(location, details))?;
    if dimensions != metadata.dimensions || count != metadata.vector_count {
        return Err(IndexError::corrupt(
            location,
            format!(
                "vector file holds {count}x{dimensions}, metadata declares {}x{}",
                metadata.vector_count, metadata.dimensions
            ),
        ));
    }
    if count != metadata.records.len() {
        return Err(IndexError::corrupt(
            location,
            format!("{count} vectors but {} metadata records", metadata.records.len()),
        ));
    }

    let expected_len = count
        .checked_mul(dimensions)
        .and_then(|values| values.checked_mul(4))
        .and_then(|payload| payload.checked_add(HEADER_LEN));
    if expected_len != Some(bytes.len()) {
        return Err(IndexError::corrupt(
            location,
            format!("vector file is {} bytes, header implies {expected_len:?}", bytes.len()),
        ));
    }

    let vectors = bytes[HEADER_LEN..]
        .chunks_exact(dimensions * 4)
        .enumerate()
        .map(|(position, row)| EmbeddingVector {
            position,
            values: row
                .chunks_exact(4)
                .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
                .collect(),
        })
        .collect();

    VectorStore::build(dimensions, vectors, metadata.records)
        .map_err(|error| IndexError::corrupt(location, error.to_string()))
}

/// Re-opens the store at `location` and reports its shape and file sizes.
pub fn verify(location: &Path) -> Result<StoreSummary, IndexError> {
    let store = load(location)?;
    summarize(location, &store)
}

fn summarize(location: &Path, store: &VectorStore) -> Result<StoreSummary, IndexError> {
    Ok(StoreSummary {
        location: location.to_path_buf(),
        vector_count: store.len(),
        dimensions: store.dimensions(),
        vector_bytes: fs::metadata(location.join(VECTOR_FILE))?.len(),
        metadata_bytes: fs::metadata(location.join(METADATA_FILE))?.len(),
    })
}

fn read_header(bytes: &[u8]) -> Result<(usize, usize), String> {
    if bytes.len() < HEADER_LEN {
        return Err(format!("vector file is only {} bytes", bytes.len()));
    }
    if &bytes[..8] != VECTOR_MAGIC {
        return Err("vector file has an unknown signature".to_string());
    }

    let dimensions = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count = [0u8; 8];
    count.copy_from_slice(&bytes[12..20]);
    let count = usize::try_from(u64::from_le_bytes(count))
        .map_err(|_| "vector count does not fit in memory".to_string())?;

    if dimensions == 0 {
        return Err("vector file declares zero dimensions".to_string());
    }
    Ok((dimensions, count))
}

fn write_vectors(path: &Path, store: &VectorStore) -> Result<String, IndexError> {
    let dimensions = u32::try_from(store.dimensions()).map_err(|_| {
        IndexError::Alignment(format!("{} dimensions exceed the file format", store.dimensions()))
    })?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + store.len() * store.dimensions() * 4);
    bytes.extend_from_slice(VECTOR_MAGIC);
    bytes.extend_from_slice(&dimensions.to_le_bytes());
    bytes.extend_from_slice(&(store.len() as u64).to_le_bytes());
    for vector in store.vectors() {
        for value in &vector.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(sha256_hex(&bytes))
}

fn write_metadata(
    path: &Path,
    store: &VectorStore,
    vector_sha256: String,
) -> Result<(), IndexError> {
    let metadata = StoreMetadata {
        format_version: FORMAT_VERSION,
        dimensions: store.dimensions(),
        vector_count: store.len(),
        vector_sha256,
        created_at: Utc::now(),
        records: store.chunks().to_vec(),
    };

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, &metadata)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// An existing location is only replaced when it holds nothing but store
/// artifacts.
fn ensure_replaceable(location: &Path) -> Result<(), IndexError> {
    if !location.exists() {
        return Ok(());
    }
    if !location.is_dir() {
        return Err(IndexError::Configuration(format!(
            "output path {} exists and is not a directory",
            location.display()
        )));
    }

    for entry in fs::read_dir(location)? {
        let name = entry?.file_name();
        if name != VECTOR_FILE && name != METADATA_FILE {
            return Err(IndexError::Configuration(format!(
                "refusing to replace {}: it contains {} which is not part of a vector store",
                location.display(),
                name.to_string_lossy()
            )));
        }
    }
    Ok(())
}

fn split_location(location: &Path) -> Result<(PathBuf, String), IndexError> {
    let name = location
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IndexError::Configuration(format!(
                "output path {} has no usable directory name",
                location.display()
            ))
        })?
        .to_string();
    let parent = match location.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((parent, name))
}

/// Sibling directory that is removed on drop unless it was moved into place.
struct StagingDir {
    path: PathBuf,
    committed: bool,
}

impl StagingDir {
    fn create(parent: &Path, name: &str) -> std::io::Result<Self> {
        let path = parent.join(format!(".{name}.staging-{}", Uuid::new_v4()));
        fs::create_dir(&path)?;
        Ok(Self {
            path,
            committed: false,
        })
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(error) = fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), %error, "failed to clean up staging directory");
            }
        }
    }
}

fn swap_into_place(
    mut staging: StagingDir,
    location: &Path,
    parent: &Path,
    name: &str,
) -> Result<(), IndexError> {
    let backup = if location.exists() {
        let backup = parent.join(format!(".{name}.previous-{}", Uuid::new_v4()));
        fs::rename(location, &backup)?;
        Some(backup)
    } else {
        None
    };

    if let Err(error) = fs::rename(&staging.path, location) {
        if let Some(backup) = &backup {
            if let Err(restore_error) = fs::rename(backup, location) {
                warn!(
                    backup = %backup.display(),
                    %restore_error,
                    "could not restore previous vector store"
                );
            }
        }
        return Err(error.into());
    }
    staging.committed = true;
    sync_dir(parent);

    if let Some(backup) = backup {
        if let Err(error) = fs::remove_dir_all(&backup) {
            warn!(backup = %backup.display(), %error, "failed to remove previous vector store");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(path: &Path) {
    if let Err(error) = File::open(path).and_then(|dir| dir.sync_all()) {
        debug!(path = %path.display(), %error, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) {}
