use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

/// A file found by the corpus scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub kind: DocumentKind,
}

impl SourceDocument {
    pub fn document_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn locator(&self, page: u32) -> SourceLocator {
        SourceLocator {
            document_id: self.document_id(),
            source_path: self.path.to_string_lossy().to_string(),
            page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocator {
    pub document_id: String,
    pub source_path: String,
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    pub text: String,
    pub locator: SourceLocator,
}

/// One window of unit text; the unit of embedding and the metadata record
/// persisted next to its vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub locator: SourceLocator,
    pub sequence: u32,
    /// Characters shared with the previous chunk of the same unit.
    pub overlap: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub position: usize,
    pub values: Vec<f32>,
}
