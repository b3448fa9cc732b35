use crate::error::IndexError;
use crate::models::{Chunk, TextUnit};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(size: usize, overlap: usize) -> Result<Self, IndexError> {
        let config = Self { size, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.size == 0 {
            return Err(IndexError::Configuration(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if self.overlap >= self.size {
            return Err(IndexError::Configuration(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.overlap, self.size
            )));
        }
        Ok(())
    }

    pub fn step(&self) -> usize {
        self.size - self.overlap
    }

    /// Number of windows a text of `char_count` characters splits into.
    pub fn expected_chunks(&self, char_count: usize) -> usize {
        match char_count {
            0 => 0,
            n if n <= self.size => 1,
            n => (n - self.overlap).div_ceil(self.step()),
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fixed-size character windows advancing by `size - overlap`. The last
/// window takes whatever remains and may be shorter than `size`.
pub fn split_windows(text: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.size).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += config.step();
    }

    windows
}

pub fn chunk_unit(unit: &TextUnit, config: ChunkingConfig) -> Vec<Chunk> {
    split_windows(&unit.text, config)
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let sequence = index as u32;
            let locator = &unit.locator;
            Chunk {
                chunk_id: make_chunk_id(&locator.document_id, locator.page, sequence, &text),
                locator: unit.locator.clone(),
                sequence,
                overlap: if index == 0 { 0 } else { config.overlap },
                text,
            }
        })
        .collect()
}

fn make_chunk_id(document_id: &str, page: u32, sequence: u32, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
