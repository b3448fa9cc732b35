use crate::error::IndexError;
use crate::models::{Chunk, EmbeddingVector};

/// Embedding vectors and their chunk metadata, joined by position.
///
/// A `VectorStore` can only be obtained through [`VectorStore::build`], which
/// enforces one vector per chunk, a shared dimensionality and contiguous
/// positions.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore {
    dimensions: usize,
    vectors: Vec<EmbeddingVector>,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Copy)]
pub struct Neighbor<'a> {
    pub position: usize,
    pub score: f32,
    pub chunk: &'a Chunk,
}

impl VectorStore {
    pub fn build(
        dimensions: usize,
        vectors: Vec<EmbeddingVector>,
        chunks: Vec<Chunk>,
    ) -> Result<Self, IndexError> {
        if vectors.len() != chunks.len() {
            return Err(IndexError::Alignment(format!(
                "{} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        for (expected, vector) in vectors.iter().enumerate() {
            if vector.position != expected {
                return Err(IndexError::Alignment(format!(
                    "vector at slot {expected} carries position {}",
                    vector.position
                )));
            }
            if vector.values.len() != dimensions {
                return Err(IndexError::Alignment(format!(
                    "vector {expected} has {} dimensions, expected {dimensions}",
                    vector.values.len()
                )));
            }
        }

        Ok(Self {
            dimensions,
            vectors,
            chunks,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vectors(&self) -> &[EmbeddingVector] {
        &self.vectors
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn entries(&self) -> impl Iterator<Item = (&EmbeddingVector, &Chunk)> {
        self.vectors.iter().zip(self.chunks.iter())
    }

    /// Exact cosine nearest neighbours, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<Neighbor<'_>> {
        if query.len() != self.dimensions {
            return Vec::new();
        }

        let mut neighbors: Vec<Neighbor<'_>> = self
            .entries()
            .map(|(vector, chunk)| Neighbor {
                position: vector.position,
                score: cosine_similarity(query, &vector.values),
                chunk,
            })
            .collect();

        neighbors.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.position.cmp(&right.position))
        });
        neighbors.truncate(top_k);
        neighbors
    }
}

pub fn build_index(
    dimensions: usize,
    vectors: Vec<EmbeddingVector>,
    chunks: Vec<Chunk>,
) -> Result<VectorStore, IndexError> {
    VectorStore::build(dimensions, vectors, chunks)
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let norm_left = left.iter().map(|a| a * a).sum::<f32>().sqrt();
    let norm_right = right.iter().map(|b| b * b).sum::<f32>().sqrt();

    if norm_left == 0.0 || norm_right == 0.0 {
        return 0.0;
    }

    dot / (norm_left * norm_right)
}
