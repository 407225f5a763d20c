//! VectorIndex trait: abstract interface over the persisted chunk index.
//!
//! The bundled implementation is `SqliteVectorIndex` in the `sqlite` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::Result;

/// A chunk as stored in (and returned by) the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub text: String,
    /// Free-form metadata. Well-known keys: `source` (string) and
    /// `start_index` (integer).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl IndexedDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata
            .insert("source".to_string(), Value::String(source.into()));
        self
    }

    pub fn with_start_index(mut self, start_index: u64) -> Self {
        self.metadata
            .insert("start_index".to_string(), Value::from(start_index));
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    /// Character offset of the chunk in its source, if recorded. Accepts an
    /// integer or a decimal string.
    pub fn start_index(&self) -> Option<u64> {
        match self.metadata.get("start_index")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// How an index's raw distance becomes a similarity in [0, 1].
///
/// Every mapping is non-increasing in distance, maps 0 to 1.0 and is clamped
/// into [0, 1]; NaN maps to 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMapping {
    /// Squared Euclidean distance over unit vectors (range [0, 4]):
    /// `1 - d / 2`.
    L2Squared,
    /// Cosine distance (`1 - cos`): `1 - d`.
    Cosine,
}

impl SimilarityMapping {
    pub fn to_similarity(self, raw_distance: f32) -> f64 {
        let d = f64::from(raw_distance);
        if d.is_nan() {
            return 0.0;
        }
        let similarity = match self {
            SimilarityMapping::L2Squared => 1.0 - d / 2.0,
            SimilarityMapping::Cosine => 1.0 - d,
        };
        similarity.clamp(0.0, 1.0)
    }
}

/// Facts recorded alongside the vectors at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub embedding_model: String,
    pub dimension: usize,
}

impl IndexMeta {
    /// Whether vectors from `model` with `dimension` components can be
    /// searched against this index. Unrecorded fields (empty model, zero
    /// dimension) are not compared.
    pub fn accepts(&self, model: &str, dimension: usize) -> bool {
        let model_ok = self.embedding_model.is_empty() || self.embedding_model == model;
        let dimension_ok = self.dimension == 0 || self.dimension == dimension;
        model_ok && dimension_ok
    }
}

/// Nearest-neighbor search over stored chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-`k` neighbors of `query`, ascending raw distance (most similar first).
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(IndexedDocument, f32)>>;

    /// Number of stored vectors.
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// The distance semantics of `search`.
    fn mapping(&self) -> SimilarityMapping {
        SimilarityMapping::L2Squared
    }

    /// Embedding model and dimension the index was built with, when known.
    fn built_with(&self) -> Option<IndexMeta> {
        None
    }
}
