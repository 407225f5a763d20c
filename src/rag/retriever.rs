//! Query-time retrieval: embed, search, score, filter.

use std::sync::Arc;

use super::cache::IndexCache;
use super::error::{RagError, Result};
use super::store::IndexedDocument;
use crate::llm::EmbeddingProvider;

pub const UNKNOWN_SOURCE: &str = "unknown";

/// One scored chunk from a single retrieval call. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    content: String,
    filename: String,
    source_path: String,
    similarity_score: f64,
    start_index: Option<u64>,
}

impl RetrievedChunk {
    /// The score is clamped into [0, 1]; NaN becomes 0.
    pub fn new(
        content: impl Into<String>,
        filename: impl Into<String>,
        source_path: impl Into<String>,
        similarity_score: f64,
        start_index: Option<u64>,
    ) -> Self {
        let similarity_score = if similarity_score.is_nan() {
            0.0
        } else {
            similarity_score.clamp(0.0, 1.0)
        };
        Self {
            content: content.into(),
            filename: filename.into(),
            source_path: source_path.into(),
            similarity_score,
            start_index,
        }
    }

    pub fn from_document(doc: IndexedDocument, similarity_score: f64) -> Self {
        let source_path = doc.source().unwrap_or(UNKNOWN_SOURCE).to_string();
        let filename = filename_of(&source_path).to_string();
        let start_index = doc.start_index();
        Self::new(doc.text, filename, source_path, similarity_score, start_index)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn similarity_score(&self) -> f64 {
        self.similarity_score
    }

    pub fn start_index(&self) -> Option<u64> {
        self.start_index
    }
}

/// Last path segment, treating both `/` and `\` as separators.
pub fn filename_of(source_path: &str) -> &str {
    source_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_path)
}

pub struct Retriever {
    index: Arc<IndexCache>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(index: Arc<IndexCache>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, embedder }
    }

    /// Returns up to `k` chunks scoring at least `score_threshold`, in the
    /// index's ranking order. An empty result means nothing relevant was found.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        score_threshold: f64,
    ) -> Result<Vec<RetrievedChunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput(
                "Query must not be empty.".to_string(),
            ));
        }
        if k == 0 {
            return Err(RagError::InvalidInput("k must be at least 1.".to_string()));
        }
        if !(0.0..=1.0).contains(&score_threshold) {
            return Err(RagError::InvalidInput(format!(
                "score threshold must be within [0, 1], got {}",
                score_threshold
            )));
        }

        let index = self.index.get().await.map_err(|e| match e {
            RagError::IndexNotFound(path) => RagError::IndexUnavailable(format!(
                "no vector index at {}; run ingestion first",
                path.display()
            )),
            other => other,
        })?;

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| match e {
                e @ RagError::EmbeddingFailure(_) => e,
                other => RagError::EmbeddingFailure(other.to_string()),
            })?;

        if let Some(meta) = index.built_with() {
            let model = self.embedder.model_id();
            if !meta.accepts(model, embedding.len()) {
                return Err(RagError::IndexUnavailable(format!(
                    "index built with {}/{}, embedder is {}/{}; re-run ingestion",
                    meta.embedding_model,
                    meta.dimension,
                    model,
                    embedding.len()
                )));
            }
        }

        let raw = index.search(&embedding, k).await?;
        let returned = raw.len();
        let mapping = index.mapping();

        let mut chunks = Vec::with_capacity(returned.min(k));
        for (doc, distance) in raw.into_iter().take(k) {
            if doc.text.trim().is_empty() {
                tracing::debug!(
                    "Skipping empty chunk from {}",
                    doc.source().unwrap_or(UNKNOWN_SOURCE)
                );
                continue;
            }
            let similarity = mapping.to_similarity(distance);
            if similarity < score_threshold {
                tracing::debug!(
                    "Filtered chunk (score {:.3} < threshold {:.3}): {}",
                    similarity,
                    score_threshold,
                    doc.source().unwrap_or("?")
                );
                continue;
            }
            chunks.push(RetrievedChunk::from_document(doc, similarity));
        }

        tracing::info!(
            "Retrieved {}/{} chunks for query {:?} (threshold={:.2})",
            chunks.len(),
            returned,
            preview(query, 60),
            score_threshold
        );
        Ok(chunks)
    }
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::rag::cache::testing::CountingLoader;
    use crate::rag::cache::SqliteIndexLoader;
    use crate::rag::sqlite::{SqliteVectorIndex, INDEX_FILE_NAME};
    use crate::rag::store::IndexMeta;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn model_id(&self) -> &str {
            "unit"
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::EmbeddingFailure("backend offline".to_string()))
        }

        fn model_id(&self) -> &str {
            "failing"
        }
    }

    fn doc(text: &str, source: Option<&str>) -> IndexedDocument {
        let doc = IndexedDocument::new(text).with_start_index(3);
        match source {
            Some(s) => doc.with_source(s),
            None => doc,
        }
    }

    fn retriever_with(results: Vec<(IndexedDocument, f32)>) -> Retriever {
        let cache = IndexCache::new(Arc::new(CountingLoader::with_results(results)));
        Retriever::new(Arc::new(cache), Arc::new(UnitEmbedder))
    }

    #[test]
    fn filename_handles_both_separators() {
        assert_eq!(filename_of("docs/guide/intro.md"), "intro.md");
        assert_eq!(filename_of(r"C:\docs\notes.txt"), "notes.txt");
        assert_eq!(filename_of("mixed/dir\\file.md"), "file.md");
        assert_eq!(filename_of("plain.md"), "plain.md");
    }

    #[test]
    fn chunk_scores_are_clamped() {
        assert_eq!(RetrievedChunk::new("a", "f", "f", 1.7, None).similarity_score(), 1.0);
        assert_eq!(RetrievedChunk::new("a", "f", "f", -0.2, None).similarity_score(), 0.0);
        assert_eq!(RetrievedChunk::new("a", "f", "f", f64::NAN, None).similarity_score(), 0.0);
    }

    #[tokio::test]
    async fn threshold_keeps_only_close_matches() {
        let retriever = retriever_with(vec![
            (doc("A", Some("docs/a.md")), 0.1),
            (doc("B", Some("docs/b.md")), 1.5),
            (doc("C", Some("docs/c.md")), 3.0),
        ]);

        let chunks = retriever.retrieve("what is a?", 5, 0.5).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), "A");
        assert_eq!(chunks[0].filename(), "a.md");
        assert_eq!(chunks[0].source_path(), "docs/a.md");
        assert_eq!(chunks[0].start_index(), Some(3));
        assert!((chunks[0].similarity_score() - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn zero_threshold_keeps_everything_in_index_order() {
        let retriever = retriever_with(vec![
            (doc("A", Some("a.md")), 0.1),
            (doc("B", Some("b.md")), 1.5),
            (doc("C", Some("c.md")), 3.0),
        ]);

        let chunks = retriever.retrieve("q", 5, 0.0).await.unwrap();
        let scores: Vec<f64> = chunks.iter().map(|c| c.similarity_score()).collect();
        assert_eq!(chunks.len(), 3);
        assert!((scores[0] - 0.95).abs() < 1e-6);
        assert!((scores[1] - 0.25).abs() < 1e-6);
        assert_eq!(scores[2], 0.0);
    }

    #[tokio::test]
    async fn output_is_bounded_by_k() {
        let retriever = retriever_with(vec![
            (doc("A", Some("a.md")), 0.0),
            (doc("B", Some("b.md")), 0.1),
            (doc("C", Some("c.md")), 0.2),
        ]);
        assert_eq!(retriever.retrieve("q", 2, 0.0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_source_uses_placeholder() {
        let retriever = retriever_with(vec![(doc("orphan", None), 0.0)]);
        let chunks = retriever.retrieve("q", 1, 0.0).await.unwrap();
        assert_eq!(chunks[0].filename(), UNKNOWN_SOURCE);
        assert_eq!(chunks[0].source_path(), UNKNOWN_SOURCE);
    }

    #[tokio::test]
    async fn nothing_above_threshold_is_an_empty_result() {
        let retriever = retriever_with(vec![(doc("far", Some("a.md")), 3.5)]);
        assert!(retriever.retrieve("q", 5, 0.1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_query_is_invalid_input() {
        let retriever = retriever_with(Vec::new());
        assert!(matches!(
            retriever.retrieve("   \n", 5, 0.0).await,
            Err(RagError::InvalidInput(_))
        ));
        assert!(matches!(
            retriever.retrieve("q", 0, 0.0).await,
            Err(RagError::InvalidInput(_))
        ));
        assert!(matches!(
            retriever.retrieve("q", 5, 1.5).await,
            Err(RagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn missing_index_is_index_unavailable() {
        let cache = IndexCache::new(Arc::new(CountingLoader::missing()));
        let retriever = Retriever::new(Arc::new(cache), Arc::new(UnitEmbedder));
        assert!(matches!(
            retriever.retrieve("q", 5, 0.0).await,
            Err(RagError::IndexUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn embedding_errors_surface_as_embedding_failure() {
        let cache = IndexCache::new(Arc::new(CountingLoader::with_results(Vec::new())));
        let retriever = Retriever::new(Arc::new(cache), Arc::new(FailingEmbedder));
        assert!(matches!(
            retriever.retrieve("q", 5, 0.0).await,
            Err(RagError::EmbeddingFailure(_))
        ));
    }

    #[tokio::test]
    async fn empty_chunks_from_the_index_are_skipped() {
        let retriever = retriever_with(vec![
            (doc("", Some("a.md")), 0.0),
            (doc("  \n", Some("b.md")), 0.0),
            (doc("real", Some("c.md")), 0.1),
        ]);
        let chunks = retriever.retrieve("q", 5, 0.0).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), "real");
    }

    async fn sqlite_retriever(dir: &tempfile::TempDir, meta: IndexMeta, vector: Vec<f32>) -> Retriever {
        let path = dir.path().join(INDEX_FILE_NAME);
        SqliteVectorIndex::build(&path, &[(doc("stored", Some("a.md")), vector)], &meta)
            .await
            .unwrap();
        let cache = IndexCache::new(Arc::new(SqliteIndexLoader::new(path)));
        Retriever::new(Arc::new(cache), Arc::new(UnitEmbedder))
    }

    #[tokio::test]
    async fn index_of_another_dimension_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let meta = IndexMeta {
            embedding_model: "unit".to_string(),
            dimension: 3,
        };
        let retriever = sqlite_retriever(&dir, meta, vec![1.0, 0.0, 0.0]).await;

        match retriever.retrieve("question", 5, 0.0).await {
            Err(RagError::IndexUnavailable(msg)) => {
                assert!(msg.contains("unit/3"));
                assert!(msg.contains("unit/2"));
                assert!(msg.contains("re-run ingestion"));
            }
            other => panic!("expected IndexUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn index_of_another_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let meta = IndexMeta {
            embedding_model: "hashing-2".to_string(),
            dimension: 2,
        };
        let retriever = sqlite_retriever(&dir, meta, vec![1.0, 0.0]).await;
        assert!(matches!(
            retriever.retrieve("question", 5, 0.0).await,
            Err(RagError::IndexUnavailable(msg)) if msg.contains("hashing-2/2")
        ));
    }

    #[tokio::test]
    async fn matching_sqlite_index_is_searched() {
        let dir = tempfile::tempdir().unwrap();
        let meta = IndexMeta {
            embedding_model: "unit".to_string(),
            dimension: 2,
        };
        let retriever = sqlite_retriever(&dir, meta, vec![1.0, 0.0]).await;
        let chunks = retriever.retrieve("question", 5, 0.5).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content(), "stored");
        assert_eq!(chunks[0].similarity_score(), 1.0);
    }
}
