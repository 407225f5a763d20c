//! Document ingestion: load → split → embed → build the vector index.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::engine::{RecursiveSplitter, TextChunk};
use super::error::{RagError, Result};
use super::sqlite::{IndexMeta, SqliteVectorIndex};
use super::store::{IndexedDocument, VectorIndex};
use crate::llm::EmbeddingProvider;

const DOCUMENT_EXTENSIONS: [&str; 2] = ["md", "txt"];

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub source: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub documents_loaded: usize,
    pub chunks_indexed: usize,
    /// True when an existing index was kept and nothing was rebuilt.
    pub skipped: bool,
}

/// Recursively reads every `.md` / `.txt` file under `dir`, in path order.
pub async fn load_documents(dir: &Path) -> Result<Vec<LoadedDocument>> {
    if !dir.is_dir() {
        return Err(RagError::Ingestion(format!(
            "documents directory {} not found",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| RagError::Ingestion(format!("cannot read {}: {}", current.display(), e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RagError::Ingestion(e.to_string()))?
        {
            let path = entry.path();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => pending.push(path),
                Ok(ft) if ft.is_file() && is_document(&path) => files.push(path),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }
    }
    files.sort();

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        match tokio::fs::read(&path).await {
            Ok(bytes) => documents.push(LoadedDocument {
                source: path.display().to_string(),
                content: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(e) => tracing::warn!("Failed to read {}: {}", path.display(), e),
        }
    }

    if documents.is_empty() {
        return Err(RagError::Ingestion(format!(
            "no documents found in {} (expected .md or .txt files)",
            dir.display()
        )));
    }
    tracing::info!("Loaded {} documents from {}", documents.len(), dir.display());
    Ok(documents)
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            DOCUMENT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

pub struct Ingestor {
    documents_dir: PathBuf,
    index_path: PathBuf,
    splitter: RecursiveSplitter,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    running: Mutex<()>,
}

impl Ingestor {
    pub fn new(
        documents_dir: PathBuf,
        index_path: PathBuf,
        splitter: RecursiveSplitter,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            documents_dir,
            index_path,
            splitter,
            embedder,
            batch_size: batch_size.max(1),
            running: Mutex::new(()),
        }
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Builds the index from scratch. With `force == false` an existing index
    /// is kept and its size reported instead.
    ///
    /// Runs are serialized; a second caller waits for the first to finish.
    pub async fn run(&self, force: bool) -> Result<IngestReport> {
        let _running = self.running.lock().await;

        if !force && self.index_path.is_file() {
            let existing = SqliteVectorIndex::open(&self.index_path).await?;
            let chunks_indexed = existing.len().await?;
            tracing::info!(
                "Index already exists at {} ({} vectors); skipping ingestion",
                self.index_path.display(),
                chunks_indexed
            );
            return Ok(IngestReport {
                documents_loaded: 0,
                chunks_indexed,
                skipped: true,
            });
        }

        let documents = load_documents(&self.documents_dir).await?;
        let chunks: Vec<TextChunk> = documents
            .iter()
            .flat_map(|doc| self.splitter.split_document(&doc.content, &doc.source))
            .collect();
        if chunks.is_empty() {
            return Err(RagError::Ingestion(
                "documents contained no text to index".to_string(),
            ));
        }
        tracing::info!(
            "Split {} documents into {} chunks (size={}, overlap={})",
            documents.len(),
            chunks.len(),
            self.splitter.chunk_size(),
            self.splitter.chunk_overlap()
        );

        let items = self.embed_chunks(chunks).await?;
        let dimension = items.first().map(|(_, v)| v.len()).unwrap_or(0);
        let meta = IndexMeta {
            embedding_model: self.embedder.model_id().to_string(),
            dimension,
        };
        let chunks_indexed = SqliteVectorIndex::build(&self.index_path, &items, &meta).await?;

        Ok(IngestReport {
            documents_loaded: documents.len(),
            chunks_indexed,
            skipped: false,
        })
    }

    async fn embed_chunks(&self, chunks: Vec<TextChunk>) -> Result<Vec<(IndexedDocument, Vec<f32>)>> {
        let mut items = Vec::with_capacity(chunks.len());
        let batches = chunks.len().div_ceil(self.batch_size);

        for (n, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let vectors = self.embedder.embed_batch(&texts).await.map_err(|e| match e {
                e @ RagError::EmbeddingFailure(_) => e,
                other => RagError::EmbeddingFailure(other.to_string()),
            })?;
            if vectors.len() != batch.len() {
                return Err(RagError::EmbeddingFailure(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            for (chunk, vector) in batch.iter().zip(vectors) {
                let doc = IndexedDocument::new(chunk.text.clone())
                    .with_source(chunk.source.clone())
                    .with_start_index(chunk.start_offset as u64);
                items.push((doc, vector));
            }
            tracing::debug!("Embedded batch {}/{}", n + 1, batches);
        }
        Ok(items)
    }
}
