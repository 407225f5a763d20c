//! Retrieval-Augmented Generation.
//!
//! This module provides:
//! - `Retriever`: query → scored, thresholded chunks from the vector index
//! - `build_context` / `deduplicate_sources`: grounding text and citations
//! - `Ingestor`: documents → chunks → embeddings → persisted index
//! - `QaPipeline`: the question answering flow tying them together

pub mod cache;
pub mod context_builder;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod retriever;
pub mod sqlite;
pub mod store;

pub use cache::{IndexCache, IndexLoader, SqliteIndexLoader};
pub use context_builder::{build_context, deduplicate_sources, Citation, NO_CONTEXT_SENTINEL};
pub use engine::{RecursiveSplitter, TextChunk};
pub use error::RagError;
pub use ingest::{load_documents, IngestReport, Ingestor};
pub use pipeline::{AskOutcome, AskRequest, ConversationTurn, PipelineOptions, QaPipeline};
pub use retriever::{RetrievedChunk, Retriever};
pub use sqlite::SqliteVectorIndex;
pub use store::{IndexMeta, IndexedDocument, SimilarityMapping, VectorIndex};
