use std::sync::Arc;

use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::history::HistoryLog;
use crate::llm::{build_embedding_provider, build_generator, EmbeddingProvider, Generator};
use crate::rag::sqlite::INDEX_FILE_NAME;
use crate::rag::{
    IndexCache, Ingestor, PipelineOptions, QaPipeline, RecursiveSplitter, Retriever,
    SqliteIndexLoader,
};

pub mod error;

use error::InitializationError;

/// Application state shared across all routes.
///
/// Everything is resolved once at startup: settings, the embedding and LLM
/// backends, the index cache and the services built on top of them.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Arc<Settings>,
    pub index: Arc<IndexCache>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub generator: Arc<dyn Generator>,
    pub pipeline: Arc<QaPipeline>,
    pub ingestor: Arc<Ingestor>,
    pub history: Arc<HistoryLog>,
}

impl AppState {
    /// Loads configuration from `paths` and builds the configured backends.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let embedder = build_embedding_provider(&settings.embedding)
            .map_err(InitializationError::Embedding)?;
        let generator = build_generator(&settings.llm).map_err(InitializationError::Llm)?;

        Self::with_backends(paths, settings, embedder, generator)
    }

    /// Wires the RAG services around already-built backends.
    pub fn with_backends(
        paths: Arc<AppPaths>,
        settings: Settings,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Result<Arc<Self>, InitializationError> {
        let index_path = paths
            .resolve(&settings.paths.vector_store_dir)
            .join(INDEX_FILE_NAME);
        let documents_dir = paths.resolve(&settings.paths.documents_dir);
        let history_path = paths.data_dir.join(&settings.paths.history_file);

        let index = Arc::new(IndexCache::new(Arc::new(SqliteIndexLoader::new(
            index_path.clone(),
        ))));
        let retriever = Arc::new(Retriever::new(index.clone(), embedder.clone()));
        let pipeline = Arc::new(QaPipeline::new(
            retriever,
            generator.clone(),
            PipelineOptions::from_settings(&settings),
        ));

        let splitter = RecursiveSplitter::new(
            settings.chunking.chunk_size,
            settings.chunking.chunk_overlap,
        )
        .map_err(|e| InitializationError::Rag(e.into()))?;
        let ingestor = Arc::new(Ingestor::new(
            documents_dir,
            index_path,
            splitter,
            embedder.clone(),
            settings.embedding.batch_size,
        ));

        let history = Arc::new(HistoryLog::new(history_path));

        tracing::info!(
            "Application state ready (documents={}, index={}, history={})",
            ingestor.documents_dir().display(),
            ingestor.index_path().display(),
            history.path().display()
        );

        Ok(Arc::new(AppState {
            paths,
            settings: Arc::new(settings),
            index,
            embedder,
            generator,
            pipeline,
            ingestor,
            history,
        }))
    }
}
