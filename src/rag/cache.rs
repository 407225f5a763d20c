//! Shared, lazily loaded handle to the vector index.
//!
//! The first retrieval loads the index; concurrent first callers wait on the
//! same lock so only one load happens. Re-ingestion calls [`IndexCache::invalidate`]
//! and the next retrieval loads the fresh index, while requests already holding
//! the old handle finish against it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::error::Result;
use super::sqlite::SqliteVectorIndex;
use super::store::VectorIndex;

/// Loads the persisted index. Fails with `RagError::IndexNotFound` when
/// nothing has been built yet.
#[async_trait]
pub trait IndexLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn VectorIndex>>;

    /// Whether a persisted index exists, without loading it.
    fn exists(&self) -> bool;
}

pub struct SqliteIndexLoader {
    db_path: PathBuf,
}

impl SqliteIndexLoader {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl IndexLoader for SqliteIndexLoader {
    async fn load(&self) -> Result<Arc<dyn VectorIndex>> {
        let index = SqliteVectorIndex::open(&self.db_path).await?;
        Ok(Arc::new(index))
    }

    fn exists(&self) -> bool {
        self.db_path.is_file()
    }
}

pub struct IndexCache {
    loader: Arc<dyn IndexLoader>,
    slot: Mutex<Option<Arc<dyn VectorIndex>>>,
}

impl IndexCache {
    pub fn new(loader: Arc<dyn IndexLoader>) -> Self {
        Self {
            loader,
            slot: Mutex::new(None),
        }
    }

    /// Returns the cached index, loading it on first use.
    ///
    /// A failed load leaves the cache empty so the next call retries.
    pub async fn get(&self) -> Result<Arc<dyn VectorIndex>> {
        let mut slot = self.slot.lock().await;
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }

        let index = self.loader.load().await?;
        match index.len().await {
            Ok(n) => tracing::info!("Vector index loaded: {} vectors", n),
            Err(e) => tracing::warn!("Vector index loaded but count failed: {}", e),
        }
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Drops the cached handle; the next [`get`](Self::get) reloads.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            tracing::info!("Vector index cache invalidated; will reload on next request");
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Vector count of the cached index, without triggering a load.
    pub async fn cached_len(&self) -> Option<usize> {
        let index = self.slot.lock().await.clone()?;
        index.len().await.ok()
    }

    pub fn index_exists(&self) -> bool {
        self.loader.exists()
    }
}
