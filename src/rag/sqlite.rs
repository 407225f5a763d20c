//! SQLite-backed vector index.
//!
//! Chunks, metadata and little-endian f32 embeddings live in one SQLite file;
//! search is a brute-force squared Euclidean scan.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::error::{RagError, Result};
pub use super::store::IndexMeta;
use super::store::{IndexedDocument, SimilarityMapping, VectorIndex};

pub const INDEX_FILE_NAME: &str = "index.db";

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    db_path: PathBuf,
    meta: IndexMeta,
}

impl SqliteVectorIndex {
    /// Opens an existing index read-only.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if !db_path.is_file() {
            return Err(RagError::IndexNotFound(db_path.to_path_buf()));
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| RagError::IndexUnavailable(e.to_string()))?;

        let meta = match read_meta(&pool).await {
            Ok(meta) => meta,
            Err(e) => {
                pool.close().await;
                return Err(RagError::IndexUnavailable(e.to_string()));
            }
        };

        tracing::info!(
            "Opened vector index at {} (model={}, dimension={})",
            db_path.display(),
            meta.embedding_model,
            meta.dimension
        );
        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
            meta,
        })
    }

    /// Writes a fresh index with `items` and atomically replaces `db_path`.
    ///
    /// The new database is built next to the target and renamed over it, so
    /// handles opened on the previous file keep reading consistent data.
    pub async fn build(
        db_path: &Path,
        items: &[(IndexedDocument, Vec<f32>)],
        meta: &IndexMeta,
    ) -> Result<usize> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(RagError::store)?;
        }
        let staging = staging_path(db_path);
        if staging.exists() {
            fs::remove_file(&staging).map_err(RagError::store)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&staging)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(RagError::store)?;

        let written = write_index(&pool, items, meta).await;
        pool.close().await;
        if let Err(e) = written {
            if let Err(rm) = fs::remove_file(&staging) {
                tracing::warn!("Failed to remove {}: {}", staging.display(), rm);
            }
            return Err(e);
        }

        fs::rename(&staging, db_path).map_err(RagError::store)?;
        tracing::info!(
            "Vector index written to {} ({} vectors)",
            db_path.display(),
            items.len()
        );
        Ok(items.len())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Model and dimension recorded when the index was built.
    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }
}

/// Fills a fresh database inside one transaction. Dropping the transaction
/// on error rolls it back.
async fn write_index(
    pool: &SqlitePool,
    items: &[(IndexedDocument, Vec<f32>)],
    meta: &IndexMeta,
) -> Result<()> {
    init_schema(pool).await?;

    let mut tx = pool.begin().await.map_err(RagError::store)?;
    for (ordinal, (doc, embedding)) in items.iter().enumerate() {
        if embedding.len() != meta.dimension {
            return Err(RagError::Store(format!(
                "embedding dimension mismatch: expected {}, got {}",
                meta.dimension,
                embedding.len()
            )));
        }
        let metadata_str =
            serde_json::to_string(&doc.metadata).unwrap_or_else(|_| "{}".to_string());

        sqlx::query(
            "INSERT INTO chunks (chunk_id, content, source, start_index, metadata, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(chunk_id(doc, ordinal))
        .bind(&doc.text)
        .bind(doc.source())
        .bind(doc.start_index().map(|v| v as i64))
        .bind(&metadata_str)
        .bind(serialize_embedding(embedding))
        .execute(&mut *tx)
        .await
        .map_err(RagError::store)?;
    }

    for (key, value) in [
        ("embedding_model", meta.embedding_model.clone()),
        ("dimension", meta.dimension.to_string()),
    ] {
        sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(RagError::store)?;
    }

    tx.commit().await.map_err(RagError::store)?;
    Ok(())
}

async fn read_meta(pool: &SqlitePool) -> Result<IndexMeta> {
    let rows = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await
        .map_err(RagError::store)?;

    let mut meta = IndexMeta {
        embedding_model: String::new(),
        dimension: 0,
    };
    for row in rows {
        let key: String = row.get("key");
        let value: String = row.get("value");
        match key.as_str() {
            "embedding_model" => meta.embedding_model = value,
            "dimension" => meta.dimension = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    Ok(meta)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            source TEXT,
            start_index INTEGER,
            metadata TEXT DEFAULT '{}',
            embedding BLOB NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(RagError::store)?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(RagError::store)?;

    Ok(())
}

fn staging_path(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| INDEX_FILE_NAME.into());
    name.push(".building");
    db_path.with_file_name(name)
}

fn chunk_id(doc: &IndexedDocument, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc.source().unwrap_or_default().as_bytes());
    hasher.update(b":");
    hasher.update(ordinal.to_le_bytes());
    hasher.update(b":");
    hasher.update(doc.text.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> IndexedDocument {
    let metadata_str: Option<String> = row.get("metadata");
    let mut metadata = metadata_str
        .and_then(|s| serde_json::from_str::<Map<String, Value>>(&s).ok())
        .unwrap_or_default();

    let source: Option<String> = row.get("source");
    if let Some(source) = source {
        metadata.insert("source".to_string(), Value::String(source));
    }
    let start_index: Option<i64> = row.get("start_index");
    if let Some(start) = start_index {
        metadata.insert("start_index".to_string(), Value::from(start));
    }

    IndexedDocument {
        text: row.get("content"),
        metadata,
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(IndexedDocument, f32)>> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT content, source, start_index, metadata, embedding
             FROM chunks
             ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::store)?;

        let mut scored = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let embedding_bytes: Vec<u8> = row.get("embedding");
            let stored = deserialize_embedding(&embedding_bytes);
            if stored.len() != query.len() {
                return Err(RagError::Store(format!(
                    "query has {} dimensions but the index stores {}-dimensional vectors",
                    query.len(),
                    stored.len()
                )));
            }
            let distance = squared_l2(query, &stored);
            // NaN ranks last.
            let distance = if distance.is_nan() { f32::INFINITY } else { distance };
            scored.push((idx, distance));
        }

        // Stable: equal distances keep insertion order.
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(idx, distance)| (row_to_document(&rows[idx]), distance))
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::store)?;
        Ok(count as usize)
    }

    fn mapping(&self) -> SimilarityMapping {
        SimilarityMapping::L2Squared
    }

    fn built_with(&self) -> Option<IndexMeta> {
        Some(self.meta.clone())
    }
}
