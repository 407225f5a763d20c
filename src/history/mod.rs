//! Append-only interaction log stored as JSON lines.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::core::errors::ApiError;
use crate::rag::Citation;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Citation>,
    #[serde(default)]
    pub chunks_retrieved: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn answered(
        question: impl Into<String>,
        answer: impl Into<String>,
        sources: Vec<Citation>,
        chunks_retrieved: usize,
    ) -> Self {
        Self {
            timestamp: now_timestamp(),
            question: question.into(),
            answer: answer.into(),
            sources,
            chunks_retrieved,
            error: None,
        }
    }

    pub fn failed(question: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: now_timestamp(),
            question: question.into(),
            answer: String::new(),
            sources: Vec::new(),
            chunks_retrieved: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub total: usize,
}

/// RFC 3339 UTC with second precision, e.g. `2024-05-01T12:00:00Z`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Clamps a requested page size into `1..=MAX_HISTORY_LIMIT`.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

pub struct HistoryLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line. Failures are logged and swallowed.
    pub async fn append(&self, entry: &HistoryEntry) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.append_line(entry).await {
            tracing::warn!("Failed to write history to {}: {}", self.path.display(), e);
        }
    }

    async fn append_line(&self, entry: &HistoryEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// The last `limit` entries, oldest first, plus the total entry count.
    pub async fn recent(&self, limit: usize) -> Result<HistoryPage, ApiError> {
        let _guard = self.lock.lock().await;
        let entries: Vec<HistoryEntry> = self
            .read_lines()
            .await?
            .into_iter()
            .filter_map(|(_, entry)| entry)
            .collect();
        let total = entries.len();
        let skip = total.saturating_sub(limit);
        Ok(HistoryPage {
            entries: entries.into_iter().skip(skip).collect(),
            total,
        })
    }

    /// Removes every entry; returns how many there were.
    pub async fn clear(&self) -> Result<usize, ApiError> {
        let _guard = self.lock.lock().await;
        let removed = self
            .read_lines()
            .await?
            .iter()
            .filter(|(_, entry)| entry.is_some())
            .count();
        match tokio::fs::write(&self.path, b"").await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ApiError::internal(e)),
        }
        tracing::info!("Cleared {} history entries", removed);
        Ok(removed)
    }

    /// Removes the entry at `index` (0-based, file order). Returns `false`
    /// when there is no such entry.
    pub async fn delete(&self, index: usize) -> Result<bool, ApiError> {
        let _guard = self.lock.lock().await;
        let lines = self.read_lines().await?;

        let mut ordinal = 0usize;
        let mut found = false;
        let mut kept = String::new();
        for (raw, entry) in &lines {
            if entry.is_some() {
                if ordinal == index {
                    found = true;
                    ordinal += 1;
                    continue;
                }
                ordinal += 1;
            }
            kept.push_str(raw);
            kept.push('\n');
        }
        if !found {
            return Ok(false);
        }

        let staging = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&staging, kept.as_bytes())
            .await
            .map_err(ApiError::internal)?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(ApiError::internal)?;
        Ok(true)
    }

    /// Non-blank lines with their parsed entry (`None` if malformed).
    async fn read_lines(&self) -> Result<Vec<(String, Option<HistoryEntry>)>, ApiError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ApiError::internal(e)),
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                let entry = match serde_json::from_str::<HistoryEntry>(line) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        tracing::warn!("Skipping malformed history line {}: {}", n + 1, e);
                        None
                    }
                };
                (line.to_string(), entry)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_in(dir: &tempfile::TempDir) -> HistoryLog {
        HistoryLog::new(dir.path().join("history.jsonl"))
    }

    async fn seed(log: &HistoryLog, n: usize) {
        for i in 0..n {
            log.append(&HistoryEntry::answered(format!("q{}", i), format!("a{}", i), Vec::new(), i))
                .await;
        }
    }

    #[test]
    fn timestamps_are_second_precision_utc() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-05-01T12:00:00Z".len());
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(None), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(500)), 100);
        assert_eq!(clamp_limit(Some(25)), 25);
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let page = log_in(&dir).recent(10).await.unwrap();
        assert!(page.entries.is_empty());
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn recent_returns_last_entries_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        seed(&log, 5).await;

        let page = log.recent(2).await.unwrap();
        assert_eq!(page.total, 5);
        let questions: Vec<&str> = page.entries.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["q3", "q4"]);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        seed(&log, 1).await;
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(log.path())
                .unwrap();
            file.write_all(b"{not json\n\n").unwrap();
        }
        seed(&log, 1).await;

        let page = log.recent(10).await.unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn failures_are_recorded_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.append(&HistoryEntry::failed("why?", "index unavailable")).await;

        let page = log.recent(1).await.unwrap();
        assert_eq!(page.entries[0].error.as_deref(), Some("index unavailable"));
        assert_eq!(page.entries[0].chunks_retrieved, 0);
    }

    #[tokio::test]
    async fn clear_reports_removed_count() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        assert_eq!(log.clear().await.unwrap(), 0);
        seed(&log, 3).await;
        assert_eq!(log.clear().await.unwrap(), 3);
        assert_eq!(log.recent(10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn delete_removes_exactly_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        seed(&log, 3).await;

        assert!(log.delete(1).await.unwrap());
        let page = log.recent(10).await.unwrap();
        let questions: Vec<&str> = page.entries.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["q0", "q2"]);

        assert!(!log.delete(7).await.unwrap());
        assert_eq!(log.recent(10).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn append_failure_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().to_path_buf());
        log.append(&HistoryEntry::failed("q", "e")).await;
    }
}
