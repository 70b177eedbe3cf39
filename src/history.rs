//! History of generated articles.
//!
//! [`HistoryStore`] is the boundary the pipeline saves finished articles
//! through. Three implementations:
//!
//! - [`MemoryHistoryStore`]: bounded, newest first, oldest evicted
//! - [`JsonFileHistoryStore`]: the same, persisted to one JSON file
//! - [`FallbackHistoryStore`]: a primary store backed by a second one that
//!   takes over whenever the primary errors

use crate::error::Result;
use crate::state::{FinalArtifact, PipelineParameters};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Records kept when nothing else is configured.
pub const DEFAULT_MAX_RECORDS: usize = 10;

/// Capacity from `CONTENT_PIPELINE_MAX_HISTORY`, or [`DEFAULT_MAX_RECORDS`]
/// when unset or not a positive integer.
pub fn max_records_from_env() -> usize {
    parse_max_records(std::env::var("CONTENT_PIPELINE_MAX_HISTORY").ok().as_deref())
}

fn parse_max_records(value: Option<&str>) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MAX_RECORDS)
}

/// One saved article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub content: String,
    pub parameters: PipelineParameters,
    pub duration_ms: u64,
    pub model_used: String,
}

impl HistoryRecord {
    /// New record with a fresh UUID v4 id.
    pub fn from_artifact(artifact: &FinalArtifact, parameters: &PipelineParameters) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: artifact.metadata.generated_at,
            title: artifact.title.clone(),
            content: artifact.content.clone(),
            parameters: parameters.clone(),
            duration_ms: artifact.metadata.duration_ms,
            model_used: artifact.metadata.model_used.clone(),
        }
    }
}

/// Storage for [`HistoryRecord`]s.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Save a record and return its id.
    async fn save(&self, record: HistoryRecord) -> Result<String>;

    /// Up to `limit` records, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<HistoryRecord>>;

    async fn get(&self, id: &str) -> Result<Option<HistoryRecord>>;

    /// Returns `true` if a record was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Insert newest first and evict past `capacity`.
fn push_bounded(records: &mut VecDeque<HistoryRecord>, record: HistoryRecord, capacity: usize) {
    records.push_front(record);
    records.truncate(capacity);
}

fn newest_first(records: &VecDeque<HistoryRecord>, limit: usize) -> Vec<HistoryRecord> {
    let mut sorted: Vec<HistoryRecord> = records.iter().cloned().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted.truncate(limit);
    sorted
}

/// In-memory store holding at most `capacity` records.
#[derive(Debug)]
pub struct MemoryHistoryStore {
    records: Mutex<VecDeque<HistoryRecord>>,
    capacity: usize,
}

/// Capacity from `CONTENT_PIPELINE_MAX_HISTORY`.
impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new(max_records_from_env())
    }
}

impl MemoryHistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<HistoryRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn save(&self, record: HistoryRecord) -> Result<String> {
        let id = record.id.clone();
        push_bounded(&mut self.lock(), record, self.capacity);
        Ok(id)
    }

    async fn list(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        Ok(newest_first(&self.lock(), limit))
    }

    async fn get(&self, id: &str) -> Result<Option<HistoryRecord>> {
        Ok(self.lock().iter().find(|r| r.id == id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Store persisted as a JSON array in a single file.
///
/// A missing file reads as empty. Every write rewrites the whole file.
#[derive(Debug)]
pub struct JsonFileHistoryStore {
    path: PathBuf,
    capacity: usize,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileHistoryStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Store at `path` with its capacity from `CONTENT_PIPELINE_MAX_HISTORY`.
    pub fn from_env(path: impl Into<PathBuf>) -> Self {
        Self::new(path, max_records_from_env())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<VecDeque<HistoryRecord>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(VecDeque::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VecDeque::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, records: &VecDeque<HistoryRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, text).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonFileHistoryStore {
    async fn save(&self, record: HistoryRecord) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let id = record.id.clone();
        let mut records = self.load().await?;
        push_bounded(&mut records, record, self.capacity);
        self.store(&records).await?;
        tracing::debug!(path = %self.path.display(), id = %id, "saved history record");
        Ok(id)
    }

    async fn list(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        Ok(newest_first(&self.load().await?, limit))
    }

    async fn get(&self, id: &str) -> Result<Option<HistoryRecord>> {
        Ok(self.load().await?.into_iter().find(|r| r.id == id))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.store(&records).await?;
        Ok(true)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store(&VecDeque::new()).await
    }

    fn name(&self) -> &'static str {
        "json-file"
    }
}

/// Uses `primary`, switching to `fallback` for any operation the primary fails.
pub struct FallbackHistoryStore {
    primary: Arc<dyn HistoryStore>,
    fallback: Arc<dyn HistoryStore>,
}

impl FallbackHistoryStore {
    pub fn new(primary: Arc<dyn HistoryStore>, fallback: Arc<dyn HistoryStore>) -> Self {
        Self { primary, fallback }
    }

    fn log_fallback(&self, op: &str, error: &crate::PipelineError) {
        tracing::warn!(
            op,
            primary = self.primary.name(),
            fallback = self.fallback.name(),
            error = %error,
            "history store unavailable, using fallback"
        );
    }
}

#[async_trait]
impl HistoryStore for FallbackHistoryStore {
    async fn save(&self, record: HistoryRecord) -> Result<String> {
        match self.primary.save(record.clone()).await {
            Ok(id) => Ok(id),
            Err(e) => {
                self.log_fallback("save", &e);
                self.fallback.save(record).await
            }
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        match self.primary.list(limit).await {
            Ok(records) => Ok(records),
            Err(e) => {
                self.log_fallback("list", &e);
                self.fallback.list(limit).await
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<HistoryRecord>> {
        match self.primary.get(id).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.log_fallback("get", &e);
                self.fallback.get(id).await
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        match self.primary.delete(id).await {
            Ok(deleted) => Ok(deleted),
            Err(e) => {
                self.log_fallback("delete", &e);
                self.fallback.delete(id).await
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        match self.primary.clear().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.log_fallback("clear", &e);
                self.fallback.clear().await
            }
        }
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
