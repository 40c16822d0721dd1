use crate::background::spawn_best_effort;
use crate::errors::{AppError, AppResult};
use crate::models::HistoryEntry;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Bounded, ordered log of past invocations mirrored to a JSON file.
///
/// Cloning yields another handle onto the same log.
#[derive(Clone)]
pub struct HistoryLog {
    inner: Arc<HistoryInner>,
}

struct HistoryInner {
    entries: Mutex<VecDeque<HistoryEntry>>,
    path: PathBuf,
    max_size: usize,
    save_lock: tokio::sync::Mutex<()>,
}

impl HistoryLog {
    /// Reads the durable log. A missing or unreadable file starts an empty log
    /// and writes the empty state back.
    pub async fn load(path: &Path, max_size: usize) -> AppResult<Self> {
        let max_size = max_size.max(1);
        let entries = match read_entries(path).await {
            Ok(entries) => {
                let skip = entries.len().saturating_sub(max_size);
                Some(entries.into_iter().skip(skip).collect::<VecDeque<_>>())
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "history file unusable; starting with an empty history"
                );
                None
            }
        };

        let healed = entries.is_none();
        let log = Self {
            inner: Arc::new(HistoryInner {
                entries: Mutex::new(entries.unwrap_or_default()),
                path: path.to_path_buf(),
                max_size,
                save_lock: tokio::sync::Mutex::new(()),
            }),
        };

        if healed {
            if let Err(error) = log.save().await {
                tracing::warn!(error = %error, "failed to write empty history");
            }
        }

        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Adds an entry, evicting the oldest beyond the bound, and schedules a
    /// durable save without waiting for it.
    pub fn append(&self, entry: HistoryEntry) {
        if let Ok(mut entries) = self.inner.entries.lock() {
            entries.push_back(entry);
            while entries.len() > self.inner.max_size {
                entries.pop_front();
            }
        }
        self.schedule_save();
    }

    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let entries = self.snapshot();
        let skip = entries.len().saturating_sub(n);
        entries.into_iter().skip(skip).collect()
    }

    pub fn recent_commands(&self, n: usize) -> Vec<String> {
        self.recent(n).into_iter().map(|entry| entry.command).collect()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.inner.entries.lock() {
            entries.clear();
        }
        self.schedule_save();
    }

    /// Waits until the current state is on disk.
    pub async fn flush(&self) -> AppResult<()> {
        self.save().await
    }

    fn schedule_save(&self) {
        let log = self.clone();
        spawn_best_effort("history-save", async move { log.save().await });
    }

    async fn save(&self) -> AppResult<()> {
        // The snapshot is taken under the save lock so a later save can never
        // be overwritten by an earlier one.
        let _guard = self.inner.save_lock.lock().await;
        let snapshot = self.snapshot();
        let payload = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.inner.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.inner.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, payload).await?;
        tokio::fs::rename(&tmp_path, &self.inner.path).await?;
        tracing::trace!(entries = snapshot.len(), "history saved");
        Ok(())
    }

    fn snapshot(&self) -> Vec<HistoryEntry> {
        self.inner
            .entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

async fn read_entries(path: &Path) -> AppResult<Vec<HistoryEntry>> {
    let raw = tokio::fs::read_to_string(path).await?;
    if raw.trim().is_empty() {
        return Err(AppError::Internal("history file is empty".to_string()));
    }
    Ok(serde_json::from_str(&raw)?)
}
