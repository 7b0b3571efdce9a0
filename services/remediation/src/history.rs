//! Cycle history store
//!
//! A whole-file JSON array of cycles, newest first and capped. Appends are
//! serialized through an async mutex and written to a sibling temp file that
//! is renamed over the original, so readers never see a partial file. A
//! corrupt file is moved aside on the next append and history restarts empty.

use crate::error::HistoryError;
use crate::types::Cycle;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use chrono::Utc;
use tracing::{debug, warn};
use vigil_config::defaults::control_loop::HISTORY_LIMIT;

#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_limit(path, HISTORY_LIMIT)
    }

    pub fn with_limit(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: limit.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// All stored cycles, newest first; a missing file is an empty history
    pub async fn load(&self) -> Result<Vec<Cycle>, HistoryError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Prepend a cycle, dropping the oldest entries beyond the cap
    pub async fn append(&self, cycle: &Cycle) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().await;

        let mut cycles = match self.load().await {
            Ok(cycles) => cycles,
            Err(HistoryError::Corrupt(e)) => {
                let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
                let aside = self.sibling(&format!("corrupt-{}", stamp));
                tokio::fs::rename(&self.path, &aside).await?;
                warn!(
                    "History file {:?} is corrupt ({}), moved to {:?}",
                    self.path, e, aside
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        cycles.insert(0, cycle.clone());
        cycles.truncate(self.limit);

        self.write(&cycles).await?;
        debug!(
            "Recorded cycle {} ({} in history)",
            cycle.id,
            cycles.len()
        );
        Ok(())
    }

    /// Up to `limit` most recent cycles
    pub async fn recent(&self, limit: usize) -> Result<Vec<Cycle>, HistoryError> {
        let mut cycles = self.load().await?;
        cycles.truncate(limit);
        Ok(cycles)
    }

    pub async fn latest(&self) -> Result<Option<Cycle>, HistoryError> {
        Ok(self.load().await?.into_iter().next())
    }

    async fn write(&self, cycles: &[Cycle]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let encoded = serde_json::to_vec_pretty(cycles)?;
        let temp = self.sibling("tmp");
        tokio::fs::write(&temp, encoded).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    /// `<file name>.<suffix>` next to the history file
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "history.json".into());
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn cycle(summary: &str) -> Cycle {
        let mut cycle = Cycle::placeholder();
        cycle.summary = summary.to_string();
        cycle
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("nested/history.json"));

        assert!(store.load().await.unwrap().is_empty());
        assert!(store.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_newest_first() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("nested/history.json"));

        store.append(&cycle("first")).await.unwrap();
        store.append(&cycle("second")).await.unwrap();

        let summaries: Vec<String> = store
            .load()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.summary)
            .collect();
        assert_eq!(summaries, vec!["second", "first"]);
        assert_eq!(store.recent(1).await.unwrap().len(), 1);
        assert!(!store.sibling("tmp").exists());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let dir = tempdir().unwrap();
        let store = Arc::new(HistoryStore::new(dir.path().join("history.json")));

        let handles: Vec<_> = (0..10)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move { store.append(&cycle(&n.to_string())).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.load().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = HistoryStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(HistoryError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_append_recovers_from_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "[{\"truncated\":").unwrap();
        let store = HistoryStore::new(&path);

        store.append(&cycle("after corruption")).await.unwrap();
        store.append(&cycle("next")).await.unwrap();

        let summaries: Vec<String> = store
            .load()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.summary)
            .collect();
        assert_eq!(summaries, vec!["next", "after corruption"]);

        let preserved: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("history.json.corrupt-"))
            .collect();
        assert_eq!(preserved.len(), 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join(&preserved[0])).unwrap(),
            "[{\"truncated\":"
        );
    }
}
