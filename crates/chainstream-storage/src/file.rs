//! JSON file cursor store.
//!
//! All keys share one document. Writes go to a sibling temp file that is
//! renamed over the original, so a crash mid-write leaves the previous
//! document intact.
//!
//! ```rust,no_run
//! use chainstream_storage::file::FileCursorStore;
//!
//! let store = FileCursorStore::new("./cursors.json");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use chainstream_core::cursor::{is_advance, CursorKey, CursorRecord, CursorStore, SaveOutcome};
use chainstream_core::error::CursorError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    cursors: Vec<CursorRecord>,
}

impl Document {
    fn get(&self, key: &CursorKey) -> Option<&CursorRecord> {
        self.cursors.iter().find(|r| &r.key == key)
    }

    fn put(&mut self, record: CursorRecord) {
        match self.cursors.iter_mut().find(|r| r.key == record.key) {
            Some(slot) => *slot = record,
            None => self.cursors.push(record),
        }
    }
}

/// Cursor store backed by a single JSON file.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Document, CursorError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => return Err(storage(&self.path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| CursorError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    async fn write(&self, doc: &Document) -> Result<(), CursorError> {
        let json = serde_json::to_vec_pretty(doc).map_err(|e| CursorError::Storage(e.to_string()))?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| storage(dir, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| storage(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| storage(&self.path, e))
    }
}

fn storage(path: &Path, e: std::io::Error) -> CursorError {
    CursorError::Storage(format!("{}: {e}", path.display()))
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, key: &CursorKey) -> Result<Option<CursorRecord>, CursorError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.get(key).cloned())
    }

    async fn save(&self, record: CursorRecord) -> Result<SaveOutcome, CursorError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        if !is_advance(doc.get(&record.key).map(|r| &r.cursor), &record.cursor) {
            return Ok(SaveOutcome::Stale);
        }
        let (key, block) = (record.key.clone(), record.cursor.block_number);
        doc.put(record);
        self.write(&doc).await?;
        debug!(%key, block, "cursor saved");
        Ok(SaveOutcome::Saved)
    }

    async fn rewind(&self, record: CursorRecord) -> Result<(), CursorError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        let (key, block) = (record.key.clone(), record.cursor.block_number);
        doc.put(record);
        self.write(&doc).await?;
        debug!(%key, block, "cursor rewound");
        Ok(())
    }

    async fn delete(&self, key: &CursorKey) -> Result<(), CursorError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        let before = doc.cursors.len();
        doc.cursors.retain(|r| &r.key != key);
        if doc.cursors.len() != before {
            self.write(&doc).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstream_core::types::Cursor;

    fn key() -> CursorKey {
        CursorKey::new("pump.spkg.json", "map_program_data", "solana")
    }

    fn record(key: CursorKey, token: &str, block: u64) -> CursorRecord {
        CursorRecord {
            key,
            cursor: Cursor::new(token, block),
            updated_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursors.json"));
        assert!(store.load(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cursors.json");

        let store = FileCursorStore::new(&path);
        assert_eq!(store.save(record(key(), "c100", 100)).await.unwrap(), SaveOutcome::Saved);
        drop(store);

        let reopened = FileCursorStore::new(&path);
        let loaded = reopened.load(&key()).await.unwrap().unwrap();
        assert_eq!(loaded.cursor, Cursor::new("c100", 100));
        assert_eq!(loaded.updated_at, 1_700_000_000);
    }

    #[tokio::test]
    async fn monotonic_save_and_rewind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursors.json"));

        store.save(record(key(), "c205", 205)).await.unwrap();
        assert_eq!(store.save(record(key(), "c150", 150)).await.unwrap(), SaveOutcome::Stale);
        assert_eq!(store.load(&key()).await.unwrap().unwrap().cursor.block_number, 205);

        store.rewind(record(key(), "c199", 199)).await.unwrap();
        assert_eq!(store.load(&key()).await.unwrap().unwrap().cursor.block_number, 199);
    }

    #[tokio::test]
    async fn keys_share_one_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursors.json"));
        let other = CursorKey::new("pump.spkg.json", "map_program_data", "devnet");

        store.save(record(key(), "a", 1)).await.unwrap();
        store.save(record(other.clone(), "b", 2)).await.unwrap();
        store.delete(&key()).await.unwrap();

        assert!(store.load(&key()).await.unwrap().is_none());
        assert_eq!(store.load(&other).await.unwrap().unwrap().cursor.token, "b");
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileCursorStore::new(&path).load(&key()).await.unwrap_err();
        assert!(matches!(err, CursorError::Corrupt(_)));
    }
}
