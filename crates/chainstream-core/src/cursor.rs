//! Cursor persistence: the resumption point for crash recovery and reconnects.
//!
//! Saves are monotonic: a cursor whose block is behind the stored one is
//! ignored and reported as [`SaveOutcome::Stale`]. The only backward move is
//! an explicit [`CursorStore::rewind`], issued after an undo signal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::CursorError;
use crate::types::Cursor;

/// Identifies one stream: the same package/module on the same chain shares
/// its resumption point across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorKey {
    pub package: String,
    pub module: String,
    pub chain: String,
}

impl CursorKey {
    pub fn new(
        package: impl Into<String>,
        module: impl Into<String>,
        chain: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            module: module.into(),
            chain: chain.into(),
        }
    }
}

impl fmt::Display for CursorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain, self.package, self.module)
    }
}

/// A persisted cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub key: CursorKey,
    pub cursor: Cursor,
    /// Unix timestamp of the write.
    pub updated_at: i64,
}

/// Result of a monotonic save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The store already holds a cursor further ahead; nothing was written.
    Stale,
}

/// Returns `true` if `next` may replace `current` under monotonic saves.
pub fn is_advance(current: Option<&Cursor>, next: &Cursor) -> bool {
    current.map_or(true, |c| !next.is_behind(c))
}

/// Storage backend for cursors.
///
/// Implementations: [`MemoryCursorStore`] here, plus the file and SQLite
/// stores in `chainstream-storage`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, key: &CursorKey) -> Result<Option<CursorRecord>, CursorError>;

    /// Monotonic upsert.
    async fn save(&self, record: CursorRecord) -> Result<SaveOutcome, CursorError>;

    /// Unconditional overwrite, used to move the cursor back after a reorg.
    async fn rewind(&self, record: CursorRecord) -> Result<(), CursorError>;

    async fn delete(&self, key: &CursorKey) -> Result<(), CursorError>;
}

/// Binds a store to one [`CursorKey`].
#[derive(Clone)]
pub struct CursorManager {
    store: Arc<dyn CursorStore>,
    key: CursorKey,
}

impl fmt::Debug for CursorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorManager").field("key", &self.key).finish()
    }
}

impl CursorManager {
    pub fn new(store: Arc<dyn CursorStore>, key: CursorKey) -> Self {
        Self { store, key }
    }

    pub fn key(&self) -> &CursorKey {
        &self.key
    }

    /// Load the saved cursor (`None` if the stream never made progress).
    pub async fn load(&self) -> Result<Option<Cursor>, CursorError> {
        Ok(self.store.load(&self.key).await?.map(|r| r.cursor))
    }

    pub async fn save(&self, cursor: &Cursor) -> Result<SaveOutcome, CursorError> {
        self.store.save(self.record(cursor)).await
    }

    pub async fn rewind(&self, cursor: &Cursor) -> Result<(), CursorError> {
        self.store.rewind(self.record(cursor)).await
    }

    /// Forget the resumption point; the next session starts from its start block.
    pub async fn reset(&self) -> Result<(), CursorError> {
        self.store.delete(&self.key).await
    }

    fn record(&self, cursor: &Cursor) -> CursorRecord {
        CursorRecord {
            key: self.key.clone(),
            cursor: cursor.clone(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory cursor store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    data: Mutex<HashMap<CursorKey, CursorRecord>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, key: &CursorKey) -> Result<Option<CursorRecord>, CursorError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn save(&self, record: CursorRecord) -> Result<SaveOutcome, CursorError> {
        let mut data = self.data.lock().unwrap();
        if !is_advance(data.get(&record.key).map(|r| &r.cursor), &record.cursor) {
            return Ok(SaveOutcome::Stale);
        }
        data.insert(record.key.clone(), record);
        Ok(SaveOutcome::Saved)
    }

    async fn rewind(&self, record: CursorRecord) -> Result<(), CursorError> {
        self.data.lock().unwrap().insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete(&self, key: &CursorKey) -> Result<(), CursorError> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> CursorManager {
        CursorManager::new(
            Arc::new(MemoryCursorStore::new()),
            CursorKey::new("pump-fun", "map_program_data", "solana"),
        )
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let mgr = manager();
        assert!(mgr.load().await.unwrap().is_none());

        assert_eq!(mgr.save(&Cursor::new("c100", 100)).await.unwrap(), SaveOutcome::Saved);
        assert_eq!(mgr.load().await.unwrap(), Some(Cursor::new("c100", 100)));
    }

    #[tokio::test]
    async fn older_save_is_stale() {
        let mgr = manager();
        mgr.save(&Cursor::new("c200", 200)).await.unwrap();

        assert_eq!(mgr.save(&Cursor::new("c150", 150)).await.unwrap(), SaveOutcome::Stale);
        assert_eq!(mgr.load().await.unwrap(), Some(Cursor::new("c200", 200)));

        // Same block with a fresh token is not a regression.
        assert_eq!(mgr.save(&Cursor::new("c200b", 200)).await.unwrap(), SaveOutcome::Saved);
        assert_eq!(mgr.load().await.unwrap().unwrap().token, "c200b");
    }

    #[tokio::test]
    async fn rewind_moves_back() {
        let mgr = manager();
        mgr.save(&Cursor::new("c205", 205)).await.unwrap();
        mgr.rewind(&Cursor::new("c199", 199)).await.unwrap();
        assert_eq!(mgr.load().await.unwrap(), Some(Cursor::new("c199", 199)));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store: Arc<dyn CursorStore> = Arc::new(MemoryCursorStore::new());
        let a = CursorManager::new(store.clone(), CursorKey::new("p", "m", "solana"));
        let b = CursorManager::new(store, CursorKey::new("p", "m", "devnet"));

        a.save(&Cursor::new("a", 10)).await.unwrap();
        assert!(b.load().await.unwrap().is_none());

        a.reset().await.unwrap();
        assert!(a.load().await.unwrap().is_none());
    }
}
