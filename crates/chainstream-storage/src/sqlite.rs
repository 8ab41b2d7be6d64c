//! SQLite cursor store.
//!
//! One row per `(chain, package, module)`. The monotonic rule is enforced in
//! the upsert itself, so concurrent writers cannot move a cursor backwards.
//!
//! # Usage
//! ```rust,no_run
//! use chainstream_storage::sqlite::SqliteCursorStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCursorStore::open("./cursors.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCursorStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainstream_core::cursor::{CursorKey, CursorRecord, CursorStore, SaveOutcome};
use chainstream_core::error::CursorError;
use chainstream_core::types::Cursor;

/// SQLite-backed cursor store.
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> CursorError {
    CursorError::Storage(e.to_string())
}

impl SqliteCursorStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./cursors.db"`) or a full
    /// SQLite URL (`"sqlite:./cursors.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, CursorError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;

        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// Open an in-memory database. Data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, CursorError> {
        // Every connection to `sqlite::memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), CursorError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursors (
                chain        TEXT    NOT NULL,
                package      TEXT    NOT NULL,
                module       TEXT    NOT NULL,
                token        TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (chain, package, module)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self, key: &CursorKey) -> Result<Option<CursorRecord>, CursorError> {
        let row = sqlx::query(
            "SELECT token, block_number, updated_at
             FROM cursors WHERE chain = ? AND package = ? AND module = ?",
        )
        .bind(&key.chain)
        .bind(&key.package)
        .bind(&key.module)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| {
            let block: i64 = r.get("block_number");
            let block = u64::try_from(block)
                .map_err(|_| CursorError::Corrupt(format!("negative block number {block} for {key}")))?;
            Ok(CursorRecord {
                key: key.clone(),
                cursor: Cursor::new(r.get::<String, _>("token"), block),
                updated_at: r.get("updated_at"),
            })
        })
        .transpose()
    }

    async fn save(&self, record: CursorRecord) -> Result<SaveOutcome, CursorError> {
        let result = sqlx::query(
            "INSERT INTO cursors (chain, package, module, token, block_number, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (chain, package, module) DO UPDATE SET
                token        = excluded.token,
                block_number = excluded.block_number,
                updated_at   = excluded.updated_at
             WHERE excluded.block_number >= cursors.block_number",
        )
        .bind(&record.key.chain)
        .bind(&record.key.package)
        .bind(&record.key.module)
        .bind(&record.cursor.token)
        .bind(record.cursor.block_number as i64)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Ok(SaveOutcome::Stale);
        }
        debug!(key = %record.key, block = record.cursor.block_number, "cursor saved");
        Ok(SaveOutcome::Saved)
    }

    async fn rewind(&self, record: CursorRecord) -> Result<(), CursorError> {
        sqlx::query(
            "INSERT OR REPLACE INTO cursors
             (chain, package, module, token, block_number, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.key.chain)
        .bind(&record.key.package)
        .bind(&record.key.module)
        .bind(&record.cursor.token)
        .bind(record.cursor.block_number as i64)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(key = %record.key, block = record.cursor.block_number, "cursor rewound");
        Ok(())
    }

    async fn delete(&self, key: &CursorKey) -> Result<(), CursorError> {
        sqlx::query("DELETE FROM cursors WHERE chain = ? AND package = ? AND module = ?")
            .bind(&key.chain)
            .bind(&key.package)
            .bind(&key.module)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
