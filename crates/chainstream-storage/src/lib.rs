//! chainstream-storage: durable cursor stores for ChainStream.
//!
//! Backends:
//! - [`file`]: one JSON document on disk (default)
//! - [`sqlite`]: SQLite via `sqlx` (`sqlite` feature)
//!
//! Both enforce monotonic saves; the in-memory store lives in
//! `chainstream_core::cursor`.

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "file")]
pub use file::FileCursorStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;
