//! SQLite-backed implementations of the durable ports.

mod sqlite;

pub use sqlite::SqliteContextStore;
