//! rusty-booru/crates/storage-adapters/src/lib.rs
//!
//! Implementations of the `CatalogStore` port. The in-memory catalog is
//! always available and backs the test suite; the SQLite catalog ships
//! behind the `db-sqlite` feature.

pub mod memory;

#[cfg(feature = "db-sqlite")]
pub mod sqlite;

pub use memory::MemoryCatalog;

#[cfg(feature = "db-sqlite")]
pub use sqlite::SqliteCatalog;
