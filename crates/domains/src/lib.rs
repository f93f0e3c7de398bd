//! rusty-booru/crates/domains/src/lib.rs
//!
//! The central domain models, query vocabulary, and port definitions for
//! the catalog.

pub mod error;
pub mod models;
pub mod ports;
pub mod query;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use ports::*;
pub use query::*;
