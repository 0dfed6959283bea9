//! Library Store
//!
//! Persistence layer for a library catalogue: books, loans (issuances) and
//! fines stored in SQLite behind a pooled connection provider.

pub mod core;
pub mod db;

// Re-export commonly used types
pub use crate::core::{Config, LibraryError};
pub use db::{BookRepository, DatabaseManager, FineRepository, IssuanceRepository, Repository};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
