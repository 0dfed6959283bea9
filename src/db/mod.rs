//! Database module
//!
//! This module provides database management functionality including:
//! - Database connection pool management
//! - Repository pattern implementations
//! - Database migrations
//! - Data models and schemas

pub mod manager;
pub mod models;
pub mod repository;
pub mod migrations;

pub use manager::{DatabaseManager, PoolStatus, PooledConnection};
pub use models::{Amount, Book, Fine, FineStatus, Issuance, IssuanceStatus};
pub use repository::{BookRepository, FineRepository, IssuanceRepository, Repository};
