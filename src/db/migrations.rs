//! Database migrations
//!
//! Versioned schema changes tracked in `schema_migrations`. Each version is
//! applied in its own transaction together with its bookkeeping row.

use crate::core::error::Result;
use rusqlite::Connection;
use tracing::{info, warn};

/// Migration version tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// Catalogue, loans and fines (version 1)
const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS Books (
    book_id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    author TEXT NOT NULL,
    isbn TEXT NOT NULL UNIQUE,
    publisher TEXT,
    publication_year INTEGER,
    category TEXT,
    total_copies INTEGER NOT NULL DEFAULT 0,
    available_copies INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    CHECK (total_copies >= 0),
    CHECK (available_copies >= 0 AND available_copies <= total_copies)
);

CREATE TABLE IF NOT EXISTS Issuances (
    issuance_id INTEGER PRIMARY KEY AUTOINCREMENT,
    book_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    issue_date DATE NOT NULL,
    due_date DATE NOT NULL,
    return_date DATE,
    status TEXT NOT NULL DEFAULT 'ISSUED'
        CHECK (status IN ('ISSUED', 'RETURNED', 'OVERDUE')),
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (book_id) REFERENCES Books(book_id)
);

CREATE TABLE IF NOT EXISTS Fines (
    fine_id INTEGER PRIMARY KEY AUTOINCREMENT,
    issuance_id INTEGER NOT NULL,
    fine_amount INTEGER NOT NULL CHECK (fine_amount >= 0),
    status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (status IN ('PENDING', 'PAID')),
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    paid_at DATETIME,
    FOREIGN KEY (issuance_id) REFERENCES Issuances(issuance_id)
);

CREATE INDEX IF NOT EXISTS idx_books_title ON Books(title);
CREATE INDEX IF NOT EXISTS idx_books_available ON Books(available_copies);
CREATE INDEX IF NOT EXISTS idx_issuances_book_id ON Issuances(book_id);
CREATE INDEX IF NOT EXISTS idx_issuances_user_id ON Issuances(user_id);
CREATE INDEX IF NOT EXISTS idx_issuances_status ON Issuances(status);
CREATE INDEX IF NOT EXISTS idx_fines_issuance_id ON Fines(issuance_id);
CREATE INDEX IF NOT EXISTS idx_fines_status ON Fines(status);
"#;

/// Ordered list of every migration; versions must be strictly increasing
const MIGRATIONS: &[(i64, &str, &str)] = &[(1, "Library catalogue schema", MIGRATION_V1)];

/// Latest schema version this build knows about
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(version, _, _)| *version).unwrap_or(0)
}

/// Current schema version recorded in the database
pub fn current_version(conn: &Connection) -> Result<i64> {
    conn.execute_batch(MIGRATION_TABLE)?;
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply every pending migration; returns how many were applied
pub fn run_migrations(conn: &mut Connection) -> Result<usize> {
    info!("Running database migrations");

    let current = current_version(conn)?;
    info!("Current database schema version: {}", current);

    let mut applied = 0;
    for (version, description, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        info!("Applying migration v{}: {}", version, description);
        apply_migration(conn, *version, sql)?;
        applied += 1;
    }

    info!(applied, "Database migrations completed successfully");
    Ok(applied)
}

fn apply_migration(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(sql).map_err(|e| {
        warn!("Migration v{} failed: {}", version, e);
        e
    })?;
    tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])?;
    tx.commit()?;

    info!("Migration v{} applied successfully", version);
    Ok(())
}
