//! Library Store command-line tool
//!
//! Applies migrations and queries the book catalogue, printing JSON.

use library_store::core::{self, CliArgs};
use library_store::core::config::{BooksAction, Command};
use library_store::db::{BookRepository, DatabaseManager, Repository};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();

    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::Config::load(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting Library Store v{}", library_store::VERSION);
    info!(database = ?config.database, "Database configuration");

    let db = Arc::new(DatabaseManager::new(&config.database).context("Failed to open database")?);

    match cli.command {
        Command::Migrate => {
            let applied = db.migrate()?;
            print_json(&serde_json::json!({
                "applied": applied,
                "schema_version": db.schema_version()?,
            }))?;
        }
        Command::Status => {
            print_json(&serde_json::json!({
                "database": format!("{:?}", db.target()),
                "schema_version": db.schema_version()?,
                "pool": db.status(),
            }))?;
        }
        Command::Books(args) => {
            db.migrate()?;
            let books = BookRepository::new(db.clone());
            match args.action {
                BooksAction::List => print_json(&books.find_all().await?)?,
                BooksAction::Available => print_json(&books.find_available().await?)?,
                BooksAction::Search { keyword } => print_json(&books.search(&keyword).await?)?,
                BooksAction::Show { id } => match books.find_by_id(id).await? {
                    Some(book) => print_json(&book)?,
                    None => anyhow::bail!("Book {} not found", id),
                },
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
