//! Configuration management

use clap::{Args, Parser, Subcommand};
use config::builder::DefaultState;
use config::{Config as RawConfig, ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// The only driver this crate ships with
pub const SQLITE_DRIVER: &str = "sqlite";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidPool(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: LIBRARY_DATABASE__POOL__MAX_TOTAL=40
        builder = builder.add_source(
            Environment::with_prefix("LIBRARY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = &cli_args.database {
            builder = builder.set_override("database.url", url.clone())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = Self::defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults. `database.url` has none.
    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Ok(RawConfig::builder()
            .set_default("database.driver", SQLITE_DRIVER)?
            .set_default("database.busy_timeout_ms", 5000)?
            .set_default("database.pool.initial_size", 5)?
            .set_default("database.pool.max_total", 20)?
            .set_default("database.pool.max_idle", 10)?
            .set_default("database.pool.min_idle", 5)?
            .set_default("database.pool.max_wait_ms", 30000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("logging.output", "stdout")?
            .set_default("logging.max_file_size", 10485760)? // 10 MB
            .set_default("logging.max_backups", 5)?)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "library-store")]
#[command(about = "Library catalogue data store", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Database URL, e.g. sqlite://./data/library.db
    #[arg(short, long, value_name = "URL", global = true)]
    pub database: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Print connection pool status
    Status,
    /// Query the book catalogue
    Books(BooksArgs),
}

#[derive(Debug, Args)]
pub struct BooksArgs {
    #[command(subcommand)]
    pub action: BooksAction,
}

#[derive(Debug, Subcommand)]
pub enum BooksAction {
    /// List every book ordered by title
    List,
    /// List books with at least one available copy
    Available,
    /// Search title, author, ISBN and category
    Search { keyword: String },
    /// Show a single book
    Show { id: i64 },
}

#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub driver: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub busy_timeout_ms: u64,
    pub pool: PoolConfig,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("pool", &self.pool)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver != SQLITE_DRIVER {
            return Err(ConfigError::InvalidDatabase(format!(
                "unsupported driver '{}', expected '{}'",
                self.driver, SQLITE_DRIVER
            )));
        }

        if self.url.trim().is_empty() {
            return Err(ConfigError::InvalidDatabase("url cannot be empty".to_string()));
        }

        DatabaseTarget::parse(&self.url)?;

        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::InvalidDatabase(
                "busy_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.pool.validate()
    }

    pub fn target(&self) -> Result<DatabaseTarget, ConfigError> {
        DatabaseTarget::parse(&self.url)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Where the database lives, decoded from the configured URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    File(PathBuf),
    Memory,
}

impl DatabaseTarget {
    /// Accepts `sqlite://path`, `sqlite:path`, `sqlite::memory:`, `:memory:`
    /// or a bare file path.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let url = url.trim();
        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        if rest == ":memory:" {
            return Ok(DatabaseTarget::Memory);
        }

        if rest.is_empty() {
            return Err(ConfigError::InvalidDatabase(format!(
                "url '{}' does not name a database file",
                url
            )));
        }

        if let Some((scheme, _)) = rest.split_once("://") {
            return Err(ConfigError::InvalidDatabase(format!(
                "unsupported url scheme '{}'",
                scheme
            )));
        }

        Ok(DatabaseTarget::File(PathBuf::from(rest)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Connections opened when the pool is built
    pub initial_size: u32,
    /// Hard cap on open connections
    pub max_total: u32,
    /// Idle connections above this are closed on release
    pub max_idle: u32,
    /// Idle connections the pool keeps open
    pub min_idle: u32,
    /// How long `get_connection` blocks before failing
    pub max_wait_ms: u64,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_total == 0 {
            return Err(ConfigError::InvalidPool("max_total must be greater than 0".to_string()));
        }

        if self.max_idle > self.max_total {
            return Err(ConfigError::InvalidPool(format!(
                "max_idle ({}) cannot exceed max_total ({})",
                self.max_idle, self.max_total
            )));
        }

        if self.min_idle > self.max_idle {
            return Err(ConfigError::InvalidPool(format!(
                "min_idle ({}) cannot exceed max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }

        if self.initial_size > self.max_total {
            return Err(ConfigError::InvalidPool(format!(
                "initial_size ({}) cannot exceed max_total ({})",
                self.initial_size, self.max_total
            )));
        }

        if self.max_wait_ms == 0 {
            return Err(ConfigError::InvalidPool("max_wait_ms must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize, // bytes
    pub max_backups: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidLogging("max_file_size must be greater than 0".to_string()));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging("max_backups must be greater than 0".to_string()));
        }

        Ok(())
    }
}
