//! Database models
//!
//! Records mirroring the `Books`, `Issuances` and `Fines` tables. Identifiers
//! and timestamps are assigned by the database; a record that has not been
//! stored yet carries `id == 0` and `None` timestamps.

use crate::core::error::{LibraryError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Book record in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub publisher: Option<String>,
    pub publication_year: Option<i32>,
    pub category: Option<String>,
    pub total_copies: i32,
    pub available_copies: i32,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl Book {
    /// A new, unsaved book with every copy available
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        isbn: impl Into<String>,
        total_copies: i32,
    ) -> Self {
        Self {
            id: 0,
            title: title.into(),
            author: author.into(),
            isbn: isbn.into(),
            publisher: None,
            publication_year: None,
            category: None,
            total_copies,
            available_copies: total_copies,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    pub fn with_publication_year(mut self, year: i32) -> Self {
        self.publication_year = Some(year);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn is_available(&self) -> bool {
        self.available_copies > 0
    }

    /// Check the copy-count invariant: `0 <= available <= total`
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(LibraryError::ValidationError("title cannot be empty".to_string()));
        }
        if self.isbn.trim().is_empty() {
            return Err(LibraryError::ValidationError("isbn cannot be empty".to_string()));
        }
        if self.total_copies < 0 {
            return Err(LibraryError::ValidationError(format!(
                "total_copies cannot be negative (got {})",
                self.total_copies
            )));
        }
        if self.available_copies < 0 || self.available_copies > self.total_copies {
            return Err(LibraryError::ValidationError(format!(
                "available_copies must be between 0 and total_copies ({}), got {}",
                self.total_copies, self.available_copies
            )));
        }
        Ok(())
    }
}

/// Issuance lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuanceStatus {
    Issued,
    Returned,
    Overdue,
}

impl IssuanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuanceStatus::Issued => "ISSUED",
            IssuanceStatus::Returned => "RETURNED",
            IssuanceStatus::Overdue => "OVERDUE",
        }
    }
}

/// Fine settlement state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FineStatus {
    Pending,
    Paid,
}

impl FineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FineStatus::Pending => "PENDING",
            FineStatus::Paid => "PAID",
        }
    }
}

// Statuses are stored as their upper-case spelling.
macro_rules! status_sql {
    ($ty:ty, $($variant:path),+) => {
        impl FromStr for $ty {
            type Err = LibraryError;

            fn from_str(s: &str) -> Result<Self> {
                $(
                    if s == $variant.as_str() {
                        return Ok($variant);
                    }
                )+
                Err(LibraryError::InvalidData(format!(
                    "unknown {} '{}'",
                    stringify!($ty),
                    s
                )))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: LibraryError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

status_sql!(
    IssuanceStatus,
    IssuanceStatus::Issued,
    IssuanceStatus::Returned,
    IssuanceStatus::Overdue
);
status_sql!(FineStatus, FineStatus::Pending, FineStatus::Paid);

/// Issuance record in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuance {
    pub id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub status: IssuanceStatus,
    pub created_at: Option<NaiveDateTime>,
}

impl Issuance {
    /// A new, unsaved issuance in the `ISSUED` state
    pub fn new(book_id: i64, user_id: i64, issue_date: NaiveDate, due_date: NaiveDate) -> Self {
        Self {
            id: 0,
            book_id,
            user_id,
            issue_date,
            due_date,
            return_date: None,
            status: IssuanceStatus::Issued,
            created_at: None,
        }
    }

    /// A loan cannot fall due before it was issued
    pub fn validate(&self) -> Result<()> {
        if self.due_date < self.issue_date {
            return Err(LibraryError::ValidationError(format!(
                "due_date {} is before issue_date {}",
                self.due_date, self.issue_date
            )));
        }
        Ok(())
    }
}

/// Exact monetary amount held in minor units (cents)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_cents(cents: i64) -> Self {
        Amount(cents)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl FromStr for Amount {
    type Err = LibraryError;

    /// Parses `12`, `12.5`, `12.50` or `-0.75`. More than two fractional
    /// digits is rejected rather than rounded.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LibraryError::ValidationError(format!("invalid amount '{}'", s));

        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(frac) || frac.len() > 2 {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };

        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .ok_or_else(invalid)?;
        Ok(Amount(if negative { -cents } else { cents }))
    }
}

impl Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl ToSql for Amount {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Amount {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(Amount)
    }
}

/// Fine record in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fine {
    pub id: i64,
    pub issuance_id: i64,
    pub amount: Amount,
    pub status: FineStatus,
    pub created_at: Option<NaiveDateTime>,
    pub paid_at: Option<NaiveDateTime>,
}

impl Fine {
    /// A new, unsaved fine in the `PENDING` state
    pub fn new(issuance_id: i64, amount: Amount) -> Self {
        Self {
            id: 0,
            issuance_id,
            amount,
            status: FineStatus::Pending,
            created_at: None,
            paid_at: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.amount.cents() < 0 {
            return Err(LibraryError::ValidationError(format!(
                "fine amount cannot be negative (got {})",
                self.amount
            )));
        }
        Ok(())
    }
}
