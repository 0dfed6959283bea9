//! Repository pattern implementation for data access layer
//!
//! Each repository is a stateless façade over one table. Every operation
//! borrows a connection from the shared `DatabaseManager`, runs a single
//! parameterized statement in autocommit mode and gives the connection back
//! before returning. Rows are decoded by column name.

use crate::core::error::Result;
use crate::db::manager::DatabaseManager;
use crate::db::models::{Book, Fine, FineStatus, Issuance, IssuanceStatus};
use async_trait::async_trait;
use rusqlite::{OptionalExtension, Row};
use std::sync::Arc;
use tracing::debug;

/// Generic repository trait for CRUD operations
#[async_trait]
pub trait Repository<T>: Send + Sync {
    /// Find an entity by its ID
    async fn find_by_id(&self, id: i64) -> Result<Option<T>>;

    /// Find all entities
    async fn find_all(&self) -> Result<Vec<T>>;

    /// Insert a new entity and return the identifier the database assigned
    async fn create(&self, entity: &T) -> Result<i64>;

    /// Overwrite an existing entity; `false` if no row has its ID
    async fn update(&self, entity: &T) -> Result<bool>;

    /// Delete an entity by its ID; `false` if no row has that ID
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// Escape `LIKE` wildcards so the keyword matches literally (`ESCAPE '\'`)
fn like_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

const BOOK_COLUMNS: &str = "book_id, title, author, isbn, publisher, publication_year, category, \
     total_copies, available_copies, created_at, updated_at";

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get("book_id")?,
        title: row.get("title")?,
        author: row.get("author")?,
        isbn: row.get("isbn")?,
        publisher: row.get("publisher")?,
        publication_year: row.get("publication_year")?,
        category: row.get("category")?,
        total_copies: row.get("total_copies")?,
        available_copies: row.get("available_copies")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Repository for Book entities
pub struct BookRepository {
    db: Arc<DatabaseManager>,
}

impl BookRepository {
    /// Create a new BookRepository
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Books whose title, author, ISBN or category contains `keyword`.
    /// An empty keyword matches every book.
    pub async fn search(&self, keyword: &str) -> Result<Vec<Book>> {
        let pattern = like_pattern(keyword);
        debug!(keyword, "Searching books");
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BOOK_COLUMNS} FROM Books \
                     WHERE title LIKE ?1 ESCAPE '\\' \
                        OR author LIKE ?1 ESCAPE '\\' \
                        OR isbn LIKE ?1 ESCAPE '\\' \
                        OR category LIKE ?1 ESCAPE '\\' \
                     ORDER BY title"
                ))?;
                let books = stmt
                    .query_map([&pattern], book_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(books)
            })
            .await
    }

    /// Books with at least one available copy, ordered by title
    pub async fn find_available(&self) -> Result<Vec<Book>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BOOK_COLUMNS} FROM Books WHERE available_copies > 0 ORDER BY title"
                ))?;
                let books = stmt
                    .query_map([], book_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(books)
            })
            .await
    }

    /// Find a book by its ISBN
    pub async fn find_by_isbn(&self, isbn: &str) -> Result<Option<Book>> {
        let isbn = isbn.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {BOOK_COLUMNS} FROM Books WHERE isbn = ?"),
                        [&isbn],
                        book_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    /// Number of books in the catalogue
    pub async fn count(&self) -> Result<i64> {
        self.db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM Books", [], |row| row.get(0))?))
            .await
    }
}

#[async_trait]
impl Repository<Book> for BookRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Book>> {
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {BOOK_COLUMNS} FROM Books WHERE book_id = ?"),
                        [id],
                        book_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<Book>> {
        self.db
            .execute(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {BOOK_COLUMNS} FROM Books ORDER BY title"))?;
                let books = stmt
                    .query_map([], book_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(books)
            })
            .await
    }

    async fn create(&self, book: &Book) -> Result<i64> {
        book.validate()?;
        let book = book.clone();
        let id = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO Books (title, author, isbn, publisher, publication_year, \
                     category, total_copies, available_copies) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    rusqlite::params![
                        &book.title,
                        &book.author,
                        &book.isbn,
                        &book.publisher,
                        book.publication_year,
                        &book.category,
                        book.total_copies,
                        book.available_copies,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        debug!(book_id = id, "Book created");
        Ok(id)
    }

    async fn update(&self, book: &Book) -> Result<bool> {
        book.validate()?;
        let book = book.clone();
        self.db
            .execute(move |conn| {
                let changed = conn.execute(
                    "UPDATE Books SET title = ?, author = ?, isbn = ?, publisher = ?, \
                     publication_year = ?, category = ?, total_copies = ?, available_copies = ?, \
                     updated_at = CURRENT_TIMESTAMP \
                     WHERE book_id = ?",
                    rusqlite::params![
                        &book.title,
                        &book.author,
                        &book.isbn,
                        &book.publisher,
                        book.publication_year,
                        &book.category,
                        book.total_copies,
                        book.available_copies,
                        book.id,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        self.db
            .execute(move |conn| Ok(conn.execute("DELETE FROM Books WHERE book_id = ?", [id])? > 0))
            .await
    }
}

const ISSUANCE_COLUMNS: &str =
    "issuance_id, book_id, user_id, issue_date, due_date, return_date, status, created_at";

fn issuance_from_row(row: &Row<'_>) -> rusqlite::Result<Issuance> {
    Ok(Issuance {
        id: row.get("issuance_id")?,
        book_id: row.get("book_id")?,
        user_id: row.get("user_id")?,
        issue_date: row.get("issue_date")?,
        due_date: row.get("due_date")?,
        return_date: row.get("return_date")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
    })
}

/// Repository for Issuance entities
pub struct IssuanceRepository {
    db: Arc<DatabaseManager>,
}

impl IssuanceRepository {
    /// Create a new IssuanceRepository
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    async fn find_where(
        &self,
        clause: &'static str,
        value: rusqlite::types::Value,
    ) -> Result<Vec<Issuance>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ISSUANCE_COLUMNS} FROM Issuances WHERE {clause} \
                     ORDER BY issue_date DESC, issuance_id DESC"
                ))?;
                let issuances = stmt
                    .query_map([value], issuance_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(issuances)
            })
            .await
    }

    /// Every issuance of a book, newest first
    pub async fn find_by_book(&self, book_id: i64) -> Result<Vec<Issuance>> {
        self.find_where("book_id = ?", book_id.into()).await
    }

    /// Every issuance to a user, newest first
    pub async fn find_by_user(&self, user_id: i64) -> Result<Vec<Issuance>> {
        self.find_where("user_id = ?", user_id.into()).await
    }

    pub async fn find_by_status(&self, status: IssuanceStatus) -> Result<Vec<Issuance>> {
        self.find_where("status = ?", status.as_str().to_string().into()).await
    }
}

#[async_trait]
impl Repository<Issuance> for IssuanceRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Issuance>> {
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {ISSUANCE_COLUMNS} FROM Issuances WHERE issuance_id = ?"),
                        [id],
                        issuance_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<Issuance>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ISSUANCE_COLUMNS} FROM Issuances ORDER BY issue_date DESC, issuance_id DESC"
                ))?;
                let issuances = stmt
                    .query_map([], issuance_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(issuances)
            })
            .await
    }

    async fn create(&self, issuance: &Issuance) -> Result<i64> {
        issuance.validate()?;
        let issuance = issuance.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO Issuances (book_id, user_id, issue_date, due_date, return_date, status) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                    rusqlite::params![
                        issuance.book_id,
                        issuance.user_id,
                        issuance.issue_date,
                        issuance.due_date,
                        issuance.return_date,
                        issuance.status,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    async fn update(&self, issuance: &Issuance) -> Result<bool> {
        issuance.validate()?;
        let issuance = issuance.clone();
        self.db
            .execute(move |conn| {
                let changed = conn.execute(
                    "UPDATE Issuances SET book_id = ?, user_id = ?, issue_date = ?, due_date = ?, \
                     return_date = ?, status = ? WHERE issuance_id = ?",
                    rusqlite::params![
                        issuance.book_id,
                        issuance.user_id,
                        issuance.issue_date,
                        issuance.due_date,
                        issuance.return_date,
                        issuance.status,
                        issuance.id,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        self.db
            .execute(move |conn| {
                Ok(conn.execute("DELETE FROM Issuances WHERE issuance_id = ?", [id])? > 0)
            })
            .await
    }
}

const FINE_COLUMNS: &str = "fine_id, issuance_id, fine_amount, status, created_at, paid_at";

fn fine_from_row(row: &Row<'_>) -> rusqlite::Result<Fine> {
    Ok(Fine {
        id: row.get("fine_id")?,
        issuance_id: row.get("issuance_id")?,
        amount: row.get("fine_amount")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        paid_at: row.get("paid_at")?,
    })
}

/// Repository for Fine entities
pub struct FineRepository {
    db: Arc<DatabaseManager>,
}

impl FineRepository {
    /// Create a new FineRepository
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_issuance(&self, issuance_id: i64) -> Result<Vec<Fine>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {FINE_COLUMNS} FROM Fines WHERE issuance_id = ? ORDER BY fine_id"
                ))?;
                let fines = stmt
                    .query_map([issuance_id], fine_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(fines)
            })
            .await
    }

    pub async fn find_by_status(&self, status: FineStatus) -> Result<Vec<Fine>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {FINE_COLUMNS} FROM Fines WHERE status = ? ORDER BY fine_id"
                ))?;
                let fines = stmt
                    .query_map([status], fine_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(fines)
            })
            .await
    }
}

#[async_trait]
impl Repository<Fine> for FineRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Fine>> {
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {FINE_COLUMNS} FROM Fines WHERE fine_id = ?"),
                        [id],
                        fine_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<Fine>> {
        self.db
            .execute(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {FINE_COLUMNS} FROM Fines ORDER BY fine_id"))?;
                let fines = stmt
                    .query_map([], fine_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(fines)
            })
            .await
    }

    async fn create(&self, fine: &Fine) -> Result<i64> {
        fine.validate()?;
        let fine = fine.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO Fines (issuance_id, fine_amount, status, paid_at) VALUES (?, ?, ?, ?)",
                    rusqlite::params![fine.issuance_id, fine.amount, fine.status, fine.paid_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    async fn update(&self, fine: &Fine) -> Result<bool> {
        fine.validate()?;
        let fine = fine.clone();
        self.db
            .execute(move |conn| {
                let changed = conn.execute(
                    "UPDATE Fines SET issuance_id = ?, fine_amount = ?, status = ?, paid_at = ? \
                     WHERE fine_id = ?",
                    rusqlite::params![fine.issuance_id, fine.amount, fine.status, fine.paid_at, fine.id],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        self.db
            .execute(move |conn| Ok(conn.execute("DELETE FROM Fines WHERE fine_id = ?", [id])? > 0))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LibraryError;
    use crate::db::models::Amount;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn test_db() -> Arc<DatabaseManager> {
        Arc::new(DatabaseManager::new_in_memory().unwrap())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dune() -> Book {
        Book::new("Dune", "Herbert", "111", 3)
            .with_publisher("Chilton")
            .with_publication_year(1965)
            .with_category("Science Fiction")
    }

    fn titles(books: &[Book]) -> Vec<&str> {
        books.iter().map(|b| b.title.as_str()).collect()
    }

    fn same_fields(stored: &Book, original: &Book) -> bool {
        stored.title == original.title
            && stored.author == original.author
            && stored.isbn == original.isbn
            && stored.publisher == original.publisher
            && stored.publication_year == original.publication_year
            && stored.category == original.category
            && stored.total_copies == original.total_copies
            && stored.available_copies == original.available_copies
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(""), "%%");
        assert_eq!(like_pattern("dune"), "%dune%");
        assert_eq!(like_pattern("100%_a\\b"), "%100\\%\\_a\\\\b%");
    }

    #[tokio::test]
    async fn test_create_and_find_by_id() {
        let repo = BookRepository::new(test_db());
        let book = dune();

        let id = repo.create(&book).await.unwrap();
        let stored = repo.find_by_id(id).await.unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert!(same_fields(&stored, &book));
        assert!(stored.created_at.is_some());
        assert!(stored.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_find_by_id_missing_is_none() {
        let repo = BookRepository::new(test_db());
        assert!(repo.find_by_id(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_isbn_is_a_constraint_violation() {
        let repo = BookRepository::new(test_db());
        repo.create(&dune()).await.unwrap();

        let err = repo
            .create(&Book::new("Dune Messiah", "Herbert", "111", 1))
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_copy_invariant_violation() {
        let repo = BookRepository::new(test_db());
        let mut book = dune();
        book.available_copies = 4;

        let err = repo.create(&book).await.unwrap_err();
        assert!(matches!(err, LibraryError::ValidationError(_)));
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_all_orders_by_title() {
        let repo = BookRepository::new(test_db());
        repo.create(&Book::new("Neuromancer", "Gibson", "333", 1)).await.unwrap();
        repo.create(&dune()).await.unwrap();
        repo.create(&Book::new("Foundation", "Asimov", "222", 2)).await.unwrap();

        let books = repo.find_all().await.unwrap();
        assert_eq!(titles(&books), vec!["Dune", "Foundation", "Neuromancer"]);
    }

    #[tokio::test]
    async fn test_search_matches_any_column() {
        let repo = BookRepository::new(test_db());
        repo.create(&dune()).await.unwrap();
        repo.create(&Book::new("Foundation", "Asimov", "222-X", 2).with_category("Classics"))
            .await
            .unwrap();
        repo.create(&Book::new("Neuromancer", "Gibson", "333", 1)).await.unwrap();

        assert_eq!(titles(&repo.search("Herb").await.unwrap()), vec!["Dune"]);
        assert_eq!(titles(&repo.search("22-X").await.unwrap()), vec!["Foundation"]);
        assert_eq!(titles(&repo.search("Classic").await.unwrap()), vec!["Foundation"]);
        assert_eq!(titles(&repo.search("Fiction").await.unwrap()), vec!["Dune"]);
        assert_eq!(
            titles(&repo.search("n").await.unwrap()),
            vec!["Dune", "Foundation", "Neuromancer"]
        );
        assert!(repo.search("Tolkien").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let repo = BookRepository::new(test_db());
        repo.create(&Book::new("100% Cotton", "Weaver", "444", 1)).await.unwrap();
        repo.create(&Book::new("1000 Nights", "Scheherazade", "555", 1)).await.unwrap();

        assert_eq!(titles(&repo.search("100%").await.unwrap()), vec!["100% Cotton"]);
        assert!(repo.search("_00_").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_search_matches_find_all() {
        let repo = BookRepository::new(test_db());
        repo.create(&dune()).await.unwrap();
        repo.create(&Book::new("Foundation", "Asimov", "222", 2)).await.unwrap();

        assert_eq!(repo.search("").await.unwrap(), repo.find_all().await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_returns_false_and_changes_nothing() {
        let repo = BookRepository::new(test_db());
        repo.create(&dune()).await.unwrap();
        let before = repo.find_all().await.unwrap();

        let mut ghost = Book::new("Ghost", "Nobody", "999", 1);
        ghost.id = 9999;
        assert!(!repo.update(&ghost).await.unwrap());
        assert_eq!(repo.find_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_update_overwrites_row() {
        let repo = BookRepository::new(test_db());
        let id = repo.create(&dune()).await.unwrap();

        let mut book = repo.find_by_id(id).await.unwrap().unwrap();
        book.title = "Dune (Deluxe)".to_string();
        book.category = None;
        book.total_copies = 5;
        book.available_copies = 2;
        assert!(repo.update(&book).await.unwrap());

        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert!(same_fields(&stored, &book));
        assert_eq!(stored.created_at, book.created_at);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = BookRepository::new(test_db());
        let id = repo.create(&dune()).await.unwrap();

        assert!(!repo.delete(id + 1).await.unwrap());
        assert!(repo.delete(id).await.unwrap());
        assert!(repo.find_by_id(id).await.unwrap().is_none());
        assert!(!repo.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_availability_follows_updates() {
        let repo = BookRepository::new(test_db());
        let id = repo
            .create(&Book::new("Dune", "Herbert", "111", 3))
            .await
            .unwrap();
        repo.create(&Book::new("Empty Shelf", "Nobody", "000", 0)).await.unwrap();

        let available = repo.find_available().await.unwrap();
        assert_eq!(titles(&available), vec!["Dune"]);

        let mut book = repo.find_by_id(id).await.unwrap().unwrap();
        book.available_copies = 0;
        assert!(repo.update(&book).await.unwrap());

        let available = repo.find_available().await.unwrap();
        assert!(available.iter().all(|b| b.available_copies > 0));
        assert!(available.iter().all(|b| b.id != id));
    }

    #[tokio::test]
    async fn test_find_by_isbn() {
        let repo = BookRepository::new(test_db());
        let id = repo.create(&dune()).await.unwrap();

        assert_eq!(repo.find_by_isbn("111").await.unwrap().unwrap().id, id);
        assert!(repo.find_by_isbn("112").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_issuance_crud_and_queries() {
        let db = test_db();
        let books = BookRepository::new(db.clone());
        let issuances = IssuanceRepository::new(db);
        let book_id = books.create(&dune()).await.unwrap();

        let first = Issuance::new(book_id, 7, date(2024, 1, 1), date(2024, 1, 15));
        let first_id = issuances.create(&first).await.unwrap();
        let second_id = issuances
            .create(&Issuance::new(book_id, 8, date(2024, 2, 1), date(2024, 2, 15)))
            .await
            .unwrap();

        let stored = issuances.find_by_id(first_id).await.unwrap().unwrap();
        assert_eq!(stored.status, IssuanceStatus::Issued);
        assert_eq!(stored.due_date, date(2024, 1, 15));
        assert!(stored.return_date.is_none());
        assert!(stored.created_at.is_some());

        let by_book: Vec<i64> = issuances
            .find_by_book(book_id)
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(by_book, vec![second_id, first_id]);
        assert_eq!(issuances.find_by_user(7).await.unwrap().len(), 1);

        let mut returned = stored.clone();
        returned.return_date = Some(date(2024, 1, 10));
        returned.status = IssuanceStatus::Returned;
        assert!(issuances.update(&returned).await.unwrap());

        let returned_rows = issuances.find_by_status(IssuanceStatus::Returned).await.unwrap();
        assert_eq!(returned_rows.len(), 1);
        assert_eq!(returned_rows[0].return_date, Some(date(2024, 1, 10)));
        assert_eq!(issuances.find_by_status(IssuanceStatus::Issued).await.unwrap().len(), 1);

        assert!(issuances.delete(second_id).await.unwrap());
        assert!(!issuances.delete(second_id).await.unwrap());
        assert_eq!(issuances.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_issuance_requires_existing_book() {
        let issuances = IssuanceRepository::new(test_db());
        let err = issuances
            .create(&Issuance::new(404, 1, date(2024, 1, 1), date(2024, 1, 15)))
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[tokio::test]
    async fn test_issuance_due_before_issue_rejected() {
        let db = test_db();
        let books = BookRepository::new(db.clone());
        let issuances = IssuanceRepository::new(db);

        let err = issuances
            .create(&Issuance::new(1, 1, date(2024, 1, 15), date(2024, 1, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::ValidationError(_)));

        let book_id = books.create(&dune()).await.unwrap();
        let id = issuances
            .create(&Issuance::new(book_id, 1, date(2024, 1, 1), date(2024, 1, 15)))
            .await
            .unwrap();
        let mut stored = issuances.find_by_id(id).await.unwrap().unwrap();
        stored.due_date = date(2023, 12, 31);

        let err = issuances.update(&stored).await.unwrap_err();
        assert!(matches!(err, LibraryError::ValidationError(_)));
        assert_eq!(
            issuances.find_by_id(id).await.unwrap().unwrap().due_date,
            date(2024, 1, 15)
        );
    }

    #[tokio::test]
    async fn test_book_with_issuances_cannot_be_deleted() {
        let db = test_db();
        let books = BookRepository::new(db.clone());
        let issuances = IssuanceRepository::new(db);
        let book_id = books.create(&dune()).await.unwrap();
        issuances
            .create(&Issuance::new(book_id, 1, date(2024, 1, 1), date(2024, 1, 15)))
            .await
            .unwrap();

        assert!(books.delete(book_id).await.unwrap_err().is_constraint_violation());
        assert!(books.find_by_id(book_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fine_crud_and_queries() {
        let db = test_db();
        let books = BookRepository::new(db.clone());
        let issuances = IssuanceRepository::new(db.clone());
        let fines = FineRepository::new(db);

        let book_id = books.create(&dune()).await.unwrap();
        let issuance_id = issuances
            .create(&Issuance::new(book_id, 1, date(2024, 1, 1), date(2024, 1, 15)))
            .await
            .unwrap();

        let amount: Amount = "12.50".parse().unwrap();
        let fine_id = fines.create(&Fine::new(issuance_id, amount)).await.unwrap();

        let stored = fines.find_by_id(fine_id).await.unwrap().unwrap();
        assert_eq!(stored.amount, amount);
        assert_eq!(stored.status, FineStatus::Pending);
        assert!(stored.paid_at.is_none());

        let mut paid = stored.clone();
        paid.status = FineStatus::Paid;
        paid.paid_at = Some(date(2024, 2, 1).and_hms_opt(10, 30, 0).unwrap());
        assert!(fines.update(&paid).await.unwrap());

        let paid_rows = fines.find_by_status(FineStatus::Paid).await.unwrap();
        assert_eq!(paid_rows.len(), 1);
        assert_eq!(paid_rows[0].paid_at, paid.paid_at);
        assert!(fines.find_by_status(FineStatus::Pending).await.unwrap().is_empty());
        assert_eq!(fines.find_by_issuance(issuance_id).await.unwrap().len(), 1);

        let mut ghost = paid.clone();
        ghost.id = fine_id + 100;
        assert!(!fines.update(&ghost).await.unwrap());

        assert!(fines.delete(fine_id).await.unwrap());
        assert!(fines.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_fine_rejected() {
        let db = test_db();
        let books = BookRepository::new(db.clone());
        let issuances = IssuanceRepository::new(db.clone());
        let fines = FineRepository::new(db);

        let err = fines
            .create(&Fine::new(1, Amount::from_cents(-100)))
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::ValidationError(_)));

        let book_id = books.create(&dune()).await.unwrap();
        let issuance_id = issuances
            .create(&Issuance::new(book_id, 1, date(2024, 1, 1), date(2024, 1, 15)))
            .await
            .unwrap();
        let fine_id = fines
            .create(&Fine::new(issuance_id, Amount::from_cents(300)))
            .await
            .unwrap();
        let mut stored = fines.find_by_id(fine_id).await.unwrap().unwrap();
        stored.amount = Amount::from_cents(-300);

        let err = fines.update(&stored).await.unwrap_err();
        assert!(matches!(err, LibraryError::ValidationError(_)));
        assert_eq!(
            fines.find_by_id(fine_id).await.unwrap().unwrap().amount,
            Amount::from_cents(300)
        );
    }

    #[tokio::test]
    async fn test_undecodable_stored_value_is_invalid_data() {
        let db = test_db();
        db.execute(|conn| {
            conn.execute(
                "INSERT INTO Books (title, author, isbn, total_copies, available_copies, created_at) \
                 VALUES ('Dune', 'Herbert', '111', 1, 1, 'yesterday')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let err = BookRepository::new(db).find_all().await.unwrap_err();
        assert!(matches!(err, LibraryError::InvalidData(_)));
        assert_eq!(err.category(), crate::core::error::ErrorCategory::Query);
    }

    #[tokio::test]
    async fn test_repositories_behind_trait_objects() {
        let db = test_db();
        let repo: Box<dyn Repository<Book>> = Box::new(BookRepository::new(db));

        let id = repo.create(&dune()).await.unwrap();
        assert_eq!(repo.find_all().await.unwrap().len(), 1);
        assert!(repo.delete(id).await.unwrap());
    }

    fn valid_book() -> impl Strategy<Value = Book> {
        (
            "[A-Za-z][A-Za-z0-9 ]{0,30}",
            "[A-Za-z][A-Za-z .]{0,20}",
            "[0-9]{10,13}",
            proptest::option::of("[A-Za-z ]{1,20}"),
            proptest::option::of(1450i32..2100),
            proptest::option::of("[A-Za-z%_ ]{1,15}"),
            0i32..50,
        )
            .prop_flat_map(|(title, author, isbn, publisher, year, category, total)| {
                (0..=total).prop_map(move |available| Book {
                    id: 0,
                    title: title.clone(),
                    author: author.clone(),
                    isbn: isbn.clone(),
                    publisher: publisher.clone(),
                    publication_year: year,
                    category: category.clone(),
                    total_copies: total,
                    available_copies: available,
                    created_at: None,
                    updated_at: None,
                })
            })
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_create_then_find_preserves_fields(book in valid_book()) {
            let stored = block_on(async {
                let repo = BookRepository::new(test_db());
                let id = repo.create(&book).await.unwrap();
                repo.find_by_id(id).await.unwrap()
            });

            let stored = stored.expect("stored book");
            prop_assert!(same_fields(&stored, &book));
        }

        #[test]
        fn prop_empty_search_equals_find_all(books in proptest::collection::vec(valid_book(), 0..8)) {
            let (searched, all, available) = block_on(async {
                let repo = BookRepository::new(test_db());
                for (i, book) in books.iter().enumerate() {
                    let mut book = book.clone();
                    book.isbn = format!("{}-{}", book.isbn, i);
                    repo.create(&book).await.unwrap();
                }
                (
                    repo.search("").await.unwrap(),
                    repo.find_all().await.unwrap(),
                    repo.find_available().await.unwrap(),
                )
            });

            let mut searched_ids: Vec<i64> = searched.iter().map(|b| b.id).collect();
            let mut all_ids: Vec<i64> = all.iter().map(|b| b.id).collect();
            searched_ids.sort_unstable();
            all_ids.sort_unstable();
            prop_assert_eq!(searched_ids, all_ids);
            prop_assert!(available.iter().all(|b| b.available_copies > 0));
        }
    }
}
