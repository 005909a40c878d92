use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use sqlx::{Executor, FromRow, Sqlite};
use uuid::Uuid;

use crate::domain::book::{Book, ItunesFields, LibraryState, LibraryStateParseError};
use crate::domain::ValidationError;
use super::{uuid_from_blob, IntoUuid, RepositoryError};

#[derive(FromRow)]
struct DbBook {
    id: Vec<u8>,
    title: String,
    author_id: Option<Vec<u8>>,
    series_id: Option<Vec<u8>>,
    series_name: Option<String>,
    series_number: Option<f64>,
    file_path: Option<String>,
    format: Option<String>,
    duration: Option<i64>,
    file_hash: Option<String>,
    original_file_hash: Option<String>,
    narrator: Option<String>,
    edition: Option<String>,
    release_year: Option<i64>,
    itunes_persistent_id: Option<String>,
    itunes_date_added: Option<NaiveDateTime>,
    itunes_play_count: Option<i64>,
    itunes_rating: Option<i64>,
    itunes_bookmark_ms: Option<i64>,
    itunes_last_played: Option<NaiveDateTime>,
    itunes_source_library: Option<String>,
    library_state: String,
    is_primary_version: bool,
    version_group_id: Option<Vec<u8>>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime
}

#[derive(Debug, thiserror::Error)]
pub enum BookConversionError {
    #[error("Uuid conversion error: {0}")]
    UuidConversionError(#[from] uuid::Error),

    #[error("Error during int conversion: {0}")]
    IntConversionError(#[from] std::num::TryFromIntError),

    #[error("Library state conversion error: {0}")]
    StateConversionError(#[from] LibraryStateParseError),

    #[error("Error during validation of book fields: {0}")]
    ValidationError(#[from] ValidationError)
}

impl TryFrom<DbBook> for Book {
    type Error = BookConversionError;

    fn try_from(db_book: DbBook) -> Result<Self, Self::Error> {
        let itunes = ItunesFields {
            persistent_id: db_book.itunes_persistent_id,
            date_added: db_book.itunes_date_added,
            play_count: db_book.itunes_play_count.map(u32::try_from).transpose()?,
            rating: db_book.itunes_rating.map(u8::try_from).transpose()?,
            bookmark_ms: db_book.itunes_bookmark_ms.map(u64::try_from).transpose()?,
            last_played: db_book.itunes_last_played,
            source_library_path: db_book.itunes_source_library.map(PathBuf::from)
        };

        Ok(Book::from_storage(
            uuid_from_blob(&db_book.id)?,
            db_book.title,
            db_book.author_id.as_deref().map(uuid_from_blob).transpose()?,
            db_book.series_id.as_deref().map(uuid_from_blob).transpose()?,
            db_book.series_name,
            db_book.series_number,
            db_book.file_path.map(PathBuf::from),
            db_book.format,
            db_book.duration.map(u32::try_from).transpose()?,
            db_book.file_hash,
            db_book.original_file_hash,
            db_book.narrator,
            db_book.edition,
            db_book.release_year.map(u32::try_from).transpose()?,
            itunes,
            LibraryState::try_from(db_book.library_state)?,
            db_book.is_primary_version,
            db_book.version_group_id.as_deref().map(uuid_from_blob).transpose()?,
            db_book.created_at,
            db_book.updated_at
        )?)
    }
}

const BOOK_COLUMNS: &str =
    "id, title, author_id, series_id, series_name, series_number, file_path, format, duration, \
    file_hash, original_file_hash, narrator, edition, release_year, \
    itunes_persistent_id, itunes_date_added, itunes_play_count, itunes_rating, \
    itunes_bookmark_ms, itunes_last_played, itunes_source_library, \
    library_state, is_primary_version, version_group_id, created_at, updated_at";

pub struct SqliteBooksRepository;

impl SqliteBooksRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteBooksRepository {

    pub async fn save<'e, E, B>(&self, executor: E, book: B) -> Result<Book, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        B: AsRef<Book> + Sync
    {
        let book = book.as_ref();
        let file_path_str = book.file_path().map(|p| p.to_string_lossy().to_string());
        let source_library_str = book.itunes().source_library_path.as_ref().map(|p| p.to_string_lossy().to_string());

        let query = format!(
            "INSERT INTO books({columns})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {columns};",
            columns = BOOK_COLUMNS
        );

        let db_book = sqlx::query_as::<_, DbBook>(&query)
            .bind(book.id())
            .bind(book.title())
            .bind(book.author_id())
            .bind(book.series_id())
            .bind(book.series_name())
            .bind(book.series_number())
            .bind(&file_path_str)
            .bind(book.format())
            .bind(book.duration().map(i64::from))
            .bind(book.file_hash())
            .bind(book.original_file_hash())
            .bind(book.narrator())
            .bind(book.edition())
            .bind(book.release_year().map(i64::from))
            .bind(book.itunes().persistent_id.as_deref())
            .bind(book.itunes().date_added)
            .bind(book.itunes().play_count.map(i64::from))
            .bind(book.itunes().rating.map(i64::from))
            .bind(book.itunes().bookmark_ms.map(|v| v as i64))
            .bind(book.itunes().last_played)
            .bind(&source_library_str)
            .bind(book.library_state().as_str())
            .bind(book.is_primary_version())
            .bind(book.version_group_id())
            .bind(book.created_at())
            .bind(book.updated_at())
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(db_book.try_into()?)
    }

    /// Full-row update. `library_state` is deliberately excluded; state only
    /// moves through [`Self::transition_state`].
    pub async fn update<'e, E, B>(&self, executor: E, book: B) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        B: AsRef<Book> + Sync
    {
        let book = book.as_ref();
        let file_path_str = book.file_path().map(|p| p.to_string_lossy().to_string());
        let source_library_str = book.itunes().source_library_path.as_ref().map(|p| p.to_string_lossy().to_string());

        let result = sqlx::query(
            "UPDATE books SET
                title = ?, author_id = ?, series_id = ?, series_name = ?, series_number = ?,
                file_path = ?, format = ?, duration = ?, file_hash = ?,
                narrator = ?, edition = ?, release_year = ?,
                itunes_persistent_id = ?, itunes_date_added = ?, itunes_play_count = ?,
                itunes_rating = ?, itunes_bookmark_ms = ?, itunes_last_played = ?,
                itunes_source_library = ?,
                is_primary_version = ?, version_group_id = ?, updated_at = ?
            WHERE id = ?;")
            .bind(book.title())
            .bind(book.author_id())
            .bind(book.series_id())
            .bind(book.series_name())
            .bind(book.series_number())
            .bind(&file_path_str)
            .bind(book.format())
            .bind(book.duration().map(i64::from))
            .bind(book.file_hash())
            .bind(book.narrator())
            .bind(book.edition())
            .bind(book.release_year().map(i64::from))
            .bind(book.itunes().persistent_id.as_deref())
            .bind(book.itunes().date_added)
            .bind(book.itunes().play_count.map(i64::from))
            .bind(book.itunes().rating.map(i64::from))
            .bind(book.itunes().bookmark_ms.map(|v| v as i64))
            .bind(book.itunes().last_played)
            .bind(&source_library_str)
            .bind(book.is_primary_version())
            .bind(book.version_group_id())
            .bind(book.updated_at())
            .bind(book.id())
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::IdNotFound(*book.id()));
        }

        Ok(())
    }

    pub async fn by_id_fetch<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<Book>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let uuid = id.into_uuid()?;
        let query = format!("SELECT {} FROM books WHERE id = ? LIMIT 1;", BOOK_COLUMNS);

        let db_book = sqlx::query_as::<_, DbBook>(&query)
            .bind(uuid)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_book.map(Book::try_from)
            .transpose()
            .map_err(RepositoryError::BookDataMapping)
    }

    /// Any book carrying this content hash, deleted ones included.
    pub async fn by_hash_fetch<'e, E>(&self, executor: E, hash: &str) -> Result<Option<Book>, RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        let query = format!("SELECT {} FROM books WHERE file_hash = ? LIMIT 1;", BOOK_COLUMNS);

        let db_book = sqlx::query_as::<_, DbBook>(&query)
            .bind(hash)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_book.map(Book::try_from)
            .transpose()
            .map_err(RepositoryError::BookDataMapping)
    }

    /// The duplicate-detection variant: only non-deleted books count.
    pub async fn active_by_hash_fetch<'e, E>(&self, executor: E, hash: &str) -> Result<Option<Book>, RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        let query = format!(
            "SELECT {} FROM books WHERE file_hash = ? AND library_state != 'deleted' LIMIT 1;",
            BOOK_COLUMNS
        );

        let db_book = sqlx::query_as::<_, DbBook>(&query)
            .bind(hash)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_book.map(Book::try_from)
            .transpose()
            .map_err(RepositoryError::BookDataMapping)
    }

    pub async fn by_source_path_fetch<'e, E>(&self, executor: E, path: &std::path::Path) -> Result<Option<Book>, RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        let Some(path_str) = path.to_str() else {
            return Err(RepositoryError::InvalidPathEncoding(path.to_path_buf()));
        };

        let qualified_columns = BOOK_COLUMNS
            .split(',')
            .map(|column| format!("b.{}", column.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT {} FROM books b
            JOIN book_source_paths sp ON sp.book_id = b.id
            WHERE sp.source_path = ?
            LIMIT 1;",
            qualified_columns
        );

        let db_book = sqlx::query_as::<_, DbBook>(&query)
            .bind(path_str)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_book.map(Book::try_from)
            .transpose()
            .map_err(RepositoryError::BookDataMapping)
    }

    pub async fn list_by_state<'e, E>(&self, executor: E, state: LibraryState) -> Result<Vec<Book>, RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        let query = format!(
            "SELECT {} FROM books WHERE library_state = ? ORDER BY created_at;",
            BOOK_COLUMNS
        );

        let db_books = sqlx::query_as::<_, DbBook>(&query)
            .bind(state.as_str())
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_books.into_iter()
            .map(|db_book| Book::try_from(db_book).map_err(RepositoryError::BookDataMapping))
            .collect()
    }

    /// Atomic compare-and-swap on `library_state`. The WHERE clause carries
    /// the expected current state, so two racing transitions cannot both
    /// win; the loser gets [`RepositoryError::StaleState`].
    pub async fn transition_state<'e, E, ID>(&self, executor: E, id: ID, from: LibraryState, to: LibraryState) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        if !from.can_transition(to) {
            return Err(RepositoryError::InvalidStateTransition { from, to });
        }

        let uuid = id.into_uuid()?;
        let now = Local::now().naive_local();

        let result = if to == LibraryState::Wanted {
            // Detaching from a file clears the file columns in the same
            // statement the state flips in.
            sqlx::query(
                "UPDATE books
                SET library_state = ?, file_path = NULL, file_hash = NULL, format = NULL, updated_at = ?
                WHERE id = ? AND library_state = ?;")
                .bind(to.as_str())
                .bind(now)
                .bind(uuid)
                .bind(from.as_str())
                .execute(executor)
                .await
        } else {
            sqlx::query(
                "UPDATE books SET library_state = ?, updated_at = ? WHERE id = ? AND library_state = ?;")
                .bind(to.as_str())
                .bind(now)
                .bind(uuid)
                .bind(from.as_str())
                .execute(executor)
                .await
        };

        let result = result.map_err(RepositoryError::from_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::StaleState { id: uuid, expected: from });
        }

        Ok(())
    }

    /// Destroys a row for good. Only books already in state `deleted` can
    /// go; everything else is a refusal.
    pub async fn purge<'e, E, ID>(&self, executor: E, id: ID) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let uuid = id.into_uuid()?;
        let result = sqlx::query("DELETE FROM books WHERE id = ? AND library_state = 'deleted';")
            .bind(uuid)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotPurgeable(uuid));
        }

        Ok(())
    }

    pub async fn add_tags<ID>(&self, connection: &mut sqlx::SqliteConnection, id: ID, tags: &[String]) -> Result<(), RepositoryError>
    where ID: IntoUuid + Send + Sync
    {
        let uuid = id.into_uuid()?;

        for tag in tags {
            sqlx::query("INSERT OR IGNORE INTO book_tags(book_id, tag) VALUES (?, ?);")
                .bind(uuid)
                .bind(tag)
                .execute(&mut *connection)
                .await
                .map_err(RepositoryError::from_sqlx_error)?;
        }

        Ok(())
    }

    pub async fn tags_for_book<'e, E, ID>(&self, executor: E, id: ID) -> Result<Vec<String>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let uuid = id.into_uuid()?;

        let rows: Vec<(String,)> = sqlx::query_as("SELECT tag FROM book_tags WHERE book_id = ? ORDER BY rowid;")
            .bind(uuid)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(rows.into_iter().map(|(tag,)| tag).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::repository::test_helpers::*;
    use super::*;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn now() -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn import_book(title: &str, path: &str, hash: &str) -> Book {
        Book::with_file(Uuid::new_v4(), title, path, "m4b", hash, now()).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_fetch_round_trip() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBooksRepository::new();

        let mut book = import_book("Hyperion", "/books/hyperion.m4b", HASH_A);
        book.set_narrator("Marc Vietor");
        book.set_release_year(1989);
        book.set_itunes(ItunesFields {
            persistent_id: Some("ABCD1234EFGH5678".to_string()),
            play_count: Some(3),
            rating: Some(80),
            bookmark_ms: Some(120_000),
            ..Default::default()
        })?;

        let saved = repo.save(&pool, &book).await?;
        let fetched = repo.by_id_fetch(&pool, saved.id()).await?.expect("book should exist");

        assert_eq!(fetched.title(), "Hyperion");
        assert_eq!(fetched.file_hash(), Some(HASH_A));
        assert_eq!(fetched.original_file_hash(), Some(HASH_A));
        assert_eq!(fetched.narrator(), Some("Marc Vietor"));
        assert_eq!(fetched.itunes().persistent_id.as_deref(), Some("ABCD1234EFGH5678"));
        assert_eq!(fetched.itunes().rating, Some(80));
        assert_eq!(fetched.library_state(), LibraryState::Import);

        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_by_hash() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBooksRepository::new();

        let book = repo.save(&pool, &import_book("Hyperion", "/books/hyperion.m4b", HASH_A)).await?;

        let by_hash = repo.by_hash_fetch(&pool, HASH_A).await?;
        assert_eq!(by_hash.as_ref().map(|b| b.id()), Some(book.id()));

        let active = repo.active_by_hash_fetch(&pool, HASH_A).await?;
        assert!(active.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_deleted_books_are_not_active_duplicates() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBooksRepository::new();

        let book = repo.save(&pool, &import_book("Hyperion", "/books/hyperion.m4b", HASH_A)).await?;
        repo.transition_state(&pool, book.id(), LibraryState::Import, LibraryState::Deleted).await?;

        assert!(repo.active_by_hash_fetch(&pool, HASH_A).await?.is_none());
        assert!(repo.by_hash_fetch(&pool, HASH_A).await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_transition_cas_rejects_stale_state() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBooksRepository::new();

        let book = repo.save(&pool, &import_book("Hyperion", "/books/hyperion.m4b", HASH_A)).await?;
        repo.transition_state(&pool, book.id(), LibraryState::Import, LibraryState::Organized).await?;

        // Second identical CAS loses: the book is no longer in 'import'.
        let result = repo.transition_state(&pool, book.id(), LibraryState::Import, LibraryState::Organized).await;
        assert!(matches!(result, Err(RepositoryError::StaleState { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected_without_touching_db() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBooksRepository::new();

        let book = repo.save(&pool, &import_book("Hyperion", "/books/hyperion.m4b", HASH_A)).await?;

        let result = repo.transition_state(&pool, book.id(), LibraryState::Import, LibraryState::Import).await;
        assert!(matches!(result, Err(RepositoryError::InvalidStateTransition { .. })));

        let fetched = repo.by_id_fetch(&pool, book.id()).await?.unwrap();
        assert_eq!(fetched.library_state(), LibraryState::Import);

        Ok(())
    }

    #[tokio::test]
    async fn test_transition_to_wanted_clears_file_columns() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBooksRepository::new();

        let book = repo.save(&pool, &import_book("Hyperion", "/books/hyperion.m4b", HASH_A)).await?;
        repo.transition_state(&pool, book.id(), LibraryState::Import, LibraryState::Wanted).await?;

        let fetched = repo.by_id_fetch(&pool, book.id()).await?.unwrap();
        assert_eq!(fetched.library_state(), LibraryState::Wanted);
        assert!(fetched.file_path().is_none());
        assert!(fetched.file_hash().is_none());
        assert_eq!(fetched.original_file_hash(), Some(HASH_A));

        Ok(())
    }

    #[tokio::test]
    async fn test_purge_requires_deleted_state() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBooksRepository::new();

        let book = repo.save(&pool, &import_book("Hyperion", "/books/hyperion.m4b", HASH_A)).await?;

        let premature = repo.purge(&pool, book.id()).await;
        assert!(matches!(premature, Err(RepositoryError::NotPurgeable(_))));

        repo.transition_state(&pool, book.id(), LibraryState::Import, LibraryState::Deleted).await?;
        repo.purge(&pool, book.id()).await?;

        assert!(repo.by_id_fetch(&pool, book.id()).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_tags_round_trip() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBooksRepository::new();

        let book = repo.save(&pool, &import_book("Hyperion", "/books/hyperion.m4b", HASH_A)).await?;

        let mut connection = pool.acquire().await?;
        repo.add_tags(&mut connection, book.id(), &["sci-fi marathon".to_string(), "favorites".to_string()]).await?;
        // Re-adding is a no-op thanks to the unique constraint.
        repo.add_tags(&mut connection, book.id(), &["favorites".to_string()]).await?;
        drop(connection);

        let tags = repo.tags_for_book(&pool, book.id()).await?;
        assert_eq!(tags, vec!["sci-fi marathon".to_string(), "favorites".to_string()]);

        Ok(())
    }
}
