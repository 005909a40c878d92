use std::path::Path;

use chrono::{Local, NaiveDateTime};
use sqlx::{Executor, FromRow, Sqlite};
use uuid::Uuid;

use crate::domain::source_path::BookSourcePath;
use super::{uuid_from_blob, IntoUuid, RepositoryError};

#[derive(FromRow)]
struct DbSourcePath {
    id: Vec<u8>,
    book_id: Vec<u8>,
    source_path: String,
    first_seen: NaiveDateTime,
    last_verified: Option<NaiveDateTime>,
    import_count: i64,
    still_exists: bool
}

impl TryFrom<DbSourcePath> for BookSourcePath {
    type Error = RepositoryError;

    fn try_from(row: DbSourcePath) -> Result<Self, Self::Error> {
        Ok(
            BookSourcePath {
                id: uuid_from_blob(&row.id)?,
                book_id: uuid_from_blob(&row.book_id)?,
                source_path: row.source_path.into(),
                first_seen: row.first_seen,
                last_verified: row.last_verified,
                import_count: u32::try_from(row.import_count)?,
                still_exists: row.still_exists
            }
        )
    }
}

pub struct SqliteSourcePathsRepository;

impl SqliteSourcePathsRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteSourcePathsRepository {

    /// Records that `book_id` was seen at `path`. First sighting inserts a
    /// fresh row; every further sighting of the same (book, path) pair bumps
    /// `import_count` and refreshes `last_verified` instead.
    pub async fn record_import<'e, E, ID>(&self, executor: E, book_id: ID, path: &Path) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let book_uuid = book_id.into_uuid()?;
        let Some(path_str) = path.to_str() else {
            return Err(RepositoryError::InvalidPathEncoding(path.to_path_buf()));
        };
        let now = Local::now().naive_local();

        sqlx::query(
            "INSERT INTO book_source_paths(id, book_id, source_path, first_seen, last_verified, import_count, still_exists)
            VALUES (?, ?, ?, ?, ?, 1, 1)
            ON CONFLICT(book_id, source_path)
            DO UPDATE SET import_count = import_count + 1, last_verified = excluded.last_verified, still_exists = 1;")
            .bind(Uuid::new_v4())
            .bind(book_uuid)
            .bind(path_str)
            .bind(now)
            .bind(now)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn for_book<'e, E, ID>(&self, executor: E, book_id: ID) -> Result<Vec<BookSourcePath>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let book_uuid = book_id.into_uuid()?;

        let rows = sqlx::query_as::<_, DbSourcePath>(
            "SELECT id, book_id, source_path, first_seen, last_verified, import_count, still_exists
            FROM book_source_paths
            WHERE book_id = ?
            ORDER BY first_seen;")
            .bind(book_uuid)
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        rows.into_iter().map(BookSourcePath::try_from).collect()
    }

    /// Flags a recorded source location as gone from disk.
    pub async fn mark_missing<'e, E, ID>(&self, executor: E, book_id: ID, path: &Path) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let book_uuid = book_id.into_uuid()?;
        let Some(path_str) = path.to_str() else {
            return Err(RepositoryError::InvalidPathEncoding(path.to_path_buf()));
        };

        sqlx::query("UPDATE book_source_paths SET still_exists = 0 WHERE book_id = ? AND source_path = ?;")
            .bind(book_uuid)
            .bind(path_str)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }
}
