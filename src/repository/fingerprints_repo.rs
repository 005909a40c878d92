use std::path::Path;

use chrono::{Local, NaiveDateTime};
use sqlx::{Executor, FromRow, Sqlite};

use crate::itunes::fingerprint::LibraryFingerprint;
use super::RepositoryError;

#[derive(FromRow)]
struct DbFingerprint {
    library_path: String,
    size: i64,
    mtime: NaiveDateTime,
    crc32: i64
}

impl TryFrom<DbFingerprint> for LibraryFingerprint {
    type Error = RepositoryError;

    fn try_from(row: DbFingerprint) -> Result<Self, Self::Error> {
        Ok(
            LibraryFingerprint {
                path: row.library_path.into(),
                size: u64::try_from(row.size)?,
                mtime: row.mtime,
                crc32: u32::try_from(row.crc32)?
            }
        )
    }
}

/// Durable storage for the fingerprint captured at import time. Write-back
/// compares against this before touching the library file.
pub struct SqliteFingerprintsRepository;

impl SqliteFingerprintsRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteFingerprintsRepository {

    pub async fn store<'e, E>(&self, executor: E, fingerprint: &LibraryFingerprint) -> Result<(), RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        let Some(path_str) = fingerprint.path.to_str() else {
            return Err(RepositoryError::InvalidPathEncoding(fingerprint.path.clone()));
        };

        sqlx::query(
            "INSERT INTO library_fingerprints(library_path, size, mtime, crc32, captured_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(library_path)
            DO UPDATE SET size = excluded.size, mtime = excluded.mtime,
                          crc32 = excluded.crc32, captured_at = excluded.captured_at;")
            .bind(path_str)
            .bind(fingerprint.size as i64)
            .bind(fingerprint.mtime)
            .bind(i64::from(fingerprint.crc32))
            .bind(Local::now().naive_local())
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn for_library<'e, E>(&self, executor: E, library_path: &Path) -> Result<Option<LibraryFingerprint>, RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        let Some(path_str) = library_path.to_str() else {
            return Err(RepositoryError::InvalidPathEncoding(library_path.to_path_buf()));
        };

        let row = sqlx::query_as::<_, DbFingerprint>(
            "SELECT library_path, size, mtime, crc32 FROM library_fingerprints
            WHERE library_path = ? LIMIT 1;")
            .bind(path_str)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        row.map(LibraryFingerprint::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::repository::test_helpers::*;
    use super::*;

    #[tokio::test]
    async fn test_store_and_fetch() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteFingerprintsRepository::new();

        let fingerprint = LibraryFingerprint {
            path: PathBuf::from("/Users/x/Music/Library.xml"),
            size: 1024,
            mtime: Local::now().naive_local(),
            crc32: 0xDEAD_BEEF
        };

        repo.store(&pool, &fingerprint).await?;
        let fetched = repo.for_library(&pool, &fingerprint.path).await?.expect("fingerprint stored");

        assert!(fetched.matches(&fingerprint));

        Ok(())
    }

    #[tokio::test]
    async fn test_store_overwrites_previous_capture() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteFingerprintsRepository::new();
        let path = PathBuf::from("/Users/x/Music/Library.xml");

        let first = LibraryFingerprint { path: path.clone(), size: 1024, mtime: Local::now().naive_local(), crc32: 1 };
        let second = LibraryFingerprint { path: path.clone(), size: 2048, mtime: Local::now().naive_local(), crc32: 2 };

        repo.store(&pool, &first).await?;
        repo.store(&pool, &second).await?;

        let fetched = repo.for_library(&pool, &path).await?.unwrap();
        assert_eq!(fetched.crc32, 2);
        assert_eq!(fetched.size, 2048);

        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_library_has_no_fingerprint() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteFingerprintsRepository::new();

        let fetched = repo.for_library(&pool, &PathBuf::from("/nowhere.xml")).await?;
        assert!(fetched.is_none());

        Ok(())
    }
}
