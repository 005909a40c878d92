use chrono::NaiveDateTime;
use sqlx::{Executor, FromRow, Sqlite};

use crate::domain::blocked_hash::BlockedHash;
use crate::domain::validate_hash;
use super::RepositoryError;

#[derive(FromRow)]
struct DbBlockedHash {
    hash: String,
    reason: String,
    added_at: NaiveDateTime
}

impl From<DbBlockedHash> for BlockedHash {
    fn from(row: DbBlockedHash) -> Self {
        BlockedHash::from_storage(row.hash, row.reason, row.added_at)
    }
}

/// The registry of permanently rejected content hashes. Importer and
/// scanner consult it before creating any book.
pub struct SqliteBlockedHashesRepository;

impl SqliteBlockedHashesRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteBlockedHashesRepository {

    pub async fn add<'e, E>(&self, executor: E, entry: &BlockedHash) -> Result<(), RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        sqlx::query(
            "INSERT INTO blocked_hashes(hash, reason, added_at) VALUES (?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET reason = excluded.reason;")
            .bind(entry.hash())
            .bind(entry.reason())
            .bind(entry.added_at())
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(())
    }

    pub async fn remove<'e, E>(&self, executor: E, hash: &str) -> Result<(), RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        validate_hash(hash)?;

        let result = sqlx::query("DELETE FROM blocked_hashes WHERE hash = ?;")
            .bind(hash)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::HashNotFound(hash.to_string()));
        }

        Ok(())
    }

    pub async fn contains<'e, E>(&self, executor: E, hash: &str) -> Result<bool, RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        if validate_hash(hash).is_err() {
            // A malformed hash can never have been stored.
            return Ok(false);
        }

        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM blocked_hashes WHERE hash = ? LIMIT 1;")
            .bind(hash)
            .fetch_optional(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(row.is_some())
    }

    pub async fn list<'e, E>(&self, executor: E) -> Result<Vec<BlockedHash>, RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        let rows = sqlx::query_as::<_, DbBlockedHash>(
            "SELECT hash, reason, added_at FROM blocked_hashes ORDER BY added_at;")
            .fetch_all(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        Ok(rows.into_iter().map(BlockedHash::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Local;

    use crate::repository::test_helpers::*;
    use super::*;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[tokio::test]
    async fn test_add_contains_remove() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBlockedHashesRepository::new();

        let entry = BlockedHash::new(HASH_A, "corrupted rip", Local::now().naive_local())?;
        repo.add(&pool, &entry).await?;

        assert!(repo.contains(&pool, HASH_A).await?);
        assert_eq!(repo.list(&pool).await?.len(), 1);

        repo.remove(&pool, HASH_A).await?;
        assert!(!repo.contains(&pool, HASH_A).await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_hash_is_never_contained() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBlockedHashesRepository::new();

        assert!(!repo.contains(&pool, "NOT-A-HASH").await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_remove_unknown_hash_fails() -> Result<(), TestSetupError> {
        let pool = prepare_db().await?;
        let repo = SqliteBlockedHashesRepository::new();

        let result = repo.remove(&pool, HASH_A).await;
        assert!(matches!(result, Err(RepositoryError::HashNotFound(_))));

        Ok(())
    }
}
