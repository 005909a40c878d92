use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::author::Author;
use super::{uuid_from_blob, IntoUuid, RepositoryError};

#[derive(FromRow)]
struct DbAuthor {
    id: Vec<u8>,
    name: String,
    wanted: bool
}

impl TryFrom<DbAuthor> for Author {
    type Error = RepositoryError;

    fn try_from(db_author: DbAuthor) -> Result<Self, Self::Error> {
        Ok(Author::from_storage(
            uuid_from_blob(&db_author.id)?,
            db_author.name,
            db_author.wanted
        ))
    }
}

pub struct SqliteAuthorsRepository;

impl SqliteAuthorsRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteAuthorsRepository {

    pub async fn save<'e, E, A>(&self, executor: E, author: A) -> Result<Author, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        A: AsRef<Author> + Sync
    {
        let db_author = sqlx::query_as::<_, DbAuthor>(
            "INSERT INTO authors(id, name, wanted)
            VALUES (?, ?, ?)
            RETURNING id, name, wanted;")
            .bind(author.as_ref().id())
            .bind(author.as_ref().name())
            .bind(author.as_ref().wanted())
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_author.try_into()
    }

    pub async fn by_id_fetch<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<Author>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let uuid = id.into_uuid()?;
        let db_author = sqlx::query_as::<_, DbAuthor>(
            "SELECT id, name, wanted FROM authors WHERE id = ? LIMIT 1;"
        )
        .bind(uuid)
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        db_author.map(Author::try_from).transpose()
    }

    pub async fn by_name_fetch<'e, E>(&self, executor: E, name: &str) -> Result<Option<Author>, RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        let db_author = sqlx::query_as::<_, DbAuthor>(
            "SELECT id, name, wanted FROM authors WHERE name = ? LIMIT 1;"
        )
        .bind(name)
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        db_author.map(Author::try_from).transpose()
    }

    /// Fetch-or-insert keyed by name. Losing an insert race to the unique
    /// constraint degrades into a second fetch, so concurrent callers all
    /// end up with the same row.
    pub async fn get_or_create(&self, connection: &mut SqliteConnection, name: &str) -> Result<Author, RepositoryError> {
        if let Some(existing) = self.by_name_fetch(&mut *connection, name).await? {
            return Ok(existing);
        }

        let candidate = Author::new(Uuid::new_v4(), name)?;
        match self.save(&mut *connection, &candidate).await {
            Ok(saved) => Ok(saved),
            Err(err) if err.is_constraint_violation() => {
                self.by_name_fetch(&mut *connection, candidate.name()).await?
                    .ok_or(err)
            },
            Err(err) => Err(err)
        }
    }

    pub async fn set_wanted<'e, E, ID>(&self, executor: E, id: ID, wanted: bool) -> Result<(), RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let uuid = id.into_uuid()?;
        let result = sqlx::query("UPDATE authors SET wanted = ? WHERE id = ?;")
            .bind(wanted)
            .bind(uuid)
            .execute(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::IdNotFound(uuid));
        }

        Ok(())
    }
}
