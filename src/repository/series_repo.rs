use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::domain::series::Series;
use super::{uuid_from_blob, IntoUuid, RepositoryError};

#[derive(FromRow)]
struct DbSeries {
    id: Vec<u8>,
    name: String,
    author_id: Option<Vec<u8>>,
    wanted: bool
}

impl TryFrom<DbSeries> for Series {
    type Error = RepositoryError;

    fn try_from(db_series: DbSeries) -> Result<Self, Self::Error> {
        let author_id = db_series.author_id
            .as_deref()
            .map(uuid_from_blob)
            .transpose()?;

        Ok(Series::from_storage(
            uuid_from_blob(&db_series.id)?,
            db_series.name,
            author_id,
            db_series.wanted
        ))
    }
}

pub struct SqliteSeriesRepository;

impl SqliteSeriesRepository {
    pub fn new() -> Self {
        Self {}
    }
}

impl SqliteSeriesRepository {

    pub async fn save<'e, E, S>(&self, executor: E, series: S) -> Result<Series, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        S: AsRef<Series> + Sync
    {
        let db_series = sqlx::query_as::<_, DbSeries>(
            "INSERT INTO series(id, name, author_id, wanted)
            VALUES (?, ?, ?, ?)
            RETURNING id, name, author_id, wanted;")
            .bind(series.as_ref().id())
            .bind(series.as_ref().name())
            .bind(series.as_ref().author_id())
            .bind(series.as_ref().wanted())
            .fetch_one(executor)
            .await
            .map_err(RepositoryError::from_sqlx_error)?;

        db_series.try_into()
    }

    pub async fn by_id_fetch<'e, E, ID>(&self, executor: E, id: ID) -> Result<Option<Series>, RepositoryError>
    where
        E: Executor<'e, Database = Sqlite>,
        ID: IntoUuid + Send + Sync
    {
        let uuid = id.into_uuid()?;
        let db_series = sqlx::query_as::<_, DbSeries>(
            "SELECT id, name, author_id, wanted FROM series WHERE id = ? LIMIT 1;"
        )
        .bind(uuid)
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        db_series.map(Series::try_from).transpose()
    }

    pub async fn by_name_fetch<'e, E>(&self, executor: E, name: &str, author_id: Option<&Uuid>) -> Result<Option<Series>, RepositoryError>
    where E: Executor<'e, Database = Sqlite>
    {
        let db_series = sqlx::query_as::<_, DbSeries>(
            "SELECT id, name, author_id, wanted FROM series
            WHERE name = ? AND (author_id = ? OR (author_id IS NULL AND ? IS NULL))
            LIMIT 1;"
        )
        .bind(name)
        .bind(author_id)
        .bind(author_id)
        .fetch_optional(executor)
        .await
        .map_err(RepositoryError::from_sqlx_error)?;

        db_series.map(Series::try_from).transpose()
    }

    /// Fetch-or-insert keyed by (name, author). A lost insert race resolves
    /// with a second fetch.
    pub async fn get_or_create(&self, connection: &mut SqliteConnection, name: &str, author_id: Option<&Uuid>) -> Result<Series, RepositoryError> {
        if let Some(existing) = self.by_name_fetch(&mut *connection, name, author_id).await? {
            return Ok(existing);
        }

        let candidate = Series::new(Uuid::new_v4(), name, author_id.copied())?;
        match self.save(&mut *connection, &candidate).await {
            Ok(saved) => Ok(saved),
            Err(err) if err.is_constraint_violation() => {
                self.by_name_fetch(&mut *connection, candidate.name(), author_id).await?
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
        let result = sqlx::query("UPDATE series SET wanted = ? WHERE id = ?;")
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
