pub mod hasher;
pub mod safe_file_op;
pub mod queue;
pub mod scanner;
pub mod importer;
pub mod organizer;
pub mod writeback;
pub mod metadata;
pub mod updater;

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::{path::{Path, PathBuf}, sync::OnceLock};

    use log::SetLoggerError;
    use sqlx::{Error as SqlxError, SqlitePool};
    use tempfile::{Builder, NamedTempFile};

    use crate::domain::ValidationError;
    use crate::repository::RepositoryError;

    #[derive(Debug, thiserror::Error)]
    pub enum TestSetupError {
        #[error("Failed to init env logger for the tests: {0}")]
        LoggerError(String),

        #[error("I/O error: {0}")]
        IOError(#[from] std::io::Error),

        #[error("Wrong argument for a create_temp_file function. DO NOT USE DOT!")]
        DotError(),

        #[error("Walker has encountered an error while walking test fixtures dir: {0}")]
        FixtureWalkerError(#[from] walkdir::Error),

        #[error("Error from a repository: {0}")]
        RepositoryError(#[from] RepositoryError),

        #[error("Validation error: {0}")]
        ValidationError(#[from] ValidationError),

        #[error("Database operation failed: {0}")]
        DbError(#[from] sqlx::Error),

        #[error("Invalid (non utf-8) test file name: {0}")]
        InvalidFixtureName(PathBuf)
    }

    pub async fn prepare_db() -> Result<SqlitePool, SqlxError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./data/db/migrations")
            .run(&pool)
            .await?;

        Ok(pool)
    }

    pub fn init_logger() -> Result<(), TestSetupError> {
        static LOGGER_RESULT: OnceLock<Result<(), SetLoggerError>> = OnceLock::new();

        let init_result_ref = LOGGER_RESULT.get_or_init(|| {
            env_logger::builder()
                .is_test(true)
                .filter_level(log::LevelFilter::Warn)
                .try_init()
        });

        match init_result_ref {
            Ok(_) => Ok(()),
            Err(e) => Err(TestSetupError::LoggerError(e.to_string()))
        }
    }

    pub fn create_temp_files(path: &Path, amount: usize, ftype: &str) -> Result<Vec<NamedTempFile>, TestSetupError> {

        if ftype.contains(".") {
            return Err(TestSetupError::DotError());
        }

        (0..amount)
            .map(|i| {
                Builder::new()
                .prefix(&format!("{}_file_{}", ftype, i))
                .suffix(&format!(".{}", ftype))
                .tempfile_in(path)
                .map_err(TestSetupError::IOError)
            })
            .collect::<Result<Vec<NamedTempFile>, TestSetupError>>()
    }
}
