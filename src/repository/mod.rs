pub mod authors_repo;
pub mod series_repo;
pub mod books_repo;
pub mod source_paths_repo;
pub mod blocked_hashes_repo;
pub mod fingerprints_repo;

pub use authors_repo::SqliteAuthorsRepository;
pub use series_repo::SqliteSeriesRepository;
pub use books_repo::SqliteBooksRepository;
pub use source_paths_repo::SqliteSourcePathsRepository;
pub use blocked_hashes_repo::SqliteBlockedHashesRepository;
pub use fingerprints_repo::SqliteFingerprintsRepository;

use books_repo::BookConversionError;
use crate::domain::book::LibraryState;
use crate::domain::ValidationError;

use uuid::Uuid;
use std::path::PathBuf;

/* Database related errors */
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Path contains non-UTF8 characters: {0:?}")]
    InvalidPathEncoding(PathBuf),

    #[error("Item with id <{0}> was not found.")]
    IdNotFound(Uuid),

    #[error("Blocked hash entry '{0}' was not found.")]
    HashNotFound(String),

    #[error("Invalid library state transition: {from} -> {to}")]
    InvalidStateTransition { from: LibraryState, to: LibraryState },

    #[error("Book <{id}> is no longer in state '{expected}'; somebody got there first.")]
    StaleState { id: Uuid, expected: LibraryState },

    #[error("Book <{0}> is not in state 'deleted' and cannot be purged.")]
    NotPurgeable(Uuid),

    #[error("Integer conversion error: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),

    #[error("Uuid conversion error: {0}")]
    UuidConversion(#[from] uuid::Error),

    #[error("Data mapping error for Book: {0}")]
    BookDataMapping(#[from] BookConversionError),

    #[error("Entity fields failed validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("No rows was returned by a query that expected to return at least one row.")]
    RowNotFound,

    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error(transparent)]
    GenericDatabaseError(#[from] sqlx::Error),

    #[error("A constraint was violated: {description}")]
    ConstraintViolation { description: String },

    #[error("Failed to decode database row: {0}")]
    RowDecodingError(String)
}

impl RepositoryError {
    pub fn from_sqlx_error(sqlx_error: sqlx::Error) -> Self {
        match &sqlx_error {
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => Self::ConnectionError(sqlx_error.to_string()),
            sqlx::Error::Decode(decode_err) => Self::RowDecodingError(decode_err.to_string()),
            sqlx::Error::Database(db_error) => {
                if let Some(error_code) = db_error.code() {
                    let code_str = error_code.as_ref();

                    // SQLite specific error codes for constraints
                    // 19: General constraint violation (SQLITE_CONSTRAINT)
                    // 2067: SQLITE_CONSTRAINT_UNIQUE (specific unique constraint violation)
                    // 1555: SQLITE_CONSTRAINT_PRIMARYKEY (specific primary key violation)
                    // 787: SQLITE_CONSTRAINT_FOREIGNKEY (specific foreign key violation)
                    if ["19", "2067", "1555", "787"].contains(&code_str) {
                        return Self::ConstraintViolation {
                            description: db_error.message().to_string()
                        };
                    }
                }

                Self::GenericDatabaseError(sqlx_error)
            },

            _ => Self::GenericDatabaseError(sqlx_error)
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation { .. })
    }
}

/* Helper trait for id parameter of repository functions */
pub trait IntoUuid {
    fn into_uuid(&self) -> Result<Uuid, RepositoryError>;
}

impl IntoUuid for Uuid {
    fn into_uuid(&self) -> Result<Uuid, RepositoryError> {
        Ok(*self)
    }
}

impl IntoUuid for &Uuid {
    fn into_uuid(&self) -> Result<Uuid, RepositoryError> {
        Ok(**self)
    }
}

impl IntoUuid for &str {
    fn into_uuid(&self) -> Result<Uuid, RepositoryError> {
        Uuid::parse_str(self).map_err(RepositoryError::UuidConversion)
    }
}

impl IntoUuid for String {
    fn into_uuid(&self) -> Result<Uuid, RepositoryError> {
        Uuid::parse_str(&self).map_err(RepositoryError::UuidConversion)
    }
}

pub(crate) fn uuid_from_blob(bytes: &[u8]) -> Result<Uuid, uuid::Error> {
    Uuid::from_slice(bytes)
}
