use std::path::{Path, PathBuf};

use chrono::Local;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::book::{Book, LibraryState};
use crate::repository::{RepositoryError, SqliteAuthorsRepository, SqliteBooksRepository};
use crate::utils::sanitize::sanitize_component;
use super::hasher::hash_file;
use super::queue::OperationReporter;
use super::safe_file_op::{FileOpError, SafeFileOp, SafeFileOpConfig};

#[derive(Debug, thiserror::Error)]
pub enum OrganizeError {
    #[error("Book <{0}> was not found.")]
    BookNotFound(Uuid),

    #[error("Book <{id}> is in state '{state}'; only books in 'import' can be organized.")]
    WrongState { id: Uuid, state: LibraryState },

    #[error("Book <{0}> has no file path on record.")]
    NoFilePath(Uuid),

    #[error("Unknown organization strategy: '{0}'. Expected copy, hardlink, reflink or move.")]
    UnknownStrategy(String),

    #[error("Rendered target path is empty; check the folder and file patterns.")]
    EmptyTargetPath,

    #[error(transparent)]
    FileOp(#[from] FileOpError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrganizeStrategy {
    Copy,
    Hardlink,
    Reflink,
    Move
}

impl TryFrom<&str> for OrganizeStrategy {
    type Error = OrganizeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().trim() {
            "copy" => Ok(OrganizeStrategy::Copy),
            "hardlink" => Ok(OrganizeStrategy::Hardlink),
            "reflink" => Ok(OrganizeStrategy::Reflink),
            "move" => Ok(OrganizeStrategy::Move),
            other => Err(OrganizeError::UnknownStrategy(other.to_string()))
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrganizerConfig {
    pub root_dir: PathBuf,
    pub strategy: OrganizeStrategy,
    pub folder_pattern: String,
    pub file_pattern: String,
    pub fileops: SafeFileOpConfig
}

/// Values substituted into the folder and file patterns. Empty values
/// collapse their path segment entirely.
struct PatternTokens {
    author: String,
    series: String,
    series_number: String,
    title: String,
    year: String
}

impl PatternTokens {
    fn render(&self, pattern: &str) -> String {
        pattern
            .replace("{author}", &self.author)
            .replace("{series}", &self.series)
            .replace("{series_number}", &self.series_number)
            .replace("{title}", &self.title)
            .replace("{year}", &self.year)
    }
}

/// Moves a book from wherever it was imported into its place in the
/// organized tree, then flips the catalog row to `organized`.
pub struct OrganizerService<'a> {
    books_repo: SqliteBooksRepository,
    authors_repo: SqliteAuthorsRepository,
    config: OrganizerConfig,
    pool: &'a SqlitePool
}

impl<'a> OrganizerService<'a> {

    pub fn new(pool: &'a SqlitePool, config: OrganizerConfig) -> Self {
        Self {
            books_repo: SqliteBooksRepository::new(),
            authors_repo: SqliteAuthorsRepository::new(),
            config,
            pool
        }
    }

    pub async fn organize_book<ID>(&self, book_id: ID, reporter: Option<&OperationReporter>) -> Result<Book, OrganizeError>
    where ID: crate::repository::IntoUuid + Send + Sync
    {
        let book_id = book_id.into_uuid()?;

        let book = self.books_repo.by_id_fetch(self.pool, &book_id).await?
            .ok_or(OrganizeError::BookNotFound(book_id))?;

        if book.library_state() != LibraryState::Import {
            return Err(OrganizeError::WrongState { id: book_id, state: book.library_state() });
        }

        let source = book.file_path()
            .cloned()
            .ok_or(OrganizeError::NoFilePath(book_id))?;

        let target = self.target_path_for(&book).await?;

        if let Some(reporter) = reporter {
            reporter.info(format!("Organizing '{}' -> {}", book.title(), target.display()));
        }

        self.apply_strategy(&source, &target)?;

        // The file is in place; recompute identity from what actually
        // landed on disk, then flip the row.
        let new_hash = hash_file(&target)?;
        let now = Local::now().naive_local();

        let mut updated = book.clone();
        updated.relocate(&target, new_hash, now).map_err(RepositoryError::Validation)?;

        let mut tx = self.pool.begin().await?;
        self.books_repo.update(&mut *tx, &updated).await?;
        self.books_repo.transition_state(&mut *tx, &book_id, LibraryState::Import, LibraryState::Organized).await?;
        tx.commit().await?;

        self.books_repo.by_id_fetch(self.pool, &book_id).await?
            .ok_or(OrganizeError::BookNotFound(book_id))
    }

    /// `root_dir / rendered folder segments / rendered file name.ext`, with
    /// every component sanitized and empty segments dropped.
    pub async fn target_path_for(&self, book: &Book) -> Result<PathBuf, OrganizeError> {
        let author = match book.author_id() {
            Some(author_id) => {
                self.authors_repo.by_id_fetch(self.pool, author_id).await?
                    .map(|a| a.name().to_string())
                    .unwrap_or_default()
            },
            None => String::new()
        };

        let tokens = PatternTokens {
            author,
            series: book.series_name().unwrap_or_default().to_string(),
            series_number: book.series_number()
                .map(format_series_number)
                .unwrap_or_default(),
            title: book.title().to_string(),
            year: book.release_year().map(|y| y.to_string()).unwrap_or_default()
        };

        let mut target = self.config.root_dir.clone();
        for segment in tokens.render(&self.config.folder_pattern).split('/') {
            let cleaned = sanitize_component(segment);
            if !cleaned.is_empty() {
                target.push(cleaned);
            }
        }

        let file_stem = sanitize_component(&tokens.render(&self.config.file_pattern));
        if file_stem.is_empty() {
            return Err(OrganizeError::EmptyTargetPath);
        }

        let extension = book.format().unwrap_or("m4b");
        target.push(format!("{}.{}", file_stem, extension));

        Ok(target)
    }

    fn apply_strategy(&self, source: &Path, target: &Path) -> Result<(), OrganizeError> {
        match self.config.strategy {
            OrganizeStrategy::Hardlink => {
                match try_hardlink(source, target) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        // Cross-device links and filesystems without link
                        // support degrade to a verified copy.
                        log::warn!("Hardlink {} -> {} failed ({}), falling back to copy.", source.display(), target.display(), err);
                        self.run_file_op(source, target, true)
                    }
                }
            },
            OrganizeStrategy::Copy | OrganizeStrategy::Reflink => self.run_file_op(source, target, true),
            OrganizeStrategy::Move => self.run_file_op(source, target, false)
        }
    }

    fn run_file_op(&self, source: &Path, target: &Path, preserve_original: bool) -> Result<(), OrganizeError> {
        let config = SafeFileOpConfig {
            preserve_original,
            ..self.config.fileops.clone()
        };

        let mut op = SafeFileOp::new(source, target, config);
        op.execute()?;
        op.commit()?;

        Ok(())
    }
}

fn format_series_number(number: f64) -> String {
    if number.fract() == 0.0 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

fn try_hardlink(source: &Path, target: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::hard_link(source, target)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let source_ino = std::fs::metadata(source)?.ino();
        let target_ino = std::fs::metadata(target)?.ino();
        if source_ino != target_ino {
            return Err(std::io::Error::other("hard link landed on a different inode"));
        }
    }

    Ok(())
}
