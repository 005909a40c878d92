use std::{ffi::OsStr, fs::File, io::BufReader, path::{Path, PathBuf}};

use chrono::Local;
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use rayon::prelude::*;
use sqlx::SqlitePool;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::domain::book::{Book, LibraryState};
use crate::repository::{
    RepositoryError, SqliteAuthorsRepository, SqliteBlockedHashesRepository,
    SqliteBooksRepository, SqliteSeriesRepository, SqliteSourcePathsRepository
};
use super::hasher::hash_file;
use super::queue::OperationReporter;

/// Container formats the scanner treats as audiobooks.
pub const AUDIOBOOK_EXTENSIONS: [&str; 7] = ["m4b", "m4a", "mp3", "aac", "flac", "ogg", "wma"];

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Walkdir error")]
    WalkdirError(#[from] walkdir::Error),

    #[error("Permission denied at {path}: {source}")]
    RootDirAccessError { path: String, source: std::io::Error },

    #[error(transparent)]
    IOError(#[from] std::io::Error)
}

#[derive(Debug, thiserror::Error)]
pub enum ScanIngestError {
    #[error(transparent)]
    ScanError(#[from] ScanError),

    #[error(transparent)]
    RepositoryError(#[from] RepositoryError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("Scan was cancelled.")]
    Cancelled
}

/// Tags pulled out of an audio container. Absent tags stay absent; the
/// ingest step falls back to filename-derived values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudiobookTags {
    pub title: Option<String>,
    pub author: Option<String>,
    pub album: Option<String>,
    pub narrator: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub duration_secs: u32
}

impl AudiobookTags {
    fn from_tagged(tagged_file: &TaggedFile) -> Self {
        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            return Self {
                duration_secs: tagged_file.properties().duration().as_secs().try_into().unwrap_or(0),
                ..Default::default()
            };
        };

        Self {
            title: tag.title().map(|s| s.to_string()),
            author: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
            narrator: None,
            genre: tag.genre().map(|s| s.to_string()),
            year: tag.year(),
            duration_secs: tagged_file.properties().duration().as_secs().try_into().unwrap_or(0)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AudiobookDescriptor {
    pub path: PathBuf,
    pub file_size: u64,
    pub format: String,
    pub tags: AudiobookTags
}

#[derive(Debug)]
pub struct ScanResult {
    pub descriptors: Vec<AudiobookDescriptor>,
    pub errors: Vec<ScanError>
}

impl ScanResult {
    fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            errors: Vec::new()
        }
    }
}

/// Walks one import root and produces descriptors for every audiobook
/// container found. Directories and symlinks are skipped; per-file failures
/// are soft, only an unreadable root is fatal.
pub struct AudiobookScanner {
    import_root: PathBuf
}

impl AudiobookScanner {

    pub fn new<P: AsRef<Path>>(import_root: P) -> Self {
        Self {
            import_root: import_root.as_ref().to_owned()
        }
    }

    pub fn scan(&self) -> Result<ScanResult, ScanError> {
        // A quick check to fail fast if the root directory is inaccessible.
        std::fs::read_dir(&self.import_root)
            .map_err(|e| ScanError::RootDirAccessError {
                path: self.import_root.display().to_string(),
                source: e,
            })?;

        let walker = WalkDir::new(&self.import_root).min_depth(1);
        let mut scan_result = ScanResult::new();

        for entry_result in walker {
            match entry_result {
                Err(err) => {
                    scan_result.errors.push(ScanError::WalkdirError(err));
                },
                Ok(dir_entry) => {
                    let path = dir_entry.path();

                    if path.is_dir() || path.is_symlink() {
                        continue;
                    }

                    if !self.is_audiobook_file(path) {
                        log::debug!("Skipping file with unsupported extension: {}", self.prettify_path(path));
                        continue;
                    }

                    match self.process_file(path) {
                        Ok(descriptor) => {
                            scan_result.descriptors.push(descriptor);
                        },
                        Err(err) => {
                            log::warn!("Skipping file {}: {}", self.prettify_path(path), err);
                            scan_result.errors.push(ScanError::IOError(err));
                        }
                    }
                }
            }
        }

        Ok(scan_result)
    }

    fn is_audiobook_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                AUDIOBOOK_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }

    fn process_file(&self, path: &Path) -> Result<AudiobookDescriptor, std::io::Error> {
        let file = File::open(path)?;

        let file_size = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                log::warn!("Failed to access metadata for {}: {}. Setting file_size to 0.", self.prettify_path(path), err);
                0u64
            }
        };

        let mut reader = BufReader::new(file);
        let tags = self.extract_tags(path, &mut reader);

        let format = path.extension()
            .unwrap_or_else(|| OsStr::new("unknown"))
            .to_string_lossy()
            .to_lowercase();

        Ok(
            AudiobookDescriptor {
                path: path.to_path_buf(),
                file_size,
                format,
                tags
            }
        )
    }

    fn extract_tags(&self, path: &Path, reader: &mut BufReader<File>) -> AudiobookTags {
        match Probe::new(reader).guess_file_type() {
            Ok(probe) => {
                match probe.read() {
                    Ok(tagged) => AudiobookTags::from_tagged(&tagged),
                    Err(err) => {
                        log::warn!("Could not read tags from {}: {}. Using defaults.", self.prettify_path(path), err);
                        AudiobookTags::default()
                    }
                }
            },
            Err(err) => {
                log::warn!("Failed to probe {}: {}", self.prettify_path(path), err);
                AudiobookTags::default()
            }
        }
    }

    fn prettify_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.import_root)
            .map(|path_suffix| {
                format!("./{}", path_suffix.display())
            })
            .unwrap_or_else(|_| path.to_path_buf().to_string_lossy().to_string())
    }
}

#[derive(Debug, Default)]
pub struct ScanIngestReport {
    pub scanned: usize,
    pub created: usize,
    pub skipped_duplicates: usize,
    pub skipped_blocked: usize,
    pub errors: Vec<String>
}

/// Drives scanned files into the catalog: hash, duplicate and blocked-hash
/// policy, author/series resolution, book creation.
pub struct ScanIngestService<'a> {
    books_repo: SqliteBooksRepository,
    authors_repo: SqliteAuthorsRepository,
    series_repo: SqliteSeriesRepository,
    source_paths_repo: SqliteSourcePathsRepository,
    blocked_repo: SqliteBlockedHashesRepository,
    pool: &'a SqlitePool
}

impl<'a> ScanIngestService<'a> {

    pub fn new(pool: &'a SqlitePool) -> Self {
        Self {
            books_repo: SqliteBooksRepository::new(),
            authors_repo: SqliteAuthorsRepository::new(),
            series_repo: SqliteSeriesRepository::new(),
            source_paths_repo: SqliteSourcePathsRepository::new(),
            blocked_repo: SqliteBlockedHashesRepository::new(),
            pool
        }
    }

    pub async fn ingest_root<P: AsRef<Path>>(&self, import_root: P, reporter: Option<&OperationReporter>) -> Result<ScanIngestReport, ScanIngestError> {
        let scanner = AudiobookScanner::new(import_root);
        let scan_result = scanner.scan()?;

        let mut report = ScanIngestReport {
            scanned: scan_result.descriptors.len(),
            ..Default::default()
        };
        for error in &scan_result.errors {
            report.errors.push(error.to_string());
        }

        // Whole-file hashing dominates the cost; spread it over cores
        // before the serial catalog phase.
        let hashed: Vec<(AudiobookDescriptor, Result<String, std::io::Error>)> = scan_result.descriptors
            .into_par_iter()
            .map(|descriptor| {
                let hash = hash_file(&descriptor.path);
                (descriptor, hash)
            })
            .collect();

        let total = hashed.len();
        for (index, (descriptor, hash_result)) in hashed.into_iter().enumerate() {
            if let Some(reporter) = reporter {
                if reporter.is_cancelled() {
                    return Err(ScanIngestError::Cancelled);
                }
            }

            let hash = match hash_result {
                Ok(hash) => hash,
                Err(err) => {
                    report.errors.push(format!("{}: {}", descriptor.path.display(), err));
                    continue;
                }
            };

            match self.ingest_one(&descriptor, &hash).await {
                Ok(IngestOutcome::Created) => report.created += 1,
                Ok(IngestOutcome::Duplicate) => {
                    log::info!("Duplicate content at {}, recording source path only.", descriptor.path.display());
                    report.skipped_duplicates += 1;
                },
                Ok(IngestOutcome::Blocked) => {
                    log::info!("Blocked hash at {}, skipping.", descriptor.path.display());
                    report.skipped_blocked += 1;
                },
                Err(err) => report.errors.push(format!("{}: {}", descriptor.path.display(), err))
            }

            if let Some(reporter) = reporter {
                if total > 0 && (index + 1) % 10 == 0 {
                    reporter.update_progress((((index + 1) * 100) / total) as u8);
                }
            }
        }

        if let Some(reporter) = reporter {
            reporter.update_progress(100);
        }

        Ok(report)
    }

    async fn ingest_one(&self, descriptor: &AudiobookDescriptor, hash: &str) -> Result<IngestOutcome, ScanIngestError> {
        if self.blocked_repo.contains(self.pool, hash).await? {
            return Ok(IngestOutcome::Blocked);
        }

        if let Some(existing) = self.books_repo.active_by_hash_fetch(self.pool, hash).await? {
            // Same content seen from a new (or repeated) location; keep the
            // provenance trail without creating a twin.
            self.source_paths_repo.record_import(self.pool, existing.id(), &descriptor.path).await?;
            return Ok(IngestOutcome::Duplicate);
        }

        let now = Local::now().naive_local();
        let title = descriptor.tags.title.clone().unwrap_or_else(|| {
            descriptor.path.file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| "Untitled".to_string())
        });

        let mut book = Book::with_file(
            Uuid::new_v4(),
            title,
            descriptor.path.to_string_lossy().to_string(),
            descriptor.format.clone(),
            hash.to_string(),
            now
        ).map_err(RepositoryError::Validation)?;

        book.set_duration(descriptor.tags.duration_secs);
        if let Some(year) = descriptor.tags.year {
            book.set_release_year(year);
        }

        let mut tx = self.pool.begin().await?;

        if let Some(author_name) = &descriptor.tags.author {
            let author = self.authors_repo.get_or_create(&mut tx, author_name).await?;
            book.set_author(*author.id());

            if let Some(album) = &descriptor.tags.album {
                if let Some(series_name) = crate::itunes::model::series_from_album(album) {
                    let series = self.series_repo.get_or_create(&mut tx, &series_name, Some(author.id())).await?;
                    book.set_series(*series.id(), None);
                    book.set_series_name(series_name);
                }
            }
        }

        let saved = self.books_repo.save(&mut *tx, &book).await?;
        self.source_paths_repo.record_import(&mut *tx, saved.id(), &descriptor.path).await?;

        tx.commit().await?;

        debug_assert_eq!(saved.library_state(), LibraryState::Import);
        Ok(IngestOutcome::Created)
    }
}

enum IngestOutcome {
    Created,
    Duplicate,
    Blocked
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use crate::services::test_helpers::*;
    use super::*;

    #[test]
    fn test_scan_empty_folder() -> Result<(), TestSetupError> {
        init_logger()?;

        let dir = tempdir()?;
        let scanner = AudiobookScanner::new(dir.path());

        let scan_result = scanner.scan().map_err(|e| TestSetupError::IOError(std::io::Error::other(e.to_string())))?;
        assert!(scan_result.descriptors.is_empty());

        Ok(())
    }

    #[test]
    fn test_scan_path_doesnt_exist() {
        let scanner = AudiobookScanner::new(PathBuf::from("/path/doesnt/exist"));
        assert!(scanner.scan().is_err());
    }

    #[test]
    fn test_scan_ignores_non_audio_files() -> Result<(), TestSetupError> {
        init_logger()?;

        let dir = tempdir()?;
        let _temp_files = create_temp_files(dir.path(), 2, "txt")?;

        let scanner = AudiobookScanner::new(dir.path());
        let scan_result = scanner.scan().unwrap();

        assert!(scan_result.descriptors.is_empty());

        Ok(())
    }

    #[test]
    fn test_scan_picks_up_audiobook_extensions() -> Result<(), TestSetupError> {
        init_logger()?;

        let dir = tempdir()?;
        fs::write(dir.path().join("book one.m4b"), b"dummy audio data")?;
        fs::write(dir.path().join("book two.mp3"), b"dummy audio data")?;
        fs::write(dir.path().join("notes.txt"), b"not audio")?;

        let scanner = AudiobookScanner::new(dir.path());
        let scan_result = scanner.scan().unwrap();

        assert_eq!(scan_result.descriptors.len(), 2);
        assert!(scan_result.descriptors.iter().any(|d| d.format == "m4b"));
        assert!(scan_result.descriptors.iter().any(|d| d.format == "mp3"));

        Ok(())
    }

    #[test]
    fn test_scan_nested_dirs() -> Result<(), TestSetupError> {
        init_logger()?;

        let dir = tempdir()?;
        let nested = dir.path().join("Author/Series");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join("Book 1.m4b"), b"dummy")?;

        let scanner = AudiobookScanner::new(dir.path());
        let scan_result = scanner.scan().unwrap();

        assert_eq!(scan_result.descriptors.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_creates_books() -> Result<(), TestSetupError> {
        init_logger()?;

        let pool = prepare_db().await?;
        let dir = tempdir()?;
        fs::write(dir.path().join("hyperion.m4b"), b"audio contents one")?;
        fs::write(dir.path().join("endymion.m4b"), b"audio contents two")?;

        let service = ScanIngestService::new(&pool);
        let report = service.ingest_root(dir.path(), None).await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.created, 2);
        assert_eq!(report.skipped_duplicates, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_same_content_twice_is_duplicate() -> Result<(), TestSetupError> {
        init_logger()?;

        let pool = prepare_db().await?;
        let dir = tempdir()?;
        fs::write(dir.path().join("hyperion.m4b"), b"identical contents")?;
        fs::write(dir.path().join("hyperion copy.m4b"), b"identical contents")?;

        let service = ScanIngestService::new(&pool);
        let report = service.ingest_root(dir.path(), None).await.unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.skipped_duplicates, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_skips_blocked_hash() -> Result<(), TestSetupError> {
        use chrono::Local;

        use crate::domain::blocked_hash::BlockedHash;
        use crate::repository::SqliteBlockedHashesRepository;
        use crate::services::hasher::hash_file;

        init_logger()?;

        let pool = prepare_db().await?;
        let dir = tempdir()?;
        let path = dir.path().join("rejected.m4b");
        fs::write(&path, b"contents nobody wants back")?;

        let hash = hash_file(&path)?;
        let blocked = BlockedHash::new(hash, "discarded on purpose".to_string(), Local::now().naive_local())?;
        SqliteBlockedHashesRepository::new().add(&pool, &blocked).await?;

        let service = ScanIngestService::new(&pool);
        let report = service.ingest_root(dir.path(), None).await.unwrap();

        assert_eq!(report.created, 0);
        assert_eq!(report.skipped_blocked, 1);

        Ok(())
    }
}
