use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Local;
use futures::{stream, StreamExt};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::book::{Book, ItunesFields, LibraryState};
use crate::itunes::fingerprint::LibraryFingerprint;
use crate::itunes::location::{decode_location, LocationError};
use crate::itunes::model::{self, Library, Track};
use crate::itunes::{read_any_library, LibraryReadError};
use crate::repository::{
    RepositoryError, SqliteAuthorsRepository, SqliteBlockedHashesRepository,
    SqliteBooksRepository, SqliteFingerprintsRepository, SqliteSeriesRepository,
    SqliteSourcePathsRepository
};
use super::hasher::hash_file;
use super::organizer::OrganizerService;
use super::queue::OperationReporter;

/// Existence probes during validation run on this many parallel workers.
const VALIDATE_STAT_WORKERS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ImportServiceError {
    #[error("iTunes library not found at {0}")]
    LibraryNotFound(PathBuf),

    #[error(transparent)]
    LibraryRead(#[from] LibraryReadError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error("Import was cancelled.")]
    Cancelled,

    #[error(transparent)]
    Organize(#[from] super::organizer::OrganizeError)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportMode {
    /// Files are already where they belong; rows land in `organized`.
    Organized,
    /// Catalog only; rows land in `import` for a later organize pass.
    Import,
    /// Catalog and immediately run the organizer on each new book.
    Organize
}

/// Ordered prefix rewrite applied to iTunes locations before decoding, for
/// libraries whose files live elsewhere now (drive letters, NAS moves).
#[derive(Clone, Debug)]
pub struct PathMapping {
    pub from: String,
    pub to: String
}

/// First matching prefix wins; backslashes are normalized for the
/// comparison so Windows-flavored mappings match either way.
pub fn apply_path_mappings(location: &str, mappings: &[PathMapping]) -> String {
    let normalized = location.replace('\\', "/");

    for mapping in mappings {
        let from = mapping.from.replace('\\', "/");
        if let Some(suffix) = normalized.strip_prefix(&from) {
            return format!("{}{}", mapping.to.replace('\\', "/"), suffix);
        }
    }

    normalized
}

#[derive(Clone, Debug)]
pub struct ImportOptions {
    pub mode: ImportMode,
    pub skip_duplicates: bool,
    pub import_playlists: bool,
    pub path_mappings: Vec<PathMapping>
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            mode: ImportMode::Import,
            skip_duplicates: true,
            import_playlists: false,
            path_mappings: Vec::new()
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ValidationReport {
    pub total_tracks: usize,
    pub audiobook_tracks: usize,
    pub files_found: usize,
    pub files_missing: usize,
    pub missing_paths: Vec<PathBuf>,
    /// Distinct `file://localhost/<drive>/<dir1>/<dir2>` prefixes, to seed
    /// a mapping UI.
    pub path_prefixes: Vec<String>,
    pub estimated_time: String
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub total_audiobooks: usize,
    pub imported: usize,
    pub wanted: usize,
    pub organized: usize,
    pub skipped_duplicates: usize,
    pub skipped_blocked: usize,
    pub errors: Vec<String>
}

pub struct ITunesImportService<'a> {
    books_repo: SqliteBooksRepository,
    authors_repo: SqliteAuthorsRepository,
    series_repo: SqliteSeriesRepository,
    source_paths_repo: SqliteSourcePathsRepository,
    blocked_repo: SqliteBlockedHashesRepository,
    fingerprints_repo: SqliteFingerprintsRepository,
    pool: &'a SqlitePool
}

impl<'a> ITunesImportService<'a> {

    pub fn new(pool: &'a SqlitePool) -> Self {
        Self {
            books_repo: SqliteBooksRepository::new(),
            authors_repo: SqliteAuthorsRepository::new(),
            series_repo: SqliteSeriesRepository::new(),
            source_paths_repo: SqliteSourcePathsRepository::new(),
            blocked_repo: SqliteBlockedHashesRepository::new(),
            fingerprints_repo: SqliteFingerprintsRepository::new(),
            pool
        }
    }

    /// Dry-run over a library: counts audiobooks, probes every decoded
    /// location for existence (no hashing), and gathers the distinct
    /// location prefixes a mapping UI would offer.
    pub async fn validate<P: AsRef<Path>>(&self, library_path: P, mappings: &[PathMapping]) -> Result<ValidationReport, ImportServiceError> {
        let library_path = library_path.as_ref();
        if !library_path.exists() {
            return Err(ImportServiceError::LibraryNotFound(library_path.to_path_buf()));
        }

        let library = read_any_library(library_path)?;

        let mut report = ValidationReport {
            total_tracks: library.tracks.len(),
            ..Default::default()
        };

        let mut prefixes = BTreeSet::new();
        let mut candidate_paths = Vec::new();

        for track in library.audiobook_tracks() {
            report.audiobook_tracks += 1;

            let Some(location) = track.location.as_deref() else {
                continue;
            };

            if let Some(prefix) = location_prefix(location) {
                prefixes.insert(prefix);
            }

            let remapped = apply_path_mappings(location, mappings);
            match decode_location(&remapped) {
                Ok(path) => candidate_paths.push(path),
                Err(LocationError::Empty) => {},
                Err(err) => {
                    log::warn!("Undecodable location '{}': {}", location, err);
                }
            }
        }

        let results: Vec<(PathBuf, bool)> = stream::iter(candidate_paths)
            .map(|path| async move {
                let exists = tokio::fs::metadata(&path).await.is_ok();
                (path, exists)
            })
            .buffer_unordered(VALIDATE_STAT_WORKERS)
            .collect()
            .await;

        for (path, exists) in results {
            if exists {
                report.files_found += 1;
            } else {
                report.files_missing += 1;
                report.missing_paths.push(path);
            }
        }
        report.missing_paths.sort();

        report.path_prefixes = prefixes.into_iter().collect();
        report.estimated_time = format_estimate_seconds(report.files_found as u64);

        Ok(report)
    }

    /// The full import pass per the configured mode. The fingerprint of the
    /// library file is captured first and stored durably so a later
    /// write-back can detect external edits.
    pub async fn run<P: AsRef<Path>>(
        &self,
        library_path: P,
        options: &ImportOptions,
        organizer: Option<&OrganizerService<'a>>,
        reporter: Option<&OperationReporter>
    ) -> Result<ImportReport, ImportServiceError> {
        let library_path = library_path.as_ref();
        if !library_path.exists() {
            return Err(ImportServiceError::LibraryNotFound(library_path.to_path_buf()));
        }

        let library = read_any_library(library_path)?;

        let fingerprint = LibraryFingerprint::compute(library_path)?;
        self.fingerprints_repo.store(self.pool, &fingerprint).await?;

        let audiobooks: Vec<&Track> = library.audiobook_tracks().collect();
        let mut report = ImportReport {
            total_audiobooks: audiobooks.len(),
            ..Default::default()
        };

        for (index, track) in audiobooks.iter().copied().enumerate() {
            if let Some(reporter) = reporter {
                if reporter.is_cancelled() {
                    return Err(ImportServiceError::Cancelled);
                }
            }

            if let Err(err) = self.import_track(track, &library, library_path, options, organizer, &mut report).await {
                let label = track.name.as_deref().unwrap_or("<unnamed>");
                log::warn!("Import of '{}' failed: {}", label, err);
                report.errors.push(format!("{}: {}", label, err));
            }

            if let Some(reporter) = reporter {
                if (index + 1) % 10 == 0 || index + 1 == audiobooks.len() {
                    let progress = ((index + 1) * 100 / audiobooks.len().max(1)) as u8;
                    reporter.update_progress(progress);
                    reporter.info(format!("{}/{} audiobooks processed", index + 1, audiobooks.len()));
                }
            }
        }

        Ok(report)
    }

    async fn import_track(
        &self,
        track: &Track,
        library: &Library,
        library_path: &Path,
        options: &ImportOptions,
        organizer: Option<&OrganizerService<'a>>,
        report: &mut ImportReport
    ) -> Result<(), ImportServiceError> {
        let resolved = track.location.as_deref()
            .map(|location| apply_path_mappings(location, &options.path_mappings))
            .map(|remapped| decode_location(&remapped))
            .transpose()
            .ok()
            .flatten();

        let file_path = resolved.filter(|path| path.exists());

        let Some(file_path) = file_path else {
            // Track the book without a file; it can be re-attached later.
            let mut book = wanted_book_from_track(track, library_path)?;
            self.resolve_entities(&mut book, track).await?;
            let saved = self.books_repo.save(self.pool, &book).await?;
            if options.import_playlists {
                self.attach_playlist_tags(&saved, track, library).await?;
            }
            report.wanted += 1;
            return Ok(());
        };

        let hash = hash_file(&file_path)?;

        if options.skip_duplicates {
            if self.blocked_repo.contains(self.pool, &hash).await? {
                log::info!("Hash for '{}' is blocked, skipping.", file_path.display());
                report.skipped_blocked += 1;
                return Ok(());
            }

            if let Some(existing) = self.books_repo.active_by_hash_fetch(self.pool, &hash).await? {
                self.source_paths_repo.record_import(self.pool, existing.id(), &file_path).await?;
                log::info!("Duplicate content for '{}', source path recorded.", file_path.display());
                report.skipped_duplicates += 1;
                return Ok(());
            }
        }

        let mut book = book_from_track(track, &file_path, &hash, library_path)?;
        self.resolve_entities(&mut book, track).await?;

        let mut tx = self.pool.begin().await?;
        let saved = self.books_repo.save(&mut *tx, &book).await?;
        self.source_paths_repo.record_import(&mut *tx, saved.id(), &file_path).await?;
        tx.commit().await?;

        if options.import_playlists {
            self.attach_playlist_tags(&saved, track, library).await?;
        }

        match options.mode {
            ImportMode::Import => {
                report.imported += 1;
            },
            ImportMode::Organized => {
                self.books_repo
                    .transition_state(self.pool, saved.id(), LibraryState::Import, LibraryState::Organized)
                    .await?;
                report.organized += 1;
            },
            ImportMode::Organize => {
                match organizer {
                    Some(organizer) => {
                        organizer.organize_book(saved.id(), None).await?;
                        report.organized += 1;
                    },
                    None => {
                        log::warn!("Import mode 'organize' without an organizer; leaving book in 'import'.");
                        report.imported += 1;
                    }
                }
            }
        }

        Ok(())
    }

    async fn resolve_entities(&self, book: &mut Book, track: &Track) -> Result<(), ImportServiceError> {
        let mut connection = self.pool.acquire().await?;

        let author_id = match track.artist.as_deref().filter(|artist| !artist.trim().is_empty()) {
            Some(artist) => {
                let author = self.authors_repo.get_or_create(&mut connection, artist).await?;
                book.set_author(*author.id());
                Some(*author.id())
            },
            None => None
        };

        if let Some(album) = track.album.as_deref() {
            if let Some(series_name) = model::series_from_album(album) {
                let series = self.series_repo
                    .get_or_create(&mut connection, &series_name, author_id.as_ref())
                    .await?;
                book.set_series(*series.id(), None);
                book.set_series_name(series_name);
            }
        }

        Ok(())
    }

    async fn attach_playlist_tags(&self, book: &Book, track: &Track, library: &Library) -> Result<(), ImportServiceError> {
        let tags = model::playlist_tags(track.track_id, &library.playlists);
        if tags.is_empty() {
            return Ok(());
        }

        let mut connection = self.pool.acquire().await?;
        self.books_repo.add_tags(&mut connection, book.id(), &tags).await?;

        Ok(())
    }
}

/// Converts an iTunes track plus its on-disk file into a catalog row in
/// state `import`.
pub fn book_from_track(track: &Track, file_path: &Path, hash: &str, library_path: &Path) -> Result<Book, RepositoryError> {
    let title = track.name.clone().unwrap_or_else(|| {
        file_path.file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "Untitled".to_string())
    });

    let format = file_path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let now = Local::now().naive_local();
    let mut book = Book::with_file(
        Uuid::new_v4(),
        title,
        file_path.to_string_lossy().to_string(),
        format,
        hash.to_string(),
        now
    ).map_err(RepositoryError::Validation)?;

    apply_track_fields(&mut book, track, library_path)?;
    Ok(book)
}

fn wanted_book_from_track(track: &Track, library_path: &Path) -> Result<Book, RepositoryError> {
    let title = track.name.clone().unwrap_or_else(|| "Untitled".to_string());

    let now = Local::now().naive_local();
    let mut book = Book::wanted(Uuid::new_v4(), title, now)
        .map_err(RepositoryError::Validation)?;

    apply_track_fields(&mut book, track, library_path)?;
    Ok(book)
}

fn apply_track_fields(book: &mut Book, track: &Track, library_path: &Path) -> Result<(), RepositoryError> {
    book.set_duration((track.total_time_ms / 1000) as u32);

    // The album artist is the narrator by iTunes convention, unless it just
    // repeats the author.
    if let (Some(album_artist), artist) = (track.album_artist.as_deref(), track.artist.as_deref()) {
        if Some(album_artist) != artist && !album_artist.trim().is_empty() {
            book.set_narrator(album_artist);
        }
    }

    if let Some(comments) = track.comments.as_deref() {
        if !comments.is_empty() {
            book.set_edition(comments);
        }
    }

    if let Some(year) = track.year {
        if year > 0 {
            book.set_release_year(year as u32);
        }
    }

    book.set_itunes(ItunesFields {
        persistent_id: track.persistent_id.clone(),
        date_added: track.date_added,
        play_count: Some(track.play_count as u32),
        rating: Some(track.rating),
        bookmark_ms: Some(track.bookmark_ms),
        last_played: track.play_date
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc()),
        source_library_path: Some(library_path.to_path_buf())
    }).map_err(RepositoryError::Validation)?;

    Ok(())
}

/// `file://localhost/<drive>/<dir1>/<dir2>` of a location URL, used to seed
/// the path-mapping UI.
fn location_prefix(location: &str) -> Option<String> {
    let rest = location.strip_prefix("file://localhost/")
        .or_else(|| location.strip_prefix("file:///"))?;

    let components: Vec<&str> = rest.split('/').collect();
    if components.len() < 3 {
        return None;
    }

    Some(format!("file://localhost/{}/{}/{}", components[0], components[1], components[2]))
}

/// Found-files count doubles as a seconds estimate, rendered human-shaped.
fn format_estimate_seconds(seconds: u64) -> String {
    match seconds {
        0..=59 => format!("{} seconds", seconds),
        60..=3599 => format!("{} minutes", seconds / 60),
        _ => format!("{} hours {} minutes", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use sqlx::SqlitePool;
    use tempfile::TempDir;

    use crate::itunes::model::Playlist;
    use crate::itunes::plist_codec::write_library;
    use crate::repository::SqliteFingerprintsRepository;
    use crate::services::test_helpers::*;
    use super::*;

    struct TestContext {
        pool: SqlitePool,
        temp_dir: TempDir
    }

    impl TestContext {
        async fn new() -> Result<Self, TestSetupError> {
            init_logger()?;
            Ok(Self {
                pool: prepare_db().await?,
                temp_dir: tempfile::tempdir()?
            })
        }

        /// One audiobook track pointing at a real file, one music track,
        /// one audiobook with a dead location.
        fn write_sample_library(&self) -> std::path::PathBuf {
            let book_path = self.temp_dir.path().join("audiobooks/hyperion.m4b");
            fs::create_dir_all(book_path.parent().unwrap()).unwrap();
            fs::write(&book_path, b"hyperion audio data").unwrap();

            let mut library = Library {
                major_version: 1,
                minor_version: 1,
                app_version: "12.0.1".to_string(),
                ..Default::default()
            };

            library.tracks.insert("1".to_string(), Track {
                track_id: 1,
                persistent_id: Some("ABCD1234EFGH5678".to_string()),
                name: Some("Hyperion".to_string()),
                artist: Some("Dan Simmons".to_string()),
                album_artist: Some("Marc Vietor".to_string()),
                album: Some("Hyperion Cantos, Book 1".to_string()),
                genre: Some("Audiobooks".to_string()),
                kind: Some("Audiobook file".to_string()),
                comments: Some("Unabridged".to_string()),
                year: Some(1989),
                total_time_ms: 74_700_000,
                location: Some(crate::itunes::location::encode_location(&book_path)),
                ..Default::default()
            });

            library.tracks.insert("2".to_string(), Track {
                track_id: 2,
                persistent_id: Some("0000000000000002".to_string()),
                name: Some("Some Song".to_string()),
                kind: Some("AAC audio file".to_string()),
                genre: Some("Rock".to_string()),
                location: Some("file://localhost/music/song.mp3".to_string()),
                ..Default::default()
            });

            library.tracks.insert("3".to_string(), Track {
                track_id: 3,
                persistent_id: Some("0000000000000003".to_string()),
                name: Some("Missing Book".to_string()),
                genre: Some("Audiobooks".to_string()),
                location: Some("file://localhost/gone/lost.m4b".to_string()),
                ..Default::default()
            });

            library.playlists.push(Playlist {
                playlist_id: 900,
                name: "Sci-Fi Marathon".to_string(),
                track_ids: vec![1]
            });
            library.playlists.push(Playlist {
                playlist_id: 901,
                name: "Audiobooks".to_string(),
                track_ids: vec![1]
            });

            let library_path = self.temp_dir.path().join("Library.xml");
            write_library(&library_path, &library).unwrap();
            library_path
        }
    }

    #[tokio::test]
    async fn test_validate_counts_and_estimates() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let library_path = ctx.write_sample_library();

        let service = ITunesImportService::new(&ctx.pool);
        let report = service.validate(&library_path, &[]).await.unwrap();

        assert_eq!(report.total_tracks, 3);
        assert_eq!(report.audiobook_tracks, 2);
        assert_eq!(report.files_found, 1);
        assert_eq!(report.files_missing, 1);
        assert_eq!(report.missing_paths, vec![std::path::PathBuf::from("/gone/lost.m4b")]);
        assert_eq!(report.estimated_time, "1 seconds");
        assert!(!report.path_prefixes.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_validate_missing_library_fails() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;

        let service = ITunesImportService::new(&ctx.pool);
        let result = service.validate(ctx.temp_dir.path().join("nope.xml"), &[]).await;

        assert!(matches!(result, Err(ImportServiceError::LibraryNotFound(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_import_creates_book_and_fingerprint() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let library_path = ctx.write_sample_library();

        let service = ITunesImportService::new(&ctx.pool);
        let report = service.run(&library_path, &ImportOptions::default(), None, None).await.unwrap();

        assert_eq!(report.total_audiobooks, 2);
        assert_eq!(report.imported, 1);
        assert_eq!(report.wanted, 1);

        let books_repo = crate::repository::SqliteBooksRepository::new();
        let imported = books_repo.list_by_state(&ctx.pool, LibraryState::Import).await?;
        assert_eq!(imported.len(), 1);

        let book = &imported[0];
        assert_eq!(book.title(), "Hyperion");
        assert_eq!(book.narrator(), Some("Marc Vietor"));
        assert_eq!(book.edition(), Some("Unabridged"));
        assert_eq!(book.release_year(), Some(1989));
        assert_eq!(book.duration(), Some(74_700));
        assert_eq!(book.series_name(), Some("Hyperion Cantos"));
        assert_eq!(book.itunes().persistent_id.as_deref(), Some("ABCD1234EFGH5678"));

        let fingerprint = SqliteFingerprintsRepository::new()
            .for_library(&ctx.pool, &library_path)
            .await?;
        assert!(fingerprint.is_some());

        let wanted = books_repo.list_by_state(&ctx.pool, LibraryState::Wanted).await?;
        assert_eq!(wanted.len(), 1);
        assert_eq!(wanted[0].title(), "Missing Book");

        Ok(())
    }

    #[tokio::test]
    async fn test_second_import_skips_duplicate_and_counts_source() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let library_path = ctx.write_sample_library();

        let service = ITunesImportService::new(&ctx.pool);
        service.run(&library_path, &ImportOptions::default(), None, None).await.unwrap();
        let second = service.run(&library_path, &ImportOptions::default(), None, None).await.unwrap();

        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped_duplicates, 1);

        let books_repo = crate::repository::SqliteBooksRepository::new();
        let imported = books_repo.list_by_state(&ctx.pool, LibraryState::Import).await?;
        assert_eq!(imported.len(), 1);

        let source_paths = crate::repository::SqliteSourcePathsRepository::new()
            .for_book(&ctx.pool, imported[0].id())
            .await?;
        assert_eq!(source_paths.len(), 1);
        assert_eq!(source_paths[0].import_count, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_import_playlists_attach_tags() -> Result<(), TestSetupError> {
        let ctx = TestContext::new().await?;
        let library_path = ctx.write_sample_library();

        let options = ImportOptions {
            import_playlists: true,
            ..Default::default()
        };
        let service = ITunesImportService::new(&ctx.pool);
        service.run(&library_path, &options, None, None).await.unwrap();

        let books_repo = crate::repository::SqliteBooksRepository::new();
        let imported = books_repo.list_by_state(&ctx.pool, LibraryState::Import).await?;
        let tags = books_repo.tags_for_book(&ctx.pool, imported[0].id()).await?;

        // The built-in "Audiobooks" playlist never becomes a tag.
        assert_eq!(tags, vec!["sci-fi marathon".to_string()]);

        Ok(())
    }

    #[tokio::test]
    async fn test_import_blocked_hash_is_skipped() -> Result<(), TestSetupError> {
        use crate::domain::blocked_hash::BlockedHash;
        use crate::repository::SqliteBlockedHashesRepository;

        let ctx = TestContext::new().await?;
        let library_path = ctx.write_sample_library();

        let book_path = ctx.temp_dir.path().join("audiobooks/hyperion.m4b");
        let hash = hash_file(&book_path)?;
        SqliteBlockedHashesRepository::new()
            .add(&ctx.pool, &BlockedHash::new(hash, "not this one".to_string(), Local::now().naive_local())?)
            .await?;

        let service = ITunesImportService::new(&ctx.pool);
        let report = service.run(&library_path, &ImportOptions::default(), None, None).await.unwrap();

        assert_eq!(report.imported, 0);
        assert_eq!(report.skipped_blocked, 1);

        Ok(())
    }

    #[test]
    fn test_path_mapping_first_match_wins() {
        let mappings = vec![
            PathMapping { from: "file://localhost/D:/Audio".to_string(), to: "file://localhost/mnt/audio".to_string() },
            PathMapping { from: "file://localhost/D:".to_string(), to: "file://localhost/mnt/d".to_string() }
        ];

        assert_eq!(
            apply_path_mappings("file://localhost/D:/Audio/book.m4b", &mappings),
            "file://localhost/mnt/audio/book.m4b"
        );
        assert_eq!(
            apply_path_mappings("file://localhost/D:/Other/x.m4b", &mappings),
            "file://localhost/mnt/d/Other/x.m4b"
        );
    }

    #[test]
    fn test_path_mapping_normalizes_backslashes() {
        let mappings = vec![
            PathMapping { from: "file://localhost/D:\\Audio".to_string(), to: "file://localhost/mnt/audio".to_string() }
        ];

        assert_eq!(
            apply_path_mappings("file://localhost/D:/Audio/book.m4b", &mappings),
            "file://localhost/mnt/audio/book.m4b"
        );
    }

    #[test]
    fn test_location_prefix_extraction() {
        assert_eq!(
            location_prefix("file://localhost/Users/x/Music/Audiobooks/b.m4b"),
            Some("file://localhost/Users/x/Music".to_string())
        );
        assert_eq!(location_prefix("file://localhost/short"), None);
    }

    #[test]
    fn test_estimate_formatting() {
        assert_eq!(format_estimate_seconds(45), "45 seconds");
        assert_eq!(format_estimate_seconds(180), "3 minutes");
        assert_eq!(format_estimate_seconds(7320), "2 hours 2 minutes");
    }
}
