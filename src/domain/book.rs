use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::utils::sanitize::clean_name;
use super::{validate_hash, ValidationError};

/// Lifecycle coordinate of a cataloged book.
///
/// Transitions outside [`LibraryState::can_transition`] are programmer
/// errors and must be rejected both here and by the store's CAS update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LibraryState {
    Wanted,
    Import,
    Organized,
    Deleted
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid 'library_state' value: '{0}'. Expected 'wanted', 'import', 'organized' or 'deleted'.")]
pub struct LibraryStateParseError(String);

impl TryFrom<&str> for LibraryState {
    type Error = LibraryStateParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().trim() {
            "wanted" => Ok(LibraryState::Wanted),
            "import" => Ok(LibraryState::Import),
            "organized" => Ok(LibraryState::Organized),
            "deleted" => Ok(LibraryState::Deleted),
            _ => Err(LibraryStateParseError(value.to_string())),
        }
    }
}

impl TryFrom<String> for LibraryState {
    type Error = LibraryStateParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        LibraryState::try_from(value.as_str())
    }
}

impl LibraryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryState::Wanted => "wanted",
            LibraryState::Import => "import",
            LibraryState::Organized => "organized",
            LibraryState::Deleted => "deleted"
        }
    }

    /// A book in an active state has a file on disk behind it.
    pub fn is_active(&self) -> bool {
        matches!(self, LibraryState::Import | LibraryState::Organized)
    }

    pub fn can_transition(&self, to: LibraryState) -> bool {
        use LibraryState::*;

        match (self, to) {
            (Wanted, Import) | (Wanted, Deleted) => true,
            (Import, Organized) | (Import, Wanted) | (Import, Deleted) => true,
            (Organized, Wanted) | (Organized, Deleted) => true,
            (Deleted, Wanted) | (Deleted, Import) => true,
            _ => false
        }
    }
}

impl Display for LibraryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid library state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: LibraryState,
    pub to: LibraryState
}

/// iTunes-sourced attributes carried verbatim from the originating library.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItunesFields {
    pub persistent_id: Option<String>,
    pub date_added: Option<NaiveDateTime>,
    pub play_count: Option<u32>,
    pub rating: Option<u8>,
    pub bookmark_ms: Option<u64>,
    pub last_played: Option<NaiveDateTime>,
    pub source_library_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Book {
    id: Uuid,
    title: String,
    author_id: Option<Uuid>,
    series_id: Option<Uuid>,
    series_name: Option<String>,
    series_number: Option<f64>,
    file_path: Option<PathBuf>,
    format: Option<String>,
    duration: Option<u32>,
    file_hash: Option<String>,
    original_file_hash: Option<String>,
    narrator: Option<String>,
    edition: Option<String>,
    release_year: Option<u32>,
    itunes: ItunesFields,
    library_state: LibraryState,
    is_primary_version: bool,
    version_group_id: Option<Uuid>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime
}

impl AsRef<Book> for Book {
    fn as_ref(&self) -> &Book {
        self
    }
}

impl Book {

    /// Creates a book that is tracked before any file exists for it.
    pub fn wanted<S>(id: Uuid, title: S, now: NaiveDateTime) -> Result<Self, ValidationError>
    where S: Into<String>
    {
        let clean_title = clean_name(&title.into());
        if clean_title.is_empty() { return Err(ValidationError::TitleIsEmptyString); }

        Ok(
            Self {
                id,
                title: clean_title,
                author_id: None,
                series_id: None,
                series_name: None,
                series_number: None,
                file_path: None,
                format: None,
                duration: None,
                file_hash: None,
                original_file_hash: None,
                narrator: None,
                edition: None,
                release_year: None,
                itunes: ItunesFields::default(),
                library_state: LibraryState::Wanted,
                is_primary_version: true,
                version_group_id: None,
                created_at: now,
                updated_at: now
            }
        )
    }

    /// Creates a freshly ingested book backed by a file on disk.
    ///
    /// The hash doubles as `original_file_hash`; that field never changes
    /// again for the lifetime of the row.
    pub fn with_file(
        id: Uuid,
        title: impl Into<String>,
        file_path: impl AsRef<Path>,
        format: impl Into<String>,
        file_hash: impl Into<String>,
        now: NaiveDateTime
    ) -> Result<Self, ValidationError> {
        let mut book = Self::wanted(id, title, now)?;

        let hash = file_hash.into();
        validate_hash(&hash)?;

        book.library_state = LibraryState::Import;
        book.file_path = Some(file_path.as_ref().to_path_buf());
        book.format = Some(format.into().trim_start_matches('.').to_lowercase());
        book.file_hash = Some(hash.clone());
        book.original_file_hash = Some(hash);

        Ok(book)
    }

    /// Reassembles a book from already-validated storage fields. Used by the
    /// repository row mapping only; skips per-field validation.
    #[allow(clippy::too_many_arguments)]
    pub fn from_storage(
        id: Uuid,
        title: String,
        author_id: Option<Uuid>,
        series_id: Option<Uuid>,
        series_name: Option<String>,
        series_number: Option<f64>,
        file_path: Option<PathBuf>,
        format: Option<String>,
        duration: Option<u32>,
        file_hash: Option<String>,
        original_file_hash: Option<String>,
        narrator: Option<String>,
        edition: Option<String>,
        release_year: Option<u32>,
        itunes: ItunesFields,
        library_state: LibraryState,
        is_primary_version: bool,
        version_group_id: Option<Uuid>,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime
    ) -> Result<Self, ValidationError> {
        let book = Self {
            id, title, author_id, series_id, series_name, series_number,
            file_path, format, duration, file_hash, original_file_hash,
            narrator, edition, release_year, itunes, library_state,
            is_primary_version, version_group_id, created_at, updated_at
        };
        book.check_state_invariants()?;

        Ok(book)
    }

    fn check_state_invariants(&self) -> Result<(), ValidationError> {
        match self.library_state {
            LibraryState::Wanted => {
                if self.file_path.is_some() || self.file_hash.is_some() {
                    return Err(ValidationError::WantedBookHasFile);
                }
            },
            state if state.is_active() => {
                if self.file_path.is_none() {
                    return Err(ValidationError::ActiveBookMissingFile(state.as_str().to_string()));
                }
            },
            _ => {}
        }

        Ok(())
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author_id(&self) -> Option<&Uuid> {
        self.author_id.as_ref()
    }

    pub fn series_id(&self) -> Option<&Uuid> {
        self.series_id.as_ref()
    }

    pub fn series_name(&self) -> Option<&str> {
        self.series_name.as_deref()
    }

    pub fn series_number(&self) -> Option<f64> {
        self.series_number
    }

    pub fn file_path(&self) -> Option<&PathBuf> {
        self.file_path.as_ref()
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn duration(&self) -> Option<u32> {
        self.duration
    }

    pub fn file_hash(&self) -> Option<&str> {
        self.file_hash.as_deref()
    }

    pub fn original_file_hash(&self) -> Option<&str> {
        self.original_file_hash.as_deref()
    }

    pub fn narrator(&self) -> Option<&str> {
        self.narrator.as_deref()
    }

    pub fn edition(&self) -> Option<&str> {
        self.edition.as_deref()
    }

    pub fn release_year(&self) -> Option<u32> {
        self.release_year
    }

    pub fn itunes(&self) -> &ItunesFields {
        &self.itunes
    }

    pub fn library_state(&self) -> LibraryState {
        self.library_state
    }

    pub fn is_primary_version(&self) -> bool {
        self.is_primary_version
    }

    pub fn version_group_id(&self) -> Option<&Uuid> {
        self.version_group_id.as_ref()
    }

    pub fn created_at(&self) -> &NaiveDateTime {
        &self.created_at
    }

    pub fn updated_at(&self) -> &NaiveDateTime {
        &self.updated_at
    }

    pub fn set_author(&mut self, author_id: Uuid) {
        self.author_id = Some(author_id);
    }

    pub fn set_series(&mut self, series_id: Uuid, series_number: Option<f64>) {
        self.series_id = Some(series_id);
        self.series_number = series_number;
    }

    pub fn set_series_name<S: Into<String>>(&mut self, name: S) {
        let name = name.into();
        if !name.trim().is_empty() {
            self.series_name = Some(name.trim().to_string());
        }
    }

    pub fn set_duration(&mut self, seconds: u32) {
        self.duration = Some(seconds);
    }

    pub fn set_narrator<S: Into<String>>(&mut self, narrator: S) {
        self.narrator = Some(narrator.into());
    }

    pub fn set_edition<S: Into<String>>(&mut self, edition: S) {
        self.edition = Some(edition.into());
    }

    pub fn set_release_year(&mut self, year: u32) {
        self.release_year = Some(year);
    }

    pub fn set_itunes(&mut self, fields: ItunesFields) -> Result<(), ValidationError> {
        if let Some(rating) = fields.rating {
            if rating > 100 {
                return Err(ValidationError::RatingOutOfRange(rating));
            }
        }
        self.itunes = fields;

        Ok(())
    }

    pub fn set_version_group(&mut self, group_id: Uuid, is_primary: bool) {
        self.version_group_id = Some(group_id);
        self.is_primary_version = is_primary;
    }

    /// Validates a lifecycle move against the transition table. The store's
    /// CAS update is the serialization point; this is the in-memory check.
    pub fn transition_to(&mut self, to: LibraryState, now: NaiveDateTime) -> Result<(), InvalidTransition> {
        if !self.library_state.can_transition(to) {
            return Err(InvalidTransition { from: self.library_state, to });
        }

        self.library_state = to;
        if to == LibraryState::Wanted {
            self.file_path = None;
            self.file_hash = None;
            self.format = None;
        }
        self.updated_at = now;

        Ok(())
    }

    /// Points the book at a new file after an organize move. The original
    /// import hash is left alone.
    pub fn relocate<P: AsRef<Path>>(&mut self, new_path: P, new_hash: String, now: NaiveDateTime) -> Result<(), ValidationError> {
        validate_hash(&new_hash)?;

        self.file_path = Some(new_path.as_ref().to_path_buf());
        self.file_hash = Some(new_hash);
        self.updated_at = now;

        Ok(())
    }

    /// Attaches a file to a wanted or deleted book being restored. Sets
    /// `original_file_hash` only if the row never had one.
    pub fn attach_file<P: AsRef<Path>>(&mut self, path: P, format: String, hash: String, now: NaiveDateTime) -> Result<(), ValidationError> {
        validate_hash(&hash)?;

        self.file_path = Some(path.as_ref().to_path_buf());
        self.format = Some(format.trim_start_matches('.').to_lowercase());
        self.file_hash = Some(hash.clone());
        if self.original_file_hash.is_none() {
            self.original_file_hash = Some(hash);
        }
        self.updated_at = now;

        Ok(())
    }
}
