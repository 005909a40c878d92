pub mod book;
pub mod author;
pub mod series;
pub mod source_path;
pub mod blocked_hash;
pub mod operation;

use thiserror;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Title field cannot be an empty string.")]
    TitleIsEmptyString,

    #[error("Name field cannot be an empty string.")]
    NameIsEmptyString,

    #[error("Not a 64-char lowercase hex SHA-256 digest: '{0}'")]
    InvalidHashFormat(String),

    #[error("Rating must be within 0..=100, got {0}.")]
    RatingOutOfRange(u8),

    #[error("A book in state 'wanted' cannot carry a file path or a file hash.")]
    WantedBookHasFile,

    #[error("A book in state '{0}' must carry a file path.")]
    ActiveBookMissingFile(String),
}

/// Checks that a string is a well-formed content hash the way the catalog
/// stores them: exactly 64 lowercase hex characters.
pub fn validate_hash(hash: &str) -> Result<(), ValidationError> {
    let well_formed = hash.len() == 64
        && hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));

    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::InvalidHashFormat(hash.to_string()))
    }
}
