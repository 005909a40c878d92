use chrono::NaiveDateTime;

use super::{validate_hash, ValidationError};

/// A permanently rejected content hash. Files carrying one of these are
/// skipped by every import and scan without raising an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockedHash {
    hash: String,
    reason: String,
    added_at: NaiveDateTime
}

impl BlockedHash {

    pub fn new<S>(hash: S, reason: S, now: NaiveDateTime) -> Result<Self, ValidationError>
    where S: Into<String>
    {
        let hash = hash.into();
        validate_hash(&hash)?;

        Ok(
            Self {
                hash,
                reason: reason.into(),
                added_at: now
            }
        )
    }

    pub fn from_storage(hash: String, reason: String, added_at: NaiveDateTime) -> Self {
        Self { hash, reason, added_at }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn added_at(&self) -> &NaiveDateTime {
        &self.added_at
    }
}
