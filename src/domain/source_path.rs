use std::path::PathBuf;

use chrono::NaiveDateTime;
use uuid::Uuid;

/// One filesystem location a given content hash has been imported from.
///
/// A book accumulates one of these per distinct source path; re-imports from
/// the same path bump `import_count` instead of producing duplicate noise.
#[derive(Clone, Debug)]
pub struct BookSourcePath {
    pub id: Uuid,
    pub book_id: Uuid,
    pub source_path: PathBuf,
    pub first_seen: NaiveDateTime,
    pub last_verified: Option<NaiveDateTime>,
    pub import_count: u32,
    pub still_exists: bool
}

impl BookSourcePath {
    pub fn new(book_id: Uuid, source_path: PathBuf, now: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id,
            source_path,
            first_seen: now,
            last_verified: Some(now),
            import_count: 1,
            still_exists: true
        }
    }
}
