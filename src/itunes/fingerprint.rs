use std::{fs::File, io::{BufReader, Read}, path::{Path, PathBuf}};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Serialize, Deserialize};

/// Change detector over an external library file: size plus whole-file
/// CRC32, with mtime carried for display only. CRC32 is deliberate, a
/// hundred-MB library fingerprints in well under a second; this is not an
/// integrity primitive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LibraryFingerprint {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: NaiveDateTime,
    pub crc32: u32
}

impl LibraryFingerprint {

    pub fn compute<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;

        let mtime = metadata.modified()
            .map(|system_time| DateTime::<Utc>::from(system_time).naive_utc())
            .unwrap_or_else(|_| Utc::now().naive_utc());

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = [0u8; 64 * 1024];

        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(
            Self {
                path: path.to_path_buf(),
                size: metadata.len(),
                mtime,
                crc32: hasher.finalize()
            }
        )
    }

    /// Equality contract: size and crc32. Some filesystems drift mtime, so
    /// it never participates.
    pub fn matches(&self, other: &LibraryFingerprint) -> bool {
        self.size == other.size && self.crc32 == other.crc32
    }
}
