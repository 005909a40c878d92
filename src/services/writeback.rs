use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::Local;

use crate::itunes::fingerprint::LibraryFingerprint;
use crate::itunes::itl;
use crate::itunes::plist_codec;
use crate::itunes::read_any_library;

#[derive(Debug, thiserror::Error)]
pub enum WriteBackError {
    #[error("Library file does not exist: {0}")]
    LibraryNotFound(PathBuf),

    #[error("No updates to apply.")]
    NoUpdates,

    #[error("Library file was modified externally since the stored fingerprint was captured.")]
    LibraryModified {
        stored: Box<LibraryFingerprint>,
        current: Box<LibraryFingerprint>
    },

    #[error("Unsupported library file extension: {0}")]
    UnsupportedExtension(String),

    #[error(transparent)]
    Plist(#[from] plist_codec::PlistError),

    #[error(transparent)]
    Itl(#[from] itl::ItlError),

    #[error(transparent)]
    LibraryRead(#[from] crate::itunes::LibraryReadError),

    #[error(transparent)]
    IOError(#[from] std::io::Error)
}

#[derive(Clone, Debug)]
pub struct WriteBackUpdate {
    /// 16 hex chars, as stored in the library.
    pub persistent_id: String,
    pub old_path: Option<PathBuf>,
    pub new_path: PathBuf
}

#[derive(Clone, Debug)]
pub struct WriteBackRequest {
    pub library_path: PathBuf,
    pub updates: Vec<WriteBackUpdate>,
    pub create_backup: bool,
    pub backup_path: Option<PathBuf>,
    /// Set by the user after seeing a LibraryModified refusal; skips the
    /// fingerprint comparison entirely.
    pub force_overwrite: bool,
    pub stored_fingerprint: Option<LibraryFingerprint>
}

#[derive(Debug)]
pub struct WriteBackResult {
    pub success: bool,
    pub updated_count: usize,
    pub backup_path: Option<PathBuf>,
    pub message: String
}

/// One writer per library file. Internal callers serialize here; external
/// writers (iTunes itself) are caught by the fingerprint comparison.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

    let registry = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    guard.entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Applies organizer path changes back into the external iTunes library so
/// the player keeps working after files moved.
///
/// Order of operations is deliberate: the fingerprint refusal happens
/// before any other work, so a mismatch leaves the file byte-identical and
/// produces no backup.
pub fn write_back(request: &WriteBackRequest) -> Result<WriteBackResult, WriteBackError> {
    if !request.library_path.exists() {
        return Err(WriteBackError::LibraryNotFound(request.library_path.clone()));
    }
    if request.updates.is_empty() {
        return Err(WriteBackError::NoUpdates);
    }

    let lock = path_lock(&request.library_path);
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if !request.force_overwrite {
        if let Some(stored) = &request.stored_fingerprint {
            let current = LibraryFingerprint::compute(&request.library_path)?;
            if !stored.matches(&current) {
                return Err(WriteBackError::LibraryModified {
                    stored: Box::new(stored.clone()),
                    current: Box::new(current)
                });
            }
        }
    }

    let backup_path = if request.create_backup {
        let backup = request.backup_path.clone().unwrap_or_else(|| {
            let stamp = Local::now().format("%Y%m%d-%H%M%S");
            PathBuf::from(format!("{}.backup.{}", request.library_path.display(), stamp))
        });
        std::fs::copy(&request.library_path, &backup)?;
        Some(backup)
    } else {
        None
    };

    let updates_map: HashMap<String, PathBuf> = request.updates.iter()
        .map(|update| (update.persistent_id.clone(), update.new_path.clone()))
        .collect();

    let apply_result = apply_updates(&request.library_path, &updates_map);

    match apply_result {
        Ok(updated_count) => {
            Ok(WriteBackResult {
                success: true,
                updated_count,
                backup_path,
                message: format!("Updated {} track location(s).", updated_count)
            })
        },
        Err(err) => {
            if let Some(backup) = &backup_path {
                if let Err(restore_err) = std::fs::copy(backup, &request.library_path) {
                    log::error!("Failed to restore library backup {:?}: {}", backup, restore_err);
                }
            }
            Err(err)
        }
    }
}

fn apply_updates(library_path: &Path, updates: &HashMap<String, PathBuf>) -> Result<usize, WriteBackError> {
    let extension = library_path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "xml" => Ok(plist_codec::update_locations(library_path, updates)?),
        "itl" => Ok(itl::update_locations(library_path, library_path, updates)?),
        other => Err(WriteBackError::UnsupportedExtension(other.to_string()))
    }
}

/// Same parse and target checks as [`write_back`], zero mutation. Returns
/// human-readable warnings for ids the library does not know and for new
/// paths that do not exist on disk.
pub fn validate_write_back(request: &WriteBackRequest) -> Result<Vec<String>, WriteBackError> {
    if !request.library_path.exists() {
        return Err(WriteBackError::LibraryNotFound(request.library_path.clone()));
    }
    if request.updates.is_empty() {
        return Err(WriteBackError::NoUpdates);
    }

    let library = read_any_library(&request.library_path)?;
    let mut warnings = Vec::new();

    for update in &request.updates {
        if library.track_by_persistent_id(&update.persistent_id).is_none() {
            warnings.push(format!("Persistent id {} is not present in the library.", update.persistent_id));
        }
        if !update.new_path.exists() {
            warnings.push(format!("Target file does not exist: {}", update.new_path.display()));
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::itunes::location::encode_location;
    use crate::itunes::model::{Library, Track};
    use crate::itunes::plist_codec::{read_library, write_library};
    use crate::services::test_helpers::init_logger;
    use super::*;

    struct TestContext {
        temp_dir: TempDir
    }

    impl TestContext {
        fn new() -> Self {
            init_logger().ok();
            Self { temp_dir: tempfile::tempdir().unwrap() }
        }

        fn write_xml_library(&self) -> PathBuf {
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
                genre: Some("Audiobooks".to_string()),
                location: Some("file://localhost/Users/x/Music/Book.m4b".to_string()),
                ..Default::default()
            });

            let path = self.temp_dir.path().join("Library.xml");
            write_library(&path, &library).unwrap();
            path
        }

        fn writable_target(&self) -> PathBuf {
            let target = self.temp_dir.path().join("new/Book.m4b");
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(&target, b"the book moved here").unwrap();
            target
        }

        fn request(&self, library_path: PathBuf, new_path: PathBuf) -> WriteBackRequest {
            WriteBackRequest {
                library_path,
                updates: vec![WriteBackUpdate {
                    persistent_id: "ABCD1234EFGH5678".to_string(),
                    old_path: Some(PathBuf::from("/Users/x/Music/Book.m4b")),
                    new_path
                }],
                create_backup: true,
                backup_path: None,
                force_overwrite: false,
                stored_fingerprint: None
            }
        }
    }

    #[test]
    fn test_xml_write_back_round_trip() {
        let ctx = TestContext::new();
        let library_path = ctx.write_xml_library();
        let target = ctx.writable_target();

        let result = write_back(&ctx.request(library_path.clone(), target.clone())).unwrap();

        assert!(result.success);
        assert_eq!(result.updated_count, 1);
        let backup = result.backup_path.expect("backup requested");
        assert!(backup.exists());
        assert!(backup.to_string_lossy().contains("Library.xml.backup."));

        let reparsed = read_library(&library_path).unwrap();
        assert_eq!(
            reparsed.tracks["1"].location.as_deref(),
            Some(encode_location(&target).as_str())
        );
    }

    #[test]
    fn test_fingerprint_mismatch_blocks_and_leaves_file_untouched() {
        let ctx = TestContext::new();
        let library_path = ctx.write_xml_library();
        let target = ctx.writable_target();

        let stored = LibraryFingerprint::compute(&library_path).unwrap();

        // Out-of-band append, the way a syncing iTunes would.
        let mut contents = fs::read(&library_path).unwrap();
        contents.push(b'\n');
        fs::write(&library_path, &contents).unwrap();
        let bytes_before = fs::read(&library_path).unwrap();

        let mut request = ctx.request(library_path.clone(), target);
        request.stored_fingerprint = Some(stored);

        let result = write_back(&request);

        assert!(matches!(result, Err(WriteBackError::LibraryModified { .. })));
        assert_eq!(fs::read(&library_path).unwrap(), bytes_before);

        // No backup was created either.
        let siblings: Vec<_> = fs::read_dir(ctx.temp_dir.path()).unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.contains("backup"))
            .collect();
        assert!(siblings.is_empty());
    }

    #[test]
    fn test_force_overwrite_bypasses_fingerprint() {
        let ctx = TestContext::new();
        let library_path = ctx.write_xml_library();
        let target = ctx.writable_target();

        let stored = LibraryFingerprint::compute(&library_path).unwrap();
        let mut contents = fs::read(&library_path).unwrap();
        contents.push(b'\n');
        fs::write(&library_path, &contents).unwrap();

        let mut request = ctx.request(library_path, target);
        request.stored_fingerprint = Some(stored);
        request.force_overwrite = true;

        let result = write_back(&request).unwrap();
        assert!(result.success);
    }

    #[test]
    fn test_matching_fingerprint_proceeds() {
        let ctx = TestContext::new();
        let library_path = ctx.write_xml_library();
        let target = ctx.writable_target();

        let mut request = ctx.request(library_path.clone(), target);
        request.stored_fingerprint = Some(LibraryFingerprint::compute(&library_path).unwrap());

        let result = write_back(&request).unwrap();
        assert_eq!(result.updated_count, 1);
    }

    #[test]
    fn test_empty_updates_rejected() {
        let ctx = TestContext::new();
        let library_path = ctx.write_xml_library();

        let mut request = ctx.request(library_path, PathBuf::from("/x"));
        request.updates.clear();

        assert!(matches!(write_back(&request), Err(WriteBackError::NoUpdates)));
    }

    #[test]
    fn test_missing_library_rejected() {
        let ctx = TestContext::new();
        let request = ctx.request(ctx.temp_dir.path().join("absent.xml"), PathBuf::from("/x"));

        assert!(matches!(write_back(&request), Err(WriteBackError::LibraryNotFound(_))));
    }

    #[test]
    fn test_itl_write_back() {
        use crate::itunes::itl::test_support::*;
        use crate::itunes::itl::chunk::{build_hohm, HOHM_FILE_LOCATION};

        let ctx = TestContext::new();
        let library_path = ctx.temp_dir.path().join("Library.itl");

        let mut payload = make_htim(7, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        payload.extend(build_hohm(HOHM_FILE_LOCATION, "/music/old/song.mp3"));
        write_itl_file(&library_path, &payload, "12.0.1", false);

        let mut request = ctx.request(library_path.clone(), PathBuf::from("/music/new/song.mp3"));
        request.updates[0].persistent_id = "0102030405060708".to_string();

        let result = write_back(&request).unwrap();
        assert_eq!(result.updated_count, 1);

        let library = crate::itunes::itl::parse_itl(&library_path).unwrap();
        assert_eq!(library.tracks[0].location.as_deref(), Some("/music/new/song.mp3"));
        assert!(crate::itunes::itl::validate_itl(&library_path).is_ok());
    }

    #[test]
    fn test_validate_write_back_warns() {
        let ctx = TestContext::new();
        let library_path = ctx.write_xml_library();

        let request = WriteBackRequest {
            library_path,
            updates: vec![
                WriteBackUpdate {
                    persistent_id: "FFFFFFFFFFFFFFFF".to_string(),
                    old_path: None,
                    new_path: PathBuf::from("/does/not/exist.m4b")
                }
            ],
            create_backup: false,
            backup_path: None,
            force_overwrite: false,
            stored_fingerprint: None
        };

        let warnings = validate_write_back(&request).unwrap();

        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("FFFFFFFFFFFFFFFF"));
        assert!(warnings[1].contains("/does/not/exist.m4b"));
    }
}
