use std::{path::{Path, PathBuf}, sync::{Arc, Mutex}};

use chrono::{Local, NaiveDateTime};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Watched path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Filesystem watch setup failed: {0}")]
    NotifyError(#[from] notify::Error)
}

/// Watches an external library file and latches a `changed` flag on any
/// write, create or rename touching it.
///
/// Advisory only. The fingerprint comparison is the authoritative check;
/// this exists so the UI can warn early that iTunes has been writing.
pub struct LibraryWatcher {
    path: PathBuf,
    changed_at: Arc<Mutex<Option<NaiveDateTime>>>,
    // Dropping the watcher tears down the OS-level watch.
    _watcher: RecommendedWatcher
}

impl LibraryWatcher {

    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, WatcherError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(WatcherError::PathNotFound(path));
        }

        let changed_at: Arc<Mutex<Option<NaiveDateTime>>> = Arc::new(Mutex::new(None));
        let flag = Arc::clone(&changed_at);
        let watched_file = path.clone();

        let mut watcher = notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
            let event = match result {
                Ok(event) => event,
                Err(err) => {
                    log::warn!("Library watcher error: {}", err);
                    return;
                }
            };

            let relevant_kind = matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            );
            // Some backends report canonicalized paths; match on the file
            // name as well so rename-into-place is not missed.
            let touches_library = event.paths.is_empty()
                || event.paths.iter().any(|p| {
                    p == &watched_file || p.file_name() == watched_file.file_name()
                });

            if relevant_kind && touches_library {
                if let Ok(mut guard) = flag.lock() {
                    *guard = Some(Local::now().naive_local());
                }
            }
        })?;

        // Watch the parent so rename-into-place (how iTunes saves) is seen.
        let watch_root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
        watcher.watch(&watch_root, RecursiveMode::NonRecursive)?;

        Ok(
            Self {
                path,
                changed_at,
                _watcher: watcher
            }
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_changed(&self) -> bool {
        self.changed_at.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    pub fn changed_at(&self) -> Option<NaiveDateTime> {
        self.changed_at.lock().ok().and_then(|guard| *guard)
    }

    /// Resets the flag after a successful import or write-back.
    pub fn clear_changed(&self) {
        if let Ok(mut guard) = self.changed_at.lock() {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use tempfile::tempdir;

    use super::*;

    fn wait_for_change(watcher: &LibraryWatcher) -> bool {
        // Watch backends deliver asynchronously; poll with a deadline.
        for _ in 0..50 {
            if watcher.has_changed() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        false
    }

    #[test]
    fn test_watch_missing_file_fails() {
        assert!(matches!(
            LibraryWatcher::new("/no/such/Library.xml"),
            Err(WatcherError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_write_sets_changed_flag() -> Result<(), WatcherError> {
        let dir = tempdir().unwrap();
        let library = dir.path().join("Library.xml");
        fs::write(&library, b"v1").unwrap();

        let watcher = LibraryWatcher::new(&library)?;
        assert!(!watcher.has_changed());

        fs::write(&library, b"v2").unwrap();

        assert!(wait_for_change(&watcher));
        assert!(watcher.changed_at().is_some());

        Ok(())
    }

    #[test]
    fn test_clear_changed_resets_flag() -> Result<(), WatcherError> {
        let dir = tempdir().unwrap();
        let library = dir.path().join("Library.xml");
        fs::write(&library, b"v1").unwrap();

        let watcher = LibraryWatcher::new(&library)?;
        fs::write(&library, b"v2").unwrap();
        wait_for_change(&watcher);

        watcher.clear_changed();

        assert!(!watcher.has_changed());
        assert!(watcher.changed_at().is_none());

        Ok(())
    }
}
