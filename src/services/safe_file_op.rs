use std::{fs, io, path::{Path, PathBuf}, thread, time::Duration};

use chrono::Local;

use super::hasher::hash_file;

const BACKUP_SUFFIX: &str = ".backup";
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4)
];

#[derive(Debug, thiserror::Error)]
pub enum FileOpError {
    #[error("Source file does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error("Checksum mismatch after copy. Expected {expected}, got {actual}. Target restored from backup.")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Operation has not been executed yet, nothing to {0}.")]
    NotExecuted(&'static str),

    #[error("Failed to restore backup over {target}: {source}")]
    RestoreFailed { target: PathBuf, source: std::io::Error }
}

#[derive(Debug, Clone)]
pub struct SafeFileOpConfig {
    /// Where backups of overwritten targets go. Defaults to
    /// `<target_dir>/.audiobook-backups`.
    pub backup_dir: Option<PathBuf>,
    pub verify_checksums: bool,
    /// true = copy semantics, false = move semantics.
    pub preserve_original: bool,
    /// At most this many backups are kept per target basename; 0 disables
    /// pruning.
    pub max_backups: usize
}

impl Default for SafeFileOpConfig {
    fn default() -> Self {
        Self {
            backup_dir: None,
            verify_checksums: true,
            preserve_original: true,
            max_backups: 3
        }
    }
}

/// A scoped transaction over one source -> target move-or-copy.
///
/// After a successful `execute`, the target is byte-identical to the source
/// and a backup of any prior target contents exists until `commit` deletes
/// it (or `rollback` restores it). If `execute` fails, the target is exactly
/// what it was before the call.
pub struct SafeFileOp {
    source: PathBuf,
    target: PathBuf,
    config: SafeFileOpConfig,
    backup_path: Option<PathBuf>,
    executed: bool,
    #[cfg(test)]
    post_copy_hook: Option<Box<dyn Fn(&Path)>>
}

impl SafeFileOp {

    pub fn new<P: AsRef<Path>>(source: P, target: P, config: SafeFileOpConfig) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            target: target.as_ref().to_path_buf(),
            config,
            backup_path: None,
            executed: false,
            #[cfg(test)]
            post_copy_hook: None
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn backup_path(&self) -> Option<&PathBuf> {
        self.backup_path.as_ref()
    }

    pub fn execute(&mut self) -> Result<(), FileOpError> {
        if !self.source.exists() {
            return Err(FileOpError::SourceNotFound(self.source.clone()));
        }

        let source_hash = if self.config.verify_checksums {
            Some(with_retries(|| hash_file(&self.source))?)
        } else {
            None
        };

        if self.target.exists() {
            let backup = self.make_backup_path()?;
            with_retries(|| fs::copy(&self.target, &backup).map(|_| ()))?;
            self.backup_path = Some(backup);
        }

        if let Some(parent) = self.target.parent() {
            with_retries(|| create_dirs_0755(parent))?;
        }

        let copy_result = with_retries(|| copy_with_fsync(&self.source, &self.target));
        if let Err(err) = copy_result {
            self.restore_backup_best_effort();
            return Err(err.into());
        }

        #[cfg(test)]
        if let Some(hook) = &self.post_copy_hook {
            hook(&self.target);
        }

        if let Some(expected) = source_hash {
            let actual = with_retries(|| hash_file(&self.target))?;
            if actual != expected {
                self.restore_backup_consuming()?;
                return Err(FileOpError::IntegrityMismatch { expected, actual });
            }
        }

        self.executed = true;

        if !self.config.preserve_original && self.source != self.target {
            if let Err(err) = fs::remove_file(&self.source) {
                log::warn!("Failed to delete source {:?} after move: {}", self.source, err);
            }
        }

        if self.config.max_backups > 0 {
            if let Err(err) = self.prune_backups() {
                log::warn!("Backup pruning for {:?} failed: {}", self.target, err);
            }
        }

        Ok(())
    }

    /// Restores the backup over the target. Valid only after a successful
    /// `execute` that took a backup.
    pub fn rollback(&mut self) -> Result<(), FileOpError> {
        if !self.executed {
            return Err(FileOpError::NotExecuted("rollback"));
        }

        match self.backup_path.take() {
            Some(backup) => {
                fs::copy(&backup, &self.target)
                    .map_err(|source| FileOpError::RestoreFailed { target: self.target.clone(), source })?;
                let _ = fs::remove_file(&backup);
                Ok(())
            },
            None => {
                // Target did not pre-exist; rolling back means removing it.
                fs::remove_file(&self.target)?;
                Ok(())
            }
        }
    }

    /// Drops the backup, making the new target contents permanent.
    pub fn commit(&mut self) -> Result<(), FileOpError> {
        if !self.executed {
            return Err(FileOpError::NotExecuted("commit"));
        }

        if let Some(backup) = self.backup_path.take() {
            if let Err(err) = fs::remove_file(&backup) {
                log::warn!("Failed to delete backup {:?}: {}", backup, err);
            }
        }

        Ok(())
    }

    fn backup_dir(&self) -> PathBuf {
        self.config.backup_dir.clone().unwrap_or_else(|| {
            self.target
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(".audiobook-backups")
        })
    }

    fn make_backup_path(&self) -> Result<PathBuf, std::io::Error> {
        let dir = self.backup_dir();
        create_dirs_0755(&dir)?;

        let basename = self.target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        let stamp = Local::now().format("%Y%m%d_%H%M%S");

        Ok(dir.join(format!("{}.{}{}", basename, stamp, BACKUP_SUFFIX)))
    }

    /// Sibling backups of this target's basename, oldest first. The
    /// timestamp component sorts lexicographically.
    fn sibling_backups(&self) -> Result<Vec<PathBuf>, std::io::Error> {
        let dir = self.backup_dir();
        let Some(basename) = self.target.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return Ok(Vec::new());
        };
        let prefix = format!("{}.", basename);

        let mut backups: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .map(|n| {
                        let name = n.to_string_lossy();
                        name.starts_with(&prefix) && name.ends_with(BACKUP_SUFFIX)
                    })
                    .unwrap_or(false)
            })
            .collect();

        backups.sort();
        Ok(backups)
    }

    fn prune_backups(&self) -> Result<(), std::io::Error> {
        let mut backups = self.sibling_backups()?;

        while backups.len() > self.config.max_backups {
            let oldest = backups.remove(0);
            fs::remove_file(&oldest)?;
            log::info!("Pruned old backup {:?}", oldest);
        }

        Ok(())
    }

    fn restore_backup_consuming(&mut self) -> Result<(), FileOpError> {
        if let Some(backup) = self.backup_path.take() {
            fs::copy(&backup, &self.target)
                .map_err(|source| FileOpError::RestoreFailed { target: self.target.clone(), source })?;
            let _ = fs::remove_file(&backup);
        } else {
            // No prior contents to restore; leave no partial target behind.
            let _ = fs::remove_file(&self.target);
        }

        Ok(())
    }

    fn restore_backup_best_effort(&mut self) {
        if let Err(err) = self.restore_backup_consuming() {
            log::error!("Could not restore target {:?} after failed copy: {}", self.target, err);
        }
    }
}

/// Executes the operation and commits on success.
pub fn safe_move<P: AsRef<Path>>(source: P, target: P, mut config: SafeFileOpConfig) -> Result<(), FileOpError> {
    config.preserve_original = false;
    run_auto_commit(SafeFileOp::new(source, target, config))
}

/// Executes the operation, keeping the source, and commits on success.
pub fn safe_copy<P: AsRef<Path>>(source: P, target: P, mut config: SafeFileOpConfig) -> Result<(), FileOpError> {
    config.preserve_original = true;
    run_auto_commit(SafeFileOp::new(source, target, config))
}

fn run_auto_commit(mut op: SafeFileOp) -> Result<(), FileOpError> {
    op.execute()?;
    op.commit()
}

fn copy_with_fsync(source: &Path, target: &Path) -> Result<(), std::io::Error> {
    fs::copy(source, target)?;
    fs::File::open(target)?.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn create_dirs_0755(dir: &Path) -> Result<(), std::io::Error> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.exists() {
        return Ok(());
    }

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
}

#[cfg(not(unix))]
fn create_dirs_0755(dir: &Path) -> Result<(), std::io::Error> {
    fs::create_dir_all(dir)
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Bounded retry for the pre-commit phase only. Transient errors get three
/// more attempts with 1s/2s/4s backoff; anything else propagates at once.
fn with_retries<T, F>(mut operation: F) -> Result<T, std::io::Error>
where F: FnMut() -> Result<T, std::io::Error>
{
    let mut attempt = 0;

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < RETRY_DELAYS.len() => {
                log::warn!("Transient I/O error (attempt {}): {}. Retrying.", attempt + 1, err);
                thread::sleep(RETRY_DELAYS[attempt]);
                attempt += 1;
            },
            Err(err) => return Err(err)
        }
    }
}
