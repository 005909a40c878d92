use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use audiobook_organizer::cli::{BlockedActions, Cli, Command};
use audiobook_organizer::domain::blocked_hash::BlockedHash;
use audiobook_organizer::domain::book::LibraryState;
use audiobook_organizer::itunes::model::find_library_file;
use audiobook_organizer::repository::{
    SqliteBlockedHashesRepository, SqliteBooksRepository, SqliteFingerprintsRepository
};
use audiobook_organizer::services::importer::{ImportMode, ImportOptions, ITunesImportService};
use audiobook_organizer::services::organizer::{OrganizeStrategy, OrganizerConfig, OrganizerService};
use audiobook_organizer::services::queue::{InMemoryQueue, OperationReporter};
use audiobook_organizer::services::scanner::ScanIngestService;
use audiobook_organizer::services::updater::{self, UpdateChannel, UpdaterConfig};
use audiobook_organizer::services::writeback::{self, WriteBackRequest, WriteBackUpdate};
use audiobook_organizer::services::safe_file_op::SafeFileOpConfig;
use audiobook_organizer::utils::config::get_config;
use audiobook_organizer::utils::db::get_application_db;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Import { library, mode, playlists, allow_duplicates } => {
            run_import(library, &mode, playlists, allow_duplicates).await
        },
        Command::Validate { library } => run_validate(library).await,
        Command::Scan { root } => run_scan(root).await,
        Command::Organize => run_organize().await,
        Command::Writeback { library, force, no_backup, dry_run } => {
            run_writeback(library, force, no_backup, dry_run).await
        },
        Command::Blocked { action } => run_blocked(action).await,
        Command::Update { channel, install } => run_update(&channel, install).await
    }
}

fn resolve_library(given: Option<PathBuf>) -> Result<PathBuf> {
    match given {
        Some(path) => Ok(path),
        None => {
            let config = get_config()?;
            if let Some(path) = &config.itunes.library_path {
                return Ok(path.clone());
            }
            find_library_file().map_err(|err| anyhow!("{}", err))
        }
    }
}

fn organizer_config() -> Result<OrganizerConfig> {
    let config = get_config()?;

    Ok(OrganizerConfig {
        root_dir: config.organize.root_dir.clone(),
        strategy: OrganizeStrategy::try_from(config.organize.strategy.as_str())
            .map_err(|err| anyhow!("{}", err))?,
        folder_pattern: config.organize.folder_pattern.clone(),
        file_pattern: config.organize.file_pattern.clone(),
        fileops: SafeFileOpConfig {
            backup_dir: config.fileops.backup_dir.clone(),
            verify_checksums: config.fileops.verify_checksums,
            max_backups: config.fileops.max_backups,
            ..Default::default()
        }
    })
}

async fn run_import(library: Option<PathBuf>, mode: &str, playlists: bool, allow_duplicates: bool) -> Result<()> {
    let library_path = resolve_library(library)?;
    let db = get_application_db().await?;
    let pool = db.pool();

    let mode = match mode {
        "organized" => ImportMode::Organized,
        "import" => ImportMode::Import,
        "organize" => ImportMode::Organize,
        other => return Err(anyhow!("Unknown import mode '{}'.", other))
    };

    let options = ImportOptions {
        mode,
        skip_duplicates: !allow_duplicates,
        import_playlists: playlists,
        path_mappings: Vec::new()
    };

    let queue = Arc::new(InMemoryQueue::new());
    let reporter = OperationReporter::begin(queue.clone(), "itunes-import", &format!("Import from {}", library_path.display()));

    let importer = ITunesImportService::new(pool);
    let organizer_service;
    let organizer = if mode == ImportMode::Organize {
        organizer_service = OrganizerService::new(pool, organizer_config()?);
        Some(&organizer_service)
    } else {
        None
    };

    let report = importer.run(&library_path, &options, organizer, Some(&reporter)).await
        .context("iTunes import failed")?;

    println!("Audiobooks in library: {}", report.total_audiobooks);
    println!("Imported: {}  Organized: {}  Wanted: {}", report.imported, report.organized, report.wanted);
    println!("Skipped duplicates: {}  Skipped blocked: {}", report.skipped_duplicates, report.skipped_blocked);
    for error in &report.errors {
        eprintln!("error: {}", error);
    }

    Ok(())
}

async fn run_validate(library: Option<PathBuf>) -> Result<()> {
    let library_path = resolve_library(library)?;
    let db = get_application_db().await?;

    let importer = ITunesImportService::new(db.pool());
    let report = importer.validate(&library_path, &[]).await
        .context("Validation failed")?;

    println!("Total tracks:      {}", report.total_tracks);
    println!("Audiobook tracks:  {}", report.audiobook_tracks);
    println!("Files found:       {}", report.files_found);
    println!("Files missing:     {}", report.files_missing);
    println!("Estimated import:  {}", report.estimated_time);

    if !report.path_prefixes.is_empty() {
        println!("Location prefixes:");
        for prefix in &report.path_prefixes {
            println!("  {}", prefix);
        }
    }
    for path in report.missing_paths.iter().take(20) {
        println!("missing: {}", path.display());
    }

    Ok(())
}

async fn run_scan(root: Option<PathBuf>) -> Result<()> {
    let db = get_application_db().await?;
    let pool = db.pool();

    let roots = match root {
        Some(root) => vec![root],
        None => get_config()?.import.roots.clone()
    };
    if roots.is_empty() {
        return Err(anyhow!("No import roots configured and none given."));
    }

    let service = ScanIngestService::new(pool);
    for root in roots {
        let report = service.ingest_root(&root, None).await
            .with_context(|| format!("Scan of {} failed", root.display()))?;

        println!(
            "{}: scanned {}, created {}, duplicates {}, blocked {}",
            root.display(), report.scanned, report.created,
            report.skipped_duplicates, report.skipped_blocked
        );
        for error in &report.errors {
            eprintln!("error: {}", error);
        }
    }

    Ok(())
}

async fn run_organize() -> Result<()> {
    let db = get_application_db().await?;
    let pool = db.pool();

    let books_repo = SqliteBooksRepository::new();
    let pending = books_repo.list_by_state(pool, LibraryState::Import).await?;
    if pending.is_empty() {
        println!("Nothing to organize.");
        return Ok(());
    }

    let organizer = OrganizerService::new(pool, organizer_config()?);

    let bar = ProgressBar::new(pending.len() as u64);
    bar.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")?);

    let mut failures = 0usize;
    for book in pending {
        bar.set_message(book.title().to_string());
        if let Err(err) = organizer.organize_book(book.id(), None).await {
            log::warn!("Could not organize '{}': {}", book.title(), err);
            failures += 1;
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    if failures > 0 {
        eprintln!("{} book(s) could not be organized; they remain in 'import'.", failures);
    }

    Ok(())
}

async fn run_writeback(library: Option<PathBuf>, force: bool, no_backup: bool, dry_run: bool) -> Result<()> {
    let library_path = resolve_library(library)?;
    let db = get_application_db().await?;
    let pool = db.pool();

    let books_repo = SqliteBooksRepository::new();
    let organized = books_repo.list_by_state(pool, LibraryState::Organized).await?;

    let updates: Vec<WriteBackUpdate> = organized.iter()
        .filter_map(|book| {
            let persistent_id = book.itunes().persistent_id.clone()?;
            let new_path = book.file_path()?.clone();
            Some(WriteBackUpdate {
                persistent_id,
                old_path: book.itunes().source_library_path.clone(),
                new_path
            })
        })
        .collect();

    if updates.is_empty() {
        println!("No organized books with iTunes identities; nothing to write back.");
        return Ok(());
    }

    let stored_fingerprint = SqliteFingerprintsRepository::new()
        .for_library(pool, &library_path)
        .await?;

    let request = WriteBackRequest {
        library_path: library_path.clone(),
        updates,
        create_backup: !no_backup,
        backup_path: None,
        force_overwrite: force,
        stored_fingerprint
    };

    if dry_run {
        let warnings = tokio::task::spawn_blocking(move || writeback::validate_write_back(&request)).await??;
        if warnings.is_empty() {
            println!("Write-back would apply cleanly.");
        }
        for warning in warnings {
            println!("warning: {}", warning);
        }
        return Ok(());
    }

    let result = tokio::task::spawn_blocking(move || writeback::write_back(&request)).await??;
    println!("{}", result.message);
    if let Some(backup) = result.backup_path {
        println!("Backup at {}", backup.display());
    }

    // The library content changed under our feet on purpose; re-capture so
    // the next write-back starts from this state.
    let fresh = audiobook_organizer::itunes::fingerprint::LibraryFingerprint::compute(&library_path)?;
    SqliteFingerprintsRepository::new().store(pool, &fresh).await?;

    Ok(())
}

async fn run_blocked(action: BlockedActions) -> Result<()> {
    let db = get_application_db().await?;
    let pool = db.pool();
    let repo = SqliteBlockedHashesRepository::new();

    match action {
        BlockedActions::Add { hash, reason } => {
            let entry = BlockedHash::new(hash, reason, Local::now().naive_local())?;
            repo.add(pool, &entry).await?;
            println!("Blocked {}.", entry.hash());
        },
        BlockedActions::Remove { hash } => {
            repo.remove(pool, &hash).await?;
            println!("Unblocked {}.", hash);
        },
        BlockedActions::List => {
            for entry in repo.list(pool).await? {
                println!("{}  {}  ({})", entry.hash(), entry.reason(), entry.added_at());
            }
        }
    }

    Ok(())
}

async fn run_update(channel: &str, install: bool) -> Result<()> {
    let channel = match channel {
        "stable" => UpdateChannel::Stable,
        "develop" => UpdateChannel::Develop,
        other => return Err(anyhow!("Unknown update channel '{}'.", other))
    };

    let config = UpdaterConfig::new("audiobook-organizer", "audiobook-organizer", channel);
    let current = env!("CARGO_PKG_VERSION").to_string();

    let update = tokio::task::spawn_blocking(move || updater::check_for_update(&config, &current)).await??;

    match update {
        None => println!("Already up to date."),
        Some(update) => {
            println!("Update available: {}", update.version);
            if install {
                let executable = std::env::current_exe()?;
                let url = update.download_url.clone();
                tokio::task::spawn_blocking(move || updater::apply_update(&url, &executable)).await??;
                println!("Installed {}. Restart to pick it up.", update.version);
            }
        }
    }

    Ok(())
}
