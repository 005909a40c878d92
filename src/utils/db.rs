use std::path::Path;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Error};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;

use crate::utils::config::{get_config, DatabaseConfig};

/// The catalog database behind the repositories: a sqlite file created on
/// first run, with its schema kept current by the migrations directory the
/// config points at.
pub struct Database {
    pool: SqlitePool,
    migrations_path: PathBuf
}

impl Database {

    pub async fn open(config: &DatabaseConfig) -> Result<Self, Error> {
        ensure_db_file(&config.path)
            .with_context(|| format!("Could not create catalog database file at {}", config.path.display()))?;

        let url = format!("sqlite:{}", config.path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .with_context(|| format!("Could not open catalog database at {}", config.path.display()))?;

        let db = Self {
            pool,
            migrations_path: config.migrations_path.clone()
        };
        db.migrate().await?;

        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        let migrator = Migrator::new(self.migrations_path.as_path())
            .await
            .with_context(|| format!("No migrations found at {}", self.migrations_path.display()))?;

        migrator.run(&self.pool).await?;
        Ok(())
    }
}

/// A fresh install has neither the data directory nor the database file;
/// sqlite wants the file to exist before the pool connects to it.
fn ensure_db_file(path: &Path) -> Result<(), std::io::Error> {
    if path.exists() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path)?;

    Ok(())
}

/// Process-wide catalog handle, opened lazily from `./config.toml`.
pub async fn get_application_db() -> Result<&'static Database, Error> {
    static DB_INSTANCE: OnceCell<Result<Database, String>> = OnceCell::const_new();

    let result = DB_INSTANCE.get_or_init(|| async {
        let config = get_config().map_err(|err| err.to_string())?;
        Database::open(&config.database).await.map_err(|err| err.to_string())
    }).await;

    result.as_ref().map_err(|msg| anyhow!("{}", msg))
}
