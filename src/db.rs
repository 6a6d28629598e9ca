use std::path::{Path, PathBuf};
use std::str::FromStr;

use compliance_rag_core::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// File name of the index database inside the persist directory.
pub const DB_FILE: &str = "index.sqlite";

pub fn database_path(persist_dir: &Path) -> PathBuf {
    persist_dir.join(DB_FILE)
}

/// Open (creating if needed) the index database under `persist_dir`.
pub async fn connect(persist_dir: &Path) -> Result<SqlitePool> {
    std::fs::create_dir_all(persist_dir).map_err(|e| {
        Error::storage(format!(
            "cannot create persist dir {}: {}",
            persist_dir.display(),
            e
        ))
    })?;
    let db_path = database_path(persist_dir);

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(Error::storage)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(Error::storage)
}
