use compliance_rag_core::{Error, Result};
use sqlx::SqlitePool;

/// Create the index schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per named collection; dims and model stay NULL until the
    // first add after creation or reset.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            metric TEXT NOT NULL DEFAULT 'cosine',
            embedding_model TEXT,
            dims INTEGER,
            next_id INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(Error::storage)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            id INTEGER NOT NULL,
            text TEXT NOT NULL,
            category TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, id),
            FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(Error::storage)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_category ON records(collection, category)",
    )
    .execute(pool)
    .await
    .map_err(Error::storage)?;

    Ok(())
}
