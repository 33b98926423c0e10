use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an already-open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Document metadata. One row per source_id; must exist before any
    // chunk referencing that source_id is written.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_metadata (
            source_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            url TEXT,
            media_type TEXT NOT NULL DEFAULT 'text/plain',
            folder_path TEXT,
            schema_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks. No foreign key on purpose: a crash can legitimately leave
    // chunks without metadata, and the startup scan must be able to see
    // that state rather than have the insert rejected.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            is_table INTEGER NOT NULL DEFAULT 0,
            embedding BLOB,
            UNIQUE(source_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Row data extracted from tabular documents (CSV, spreadsheets,
    // markdown tables). Separate from chunk content.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_rows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            row_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Lightweight tracking set of known documents, used by the watch
    // loop for change detection and by the startup scan for stale-entry
    // cleanup.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracked_documents (
            source_id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            seen_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS web_sources (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'pending',
            crawl_depth INTEGER NOT NULL DEFAULT 1,
            crawl_interval_hours INTEGER,
            last_crawled_at INTEGER,
            chunks_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_document_rows_source_id ON document_rows(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_web_sources_status ON web_sources(status)")
        .execute(pool)
        .await?;

    Ok(())
}
