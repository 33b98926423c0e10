//! Primary-store operations shared by ingestion and reconciliation.
//!
//! All deletions here are idempotent and chunk deletion is batched:
//! deleting a large vector-bearing set in one statement risks store-side
//! timeouts, so ids are removed [`DELETE_BATCH_SIZE`] at a time and a
//! failed batch is logged and skipped rather than aborting the loop.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::embedding::vec_to_blob;
use crate::models::{Chunk, Schema, SourceDocument};

/// Chunk deletion batch size during reprocessing.
pub const DELETE_BATCH_SIZE: usize = 10;

/// Batch size for the startup orphan sweep, which deletes across many
/// documents at once.
pub const ORPHAN_BATCH_SIZE: usize = 50;

pub async fn upsert_metadata(
    pool: &SqlitePool,
    doc: &SourceDocument,
    schema: Option<&Schema>,
) -> Result<()> {
    let now = Utc::now().timestamp();
    let schema_json = match schema {
        Some(s) => Some(serde_json::to_string(s)?),
        None => None,
    };
    sqlx::query(
        r#"
        INSERT INTO document_metadata (source_id, title, url, media_type, folder_path, schema_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id) DO UPDATE SET
            title = excluded.title,
            url = excluded.url,
            media_type = excluded.media_type,
            folder_path = excluded.folder_path,
            schema_json = excluded.schema_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&doc.source_id)
    .bind(&doc.title)
    .bind(&doc.url)
    .bind(&doc.media_type)
    .bind(&doc.folder_path)
    .bind(&schema_json)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_metadata(pool: &SqlitePool, source_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM document_metadata WHERE source_id = ?")
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn metadata_exists(pool: &SqlitePool, source_id: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM document_metadata WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

pub async fn metadata_source_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT source_id FROM document_metadata ORDER BY source_id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn chunk_source_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT DISTINCT source_id FROM chunks ORDER BY source_id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn count_chunks(pool: &SqlitePool, source_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE source_id = ?")
        .bind(source_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Delete all chunks for a source in small batches. Returns the number of
/// chunks removed. A failed batch is logged and skipped.
pub async fn delete_chunks_batched(
    pool: &SqlitePool,
    source_id: &str,
    batch_size: usize,
) -> Result<u64> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM chunks WHERE source_id = ?")
        .bind(source_id)
        .fetch_all(pool)
        .await?;

    let mut deleted = 0u64;
    for batch in ids.chunks(batch_size.max(1)) {
        let placeholders = vec!["?"; batch.len()].join(", ");
        let sql = format!("DELETE FROM chunks WHERE id IN ({})", placeholders);
        let mut query = sqlx::query(&sql);
        for id in batch {
            query = query.bind(id);
        }
        match query.execute(pool).await {
            Ok(res) => deleted += res.rows_affected(),
            Err(e) => {
                tracing::warn!("chunk delete batch failed for {source_id}: {e}");
            }
        }
    }
    Ok(deleted)
}

/// Insert a document's full chunk set. Metadata for the source must
/// already exist; content must already be null-byte free.
pub async fn insert_chunks(pool: &SqlitePool, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for chunk in chunks {
        let blob = chunk.embedding.as_ref().map(|v| vec_to_blob(v));
        sqlx::query(
            "INSERT INTO chunks (id, source_id, chunk_index, content, is_table, embedding) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.source_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(chunk.is_table as i64)
        .bind(blob)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn delete_rows(pool: &SqlitePool, source_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM document_rows WHERE source_id = ?")
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_rows(
    pool: &SqlitePool,
    source_id: &str,
    rows: &[serde_json::Value],
) -> Result<usize> {
    let mut tx = pool.begin().await?;
    for row in rows {
        sqlx::query("INSERT INTO document_rows (source_id, row_json) VALUES (?, ?)")
            .bind(source_id)
            .bind(serde_json::to_string(row)?)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(rows.len())
}

// ============ tracking set ============

pub async fn tracked_hash(pool: &SqlitePool, source_id: &str) -> Result<Option<String>> {
    let hash =
        sqlx::query_scalar("SELECT content_hash FROM tracked_documents WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(pool)
            .await?;
    Ok(hash)
}

pub async fn tracked_source_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT source_id FROM tracked_documents ORDER BY source_id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn upsert_tracked(pool: &SqlitePool, source_id: &str, content_hash: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tracked_documents (source_id, content_hash, seen_at) VALUES (?, ?, ?)
        ON CONFLICT(source_id) DO UPDATE SET content_hash = excluded.content_hash, seen_at = excluded.seen_at
        "#,
    )
    .bind(source_id)
    .bind(content_hash)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_tracked(pool: &SqlitePool, source_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM tracked_documents WHERE source_id = ?")
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}
