//! Web source processing.
//!
//! `web_sources` rows drive steady-state crawling: each cycle claims the
//! sources that are due (new, errored, or past their recrawl interval),
//! crawls them, ingests the aggregated markdown under the source's id,
//! and records the result. The cycle ends with a graph orphan sweep so
//! removed sources do not leave graph data behind.
//!
//! Statuses: `pending` -> `crawling` -> `completed` | `error`.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::crawler::CrawlSession;
use crate::extract::MIME_MARKDOWN;
use crate::ingest::{self, AppContext};
use crate::models::SourceDocument;
use crate::reconcile;

/// Upper bound stored for a failure message.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct WebSource {
    pub id: String,
    pub url: String,
    pub crawl_depth: u32,
}

pub async fn add_web_source(
    pool: &SqlitePool,
    url: &str,
    depth: u32,
    interval_hours: Option<i64>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO web_sources (id, url, status, crawl_depth, crawl_interval_hours, created_at)
        VALUES (?, ?, 'pending', ?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET
            crawl_depth = excluded.crawl_depth,
            crawl_interval_hours = excluded.crawl_interval_hours,
            status = 'pending'
        "#,
    )
    .bind(&id)
    .bind(url)
    .bind(depth as i64)
    .bind(interval_hours)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn list_web_sources(pool: &SqlitePool) -> Result<Vec<(String, String, String, i64)>> {
    let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
        "SELECT id, url, status, chunks_count FROM web_sources ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Sources due for a crawl: never crawled, errored, or past their
/// recrawl interval. Sources without an interval crawl once.
async fn due_sources(pool: &SqlitePool) -> Result<Vec<WebSource>> {
    let now = Utc::now().timestamp();
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        r#"
        SELECT id, url, crawl_depth FROM web_sources
        WHERE status IN ('pending', 'error')
           OR (status = 'completed'
               AND crawl_interval_hours IS NOT NULL
               AND last_crawled_at IS NOT NULL
               AND last_crawled_at + crawl_interval_hours * 3600 <= ?)
        ORDER BY created_at
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, url, depth)| WebSource {
            id,
            url,
            crawl_depth: depth.max(1) as u32,
        })
        .collect())
}

async fn mark_crawling(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("UPDATE web_sources SET status = 'crawling', error_message = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn mark_completed(pool: &SqlitePool, id: &str, chunks_count: usize) -> Result<()> {
    sqlx::query(
        "UPDATE web_sources SET status = 'completed', chunks_count = ?, last_crawled_at = ? WHERE id = ?",
    )
    .bind(chunks_count as i64)
    .bind(Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn mark_error(pool: &SqlitePool, id: &str, message: &str) -> Result<()> {
    let truncated: String = message.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
    sqlx::query(
        "UPDATE web_sources SET status = 'error', error_message = ?, last_crawled_at = ? WHERE id = ?",
    )
    .bind(truncated)
    .bind(Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Run one processing cycle: crawl every due source, ingest, record the
/// result, then sweep graph orphans. A failure for one source is recorded
/// on its row and the cycle continues.
pub async fn process_cycle(ctx: &AppContext) -> Result<usize> {
    let sources = due_sources(&ctx.pool).await?;
    if sources.is_empty() {
        return Ok(0);
    }
    tracing::info!("processing {} due web sources", sources.len());

    let mut processed = 0usize;
    for source in sources {
        mark_crawling(&ctx.pool, &source.id).await?;

        let mut session = match CrawlSession::new(&ctx.config.crawler) {
            Ok(s) => s,
            Err(e) => {
                mark_error(&ctx.pool, &source.id, &format!("{e:#}")).await?;
                continue;
            }
        };
        let depth = source.crawl_depth.min(ctx.config.crawler.max_depth.max(1));

        match session.crawl(&source.url, depth).await {
            Ok(page) => {
                let doc = SourceDocument {
                    source_id: source.id.clone(),
                    title: page.title.clone(),
                    url: Some(page.url.clone()),
                    media_type: MIME_MARKDOWN.to_string(),
                    folder_path: None,
                };
                let outcome =
                    ingest::ingest(ctx, &doc, page.markdown.as_bytes(), &page.markdown).await;
                if outcome.success {
                    mark_completed(&ctx.pool, &source.id, outcome.chunks_written).await?;
                    processed += 1;
                } else {
                    let msg = outcome.error.unwrap_or_else(|| "ingestion failed".into());
                    mark_error(&ctx.pool, &source.id, &msg).await?;
                }
            }
            Err(e) => {
                mark_error(&ctx.pool, &source.id, &format!("{e:#}")).await?;
            }
        }
    }

    // Sources removed since the last cycle may still have graph data.
    if let Err(e) = reconcile::graph_orphan_sweep(ctx).await {
        tracing::warn!("graph orphan sweep failed: {e:#}");
    }

    Ok(processed)
}

/// Steady-state loop: process due sources, sleep, repeat.
pub async fn run_loop(ctx: &AppContext, interval_secs: u64) -> Result<()> {
    loop {
        match process_cycle(ctx).await {
            Ok(n) if n > 0 => println!("processed {n} web sources"),
            Ok(_) => {}
            Err(e) => tracing::error!("web processing cycle failed: {e:#}"),
        }
        tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
    }
}
