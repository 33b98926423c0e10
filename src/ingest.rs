//! Per-document ingestion pipeline.
//!
//! [`ingest`] runs a fixed step order for one document:
//!
//! 1. Delete existing state: graph episodes (best-effort), then chunks
//!    in small batches, then rows and metadata. Every run is idempotent.
//! 2. Tabular documents: extract column schema and row data.
//! 3. Write metadata. Metadata must exist before any chunk write.
//! 4. Insert tabular rows.
//! 5. Store markdown-table rows found in the extracted text (no schema).
//! 6. Chunk the extracted text.
//! 7. Embed all chunks in one batch. A count mismatch aborts the
//!    document before any chunk is written.
//! 8. If the selector says so, submit chunks to the graph sequentially
//!    with a fixed delay. Failures become a warning on the outcome, not
//!    an error: the graph is a secondary enrichment.
//! 9. Persist chunks + embeddings. Runs after the graph step resolves
//!    either way; vector-store success is the sole completion signal.
//!
//! Any error in steps 2-9 marks the document failed and leaves already
//! written state in place for the next reconciliation scan to repair.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::advisor::{BreakpointAdvisor, LlmAdvisor};
use crate::chunker::{self, ChunkerOptions};
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::extract;
use crate::graph::{self, GraphStore, HttpGraphStore};
use crate::models::{Chunk, ChunkPiece, IngestOutcome, SourceDocument};
use crate::reconcile;
use crate::selector;
use crate::store;
use crate::tabular;

/// Everything the pipeline needs, constructed once at startup and passed
/// by reference. Tests substitute fakes for the embedder and graph.
pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub embedder: Option<Box<dyn Embedder>>,
    pub graph: Option<Arc<dyn GraphStore>>,
    pub advisor: Option<Box<dyn BreakpointAdvisor>>,
}

impl AppContext {
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        let embedder = create_embedder(&config.embedding)?;
        let graph: Option<Arc<dyn GraphStore>> = if config.graph.enabled {
            Some(Arc::new(HttpGraphStore::new(&config.graph)?))
        } else {
            None
        };
        let advisor: Option<Box<dyn BreakpointAdvisor>> = if config.advisor.enabled {
            Some(Box::new(LlmAdvisor::new(&config.advisor)?))
        } else {
            None
        };
        Ok(Self {
            config,
            pool,
            embedder,
            graph,
            advisor,
        })
    }
}

/// Extract text from raw bytes, then ingest. The extraction collaborator
/// never fails; on internal failure the filename stands in as text.
pub async fn ingest_document(ctx: &AppContext, doc: &SourceDocument, bytes: &[u8]) -> IngestOutcome {
    let text = extract::extract_or_fallback(bytes, &doc.title, &doc.media_type);
    ingest(ctx, doc, bytes, &text).await
}

/// Ingest one document. Never panics and never returns an error: failures
/// are reported on the outcome so a batch loop continues past them.
pub async fn ingest(
    ctx: &AppContext,
    doc: &SourceDocument,
    bytes: &[u8],
    extracted_text: &str,
) -> IngestOutcome {
    match run_pipeline(ctx, doc, bytes, extracted_text).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("ingestion failed for {}: {e:#}", doc.source_id);
            IngestOutcome {
                source_id: doc.source_id.clone(),
                success: false,
                error: Some(format!("{e:#}")),
                ..Default::default()
            }
        }
    }
}

async fn run_pipeline(
    ctx: &AppContext,
    doc: &SourceDocument,
    bytes: &[u8],
    extracted_text: &str,
) -> Result<IngestOutcome> {
    let source_id = &doc.source_id;
    let mut outcome = IngestOutcome {
        source_id: source_id.clone(),
        ..Default::default()
    };

    // 1. Delete existing state so reprocessing is idempotent.
    delete_existing_state(ctx, source_id).await;

    // 2. Tabular schema and rows.
    let tabular_data = if tabular::is_tabular(&doc.media_type) {
        tabular::extract_tabular(bytes, &doc.media_type)
    } else {
        None
    };

    // 3. Metadata first.
    store::upsert_metadata(&ctx.pool, doc, tabular_data.as_ref().map(|t| &t.schema)).await?;

    // 4. Tabular rows.
    if let Some(data) = &tabular_data {
        outcome.rows_written += store::insert_rows(&ctx.pool, source_id, &data.rows).await?;
    }

    // 5. Markdown/OCR tables in the extracted text, stored without a
    // schema: headers from scanned documents are unreliable.
    if tabular_data.is_none() {
        let table_rows = tabular::markdown_table_rows(extracted_text);
        if !table_rows.is_empty() {
            outcome.rows_written += store::insert_rows(&ctx.pool, source_id, &table_rows).await?;
        }
    }

    // 6. Chunk. A document must always end up with at least one chunk,
    // or the startup scan would flag its metadata as drift on every run;
    // empty text falls back to the title, as file extraction does.
    let opts = ChunkerOptions::from_config(&ctx.config.chunking);
    let mut pieces = chunker::chunk_text(extracted_text, &opts, ctx.advisor.as_deref()).await;
    if pieces.is_empty() {
        let fallback = if doc.title.trim().is_empty() {
            doc.source_id.as_str()
        } else {
            doc.title.as_str()
        };
        pieces = vec![ChunkPiece {
            content: fallback.to_string(),
            is_table: false,
        }];
    }

    // 7. Embed, one batched call. Count mismatch is fatal for this
    // document: no partial chunk sets.
    let embeddings: Vec<Option<Vec<f32>>> = match &ctx.embedder {
        Some(embedder) => {
            let texts: Vec<String> = pieces.iter().map(|p| p.content.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != pieces.len() {
                bail!(
                    "embedding count mismatch: {} vectors for {} chunks",
                    vectors.len(),
                    pieces.len()
                );
            }
            vectors.into_iter().map(Some).collect()
        }
        None => vec![None; pieces.len()],
    };

    let chunks: Vec<Chunk> = pieces
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (piece, embedding))| Chunk {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.clone(),
            chunk_index: i as i64,
            content: piece.content.replace('\0', ""),
            is_table: piece.is_table,
            embedding,
        })
        .collect();

    // 8. Graph, best-effort.
    let decision = selector::decide(
        &ctx.config.selector,
        extracted_text,
        chunks.len(),
        &doc.title,
        &doc.media_type,
        doc.url.as_deref(),
        doc.folder_path.as_deref(),
    );
    tracing::debug!(
        "graph decision for {}: {} ({})",
        source_id,
        decision.use_graph,
        decision.reason
    );
    if decision.use_graph {
        outcome.used_graph = true;
        if let Some(graph_store) = &ctx.graph {
            match submit_to_graph(ctx, graph_store.as_ref(), doc, &chunks).await {
                Ok((count, warning)) => {
                    outcome.graph_episodes = count;
                    outcome.graph_warning = warning;
                }
                Err(e) => {
                    tracing::warn!("graph submission failed for {}: {e:#}", source_id);
                    outcome.graph_warning = Some(format!("{e:#}"));
                }
            }
        } else {
            outcome.graph_warning = Some("graph selected but no graph backend configured".into());
        }
    }

    // 9. Persist chunks last.
    store::insert_chunks(&ctx.pool, &chunks).await?;
    outcome.chunks_written = chunks.len();
    outcome.success = true;
    Ok(outcome)
}

/// Remove every trace of a source before reprocessing. Graph deletion is
/// best-effort; primary-store deletions propagate errors.
async fn delete_existing_state(ctx: &AppContext, source_id: &str) {
    if let Some(graph_store) = &ctx.graph {
        if let Err(e) = reconcile::delete_source_from_graph(graph_store.as_ref(), source_id).await {
            tracing::warn!("graph cleanup failed for {source_id}: {e:#}");
        }
    }
    if let Err(e) =
        store::delete_chunks_batched(&ctx.pool, source_id, store::DELETE_BATCH_SIZE).await
    {
        tracing::warn!("chunk cleanup failed for {source_id}: {e:#}");
    }
    if let Err(e) = store::delete_rows(&ctx.pool, source_id).await {
        tracing::warn!("row cleanup failed for {source_id}: {e:#}");
    }
    if let Err(e) = store::delete_metadata(&ctx.pool, source_id).await {
        tracing::warn!("metadata cleanup failed for {source_id}: {e:#}");
    }
}

/// Submit one episode per chunk, sequentially, with a fixed delay between
/// calls as backpressure against the backend's rate limits. Individual
/// episode failures are collected into a warning; only a total failure
/// becomes an error.
async fn submit_to_graph(
    ctx: &AppContext,
    graph_store: &dyn GraphStore,
    doc: &SourceDocument,
    chunks: &[Chunk],
) -> Result<(usize, Option<String>)> {
    let max_chars = ctx.config.graph.max_episode_chars;
    let delay = Duration::from_millis(ctx.config.graph.episode_delay_ms);
    let total = chunks.len();

    let mut created = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for (i, chunk) in chunks.iter().enumerate() {
        let episode_id = format!("{}_{}_{}", doc.source_id, i, Utc::now().timestamp_millis());
        let content = graph::prepare_episode_content(&chunk.content, &doc.title, max_chars);
        let description = graph::source_description(&doc.source_id, &doc.title, i);
        let name = graph::display_name(&doc.title, i, total);

        match graph_store
            .add_episode(&episode_id, &name, &content, &description, Utc::now())
            .await
        {
            Ok(()) => created += 1,
            Err(e) => {
                tracing::warn!("episode {i} failed for {}: {e:#}", doc.source_id);
                errors.push(format!("chunk {i}: {e:#}"));
            }
        }

        if i + 1 < total {
            tokio::time::sleep(delay).await;
        }
    }

    if created == 0 && !errors.is_empty() {
        bail!("all {} episodes failed: {}", total, errors.join("; "));
    }
    let warning = if errors.is_empty() {
        None
    } else {
        Some(format!(
            "{} of {} episodes failed: {}",
            errors.len(),
            total,
            errors.join("; ")
        ))
    };
    Ok((created, warning))
}
