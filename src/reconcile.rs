//! Cross-store reconciliation.
//!
//! Two independent repair mechanisms keep the primary store and the graph
//! backend consistent after crashes:
//!
//! - [`delete_source_from_graph`] removes a document's graph episodes in
//!   two phases, so entities left with zero episode connections can be
//!   identified and removed as orphans.
//! - [`startup_scan`] compares the metadata table, the chunk table, and
//!   the tracking set, queueing half-ingested documents for reprocessing.
//!   [`graph_orphan_sweep`] independently removes graph data whose source
//!   no longer exists anywhere in the primary store.
//!
//! Both are re-entrant: every deletion is idempotent, so overlapping or
//! repeated runs converge. A failure for one id is logged and the scan
//! continues with the rest.

use anyhow::Result;
use std::collections::HashSet;

use crate::graph::GraphStore;
use crate::ingest::AppContext;
use crate::store;

/// Delete all graph data for one source.
///
/// Phase one records the entities connected to the source's episodes and
/// their connection counts; phase two deletes the episodes; phase three
/// re-checks each recorded entity and deletes those with no remaining
/// connections. Recording must happen first: once the episodes are gone,
/// the candidate list is unknowable.
pub async fn delete_source_from_graph(graph: &dyn GraphStore, source_id: &str) -> Result<()> {
    let candidates = graph.entities_for_source(source_id).await?;

    let deleted = graph.delete_episodes(source_id).await?;
    tracing::debug!("deleted {deleted} episodes for {source_id}");

    let mut orphans = 0usize;
    for entity in &candidates {
        match graph.entity_connection_count(&entity.id).await {
            Ok(0) => {
                if let Err(e) = graph.delete_entity(&entity.id).await {
                    tracing::warn!("failed to delete orphan entity {}: {e:#}", entity.id);
                } else {
                    orphans += 1;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("failed to re-check entity {}: {e:#}", entity.id);
            }
        }
    }
    if orphans > 0 {
        tracing::info!("removed {orphans} orphaned entities for {source_id}");
    }
    Ok(())
}

/// Result of one startup scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Source ids that need a full reprocess.
    pub reprocess: Vec<String>,
    /// Documents that had metadata but no chunks.
    pub metadata_only: usize,
    /// Documents that had chunks but no metadata.
    pub chunks_only: usize,
    /// Orphaned chunks removed.
    pub chunks_removed: u64,
    /// Stale tracking entries removed.
    pub stale_removed: usize,
}

/// Scan the primary store for drift left by a prior crash.
///
/// Three patterns, matched against the ingestion step order:
/// - metadata without chunks: the crash hit between the metadata write
///   and the chunk write. Metadata stays (the source may still exist
///   upstream); partial graph data is deleted; the id is queued.
/// - chunks without metadata: the crash hit before the metadata write,
///   or metadata was removed independently. Chunks are batch-deleted and
///   the id is queued.
/// - stale tracking entries: neither metadata nor chunks remain, so the
///   entry is dropped and the document can be re-detected as new.
pub async fn startup_scan(ctx: &AppContext) -> Result<ScanReport> {
    let mut report = ScanReport::default();

    let metadata_ids: HashSet<String> =
        store::metadata_source_ids(&ctx.pool).await?.into_iter().collect();
    let chunk_ids: HashSet<String> =
        store::chunk_source_ids(&ctx.pool).await?.into_iter().collect();

    // Metadata without chunks.
    for source_id in metadata_ids.difference(&chunk_ids) {
        report.metadata_only += 1;
        report.reprocess.push(source_id.clone());
        if let Some(graph) = &ctx.graph {
            if let Err(e) = delete_source_from_graph(graph.as_ref(), source_id).await {
                tracing::warn!("partial graph cleanup failed for {source_id}: {e:#}");
            }
        }
    }

    // Chunks without metadata.
    for source_id in chunk_ids.difference(&metadata_ids) {
        report.chunks_only += 1;
        match store::delete_chunks_batched(&ctx.pool, source_id, store::DELETE_BATCH_SIZE).await {
            Ok(n) => report.chunks_removed += n,
            Err(e) => {
                tracing::warn!("orphan chunk cleanup failed for {source_id}: {e:#}");
            }
        }
        report.reprocess.push(source_id.clone());
    }

    // Stale tracking entries.
    for source_id in store::tracked_source_ids(&ctx.pool).await? {
        if !metadata_ids.contains(&source_id) && !chunk_ids.contains(&source_id) {
            if let Err(e) = store::remove_tracked(&ctx.pool, &source_id).await {
                tracing::warn!("failed to remove stale tracking entry {source_id}: {e:#}");
            } else {
                report.stale_removed += 1;
            }
        }
    }

    report.reprocess.sort();
    if !report.reprocess.is_empty() {
        tracing::info!(
            "startup scan: {} metadata-only, {} chunks-only, {} stale entries",
            report.metadata_only,
            report.chunks_only,
            report.stale_removed
        );
    }
    Ok(report)
}

/// Compare the graph backend's full source set against the primary store
/// and delete graph data whose source no longer exists anywhere. Runs at
/// startup and after every web processing cycle. Returns the number of
/// sources cleaned.
pub async fn graph_orphan_sweep(ctx: &AppContext) -> Result<usize> {
    let Some(graph) = &ctx.graph else {
        return Ok(0);
    };

    let mut valid: HashSet<String> =
        store::metadata_source_ids(&ctx.pool).await?.into_iter().collect();
    valid.extend(store::chunk_source_ids(&ctx.pool).await?);

    let graph_ids = graph.list_source_ids().await?;
    let orphaned: Vec<String> = graph_ids
        .into_iter()
        .filter(|id| !valid.contains(id))
        .collect();

    let mut cleaned = 0usize;
    for batch in orphaned.chunks(store::ORPHAN_BATCH_SIZE) {
        for source_id in batch {
            match delete_source_from_graph(graph.as_ref(), source_id).await {
                Ok(()) => cleaned += 1,
                Err(e) => {
                    tracing::warn!("graph orphan cleanup failed for {source_id}: {e:#}");
                }
            }
        }
    }

    if cleaned > 0 {
        tracing::info!("graph orphan sweep removed data for {cleaned} sources");
    }
    Ok(cleaned)
}
