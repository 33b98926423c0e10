//! End-to-end pipeline tests against a temporary SQLite database, with an
//! in-memory graph store and a fake embedding provider standing in for
//! the external collaborators.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use docflow::config::{Config, DbConfig, SelectorConfig, WatchConfig};
use docflow::db;
use docflow::embedding::Embedder;
use docflow::graph::{GraphStore, MemoryGraphStore};
use docflow::ingest::{self, AppContext};
use docflow::migrate;
use docflow::models::{Chunk, SourceDocument};
use docflow::reconcile;
use docflow::store;
use docflow::watch;

/// Embedder returning fixed-size vectors; `shortfall` simulates a
/// provider that drops responses.
struct FakeEmbedder {
    shortfall: usize,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let n = texts.len().saturating_sub(self.shortfall);
        Ok((0..n).map(|i| vec![i as f32, 0.5, -0.5]).collect())
    }

    fn dims(&self) -> usize {
        3
    }
}

async fn test_ctx(
    dir: &TempDir,
    selector_mode: &str,
    shortfall: usize,
) -> (AppContext, Arc<MemoryGraphStore>) {
    let config = Config {
        db: DbConfig {
            path: dir.path().join("docflow.db"),
        },
        chunking: Default::default(),
        embedding: Default::default(),
        graph: Default::default(),
        selector: SelectorConfig {
            mode: selector_mode.to_string(),
            ..Default::default()
        },
        crawler: Default::default(),
        advisor: Default::default(),
        watch: None,
    };
    let pool = db::connect_path(&config.db.path).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let graph = Arc::new(MemoryGraphStore::new());
    let ctx = AppContext {
        config,
        pool,
        embedder: Some(Box::new(FakeEmbedder { shortfall })),
        graph: Some(graph.clone() as Arc<dyn GraphStore>),
        advisor: None,
    };
    (ctx, graph)
}

fn doc(source_id: &str, title: &str, media_type: &str) -> SourceDocument {
    SourceDocument {
        source_id: source_id.to_string(),
        title: title.to_string(),
        url: None,
        media_type: media_type.to_string(),
        folder_path: None,
    }
}

fn markdown_body() -> String {
    let mut body = String::from("# Report\n\nOpening summary paragraph.\n\n");
    body.push_str("| name | role |\n|------|------|\n| ada | engineer |\n\n");
    for i in 0..30 {
        body.push_str(&format!(
            "Section {i} describes a development in reasonable detail. "
        ));
    }
    body
}

async fn fetch_chunks(ctx: &AppContext, source_id: &str) -> Vec<(i64, String, i64)> {
    sqlx::query_as(
        "SELECT chunk_index, content, is_table FROM chunks WHERE source_id = ? ORDER BY chunk_index",
    )
    .bind(source_id)
    .fetch_all(&ctx.pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn ingest_persists_metadata_chunks_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _) = test_ctx(&dir, "never", 0).await;

    let body = markdown_body();
    let outcome = ingest::ingest(&ctx, &doc("doc-1", "report.md", "text/markdown"), body.as_bytes(), &body).await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert!(outcome.chunks_written > 1);
    assert_eq!(outcome.rows_written, 1, "markdown table row expected");
    assert!(store::metadata_exists(&ctx.pool, "doc-1").await.unwrap());

    let chunks = fetch_chunks(&ctx, "doc-1").await;
    assert_eq!(chunks.len(), outcome.chunks_written);
    for (i, (index, _, _)) in chunks.iter().enumerate() {
        assert_eq!(*index, i as i64, "chunk indices must be contiguous");
    }
    assert!(
        chunks.iter().any(|(_, _, is_table)| *is_table == 1),
        "table chunk expected"
    );
}

#[tokio::test]
async fn reingest_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, graph) = test_ctx(&dir, "always", 0).await;

    let body = markdown_body();
    let d = doc("doc-1", "report.md", "text/markdown");
    let first = ingest::ingest(&ctx, &d, body.as_bytes(), &body).await;
    let second = ingest::ingest(&ctx, &d, body.as_bytes(), &body).await;

    assert!(first.success && second.success);
    assert_eq!(first.chunks_written, second.chunks_written);

    let chunks = fetch_chunks(&ctx, "doc-1").await;
    assert_eq!(chunks.len(), second.chunks_written, "no duplicate chunks");
    assert_eq!(
        graph.episode_ids_for_source("doc-1").len(),
        second.graph_episodes,
        "no duplicate episodes"
    );

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_rows WHERE source_id = ?")
        .bind("doc-1")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(rows, 1, "no duplicate rows");
}

#[tokio::test]
async fn embedding_count_mismatch_aborts_without_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _) = test_ctx(&dir, "never", 1).await;

    let body = markdown_body();
    let outcome = ingest::ingest(&ctx, &doc("doc-1", "report.md", "text/markdown"), body.as_bytes(), &body).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("mismatch"));
    assert_eq!(store::count_chunks(&ctx.pool, "doc-1").await.unwrap(), 0);
    // Metadata stays for the next reconciliation scan to find.
    assert!(store::metadata_exists(&ctx.pool, "doc-1").await.unwrap());
}

#[tokio::test]
async fn empty_text_falls_back_to_title_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _) = test_ctx(&dir, "never", 0).await;

    let outcome = ingest::ingest(&ctx, &doc("page-1", "Empty Page", "text/markdown"), b"", "").await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.chunks_written, 1);
    let chunks = fetch_chunks(&ctx, "page-1").await;
    assert_eq!(chunks[0].1, "Empty Page");

    // Metadata + one chunk is a converged state, not drift.
    let report = reconcile::startup_scan(&ctx).await.unwrap();
    assert!(report.reprocess.is_empty());
}

#[tokio::test]
async fn graph_failure_is_nonfatal() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, graph) = test_ctx(&dir, "always", 0).await;
    graph
        .fail_add_episode
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let body = markdown_body();
    let outcome = ingest::ingest(&ctx, &doc("doc-1", "report.md", "text/markdown"), body.as_bytes(), &body).await;

    assert!(outcome.success, "graph failure must not fail the document");
    assert!(outcome.graph_warning.is_some());
    assert_eq!(outcome.graph_episodes, 0);
    assert!(store::count_chunks(&ctx.pool, "doc-1").await.unwrap() > 0);
}

#[tokio::test]
async fn startup_scan_queues_metadata_without_chunks_and_cleans_graph() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, graph) = test_ctx(&dir, "never", 0).await;

    store::upsert_metadata(&ctx.pool, &doc("half-done", "x.md", "text/markdown"), None)
        .await
        .unwrap();
    graph
        .add_episode(
            "e1",
            "x",
            "partial",
            "source_id:half-done|Document: x (Chunk: 0)",
            chrono::Utc::now(),
        )
        .await
        .unwrap();

    let report = reconcile::startup_scan(&ctx).await.unwrap();

    assert_eq!(report.reprocess, vec!["half-done".to_string()]);
    assert_eq!(report.metadata_only, 1);
    // Metadata is kept; partial graph data is not.
    assert!(store::metadata_exists(&ctx.pool, "half-done").await.unwrap());
    assert!(graph.episode_ids_for_source("half-done").is_empty());
}

#[tokio::test]
async fn startup_scan_deletes_chunks_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _) = test_ctx(&dir, "never", 0).await;

    let orphans: Vec<Chunk> = (0..25)
        .map(|i| Chunk {
            id: format!("c{i}"),
            source_id: "ghost".to_string(),
            chunk_index: i,
            content: format!("orphan {i}"),
            is_table: false,
            embedding: None,
        })
        .collect();
    store::insert_chunks(&ctx.pool, &orphans).await.unwrap();

    let report = reconcile::startup_scan(&ctx).await.unwrap();

    assert_eq!(report.reprocess, vec!["ghost".to_string()]);
    assert_eq!(report.chunks_removed, 25);
    assert_eq!(store::count_chunks(&ctx.pool, "ghost").await.unwrap(), 0);
}

#[tokio::test]
async fn startup_scan_drops_stale_tracking_entries() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _) = test_ctx(&dir, "never", 0).await;

    store::upsert_tracked(&ctx.pool, "gone-file", "deadbeef")
        .await
        .unwrap();

    let report = reconcile::startup_scan(&ctx).await.unwrap();

    assert_eq!(report.stale_removed, 1);
    assert!(report.reprocess.is_empty());
    assert!(store::tracked_source_ids(&ctx.pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn reconciliation_converges_after_reprocessing() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, _) = test_ctx(&dir, "never", 0).await;

    // One metadata-only document, one chunks-only document.
    store::upsert_metadata(&ctx.pool, &doc("meta-only", "a.md", "text/markdown"), None)
        .await
        .unwrap();
    store::insert_chunks(
        &ctx.pool,
        &[Chunk {
            id: "c0".to_string(),
            source_id: "chunks-only".to_string(),
            chunk_index: 0,
            content: "stray".to_string(),
            is_table: false,
            embedding: None,
        }],
    )
    .await
    .unwrap();

    let report = reconcile::startup_scan(&ctx).await.unwrap();
    assert_eq!(report.reprocess.len(), 2);

    let body = markdown_body();
    for source_id in &report.reprocess {
        let outcome =
            ingest::ingest(&ctx, &doc(source_id, "a.md", "text/markdown"), body.as_bytes(), &body)
                .await;
        assert!(outcome.success);
    }

    let after = reconcile::startup_scan(&ctx).await.unwrap();
    assert!(after.reprocess.is_empty(), "drift must not survive a cycle");
}

#[tokio::test]
async fn removed_file_cleanup_survives_a_store_error() {
    let dir = tempfile::tempdir().unwrap();
    let (mut ctx, _) = test_ctx(&dir, "never", 0).await;
    let root = tempfile::tempdir().unwrap();
    ctx.config.watch = Some(WatchConfig {
        root: root.path().to_path_buf(),
        include_globs: vec!["**/*.md".to_string()],
        exclude_globs: Vec::new(),
        follow_symlinks: false,
        interval_secs: 60,
    });

    // A tracked file that no longer exists on disk.
    store::upsert_tracked(&ctx.pool, "gone.md", "deadbeef")
        .await
        .unwrap();
    // Make the row deletion fail mid-cleanup.
    sqlx::query("DROP TABLE document_rows")
        .execute(&ctx.pool)
        .await
        .unwrap();

    let summary = watch::scan_once(&ctx).await.unwrap();
    assert_eq!(summary.removed, 1);
    assert!(store::tracked_source_ids(&ctx.pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn two_phase_delete_preserves_shared_entities() {
    let dir = tempfile::tempdir().unwrap();
    let (_ctx, graph) = test_ctx(&dir, "never", 0).await;

    graph
        .add_episode("a0", "a", "x", "source_id:doc-a|Document: a (Chunk: 0)", chrono::Utc::now())
        .await
        .unwrap();
    graph
        .add_episode("b0", "b", "y", "source_id:doc-b|Document: b (Chunk: 0)", chrono::Utc::now())
        .await
        .unwrap();
    // One entity shared across both documents, one private to doc-a.
    graph.link_entity("shared-corp", &["a0", "b0"]);
    graph.link_entity("private-person", &["a0"]);

    reconcile::delete_source_from_graph(graph.as_ref(), "doc-a")
        .await
        .unwrap();

    assert!(graph.entity_exists("shared-corp"), "still referenced by doc-b");
    assert!(!graph.entity_exists("private-person"), "orphan must be removed");

    reconcile::delete_source_from_graph(graph.as_ref(), "doc-b")
        .await
        .unwrap();
    assert!(!graph.entity_exists("shared-corp"));
}

#[tokio::test]
async fn graph_orphan_sweep_removes_sources_missing_from_primary_store() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, graph) = test_ctx(&dir, "always", 0).await;

    // A live document and a graph-only ghost.
    let body = markdown_body();
    let outcome = ingest::ingest(&ctx, &doc("live", "report.md", "text/markdown"), body.as_bytes(), &body).await;
    assert!(outcome.success);
    graph
        .add_episode("g0", "g", "z", "source_id:ghost|Document: g (Chunk: 0)", chrono::Utc::now())
        .await
        .unwrap();

    let cleaned = reconcile::graph_orphan_sweep(&ctx).await.unwrap();

    assert_eq!(cleaned, 1);
    assert!(graph.episode_ids_for_source("ghost").is_empty());
    assert!(!graph.episode_ids_for_source("live").is_empty());
}
