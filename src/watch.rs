//! Filesystem watch loop.
//!
//! Periodically scans a root directory with include/exclude globs,
//! ingests new and changed files (change detection is a SHA-256 content
//! hash kept in the tracking set), and deletes all state for files that
//! have disappeared.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::WatchConfig;
use crate::extract;
use crate::ingest::{self, AppContext};
use crate::models::SourceDocument;
use crate::reconcile;
use crate::store;

#[derive(Debug, Default)]
pub struct ScanSummary {
    pub ingested: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Run scan cycles forever, sleeping `interval_secs` between them.
pub async fn run_loop(ctx: &AppContext) -> Result<()> {
    let cfg = watch_config(ctx)?;
    loop {
        match scan_once(ctx).await {
            Ok(summary) => {
                if summary.ingested > 0 || summary.removed > 0 {
                    println!(
                        "watch: {} ingested, {} removed, {} unchanged, {} failed",
                        summary.ingested, summary.unchanged, summary.removed, summary.failed
                    );
                }
            }
            Err(e) => tracing::error!("watch scan failed: {e:#}"),
        }
        tokio::time::sleep(std::time::Duration::from_secs(cfg.interval_secs)).await;
    }
}

fn watch_config(ctx: &AppContext) -> Result<&WatchConfig> {
    ctx.config
        .watch
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[watch] section not configured"))
}

/// One scan: ingest new/changed files, delete state for removed files.
pub async fn scan_once(ctx: &AppContext) -> Result<ScanSummary> {
    let cfg = watch_config(ctx)?;
    let root = &cfg.root;
    if !root.exists() {
        bail!("watch root does not exist: {}", root.display());
    }

    let include_set = build_globset(&cfg.include_globs)?;
    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(cfg.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files: Vec<(String, std::path::PathBuf)> = Vec::new();
    let walker = WalkDir::new(root).follow_links(cfg.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }
    // Deterministic ordering
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summary = ScanSummary::default();
    let mut present: HashSet<String> = HashSet::new();

    for (source_id, path) in &files {
        present.insert(source_id.clone());

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("failed to read {}: {e}", path.display());
                summary.failed += 1;
                continue;
            }
        };
        let hash = content_hash(&bytes);

        if store::tracked_hash(&ctx.pool, source_id).await?.as_deref() == Some(hash.as_str()) {
            summary.unchanged += 1;
            continue;
        }

        let doc = SourceDocument {
            source_id: source_id.clone(),
            title: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| source_id.clone()),
            url: Some(format!("file://{}", path.display())),
            media_type: media_type_for(path).to_string(),
            folder_path: Path::new(source_id)
                .parent()
                .map(|p| p.to_string_lossy().to_string()),
        };

        let outcome = ingest::ingest_document(ctx, &doc, &bytes).await;
        if outcome.success {
            store::upsert_tracked(&ctx.pool, source_id, &hash).await?;
            summary.ingested += 1;
        } else {
            summary.failed += 1;
        }
    }

    // Files that vanished since the last scan.
    for source_id in store::tracked_source_ids(&ctx.pool).await? {
        if present.contains(&source_id) {
            continue;
        }
        if let Some(graph) = &ctx.graph {
            if let Err(e) = reconcile::delete_source_from_graph(graph.as_ref(), &source_id).await {
                tracing::warn!("graph cleanup failed for removed file {source_id}: {e:#}");
            }
        }
        if let Err(e) =
            store::delete_chunks_batched(&ctx.pool, &source_id, store::DELETE_BATCH_SIZE).await
        {
            tracing::warn!("chunk cleanup failed for removed file {source_id}: {e:#}");
        }
        if let Err(e) = store::delete_rows(&ctx.pool, &source_id).await {
            tracing::warn!("row cleanup failed for removed file {source_id}: {e:#}");
        }
        if let Err(e) = store::delete_metadata(&ctx.pool, &source_id).await {
            tracing::warn!("metadata cleanup failed for removed file {source_id}: {e:#}");
        }
        if let Err(e) = store::remove_tracked(&ctx.pool, &source_id).await {
            tracing::warn!("tracking cleanup failed for removed file {source_id}: {e:#}");
        }
        summary.removed += 1;
    }

    Ok(summary)
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("md") | Some("markdown") => extract::MIME_MARKDOWN,
        Some("csv") => extract::MIME_CSV,
        Some("pdf") => extract::MIME_PDF,
        Some("docx") => extract::MIME_DOCX,
        Some("xlsx") => extract::MIME_XLSX,
        _ => extract::MIME_TEXT,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
