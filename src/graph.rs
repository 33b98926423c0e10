//! Knowledge-graph backend.
//!
//! The graph is a secondary enrichment store: episodes (one per chunk)
//! are tagged with their owning document's `source_id` through the
//! `source_description` field, and the backend derives entities and
//! relationships from episode content on its own. Everything here is
//! best-effort from the pipeline's point of view; callers decide whether
//! a failure is fatal (it never is during ingestion).
//!
//! [`MemoryGraphStore`] is an in-process implementation used by tests and
//! by local runs without a graph service.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::GraphConfig;

/// An entity connected to a document's episodes, as seen during the
/// first phase of a two-phase delete.
#[derive(Debug, Clone)]
pub struct EntityRef {
    pub id: String,
    pub episode_count: u64,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn add_episode(
        &self,
        episode_id: &str,
        display_name: &str,
        content: &str,
        source_description: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Entities connected to any episode whose source description carries
    /// `source_id`, with their current episode connection counts.
    async fn entities_for_source(&self, source_id: &str) -> Result<Vec<EntityRef>>;

    /// Delete all episodes (and their direct relationships) for a source.
    /// Returns the number of episodes removed.
    async fn delete_episodes(&self, source_id: &str) -> Result<u64>;

    /// Remaining episode connections for one entity.
    async fn entity_connection_count(&self, entity_id: &str) -> Result<u64>;

    /// Delete an entity and its relationships.
    async fn delete_entity(&self, entity_id: &str) -> Result<()>;

    /// Every distinct source_id the graph currently knows about.
    async fn list_source_ids(&self) -> Result<Vec<String>>;

    /// Search episode facts.
    async fn search(&self, query: &str) -> Result<Vec<String>>;
}

/// Source description format carrying the owning document's id, so
/// deletion can match by prefix: `source_id:{id}|Document: {title} (Chunk: {i})`.
pub fn source_description(source_id: &str, title: &str, chunk_index: usize) -> String {
    format!(
        "source_id:{}|Document: {} (Chunk: {})",
        source_id, title, chunk_index
    )
}

/// Human-readable episode name for graph visualization:
/// `{title truncated to 50} ({i+1}/{n})`.
pub fn display_name(title: &str, chunk_index: usize, total: usize) -> String {
    let short: String = title.chars().take(50).collect();
    if total > 1 {
        format!("{} ({}/{})", short, chunk_index + 1, total)
    } else {
        short
    }
}

/// Prepare chunk content for episode submission.
///
/// The graph backend has its own token budget, so content over
/// `max_chars` is truncated, preferring a sentence boundary when at least
/// 70% of the budget is retained, and marked `[TRUNCATED]`. A short
/// `[Doc: {title}]` prefix is added when it fits.
pub fn prepare_episode_content(content: &str, title: &str, max_chars: usize) -> String {
    let mut body = content.to_string();

    if body.len() > max_chars {
        let cut = floor_char_boundary(&body, max_chars);
        let truncated = &body[..cut];
        let last_sentence_end = ['.', '!', '?']
            .iter()
            .filter_map(|p| truncated.rfind(&format!("{} ", p)))
            .max();

        body = match last_sentence_end {
            Some(pos) if pos as f64 > max_chars as f64 * 0.7 => {
                format!("{} [TRUNCATED]", &truncated[..=pos])
            }
            _ => format!("{}... [TRUNCATED]", truncated),
        };
    }

    if !title.is_empty() && body.len() < max_chars.saturating_sub(100) {
        let short_title: String = title.chars().take(50).collect();
        format!("[Doc: {}]\n\n{}", short_title, body)
    } else {
        body
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ============ HTTP client ============

/// Graph backend reached over a JSON HTTP API.
pub struct HttpGraphStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGraphStore {
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("graph.base_url required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { base_url, client })
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("graph {} failed: {}: {}", what, status, text);
        }
        Ok(resp)
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn add_episode(
        &self,
        episode_id: &str,
        display_name: &str,
        content: &str,
        source_description: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let body = serde_json::json!({
            "episode_id": episode_id,
            "name": display_name,
            "content": content,
            "source_description": source_description,
            "timestamp": timestamp.to_rfc3339(),
        });
        let resp = self
            .client
            .post(format!("{}/episodes", self.base_url))
            .json(&body)
            .send()
            .await?;
        Self::check(resp, "add_episode").await?;
        Ok(())
    }

    async fn entities_for_source(&self, source_id: &str) -> Result<Vec<EntityRef>> {
        let resp = self
            .client
            .get(format!("{}/entities", self.base_url))
            .query(&[("source_id", source_id)])
            .send()
            .await?;
        let resp = Self::check(resp, "entities_for_source").await?;
        let json: serde_json::Value = resp.json().await?;
        let arr = json
            .get("entities")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("graph response missing entities array"))?;
        let mut out = Vec::with_capacity(arr.len());
        for item in arr {
            let id = item
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("graph entity missing id"))?;
            let episode_count = item
                .get("episode_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            out.push(EntityRef {
                id: id.to_string(),
                episode_count,
            });
        }
        Ok(out)
    }

    async fn delete_episodes(&self, source_id: &str) -> Result<u64> {
        let resp = self
            .client
            .delete(format!("{}/episodes", self.base_url))
            .query(&[("source_id", source_id)])
            .send()
            .await?;
        let resp = Self::check(resp, "delete_episodes").await?;
        let json: serde_json::Value = resp.json().await.unwrap_or_default();
        Ok(json.get("deleted").and_then(|v| v.as_u64()).unwrap_or(0))
    }

    async fn entity_connection_count(&self, entity_id: &str) -> Result<u64> {
        let resp = self
            .client
            .get(format!("{}/entities/{}/connections", self.base_url, entity_id))
            .send()
            .await?;
        let resp = Self::check(resp, "entity_connection_count").await?;
        let json: serde_json::Value = resp.json().await?;
        json.get("count")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow::anyhow!("graph response missing connection count"))
    }

    async fn delete_entity(&self, entity_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/entities/{}", self.base_url, entity_id))
            .send()
            .await?;
        Self::check(resp, "delete_entity").await?;
        Ok(())
    }

    async fn list_source_ids(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/sources", self.base_url))
            .send()
            .await?;
        let resp = Self::check(resp, "list_source_ids").await?;
        let json: serde_json::Value = resp.json().await?;
        let arr = json
            .get("source_ids")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("graph response missing source_ids array"))?;
        Ok(arr
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<String>> {
        let body = serde_json::json!({ "query": query });
        let resp = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await?;
        let resp = Self::check(resp, "search").await?;
        let json: serde_json::Value = resp.json().await?;
        let arr = json
            .get("facts")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("graph response missing facts array"))?;
        Ok(arr
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect())
    }
}

// ============ In-memory store ============

#[derive(Debug, Clone)]
struct MemoryEpisode {
    id: String,
    source_id: String,
    content: String,
}

#[derive(Default)]
struct MemoryState {
    episodes: Vec<MemoryEpisode>,
    // entity id -> episode ids it is connected to
    entities: HashMap<String, HashSet<String>>,
}

/// In-process graph store for tests and graph-less local runs. Entities
/// are not derived from content; tests seed them explicitly with
/// [`MemoryGraphStore::link_entity`].
#[derive(Default)]
pub struct MemoryGraphStore {
    state: Mutex<MemoryState>,
    pub fail_add_episode: std::sync::atomic::AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect an entity to a set of episode ids.
    pub fn link_entity(&self, entity_id: &str, episode_ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let set = state.entities.entry(entity_id.to_string()).or_default();
        for id in episode_ids {
            set.insert(id.to_string());
        }
    }

    pub fn episode_ids_for_source(&self, source_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .episodes
            .iter()
            .filter(|e| e.source_id == source_id)
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn episode_count(&self) -> usize {
        self.state.lock().unwrap().episodes.len()
    }

    pub fn entity_exists(&self, entity_id: &str) -> bool {
        self.state.lock().unwrap().entities.contains_key(entity_id)
    }
}

fn source_id_of(description: &str) -> Option<&str> {
    description
        .strip_prefix("source_id:")
        .and_then(|rest| rest.split('|').next())
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn add_episode(
        &self,
        episode_id: &str,
        _display_name: &str,
        content: &str,
        source_description: &str,
        _timestamp: DateTime<Utc>,
    ) -> Result<()> {
        if self.fail_add_episode.load(std::sync::atomic::Ordering::SeqCst) {
            bail!("simulated graph failure");
        }
        let source_id = source_id_of(source_description)
            .ok_or_else(|| anyhow::anyhow!("malformed source description"))?
            .to_string();
        let mut state = self.state.lock().unwrap();
        state.episodes.push(MemoryEpisode {
            id: episode_id.to_string(),
            source_id,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn entities_for_source(&self, source_id: &str) -> Result<Vec<EntityRef>> {
        let state = self.state.lock().unwrap();
        let source_episodes: HashSet<&str> = state
            .episodes
            .iter()
            .filter(|e| e.source_id == source_id)
            .map(|e| e.id.as_str())
            .collect();
        Ok(state
            .entities
            .iter()
            .filter(|(_, eps)| eps.iter().any(|id| source_episodes.contains(id.as_str())))
            .map(|(id, eps)| EntityRef {
                id: id.clone(),
                episode_count: eps.len() as u64,
            })
            .collect())
    }

    async fn delete_episodes(&self, source_id: &str) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let removed: Vec<String> = state
            .episodes
            .iter()
            .filter(|e| e.source_id == source_id)
            .map(|e| e.id.clone())
            .collect();
        state.episodes.retain(|e| e.source_id != source_id);
        for eps in state.entities.values_mut() {
            for id in &removed {
                eps.remove(id);
            }
        }
        Ok(removed.len() as u64)
    }

    async fn entity_connection_count(&self, entity_id: &str) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entities
            .get(entity_id)
            .map(|eps| eps.len() as u64)
            .unwrap_or(0))
    }

    async fn delete_entity(&self, entity_id: &str) -> Result<()> {
        self.state.lock().unwrap().entities.remove(entity_id);
        Ok(())
    }

    async fn list_source_ids(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let ids: HashSet<String> = state.episodes.iter().map(|e| e.source_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .episodes
            .iter()
            .filter(|e| e.content.contains(query))
            .map(|e| e.content.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_description_format_round_trips() {
        let desc = source_description("doc-1", "Annual Report", 3);
        assert_eq!(desc, "source_id:doc-1|Document: Annual Report (Chunk: 3)");
        assert_eq!(source_id_of(&desc), Some("doc-1"));
    }

    #[test]
    fn display_name_is_truncated_and_numbered() {
        let long_title = "x".repeat(80);
        let name = display_name(&long_title, 1, 4);
        assert_eq!(name, format!("{} (2/4)", "x".repeat(50)));
        assert_eq!(display_name("Short", 0, 1), "Short");
    }

    #[test]
    fn short_content_gets_doc_prefix_only() {
        let out = prepare_episode_content("Some body.", "My Doc", 1500);
        assert_eq!(out, "[Doc: My Doc]\n\nSome body.");
    }

    #[test]
    fn long_content_truncates_at_sentence_boundary() {
        let sentence = "This sentence is a fixed length of sorts. ";
        let content = sentence.repeat(60);
        let out = prepare_episode_content(&content, "", 1500);
        assert!(out.len() <= 1500 + " [TRUNCATED]".len());
        assert!(out.ends_with(" [TRUNCATED]"));
        let body = out.trim_end_matches(" [TRUNCATED]");
        assert!(body.ends_with('.'), "expected sentence-boundary cut");
    }

    #[test]
    fn unbreakable_content_truncates_hard() {
        let content = "a".repeat(3000);
        let out = prepare_episode_content(&content, "", 1500);
        assert!(out.ends_with("... [TRUNCATED]"));
    }

    #[tokio::test]
    async fn memory_store_search_matches_episode_content() {
        let store = MemoryGraphStore::new();
        store
            .add_episode("e1", "d (1/1)", "Acme acquired Initech.", &source_description("d", "d", 0), Utc::now())
            .await
            .unwrap();
        let hits = store.search("Initech").await.unwrap();
        assert_eq!(hits, vec!["Acme acquired Initech.".to_string()]);
        assert!(store.search("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_two_phase_delete_shape() {
        let store = MemoryGraphStore::new();
        store
            .add_episode("e1", "d (1/2)", "alpha", &source_description("d", "d", 0), Utc::now())
            .await
            .unwrap();
        store
            .add_episode("e2", "d (2/2)", "beta", &source_description("d", "d", 1), Utc::now())
            .await
            .unwrap();
        store.link_entity("acme", &["e1"]);

        let entities = store.entities_for_source("d").await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(store.delete_episodes("d").await.unwrap(), 2);
        assert_eq!(store.entity_connection_count("acme").await.unwrap(), 0);
    }
}
