use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub watch: Option<WatchConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            min_size: default_min_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_size() -> usize {
    800
}
fn default_min_size() -> usize {
    100
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            base_url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Delay between episode submissions, backpressure against the
    /// graph backend's rate limits.
    #[serde(default = "default_episode_delay_ms")]
    pub episode_delay_ms: u64,
    /// Episode content ceiling; longer chunks are truncated at a
    /// sentence boundary before submission.
    #[serde(default = "default_max_episode_chars")]
    pub max_episode_chars: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            timeout_secs: default_timeout_secs(),
            episode_delay_ms: default_episode_delay_ms(),
            max_episode_chars: default_max_episode_chars(),
        }
    }
}

fn default_episode_delay_ms() -> u64 {
    200
}
fn default_max_episode_chars() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectorConfig {
    /// `auto`, `always`, `never`, or `folder-only`.
    #[serde(default = "default_selector_mode")]
    pub mode: String,
    /// Documents under a folder with this name always use the graph.
    #[serde(default = "default_folder_marker")]
    pub folder_marker: String,
    #[serde(default = "default_min_chunks")]
    pub min_chunks: usize,
    #[serde(default = "default_entity_threshold")]
    pub entity_threshold: usize,
    #[serde(default = "default_relationship_threshold")]
    pub relationship_threshold: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            mode: default_selector_mode(),
            folder_marker: default_folder_marker(),
            min_chunks: default_min_chunks(),
            entity_threshold: default_entity_threshold(),
            relationship_threshold: default_relationship_threshold(),
        }
    }
}

fn default_selector_mode() -> String {
    "folder-only".to_string()
}
fn default_folder_marker() -> String {
    "graph-rag".to_string()
}
fn default_min_chunks() -> usize {
    3
}
fn default_entity_threshold() -> usize {
    5
}
fn default_relationship_threshold() -> f64 {
    0.15
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_links_per_page")]
    pub max_links_per_page: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_links_per_page: default_max_links_per_page(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_depth() -> u32 {
    1
}
fn default_max_links_per_page() -> usize {
    10
}
fn default_user_agent() -> String {
    "docflow/0.3".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdvisorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_advisor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: None,
            base_url: None,
            timeout_secs: default_advisor_timeout_secs(),
        }
    }
}

fn default_advisor_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_watch_interval_secs")]
    pub interval_secs: u64,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
        "**/*.xlsx".to_string(),
        "**/*.csv".to_string(),
    ]
}

fn default_watch_interval_secs() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_size == 0 {
        anyhow::bail!("chunking.max_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_size {
        anyhow::bail!("chunking.overlap must be < chunking.max_size");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.selector.mode.as_str() {
        "auto" | "always" | "never" | "folder-only" => {}
        other => anyhow::bail!(
            "Unknown selector mode: '{}'. Must be auto, always, never, or folder-only.",
            other
        ),
    }

    if !(0.0..=1.0).contains(&config.selector.relationship_threshold) {
        anyhow::bail!("selector.relationship_threshold must be in [0.0, 1.0]");
    }

    if config.graph.enabled && config.graph.base_url.is_none() {
        anyhow::bail!("graph.base_url must be set when graph.enabled is true");
    }

    if config.advisor.enabled && config.advisor.model.is_none() {
        anyhow::bail!("advisor.model must be set when advisor.enabled is true");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("docflow.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[db]\npath = \"data/docflow.db\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.chunking.max_size, 800);
        assert_eq!(cfg.chunking.overlap, 100);
        assert_eq!(cfg.selector.mode, "folder-only");
        assert!(!cfg.graph.enabled);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn overlap_must_be_smaller_than_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "[db]\npath = \"x.db\"\n[chunking]\nmax_size = 100\noverlap = 100\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn graph_enabled_requires_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[db]\npath = \"x.db\"\n[graph]\nenabled = true\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_unknown_selector_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[db]\npath = \"x.db\"\n[selector]\nmode = \"maybe\"\n");
        assert!(load_config(&path).is_err());
    }
}
