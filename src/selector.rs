//! Graph-use heuristic.
//!
//! Decides whether a document is worth sending to the graph backend.
//! Pure function of its inputs and configuration: no I/O, deterministic.
//! The graph is an enrichment, so the default answer is "no" — vector
//! search alone serves most documents.

use regex::Regex;
use std::collections::HashSet;

use crate::config::SelectorConfig;
use crate::models::Decision;

/// Titles containing these suggest entity/relationship-rich content.
const GRAPH_WORTHY_KEYWORDS: &[&str] = &[
    "org", "chart", "structure", "contract", "agreement", "legal", "research", "paper", "study",
    "analysis", "relationship", "network", "connection", "timeline", "history", "genealogy",
    "directory", "roster", "team",
];

/// Titles containing these suggest flat reference content.
const SIMPLE_KEYWORDS: &[&str] = &[
    "readme",
    "guide",
    "manual",
    "faq",
    "receipt",
    "invoice",
    "certificate",
    "template",
    "form",
    "letter",
];

/// Media types that never benefit from the graph.
const SIMPLE_MEDIA_TYPES: &[&str] = &["text/plain", "text/markdown"];

/// Decide whether `text` should be submitted to the graph backend.
/// First matching rule wins.
pub fn decide(
    cfg: &SelectorConfig,
    text: &str,
    chunk_count: usize,
    title: &str,
    media_type: &str,
    url: Option<&str>,
    folder_path: Option<&str>,
) -> Decision {
    // 1. Forced mode
    match cfg.mode.as_str() {
        "always" => {
            return Decision {
                use_graph: true,
                reason: "mode=always".to_string(),
            }
        }
        "never" => {
            return Decision {
                use_graph: false,
                reason: "mode=never".to_string(),
            }
        }
        _ => {}
    }

    // 2. Folder marker in path, URL, or title
    let marker = cfg.folder_marker.to_lowercase();
    let in_marker_folder = !marker.is_empty()
        && (folder_path
            .map(|p| p.to_lowercase().contains(&marker))
            .unwrap_or(false)
            || url.map(|u| u.to_lowercase().contains(&marker)).unwrap_or(false)
            || title.to_lowercase().contains(&marker));
    if in_marker_folder {
        return Decision {
            use_graph: true,
            reason: format!("folder marker '{}'", cfg.folder_marker),
        };
    }
    if cfg.mode == "folder-only" {
        return Decision {
            use_graph: false,
            reason: "mode=folder-only and no folder marker".to_string(),
        };
    }

    // 3. Size floor
    if chunk_count < cfg.min_chunks {
        return Decision {
            use_graph: false,
            reason: format!(
                "too small: {} chunk(s), minimum {}",
                chunk_count, cfg.min_chunks
            ),
        };
    }

    // 4. Simple media types
    if SIMPLE_MEDIA_TYPES.contains(&media_type) || media_type.starts_with("image/") {
        return Decision {
            use_graph: false,
            reason: format!("simple media type '{}'", media_type),
        };
    }

    // 5. Title keywords
    let title_lower = title.to_lowercase();
    if let Some(kw) = GRAPH_WORTHY_KEYWORDS
        .iter()
        .find(|kw| title_lower.contains(*kw))
    {
        return Decision {
            use_graph: true,
            reason: format!("graph-worthy title keyword '{}'", kw),
        };
    }
    if let Some(kw) = SIMPLE_KEYWORDS.iter().find(|kw| title_lower.contains(*kw)) {
        return Decision {
            use_graph: false,
            reason: format!("simple title keyword '{}'", kw),
        };
    }

    // 6. Content analysis
    let entities = entity_score(text);
    let density = relationship_density(text);
    let entity_rich = entities >= cfg.entity_threshold;
    let relationship_rich = density >= cfg.relationship_threshold;
    if (entity_rich && relationship_rich) || entities >= cfg.entity_threshold * 2 {
        return Decision {
            use_graph: true,
            reason: format!(
                "content analysis: {} entities, relationship density {:.2}",
                entities, density
            ),
        };
    }

    // 7. Default
    Decision {
        use_graph: false,
        reason: format!(
            "default vector-only: {} entities, relationship density {:.2}",
            entities, density
        ),
    }
}

/// Count distinct entity-like signals: proper-noun phrases, organization
/// suffixes, dates (capped at 10), and email addresses.
pub fn entity_score(text: &str) -> usize {
    let mut score = 0usize;

    if let Ok(re) = Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b") {
        let unique: HashSet<&str> = re.find_iter(text).map(|m| m.as_str()).collect();
        score += unique.len();
    }

    if let Ok(re) = Regex::new(r"\b(?:Inc|LLC|Corp|Ltd|GmbH|SA|AG)\b\.?") {
        score += re.find_iter(text).count();
    }

    if let Ok(re) = Regex::new(
        r"\b\d{4}-\d{2}-\d{2}\b|\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2},?\s+\d{4}\b",
    ) {
        score += re.find_iter(text).count().min(10);
    }

    if let Ok(re) = Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.]+\b") {
        score += re.find_iter(text).count();
    }

    score
}

/// Density of relationship-indicating phrases per 1,000 characters,
/// scaled down by 10 and capped at 1.0.
pub fn relationship_density(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let pattern = r"(?i)\b(?:works?\s+(?:for|at|with)|employed\s+by|reports?\s+to|manages?|married\s+to|parent\s+of|child\s+of|founded(?:\s+by)?|owns?|owned\s+by|partner(?:ed)?\s+with|collaborat\w+\s+with|member\s+of|belongs\s+to|subsidiary\s+of|acquired(?:\s+by)?|leads?|hired(?:\s+by)?)\b";
    let matches = match Regex::new(pattern) {
        Ok(re) => re.find_iter(text).count(),
        Err(_) => 0,
    };
    let per_thousand = matches as f64 * 1000.0 / text.len() as f64;
    (per_thousand / 10.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(mode: &str) -> SelectorConfig {
        SelectorConfig {
            mode: mode.to_string(),
            ..SelectorConfig::default()
        }
    }

    #[test]
    fn mode_always_forces_graph() {
        let d = decide(&cfg("always"), "x", 1, "notes.txt", "text/plain", None, None);
        assert!(d.use_graph);
    }

    #[test]
    fn mode_never_skips_graph() {
        let d = decide(
            &cfg("never"),
            "x",
            50,
            "Org Chart.pdf",
            "application/pdf",
            None,
            None,
        );
        assert!(!d.use_graph);
    }

    #[test]
    fn folder_marker_wins_in_any_mode() {
        let d = decide(
            &cfg("folder-only"),
            "x",
            1,
            "notes.md",
            "text/markdown",
            None,
            Some("/docs/graph-rag/notes.md"),
        );
        assert!(d.use_graph);
        assert!(d.reason.contains("folder marker"));
    }

    #[test]
    fn folder_only_without_marker_skips() {
        let d = decide(
            &cfg("folder-only"),
            "x",
            50,
            "Org Chart.pdf",
            "application/pdf",
            None,
            Some("/docs/misc"),
        );
        assert!(!d.use_graph);
    }

    #[test]
    fn small_receipt_pdf_is_skipped() {
        let d = decide(
            &cfg("auto"),
            "Total: $12.50",
            1,
            "Receipt_2024.pdf",
            "application/pdf",
            None,
            None,
        );
        assert!(!d.use_graph);
        assert!(d.reason.contains("too small"));
    }

    #[test]
    fn simple_media_type_skips_even_when_large() {
        let d = decide(&cfg("auto"), "x", 10, "notes", "text/markdown", None, None);
        assert!(!d.use_graph);
        assert!(d.reason.contains("simple media type"));
    }

    #[test]
    fn graph_worthy_title_keyword_forces_use() {
        let d = decide(
            &cfg("auto"),
            "x",
            10,
            "Vendor Contract 2024.pdf",
            "application/pdf",
            None,
            None,
        );
        assert!(d.use_graph);
        assert!(d.reason.contains("contract"));
    }

    #[test]
    fn simple_title_keyword_forces_skip() {
        let d = decide(
            &cfg("auto"),
            "x",
            10,
            "Invoice March.pdf",
            "application/pdf",
            None,
            None,
        );
        assert!(!d.use_graph);
        assert!(d.reason.contains("invoice"));
    }

    #[test]
    fn entity_and_relationship_rich_content_uses_graph() {
        let text = "Alice Johnson works for Acme Corp. Bob Smith reports to Alice Johnson. \
            Carol White is employed by Initech LLC and collaborates with Dan Brown. \
            Erin Green manages the Platform Team and was hired by Frank Black on 2023-04-01. \
            Contact: alice@acme.example.";
        let d = decide(
            &cfg("auto"),
            text,
            10,
            "Q3 planning.pdf",
            "application/pdf",
            None,
            None,
        );
        assert!(d.use_graph, "reason: {}", d.reason);
    }

    #[test]
    fn flat_prose_defaults_to_vector_only() {
        let text = "the quick brown fox jumps over the lazy dog. ".repeat(20);
        let d = decide(
            &cfg("auto"),
            &text,
            10,
            "animals.pdf",
            "application/pdf",
            None,
            None,
        );
        assert!(!d.use_graph);
        assert!(d.reason.contains("default"));
    }

    #[test]
    fn decision_is_deterministic() {
        let text = "Alice Johnson works for Acme Corp.";
        let a = decide(&cfg("auto"), text, 5, "t.pdf", "application/pdf", None, None);
        let b = decide(&cfg("auto"), text, 5, "t.pdf", "application/pdf", None, None);
        assert_eq!(a.use_graph, b.use_graph);
        assert_eq!(a.reason, b.reason);
    }
}
