//! Core data models used throughout docflow.
//!
//! These types represent the documents, chunks, and outcomes that flow
//! through the ingestion and reconciliation pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A logical document as seen by the pipeline, before chunking.
///
/// `source_id` is the stable opaque identifier joining a document's
/// metadata row, its chunks, and its graph episodes.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub source_id: String,
    pub title: String,
    pub url: Option<String>,
    pub media_type: String,
    pub folder_path: Option<String>,
}

/// Output of the chunker: ordered content pieces, tables kept whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub content: String,
    pub is_table: bool,
}

/// A chunk as persisted to the primary store. Immutable once written;
/// reprocessing deletes and reinserts the full set for a `source_id`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub is_table: bool,
    pub embedding: Option<Vec<f32>>,
}

/// Column schema attached to tabular document metadata.
///
/// Flat files carry a single column list; workbooks carry one list per
/// sheet. Serialized into the metadata row as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schema {
    Columns(Vec<String>),
    PerSheet(BTreeMap<String, Vec<String>>),
}

/// Result of the graph-use heuristic.
#[derive(Debug, Clone)]
pub struct Decision {
    pub use_graph: bool,
    pub reason: String,
}

/// Result of ingesting one document.
///
/// `success` reflects the primary store only: a document can complete with
/// `graph_warning` set, which is a normal outcome, not an error. Graph
/// presence implies nothing about completion state.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub source_id: String,
    pub success: bool,
    pub chunks_written: usize,
    pub rows_written: usize,
    pub used_graph: bool,
    pub graph_episodes: usize,
    pub graph_warning: Option<String>,
    pub error: Option<String>,
}

/// One crawled web page, already converted to markdown.
#[derive(Debug, Clone)]
pub struct CrawlPage {
    pub url: String,
    pub title: String,
    pub markdown: String,
    pub links: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_serializes_columns_as_array() {
        let s = Schema::Columns(vec!["a".to_string(), "b".to_string()]);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }

    #[test]
    fn schema_serializes_sheets_as_map() {
        let mut sheets = BTreeMap::new();
        sheets.insert("Sheet1".to_string(), vec!["x".to_string()]);
        let s = Schema::PerSheet(sheets);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#"{"Sheet1":["x"]}"#);
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
