//! # docflow
//!
//! A document ingestion pipeline: files and crawled web pages are split
//! into bounded, semantically coherent chunks, embedded, and persisted to
//! SQLite alongside an optional knowledge-graph representation. The two
//! stores fail independently, so the pipeline enforces a strict write
//! order and repairs drift with reconciliation scans instead of assuming
//! clean shutdowns.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────┐   ┌──────────────┐
//! │ watch / web  │──▶│ chunker → embedding   │──▶│    SQLite    │
//! │  connectors  │   │   (ingest pipeline)   │   │ chunks+rows  │
//! └──────────────┘   └──────────┬────────────┘   └──────┬───────┘
//!                               │ best-effort           │
//!                               ▼                       │
//!                        ┌─────────────┐    reconcile   │
//!                        │ graph store │◀───────────────┘
//!                        └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docflow init                    # create database
//! docflow ingest ./docs/notes.md  # ingest one file
//! docflow watch                   # watch a directory
//! docflow web add https://docs.example.com --depth 2
//! docflow web run                 # crawl due web sources
//! docflow reconcile               # repair crash drift
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Structure-aware text chunking |
//! | [`advisor`] | Optional LLM breakpoint advisor |
//! | [`selector`] | Graph-use heuristic |
//! | [`extract`] | Text extraction (PDF, Office, CSV, text) |
//! | [`tabular`] | Tabular schema and row extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`graph`] | Knowledge-graph backend |
//! | [`ingest`] | Per-document ingestion pipeline |
//! | [`reconcile`] | Startup and graph reconciliation |
//! | [`crawler`] | Web page crawler |
//! | [`web`] | Web source processing loop |
//! | [`watch`] | Filesystem watch loop |
//! | [`store`] | Primary-store operations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod advisor;
pub mod chunker;
pub mod config;
pub mod crawler;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod graph;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod reconcile;
pub mod selector;
pub mod store;
pub mod tabular;
pub mod watch;
pub mod web;
