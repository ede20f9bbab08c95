//! # FindersKeepers
//!
//! **A local-first personal knowledge hub for AI-assisted development.**
//!
//! FindersKeepers ingests documents (single files, URLs, or raw bytes) and
//! AI agent session webhooks, normalizes and chunks them, embeds them, and
//! exposes hybrid retrieval (keyword + semantic + graph) via a CLI and an
//! HTTP API. The broader CLI (bulk connector sync, source management) is
//! out of scope; automated/bulk intake goes through the HTTP ingestion API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ File/URL/    │──▶│ Orchestrator  │──▶│  RV / VI / GR │
//! │ raw-bytes    │   │ detect→chunk  │   │  (SQLite)     │
//! │ Webhooks     │   │ →embed→store  │   └──────┬───────┘
//! └──────────────┘   └───────────────┘          │
//!                               ┌────────────────┤
//!                               ▼                ▼
//!                         ┌──────────┐     ┌──────────┐
//!                         │   CLI    │     │   HTTP   │
//!                         │  (fk)    │     │  server  │
//!                         └──────────┘     └──────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **ingest API** and **webhooks** produce [`models::SourceItem`]s.
//! 2. The **ingestion orchestrator** ([`orchestrator`]) detects format
//!    ([`detect`]), extracts text ([`extract`]), normalizes into
//!    [`models::Document`]s, and persists them through [`store::RvStore`].
//! 3. Documents are split into [`models::Chunk`]s by the
//!    heading/paragraph/sentence/code-aware chunker ([`chunk`]).
//! 4. Chunks are indexed for keyword search (FTS5, inside RV) and embedded
//!    via the **embedding provider** ([`embedding`]) into [`store::ViStore`].
//! 5. Shared-tag and session relationships are recorded in [`store::GrStore`].
//! 6. The **query engine** ([`search`]) fuses keyword, vector, and graph
//!    candidates with reciprocal rank fusion.
//! 7. Results and ingestion status are exposed via the **CLI** (`fk`) and
//!    the **HTTP server** ([`server`]), including the session-logging
//!    webhooks ([`webhook`]).
//!
//! ## Quick Start
//!
//! ```bash
//! fk init                           # create database
//! fk ingest-file ./notes.md         # ingest a single file
//! fk embed pending                  # generate embeddings
//! fk query "deployment" --mode hybrid
//! fk serve                          # start HTTP server
//! ```
//!
//! ## Intake Paths
//!
//! | Path | Source | Module |
//! |------|--------|--------|
//! | File | Single local file, via CLI or `/api/ingest/file` | [`orchestrator`] |
//! | URL | Arbitrary HTTP(S) resources | [`extract::fetch_url`] |
//! | Webhook | AI agent session/action events | [`webhook`] |
//!
//! ## Search Modes
//!
//! | Mode | Engine | Requires Embeddings |
//! |------|--------|---------------------|
//! | `keyword` | SQLite FTS5 (BM25) | No |
//! | `semantic` | Cosine similarity over vectors | Yes |
//! | `hybrid` | Reciprocal rank fusion (k=60) | Yes |
//! | `graph-augmented` | Hybrid + one-hop `RELATES_TO` expansion | Yes |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `SourceItem`, `Document`, `Chunk`, session/graph entities |
//! | [`error`] | Typed pipeline error taxonomy (`FkError`) |
//! | [`detect`] | Format detection: magic bytes, extension, text heuristics |
//! | [`extract`] | Text extraction: PDF/DOCX/PPTX/XLSX/zip/HTML/URL fetch |
//! | [`chunk`] | Heading/paragraph/sentence/code-aware chunker with deterministic IDs |
//! | [`embedding`] | Embedding provider trait, OpenAI/local HTTP implementations, vector utilities |
//! | [`embed_cmd`] | Embedding CLI commands: `pending` and `rebuild` |
//! | [`store`] | RV/VI/GR storage adapters over the shared SQLite database |
//! | [`job_queue`] | Priority ingestion job queue and worker pool |
//! | [`orchestrator`] | Ingestion pipeline: detect → extract → chunk → embed → store |
//! | [`session_log`] | Session/action/conversation-message/code-snippet persistence |
//! | [`webhook`] | HTTP webhook intake for AI agent session and action events |
//! | [`search`] | Keyword, semantic, hybrid, and graph-augmented search with RRF |
//! | [`get`] | Document retrieval by UUID |
//! | [`stats`] | Database statistics and health overview (`fk stats`) |
//! | [`server`] | HTTP server (Axum) exposing ingestion, query, and webhook routes |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! FindersKeepers is configured via a TOML file (default: `config/fk.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod chunk;
pub mod config;
pub mod db;
pub mod detect;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod export;
pub mod extract;
pub mod get;
pub mod job_queue;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod search;
pub mod server;
pub mod session_log;
pub mod stats;
pub mod store;
pub mod webhook;
