//! Core data types shared across ingestion, storage, and retrieval.
//!
//! Mirrors the document/chunk/search-result shapes of the original
//! ingestion pipeline, extended with the session log and graph entities
//! needed for the full knowledge-hub data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw item produced by an intake path before normalization, identical
/// across all of them (single file, URL fetch, webhook-materialized
/// session export).
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content_type: String,
    pub body: String,
    pub metadata_json: String,
    pub raw_json: Option<String>,
    /// Set instead of `body` for binary formats (PDF/DOCX/PPTX/XLSX/archives);
    /// extraction happens downstream in the orchestrator, not the intake path.
    pub raw_bytes: Option<Vec<u8>>,
}

/// `doc_type` classification (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocType {
    File,
    Url,
    Conversation,
    CodeSnippet,
    SessionExport,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::File => "file",
            DocType::Url => "url",
            DocType::Conversation => "conversation",
            DocType::CodeSnippet => "code-snippet",
            DocType::SessionExport => "session-export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(DocType::File),
            "url" => Some(DocType::Url),
            "conversation" => Some(DocType::Conversation),
            "code-snippet" => Some(DocType::CodeSnippet),
            "session-export" => Some(DocType::SessionExport),
            _ => None,
        }
    }
}

/// Which of RV/VI/GR have durably absorbed a Document (spec §4.4 atomicity contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Ok,
    RvOnly,
    GraphPending,
    Failed,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Ok => "ok",
            IndexState::RvOnly => "rv_only",
            IndexState::GraphPending => "graph_pending",
            IndexState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ok" => IndexState::Ok,
            "rv_only" => IndexState::RvOnly,
            "graph_pending" => IndexState::GraphPending,
            _ => IndexState::Failed,
        }
    }
}

/// Normalized document persisted in RV (spec §3: Document).
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub project: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub doc_type: DocType,
    pub mime: String,
    pub size_bytes: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub content_hash: String,
    pub metadata_json: String,
    pub body: String,
    pub index_state: IndexState,
    pub parent_document_id: Option<Uuid>,
}

/// A chunk of a document's normalized text (spec §3: Chunk).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub ordinal: i64,
    pub text: String,
    pub token_estimate: i64,
    pub offset_start: i64,
    pub offset_end: i64,
    pub hash: String,
}

/// Entity graph node (spec §3: Entity / §4.6 GrStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Project,
    Document,
    Session,
    File,
    Tag,
    Concept,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Project => "Project",
            EntityKind::Document => "Document",
            EntityKind::Session => "Session",
            EntityKind::File => "File",
            EntityKind::Tag => "Tag",
            EntityKind::Concept => "Concept",
        }
    }
}

/// Session status (spec §3: Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
    Crashed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Crashed => "crashed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub agent_type: String,
    pub user_id: String,
    pub project: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: SessionStatus,
    pub context_json: String,
}

#[derive(Debug, Clone)]
pub struct Action {
    pub action_id: String,
    pub session_id: String,
    pub action_type: String,
    pub description: String,
    pub details_json: String,
    pub files_affected_json: String,
    pub success: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::System => "system",
            MessageType::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => MessageType::Assistant,
            "system" => MessageType::System,
            "tool" => MessageType::Tool,
            _ => MessageType::User,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub message_id: String,
    pub session_id: String,
    pub message_type: MessageType,
    pub content: String,
    pub context_json: String,
    pub reasoning: Option<String>,
    pub tools_used_json: String,
    pub files_referenced_json: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CodeSnippet {
    pub id: String,
    pub message_id: String,
    pub session_id: String,
    pub language: String,
    pub code: String,
    pub extracted_at: i64,
}

/// A search result returned from the query engine, with provenance (spec §4.9).
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub title: Option<String>,
    pub source: String,
    pub source_id: String,
    pub doc_type: String,
    pub updated_at: String,
    pub score: f64,
    pub snippet: String,
    pub source_url: Option<String>,
    pub provenance: Vec<ProvenanceEntry>,
}

/// One contributing retrieval path for a search result (spec §4.9 step 6).
#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceEntry {
    pub path: String, // "vector" | "keyword" | "graph"
    pub rank: usize,
    pub chunk_id: String,
    pub offset_start: i64,
    pub offset_end: i64,
}
