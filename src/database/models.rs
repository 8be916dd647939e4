use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Workspace {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub bucket: String,
    pub storage_path: String,
    pub status: String,
    pub page_count: i32,
    pub error_message: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn is_ready(&self) -> bool {
        matches!(self.status.as_str(), "ready" | "indexed")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentPage {
    pub workspace_id: Uuid,
    pub document_id: Uuid,
    pub page_number: i32,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chunk {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub document_id: Uuid,
    pub page_start: i32,
    pub page_end: i32,
    pub chunk_index: i32,
    pub content: String,
    pub content_hash: String,
    pub token_count: i32,
}

/// One row returned by the vector retriever: a chunk joined with its page text
/// and cosine distance to the query vector (spec §4.2).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RetrievedChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub page_number: i32,
    pub chunk_index: i32,
    pub score: f64,
    pub chunk_text: String,
    pub page_text: String,
    pub token_count: i32,
}

impl RetrievedChunk {
    /// Whitespace-collapsed, 300-char-truncated excerpt (`original_source/server/app/core/retrieval.py`).
    pub fn snippet(&self) -> String {
        let collapsed = self.chunk_text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.chars().take(300).collect()
    }
}

/// Per-workspace-per-day budget row (spec §3, §4.1).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkspaceDailyUsage {
    pub workspace_id: Uuid,
    pub date_utc: NaiveDate,
    pub tokens_used: i64,
    pub tokens_reserved: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryLog {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub query_text: String,
    pub documents_searched: Vec<Uuid>,
    pub retrieved_chunk_ids: Vec<Uuid>,
    pub chunk_scores: Vec<f64>,
    pub answer_text: Option<String>,
    pub error_message: Option<String>,
    pub retrieval_latency_ms: i32,
    pub llm_latency_ms: Option<i32>,
    pub total_latency_ms: i32,
    pub embedding_tokens_used: i32,
    pub llm_input_tokens: Option<i32>,
    pub llm_output_tokens: Option<i32>,
    pub total_tokens_used: i32,
    pub created_at: DateTime<Utc>,
}

/// Sentinel stored in `query_logs.error_message` for rows that are really a
/// chat session, kept for workspaces whose schema predates `chat_sessions`
/// (spec §9, `original_source/server/app/api/chats.py`).
pub const QUERY_LOG_CHAT_MARKER: &str = "__CHAT_SESSION__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub document_id: Option<Uuid>,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
