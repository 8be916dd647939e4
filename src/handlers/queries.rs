use crate::auth::AuthenticatedUser;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct ListQueriesParams {
    pub document_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct QueryLogSummary {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub query_text: String,
    pub answer_text: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub citation_count: usize,
}

#[derive(Serialize)]
pub struct ListQueriesResponse {
    pub queries: Vec<QueryLogSummary>,
    pub total: i64,
}

/// `GET /queries` — history listing, excluding chat-session rows.
pub async fn list_queries(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListQueriesParams>,
) -> Result<Json<ListQueriesResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let limit = params.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::Validation("limit must be between 1 and 100".to_string()));
    }
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::Validation("offset must not be negative".to_string()));
    }

    let (rows, total) = state
        .repository
        .list_query_logs(workspace.id, params.document_id, limit, offset)
        .await?;

    let queries = rows
        .into_iter()
        .map(|row| QueryLogSummary {
            id: row.get("id"),
            document_id: row.get("document_id"),
            query_text: row.get("query_text"),
            answer_text: row.get("answer_text"),
            created_at: row.get("created_at"),
            citation_count: row.get::<Vec<Uuid>, _>("retrieved_chunk_ids").len(),
        })
        .collect();

    Ok(Json(ListQueriesResponse { queries, total }))
}

#[derive(Serialize)]
pub struct QueryCitationSummary {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub page_number: i32,
    pub score: f64,
}

#[derive(Serialize)]
pub struct QueryLogDetailResponse {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub query_text: String,
    pub answer_text: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub retrieval_latency_ms: i32,
    pub llm_latency_ms: Option<i32>,
    pub total_latency_ms: i32,
    pub total_tokens_used: i32,
    pub citations: Vec<QueryCitationSummary>,
}

/// `GET /queries/{id}` — detail view, citations rebuilt from the stored
/// `retrieved_chunk_ids`/`chunk_scores` arrays joined against `chunks`
/// (`original_source/server/app/api/queries.py::_build_citations`).
pub async fn get_query(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(query_id): Path<Uuid>,
) -> Result<Json<QueryLogDetailResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let row = state
        .repository
        .get_query_log(workspace.id, query_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("query not found".to_string()))?;

    let retrieved_chunk_ids: Vec<Uuid> = row.get("retrieved_chunk_ids");
    let chunk_scores: Vec<f64> = row.get("chunk_scores");

    let chunks = state.repository.get_chunks_by_ids(workspace.id, &retrieved_chunk_ids).await?;
    let citations = retrieved_chunk_ids
        .iter()
        .zip(chunk_scores.iter())
        .filter_map(|(chunk_id, score)| {
            chunks.iter().find(|c| &c.id == chunk_id).map(|c| QueryCitationSummary {
                chunk_id: *chunk_id,
                document_id: c.document_id,
                page_number: c.page_start,
                score: *score,
            })
        })
        .collect();

    Ok(Json(QueryLogDetailResponse {
        id: row.get("id"),
        document_id: row.get("document_id"),
        query_text: row.get("query_text"),
        answer_text: row.get("answer_text"),
        created_at: row.get("created_at"),
        retrieval_latency_ms: row.get("retrieval_latency_ms"),
        llm_latency_ms: row.get("llm_latency_ms"),
        total_latency_ms: row.get("total_latency_ms"),
        total_tokens_used: row.get("total_tokens_used"),
        citations,
    }))
}
