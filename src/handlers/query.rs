use crate::auth::AuthenticatedUser;
use crate::domain::query_pipeline::{Citation, PipelineEvent};
use crate::state::AppState;
use crate::utils::error::{ApiError, BudgetSnapshot};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct QueryRequest {
    pub document_id: Uuid,
    pub question: String,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub usage: BudgetSnapshot,
}

/// `POST /query` — unary question/answer.
pub async fn run_query(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let outcome = state
        .query_pipeline
        .run_query(workspace.id, user.user_id, payload.document_id, &payload.question)
        .await?;

    Ok(Json(QueryResponse {
        answer: outcome.answer,
        citations: outcome.citations,
        usage: outcome.usage,
    }))
}

/// `POST /query/stream` — server-sent events carrying meta, answer deltas,
/// citations, usage and a terminal done/error event.
pub async fn run_query_stream(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let events = state
        .query_pipeline
        .clone()
        .run_query_stream(workspace.id, user.user_id, payload.document_id, payload.question);

    let sse_stream = events.map(|event| Ok(pipeline_event_to_sse(event)));

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

fn pipeline_event_to_sse(event: PipelineEvent) -> Event {
    match event {
        PipelineEvent::Meta { request_id, document_id, top_k } => Event::default().event("meta").json_data(serde_json::json!({
            "request_id": request_id,
            "document_id": document_id,
            "top_k": top_k,
        })).unwrap_or_else(|_| Event::default().event("error").data("failed to encode meta event")),
        PipelineEvent::Delta(text) => Event::default().event("delta").data(text),
        PipelineEvent::Citations(citations) => Event::default()
            .event("citations")
            .json_data(citations)
            .unwrap_or_else(|_| Event::default().event("error").data("failed to encode citations event")),
        PipelineEvent::Usage(usage) => Event::default()
            .event("usage")
            .json_data(usage)
            .unwrap_or_else(|_| Event::default().event("error").data("failed to encode usage event")),
        PipelineEvent::Done => Event::default().event("done").data("{}"),
        PipelineEvent::Error { code, message } => Event::default().event("error").json_data(serde_json::json!({
            "code": code,
            "message": message,
        })).unwrap_or_else(|_| Event::default().event("error").data(message)),
    }
}
