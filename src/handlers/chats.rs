use crate::auth::AuthenticatedUser;
use crate::database::models::{ChatMessage, ChatSession};
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
pub struct ChatSessionResponse {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ChatSession> for ChatSessionResponse {
    fn from(s: ChatSession) -> Self {
        Self {
            id: s.id,
            document_id: s.document_id,
            title: s.title,
            messages: s.messages,
            started_at: s.started_at,
            ended_at: s.ended_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateChatSessionRequest {
    pub document_id: Option<Uuid>,
    pub title: String,
}

pub async fn create_chat_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateChatSessionRequest>,
) -> Result<(StatusCode, Json<ChatSessionResponse>), ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let session = state
        .repository
        .create_chat_session(workspace.id, payload.document_id, &payload.title, &[])
        .await?;

    Ok((StatusCode::CREATED, Json(session.into())))
}

pub async fn get_chat_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ChatSessionResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let session = state
        .repository
        .get_chat_session(workspace.id, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("chat session not found".to_string()))?;

    Ok(Json(session.into()))
}

pub async fn list_chat_sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<ChatSessionResponse>>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let sessions = state.repository.list_chat_sessions(workspace.id).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize)]
pub struct UpdateChatSessionRequest {
    pub title: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub ended: bool,
}

pub async fn update_chat_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<UpdateChatSessionRequest>,
) -> Result<Json<ChatSessionResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let updated = state
        .repository
        .update_chat_session(
            workspace.id,
            session_id,
            payload.title.as_deref(),
            payload.messages.as_deref(),
            payload.ended,
        )
        .await?;
    if !updated {
        return Err(ApiError::NotFound("chat session not found".to_string()));
    }

    let session = state
        .repository
        .get_chat_session(workspace.id, session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("chat session not found".to_string()))?;

    Ok(Json(session.into()))
}
