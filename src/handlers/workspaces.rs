use crate::auth::AuthenticatedUser;
use crate::database::models::Workspace;
use crate::state::AppState;
use crate::utils::error::{ApiError, BudgetSnapshot};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct WorkspaceResponse {
    pub id: uuid::Uuid,
    pub name: String,
    pub owner_id: uuid::Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Workspace> for WorkspaceResponse {
    fn from(w: Workspace) -> Self {
        Self {
            id: w.id,
            name: w.name,
            owner_id: w.owner_id,
            created_at: w.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct WorkspaceMeResponse {
    #[serde(flatten)]
    pub workspace: WorkspaceResponse,
    pub document_count: i64,
    pub documents_by_status: HashMap<String, i64>,
    pub usage_today: BudgetSnapshot,
}

/// `POST /workspaces` — 409 if the caller already has one.
pub async fn create_workspace(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<WorkspaceResponse>), ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("workspace name must not be empty".to_string()));
    }

    if state.repository.get_workspace_by_owner(user.user_id).await?.is_some() {
        return Err(ApiError::Conflict("this account already has a workspace".to_string()));
    }

    let workspace = state.repository.create_workspace(user.user_id, name).await?;
    Ok((StatusCode::CREATED, Json(workspace.into())))
}

/// `GET /workspaces/me` — combined profile/status-breakdown/usage read.
pub async fn get_my_workspace(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<WorkspaceMeResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let document_count = state.repository.count_documents(workspace.id).await?;
    let documents_by_status = state
        .repository
        .documents_by_status(workspace.id)
        .await?
        .into_iter()
        .collect();
    let usage_today = state.budget.status(workspace.id).await?;

    Ok(Json(WorkspaceMeResponse {
        workspace: workspace.into(),
        document_count,
        documents_by_status,
        usage_today,
    }))
}
