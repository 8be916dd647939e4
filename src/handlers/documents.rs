use crate::auth::AuthenticatedUser;
use crate::database::models::Document;
use crate::database::repository::DocumentProgress;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: String,
    pub page_count: i32,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Document> for DocumentResponse {
    fn from(d: Document) -> Self {
        Self {
            id: d.id,
            filename: d.filename,
            content_type: d.content_type,
            size_bytes: d.size_bytes,
            status: d.status,
            page_count: d.page_count,
            error_message: d.error_message,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct ListDocumentsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct ListDocumentsResponse {
    pub documents: Vec<DocumentResponse>,
    pub total: i64,
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListDocumentsQuery>,
) -> Result<Json<ListDocumentsResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let limit = params.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::Validation("limit must be between 1 and 100".to_string()));
    }
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::Validation("offset must not be negative".to_string()));
    }

    let (documents, total) = state
        .repository
        .list_documents(workspace.id, params.status.as_deref(), limit, offset)
        .await?;

    Ok(Json(ListDocumentsResponse {
        documents: documents.into_iter().map(Into::into).collect(),
        total,
    }))
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    #[serde(flatten)]
    pub document: DocumentResponse,
    pub progress: DocumentProgress,
}

pub async fn get_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> Result<Json<DocumentDetailResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let document = state
        .repository
        .get_document(workspace.id, document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("document not found".to_string()))?;
    let progress = state.repository.document_progress(workspace.id, document_id).await?;

    Ok(Json(DocumentDetailResponse {
        document: document.into(),
        progress,
    }))
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub max_chars: Option<usize>,
}

#[derive(Serialize)]
pub struct PageResponse {
    pub page_number: i32,
    pub content: String,
}

pub async fn get_page(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((document_id, page_number)): Path<(Uuid, i32)>,
    Query(params): Query<PageQuery>,
) -> Result<Json<PageResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let max_chars = params.max_chars.unwrap_or(5000);
    if !(1..=20000).contains(&max_chars) {
        return Err(ApiError::Validation("max_chars must be between 1 and 20000".to_string()));
    }

    let page = state
        .repository
        .get_page(workspace.id, document_id, page_number)
        .await?
        .ok_or_else(|| ApiError::NotFound("page not found".to_string()))?;

    Ok(Json(PageResponse {
        page_number: page.page_number,
        content: trim_text(&page.content, max_chars),
    }))
}

fn trim_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[derive(Deserialize)]
pub struct UploadPrepareRequest {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub idempotency_key: Option<String>,
}

#[derive(Serialize)]
pub struct UploadPrepareResponse {
    pub document: DocumentResponse,
    pub upload_url: String,
}

pub async fn upload_prepare(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UploadPrepareRequest>,
) -> Result<(StatusCode, Json<UploadPrepareResponse>), ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let prepared = state
        .lifecycle
        .prepare_upload(
            workspace.id,
            &payload.filename,
            &payload.content_type,
            payload.size_bytes,
            payload.idempotency_key.as_deref(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadPrepareResponse {
            document: prepared.document.into(),
            upload_url: prepared.upload_url,
        }),
    ))
}

#[derive(Deserialize)]
pub struct UploadCompleteRequest {
    pub document_id: Uuid,
    pub bucket: String,
    pub storage_path: String,
}

pub async fn upload_complete(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UploadCompleteRequest>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let document = state
        .lifecycle
        .complete_upload(workspace.id, payload.document_id, &payload.bucket, &payload.storage_path)
        .await?;

    Ok(Json(document.into()))
}

pub async fn delete_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;
    state.lifecycle.delete(workspace.id, document_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn retry_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;
    state.lifecycle.retry(workspace.id, document_id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn reindex_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;
    state.lifecycle.reindex(workspace.id, document_id).await?;
    Ok(StatusCode::ACCEPTED)
}
