use crate::auth::AuthenticatedUser;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CitationQuery {
    pub max_chars: Option<usize>,
}

#[derive(Serialize)]
pub struct CitationDetailResponse {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub page_number: i32,
    pub text: String,
}

/// `GET /citations/{chunk_id}` — chunk text joined with its containing page,
/// trimmed to `max_chars` (spec §4.5, `original_source/server/app/api/citations.py`).
pub async fn get_citation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(chunk_id): Path<Uuid>,
    Query(params): Query<CitationQuery>,
) -> Result<Json<CitationDetailResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let max_chars = params.max_chars.unwrap_or(5000);
    if !(1..=20000).contains(&max_chars) {
        return Err(ApiError::Validation("max_chars must be between 1 and 20000".to_string()));
    }

    let chunk = state
        .repository
        .get_chunk(workspace.id, chunk_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("citation not found".to_string()))?;

    let page = state
        .repository
        .get_page(workspace.id, chunk.document_id, chunk.page_start)
        .await?;

    let text = page.map(|p| p.content).unwrap_or(chunk.content);

    Ok(Json(CitationDetailResponse {
        chunk_id: chunk.id,
        document_id: chunk.document_id,
        page_number: chunk.page_start,
        text: trim_text(&text, max_chars),
    }))
}

fn trim_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
