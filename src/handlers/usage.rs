use crate::auth::AuthenticatedUser;
use crate::database::repository::{DailyQueryVolume, LatencyStats, RecentError, TopDocument};
use crate::state::AppState;
use crate::utils::error::{ApiError, BudgetSnapshot};
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

/// `GET /usage/today` — current day's token budget snapshot.
pub async fn today(State(state): State<AppState>, user: AuthenticatedUser) -> Result<Json<BudgetSnapshot>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;
    let snapshot = state.budget.status(workspace.id).await?;
    Ok(Json(snapshot))
}

const OBSERVABILITY_WINDOW_DAYS: i32 = 7;
const TOP_DOCUMENTS_LIMIT: i64 = 5;
const RECENT_ERRORS_LIMIT: i64 = 10;

#[derive(Serialize)]
pub struct ObservabilityResponse {
    pub daily_query_volume: Vec<DailyQueryVolume>,
    pub latency_last_24h: LatencyStats,
    pub documents_by_status: HashMap<String, i64>,
    pub top_documents: Vec<TopDocument>,
    pub recent_errors: Vec<RecentError>,
}

/// `GET /usage/observability` — rolled-up operational view of a workspace
/// (`original_source/server/app/api/usage.py`).
pub async fn observability(State(state): State<AppState>, user: AuthenticatedUser) -> Result<Json<ObservabilityResponse>, ApiError> {
    let workspace = state.authorization.resolve_for_owner(user.user_id).await?;

    let daily_query_volume = state.repository.daily_query_volume(workspace.id, OBSERVABILITY_WINDOW_DAYS).await?;
    let latency_last_24h = state.repository.latency_stats_last_24h(workspace.id).await?;
    let documents_by_status = state.repository.documents_by_status(workspace.id).await?.into_iter().collect();
    let top_documents = state.repository.top_documents_by_query_count(workspace.id, TOP_DOCUMENTS_LIMIT).await?;
    let recent_errors = state.repository.recent_errors(workspace.id, RECENT_ERRORS_LIMIT).await?;

    Ok(Json(ObservabilityResponse {
        daily_query_volume,
        latency_last_24h,
        documents_by_status,
        top_documents,
        recent_errors,
    }))
}
