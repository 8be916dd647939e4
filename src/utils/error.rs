use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

/// Snapshot carried on a budget-exceeded response, matching `domain::budget::BudgetStatus`.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    pub used: i64,
    pub reserved: i64,
    pub limit: i64,
    pub remaining: i64,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("daily token limit reached for this workspace")]
    BudgetExceeded(BudgetSnapshot),

    #[error("reservation amount exceeds outstanding reservation")]
    InvalidReservation,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("rate limit backend unavailable")]
    UpstreamUnavailable(String),

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(format!("database error: {err}"))
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::BudgetExceeded(_) => "BUDGET_EXCEEDED",
            ApiError::InvalidReservation => "INVALID_RESERVATION",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            ApiError::Upstream(_) => "UPSTREAM",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BudgetExceeded(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::InvalidReservation => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::BudgetExceeded(snapshot) => Some(json!({
                "used": snapshot.used,
                "reserved": snapshot.reserved,
                "limit": snapshot.limit,
                "remaining": snapshot.remaining,
                "resets_at": snapshot.resets_at,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, code = self.code(), "request failed");
        } else {
            warn!(error = %self, code = self.code(), "request rejected");
        }

        let message = if let ApiError::BudgetExceeded(_) = self {
            "Daily token limit reached for this workspace".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}
