use crate::auth::AuthenticatedUser;
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct MeResponse {
    user_id: uuid::Uuid,
    role: String,
}

/// `GET /auth/me` — identity echo; the JWT layer already did the work.
pub async fn me(user: AuthenticatedUser) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id,
        role: user.role,
    })
}
