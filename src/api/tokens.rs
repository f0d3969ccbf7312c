//! Token management API endpoints.
//!
//! - POST `/refresh` - Exchange a refresh token for a new pair (single use)
//! - POST `/logout` - End the caller's session, optionally burning a refresh token
//! - POST `/logout-all` - End every session of the caller

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header::SET_COOKIE},
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{Auth, ErrorCode, GatewayError, SecurityGateway, expired_cookie};
use crate::csrf::CSRF_COOKIE_NAME;

pub fn router(gateway: Arc<SecurityGateway>) -> Router {
    Router::new()
        .route("/refresh", post(refresh_token))
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .with_state(gateway)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

/// Rotate a refresh token. Any failure (bad signature, expiry, reuse, dead
/// session) is reported as `INVALID_TOKEN`.
async fn refresh_token(
    State(gateway): State<Arc<SecurityGateway>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, GatewayError> {
    let Json(payload) = payload.map_err(|_| GatewayError::new(ErrorCode::InvalidToken))?;

    let pair = gateway
        .tokens
        .refresh(&payload.refresh_token)
        .await
        .ok_or(GatewayError::new(ErrorCode::InvalidToken))?;
    Ok(Json(pair))
}

/// Ends the session. A refresh token in the body is burned as well, so a
/// copy held elsewhere cannot outlive the logout.
async fn logout(
    State(gateway): State<Arc<SecurityGateway>>,
    Auth(user): Auth,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> impl IntoResponse {
    gateway.sessions.invalidate_session(&user.session.id).await;
    if let Ok(Json(payload)) = payload {
        gateway.tokens.revoke_refresh(&payload.refresh_token);
    }
    info!(user_id = %user.user_id(), session_id = %user.session.id, "Logged out");

    let secure = gateway.csrf.config().secure_cookie;
    (
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, expired_cookie(CSRF_COOKIE_NAME, secure))],
    )
}

#[derive(Serialize)]
struct LogoutAllResponse {
    revoked: usize,
}

async fn logout_all(
    State(gateway): State<Arc<SecurityGateway>>,
    Auth(user): Auth,
) -> impl IntoResponse {
    let revoked = gateway
        .sessions
        .invalidate_all_for_user(user.user_id())
        .await;
    info!(user_id = %user.user_id(), revoked, "Logged out everywhere");

    let secure = gateway.csrf.config().secure_cookie;
    (
        StatusCode::OK,
        [(SET_COOKIE, expired_cookie(CSRF_COOKIE_NAME, secure))],
        Json(LogoutAllResponse { revoked }),
    )
}
