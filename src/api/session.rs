//! Session-scoped endpoints.
//!
//! - GET `/csrf` - Issue a CSRF token bound to the caller's session
//! - GET `/sessions` - List the caller's sessions

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;

use crate::auth::{Auth, SecurityGateway};

pub fn router(gateway: Arc<SecurityGateway>) -> Router {
    Router::new()
        .route("/csrf", get(issue_csrf_token))
        .route("/sessions", get(list_sessions))
        .with_state(gateway)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CsrfResponse {
    csrf_token: String,
}

/// The token is returned twice: as an HttpOnly cookie and in the body, from
/// which the client copies it into the `X-CSRF-Token` header.
async fn issue_csrf_token(
    State(gateway): State<Arc<SecurityGateway>>,
    Auth(user): Auth,
) -> impl IntoResponse {
    let token = gateway.csrf.generate_token(&user.session.id);
    let cookie = gateway.csrf.token_cookie(&token);

    (
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(CsrfResponse { csrf_token: token }),
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    id: String,
    created_at: u64,
    last_seen_at: u64,
    is_active: bool,
    is_current: bool,
    user_agent: Option<String>,
    last_ip: Option<String>,
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

async fn list_sessions(
    State(gateway): State<Arc<SecurityGateway>>,
    Auth(user): Auth,
) -> impl IntoResponse {
    let sessions = gateway
        .sessions
        .list_for_user(user.user_id())
        .await
        .into_iter()
        .map(|s| SessionInfo {
            is_current: s.id == user.session.id,
            id: s.id,
            created_at: s.created_at,
            last_seen_at: s.last_seen_at,
            is_active: s.is_active,
            user_agent: s.metadata.user_agent,
            last_ip: s.metadata.last_ip,
        })
        .collect();

    Json(ListSessionsResponse { sessions })
}
