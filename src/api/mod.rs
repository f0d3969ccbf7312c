mod comments;
mod session;
mod tokens;

use std::sync::Arc;

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::auth::SecurityGateway;

pub use comments::CreateCommentRequest;

/// Create the API router. The gateway layer is applied by the caller, over
/// the full paths.
pub fn create_api_router(gateway: Arc<SecurityGateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(session::router(gateway.clone()))
        .nest("/tokens", tokens::router(gateway.clone()))
        .nest("/comments", comments::router(gateway))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
