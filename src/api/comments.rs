//! Comment submission, the sample state-changing route.
//!
//! Storage and business rules live elsewhere; this endpoint shows the
//! cleaned comment exactly as it would be handed on.

use std::sync::Arc;

use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::post};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{Auth, CleanJson, SecurityContext, SecurityGateway};
use crate::sanitize::{ContentSanitizer, InputKind, Sanitize, Severity};
use crate::session::now_millis;

pub fn router(gateway: Arc<SecurityGateway>) -> Router {
    Router::new()
        .route("/", post(create_comment))
        .with_state(gateway)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub body: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub website: Option<String>,
}

impl Sanitize for CreateCommentRequest {
    fn sanitize(self, sanitizer: &ContentSanitizer) -> Result<Self, &'static str> {
        let report = sanitizer.validate(&self.body);
        if report.highest_severity() >= Some(Severity::High) {
            warn!(
                violations = report.violations.len(),
                rule = report.violations[0].rule,
                "Hostile markup in comment body"
            );
        }

        let body = sanitizer.clean(&self.body);
        if body.trim().is_empty() {
            return Err("body");
        }

        let author_name = self
            .author_name
            .and_then(|name| sanitizer.sanitize_input(&name, InputKind::Text))
            .filter(|name| !name.is_empty());
        let author_email = match self.author_email {
            Some(email) => Some(
                sanitizer
                    .sanitize_input(&email, InputKind::Email)
                    .ok_or("authorEmail")?,
            ),
            None => None,
        };
        let website = match self.website {
            Some(url) => Some(
                sanitizer
                    .sanitize_input(&url, InputKind::Url)
                    .ok_or("website")?,
            ),
            None => None,
        };

        Ok(Self {
            body,
            author_name,
            author_email,
            website,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentResponse {
    id: String,
    author_id: String,
    body: String,
    author_name: Option<String>,
    author_email: Option<String>,
    website: Option<String>,
    created_at: u64,
}

async fn create_comment(
    ctx: SecurityContext,
    Auth(user): Auth,
    CleanJson(comment): CleanJson<CreateCommentRequest>,
) -> impl IntoResponse {
    let id = uuid::Uuid::new_v4().to_string();
    info!(
        request_id = %ctx.request_id,
        comment_id = %id,
        user_id = %user.user_id(),
        "Comment accepted"
    );

    (
        StatusCode::CREATED,
        Json(CommentResponse {
            id,
            author_id: user.claims.sub,
            body: comment.body,
            author_name: comment.author_name,
            author_email: comment.author_email,
            website: comment.website,
            created_at: now_millis(),
        }),
    )
}
