//! Axum extractors over the gateway's verdicts.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRef, FromRequest, FromRequestParts, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::context::SecurityContext;
use super::errors::{ErrorCode, GatewayError};
use super::state::SecurityGateway;
use super::types::AuthenticatedUser;
use crate::sanitize::Sanitize;

/// Extractor for endpoints that require an authenticated caller.
/// The gateway layer has already verified token and session; this only
/// picks up its result.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(Auth)
            .ok_or_else(|| GatewayError::new(ErrorCode::InvalidToken))
    }
}

/// The request's security context. Built on the spot for routes that are
/// not behind the gateway layer.
impl<S> FromRequestParts<S> for SecurityContext
where
    S: Send + Sync,
    Arc<SecurityGateway>: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<SecurityContext>() {
            return Ok(ctx.clone());
        }
        let gateway = Arc::<SecurityGateway>::from_ref(state);
        Ok(SecurityContext::from_parts(parts, &gateway.client_ip))
    }
}

/// JSON body whose user-authored fields have been through the
/// [`ContentSanitizer`](crate::sanitize::ContentSanitizer).
/// Bodies that do not parse, or whose content cannot be made acceptable,
/// are rejected with `CONTENT_VALIDATION_FAILED`.
pub struct CleanJson<T>(pub T);

impl<S, T> FromRequest<S> for CleanJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Sanitize,
    Arc<SecurityGateway>: FromRef<S>,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state).await.map_err(|rejection| {
            debug!(error = %rejection, "Request body rejected");
            GatewayError::new(ErrorCode::ContentValidationFailed)
        })?;

        let gateway = Arc::<SecurityGateway>::from_ref(state);
        body.sanitize(&gateway.sanitizer)
            .map(CleanJson)
            .map_err(|field| {
                debug!(field, "Content rejected by sanitizer");
                GatewayError::new(ErrorCode::ContentValidationFailed)
            })
    }
}
