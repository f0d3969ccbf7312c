//! The gateway layer run in front of every API route.
//!
//! Order of checks, each short-circuiting:
//! 1. client block and per-IP throttling
//! 2. CSRF for state-changing methods
//! 3. bearer access token
//! 4. per-user throttling
//! 5. session liveness and fingerprint

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::context::{REQUEST_ID_HEADER, SecurityContext};
use super::errors::{ErrorCode, GatewayError};
use super::state::SecurityGateway;
use super::types::AuthenticatedUser;
use crate::csrf::CsrfRequest;
use crate::rate_limit::{Dimension, RateRule};

/// Scope of the catch-all per-IP rule.
const GLOBAL_SCOPE: &str = "api";

pub async fn security_gateway(
    State(gateway): State<Arc<SecurityGateway>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = SecurityContext::from_request(&request, &gateway.client_ip);
    let request_id = HeaderValue::from_str(&ctx.request_id).ok();

    let verdict = screen(&gateway, &ctx, request.headers()).await;
    let mut response = match verdict {
        Ok(user) => {
            if let Some(user) = user {
                request.extensions_mut().insert(user);
            }
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(err) => {
            log_rejection(&ctx, &err);
            err.into_response()
        }
    };

    if let Some(request_id) = request_id {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    }
    response
}

fn log_rejection(ctx: &SecurityContext, err: &GatewayError) {
    let client_ip = ctx.client_key();
    match err.code {
        ErrorCode::InvalidToken | ErrorCode::TokenExpired | ErrorCode::SessionExpired => debug!(
            request_id = %ctx.request_id,
            client_ip = %client_ip,
            path = %ctx.path,
            code = %err.code,
            "Request rejected"
        ),
        _ => warn!(
            request_id = %ctx.request_id,
            client_ip = %client_ip,
            method = %ctx.method,
            path = %ctx.path,
            code = %err.code,
            "Request rejected"
        ),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

/// Count one request against `rule` for each identifier; a rejection is
/// also recorded as a violation of the client.
fn throttle(
    gateway: &SecurityGateway,
    client: &str,
    scope: &str,
    identifiers: &[(Dimension, &str)],
    rule: RateRule,
) -> Result<(), GatewayError> {
    gateway
        .rate_limiter
        .check_dimensions(scope, identifiers, rule)
        .inspect_err(|_| {
            gateway.violations.record_violation(client, "rate_limit");
        })
}

/// Run every check for one request. `Ok(None)` lets a public route through
/// without a caller identity.
async fn screen(
    gateway: &SecurityGateway,
    ctx: &SecurityContext,
    headers: &HeaderMap,
) -> Result<Option<AuthenticatedUser>, GatewayError> {
    let client = ctx.client_key();

    if let Some(remaining) = gateway.violations.blocked(&client) {
        return Err(GatewayError::rate_limited(remaining));
    }

    let limits = gateway.rate_limiter.config();
    if let Some(rule) = limits.global {
        throttle(gateway, &client, GLOBAL_SCOPE, &[(Dimension::Ip, &client)], rule)?;
    }
    let route = gateway
        .rate_limiter
        .route_rule(&ctx.method, &ctx.path)
        .cloned();
    if let Some(route) = &route {
        if route.dimensions.contains(&Dimension::Ip) {
            throttle(gateway, &client, &route.scope, &[(Dimension::Ip, &client)], route.rule)?;
        }
    }

    // Decoding is pure; its verdict is reported only after CSRF so that a
    // forged request is always answered as such.
    let claims = bearer_token(headers).map(|token| gateway.tokens.validate_access(token));

    if gateway.csrf.requires_protection(&ctx.method, &ctx.path) {
        let session_id = match &claims {
            Some(Ok(claims)) => Some(claims.sid.as_str()),
            _ => None,
        };
        let request =
            CsrfRequest::from_headers(&ctx.method, &ctx.path, headers, session_id, &client);
        gateway.csrf.validate(&request)?;
    }

    if gateway.is_public(&ctx.path) {
        return Ok(None);
    }

    let claims = claims.unwrap_or_else(|| Err(GatewayError::new(ErrorCode::InvalidToken)))?;

    if let Some(route) = &route {
        if route.dimensions.contains(&Dimension::User) {
            throttle(
                gateway,
                &client,
                &route.scope,
                &[(Dimension::User, &claims.sub)],
                route.rule,
            )?;
        }
    }

    let ip = ctx.client_ip.map(|ip| ip.to_string());
    let session = gateway
        .sessions
        .validate_session(&claims.sid, &ctx.fingerprint, ip.as_deref())
        .await?;
    if session.user_id != claims.sub {
        warn!(
            request_id = %ctx.request_id,
            session_id = %claims.sid,
            "Token subject does not own its session"
        );
        return Err(GatewayError::new(ErrorCode::SessionNotFound));
    }

    Ok(Some(AuthenticatedUser { claims, session }))
}
