//! Gateway error taxonomy.
//!
//! Every rejection the gateway produces is a [`GatewayError`]: a closed
//! [`ErrorCode`] plus the optional retry hint for throttling. Each code maps to
//! a fixed HTTP status, so callers branch on the code and never on messages.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Closed set of error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidToken,
    WrongTokenType,
    TokenExpired,
    SessionHijackDetected,
    SessionNotFound,
    SessionExpired,
    CsrfTokenMissing,
    CsrfTokenInvalid,
    CsrfTokenMismatch,
    CsrfTokenReuseDetected,
    OriginRefererMismatch,
    UntrustedSubdomain,
    RateLimitExceeded,
    ContentValidationFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidToken => "INVALID_TOKEN",
            Self::WrongTokenType => "WRONG_TOKEN_TYPE",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::SessionHijackDetected => "SESSION_HIJACK_DETECTED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::CsrfTokenMissing => "CSRF_TOKEN_MISSING",
            Self::CsrfTokenInvalid => "CSRF_TOKEN_INVALID",
            Self::CsrfTokenMismatch => "CSRF_TOKEN_MISMATCH",
            Self::CsrfTokenReuseDetected => "CSRF_TOKEN_REUSE_DETECTED",
            Self::OriginRefererMismatch => "ORIGIN_REFERER_MISMATCH",
            Self::UntrustedSubdomain => "UNTRUSTED_SUBDOMAIN",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ContentValidationFailed => "CONTENT_VALIDATION_FAILED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidToken
            | Self::WrongTokenType
            | Self::TokenExpired
            | Self::SessionHijackDetected
            | Self::SessionNotFound
            | Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::CsrfTokenMissing
            | Self::CsrfTokenInvalid
            | Self::CsrfTokenMismatch
            | Self::CsrfTokenReuseDetected
            | Self::OriginRefererMismatch
            | Self::UntrustedSubdomain => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::ContentValidationFailed => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::InvalidToken => "Invalid or missing token",
            Self::WrongTokenType => "Wrong token type",
            Self::TokenExpired => "Token has expired",
            Self::SessionHijackDetected => "Session terminated",
            Self::SessionNotFound => "Session not found",
            Self::SessionExpired => "Session has expired",
            Self::CsrfTokenMissing => "CSRF token missing",
            Self::CsrfTokenInvalid => "CSRF token invalid",
            Self::CsrfTokenMismatch => "CSRF token mismatch",
            Self::CsrfTokenReuseDetected => "CSRF token not valid for this session",
            Self::OriginRefererMismatch => "Origin and Referer do not match",
            Self::UntrustedSubdomain => "Untrusted origin",
            Self::RateLimitExceeded => "Too many requests. Please try again later.",
            Self::ContentValidationFailed => "Content validation failed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured rejection produced by any gateway component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub code: ErrorCode,
    /// Only set for `RATE_LIMIT_EXCEEDED`.
    pub retry_after: Option<Duration>,
}

impl GatewayError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self {
            code: ErrorCode::RateLimitExceeded,
            retry_after: Some(retry_after),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    /// Retry hint in whole seconds, rounded up so clients never retry early.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs();
            if d.subsec_nanos() > 0 { secs + 1 } else { secs }
        })
    }
}

impl From<ErrorCode> for GatewayError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)
    }
}

impl std::error::Error for GatewayError {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: &'static str,
    code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs();
        let mut response = (
            self.status_code(),
            Json(ErrorResponse {
                error: self.code.message(),
                code: self.code,
                retry_after,
            }),
        )
            .into_response();

        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ErrorCode::SessionHijackDetected.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::UntrustedSubdomain.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ErrorCode::RateLimitExceeded.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::ContentValidationFailed.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_code_serializes_like_wire_name() {
        let json = serde_json::to_string(&ErrorCode::CsrfTokenReuseDetected).unwrap();
        assert_eq!(json, "\"CSRF_TOKEN_REUSE_DETECTED\"");
        assert_eq!(
            ErrorCode::CsrfTokenReuseDetected.as_str(),
            "CSRF_TOKEN_REUSE_DETECTED"
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let err = GatewayError::rate_limited(Duration::from_millis(1500));
        assert_eq!(err.retry_after_secs(), Some(2));
        let err = GatewayError::rate_limited(Duration::from_secs(3));
        assert_eq!(err.retry_after_secs(), Some(3));
        assert_eq!(GatewayError::new(ErrorCode::InvalidToken).retry_after_secs(), None);
    }

    #[test]
    fn test_rate_limited_response_has_header() {
        let response = GatewayError::rate_limited(Duration::from_secs(42)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
