//! Double-submit CSRF protection with Origin/Referer verification.
//!
//! Unsafe requests must carry the same token in the `X-CSRF-Token` header and
//! the `csrf-token` cookie, come from a trusted origin, and (when the token was
//! issued by this guard) belong to the caller's session. All checks run on
//! every request and the first failure in a fixed order is reported, so each
//! rejection path does the same amount of work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use subtle::ConstantTimeEq;
use tracing::warn;
use url::Url;

use crate::auth::{ErrorCode, GatewayError, get_cookie};
use crate::escalation::ViolationTracker;

/// Header carrying the submitted token.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Cookie carrying the reference token.
pub const CSRF_COOKIE_NAME: &str = "csrf-token";

const MAX_TOKEN_LENGTH: usize = 256;
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// Trusted origins, e.g. `https://example.com`
    pub allowed_origins: Vec<String>,
    /// Paths that never require a token
    pub exempt_paths: Vec<String>,
    /// Lifetime of an issued token and its cookie
    pub token_ttl: Duration,
    pub secure_cookie: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:7291".to_string()],
            exempt_paths: vec!["/api/health".to_string(), "/api/tokens/refresh".to_string()],
            token_ttl: Duration::from_secs(60 * 60),
            secure_cookie: true,
        }
    }
}

/// The CSRF-relevant parts of a request.
#[derive(Debug, Clone, Copy)]
pub struct CsrfRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub header_token: Option<&'a str>,
    pub cookie_token: Option<&'a str>,
    pub origin: Option<&'a str>,
    pub referer: Option<&'a str>,
    /// Session of the caller, when a valid access token was presented
    pub session_id: Option<&'a str>,
    pub client_ip: &'a str,
}

impl<'a> CsrfRequest<'a> {
    pub fn from_headers(
        method: &'a Method,
        path: &'a str,
        headers: &'a HeaderMap,
        session_id: Option<&'a str>,
        client_ip: &'a str,
    ) -> Self {
        Self {
            method,
            path,
            header_token: header_str(headers, CSRF_HEADER),
            cookie_token: get_cookie(headers, CSRF_COOKIE_NAME),
            origin: header_str(headers, header::ORIGIN.as_str()),
            referer: header_str(headers, header::REFERER.as_str()),
            session_id,
            client_ip,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Debug, Clone)]
struct TrustedOrigin {
    serialized: String,
    host: String,
}

#[derive(Debug, Clone)]
struct Binding {
    session_id: String,
    issued_at: Instant,
}

pub struct CsrfGuard {
    config: CsrfConfig,
    origins: Vec<TrustedOrigin>,
    bindings: DashMap<String, Binding>,
    violations: Arc<ViolationTracker>,
}

/// `scheme://host[:port]` for a URL-ish string, or None if it does not parse.
fn origin_of(value: &str) -> Option<(String, String)> {
    let url = Url::parse(value).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some((origin.ascii_serialization(), host))
}

fn well_formed(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LENGTH
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'='))
}

impl CsrfGuard {
    pub fn new(config: CsrfConfig, violations: Arc<ViolationTracker>) -> Self {
        let origins = config
            .allowed_origins
            .iter()
            .filter_map(|o| match origin_of(o) {
                Some((serialized, host)) => Some(TrustedOrigin { serialized, host }),
                None => {
                    warn!(origin = %o, "Ignoring unparseable trusted origin");
                    None
                }
            })
            .collect();

        Self {
            config,
            origins,
            bindings: DashMap::new(),
            violations,
        }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// Safe methods and allow-listed paths are exempt.
    pub fn requires_protection(&self, method: &Method, path: &str) -> bool {
        if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
            return false;
        }
        !self.config.exempt_paths.iter().any(|p| p == path)
    }

    /// Issue a fresh token bound to `session_id`.
    pub fn generate_token(&self, session_id: &str) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        self.bindings.insert(
            token.clone(),
            Binding {
                session_id: session_id.to_string(),
                issued_at: Instant::now(),
            },
        );
        token
    }

    /// `Set-Cookie` value for a token.
    pub fn token_cookie(&self, token: &str) -> String {
        let secure = if self.config.secure_cookie {
            "; Secure"
        } else {
            ""
        };
        format!(
            "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
            CSRF_COOKIE_NAME,
            token,
            self.config.token_ttl.as_secs(),
            secure
        )
    }

    fn classify_origin(&self, value: &str) -> Result<String, ErrorCode> {
        let Some((serialized, host)) = origin_of(value) else {
            return Err(ErrorCode::CsrfTokenMismatch);
        };
        if self.origins.iter().any(|o| o.serialized == serialized) {
            return Ok(serialized);
        }
        let is_subdomain = self
            .origins
            .iter()
            .any(|o| host.ends_with(&format!(".{}", o.host)));
        if is_subdomain {
            Err(ErrorCode::UntrustedSubdomain)
        } else {
            Err(ErrorCode::CsrfTokenMismatch)
        }
    }

    fn check(&self, request: &CsrfRequest<'_>) -> Result<(), ErrorCode> {
        let header = request.header_token.filter(|t| !t.is_empty());
        let cookie = request.cookie_token.filter(|t| !t.is_empty());

        let present = header.is_some() && cookie.is_some();
        let header = header.unwrap_or_default();
        let cookie = cookie.unwrap_or_default();
        let formed = well_formed(header) && well_formed(cookie);
        let equal: bool = header.as_bytes().ct_eq(cookie.as_bytes()).into();

        let origin = request.origin.map(|o| self.classify_origin(o));
        let referer = request.referer.map(|r| self.classify_origin(r));
        let consistent = match (&origin, &referer) {
            (Some(Ok(o)), Some(Ok(r))) => o == r,
            (Some(Ok(_)), Some(Err(_))) => false,
            _ => true,
        };

        let binding = self.bindings.get(header).map(|b| b.value().clone());
        let expired = binding
            .as_ref()
            .is_some_and(|b| b.issued_at.elapsed() >= self.config.token_ttl);
        let foreign = match (&binding, request.session_id) {
            (Some(b), Some(sid)) => b.session_id != sid,
            _ => false,
        };

        if !present {
            return Err(ErrorCode::CsrfTokenMissing);
        }
        if !formed {
            return Err(ErrorCode::CsrfTokenInvalid);
        }
        if !equal {
            return Err(ErrorCode::CsrfTokenMismatch);
        }
        match (origin, referer) {
            (Some(Err(code)), _) => return Err(code),
            // Without an Origin header the Referer must be trusted on its own
            (None, Some(Err(code))) => return Err(code),
            _ => {}
        }
        if !consistent {
            return Err(ErrorCode::OriginRefererMismatch);
        }
        if expired {
            return Err(ErrorCode::CsrfTokenInvalid);
        }
        if foreign {
            return Err(ErrorCode::CsrfTokenReuseDetected);
        }
        Ok(())
    }

    /// Validate an unsafe request. Failures count toward a temporary block of
    /// the client; blocked clients are rejected before any token checks.
    pub fn validate(&self, request: &CsrfRequest<'_>) -> Result<(), GatewayError> {
        if let Some(remaining) = self.violations.blocked(request.client_ip) {
            return Err(GatewayError::rate_limited(remaining));
        }

        self.check(request).map_err(|code| {
            warn!(
                client_ip = request.client_ip,
                path = request.path,
                method = %request.method,
                code = %code,
                "CSRF validation failed"
            );
            self.violations.record_violation(request.client_ip, "csrf");
            GatewayError::new(code)
        })
    }

    /// Forget bindings older than the token TTL.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.bindings.len();
        let ttl = self.config.token_ttl;
        self.bindings.retain(|_, b| b.issued_at.elapsed() < ttl);
        before.saturating_sub(self.bindings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::EscalationConfig;

    const ORIGIN: &str = "https://example.com";

    fn guard() -> CsrfGuard {
        CsrfGuard::new(
            CsrfConfig {
                allowed_origins: vec![ORIGIN.to_string(), "https://app.example.com".to_string()],
                ..CsrfConfig::default()
            },
            Arc::new(ViolationTracker::new(&EscalationConfig::default())),
        )
    }

    fn request<'a>(header: Option<&'a str>, cookie: Option<&'a str>) -> CsrfRequest<'a> {
        CsrfRequest {
            method: &Method::POST,
            path: "/api/comments",
            header_token: header,
            cookie_token: cookie,
            origin: Some(ORIGIN),
            referer: None,
            session_id: None,
            client_ip: "10.0.0.1",
        }
    }

    fn code(guard: &CsrfGuard, request: CsrfRequest<'_>) -> Option<ErrorCode> {
        guard.validate(&request).err().map(|e| e.code)
    }

    #[test]
    fn test_requires_protection() {
        let guard = guard();
        assert!(!guard.requires_protection(&Method::GET, "/api/comments"));
        assert!(!guard.requires_protection(&Method::HEAD, "/api/comments"));
        assert!(!guard.requires_protection(&Method::OPTIONS, "/api/comments"));
        assert!(guard.requires_protection(&Method::POST, "/api/comments"));
        assert!(guard.requires_protection(&Method::DELETE, "/api/comments/1"));
        assert!(!guard.requires_protection(&Method::POST, "/api/tokens/refresh"));
    }

    #[test]
    fn test_double_submit() {
        let guard = guard();
        assert_eq!(code(&guard, request(Some("abc"), Some("abc"))), None);
        assert_eq!(
            code(&guard, request(Some("abc"), Some("xyz"))),
            Some(ErrorCode::CsrfTokenMismatch)
        );
        assert_eq!(
            code(&guard, request(None, Some("abc"))),
            Some(ErrorCode::CsrfTokenMissing)
        );
        assert_eq!(
            code(&guard, request(Some("abc"), None)),
            Some(ErrorCode::CsrfTokenMissing)
        );
        assert_eq!(
            code(&guard, request(Some(""), Some(""))),
            Some(ErrorCode::CsrfTokenMissing)
        );
    }

    #[test]
    fn test_malformed_token() {
        let guard = guard();
        let long = "a".repeat(MAX_TOKEN_LENGTH + 1);
        assert_eq!(
            code(&guard, request(Some(&long), Some(&long))),
            Some(ErrorCode::CsrfTokenInvalid)
        );
        assert_eq!(
            code(&guard, request(Some("a b<"), Some("a b<"))),
            Some(ErrorCode::CsrfTokenInvalid)
        );
    }

    #[test]
    fn test_origin_checks() {
        let guard = guard();
        let mut req = request(Some("abc"), Some("abc"));

        req.origin = Some("https://evil.com");
        assert_eq!(code(&guard, req), Some(ErrorCode::CsrfTokenMismatch));

        req.origin = Some("https://evil.example.com");
        assert_eq!(code(&guard, req), Some(ErrorCode::UntrustedSubdomain));

        req.origin = Some("https://app.example.com");
        assert_eq!(code(&guard, req), None);

        req.origin = Some(ORIGIN);
        req.referer = Some("https://app.example.com/posts/1");
        assert_eq!(code(&guard, req), Some(ErrorCode::OriginRefererMismatch));

        req.referer = Some("https://example.com/posts/1");
        assert_eq!(code(&guard, req), None);

        req.origin = None;
        req.referer = Some("https://evil.com/attack");
        assert_eq!(code(&guard, req), Some(ErrorCode::CsrfTokenMismatch));
    }

    #[test]
    fn test_presence_checked_before_origin() {
        let guard = guard();
        let mut req = request(None, None);
        req.origin = Some("https://evil.com");
        assert_eq!(code(&guard, req), Some(ErrorCode::CsrfTokenMissing));
    }

    #[test]
    fn test_session_binding() {
        let guard = guard();
        let token = guard.generate_token("session-a");
        assert_ne!(token, guard.generate_token("session-a"));

        let mut req = request(Some(&token), Some(&token));
        req.session_id = Some("session-a");
        assert_eq!(code(&guard, req), None);

        req.session_id = Some("session-b");
        assert_eq!(code(&guard, req), Some(ErrorCode::CsrfTokenReuseDetected));
    }

    #[test]
    fn test_expired_binding() {
        let guard = CsrfGuard::new(
            CsrfConfig {
                allowed_origins: vec![ORIGIN.to_string()],
                token_ttl: Duration::from_millis(10),
                ..CsrfConfig::default()
            },
            Arc::new(ViolationTracker::new(&EscalationConfig::default())),
        );
        let token = guard.generate_token("s");
        std::thread::sleep(Duration::from_millis(20));

        let mut req = request(Some(&token), Some(&token));
        req.session_id = Some("s");
        assert_eq!(code(&guard, req), Some(ErrorCode::CsrfTokenInvalid));
        assert_eq!(guard.cleanup_expired(), 1);
    }

    #[test]
    fn test_repeated_failures_block_client() {
        let guard = guard();
        for _ in 0..6 {
            guard.validate(&request(None, None)).unwrap_err();
        }

        // Even a correct request is now rejected until the block lapses
        let err = guard
            .validate(&request(Some("abc"), Some("abc")))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimitExceeded);
        assert!(err.retry_after.unwrap() > Duration::from_secs(60));
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = guard().token_cookie("tok");
        assert!(cookie.starts_with("csrf-token=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Max-Age=3600"));
    }
}
