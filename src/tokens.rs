//! Access/refresh token issuance and refresh rotation.
//!
//! Access tokens are short-lived and stateless apart from the session they
//! name. Refresh tokens are single use: each successful [`TokenService::refresh`]
//! consumes the presented token's `jti` and hands out a new pair.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::GatewayError;
use crate::jwt::{AccessClaims, JwtCodec, RefreshClaims, Role, TokenError, TokenType, now_secs};
use crate::session::SessionStore;

/// Access token lifetime: 5 minutes
pub const ACCESS_TOKEN_DURATION: Duration = Duration::from_secs(5 * 60);

/// Refresh token lifetime: 2 weeks
pub const REFRESH_TOKEN_DURATION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl: ACCESS_TOKEN_DURATION,
            refresh_ttl: REFRESH_TOKEN_DURATION,
        }
    }
}

/// Who a token speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub role: Role,
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

pub struct TokenService {
    codec: JwtCodec,
    config: TokenConfig,
    sessions: Arc<SessionStore>,
    /// Consumed refresh `jti`s, mapped to the token's own expiry
    consumed: DashMap<String, u64>,
}

impl TokenService {
    pub fn new(codec: JwtCodec, config: TokenConfig, sessions: Arc<SessionStore>) -> Self {
        Self {
            codec,
            config,
            sessions,
            consumed: DashMap::new(),
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn issue_access(&self, identity: &Identity, session_id: &str) -> Result<String, TokenError> {
        let now = now_secs()?;
        let claims = AccessClaims {
            sub: identity.user_id.clone(),
            email: identity.email.clone(),
            role: identity.role,
            sid: session_id.to_string(),
            token_type: TokenType::Access,
            iat: now,
            exp: now + self.config.access_ttl.as_secs(),
        };
        self.codec.encode(&claims)
    }

    pub fn issue_refresh(&self, identity: &Identity, session_id: &str) -> Result<String, TokenError> {
        let now = now_secs()?;
        let claims = RefreshClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: identity.user_id.clone(),
            email: identity.email.clone(),
            role: identity.role,
            sid: session_id.to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            exp: now + self.config.refresh_ttl.as_secs(),
        };
        self.codec.encode(&claims)
    }

    pub fn issue_pair(&self, identity: &Identity, session_id: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access(identity, session_id)?,
            refresh_token: self.issue_refresh(identity, session_id)?,
            expires_in: self.config.access_ttl.as_secs(),
        })
    }

    /// Verify an access token. Session liveness is checked separately by the
    /// gateway so that the fingerprint can be compared in the same step.
    pub fn validate_access(&self, token: &str) -> Result<AccessClaims, GatewayError> {
        self.codec
            .decode_typed(token, TokenType::Access)
            .map_err(|e| GatewayError::new(e.code()))
    }

    /// Verify a refresh token without consuming it.
    pub fn validate_refresh(&self, token: &str) -> Result<RefreshClaims, GatewayError> {
        let claims: RefreshClaims = self
            .codec
            .decode_typed(token, TokenType::Refresh)
            .map_err(|e| GatewayError::new(e.code()))?;
        if self.consumed.contains_key(&claims.jti) {
            return Err(GatewayError::new(crate::auth::ErrorCode::InvalidToken));
        }
        Ok(claims)
    }

    /// Mark a refresh `jti` used. Only the first caller for a given `jti` wins.
    fn consume(&self, claims: &RefreshClaims) -> bool {
        match self.consumed.entry(claims.jti.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(claims.exp);
                true
            }
        }
    }

    /// Rotate a refresh token into a new access/refresh pair.
    ///
    /// Returns `None` for invalid, expired, wrong-type or already-used tokens,
    /// and when the bound session is no longer active or has gone idle.
    pub async fn refresh(&self, refresh_token: &str) -> Option<TokenPair> {
        let claims: RefreshClaims = match self.codec.decode_typed(refresh_token, TokenType::Refresh) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Refresh token rejected");
                return None;
            }
        };

        let session = self.sessions.get_session(&claims.sid).await?;
        if !self.sessions.is_live(&session) || session.user_id != claims.sub {
            debug!(session_id = %claims.sid, "Refresh for inactive or idle session rejected");
            return None;
        }

        if !self.consume(&claims) {
            warn!(session_id = %claims.sid, user_id = %claims.sub, "Refresh token replay rejected");
            return None;
        }

        let identity = Identity {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        };
        match self.issue_pair(&identity, &claims.sid) {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!(error = %e, "Failed to issue rotated tokens");
                None
            }
        }
    }

    /// Make a refresh token unusable without issuing a replacement (logout).
    pub fn revoke_refresh(&self, refresh_token: &str) -> bool {
        match self
            .codec
            .decode_typed::<RefreshClaims>(refresh_token, TokenType::Refresh)
        {
            Ok(claims) => self.consume(&claims),
            Err(_) => false,
        }
    }

    /// Drop used-markers for tokens that have expired on their own.
    pub fn cleanup_expired(&self) -> usize {
        let Ok(now) = now_secs() else {
            return 0;
        };
        let before = self.consumed.len();
        self.consumed.retain(|_, exp| *exp >= now);
        before.saturating_sub(self.consumed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ErrorCode;
    use crate::session::{SessionConfig, SessionMetadata};

    const SECRET: &[u8] = b"test-secret-key-for-testing-0123456789";

    fn identity() -> Identity {
        Identity {
            user_id: "user-1".to_string(),
            email: "alice@example.com".to_string(),
            role: Role::User,
        }
    }

    async fn service_with_session() -> (TokenService, Arc<SessionStore>, String) {
        let sessions = Arc::new(SessionStore::in_memory(SessionConfig::default()));
        let session = sessions
            .create_session("user-1", "fp", SessionMetadata::default())
            .await
            .unwrap();
        let service = TokenService::new(
            JwtCodec::new(SECRET),
            TokenConfig::default(),
            sessions.clone(),
        );
        (service, sessions, session.id)
    }

    #[tokio::test]
    async fn test_issue_and_validate_access() {
        let (service, _, sid) = service_with_session().await;
        let token = service.issue_access(&identity(), &sid).unwrap();

        let claims = service.validate_access(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.sid, sid);
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_DURATION.as_secs());
    }

    #[tokio::test]
    async fn test_token_types_not_interchangeable() {
        let (service, _, sid) = service_with_session().await;
        let access = service.issue_access(&identity(), &sid).unwrap();
        let refresh = service.issue_refresh(&identity(), &sid).unwrap();

        let err = service.validate_access(&refresh).unwrap_err();
        assert_eq!(err.code, ErrorCode::WrongTokenType);
        let err = service.validate_refresh(&access).unwrap_err();
        assert_eq!(err.code, ErrorCode::WrongTokenType);
        assert!(service.refresh(&access).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_is_single_use() {
        let (service, _, sid) = service_with_session().await;
        let refresh = service.issue_refresh(&identity(), &sid).unwrap();

        let pair = service.refresh(&refresh).await.expect("first refresh");
        assert!(service.validate_access(&pair.access_token).is_ok());
        assert!(service.refresh(&refresh).await.is_none());

        // The rotated token works exactly once as well
        assert!(service.refresh(&pair.refresh_token).await.is_some());
        assert!(service.refresh(&pair.refresh_token).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_admits_one() {
        let (service, _, sid) = service_with_session().await;
        let service = Arc::new(service);
        let refresh = service.issue_refresh(&identity(), &sid).unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let service = service.clone();
            let refresh = refresh.clone();
            tasks.spawn(async move { service.refresh(&refresh).await.is_some() });
        }

        let mut successes = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_refresh_requires_active_session() {
        let (service, sessions, sid) = service_with_session().await;
        let refresh = service.issue_refresh(&identity(), &sid).unwrap();

        sessions.invalidate_session(&sid).await;
        assert!(service.refresh(&refresh).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejects_idle_session() {
        let sessions = Arc::new(SessionStore::in_memory(SessionConfig {
            idle_ttl: Duration::from_millis(20),
            ..SessionConfig::default()
        }));
        let session = sessions
            .create_session("user-1", "fp", SessionMetadata::default())
            .await
            .unwrap();
        let service = TokenService::new(JwtCodec::new(SECRET), TokenConfig::default(), sessions.clone());
        let refresh = service.issue_refresh(&identity(), &session.id).unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let err = sessions
            .validate_session(&session.id, "fp", None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionExpired);
        assert!(service.refresh(&refresh).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_refresh_fails_closed() {
        let sessions = Arc::new(SessionStore::in_memory(SessionConfig::default()));
        let session = sessions
            .create_session("user-1", "fp", SessionMetadata::default())
            .await
            .unwrap();
        let codec = JwtCodec::new(SECRET);
        let now = now_secs().unwrap();
        let expired = codec
            .encode(&RefreshClaims {
                jti: "jti-1".to_string(),
                sub: "user-1".to_string(),
                email: "alice@example.com".to_string(),
                role: Role::User,
                sid: session.id,
                token_type: TokenType::Refresh,
                iat: now - 100,
                exp: now - 10,
            })
            .unwrap();

        let service = TokenService::new(codec, TokenConfig::default(), sessions);
        assert!(service.refresh(&expired).await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_refresh() {
        let (service, _, sid) = service_with_session().await;
        let refresh = service.issue_refresh(&identity(), &sid).unwrap();

        assert!(service.revoke_refresh(&refresh));
        assert!(!service.revoke_refresh(&refresh));
        assert!(service.refresh(&refresh).await.is_none());
        assert_eq!(service.cleanup_expired(), 0);
    }

    #[tokio::test]
    async fn test_unique_jti_per_refresh_token() {
        let (service, _, sid) = service_with_session().await;
        let first = service
            .validate_refresh(&service.issue_refresh(&identity(), &sid).unwrap())
            .unwrap();
        let second = service
            .validate_refresh(&service.issue_refresh(&identity(), &sid).unwrap())
            .unwrap();
        assert_ne!(first.jti, second.jti);
    }
}
