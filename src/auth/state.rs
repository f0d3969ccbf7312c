//! The assembled gateway: every security service, built once and shared.

use std::sync::Arc;

use tracing::info;

use super::context::SecurityContext;
use super::ip::ClientIpConfig;
use crate::csrf::{CsrfConfig, CsrfGuard};
use crate::escalation::{EscalationConfig, ViolationTracker};
use crate::jwt::{JwtCodec, TokenError};
use crate::rate_limit::{MemoryWindowStore, RateLimitConfig, RateLimiter, WindowStore};
use crate::sanitize::{ContentSanitizer, SanitizeOptions};
use crate::session::{
    MemorySessionBackend, Session, SessionBackend, SessionConfig, SessionMetadata, SessionStore,
    StoreError,
};
use crate::tokens::{Identity, TokenConfig, TokenPair, TokenService};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub session: SessionConfig,
    pub tokens: TokenConfig,
    pub rate_limit: RateLimitConfig,
    pub csrf: CsrfConfig,
    pub escalation: EscalationConfig,
    pub sanitize: SanitizeOptions,
    pub client_ip: ClientIpConfig,
    /// Paths served without a bearer token
    pub public_paths: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            tokens: TokenConfig::default(),
            rate_limit: RateLimitConfig::default(),
            csrf: CsrfConfig::default(),
            escalation: EscalationConfig::default(),
            sanitize: SanitizeOptions::basic(),
            client_ip: ClientIpConfig::default(),
            public_paths: vec!["/api/health".to_string(), "/api/tokens/refresh".to_string()],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EstablishError {
    #[error("session store: {0}")]
    Store(#[from] StoreError),
    #[error("token issuance: {0}")]
    Token(#[from] TokenError),
}

pub struct SecurityGateway {
    pub sessions: Arc<SessionStore>,
    pub tokens: TokenService,
    pub rate_limiter: RateLimiter,
    pub csrf: CsrfGuard,
    pub sanitizer: ContentSanitizer,
    pub violations: Arc<ViolationTracker>,
    pub client_ip: ClientIpConfig,
    public_paths: Vec<String>,
}

impl SecurityGateway {
    /// Gateway backed by in-process session and rate-window stores.
    pub fn new(secret: &[u8], config: GatewayConfig) -> Self {
        let windows = Arc::new(MemoryWindowStore::new(config.rate_limit.max_entries));
        Self::with_backends(
            secret,
            config,
            Arc::new(MemorySessionBackend::default()),
            windows,
        )
    }

    /// Gateway over caller-provided stores, e.g. ones shared between instances.
    pub fn with_backends(
        secret: &[u8],
        config: GatewayConfig,
        sessions: Arc<dyn SessionBackend>,
        windows: Arc<dyn WindowStore>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(sessions, config.session));
        let violations = Arc::new(ViolationTracker::new(&config.escalation));

        Self {
            tokens: TokenService::new(JwtCodec::new(secret), config.tokens, sessions.clone()),
            sessions,
            rate_limiter: RateLimiter::new(windows, config.rate_limit),
            csrf: CsrfGuard::new(config.csrf, violations.clone()),
            sanitizer: ContentSanitizer::new(config.sanitize),
            violations,
            client_ip: config.client_ip,
            public_paths: config.public_paths,
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| p == path)
    }

    /// Open a session for an authenticated identity and issue its first
    /// token pair. Called once credentials have been verified elsewhere.
    pub async fn establish_session(
        &self,
        identity: &Identity,
        ctx: &SecurityContext,
    ) -> Result<(Session, TokenPair), EstablishError> {
        let metadata = SessionMetadata {
            user_agent: Some(ctx.user_agent.clone()),
            last_ip: ctx.client_ip.map(|ip| ip.to_string()),
        };
        let session = self
            .sessions
            .create_session(&identity.user_id, &ctx.fingerprint, metadata)
            .await?;
        let pair = self.tokens.issue_pair(identity, &session.id)?;

        info!(
            request_id = %ctx.request_id,
            user_id = %identity.user_id,
            session_id = %session.id,
            "Session established"
        );
        Ok((session, pair))
    }
}
