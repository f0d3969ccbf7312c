//! Server-side sessions bound to a client fingerprint.
//!
//! [`SessionStore`] is the only writer of session state. It talks to an
//! injected [`SessionBackend`] and wraps every call in a timeout; a backend
//! that fails or stalls is treated as "not authenticated".

mod backend;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::auth::{ErrorCode, GatewayError};

pub use backend::{
    MemorySessionBackend, Session, SessionBackend, SessionMetadata, StoreError, VerifyOutcome,
    VerifyRequest,
};

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Concurrent sessions allowed per user before the oldest is evicted
    pub max_per_user: usize,
    /// Sessions not seen for this long are expired
    pub idle_ttl: Duration,
    /// Upper bound for a single backend call
    pub backend_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_per_user: 5,
            idle_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            backend_timeout: Duration::from_secs(2),
        }
    }
}

pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>, config: SessionConfig) -> Self {
        Self { backend, config }
    }

    /// Store backed by process memory.
    pub fn in_memory(config: SessionConfig) -> Self {
        Self::new(Arc::new(MemorySessionBackend::new()), config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.backend_timeout, fut).await {
            Ok(result) => result.inspect_err(|e| error!(op, error = %e, "Session store call failed")),
            Err(_) => {
                error!(op, timeout_ms = self.config.backend_timeout.as_millis() as u64, "Session store call timed out");
                Err(StoreError::Timeout)
            }
        }
    }

    fn idle_cutoff(&self, now: u64) -> u64 {
        now.saturating_sub(self.config.idle_ttl.as_millis() as u64)
    }

    /// Whether a session would still pass validation on liveness alone:
    /// active and seen within the idle TTL.
    pub fn is_live(&self, session: &Session) -> bool {
        session.is_active && session.last_seen_at >= self.idle_cutoff(now_millis())
    }

    /// Create a session for a freshly authenticated user. If the user is at
    /// the session cap, their least-recently-active session makes room.
    pub async fn create_session(
        &self,
        user_id: &str,
        fingerprint: &str,
        metadata: SessionMetadata,
    ) -> Result<Session, StoreError> {
        let now = now_millis();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            fingerprint: fingerprint.to_string(),
            created_at: now,
            last_seen_at: now,
            is_active: true,
            metadata,
        };

        let evicted = self
            .call(
                "insert",
                self.backend
                    .insert(session.clone(), self.config.max_per_user),
            )
            .await?;
        if !evicted.is_empty() {
            info!(user_id, evicted = evicted.len(), "Evicted sessions over per-user cap");
        }

        Ok(session)
    }

    /// Look up a session. Store failures read as absent.
    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.call("get", self.backend.get(id)).await.ok().flatten()
    }

    /// Confirm a session is live and presented by the client it was created for.
    ///
    /// A fingerprint mismatch deactivates the session before the error is
    /// returned; it will never validate again.
    pub async fn validate_session(
        &self,
        id: &str,
        fingerprint: &str,
        ip: Option<&str>,
    ) -> Result<Session, GatewayError> {
        let now = now_millis();
        let request = VerifyRequest {
            fingerprint,
            ip,
            now,
            idle_cutoff: self.idle_cutoff(now),
        };

        let outcome = self
            .call("verify", self.backend.verify(id, request))
            .await
            .map_err(|_| GatewayError::new(ErrorCode::SessionNotFound))?;

        match outcome {
            VerifyOutcome::Valid(session) => Ok(session),
            VerifyOutcome::NotFound => Err(ErrorCode::SessionNotFound.into()),
            VerifyOutcome::Inactive | VerifyOutcome::Idle => Err(ErrorCode::SessionExpired.into()),
            VerifyOutcome::Hijacked => {
                warn!(session_id = id, client_ip = ip.unwrap_or("-"), "Session fingerprint mismatch, session invalidated");
                Err(ErrorCode::SessionHijackDetected.into())
            }
        }
    }

    pub async fn invalidate_session(&self, id: &str) -> bool {
        self.call("deactivate", self.backend.deactivate(id))
            .await
            .unwrap_or(false)
    }

    pub async fn invalidate_all_for_user(&self, user_id: &str) -> usize {
        self.call("deactivate_user", self.backend.deactivate_user(user_id))
            .await
            .unwrap_or(0)
    }

    pub async fn list_for_user(&self, user_id: &str) -> Vec<Session> {
        self.call("list_for_user", self.backend.list_for_user(user_id))
            .await
            .unwrap_or_default()
    }

    /// Remove inactive and idle sessions. Safe to run alongside live traffic.
    pub async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let cutoff = self.idle_cutoff(now_millis());
        self.call("purge", self.backend.purge(cutoff)).await
    }
}
