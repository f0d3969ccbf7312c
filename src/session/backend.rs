//! Session storage backends.
//!
//! The store behind [`SessionStore`](super::SessionStore) is an external
//! collaborator reached through [`SessionBackend`]. Every method that mutates a
//! record is a single atomic step on the backend side.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Client details recorded with a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub user_agent: Option<String>,
    pub last_ip: Option<String>,
}

/// A server-side session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Set at creation, never mutated
    pub fingerprint: String,
    /// Unix milliseconds
    pub created_at: u64,
    /// Unix milliseconds
    pub last_seen_at: u64,
    /// Flips to false once, and stays false
    pub is_active: bool,
    pub metadata: SessionMetadata,
}

/// Input for the atomic fingerprint check.
#[derive(Debug, Clone, Copy)]
pub struct VerifyRequest<'a> {
    pub fingerprint: &'a str,
    pub ip: Option<&'a str>,
    pub now: u64,
    /// Sessions last seen before this instant are idle
    pub idle_cutoff: u64,
}

/// Result of the atomic fingerprint check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid(Session),
    NotFound,
    Inactive,
    Idle,
    /// Fingerprint mismatch; the session has been deactivated.
    Hijacked,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session store timed out")]
    Timeout,
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Insert a session. Active sessions of the same user beyond
    /// `max_per_user` are removed least-recently-seen first; their ids are
    /// returned.
    async fn insert(&self, session: Session, max_per_user: usize)
    -> Result<Vec<String>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Compare the fingerprint and, on mismatch, deactivate in the same step.
    /// On success `last_seen_at` and `metadata.last_ip` are refreshed.
    async fn verify(&self, id: &str, request: VerifyRequest<'_>)
    -> Result<VerifyOutcome, StoreError>;

    /// Returns false if the session was unknown or already inactive.
    async fn deactivate(&self, id: &str) -> Result<bool, StoreError>;

    async fn deactivate_user(&self, user_id: &str) -> Result<usize, StoreError>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>, StoreError>;

    /// Remove inactive sessions and sessions last seen before `idle_cutoff`.
    async fn purge(&self, idle_cutoff: u64) -> Result<usize, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, Session>,
    by_user: HashMap<String, HashSet<String>>,
}

impl MemoryInner {
    fn remove(&mut self, id: &str) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        if let Some(ids) = self.by_user.get_mut(&session.user_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_user.remove(&session.user_id);
            }
        }
        Some(session)
    }
}

/// In-process backend for single-instance deployments.
#[derive(Default)]
pub struct MemorySessionBackend {
    inner: Mutex<MemoryInner>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("session map poisoned".into()))
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn insert(
        &self,
        session: Session,
        max_per_user: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.lock()?;
        let max_per_user = max_per_user.max(1);

        let mut active: Vec<(u64, String)> = inner
            .by_user
            .get(&session.user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.sessions.get(id))
            .filter(|s| s.is_active)
            .map(|s| (s.last_seen_at, s.id.clone()))
            .collect();
        active.sort();

        let excess = (active.len() + 1).saturating_sub(max_per_user);
        let evicted: Vec<String> = active.into_iter().take(excess).map(|(_, id)| id).collect();
        for id in &evicted {
            inner.remove(id);
        }

        inner
            .by_user
            .entry(session.user_id.clone())
            .or_default()
            .insert(session.id.clone());
        inner.sessions.insert(session.id.clone(), session);

        Ok(evicted)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.lock()?.sessions.get(id).cloned())
    }

    async fn verify(
        &self,
        id: &str,
        request: VerifyRequest<'_>,
    ) -> Result<VerifyOutcome, StoreError> {
        let mut inner = self.lock()?;
        let Some(session) = inner.sessions.get_mut(id) else {
            return Ok(VerifyOutcome::NotFound);
        };

        if !session.is_active {
            return Ok(VerifyOutcome::Inactive);
        }

        let matches: bool = session
            .fingerprint
            .as_bytes()
            .ct_eq(request.fingerprint.as_bytes())
            .into();
        if !matches {
            session.is_active = false;
            return Ok(VerifyOutcome::Hijacked);
        }

        if session.last_seen_at < request.idle_cutoff {
            return Ok(VerifyOutcome::Idle);
        }

        session.last_seen_at = request.now.max(session.last_seen_at);
        if let Some(ip) = request.ip {
            session.metadata.last_ip = Some(ip.to_string());
        }
        Ok(VerifyOutcome::Valid(session.clone()))
    }

    async fn deactivate(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.sessions.get_mut(id) {
            Some(session) if session.is_active => {
                session.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let ids: Vec<String> = inner
            .by_user
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let mut count = 0;
        for id in ids {
            if let Some(session) = inner.sessions.get_mut(&id) {
                if session.is_active {
                    session.is_active = false;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        let inner = self.lock()?;
        let mut sessions: Vec<Session> = inner
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect();
        sessions.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(sessions)
    }

    async fn purge(&self, idle_cutoff: u64) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let stale: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| !s.is_active || s.last_seen_at < idle_cutoff)
            .map(|s| s.id.clone())
            .collect();
        for id in &stale {
            inner.remove(id);
        }
        Ok(stale.len())
    }
}
