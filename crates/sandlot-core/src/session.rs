//! Shared bookkeeping for providers and sessions.
//!
//! Concrete backends embed a [`ProviderState`] and one [`SessionState`] per
//! session, and only implement the backend-specific work themselves.
//!
//! The session registry is the only structure touched by more than one
//! session at a time. Sessions hold a weak [`RegistryHandle`] back to it so
//! they can unregister on close without keeping the provider alive.

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::provider::SessionHandle;
use crate::types::SandboxStatus;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock, Weak};
use std::time::Instant;
use tokio::sync::RwLock;

type SessionMap = HashMap<String, SessionHandle>;

// ============================================================================
// Session registry
// ============================================================================

/// Concurrent map of session id to session, owned by a provider.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<SessionMap>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weak handle for sessions to unregister themselves.
    pub fn handle(&self) -> RegistryHandle {
        RegistryHandle(Arc::downgrade(&self.sessions))
    }

    pub async fn insert(&self, session: SessionHandle) {
        let id = session.id();
        self.sessions.write().await.insert(id, session);
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Status of a tracked session, `Unknown` for untracked ids.
    pub async fn status(&self, session_id: &str) -> SandboxStatus {
        match self.get(session_id).await {
            Some(session) => session.status(),
            None => SandboxStatus::Unknown,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Close every tracked session concurrently.
    ///
    /// Sessions are snapshotted first so closes that unregister themselves
    /// never contend with the iteration.
    pub async fn close_all(&self) {
        let sessions: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        if sessions.is_empty() {
            return;
        }
        tracing::debug!(count = sessions.len(), "Closing tracked sessions");
        futures::future::join_all(sessions.iter().map(|s| s.close())).await;
    }
}

/// Non-owning reference from a session back to its provider's registry.
#[derive(Clone, Default)]
pub struct RegistryHandle(Weak<RwLock<SessionMap>>);

impl RegistryHandle {
    /// A handle attached to no registry; every operation is a no-op.
    pub fn detached() -> Self {
        Self::default()
    }

    pub async fn remove(&self, session_id: &str) {
        if let Some(sessions) = self.0.upgrade() {
            sessions.write().await.remove(session_id);
        }
    }

    /// Move an entry to a new key, for sessions that change id.
    pub async fn rekey(&self, old_id: &str, new_id: &str) {
        if let Some(sessions) = self.0.upgrade() {
            let mut sessions = sessions.write().await;
            if let Some(session) = sessions.remove(old_id) {
                sessions.insert(new_id.to_string(), session);
            }
        }
    }
}

// ============================================================================
// Provider state
// ============================================================================

/// Name, session registry and closed flag shared by every provider.
pub struct ProviderState {
    name: String,
    sessions: SessionRegistry,
    closed: AtomicBool,
}

impl ProviderState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sessions: SessionRegistry::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail with [`SandboxError::ProviderClosed`] once cleanup has run.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SandboxError::ProviderClosed {
                provider: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Start tracking a freshly created session.
    ///
    /// A session finished after cleanup began is closed here and the call
    /// fails with [`SandboxError::ProviderClosed`]. The closed check and the
    /// insert share the registry write lock with cleanup, so a session is
    /// either seen by cleanup or refused.
    pub async fn track(&self, session: SessionHandle) -> Result<()> {
        let id = session.id();
        let admitted = {
            let mut sessions = self.sessions.sessions.write().await;
            if self.is_closed() {
                false
            } else {
                sessions.insert(id.clone(), session.clone());
                true
            }
        };
        if !admitted {
            tracing::warn!(provider = %self.name, session_id = %id, "Provider closed during creation, closing session");
            session.close().await;
            return Err(SandboxError::ProviderClosed {
                provider: self.name.clone(),
            });
        }
        tracing::debug!(provider = %self.name, session_id = %id, "Tracking session");
        Ok(())
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.ids().await
    }

    pub async fn session_status(&self, session_id: &str) -> SandboxStatus {
        self.sessions.status(session_id).await
    }

    /// Refuse new sessions, then close every tracked one.
    ///
    /// The closed flag is set under the registry write lock, so [`track`]
    /// either lands before it (and is closed here) or sees it and refuses.
    ///
    /// [`track`]: ProviderState::track
    pub async fn cleanup(&self) {
        let first = {
            let _sessions = self.sessions.sessions.write().await;
            !self.closed.swap(true, Ordering::AcqRel)
        };
        let count = self.sessions.len().await;
        if first {
            tracing::info!(provider = %self.name, sessions = count, "Cleaning up provider");
        }
        self.sessions.close_all().await;
    }
}

// ============================================================================
// Session state
// ============================================================================

/// Id, status and lifecycle flags shared by every session.
pub struct SessionState {
    provider: String,
    config: SandboxConfig,
    id: StdRwLock<String>,
    status: StdRwLock<SandboxStatus>,
    closed: AtomicBool,
    registry: RegistryHandle,
}

impl SessionState {
    pub fn new(
        provider: impl Into<String>,
        id: impl Into<String>,
        config: SandboxConfig,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            provider: provider.into(),
            config,
            id: StdRwLock::new(id.into()),
            status: StdRwLock::new(SandboxStatus::Creating),
            closed: AtomicBool::new(false),
            registry,
        }
    }

    pub fn id(&self) -> String {
        self.id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn status(&self) -> SandboxStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: SandboxStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn provider_name(&self) -> &str {
        &self.provider
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail unless the session is open and not stopped.
    pub fn ensure_active(&self) -> Result<()> {
        self.ensure_not_closed()?;
        if self.status() == SandboxStatus::Stopped {
            return Err(SandboxError::SessionStopped {
                session_id: self.id(),
            });
        }
        Ok(())
    }

    /// Fail if the session has been closed.
    pub fn ensure_not_closed(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SandboxError::SessionClosed {
                session_id: self.id(),
            });
        }
        Ok(())
    }

    /// Retire the current id in favour of `new_id`, re-keying the registry.
    pub async fn reassign_id(&self, new_id: impl Into<String>) -> String {
        let new_id = new_id.into();
        let old_id = std::mem::replace(
            &mut *self.id.write().unwrap_or_else(PoisonError::into_inner),
            new_id.clone(),
        );
        self.registry.rekey(&old_id, &new_id).await;
        tracing::debug!(old_id = %old_id, new_id = %new_id, "Session id reassigned");
        old_id
    }

    /// Run `teardown` exactly once.
    ///
    /// Teardown errors are logged and set the status to `Error`. The
    /// session is marked closed and unregistered either way.
    pub async fn close_with<F, Fut>(&self, teardown: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let id = self.id();
        let start = Instant::now();
        match teardown().await {
            Ok(()) => {
                self.set_status(SandboxStatus::Stopped);
                tracing::info!(
                    provider = %self.provider,
                    session_id = %id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Session closed"
                );
            }
            Err(e) => {
                self.set_status(SandboxStatus::Error);
                tracing::warn!(
                    provider = %self.provider,
                    session_id = %id,
                    error = %e,
                    "Session teardown failed"
                );
            }
        }
        self.registry.remove(&id).await;
    }
}
