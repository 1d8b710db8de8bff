//! The contract every sandbox backend implements.
//!
//! A [`SandboxProvider`] creates and tracks sessions; a [`SandboxSession`]
//! is one live isolated environment. Snapshot and suspend/resume are
//! optional: their default implementations fail with
//! [`SandboxError::NotSupported`] so backends opt in individually.

use crate::config::SandboxConfig;
use crate::error::{Operation, Result, SandboxError};
use crate::types::{ExecRequest, ExecutionResult, FileContent, FileEntry, SandboxStatus};
use async_trait::async_trait;
use std::sync::Arc;

/// Shared handle to a live session.
pub type SessionHandle = Arc<dyn SandboxSession>;

/// Factory and registry for sessions of one backend kind.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Stable provider identifier (e.g. `"local"`).
    fn name(&self) -> &str;

    /// Create a new session and start tracking it.
    ///
    /// Fails with [`SandboxError::ProviderClosed`] after [`cleanup`](Self::cleanup).
    async fn create_session(&self, config: SandboxConfig) -> Result<SessionHandle>;

    /// Ids of all tracked sessions.
    async fn list_sessions(&self) -> Vec<String>;

    /// Status of a tracked session, [`SandboxStatus::Unknown`] for anything else.
    async fn session_status(&self, session_id: &str) -> SandboxStatus;

    /// Close every tracked session, best-effort, then refuse new sessions.
    async fn cleanup(&self);
}

/// One live sandbox instance owned by a provider.
#[async_trait]
pub trait SandboxSession: Send + Sync {
    /// Current session id. Changes when a stopped session is woken up.
    fn id(&self) -> String;

    fn status(&self) -> SandboxStatus;

    /// Name of the owning provider.
    fn provider_name(&self) -> &str;

    /// The configuration the session was created with.
    fn config(&self) -> &SandboxConfig;

    /// Run a shell command. A non-zero exit code is not an error.
    async fn execute(&self, request: ExecRequest) -> Result<ExecutionResult>;

    /// Write a file, creating parent directories as needed.
    async fn upload_file(&self, path: &str, content: FileContent) -> Result<()>;

    /// Read a file; a missing file is [`SandboxError::NotFound`].
    async fn download_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Direct children of a directory.
    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>>;

    async fn create_snapshot(&self) -> Result<String> {
        Err(SandboxError::not_supported(
            self.provider_name(),
            Operation::CreateSnapshot,
        ))
    }

    async fn restore_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let _ = snapshot_id;
        Err(SandboxError::not_supported(
            self.provider_name(),
            Operation::RestoreSnapshot,
        ))
    }

    /// Suspend the session while keeping its state.
    async fn terminate(&self) -> Result<()> {
        Err(SandboxError::not_supported(
            self.provider_name(),
            Operation::Terminate,
        ))
    }

    /// Resume a suspended session, optionally from a snapshot.
    ///
    /// The session gets a new id; the old one is retired.
    async fn wake_up(&self, snapshot_id: Option<&str>) -> Result<()> {
        let _ = snapshot_id;
        Err(SandboxError::not_supported(
            self.provider_name(),
            Operation::WakeUp,
        ))
    }

    /// Release the session's resources. Idempotent and infallible:
    /// teardown failures are logged and leave the status at `Error`.
    async fn close(&self);
}
