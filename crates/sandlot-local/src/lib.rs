//! # sandlot-local
//!
//! Local subprocess provider for sandlot.
//!
//! Every session gets a private directory under `base_dir`; commands run
//! as shell subprocesses inside it and files are plain host files.
//! Snapshots are full copies of the session tree.
//!
//! ## Example
//!
//! ```ignore
//! use sandlot_core::{ExecRequest, ProviderConfig, SandboxConfig, SandboxProvider};
//! use sandlot_local::LocalProvider;
//!
//! let provider = LocalProvider::new(&ProviderConfig::new("local"))?;
//! let session = provider.create_session(SandboxConfig::default()).await?;
//!
//! session.upload_file("hello.txt", "hi".into()).await?;
//! let result = session.execute(ExecRequest::new("cat hello.txt")).await?;
//! assert_eq!(result.stdout, "hi");
//!
//! let snapshot = session.create_snapshot().await?;
//! session.execute("rm hello.txt".into()).await?;
//! session.restore_snapshot(&snapshot).await?;
//!
//! provider.cleanup().await;
//! ```
//!
//! Not a security boundary: commands run with the caller's privileges.

mod config;
mod exec;
mod fs;
mod session;
mod snapshot;

pub use config::{LocalSettings, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_SHELL};
pub use session::LocalSession;

use async_trait::async_trait;
use sandlot_core::{
    ProviderConfig, ProviderState, Result, SandboxConfig, SandboxProvider, SandboxStatus,
    SessionHandle,
};
use std::sync::Arc;

/// Registry name of the local provider.
pub const PROVIDER_NAME: &str = "local";

/// Provider running sandboxes as local subprocesses.
pub struct LocalProvider {
    state: ProviderState,
    settings: LocalSettings,
}

impl LocalProvider {
    /// Create a provider from its configuration block.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self::with_settings(LocalSettings::from_provider_config(config)?))
    }

    pub fn with_settings(settings: LocalSettings) -> Self {
        tracing::debug!(
            base_dir = %settings.base_dir.display(),
            shell = %settings.shell,
            max_output_bytes = settings.max_output_bytes,
            "Local provider configured"
        );
        Self {
            state: ProviderState::new(PROVIDER_NAME),
            settings,
        }
    }

    pub fn settings(&self) -> &LocalSettings {
        &self.settings
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn create_session(&self, config: SandboxConfig) -> Result<SessionHandle> {
        self.state.ensure_open()?;
        config.validate()?;

        let session =
            LocalSession::create(&self.settings, config, self.state.sessions().handle()).await?;
        let session: SessionHandle = Arc::new(session);
        self.state.track(session.clone()).await?;
        Ok(session)
    }

    async fn list_sessions(&self) -> Vec<String> {
        self.state.list_sessions().await
    }

    async fn session_status(&self, session_id: &str) -> SandboxStatus {
        self.state.session_status(session_id).await
    }

    async fn cleanup(&self) {
        self.state.cleanup().await;
    }
}
