//! # sandlot-core
//!
//! Provider contract and shared plumbing for sandlot sandboxes.
//!
//! This crate defines what every sandbox backend implements and the
//! bookkeeping they share. It knows nothing about any particular backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      sandlot-core                        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │    Settings     │────▶│  ProviderConfig (by name)│   │
//! │  │  file + env +   │     │  SandboxConfig defaults  │   │
//! │  │  overrides      │     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ SandboxProvider │────▶│  SessionRegistry         │   │
//! │  │ - create_session│     │  id → SandboxSession     │   │
//! │  │ - cleanup()     │     └──────────────────────────┘   │
//! │  └─────────────────┘                │                   │
//! │                                     ▼                   │
//! │                          ┌──────────────────────────┐   │
//! │                          │  SandboxSession          │   │
//! │                          │  - execute()             │   │
//! │                          │  - upload/download/list  │   │
//! │                          │  - snapshot (optional)   │   │
//! │                          └──────────────────────────┘   │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Implementing a backend
//!
//! ```ignore
//! use sandlot_core::{ProviderState, SandboxProvider, SessionState, SandboxConfig};
//!
//! struct MyProvider {
//!     state: ProviderState,
//! }
//!
//! #[async_trait::async_trait]
//! impl SandboxProvider for MyProvider {
//!     fn name(&self) -> &str {
//!         self.state.name()
//!     }
//!
//!     async fn create_session(&self, config: SandboxConfig) -> sandlot_core::Result<SessionHandle> {
//!         self.state.ensure_open()?;
//!         let session = Arc::new(MySession::start(config, self.state.sessions().handle()).await?);
//!         self.state.track(session.clone()).await?;
//!         Ok(session)
//!     }
//!
//!     // list_sessions / session_status / cleanup delegate to `self.state`
//! }
//! ```
//!
//! ## Features
//!
//! - **Provider Contract**: async traits for providers and sessions
//! - **Optional Capabilities**: snapshot and suspend/resume default to "not supported"
//! - **Configuration**: YAML file, environment variables and call-site overrides
//! - **Error Taxonomy**: one error type tagged with provider and operation

mod config;
mod error;
mod provider;
mod session;
mod settings;
mod types;

pub use config::{ProviderConfig, SandboxConfig, SandboxConfigBuilder, DEFAULT_TIMEOUT, HOME_DIR};
pub use error::{BoxError, ErrorKind, Operation, Result, SandboxError};
pub use provider::{SandboxProvider, SandboxSession, SessionHandle};
pub use session::{ProviderState, RegistryHandle, SessionRegistry, SessionState};
pub use settings::{
    env_bindings_for, env_var_for, search_paths, EnvBinding, Settings, BUILTIN_DEFAULT_PROVIDER,
    CONFIG_FILE_NAMES, ENV_BINDINGS, ENV_DEFAULT_PROVIDER,
};
pub use types::{ExecRequest, ExecutionResult, FileContent, FileEntry, SandboxStatus};
