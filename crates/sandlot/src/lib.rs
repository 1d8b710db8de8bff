//! # sandlot
//!
//! One API for isolated command execution, whichever backend runs it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         sandlot                            │
//! ├────────────────────────────────────────────────────────────┤
//! │                                                            │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌────────────┐ │
//! │  │   Settings   │──▶│ ProviderRegistry │──▶│  Sandbox   │ │
//! │  │ file + env   │   │ name → factory   │   │  (façade)  │ │
//! │  └──────────────┘   └──────────────────┘   └─────┬──────┘ │
//! │                                                  │        │
//! │                              ┌───────────────────┘        │
//! │                              ▼                            │
//! │               ┌──────────────────────────────┐            │
//! │               │ SandboxProvider / Session    │            │
//! │               │ (sandlot-core contract)      │            │
//! │               └──────────────┬───────────────┘            │
//! │                              │                            │
//! │          ┌───────────────────┼──────────────────┐         │
//! │          ▼                   ▼                  ▼         │
//! │   ┌─────────────┐    ┌──────────────┐   ┌──────────────┐  │
//! │   │    local    │    │ e2b / modal  │   │  your own    │  │
//! │   │ subprocess  │    │ (register)   │   │  backend     │  │
//! │   └─────────────┘    └──────────────┘   └──────────────┘  │
//! │                                                            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use sandlot::Sandbox;
//!
//! #[tokio::main]
//! async fn main() -> sandlot::Result<()> {
//!     sandlot::logging::init();
//!
//!     let sandbox = Sandbox::new()?;
//!     sandbox
//!         .scoped(|sb| async move {
//!             let result = sb.execute("echo hello").await?;
//!             assert_eq!(result.stdout, "hello\n");
//!
//!             sb.upload_file("greeting.txt", "hi").await?;
//!             let snapshot = sb.create_snapshot().await?;
//!             sb.upload_file("greeting.txt", "bye").await?;
//!             sb.restore_snapshot(&snapshot).await?;
//!             assert_eq!(sb.download_file("greeting.txt").await?, b"hi");
//!             Ok(())
//!         })
//!         .await
//! }
//! ```
//!
//! ## Features
//!
//! - **Provider Agnostic**: the same calls against any registered backend
//! - **Scoped Sessions**: `Sandbox::scoped` closes on every exit path
//! - **Snapshots**: save and restore a session's file system
//! - **Provider Discovery**: `ProviderRegistry::info_all` reports what is usable
//! - **Blocking API**: `blocking::quick_execute` for non-async callers

pub mod blocking;
pub mod logging;
mod registry;
mod sandbox;

pub use registry::{ProviderFactory, ProviderInfo, ProviderRegistry};
pub use sandbox::{Sandbox, SandboxBuilder};

pub use sandlot_core::{
    env_bindings_for, env_var_for, search_paths, BoxError, EnvBinding, ErrorKind, ExecRequest,
    ExecutionResult, FileContent, FileEntry, Operation, ProviderConfig, ProviderState,
    RegistryHandle, Result, SandboxConfig, SandboxConfigBuilder, SandboxError, SandboxProvider,
    SandboxSession, SandboxStatus, SessionHandle, SessionRegistry, SessionState, Settings,
    BUILTIN_DEFAULT_PROVIDER, CONFIG_FILE_NAMES, DEFAULT_TIMEOUT, ENV_BINDINGS, ENV_DEFAULT_PROVIDER,
    HOME_DIR,
};
pub use sandlot_local::{LocalProvider, LocalSession, LocalSettings};

/// Providers known to a default [`ProviderRegistry`], with their availability
/// under `settings`.
pub fn providers_info(settings: &Settings) -> Vec<ProviderInfo> {
    ProviderRegistry::new().info_all(settings)
}
