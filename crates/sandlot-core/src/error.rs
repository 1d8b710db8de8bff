//! Error types for sandlot.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sandlot operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Boxed underlying cause carried by provider-level errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Operation being attempted when an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateProvider,
    CreateSession,
    Execute,
    UploadFile,
    DownloadFile,
    ListFiles,
    CreateSnapshot,
    RestoreSnapshot,
    Terminate,
    WakeUp,
    Close,
    Cleanup,
}

impl Operation {
    /// Stable snake_case name used in messages and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateProvider => "create_provider",
            Self::CreateSession => "create_session",
            Self::Execute => "execute",
            Self::UploadFile => "upload_file",
            Self::DownloadFile => "download_file",
            Self::ListFiles => "list_files",
            Self::CreateSnapshot => "create_snapshot",
            Self::RestoreSnapshot => "restore_snapshot",
            Self::Terminate => "terminate",
            Self::WakeUp => "wake_up",
            Self::Close => "close",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a [`SandboxError`], stable across wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Provider,
    Session,
    NotFound,
    Timeout,
    Authentication,
    NotSupported,
    ResourceExhausted,
    Network,
}

/// Errors that can occur during sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Bad or missing settings, unparseable config file, unknown provider name.
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A provider was selected whose backend is not available in this build.
    #[error("provider '{provider}' is unavailable: missing {dependency}; {hint}")]
    ProviderUnavailable {
        provider: String,
        dependency: String,
        hint: String,
    },

    /// Backend-level failure.
    #[error("[{provider}] {operation} failed: {message}")]
    Provider {
        provider: String,
        operation: Operation,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// An operation was attempted before a session was opened.
    #[error(
        "sandbox session not initialized; open the sandbox (open() or scoped()) before calling {operation}"
    )]
    SessionNotInitialized { operation: Operation },

    /// `open` was called while a session is already active.
    #[error("sandbox session already exists")]
    SessionAlreadyExists,

    /// The façade was closed and cannot be reopened.
    #[error("cannot reuse a closed sandbox")]
    SandboxClosed,

    /// The session has been closed; its resources are gone.
    #[error("session '{session_id}' is closed")]
    SessionClosed { session_id: String },

    /// The session was terminated and must be woken up first.
    #[error("session '{session_id}' is stopped; call wake_up() to resume it")]
    SessionStopped { session_id: String },

    /// A provider was asked to create a session after `cleanup`.
    #[error("provider '{provider}' has been cleaned up and cannot create sessions")]
    ProviderClosed { provider: String },

    /// A file, directory or snapshot does not exist.
    #[error("[{provider}] {operation} failed: {what} not found")]
    NotFound {
        provider: String,
        operation: Operation,
        what: String,
    },

    /// An operation exceeded its allotted time.
    #[error("[{provider}] {operation} timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        provider: String,
        operation: Operation,
        timeout: Duration,
    },

    /// Credentials were rejected by the backend.
    #[error("[{provider}] authentication failed: {message}")]
    Authentication { provider: String, message: String },

    /// The backend does not implement the operation.
    #[error("[{provider}] {operation} is not supported by this provider")]
    NotSupported {
        provider: String,
        operation: Operation,
    },

    /// The backend ran out of a resource (disk, memory, quota).
    #[error("[{provider}] resource exhausted: {message}")]
    ResourceExhausted { provider: String, message: String },

    /// Connectivity failure talking to the backend.
    #[error("[{provider}] network error: {message}")]
    Network {
        provider: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Uniform wrapper applied by the façade around backend failures.
    #[error("{operation} failed on provider '{provider}': {source}")]
    Operation {
        provider: String,
        operation: Operation,
        #[source]
        source: Box<SandboxError>,
    },
}

impl SandboxError {
    /// Create a configuration error without an underlying cause.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error that wraps its cause.
    pub fn config_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a provider error without an underlying cause.
    pub fn provider(
        provider: impl Into<String>,
        operation: Operation,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            operation,
            message: message.into(),
            source: None,
        }
    }

    /// Create a provider error that wraps its cause.
    pub fn provider_with(
        provider: impl Into<String>,
        operation: Operation,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            operation,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a "not supported" error for an optional operation.
    pub fn not_supported(provider: impl Into<String>, operation: Operation) -> Self {
        Self::NotSupported {
            provider: provider.into(),
            operation,
        }
    }

    /// Create a "not found" error.
    pub fn not_found(
        provider: impl Into<String>,
        operation: Operation,
        what: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            provider: provider.into(),
            operation,
            what: what.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(provider: impl Into<String>, operation: Operation, timeout: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            operation,
            timeout,
        }
    }

    /// Wrap a backend error with the operation and provider it came from.
    pub fn wrap(provider: impl Into<String>, operation: Operation, source: SandboxError) -> Self {
        Self::Operation {
            provider: provider.into(),
            operation,
            source: Box::new(source),
        }
    }

    /// Classify the error, looking through façade wrappers.
    ///
    /// A failed session creation is a session error whatever the cause;
    /// [`root`](Self::root) still reaches the provider's own error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } | Self::ProviderUnavailable { .. } => ErrorKind::Configuration,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::SessionNotInitialized { .. }
            | Self::SessionAlreadyExists
            | Self::SandboxClosed
            | Self::SessionClosed { .. }
            | Self::SessionStopped { .. }
            | Self::ProviderClosed { .. } => ErrorKind::Session,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::Network { .. } => ErrorKind::Network,
            Self::Operation {
                operation: Operation::CreateSession,
                ..
            } => ErrorKind::Session,
            Self::Operation { source, .. } => source.kind(),
        }
    }

    /// The innermost sandlot error, skipping façade wrappers.
    pub fn root(&self) -> &SandboxError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the failure means the operation is not implemented by the backend.
    pub fn is_not_supported(&self) -> bool {
        self.kind() == ErrorKind::NotSupported
    }

    /// Name of the provider the error is tagged with, if any.
    pub fn provider_name(&self) -> Option<&str> {
        match self {
            Self::ProviderUnavailable { provider, .. }
            | Self::Provider { provider, .. }
            | Self::ProviderClosed { provider }
            | Self::NotFound { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Authentication { provider, .. }
            | Self::NotSupported { provider, .. }
            | Self::ResourceExhausted { provider, .. }
            | Self::Network { provider, .. }
            | Self::Operation { provider, .. } => Some(provider),
            _ => None,
        }
    }
}
