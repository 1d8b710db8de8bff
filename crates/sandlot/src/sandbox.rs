//! Sandbox façade - one handle over whichever provider is selected.

use crate::registry::ProviderRegistry;
use crate::{
    ExecRequest, ExecutionResult, FileContent, FileEntry, Operation, Result, SandboxConfig,
    SandboxError, SandboxProvider, SandboxStatus, SessionHandle, Settings,
};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// How the builder picks a provider.
#[derive(Default)]
enum ProviderChoice {
    /// The settings' default provider.
    #[default]
    Default,
    Named(String),
    Instance(Arc<dyn SandboxProvider>),
}

/// Builder for [`Sandbox`].
///
/// Settings are only resolved (from the process-wide default when none are
/// given) if the provider or the configuration still has to come from them.
#[derive(Default)]
pub struct SandboxBuilder {
    provider: ProviderChoice,
    config: Option<SandboxConfig>,
    settings: Option<Settings>,
    registry: Option<ProviderRegistry>,
}

impl SandboxBuilder {
    /// Select a provider by registry name.
    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider = ProviderChoice::Named(name.into());
        self
    }

    /// Use an already-constructed provider as-is.
    pub fn provider_instance(mut self, provider: Arc<dyn SandboxProvider>) -> Self {
        self.provider = ProviderChoice::Instance(provider);
        self
    }

    /// Session configuration. Defaults to the settings' `sandbox_defaults`.
    pub fn config(mut self, config: SandboxConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Resolve the provider and configuration.
    ///
    /// No session is created until [`Sandbox::open`].
    pub fn build(self) -> Result<Sandbox> {
        let settings = self.settings.as_ref();
        let resolve = move || settings_or_global(settings);

        let provider = match self.provider {
            ProviderChoice::Instance(provider) => provider,
            ProviderChoice::Named(name) => {
                let registry = self.registry.unwrap_or_default();
                registry.create(&name, resolve()?)?
            }
            ProviderChoice::Default => {
                let registry = self.registry.unwrap_or_default();
                let settings = resolve()?;
                registry.create(settings.default_provider(), settings)?
            }
        };

        let config = match self.config {
            Some(config) => config,
            None => resolve()?.sandbox_defaults().clone(),
        };
        config.validate()?;

        tracing::debug!(
            provider = %provider.name(),
            timeout_secs = ?config.timeout.map(|t| t.as_secs_f64()),
            working_directory = %config.working_directory,
            "Sandbox configured"
        );

        Ok(Sandbox {
            inner: Arc::new(Inner {
                provider,
                config,
                state: Mutex::new(FacadeState::default()),
            }),
        })
    }
}

fn settings_or_global(settings: Option<&Settings>) -> Result<&Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::global(),
    }
}

#[derive(Default)]
struct FacadeState {
    session: Option<SessionHandle>,
    /// A session creation is in flight.
    opening: bool,
    closed: bool,
    /// Status of the session at close, reported once it is gone.
    final_status: Option<SandboxStatus>,
}

struct Inner {
    provider: Arc<dyn SandboxProvider>,
    config: SandboxConfig,
    state: Mutex<FacadeState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, FacadeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closed || !self.config.auto_cleanup {
            return;
        }
        let Some(session) = state.session.take() else {
            return;
        };

        let session_id = session.id();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    session_id = %session_id,
                    provider = %self.provider.name(),
                    "Sandbox dropped without close; closing in the background"
                );
                handle.spawn(async move { session.close().await });
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session_id,
                    provider = %self.provider.name(),
                    "Sandbox dropped without close outside a runtime; session left to provider cleanup"
                );
            }
        }
    }
}

/// Clears the in-flight flag if `open` is cancelled mid-creation.
struct OpeningGuard<'a>(&'a Inner);

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        self.0.state().opening = false;
    }
}

/// A sandbox: one session on one provider.
///
/// Cheap to clone; clones share the session. The primary usage is
/// [`Sandbox::scoped`], which guarantees the session is closed on every
/// exit path. Explicit [`open`](Sandbox::open) / [`close`](Sandbox::close)
/// are available too.
///
/// A closed sandbox cannot be reopened; build a new one instead.
///
/// # Example
///
/// ```ignore
/// let sandbox = Sandbox::builder().provider("local").build()?;
/// let out = sandbox
///     .scoped(|sb| async move { sb.execute("echo hello").await })
///     .await?;
/// assert_eq!(out.stdout, "hello\n");
/// ```
#[derive(Clone)]
pub struct Sandbox {
    inner: Arc<Inner>,
}

impl Sandbox {
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::default()
    }

    /// A sandbox on the default provider with the process-wide settings.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// A sandbox on the named provider with the process-wide settings.
    pub fn with_provider(name: impl Into<String>) -> Result<Self> {
        Self::builder().provider(name).build()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the session.
    ///
    /// Fails with [`SandboxError::SandboxClosed`] after [`close`](Self::close)
    /// and with [`SandboxError::SessionAlreadyExists`] if a session is already
    /// open (or being opened).
    pub async fn open(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if state.closed {
                return Err(SandboxError::SandboxClosed);
            }
            if state.session.is_some() || state.opening {
                return Err(SandboxError::SessionAlreadyExists);
            }
            state.opening = true;
        }
        let guard = OpeningGuard(&self.inner);

        let start = Instant::now();
        let provider = self.provider_name();
        tracing::debug!(provider = %provider, "Creating session");
        let created = self
            .inner
            .provider
            .create_session(self.inner.config.clone())
            .await;
        drop(guard);

        let session = match created {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(provider = %provider, error = %e, "Session creation failed");
                return Err(SandboxError::wrap(provider, Operation::CreateSession, e));
            }
        };

        let closed_meanwhile = {
            let mut state = self.inner.state();
            if state.closed {
                true
            } else {
                state.session = Some(session.clone());
                false
            }
        };
        if closed_meanwhile {
            session.close().await;
            return Err(SandboxError::SandboxClosed);
        }

        tracing::info!(
            provider = %provider,
            session_id = %session.id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox opened"
        );
        Ok(())
    }

    /// Close the session and retire this sandbox.
    ///
    /// Idempotent and infallible: teardown failures are logged by the
    /// session, never returned.
    pub async fn close(&self) {
        let session = {
            let mut state = self.inner.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.session.take()
        };

        if let Some(session) = session {
            let session_id = session.id();
            self.inner.state().final_status = Some(session.status());
            session.close().await;
            self.inner.state().final_status = Some(session.status());
            tracing::info!(
                provider = %self.provider_name(),
                session_id = %session_id,
                "Sandbox closed"
            );
        }
    }

    /// Open, run `f`, and close, whatever `f` does.
    ///
    /// The close also runs when `f` panics; the panic is resumed afterwards.
    pub async fn scoped<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Sandbox) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.open().await?;
        let handle = self.clone();
        let outcome = AssertUnwindSafe(async move { f(handle).await })
            .catch_unwind()
            .await;
        self.close().await;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Status of the session. After `close()` this is its final status, and
    /// [`SandboxStatus::Unknown`] if no session was ever opened.
    pub fn status(&self) -> SandboxStatus {
        let state = self.inner.state();
        match (&state.session, state.final_status) {
            (Some(session), _) => session.status(),
            (None, Some(status)) => status,
            (None, None) => SandboxStatus::Unknown,
        }
    }

    /// Session id, once a session exists.
    pub fn id(&self) -> Option<String> {
        self.inner.state().session.as_ref().map(|s| s.id())
    }

    pub fn provider_name(&self) -> &str {
        self.inner.provider.name()
    }

    pub fn provider(&self) -> &Arc<dyn SandboxProvider> {
        &self.inner.provider
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.inner.config
    }

    pub fn is_open(&self) -> bool {
        self.inner.state().session.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state().closed
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Run a shell command.
    ///
    /// Accepts a plain command string or an [`ExecRequest`]. Without an
    /// explicit timeout the configuration's timeout applies. A non-zero exit
    /// code is a normal result, not an error.
    pub async fn execute(&self, request: impl Into<ExecRequest>) -> Result<ExecutionResult> {
        let op = Operation::Execute;
        let session = self.session(op)?;
        let mut request = request.into();
        if request.timeout.is_none() {
            request.timeout = self.inner.config.timeout;
        }

        let command = request.command.clone();
        tracing::debug!(
            session_id = %session.id(),
            command = %command,
            timeout_secs = ?request.timeout.map(|t| t.as_secs_f64()),
            "Executing command"
        );
        let result = session
            .execute(request)
            .await
            .map_err(|e| self.fail(op, e))?;
        tracing::debug!(
            session_id = %session.id(),
            return_code = result.return_code,
            duration_ms = result.duration.as_millis() as u64,
            "Command finished"
        );
        Ok(result)
    }

    pub async fn upload_file(&self, path: &str, content: impl Into<FileContent>) -> Result<()> {
        let op = Operation::UploadFile;
        let session = self.session(op)?;
        let content = content.into();
        tracing::trace!(session_id = %session.id(), path, bytes = content.len(), "Uploading file");
        session
            .upload_file(path, content)
            .await
            .map_err(|e| self.fail(op, e))
    }

    pub async fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        let op = Operation::DownloadFile;
        let session = self.session(op)?;
        let bytes = session
            .download_file(path)
            .await
            .map_err(|e| self.fail(op, e))?;
        tracing::trace!(session_id = %session.id(), path, bytes = bytes.len(), "Downloaded file");
        Ok(bytes)
    }

    pub async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>> {
        let op = Operation::ListFiles;
        self.session(op)?
            .list_files(path)
            .await
            .map_err(|e| self.fail(op, e))
    }

    /// Snapshot the session's file system. Not every provider supports this.
    pub async fn create_snapshot(&self) -> Result<String> {
        let op = Operation::CreateSnapshot;
        self.session(op)?
            .create_snapshot()
            .await
            .map_err(|e| self.fail(op, e))
    }

    pub async fn restore_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let op = Operation::RestoreSnapshot;
        self.session(op)?
            .restore_snapshot(snapshot_id)
            .await
            .map_err(|e| self.fail(op, e))
    }

    /// Suspend the session, keeping its state for [`wake_up`](Self::wake_up).
    pub async fn terminate(&self) -> Result<()> {
        let op = Operation::Terminate;
        self.session(op)?
            .terminate()
            .await
            .map_err(|e| self.fail(op, e))
    }

    /// Resume a terminated session, optionally from a snapshot.
    ///
    /// The session id may change.
    pub async fn wake_up(&self, snapshot_id: Option<&str>) -> Result<()> {
        let op = Operation::WakeUp;
        self.session(op)?
            .wake_up(snapshot_id)
            .await
            .map_err(|e| self.fail(op, e))
    }

    fn session(&self, operation: Operation) -> Result<SessionHandle> {
        self.inner
            .state()
            .session
            .clone()
            .ok_or(SandboxError::SessionNotInitialized { operation })
    }

    fn fail(&self, operation: Operation, error: SandboxError) -> SandboxError {
        tracing::error!(
            provider = %self.provider_name(),
            operation = %operation,
            error = %error,
            "Sandbox operation failed"
        );
        SandboxError::wrap(self.provider_name(), operation, error)
    }
}

impl fmt::Display for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (status, id) = {
            let state = self.inner.state();
            match (&state.session, state.final_status) {
                (Some(session), _) => (session.status().to_string(), session.id()),
                (None, Some(status)) => (status.to_string(), "None".to_string()),
                (None, None) => ("not_created".to_string(), "None".to_string()),
            }
        };
        write!(
            f,
            "Sandbox(provider={}, status={}, id={})",
            self.provider_name(),
            status,
            id
        )
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("provider", &self.provider_name())
            .field("id", &self.id())
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}
