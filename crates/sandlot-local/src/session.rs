//! A local sandbox session: a private directory tree plus subprocesses.

use crate::config::LocalSettings;
use crate::exec::ProcessSupervisor;
use crate::fs::SandboxRoot;
use crate::snapshot::SnapshotStore;
use crate::PROVIDER_NAME;
use async_trait::async_trait;
use chrono::Utc;
use sandlot_core::{
    ExecRequest, ExecutionResult, FileContent, FileEntry, Operation, RegistryHandle, Result,
    SandboxConfig, SandboxError, SandboxSession, SandboxStatus, SessionState,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Generate a session id, unique for the life of the process.
fn new_session_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{PROVIDER_NAME}-{}", &uuid[..12])
}

/// One local session.
///
/// Owns `<base_dir>/sandlot-local-<uuid>/`, which holds the live tree and
/// every snapshot. Nothing outside that directory is touched.
pub struct LocalSession {
    state: SessionState,
    session_dir: PathBuf,
    fs: SandboxRoot,
    snapshots: SnapshotStore,
    supervisor: ProcessSupervisor,
}

impl LocalSession {
    /// Allocate the session directory and materialize the working directory.
    pub(crate) async fn create(
        settings: &LocalSettings,
        config: SandboxConfig,
        registry: RegistryHandle,
    ) -> Result<Self> {
        let op = Operation::CreateSession;
        let start = Instant::now();

        tokio::fs::create_dir_all(&settings.base_dir).await.map_err(|e| {
            SandboxError::provider_with(
                PROVIDER_NAME,
                op,
                format!("failed to create base directory {}", settings.base_dir.display()),
                e,
            )
        })?;

        let session_dir = settings
            .base_dir
            .join(format!("sandlot-{PROVIDER_NAME}-{}", Uuid::new_v4().simple()));
        let fs = SandboxRoot::new(session_dir.join("root"), &config.working_directory)?;

        create_private_dir(&session_dir).await.map_err(|e| {
            SandboxError::provider_with(
                PROVIDER_NAME,
                op,
                format!("failed to create session directory {}", session_dir.display()),
                e,
            )
        })?;
        if let Err(e) = fs.materialize().await {
            let _ = tokio::fs::remove_dir_all(&session_dir).await;
            return Err(SandboxError::provider_with(
                PROVIDER_NAME,
                op,
                "failed to create working directory",
                e,
            ));
        }

        let id = new_session_id();
        let state = SessionState::new(PROVIDER_NAME, id.clone(), config, registry);
        state.set_status(SandboxStatus::Running);
        info!(
            session_id = %id,
            dir = %session_dir.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Local session created"
        );

        Ok(Self {
            state,
            snapshots: SnapshotStore::new(&session_dir),
            session_dir,
            fs,
            supervisor: ProcessSupervisor::new(&settings.shell, settings.max_output_bytes),
        })
    }

    /// Host directory owned by this session.
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Host path of the sandbox root.
    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    /// Host path of the working directory.
    pub fn working_dir(&self) -> PathBuf {
        self.fs.workdir()
    }

    async fn teardown(&self) -> Result<()> {
        let failed_snapshots = self.snapshots.remove_all().await;
        match tokio::fs::remove_dir_all(&self.session_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SandboxError::provider_with(
                    PROVIDER_NAME,
                    Operation::Close,
                    format!("failed to remove {}", self.session_dir.display()),
                    e,
                ));
            }
        }
        if failed_snapshots > 0 {
            return Err(SandboxError::provider(
                PROVIDER_NAME,
                Operation::Close,
                format!("{failed_snapshots} snapshot(s) could not be removed"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxSession for LocalSession {
    fn id(&self) -> String {
        self.state.id()
    }

    fn status(&self) -> SandboxStatus {
        self.state.status()
    }

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn config(&self) -> &SandboxConfig {
        self.state.config()
    }

    async fn execute(&self, request: ExecRequest) -> Result<ExecutionResult> {
        self.state.ensure_active()?;
        let op = Operation::Execute;

        let cwd = match request.working_dir.as_deref() {
            Some(dir) => self.fs.resolve(dir, op)?,
            None => self.fs.resolve(".", op)?,
        };
        if !tokio::fs::metadata(&cwd.host)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(SandboxError::not_found(
                PROVIDER_NAME,
                op,
                format!("working directory '{}'", cwd.sandbox),
            ));
        }

        let config = self.state.config();
        let mut env = config.environment_vars.clone();
        env.extend(request.env);
        let timeout = request.timeout.or(config.timeout);

        let output = self
            .supervisor
            .run(&request.command, &cwd.host, &env, timeout)
            .await?;

        Ok(ExecutionResult {
            command: request.command,
            stdout: output.stdout,
            stderr: output.stderr,
            return_code: output.return_code,
            duration: output.duration,
            timestamp: Utc::now(),
        })
    }

    async fn upload_file(&self, path: &str, content: FileContent) -> Result<()> {
        self.state.ensure_active()?;
        self.fs.write(path, content.as_bytes()).await
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        self.state.ensure_active()?;
        self.fs.read(path).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.state.ensure_active()?;
        self.fs.list(path).await
    }

    async fn create_snapshot(&self) -> Result<String> {
        self.state.ensure_active()?;
        self.snapshots.create(self.fs.root()).await
    }

    async fn restore_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.state.ensure_active()?;
        self.snapshots.restore(snapshot_id, self.fs.root()).await
    }

    async fn terminate(&self) -> Result<()> {
        self.state.ensure_active()?;
        self.state.set_status(SandboxStatus::Stopped);
        info!(session_id = %self.state.id(), "Local session terminated");
        Ok(())
    }

    async fn wake_up(&self, snapshot_id: Option<&str>) -> Result<()> {
        self.state.ensure_not_closed()?;
        if self.state.status() != SandboxStatus::Stopped {
            return Err(SandboxError::provider(
                PROVIDER_NAME,
                Operation::WakeUp,
                format!("session '{}' is not stopped", self.state.id()),
            ));
        }

        if let Some(snapshot_id) = snapshot_id {
            self.snapshots.restore(snapshot_id, self.fs.root()).await?;
        }

        let old_id = self.state.reassign_id(new_session_id()).await;
        self.state.set_status(SandboxStatus::Running);
        info!(
            old_id = %old_id,
            session_id = %self.state.id(),
            snapshot_id = ?snapshot_id,
            "Local session woken up"
        );
        Ok(())
    }

    async fn close(&self) {
        self.state.close_with(|| self.teardown()).await;
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        if self.state.is_closed() {
            return;
        }
        // Dropped without close (e.g. the provider went away): reclaim the tree
        debug!(session_id = %self.state.id(), "Removing unclosed session directory");
        let dir = self.session_dir.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_session_dir(&dir));
            }
            Err(_) => remove_session_dir(&dir),
        }
    }
}

fn remove_session_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %e, "failed to remove session directory");
        }
    }
}

async fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(path).await
}
