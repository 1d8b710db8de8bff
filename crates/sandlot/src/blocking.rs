//! Synchronous wrapper for callers without an async runtime.
//!
//! Every call blocks the current thread on a private current-thread
//! runtime. Do not use these from inside a tokio runtime: blocking on a
//! runtime from within another one panics.

use crate::{
    ExecRequest, ExecutionResult, FileContent, FileEntry, Operation, Result, Sandbox,
    SandboxError,
};
use std::future::Future;
use tokio::runtime::{Builder, Runtime};

/// A [`Sandbox`] driven synchronously.
///
/// Closes its session when dropped.
pub struct BlockingSandbox {
    sandbox: Sandbox,
    runtime: Runtime,
}

impl BlockingSandbox {
    /// Wrap an unopened sandbox.
    pub fn new(sandbox: Sandbox) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                SandboxError::provider_with(
                    sandbox.provider_name(),
                    Operation::CreateSession,
                    "failed to start blocking runtime",
                    e,
                )
            })?;
        Ok(Self { sandbox, runtime })
    }

    /// Build a sandbox on `provider` (or the default provider), wrap it and
    /// open it.
    pub fn connect(provider: Option<&str>) -> Result<Self> {
        let sandbox = match provider {
            Some(name) => Sandbox::with_provider(name)?,
            None => Sandbox::new()?,
        };
        let blocking = Self::new(sandbox)?;
        blocking.open()?;
        Ok(blocking)
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn open(&self) -> Result<()> {
        self.block_on(self.sandbox.open())
    }

    pub fn execute(&self, request: impl Into<ExecRequest>) -> Result<ExecutionResult> {
        self.block_on(self.sandbox.execute(request))
    }

    pub fn upload_file(&self, path: &str, content: impl Into<FileContent>) -> Result<()> {
        self.block_on(self.sandbox.upload_file(path, content))
    }

    pub fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        self.block_on(self.sandbox.download_file(path))
    }

    pub fn list_files(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.block_on(self.sandbox.list_files(path))
    }

    pub fn create_snapshot(&self) -> Result<String> {
        self.block_on(self.sandbox.create_snapshot())
    }

    pub fn restore_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.block_on(self.sandbox.restore_snapshot(snapshot_id))
    }

    pub fn close(&self) {
        self.block_on(self.sandbox.close())
    }
}

impl Drop for BlockingSandbox {
    fn drop(&mut self) {
        if self.sandbox.is_closed() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            tracing::warn!(
                provider = %self.sandbox.provider_name(),
                "BlockingSandbox dropped inside an async runtime; skipping close"
            );
            return;
        }
        self.close();
    }
}

/// Run one command in a throwaway sandbox and close it.
pub fn quick_execute(command: &str, provider: Option<&str>) -> Result<ExecutionResult> {
    let sandbox = BlockingSandbox::connect(provider)?;
    let result = sandbox.execute(command);
    sandbox.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Settings;

    fn blocking_local(dir: &tempfile::TempDir) -> BlockingSandbox {
        let settings = Settings::default().with_provider_value(
            "local",
            "base_dir",
            dir.path().to_string_lossy().into_owned(),
        );
        let sandbox = Sandbox::builder()
            .provider("local")
            .settings(settings)
            .build()
            .unwrap();
        BlockingSandbox::new(sandbox).unwrap()
    }

    #[test]
    fn test_blocking_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = blocking_local(&dir);
        sandbox.open().unwrap();

        sandbox.upload_file("note.txt", "hi").unwrap();
        let result = sandbox.execute("cat note.txt").unwrap();
        assert_eq!(result.stdout, "hi");
        assert_eq!(sandbox.download_file("note.txt").unwrap(), b"hi");
        assert_eq!(sandbox.list_files("/").unwrap().len(), 1);

        let snap = sandbox.create_snapshot().unwrap();
        sandbox.execute("rm note.txt").unwrap();
        sandbox.restore_snapshot(&snap).unwrap();
        assert_eq!(sandbox.download_file("note.txt").unwrap(), b"hi");

        sandbox.close();
        assert!(sandbox.sandbox().is_closed());
    }

    #[test]
    fn test_drop_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = blocking_local(&dir);
        sandbox.open().unwrap();
        drop(sandbox);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_quick_execute() {
        let result = quick_execute("echo quick && exit 3", Some("local")).unwrap();
        assert_eq!(result.stdout, "quick\n");
        assert_eq!(result.return_code, 3);
        assert!(!result.success());
    }
}
