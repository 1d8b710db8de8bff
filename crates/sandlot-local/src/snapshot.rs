//! Directory-copy snapshots for local sessions.
//!
//! Each session directory holds its live tree and its snapshots:
//!
//! ```text
//! <session_dir>/
//!   root/                 live sandbox tree
//!   snapshots/<id>/       full copy of root/ at snapshot time
//!   snapshots/<id>.partial  copy in progress (or abandoned)
//! ```
//!
//! Restore copies the snapshot to a staging directory next to `root/` and
//! swaps it in with two renames, so the root is only ever missing between
//! them. A failed swap puts the previous root back.

use crate::PROVIDER_NAME;
use sandlot_core::{BoxError, Operation, Result, SandboxError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Snapshot id → snapshot directory, for one session.
pub(crate) struct SnapshotStore {
    session_dir: PathBuf,
    snapshots_dir: PathBuf,
    snapshots: Mutex<HashMap<String, PathBuf>>,
}

impl SnapshotStore {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            session_dir: session_dir.to_path_buf(),
            snapshots_dir: session_dir.join("snapshots"),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Copy `root` into a new snapshot and return its id.
    ///
    /// The id is only recorded once the copy is complete.
    pub async fn create(&self, root: &Path) -> Result<String> {
        let op = Operation::CreateSnapshot;
        let start = Instant::now();
        let id = format!("snap-{}", Uuid::new_v4().simple());
        let partial = self.snapshots_dir.join(format!("{id}.partial"));
        let dest = self.snapshots_dir.join(&id);

        debug!(snapshot_id = %id, "copying sandbox tree");
        if let Err(e) = copy_tree(root.to_path_buf(), partial.clone()).await {
            remove_best_effort(&partial).await;
            return Err(SandboxError::provider_with(
                PROVIDER_NAME,
                op,
                "failed to copy sandbox tree",
                e,
            ));
        }
        tokio::fs::rename(&partial, &dest).await.map_err(|e| {
            SandboxError::provider_with(PROVIDER_NAME, op, "failed to finalize snapshot", e)
        })?;

        self.snapshots.lock().await.insert(id.clone(), dest);
        info!(
            snapshot_id = %id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Snapshot created"
        );
        Ok(id)
    }

    /// Replace `root` with a fresh copy of snapshot `id`.
    ///
    /// The snapshot itself is left untouched and can be restored again.
    pub async fn restore(&self, id: &str, root: &Path) -> Result<()> {
        let op = Operation::RestoreSnapshot;
        let start = Instant::now();

        let source = self
            .snapshots
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::not_found(PROVIDER_NAME, op, format!("snapshot '{id}'")))?;
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(SandboxError::not_found(
                PROVIDER_NAME,
                op,
                format!("snapshot directory for '{id}'"),
            ));
        }

        let tag = Uuid::new_v4().simple().to_string();
        let staging = self.session_dir.join(format!(".restore-{tag}"));
        let retired = self.session_dir.join(format!(".retired-{tag}"));

        if let Err(e) = copy_tree(source, staging.clone()).await {
            remove_best_effort(&staging).await;
            return Err(SandboxError::provider_with(
                PROVIDER_NAME,
                op,
                format!("failed to copy snapshot '{id}'"),
                e,
            ));
        }

        let had_root = tokio::fs::try_exists(root).await.unwrap_or(false);
        if had_root {
            if let Err(e) = tokio::fs::rename(root, &retired).await {
                remove_best_effort(&staging).await;
                return Err(SandboxError::provider_with(
                    PROVIDER_NAME,
                    op,
                    "failed to move the live tree aside",
                    e,
                ));
            }
        }

        if let Err(e) = tokio::fs::rename(&staging, root).await {
            if had_root {
                if let Err(rollback) = tokio::fs::rename(&retired, root).await {
                    warn!(error = %rollback, "failed to put the previous tree back");
                }
            }
            remove_best_effort(&staging).await;
            return Err(SandboxError::provider_with(
                PROVIDER_NAME,
                op,
                "failed to swap in the restored tree",
                e,
            ));
        }

        if had_root {
            remove_best_effort(&retired).await;
        }
        info!(
            snapshot_id = %id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Snapshot restored"
        );
        Ok(())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.snapshots.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    /// Remove every recorded snapshot directory and forget them.
    ///
    /// Returns the number of directories that could not be removed.
    pub async fn remove_all(&self) -> usize {
        let dirs: Vec<PathBuf> = self.snapshots.lock().await.drain().map(|(_, d)| d).collect();
        let mut failures = 0;
        for dir in dirs {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "failed to remove snapshot");
                    failures += 1;
                }
            }
        }
        failures
    }
}

/// Recursively copy the contents of `from` into `to`, off the async runtime.
async fn copy_tree(from: PathBuf, to: PathBuf) -> std::result::Result<(), BoxError> {
    tokio::task::spawn_blocking(move || copy_tree_blocking(&from, &to)).await?
}

/// Symlinks are recreated as links, never followed. Sockets, fifos and
/// devices are skipped. Directory modes are applied last so read-only
/// directories can still be filled.
fn copy_tree_blocking(from: &Path, to: &Path) -> std::result::Result<(), BoxError> {
    std::fs::create_dir_all(to)?;
    let mut dir_modes = Vec::new();

    for entry in WalkDir::new(from).min_depth(1).follow_links(false) {
        let entry = entry?;
        let dest = to.join(entry.path().strip_prefix(from)?);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            symlink(&std::fs::read_link(entry.path())?, &dest)?;
        } else if file_type.is_dir() {
            std::fs::create_dir_all(&dest)?;
            dir_modes.push((dest, entry.metadata()?.permissions()));
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &dest)?;
        } else {
            debug!(path = %entry.path().display(), "skipping special file");
        }
    }

    for (dir, permissions) in dir_modes.into_iter().rev() {
        std::fs::set_permissions(&dir, permissions)?;
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot recreate symlink {}", link.display()),
    ))
}

async fn remove_best_effort(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove directory");
        }
    }
}
