//! Path resolution and file operations inside a session's root.
//!
//! Sandbox paths never leave the root: `/a/b` is relative to the root,
//! `~` and `~/a` to the root as well, anything else to the working
//! directory. `..` is resolved lexically and rejected once it would climb
//! above the root. This is path validation, not a chroot: symlinks created
//! by commands inside the sandbox are followed.

use crate::PROVIDER_NAME;
use chrono::{DateTime, Utc};
use sandlot_core::{FileEntry, Operation, Result, SandboxError, HOME_DIR};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// A path inside the sandbox, resolved to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedPath {
    /// Host path under the root.
    pub host: PathBuf,
    /// Normalized sandbox path, always starting with `/`.
    pub sandbox: String,
}

/// The live directory tree of one session.
#[derive(Debug, Clone)]
pub(crate) struct SandboxRoot {
    root: PathBuf,
    /// Working directory as normalized components below the root.
    workdir: PathBuf,
}

impl SandboxRoot {
    /// Describe a root at `root` whose working directory is `working_directory`.
    ///
    /// Nothing is created on disk.
    pub fn new(root: PathBuf, working_directory: &str) -> Result<Self> {
        let workdir = normalize(Path::new(""), strip_home(working_directory)).ok_or_else(|| {
            SandboxError::config(format!(
                "working_directory escapes the sandbox root: {working_directory}"
            ))
        })?;
        Ok(Self { root, workdir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path of the working directory.
    pub fn workdir(&self) -> PathBuf {
        self.root.join(&self.workdir)
    }

    /// Create the working directory (and the root) if missing.
    pub async fn materialize(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.workdir()).await
    }

    /// Resolve a sandbox path for `operation`.
    pub fn resolve(&self, path: &str, operation: Operation) -> Result<ResolvedPath> {
        let relative = if path.starts_with('/') {
            normalize(Path::new(""), path)
        } else if path == HOME_DIR || path.starts_with("~/") {
            normalize(Path::new(""), strip_home(path))
        } else {
            normalize(&self.workdir, path)
        };

        let relative = relative.ok_or_else(|| {
            SandboxError::provider(
                PROVIDER_NAME,
                operation,
                format!("path escapes the sandbox root: {path}"),
            )
        })?;

        let sandbox = format!("/{}", relative.to_string_lossy());
        trace!(path = %path, resolved = %sandbox, "resolved sandbox path");
        Ok(ResolvedPath {
            host: self.root.join(&relative),
            sandbox,
        })
    }

    /// Write `bytes` to `path`, creating parent directories.
    pub async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let op = Operation::UploadFile;
        let target = self.resolve(path, op)?;
        if target.sandbox == "/" {
            return Err(SandboxError::provider(PROVIDER_NAME, op, "cannot write to the sandbox root"));
        }

        if let Some(parent) = target.host.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(e, op, &target.sandbox))?;
        }
        tokio::fs::write(&target.host, bytes)
            .await
            .map_err(|e| io_error(e, op, &target.sandbox))?;

        debug!(path = %target.sandbox, size = bytes.len(), "file written");
        Ok(())
    }

    /// Read the file at `path`.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let op = Operation::DownloadFile;
        let target = self.resolve(path, op)?;

        let meta = tokio::fs::metadata(&target.host)
            .await
            .map_err(|e| io_error(e, op, &target.sandbox))?;
        if meta.is_dir() {
            return Err(SandboxError::provider(
                PROVIDER_NAME,
                op,
                format!("'{}' is a directory", target.sandbox),
            ));
        }

        let bytes = tokio::fs::read(&target.host)
            .await
            .map_err(|e| io_error(e, op, &target.sandbox))?;
        debug!(path = %target.sandbox, size = bytes.len(), "file read");
        Ok(bytes)
    }

    /// List the direct children of the directory at `path`, sorted by name.
    pub async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let op = Operation::ListFiles;
        let target = self.resolve(path, op)?;

        let meta = tokio::fs::metadata(&target.host)
            .await
            .map_err(|e| io_error(e, op, &target.sandbox))?;
        if !meta.is_dir() {
            return Err(SandboxError::provider(
                PROVIDER_NAME,
                op,
                format!("'{}' is not a directory", target.sandbox),
            ));
        }

        let mut dir = tokio::fs::read_dir(&target.host)
            .await
            .map_err(|e| io_error(e, op, &target.sandbox))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error(e, op, &target.sandbox))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Follow symlinks; fall back to the link itself when dangling
            let meta = match tokio::fs::metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(_) => match entry.metadata().await {
                    Ok(meta) => meta,
                    Err(_) => continue,
                },
            };
            let path = if target.sandbox == "/" {
                format!("/{name}")
            } else {
                format!("{}/{name}", target.sandbox)
            };
            entries.push(FileEntry {
                name,
                path,
                size_bytes: meta.len(),
                is_directory: meta.is_dir(),
                modified_time: meta.modified().ok().map(DateTime::<Utc>::from),
                permissions: permissions(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(path = %target.sandbox, count = entries.len(), "directory listed");
        Ok(entries)
    }
}

fn strip_home(path: &str) -> &str {
    if path == HOME_DIR {
        ""
    } else {
        path.strip_prefix("~/").unwrap_or(path)
    }
}

/// Lexically join `path` onto `base`, resolving `.` and `..`.
///
/// `None` if `..` would climb above the root.
fn normalize(base: &Path, path: &str) -> Option<PathBuf> {
    let mut normalized = base.to_path_buf();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(seg) => normalized.push(seg),
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(normalized)
}

fn io_error(e: std::io::Error, operation: Operation, path: &str) -> SandboxError {
    match e.kind() {
        ErrorKind::NotFound => SandboxError::not_found(PROVIDER_NAME, operation, format!("'{path}'")),
        _ => SandboxError::provider_with(PROVIDER_NAME, operation, format!("I/O error on '{path}'"), e),
    }
}

#[cfg(unix)]
fn permissions(meta: &std::fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:03o}", meta.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn permissions(meta: &std::fs::Metadata) -> Option<String> {
    Some(if meta.permissions().readonly() { "444" } else { "644" }.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandlot_core::ErrorKind as SandboxErrorKind;

    fn root_at(dir: &tempfile::TempDir, wd: &str) -> SandboxRoot {
        SandboxRoot::new(dir.path().join("root"), wd).unwrap()
    }

    #[test]
    fn test_resolution_rules() {
        let dir = tempfile::tempdir().unwrap();
        let root = root_at(&dir, "/work");

        let abs = root.resolve("/etc/hosts", Operation::DownloadFile).unwrap();
        assert_eq!(abs.sandbox, "/etc/hosts");
        assert_eq!(abs.host, dir.path().join("root/etc/hosts"));

        let rel = root.resolve("a/b.txt", Operation::DownloadFile).unwrap();
        assert_eq!(rel.sandbox, "/work/a/b.txt");

        let home = root.resolve("~/x", Operation::DownloadFile).unwrap();
        assert_eq!(home.sandbox, "/x");

        let up = root.resolve("../y", Operation::DownloadFile).unwrap();
        assert_eq!(up.sandbox, "/y");

        assert_eq!(root.resolve(".", Operation::ListFiles).unwrap().sandbox, "/work");
        assert_eq!(root.resolve("/", Operation::ListFiles).unwrap().sandbox, "/");
    }

    #[test]
    fn test_home_working_directory_is_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = root_at(&dir, HOME_DIR);
        assert_eq!(root.workdir(), dir.path().join("root"));
        assert_eq!(root.resolve("f", Operation::UploadFile).unwrap().sandbox, "/f");
    }

    #[test]
    fn test_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = root_at(&dir, "/work");
        let err = root.resolve("../../etc/passwd", Operation::DownloadFile).unwrap_err();
        assert_eq!(err.kind(), SandboxErrorKind::Provider);
        assert!(err.to_string().contains("escapes"));

        assert!(root.resolve("/../x", Operation::DownloadFile).is_err());
        assert!(SandboxRoot::new(dir.path().join("root"), "../outside").is_err());
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let root = root_at(&dir, "/work");
        root.materialize().await.unwrap();

        root.write("nested/deep/file.txt", b"hello").await.unwrap();
        root.write("/top.bin", &[0xff, 0x00, 0xfe]).await.unwrap();

        assert_eq!(root.read("nested/deep/file.txt").await.unwrap(), b"hello");
        assert_eq!(root.read("/top.bin").await.unwrap(), vec![0xff, 0x00, 0xfe]);

        let entries = root.list("/").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["top.bin", "work"]);

        let top = &entries[0];
        assert_eq!(top.path, "/top.bin");
        assert_eq!(top.size_bytes, 3);
        assert!(top.is_file());
        assert!(top.modified_time.is_some());
        assert_eq!(top.permissions.as_ref().map(String::len), Some(3));

        let work = root.list(".").await.unwrap();
        assert_eq!(work.len(), 1);
        assert_eq!(work[0].path, "/work/nested");
        assert!(work[0].is_directory);
    }

    #[tokio::test]
    async fn test_missing_paths_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = root_at(&dir, HOME_DIR);
        root.materialize().await.unwrap();

        let err = root.read("missing.txt").await.unwrap_err();
        assert_eq!(err.kind(), SandboxErrorKind::NotFound);
        assert!(err.to_string().contains("'/missing.txt' not found"));

        let err = root.list("/no/such/dir").await.unwrap_err();
        assert_eq!(err.kind(), SandboxErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_read_directory_and_list_file_fail() {
        let dir = tempfile::tempdir().unwrap();
        let root = root_at(&dir, HOME_DIR);
        root.materialize().await.unwrap();
        root.write("d/f.txt", b"x").await.unwrap();

        assert!(root.read("d").await.is_err());
        assert!(root.list("d/f.txt").await.is_err());
        assert!(root.write("/", b"x").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_reports_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = root_at(&dir, HOME_DIR);
        root.materialize().await.unwrap();
        root.write("script.sh", b"#!/bin/sh\n").await.unwrap();
        std::fs::set_permissions(
            root.root().join("script.sh"),
            std::fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let entries = root.list("/").await.unwrap();
        assert_eq!(entries[0].permissions.as_deref(), Some("755"));
    }
}
