//! Integration tests for local snapshots and process handling.
//!
//! Run with: `cargo test -p sandlot-local`

use sandlot_core::{
    ErrorKind, ExecRequest, ProviderConfig, SandboxConfig, SandboxProvider, SessionHandle,
};
use sandlot_local::LocalProvider;
use std::time::{Duration, Instant};

async fn open(dir: &tempfile::TempDir) -> (LocalProvider, SessionHandle) {
    let provider = LocalProvider::new(
        &ProviderConfig::new("local")
            .with_value("base_dir", dir.path().to_string_lossy().into_owned()),
    )
    .expect("Failed to create provider");
    let session = provider
        .create_session(SandboxConfig::default())
        .await
        .expect("Failed to create session");
    (provider, session)
}

async fn read(session: &SessionHandle, path: &str) -> String {
    String::from_utf8(session.download_file(path).await.expect("download failed")).unwrap()
}

/// Snapshot, mutate through commands and uploads, restore.
#[tokio::test]
async fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, session) = open(&dir).await;

    session.upload_file("a.txt", "A".into()).await.unwrap();
    session.upload_file("nested/b.txt", "B".into()).await.unwrap();
    let snap = session.create_snapshot().await.unwrap();

    session
        .execute(ExecRequest::new("rm -r nested && echo changed > a.txt && touch extra"))
        .await
        .unwrap();
    session.restore_snapshot(&snap).await.unwrap();

    assert_eq!(read(&session, "a.txt").await, "A");
    assert_eq!(read(&session, "nested/b.txt").await, "B");
    let names: Vec<_> = session
        .list_files("/")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a.txt", "nested"]);

    provider.cleanup().await;
}

/// Links come back as links, including dangling ones and links out of the tree.
#[tokio::test]
async fn test_snapshot_keeps_symlinks() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, session) = open(&dir).await;

    session.upload_file("target.txt", "T".into()).await.unwrap();
    session
        .execute(ExecRequest::new(
            "ln -s target.txt link && ln -s does-not-exist dangling && ln -s / host",
        ))
        .await
        .unwrap();
    let snap = session.create_snapshot().await.unwrap();

    session
        .execute(ExecRequest::new("rm link dangling host && echo X > target.txt"))
        .await
        .unwrap();
    session.restore_snapshot(&snap).await.unwrap();

    let check = session
        .execute(ExecRequest::new(
            "test -L link && test -L dangling && test -L host && readlink link dangling host",
        ))
        .await
        .unwrap();
    assert_eq!(check.return_code, 0, "stderr: {}", check.stderr);
    assert_eq!(check.stdout, "target.txt\ndoes-not-exist\n/\n");
    assert_eq!(read(&session, "link").await, "T");

    provider.cleanup().await;
}

/// s1 at state A, s2 at state B: restoring s1, s2, s1 gives A, B, A.
#[tokio::test]
async fn test_multiple_independent_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, session) = open(&dir).await;

    session.upload_file("state.txt", "A".into()).await.unwrap();
    let s1 = session.create_snapshot().await.unwrap();
    session.upload_file("state.txt", "B".into()).await.unwrap();
    session.upload_file("only-b.txt", "B".into()).await.unwrap();
    let s2 = session.create_snapshot().await.unwrap();

    for (snap, expected, has_b) in [(&s1, "A", false), (&s2, "B", true), (&s1, "A", false)] {
        session.restore_snapshot(snap).await.unwrap();
        assert_eq!(read(&session, "state.txt").await, expected);
        assert_eq!(session.download_file("only-b.txt").await.is_ok(), has_b);
    }

    provider.cleanup().await;
}

#[tokio::test]
async fn test_unknown_snapshot_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, session) = open(&dir).await;
    session.create_snapshot().await.unwrap();

    let err = session.restore_snapshot("snap-never-created").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    provider.cleanup().await;
}

/// Snapshot ids are scoped to the session that created them.
#[tokio::test]
async fn test_snapshot_ids_do_not_cross_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, a) = open(&dir).await;
    let b = provider.create_session(SandboxConfig::default()).await.unwrap();

    let snap = a.create_snapshot().await.unwrap();
    let err = b.restore_snapshot(&snap).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    provider.cleanup().await;
}

#[tokio::test]
async fn test_timeout_returns_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, session) = open(&dir).await;

    let start = Instant::now();
    let err = session
        .execute(ExecRequest::new("sleep 10").timeout(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.to_string().contains("1s"));
    assert!(start.elapsed() < Duration::from_secs(5));

    // The session is still usable afterwards
    let result = session.execute(ExecRequest::new("echo ok")).await.unwrap();
    assert_eq!(result.stdout, "ok\n");

    provider.cleanup().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_timed_out_process_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, session) = open(&dir).await;

    // Record the shell's pid, then hang
    let err = session
        .execute(ExecRequest::new("echo $$ > pid; exec sleep 30").timeout(Duration::from_millis(500)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let pid = read(&session, "pid").await;
    let pid = pid.trim();
    let alive = std::process::Command::new("kill")
        .args(["-0", pid])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    assert!(!alive, "process {pid} survived the timeout");

    provider.cleanup().await;
}

#[tokio::test]
async fn test_binary_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (provider, session) = open(&dir).await;

    let bytes: Vec<u8> = (0..=255u8).rev().collect();
    session
        .upload_file("/bin/blob.dat", bytes.clone().into())
        .await
        .unwrap();
    assert_eq!(session.download_file("/bin/blob.dat").await.unwrap(), bytes);

    let listing = session.list_files("/bin").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].size_bytes, 256);
    assert_eq!(listing[0].path, "/bin/blob.dat");

    provider.cleanup().await;
}
