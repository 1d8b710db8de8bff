//! Value types shared by the façade and every provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a sandbox session.
///
/// `Creating → Running → {Stopped | Error}`. `Unknown` is only reported for
/// sessions nobody has a record of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Creating,
    Running,
    Stopped,
    Error,
    Unknown,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running one command in a sandbox.
///
/// A non-zero exit code is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The command as submitted.
    pub command: String,
    /// Decoded standard output (invalid UTF-8 replaced).
    pub stdout: String,
    /// Decoded standard error (invalid UTF-8 replaced).
    pub stderr: String,
    /// Process exit code; `-1` when the process was killed by a signal.
    pub return_code: i32,
    /// Wall-clock duration of the command.
    pub duration: Duration,
    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.return_code == 0
    }

    /// Whether the command exited with a non-zero code.
    pub fn failed(&self) -> bool {
        !self.success()
    }

    /// Duration in fractional seconds.
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    /// Stdout and stderr joined by a newline, trimmed.
    pub fn output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr).trim().to_string()
    }
}

/// One entry of a directory listing, captured at listing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name without directories.
    pub name: String,
    /// Path inside the sandbox, usable with download/list calls.
    pub path: String,
    /// Size in bytes (0 for directories on some backends).
    pub size_bytes: u64,
    pub is_directory: bool,
    pub modified_time: Option<DateTime<Utc>>,
    /// Permission bits in octal, e.g. `"644"`.
    pub permissions: Option<String>,
}

impl FileEntry {
    pub fn is_file(&self) -> bool {
        !self.is_directory
    }
}

/// Content to upload into a sandbox.
///
/// Text is written UTF-8 encoded; binary is written byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.into_bytes(),
            Self::Binary(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}

impl From<&str> for FileContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FileContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

impl From<&[u8]> for FileContent {
    fn from(b: &[u8]) -> Self {
        Self::Binary(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for FileContent {
    fn from(b: &[u8; N]) -> Self {
        Self::Binary(b.to_vec())
    }
}

/// A command to execute, with optional per-call overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    /// Shell command line.
    pub command: String,
    /// Per-call timeout; falls back to the session configuration.
    pub timeout: Option<Duration>,
    /// Directory to run in; falls back to the session working directory.
    pub working_dir: Option<String>,
    /// Extra environment variables, layered over the configured ones.
    pub env: BTreeMap<String, String>,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

impl From<&str> for ExecRequest {
    fn from(command: &str) -> Self {
        Self::new(command)
    }
}

impl From<String> for ExecRequest {
    fn from(command: String) -> Self {
        Self::new(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: i32) -> ExecutionResult {
        ExecutionResult {
            command: "true".into(),
            stdout: "out\n".into(),
            stderr: String::new(),
            return_code: code,
            duration: Duration::from_millis(1500),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_success_derived_from_return_code() {
        assert!(result(0).success());
        assert!(!result(0).failed());
        assert!(!result(7).success());
        assert!(result(7).failed());
    }

    #[test]
    fn test_duration_secs() {
        assert!((result(0).duration_secs() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_output_joins_streams() {
        let mut r = result(1);
        r.stderr = "err".into();
        assert_eq!(r.output(), "out\n\nerr");
        assert_eq!(result(0).output(), "out");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SandboxStatus::Running.to_string(), "running");
        assert_eq!(SandboxStatus::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_file_content_conversions() {
        let text: FileContent = "hi".into();
        assert!(!text.is_binary());
        assert_eq!(text.as_bytes(), b"hi");

        let bin: FileContent = vec![0xff, 0x00, 0xfe].into();
        assert!(bin.is_binary());
        assert_eq!(bin.len(), 3);
        assert_eq!(bin.into_bytes(), vec![0xff, 0x00, 0xfe]);
    }

    #[test]
    fn test_exec_request_builder() {
        let req = ExecRequest::new("env")
            .timeout(Duration::from_secs(5))
            .working_dir("/tmp")
            .env("A", "1")
            .envs([("B", "2")]);
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));
        assert_eq!(req.working_dir.as_deref(), Some("/tmp"));
        assert_eq!(req.env.len(), 2);
    }
}
