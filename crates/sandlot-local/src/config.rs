//! Settings for the local provider, read from its [`ProviderConfig`].

use sandlot_core::{ProviderConfig, Result, SandboxError};
use std::path::PathBuf;

/// Default per-stream output cap (10 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default shell used to interpret commands.
pub const DEFAULT_SHELL: &str = "sh";

/// Local provider settings.
///
/// | key                | default           |
/// |--------------------|-------------------|
/// | `base_dir`         | system temp dir   |
/// | `max_output_bytes` | 10 MiB            |
/// | `shell`            | `sh`              |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSettings {
    /// Parent directory of every session directory.
    pub base_dir: PathBuf,
    /// Per-stream capture cap; output beyond it is truncated.
    pub max_output_bytes: usize,
    /// Shell invoked as `<shell> -c <command>`.
    pub shell: String,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            shell: DEFAULT_SHELL.to_string(),
        }
    }
}

impl LocalSettings {
    /// Read settings from a provider configuration, falling back to defaults.
    pub fn from_provider_config(config: &ProviderConfig) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(dir) = config.get_path("base_dir") {
            settings.base_dir = dir;
        } else if config.contains("base_dir") {
            return Err(SandboxError::config("local: 'base_dir' must be a path"));
        }

        if config.contains("max_output_bytes") {
            let max = config.get_u64("max_output_bytes").ok_or_else(|| {
                SandboxError::config("local: 'max_output_bytes' must be a non-negative integer")
            })?;
            settings.max_output_bytes = usize::try_from(max).map_err(|_| {
                SandboxError::config(format!("local: 'max_output_bytes' is too large: {max}"))
            })?;
        }

        if let Some(shell) = config.get_str("shell") {
            if shell.trim().is_empty() {
                return Err(SandboxError::config("local: 'shell' must not be empty"));
            }
            settings.shell = shell.to_string();
        }

        Ok(settings)
    }
}
