//! Configuration resolution: defaults, config file, environment.
//!
//! Precedence, lowest to highest:
//!
//! 1. Built-in defaults (`default_provider = "local"`, [`SandboxConfig::default`])
//! 2. The first config file found on the search path (or an explicit path)
//! 3. Environment variables ([`ENV_DEFAULT_PROVIDER`] and [`ENV_BINDINGS`])
//! 4. Call-site overrides (`with_*` methods)
//!
//! # Config file
//!
//! ```yaml
//! default_provider: local
//! providers:
//!   local:
//!     base_dir: /var/tmp/sandlot
//!   e2b:
//!     template: python
//! sandbox_defaults:
//!   timeout: 60
//!   working_directory: /workspace
//! ```

use crate::config::{ProviderConfig, SandboxConfig};
use crate::error::{Result, SandboxError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Provider used when neither the file nor the environment names one.
pub const BUILTIN_DEFAULT_PROVIDER: &str = "local";

/// Environment variable overriding the default provider.
pub const ENV_DEFAULT_PROVIDER: &str = "SANDLOT_DEFAULT_PROVIDER";

/// Config file names tried in order; the first existing file wins.
pub const CONFIG_FILE_NAMES: &[&str] = &[
    "sandlot.yaml",
    "sandlot.yml",
    ".sandlot.yaml",
    ".sandlot.yml",
    "~/.sandlot.yaml",
    "~/.sandlot.yml",
];

/// Maps an environment variable onto a key of a provider's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvBinding {
    pub provider: &'static str,
    pub key: &'static str,
    pub var: &'static str,
}

/// Per-provider environment bindings. Environment values win over the file.
pub const ENV_BINDINGS: &[EnvBinding] = &[
    EnvBinding { provider: "local", key: "base_dir", var: "SANDLOT_LOCAL_BASE_DIR" },
    EnvBinding { provider: "e2b", key: "api_key", var: "E2B_API_KEY" },
    EnvBinding { provider: "e2b", key: "template", var: "E2B_TEMPLATE" },
    EnvBinding { provider: "modal", key: "token_id", var: "MODAL_TOKEN_ID" },
    EnvBinding { provider: "modal", key: "token_secret", var: "MODAL_TOKEN_SECRET" },
    EnvBinding { provider: "daytona", key: "api_key", var: "DAYTONA_API_KEY" },
    EnvBinding { provider: "morph", key: "api_key", var: "MORPH_API_KEY" },
];

/// Environment variable bound to `provider`'s `key`, if any.
pub fn env_var_for(provider: &str, key: &str) -> Option<&'static str> {
    ENV_BINDINGS
        .iter()
        .find(|b| b.provider == provider && b.key == key)
        .map(|b| b.var)
}

/// All bindings for one provider.
pub fn env_bindings_for(provider: &str) -> impl Iterator<Item = &'static EnvBinding> + '_ {
    ENV_BINDINGS.iter().filter(move |b| b.provider == provider)
}

/// On-disk shape of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    default_provider: Option<String>,
    providers: BTreeMap<String, BTreeMap<String, Value>>,
    sandbox_defaults: SandboxConfig,
}

/// The effective configuration: default provider, sandbox defaults and
/// per-provider settings.
#[derive(Debug, Clone)]
pub struct Settings {
    default_provider: String,
    sandbox_defaults: SandboxConfig,
    providers: BTreeMap<String, ProviderConfig>,
    source: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_provider: BUILTIN_DEFAULT_PROVIDER.to_string(),
            sandbox_defaults: SandboxConfig::default(),
            providers: BTreeMap::new(),
            source: None,
        }
    }
}

static GLOBAL: OnceLock<Settings> = OnceLock::new();

impl Settings {
    /// Resolve settings from `.env`, the config search path and the process environment.
    pub fn resolve() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::load_with(None, |key| std::env::var(key).ok())
    }

    /// Resolve settings from an explicit file plus the process environment.
    ///
    /// Unlike the search path, a missing explicit file is an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(Some(path.as_ref()), |key| std::env::var(key).ok())
    }

    /// Resolve settings with an injected environment lookup.
    ///
    /// With `path = None` the default search path is used; no file found
    /// means defaults apply.
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (file, source) = match path {
            Some(p) => (read_settings_file(p, true)?, Some(p.to_path_buf())),
            None => match first_existing(search_paths()) {
                Some(p) => (read_settings_file(&p, false)?, Some(p)),
                None => {
                    tracing::debug!("No config file found, using defaults");
                    (SettingsFile::default(), None)
                }
            },
        };
        Ok(Self::from_parts(file, source, env))
    }

    /// Process-wide settings, resolved on first use.
    pub fn global() -> Result<&'static Settings> {
        if let Some(settings) = GLOBAL.get() {
            return Ok(settings);
        }
        let resolved = Self::resolve()?;
        Ok(GLOBAL.get_or_init(|| resolved))
    }

    fn from_parts<F>(file: SettingsFile, source: Option<PathBuf>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).filter(|v| !v.is_empty());

        let default_provider = lookup(ENV_DEFAULT_PROVIDER)
            .or(file.default_provider)
            .unwrap_or_else(|| BUILTIN_DEFAULT_PROVIDER.to_string());

        let mut providers: BTreeMap<String, ProviderConfig> = file
            .providers
            .into_iter()
            .map(|(name, values)| (name.clone(), ProviderConfig::from_values(name, values)))
            .collect();

        for binding in ENV_BINDINGS {
            if let Some(value) = lookup(binding.var) {
                tracing::trace!(provider = binding.provider, key = binding.key, var = binding.var, "Applying environment override");
                providers
                    .entry(binding.provider.to_string())
                    .or_insert_with(|| ProviderConfig::new(binding.provider))
                    .insert(binding.key, value);
            }
        }

        tracing::debug!(
            default_provider = %default_provider,
            providers = providers.len(),
            source = ?source,
            "Settings resolved"
        );

        Self {
            default_provider,
            sandbox_defaults: file.sandbox_defaults,
            providers,
            source,
        }
    }

    /// Name of the provider used when none is given explicitly.
    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Sandbox configuration used when none is given explicitly.
    pub fn sandbox_defaults(&self) -> &SandboxConfig {
        &self.sandbox_defaults
    }

    /// Configuration for `name`; empty (never an error) for unknown names.
    pub fn provider_config(&self, name: &str) -> ProviderConfig {
        self.providers
            .get(name)
            .cloned()
            .unwrap_or_else(|| ProviderConfig::new(name))
    }

    /// Names of providers that have any configuration.
    pub fn configured_providers(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// The config file these settings were read from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Override the default provider.
    pub fn with_default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = name.into();
        self
    }

    /// Override the sandbox defaults.
    pub fn with_sandbox_defaults(mut self, config: SandboxConfig) -> Self {
        self.sandbox_defaults = config;
        self
    }

    /// Override one setting of one provider.
    pub fn with_provider_value(
        mut self,
        provider: &str,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.providers
            .entry(provider.to_string())
            .or_insert_with(|| ProviderConfig::new(provider))
            .insert(key, value);
        self
    }
}

/// The default config search path, with `~` expanded.
pub fn search_paths() -> Vec<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .filter_map(|name| match name.strip_prefix("~/") {
            Some(rest) => home::home_dir().map(|home| home.join(rest)),
            None => Some(PathBuf::from(name)),
        })
        .collect()
}

fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|p| p.is_file())
}

fn read_settings_file(path: &Path, required: bool) -> Result<SettingsFile> {
    tracing::debug!(path = %path.display(), "Reading config file");
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(SettingsFile::default());
        }
        Err(e) => {
            return Err(SandboxError::config_with(
                format!("failed to read config file {}", path.display()),
                e,
            ));
        }
    };

    if contents.trim().is_empty() {
        return Ok(SettingsFile::default());
    }

    serde_yaml::from_str(&contents).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Config file is invalid");
        SandboxError::config_with(format!("failed to parse config file {}", path.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("sandlot.yaml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let settings = Settings::from_parts(SettingsFile::default(), None, env_from(&[]));
        assert_eq!(settings.default_provider(), "local");
        assert_eq!(settings.sandbox_defaults(), &SandboxConfig::default());
        assert!(settings.source().is_none());
    }

    #[test]
    fn test_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
default_provider: e2b
providers:
  e2b:
    template: python
  local:
    base_dir: /var/tmp/sandlot
sandbox_defaults:
  timeout: 60
  working_directory: /workspace
  auto_cleanup: false
  environment_vars:
    FOO: bar
"#,
        );

        let settings = Settings::load_with(Some(&path), env_from(&[])).unwrap();
        assert_eq!(settings.default_provider(), "e2b");
        assert_eq!(settings.source(), Some(path.as_path()));
        assert_eq!(settings.provider_config("e2b").get_str("template"), Some("python"));
        assert_eq!(
            settings.provider_config("local").get_str("base_dir"),
            Some("/var/tmp/sandlot")
        );

        let defaults = settings.sandbox_defaults();
        assert_eq!(defaults.timeout, Some(Duration::from_secs(60)));
        assert_eq!(defaults.working_directory, "/workspace");
        assert!(!defaults.auto_cleanup);
        assert_eq!(defaults.environment_vars.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn test_default_provider_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "default_provider: fileProvider\n");

        // Environment wins over the file
        let settings =
            Settings::load_with(Some(&path), env_from(&[(ENV_DEFAULT_PROVIDER, "envProvider")]))
                .unwrap();
        assert_eq!(settings.default_provider(), "envProvider");

        // Without the override the file applies
        let settings = Settings::load_with(Some(&path), env_from(&[])).unwrap();
        assert_eq!(settings.default_provider(), "fileProvider");

        // Without either the built-in default applies
        let settings = Settings::from_parts(SettingsFile::default(), None, env_from(&[]));
        assert_eq!(settings.default_provider(), BUILTIN_DEFAULT_PROVIDER);
    }

    #[test]
    fn test_env_overrides_provider_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "providers:\n  e2b:\n    api_key: from-file\n    template: base\n",
        );
        let settings = Settings::load_with(
            Some(&path),
            env_from(&[("E2B_API_KEY", "from-env"), ("MODAL_TOKEN_ID", "tok")]),
        )
        .unwrap();

        let e2b = settings.provider_config("e2b");
        assert_eq!(e2b.get_str("api_key"), Some("from-env"));
        assert_eq!(e2b.get_str("template"), Some("base"));
        assert_eq!(settings.provider_config("modal").get_str("token_id"), Some("tok"));
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let settings = Settings::from_parts(
            SettingsFile::default(),
            None,
            env_from(&[(ENV_DEFAULT_PROVIDER, ""), ("E2B_API_KEY", "")]),
        );
        assert_eq!(settings.default_provider(), "local");
        assert!(settings.provider_config("e2b").is_empty());
    }

    #[test]
    fn test_unknown_provider_yields_empty_config() {
        let settings = Settings::default();
        let config = settings.provider_config("future-backend");
        assert_eq!(config.name(), "future-backend");
        assert!(config.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "   \n");
        let settings = Settings::load_with(Some(&path), env_from(&[])).unwrap();
        assert_eq!(settings.default_provider(), "local");
    }

    #[test]
    fn test_invalid_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "default_provider: [unclosed\n");
        let err = Settings::load_with(Some(&path), env_from(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn test_unknown_top_level_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "default_providr: local\n");
        let err = Settings::load_with(Some(&path), env_from(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let err = Settings::load_with(Some(&missing), env_from(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_first_existing_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.yaml");
        let second = dir.path().join("b.yaml");
        std::fs::write(&second, "x: 1").unwrap();
        assert_eq!(first_existing(vec![first.clone(), second.clone()]), Some(second.clone()));

        std::fs::write(&first, "x: 1").unwrap();
        assert_eq!(first_existing(vec![first.clone(), second]), Some(first));
    }

    #[test]
    fn test_search_paths_expand_home() {
        let paths = search_paths();
        assert_eq!(paths[0], PathBuf::from("sandlot.yaml"));
        assert!(paths.iter().all(|p| !p.to_string_lossy().starts_with('~')));
    }

    #[test]
    fn test_call_site_overrides() {
        let settings = Settings::default()
            .with_default_provider("docker")
            .with_provider_value("local", "shell", "bash")
            .with_sandbox_defaults(SandboxConfig::builder().no_timeout().build().unwrap());

        assert_eq!(settings.default_provider(), "docker");
        assert_eq!(settings.provider_config("local").get_str("shell"), Some("bash"));
        assert!(settings.sandbox_defaults().timeout.is_none());
        assert_eq!(settings.configured_providers().collect::<Vec<_>>(), vec!["local"]);
    }

    #[test]
    fn test_env_var_lookup() {
        assert_eq!(env_var_for("e2b", "api_key"), Some("E2B_API_KEY"));
        assert_eq!(env_var_for("local", "api_key"), None);
        assert_eq!(env_bindings_for("modal").count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_configuration_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "default_provider: local\n");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Root ignores file permissions; nothing to check there
        if std::fs::read_to_string(&path).is_ok() {
            return;
        }
        let err = Settings::load_with(Some(&path), env_from(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("failed to read config file"));
    }
}
