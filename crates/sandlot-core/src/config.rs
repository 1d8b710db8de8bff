//! Sandbox and provider configuration types.

use crate::error::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Working-directory sentinel meaning "the sandbox's home".
pub const HOME_DIR: &str = "~";

/// Default per-command timeout (5 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for creating a sandbox session.
///
/// Handed to a provider by value; the session keeps its own copy, so later
/// edits by the caller never leak into a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Default timeout for commands (default: 300s). `None` disables it.
    #[serde(with = "opt_secs")]
    pub timeout: Option<Duration>,
    /// Memory hint, backend-interpreted (e.g. `"2GB"`).
    pub memory_limit: Option<String>,
    /// CPU hint in cores, backend-interpreted.
    pub cpu_limit: Option<f64>,
    /// Backend image or template identifier.
    pub image: Option<String>,
    /// Working directory inside the sandbox (default: [`HOME_DIR`]).
    pub working_directory: String,
    /// Environment variables for every command.
    #[serde(alias = "environment")]
    pub environment_vars: BTreeMap<String, String>,
    /// Close the session when the last façade handle is dropped.
    pub auto_cleanup: bool,
    /// Hint for backends that can keep instances warm after close.
    pub keep_alive: bool,
    /// Open settings interpreted by the backend.
    #[serde(alias = "provider_config")]
    pub provider_specific: BTreeMap<String, Value>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            memory_limit: None,
            cpu_limit: None,
            image: None,
            working_directory: HOME_DIR.to_string(),
            environment_vars: BTreeMap::new(),
            auto_cleanup: true,
            keep_alive: false,
            provider_specific: BTreeMap::new(),
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.working_directory.trim().is_empty() {
            return Err(SandboxError::config("working_directory must not be empty"));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(SandboxError::config(
                "timeout must be > 0 (omit it to disable the timeout)",
            ));
        }
        if let Some(cpu) = self.cpu_limit {
            if !cpu.is_finite() || cpu <= 0.0 {
                return Err(SandboxError::config(format!(
                    "cpu_limit must be a positive number, got {cpu}"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for SandboxConfig.
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Set the default command timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Disable the default command timeout.
    pub fn no_timeout(mut self) -> Self {
        self.config.timeout = None;
        self
    }

    pub fn memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.config.memory_limit = Some(limit.into());
        self
    }

    pub fn cpu_limit(mut self, cores: f64) -> Self {
        self.config.cpu_limit = Some(cores);
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = Some(image.into());
        self
    }

    /// Set the working directory inside the sandbox.
    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.config.working_directory = dir.into();
        self
    }

    /// Add an environment variable for every command.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.environment_vars.insert(key.into(), value.into());
        self
    }

    pub fn auto_cleanup(mut self, enabled: bool) -> Self {
        self.config.auto_cleanup = enabled;
        self
    }

    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.config.keep_alive = enabled;
        self
    }

    /// Set a backend-specific option.
    pub fn provider_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.provider_specific.insert(key.into(), value.into());
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<SandboxConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Settings for one provider, resolved from defaults, file and environment.
///
/// Read-only once handed to a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    name: String,
    values: BTreeMap<String, Value>,
}

impl ProviderConfig {
    /// Create an empty configuration for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub(crate) fn from_values(name: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Return a copy with `key` set to `value`.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Provider name this configuration belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Numeric value; numeric strings (as set from the environment) are accepted.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean value; `"true"/"1"/"false"/"0"` strings are accepted.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    /// A required string setting.
    ///
    /// The error names the environment variable bound to the key, if any.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key).ok_or_else(|| {
            let hint = match crate::settings::env_var_for(&self.name, key) {
                Some(var) => format!("set {var} or providers.{}.{key} in the config file", self.name),
                None => format!("set providers.{}.{key} in the config file", self.name),
            };
            SandboxError::config(format!(
                "provider '{}' requires setting '{key}' ({hint})",
                self.name
            ))
        })
    }
}

/// Serde adapter for `Option<Duration>` expressed in (fractional) seconds.
mod opt_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => Err(D::Error::custom(format!(
                "timeout must be a positive number of seconds, got {secs}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.working_directory, HOME_DIR);
        assert!(config.auto_cleanup);
        assert!(!config.keep_alive);
        assert!(config.environment_vars.is_empty());
    }

    #[test]
    fn test_builder_success() {
        let config = SandboxConfig::builder()
            .timeout(Duration::from_secs(30))
            .working_directory("/workspace")
            .env("FOO", "bar")
            .cpu_limit(2.0)
            .memory_limit("2GB")
            .provider_option("template", "python")
            .build()
            .expect("should build successfully");

        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.working_directory, "/workspace");
        assert_eq!(config.environment_vars.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(config.provider_specific.get("template"), Some(&Value::from("python")));
    }

    #[test]
    fn test_builder_validation_empty_working_dir() {
        assert!(SandboxConfig::builder().working_directory("  ").build().is_err());
    }

    #[test]
    fn test_builder_validation_cpu_limit() {
        assert!(SandboxConfig::builder().cpu_limit(0.0).build().is_err());
        assert!(SandboxConfig::builder().cpu_limit(f64::NAN).build().is_err());
    }

    #[test]
    fn test_builder_validation_zero_timeout() {
        assert!(SandboxConfig::builder().timeout(Duration::ZERO).build().is_err());
        let config = SandboxConfig::builder().no_timeout().build().unwrap();
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_clones_do_not_share_maps() {
        let original = SandboxConfig::builder().env("A", "1").build().unwrap();
        let mut copy = original.clone();
        copy.environment_vars.insert("B".into(), "2".into());
        copy.provider_specific.insert("k".into(), Value::Null);

        assert_eq!(original.environment_vars.len(), 1);
        assert!(original.provider_specific.is_empty());
    }

    #[test]
    fn test_deserialize_timeout_seconds() {
        let config: SandboxConfig =
            serde_yaml::from_str("timeout: 2.5\nworking_directory: /work\n").unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.working_directory, "/work");
        // Unspecified fields keep their defaults
        assert!(config.auto_cleanup);

        let config: SandboxConfig = serde_yaml::from_str("timeout: null\n").unwrap();
        assert!(config.timeout.is_none());

        assert!(serde_yaml::from_str::<SandboxConfig>("timeout: -1\n").is_err());
    }

    #[test]
    fn test_provider_config_accessors() {
        let config = ProviderConfig::new("local")
            .with_value("base_dir", "/tmp/x")
            .with_value("max_output_bytes", "2048")
            .with_value("verbose", true);

        assert_eq!(config.name(), "local");
        assert_eq!(config.get_path("base_dir"), Some(PathBuf::from("/tmp/x")));
        assert_eq!(config.get_u64("max_output_bytes"), Some(2048));
        assert_eq!(config.get_bool("verbose"), Some(true));
        assert_eq!(config.get_str("missing"), None);
    }

    #[test]
    fn test_require_str_names_env_var() {
        let err = ProviderConfig::new("e2b").require_str("api_key").unwrap_err();
        assert!(err.to_string().contains("E2B_API_KEY"));

        let err = ProviderConfig::new("custom").require_str("token").unwrap_err();
        assert!(err.to_string().contains("providers.custom.token"));
    }
}
