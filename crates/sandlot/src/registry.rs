//! Provider registry: provider name → constructor.
//!
//! Constructors run lazily, on selection. A backend whose implementation is
//! missing only fails when it is asked for, never when the registry is
//! built or another provider is resolved.

use crate::{ProviderConfig, Result, SandboxError, SandboxProvider, Settings};
use sandlot_local::LocalProvider;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Constructs a provider from its configuration block.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn SandboxProvider>> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    factory: Option<ProviderFactory>,
    description: String,
    /// Configuration keys that must be set before the provider is usable.
    required: Vec<&'static str>,
}

/// Known backends that ship without an implementation in this crate.
const EXTERNAL_BACKENDS: &[(&str, &str, &[&str])] = &[
    ("e2b", "E2B cloud sandboxes", &["api_key"]),
    ("modal", "Modal cloud compute", &["token_id", "token_secret"]),
    ("daytona", "Daytona development environments", &["api_key"]),
    ("morph", "Morph cloud sandboxes", &["api_key"]),
    ("docker", "Docker containers", &[]),
];

/// Availability report for one provider, built without constructing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    /// Implementation present and configuration complete.
    pub available: bool,
    /// An implementation is registered.
    pub dependencies_installed: bool,
    /// All required settings are present.
    pub configured: bool,
    /// Environment variables (or config keys) still to be set.
    pub missing_config: Vec<String>,
    /// How to make the provider available, when it is not.
    pub install_hint: Option<String>,
    pub description: String,
    pub error_message: Option<String>,
}

/// Maps provider names to constructors.
///
/// [`ProviderRegistry::new`] knows `local` plus the external backend names
/// `e2b`, `modal`, `daytona`, `morph` and `docker`; the latter fail with
/// [`SandboxError::ProviderUnavailable`] until an implementation is
/// [registered](ProviderRegistry::register).
#[derive(Clone)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, Entry>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// A registry with the built-in providers.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        let local: ProviderFactory = Arc::new(|config: &ProviderConfig| {
            let provider: Arc<dyn SandboxProvider> = Arc::new(LocalProvider::new(config)?);
            Ok(provider)
        });
        registry.entries.insert(
            sandlot_local::PROVIDER_NAME.to_string(),
            Entry {
                factory: Some(local),
                description: "Local subprocess sandboxes".to_string(),
                required: Vec::new(),
            },
        );
        for (name, description, required) in EXTERNAL_BACKENDS {
            registry.entries.insert(
                name.to_string(),
                Entry {
                    factory: None,
                    description: description.to_string(),
                    required: required.to_vec(),
                },
            );
        }
        registry
    }

    /// A registry with no providers at all.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Install or replace the constructor for `name`.
    ///
    /// Replacing a built-in keeps its description and required settings.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn SandboxProvider>> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(provider = %name, "Registering provider");
        let factory: ProviderFactory = Arc::new(factory);
        match self.entries.get_mut(&name) {
            Some(entry) => entry.factory = Some(factory),
            None => {
                let description = format!("{name} (registered)");
                self.entries.insert(
                    name,
                    Entry {
                        factory: Some(factory),
                        description,
                        required: Vec::new(),
                    },
                );
            }
        }
        self
    }

    /// Register an already-constructed provider under its own name.
    pub fn register_instance(&mut self, provider: Arc<dyn SandboxProvider>) -> &mut Self {
        let name = provider.name().to_string();
        self.register(name, move |_| Ok(provider.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Construct the provider called `name` with its configuration from `settings`.
    pub fn create(&self, name: &str, settings: &Settings) -> Result<Arc<dyn SandboxProvider>> {
        let entry = self.entries.get(name).ok_or_else(|| {
            SandboxError::config(format!(
                "unknown provider '{name}' (known providers: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;

        let factory = entry.factory.as_ref().ok_or_else(|| {
            tracing::error!(provider = %name, "Provider selected but not available");
            SandboxError::ProviderUnavailable {
                provider: name.to_string(),
                dependency: format!("a {name} backend implementation"),
                hint: install_hint(name),
            }
        })?;

        let config = settings.provider_config(name);
        tracing::debug!(
            provider = %name,
            keys = ?config.keys().collect::<Vec<_>>(),
            "Constructing provider"
        );
        factory(&config)
    }

    /// Report availability of `name` without constructing it.
    pub fn info(&self, name: &str, settings: &Settings) -> ProviderInfo {
        let Some(entry) = self.entries.get(name) else {
            return ProviderInfo {
                name: name.to_string(),
                available: false,
                dependencies_installed: false,
                configured: false,
                missing_config: Vec::new(),
                install_hint: None,
                description: String::new(),
                error_message: Some(format!("unknown provider '{name}'")),
            };
        };

        let config = settings.provider_config(name);
        let missing_config: Vec<String> = entry
            .required
            .iter()
            .filter(|key| config.get_str(key).map_or(true, str::is_empty))
            .map(|key| match crate::env_var_for(name, key) {
                Some(var) => var.to_string(),
                None => format!("providers.{name}.{key}"),
            })
            .collect();

        let dependencies_installed = entry.factory.is_some();
        let configured = missing_config.is_empty();
        ProviderInfo {
            name: name.to_string(),
            available: dependencies_installed && configured,
            dependencies_installed,
            configured,
            missing_config,
            install_hint: (!dependencies_installed).then(|| install_hint(name)),
            description: entry.description.clone(),
            error_message: None,
        }
    }

    /// Availability of every registered provider, sorted by name.
    pub fn info_all(&self, settings: &Settings) -> Vec<ProviderInfo> {
        self.names().map(|name| self.info(name, settings)).collect()
    }

    /// Names of providers that are installed and configured.
    pub fn available(&self, settings: &Settings) -> Vec<String> {
        self.info_all(settings)
            .into_iter()
            .filter(|info| info.available)
            .map(|info| info.name)
            .collect()
    }
}

fn install_hint(name: &str) -> String {
    format!("register an implementation with ProviderRegistry::register(\"{name}\", ...)")
}
