//! Tracing subscriber setup for applications using sandlot.
//!
//! Libraries never install a subscriber on their own; call [`init`] once
//! from `main` (or a test) to see sandlot's logs on stderr.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "sandlot=info";

static INIT: OnceLock<()> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {source}")]
    InvalidFilter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the stderr subscriber with [`DEFAULT_DIRECTIVE`].
///
/// Silently does nothing if a subscriber is already installed.
pub fn init() {
    let _ = try_init(DEFAULT_DIRECTIVE);
}

/// Install the stderr subscriber, falling back to `default_directive` when
/// `RUST_LOG` is unset or unparseable.
///
/// Returns `Ok(false)` if this function already ran.
pub fn try_init(default_directive: &str) -> Result<bool, LoggingError> {
    if INIT.get().is_some() {
        return Ok(false);
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|source| {
            LoggingError::InvalidFilter {
                directive: default_directive.to_string(),
                source,
            }
        })?,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
    let _ = INIT.set(());

    match installed {
        Ok(()) => Ok(true),
        // Another subscriber (the application's own) is already global
        Err(_) if tracing::dispatcher::has_been_set() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
