//! Tracing subscriber bootstrap.
//!
//! The engine only emits through `tracing` macros; hosts that do not install
//! their own subscriber can call [`init_tracing`] once at startup.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

/// Builds the filter: `RUST_LOG` if set and valid, else `default_filter`.
#[must_use]
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Installs a global `fmt` subscriber.
///
/// Only the first call has an effect. Returns false if this call did not
/// install the subscriber, either because an earlier call did or because
/// the host already set one.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> bool {
    static INIT: OnceLock<bool> = OnceLock::new();
    let mut installed_now = false;
    INIT.get_or_init(|| {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter(default_filter))
            .with_target(true);
        let installed = match format {
            LogFormat::Plain => builder.try_init().is_ok(),
            LogFormat::Json => builder.json().with_current_span(true).try_init().is_ok(),
        };
        installed_now = installed;
        installed
    });
    installed_now
}
