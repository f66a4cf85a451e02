// Process-wide tracing setup.

use tracing_subscriber::EnvFilter;

use crate::config_loader::LogFormat;

/// `RUST_LOG` wins over the configured filter when it is set.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Calling it twice is harmless: the second
/// install is refused and reported back as `false`.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_target(true);

    match format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Pretty => builder.try_init().is_ok(),
    }
}
