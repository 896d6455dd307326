//! tracing-subscriber setup.

use tracing_subscriber::EnvFilter;

use depwatch_core::LogFormat;

pub const DEFAULT_FILTER: &str = "info,depwatch=debug";

/// `RUST_LOG` when set, otherwise [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init(format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
