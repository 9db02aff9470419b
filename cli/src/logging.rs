//! Tracing initialisation for the `apercu` binary.
//!
//! Logs go to stderr so stdout carries only event lines.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level used when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_LEVEL: &str = "warn";

/// Build the filter: `--log-level` directives, else `RUST_LOG`, else [`DEFAULT_LEVEL`].
/// Unparsable directives fall through to the next source.
pub fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LEVEL))
}

/// Initialise tracing. Should be called once at startup.
pub fn init_tracing(directives: Option<&str>) {
    tracing_subscriber::registry()
        .with(env_filter(directives))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
