//! Tracing subscriber driven by [`LoggingConfig`].
//!
//! Events go to stderr so Katakana printed on stdout stays machine-readable.

use kana_core::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates that follow the configured level. Dependencies only report warnings.
const ENGINE_CRATES: &[&str] = &["kanalizer", "kana_core", "kana_vocab", "s2s_model", "kana"];

/// Filter directives for a configured level.
///
/// A bare level such as `debug` is scoped to the engine crates. A value that
/// already names targets (`s2s_model=trace,warn`) is used as is.
pub fn directives(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    ENGINE_CRATES
        .iter()
        .fold(String::from("warn"), |acc, krate| format!("{acc},{krate}={level}"))
}

/// Install the global subscriber.
///
/// `RUST_LOG` replaces the configured filter when set. Returns `false` when a
/// subscriber is already installed, leaving it in place.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(&config.level)));

    let (text, json) = match config.format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .is_ok()
}
