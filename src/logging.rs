//! Structured logging setup.
//!
//! Progress lines go through `tracing` to stderr. `RUST_LOG`, when set, takes
//! precedence over the configured level. Initialization happens at most once
//! per process; later calls are ignored.

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Environment variable the CLI reads for the default level (`trace` .. `error`).
pub const LOG_LEVEL_ENV: &str = "APKWEAVE_LOG_LEVEL";
/// Environment variable switching to JSON lines (`true`/`false`).
pub const LOG_JSON_ENV: &str = "APKWEAVE_LOG_JSON";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    /// One JSON object per event instead of human-readable lines.
    pub use_json: bool,
    pub include_target: bool,
    /// File and line of the emitting call site.
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }
}

/// Case-insensitive level name; unknown names fall back to INFO.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(config.level)));

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        }
    });
}

fn default_directive(level: Level) -> String {
    format!("apkweave={}", level.to_string().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level(" Warn "), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
    }

    #[test]
    fn test_parse_level_invalid_defaults_to_info() {
        assert_eq!(parse_level("loud"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
        assert!(!config.include_location);
    }

    #[test]
    fn test_default_directive_targets_crate() {
        assert_eq!(default_directive(Level::DEBUG), "apkweave=debug");
        assert_eq!(
            default_directive(LoggingConfig::with_level(Level::WARN).level),
            "apkweave=warn"
        );
    }
}
