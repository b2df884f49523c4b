//! Log output setup.
//!
//! The library emits `tracing` events and spans unconditionally (a span per
//! autograd operation, `debug` events for accumulator creation and reset,
//! `trace` events for node release). Installing a subscriber to print them
//! needs the `subscriber` feature; without it [`init_logging`] is a no-op.
//!
//! Environment:
//!
//! - `NDAUTOGRAD_LOG`: filter directives, e.g. `ndautograd=debug`.
//! - `NDAUTOGRAD_LOG_FORMAT`: `pretty`, `compact` or `json`.

#[cfg(feature = "subscriber")]
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors from installing the log subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter `{filter}`: {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    /// Parse a format name; unknown names fall back to `Pretty`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directives in `EnvFilter` syntax.
    pub filter: String,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
}

impl LogConfig {
    pub const FILTER_ENV: &'static str = "NDAUTOGRAD_LOG";
    pub const FORMAT_ENV: &'static str = "NDAUTOGRAD_LOG_FORMAT";
    pub const DEFAULT_FILTER: &'static str = "ndautograd=info,warn";

    /// Configuration from the given environment values.
    pub fn from_env_values(filter: Option<String>, format: Option<String>) -> Self {
        Self {
            format: format.as_deref().map(LogFormat::parse).unwrap_or_default(),
            filter: filter.unwrap_or_else(|| Self::DEFAULT_FILTER.to_string()),
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from_env_values(
            std::env::var(Self::FILTER_ENV).ok(),
            std::env::var(Self::FORMAT_ENV).ok(),
        )
    }
}

/// Install a global `tracing` subscriber.
///
/// # Errors
///
/// Returns `LoggingError::InvalidFilter` for malformed directives and
/// `LoggingError::AlreadyInitialized` if a subscriber is already set.
#[cfg(feature = "subscriber")]
pub fn init_logging(config: LogConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| LoggingError::InvalidFilter {
        filter: config.filter.clone(),
        message: e.to_string(),
    })?;

    let layer = fmt::layer()
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids);
    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(layer.pretty().with_ansi(config.with_ansi).with_filter(filter))
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(layer.compact().with_ansi(config.with_ansi).with_filter(filter))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(layer.json().with_filter(filter))
            .try_init(),
    };
    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// No-op without the `subscriber` feature.
#[cfg(not(feature = "subscriber"))]
pub fn init_logging(_config: LogConfig) -> Result<(), LoggingError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" compact "), LogFormat::Compact);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Pretty);
    }

    #[test]
    fn test_config_from_env_values() {
        let config = LogConfig::from_env_values(None, None);
        assert_eq!(config.filter, LogConfig::DEFAULT_FILTER);
        assert_eq!(config.format, LogFormat::Pretty);

        let config =
            LogConfig::from_env_values(Some("ndautograd=trace".into()), Some("json".into()));
        assert_eq!(config.filter, "ndautograd=trace");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[cfg(not(feature = "subscriber"))]
    #[test]
    fn test_init_is_noop() {
        assert!(init_logging(LogConfig::default()).is_ok());
    }
}
