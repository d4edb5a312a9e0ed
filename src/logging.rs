//! # Structured Logging Module
//!
//! Environment-aware structured logging for the step driver. Output is
//! human-readable in development and JSON in production so that per-index
//! step transitions can be correlated by field rather than by grepping.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
/// If an embedding application already installed a global subscriber, this
/// is a no-op and its subscriber wins.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));

        let use_json = environment == "production";
        let console_layer = if use_json {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .boxed()
        } else {
            fmt::layer().with_target(true).with_ansi(true).boxed()
        };

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(filter);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "global tracing subscriber already initialized - continuing with existing one"
            );
        }

        tracing::info!(environment = %environment, json = use_json, "structured logging initialized");
    });
}

fn get_environment() -> String {
    std::env::var("LIFECYCLE_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_levels_per_environment() {
        assert_eq!(default_log_level("production"), "info");
        assert_eq!(default_log_level("test"), "warn");
        assert_eq!(default_log_level("development"), "debug");
    }

    #[test]
    fn init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
    }
}
