//! Observability utilities.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing subscriber once for the process.
///
/// `default_level` is the `EnvFilter` fallback used when `RUST_LOG` is
/// unset (from `ObservabilityConfig::log_level`); `json` selects the JSON
/// formatter over plain text (from `ObservabilityConfig::json_logs`).
pub fn init_tracing(default_level: &str, json: bool) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::init_tracing;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing("info", false);
        init_tracing("info", false);
    }

    #[tracing_test::traced_test]
    #[test]
    fn emitted_events_are_captured() {
        tracing::info!(cpus = 4, "topology discovered");
        assert!(logs_contain("topology discovered"));
    }
}
