//! Logging initialisation for hosts embedding the memory engine.
//!
//! The engine itself only emits `tracing` events and spans; a host that has
//! no subscriber of its own can call [`init_tracing`] once at startup.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `MNEMOS_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! mnemos_runtime::telemetry::init_tracing("mnemos");
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format selected by `MNEMOS_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("MNEMOS_LOG_FORMAT").ok().as_deref())
    }

    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Returns `false` when a global subscriber was already installed, in which
/// case the existing one is left in place.
pub fn init_tracing(service_name: &str) -> bool {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let installed = match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .is_ok(),
    };
    if installed {
        tracing::info!(service = service_name, "tracing initialised");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_defaults_to_compact() {
        assert_eq!(LogFormat::parse(None), LogFormat::Compact);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
    }

    #[test]
    fn second_initialisation_is_a_no_op() {
        init_tracing("first");
        assert!(!init_tracing("second"));
    }
}
