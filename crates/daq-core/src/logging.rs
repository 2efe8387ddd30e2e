//! Tracing subscriber setup.
//!
//! Drivers only emit `tracing` events; the application decides where they go by
//! calling [`init_tracing`] once at startup. `RUST_LOG` takes precedence over
//! the configured level so a single module can be turned up without editing the
//! settings file.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::{DaqError, DaqResult};

/// Install the global tracing subscriber.
///
/// Calling this again after a subscriber is installed is harmless: the
/// existing subscriber stays and the call returns `Ok(())`.
pub fn init_tracing(settings: &LoggingSettings) -> DaqResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.level.to_lowercase()))
        .map_err(|e| {
            DaqError::Configuration(format!("Invalid log level '{}': {}", settings.level, e))
        })?;

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match settings.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(env_filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(fmt_layer).try_init() {
        Ok(()) => Ok(()),
        Err(e) => {
            // Expected in tests and when several components initialise logging
            tracing::debug!(error = %e, "tracing subscriber already installed");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        let settings = LoggingSettings {
            level: "debug".into(),
            format: LogFormat::Compact,
        };
        assert!(init_tracing(&settings).is_ok());
        assert!(init_tracing(&settings).is_ok());
    }
}
