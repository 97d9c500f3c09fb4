//! Diagnostic logging
//!
//! Structured diagnostics go through `tracing`, always to stderr. This is
//! independent of the command audit log written by [`crate::command_log`],
//! which is the operator-facing record of what the dispatcher executed.
//!
//! ## Environment Variables
//!
//! * `DOCKERPIPE_LOG_FORMAT` - `json` for JSON lines, anything else for text
//! * `DOCKERPIPE_LOG` - filter directives, takes precedence over `RUST_LOG`
//! * `RUST_LOG` - standard fallback filter

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system.
///
/// `format` selects `"json"` or `"text"`; `None` defers to
/// `DOCKERPIPE_LOG_FORMAT`. `default_level` is used when neither
/// `DOCKERPIPE_LOG` nor `RUST_LOG` is set. Subsequent calls are no-ops.
///
/// ```rust
/// use dockerpipe_core::logging;
///
/// logging::init(None, "info").expect("Failed to initialize logging");
/// ```
pub fn init(format: Option<&str>, default_level: &str) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter(default_level);

        let env_format = std::env::var("DOCKERPIPE_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(fmt::format::FmtSpan::CLOSE)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

/// Build the filter from `DOCKERPIPE_LOG`, then `RUST_LOG`, then `default_level`.
fn create_env_filter(default_level: &str) -> EnvFilter {
    let fallback = || EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Ok(spec) = std::env::var("DOCKERPIPE_LOG") {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| {
            eprintln!(
                "Invalid DOCKERPIPE_LOG specification '{}', using default '{}'",
                spec, default_level
            );
            fallback()
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback())
    }
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_init_multiple_calls_safe() {
        assert!(init(None, "info").is_ok());
        assert!(init(Some("json"), "debug").is_ok());
        assert!(init(Some("text"), "warn").is_ok());
        assert!(is_initialized());
    }

    #[test]
    #[serial]
    fn test_env_filter_falls_back_on_invalid_spec() {
        std::env::set_var("DOCKERPIPE_LOG", "dockerpipe=loud");
        let filter = create_env_filter("warn");
        std::env::remove_var("DOCKERPIPE_LOG");
        assert_eq!(filter.to_string(), EnvFilter::new("warn").to_string());
    }

    #[test]
    #[serial]
    fn test_env_filter_prefers_dockerpipe_log() {
        std::env::set_var("DOCKERPIPE_LOG", "trace");
        let filter = create_env_filter("info");
        std::env::remove_var("DOCKERPIPE_LOG");
        assert_eq!(filter.to_string(), EnvFilter::new("trace").to_string());
    }
}
