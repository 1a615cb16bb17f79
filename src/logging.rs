//! Logging and tracing infrastructure for covex.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! caller's choice. These helpers cover the common cases (CLI, tests).

use std::sync::Once;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// This should be called once at program startup.
/// Subsequent calls are ignored.
pub fn init_tracing() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true);

        // A subscriber installed by the host wins; ours is best effort.
        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .try_init();

        debug!("covex tracing initialized");
    });
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true);

        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .try_init();

        debug!("covex tracing initialized (JSON mode)");
    });
}

/// Macro for creating spans with automatic error logging
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::info_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}

/// Macro for logging and returning errors
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let e = $err;
        tracing::error!(error = %e, "Operation failed");
        e
    }};
    ($err:expr, $msg:expr) => {{
        let e = $err;
        tracing::error!(error = %e, context = $msg, "Operation failed");
        e
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_once() {
        // Should be callable multiple times without panic
        init_tracing();
        init_tracing();
        init_tracing_json();
    }

    #[test]
    fn test_structured_logging() {
        init_tracing();
        let trace_name = "run-1.drcov";
        let spans = 1024;
        info!(trace = %trace_name, spans, "Parsed coverage");
    }

    #[test]
    fn test_span_and_error_macros() {
        init_tracing();
        let span = span_trace!("compose", generation = 3);
        let _guard = span.enter();
        let err = log_error!(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_string(), "boom");
        let err = log_error!(
            crate::error::CovexError::FileTooLarge { size: 9, limit: 8 },
            "trace load failed"
        );
        assert!(matches!(err, crate::error::CovexError::FileTooLarge { .. }));
    }
}
