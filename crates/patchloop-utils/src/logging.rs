//! Tracing setup and operation lifecycle events.
//!
//! Every workflow operation logs a start event, then either a completion or
//! an error event carrying `plan_id`, `operation` and `duration_ms`.

use tracing::{Level, error, info, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Install the global subscriber. Logs go to stderr so `--json` stdout stays clean.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("patchloop=debug,info")
            } else {
                EnvFilter::try_new("patchloop=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false);

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_span_events(FmtSpan::CLOSE).compact())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.compact())
            .try_init()?;
    }

    Ok(())
}

pub fn operation_span(plan_id: &str, operation: &str) -> tracing::Span {
    span!(
        Level::INFO,
        "operation",
        plan_id = %plan_id,
        operation = %operation,
    )
}

pub fn log_operation_start(plan_id: &str, operation: &str) {
    info!(plan_id = %plan_id, operation = %operation, "Starting operation");
}

pub fn log_operation_complete(plan_id: &str, operation: &str, duration_ms: u128) {
    info!(
        plan_id = %plan_id,
        operation = %operation,
        duration_ms = %duration_ms,
        "Operation completed"
    );
}

pub fn log_operation_error(plan_id: &str, operation: &str, error: &str, duration_ms: u128) {
    error!(
        plan_id = %plan_id,
        operation = %operation,
        duration_ms = %duration_ms,
        error = %error,
        "Operation failed"
    );
}
