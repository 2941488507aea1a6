//! Logging initialization: `tracing-subscriber` with env-filter and a
//! plain `fmt` layer. No OpenTelemetry export — logging stays local to the
//! gateway process.

use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber from `RUST_LOG` (falling back to
/// `log_level` from [`crate::config::GatewayConfig`] when unset).
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // A subscriber is already installed (e.g. in tests); leave it alone.
    }
}

/// Opens the per-vMCP span every Composer/Router call runs under, so every
/// log line downstream carries `vmcp_id` and `user_id` without threading
/// them through every function signature.
pub fn vmcp_span(vmcp_id: &str, user_id: &str) -> Span {
    tracing::info_span!("vmcp", vmcp_id = %vmcp_id, user_id = %user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmcp_span_carries_ids() {
        let span = vmcp_span("vmcp-1", "user-1");
        assert_eq!(span.metadata().unwrap().name(), "vmcp");
    }
}
