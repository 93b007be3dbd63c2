//! Tracing subscriber setup.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the global fmt subscriber with an env-filter, bridging the
/// crate's `log` records through `tracing-log`. Safe to call more than
/// once; later calls are no-ops.
pub fn init_logging(default_filter: &str) {
    let default_filter = default_filter.to_string();
    INIT.call_once(move || {
        let _ = tracing_log::LogTracer::init();

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging("info");
        init_logging("debug");
        log::info!("logging initialized");
    }
}
