//! Bootstrap utilities for test binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the `LEDGER_PROBE_LOG` environment variable.
///
/// Defaults to "info" level if `LEDGER_PROBE_LOG` is not set. Safe to call
/// more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(filter_env = LOG_ENV_VAR, "Tracing initialized");
    }
}
