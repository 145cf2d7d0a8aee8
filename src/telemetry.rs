//! Logging and runtime setup shared by the binaries

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{BtrfaasError, Result};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `log_level`. Installing twice is a no-op.
pub fn init_tracing(log_level: &str) {
    let log_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(log_filter)
        .try_init();
}

/// Multi-threaded Tokio runtime for a binary's main loop
pub fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| BtrfaasError::Server(format!("Failed to create Tokio runtime: {}", e)))
}
