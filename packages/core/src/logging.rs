//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise structured logging. `RUST_LOG` wins; the default keeps this
/// crate at info and everything else at warn.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lostpaws_notifier=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
