use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing with `RUST_LOG` support, defaulting to `info`.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
