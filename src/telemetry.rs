use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// JSON lines on stdout, filtered through `RUST_LOG` (default `info`). Safe
/// to call multiple times; later calls are no-ops. Records emitted through
/// the `log` crate (actix access logs) are forwarded as well.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
