use tracing_subscriber::EnvFilter;

/// Installs the global log subscriber, writing to stderr so receipts on
/// stdout stay clean.
///
/// `RUST_LOG` wins over `level` when set. Calling this twice is harmless.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("till={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
