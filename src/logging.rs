use tracing_subscriber::EnvFilter;

/// Initialize structured logging with tracing-subscriber.
///
/// `RUST_LOG` wins when set; otherwise `debug` forces the debug level and
/// `log_level` applies.
pub fn init(log_level: &str, debug: bool) {
    let level = if debug { "debug" } else { log_level };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
