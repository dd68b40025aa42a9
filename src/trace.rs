use tracing_subscriber::EnvFilter;

/// Overrides the filter built from the command line and config entirely.
pub const LOG_ENV: &str = "REDSTAT_LOG";

/// The filter to use, `REDSTAT_LOG` when set, otherwise `level` for this
/// crate and the client, raised to `debug` when `verbose` is set.
pub fn levels(level: &str, verbose: bool) -> String {
    if let Ok(levels) = std::env::var(LOG_ENV) {
        return levels;
    }

    let level = match level {
        "off" => return "off".to_string(),
        "error" | "warn" | "info" if verbose => "debug",
        level => level,
    };

    [format!("redstat={level}"), format!("resp={level}")].join(",")
}

/// Install the global subscriber, logs go to stderr since stdout carries the
/// values.
pub fn init(color: bool, levels: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(levels))
        .with_ansi(color)
        .with_writer(std::io::stderr)
        .finish();

    // a second call happens in tests only
    let _ = tracing::subscriber::set_global_default(subscriber);
}
