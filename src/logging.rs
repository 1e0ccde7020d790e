use std::io;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "BIOMAJ_MIGRATE_LOG";

/// Route `tracing` events to stderr. The filter comes from
/// `BIOMAJ_MIGRATE_LOG`, `info` when unset or invalid.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}
