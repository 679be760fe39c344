use tracing_subscriber::fmt::fmt;
use tracing_subscriber::fmt::time::UtcTime;

/// Initializes logging for host applications that do not bring their own
/// subscriber.
///
/// `env_filter` uses the usual `tracing_subscriber` directive syntax, e.g.
/// `"blobcache=debug"`.
pub fn init_logging(env_filter: &str) {
    fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .init();
}
