use std::io;

use tracing_subscriber::EnvFilter;

/// Re-export tracing macros.
pub use tracing::{debug, error, info, trace, warn};

/// Default log filter if `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize logging.
///
/// Log lines go to stderr, keeping stdout free for command output.
pub fn init() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .event_format(format)
        .init();
}
