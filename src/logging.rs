use crate::core::paths::env;
use tracing_subscriber::{fmt, EnvFilter};

/// Our own events at info, dependencies (reqwest, hyper) only when they warn
pub const DEFAULT_FILTER: &str = "warn,coldpair=info";

fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. `RUST_LOG` overrides [`DEFAULT_FILTER`];
/// `COLDPAIR_LOG_JSON=1` switches to JSON lines. Always stderr, so command
/// output on stdout stays pipeable.
pub fn init_logging() {
    let filter = filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref());
    let json = std::env::var(env::LOG_JSON).map_or(false, |v| v == "1");

    let builder = fmt::Subscriber::builder().with_env_filter(filter).with_writer(std::io::stderr).with_target(false);
    let _ = if json { builder.json().try_init() } else { builder.compact().try_init() };
}
