//! Centralised tracing initialisation for deepresearch binaries.
//!
//! Call [`init_tracing`] once at program start. Subsequent calls are ignored
//! because the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Dependencies that are noisy at `info`.
const QUIET: &[&str] = &["surrealdb=warn", "hyper=warn", "reqwest=warn", "rustls=warn"];

fn default_filter(level: Level) -> EnvFilter {
    QUIET.iter().fold(EnvFilter::new(level.as_str()), |filter, directive| {
        match directive.parse() {
            Ok(d) => filter.add_directive(d),
            Err(_) => filter,
        }
    })
}

/// Initialise the global tracing subscriber.
///
/// * `json` emits newline-delimited JSON log lines.
/// * `level` is the default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json().with_writer(std::io::stderr))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
