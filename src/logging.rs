//! Log subscriber setup for the command-line binary
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the binary. Logs go to stderr so stdout stays free for payloads.

use crate::config::LogConfig;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber; `RUST_LOG` overrides the configured level
///
/// Does nothing when a subscriber is already installed.
pub fn init(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = if config.json {
        let fmt = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::NONE)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry().with(filter).with(fmt).try_init()
    } else {
        let fmt = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry().with(filter).with(fmt).try_init()
    };

    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}
