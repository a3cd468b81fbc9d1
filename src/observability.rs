//! Structured logging setup.
//!
//! Library code only emits `tracing` events; the binary decides where they
//! go by calling [`init_tracing`] once at startup.

use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Build the event filter: `RUST_LOG` when set, otherwise `level`.
#[must_use]
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()))
}

/// Install the global subscriber with plain or JSON output on stderr.
///
/// Calling it a second time in one process is a no-op apart from a debug
/// event.
pub fn init_tracing(level: &str, json: bool) {
    let filter = env_filter(level);

    let installed = if json {
        let json_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        Registry::default().with(filter).with(json_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);
        Registry::default().with(filter).with(fmt_layer).try_init()
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
        return;
    }
    tracing::debug!(level, json, "Tracing initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing("debug", false);
        init_tracing("info", true);
        tracing::info!("still logging");
    }

    #[test]
    fn test_env_filter_accepts_levels() {
        for level in ["trace", "debug", "INFO", "warn", "error"] {
            let _ = env_filter(level);
        }
    }
}
