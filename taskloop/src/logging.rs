//! stderr diagnostics for taskloop.
//!
//! Spans and events from the controller, the worker and the stores go to
//! stderr, filtered by `RUST_LOG`. They are separate from the loop's record
//! of work: `progress.jsonl` and the per-iteration lines printed on stdout are
//! written no matter what the filter says.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directives used when `RUST_LOG` is unset, empty or unparsable.
const DEFAULT_DIRECTIVES: &str = "warn";

/// Install the stderr subscriber.
///
/// `RUST_LOG=taskloop=debug` shows state transitions and every spawned worker;
/// `RUST_LOG=taskloop=info` stops at selections and iteration results.
pub fn init() {
    let filter = filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

fn filter_from(directives: Option<String>) -> EnvFilter {
    let directives = directives.filter(|value| !value.trim().is_empty());
    match directives {
        Some(value) => EnvFilter::try_new(&value).unwrap_or_else(|err| {
            eprintln!("taskloop: ignoring {}={value:?}: {err}", EnvFilter::DEFAULT_ENV);
            EnvFilter::new(DEFAULT_DIRECTIVES)
        }),
        None => EnvFilter::new(DEFAULT_DIRECTIVES),
    }
}
