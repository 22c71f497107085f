// Shared tracing setup for all three binaries
//
// Every process (ingest, featurizer, inference) calls `init` once at
// startup. There is no TUI in this pipeline, so unlike the tool this crate
// was grown from there is only one branch: logs always go to stdout.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// Precedence: `RUST_LOG` env var > `default_level` argument.
pub fn init(service: &str, default_level: &str) {
    let default_filter = format!("{service}={default_level},tower_http=info,axum=info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
