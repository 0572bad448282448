//! Tracing setup. Logs go to stderr; stdout carries the relayed lines.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "dbwin=info,dbwin_relay=info";

pub fn init_tracing(log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
