//! Process-wide tracing subscriber.

use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Builds the filter: `RUST_LOG` when set and valid, else `level`, else `info`.
pub fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber and routes `log` records into it.
///
/// Returns `false` when a subscriber was already installed; calling this
/// twice is harmless.
pub fn init_tracing(level: &str, json: bool) -> bool {
    let filter = build_env_filter(level);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        install(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            ),
        )
    } else {
        install(registry.with(tracing_subscriber::fmt::layer().with_target(true)))
    };

    if installed {
        // Fails only when another logger owns the `log` facade.
        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::debug!(error = %e, "log records are not bridged into tracing");
        }
    }

    installed
}

pub fn init_from_config(config: &LoggingConfig) -> bool {
    init_tracing(&config.level, config.json)
}

fn install<S>(subscriber: S) -> bool
where
    S: Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::set_global_default(subscriber).is_ok()
}
