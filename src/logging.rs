use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVES: &str = "info,sandbox_dashboard=info";

/// Installs the global subscriber. `RUST_LOG` wins over the default filter.
pub fn init() -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let layer = tracing_subscriber::fmt::layer().with_target(true);
    #[cfg(debug_assertions)]
    let layer = layer.with_file(true).with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
}
