use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs a formatted `tracing` subscriber for hosts that do not bring
/// their own. `RUST_LOG` overrides `level`. Calling this twice is a no-op.
pub fn init(level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_ansi(true))
        .try_init();
}
