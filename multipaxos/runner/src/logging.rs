use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
pub(crate) fn init_tracing_with(level: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    if fmt().with_env_filter(filter).try_init().is_err() {
        tracing::warn!("Global tracing subscriber already set");
    }
}
