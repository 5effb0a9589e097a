use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs a compact fmt subscriber filtered by `RUST_LOG` (default WARN).
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}
