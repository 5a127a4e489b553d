use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "market_sync_lib=info,market_sync_desktop=info";

pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
