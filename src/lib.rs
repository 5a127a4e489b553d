pub mod error;
pub mod market;
pub mod telemetry;

pub use error::{AppError, ErrorKind, FeedError, HistoryError};
pub use market::config::{SyncArgs, SyncConfig};
pub use market::controller::{SyncController, SyncEvent, SyncStatus};
pub use market::service::{MarketSnapshot, MarketSyncHandle, MarketSyncService};
pub use market::store::CandleStore;
pub use market::types::{Candle, ConnectionState, Interval, SubscriptionKey};

use rust_decimal::Decimal;
use tracing::info;

pub fn run() -> Result<(), AppError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_until_interrupted())
}

async fn run_until_interrupted() -> Result<(), AppError> {
    telemetry::init();

    let config = SyncArgs::from_env()?.normalize()?;
    info!(
        backend = %config.backend_url,
        key = %config.default_key,
        history_limit = config.history_limit,
        "starting market sync"
    );

    let handle = MarketSyncService::spawn(config)?;
    let mut snapshots = handle.subscribe();
    let mut last_logged: Option<(Option<i64>, Option<Decimal>)> = None;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let latest = snapshot.candles.last();
                let marker = (latest.map(|candle| candle.open_time), snapshot.status.current_price);
                if last_logged.as_ref() == Some(&marker) {
                    continue;
                }
                info!(
                    key = ?snapshot.status.key.as_ref().map(ToString::to_string),
                    connection = ?snapshot.status.connection_state,
                    candles = snapshot.candles.len(),
                    latest_open_time = ?marker.0,
                    latest_close = ?latest.map(|candle| candle.close),
                    price = ?marker.1,
                    "market snapshot"
                );
                last_logged = Some(marker);
            }
        }
    }

    handle.teardown().await;
    info!("market sync stopped");
    Ok(())
}
