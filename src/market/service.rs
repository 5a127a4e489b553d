use crate::error::AppError;
use crate::market::backend::{HttpHistorySource, WsFeedConnector};
use crate::market::config::SyncConfig;
use crate::market::controller::{SyncController, SyncStatus};
use crate::market::feed::FeedConnector;
use crate::market::history::HistorySource;
use crate::market::types::Candle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub status: SyncStatus,
    pub candles: Vec<Candle>,
}

#[derive(Debug)]
pub enum SyncCommand {
    SetSymbol {
        symbol: String,
        reply: oneshot::Sender<Result<bool, AppError>>,
    },
    SetInterval {
        interval: String,
        reply: oneshot::Sender<Result<bool, AppError>>,
    },
}

pub struct MarketSyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    snapshots: watch::Receiver<MarketSnapshot>,
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl MarketSyncHandle {
    pub async fn set_symbol(&self, symbol: impl Into<String>) -> Result<bool, AppError> {
        let (reply, response) = oneshot::channel();
        self.send(SyncCommand::SetSymbol {
            symbol: symbol.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| AppError::ServiceStopped)?
    }

    pub async fn set_interval(&self, interval: impl Into<String>) -> Result<bool, AppError> {
        let (reply, response) = oneshot::channel();
        self.send(SyncCommand::SetInterval {
            interval: interval.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| AppError::ServiceStopped)?
    }

    async fn send(&self, command: SyncCommand) -> Result<(), AppError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::ServiceStopped)
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MarketSnapshot> {
        self.snapshots.clone()
    }

    pub async fn teardown(self) {
        self.cancellation_token.cancel();
        if let Err(error) = self.join_handle.await {
            warn!(%error, "market sync task ended abnormally");
        }
    }
}

pub struct MarketSyncService;

impl MarketSyncService {
    pub fn spawn(config: SyncConfig) -> Result<MarketSyncHandle, AppError> {
        let history = HttpHistorySource::new(config.backend_url.clone())?;
        Ok(Self::spawn_with(
            config,
            Arc::new(history),
            Arc::new(WsFeedConnector),
        ))
    }

    pub fn spawn_with(
        config: SyncConfig,
        history: Arc<dyn HistorySource>,
        connector: Arc<dyn FeedConnector>,
    ) -> MarketSyncHandle {
        let emit_interval = config.emit_interval;
        let controller = SyncController::create(config, history, connector);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshots_tx, snapshots_rx) = watch::channel(MarketSnapshot::default());
        let cancellation_token = CancellationToken::new();
        let task_token = cancellation_token.clone();

        let join_handle = tokio::spawn(async move {
            run_sync_loop(controller, commands_rx, snapshots_tx, emit_interval, task_token).await;
        });

        MarketSyncHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
            cancellation_token,
            join_handle,
        }
    }
}

async fn run_sync_loop(
    mut controller: SyncController,
    mut commands: mpsc::Receiver<SyncCommand>,
    snapshots: watch::Sender<MarketSnapshot>,
    emit_interval: Duration,
    cancel_token: CancellationToken,
) {
    controller.start();
    let mut dirty = true;
    let mut ticker = tokio::time::interval(emit_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                dirty |= handle_command(&mut controller, command);
            }
            event = controller.next_event() => {
                if let Some(event) = event {
                    dirty |= controller.apply(event);
                }
            }
            _ = ticker.tick() => {
                let status = controller.status();
                let changed = dirty || snapshots.borrow().status != status;
                if changed {
                    snapshots.send_replace(MarketSnapshot {
                        status,
                        candles: controller.candles(),
                    });
                    dirty = false;
                }
            }
        }
    }

    controller.teardown();
    snapshots.send_replace(MarketSnapshot {
        status: controller.status(),
        candles: Vec::new(),
    });
    info!("market sync service stopped");
}

fn handle_command(controller: &mut SyncController, command: SyncCommand) -> bool {
    let (result, reply) = match command {
        SyncCommand::SetSymbol { symbol, reply } => {
            let result = controller.set_symbol(&symbol);
            if let Err(error) = &result {
                warn!(%symbol, %error, "symbol change rejected");
            }
            (result, reply)
        }
        SyncCommand::SetInterval { interval, reply } => {
            let result = controller.set_interval(&interval);
            if let Err(error) = &result {
                warn!(%interval, %error, "interval change rejected");
            }
            (result, reply)
        }
    };
    let changed = matches!(result, Ok(true));
    let _ = reply.send(result);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::config::SyncArgs;
    use crate::market::testing::{history_body, kline_frame, send_text, FakeConnector, FakeHistory};
    use crate::market::types::{ConnectionState, Interval};
    use tokio::time::timeout;

    async fn wait_for_snapshot<F>(snapshots: &mut watch::Receiver<MarketSnapshot>, done: F)
    where
        F: FnMut(&MarketSnapshot) -> bool,
    {
        timeout(Duration::from_secs(60), snapshots.wait_for(done))
            .await
            .expect("snapshot should be published before timeout")
            .expect("snapshot channel open");
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_backfill_and_stream_updates() {
        let config = SyncArgs::default()
            .normalize()
            .expect("default config is valid");
        let history = FakeHistory::new();
        let connector = FakeConnector::new();
        let session = connector.open_session("/api/kline?symbol=BTCUSDT&interval=1m");

        let handle = MarketSyncService::spawn_with(config, history.clone(), connector.clone());
        let mut snapshots = handle.subscribe();

        history
            .respond(
                "BTCUSDT",
                Interval::M1,
                Ok(history_body(&[(60, "1", "2", "0.5", "1.5", "10"), (120, "1.5", "2", "1", "1.8", "12")])),
            )
            .await;
        wait_for_snapshot(&mut snapshots, |snapshot| {
            snapshot.candles.len() == 2 && !snapshot.status.is_loading_history
        })
        .await;

        send_text(&session, &kline_frame("BTCUSDT", 180, 1.9));
        wait_for_snapshot(&mut snapshots, |snapshot| {
            snapshot.candles.len() == 3
                && snapshot.status.connection_state == ConnectionState::Connected
        })
        .await;

        let snapshot = handle.snapshot();
        let times: Vec<i64> = snapshot.candles.iter().map(|candle| candle.open_time).collect();
        assert_eq!(times, vec![60, 120, 180]);
        assert_eq!(snapshot.status.candle_count, 3);

        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_at_most_once_per_emit_interval_and_only_on_change() {
        let config = SyncArgs::default()
            .normalize()
            .expect("default config is valid");
        let emit_interval = config.emit_interval;
        let history = FakeHistory::new();
        let connector = FakeConnector::new();
        let candles = connector.open_session("/api/kline?symbol=BTCUSDT&interval=1m");
        let _prices = connector.open_session("/api/price?symbol=BTCUSDT");

        let handle = MarketSyncService::spawn_with(config, history.clone(), connector.clone());
        let mut snapshots = handle.subscribe();

        history
            .respond(
                "BTCUSDT",
                Interval::M1,
                Ok(history_body(&[(60, "1", "2", "0.5", "1.5", "10"), (120, "1.5", "2", "1", "1.8", "12")])),
            )
            .await;
        wait_for_snapshot(&mut snapshots, |snapshot| {
            snapshot.candles.len() == 2
                && !snapshot.status.is_loading_history
                && snapshot.status.connection_state == ConnectionState::Connected
                && snapshot.status.ticker_state == ConnectionState::Connected
        })
        .await;
        tokio::time::sleep(emit_interval * 3).await;
        snapshots.borrow_and_update();

        tokio::time::sleep(emit_interval * 6 + emit_interval / 4).await;
        assert!(!snapshots.has_changed().expect("snapshot channel open"));

        send_text(&candles, &kline_frame("BTCUSDT", 180, 1.9));
        send_text(&candles, &kline_frame("BTCUSDT", 240, 2.1));
        timeout(Duration::from_secs(1), snapshots.changed())
            .await
            .expect("update should be published")
            .expect("snapshot channel open");
        let times: Vec<i64> = snapshots
            .borrow_and_update()
            .candles
            .iter()
            .map(|candle| candle.open_time)
            .collect();
        assert_eq!(times, vec![60, 120, 180, 240]);

        tokio::time::sleep(emit_interval * 6).await;
        assert!(!snapshots.has_changed().expect("snapshot channel open"));

        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn commands_reply_with_validation_result() {
        let config = SyncArgs::default()
            .normalize()
            .expect("default config is valid");
        let history = FakeHistory::new();
        let handle = MarketSyncService::spawn_with(config, history.clone(), FakeConnector::new());
        let mut snapshots = handle.subscribe();

        assert!(handle.set_symbol("ethusdt").await.expect("valid symbol"));
        assert!(!handle.set_symbol("ETHUSDT").await.expect("valid symbol"));
        assert!(handle.set_interval("9m").await.is_err());
        assert!(handle.set_symbol("").await.is_err());
        assert!(handle.set_interval("4h").await.expect("valid interval"));

        wait_for_snapshot(&mut snapshots, |snapshot| {
            snapshot
                .status
                .key
                .as_ref()
                .is_some_and(|key| key.to_string() == "ETHUSDT@4h")
                && snapshot.status.is_loading_history
        })
        .await;

        handle.teardown().await;
        let last = snapshots.borrow().clone();
        assert_eq!(last.status.key, None);
        assert!(last.candles.is_empty());
        assert_eq!(last.status.connection_state, ConnectionState::Disconnected);
    }
}
